//! HTTP session for surge virtual users
//!
//! One pooled `reqwest` client is shared by every virtual user of a run. The
//! [`HttpClient`] trait is the seam the engine talks to, so tests can swap in a
//! fake without a network.

pub mod client;
pub mod errors;
pub mod types;

pub use client::{HttpClient, HttpSession};
pub use errors::HttpError;
pub use types::{HttpRequest, HttpResponse};
