//! Configuration for surge load tests
//!
//! Covers website profiles (what to hit), named test configurations and user
//! behaviours (how hard and how fast), HTTP session settings, and the
//! translation of a named test into a command line.

pub mod duration;
pub mod error;
pub mod http;
pub mod invocation;
pub mod loader;
pub mod plan;
pub mod profiles;
pub mod stress;
pub mod validation;

pub use duration::{parse_span, RunTime};
pub use error::{ConfigError, ConfigResult};
pub use http::{HttpConfig, PoolConfig, RetryConfig};
pub use invocation::{report_prefix, Invocation};
pub use loader::{reports_dir_from_env, ConfigLoader, SurgeConfig};
pub use plan::{Overrides, RunMode, TestMode, TestProfile};
pub use profiles::{CatalogEntry, Category, StaticPage, WebsiteProfile, WebsiteProfiles};
pub use stress::{SpawnRate, StressTestConfig, TestConfiguration, UserBehavior, UserClassWeights};
pub use validation::Validatable;
