//! Configuration validation traits and utilities

use crate::error::{ConfigError, ConfigResult};

/// Trait for validatable configuration
pub trait Validatable {
    /// Validate the configuration
    fn validate(&self) -> ConfigResult<()>;

    /// Get the domain name for error reporting
    fn domain_name(&self) -> String;

    /// Helper to create a domain-specific validation error
    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::DomainError {
            domain: self.domain_name(),
            message: message.into(),
        }
    }
}

fn domain_error(domain: &str, message: String) -> ConfigError {
    ConfigError::DomainError {
        domain: domain.to_string(),
        message,
    }
}

/// Validate a required string field
pub fn validate_required_string(value: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(domain_error(domain, format!("{} cannot be empty", field_name)));
    }
    Ok(())
}

/// Validate a positive number
pub fn validate_positive<T>(value: T, field_name: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    // NaN compares false against everything, so test the positive case.
    if !(value > T::default()) {
        return Err(domain_error(
            domain,
            format!("{} must be greater than 0, got {}", field_name, value),
        ));
    }
    Ok(())
}

/// Validate an absolute http(s) URL with a host
pub fn validate_url(url: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    if url.is_empty() {
        return Err(domain_error(domain, format!("{} cannot be empty", field_name)));
    }

    let parsed = url::Url::parse(url).map_err(|e| {
        domain_error(domain, format!("{} has invalid URL format: {}", field_name, e))
    })?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(domain_error(
                domain,
                format!("{} scheme '{}' not allowed (only http/https)", field_name, scheme),
            ))
        }
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(domain_error(domain, format!("{} must have a host", field_name)));
    }

    Ok(())
}

/// Validate a site-relative path such as `/kurse/sprachen`
pub fn validate_relative_path(path: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    if !path.starts_with('/') {
        return Err(domain_error(
            domain,
            format!("{} '{}' must start with '/'", field_name, path),
        ));
    }

    let path_part = path.split(['?', '#']).next().unwrap_or(path);
    if path_part.starts_with("//") || path_part.contains("://") {
        return Err(domain_error(
            domain,
            format!("{} '{}' must not carry a scheme or host", field_name, path),
        ));
    }

    if path.chars().any(char::is_whitespace) {
        return Err(domain_error(
            domain,
            format!("{} '{}' must not contain whitespace", field_name, path),
        ));
    }

    // Must resolve against a base without escaping it.
    let base = url::Url::parse("http://localhost/")?;
    let joined = base.join(path).map_err(|e| {
        domain_error(domain, format!("{} '{}' is not a valid path: {}", field_name, path, e))
    })?;
    if joined.host_str() != Some("localhost") {
        return Err(domain_error(
            domain,
            format!("{} '{}' resolves to another host", field_name, path),
        ));
    }

    Ok(())
}

/// Validate a probability in `0.0..=1.0`
pub fn validate_probability(value: f64, field_name: &str, domain: &str) -> ConfigResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(domain_error(
            domain,
            format!("{} must be between 0 and 1, got {}", field_name, value),
        ));
    }
    Ok(())
}

/// Validate a `min..=max` range of non-negative values
pub fn validate_range(min: f64, max: f64, field_name: &str, domain: &str) -> ConfigResult<()> {
    if !(min >= 0.0) || !(max >= 0.0) {
        return Err(domain_error(
            domain,
            format!("{} bounds must be non-negative, got {}..{}", field_name, min, max),
        ));
    }
    if min > max {
        return Err(domain_error(
            domain,
            format!("{} minimum {} exceeds maximum {}", field_name, min, max),
        ));
    }
    Ok(())
}

/// Validate an enum choice
pub fn validate_enum_choice<T>(
    value: &str,
    valid_choices: &[T],
    field_name: &str,
    domain: &str,
) -> ConfigResult<()>
where
    T: AsRef<str>,
{
    let valid: Vec<&str> = valid_choices.iter().map(|c| c.as_ref()).collect();

    if !valid.iter().any(|&v| v.eq_ignore_ascii_case(value)) {
        return Err(domain_error(
            domain,
            format!(
                "{} has invalid value '{}'. Valid choices: {}",
                field_name,
                value,
                valid.join(", ")
            ),
        ));
    }

    Ok(())
}
