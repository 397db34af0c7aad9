//! Crate-wide constants and default configuration values
//!
//! This module centralizes all magic numbers and configuration constants
//! to improve maintainability and make the engine more configurable.

#![allow(dead_code)]

/// Default timeout for HTTP requests in seconds
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 30;

/// Maximum number of idle connections per host in the HTTP client pool
pub const HTTP_POOL_MAX_IDLE_PER_HOST: usize = 100;

/// Header used to propagate the outbound correlation identity
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Length of a derived correlation identity, in hex digits
pub const CORRELATION_ID_HEX_DIGITS: usize = 16;

/// Maximum number of redirect hops the default transport follows
pub const MAX_REDIRECT_HOPS: usize = 10;

/// Default acceptable response status ranges, in validator syntax
pub const DEFAULT_STATUS_RANGES: &str = "100..399";

/// Environment variable names
pub mod env_vars {
    /// Environment variable for base URL override
    pub const BASE_URL: &str = "COURIER_BASE_URL";

    /// Environment variable for HTTP timeout override in seconds
    pub const HTTP_TIMEOUT: &str = "COURIER_HTTP_TIMEOUT";

    /// Environment variable for log file path override
    pub const LOG_FILE: &str = "COURIER_LOG_FILE";
}
