//! Crate error taxonomy.
//!
//! Two enums live here, matching spec §7: [`ExchangeError`] is the inner
//! taxonomy the Rule Engine switches on when deciding how to treat a failed
//! exchange call, and [`TtsloError`] is the outer taxonomy `main` switches on
//! to pick an exit code.

use chrono::{DateTime, Utc};

/// Typed exchange-call failure, carrying enough context to log and to notify on.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ExchangeError {
    /// Deadline exceeded waiting for a response.
    #[error("timeout calling {endpoint}: {message}")]
    Timeout {
        /// Endpoint name (e.g. `AddOrder`).
        endpoint: String,
        /// Upstream or local message.
        message: String,
        /// When the failure was observed.
        at: DateTime<Utc>,
    },
    /// Name resolution or TCP-level failure.
    #[error("connection error calling {endpoint}: {message}")]
    Connection {
        /// Endpoint name.
        endpoint: String,
        /// Upstream or local message.
        message: String,
        /// When the failure was observed.
        at: DateTime<Utc>,
    },
    /// HTTP 429.
    #[error("rate limited calling {endpoint}: {message}")]
    RateLimit {
        /// Endpoint name.
        endpoint: String,
        /// Upstream message.
        message: String,
        /// When the failure was observed.
        at: DateTime<Utc>,
    },
    /// HTTP >= 500.
    #[error("server error ({status:?}) calling {endpoint}: {message}")]
    ServerError {
        /// Endpoint name.
        endpoint: String,
        /// Upstream message.
        message: String,
        /// HTTP status code, if known.
        status: Option<u16>,
        /// When the failure was observed.
        at: DateTime<Utc>,
    },
    /// Malformed response, non-429 4xx, or a missing required field.
    #[error("error calling {endpoint}: {message}")]
    Other {
        /// Endpoint name.
        endpoint: String,
        /// Upstream or local message.
        message: String,
        /// HTTP status code, if known.
        status: Option<u16>,
        /// When the failure was observed.
        at: DateTime<Utc>,
    },
}

impl ExchangeError {
    /// Endpoint name this failure occurred against.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        match self {
            ExchangeError::Timeout { endpoint, .. }
            | ExchangeError::Connection { endpoint, .. }
            | ExchangeError::RateLimit { endpoint, .. }
            | ExchangeError::ServerError { endpoint, .. }
            | ExchangeError::Other { endpoint, .. } => endpoint,
        }
    }

    /// Upstream or local message describing the failure.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            ExchangeError::Timeout { message, .. }
            | ExchangeError::Connection { message, .. }
            | ExchangeError::RateLimit { message, .. }
            | ExchangeError::ServerError { message, .. }
            | ExchangeError::Other { message, .. } => message,
        }
    }

    /// A short machine-stable classification tag, used in notification bodies.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ExchangeError::Timeout { .. } => "timeout",
            ExchangeError::Connection { .. } => "connection",
            ExchangeError::RateLimit { .. } => "rate_limit",
            ExchangeError::ServerError { .. } => "server_error",
            ExchangeError::Other { .. } => "other",
        }
    }

    /// True for failures spec §7 classifies as `TransientApiError` (retried next tick).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Timeout { .. }
                | ExchangeError::Connection { .. }
                | ExchangeError::RateLimit { .. }
                | ExchangeError::ServerError { .. }
        )
    }

    /// True when the upstream message mentions that the index price trigger is
    /// unavailable (spec §4.1 / §8 S6), case-insensitively.
    #[must_use]
    pub fn is_index_unavailable(&self) -> bool {
        self.message().to_lowercase().contains("index unavailable")
    }
}

/// Outer crate error taxonomy; `main` matches on this to choose an exit code.
#[derive(thiserror::Error, Debug)]
pub enum TtsloError {
    /// Static validation rejected one or more rules.
    #[error("configuration validation failed: {0} row(s) in error")]
    Configuration(usize),
    /// A required credential scope was absent.
    #[error("missing required {scope} credential for account `{account}`")]
    Credential {
        /// `read-only` or `read-write`.
        scope: &'static str,
        /// Account name the credential was required for.
        account: String,
    },
    /// A persistence operation failed after exhausting its retries.
    #[error("persistence error: {0}")]
    Persistence(#[from] anyhow::Error),
    /// Any other failure that does not fit a narrower variant.
    #[error(transparent)]
    Other(#[from] std::io::Error),
}
