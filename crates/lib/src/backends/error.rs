//! Backend error taxonomy and the transient/permanent split used by the retry wrapper.

/// Whether retrying the same request may succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rate limit, 5xx, connection reset or timeout.
    Transient,
    /// Auth, other 4xx, malformed response, missing configuration.
    Permanent,
}

/// Network failure kind, reduced from the HTTP client error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    ConnectionReset,
    Timeout,
    Other,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{backend} api error: HTTP {status} {body}")]
    Status {
        backend: String,
        status: u16,
        body: String,
    },
    #[error("{backend} request failed ({kind:?}): {detail}")]
    Network {
        backend: String,
        kind: NetworkErrorKind,
        detail: String,
    },
    #[error("{backend} returned an invalid response: {detail}")]
    Malformed { backend: String, detail: String },
    #[error("{backend} is not configured: {detail}")]
    NotConfigured { backend: String, detail: String },
}

const MAX_ERROR_BODY: usize = 512;

impl BackendError {
    /// Build a status error, truncating large bodies.
    pub fn status(backend: &str, status: u16, body: String) -> Self {
        let body = if body.chars().count() > MAX_ERROR_BODY {
            let cut: String = body.chars().take(MAX_ERROR_BODY).collect();
            format!("{}... [truncated]", cut)
        } else {
            body
        };
        BackendError::Status {
            backend: backend.to_string(),
            status,
            body,
        }
    }

    pub fn malformed(backend: &str, detail: impl Into<String>) -> Self {
        BackendError::Malformed {
            backend: backend.to_string(),
            detail: detail.into(),
        }
    }

    pub fn not_configured(backend: &str, detail: impl Into<String>) -> Self {
        BackendError::NotConfigured {
            backend: backend.to_string(),
            detail: detail.into(),
        }
    }

    /// Map a reqwest error. Body decode failures count as malformed responses.
    pub fn from_reqwest(backend: &str, e: reqwest::Error) -> Self {
        if e.is_decode() {
            return Self::malformed(backend, e.to_string());
        }
        if let Some(status) = e.status() {
            return Self::status(backend, status.as_u16(), e.to_string());
        }
        let kind = if e.is_timeout() {
            NetworkErrorKind::Timeout
        } else if e.is_connect() || e.is_request() || e.is_body() {
            NetworkErrorKind::ConnectionReset
        } else {
            NetworkErrorKind::Other
        };
        BackendError::Network {
            backend: backend.to_string(),
            kind,
            detail: e.to_string(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            BackendError::Status { status, .. } => match status {
                429 | 500 | 502 | 503 => ErrorClass::Transient,
                _ => ErrorClass::Permanent,
            },
            BackendError::Network { kind, .. } => match kind {
                NetworkErrorKind::ConnectionReset | NetworkErrorKind::Timeout => {
                    ErrorClass::Transient
                }
                NetworkErrorKind::Other => ErrorClass::Permanent,
            },
            BackendError::Malformed { .. } | BackendError::NotConfigured { .. } => {
                ErrorClass::Permanent
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        for status in [429, 500, 502, 503] {
            assert!(BackendError::status("t", status, String::new()).is_retryable());
        }
        for status in [400, 401, 403, 404, 422, 501, 504] {
            assert!(!BackendError::status("t", status, String::new()).is_retryable());
        }
    }

    #[test]
    fn network_kinds() {
        let reset = BackendError::Network {
            backend: "t".into(),
            kind: NetworkErrorKind::ConnectionReset,
            detail: "reset by peer".into(),
        };
        let timeout = BackendError::Network {
            backend: "t".into(),
            kind: NetworkErrorKind::Timeout,
            detail: "timed out".into(),
        };
        let other = BackendError::Network {
            backend: "t".into(),
            kind: NetworkErrorKind::Other,
            detail: "builder".into(),
        };
        assert_eq!(reset.class(), ErrorClass::Transient);
        assert_eq!(timeout.class(), ErrorClass::Transient);
        assert_eq!(other.class(), ErrorClass::Permanent);
    }

    #[test]
    fn malformed_and_unconfigured_are_permanent() {
        assert!(!BackendError::malformed("t", "no choices").is_retryable());
        assert!(!BackendError::not_configured("t", "missing api key").is_retryable());
    }

    #[test]
    fn long_bodies_are_truncated() {
        let e = BackendError::status("t", 500, "x".repeat(2000));
        let BackendError::Status { body, .. } = e else {
            panic!("expected status error");
        };
        assert!(body.ends_with("... [truncated]"));
        assert!(body.len() < 600);
    }
}
