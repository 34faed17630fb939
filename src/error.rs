//! Unified error handling for parleyd.
//!
//! Every fallible application operation returns [`AppError`], a closed set of
//! error kinds with stable identifiers. The identifier is what clients key
//! translations on; the message is a human-readable default; the detail is
//! kept for server logs and never crosses the wire.

use std::time::Duration;
use thiserror::Error;

/// Payload shared by every [`AppError`] variant.
///
/// `id` follows the `app.<entity>.<operation>.<cause>.app_error` convention
/// and is stable across releases. `detail` carries the underlying cause for
/// logs and is stripped before the error is serialized for clients.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorPayload {
    pub id: &'static str,
    pub message: String,
    pub detail: String,
    /// Explicit HTTP status override (e.g. 413 for oversized uploads).
    pub status: Option<u16>,
    /// How long a throttled caller should wait before retrying.
    pub retry_after: Option<Duration>,
}

/// Application error taxonomy.
///
/// The variants are semantic, not structural: a store-layer failure is
/// unwrapped at the app layer and re-tagged into one of these kinds before
/// it reaches a client boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AppError {
    #[error("{}: {}", .0.id, .0.message)]
    NotFound(ErrorPayload),

    #[error("{}: {}", .0.id, .0.message)]
    InvalidInput(ErrorPayload),

    #[error("{}: {}", .0.id, .0.message)]
    Conflict(ErrorPayload),

    #[error("{}: {}", .0.id, .0.message)]
    LimitExceeded(ErrorPayload),

    #[error("{}: {}", .0.id, .0.message)]
    Unauthorized(ErrorPayload),

    #[error("{}: {}", .0.id, .0.message)]
    Forbidden(ErrorPayload),

    #[error("{}: {}", .0.id, .0.message)]
    Throttled(ErrorPayload),

    #[error("{}: {}", .0.id, .0.message)]
    Internal(ErrorPayload),
}

impl AppError {
    fn payload_with(id: &'static str, message: impl Into<String>) -> ErrorPayload {
        ErrorPayload {
            id,
            message: message.into(),
            ..ErrorPayload::default()
        }
    }

    pub fn not_found(id: &'static str, message: impl Into<String>) -> Self {
        Self::NotFound(Self::payload_with(id, message))
    }

    pub fn invalid_input(id: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidInput(Self::payload_with(id, message))
    }

    pub fn conflict(id: &'static str, message: impl Into<String>) -> Self {
        Self::Conflict(Self::payload_with(id, message))
    }

    pub fn limit_exceeded(id: &'static str, message: impl Into<String>) -> Self {
        Self::LimitExceeded(Self::payload_with(id, message))
    }

    /// A size violation that maps to HTTP 413 rather than 400.
    pub fn too_large(id: &'static str, message: impl Into<String>) -> Self {
        let mut payload = Self::payload_with(id, message);
        payload.status = Some(413);
        Self::LimitExceeded(payload)
    }

    pub fn unauthorized(id: &'static str, message: impl Into<String>) -> Self {
        Self::Unauthorized(Self::payload_with(id, message))
    }

    pub fn forbidden(id: &'static str, message: impl Into<String>) -> Self {
        Self::Forbidden(Self::payload_with(id, message))
    }

    pub fn throttled(
        id: &'static str,
        message: impl Into<String>,
        retry_after: Duration,
    ) -> Self {
        let mut payload = Self::payload_with(id, message);
        payload.retry_after = Some(retry_after);
        Self::Throttled(payload)
    }

    pub fn internal(id: &'static str, message: impl Into<String>) -> Self {
        Self::Internal(Self::payload_with(id, message))
    }

    /// Attach the underlying cause. Only ever logged, never sent to clients.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.payload_mut().detail = detail.into();
        self
    }

    pub fn payload(&self) -> &ErrorPayload {
        match self {
            Self::NotFound(p)
            | Self::InvalidInput(p)
            | Self::Conflict(p)
            | Self::LimitExceeded(p)
            | Self::Unauthorized(p)
            | Self::Forbidden(p)
            | Self::Throttled(p)
            | Self::Internal(p) => p,
        }
    }

    fn payload_mut(&mut self) -> &mut ErrorPayload {
        match self {
            Self::NotFound(p)
            | Self::InvalidInput(p)
            | Self::Conflict(p)
            | Self::LimitExceeded(p)
            | Self::Unauthorized(p)
            | Self::Forbidden(p)
            | Self::Throttled(p)
            | Self::Internal(p) => p,
        }
    }

    /// Stable id string for this error.
    pub fn id(&self) -> &'static str {
        self.payload().id
    }

    /// Retry hint for throttled callers.
    pub fn retry_after(&self) -> Option<Duration> {
        self.payload().retry_after
    }

    /// Static kind string for metrics labeling.
    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Conflict(_) => "conflict",
            Self::LimitExceeded(_) => "limit_exceeded",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Throttled(_) => "throttled",
            Self::Internal(_) => "internal",
        }
    }

    /// Map this error to its HTTP boundary status.
    ///
    /// This is the single mapping point for the whole taxonomy; the payload
    /// may carry an explicit override (oversized uploads use 413).
    pub fn http_status(&self) -> u16 {
        if let Some(status) = self.payload().status {
            return status;
        }
        match self {
            Self::NotFound(_) => 404,
            Self::InvalidInput(_) | Self::Conflict(_) | Self::LimitExceeded(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::Throttled(_) => 429,
            Self::Internal(_) => 500,
        }
    }
}

/// Result type for application operations.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(AppError::not_found("app.x", "x").kind(), "not_found");
        assert_eq!(AppError::internal("app.y", "y").kind(), "internal");
        assert_eq!(
            AppError::throttled("app.z", "z", Duration::from_secs(1)).kind(),
            "throttled"
        );
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(AppError::not_found("a", "m").http_status(), 404);
        assert_eq!(AppError::invalid_input("a", "m").http_status(), 400);
        assert_eq!(AppError::conflict("a", "m").http_status(), 400);
        assert_eq!(AppError::limit_exceeded("a", "m").http_status(), 400);
        assert_eq!(AppError::too_large("a", "m").http_status(), 413);
        assert_eq!(AppError::unauthorized("a", "m").http_status(), 401);
        assert_eq!(AppError::forbidden("a", "m").http_status(), 403);
        assert_eq!(
            AppError::throttled("a", "m", Duration::from_secs(9)).http_status(),
            429
        );
        assert_eq!(AppError::internal("a", "m").http_status(), 500);
    }

    #[test]
    fn detail_never_changes_identity() {
        let plain = AppError::conflict("app.channel.save_channel.exists.app_error", "exists");
        let detailed = plain.clone().with_detail("UNIQUE constraint failed");
        assert_eq!(plain.id(), detailed.id());
        assert_eq!(plain.http_status(), detailed.http_status());
    }

    #[test]
    fn retry_after_surfaces() {
        let err = AppError::throttled("app.email.rate_limit", "slow down", Duration::from_secs(30));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
        assert!(AppError::not_found("a", "b").retry_after().is_none());
    }
}
