use serde::Serialize;
use thiserror::Error;

/// Stable, machine-readable error catalog for the gateway.
///
/// Codes are grouped by range: connection 1xxx, auth 2xxx, validation 3xxx,
/// business 4xxx, server 5xxx. Every variant carries its own numeric code
/// and catalog `type` string so handlers never have to invent one inline.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    #[error("maximum connections exceeded for user")]
    MaxConnectionsExceeded,
    #[error("connection timed out")]
    ConnectionTimeout,
    #[error("transport error: {0}")]
    TransportError(String),

    #[error("bearer token missing")]
    JwtMissing,
    #[error("bearer token invalid: {0}")]
    JwtInvalid(String),
    #[error("bearer token expired")]
    JwtExpired,
    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid payload")]
    InvalidPayload,
    #[error("missing required field: {0}")]
    MissingRequiredField(String),
    #[error("invalid resource type")]
    InvalidResourceType,
    #[error("invalid room name")]
    InvalidRoomName,
    #[error("invalid mode")]
    InvalidMode,

    #[error("room is full")]
    RoomFull,
    #[error("room not found")]
    RoomNotFound,
    #[error("resource already joined")]
    ResourceAlreadyJoined,
    #[error("resource not joined")]
    ResourceNotJoined,
    #[error("lock is held by another user")]
    LockConflict,
    #[error("lock is not owned by this user")]
    LockNotOwned,
    #[error("lock is not held")]
    LockNotHeld,
    #[error("failed to acquire lock")]
    LockAcquireFailed,
    #[error("failed to release lock")]
    LockReleaseFailed,
    #[error("failed to extend lock")]
    LockExtendFailed,
    #[error("connection not found")]
    ConnectionNotFound,

    #[error("internal server error")]
    Internal(String),
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl GatewayError {
    /// Stable numeric code, safe to show to a client.
    #[must_use]
    pub fn code(&self) -> u32 {
        use GatewayError::*;
        match self {
            MaxConnectionsExceeded => 1001,
            ConnectionTimeout => 1002,
            TransportError(_) => 1003,
            JwtMissing => 2001,
            JwtInvalid(_) => 2002,
            JwtExpired => 2003,
            Unauthorized => 2004,
            InvalidPayload => 3001,
            MissingRequiredField(_) => 3002,
            InvalidResourceType => 3003,
            InvalidRoomName => 3004,
            InvalidMode => 3005,
            RoomFull => 4001,
            RoomNotFound => 4002,
            ResourceAlreadyJoined => 4003,
            ResourceNotJoined => 4004,
            LockConflict => 4005,
            LockNotOwned => 4006,
            LockNotHeld => 4007,
            LockAcquireFailed => 4008,
            LockReleaseFailed => 4009,
            LockExtendFailed => 4010,
            ConnectionNotFound => 4011,
            Internal(_) => 5001,
            ServiceUnavailable => 5002,
            RateLimitExceeded => 5003,
            Config(_) => 5001,
        }
    }

    /// Catalog `type` string, stable across releases.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        use GatewayError::*;
        match self {
            MaxConnectionsExceeded => "MAX_CONNECTIONS_EXCEEDED",
            ConnectionTimeout => "CONNECTION_TIMEOUT",
            TransportError(_) => "TRANSPORT_ERROR",
            JwtMissing => "JWT_MISSING",
            JwtInvalid(_) => "JWT_INVALID",
            JwtExpired => "JWT_EXPIRED",
            Unauthorized => "UNAUTHORIZED",
            InvalidPayload => "INVALID_PAYLOAD",
            MissingRequiredField(_) => "MISSING_REQUIRED_FIELD",
            InvalidResourceType => "INVALID_RESOURCE_TYPE",
            InvalidRoomName => "INVALID_ROOM_NAME",
            InvalidMode => "INVALID_MODE",
            RoomFull => "ROOM_FULL",
            RoomNotFound => "ROOM_NOT_FOUND",
            ResourceAlreadyJoined => "RESOURCE_ALREADY_JOINED",
            ResourceNotJoined => "RESOURCE_NOT_JOINED",
            LockConflict => "LOCK_CONFLICT",
            LockNotOwned => "LOCK_NOT_OWNED",
            LockNotHeld => "LOCK_NOT_HELD",
            LockAcquireFailed => "LOCK_ACQUIRE_FAILED",
            LockReleaseFailed => "LOCK_RELEASE_FAILED",
            LockExtendFailed => "LOCK_EXTEND_FAILED",
            ConnectionNotFound => "CONNECTION_NOT_FOUND",
            Internal(_) => "INTERNAL_SERVER_ERROR",
            ServiceUnavailable => "SERVICE_UNAVAILABLE",
            RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Config(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Generic, client-safe message. Never includes the detail carried by
    /// variants like `Internal` or `JwtInvalid` — those are for logs only.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        use GatewayError::*;
        match self {
            MaxConnectionsExceeded => "Maximum number of connections exceeded",
            ConnectionTimeout => "Connection timed out",
            TransportError(_) => "A transport error occurred",
            JwtMissing => "Authentication token is required",
            JwtInvalid(_) => "Authentication token is invalid",
            JwtExpired => "Authentication token has expired",
            Unauthorized => "Not authorized",
            InvalidPayload => "Invalid payload",
            MissingRequiredField(_) => "A required field is missing",
            InvalidResourceType => "Invalid resource type",
            InvalidRoomName => "Invalid room name",
            InvalidMode => "Invalid mode",
            RoomFull => "Room is full",
            RoomNotFound => "Room not found",
            ResourceAlreadyJoined => "Already joined this resource",
            ResourceNotJoined => "Not joined to this resource",
            LockConflict => "Resource is locked by another user",
            LockNotOwned => "Lock is not owned by this user",
            LockNotHeld => "Lock is not held",
            LockAcquireFailed => "Failed to acquire lock",
            LockReleaseFailed => "Failed to release lock",
            LockExtendFailed => "Failed to extend lock",
            ConnectionNotFound => "Connection not found",
            Internal(_) => "Internal server error",
            ServiceUnavailable => "Service temporarily unavailable",
            RateLimitExceeded => "Rate limit exceeded",
            Config(_) => "Internal server error",
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// The standard `{code, type, message, timestamp, details?}` shape every
/// error surfaced to a client takes. Never constructed directly from a raw
/// exception/string; always goes through `From<&GatewayError>`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorFrame {
    pub code: u32,
    #[serde(rename = "type")]
    pub type_name: &'static str,
    pub message: &'static str,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorFrame {
    #[must_use]
    pub fn new(err: &GatewayError, now_ms: i64) -> Self {
        Self {
            code: err.code(),
            type_name: err.type_name(),
            message: err.public_message(),
            timestamp: now_ms,
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_fall_in_documented_ranges() {
        assert_eq!(GatewayError::MaxConnectionsExceeded.code() / 1000, 1);
        assert_eq!(GatewayError::JwtMissing.code() / 1000, 2);
        assert_eq!(GatewayError::InvalidPayload.code() / 1000, 3);
        assert_eq!(GatewayError::RoomFull.code() / 1000, 4);
        assert_eq!(GatewayError::Internal(String::new()).code() / 1000, 5);
    }

    #[test]
    fn public_message_never_echoes_internal_detail() {
        let err = GatewayError::Internal("leaked db dsn".into());
        assert!(!err.public_message().contains("leaked"));
        let err = GatewayError::JwtInvalid("signature mismatch for token abc.def".into());
        assert!(!err.public_message().contains("abc.def"));
    }
}
