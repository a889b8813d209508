//! Structured domain errors.
//!
//! Deterministic domain rejections carry a stable machine-readable
//! [`ErrorCode`] plus a human `reason` and, where the caller can act on it,
//! a `how_to_fix` hint. Unexpected conditions (I/O, corrupted state) are not
//! modeled here — they propagate as `anyhow::Error` from the store and
//! background-task layers, per the service template's `anyhow::Context`
//! idiom.

use std::fmt;

/// Machine-readable rejection code. Names mirror the command-interface
/// command-surface error column plus the component-level FAIL codes of
/// the risk and capability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unauthorized,
    Validation,
    NotFound,
    Conflict,
    Duplicate,
    RoleViolation,
    CircularTrading,
    CapabilityDenied,
    Sanctioned,
    AdHocLocationInvalid,
    NotActive,
    SelfBidding,
    AlreadyTerminal,
    InvalidPair,
    RiskBlock,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::Duplicate => "DUPLICATE",
            ErrorCode::RoleViolation => "ROLE_VIOLATION",
            ErrorCode::CircularTrading => "CIRCULAR_TRADING",
            ErrorCode::CapabilityDenied => "CAPABILITY_DENIED",
            ErrorCode::Sanctioned => "SANCTIONED",
            ErrorCode::AdHocLocationInvalid => "AD_HOC_LOCATION_INVALID",
            ErrorCode::NotActive => "NOT_ACTIVE",
            ErrorCode::SelfBidding => "SELF_BIDDING",
            ErrorCode::AlreadyTerminal => "ALREADY_TERMINAL",
            ErrorCode::InvalidPair => "INVALID_PAIR",
            ErrorCode::RiskBlock => "RISK_BLOCK",
        };
        write!(f, "{s}")
    }
}

/// A deterministic, non-retried domain rejection.
#[derive(Debug, Clone)]
pub struct EngineError {
    pub code: ErrorCode,
    pub reason: String,
    pub how_to_fix: Option<String>,
}

impl EngineError {
    pub fn new(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            how_to_fix: None,
        }
    }

    pub fn with_fix(mut self, hint: impl Into<String>) -> Self {
        self.how_to_fix = Some(hint.into());
        self
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, reason)
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, reason)
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, reason)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.reason)
    }
}

impl std::error::Error for EngineError {}

pub type EngineResult<T> = Result<T, EngineError>;
