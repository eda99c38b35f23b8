//! API Errors

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// No response at all (DNS, connect, TLS, reset)
    #[error("could not reach the rewards service")]
    Transport(#[from] reqwest::Error),

    /// The service answered with a non-success status. `detail` is the
    /// server's message, shown to the user as-is.
    #[error("{detail}")]
    Rejected { status: StatusCode, detail: String },

    #[error("unexpected response from the rewards service: {0}")]
    Decode(String),
}

/// Why a redemption operation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedemptionFailure {
    InsufficientPoints,
    /// Reward inactive or max redemptions reached
    RewardUnavailable,
    AlreadyUsed,
    Expired,
    NotFound,
    /// Network failure, no verdict from the server
    Unreachable,
    Other,
}

impl ApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Rejected { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status(),
            ApiError::Decode(_) => None,
        }
    }

    /// Classify the server's verdict. Message matching covers both the
    /// service's Spanish messages and English equivalents.
    pub fn failure(&self) -> RedemptionFailure {
        let detail = match self {
            ApiError::Rejected { detail, .. } => detail.to_lowercase(),
            ApiError::Transport(_) => return RedemptionFailure::Unreachable,
            ApiError::Decode(_) => return RedemptionFailure::Other,
        };

        let has = |needles: &[&str]| needles.iter().any(|n| detail.contains(n));

        if has(&["suficientes puntos", "insufficient points", "not enough points"]) {
            RedemptionFailure::InsufficientPoints
        } else if has(&["ya utilizada", "already used"]) {
            RedemptionFailure::AlreadyUsed
        } else if has(&["expirada", "expired"]) {
            RedemptionFailure::Expired
        } else if has(&["no disponible", "agotada", "unavailable", "exhausted", "sold out"]) {
            RedemptionFailure::RewardUnavailable
        } else if self.status() == Some(StatusCode::NOT_FOUND)
            || has(&["no encontrad", "not found"])
        {
            RedemptionFailure::NotFound
        } else {
            RedemptionFailure::Other
        }
    }
}

/// Extract a human-readable message from an error body.
/// FastAPI puts it in `detail`; anything else is passed through.
pub(crate) fn error_detail(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(map)) => match map.get("detail") {
            Some(serde_json::Value::String(detail)) => Some(detail.clone()),
            Some(other) => Some(other.to_string()),
            None => Some(trimmed.to_string()),
        },
        _ => Some(trimmed.to_string()),
    }
}
