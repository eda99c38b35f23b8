//! Gamification API
//!
//! HTTP client for reward redemption: redeem, validate, use.

pub mod error;
pub mod gamification;

pub use error::{ApiError, RedemptionFailure};
pub use gamification::GamificationClient;
