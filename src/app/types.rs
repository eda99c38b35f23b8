//! Application Types
//!
//! Redemption and reward records exchanged with the gamification service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Timestamps come back either with an offset or as naive UTC
/// (`2025-01-31T10:00:00.123456`), depending on the column type.
mod timestamp {
    use super::*;
    use chrono::NaiveDateTime;

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => parse(&s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", s))),
        }
    }
}

/// Client-side view of a redemption's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RedemptionStatus {
    Available,
    Used,
    Expired,
}

impl RedemptionStatus {
    /// Value for the `status_filter` query parameter
    pub fn as_filter(&self) -> &'static str {
        match self {
            RedemptionStatus::Available => "available",
            RedemptionStatus::Used => "used",
            RedemptionStatus::Expired => "expired",
        }
    }
}

impl std::str::FromStr for RedemptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "available" => Ok(RedemptionStatus::Available),
            "used" => Ok(RedemptionStatus::Used),
            "expired" => Ok(RedemptionStatus::Expired),
            other => Err(format!("unknown redemption status: {}", other)),
        }
    }
}

/// A redemption code issued to a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redemption {
    pub id: String,
    pub user_id: String,
    pub reward_id: String,
    pub points_spent: f64,
    #[serde(rename = "redemption_code")]
    pub code: String,
    pub is_used: bool,
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    pub used_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    pub created_at: Option<DateTime<Utc>>,
    pub reward_name: String,
    #[serde(default)]
    pub reward_description: String,
    #[serde(default)]
    pub reward_type: String,
    #[serde(default)]
    pub reward_value: String,
}

impl Redemption {
    /// Expiry is judged against the caller's clock; use is server-authoritative
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires < now)
    }

    pub fn status(&self, now: DateTime<Utc>) -> RedemptionStatus {
        if self.is_used {
            RedemptionStatus::Used
        } else if self.is_expired(now) {
            RedemptionStatus::Expired
        } else {
            RedemptionStatus::Available
        }
    }
}

/// Response to a successful redeem call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedeemReceipt {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "redemption_code")]
    pub code: String,
    pub reward_name: String,
    pub points_spent: f64,
    #[serde(default)]
    pub remaining_points: Option<f64>,
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Read-only validation of a code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub message: String,
    #[serde(default, rename = "redemption_code")]
    pub code: Option<String>,
    #[serde(default)]
    pub reward_name: Option<String>,
    #[serde(default)]
    pub reward_description: Option<String>,
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    pub used_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ValidationOutcome {
    /// Whether a vendor may consume the code now
    pub fn can_use(&self, now: DateTime<Utc>) -> bool {
        self.valid && self.used_at.is_none() && !self.expires_at.is_some_and(|e| e < now)
    }
}

/// Response to a successful use call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UseReceipt {
    pub message: String,
    #[serde(default, rename = "redemption_code")]
    pub code: Option<String>,
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    pub used_at: Option<DateTime<Utc>>,
}

/// Response to an expire call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpireReceipt {
    pub message: String,
    #[serde(default, rename = "redemption_code")]
    pub code: Option<String>,
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Reward catalogue entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub points_cost: f64,
    #[serde(default)]
    pub reward_type: String,
    #[serde(default)]
    pub reward_value: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub max_redemptions: Option<u32>,
    #[serde(default)]
    pub current_redemptions: u32,
}

fn default_true() -> bool {
    true
}

impl Reward {
    /// Inactive or out of stock
    pub fn is_available(&self) -> bool {
        self.is_active
            && self
                .max_redemptions
                .map_or(true, |max| self.current_redemptions < max)
    }
}
