//! Gamification API Client
//!
//! Reward catalogue and redemption lifecycle calls. Nothing here retries:
//! a lost redeem response may still have spent the points server-side, so
//! callers confirm with `validate`/`redemptions` before trying again.

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{error, info, warn};

use super::error::{error_detail, ApiError};
use crate::app::session::{AuthContext, Role};
use crate::app::types::{
    ExpireReceipt, RedeemReceipt, Redemption, RedemptionStatus, Reward, UseReceipt,
    ValidationOutcome,
};

pub const DEFAULT_GAMIFICATION_URL: &str = "http://localhost:8005";

pub struct GamificationClient {
    client: Client,
    base_url: String,
}

impl GamificationClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_GAMIFICATION_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        for segment in segments {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }

    fn authorized(request: RequestBuilder, auth: &AuthContext, role: Role) -> RequestBuilder {
        match auth.bearer(role) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let detail =
                error_detail(&body).unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            warn!("Gamification service returned {}: {}", status, detail);
            return Err(ApiError::Rejected { status, detail });
        }

        serde_json::from_str(&body).map_err(|e| {
            error!("Failed to parse gamification response: {} - {}", e, body);
            ApiError::Decode(e.to_string())
        })
    }

    /// Fetch the reward catalogue
    pub async fn rewards(&self) -> Result<Vec<Reward>, ApiError> {
        let rewards: Vec<Reward> = self
            .execute(self.client.get(self.url(&["rewards"])))
            .await?;
        info!("Fetched {} rewards", rewards.len());
        Ok(rewards)
    }

    pub async fn reward(&self, reward_id: &str) -> Result<Reward, ApiError> {
        self.execute(self.client.get(self.url(&["rewards", reward_id])))
            .await
    }

    /// Spend points on a reward; the server allocates a unique code
    pub async fn redeem(
        &self,
        auth: &AuthContext,
        user_id: &str,
        reward_id: &str,
    ) -> Result<RedeemReceipt, ApiError> {
        info!("Redeeming reward {} for user {}", reward_id, user_id);
        let request = self
            .client
            .post(self.url(&["users", user_id, "redeem-reward", reward_id]));
        let receipt: RedeemReceipt = self
            .execute(Self::authorized(request, auth, Role::User))
            .await?;
        info!(
            "Reward {} redeemed: code {}, {} points spent",
            reward_id, receipt.code, receipt.points_spent
        );
        Ok(receipt)
    }

    /// Claim a zero-cost targeted reward
    pub async fn redeem_special(
        &self,
        auth: &AuthContext,
        user_id: &str,
        special_reward_id: &str,
    ) -> Result<RedeemReceipt, ApiError> {
        info!("Redeeming special reward {} for user {}", special_reward_id, user_id);
        let request = self.client.post(self.url(&[
            "users",
            user_id,
            "redeem-special-reward",
            special_reward_id,
        ]));
        self.execute(Self::authorized(request, auth, Role::User))
            .await
    }

    /// A user's redemption history, newest first
    pub async fn redemptions(
        &self,
        auth: &AuthContext,
        user_id: &str,
        filter: Option<RedemptionStatus>,
    ) -> Result<Vec<Redemption>, ApiError> {
        let mut request = self
            .client
            .get(self.url(&["users", user_id, "redemptions"]));
        if let Some(filter) = filter {
            request = request.query(&[("status_filter", filter.as_filter())]);
        }
        let redemptions: Vec<Redemption> = self
            .execute(Self::authorized(request, auth, Role::User))
            .await?;
        info!("Fetched {} redemptions for user {}", redemptions.len(), user_id);
        Ok(redemptions)
    }

    /// Check a code without consuming it
    pub async fn validate(&self, code: &str) -> Result<ValidationOutcome, ApiError> {
        self.execute(self.client.get(self.url(&["redemptions", code])))
            .await
    }

    /// Consume a code. The only mutating transition; never retried.
    pub async fn use_code(&self, auth: &AuthContext, code: &str) -> Result<UseReceipt, ApiError> {
        info!("Marking redemption {} as used", code);
        let request = self.client.post(self.url(&["redemptions", code, "use"]));
        self.execute(Self::authorized(request, auth, Role::Vendor))
            .await
    }

    /// Force a code to expire now
    pub async fn expire(&self, auth: &AuthContext, code: &str) -> Result<ExpireReceipt, ApiError> {
        info!("Expiring redemption {}", code);
        let request = self
            .client
            .post(self.url(&["redemptions", code, "expire"]));
        self.execute(Self::authorized(request, auth, Role::Vendor))
            .await
    }

    /// Whether the service answers its health endpoint
    pub async fn health(&self) -> bool {
        match self
            .execute::<serde_json::Value>(self.client.get(self.url(&["health"])))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!("Gamification service unavailable: {}", e);
                false
            }
        }
    }
}

impl Default for GamificationClient {
    fn default() -> Self {
        Self::new()
    }
}
