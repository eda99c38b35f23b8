//! Reward Validation
//!
//! View model behind the vendor's validation screen: load a code's status,
//! then consume it. The "used" state is shown optimistically while the use
//! call is in flight and reverted if the server refuses.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::api::{ApiError, GamificationClient, RedemptionFailure};
use crate::app::session::AuthContext;
use crate::app::types::{UseReceipt, ValidationOutcome};

#[derive(Debug, Clone, PartialEq)]
pub enum UseState {
    Idle,
    /// Use call in flight; `previous` is restored on failure
    Pending { previous: ValidationOutcome },
    Confirmed { used_at: Option<DateTime<Utc>> },
    RolledBack {
        error: String,
        failure: RedemptionFailure,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UseRefused {
    NotLoaded,
    NotUsable,
    InFlight,
    /// A use attempt already completed or failed for this code
    Terminal,
}

impl std::fmt::Display for UseRefused {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            UseRefused::NotLoaded => "reward has not been validated yet",
            UseRefused::NotUsable => "reward is not valid",
            UseRefused::InFlight => "reward is already being used",
            UseRefused::Terminal => "reward was already processed",
        };
        f.write_str(msg)
    }
}

pub struct ValidationView {
    code: String,
    outcome: Option<ValidationOutcome>,
    use_state: UseState,
}

impl std::fmt::Debug for ValidationView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationView")
            .field("code", &self.code)
            .field("valid", &self.outcome.as_ref().map(|o| o.valid))
            .field("use_state", &self.use_state)
            .finish()
    }
}

impl ValidationView {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            outcome: None,
            use_state: UseState::Idle,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn outcome(&self) -> Option<&ValidationOutcome> {
        self.outcome.as_ref()
    }

    pub fn use_state(&self) -> &UseState {
        &self.use_state
    }

    /// Fetch the code's status. Failures become an invalid outcome carrying
    /// the server's message.
    pub async fn load(&mut self, client: &GamificationClient) {
        let outcome = match client.validate(&self.code).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Validation of {} failed: {}", self.code, e);
                ValidationOutcome {
                    valid: false,
                    message: e.to_string(),
                    code: Some(self.code.clone()),
                    reward_name: None,
                    reward_description: None,
                    used_at: None,
                    expires_at: None,
                }
            }
        };
        self.set_outcome(outcome);
    }

    pub fn set_outcome(&mut self, outcome: ValidationOutcome) {
        self.outcome = Some(outcome);
        self.use_state = UseState::Idle;
    }

    pub fn can_use(&self, now: DateTime<Utc>) -> bool {
        matches!(self.use_state, UseState::Idle)
            && self.outcome.as_ref().is_some_and(|o| o.can_use(now))
    }

    /// Optimistically show the code as used
    pub fn begin_use(&mut self, now: DateTime<Utc>) -> Result<(), UseRefused> {
        match self.use_state {
            UseState::Idle => {}
            UseState::Pending { .. } => return Err(UseRefused::InFlight),
            UseState::Confirmed { .. } | UseState::RolledBack { .. } => {
                return Err(UseRefused::Terminal)
            }
        }
        let outcome = self.outcome.as_mut().ok_or(UseRefused::NotLoaded)?;
        if !outcome.can_use(now) {
            return Err(UseRefused::NotUsable);
        }

        let previous = outcome.clone();
        outcome.valid = false;
        outcome.used_at = Some(now);
        self.use_state = UseState::Pending { previous };
        Ok(())
    }

    /// Server accepted the use call
    pub fn confirm(&mut self, receipt: &UseReceipt) {
        if !matches!(self.use_state, UseState::Pending { .. }) {
            return;
        }
        if let Some(outcome) = self.outcome.as_mut() {
            outcome.valid = false;
            outcome.message = receipt.message.clone();
            if receipt.used_at.is_some() {
                outcome.used_at = receipt.used_at;
            }
        }
        info!("Redemption {} used", self.code);
        self.use_state = UseState::Confirmed {
            used_at: self.outcome.as_ref().and_then(|o| o.used_at),
        };
    }

    /// Undo the optimistic update. A server refusal is a verdict on the
    /// code and leaves it invalid; without one the pre-use outcome returns.
    pub fn roll_back(&mut self, error: &ApiError) {
        let state = std::mem::replace(&mut self.use_state, UseState::Idle);
        let UseState::Pending { mut previous } = state else {
            self.use_state = state;
            return;
        };
        warn!("Use of {} rolled back: {}", self.code, error);
        if let ApiError::Rejected { detail, .. } = error {
            previous.valid = false;
            previous.message = detail.clone();
        }
        self.outcome = Some(previous);
        self.use_state = UseState::RolledBack {
            error: error.to_string(),
            failure: error.failure(),
        };
    }

    /// Consume the code: optimistic update, one call, confirm or revert
    pub async fn use_code(
        &mut self,
        client: &GamificationClient,
        auth: &AuthContext,
    ) -> Result<(), UseRefused> {
        self.begin_use(Utc::now())?;
        match client.use_code(auth, &self.code).await {
            Ok(receipt) => self.confirm(&receipt),
            Err(e) => self.roll_back(&e),
        }
        Ok(())
    }

    /// Human-readable summary for the terminal
    pub fn render(&self) -> String {
        let Some(outcome) = &self.outcome else {
            return format!("Code {}: not validated", self.code);
        };

        let mut lines = vec![
            format!("Code: {}", self.code),
            format!(
                "Status: {} - {}",
                if outcome.valid { "VALID" } else { "NOT VALID" },
                outcome.message
            ),
        ];
        if let Some(name) = &outcome.reward_name {
            lines.push(format!("Reward: {}", name));
        }
        if let Some(desc) = outcome.reward_description.as_deref().filter(|d| !d.is_empty()) {
            lines.push(format!("Description: {}", desc));
        }
        lines.push(match outcome.expires_at {
            Some(expires) => format!("Expires: {}", expires.format("%d/%m/%Y")),
            None => "Expires: never".to_string(),
        });
        if let Some(used) = outcome.used_at {
            lines.push(format!("Used: {}", used.format("%d/%m/%Y %H:%M")));
        }
        match &self.use_state {
            UseState::Pending { .. } => lines.push("Use: pending".to_string()),
            UseState::Confirmed { .. } => lines.push("Use: confirmed".to_string()),
            UseState::RolledBack { error, .. } => lines.push(format!("Use failed: {}", error)),
            UseState::Idle => {}
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::gamification::fake::{serve, FakeState};
    use chrono::TimeZone;
    use reqwest::StatusCode;

    fn valid_outcome() -> ValidationOutcome {
        ValidationOutcome {
            valid: true,
            message: "Recompensa válida y disponible".to_string(),
            code: Some("ABC123".to_string()),
            reward_name: Some("Cafè".to_string()),
            reward_description: Some("Un cafè gratuït".to_string()),
            used_at: None,
            expires_at: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_optimistic_use_then_confirm() {
        let mut view = ValidationView::new("ABC123");
        view.set_outcome(valid_outcome());
        assert!(view.can_use(now()));

        view.begin_use(now()).unwrap();
        assert!(matches!(view.use_state(), UseState::Pending { .. }));
        assert!(!view.outcome().unwrap().valid);
        assert_eq!(view.begin_use(now()), Err(UseRefused::InFlight));

        let server_time = Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 3).unwrap();
        view.confirm(&UseReceipt {
            message: "Recompensa utilizada correctamente".to_string(),
            code: Some("ABC123".to_string()),
            used_at: Some(server_time),
        });
        assert_eq!(
            view.use_state(),
            &UseState::Confirmed {
                used_at: Some(server_time)
            }
        );
        assert_eq!(view.outcome().unwrap().used_at, Some(server_time));
        assert_eq!(view.begin_use(now()), Err(UseRefused::Terminal));
    }

    #[test]
    fn test_refusal_leaves_code_invalid() {
        let mut view = ValidationView::new("ABC123");
        view.set_outcome(valid_outcome());
        view.begin_use(now()).unwrap();

        view.roll_back(&ApiError::Rejected {
            status: StatusCode::BAD_REQUEST,
            detail: "Recompensa ya utilizada".to_string(),
        });
        let outcome = view.outcome().unwrap();
        assert!(!outcome.valid);
        assert_eq!(outcome.message, "Recompensa ya utilizada");
        assert!(outcome.used_at.is_none());
        assert_eq!(outcome.reward_name.as_deref(), Some("Cafè"));
        match view.use_state() {
            UseState::RolledBack { error, failure } => {
                assert_eq!(error, "Recompensa ya utilizada");
                assert_eq!(*failure, RedemptionFailure::AlreadyUsed);
            }
            other => panic!("Expected RolledBack, got {:?}", other),
        }
        // No automatic retry
        assert_eq!(view.begin_use(now()), Err(UseRefused::Terminal));

        let rendered = view.render();
        assert!(rendered.contains("Status: NOT VALID - Recompensa ya utilizada"));
        assert!(rendered.contains("Use failed: Recompensa ya utilizada"));
    }

    #[test]
    fn test_rollback_without_verdict_restores_outcome() {
        let mut view = ValidationView::new("ABC123");
        view.set_outcome(valid_outcome());
        view.begin_use(now()).unwrap();

        view.roll_back(&ApiError::Decode("unexpected body".to_string()));
        assert_eq!(view.outcome(), Some(&valid_outcome()));
        assert!(matches!(
            view.use_state(),
            UseState::RolledBack {
                failure: RedemptionFailure::Other,
                ..
            }
        ));
    }

    #[test]
    fn test_refuses_unusable_codes() {
        let mut view = ValidationView::new("ABC123");
        assert_eq!(view.begin_use(now()), Err(UseRefused::NotLoaded));

        let mut expired = valid_outcome();
        expired.expires_at = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        view.set_outcome(expired);
        assert_eq!(view.begin_use(now()), Err(UseRefused::NotUsable));

        let mut used = valid_outcome();
        used.used_at = Some(now());
        view.set_outcome(used);
        assert_eq!(view.begin_use(now()), Err(UseRefused::NotUsable));
    }

    #[tokio::test]
    async fn test_load_and_use_against_service() {
        let (url, _) = serve(
            FakeState::default()
                .with_reward("cafe", 50.0)
                .with_balance("u-1", 100.0),
        )
        .await;
        let client = GamificationClient::with_base_url(&url);
        let auth = AuthContext::anonymous().with_user("u-1", "t");
        let receipt = client.redeem(&auth, "u-1", "cafe").await.unwrap();

        let mut view = ValidationView::new(receipt.code.clone());
        view.load(&client).await;
        assert!(view.outcome().unwrap().valid);

        view.use_code(&client, &auth).await.unwrap();
        assert!(matches!(view.use_state(), UseState::Confirmed { used_at: Some(_) }));

        // A second screen for the same code sees it as used and cannot retry
        let mut other = ValidationView::new(receipt.code.clone());
        other.load(&client).await;
        assert!(!other.outcome().unwrap().valid);
        assert!(other.outcome().unwrap().used_at.is_some());
        assert_eq!(other.use_code(&client, &auth).await, Err(UseRefused::NotUsable));
    }

    #[tokio::test]
    async fn test_code_consumed_elsewhere_after_load() {
        let (url, _) = serve(
            FakeState::default()
                .with_reward("cafe", 50.0)
                .with_balance("u-1", 100.0),
        )
        .await;
        let client = GamificationClient::with_base_url(&url);
        let auth = AuthContext::anonymous()
            .with_user("u-1", "t")
            .with_vendor("v-1", "vt");
        let receipt = client.redeem(&auth, "u-1", "cafe").await.unwrap();

        let mut view = ValidationView::new(receipt.code.clone());
        view.load(&client).await;
        assert!(view.can_use(Utc::now()));

        // Another till consumes the code first
        client.use_code(&auth, &receipt.code).await.unwrap();

        view.use_code(&client, &auth).await.unwrap();
        let outcome = view.outcome().unwrap();
        assert!(!outcome.valid);
        assert_eq!(outcome.message, "Recompensa ya utilizada");
        assert!(matches!(
            view.use_state(),
            UseState::RolledBack {
                failure: RedemptionFailure::AlreadyUsed,
                ..
            }
        ));
        assert!(!view.render().contains("Status: VALID"));
    }

    #[tokio::test]
    async fn test_load_unknown_code_shows_message() {
        let (url, _) = serve(FakeState::default()).await;
        let client = GamificationClient::with_base_url(&url);

        let mut view = ValidationView::new("NOPE0000");
        view.load(&client).await;
        let outcome = view.outcome().unwrap();
        assert!(!outcome.valid);
        assert_eq!(outcome.message, "Código de canje no encontrado");
    }
}
