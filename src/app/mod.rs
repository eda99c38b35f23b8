//! Application State Management
//!
//! Ties settings, the signed-in context, the API client and the payload
//! dispatcher together for the command line front end.

pub mod config;
pub mod session;
pub mod types;
pub mod validation;

pub use config::{Environment, Settings};
pub use session::AuthContext;
pub use types::RedemptionStatus;
pub use validation::{UseState, ValidationView};

use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use crate::api::GamificationClient;
use crate::dispatch::{Dispatcher, Route};
use crate::qr::{EncodeError, QrSurface, RenderOptions};

/// Where a scanned payload leads
#[derive(Debug)]
pub enum Destination {
    Validation(ValidationView),
    SendTicket { user_id: String },
}

/// Main application structure
pub struct App {
    /// User settings
    pub settings: Settings,

    /// Signed-in user/vendor
    pub auth: AuthContext,

    /// API client
    client: GamificationClient,

    dispatcher: Dispatcher,
}

impl App {
    pub fn new(settings: Settings, auth: AuthContext) -> Self {
        let client = GamificationClient::with_base_url(&settings.gamification_url());
        info!(
            "Using gamification service at {} ({:?})",
            client.base_url(),
            settings.environment
        );
        Self {
            settings,
            auth,
            client,
            dispatcher: Dispatcher::default(),
        }
    }

    pub fn client(&self) -> &GamificationClient {
        &self.client
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Deep link encoded in a reward QR
    pub fn reward_link(&self, code: &str) -> String {
        Route::validate(code).deep_link(&self.settings.origin())
    }

    /// Deep link encoded in a profile QR
    pub fn profile_link(&self, user_id: &str) -> String {
        Route::send_ticket(user_id).deep_link(&self.settings.origin())
    }

    /// Reward QR with the configured options; `size` overrides the pixel size
    pub fn render_reward_qr(
        &self,
        code: &str,
        size: Option<u32>,
    ) -> Result<QrSurface, EncodeError> {
        Self::render_qr(&self.reward_link(code), &self.settings.reward_qr, size)
    }

    pub fn render_profile_qr(
        &self,
        user_id: &str,
        size: Option<u32>,
    ) -> Result<QrSurface, EncodeError> {
        Self::render_qr(&self.profile_link(user_id), &self.settings.profile_qr, size)
    }

    fn render_qr(
        link: &str,
        options: &RenderOptions,
        size: Option<u32>,
    ) -> Result<QrSurface, EncodeError> {
        let mut options = options.clone();
        if let Some(size) = size {
            options.size = size;
        }
        let mut surface = QrSurface::new();
        surface.render(link, &options)?;
        Ok(surface)
    }

    pub fn classify(&self, text: &str) -> Option<Route> {
        self.dispatcher.classify(text)
    }

    /// Open a route: validation routes load the code's status
    pub async fn open(&self, route: Route) -> Destination {
        match route {
            Route::ValidateReward { code } => {
                let mut view = ValidationView::new(code);
                view.load(&self.client).await;
                Destination::Validation(view)
            }
            Route::SendTicket { user_id } => Destination::SendTicket { user_id },
        }
    }

    pub fn sign_out(&mut self) {
        self.auth.sign_out_all();
    }
}

/// Drops repeats of the same payload inside a time window, so a code held
/// in front of the camera navigates once
pub struct Debounce {
    window: Duration,
    last: Option<(String, Instant)>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Whether `text` should be acted on now
    pub fn accept(&mut self, text: &str) -> bool {
        let now = Instant::now();
        if let Some((last, at)) = &self.last {
            if last == text && now.duration_since(*at) < self.window {
                return false;
            }
        }
        self.last = Some((text.to_string(), now));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::gamification::fake::{serve, FakeState};
    use crate::app::session::Role;
    use crate::qr::QrScanner;
    use image::DynamicImage;

    fn app_for(url: &str) -> App {
        let settings = Settings {
            gamification_url: Some(url.to_string()),
            app_origin: Some("https://mercatmediterrani.com".to_string()),
            ..Settings::default()
        };
        App::new(settings, AuthContext::anonymous().with_user("u-1", "t"))
    }

    #[test]
    fn test_links() {
        let app = app_for("http://localhost:8005");
        assert_eq!(
            app.reward_link("ABC123"),
            "https://mercatmediterrani.com/validate-reward/ABC123"
        );
        assert_eq!(app.profile_link("42"), "https://mercatmediterrani.com/send-ticket/42");
    }

    #[test]
    fn test_profile_qr_scans_to_send_ticket() {
        let app = app_for("http://localhost:8005");
        let surface = app.render_profile_qr("42", None).unwrap();
        assert_eq!(surface.image().dimensions(), (200, 200));
        assert_eq!(surface.payload(), Some("https://mercatmediterrani.com/send-ticket/42"));

        let img = DynamicImage::ImageRgba8(surface.image().clone());
        let scanned = QrScanner::new().scan_image(&img).unwrap();
        assert_eq!(app.classify(&scanned.text), Some(Route::send_ticket("42")));
    }

    #[tokio::test]
    async fn test_scan_reward_qr_to_validation() {
        let (url, _) = serve(
            FakeState::default()
                .with_reward("cafe", 50.0)
                .with_balance("u-1", 100.0),
        )
        .await;
        let app = app_for(&url);
        let receipt = app.client().redeem(&app.auth, "u-1", "cafe").await.unwrap();

        let surface = app.render_reward_qr(&receipt.code, None).unwrap();
        let img = DynamicImage::ImageRgba8(surface.image().clone());
        let scanned = QrScanner::new().scan_image(&img).unwrap();

        let route = app.classify(&scanned.text).unwrap();
        assert_eq!(route, Route::validate(receipt.code.clone()));

        match app.open(route).await {
            Destination::Validation(view) => {
                assert_eq!(view.code(), receipt.code);
                assert!(view.outcome().unwrap().valid);
            }
            other => panic!("Expected validation, got {:?}", other),
        }
    }

    #[test]
    fn test_qr_size_override() {
        let app = app_for("http://localhost:8005");
        let surface = app.render_reward_qr("ABC123", Some(512)).unwrap();
        assert_eq!(surface.image().dimensions(), (512, 512));
        // Configured options are untouched
        assert_eq!(app.settings.reward_qr.size, 256);
    }

    #[test]
    fn test_dispatcher_chain_order() {
        let app = app_for("http://localhost:8005");
        let names: Vec<_> = app.dispatcher().matchers().collect();
        assert_eq!(names.first(), Some(&"validation-link"));
        assert_eq!(names.last(), Some(&"fallback-code"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce() {
        let mut debounce = Debounce::new(Duration::from_secs(3));
        assert!(debounce.accept("ABC"));
        assert!(!debounce.accept("ABC"));
        assert!(debounce.accept("XYZ"));
        assert!(debounce.accept("ABC"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!debounce.accept("ABC"));
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(debounce.accept("ABC"));
    }

    #[test]
    fn test_sign_out() {
        let mut app = app_for("http://localhost:8005");
        app.sign_out();
        assert!(!app.auth.is_signed_in(Role::User));
    }
}
