//! Payload Dispatch
//!
//! Classifies decoded QR text into an in-app route. Matchers run in
//! priority order and the first hit wins. Profile QRs and reward QRs share
//! no envelope format, so classification is best-effort rather than strict.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;

pub const VALIDATE_REWARD_PATH: &str = "/validate-reward/";
pub const SEND_TICKET_PATH: &str = "/send-ticket/";

/// Minimum length of a bare redemption code
pub const BARE_CODE_MIN_LEN: usize = 8;

static BARE_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("^[A-Z0-9]{{{},}}$", BARE_CODE_MIN_LEN)).expect("valid bare code regex")
});

static ROUTE_FRAGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(validate-reward|send-ticket)/(\w+)").expect("valid route fragment regex")
});

/// Destination for a scanned payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    ValidateReward { code: String },
    SendTicket { user_id: String },
}

impl Route {
    pub fn validate(code: impl Into<String>) -> Self {
        Route::ValidateReward { code: code.into() }
    }

    pub fn send_ticket(user_id: impl Into<String>) -> Self {
        Route::SendTicket {
            user_id: user_id.into(),
        }
    }

    /// In-app path, with the identifier percent-encoded
    pub fn path(&self) -> String {
        match self {
            Route::ValidateReward { code } => {
                format!("{}{}", VALIDATE_REWARD_PATH, urlencoding::encode(code))
            }
            Route::SendTicket { user_id } => {
                format!("{}{}", SEND_TICKET_PATH, urlencoding::encode(user_id))
            }
        }
    }

    /// Absolute deep link for `origin` (e.g. `https://mercatmediterrani.com`)
    pub fn deep_link(&self, origin: &str) -> String {
        format!("{}{}", origin.trim_end_matches('/'), self.path())
    }
}

/// One classification rule
pub trait PayloadMatcher: Send + Sync {
    fn name(&self) -> &'static str;
    fn matches(&self, text: &str) -> Option<Route>;
}

/// Last path segment after `prefix`, if the URL path is exactly `prefix{id}`
fn url_segment(text: &str, prefix: &str) -> Option<String> {
    let url = Url::parse(text).ok()?;
    let rest = url.path().strip_prefix(prefix)?;
    let id = rest.trim_end_matches('/');
    if id.is_empty() || id.contains('/') {
        return None;
    }
    let decoded = urlencoding::decode(id).ok()?;
    Some(decoded.into_owned())
}

/// `https://host/validate-reward/{code}`
pub struct ValidationLinkMatcher;

impl PayloadMatcher for ValidationLinkMatcher {
    fn name(&self) -> &'static str {
        "validation-link"
    }

    fn matches(&self, text: &str) -> Option<Route> {
        url_segment(text, VALIDATE_REWARD_PATH).map(Route::validate)
    }
}

/// `https://host/send-ticket/{user_id}`
pub struct ProfileLinkMatcher;

impl PayloadMatcher for ProfileLinkMatcher {
    fn name(&self) -> &'static str {
        "profile-link"
    }

    fn matches(&self, text: &str) -> Option<Route> {
        url_segment(text, SEND_TICKET_PATH).map(Route::send_ticket)
    }
}

/// Uppercase alphanumeric code with no surrounding link
pub struct BareCodeMatcher;

impl PayloadMatcher for BareCodeMatcher {
    fn name(&self) -> &'static str {
        "bare-code"
    }

    fn matches(&self, text: &str) -> Option<Route> {
        BARE_CODE.is_match(text).then(|| Route::validate(text))
    }
}

/// Route fragment embedded anywhere in the text, e.g. a link with a
/// mangled scheme or surrounding prose
pub struct RouteFragmentMatcher;

impl PayloadMatcher for RouteFragmentMatcher {
    fn name(&self) -> &'static str {
        "route-fragment"
    }

    fn matches(&self, text: &str) -> Option<Route> {
        let caps = ROUTE_FRAGMENT.captures(text)?;
        let id = caps.get(2)?.as_str();
        match caps.get(1)?.as_str() {
            "send-ticket" => Some(Route::send_ticket(id)),
            _ => Some(Route::validate(id)),
        }
    }
}

/// Anything else is tried as a redemption code; validation will reject it
/// if it is not one
pub struct FallbackCodeMatcher;

impl PayloadMatcher for FallbackCodeMatcher {
    fn name(&self) -> &'static str {
        "fallback-code"
    }

    fn matches(&self, text: &str) -> Option<Route> {
        let text = text.trim();
        (!text.is_empty()).then(|| Route::validate(text))
    }
}

/// Ordered matcher chain
pub struct Dispatcher {
    matchers: Vec<Box<dyn PayloadMatcher>>,
}

impl Dispatcher {
    pub fn new(matchers: Vec<Box<dyn PayloadMatcher>>) -> Self {
        Self { matchers }
    }

    pub fn matchers(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.matchers.iter().map(|m| m.name())
    }

    /// Classify decoded text; `None` only for empty input
    pub fn classify(&self, text: &str) -> Option<Route> {
        self.matchers.iter().find_map(|matcher| {
            let route = matcher.matches(text)?;
            tracing::debug!("Payload matched {}: {:?}", matcher.name(), route);
            Some(route)
        })
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(vec![
            Box::new(ValidationLinkMatcher),
            Box::new(ProfileLinkMatcher),
            Box::new(BareCodeMatcher),
            Box::new(RouteFragmentMatcher),
            Box::new(FallbackCodeMatcher),
        ])
    }
}
