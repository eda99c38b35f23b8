//! Application Configuration
//!
//! Persistent settings for the Mercat QR client.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::gamification::DEFAULT_GAMIFICATION_URL;
use crate::qr::live::DEFAULT_SCAN_INTERVAL;
use crate::qr::{CameraConstraints, RenderOptions};

/// Environment variable selecting `development` or `production`
pub const ENVIRONMENT_VAR: &str = "MERCAT_ENVIRONMENT";
/// Environment variable overriding the gamification service URL
pub const GAMIFICATION_URL_VAR: &str = "MERCAT_GAMIFICATION_URL";

/// Lower bound for the live scan cadence
const MIN_SCAN_INTERVAL_MS: u64 = 50;

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // === Services ===
    /// Deployment the client talks to
    pub environment: Environment,

    /// Gamification service URL (None = environment default)
    pub gamification_url: Option<String>,

    /// Origin used in QR deep links (None = environment default)
    pub app_origin: Option<String>,

    // === Scanner ===
    /// Live scan polling interval in milliseconds
    pub scan_interval_ms: u64,

    /// Preferred camera
    pub camera: CameraConstraints,

    // === QR rendering ===
    pub reward_qr: RenderOptions,

    pub profile_qr: RenderOptions,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            gamification_url: None,
            app_origin: None,

            scan_interval_ms: DEFAULT_SCAN_INTERVAL.as_millis() as u64,
            camera: CameraConstraints::default(),

            reward_qr: RenderOptions::reward(),
            profile_qr: RenderOptions::profile(),
        }
    }
}

impl Settings {
    /// Get settings file path
    pub fn file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("mercat-qr").join("settings.json"))
    }

    /// Load settings from disk, then apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::file_path().ok_or_else(|| anyhow::anyhow!("No config directory"))?;
        let mut settings = Self::load_from(&path)?;
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Load settings from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::file_path().ok_or_else(|| anyhow::anyhow!("No config directory"))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Apply overrides from a variable lookup (normally the process env)
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(env) = lookup(ENVIRONMENT_VAR).and_then(|v| Environment::parse(&v)) {
            self.environment = env;
        }
        if let Some(url) = lookup(GAMIFICATION_URL_VAR).filter(|v| !v.trim().is_empty()) {
            self.gamification_url = Some(url);
        }
    }

    /// Effective gamification service URL
    pub fn gamification_url(&self) -> String {
        self.gamification_url
            .clone()
            .unwrap_or_else(|| self.environment.gamification_url().to_string())
    }

    /// Effective deep link origin
    pub fn origin(&self) -> String {
        self.app_origin
            .clone()
            .unwrap_or_else(|| self.environment.origin().to_string())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms.max(MIN_SCAN_INTERVAL_MS))
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Services on localhost ports
    #[default]
    Development,
    /// Services behind the public reverse proxy
    Production,
}

impl Environment {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Environment::Development),
            "production" | "prod" => Some(Environment::Production),
            _ => None,
        }
    }

    pub fn gamification_url(&self) -> &'static str {
        match self {
            Environment::Development => DEFAULT_GAMIFICATION_URL,
            Environment::Production => "https://mercatmediterrani.com/gamification",
        }
    }

    pub fn origin(&self) -> &'static str {
        match self {
            Environment::Development => "http://localhost:3000",
            Environment::Production => "https://mercatmediterrani.com",
        }
    }
}
