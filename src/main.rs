//! Mercat QR - Reward redemption client
//!
//! Generates reward and profile QR codes, scans them from images or a
//! polled frame source, and drives the redemption lifecycle against the
//! gamification service.

mod api;
mod app;
mod dispatch;
mod qr;
mod utils;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use app::session::Role;
use app::{
    App, AuthContext, Debounce, Destination, Environment, RedemptionStatus, Settings, UseState,
    ValidationView,
};
use dispatch::Route;
use qr::{LiveScan, QrScanner, QrSurface, ScanState, SnapshotCamera};

/// How long a payload held in front of the camera is ignored after it fired
const SCAN_DEBOUNCE: Duration = Duration::from_secs(3);

#[derive(Parser, Debug)]
#[command(name = "mercat-qr")]
#[command(author, version, about = "Mercat Mediterrani reward QR client")]
struct Cli {
    /// Deployment to talk to (overrides settings and MERCAT_ENVIRONMENT)
    #[arg(long, global = true, value_enum)]
    environment: Option<Environment>,

    /// Gamification service base URL
    #[arg(long, global = true)]
    gamification_url: Option<String>,

    /// Origin used in QR deep links
    #[arg(long, global = true)]
    origin: Option<String>,

    /// Signed-in user's id
    #[arg(long, global = true)]
    user_id: Option<String>,

    /// Signed-in user's access token
    #[arg(long, global = true, env = "MERCAT_USER_TOKEN", hide_env_values = true)]
    user_token: Option<String>,

    /// Signed-in vendor's id
    #[arg(long, global = true, default_value = "vendor")]
    vendor_id: String,

    /// Signed-in vendor's access token
    #[arg(long, global = true, env = "MERCAT_VENDOR_TOKEN", hide_env_values = true)]
    vendor_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the reward catalogue
    Rewards,
    /// Show a single reward
    Reward { reward_id: String },
    /// Spend points on a reward
    Redeem {
        reward_id: String,
        /// Also render the reward QR to this file
        #[arg(long)]
        qr: Option<PathBuf>,
    },
    /// Claim a special (zero-cost) reward
    RedeemSpecial { special_reward_id: String },
    /// Check a redemption code without consuming it
    Validate { code: String },
    /// Consume a redemption code (vendor)
    Use { code: String },
    /// Force a redemption code to expire (vendor)
    Expire { code: String },
    /// Show the signed-in user's redemptions
    History {
        /// available, used or expired
        #[arg(long)]
        status: Option<RedemptionStatus>,
    },
    /// Render a QR code
    Qr {
        #[command(subcommand)]
        kind: QrKind,
    },
    /// Decode a QR code from an image file and open it
    ScanImage {
        path: PathBuf,
        /// Consume the code after validating it
        #[arg(long)]
        r#use: bool,
    },
    /// Poll a frame source for QR codes until Ctrl-C
    ScanLive {
        /// Image file standing in for the camera; re-read every tick
        #[arg(long)]
        feed: PathBuf,
        /// Polling interval in milliseconds (defaults to settings)
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Stop after the first detection
        #[arg(long)]
        once: bool,
    },
    /// Show where a scanned payload would lead
    Classify { text: String },
    /// Check the gamification service is reachable
    Health,
    /// Show or persist settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand, Debug)]
enum QrKind {
    /// QR for a redemption code
    Reward {
        code: String,
        #[command(flatten)]
        output: QrOutput,
    },
    /// QR linking to a user's profile
    Profile {
        /// Defaults to --user-id
        user_id: Option<String>,
        #[command(flatten)]
        output: QrOutput,
    },
}

#[derive(clap::Args, Debug)]
struct QrOutput {
    /// Output PNG path (defaults to the download file name)
    #[arg(long)]
    out: Option<PathBuf>,
    /// Target size in pixels
    #[arg(long)]
    size: Option<u32>,
    /// Copy the encoded link to the clipboard
    #[arg(long)]
    copy: bool,
    /// Print the PNG as a data URL instead of writing a file
    #[arg(long)]
    data_url: bool,
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    Show,
    /// Write the effective settings (including flags) to the settings file
    Save,
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("Mercat QR v{}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(cli))
}

fn load_settings(cli: &Cli) -> Settings {
    let mut settings = Settings::load().unwrap_or_else(|e| {
        warn!("Failed to load settings, using defaults: {}", e);
        let mut settings = Settings::default();
        settings.apply_env(|key| std::env::var(key).ok());
        settings
    });

    if let Some(env) = cli.environment {
        settings.environment = env;
    }
    if let Some(url) = &cli.gamification_url {
        settings.gamification_url = Some(url.clone());
    }
    if let Some(origin) = &cli.origin {
        settings.app_origin = Some(origin.clone());
    }
    settings
}

fn auth_context(cli: &Cli) -> AuthContext {
    let mut auth = AuthContext::anonymous();
    if let (Some(id), Some(token)) = (&cli.user_id, &cli.user_token) {
        auth = auth.with_user(id.as_str(), token.as_str());
    }
    if let Some(token) = &cli.vendor_token {
        auth = auth.with_vendor(cli.vendor_id.as_str(), token.as_str());
    }
    auth
}

/// Warn early when a role's token is missing; the service will refuse
fn check_signed_in(app: &App, role: Role) {
    if !app.auth.is_signed_in(role) {
        warn!("No {:?} token given, the service will likely refuse this call", role);
    }
}

fn require_user<'a>(app: &'a App, cli: &'a Cli) -> Result<&'a str> {
    app.auth
        .user_id()
        .or(cli.user_id.as_deref())
        .context("--user-id is required for this command")
}

async fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(&cli);
    let mut app = App::new(settings, auth_context(&cli));

    match &cli.command {
        Command::Rewards => {
            for reward in app.client().rewards().await? {
                let stock = match reward.max_redemptions {
                    Some(max) => format!("{}/{}", reward.current_redemptions, max),
                    None => "unlimited".to_string(),
                };
                println!(
                    "{:<24} {:>8} pts  {:<10} {}{}",
                    reward.id,
                    reward.points_cost,
                    stock,
                    reward.name,
                    if reward.is_available() { "" } else { " (unavailable)" }
                );
            }
        }

        Command::Reward { reward_id } => {
            let reward = app.client().reward(reward_id).await?;
            println!("{} ({})", reward.name, reward.id);
            if !reward.description.is_empty() {
                println!("{}", reward.description);
            }
            println!("Cost: {} pts", reward.points_cost);
            if !reward.reward_type.is_empty() {
                println!("Type: {} {}", reward.reward_type, reward.reward_value);
            }
            match reward.max_redemptions {
                Some(max) => println!("Redeemed: {}/{}", reward.current_redemptions, max),
                None => println!("Redeemed: {}", reward.current_redemptions),
            }
            println!(
                "Available: {}",
                if reward.is_available() { "yes" } else { "no" }
            );
        }

        Command::Redeem { reward_id, qr: qr_path } => {
            let user_id = require_user(&app, &cli)?;
            check_signed_in(&app, Role::User);
            let receipt = app.client().redeem(&app.auth, user_id, reward_id).await?;
            println!("{}", receipt.message);
            println!("Code: {}", receipt.code);
            if let Some(points) = receipt.remaining_points {
                println!("Remaining points: {}", points);
            }
            if let Some(path) = qr_path {
                let surface = app.render_reward_qr(&receipt.code, None)?;
                surface.save_png(path)?;
                println!("QR written to {}", path.display());
            }
        }

        Command::RedeemSpecial { special_reward_id } => {
            let user_id = require_user(&app, &cli)?;
            let receipt = app
                .client()
                .redeem_special(&app.auth, user_id, special_reward_id)
                .await?;
            println!("{}", receipt.message);
            println!("Code: {}", receipt.code);
        }

        Command::Validate { code } => {
            let mut view = ValidationView::new(code.as_str());
            view.load(app.client()).await;
            println!("{}", view.render());
            if !view.outcome().is_some_and(|o| o.valid) {
                bail!("Code {} is not valid", code);
            }
        }

        Command::Use { code } => {
            check_signed_in(&app, Role::Vendor);
            let mut view = ValidationView::new(code.as_str());
            view.load(app.client()).await;
            use_validated(&app, &mut view).await?;
        }

        Command::Expire { code } => {
            check_signed_in(&app, Role::Vendor);
            let receipt = app.client().expire(&app.auth, code).await?;
            println!("{}", receipt.message);
        }

        Command::History { status } => {
            let user_id = require_user(&app, &cli)?;
            let now = Utc::now();
            let redemptions = app.client().redemptions(&app.auth, user_id, *status).await?;
            if redemptions.is_empty() {
                println!("No redemptions");
            }
            for redemption in redemptions {
                let expires = redemption
                    .expires_at
                    .map(|e| e.format("%d/%m/%Y").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<12} {:<10} {:>8} pts  expires {:<10}  {}",
                    redemption.code,
                    redemption.status(now).as_filter(),
                    redemption.points_spent,
                    expires,
                    redemption.reward_name
                );
            }
        }

        Command::Qr { kind } => match kind {
            QrKind::Reward { code, output } => {
                let surface = app.render_reward_qr(code, output.size)?;
                write_qr(&surface, output, qr::encoder::reward_file_name(code))?;
            }
            QrKind::Profile { user_id, output } => {
                let user_id = match user_id {
                    Some(id) => id.as_str(),
                    None => require_user(&app, &cli)?,
                };
                let surface = app.render_profile_qr(user_id, output.size)?;
                write_qr(&surface, output, qr::encoder::profile_file_name(user_id))?;
            }
        },

        Command::ScanImage { path, r#use } => {
            let mut scanner = QrScanner::new();
            let mut detected = None;
            let found = scanner.scan_upload(path, |result| detected = Some(result))?;
            let Some(result) = detected.filter(|_| found) else {
                bail!("No QR code found in {}", path.display());
            };
            println!("Scanned: {}", result.text);
            open_payload(&app, &result.text, *r#use).await?;
        }

        Command::ScanLive {
            feed,
            interval_ms,
            once,
        } => {
            let interval = interval_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| app.settings.scan_interval());
            scan_live(&app, feed.clone(), interval, *once).await?;
        }

        Command::Classify { text } => match app.classify(text) {
            Some(route) => {
                let chain: Vec<_> = app.dispatcher().matchers().collect();
                info!("Matcher chain: {}", chain.join(" > "));
                println!("{}", route.path());
                println!("{}", route.deep_link(&app.settings.origin()));
            }
            None => println!("Not a Mercat QR payload"),
        },

        Command::Health => {
            if app.client().health().await {
                println!("{} is up", app.client().base_url());
            } else {
                bail!("{} is not reachable", app.client().base_url());
            }
        }

        Command::Settings { action } => match action {
            SettingsAction::Show => {
                println!("{}", serde_json::to_string_pretty(&app.settings)?);
            }
            SettingsAction::Save => {
                app.settings.save()?;
                if let Some(path) = Settings::file_path() {
                    println!("Settings saved to {}", path.display());
                }
            }
        },
    }

    app.sign_out();
    Ok(())
}

fn write_qr(surface: &QrSurface, output: &QrOutput, file_name: String) -> Result<()> {
    let link = surface.payload().unwrap_or_default();

    if output.copy {
        match utils::copy_to_clipboard(link) {
            Ok(()) => println!("Link copied to clipboard"),
            Err(e) => warn!("Could not copy link: {}", e),
        }
    }

    if output.data_url {
        println!("{}", surface.to_data_url()?);
        return Ok(());
    }

    let path = output.out.clone().unwrap_or_else(|| PathBuf::from(file_name));
    surface.save_png(&path)?;
    let (width, height) = surface.image().dimensions();
    println!("{} -> {} ({}x{})", link, path.display(), width, height);
    Ok(())
}

/// Classify a scanned payload and show where it leads
async fn open_payload(app: &App, text: &str, consume: bool) -> Result<()> {
    let Some(route) = app.classify(text) else {
        println!("Not a Mercat QR payload");
        return Ok(());
    };
    info!("Opening {}", route.path());

    match app.open(route).await {
        Destination::Validation(mut view) => {
            if consume {
                use_validated(app, &mut view).await?;
            } else {
                println!("{}", view.render());
            }
        }
        Destination::SendTicket { user_id } => {
            println!("Send ticket to user {}", user_id);
            println!(
                "{}",
                Route::send_ticket(user_id).deep_link(&app.settings.origin())
            );
        }
    }
    Ok(())
}

async fn use_validated(app: &App, view: &mut ValidationView) -> Result<()> {
    if let Err(refused) = view.use_code(app.client(), &app.auth).await {
        println!("{}", view.render());
        bail!("Cannot use {}: {}", view.code(), refused);
    }
    println!("{}", view.render());
    if let UseState::RolledBack { error, .. } = view.use_state() {
        bail!("Use of {} failed: {}", view.code(), error);
    }
    Ok(())
}

async fn scan_live(app: &App, feed: PathBuf, interval: Duration, once: bool) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut debounce = Debounce::new(SCAN_DEBOUNCE);

    let scan = LiveScan::start(
        SnapshotCamera::new(feed),
        app.settings.camera.clone(),
        interval,
        move |result| {
            if debounce.accept(&result.text) {
                let _ = tx.send(result);
            }
        },
    );
    let mut state = scan.subscribe();
    println!("Scanning every {} ms, Ctrl-C to stop", interval.as_millis());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            Some(result) = rx.recv() => {
                println!(
                    "[{}] frame {}: {}",
                    result.scanned_at.format("%H:%M:%S"),
                    result.frame,
                    result.text
                );
                open_payload(app, &result.text, false).await?;
                if once {
                    break;
                }
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                if let ScanState::Failed(reason) = current {
                    warn!("Camera unavailable: {}", reason);
                    println!("Camera could not be started. Use `scan-image <file>` instead.");
                    break;
                }
            }
        }
    }

    let final_state = scan.stop().await;
    info!("Live scan finished in state {:?}", final_state);
    Ok(())
}
