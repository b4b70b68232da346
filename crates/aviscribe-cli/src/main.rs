//! Aviscribe CLI - sign in to an Aviscribe backend and inspect the session.
//!
//! The session is persisted between runs (file or OS keychain, see
//! `Config`), so `aviscribe login` once and later commands reuse and refresh
//! the tokens transparently.

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use aviscribe_core::api::{
    AuthApi, ChangePasswordRequest, LoginRequest, RegisterRequest, SessionEvent,
    UpdateProfileRequest,
};
use aviscribe_core::auth::{is_token_valid, Clock, SystemClock};
use aviscribe_core::config::Config;
use aviscribe_core::router::{
    login_redirect, NavigationDecision, NavigationGuard, Router, HOME_PATH,
};
use aviscribe_core::{RequestGateway, SessionStore};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "aviscribe", version, about = "Aviscribe account and session tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in and store the session
    Login {
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Create an account and log in
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        display_name: String,
        #[arg(short, long)]
        phone: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show whether the stored session is usable
    Status,
    /// Fetch the signed-in user's profile
    Whoami,
    /// Update display name and phone
    Profile {
        #[arg(short, long)]
        display_name: String,
        #[arg(short, long)]
        phone: Option<String>,
    },
    /// Change the account password
    Password,
    /// Show what the navigation guard decides for a location
    Route { path: String },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();
    let cli = Cli::parse();

    let mut config = Config::load()?;
    let session = config.open_session()?;
    let gateway = Arc::new(config.gateway(session.clone())?);
    let mut events = gateway.subscribe();
    info!(base_url = %config.base_url, "Aviscribe CLI starting");

    let result = run(cli.command, &mut config, &session, gateway).await;
    report_events(&mut events);
    result
}

async fn run(
    command: Command,
    config: &mut Config,
    session: &Arc<SessionStore>,
    gateway: Arc<RequestGateway>,
) -> Result<()> {
    let api = AuthApi::new(gateway);

    match command {
        Command::Login { username } => {
            let username = match username.or_else(|| config.last_username.clone()) {
                Some(username) => username,
                None => prompt("Username: ")?,
            };
            let password = rpassword::prompt_password("Password: ")?;
            let profile = api
                .login(&LoginRequest {
                    username: username.clone(),
                    password,
                })
                .await?;

            config.last_username = Some(username);
            config.save().context("Failed to save config")?;
            let name = profile.as_ref().map_or("unknown", |p| p.label());
            println!("Logged in as {}", name);
        }
        Command::Register {
            username,
            display_name,
            phone,
        } => {
            let password = rpassword::prompt_password("Password: ")?;
            let confirm = rpassword::prompt_password("Confirm password: ")?;
            if password != confirm {
                anyhow::bail!("Passwords do not match");
            }
            api.register(&RegisterRequest {
                username: username.clone(),
                phone,
                password,
                display_name,
            })
            .await?;

            config.last_username = Some(username.clone());
            config.save().context("Failed to save config")?;
            println!("Registered and logged in as {}", username);
        }
        Command::Logout => {
            api.logout();
            println!("Logged out");
        }
        Command::Status => print_status(session),
        Command::Whoami => {
            let profile = api.fetch_profile().await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        Command::Profile {
            display_name,
            phone,
        } => {
            let profile = api
                .update_profile(&UpdateProfileRequest {
                    display_name,
                    phone,
                })
                .await?;
            println!("Profile updated: {}", profile.label());
        }
        Command::Password => {
            let old_password = rpassword::prompt_password("Current password: ")?;
            let new_password = rpassword::prompt_password("New password: ")?;
            api.change_password(&ChangePasswordRequest {
                old_password,
                new_password,
            })
            .await?;
            println!("Password changed");
        }
        Command::Route { path } => {
            let guard = NavigationGuard::new(session.clone(), Router::aviscribe());
            let (target, decision) = guard.navigate(&path);
            println!("{} ({})", target.document_title(), target.name.unwrap_or("no match"));
            match decision {
                NavigationDecision::Allow => println!("allow"),
                NavigationDecision::Redirect(redirect) => {
                    println!("redirect -> {}", redirect.location())
                }
            }
        }
    }
    Ok(())
}

fn print_status(session: &SessionStore) {
    let snapshot = session.snapshot();
    let now = SystemClock.now_millis();
    let describe = |token: &str, expires_at: i64| {
        if token.is_empty() {
            "absent".to_string()
        } else if is_token_valid(token, expires_at, now) {
            format!("valid for {}s", expires_at - now / 1000)
        } else {
            "expired".to_string()
        }
    };

    println!(
        "access token:  {}",
        describe(&snapshot.access_token, snapshot.access_token_expires_at)
    );
    println!(
        "refresh token: {}",
        describe(&snapshot.refresh_token, snapshot.refresh_token_expires_at)
    );
    match snapshot.profile {
        Some(ref profile) => println!("user:          {}", profile.label()),
        None => println!("user:          -"),
    }
    // Reading the verdict tears down a dead session, same as the router does
    if session.is_authenticated() {
        println!("authenticated");
    } else {
        println!("not authenticated");
    }
}

/// The failed command already reports its own error; all that is left to say
/// is where to go next when the session is gone.
fn report_events(events: &mut broadcast::Receiver<SessionEvent>) {
    if let Some(hint) = login_hint(events) {
        eprintln!("{}", hint);
    }
}

fn login_hint(events: &mut broadcast::Receiver<SessionEvent>) -> Option<String> {
    let mut auth_required = false;
    while let Ok(event) = events.try_recv() {
        auth_required |= matches!(event, SessionEvent::AuthRequired { .. });
    }
    auth_required.then(|| {
        format!(
            "Run `aviscribe login` to sign in again ({})",
            login_redirect(HOME_PATH).location()
        )
    })
}

fn prompt(label: &str) -> Result<String> {
    use std::io::Write;

    let mut stdout = io::stdout();
    write!(stdout, "{}", label)?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
