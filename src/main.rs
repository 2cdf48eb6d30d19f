//! Peloton - command-line client for the cycling-community admin console

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use peloton::api::auth::{Gender, RegisterUser};
use peloton::api::events::{EventQuery, EventStatus};
use peloton::auth::lifecycle::SessionEvent;
use peloton::auth::token::TokenStatus;
use peloton::auth::AuthManager;
use peloton::config::{Config, StorageBackend};
use peloton::roles::Role;
use peloton::util::truncate_string;

#[derive(Parser, Debug)]
#[command(name = "peloton")]
#[command(about = "Peloton - command-line client for the cycling-community admin console")]
#[command(version)]
struct Args {
    /// Path to the config file (defaults to the platform config directory)
    #[arg(long, env = "PELOTON_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Backend base URL
    #[arg(long, env = "PELOTON_BASE_URL", global = true)]
    base_url: Option<String>,

    /// Where session tokens are stored
    #[arg(long, value_enum, env = "PELOTON_STORAGE", global = true)]
    storage: Option<StorageBackend>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Exchange an identity-provider token for a console session
    Login {
        /// ID token issued by the identity provider
        #[arg(long, env = "PELOTON_ID_TOKEN", hide_env_values = true)]
        id_token: SecretString,
    },
    /// Register a new console user
    Register {
        /// ID token issued by the identity provider
        #[arg(long, env = "PELOTON_ID_TOKEN", hide_env_values = true)]
        id_token: SecretString,
        #[arg(long)]
        full_name: String,
        #[arg(long, value_enum)]
        gender: Gender,
        #[arg(long)]
        age: u32,
    },
    /// End the session and revoke the refresh token
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Show token expiry without contacting the backend
    Status,
    /// Manage events
    Events {
        #[command(subcommand)]
        action: EventsAction,
    },
    /// Manage communities
    Communities {
        #[command(subcommand)]
        action: CommunitiesAction,
    },
    /// List the console sections a role may open
    Sections {
        /// Role to inspect (defaults to the signed-in user's role)
        #[arg(long)]
        role: Option<Role>,
    },
}

#[derive(Subcommand, Debug)]
enum EventsAction {
    /// List events
    List {
        #[arg(long)]
        status: Option<EventStatus>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Show one event as JSON
    Get { id: String },
    /// Delete an event
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum CommunitiesAction {
    /// List communities
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Show one community as JSON
    Get { id: String },
    /// Delete a community
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = load_config(&args)?;
    let manager = AuthManager::from_config(&config, None)?;
    let mut session_events = manager.lifecycle().subscribe();

    let result = run(&manager, args.command).await;
    report_session_events(&mut session_events);
    result
}

fn load_config(args: &Args) -> Result<Config> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    let mut config = Config::load(&path)?;

    if let Some(base_url) = &args.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(storage) = args.storage {
        config.storage = storage;
    }
    Ok(config)
}

async fn run(manager: &AuthManager, command: Command) -> Result<()> {
    let client = manager.client();

    match command {
        Command::Login { id_token } => {
            let outcome = manager.login(&id_token).await.context("Login failed")?;
            if outcome.is_new_user {
                println!("Identity verified. Complete registration with `peloton register`.");
            } else {
                let name = outcome
                    .profile
                    .as_ref()
                    .map_or("unknown user", |p| p.display_name());
                println!("Logged in as {name}");
            }
        }
        Command::Register {
            id_token,
            full_name,
            gender,
            age,
        } => {
            let details = RegisterUser {
                full_name,
                gender,
                age,
            };
            let outcome = manager
                .register(&id_token, &details)
                .await
                .context("Registration failed")?;
            if let Some(profile) = outcome.profile {
                println!("Registered {} ({})", profile.display_name(), profile.id);
            }
        }
        Command::Logout => {
            manager.logout().await;
            println!("Logged out");
        }
        Command::Whoami => {
            let user = manager.current_user().await?;
            println!("{}", user.display_name());
            println!("  id:   {}", user.id);
            println!("  role: {}", user.role.as_deref().unwrap_or("-"));
        }
        Command::Status => {
            let status = manager.status()?;
            if !status.logged_in && status.access == TokenStatus::Unknown {
                println!("Not logged in");
                return Ok(());
            }
            println!(
                "access token:  {}",
                describe(status.access, status.access_expires_in)
            );
            match status.refresh {
                Some(refresh) => println!(
                    "refresh token: {}",
                    describe(refresh, status.refresh_expires_in)
                ),
                None => println!("refresh token: none (registration pending)"),
            }
        }
        Command::Events { action } => match action {
            EventsAction::List {
                status,
                page,
                limit,
            } => {
                let page = client
                    .events()
                    .list(EventQuery {
                        status,
                        page,
                        limit,
                    })
                    .await?;
                for event in &page.items {
                    println!(
                        "{:<26} {:<10} {:<11} {}",
                        event.id,
                        event.status,
                        event.event_date,
                        truncate_string(&event.title, 48)
                    );
                }
                println!(
                    "page {}/{} ({} total)",
                    page.pagination.page, page.pagination.total_pages, page.pagination.total
                );
            }
            EventsAction::Get { id } => {
                let event = client.events().get(&id).await?;
                println!("{}", serde_json::to_string_pretty(&event)?);
            }
            EventsAction::Delete { id } => {
                client.events().delete(&id).await?;
                println!("Deleted event {id}");
            }
        },
        Command::Communities { action } => match action {
            CommunitiesAction::List { page, limit } => {
                let page = client.communities().list(page, limit).await?;
                for community in &page.items {
                    println!(
                        "{:<26} {:<8} {:<16} {}",
                        community.id,
                        if community.is_active { "active" } else { "inactive" },
                        truncate_string(&community.location, 16),
                        truncate_string(&community.title, 48)
                    );
                }
                println!(
                    "page {}/{} ({} total)",
                    page.pagination.page, page.pagination.total_pages, page.pagination.total
                );
            }
            CommunitiesAction::Get { id } => {
                let community = client.communities().get(&id).await?;
                println!("{}", serde_json::to_string_pretty(&community)?);
            }
            CommunitiesAction::Delete { id } => {
                client.communities().delete(&id).await?;
                println!("Deleted community {id}");
            }
        },
        Command::Sections { role } => {
            let role = match role {
                Some(role) => role,
                None => manager
                    .current_user()
                    .await?
                    .console_role()
                    .ok_or_else(|| anyhow::anyhow!("Signed-in user has no console role"))?,
            };
            println!("Sections for {role}:");
            for section in role.sections() {
                println!("  {:<22} {}", section.label(), section.route());
            }
        }
    }

    Ok(())
}

fn describe(status: TokenStatus, remaining: Option<Duration>) -> String {
    match remaining {
        Some(left) if !left.is_zero() => {
            let rounded = Duration::from_secs(left.as_secs());
            format!("{} (expires in {})", status.label(), humantime::format_duration(rounded))
        }
        _ => status.label().to_string(),
    }
}

/// Tells the user about a session that ended while the command ran.
fn report_session_events(events: &mut broadcast::Receiver<SessionEvent>) {
    loop {
        match events.try_recv() {
            Ok(SessionEvent::Terminated { reason, .. }) => {
                eprintln!("Session ended: {reason}. Run `peloton login` to sign in again.");
            }
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
}
