//! EventBook CLI - Lightweight event-booking client
//!
//! A terminal client for the EventBook platform: browse events, book seats
//! and pay, with a self-maintaining authenticated session underneath.

mod api;
mod auth;
mod config;
mod session;
mod store;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::client::ApiClient;
use auth::HttpAuthGateway;
use config::Endpoints;
use session::{SessionConfig, SessionManager, SessionState};
use store::SessionStore;

#[derive(Parser)]
#[command(name = "eventbook-cli")]
#[command(about = "Lightweight CLI client for the EventBook booking platform", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with an existing account
    Login {
        /// Account email
        email: String,

        /// Password (prompted when omitted)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Create an account and log in
    Register {
        /// Account email
        email: String,

        /// Password (prompted when omitted)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Log out and clear stored credentials
    Logout,

    /// Show current session status
    Status,

    /// List upcoming events
    Events,

    /// List your bookings
    Bookings,

    /// Book seats for an event
    Book {
        /// Event ID (from `events` output)
        event_id: String,

        /// Number of seats
        #[arg(short, long, default_value = "1")]
        seats: u32,
    },

    /// Pay for a pending booking
    Pay {
        /// Booking ID (from `book` or `bookings` output)
        #[arg(long)]
        booking_id: String,

        /// Amount to charge
        #[arg(long)]
        amount: f64,

        /// Phone number for payment confirmation
        #[arg(long)]
        phone: String,
    },

    /// Keep the session alive in the foreground, printing state changes
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let endpoints = Endpoints::load()?;
    let manager = build_manager(&endpoints)?;
    // Running a command counts as user interaction.
    manager.record_activity();

    match cli.command {
        Commands::Login { email, password } => {
            let password = resolve_password(password)?;
            let session = manager.login(&email, &password).await?;
            println!(
                "Logged in as {} (token valid for {} min).",
                email,
                session.millis_until_expiry().unwrap_or(0) / 60_000
            );
        }
        Commands::Register { email, password } => {
            let password = resolve_password(password)?;
            manager.register(&email, &password).await?;
            println!("Registered and logged in as {}.", email);
        }
        Commands::Logout => {
            manager.logout();
            println!("Logged out.");
        }
        Commands::Status => {
            print_status(&manager);
        }
        Commands::Events => {
            let client = ApiClient::new(endpoints.catalog_url.clone(), manager.clone())?;
            api::list_events(&client).await?;
        }
        Commands::Bookings => {
            let client = ApiClient::new(endpoints.booking_url.clone(), manager.clone())?;
            api::list_bookings(&client).await?;
        }
        Commands::Book { event_id, seats } => {
            let client = ApiClient::new(endpoints.booking_url.clone(), manager.clone())?;
            api::create_booking(&client, &event_id, seats).await?;
        }
        Commands::Pay {
            booking_id,
            amount,
            phone,
        } => {
            let client = ApiClient::new(endpoints.payment_url.clone(), manager.clone())?;
            api::process_payment(&client, &booking_id, amount, &phone).await?;
        }
        Commands::Watch => {
            watch_session(manager).await?;
        }
    }

    Ok(())
}

/// Wire up the session core: persisted store, HTTP auth gateway, manager.
fn build_manager(endpoints: &Endpoints) -> Result<SessionManager> {
    let store = SessionStore::open()?;
    let gateway = Arc::new(HttpAuthGateway::new(endpoints.auth_url.clone())?);
    Ok(SessionManager::new(gateway, store, SessionConfig::default()))
}

fn resolve_password(password: Option<String>) -> Result<String> {
    use std::io::Write;

    if let Some(password) = password {
        return Ok(password);
    }
    print!("Password: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end().to_string())
}

fn print_status(manager: &SessionManager) {
    let session = manager.session();
    let state = manager.state();

    println!("Session:     {}", state);
    match &session.user {
        Some(user) => println!("User:        {}", user.email),
        None => println!("User:        none"),
    }
    match state {
        SessionState::Anonymous => {}
        SessionState::Expired => {
            // Rehydrated or stale token; the watchdog refreshes it on the
            // next authenticated command or `watch`.
            println!("Token:       expired (refresh pending)");
        }
        _ => {
            if let Some(millis) = session.millis_until_expiry() {
                println!("Token:       unverified, expires in {} min", millis / 60_000);
            }
        }
    }
    match &session.refresh_token {
        Some(_) => println!("Refresh tok: present"),
        None => println!("Refresh tok: none"),
    }
    if manager.is_loading() {
        println!("Auth:        operation in flight");
    }
    if let Some(err) = manager.last_error() {
        println!("Last error:  {}", err);
    }

    if !session.is_authenticated() {
        println!("\nRun 'eventbook-cli login <email>' to authenticate.");
    }
}

/// Foreground session keeper: runs the proactive-refresh/verify/inactivity
/// timers and prints every observed session change until Ctrl-C.
async fn watch_session(manager: SessionManager) -> Result<()> {
    let mut rx = manager.subscribe();
    rx.borrow_and_update();
    manager.start();

    println!("Watching session ({}); Ctrl-C to exit.", manager.state());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let session = rx.borrow_and_update().clone();
                let who = session
                    .user
                    .as_ref()
                    .map(|u| u.email.as_str())
                    .unwrap_or("-");
                println!("session: {} ({})", manager.state(), who);
            }
        }
    }

    // Dropping the manager tears the watchdog down; the session itself
    // stays persisted for the next invocation.
    Ok(())
}
