//! request-desk - command-line front end for the request tracker
//!
//! Each invocation restores the session from the session file, runs one
//! command and persists any session change for the next run.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use request_desk::{
    ClientArgs, ClientConfig, FetchOutcome, FilterPatch, Identity, LoadState, Navigation,
    Navigator, RequestChanges, RequestDesk, RequestFields, RequestPriority, RequestStatus,
};

#[derive(Parser, Debug)]
#[command(name = "request-desk")]
#[command(about = "Track, filter and manage requests from the command line")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    client: ClientArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long, env = "REQUEST_DESK_PASSWORD")]
        password: String,
    },

    /// Sign in with the shared, read-only guest account
    Guest,

    /// Register an account and sign in with it
    Signup {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
        /// Must match the password
        #[arg(short, long)]
        confirmation: String,
    },

    /// Sign out
    Logout,

    /// Show who is signed in
    Whoami,

    /// List requests
    List {
        #[arg(long, value_parser = parse_status)]
        status: Option<RequestStatus>,
        #[arg(long, value_parser = parse_priority)]
        priority: Option<RequestPriority>,
        /// Title substring
        #[arg(long)]
        title: Option<String>,
        #[arg(long, default_value = "1")]
        page: u32,
    },

    /// Show a single request
    Show { id: u64 },

    /// Create a request
    Create {
        #[arg(short, long)]
        title: String,
        #[arg(short, long)]
        description: String,
        #[arg(long, value_parser = parse_status, default_value = "pending")]
        status: RequestStatus,
        #[arg(long, value_parser = parse_priority, default_value = "low")]
        priority: RequestPriority,
    },

    /// Update a request you own
    Update {
        id: u64,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(long, value_parser = parse_status)]
        status: Option<RequestStatus>,
        #[arg(long, value_parser = parse_priority)]
        priority: Option<RequestPriority>,
    },

    /// Delete a request you own
    Delete { id: u64 },
}

fn parse_status(s: &str) -> Result<RequestStatus, String> {
    RequestStatus::parse(s).ok_or_else(|| format!("unknown status '{}' (pending, approved, rejected)", s))
}

fn parse_priority(s: &str) -> Result<RequestPriority, String> {
    RequestPriority::parse(s).ok_or_else(|| format!("unknown priority '{}' (low, medium, high)", s))
}

/// The terminal has no router; redirects are only logged
struct TracingNavigator;

impl Navigator for TracingNavigator {
    fn redirect(&self, path: &str) {
        info!("Navigate to {}", path);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_level = cli.client.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("request_desk={},warn", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ClientConfig::from(cli.client);
    let mut desk = RequestDesk::connect(config, Arc::new(TracingNavigator))?;
    info!(
        "API: {} (page size {})",
        desk.config().api_root(),
        desk.config().effective_page_size()
    );

    match cli.command {
        Commands::Login { email, password } => {
            let identity = desk.login(&email, &password).await?;
            println!("Signed in as {}", identity);
        }
        Commands::Guest => {
            let identity = desk.guest_login().await?;
            println!("Signed in as {}", identity);
        }
        Commands::Signup {
            email,
            password,
            confirmation,
        } => {
            let identity = desk.signup(&email, &password, &confirmation).await?;
            println!("Registered and signed in as {}", identity);
        }
        Commands::Logout => {
            desk.logout().await;
            println!("Signed out");
        }
        Commands::Whoami => match desk.identity() {
            Identity::Anonymous => println!("Not signed in"),
            identity => println!("{}", identity),
        },
        Commands::List {
            status,
            priority,
            title,
            page,
        } => {
            list(&desk, status, priority, title, page).await?;
        }
        Commands::Show { id } => {
            let record = desk.show(id).await?;
            println!("#{} {}", record.id, record.title);
            println!("  Status:   {}", record.status);
            println!("  Priority: {}", record.priority);
            println!("  Author:   {}", record.author_label());
            println!("  Created:  {}", record.created_at.format("%Y-%m-%d %H:%M"));
            println!("  Updated:  {}", record.updated_at.format("%Y-%m-%d %H:%M"));
            if !record.description.is_empty() {
                println!();
                println!("{}", record.description);
            }
        }
        Commands::Create {
            title,
            description,
            status,
            priority,
        } => {
            if let Navigation::Redirect(_) = desk.navigate("/requests/new") {
                anyhow::bail!("Sign in with a regular account to create requests");
            }
            let fields = RequestFields::new(title, description)
                .with_status(status)
                .with_priority(priority);
            match desk.create(fields).await {
                Ok(record) => println!("Created #{} {}", record.id, record.title),
                Err(e) => anyhow::bail!(failure_message(&desk, e)),
            }
        }
        Commands::Update {
            id,
            title,
            description,
            status,
            priority,
        } => {
            if desk.open_editor(id).await?.is_none() {
                anyhow::bail!("You can only edit your own requests");
            }
            let changes = RequestChanges {
                title,
                description,
                status,
                priority,
            };
            if changes.is_empty() {
                println!("Nothing to update");
                return Ok(());
            }
            match desk.update(id, changes).await {
                Ok(record) => println!("Updated #{} {}", record.id, record.title),
                Err(e) => anyhow::bail!(failure_message(&desk, e)),
            }
        }
        Commands::Delete { id } => match desk.delete(id).await {
            Ok(()) => println!("Deleted #{}", id),
            Err(e) if e.is_not_found() => anyhow::bail!("Request #{} no longer exists", id),
            Err(e) => anyhow::bail!(failure_message(&desk, e)),
        },
    }

    Ok(())
}

async fn list(
    desk: &RequestDesk,
    status: Option<RequestStatus>,
    priority: Option<RequestPriority>,
    title: Option<String>,
    page: u32,
) -> anyhow::Result<()> {
    let mut patch = FilterPatch::new().status(status).priority(priority);
    if let Some(title) = title {
        patch = patch.title(title);
    }
    let collection = desk.collection();
    collection.set_filters(patch).await?;
    if page > 1 && collection.set_page(page).await? == FetchOutcome::Skipped {
        anyhow::bail!("Page {} is past the last request", page);
    }

    let view = desk.view().await;
    if let LoadState::Stale { ref detail } = view.load_state {
        eprintln!("Showing stale results: {}", detail);
    }
    if view.items.is_empty() {
        println!("No requests found");
    }
    for item in desk.requests().await {
        let record = &item.record;
        println!(
            "{} #{:<5} [{:<8} {:<6}] {} ({})",
            if item.can_mutate { "*" } else { " " },
            record.id,
            record.status.as_str(),
            record.priority.as_str(),
            record.title,
            record.author_label(),
        );
    }

    let last_page = view.total_count.div_ceil(view.page_size as u64).max(1);
    println!(
        "Page {} of {} ({} requests){}{}",
        view.page,
        last_page,
        view.total_count,
        if view.has_previous() { " [prev]" } else { "" },
        if view.has_next() { " [next]" } else { "" },
    );
    Ok(())
}

/// Field errors from the server when present, otherwise the generic message
fn failure_message(desk: &RequestDesk, error: request_desk::SdkError) -> String {
    desk.mutation_state()
        .message()
        .unwrap_or_else(|| error.to_string())
}
