//! CLI entry point for toeai

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use console::style;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use toeai_core::auth::Identity;
use toeai_core::config::{Config, ConfigLoader};
use toeai_core::logging::init_logging;
use toeai_core::session::{ChatSession, Role, SessionStore};
use toeai_core::storage::{FileStorage, KeyValueStore};
use toeai_core::utils::expand_tilde;
use toeai_providers::{CancellationToken, GenerationClient};
use tracing::{debug, info};

mod chat;

use chat::{run_turn, ReplyMode, Turn};

#[derive(Parser)]
#[command(name = "toeai")]
#[command(about = "Chat sessions with a remote text-generation endpoint")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration directory
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in as a user (any name is accepted)
    Login { username: String },
    /// Log out and switch back to the guest user
    Logout,
    /// Show the current user
    Whoami,
    /// Start a new chat session
    New,
    /// List sessions, most recently updated first
    List,
    /// Print the messages of a session
    Show {
        /// Session ID (defaults to the active session)
        id: Option<String>,
    },
    /// Make a session the active one
    Use { id: String },
    /// Rename a session
    Rename { id: String, title: String },
    /// Delete a session
    Delete { id: String },
    /// Send a prompt and record the reply
    Send {
        /// Prompt text
        prompt: String,
        /// Session to continue (defaults to the active session)
        #[arg(short, long)]
        session: Option<String>,
        /// Image URL to attach to the prompt; may be repeated
        #[arg(short, long = "image")]
        images: Vec<String>,
        /// Wait for the complete reply instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },
    /// Show status information
    Status,
}

/// Everything a command may need, opened once per invocation
struct App {
    loader: ConfigLoader,
    config: Config,
    storage: Arc<dyn KeyValueStore>,
    store: SessionStore,
}

impl App {
    fn open(loader: ConfigLoader, config: Config) -> Self {
        let storage: Arc<dyn KeyValueStore> =
            Arc::new(FileStorage::new(expand_tilde(&config.storage.dir)));
        let store = SessionStore::with_storage(storage.clone());
        Self {
            loader,
            config,
            storage,
            store,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loader = if let Some(dir) = cli.config_dir {
        ConfigLoader::with_dir(dir)
    } else {
        ConfigLoader::new()
    };
    let config = loader.load()?;
    let _log_guard = init_logging(&config.logging);
    debug!("Loaded config from {}", loader.config_path().display());

    let mut app = App::open(loader, config);

    match cli.command {
        Commands::Login { username } => run_login(&mut app, &username)?,
        Commands::Logout => run_logout(&mut app)?,
        Commands::Whoami => run_whoami(&app)?,
        Commands::New => {
            let session = app.store.new_session();
            println!("Created {}", style(&session.id).cyan());
        }
        Commands::List => run_list(&app),
        Commands::Show { id } => run_show(&app, id.as_deref())?,
        Commands::Use { id } => {
            app.store.require_session(&id)?;
            app.store.set_active_session(Some(&id));
            println!("Active session: {}", style(&id).cyan());
        }
        Commands::Rename { id, title } => {
            if !app.store.rename_session(&id, &title) {
                bail!("No session {}", id);
            }
            let title = app.store.require_session(&id)?.title.clone();
            println!("Renamed {} to {}", style(&id).cyan(), style(title).bold());
        }
        Commands::Delete { id } => {
            if !app.store.delete_session(&id) {
                bail!("No session {}", id);
            }
            println!("Deleted {}", style(&id).cyan());
            if let Some(active) = app.store.get_active_session() {
                println!("Active session: {}", style(&active.id).cyan());
            }
        }
        Commands::Send {
            prompt,
            session,
            images,
            no_stream,
        } => {
            let mode = if no_stream {
                ReplyMode::Single
            } else {
                ReplyMode::Stream
            };
            run_send(&mut app, &prompt, session.as_deref(), images, mode).await?;
        }
        Commands::Status => run_status(&app)?,
    }

    Ok(())
}

fn run_login(app: &mut App, username: &str) -> Result<()> {
    let mut identity = Identity::load(app.storage.clone())?;
    let username = identity.login(Some(username))?.to_string();
    app.store.set_user(&username);
    println!("Logged in as {}", style(username).green().bold());
    Ok(())
}

fn run_logout(app: &mut App) -> Result<()> {
    let mut identity = Identity::load(app.storage.clone())?;
    identity.logout()?;
    app.store.logout_user();
    println!("Logged out");
    Ok(())
}

fn run_whoami(app: &App) -> Result<()> {
    let identity = Identity::load(app.storage.clone())?;
    match identity.username() {
        Some(name) => println!("{}", style(name).bold()),
        None => println!("{} (not logged in)", app.store.current_user()),
    }
    Ok(())
}

fn run_list(app: &App) {
    let sessions = app.store.current_sessions();
    if sessions.is_empty() {
        println!("No sessions yet. Start one with {}", style("toeai new").cyan());
        return;
    }

    let active = app.store.active_session_id();
    for session in sessions {
        let marker = if Some(session.id.as_str()) == active {
            style("*").green().bold()
        } else {
            style(" ")
        };
        println!(
            "{} {}  {}  {} messages  {}",
            marker,
            style(&session.id).cyan(),
            style(&session.title).bold(),
            session.messages.len(),
            style(session.updated_at.format("%Y-%m-%d %H:%M")).dim()
        );
    }
}

fn run_show(app: &App, id: Option<&str>) -> Result<()> {
    let session = match id {
        Some(id) => app.store.require_session(id)?,
        None => match app.store.get_active_session() {
            Some(session) => session,
            None => bail!("No active session"),
        },
    };
    print_session(session);
    Ok(())
}

fn print_session(session: &ChatSession) {
    println!("{} ({})", style(&session.title).bold(), style(&session.id).dim());
    for message in &session.messages {
        let role = match message.role {
            Role::User => style(message.role.as_str()).cyan().bold(),
            Role::Assistant => style(message.role.as_str()).green().bold(),
            Role::System => style(message.role.as_str()).yellow().bold(),
        };
        println!("\n{}: {}", role, message.content);
        for url in message.image_urls.iter().flatten() {
            println!("  [image] {}", url);
        }
    }
}

async fn run_send(
    app: &mut App,
    prompt: &str,
    session: Option<&str>,
    images: Vec<String>,
    mode: ReplyMode,
) -> Result<()> {
    let client = GenerationClient::from_config(&app.config.api);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut stdout = std::io::stdout();
    let result = run_turn(
        &mut app.store,
        &client,
        Turn {
            session_id: session,
            prompt,
            image_urls: images,
            mode,
        },
        &cancel,
        |chunk| {
            if let Err(e) = write!(stdout, "{}", chunk).and_then(|()| stdout.flush()) {
                // nobody is reading any more; stop generating
                debug!("Writing reply to stdout failed: {}", e);
                cancel.cancel();
            }
        },
    )
    .await;
    interrupt.abort();

    let outcome = result?;
    match mode {
        ReplyMode::Stream => println!(),
        ReplyMode::Single => println!("{}", outcome.reply),
    }
    if let Some(audio) = &outcome.audio_url {
        println!("{} {}", style("Audio:").dim(), audio);
    }
    if outcome.cancelled {
        println!("{}", style("(cancelled)").yellow());
    }
    info!("Turn recorded in {}", outcome.session_id);
    Ok(())
}

fn run_status(app: &App) -> Result<()> {
    let identity = Identity::load(app.storage.clone())?;
    println!("{}", style("toeai status").bold().cyan());
    println!("Config: {}", app.loader.config_path().display());
    println!("State:  {}", expand_tilde(&app.config.storage.dir).display());
    println!("API:    {}", app.config.api.base_url);
    println!(
        "User:   {}{}",
        app.store.current_user(),
        if identity.is_logged_in() {
            ""
        } else {
            " (not logged in)"
        }
    );
    println!("Sessions: {}", app.store.all_sessions().len());
    if let Some(active) = app.store.get_active_session() {
        println!("Active: {} ({})", active.title, active.id);
    }
    Ok(())
}
