use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

mod app;
mod config;
mod error;
mod firebase;
mod logger;
mod mode;
mod remote;
mod session;
mod sync;
mod todo;

use crate::app::App;
use crate::firebase::FirebaseClient;
use crate::mode::{Fields, Mode};
use crate::remote::AuthService;
use crate::session::Session;
use crate::sync::{Mutation, Op, SyncWorker, TodoList};

fn restore_terminal() -> Result<()> {
    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen)?;
    Ok(())
}

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the TUI application (default)
    Tui,
    /// Print your todos
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a todo
    Add { text: String },
    /// Delete a todo by id
    Delete { id: String },
    /// Sign out and forget the saved session
    Logout,
}

fn require_session(client: &FirebaseClient) -> Result<Session> {
    match client.current_session() {
        Some(session) => Ok(session),
        None => bail!("Not logged in. Run `todo` to log in first."),
    }
}

fn report(op: Op, mutation: Mutation) {
    if let Some(notice) = op.success_notice() {
        println!("{}", notice);
    }
    if let Err(e) = mutation.reload {
        eprintln!("Warning: {}", e.notice());
    }
}

async fn list(client: FirebaseClient, json: bool, offset: chrono::FixedOffset) -> Result<()> {
    let session = require_session(&client)?;
    let mut todos = TodoList::new(client);
    let items = todos.load(&session).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(items)?);
        return Ok(());
    }
    if items.is_empty() {
        println!("No todos.");
    }
    for item in items {
        println!(
            "{}\t{}\t{}",
            item.id,
            todo::format_created_at(&item.created_at, offset),
            item.text
        );
    }
    Ok(())
}

async fn add(client: FirebaseClient, text: String) -> Result<()> {
    let fields = Fields {
        primary: &text,
        ..Fields::default()
    };
    if !Mode::Add.submit_enabled(&fields) {
        bail!("Todo text must not be empty.");
    }
    let session = require_session(&client)?;
    let mutation = TodoList::new(client).add(&session, &text).await?;
    report(Op::Add, mutation);
    Ok(())
}

async fn delete(client: FirebaseClient, id: String) -> Result<()> {
    let session = require_session(&client)?;
    let mutation = TodoList::new(client).delete(&session, &id).await?;
    report(Op::Delete, mutation);
    Ok(())
}

async fn logout(client: FirebaseClient) -> Result<()> {
    if client.current_session().is_none() {
        println!("Already logged out.");
        return Ok(());
    }
    client.sign_out().await?;
    if let Some(notice) = Op::SignOut.success_notice() {
        println!("{}", notice);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = restore_terminal();
        default_hook(info);
    }));

    let args = Args::parse();

    let config_dir = config::get_config_dir();
    let _log_guard = logger::init(&config_dir)?;
    let app_config = config::load_config(&config_dir).with_env_overrides();
    info!("todo {} starting", config::APP_VERSION);

    let client = FirebaseClient::new(app_config.firebase.clone(), config_dir)?;
    let offset = todo::display_offset(app_config.display.utc_offset_minutes);

    match args.command {
        Some(Commands::List { json }) => return list(client, json, offset).await,
        Some(Commands::Add { text }) => return add(client, text).await,
        Some(Commands::Delete { id }) => return delete(client, id).await,
        Some(Commands::Logout) => return logout(client).await,
        None | Some(Commands::Tui) => {
            // Proceed to TUI
        }
    }

    let (command_tx, command_rx) = mpsc::channel(16);
    let (event_tx, event_rx) = mpsc::channel(32);

    let worker = SyncWorker::new(client.clone(), client, command_rx, event_tx);
    let worker_handle = tokio::spawn(async move { worker.start().await });

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let mut app = App::new(command_tx, app_config);
    let app_result = app.run(&mut terminal, event_rx).await;

    drop(app);
    let _ = tokio::time::timeout(Duration::from_secs(1), worker_handle).await;
    let _ = restore_terminal();
    if let Err(err) = app_result {
        eprintln!("Error: {:?}", err);
    }
    Ok(())
}
