use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use flash_feed::config::{self, AppConfig};
use flash_feed::storage::ensure_parent_dir;
use flash_feed::{
    CacheChange, ChatMessage, ChatSession, FeedCache, FeedError, FeedStore, IdentityProvider,
    SendPath, SessionCommand, SessionEvent, StoredIdentity, SubscriptionManager,
};

#[derive(Parser)]
#[command(
    name = "flash-feed",
    version,
    about = "Live chat feed backed by a local SQLite store"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Feed (collection) to use instead of the configured one
    #[arg(long, value_name = "NAME")]
    feed: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Remember the identity messages are sent as
    SignIn { identity: String },
    /// Forget the signed-in identity
    SignOut,
    /// Print the signed-in identity
    Whoami,
    /// Post one message as the signed-in identity
    Post {
        #[arg(required = true, num_args = 1..)]
        body: Vec<String>,
    },
    /// Print the whole feed once
    History,
    /// Follow the feed until interrupted
    Tail,
    /// Interactive chat: each stdin line is sent, /reconnect, /logout and /quit are commands
    Chat,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut app_config = config::load_config(&cli.config);
    if let Some(feed) = cli.feed {
        app_config.feed = feed;
    }

    ensure_parent_dir(&app_config.database_path)?;
    let identity = Arc::new(StoredIdentity::open(&app_config.database_path)?);

    match cli.command {
        Command::SignIn { identity: name } => identity.sign_in(&name)?,
        Command::SignOut => identity.sign_out()?,
        Command::Whoami => match identity.current_identity() {
            Some(name) => println!("{name}"),
            None => println!("(signed out)"),
        },
        Command::Post { body } => {
            let store = FeedStore::open(&app_config.database_path)?;
            let send_path = build_send_path(store, identity, &app_config);
            let message = send_path.send(&body.join(" ")).await?;
            println!("Saved #{} to `{}`", message.seq, app_config.feed);
        }
        Command::History => {
            let store = FeedStore::open(&app_config.database_path)?;
            let mut cache = FeedCache::new();
            cache.replace(store.snapshot(&app_config.feed).await?);
            let me = identity.current_identity();
            for row in cache.rows(me.as_deref()) {
                println!("{}", render(row.message, row.is_mine));
            }
        }
        Command::Tail => run_tail(&app_config, identity.as_ref()).await?,
        Command::Chat => run_chat(&app_config, identity).await?,
    }

    Ok(())
}

fn build_manager(store: FeedStore, app_config: &AppConfig) -> SubscriptionManager {
    SubscriptionManager::new(store)
        .with_capacity(app_config.channel_capacity)
        .with_policy(app_config.overflow_policy)
        .with_poll_interval(Duration::from_millis(app_config.poll_interval_ms))
        .with_retry(app_config.retry)
}

fn build_send_path(
    store: FeedStore,
    identity: Arc<dyn IdentityProvider>,
    app_config: &AppConfig,
) -> SendPath {
    SendPath::new(store, identity, app_config.feed.clone()).with_retry(app_config.retry)
}

async fn run_tail(app_config: &AppConfig, identity: &StoredIdentity) -> Result<(), Box<dyn Error>> {
    let store = FeedStore::open(&app_config.database_path)?;
    let manager = build_manager(store, app_config);
    let mut subscription = manager.subscribe(&app_config.feed);
    let mut cache = FeedCache::new();
    let me = identity.current_identity();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = subscription.next() => {
                let Some(event) = event else { break };
                match cache.apply(event) {
                    CacheChange::Replaced { len } => {
                        println!("-- {len} message(s) in `{}` --", app_config.feed);
                        for row in cache.rows(me.as_deref()) {
                            println!("{}", render(row.message, row.is_mine));
                        }
                    }
                    CacheChange::Appended => {
                        if let Some(row) = cache.rows(me.as_deref()).last() {
                            println!("{}", render(row.message, row.is_mine));
                        }
                    }
                    CacheChange::Discarded => {}
                    CacheChange::Degraded => {
                        if let Some(error) = cache.last_error() {
                            eprintln!("! feed unavailable (attempt {}): {}", error.attempt, error.message);
                        }
                    }
                }
            }
        }
    }

    manager.unsubscribe(subscription).await;
    Ok(())
}

async fn run_chat(app_config: &AppConfig, identity: Arc<StoredIdentity>) -> Result<(), Box<dyn Error>> {
    let Some(me) = identity.current_identity() else {
        return Err(FeedError::Auth("run `flash-feed sign-in <identity>` first").into());
    };

    // Render surface -> session
    let (cmd_tx, cmd_rx) = mpsc::channel(100);
    // Session -> render surface
    let (event_tx, mut event_rx) = mpsc::channel(100);

    let store = FeedStore::open(&app_config.database_path)?;
    let manager = Arc::new(build_manager(store.clone(), app_config));
    let send_path = build_send_path(store, identity.clone(), app_config);
    let session = ChatSession::new(manager, send_path, identity, event_tx, cmd_rx);
    let session_task = tokio::spawn(session.run());

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                SessionEvent::Replaced(messages) => {
                    for message in &messages {
                        println!("{}", render(message, message.is_from(Some(me.as_str()))));
                    }
                }
                SessionEvent::Appended(message) => {
                    println!("{}", render(&message, message.is_from(Some(me.as_str()))));
                }
                SessionEvent::Degraded(reason) => eprintln!("! feed unavailable: {reason}"),
                SessionEvent::MessageSent(message) => log::debug!("Sent #{}", message.seq),
                SessionEvent::SendFailed(reason) => eprintln!("! not sent: {reason}"),
                SessionEvent::SignedOut => println!("Signed out"),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match line.trim() {
            "/quit" => SessionCommand::Quit,
            "/logout" => SessionCommand::SignOut,
            "/reconnect" => SessionCommand::Reconnect,
            _ => SessionCommand::Send(line.clone()),
        };
        let stop = matches!(command, SessionCommand::Quit | SessionCommand::SignOut);
        if cmd_tx.send(command).await.is_err() || stop {
            break;
        }
    }
    drop(cmd_tx);

    let cache = session_task.await?;
    log::info!("Chat closed with {} cached message(s)", cache.len());
    printer.await?;
    Ok(())
}

fn render(message: &ChatMessage, is_mine: bool) -> String {
    let time = DateTime::from_timestamp_millis(message.sent_at)
        .map(|at| at.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    if is_mine {
        format!("[{time}] me > {}", message.body)
    } else {
        format!("[{time}] {} > {}", message.sender, message.body)
    }
}
