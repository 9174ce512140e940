//! attachment-lru - command line front end for the attachment cache
//!
//! Drives an LRU cache backed by an on-disk document store.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

use attachment_lru::{CacheConfig, FsStore, LruCache};

/// Environment variable overriding the store location
const STORE_DIR_ENV: &str = "ATTACHMENT_LRU_DIR";

/// CLI command
#[derive(Debug)]
enum Command {
    /// Store a file under a key
    Put {
        key: String,
        file: PathBuf,
        content_type: String,
    },
    /// Print a cached blob, refreshing its recency
    Get { key: String },
    /// Print a cached blob without refreshing its recency
    Peek { key: String },
    /// Report whether a key is cached
    Has { key: String },
    /// Remove a key
    Del { key: String },
    /// Print cache contents as JSON
    Info,
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"attachment-lru - Size-bounded LRU cache for attachments

USAGE:
    attachment-lru put <key> <file> <content-type>
    attachment-lru get <key>
    attachment-lru peek <key>
    attachment-lru has <key>
    attachment-lru del <key>
    attachment-lru info
    attachment-lru help

COMMANDS:
    put     Store the contents of <file> under <key>, evicting old content if needed
    get     Write the blob for <key> to stdout and mark it as recently used
    peek    Write the blob for <key> to stdout without affecting eviction order
    has     Print "true" or "false" depending on whether <key> is cached
    del     Remove <key> from the cache
    info    Print cache contents as JSON
    help    Show this help message

ENVIRONMENT:
    ATTACHMENT_LRU_DIR       Store directory (default: <user cache dir>/attachment-lru)
    ATTACHMENT_LRU_MAX_SIZE  Size budget in bytes (unset or 0: unlimited)
    RUST_LOG                 Log level (trace, debug, info, warn, error)
"#
    );
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Help);
    }

    let key = || {
        args.get(2)
            .cloned()
            .ok_or_else(|| anyhow!("Usage: attachment-lru {} <key>", args[1]))
    };

    match args[1].as_str() {
        "put" => {
            if args.len() < 5 {
                return Err(anyhow!(
                    "Usage: attachment-lru put <key> <file> <content-type>"
                ));
            }
            Ok(Command::Put {
                key: args[2].clone(),
                file: PathBuf::from(&args[3]),
                content_type: args[4].clone(),
            })
        }
        "get" => Ok(Command::Get { key: key()? }),
        "peek" => Ok(Command::Peek { key: key()? }),
        "has" => Ok(Command::Has { key: key()? }),
        "del" => Ok(Command::Del { key: key()? }),
        "info" => Ok(Command::Info),
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            Ok(Command::Help)
        }
    }
}

fn store_dir() -> PathBuf {
    env::var_os(STORE_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("attachment-lru")
        })
}

fn write_stdout(data: &[u8]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(data).context("Failed to write to stdout")?;
    stdout.flush().context("Failed to flush stdout")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; stdout is reserved for command output
    let log_level = env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Level::WARN);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let command = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    if let Command::Help = command {
        print_help();
        return Ok(());
    }

    let config = CacheConfig::from_env()?;
    let dir = store_dir();
    let store = FsStore::open(&dir)
        .with_context(|| format!("Failed to open store at {}", dir.display()))?;
    let cache = LruCache::initialize(Arc::new(store), config)?;

    match command {
        Command::Put {
            key,
            file,
            content_type,
        } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            debug!(key = %key, size = data.len(), "Storing file");
            cache
                .put(&key, data, &content_type)
                .await
                .with_context(|| format!("Failed to store '{}'", key))?;
        }
        Command::Get { key } => {
            let blob = cache
                .get(&key)
                .await
                .with_context(|| format!("Failed to get '{}'", key))?;
            write_stdout(&blob)?;
        }
        Command::Peek { key } => {
            let blob = cache
                .peek(&key)
                .await
                .with_context(|| format!("Failed to peek '{}'", key))?;
            write_stdout(&blob)?;
        }
        Command::Has { key } => {
            println!("{}", cache.has(&key).await?);
        }
        Command::Del { key } => {
            cache
                .del(&key)
                .await
                .with_context(|| format!("Failed to delete '{}'", key))?;
        }
        Command::Info => {
            let info = cache.info().await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Help => print_help(),
    }

    cache.log_metrics();
    Ok(())
}
