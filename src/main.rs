use std::path::PathBuf;

use chrono::Local;
use clap::{Parser, Subcommand};
use deliscrape::{info_time, Config, Error, QueryResult, Result, Session};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Fetch bookmark data from the site's pages")]
struct Cli {
    /// TOML file with session settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP proxy, overrides the config file
    #[arg(long)]
    proxy: Option<String>,

    /// Page cap per query, overrides the config file
    #[arg(long)]
    max_pages: Option<usize>,

    /// Most recent bookmarks to keep, 0 for all; overrides the config file
    #[arg(long)]
    max_bookmarks: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Bookmark history of one or more URLs
    Url {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Bookmarks of a user
    User {
        username: String,
        /// Include private bookmarks
        #[arg(long, env = "DELISCRAPE_PASSWORD")]
        password: Option<String>,
    },
    /// Tag vocabulary of a user
    Tags { username: String },
    /// Network members and fans of a user
    Network { username: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let start_time = Local::now();
    let cli = Cli::parse();
    let session = Session::new(load_config(&cli)?)?;

    let json = match cli.command {
        Command::Url { urls } if urls.len() == 1 => {
            to_json(&session.get_url_history(&urls[0]).await?)?
        }
        Command::Url { urls } => {
            let results: Vec<Value> = session
                .get_url_histories(urls)
                .await?
                .into_iter()
                .map(|(url, res)| history_entry(url, res))
                .collect();
            to_json(&results)?
        }
        Command::User { username, password } => {
            to_json(&session.get_user_bookmarks(&username, password.as_deref()).await?)?
        }
        Command::Tags { username } => to_json(&session.get_user_tags(&username).await?)?,
        Command::Network { username } => to_json(&session.get_user_network(&username).await?)?,
    };
    println!("{json}");
    info_time!(start_time, "Full program time:");

    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            toml::from_str(&text)
                .map_err(|e| Error::Config(format!("invalid {}: {e}", path.display())))?
        }
        None => Config::default(),
    };
    if let Some(proxy) = &cli.proxy {
        config = config.with_proxy(proxy.clone());
    }
    if let Some(max_pages) = cli.max_pages {
        config = config.with_max_pages(max_pages);
    }
    if let Some(max_bookmarks) = cli.max_bookmarks {
        config = config.with_max_bookmarks(max_bookmarks);
    }
    Ok(config)
}

/// One URL of a multi-URL run. A failed URL is reported in place so the
/// others still get printed.
fn history_entry(url: String, res: Result<QueryResult>) -> Value {
    match res {
        Ok(result) => json!({ "url": url, "result": result }),
        Err(err) => {
            tracing::error!(url = %url, "{err}");
            json!({
                "url": url,
                "error": err.to_string(),
                "throttled": err.is_throttled(),
                "partial_records": err.partial().map(|p| p.len()),
            })
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
