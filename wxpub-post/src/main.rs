//! wxpub-post - Publish an article to a WeChat official account

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use libwxpub::logging::LoggingConfig;
use libwxpub::{Config, PublishError, PublishOutcome, Publisher, Result};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "wxpub-post")]
#[command(about = "Publish an article to a WeChat official account", long_about = None)]
struct Cli {
    /// Article source (.md, .markdown or .txt)
    file: PathBuf,

    /// Article title (default: first heading or file name)
    #[arg(short, long)]
    title: Option<String>,

    /// Author shown under the title
    #[arg(long)]
    author: Option<String>,

    /// Summary shown in share cards
    #[arg(long)]
    digest: Option<String>,

    /// Cover image to upload
    #[arg(long, conflicts_with = "cover_media_id")]
    cover: Option<PathBuf>,

    /// Media id of an already uploaded cover
    #[arg(long)]
    cover_media_id: Option<String>,

    /// "Read more" link
    #[arg(long)]
    source_url: Option<String>,

    /// Account to publish to (default: active account)
    #[arg(short, long)]
    account: Option<String>,

    /// Submit for publication instead of stopping at the draft
    #[arg(long)]
    publish: bool,

    /// Run everything except the final submission
    #[arg(long)]
    dry_run: bool,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env();
    logging.verbose = cli.verbose;
    logging.init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let json = match cli.format.as_str() {
        "text" => false,
        "json" => true,
        other => {
            return Err(PublishError::InvalidInput(format!(
                "Invalid format '{}'. Valid options: text, json",
                other
            )))
        }
    };

    let config = Config::load()?;
    let api = Arc::new(config.platform_client()?);
    let registry = Arc::new(config.build_registry(api)?);

    let mut publisher_config = config.publisher_config();
    if cli.publish {
        publisher_config = publisher_config.with_draft(false);
    }
    if cli.dry_run {
        publisher_config = publisher_config.with_debug(true);
    }
    if let Some(account) = &cli.account {
        publisher_config = publisher_config.with_account(account.clone());
    }
    let publisher = Publisher::new(registry, publisher_config)?;

    let mut options = config.default_options();
    options.title = cli.title;
    if cli.author.is_some() {
        options.author = cli.author;
    }
    options.digest = cli.digest;
    options.cover_image_path = cli.cover.as_deref().map(from_working_dir);
    options.cover_media_id = cli.cover_media_id;
    options.source_url = cli.source_url;

    let input = from_working_dir(&cli.file);
    debug!(input = %input.display(), json, "Publishing article");
    let outcome = publisher
        .publish(&input.to_string_lossy(), &options)
        .await?;

    if json {
        let rendered = serde_json::to_string_pretty(&outcome)
            .map_err(|e| PublishError::InvalidInput(format!("Failed to encode result: {}", e)))?;
        println!("{}", rendered);
    } else {
        print_text(&outcome);
    }

    Ok(())
}

fn print_text(outcome: &PublishOutcome) {
    println!("{}", outcome.message);
    println!("title: {}", outcome.article.title);
    if let Some(media_id) = &outcome.article.media_id {
        println!("media_id: {}", media_id);
    }
    if let Some(publish_id) = &outcome.publish_id {
        println!("publish_id: {}", publish_id);
    }
    if let Some(cover) = &outcome.article.cover_media_id {
        println!("cover: {}", cover);
    }
}

/// Paths on the command line are relative to where the user is, not to the
/// article
fn from_working_dir(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
