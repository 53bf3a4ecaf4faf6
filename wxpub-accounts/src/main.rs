//! wxpub-accounts - Inspect configured accounts and their cached tokens

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use libwxpub::accounts::{AccountInfo, AccountRegistry};
use libwxpub::logging::LoggingConfig;
use libwxpub::Config;
use tracing::debug;

#[derive(Parser)]
#[command(name = "wxpub-accounts")]
#[command(about = "Inspect WeChat official accounts and their access tokens", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured accounts (secrets are never shown)
    List {
        /// Output format (text or json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check that accounts can obtain an access token
    Validate {
        /// Account id (default: active account)
        id: Option<String>,

        /// Validate every configured account
        #[arg(short, long, conflicts_with = "id")]
        all: bool,
    },

    /// Delete cached access tokens
    ClearCache {
        /// Account id
        id: Option<String>,

        /// Clear tokens of every account
        #[arg(short, long, conflicts_with = "id")]
        all: bool,
    },

    /// Print account settings as JSON, without secrets
    Export,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env();
    logging.verbose = cli.verbose;
    logging.init();

    if let Err(e) = run_command(cli.command).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn load_registry() -> Result<AccountRegistry> {
    let config = Config::load()?;
    let api = Arc::new(config.platform_client()?);
    let registry = config.build_registry(api)?;
    let stored = registry.load_persisted_tokens();
    debug!(accounts = registry.len(), stored, "Loaded account registry");
    Ok(registry)
}

async fn run_command(command: Commands) -> Result<()> {
    let registry = load_registry()?;

    match command {
        Commands::List { format } => list_accounts(&registry, &format),
        Commands::Validate { id, all } => validate(&registry, id.as_deref(), all).await,
        Commands::ClearCache { id, all } => clear_cache(&registry, id.as_deref(), all),
        Commands::Export => {
            println!("{}", serde_json::to_string_pretty(&registry.export_config())?);
            Ok(())
        }
    }
}

fn list_accounts(registry: &AccountRegistry, format: &str) -> Result<()> {
    let accounts = registry.get_all_accounts();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&accounts)?);
        }
        "text" => {
            if accounts.is_empty() {
                println!("No accounts configured");
                return Ok(());
            }
            for account in &accounts {
                println!("{}", describe(account));
            }
            let stats = registry.stats();
            println!(
                "\n{} account(s), {} with a valid token",
                stats.total_accounts, stats.valid_tokens
            );
        }
        other => anyhow::bail!("Invalid format '{}'. Valid options: text, json", other),
    }

    Ok(())
}

fn describe(account: &AccountInfo) -> String {
    let marker = if account.is_active { "*" } else { " " };
    let mut line = format!("{} {} ({})", marker, account.id, account.app_id);

    if let Some(name) = &account.display_name {
        line.push_str(&format!(" \"{}\"", name));
    }
    line.push_str(&format!(" token: {}", account.token_status));
    if let Some(expires_at) = account.token_expires_at {
        line.push_str(&format!(" until {}", expires_at.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    if account.use_stable_token {
        line.push_str(" [stable]");
    }
    if account.debug {
        line.push_str(" [debug]");
    }
    line
}

async fn validate(registry: &AccountRegistry, id: Option<&str>, all: bool) -> Result<()> {
    let results = if all {
        registry.validate_all_accounts().await
    } else {
        let id = match id {
            Some(id) => id.to_string(),
            None => registry
                .active_id()
                .ok_or_else(|| anyhow::anyhow!("No active account configured"))?,
        };
        if !registry.contains(&id) {
            anyhow::bail!("Account not found: {}", id);
        }
        let valid = registry.validate_account(&id).await;
        vec![(id, valid)]
    };

    let failed = results.iter().filter(|(_, valid)| !valid).count();
    for (id, valid) in &results {
        println!("{}: {}", id, if *valid { "ok" } else { "FAILED" });
    }

    if failed > 0 {
        anyhow::bail!("{} of {} account(s) failed validation", failed, results.len());
    }
    Ok(())
}

fn clear_cache(registry: &AccountRegistry, id: Option<&str>, all: bool) -> Result<()> {
    match (id, all) {
        (_, true) => {
            registry.clear_all_cache();
            println!("Cleared cached tokens for all accounts");
        }
        (Some(id), false) => {
            registry.clear_account_cache(id)?;
            println!("Cleared cached token for account '{}'", id);
        }
        (None, false) => anyhow::bail!("Either specify an account id or use --all"),
    }
    Ok(())
}
