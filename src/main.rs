use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use quickpoll_client::bridge::{JsonRpcWalletBridge, WalletBridge};
use quickpoll_client::config::ClientConfig;
use quickpoll_client::errors::ClientError;
use quickpoll_client::indexer::GraphQlIndexer;
use quickpoll_client::link_store::FileLinkStore;
use quickpoll_client::suggestions::SuggestionClient;
use quickpoll_client::types::PollId;
use quickpoll_client::workflow::PollDraft;
use quickpoll_client::PollClient;

const DEFAULT_CONFIG_PATH: &str = "config/quickpoll.toml";

#[derive(Parser)]
#[command(author, version, about = "Decentralized quick-poll client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and print the latest polls
    Polls {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Create a poll from the connected wallet
    Create {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        #[arg(short, long)]
        question: String,
        /// Repeat once per option
        #[arg(short, long = "option")]
        options: Vec<String>,
        /// Comma-separated alternative to repeated --option
        #[arg(long, conflicts_with = "options")]
        options_csv: Option<String>,
    },
    /// Vote on a poll from the connected wallet
    Vote {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        #[arg(short, long)]
        poll: String,
        #[arg(short, long)]
        option: String,
    },
    /// Show the connected wallet and its balance
    Wallet {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Forget the linked wallet
    Unlink {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Ask the suggestion service for poll options
    Suggest {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        #[arg(short, long)]
        question: String,
    },
    /// Write the default client configuration
    GenerateConfig {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Polls { config } => list_polls(&config).await?,
        Commands::Create {
            config,
            question,
            options,
            options_csv,
        } => {
            let draft = match options_csv {
                Some(csv) => PollDraft::from_comma_separated(question, &csv),
                None => PollDraft::new(question, options),
            };
            create_poll(&config, draft).await?
        }
        Commands::Vote {
            config,
            poll,
            option,
        } => vote(&config, PollId::new(poll), &option).await?,
        Commands::Wallet { config } => wallet(&config).await?,
        Commands::Unlink { config } => unlink(&config)?,
        Commands::Suggest { config, question } => suggest(&config, &question).await?,
        Commands::GenerateConfig { path } => generate_config(&path)?,
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<ClientConfig> {
    if path.exists() {
        ClientConfig::load(path).with_context(|| format!("loading {}", path.display()))
    } else {
        info!(path = %path.display(), "config not found; using defaults");
        Ok(ClientConfig::default())
    }
}

fn user_facing(err: ClientError) -> anyhow::Error {
    let message = err.user_message();
    anyhow::Error::new(err).context(message)
}

fn build_client(config: ClientConfig) -> Result<PollClient> {
    let bridge = JsonRpcWalletBridge::new(&config.bridge, &config.contract)
        .context("configuring wallet bridge")?;
    let indexer = GraphQlIndexer::new(&config.indexer).context("configuring indexer")?;
    let links = FileLinkStore::new(config.session.link_path.clone());
    Ok(PollClient::new(
        config,
        Some(Arc::new(bridge) as Arc<dyn WalletBridge>),
        Arc::new(indexer),
        Arc::new(links),
    ))
}

async fn connected_client(config_path: &Path) -> Result<PollClient> {
    let client = build_client(load_config(config_path)?)?;
    let session = client.start().await;
    if !session.is_connected() {
        client.connect().await.map_err(user_facing)?;
    }
    Ok(client)
}

async fn list_polls(config_path: &Path) -> Result<()> {
    let client = build_client(load_config(config_path)?)?;
    let snapshot = client.refresh().await.map_err(user_facing)?;
    if snapshot.polls.is_empty() {
        println!("no polls yet");
    }
    for poll in &snapshot.polls {
        println!("{} [{}] ({} votes)", poll.question, poll.id, poll.total_votes());
        for (option, count) in poll.options.iter().zip(&poll.votes) {
            println!("  {count:>5}  {option}");
        }
    }
    Ok(())
}

async fn create_poll(config_path: &Path, mut draft: PollDraft) -> Result<()> {
    let client = connected_client(config_path).await?;
    let result = client.create_poll(&mut draft).await;
    client.shutdown().await;
    let report = result.map_err(user_facing)?;
    println!("poll {} created in {}", report.poll_id, report.tx_hash);
    if let Some(url) = report.explorer_url {
        println!("{url}");
    }
    if let Some(err) = report.refresh_error {
        println!("poll list not refreshed: {}", err.user_message());
    }
    Ok(())
}

async fn vote(config_path: &Path, poll_id: PollId, option: &str) -> Result<()> {
    let client = connected_client(config_path).await?;
    let result = client.vote(&poll_id, option).await;
    client.shutdown().await;
    let report = result.map_err(user_facing)?;
    println!("voted `{option}` on {poll_id} in {}", report.tx_hash);
    if let Some(url) = report.explorer_url {
        println!("{url}");
    }
    Ok(())
}

async fn wallet(config_path: &Path) -> Result<()> {
    let client = connected_client(config_path).await?;
    let info = client.session().wallet_info().await;
    client.shutdown().await;
    let info = info.map_err(user_facing)?;
    println!("address: {}", info.address.masked());
    match info.chain_id {
        Some(chain) => println!("chain:   {chain}"),
        None => println!("chain:   unknown"),
    }
    println!("balance: {} {}", info.formatted_balance, info.symbol);
    Ok(())
}

fn unlink(config_path: &Path) -> Result<()> {
    let client = build_client(load_config(config_path)?)?;
    client
        .session()
        .unlink()
        .context("clearing wallet link state")?;
    println!("wallet unlinked");
    Ok(())
}

async fn suggest(config_path: &Path, question: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let client = SuggestionClient::new(&config.suggestions)?;
    for option in client.suggest(question).await? {
        println!("{option}");
    }
    Ok(())
}

fn generate_config(path: &Path) -> Result<()> {
    ClientConfig::default()
        .save(path)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("configuration written to {}", path.display());
    Ok(())
}
