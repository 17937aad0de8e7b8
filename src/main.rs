// peerchat binary: identity setup and the interactive node

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use peerchat::chat::PeerStore;
use peerchat::crypt::{Identity, Keyring, KeyringCipher};
use peerchat::{ChatNode, Config, PeerEvent};

#[derive(Debug, Parser)]
#[command(name = "peerchat")]
#[command(about = "Encrypted chat between directly connected peers")]
struct Cli {
    /// Config file (default: ~/.peerchat/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate an identity and a default config
    Init {
        /// Username sent to peers and attached to the published key entry
        #[arg(short, long)]
        username: String,
    },

    /// Run the node
    Run {
        /// Listen port (overrides the config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Peer address to connect to at startup (repeatable)
        #[arg(long = "connect")]
        connect: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "peerchat=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::default_path);

    let result = match cli.command {
        Command::Init { username } => init(&config_path, username),
        Command::Run { port, connect } => run(&config_path, port, connect).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Write a fresh config, generate keys, and publish the public entry into
/// the keyring directory.
fn init(config_path: &Path, username: String) -> Result<()> {
    if config_path.exists() {
        anyhow::bail!("config already exists at {}", config_path.display());
    }

    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::state_dir);
    let config = Config::for_dir(username.clone(), &base);

    let identity = Identity::generate(username);
    identity
        .save(&config.identity_path)
        .context("Failed to save identity")?;
    let entry = identity.public_entry();
    let entry_path =
        Keyring::export_entry(&config.keyring_dir, &entry).context("Failed to export key entry")?;
    config.save(config_path)?;

    println!("Wrote config to {}", config_path.display());
    println!("Key fingerprint: {}", entry.fingerprint());
    println!(
        "Published key entry at {}; share it with peers and copy theirs into {}",
        entry_path.display(),
        config.keyring_dir.display()
    );
    println!("Add recipient usernames to the config before broadcasting.");

    Ok(())
}

async fn run(config_path: &Path, port: Option<u16>, connect: Vec<String>) -> Result<()> {
    let config = Config::load(config_path)?;
    let port = port.unwrap_or(config.port);

    let identity = Identity::load(&config.identity_path).context("Failed to load identity")?;
    let keyring = Keyring::load(&config.keyring_dir).context("Failed to load keyring")?;
    tracing::info!(entries = keyring.len(), "keyring loaded");

    let cipher = Arc::new(KeyringCipher::new(identity, keyring));
    let (node, mut deliveries, mut events) =
        ChatNode::new(config.username.clone(), config.recipients.clone(), cipher);

    let store = PeerStore::new(&Config::state_dir()).context("Failed to open peer store")?;

    {
        let node = node.clone();
        tokio::spawn(async move {
            if let Err(e) = node.listen(port).await {
                tracing::error!(error = %e, "listener failed");
            }
        });
    }

    // Assemble each delivered message from its fragments, then print it
    tokio::spawn(async move {
        while let Some(mut item) = deliveries.next_item().await {
            let mut line = String::new();
            while let Some(fragment) = item.next_fragment().await {
                line.push_str(&fragment);
            }
            println!("{}", line);
        }
    });

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                PeerEvent::Joined(name) => println!("* {} joined", name),
                PeerEvent::Left(name) => println!("* {} left", name),
            }
        }
    });

    // Re-dial peers we have talked to before, then the --connect addresses
    for known in store.list().unwrap_or_default() {
        dial(&node, &store, &known.address).await;
    }
    for addr in &connect {
        dial(&node, &store, addr).await;
    }

    println!(
        "{} listening on port {}. /connect <addr>, /peers, /quit",
        config.username, port
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(addr) = line.strip_prefix("/connect ") {
            dial(&node, &store, addr.trim()).await;
        } else if line == "/peers" {
            let peers = node.peers().await;
            if peers.is_empty() {
                println!("no peers connected");
            }
            for name in peers {
                println!("  {}", name);
            }
        } else if line == "/quit" {
            break;
        } else {
            match node.broadcast(line).await {
                Ok(()) => println!("you: {}", line),
                Err(e) => eprintln!("not sent: {}", e),
            }
        }
    }

    Ok(())
}

async fn dial(node: &ChatNode, store: &PeerStore, addr: &str) {
    match node.connect(addr).await {
        Ok(username) => {
            if let Err(e) = store.remember(&username, addr) {
                tracing::warn!(error = %e, "failed to store peer");
            }
        }
        Err(e) => eprintln!("connect {} failed: {}", addr, e),
    }
}
