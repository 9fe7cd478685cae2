use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use pairlink_client::{closest_node, ClientConfig, PairingCommunicator};
use pairlink_crypto::{generic_hash, public_key_from_hex, KeyPair};
use pairlink_protocol::PeerIdentity;

#[derive(Parser)]
#[command(name = "pairlink", about = "pairlink pairing and relay tooling")]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a new identity key pair
    Keygen,

    /// Print the rendezvous identifier of a public key on a relay server
    Identifier {
        #[arg(long)]
        public_key: String,
        #[arg(long)]
        relay: String,
    },

    /// Print the configured relay node a public key is pinned to
    Select {
        #[arg(long)]
        public_key: String,
    },

    /// Print the pairing payload and channel-open message for a peer
    Payload {
        /// Own key seed (hex)
        #[arg(long)]
        seed: String,
        #[arg(long)]
        peer_public_key: String,
        #[arg(long, default_value = "")]
        peer_id: String,
        #[arg(long, default_value = "2")]
        peer_version: String,
        /// Relay server the peer is reachable on
        #[arg(long)]
        peer_relay: String,
        /// Relay server this side uses
        #[arg(long)]
        relay: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pairlink=info,pairlink_client=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = if let Some(config_path) = &args.config {
        ClientConfig::load_from_file(Path::new(config_path))
            .with_context(|| format!("failed to load config file: {}", config_path))?
    } else {
        ClientConfig::default()
    };

    match args.command {
        Command::Keygen => {
            let pair = KeyPair::generate();
            println!("seed:       {}", pair.seed_hex().as_str());
            println!("public key: {}", pair.public_key_hex());
        }

        Command::Identifier { public_key, relay } => {
            let key = public_key_from_hex(&public_key).context("invalid public key")?;
            let hash = hex::encode(generic_hash(&key));
            let identifier = pairlink_protocol::RendezvousIdentifier::new(&hash, &relay)?;
            println!("{}", identifier);
        }

        Command::Select { public_key } => {
            let key = public_key_from_hex(&public_key).context("invalid public key")?;
            let nonce = config.relay_nonce()?;
            let node = closest_node(&config.relay_nodes, &generic_hash(&key), &nonce)
                .context("no relay nodes configured")?;
            info!(nodes = config.relay_nodes.len(), "selected without probing");
            println!("{}", node);
        }

        Command::Payload {
            seed,
            peer_public_key,
            peer_id,
            peer_version,
            peer_relay,
            relay,
        } => {
            let pair = KeyPair::from_seed_hex(&seed).context("invalid seed")?;
            let communicator = PairingCommunicator::new(Arc::new(pair), config.app_metadata());
            let peer = PeerIdentity {
                id: peer_id,
                name: String::new(),
                public_key: peer_public_key,
                relay_server: peer_relay,
                version: peer_version,
                icon: None,
                app_url: None,
                paired: false,
            };

            let payload = communicator.pairing_payload(&peer, &relay)?;
            println!("payload:      {}", String::from_utf8_lossy(&payload));
            println!("channel-open: {}", communicator.channel_open_message(&peer, &relay)?);
        }
    }

    Ok(())
}
