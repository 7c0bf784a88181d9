//! tether CLI - key management, bridge listener and wallet client.

use clap::{Parser, Subcommand};
use rand_core::OsRng;
use std::path::PathBuf;
use tether_core::{Connection, Role};
use tether_crypto::IdentityKeyPair;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

mod config;
mod keystore;
mod transport;

use config::Config;

/// tether - authenticated channels between a wallet and its node bridge
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new identity keypair
    Keygen {
        /// Secret key output file (defaults to identity.key_file)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing key
        #[arg(long)]
        force: bool,
    },

    /// Pin the identity public key of the peer
    Pin {
        /// Hex-encoded compressed public key
        key: String,

        /// Pinned key output file (defaults to identity.peer_key_file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run as bridge: accept one wallet connection and echo its messages
    Listen {
        /// Address to bind to
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Run as wallet: connect to a bridge and exchange messages
    Connect {
        /// Bridge address
        #[arg(short, long)]
        addr: Option<String>,

        /// Message to send (repeatable); reads stdin lines when absent
        #[arg(short, long)]
        message: Vec<String>,
    },

    /// Show configuration and identity
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    match &cli.command {
        Commands::Listen { bind: Some(bind) } => config.network.listen_addr.clone_from(bind),
        Commands::Connect {
            addr: Some(addr), ..
        } => config.network.connect_addr.clone_from(addr),
        _ => {}
    }
    config.validate()?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt().with_env_filter(level).init();
    debug!(
        "tether v{} (protocol {})",
        env!("CARGO_PKG_VERSION"),
        tether_core::PROTOCOL_VERSION
    );

    match cli.command {
        Commands::Keygen { output, force } => {
            let path = output.unwrap_or_else(|| config.identity.key_file.clone());
            generate_keypair(&path, force)?;
        }
        Commands::Pin { key, output } => {
            let path = output.unwrap_or_else(|| config.identity.peer_key_file.clone());
            pin_peer(&key, &path)?;
        }
        Commands::Listen { .. } => {
            run_bridge(&config, &config.network.listen_addr).await?;
        }
        Commands::Connect { message, .. } => {
            run_wallet(&config, &config.network.connect_addr, message).await?;
        }
        Commands::Status => {
            show_status(&config, cli.config.as_deref());
        }
    }

    Ok(())
}

fn generate_keypair(path: &std::path::Path, force: bool) -> anyhow::Result<()> {
    let identity = IdentityKeyPair::generate(&mut OsRng)?;
    keystore::save_identity(path, &identity, force)?;

    let public_path = path.with_extension("pub");
    keystore::save_public_key(&public_path, identity.public_key())?;

    println!("Identity key written to {}", path.display());
    println!("Public key written to {}", public_path.display());
    println!("Public key: {}", hex::encode(identity.public_key().as_bytes()));
    Ok(())
}

fn pin_peer(key: &str, path: &std::path::Path) -> anyhow::Result<()> {
    let public = keystore::parse_public_key(key.trim())?;
    keystore::save_public_key(path, &public)?;
    println!("Pinned {} in {}", hex::encode(public.as_bytes()), path.display());
    Ok(())
}

fn open_connection(config: &Config, role: Role) -> anyhow::Result<Connection> {
    let identity = keystore::load_identity(&config.identity.key_file)?;
    let peer = keystore::load_pinned_peer(&config.identity.peer_key_file)?;
    Ok(Connection::new(role, identity, peer, &config.connection_config())?)
}

async fn run_bridge(config: &Config, addr: &str) -> anyhow::Result<()> {
    let mut conn = open_connection(config, Role::Responder)?;

    let listener = TcpListener::bind(addr).await?;
    info!("Bridge listening on {}", listener.local_addr()?);

    let (mut stream, peer_addr) = listener.accept().await?;
    info!("Wallet connected from {peer_addr}");

    transport::handshake(&mut conn, &mut stream, config.handshake_timeout()).await?;

    let mut echoed = 0u64;
    loop {
        let Some(message) = transport::recv_data(&mut conn, &mut stream).await? else {
            break;
        };
        transport::send_data(&mut conn, &mut stream, &message).await?;
        echoed += 1;
    }

    let stats = conn.stats();
    info!(
        "Wallet disconnected: {echoed} messages echoed, {} rekeys sent, {} received",
        stats.sent, stats.received
    );
    conn.close();
    Ok(())
}

async fn run_wallet(config: &Config, addr: &str, messages: Vec<String>) -> anyhow::Result<()> {
    let mut conn = open_connection(config, Role::Initiator)?;

    let mut stream = TcpStream::connect(addr).await?;
    info!("Connected to bridge at {addr}");

    transport::handshake(&mut conn, &mut stream, config.handshake_timeout()).await?;

    if messages.is_empty() {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            exchange(&mut conn, &mut stream, line.as_bytes()).await?;
        }
    } else {
        for message in &messages {
            exchange(&mut conn, &mut stream, message.as_bytes()).await?;
        }
    }

    conn.close();
    Ok(())
}

async fn exchange(conn: &mut Connection, stream: &mut TcpStream, message: &[u8]) -> anyhow::Result<()> {
    transport::send_data(conn, stream, message).await?;
    match transport::recv_data(conn, stream).await? {
        Some(echo) => {
            if echo != message {
                warn!("Echo differs from the message sent");
            }
            println!("{}", String::from_utf8_lossy(&echo));
            Ok(())
        }
        None => anyhow::bail!("Bridge closed the connection"),
    }
}

fn show_status(config: &Config, config_path: Option<&std::path::Path>) {
    let default_path = Config::default_path();
    println!(
        "tether v{} (protocol {})",
        env!("CARGO_PKG_VERSION"),
        tether_core::PROTOCOL_VERSION
    );
    println!();
    println!(
        "Config:          {}",
        config_path.unwrap_or(&default_path).display()
    );
    println!("Listen address:  {}", config.network.listen_addr);
    println!("Connect address: {}", config.network.connect_addr);
    println!("Rekey threshold: {} bytes", config.session.rekey_threshold);

    match keystore::load_identity(&config.identity.key_file) {
        Ok(identity) => println!(
            "Identity:        {}",
            hex::encode(identity.public_key().as_bytes())
        ),
        Err(e) => println!("Identity:        unavailable ({e})"),
    }
    match keystore::load_public_key(&config.identity.peer_key_file) {
        Ok(peer) => println!("Pinned peer:     {}", hex::encode(peer.as_bytes())),
        Err(e) => println!("Pinned peer:     unavailable ({e})"),
    }
}
