//! Peerlink CLI binary.
//!
//! Serverless peer-to-peer bootstrap through copy-pasteable tokens.
//!
//! # Commands
//!
//! - `connect` - Bootstrap with a remote peer over WebRTC and chat
//! - `inspect` - Decode an exchange token and show its contents
//! - `role` - Show which side initiates for a pair of tokens
//! - `demo` - Run two in-process peers through the full bootstrap
//! - `config` - Print the effective configuration

use std::io::{self, Read, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use peerlink::{
    config::Config,
    token::{self, ExchangeToken, IceCandidate},
    MemoryEngine, Session, WebrtcEngine, VERSION,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "peerlink")]
#[command(version = VERSION)]
#[command(about = "Peerlink - serverless peer-to-peer bootstrap", long_about = None)]
struct Cli {
    /// Config file path (default: <config dir>/peerlink/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// STUN server URL, repeatable (overrides config)
    #[arg(long = "stun", global = true)]
    stun: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the local token, read the peer's token, then chat over the channel
    Connect,

    /// Decode an exchange token and show its contents
    Inspect {
        /// Token (or - for stdin)
        input: Option<String>,

        /// Input file path
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Output the decoded token as JSON only, without the summary
        #[arg(long)]
        json: bool,
    },

    /// Show the role the local side takes for a pair of tokens
    Role {
        /// This side's token
        local: String,

        /// The peer's token
        remote: String,
    },

    /// Run two in-process peers through the full bootstrap
    Demo {
        /// Message peer X sends to peer Y (repeatable)
        #[arg(short, long = "message", default_value = "hello")]
        messages: Vec<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config, cli.stun)?;

    match cli.command {
        Commands::Connect => cmd_connect(config),
        Commands::Inspect { input, file, json } => cmd_inspect(input, file, json),
        Commands::Role { local, remote } => cmd_role(&local, &remote),
        Commands::Demo { messages } => cmd_demo(config, messages),
        Commands::Config => cmd_config(&config),
    }
}

fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();
}

fn load_config(path: Option<PathBuf>, stun: Vec<String>) -> anyhow::Result<Config> {
    let file = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_default_file()?.unwrap_or_default(),
    };

    let mut config = file.merge(Config::from_env());
    if !stun.is_empty() {
        config.discovery.stun_servers = stun;
    }
    config.validate()?;

    tracing::debug!("Effective config: {:?}", config);
    Ok(config)
}

fn cmd_connect(config: Config) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        tracing::info!("Starting...");
        let mut session = Session::with_config(WebrtcEngine::new(), config);

        let local = session.produce_local_token().await?;
        println!("Local Token:");
        println!("{local}");

        println!("Remote Token:");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let Some(remote) = lines.next_line().await? else {
            anyhow::bail!("stdin closed before a remote token was entered");
        };
        session.start(&remote).await?;

        session.on_message(|msg| println!("Received message: {}", String::from_utf8_lossy(&msg)));

        loop {
            print!("> ");
            io::stdout().flush()?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            if line.is_empty() {
                continue;
            }
            session.send_message(line).await?;
        }

        session.close();
        let stats = session.stats();
        tracing::info!(
            "Session closed: sent {} messages, received {}",
            stats.messages_sent,
            stats.messages_received
        );
        Ok::<_, anyhow::Error>(())
    })
}

fn cmd_inspect(input: Option<String>, file: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let content = read_input(input, file)?;
    let token = token::decode(&content)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&token)?);
        return Ok(());
    }

    println!("Identity:        {}", token.identity());
    println!("ICE lite:        {}", token.ice_parameters.ice_lite);
    println!(
        "DTLS:            role {:?}, {} fingerprint(s)",
        token.dtls_parameters.role,
        token.dtls_parameters.fingerprints.len()
    );
    println!(
        "SCTP:            max message size {}",
        token.sctp_capabilities.max_message_size
    );
    println!("Candidates ({}):", token.ice_candidates.len());
    for candidate in &token.ice_candidates {
        println!("  - {candidate}");
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&token)?);

    Ok(())
}

fn cmd_role(local: &str, remote: &str) -> anyhow::Result<()> {
    let local: ExchangeToken = local.parse()?;
    let remote: ExchangeToken = remote.parse()?;
    let role = peerlink::resolve_role(local.identity(), remote.identity())?;

    println!("Local identity:  {}", local.identity());
    println!("Remote identity: {}", remote.identity());
    println!("Local role:      {} ({})", role, role.ice_role_name());

    Ok(())
}

fn cmd_demo(config: Config, messages: Vec<String>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let mut engine_x = MemoryEngine::random().with_candidates(demo_candidates(1));
        let mut engine_y = MemoryEngine::random().with_candidates(demo_candidates(2));
        MemoryEngine::link(&mut engine_x, &mut engine_y);

        let mut x = Session::with_config(engine_x, config.clone());
        let mut y = Session::with_config(engine_y, config);

        let token_x = x.produce_local_token().await?;
        let token_y = y.produce_local_token().await?;
        println!("Peer X token:");
        println!("{token_x}");
        println!();
        println!("Peer Y token:");
        println!("{token_y}");
        println!();

        let (started_x, started_y) = tokio::join!(x.start(&token_y), y.start(&token_x));
        started_x?;
        started_y?;

        for (name, session) in [("X", x.stats()), ("Y", y.stats())] {
            if let Some(role) = session.role {
                println!("Peer {name}: {role} ({})", role.ice_role_name());
            }
        }
        println!();

        x.on_message(|msg| println!("[Y -> X] {}", String::from_utf8_lossy(&msg)));
        y.on_message(|msg| println!("[X -> Y] {}", String::from_utf8_lossy(&msg)));

        for message in messages {
            x.send_message(message.clone()).await?;
            y.send_message(format!("ack: {message}")).await?;
        }

        x.close();
        y.close();

        let stats = x.stats();
        println!();
        println!("Session Statistics (X):");
        println!("  Sent:      {} messages, {} bytes", stats.messages_sent, stats.bytes_sent);
        println!(
            "  Received:  {} messages, {} bytes",
            stats.messages_received, stats.bytes_received
        );

        Ok::<_, anyhow::Error>(())
    })
}

fn cmd_config(config: &Config) -> anyhow::Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}

// Helper functions

fn demo_candidates(host: u8) -> Vec<IceCandidate> {
    let local = format!("192.168.1.{}", 10 + host);
    let port = 50000 + u16::from(host);
    vec![
        IceCandidate::host("1", &local, port, 2130706431),
        IceCandidate::server_reflexive(
            "2",
            &format!("203.0.113.{host}"),
            port + 1000,
            1694498815,
            (&local, port),
        ),
    ]
}

fn read_input(input: Option<String>, file: Option<PathBuf>) -> anyhow::Result<String> {
    if let Some(path) = file {
        Ok(std::fs::read_to_string(path)?)
    } else if let Some(s) = input {
        if s == "-" {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        } else {
            Ok(s)
        }
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    }
}
