//! Gamewire - Wire protocol and RPC plumbing for multiplayer game servers
//!
//! Runs a request server, issues one-off calls against a running server and
//! inspects configuration.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gamewire::config::{self, Config};
use gamewire::network::{self, NetworkConfig, Server, ServerEvent};
use gamewire::protocol::{self, route};
use gamewire::rpc::{CallRequest, HandlerError, HandlerRegistry, RecordKind, RpcClient};

/// Gamewire - Game server networking core
#[derive(Parser)]
#[command(name = "gamewire")]
#[command(author = "Gamewire Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Wire protocol and multiplexed RPC for game servers", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a request server
    Serve {
        /// Port to listen on (overrides the configuration)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Call a method on a running server
    Call {
        /// Server address, host or host:port
        #[arg(short, long)]
        server: String,

        /// Method to call, as Service.Method
        method: String,

        /// Argument payload, sent as raw bytes
        #[arg(short, long, default_value = "")]
        data: String,

        /// Send as a notification and do not wait for a reply
        #[arg(long)]
        notify: bool,

        /// Session to act on behalf of
        #[arg(long, default_value_t = 0)]
        session: i64,
    },

    /// Show the configured route dictionary
    Routes,

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve { port } => {
            run_server(config, port).await?;
        }
        Commands::Call {
            server,
            method,
            data,
            notify,
            session,
        } => {
            run_call(config, server, method, data, notify, session).await?;
        }
        Commands::Routes => {
            print_routes(&config);
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", config.to_toml()?);
            }
        }
    }

    Ok(())
}

/// Built-in methods every server answers
fn builtin_registry() -> anyhow::Result<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register_raw("Sys.Echo", |_ctx, args: Bytes| async move {
        Ok::<_, HandlerError>(args)
    })?;
    registry.register_raw("Sys.Ping", |_ctx, _args: Bytes| async move {
        Ok::<_, HandlerError>(Bytes::from_static(b"pong"))
    })?;
    Ok(registry)
}

/// Run a request server until interrupted
async fn run_server(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    route::install(config.route_dictionary())?;

    let mut net_config = NetworkConfig::from(&config);
    if let Some(port) = port {
        net_config.port = port;
    }

    let registry = builtin_registry()?;
    tracing::info!(
        "Starting {} server '{}' ({}) with methods: {}",
        config.general.server_type,
        config.general.name,
        config.server_id(),
        registry.methods().join(", ")
    );

    let mut server = Server::new(net_config, Arc::new(registry));
    let mut event_rx = server
        .take_event_receiver()
        .ok_or_else(|| anyhow::anyhow!("server event receiver already taken"))?;

    let bind_addr = server.start().await?;
    println!("Listening on {}. Press Ctrl+C to stop.", bind_addr);

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ServerEvent::PeerConnected { addr } => {
                        tracing::info!("Peer connected: {}", addr);
                    }
                    ServerEvent::PeerDisconnected { addr, reason } => {
                        tracing::info!("Peer disconnected: {} - {}", addr, reason);
                    }
                    ServerEvent::Error { message } => {
                        tracing::error!("Server error: {}", message);
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    server.stop().await?;
    tracing::info!("Server stopped");

    Ok(())
}

/// Issue a single call and print the reply
async fn run_call(
    config: Config,
    server: String,
    method: String,
    data: String,
    notify: bool,
    session: i64,
) -> anyhow::Result<()> {
    let net_config = NetworkConfig::from(&config);

    let addr = match server.rsplit_once(':') {
        Some((host, port)) => network::resolve_host(host, port.parse()?).await?,
        None => network::resolve_host(&server, net_config.port).await?,
    };

    let (service, method) = method
        .split_once('.')
        .ok_or_else(|| anyhow::anyhow!("method must be Service.Method, got {}", method))?;

    let (client, _pushes) = RpcClient::dial(addr, &net_config).await?;
    let request = CallRequest::new(service, method, data.into_bytes()).with_session(session);

    if notify {
        client.invoke_sync(RecordKind::Notify, request).await?;
        println!("Notification sent");
    } else {
        let reply = client
            .invoke_sync(RecordKind::Request, request.expect_reply())
            .await?;
        match reply {
            Some(reply) => println!("{}", String::from_utf8_lossy(&reply)),
            None => println!("(no reply)"),
        }
    }

    client.close().await?;
    Ok(())
}

/// Print the route dictionary built from configuration
fn print_routes(config: &Config) {
    let dict = config.route_dictionary();
    if dict.is_empty() {
        println!("No routes configured.");
        return;
    }

    println!("{:>6}  ROUTE", "CODE");
    for (code, route) in dict.entries() {
        println!("{:>6}  {}", code, route);
    }
    println!("\n{} routes (default port {})", dict.len(), protocol::DEFAULT_PORT);
}
