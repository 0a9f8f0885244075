//! LAN discovery binary.
//!
//! Runs the pull registry, announces a greeting service through one of the
//! discovery mechanisms, or resolves a service and talks to it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lan_discovery::{
    ConnectionHandler, DiscoveryConfig, DiscoveryError, DiscoveryMode, Endpoint, GreetingClient,
    GreetingService, RegistryServer, Shutdown, Supervised, local_ipv4, protocol, shutdown,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "lan-discovery")]
#[command(about = "Find services on the local network by name")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// YAML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP lease registry.
    Registry {
        #[arg(long)]
        bind: Option<SocketAddr>,
    },

    /// Serve the greeting service and make it discoverable.
    Announce {
        #[arg(long, value_enum, default_value_t = DiscoveryMode::Broadcast)]
        mode: DiscoveryMode,

        #[arg(long)]
        service: Option<String>,

        #[arg(long)]
        service_port: Option<u16>,

        /// Address to advertise instead of the detected one.
        #[arg(long)]
        advertise_ip: Option<IpAddr>,

        #[arg(long)]
        registry_url: Option<String>,
    },

    /// Resolve a service and run the greeting exchange.
    Resolve {
        #[arg(long, value_enum, default_value_t = DiscoveryMode::Broadcast)]
        mode: DiscoveryMode,

        #[arg(long)]
        service: Option<String>,

        #[arg(long)]
        registry_url: Option<String>,

        /// Try this endpoint before running discovery.
        #[arg(long)]
        endpoint: Option<SocketAddr>,

        /// Print the endpoint and skip the greeting exchange.
        #[arg(long)]
        no_connect: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<DiscoveryConfig> {
    match path {
        Some(path) => DiscoveryConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(DiscoveryConfig::default()),
    }
}

async fn run_registry(config: DiscoveryConfig, shutdown: Shutdown) -> Result<()> {
    let server = RegistryServer::start(&config.registry, shutdown)
        .await
        .with_context(|| format!("starting registry on {}", config.registry.bind_addr))?;
    println!("Registry listening on {}", server.url());
    server.wait().await;
    Ok(())
}

async fn run_announce(
    mode: DiscoveryMode,
    config: DiscoveryConfig,
    shutdown: Shutdown,
) -> Result<()> {
    let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.announce.service_port));
    let service = GreetingService::bind(bind)
        .await
        .with_context(|| format!("binding greeting service on {bind}"))?;
    let port = service.local_addr()?.port();

    let ip = config
        .announce
        .advertise_ip
        .unwrap_or_else(|| IpAddr::V4(local_ipv4()));
    let advertised = Endpoint::new(ip, port);
    println!(
        "Announcing {} at {} via {}",
        config.announce.service, advertised, mode
    );

    let greeting = Supervised::spawn("greeting-service", &shutdown, |s| service.serve(s));
    let announcer = protocol::announcer(mode, &config, advertised)?;
    let result = announcer.announce(shutdown).await;

    if let Err(e) = greeting.stop().await {
        warn!("Greeting service task failed: {}", e);
    }
    result.with_context(|| format!("{mode} announcer failed"))
}

async fn run_resolve(
    mode: DiscoveryMode,
    config: DiscoveryConfig,
    preconfigured: Option<SocketAddr>,
    connect: bool,
    shutdown: Shutdown,
) -> Result<()> {
    let client = GreetingClient::new(config.resolver.connect_timeout);
    let service = config.announce.service.clone();

    if let Some(addr) = preconfigured {
        let endpoint = Endpoint::from(addr);
        match client.connect(endpoint, &shutdown).await {
            Ok(_) => {
                println!("Connected to preconfigured endpoint {}", endpoint);
                return Ok(());
            }
            Err(DiscoveryError::Cancelled) => return Ok(()),
            Err(e) => info!(
                "Preconfigured endpoint {} unusable ({}), falling back to {} discovery",
                endpoint, e, mode
            ),
        }
    }

    let resolver = protocol::resolver(mode, &config)?;
    let resolved = match resolver.resolve(&service, &shutdown).await {
        Ok(resolved) => resolved,
        Err(DiscoveryError::Cancelled) => {
            info!("Resolution cancelled");
            return Ok(());
        }
        Err(e) => return Err(e).with_context(|| format!("resolving {service} via {mode}")),
    };

    match &resolved.schema {
        Some(schema) => println!("Resolved {} to {} ({})", service, resolved.endpoint, schema),
        None => println!("Resolved {} to {}", service, resolved.endpoint),
    }

    if !connect {
        return Ok(());
    }

    match client.connect(resolved.endpoint, &shutdown).await {
        Ok(exchange) => {
            println!("Server greeting: {}", exchange.greeting);
            if let Some(reply) = exchange.reply {
                println!("Server reply: {}", reply);
            }
            Ok(())
        }
        Err(DiscoveryError::Cancelled) => Ok(()),
        Err(e) => {
            error!("Connection to {} failed: {}", resolved.endpoint, e);
            Err(e).context("greeting exchange failed")
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&cli.log_level)
        .init();

    let mut config = load_config(cli.config.as_ref())?;

    let (trigger, shutdown) = shutdown::channel();
    let ctrl_c = trigger.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => warn!("Could not listen for Ctrl-C: {}", e),
        }
        ctrl_c.trigger();
    });

    let result = match cli.command {
        Commands::Registry { bind } => {
            if let Some(bind) = bind {
                config.registry.bind_addr = bind;
            }
            config.validate()?;
            run_registry(config, shutdown).await
        }
        Commands::Announce {
            mode,
            service,
            service_port,
            advertise_ip,
            registry_url,
        } => {
            if let Some(service) = service {
                config.announce.service = service;
            }
            if let Some(port) = service_port {
                config.announce.service_port = port;
            }
            if advertise_ip.is_some() {
                config.announce.advertise_ip = advertise_ip;
            }
            if let Some(url) = registry_url {
                config.registry.url = url;
            }
            config.validate()?;
            run_announce(mode, config, shutdown).await
        }
        Commands::Resolve {
            mode,
            service,
            registry_url,
            endpoint,
            no_connect,
        } => {
            if let Some(service) = service {
                config.announce.service = service;
            }
            if let Some(url) = registry_url {
                config.registry.url = url;
            }
            config.validate()?;
            run_resolve(mode, config, endpoint, !no_connect, shutdown).await
        }
    };

    trigger.trigger();
    result
}
