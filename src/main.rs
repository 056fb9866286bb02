//! CLI for tcpsub
//!
//! Subcommands:
//! - `server`: run the broker until Ctrl-C
//! - `publish`: send every stdin line as one message
//! - `subscribe`: print every message received for a topic

use clap::{Args, Parser};
use futures::StreamExt;
use std::pin::pin;
use tcpsub::config::{Settings, load_config};
use tcpsub::utils::logging;
use tcpsub::{Broker, PubSubClient, TopicId, WireFormat};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "tcpsub", about = "TCP publish/subscribe broker")]
enum Command {
    /// Run the broker
    Server {
        /// Address to bind (overrides configuration)
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (overrides configuration)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Publish each line read from stdin to TOPIC
    Publish(ClientArgs),
    /// Print every message published to TOPIC
    Subscribe(ClientArgs),
}

#[derive(Args)]
struct ClientArgs {
    /// Topic id (1..=4294967295)
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    topic: TopicId,
    /// Broker host (defaults to `server.host`)
    #[arg(long)]
    host: Option<String>,
    /// Broker port (defaults to `server.port`)
    #[arg(long)]
    port: Option<u16>,
    /// Framing (defaults to `broker.wire_format`)
    #[arg(long, value_enum)]
    format: Option<WireFormat>,
}

impl ClientArgs {
    fn address(&self, config: &Settings) -> String {
        let host = self.host.as_deref().unwrap_or(&config.server.host);
        let port = self.port.unwrap_or(config.server.port);
        format!("{host}:{port}")
    }

    fn format(&self, config: &Settings) -> WireFormat {
        self.format.unwrap_or(config.broker.wire_format)
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(2);
        }
    };
    logging::init(&config.logging);

    let outcome = match cmd {
        Command::Server { host, port } => run_server(config, host, port).await,
        Command::Publish(args) => run_publisher(&config, args).await,
        Command::Subscribe(args) => run_subscriber(&config, args).await,
    };

    if let Err(e) = outcome {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run_server(
    mut config: Settings,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let broker = Broker::start_with(&config).await?;
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping broker.");
    broker.stop().await;
    Ok(())
}

async fn run_publisher(
    config: &Settings,
    args: ClientArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut client =
        PubSubClient::connect_with(args.address(config), &[], args.format(config)).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut sent = 0usize;

    while let Some(line) = lines.next_line().await? {
        client.publish(args.topic, line).await?;
        sent += 1;
    }

    client.close().await?;
    info!("Published {sent} messages to topic {}", args.topic);
    Ok(())
}

async fn run_subscriber(
    config: &Settings,
    args: ClientArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut client =
        PubSubClient::connect_with(args.address(config), &[args.topic], args.format(config))
            .await?;
    info!("Subscribed to topic {} on {}", args.topic, client.peer_addr());

    let mut messages = pin!(client.messages());
    while let Some(message) = messages.next().await {
        let message = message?;
        println!(
            "[{}] {}",
            message.topic,
            String::from_utf8_lossy(&message.body)
        );
    }

    info!("Broker closed the connection");
    Ok(())
}
