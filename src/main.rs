use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use digitd::config::{self, DEFAULT_HOST, DEFAULT_MODEL_PATH, DEFAULT_PORT};
use digitd::daemon::{client, server};

#[derive(Parser)]
#[command(name = "digitd", version, about = "HTTP digit classification service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the prediction server (foreground)
    Serve {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
        /// Path to the model weight file
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// Check whether a server is responding
    Status {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Send an image to a running server and print the prediction
    Predict {
        /// Image file to classify
        image: PathBuf,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config()?;

    match cli.command {
        Command::Serve { host, port, model } => {
            let options = server::ServeOptions {
                host: host
                    .or(config.host)
                    .unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: port.or(config.port).unwrap_or(DEFAULT_PORT),
                model: model
                    .or(config.model)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            };
            server::run(&options)
        }
        Command::Status { host, port } => {
            let host = host.unwrap_or_else(|| "127.0.0.1".to_string());
            let port = port.or(config.port).unwrap_or(DEFAULT_PORT);
            client::status(&host, port)
        }
        Command::Predict { image, host, port } => {
            let host = host.unwrap_or_else(|| "127.0.0.1".to_string());
            let port = port.or(config.port).unwrap_or(DEFAULT_PORT);
            client::predict(&host, port, &image)
        }
    }
}
