use std::process::ExitCode;

use clap::Parser;
use dotenvy::dotenv;
use tokio::sync::mpsc;

use mesh_chat::config::{self, AppConfig};
use mesh_chat::error::ChatError;
use mesh_chat::network::MeshNode;
use mesh_chat::ui::{Terminal, terminal};

#[derive(Parser)]
#[command(
    name = "mesh_chat",
    version,
    about = "Serverless mesh chat over plain TCP"
)]
struct Cli {
    /// Port to listen on (`9001` or `:9001`)
    #[arg(value_parser = config::parse_port)]
    port: u16,
    /// Address of any member of an existing mesh (`host:port` or `:port`)
    peer: Option<String>,
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let app_config = config::load_config(&cli.config);

    match run(cli, app_config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, app_config: AppConfig) -> Result<(), ChatError> {
    let mut console = Terminal::stdin();
    let name = match app_config.display_name.clone() {
        Some(name) if !name.trim().is_empty() => name,
        _ => console.prompt_name().await?,
    };
    let settings = app_config.node_settings(cli.port, name);

    // Terminal -> network
    let (cmd_tx, cmd_rx) = mpsc::channel(100);
    let (node, events) = MeshNode::bind(&settings, cmd_rx).await?;
    tokio::spawn(terminal::print_events(events));

    if let Some(peer) = cli.peer {
        node.join(&peer).await?;
    }

    tokio::spawn(console.read_input(cmd_tx));
    node.run().await;
    Ok(())
}
