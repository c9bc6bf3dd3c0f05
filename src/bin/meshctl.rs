use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "meshctl")]
#[command(about = "CLI for meshkv nodes")]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8086")]
    addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Status,
    Get {
        namespace: String,
        key: String,
    },
    Put {
        namespace: String,
        key: String,
        value: String,

        #[arg(short, long)]
        timestamp: Option<u64>,
    },
    Peers,
    AddPeer {
        uri: String,
    },
    Export {
        #[arg(short, long, default_value = "0")]
        since: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base_url = cli.addr.trim_end_matches('/').to_string();

    let response = match cli.command {
        Commands::Status => client.get(format!("{}/status", base_url)).send().await?,
        Commands::Get { namespace, key } => {
            client
                .get(format!("{}/kv/{}/{}", base_url, namespace, key))
                .send()
                .await?
        }
        Commands::Put {
            namespace,
            key,
            value,
            timestamp,
        } => {
            let body = serde_json::json!({
                "value": value,
                "timestamp": timestamp,
            });
            client
                .post(format!("{}/kv/{}/{}", base_url, namespace, key))
                .json(&body)
                .send()
                .await?
        }
        Commands::Peers => client.get(format!("{}/peers", base_url)).send().await?,
        Commands::AddPeer { uri } => {
            client
                .post(format!("{}/peers", base_url))
                .json(&serde_json::json!({ "uri": uri }))
                .send()
                .await?
        }
        Commands::Export { since } => {
            client
                .get(format!("{}/data/{}", base_url, since))
                .send()
                .await?
        }
    };

    let status = response.status();
    let body: Value = response.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    if !status.is_success() {
        anyhow::bail!("Request failed with HTTP {}", status);
    }

    Ok(())
}
