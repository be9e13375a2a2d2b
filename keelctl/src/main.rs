//! keelctl - CLI for the keel machine API.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use hyper_util::rt::TokioIo;
use tabled::{Table, Tabled};
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

pub mod proto {
    tonic::include_proto!("machine");
}

use proto::machine_client::MachineClient;
use proto::{RebootRequest, ServiceListRequest, ShutdownRequest, UpgradeRequest};

const DEFAULT_SOCKET: &str = "/run/keel/machine.sock";

#[derive(Parser)]
#[command(name = "keelctl")]
#[command(about = "CLI for the keel machine API", long_about = None)]
struct Cli {
    /// Machine API socket
    #[arg(short, long, default_value = DEFAULT_SOCKET)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supervised services and their state
    Services {
        /// Show the event history of a single service
        id: Option<String>,
    },

    /// Reboot the machine
    Reboot,

    /// Power the machine off
    Shutdown,

    /// Stage an upgrade artifact and reboot
    Upgrade {
        /// URL of the artifact
        url: String,
    },
}

#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "HEALTH")]
    health: String,
    #[tabled(rename = "LAST EVENT")]
    last_event: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut client = connect(cli.socket.clone()).await?;

    match cli.command {
        Commands::Services { id: None } => {
            let reply = client
                .service_list(ServiceListRequest {})
                .await
                .context("ServiceList failed")?
                .into_inner();

            let rows: Vec<ServiceRow> = reply
                .services
                .iter()
                .map(|svc| ServiceRow {
                    id: svc.id.clone(),
                    state: svc.state.clone(),
                    health: svc
                        .health
                        .as_ref()
                        .map(|h| {
                            if h.unknown {
                                "?".to_string()
                            } else if h.healthy {
                                "OK".to_string()
                            } else {
                                "FAIL".to_string()
                            }
                        })
                        .unwrap_or_else(|| "-".to_string()),
                    last_event: svc
                        .events
                        .last()
                        .map(|e| e.message.clone())
                        .unwrap_or_default(),
                })
                .collect();

            println!("{}", Table::new(rows));
        }

        Commands::Services { id: Some(id) } => {
            let reply = client
                .service_list(ServiceListRequest {})
                .await
                .context("ServiceList failed")?
                .into_inner();

            let Some(svc) = reply.services.into_iter().find(|s| s.id == id) else {
                anyhow::bail!("no such service: {id}");
            };

            println!("{} ({})", svc.id, svc.state);
            for event in svc.events {
                println!("  {} [{}] {}", format_ts(event.timestamp_ns), event.state, event.message);
            }
        }

        Commands::Reboot => {
            let reply = client
                .reboot(RebootRequest {})
                .await
                .context("Reboot failed")?
                .into_inner();
            println!("{}", reply.message);
        }

        Commands::Shutdown => {
            let reply = client
                .shutdown(ShutdownRequest {})
                .await
                .context("Shutdown failed")?
                .into_inner();
            println!("{}", reply.message);
        }

        Commands::Upgrade { url } => {
            let reply = client
                .upgrade(UpgradeRequest { url })
                .await
                .context("Upgrade failed")?
                .into_inner();
            println!("{}", reply.message);
        }
    }

    Ok(())
}

async fn connect(socket: PathBuf) -> Result<MachineClient<Channel>> {
    let connector = service_fn(move |_: Uri| {
        let socket = socket.clone();
        async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(socket).await?)) }
    });

    // The URI is ignored; the connector dials the UNIX socket.
    let channel = Endpoint::try_from("http://[::]:50051")?
        .connect_with_connector(connector)
        .await
        .context("failed to connect to the machine API socket")?;

    Ok(MachineClient::new(channel))
}

fn format_ts(nanos: i64) -> String {
    DateTime::<Local>::from(
        std::time::UNIX_EPOCH + std::time::Duration::from_nanos(nanos.max(0) as u64),
    )
    .format("%Y-%m-%d %H:%M:%S")
    .to_string()
}
