//! Machine control-plane API served over a local UNIX socket.

pub mod power;
pub mod upgrade;

use std::path::Path;
use std::sync::Arc;

use log::{error, info};
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use crate::constants;
use crate::proto::machine::machine_server::{Machine, MachineServer};
use crate::proto::machine::{
    RebootRequest, Reply, ServiceListReply, ServiceListRequest, ShutdownRequest, UpgradeRequest,
};
use crate::system::Supervisor;

use power::PowerControl;

pub struct MachineApi {
    supervisor: Arc<Supervisor>,
    power: PowerControl,
}

impl MachineApi {
    pub fn new(supervisor: Arc<Supervisor>, power: PowerControl) -> Self {
        Self { supervisor, power }
    }
}

#[tonic::async_trait]
impl Machine for MachineApi {
    async fn reboot(&self, _request: Request<RebootRequest>) -> Result<Response<Reply>, Status> {
        info!("reboot requested via API");
        self.power.reboot();
        Ok(Response::new(Reply {
            message: "reboot initiated".to_string(),
        }))
    }

    async fn shutdown(
        &self,
        _request: Request<ShutdownRequest>,
    ) -> Result<Response<Reply>, Status> {
        info!("shutdown requested via API");
        self.power.poweroff();
        Ok(Response::new(Reply {
            message: "shutdown initiated".to_string(),
        }))
    }

    async fn upgrade(&self, request: Request<UpgradeRequest>) -> Result<Response<Reply>, Status> {
        let url = request.into_inner().url;
        info!("upgrade requested via API: {}", url);

        let staged = upgrade::fetch(&url, Path::new(constants::UPGRADE_STAGING_DIR))
            .await
            .map_err(|e| Status::unavailable(e.to_string()))?;

        // the new artifact takes effect on the way back up
        self.power.reboot();

        Ok(Response::new(Reply {
            message: format!("upgrade staged at {}, rebooting", staged.display()),
        }))
    }

    async fn service_list(
        &self,
        _request: Request<ServiceListRequest>,
    ) -> Result<Response<ServiceListReply>, Status> {
        let services = self
            .supervisor
            .list()
            .iter()
            .map(|runner| runner.as_proto())
            .collect();

        Ok(Response::new(ServiceListReply { services }))
    }
}

/// Binds the machine API on `socket` and serves until a power
/// transition is requested. Runs in its own task.
pub async fn serve(
    socket: &Path,
    api: MachineApi,
    power: PowerControl,
) -> Result<(), anyhow::Error> {
    if let Some(parent) = socket.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    // stale socket from a previous boot
    let _ = tokio::fs::remove_file(socket).await;

    let listener = UnixListener::bind(socket)?;
    info!("machine API listening on {}", socket.display());

    let shutdown = async move {
        let _ = power.wait().await;
    };

    if let Err(e) = Server::builder()
        .add_service(MachineServer::new(api))
        .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown)
        .await
    {
        error!("machine API server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
