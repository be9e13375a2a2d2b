//! Networking daemon: interface configuration and node addressing.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::UserData;
use crate::error::{HealthError, ServiceError};
use crate::proto::crt::Mount;
use crate::system::conditions::Condition;
use crate::system::health;
use crate::system::runner::crt::ContainerRunner;
use crate::system::runner::{Args, Options, RestartType, Runner};
use crate::system::{HealthSpec, Service};

pub const ID: &str = "netd";

/// Socket the daemon exposes once interface configuration settled.
const HEALTH_SOCKET: &str = "/run/netd/netd.sock";

pub struct Netd;

#[async_trait]
impl Service for Netd {
    fn id(&self, _data: &UserData) -> String {
        ID.to_string()
    }

    async fn pre(&self, _data: &UserData) -> Result<(), ServiceError> {
        tokio::fs::create_dir_all("/run/netd").await?;
        Ok(())
    }

    fn condition(&self, _data: &UserData) -> Option<Box<dyn Condition>> {
        None
    }

    fn depends_on(&self, _data: &UserData) -> Vec<String> {
        vec![super::crtd::ID.to_string()]
    }

    fn runner(&self, data: &UserData) -> Result<Option<Box<dyn Runner>>, ServiceError> {
        let args = Args {
            id: self.id(data),
            process_args: vec!["/netd".to_string()],
        };

        let opts = Options::default()
            .with_env(data.env_vars())
            .with_log_path(&data.log_path)
            .with_crt_address(&data.crt_socket)
            .with_container_image(&data.images.netd)
            .with_restart_type(RestartType::Forever)
            .with_mounts(vec![Mount {
                r#type: "bind".to_string(),
                source: "/run/netd".to_string(),
                destination: "/run/netd".to_string(),
                options: vec!["rbind".to_string(), "rw".to_string()],
            }]);

        Ok(Some(Box::new(ContainerRunner::new(data.debug, args, opts))))
    }

    async fn post(&self, _data: &UserData) -> Result<(), ServiceError> {
        Ok(())
    }

    fn health(&self, _data: &UserData) -> Option<HealthSpec> {
        Some(HealthSpec {
            settings: health::Settings::default(),
            check: Arc::new(|_token| {
                Box::pin(async {
                    tokio::net::UnixStream::connect(HEALTH_SOCKET)
                        .await
                        .map(|_| ())
                        .map_err(|e| {
                            HealthError::Check(format!("netd socket not reachable: {e}"))
                        })
                })
            }),
        })
    }
}
