//! Trust/attestation RPC service. Issues node credentials and writes
//! the cluster CA material other services wait on.

use async_trait::async_trait;

use crate::config::UserData;
use crate::error::ServiceError;
use crate::proto::crt::Mount;
use crate::system::conditions::Condition;
use crate::system::runner::crt::ContainerRunner;
use crate::system::runner::{Args, Options, RestartType, Runner};
use crate::system::Service;

pub const ID: &str = "trustd";

pub struct Trustd;

#[async_trait]
impl Service for Trustd {
    fn id(&self, _data: &UserData) -> String {
        ID.to_string()
    }

    async fn pre(&self, data: &UserData) -> Result<(), ServiceError> {
        tokio::fs::create_dir_all("/run/trustd").await?;
        tokio::fs::create_dir_all("/etc/kubernetes/pki").await?;

        let config = serde_json::json!({
            "endpoint": data.cluster.endpoint,
            "token": data.cluster.token,
            "caCert": data.cluster.ca_cert,
        });
        tokio::fs::write("/run/trustd/config.json", config.to_string()).await?;

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
            process_args: vec!["/trustd".to_string(), "--config=/run/trustd/config.json".to_string()],
        };

        let opts = Options::default()
            .with_env(data.env_vars())
            .with_log_path(&data.log_path)
            .with_crt_address(&data.crt_socket)
            .with_container_image(&data.images.trustd)
            .with_restart_type(RestartType::Forever)
            .with_mounts(vec![
                Mount {
                    r#type: "bind".to_string(),
                    source: "/run/trustd".to_string(),
                    destination: "/run/trustd".to_string(),
                    options: vec!["rbind".to_string(), "ro".to_string()],
                },
                Mount {
                    r#type: "bind".to_string(),
                    source: "/etc/kubernetes/pki".to_string(),
                    destination: "/etc/kubernetes/pki".to_string(),
                    options: vec!["rbind".to_string(), "rw".to_string()],
                },
            ]);

        Ok(Some(Box::new(ContainerRunner::new(data.debug, args, opts))))
    }

    async fn post(&self, _data: &UserData) -> Result<(), ServiceError> {
        Ok(())
    }
}
