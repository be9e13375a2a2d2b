//! Cluster-join utility: registers the node with the control plane,
//! then exits. Retried until it succeeds once.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::UserData;
use crate::error::ServiceError;
use crate::proto::crt::Mount;
use crate::system::conditions::Condition;
use crate::system::runner::crt::ContainerRunner;
use crate::system::runner::restart::RestartRunner;
use crate::system::runner::{Args, Options, RestartType, Runner};
use crate::system::Service;

pub const ID: &str = "nodejoin";

const JOIN_CONFIG: &str = "/run/nodejoin/config.json";

pub struct NodeJoin;

#[async_trait]
impl Service for NodeJoin {
    fn id(&self, _data: &UserData) -> String {
        ID.to_string()
    }

    async fn pre(&self, data: &UserData) -> Result<(), ServiceError> {
        tokio::fs::create_dir_all("/run/nodejoin").await?;

        let config = serde_json::json!({
            "endpoint": data.cluster.endpoint,
            "token": data.cluster.token,
        });
        tokio::fs::write(JOIN_CONFIG, config.to_string()).await?;

        Ok(())
    }

    fn condition(&self, _data: &UserData) -> Option<Box<dyn Condition>> {
        None
    }

    fn depends_on(&self, _data: &UserData) -> Vec<String> {
        vec![super::crtd::ID.to_string(), super::netd::ID.to_string()]
    }

    fn runner(&self, data: &UserData) -> Result<Option<Box<dyn Runner>>, ServiceError> {
        // Nothing to do when the node has no join endpoint configured.
        if data.cluster.endpoint.is_empty() {
            return Ok(None);
        }

        let args = Args {
            id: self.id(data),
            process_args: vec![
                "/nodejoin".to_string(),
                format!("--config={JOIN_CONFIG}"),
            ],
        };

        let opts = Options::default()
            .with_env(data.env_vars())
            .with_log_path(&data.log_path)
            .with_crt_address(&data.crt_socket)
            .with_container_image(&data.images.nodejoin)
            .with_restart_type(RestartType::Once)
            .with_mounts(vec![Mount {
                r#type: "bind".to_string(),
                source: "/run/nodejoin".to_string(),
                destination: "/run/nodejoin".to_string(),
                options: vec!["rbind".to_string(), "ro".to_string()],
            }]);

        let container = Arc::new(ContainerRunner::new(data.debug, args, opts));
        let runner = RestartRunner::new(container).with_type(RestartType::UntilSuccess);

        Ok(Some(Box::new(runner)))
    }

    async fn post(&self, _data: &UserData) -> Result<(), ServiceError> {
        // the bootstrap token is single-use; do not leave it around
        let _ = tokio::fs::remove_file(JOIN_CONFIG).await;
        Ok(())
    }
}
