//! Container-runtime daemon. Every containerized service runs through
//! it, so it is part of the critical set and stops last.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::UserData;
use crate::error::ServiceError;
use crate::system::conditions::Condition;
use crate::system::runner::process::ProcessRunner;
use crate::system::runner::restart::RestartRunner;
use crate::system::runner::{Args, Options, RestartType, Runner};
use crate::system::Service;

pub const ID: &str = "crtd";

pub struct Crtd;

#[async_trait]
impl Service for Crtd {
    fn id(&self, _data: &UserData) -> String {
        ID.to_string()
    }

    async fn pre(&self, data: &UserData) -> Result<(), ServiceError> {
        if let Some(parent) = data.crt_socket.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::create_dir_all("/var/lib/crtd").await?;
        Ok(())
    }

    fn condition(&self, _data: &UserData) -> Option<Box<dyn Condition>> {
        None
    }

    fn runner(&self, data: &UserData) -> Result<Option<Box<dyn Runner>>, ServiceError> {
        let args = Args {
            id: self.id(data),
            process_args: vec![
                "/sbin/crtd".to_string(),
                format!("--listen={}", data.crt_socket.display()),
                "--root=/var/lib/crtd".to_string(),
            ],
        };

        let opts = Options::default()
            .with_env(data.env_vars())
            .with_log_path(&data.log_path);

        let process = Arc::new(ProcessRunner::new(data.debug, args, opts));
        let runner = RestartRunner::new(process).with_type(RestartType::Forever);

        Ok(Some(Box::new(runner)))
    }

    async fn post(&self, _data: &UserData) -> Result<(), ServiceError> {
        Ok(())
    }
}
