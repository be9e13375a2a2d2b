//! Device-event daemon. Critical set: containerized workloads may hold
//! device nodes it manages.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::UserData;
use crate::error::ServiceError;
use crate::system::conditions::Condition;
use crate::system::runner::process::ProcessRunner;
use crate::system::runner::restart::RestartRunner;
use crate::system::runner::{Args, Options, RestartType, Runner};
use crate::system::Service;

pub const ID: &str = "devd";

pub struct Devd;

#[async_trait]
impl Service for Devd {
    fn id(&self, _data: &UserData) -> String {
        ID.to_string()
    }

    async fn pre(&self, _data: &UserData) -> Result<(), ServiceError> {
        tokio::fs::create_dir_all("/run/devd").await?;
        Ok(())
    }

    fn condition(&self, _data: &UserData) -> Option<Box<dyn Condition>> {
        None
    }

    fn runner(&self, data: &UserData) -> Result<Option<Box<dyn Runner>>, ServiceError> {
        let args = Args {
            id: self.id(data),
            process_args: vec!["/sbin/devd".to_string(), "--daemonize=false".to_string()],
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
