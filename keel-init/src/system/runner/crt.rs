//! Containerized-task runner: drives one container per service through
//! the container-runtime daemon's UNIX socket.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use log::warn;
use tokio::net::UnixStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

use hyper_util::rt::TokioIo;

use super::{Args, Options, RestartType, Runner};
use crate::error::{ConditionError, RunnerError};
use crate::proto::crt::runtime_client::RuntimeClient;
use crate::proto::crt::{
    CreateContainerRequest, CreateTaskRequest, DeleteContainerRequest, DeleteTaskRequest,
    GetImageRequest, KillTaskRequest, Mount, ProcessSpec, StartTaskRequest, WaitTaskRequest,
};
use crate::system::conditions::{Condition, wait_for_file_to_exist};
use crate::system::events::{Recorder, ServiceState};

use async_trait::async_trait;

pub struct ContainerRunner {
    args: Args,
    opts: Options,
    stop: CancellationToken,
    state: Mutex<RunState>,
}

#[derive(Default)]
struct RunState {
    done: Option<watch::Receiver<bool>>,
}

impl ContainerRunner {
    pub fn new(_debug: bool, args: Args, opts: Options) -> Self {
        Self {
            args,
            opts,
            stop: CancellationToken::new(),
            state: Mutex::new(RunState::default()),
        }
    }

    fn spec(&self) -> ProcessSpec {
        let mut mounts = vec![
            Mount {
                r#type: "bind".to_string(),
                source: "/etc/hosts".to_string(),
                destination: "/etc/hosts".to_string(),
                options: vec!["rbind".to_string(), "ro".to_string()],
            },
            Mount {
                r#type: "bind".to_string(),
                source: "/etc/resolv.conf".to_string(),
                destination: "/etc/resolv.conf".to_string(),
                options: vec!["rbind".to_string(), "ro".to_string()],
            },
        ];
        mounts.extend(self.opts.mounts.iter().cloned());

        ProcessSpec {
            args: self.args.process_args.clone(),
            env: self.opts.env_with_path(),
            privileged: true,
            host_network: true,
            host_pid: true,
            mounts,
            labels: self.opts.labels.iter().cloned().collect(),
        }
    }

    async fn run_inner(&self, recorder: Arc<dyn Recorder>) -> Result<(), RunnerError> {
        // The daemon may still be starting; its socket appearing is the
        // readiness signal.
        let socket_wait = wait_for_file_to_exist(&self.opts.crt_address);
        match socket_wait.wait(&self.stop).await {
            Ok(()) => {}
            Err(ConditionError::Canceled) => return Err(RunnerError::Stopped),
            Err(e) => return Err(e.into()),
        }

        let mut client = connect(&self.opts.crt_address).await?;

        let image = self.opts.container_image.clone();
        if image.is_empty() {
            return Err(RunnerError::MissingOption("container_image"));
        }

        client
            .get_image(GetImageRequest {
                name: image.clone(),
                namespace: self.opts.namespace.clone(),
            })
            .await
            .map_err(|status| {
                if status.code() == tonic::Code::NotFound {
                    RunnerError::ImageNotFound { image: image.clone() }
                } else {
                    RunnerError::Rpc(status)
                }
            })?;

        client
            .create_container(CreateContainerRequest {
                id: self.args.id.clone(),
                namespace: self.opts.namespace.clone(),
                image,
                snapshot_key: self.args.id.clone(),
                spec: Some(self.spec()),
            })
            .await?;

        let result = match self.opts.restart_type {
            RestartType::Forever => loop {
                match self.run_once(&mut client, recorder.clone()).await {
                    Err(RunnerError::Stopped) => break Ok(()),
                    Ok(()) => {}
                    Err(e) => {
                        warn!("service {} task failed: {}", self.args.id, e);
                    }
                }

                tokio::select! {
                    _ = self.stop.cancelled() => break Ok(()),
                    _ = tokio::time::sleep(self.opts.restart_interval) => {}
                }
            },
            // single attempt; a stop-induced exit is a clean exit
            _ => match self.run_once(&mut client, recorder).await {
                Err(RunnerError::Stopped) => Ok(()),
                other => other,
            },
        };

        // Best-effort container and snapshot cleanup.
        if let Err(e) = client
            .delete_container(DeleteContainerRequest {
                id: self.args.id.clone(),
                namespace: self.opts.namespace.clone(),
                with_snapshot: true,
            })
            .await
        {
            warn!("failed to delete container {}: {}", self.args.id, e);
        }

        result
    }

    async fn run_once(
        &self,
        client: &mut RuntimeClient<Channel>,
        recorder: Arc<dyn Recorder>,
    ) -> Result<(), RunnerError> {
        let log_path = self
            .opts
            .log_path
            .join(format!("{}.log", self.args.id))
            .to_string_lossy()
            .to_string();

        client
            .create_task(CreateTaskRequest {
                container_id: self.args.id.clone(),
                namespace: self.opts.namespace.clone(),
                log_path,
            })
            .await?;

        client
            .start_task(StartTaskRequest {
                container_id: self.args.id.clone(),
                namespace: self.opts.namespace.clone(),
            })
            .await?;

        recorder.update(
            ServiceState::Running,
            format!("Started task {}", self.args.id),
        );

        let wait_fut = {
            let mut wait_client = client.clone();
            let request = WaitTaskRequest {
                container_id: self.args.id.clone(),
                namespace: self.opts.namespace.clone(),
            };
            async move { wait_client.wait_task(request).await }
        };
        tokio::pin!(wait_fut);

        let result = tokio::select! {
            exit = &mut wait_fut => {
                match exit {
                    Ok(reply) => {
                        let code = reply.into_inner().exit_code;
                        if code == 0 {
                            Ok(())
                        } else {
                            Err(RunnerError::TaskExit {
                                id: self.args.id.clone(),
                                code,
                            })
                        }
                    }
                    Err(status) => Err(RunnerError::Rpc(status)),
                }
            }
            _ = self.stop.cancelled() => {
                self.kill_task(client, libc::SIGTERM).await;

                let graceful = self.opts.graceful_shutdown_timeout;
                if tokio::time::timeout(graceful, &mut wait_fut).await.is_err() {
                    self.kill_task(client, libc::SIGKILL).await;
                    // drain the exit notification
                    let _ = wait_fut.await;
                }

                Err(RunnerError::Stopped)
            }
        };

        if let Err(e) = client
            .delete_task(DeleteTaskRequest {
                container_id: self.args.id.clone(),
                namespace: self.opts.namespace.clone(),
            })
            .await
        {
            warn!("failed to delete task {}: {}", self.args.id, e);
        }

        result
    }

    async fn kill_task(&self, client: &mut RuntimeClient<Channel>, signal: i32) {
        if let Err(e) = client
            .kill_task(KillTaskRequest {
                container_id: self.args.id.clone(),
                namespace: self.opts.namespace.clone(),
                signal,
                all: true,
            })
            .await
        {
            warn!(
                "failed to deliver signal {} to task {}: {}",
                signal, self.args.id, e
            );
        }
    }
}

impl fmt::Display for ContainerRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Container({})", self.args.id)
    }
}

#[async_trait]
impl Runner for ContainerRunner {
    async fn open(&self) -> Result<(), RunnerError> {
        Ok(())
    }

    async fn run(&self, recorder: Arc<dyn Recorder>) -> Result<(), RunnerError> {
        let (done_tx, done_rx) = watch::channel(false);
        {
            let mut state = self.state.lock().expect("container state lock poisoned");
            state.done = Some(done_rx);
        }

        let result = self.run_inner(recorder).await;

        let _ = done_tx.send(true);
        result
    }

    async fn stop(&self) -> Result<(), RunnerError> {
        self.stop.cancel();

        let done = {
            let state = self.state.lock().expect("container state lock poisoned");
            state.done.clone()
        };
        let Some(mut done) = done else {
            return Ok(());
        };

        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                break;
            }
        }

        Ok(())
    }

    async fn close(&self) -> Result<(), RunnerError> {
        Ok(())
    }
}

async fn connect(address: &Path) -> Result<RuntimeClient<Channel>, RunnerError> {
    let path = address.to_path_buf();
    let connector = service_fn(move |_: Uri| {
        let path = path.clone();
        async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?)) }
    });

    // The URI is ignored; the connector dials the UNIX socket.
    let endpoint = Endpoint::try_from("http://[::]:50051").map_err(|source| RunnerError::Connect {
        address: address.to_path_buf(),
        source,
    })?;

    let channel = endpoint
        .connect_with_connector(connector)
        .await
        .map_err(|source| RunnerError::Connect {
            address: address.to_path_buf(),
            source,
        })?;

    Ok(RuntimeClient::new(channel))
}
