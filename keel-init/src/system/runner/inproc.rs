//! In-process runner: executes a service entrypoint inside its own
//! tokio task with its own cancellation token.
//!
//! A panic inside the entrypoint is recovered and converted into a
//! runner error carrying the panic payload and a captured backtrace.

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{Args, Options, Runner};
use crate::error::{RunnerError, ServiceError};
use crate::system::events::{Recorder, ServiceState};
use crate::system::logging::LogSink;

use async_trait::async_trait;

/// Entrypoint of an in-process service. Receives a token cancelled on
/// `stop` and the service's log sink; must return promptly once the
/// token fires. A `Canceled` return is treated as a clean exit.
pub type Entrypoint = Arc<
    dyn Fn(CancellationToken, Arc<LogSink>) -> BoxFuture<'static, Result<(), ServiceError>>
        + Send
        + Sync,
>;

pub struct InprocRunner {
    debug: bool,
    args: Args,
    opts: Options,
    main: Entrypoint,
    stop: CancellationToken,
    state: Mutex<RunState>,
}

#[derive(Default)]
struct RunState {
    done: Option<watch::Receiver<bool>>,
}

impl InprocRunner {
    pub fn new(debug: bool, args: Args, opts: Options, main: Entrypoint) -> Self {
        Self {
            debug,
            args,
            opts,
            main,
            stop: CancellationToken::new(),
            state: Mutex::new(RunState::default()),
        }
    }
}

impl fmt::Display for InprocRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Inproc({})", self.args.id)
    }
}

#[async_trait]
impl Runner for InprocRunner {
    async fn open(&self) -> Result<(), RunnerError> {
        Ok(())
    }

    async fn run(&self, recorder: Arc<dyn Recorder>) -> Result<(), RunnerError> {
        let sink = Arc::new(LogSink::open(&self.opts.log_path, &self.args.id, self.debug).await?);

        // born cancelled when stop was requested before the first poll
        let token = self.stop.child_token();
        let (done_tx, done_rx) = watch::channel(false);
        {
            let mut state = self.state.lock().expect("inproc state lock poisoned");
            state.done = Some(done_rx);
        }

        recorder.update(
            ServiceState::Running,
            "Service started as in-process task".to_string(),
        );

        let main = self.main.clone();
        let handle = tokio::spawn(async move { (main)(token, sink).await });

        let result = match handle.await {
            Ok(Ok(())) => Ok(()),
            // a cooperative cancellation exit is a clean exit
            Ok(Err(ServiceError::Canceled)) => Ok(()),
            Ok(Err(e)) => Err(RunnerError::Entrypoint(e.to_string())),
            Err(join) if join.is_panic() => {
                let payload = join.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                Err(RunnerError::Panic {
                    message: format!("{message}\n{}", Backtrace::force_capture()),
                })
            }
            Err(_) => Err(RunnerError::Canceled),
        };

        let _ = done_tx.send(true);

        result
    }

    async fn stop(&self) -> Result<(), RunnerError> {
        self.stop.cancel();

        let done = {
            let state = self.state.lock().expect("inproc state lock poisoned");
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
