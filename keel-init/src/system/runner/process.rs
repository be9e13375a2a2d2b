//! Host-process runner: fork/exec of a binary with stdio captured to
//! the service log.

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use log::warn;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{Args, Options, Runner};
use crate::error::RunnerError;
use crate::system::events::{Recorder, ServiceState};
use crate::system::logging::LogSink;

use async_trait::async_trait;

pub struct ProcessRunner {
    debug: bool,
    args: Args,
    opts: Options,
    stop: CancellationToken,
    state: Mutex<RunState>,
}

#[derive(Default)]
struct RunState {
    pid: Option<i32>,
    done: Option<watch::Receiver<bool>>,
}

impl ProcessRunner {
    pub fn new(debug: bool, args: Args, opts: Options) -> Self {
        Self {
            debug,
            args,
            opts,
            stop: CancellationToken::new(),
            state: Mutex::new(RunState::default()),
        }
    }

    fn command(&self) -> Result<Command, RunnerError> {
        let program = self
            .args
            .process_args
            .first()
            .ok_or(RunnerError::MissingOption("process_args"))?;

        let mut cmd = Command::new(program);
        cmd.args(&self.args.process_args[1..]);
        cmd.env_clear();
        for assignment in self.opts.env_with_path() {
            if let Some((key, value)) = assignment.split_once('=') {
                cmd.env(key, value);
            }
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        Ok(cmd)
    }

    fn current_pid(&self) -> Option<i32> {
        self.state.lock().expect("process state lock poisoned").pid
    }
}

impl fmt::Display for ProcessRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Process({:?})", self.args.process_args)
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn open(&self) -> Result<(), RunnerError> {
        Ok(())
    }

    async fn run(&self, recorder: Arc<dyn Recorder>) -> Result<(), RunnerError> {
        // stop may have been requested before our first poll
        if self.stop.is_cancelled() {
            return Ok(());
        }

        let sink = Arc::new(LogSink::open(&self.opts.log_path, &self.args.id, self.debug).await?);

        let mut child = self.command()?.spawn().map_err(|source| RunnerError::Spawn {
            command: self.args.process_args.join(" "),
            source,
        })?;

        let pid = child.id().map(|p| p as i32);
        let (done_tx, done_rx) = watch::channel(false);
        {
            let mut state = self.state.lock().expect("process state lock poisoned");
            state.pid = pid;
            state.done = Some(done_rx);
        }

        // a stop that raced the spawn could not signal the child yet
        if self.stop.is_cancelled() {
            if let Some(pid) = pid {
                let _ = signal::kill(Pid::from_raw(pid), Signal::SIGTERM);
            }
        }

        recorder.update(
            ServiceState::Running,
            format!(
                "Process {} started with PID {}",
                self.args.process_args.join(" "),
                pid.unwrap_or(-1)
            ),
        );

        let mut copiers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            let sink = sink.clone();
            copiers.push(tokio::spawn(async move { sink.copy_from(stdout).await }));
        }
        if let Some(stderr) = child.stderr.take() {
            let sink = sink.clone();
            copiers.push(tokio::spawn(async move { sink.copy_from(stderr).await }));
        }

        let status = child.wait().await;

        for copier in copiers {
            match copier.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("log copy for {} failed: {}", self.args.id, e),
                Err(e) => warn!("log copy task for {} aborted: {}", self.args.id, e),
            }
        }

        {
            let mut state = self.state.lock().expect("process state lock poisoned");
            state.pid = None;
        }
        let _ = done_tx.send(true);

        let status = status.map_err(|source| RunnerError::Spawn {
            command: self.args.process_args.join(" "),
            source,
        })?;

        if status.success() {
            Ok(())
        } else {
            let code = status
                .code()
                .unwrap_or_else(|| 128 + status.signal().unwrap_or(0));
            Err(RunnerError::ProcessExit {
                id: self.args.id.clone(),
                code,
            })
        }
    }

    async fn stop(&self) -> Result<(), RunnerError> {
        self.stop.cancel();

        let (pid, done) = {
            let state = self.state.lock().expect("process state lock poisoned");
            (state.pid, state.done.clone())
        };

        // run has not started or already returned
        let Some(mut done) = done else {
            return Ok(());
        };
        if *done.borrow() {
            return Ok(());
        }

        if let Some(pid) = pid {
            // ESRCH means the process is already gone
            let _ = signal::kill(Pid::from_raw(pid), Signal::SIGTERM);
        }

        let graceful = self.opts.graceful_shutdown_timeout;
        if tokio::time::timeout(graceful, wait_exited(&mut done))
            .await
            .is_err()
        {
            if let Some(pid) = self.current_pid() {
                let _ = signal::kill(Pid::from_raw(pid), Signal::SIGKILL);
            }
            wait_exited(&mut done).await;
        }

        Ok(())
    }

    async fn close(&self) -> Result<(), RunnerError> {
        Ok(())
    }
}

async fn wait_exited(done: &mut watch::Receiver<bool>) {
    while !*done.borrow_and_update() {
        if done.changed().await.is_err() {
            return;
        }
    }
}
