//! keel-init - PID 1 service supervisor for the keel cluster-node OS.
//!
//! Runs as PID 1 on a node or locally for development.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use keel_init::api::power::{PowerAction, PowerControl};
use keel_init::api::{self, MachineApi};
use keel_init::utils::signals;
use keel_init::{Supervisor, UserData, services};
use log::{error, info};
use nix::sys::prctl;
use nix::sys::reboot::{RebootMode, reboot};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// PID 1 service supervisor for the keel cluster-node OS.
#[derive(Parser)]
#[command(name = "keel-init")]
#[command(version = VERSION)]
#[command(about = "PID 1 service supervisor for the keel cluster-node OS")]
struct Args {
    /// Path to the user-data document
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let is_pid1 = std::process::id() == 1;

    // Redirect stdin/stdout/stderr to the console when running as PID 1
    if is_pid1 {
        setup_console();
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    info!("keel-init v{} starting", VERSION);

    // Parse CLI args (only in non-PID1 mode)
    let args = if is_pid1 {
        Args { config: None }
    } else {
        Args::parse()
    };

    let config_path = args
        .config
        .unwrap_or_else(|| PathBuf::from(keel_init::constants::USERDATA_PATH));
    let data = match UserData::load(&config_path).await {
        Ok(data) => data,
        Err(e) => {
            info!("using default user data ({e})");
            UserData::default()
        }
    };
    let data = Arc::new(data);

    if is_pid1 {
        info!("Running as PID 1 (init mode)");
    } else {
        info!("Running in local development mode");
        // wait for grandchildren the OCI runtime reparents to us
        prctl::set_child_subreaper(true)
            .map_err(|e| anyhow::anyhow!("Failed to set as child subreaper: {}", e))?;
    }

    signals::setup_signal_handlers();

    let supervisor = Supervisor::instance(data.clone());
    supervisor.start(services::default_services());
    info!("services started");

    let power = PowerControl::new();
    let api_handle = tokio::spawn({
        let api = MachineApi::new(supervisor.clone(), power.clone());
        let power = power.clone();
        let socket = data.machine_socket.clone();
        async move {
            if let Err(e) = api::serve(&socket, api, power).await {
                error!("machine API terminated: {}", e);
            }
        }
    });

    info!("keel-init ready, entering main loop");

    let action = loop {
        tokio::select! {
            action = power.wait() => break action,
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                // Reap zombie children periodically
                signals::reap_children();
            }
        }
    };

    info!("power transition requested: {:?}, stopping services", action);
    supervisor.shutdown().await;
    let _ = api_handle.await;

    if is_pid1 {
        nix::unistd::sync();
        let mode = match action {
            PowerAction::Reboot => RebootMode::RB_AUTOBOOT,
            PowerAction::Poweroff => RebootMode::RB_POWER_OFF,
        };
        reboot(mode).map_err(|e| anyhow::anyhow!("reboot failed: {}", e))?;
    }

    info!("keel-init shutting down");
    Ok(())
}

/// Setup console for init mode - redirect stdin/stdout/stderr to the
/// serial console.
fn setup_console() {
    use std::fs::OpenOptions;
    use std::os::unix::io::AsRawFd;

    let console_path = "/dev/ttyS0";

    if let Ok(console) = OpenOptions::new().read(true).write(true).open(console_path) {
        let fd = console.as_raw_fd();
        unsafe {
            libc::dup2(fd, 0); // stdin
            libc::dup2(fd, 1); // stdout
            libc::dup2(fd, 2); // stderr
        }
        // console file handle dropped here, but fd 0/1/2 keep it open
    }
}
