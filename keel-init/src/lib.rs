//! keel-init - PID 1 service supervisor for the keel cluster-node OS.
//!
//! After the kernel hands off control, keel-init brings up early
//! userspace and then launches and indefinitely manages the fixed set
//! of node workloads: the container-runtime daemon, the device-event
//! daemon, the trust service, the networking daemon, the Kubernetes
//! node agent and the cluster-join utility.
//!
//! ## Architecture
//!
//! - **system**: the service runtime - conditions, health, event
//!   history, runner back-ends, the per-service state machine and the
//!   process-wide supervisor.
//! - **services**: declarations of the supervised workloads.
//! - **api**: the machine control-plane RPC served on a local UNIX
//!   socket (reboot, shutdown, upgrade, service status).
//!
//! ## Dual-Mode Operation
//!
//! - **PID 1 mode**: full init responsibilities (console redirect,
//!   zombie reaping, reboot/poweroff syscalls)
//! - **Local mode**: for development/testing without a machine

pub mod api;
pub mod config;
pub mod constants;
pub mod error;
pub mod proto;
pub mod services;
pub mod system;
pub mod utils;

pub use config::UserData;
pub use system::{Service, ServiceRunner, Supervisor};
