//! Signal handling for PID 1 operation.
//!
//! As PID 1 we inherit every orphaned process on the machine; they are
//! reaped from the main loop rather than from the signal handler.

use log::debug;
use nix::sys::signal::{SigHandler, Signal, signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

/// Installs the SIGCHLD handler. Reaping itself happens in
/// [`reap_children`], driven by the main loop.
pub fn setup_signal_handlers() {
    unsafe {
        let _ = signal(Signal::SIGCHLD, SigHandler::Handler(sigchld_handler));
    }
}

extern "C" fn sigchld_handler(_: i32) {
    // wakes the main loop; reaping is not async-signal-safe here
}

/// Reaps every zombie child that has exited since the last call.
pub fn reap_children() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, status)) => {
                debug!("child {} exited with status {}", pid, status);
            }
            Ok(WaitStatus::Signaled(pid, sig, _)) => {
                debug!("child {} killed by signal {:?}", pid, sig);
            }
            Ok(WaitStatus::StillAlive) => break,
            Ok(_) => {
                // stopped/continued children are not ours to collect
            }
            Err(nix::errno::Errno::ECHILD) => break,
            Err(_) => break,
        }
    }
}
