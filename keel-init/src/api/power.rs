//! Idempotent power-transition signaling.
//!
//! Reboot and poweroff requests can arrive repeatedly (RPC retries, an
//! operator mashing the ACPI power button, an upgrade finishing while a
//! shutdown is already pending); each action must fire exactly once.
//! Cancellation tokens give the close-only channel semantics: the first
//! request cancels the token, later requests are no-ops, and any number
//! of observers can select on it. The ACPI power-button observer, when
//! wired up, cancels the same poweroff token.

use tokio_util::sync::CancellationToken;

/// The power transition requested for the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Reboot,
    Poweroff,
}

/// Shared signal fan-in for reboot/poweroff requests.
#[derive(Clone, Default)]
pub struct PowerControl {
    reboot: CancellationToken,
    poweroff: CancellationToken,
}

impl PowerControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a reboot. Idempotent.
    pub fn reboot(&self) {
        self.reboot.cancel();
    }

    /// Requests a poweroff. Idempotent.
    pub fn poweroff(&self) {
        self.poweroff.cancel();
    }

    /// Resolves once any power transition has been requested.
    pub async fn wait(&self) -> PowerAction {
        tokio::select! {
            _ = self.reboot.cancelled() => PowerAction::Reboot,
            _ = self.poweroff.cancelled() => PowerAction::Poweroff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repeated_requests_produce_one_action() {
        let power = PowerControl::new();
        power.reboot();
        power.reboot();

        assert_eq!(power.wait().await, PowerAction::Reboot);
        // the signal stays observable for late listeners
        assert_eq!(power.wait().await, PowerAction::Reboot);
    }

    #[tokio::test]
    async fn poweroff_is_observable_by_clones() {
        let power = PowerControl::new();
        let observer = power.clone();

        power.poweroff();
        assert_eq!(observer.wait().await, PowerAction::Poweroff);
    }
}
