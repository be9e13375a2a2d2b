//! Well-known paths and defaults shared across keel-init.

/// Default PATH prepended to every service environment.
pub const PATH: &str = "/sbin:/bin:/usr/sbin:/usr/bin:/usr/local/sbin:/usr/local/bin";

/// Directory for per-service log files (`<id>.log`).
pub const DEFAULT_LOG_PATH: &str = "/var/log/keel";

/// UNIX socket of the container-runtime daemon.
pub const CRT_SOCKET: &str = "/run/keel/crt.sock";

/// UNIX socket of the machine control-plane API.
pub const MACHINE_SOCKET: &str = "/run/keel/machine.sock";

/// Namespace for system containers on the container-runtime daemon.
pub const SYSTEM_NAMESPACE: &str = "system";

/// Staging directory for upgrade artifacts.
pub const UPGRADE_STAGING_DIR: &str = "/var/lib/keel/upgrade";

/// Default location of the user-data document.
pub const USERDATA_PATH: &str = "/etc/keel/userdata.json";

/// Path of the cluster CA certificate written by the trust service.
pub const CA_CERT: &str = "/etc/kubernetes/pki/ca.crt";

/// Bootstrap kubeconfig written for the kubelet.
pub const KUBELET_BOOTSTRAP_KUBECONFIG: &str = "/etc/kubernetes/bootstrap-kubeconfig";

/// Kubeconfig the kubelet writes after bootstrapping.
pub const KUBELET_KUBECONFIG: &str = "/etc/kubernetes/kubeconfig-kubelet";
