//! Declarations of the system services supervised on a keel node.

pub mod crtd;
pub mod devd;
pub mod kubelet;
pub mod netd;
pub mod nodejoin;
pub mod trustd;

use std::sync::Arc;

use crate::system::Service;

pub use crtd::Crtd;
pub use devd::Devd;
pub use kubelet::Kubelet;
pub use netd::Netd;
pub use nodejoin::NodeJoin;
pub use trustd::Trustd;

/// The fixed service set brought up at boot, in declaration order.
pub fn default_services() -> Vec<Arc<dyn Service>> {
    vec![
        Arc::new(Crtd),
        Arc::new(Devd),
        Arc::new(Trustd),
        Arc::new(Netd),
        Arc::new(Kubelet),
        Arc::new(NodeJoin),
    ]
}
