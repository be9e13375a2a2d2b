//! Kubernetes node agent.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::UserData;
use crate::constants;
use crate::error::{HealthError, ServiceError};
use crate::proto::crt::Mount;
use crate::system::conditions::{self, Condition};
use crate::system::health;
use crate::system::runner::crt::ContainerRunner;
use crate::system::runner::{Args, Options, RestartType, Runner};
use crate::system::{HealthSpec, Service};

pub const ID: &str = "kubelet";

const HEALTHZ_URL: &str = "http://127.0.0.1:10248/healthz";

pub struct Kubelet;

fn bootstrap_kubeconfig(data: &UserData) -> String {
    format!(
        r#"apiVersion: v1
kind: Config
clusters:
- name: local
  cluster:
    server: {server}
    certificate-authority-data: {ca_cert}
users:
- name: kubelet
  user:
    token: {token}
contexts:
- context:
    cluster: local
    user: kubelet
"#,
        server = data.cluster.endpoint,
        ca_cert = data.cluster.ca_cert,
        token = data.cluster.token,
    )
}

#[async_trait]
impl Service for Kubelet {
    fn id(&self, _data: &UserData) -> String {
        ID.to_string()
    }

    async fn pre(&self, data: &UserData) -> Result<(), ServiceError> {
        tokio::fs::create_dir_all("/etc/kubernetes/manifests").await?;
        tokio::fs::create_dir_all("/var/lib/kubelet").await?;
        tokio::fs::create_dir_all("/var/log/pods").await?;

        tokio::fs::write(
            constants::KUBELET_BOOTSTRAP_KUBECONFIG,
            bootstrap_kubeconfig(data),
        )
        .await?;

        Ok(())
    }

    // The CA certificate appears once trustd has issued credentials.
    fn condition(&self, _data: &UserData) -> Option<Box<dyn Condition>> {
        Some(Box::new(conditions::wait_for_file_to_exist(
            constants::CA_CERT,
        )))
    }

    fn depends_on(&self, _data: &UserData) -> Vec<String> {
        vec![super::crtd::ID.to_string(), super::netd::ID.to_string()]
    }

    fn runner(&self, data: &UserData) -> Result<Option<Box<dyn Runner>>, ServiceError> {
        let image = format!("{}:v{}", data.images.kubelet, data.cluster.version);

        let args = Args {
            id: self.id(data),
            process_args: vec![
                "/kubelet".to_string(),
                format!(
                    "--bootstrap-kubeconfig={}",
                    constants::KUBELET_BOOTSTRAP_KUBECONFIG
                ),
                format!("--kubeconfig={}", constants::KUBELET_KUBECONFIG),
                format!("--client-ca-file={}", constants::CA_CERT),
                "--anonymous-auth=false".to_string(),
                "--cert-dir=/var/lib/kubelet/pki".to_string(),
                "--pod-manifest-path=/etc/kubernetes/manifests".to_string(),
                "--rotate-certificates".to_string(),
            ],
        };

        let mounts = vec![
            Mount {
                r#type: "bind".to_string(),
                source: "/dev".to_string(),
                destination: "/dev".to_string(),
                options: vec!["rbind".to_string(), "rshared".to_string(), "rw".to_string()],
            },
            Mount {
                r#type: "bind".to_string(),
                source: "/sys".to_string(),
                destination: "/sys".to_string(),
                options: vec!["rbind".to_string(), "ro".to_string()],
            },
            Mount {
                r#type: "bind".to_string(),
                source: "/etc/kubernetes".to_string(),
                destination: "/etc/kubernetes".to_string(),
                options: vec!["rbind".to_string(), "rw".to_string()],
            },
            Mount {
                r#type: "bind".to_string(),
                source: "/var/lib/kubelet".to_string(),
                destination: "/var/lib/kubelet".to_string(),
                options: vec!["rbind".to_string(), "rshared".to_string(), "rw".to_string()],
            },
            Mount {
                r#type: "bind".to_string(),
                source: "/var/log/pods".to_string(),
                destination: "/var/log/pods".to_string(),
                options: vec!["rbind".to_string(), "rw".to_string()],
            },
            Mount {
                r#type: "bind".to_string(),
                source: "/run".to_string(),
                destination: "/var/run".to_string(),
                options: vec!["rbind".to_string(), "rshared".to_string(), "rw".to_string()],
            },
        ];

        let opts = Options::default()
            .with_env(data.env_vars())
            .with_log_path(&data.log_path)
            .with_crt_address(&data.crt_socket)
            .with_container_image(image)
            .with_restart_type(RestartType::Forever)
            .with_mounts(mounts);

        Ok(Some(Box::new(ContainerRunner::new(data.debug, args, opts))))
    }

    async fn post(&self, _data: &UserData) -> Result<(), ServiceError> {
        Ok(())
    }

    fn health(&self, _data: &UserData) -> Option<HealthSpec> {
        Some(HealthSpec {
            settings: health::Settings {
                initial_delay: std::time::Duration::from_secs(2),
                ..health::Settings::default()
            },
            check: Arc::new(|_token| {
                Box::pin(async {
                    let response = reqwest::get(HEALTHZ_URL)
                        .await
                        .map_err(|e| HealthError::Check(format!("healthz: {e}")))?;
                    response
                        .error_for_status()
                        .map(|_| ())
                        .map_err(|e| HealthError::Check(format!("healthz: {e}")))
                })
            }),
        })
    }
}
