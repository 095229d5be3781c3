pub mod docker;

use std::time::Duration;

use async_trait::async_trait;

pub use docker::DockerContainerClient;

/// Containers are only watched when they carry this label set to
/// [`LABEL_ENABLE_VALUE`] and label filtering is turned on.
pub const LABEL_ENABLE_KEY: &str = "com.andvarfolomeev.dockernotifier.enable";
pub const LABEL_ENABLE_VALUE: &str = "true";
/// Upper bound for a single log fetch.
pub const LOGS_TIMEOUT: Duration = Duration::from_secs(5);
const SHORT_ID_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub id: String,
    pub name: String,
}

impl Container {
    /// Builds a container from what the runtime reports about it.
    ///
    /// Docker prefixes names with `/`. Without any name the short id is
    /// used instead.
    pub fn from_runtime(id: String, names: &[String]) -> Self {
        let name = match names.first() {
            Some(name) => name.trim_start_matches('/').to_string(),
            None => id.chars().take(SHORT_ID_LEN).collect(),
        };
        Self { id, name }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContainerClientError {
    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),
    #[error("Timed out after {0:?} waiting for logs of container {1}")]
    Timeout(Duration, String),
    #[error("Container ID cannot be empty")]
    EmptyContainerId,
    #[error("Invalid since timestamp '{0}': {1}")]
    InvalidSince(String, chrono::ParseError),
    #[error("Since timestamp '{0}' is outside the range the Docker API accepts")]
    SinceOutOfRange(String),
}

impl ContainerClientError {
    /// Whether the runtime refused us access, usually to its socket.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            ContainerClientError::DockerApi(bollard::errors::Error::IOError { err }) => {
                err.kind() == std::io::ErrorKind::PermissionDenied
            }
            e => e.to_string().to_lowercase().contains("permission denied"),
        }
    }
}

/// What the watcher needs from a container runtime.
#[async_trait]
pub trait ContainerClient: Send + Sync {
    /// Containers running right now.
    async fn running_containers(&self) -> Result<Vec<Container>, ContainerClientError>;

    /// Raw stdout/stderr of container `id`, with timestamps, from `since`
    /// (RFC 3339) on. A `tail` of 0 returns every line.
    async fn container_logs(
        &self,
        id: &str,
        since: &str,
        tail: usize,
    ) -> Result<Vec<u8>, ContainerClientError>;

    async fn close(&self) -> Result<(), ContainerClientError>;
}
