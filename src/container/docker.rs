//! Docker implementation of [`ContainerClient`] using bollard.
//!
//! Connects with the default method for the platform (Unix socket on
//! Linux/macOS, named pipe on Windows).

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::query_parameters::{
    ListContainersOptions, ListContainersOptionsBuilder, LogsOptions, LogsOptionsBuilder,
};
use chrono::DateTime;
use futures_util::StreamExt;

use crate::logging::Logger;

use super::{
    Container, ContainerClient, ContainerClientError, LABEL_ENABLE_KEY, LABEL_ENABLE_VALUE,
    LOGS_TIMEOUT,
};

pub struct DockerContainerClient {
    docker: Docker,
    label_enable: bool,
    log: Logger,
}

impl DockerContainerClient {
    pub fn connect(label_enable: bool, log: Logger) -> Result<Self, ContainerClientError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self {
            docker,
            label_enable,
            log,
        })
    }
}

/// Filters selecting running containers, optionally only labelled ones.
fn running_container_filters(label_enable: bool) -> HashMap<String, Vec<String>> {
    let mut filters = HashMap::new();
    filters.insert("status".to_string(), vec!["running".to_string()]);
    if label_enable {
        filters.insert(
            "label".to_string(),
            vec![format!("{LABEL_ENABLE_KEY}={LABEL_ENABLE_VALUE}")],
        );
    }
    filters
}

/// The Engine API takes `since` as unix seconds, so sub-second precision is
/// lost and lines from the same second come back again.
fn logs_options(since: &str, tail: usize) -> Result<LogsOptions, ContainerClientError> {
    let since_secs = DateTime::parse_from_rfc3339(since)
        .map_err(|e| ContainerClientError::InvalidSince(since.to_string(), e))?
        .timestamp();
    let since_secs = i32::try_from(since_secs)
        .map_err(|_| ContainerClientError::SinceOutOfRange(since.to_string()))?;
    let tail = if tail > 0 {
        tail.to_string()
    } else {
        "all".to_string()
    };

    Ok(LogsOptionsBuilder::new()
        .follow(false)
        .stdout(true)
        .stderr(true)
        .timestamps(true)
        .since(since_secs)
        .tail(&tail)
        .build())
}

#[async_trait]
impl ContainerClient for DockerContainerClient {
    async fn running_containers(&self) -> Result<Vec<Container>, ContainerClientError> {
        let filters = running_container_filters(self.label_enable);
        let options: ListContainersOptions =
            ListContainersOptionsBuilder::new().filters(&filters).build();

        let summaries = self.docker.list_containers(Some(options)).await?;

        Ok(summaries
            .into_iter()
            .filter_map(|summary| {
                let id = summary.id?;
                Some(Container::from_runtime(
                    id,
                    summary.names.as_deref().unwrap_or_default(),
                ))
            })
            .collect())
    }

    async fn container_logs(
        &self,
        id: &str,
        since: &str,
        tail: usize,
    ) -> Result<Vec<u8>, ContainerClientError> {
        if id.is_empty() {
            return Err(ContainerClientError::EmptyContainerId);
        }

        let options = logs_options(since, tail)?;

        let fetch = async {
            let mut stream = std::pin::pin!(self.docker.logs(id, Some(options)));
            let mut buf = Vec::new();
            while let Some(chunk) = stream.next().await {
                buf.extend_from_slice(&chunk?.into_bytes());
            }
            Ok::<_, ContainerClientError>(buf)
        };

        tokio::time::timeout(LOGS_TIMEOUT, fetch)
            .await
            .map_err(|_| ContainerClientError::Timeout(LOGS_TIMEOUT, id.to_string()))?
    }

    async fn close(&self) -> Result<(), ContainerClientError> {
        // bollard keeps no session state, the connection pool goes away
        // with the client
        self.log.debug(format_args!("Closing Docker client"));
        Ok(())
    }
}
