use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::container::{Container, ContainerClient, ContainerClientError};

/// In-memory [`ContainerClient`] with scripted answers.
#[derive(Default)]
pub struct MockContainerClient {
    containers: Mutex<Vec<Container>>,
    logs: Mutex<HashMap<String, Vec<u8>>>,
    failing_logs: Mutex<HashSet<String>>,
    /// Outcomes for upcoming listings, `false` meaning failure. Once empty
    /// every listing succeeds unless `always_fail_listing` is set.
    listing_script: Mutex<VecDeque<bool>>,
    always_fail_listing: AtomicBool,
    list_calls: AtomicUsize,
    log_calls: Mutex<Vec<(String, String)>>,
    closed: AtomicBool,
    fail_close: AtomicBool,
}

fn server_error(message: &str) -> ContainerClientError {
    ContainerClientError::DockerApi(bollard::errors::Error::DockerResponseServerError {
        status_code: 500,
        message: message.to_string(),
    })
}

impl MockContainerClient {
    pub fn set_containers(&self, containers: Vec<Container>) {
        *self.containers.lock() = containers;
    }

    pub fn set_logs(&self, id: &str, raw: impl Into<Vec<u8>>) {
        self.logs.lock().insert(id.to_string(), raw.into());
    }

    pub fn fail_logs(&self, id: &str) {
        self.failing_logs.lock().insert(id.to_string());
    }

    pub fn script_listing(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.listing_script.lock().extend(outcomes);
    }

    pub fn always_fail_listing(&self) {
        self.always_fail_listing.store(true, Ordering::SeqCst);
    }

    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// `(id, since)` of every log fetch so far.
    pub fn log_calls(&self) -> Vec<(String, String)> {
        self.log_calls.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerClient for MockContainerClient {
    async fn running_containers(&self) -> Result<Vec<Container>, ContainerClientError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.listing_script.lock().pop_front().unwrap_or(true);
        if !scripted || self.always_fail_listing.load(Ordering::SeqCst) {
            return Err(server_error("daemon unreachable"));
        }
        Ok(self.containers.lock().clone())
    }

    async fn container_logs(
        &self,
        id: &str,
        since: &str,
        _tail: usize,
    ) -> Result<Vec<u8>, ContainerClientError> {
        self.log_calls
            .lock()
            .push((id.to_string(), since.to_string()));
        if self.failing_logs.lock().contains(id) {
            return Err(server_error("no such container"));
        }
        Ok(self.logs.lock().get(id).cloned().unwrap_or_default())
    }

    async fn close(&self) -> Result<(), ContainerClientError> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(server_error("close failed"));
        }
        Ok(())
    }
}
