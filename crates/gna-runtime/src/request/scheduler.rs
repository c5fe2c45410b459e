//! Request submission and waiting
//!
//! The scheduler assigns request ids, keeps every submitted request in an
//! id map until it is released and hands the work to the [`WorkerPool`].

use super::config::RequestConfiguration;
use super::execution::{Request, RequestState, RequestStatus};
use crate::error::{Error, IdentifierKind, Result};
use crate::profiler::RequestProfile;
use crate::worker_pool::WorkerPool;
use gna_kernels::{AccelerationMode, CapabilityDetector};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct RequestScheduler {
    requests: Mutex<HashMap<u32, Arc<Request>>>,
    next_id: AtomicU32,
    pool: WorkerPool,
}

impl RequestScheduler {
    pub fn new(thread_count: u32) -> Result<Self> {
        Ok(Self {
            requests: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            pool: WorkerPool::new(thread_count)?,
        })
    }

    /// Snapshot `config` into a new request and queue it.
    pub fn enqueue(
        &self,
        config: &RequestConfiguration,
        detector: &CapabilityDetector,
        mode: AccelerationMode,
    ) -> Result<u32> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = Arc::new(Request::prepare(id, config, detector, mode)?);
        request.mark_queued();
        self.requests.lock().insert(id, Arc::clone(&request));

        if let Err(error) = self.pool.enqueue(request) {
            self.requests.lock().remove(&id);
            return Err(error);
        }
        tracing::debug!(request_id = id, config_id = config.id(), %mode, "request_enqueued");
        Ok(id)
    }

    fn get(&self, id: u32) -> Result<Arc<Request>> {
        self.requests
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(IdentifierKind::Request, id))
    }

    /// Wait up to `timeout` for request `id` to finish.
    ///
    /// A timeout leaves the request running. Saturation is reported as
    /// [`RequestStatus::Saturated`], execution failures as errors.
    pub fn wait_for(&self, id: u32, timeout: Duration) -> Result<RequestStatus> {
        self.get(id)?.wait(timeout)
    }

    pub fn state(&self, id: u32) -> Result<RequestState> {
        Ok(self.get(id)?.state())
    }

    pub fn profile(&self, id: u32) -> Result<Option<RequestProfile>> {
        Ok(self.get(id)?.profile())
    }

    /// Forget a finished request; refused while it is queued or running.
    pub fn release(&self, id: u32) -> Result<()> {
        let mut requests = self.requests.lock();
        let request = requests
            .get(&id)
            .ok_or_else(|| Error::not_found(IdentifierKind::Request, id))?;
        let state = request.state();
        if !state.is_terminal() {
            return Err(Error::busy(IdentifierKind::Request, id, format!("request is {state:?}")));
        }
        requests.remove(&id);
        Ok(())
    }

    /// Requests derived from `config_id` that have not finished.
    pub fn outstanding_for_config(&self, config_id: u32) -> usize {
        self.requests
            .lock()
            .values()
            .filter(|request| request.config_id() == config_id && !request.state().is_terminal())
            .count()
    }

    pub fn outstanding(&self) -> usize {
        self.requests
            .lock()
            .values()
            .filter(|request| !request.state().is_terminal())
            .count()
    }

    /// Restart the pool with `thread_count` workers.
    ///
    /// Requests still queued are abandoned and forgotten, so later waits on
    /// them report the id as not found.
    pub fn set_thread_count(&self, thread_count: u32) -> Result<()> {
        let result = self.pool.set_thread_count(thread_count);
        self.purge_abandoned();
        result
    }

    pub fn thread_count(&self) -> usize {
        self.pool.thread_count()
    }

    pub fn live_buffers(&self) -> usize {
        self.pool.live_buffers()
    }

    /// Stop every worker; requests still queued are abandoned.
    pub fn stop_all(&self) {
        self.pool.stop();
        self.purge_abandoned();
    }

    fn purge_abandoned(&self) {
        let mut requests = self.requests.lock();
        let before = requests.len();
        requests.retain(|_, request| request.state() != RequestState::Abandoned);
        let purged = before - requests.len();
        if purged > 0 {
            tracing::warn!(purged, "abandoned_requests_purged");
        }
    }
}
