//! One execution of a model

use super::config::RequestConfiguration;
use crate::error::{Error, IdentifierKind, Result};
use crate::model::compiled::OperandBuffers;
use crate::model::{operand, CompiledModel};
use crate::profiler::{RequestProfile, Timeline};
use crate::worker_pool::Job;
use gna_kernels::{
    AccelerationMode, CapabilityDetector, ExecutionContext, Kernel, KernelBuffers,
    KernelDispatchTable,
};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle of a request. `Completed`, `Failed` and `Abandoned` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    Created,
    Queued,
    Running,
    Completed,
    Failed,
    /// Dropped from the queue by a pool resize before it started.
    Abandoned,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Completed | RequestState::Failed | RequestState::Abandoned)
    }
}

/// Outcome reported by a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Completed,
    /// Completed, but kernels clamped this many values.
    Saturated { saturations: u32 },
    /// Not finished within the timeout; the request keeps running.
    Timeout,
}

/// Kernel and memory of one operation, fixed at submission.
#[derive(Debug)]
struct PreparedOperation {
    kernel: Kernel,
    mode: AccelerationMode,
    buffers: OperandBuffers,
    active_list: Option<Arc<[u32]>>,
}

#[derive(Debug)]
struct Progress {
    state: RequestState,
    saturations: u32,
    error: Option<Error>,
    timeline: Timeline,
}

/// Immutable snapshot of a configuration plus its execution state.
#[derive(Debug)]
pub struct Request {
    id: u32,
    config_id: u32,
    model: Arc<CompiledModel>,
    operations: Vec<PreparedOperation>,
    profiling: bool,
    progress: Mutex<Progress>,
    finished: Condvar,
}

impl Request {
    /// Snapshot `config`, resolving every operation's kernel for `requested`.
    pub(crate) fn prepare(
        id: u32,
        config: &RequestConfiguration,
        detector: &CapabilityDetector,
        requested: AccelerationMode,
    ) -> Result<Self> {
        config.validator().validate(config.id())?;

        let model = Arc::clone(config.model());
        let operations = model
            .operations()
            .iter()
            .enumerate()
            .map(|(index, operation)| -> Result<PreparedOperation> {
                let (mode, kernel) =
                    KernelDispatchTable::resolve(requested, detector.modes(), operation.kernels)
                        .map_err(|_| Error::AccelerationModeNotSupported(requested))?;
                let buffers = config.buffers(index).clone();
                check_output_alias(index, &buffers)?;
                Ok(PreparedOperation {
                    kernel,
                    mode,
                    buffers,
                    active_list: config.shared_active_list(index),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id,
            config_id: config.id(),
            model,
            operations,
            profiling: config.profiling(),
            progress: Mutex::new(Progress {
                state: RequestState::Created,
                saturations: 0,
                error: None,
                timeline: Timeline::new(),
            }),
            finished: Condvar::new(),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn config_id(&self) -> u32 {
        self.config_id
    }

    pub fn state(&self) -> RequestState {
        self.progress.lock().state
    }

    pub(crate) fn mark_queued(&self) {
        let mut progress = self.progress.lock();
        progress.state = RequestState::Queued;
        progress.timeline.queued = Instant::now();
    }

    /// Modes selected for each operation.
    pub fn acceleration_modes(&self) -> Vec<AccelerationMode> {
        self.operations.iter().map(|operation| operation.mode).collect()
    }

    /// Block until the request is terminal or `timeout` elapses.
    ///
    /// Waiting again on a terminal request returns the same outcome at once.
    pub fn wait(&self, timeout: Duration) -> Result<RequestStatus> {
        let deadline = Instant::now().checked_add(timeout);
        let mut progress = self.progress.lock();
        while !progress.state.is_terminal() {
            let timed_out = match deadline {
                Some(deadline) => self.finished.wait_until(&mut progress, deadline).timed_out(),
                None => {
                    self.finished.wait(&mut progress);
                    false
                }
            };
            if timed_out && !progress.state.is_terminal() {
                return Ok(RequestStatus::Timeout);
            }
        }

        match progress.state {
            RequestState::Completed if progress.saturations > 0 => Ok(RequestStatus::Saturated {
                saturations: progress.saturations,
            }),
            RequestState::Completed => Ok(RequestStatus::Completed),
            RequestState::Abandoned => Err(Error::not_found(IdentifierKind::Request, self.id)),
            _ => Err(progress.error.clone().unwrap_or_else(|| {
                Error::Internal(format!("request {} failed without an error", self.id))
            })),
        }
    }

    /// Timing of a finished request, when profiling was enabled.
    pub fn profile(&self) -> Option<RequestProfile> {
        if !self.profiling {
            return None;
        }
        let progress = self.progress.lock();
        if !progress.state.is_terminal() {
            return None;
        }
        RequestProfile::from_timeline(
            self.id,
            &progress.timeline,
            progress.saturations,
            self.acceleration_modes(),
        )
    }

    fn execute(&self, buffers: &mut KernelBuffers) -> Result<u32> {
        let mut context = ExecutionContext::new(buffers);
        for (compiled, prepared) in self.model.operations().iter().zip(&self.operations) {
            compiled.execute(
                prepared.kernel,
                &prepared.buffers,
                prepared.active_list.as_deref(),
                &mut context,
            )?;
        }
        Ok(context.saturations)
    }

    fn finish(&self, state: RequestState, saturations: u32, error: Option<Error>) {
        let mut progress = self.progress.lock();
        progress.state = state;
        progress.saturations = saturations;
        progress.error = error;
        progress.timeline.finished = Some(Instant::now());
        drop(progress);
        self.finished.notify_all();
    }
}

impl Job for Request {
    fn run(&self, buffers: &mut KernelBuffers) {
        {
            let mut progress = self.progress.lock();
            progress.state = RequestState::Running;
            progress.timeline.started = Some(Instant::now());
        }

        let operations = self.operations.len();
        let span = gna_tracing::perf_span!("request", request_id = self.id, operations = operations);
        let result = self.execute(buffers);
        let duration_us = span.elapsed_us();
        drop(span);

        match result {
            Ok(saturations) => {
                if saturations > 0 {
                    tracing::warn!(request_id = self.id, saturations, "request_saturated");
                }
                gna_tracing::performance::record_request(
                    self.id,
                    operations,
                    duration_us,
                    saturations,
                );
                self.finish(RequestState::Completed, saturations, None);
                if let Some(profile) = self.profile() {
                    profile.log();
                }
            }
            Err(error) => {
                tracing::error!(request_id = self.id, %error, "request_failed");
                self.finish(RequestState::Failed, 0, Some(error));
            }
        }
    }

    fn abandon(&self) {
        tracing::warn!(request_id = self.id, "request_abandoned");
        self.finish(RequestState::Abandoned, 0, None);
    }

    fn fail(&self, reason: &str) {
        if self.state().is_terminal() {
            return;
        }
        let error = Error::Internal(format!("request {} panicked: {reason}", self.id));
        self.finish(RequestState::Failed, 0, Some(error));
    }
}

/// Memory written by an operation may not be one of its inputs.
fn check_output_alias(operation: usize, buffers: &OperandBuffers) -> Result<()> {
    let Some(output) = buffers.get(operand::OUTPUT).and_then(Option::as_ref) else {
        return Ok(());
    };
    for (index, slot) in buffers.iter().enumerate() {
        if index != operand::OUTPUT && slot.as_ref().is_some_and(|buffer| buffer.ptr_eq(output)) {
            return Err(Error::BufferInvalid {
                operation: operation as u32,
                operand: index as u32,
                reason: "output memory may not also be read by the operation".into(),
            });
        }
    }
    Ok(())
}
