//! Job system: a worker pool with handle-based completion tracking.
//!
//! [`JobSystem`] owns a rayon thread pool. Executors open a [`JobScope`]
//! with [`JobSystem::scope`] and submit work through
//! [`JobScope::enqueue`], which returns a [`JobHandle`]. The handle is polled
//! with [`JobScope::is_completed`] and released with [`JobScope::reset`].
//! [`JobHandle::INVALID`] stands for "no job in flight".
//!
//! The scope runs on the calling thread (`in_place_scope`), so jobs may
//! borrow data owned by the caller, and it does not return before every job
//! submitted through it has finished.
//!
//! ## Completion
//!
//! A job always reports completion, including when its closure panics: the
//! panic is caught at the job boundary and kept as a [`JobFailure`] for
//! [`JobScope::take_failure`]. The completion flag is published with
//! release ordering and read with acquire ordering, so everything a job wrote
//! is visible to the thread that observes it completed.
//!
//! Each completion also bumps a generation counter guarded by a condition
//! variable; a driver with nothing to do can block on
//! [`JobScope::wait_for_completion`] instead of spinning.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use tracing::trace_span;

use crate::engine::error::{ConfigError, ExecutionError, SystemFailure};


/// Why a job did not finish successfully.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobFailure {
    /// The job returned an error.
    Error(ExecutionError),
    /// The job panicked; the payload rendered as text.
    Panic(String),
}

impl JobFailure {
    /// Attributes the failure to the system `system`.
    pub fn into_system_failure(self, system: &str) -> SystemFailure {
        match self {
            JobFailure::Error(error) => SystemFailure {
                system: system.to_owned(),
                message: error.to_string(),
                panicked: false,
            },
            JobFailure::Panic(message) => SystemFailure {
                system: system.to_owned(),
                message,
                panicked: true,
            },
        }
    }
}

/// Renders a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Runs `work`, turning an error return or a panic into a [`JobFailure`].
pub(crate) fn run_guarded<F>(work: F) -> Option<JobFailure>
where
    F: FnOnce() -> Result<(), ExecutionError>,
{
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(Ok(())) => None,
        Ok(Err(error)) => Some(JobFailure::Error(error)),
        Err(payload) => Some(JobFailure::Panic(panic_message(payload.as_ref()))),
    }
}

#[derive(Default)]
struct JobState {
    completed: AtomicBool,
    failure: Mutex<Option<JobFailure>>,
}

impl JobState {
    fn finish(&self, failure: Option<JobFailure>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = failure;
        self.completed.store(true, Ordering::Release);
    }
}

/// Generation counter bumped on every job completion.
#[derive(Default)]
struct CompletionSignal {
    generation: Mutex<u64>,
    condvar: Condvar,
}

impl CompletionSignal {
    fn notify(&self) {
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *generation = generation.wrapping_add(1);
        self.condvar.notify_all();
    }

    fn current(&self) -> u64 {
        *self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_for_change(&self, observed: u64, timeout: Duration) -> u64 {
        let generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        let (generation, _) = self
            .condvar
            .wait_timeout_while(generation, timeout, |current| *current == observed)
            .unwrap_or_else(PoisonError::into_inner);
        *generation
    }
}

/// Opaque token for a submitted job.
#[derive(Clone, Default)]
pub struct JobHandle {
    state: Option<Arc<JobState>>,
}

impl JobHandle {
    /// Sentinel for "no job in flight".
    pub const INVALID: JobHandle = JobHandle { state: None };

    /// Returns `false` for [`JobHandle::INVALID`] and reset handles.
    #[inline]
    pub fn is_valid(&self) -> bool { self.state.is_some() }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.state {
            None => f.write_str("JobHandle(invalid)"),
            Some(state) => write!(f, "JobHandle(completed: {})", state.completed.load(Ordering::Acquire)),
        }
    }
}

/// A unit of work for [`JobScope::enqueue`].
pub struct JobDescriptor<'scope> {
    label: &'scope str,
    work: Box<dyn FnOnce() -> Result<(), ExecutionError> + Send + 'scope>,
}

impl<'scope> JobDescriptor<'scope> {
    /// Wraps `work`; `label` names the job in trace output.
    pub fn new<F>(label: &'scope str, work: F) -> Self
    where
        F: FnOnce() -> Result<(), ExecutionError> + Send + 'scope,
    {
        Self { label, work: Box::new(work) }
    }
}

/// Worker pool shared by every stage of a frame driver.
pub struct JobSystem {
    pool: rayon::ThreadPool,
}

impl JobSystem {
    /// Builds a pool with `worker_threads` workers (rayon's default if `None`).
    pub fn new(worker_threads: Option<usize>) -> Result<Self, ConfigError> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|index| format!("titan-worker-{index}"));
        if let Some(threads) = worker_threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder.build().map_err(|e| ConfigError::ThreadPool(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize { self.pool.current_num_threads() }

    /// Opens a scope on the calling thread and passes it to `op`.
    ///
    /// Returns once `op` has returned and every job enqueued in the scope has
    /// finished.
    pub fn scope<'scope, OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce(&JobScope<'_, 'scope>) -> R,
    {
        let signal = Arc::new(CompletionSignal::default());
        self.pool.in_place_scope(|scope| {
            let jobs = JobScope { scope, signal };
            op(&jobs)
        })
    }
}

/// Submission interface valid for the duration of [`JobSystem::scope`].
pub struct JobScope<'a, 'scope> {
    scope: &'a rayon::Scope<'scope>,
    signal: Arc<CompletionSignal>,
}

impl<'scope> JobScope<'_, 'scope> {
    /// Submits a job to the worker pool.
    pub fn enqueue(&self, descriptor: JobDescriptor<'scope>) -> JobHandle {
        let state = Arc::new(JobState::default());
        let job_state = Arc::clone(&state);
        let signal = Arc::clone(&self.signal);
        let JobDescriptor { label, work } = descriptor;

        self.scope.spawn(move |_| {
            let failure = {
                let _span = trace_span!("job", name = label).entered();
                run_guarded(work)
            };
            job_state.finish(failure);
            signal.notify();
        });

        JobHandle { state: Some(state) }
    }

    /// Returns `true` once the job behind `handle` has finished.
    ///
    /// [`JobHandle::INVALID`] has no pending work and reports `true`.
    #[inline]
    pub fn is_completed(&self, handle: &JobHandle) -> bool {
        handle
            .state
            .as_ref()
            .map_or(true, |state| state.completed.load(Ordering::Acquire))
    }

    /// Takes the failure recorded by a completed job, if any.
    pub fn take_failure(&self, handle: &JobHandle) -> Option<JobFailure> {
        let state = handle.state.as_ref()?;
        if !state.completed.load(Ordering::Acquire) {
            return None;
        }
        state.failure.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Releases `handle`, leaving it equal to [`JobHandle::INVALID`].
    #[inline]
    pub fn reset(&self, handle: &mut JobHandle) {
        handle.state = None;
    }

    /// Current completion generation.
    #[inline]
    pub fn completion_generation(&self) -> u64 {
        self.signal.current()
    }

    /// Blocks until a job completes after `observed` was read, or `timeout`
    /// elapses. Returns the generation seen on wake-up.
    pub fn wait_for_completion(&self, observed: u64, timeout: Duration) -> u64 {
        self.signal.wait_for_change(observed, timeout)
    }
}
