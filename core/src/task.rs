//! One request's lifecycle and the handle callers use to observe it.
//!
//! # Design
//! A task moves through `Created → Queued → Running` and then settles into
//! exactly one of `Succeeded`, `Failed` or `Cancelled` before reaching
//! `Finished`. The phase and the two cancellation flags share a single
//! `AtomicU8`, so "settle unless cancelled" and "cancel unless settled" are
//! each one compare-and-swap. Whichever lands first wins, and the handler
//! sees exactly one terminal callback.
//!
//! The `RequestHandle` holds only a `Weak` to that state. Once the task has
//! run and been dropped the handle reports it as finished and collectable.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ClientError, TransportError};
use crate::handler::{DecodeFailure, ResponseHandler};
use crate::http::{HttpRequest, HttpResponse};
use crate::transport::{TransferObserver, Transport};

const PHASE_MASK: u8 = 0b0000_0111;
const CANCEL_REQUESTED: u8 = 0b1000_0000;
const INTERRUPT_REQUESTED: u8 = 0b0100_0000;

/// Where a task is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskStatus {
    Created = 0,
    Queued = 1,
    Running = 2,
    Succeeded = 3,
    Failed = 4,
    Cancelled = 5,
    Finished = 6,
}

impl TaskStatus {
    fn from_bits(bits: u8) -> Self {
        match bits & PHASE_MASK {
            0 => TaskStatus::Created,
            1 => TaskStatus::Queued,
            2 => TaskStatus::Running,
            3 => TaskStatus::Succeeded,
            4 => TaskStatus::Failed,
            5 => TaskStatus::Cancelled,
            _ => TaskStatus::Finished,
        }
    }

    /// Whether the outcome has been decided.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Finished
        )
    }
}

pub(crate) struct TaskState {
    id: Uuid,
    bits: AtomicU8,
}

impl TaskState {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            bits: AtomicU8::new(TaskStatus::Created as u8),
        }
    }

    fn status(&self) -> TaskStatus {
        TaskStatus::from_bits(self.bits.load(Ordering::Acquire))
    }

    fn flags(&self) -> u8 {
        self.bits.load(Ordering::Acquire) & !PHASE_MASK
    }

    fn cancel_requested(&self) -> bool {
        self.flags() & CANCEL_REQUESTED != 0
    }

    fn interrupt_requested(&self) -> bool {
        self.flags() & (CANCEL_REQUESTED | INTERRUPT_REQUESTED) == CANCEL_REQUESTED | INTERRUPT_REQUESTED
    }

    /// Move to `to`, keeping the flags. Used for non-terminal transitions and
    /// for the final `Finished` step.
    fn enter(&self, to: TaskStatus) {
        let _ = self.bits.fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
            Some((bits & !PHASE_MASK) | to as u8)
        });
    }

    /// Settle as `outcome` unless a cancel got there first.
    fn settle(&self, outcome: TaskStatus) -> bool {
        self.bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                if bits & CANCEL_REQUESTED != 0 {
                    None
                } else {
                    Some((bits & !PHASE_MASK) | outcome as u8)
                }
            })
            .is_ok()
    }

    /// Request cancellation unless the outcome is already decided or a
    /// cancel was already recorded.
    fn cancel(&self, may_interrupt: bool) -> bool {
        let flags = if may_interrupt {
            CANCEL_REQUESTED | INTERRUPT_REQUESTED
        } else {
            CANCEL_REQUESTED
        };
        self.bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                if bits & CANCEL_REQUESTED != 0 || TaskStatus::from_bits(bits).is_settled() {
                    None
                } else {
                    Some(bits | flags)
                }
            })
            .is_ok()
    }
}

/// A caller's view of a dispatched request.
///
/// Cheap to clone. Holds no strong reference to the task, so keeping a handle
/// around never keeps the request (or its handler) alive.
#[derive(Clone)]
pub struct RequestHandle {
    id: Uuid,
    state: Weak<TaskState>,
}

impl RequestHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Ask the task to stop. Returns false if it already settled, was already
    /// cancelled, or is gone. With `may_interrupt` an interruptible transport
    /// may also abort mid-transfer.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        match self.state.upgrade() {
            Some(state) => {
                let cancelled = state.cancel(may_interrupt);
                if cancelled {
                    debug!(task = %self.id, may_interrupt, "cancel requested");
                }
                cancelled
            }
            None => false,
        }
    }

    /// True once the task ran `on_finish`, or when its state was reclaimed.
    pub fn is_finished(&self) -> bool {
        self.state
            .upgrade()
            .map_or(true, |state| state.status() == TaskStatus::Finished)
    }

    /// True if a cancel was accepted. Unknown, and so false, once the task's
    /// state has been reclaimed.
    pub fn is_cancelled(&self) -> bool {
        self.state.upgrade().is_some_and(|state| state.cancel_requested())
    }

    /// True when nothing is left to observe: the task is finished, cancelled,
    /// or already dropped.
    pub fn should_be_garbage_collected(&self) -> bool {
        match self.state.upgrade() {
            Some(state) => state.cancel_requested() || state.status() == TaskStatus::Finished,
            None => true,
        }
    }

    /// Current phase, or `None` once the task is gone.
    pub fn status(&self) -> Option<TaskStatus> {
        self.state.upgrade().map(|state| state.status())
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Forwards transport events to the handler while the task is live.
struct TaskObserver<'a, H> {
    handler: &'a H,
    state: &'a TaskState,
}

impl<H: ResponseHandler> TransferObserver for TaskObserver<'_, H> {
    fn on_progress(&self, transferred: u64, total: Option<u64>) {
        if !self.state.cancel_requested() {
            self.handler.on_progress(transferred, total);
        }
    }

    fn on_retry(&self, attempt: u32) {
        if !self.state.cancel_requested() {
            self.handler.on_retry(attempt);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.state.interrupt_requested()
    }
}

enum Outcome<B> {
    Success {
        status: u16,
        headers: Vec<(String, String)>,
        body: B,
    },
    Failure {
        status: u16,
        headers: Vec<(String, String)>,
        body: Option<B>,
        cause: ClientError,
    },
}

/// One request bound to its transport and handler.
pub struct RequestTask<H: ResponseHandler> {
    request: HttpRequest,
    transport: Arc<dyn Transport>,
    handler: Arc<H>,
    state: Arc<TaskState>,
}

impl<H: ResponseHandler> RequestTask<H> {
    pub fn new(request: HttpRequest, transport: Arc<dyn Transport>, handler: Arc<H>) -> Self {
        Self {
            request,
            transport,
            handler,
            state: Arc::new(TaskState::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.state.id
    }

    pub fn handle(&self) -> RequestHandle {
        RequestHandle {
            id: self.state.id,
            state: Arc::downgrade(&self.state),
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.state.status()
    }

    /// Announce the request to its handler and mark it queued. Runs on the
    /// dispatching thread, before the task is handed to an executor.
    pub fn admit(&self) {
        self.handler.on_start();
        self.handler.on_request_headers(&self.request.effective_headers());
        self.state.enter(TaskStatus::Queued);
        debug!(task = %self.state.id, method = %self.request.method, url = %self.request.url, "queued");
    }

    /// Execute the request and deliver exactly one terminal callback followed
    /// by `on_finish`.
    pub fn run(self) {
        let id = self.state.id;
        if self.state.cancel_requested() {
            debug!(task = %id, "cancelled before start");
            self.conclude_cancelled();
            return;
        }

        self.state.enter(TaskStatus::Running);
        debug!(task = %id, "running");

        let observer = TaskObserver {
            handler: &*self.handler,
            state: &self.state,
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.transport.execute(&self.request, &observer)
        }))
        .unwrap_or_else(|_| Err(TransportError::new("transport panicked").into()));

        let outcome = match result {
            Ok(response) => self.classify(response),
            Err(cause) => Outcome::Failure {
                status: 0,
                headers: Vec::new(),
                body: None,
                cause,
            },
        };

        match outcome {
            Outcome::Success {
                status,
                headers,
                body,
            } => {
                if self.state.settle(TaskStatus::Succeeded) {
                    debug!(task = %id, status, "succeeded");
                    self.handler.on_success(status, &headers, body);
                    self.finish();
                } else {
                    warn!(task = %id, status, "response suppressed after cancel");
                    self.conclude_cancelled();
                }
            }
            Outcome::Failure {
                status,
                headers,
                body,
                cause,
            } => {
                if self.state.settle(TaskStatus::Failed) {
                    warn!(task = %id, status, %cause, "failed");
                    self.handler.on_failure(status, &headers, body, &cause);
                    self.finish();
                } else {
                    warn!(task = %id, %cause, "failure suppressed after cancel");
                    self.conclude_cancelled();
                }
            }
        }
    }

    fn classify(&self, response: HttpResponse) -> Outcome<H::Body> {
        let HttpResponse {
            status,
            headers,
            body,
        } = response;
        let success = self.handler.is_success(status);
        match self.handler.decode(&body) {
            Ok(decoded) if success => Outcome::Success {
                status,
                headers,
                body: decoded,
            },
            Ok(decoded) => Outcome::Failure {
                status,
                headers,
                body: Some(decoded),
                cause: ClientError::Status(status),
            },
            Err(DecodeFailure { error, partial }) if success => Outcome::Failure {
                status,
                headers,
                body: partial,
                cause: error,
            },
            Err(DecodeFailure { partial, .. }) => Outcome::Failure {
                status,
                headers,
                body: partial,
                cause: ClientError::Status(status),
            },
        }
    }

    fn conclude_cancelled(&self) {
        self.state.enter(TaskStatus::Cancelled);
        self.handler.on_cancel();
        self.finish();
    }

    fn finish(&self) {
        self.handler.on_finish();
        self.state.enter(TaskStatus::Finished);
        debug!(task = %self.state.id, "finished");
    }
}
