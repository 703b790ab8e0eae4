//! Asynchronous, cancellable classification requests.
//!
//! The caller owns a [`RequestDispatcher`] on its own task (an event loop).
//! [`start`](RequestDispatcher::start) queues a request and returns at once;
//! a tokio task waits for a worker slot, claims the request, and runs the
//! cache probe and classification on the blocking pool. Results come back
//! over a channel and callbacks run on the caller's task when it drains them
//! with [`dispatch_completions`](RequestDispatcher::dispatch_completions) or
//! [`run_until_idle`](RequestDispatcher::run_until_idle).
//!
//! ## Request lifecycle
//!
//! ```text
//! Pending ──claim──▶ Running ──deliver──▶ Completed
//!    │
//!    └──cancel──▶ Cancelled   (no callback)
//! ```
//!
//! Cancellation is best-effort: once a worker has claimed a request it runs
//! to completion and its callback still fires.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::cache::TagCache;
use crate::database::MimeDatabase;
use crate::error::DispatchError;

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const COMPLETED: u8 = 2;
const CANCELLED: u8 = 3;

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Running,
    Completed,
    Cancelled,
}

impl RequestState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            PENDING => RequestState::Pending,
            RUNNING => RequestState::Running,
            COMPLETED => RequestState::Completed,
            _ => RequestState::Cancelled,
        }
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn transition(&self, from: u8, to: u8) -> bool {
        self.0
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Handle to one classification request.
#[derive(Debug, Clone)]
pub struct Request {
    id: u64,
    path: Arc<Path>,
    state: Arc<StateCell>,
}

impl Request {
    /// Identifier, unique per dispatcher.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The file being classified.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RequestState {
        RequestState::from_raw(self.state.0.load(Ordering::Acquire))
    }
}

/// Callback receiving a finished request and its type, if one was found.
pub type ResultCallback = Box<dyn FnOnce(&Request, Option<String>)>;

struct InFlight {
    request: Request,
    on_result: ResultCallback,
    task: JoinHandle<()>,
}

/// What every worker task needs a handle on. Dropped at shutdown.
struct Shared {
    db: Arc<MimeDatabase>,
    cache: Arc<dyn TagCache>,
}

#[derive(Debug)]
struct Completion {
    id: u64,
    mime_type: Option<String>,
}

/// Queues classification requests onto a bounded worker pool.
///
/// Must be used from within a tokio runtime.
pub struct RequestDispatcher {
    shared: Option<Shared>,
    workers: Arc<Semaphore>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    in_flight: HashMap<u64, InFlight>,
    next_id: u64,
}

impl RequestDispatcher {
    /// Create a dispatcher running at most `max_workers` classifications at once.
    pub fn new(db: Arc<MimeDatabase>, cache: Arc<dyn TagCache>, max_workers: usize) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            shared: Some(Shared { db, cache }),
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
            completion_tx,
            completion_rx,
            in_flight: HashMap::new(),
            next_id: 1,
        }
    }

    /// Queue a classification of `path`.
    ///
    /// `on_result` fires exactly once on the caller's task unless the request
    /// is cancelled before a worker picks it up.
    pub fn start<F>(
        &mut self,
        path: impl Into<PathBuf>,
        on_result: F,
    ) -> Result<Request, DispatchError>
    where
        F: FnOnce(&Request, Option<String>) + 'static,
    {
        let Some(shared) = &self.shared else {
            return Err(DispatchError::Closed);
        };
        let db = Arc::clone(&shared.db);
        let cache = Arc::clone(&shared.cache);

        let id = self.next_id;
        self.next_id += 1;

        let request = Request {
            id,
            path: Arc::from(path.into()),
            state: Arc::new(StateCell(AtomicU8::new(PENDING))),
        };

        let workers = Arc::clone(&self.workers);
        let tx = self.completion_tx.clone();
        let path = Arc::clone(&request.path);
        let state = Arc::clone(&request.state);

        let task = tokio::spawn(async move {
            let Ok(_permit) = workers.acquire_owned().await else {
                return;
            };
            if !state.transition(PENDING, RUNNING) {
                trace!(id, "Request cancelled before a worker claimed it");
                return;
            }

            let work_path = Arc::clone(&path);
            let mime_type =
                match tokio::task::spawn_blocking(move || resolve(&db, cache.as_ref(), &work_path))
                    .await
                {
                    Ok(found) => found,
                    Err(e) => {
                        warn!(id, path = %path.display(), error = %e, "Classification task failed");
                        None
                    }
                };

            let _ = tx.send(Completion { id, mime_type });
        });

        self.in_flight.insert(
            id,
            InFlight {
                request: request.clone(),
                on_result: Box::new(on_result),
                task,
            },
        );

        debug!(id, path = %request.path.display(), "Request queued");
        Ok(request)
    }

    /// Cancel a request that no worker has claimed yet.
    ///
    /// Returns `false` if the request is already running or finished, in which
    /// case its callback still fires.
    pub fn cancel(&mut self, request: &Request) -> bool {
        if request.state.transition(PENDING, CANCELLED) {
            if let Some(flight) = self.in_flight.remove(&request.id) {
                flight.task.abort();
            }
            debug!(id = request.id, "Request cancelled");
            true
        } else {
            false
        }
    }

    /// Deliver every completion that has already arrived, without waiting.
    ///
    /// Returns the number of callbacks invoked.
    pub fn dispatch_completions(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(completion) = self.completion_rx.try_recv() {
            if self.deliver(completion) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Wait for and deliver completions until no request is outstanding.
    pub async fn run_until_idle(&mut self) -> usize {
        let mut delivered = 0;
        while !self.in_flight.is_empty() {
            let Some(completion) = self.completion_rx.recv().await else {
                break;
            };
            if self.deliver(completion) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Requests that are neither completed nor cancelled.
    pub fn outstanding(&self) -> usize {
        self.in_flight.len()
    }

    /// Stop accepting requests and cancel every one still waiting for a worker.
    ///
    /// The dispatcher drops its handles on the database and cache; they are
    /// freed once the last running request finishes and no other owner holds
    /// them. Running requests keep going and their callbacks fire on the next
    /// drain. Returns the number of requests cancelled.
    pub fn shutdown(&mut self) -> usize {
        self.shared = None;
        self.workers.close();

        let pending: Vec<Request> = self
            .in_flight
            .values()
            .map(|f| f.request.clone())
            .collect();
        let cancelled = pending.iter().filter(|r| self.cancel(r)).count();
        debug!(cancelled, running = self.in_flight.len(), "Dispatcher shut down");
        cancelled
    }

    /// Has [`shutdown`](Self::shutdown) been called?
    pub fn is_closed(&self) -> bool {
        self.shared.is_none()
    }

    fn deliver(&mut self, completion: Completion) -> bool {
        let Some(InFlight {
            request, on_result, ..
        }) = self.in_flight.remove(&completion.id)
        else {
            return false;
        };
        request.state.0.store(COMPLETED, Ordering::Release);
        on_result(&request, completion.mime_type);
        true
    }
}

/// Worker-side body of a request: cache probe, then classification.
fn resolve(db: &MimeDatabase, cache: &dyn TagCache, path: &Path) -> Option<String> {
    if let Some(tag) = cache.lookup(path) {
        trace!(path = %path.display(), mime_type = %tag, "Tag cache hit");
        return Some(tag);
    }
    db.classify(path)
}
