//! Request scheduling onto model instances
//!
//! The execution core treats schedulers opaquely: anything implementing
//! [`Scheduler`] can be attached to a model. [`DynamicBatchScheduler`]
//! is the standard implementation — FCFS admission on a single worker
//! thread, batches formed up to the model's `max_batch_size` with an
//! optional delay window, dispatched round-robin onto whichever
//! instances are idle.
//!
//! Dispatch is fire-and-forget: once a batch leaves the scheduler, the
//! only channel for errors is a per-request error response.

use std::collections::VecDeque;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use proteus::{Error, InferenceRequest, RequestState, Result};
use tracing::debug;

use crate::instance::ModelInstance;

/// Accepts requests for one model. `enqueue` consumes the request: on
/// an error return the request has already been released (its release
/// callback fired) and no response was emitted.
pub trait Scheduler: Send + Sync {
    /// Admit a request for eventual dispatch.
    ///
    /// # Errors
    /// Rejections are synchronous: unprepared requests, missing
    /// callbacks, or a scheduler that is shutting down.
    fn enqueue(&self, request: InferenceRequest) -> Result<()>;
}

enum Event {
    Request(Box<InferenceRequest>),
    InstanceIdle(usize),
    Exit,
}

/// FCFS batching scheduler over a fixed set of instances.
pub struct DynamicBatchScheduler {
    event_tx: mpsc::Sender<Event>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DynamicBatchScheduler {
    /// Spawn the scheduler worker over the given (non-passive)
    /// instances.
    ///
    /// `max_batch_size` of 0 disables batching: every dispatch carries
    /// exactly one request. `max_queue_delay` bounds how long a partial
    /// batch waits for more requests; zero dispatches immediately.
    ///
    /// # Errors
    /// `InvalidArgument` when no instances are supplied; `Internal`
    /// when the worker thread cannot be created.
    pub fn new(
        instances: Vec<Arc<ModelInstance>>,
        max_batch_size: i32,
        max_queue_delay: Duration,
    ) -> Result<Arc<Self>> {
        if instances.is_empty() {
            return Err(Error::invalid_arg(
                "scheduler requires at least one non-passive instance",
            ));
        }

        let (event_tx, event_rx) = mpsc::channel();
        let worker_tx = event_tx.clone();
        let idle = (0..instances.len()).collect();
        let worker = BatchWorker {
            event_rx,
            event_tx: worker_tx,
            instances,
            idle,
            pending: VecDeque::new(),
            pending_since: None,
            max_batch_size: u32::try_from(max_batch_size).unwrap_or(0),
            max_queue_delay,
        };

        let handle = thread::Builder::new()
            .name("dynamic-batcher".to_string())
            .spawn(move || worker.run())
            .map_err(|e| Error::internal(format!("failed to create scheduler thread: {e}")))?;

        Ok(Arc::new(Self {
            event_tx,
            worker: Mutex::new(Some(handle)),
        }))
    }
}

impl Scheduler for DynamicBatchScheduler {
    fn enqueue(&self, mut request: InferenceRequest) -> Result<()> {
        if request.state() < RequestState::Prepared {
            return Err(Error::invalid_arg(
                "inference request must be prepared before scheduling",
            ));
        }
        if request.response_factory().is_none() {
            return Err(Error::invalid_arg(
                "inference request must have a response callback",
            ));
        }
        if !request.has_release_callback() {
            return Err(Error::invalid_arg(
                "inference request must have a release callback",
            ));
        }

        request.capture_queue_start();
        request.mark_scheduled()?;
        self.event_tx
            .send(Event::Request(Box::new(request)))
            .map_err(|_| Error::unavailable("model scheduler is shutting down"))
    }
}

impl Drop for DynamicBatchScheduler {
    fn drop(&mut self) {
        let _ = self.event_tx.send(Event::Exit);
        if let Some(handle) = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
    }
}

struct BatchWorker {
    event_rx: mpsc::Receiver<Event>,
    event_tx: mpsc::Sender<Event>,
    instances: Vec<Arc<ModelInstance>>,
    /// Indices into `instances` with no batch in flight, in the order
    /// they became idle.
    idle: VecDeque<usize>,
    pending: VecDeque<InferenceRequest>,
    /// When the oldest pending request arrived; drives the delay
    /// window.
    pending_since: Option<Instant>,
    max_batch_size: u32,
    max_queue_delay: Duration,
}

impl BatchWorker {
    fn run(mut self) {
        debug!(
            instances = self.instances.len(),
            max_batch_size = self.max_batch_size,
            "scheduler worker started"
        );

        'outer: loop {
            let event = if self.waiting_for_window() {
                match self.event_rx.recv_timeout(self.remaining_window()) {
                    Ok(event) => Some(event),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            } else {
                match self.event_rx.recv() {
                    Ok(event) => Some(event),
                    Err(_) => break,
                }
            };

            if let Some(event) = event {
                if self.handle(event) {
                    break 'outer;
                }
            }
            // Coalesce whatever else arrived before forming batches.
            loop {
                match self.event_rx.try_recv() {
                    Ok(event) => {
                        if self.handle(event) {
                            break 'outer;
                        }
                    }
                    Err(_) => break,
                }
            }

            self.dispatch();
        }

        // Anything still queued was accepted but never dispatched.
        for request in self.pending.drain(..) {
            request.respond_with_error(&Error::unavailable("model is shutting down"));
        }
        debug!("scheduler worker stopped");
    }

    /// Returns true on the exit sentinel.
    fn handle(&mut self, event: Event) -> bool {
        match event {
            Event::Request(request) => {
                if self.pending.is_empty() {
                    self.pending_since = Some(Instant::now());
                }
                self.pending.push_back(*request);
                false
            }
            Event::InstanceIdle(idx) => {
                self.idle.push_back(idx);
                false
            }
            Event::Exit => true,
        }
    }

    fn pending_batch_total(&self) -> u32 {
        self.pending
            .iter()
            .map(|r| r.batch_size().max(1))
            .sum()
    }

    /// Whether a partial batch should keep waiting for the delay
    /// window instead of dispatching now.
    fn waiting_for_window(&self) -> bool {
        if self.pending.is_empty()
            || self.idle.is_empty()
            || self.max_queue_delay.is_zero()
            || self.max_batch_size == 0
        {
            return false;
        }
        if self.pending_batch_total() >= self.max_batch_size {
            return false;
        }
        self.pending_since
            .is_some_and(|since| since.elapsed() < self.max_queue_delay)
    }

    fn remaining_window(&self) -> Duration {
        self.pending_since.map_or(Duration::ZERO, |since| {
            self.max_queue_delay.saturating_sub(since.elapsed())
        })
    }

    fn dispatch(&mut self) {
        while !self.pending.is_empty() && !self.idle.is_empty() {
            if self.waiting_for_window() {
                return;
            }

            let batch = self.form_batch();
            if batch.is_empty() {
                return;
            }

            let Some(idx) = self.idle.pop_front() else {
                return;
            };
            let tx = self.event_tx.clone();
            debug!(
                instance = self.instances[idx].name(),
                requests = batch.len(),
                "dispatching batch"
            );
            self.instances[idx].schedule(batch, move || {
                // The scheduler may already be gone at completion time.
                let _ = tx.send(Event::InstanceIdle(idx));
            });

            self.pending_since = if self.pending.is_empty() {
                None
            } else {
                Some(Instant::now())
            };
        }
    }

    /// Pop requests FCFS while their combined batch size fits the
    /// model's limit. Non-batching models dispatch one request at a
    /// time.
    fn form_batch(&mut self) -> Vec<InferenceRequest> {
        let Some(first) = self.pending.pop_front() else {
            return Vec::new();
        };
        let mut batch = vec![first];
        if self.max_batch_size == 0 {
            return batch;
        }

        let mut total = batch[0].batch_size().max(1);
        while let Some(next) = self.pending.front() {
            let next_size = next.batch_size().max(1);
            if total + next_size > self.max_batch_size {
                break;
            }
            total += next_size;
            if let Some(next) = self.pending.pop_front() {
                batch.push(next);
            }
        }
        batch
    }
}
