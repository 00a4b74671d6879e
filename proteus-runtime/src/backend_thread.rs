//! Dedicated worker threads for backend execution
//!
//! A [`BackendThread`] is a single OS thread draining a FIFO of typed
//! [`Payload`]s for one or more instances pinned to the same device.
//! Payloads execute strictly in enqueue order; instances sharing a
//! thread under device-blocking therefore serialize against each other
//! in arrival order.
//!
//! Destruction enqueues a sentinel `Exit` payload and joins; `Exit`
//! must be the last payload the thread observes.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use proteus::{Error, InferenceRequest, Result};
use tracing::debug;

use crate::instance::ModelInstance;

/// Depth of a worker thread's payload FIFO. Enqueues block when full.
const PAYLOAD_QUEUE_DEPTH: usize = 1024;

/// Nice level requested for worker threads. Carried for logging and for
/// backends that key off the current-thread context; the process does
/// not adjust OS scheduling itself.
pub(crate) const BACKEND_THREAD_NICE: i32 = 5;

/// Completion side of a payload: resolves exactly once with the
/// operation's status.
pub(crate) type StatusReceiver = mpsc::Receiver<Result<()>>;

pub(crate) enum PayloadOp {
    Init,
    WarmUp,
    InferRun,
    Exit,
}

/// A unit of work on a backend thread's queue.
pub(crate) struct Payload {
    op: PayloadOp,
    instance: Option<Arc<ModelInstance>>,
    requests: Vec<InferenceRequest>,
    on_completion: Option<Box<dyn FnOnce() + Send>>,
    status_tx: mpsc::SyncSender<Result<()>>,
}

impl Payload {
    /// A payload with no request batch (`Init`, `WarmUp`).
    pub(crate) fn new(op: PayloadOp, instance: Arc<ModelInstance>) -> (Self, StatusReceiver) {
        let (status_tx, status_rx) = mpsc::sync_channel(1);
        (
            Self {
                op,
                instance: Some(instance),
                requests: Vec::new(),
                on_completion: None,
                status_tx,
            },
            status_rx,
        )
    }

    /// An `InferRun` payload. The status receiver is typically dropped
    /// by the caller: inference completion is reported through
    /// `on_completion` and per-request responses, never through the
    /// payload signal.
    pub(crate) fn infer_run(
        instance: Arc<ModelInstance>,
        requests: Vec<InferenceRequest>,
        on_completion: Box<dyn FnOnce() + Send>,
    ) -> (Self, StatusReceiver) {
        let (status_tx, status_rx) = mpsc::sync_channel(1);
        (
            Self {
                op: PayloadOp::InferRun,
                instance: Some(instance),
                requests,
                on_completion: Some(on_completion),
                status_tx,
            },
            status_rx,
        )
    }

    /// The shutdown sentinel.
    pub(crate) fn exit() -> Self {
        let (status_tx, _status_rx) = mpsc::sync_channel(1);
        Self {
            op: PayloadOp::Exit,
            instance: None,
            requests: Vec::new(),
            on_completion: None,
            status_tx,
        }
    }

    /// Run the payload on the worker thread. Publishes the status for
    /// every operation except `Exit`, which only flips `should_exit`.
    fn execute(self, should_exit: &mut bool) {
        let status = match self.op {
            PayloadOp::Exit => {
                *should_exit = true;
                return;
            }
            PayloadOp::Init => match &self.instance {
                Some(instance) => instance.initialize_func(),
                None => Err(Error::internal("INIT payload without a target instance")),
            },
            PayloadOp::WarmUp => match &self.instance {
                Some(instance) => instance.warm_up_func(),
                None => Err(Error::internal("WARM_UP payload without a target instance")),
            },
            PayloadOp::InferRun => match &self.instance {
                Some(instance) => {
                    instance.schedule_func(self.requests, self.on_completion);
                    Ok(())
                }
                None => Err(Error::internal("INFER_RUN payload without a target instance")),
            },
        };
        // The receiver may be gone (fire-and-forget INFER_RUN).
        let _ = self.status_tx.send(status);
    }
}

/// One worker thread with a bounded FIFO of payloads.
///
/// Shared (`Arc`) between all instances it serves; the last instance
/// reference dropping triggers `Exit` + join.
pub struct BackendThread {
    name: String,
    device_id: i32,
    queue_tx: mpsc::SyncSender<Payload>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl BackendThread {
    /// Spawn a worker thread.
    ///
    /// # Errors
    /// `Internal` when the OS refuses to create the thread; this aborts
    /// the model load.
    pub(crate) fn new(name: &str, nice: i32, device_id: i32) -> Result<Arc<Self>> {
        let (queue_tx, queue_rx) = mpsc::sync_channel(PAYLOAD_QUEUE_DEPTH);
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(format!("backend-{name}"))
            .spawn(move || backend_thread_loop(&thread_name, nice, device_id, &queue_rx))
            .map_err(|e| {
                Error::internal(format!("failed to create backend thread for '{name}': {e}"))
            })?;

        Ok(Arc::new(Self {
            name: name.to_string(),
            device_id,
            queue_tx,
            thread: Mutex::new(Some(handle)),
        }))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn device_id(&self) -> i32 {
        self.device_id
    }

    /// Enqueue a payload. Blocks when the FIFO is full.
    ///
    /// # Errors
    /// `Internal` when the worker thread is no longer running.
    pub(crate) fn enqueue(&self, payload: Payload) -> Result<()> {
        self.queue_tx.send(payload).map_err(|_| {
            Error::internal(format!(
                "backend thread '{}' exited before accepting payload",
                self.name
            ))
        })
    }
}

impl Drop for BackendThread {
    fn drop(&mut self) {
        // No further enqueues are possible once the last owner drops,
        // so Exit is guaranteed to be the final payload observed.
        let _ = self.queue_tx.send(Payload::exit());
        if let Some(handle) = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
    }
}

fn backend_thread_loop(name: &str, nice: i32, device_id: i32, queue: &mpsc::Receiver<Payload>) {
    debug!(
        thread = name,
        nice, device_id, "starting backend thread"
    );

    let mut should_exit = false;
    while !should_exit {
        match queue.recv() {
            Ok(payload) => payload.execute(&mut should_exit),
            // All senders gone without an Exit sentinel; nothing left
            // to execute either way.
            Err(_) => break,
        }
    }

    debug!(thread = name, "stopping backend thread");
}
