//! Proteus runtime: per-model execution and scheduling
//!
//! This crate is the execution core of the server. It owns the life of
//! a model: replicated [`ModelInstance`]s pinned to devices, the
//! [`BackendThread`]s that serialize their execution, startup
//! [warmup](crate::warmup::WarmupSample), and the
//! [`DynamicBatchScheduler`] that shapes requests into batches.
//!
//! # Architecture
//!
//! ```text
//! Model                 ← config + schema + stats + instances
//!   ├── Scheduler       ← FCFS queue, batch formation, dispatch
//!   └── ModelInstance*  ← replica on a device, warmup samples, state
//!         └── BackendThread  ← FIFO of INIT/WARM_UP/INFER_RUN payloads
//!               └── Backend::instance_execute(batch)
//! ```
//!
//! Neural-network math never happens here: instances hand batches to a
//! [`Backend`] implementation and route the responses it produces.

pub mod backend;
pub mod backend_thread;
pub mod instance;
pub mod model;
pub mod scheduler;
pub mod stats;
pub mod warmup;

pub use backend::{Backend, ExecutionError};
pub use backend_thread::BackendThread;
pub use instance::{InstanceState, ModelInstance};
pub use model::Model;
pub use scheduler::{DynamicBatchScheduler, Scheduler};
pub use stats::{StatsAggregator, StatsSnapshot};
pub use warmup::WarmupSample;
