//! Task module - the batch of subqueries the orchestrator works through.
//!
//! - `task`: one `(description, sql, result)` record
//! - `batch`: ordered, id-keyed collection with order-preserving JSON form
//! - `context`: retrieved text plus finished tasks for later generations
//! - `store`: atomic JSON snapshots

mod batch;
mod context;
mod store;
pub mod task;

pub use batch::{strip_code_fence, TaskBatch};
pub use context::{BatchContext, PriorTask};
pub use store::{StoreError, TaskStore};
pub use task::{Task, TaskError};
