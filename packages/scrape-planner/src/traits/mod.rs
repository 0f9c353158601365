//! Trait seams to the collaborators the core consumes.
//!
//! - `CompletionService`: learned-model completions (JSON responses)
//! - `KeyValueStore`: durable hash/list store for plans and status
//! - `PageProvider`: browser/DOM provider handing out page snapshots
//! - `PlanExecutor`: the extraction pipeline that runs approved plans

pub mod completion;
pub mod executor;
pub mod page;
pub mod store;
