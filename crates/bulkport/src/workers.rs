//! 👷 The worker units the dispatcher runs: one inserts a validated batch, the
//! other removes a chunk of previously imported records.
//!
//! Both are plain data (the task payload) plus a `Worker` impl. Both do their
//! store write and their history update inside the same commit guard, so a
//! removed worker either did both or neither.

mod bulk_insert;
mod history_remove;

pub use bulk_insert::BulkInsert;
pub use history_remove::ImportHistoryRemove;
