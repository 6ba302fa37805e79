//! Core types: group records, batching, tracing

pub mod batch;
pub mod group;
pub mod tracing;

pub use batch::{MAX_BATCH_SIZE, partition};
pub use group::{GroupRecord, GroupStore, JsonObject, MEMBERS_FIELD, group_key};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
