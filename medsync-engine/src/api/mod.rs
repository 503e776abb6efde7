//! HTTP control surface
//!
//! The narrow interface the surrounding service layer consumes: job
//! control per source, storage status, health, and an SSE event stream.

mod health;
mod sources;
mod sse;
mod storage;

pub use health::{health_check, health_routes};
pub use sources::source_routes;
pub use sse::event_stream;
pub use storage::storage_routes;
