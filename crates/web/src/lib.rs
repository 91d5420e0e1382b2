//! vizreg Web Layer
//!
//! REST routes for starting runs and reviewing diffs, plus a WebSocket
//! stream carrying the live session events of the active run.

pub mod error;
pub mod server;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use server::{router, serve};
pub use state::{AppState, RunStarted};
