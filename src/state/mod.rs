//! Assistant status and the shared state cells
//!
//! - `machine`: the status state machine and microphone gate, owned by the
//!   orchestrator
//! - `store`: single-writer file cells read by the capture bridge and
//!   presentation observers

mod machine;
mod store;

pub use machine::{AssistantState, StateMachine};
pub(crate) use store::{read_cell, write_cell};
pub use store::{StateStore, StoreError};
