//! Client-side stream consumer.
//!
//! Consumption can continue from an earlier [`StreamState`]: pass the state
//! returned by an interrupted stream together with the resumed frames.

mod reader;
mod state;

pub use reader::StreamConsumer;
pub use state::{Applied, FinalizedMessage, StreamState, ToolStatus};
