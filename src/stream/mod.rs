//! Event queue and the background reader that feeds it.

mod queue;
mod reader;

pub use queue::*;
pub use reader::*;
