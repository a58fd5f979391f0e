//! Shared protocol types for the Plinth dispatch core.

mod fanout;
mod gateway;
pub mod status;

pub use fanout::*;
pub use gateway::*;
