//! Wire formats for the duplex channel and the budget HTTP endpoints.

mod requests;
mod wire;

pub use requests::*;
pub use wire::*;
