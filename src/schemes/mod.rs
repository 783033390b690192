//! Built-in schemes: the simulation back-end and `res` name indirection.

pub mod res;
pub mod sim;

pub use res::{ResourceTable, RES_SCHEMES};
pub use sim::{SimBackend, SIM_SCHEME};
