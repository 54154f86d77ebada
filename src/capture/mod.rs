//! Output capture store shared across supervised runs.

mod store;

pub use store::*;
