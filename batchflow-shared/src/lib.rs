//! Types shared between batchflow crates.

pub mod errors;

pub use errors::{BatchflowError, BatchflowResult};
