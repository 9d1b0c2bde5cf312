#![doc = include_str!("../README.md")]

mod checkpoint;
mod config;
mod entry;
mod error;
mod generator;
mod pool;
mod store;
mod supervisor;
mod worker;

pub use crate::checkpoint::*;
pub use crate::config::*;
pub use crate::entry::*;
pub use crate::error::*;
pub use crate::generator::*;
pub use crate::pool::*;
pub use crate::store::*;
pub use crate::supervisor::*;
pub use crate::worker::*;

// Downstream crates build and compare ceilings with the same big integer type.
pub use num_bigint::BigUint;
