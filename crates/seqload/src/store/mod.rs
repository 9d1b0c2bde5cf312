//! The durable table the workers write into.
//!
//! [`SequenceStore`] is the only shared mutable resource of the system. It is
//! accessed without client-side locking: each partition writes its own keys
//! and readers tolerate duplicates and out-of-order entries.
//!
//! - [`MemoryStore`] - in-process tables, used by tests and local runs.
//! - [`DynamoStore`] - Amazon DynamoDB (feature `dynamodb`).

#[cfg(feature = "dynamodb")]
mod dynamodb;
mod interface;
mod memory;
#[cfg(test)]
pub(crate) mod testing;

#[cfg(feature = "dynamodb")]
pub use dynamodb::*;
pub use interface::*;
pub use memory::*;
