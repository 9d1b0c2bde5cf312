use crate::{PartitionId, Result, SequenceEntry};
use async_trait::async_trait;

/// Hash key attribute holding the partition id.
pub const PARTITION_ATTR: &str = "partition";
/// Range key attribute holding the position within the partition.
pub const POSITION_ATTR: &str = "position";
/// Attribute holding the term's value as decimal text.
pub const VALUE_ATTR: &str = "value";

/// Role of an attribute in the table's primary key.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Hash,
    Range,
}

/// Scalar type of a key attribute.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    String,
    Number,
    Binary,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyElement {
    pub attribute_name: String,
    pub key_type: KeyType,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeDefinition {
    pub attribute_name: String,
    pub attribute_type: AttributeType,
}

/// Capacity settings carried across a rebuild.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Throughput {
    Provisioned { read_units: i64, write_units: i64 },
    OnDemand,
}

/// Everything needed to recreate an empty table identical to the old one.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableSchema {
    pub key_schema: Vec<KeyElement>,
    pub attribute_definitions: Vec<AttributeDefinition>,
    pub throughput: Throughput,
}

impl TableSchema {
    /// `partition` (number) as hash key, `position` (number) as range key.
    pub fn partitioned_sequence(throughput: Throughput) -> Self {
        Self {
            key_schema: vec![
                KeyElement {
                    attribute_name: PARTITION_ATTR.to_string(),
                    key_type: KeyType::Hash,
                },
                KeyElement {
                    attribute_name: POSITION_ATTR.to_string(),
                    key_type: KeyType::Range,
                },
            ],
            attribute_definitions: vec![
                AttributeDefinition {
                    attribute_name: PARTITION_ATTR.to_string(),
                    attribute_type: AttributeType::Number,
                },
                AttributeDefinition {
                    attribute_name: POSITION_ATTR.to_string(),
                    attribute_type: AttributeType::Number,
                },
            ],
            throughput,
        }
    }
}

/// A key/value table supporting point writes, partition-scoped queries and
/// destructive drop + recreate.
///
/// Implementations must be safe to call concurrently from every worker of
/// every pool. None of the operations retry on their own.
#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Writes one entry. Entries are never updated in place.
    async fn put_entry(&self, table: &str, entry: &SequenceEntry) -> Result<()>;

    /// Returns every entry written by `partition`, in no particular order.
    async fn query(&self, table: &str, partition: PartitionId) -> Result<Vec<SequenceEntry>>;

    /// Reads the key schema, attribute definitions and throughput.
    async fn describe_schema(&self, table: &str) -> Result<TableSchema>;

    /// Starts deleting the table. It may linger until
    /// [`SequenceStore::await_table_absent`] returns.
    async fn delete_table(&self, table: &str) -> Result<()>;

    /// Blocks until the store confirms the table no longer exists.
    async fn await_table_absent(&self, table: &str) -> Result<()>;

    /// Creates an empty table with the given schema.
    async fn create_table(&self, table: &str, schema: &TableSchema) -> Result<()>;
}
