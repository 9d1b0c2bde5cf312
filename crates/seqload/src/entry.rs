use core::fmt;
use num_bigint::BigUint;
use num_traits::{One, Zero};

/// Identifies one independent generation loop.
///
/// Partition `n` of a pool of `N` workers is always `PartitionId(n)` with
/// `n < N`. Each partition owns its own checkpoint and write scope.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(pub u32);

impl PartitionId {
    /// Returns the raw numeric id.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PartitionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// One computed term of a sequence, as persisted in the durable table.
///
/// Entries are append-only: a partition never rewrites an existing position,
/// it only adds the next one.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceEntry {
    pub partition: PartitionId,
    pub position: BigUint,
    pub value: BigUint,
}

impl SequenceEntry {
    pub fn new(partition: PartitionId, position: BigUint, value: BigUint) -> Self {
        Self {
            partition,
            position,
            value,
        }
    }

    /// Drops the partition, keeping the resume point.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            position: self.position.clone(),
            value: self.value.clone(),
        }
    }
}

/// The last known `(position, value)` of a partition.
///
/// Ordering is by position first, then value, which is the order a single
/// partition writes its entries in.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checkpoint {
    pub position: BigUint,
    pub value: BigUint,
}

impl Checkpoint {
    pub fn new(position: impl Into<BigUint>, value: impl Into<BigUint>) -> Self {
        Self {
            position: position.into(),
            value: value.into(),
        }
    }

    /// Checkpoint of an empty partition: position zero holding `seed`.
    pub fn seed(value: BigUint) -> Self {
        Self {
            position: BigUint::zero(),
            value,
        }
    }

    /// Builds the entry that follows this checkpoint in `partition`.
    pub fn successor(&self, partition: PartitionId, value: BigUint) -> SequenceEntry {
        SequenceEntry {
            partition,
            position: &self.position + BigUint::one(),
            value,
        }
    }
}

impl From<SequenceEntry> for Checkpoint {
    fn from(entry: SequenceEntry) -> Self {
        Self {
            position: entry.position,
            value: entry.value,
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}={}", self.position, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successor_advances_position_only() {
        let cp = Checkpoint::new(4u32, 7u32);
        let next = cp.successor(PartitionId(3), BigUint::from(11u32));
        assert_eq!(next.partition, PartitionId(3));
        assert_eq!(next.position, BigUint::from(5u32));
        assert_eq!(next.value, BigUint::from(11u32));
        assert_eq!(next.checkpoint(), Checkpoint::new(5u32, 11u32));
    }

    #[test]
    fn checkpoints_order_by_position_first() {
        let early = Checkpoint::new(2u32, 100u32);
        let late = Checkpoint::new(3u32, 1u32);
        assert!(early < late);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn entry_serde_preserves_big_values() {
        let value = BigUint::parse_bytes(b"354224848179261915075", 10).unwrap();
        let entry = SequenceEntry::new(PartitionId(1), BigUint::from(100u32), value);
        let json = serde_json::to_string(&entry).unwrap();
        let back: SequenceEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
