use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::structure::duration::Duration;

/// Reliability: does the writer retransmit until acknowledged.
/// Offered RELIABLE satisfies requested BEST_EFFORT, not vice versa.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reliability {
  BestEffort,
  Reliable {
    /// How long `write` may block when the history cache is full.
    max_blocking_time: Duration,
  },
}

impl Reliability {
  // wire kind values, DDS-RTPS mapping Table 9.4
  pub(crate) fn kind_value(&self) -> i32 {
    match self {
      Self::BestEffort => 1,
      Self::Reliable { .. } => 2,
    }
  }

  fn rank(&self) -> u8 {
    match self {
      Self::BestEffort => 0,
      Self::Reliable { .. } => 1,
    }
  }

  pub fn is_reliable(&self) -> bool {
    matches!(self, Self::Reliable { .. })
  }

  /// writer `self` offers at least what reader `requested` asks
  pub fn offers_at_least(&self, requested: &Self) -> bool {
    self.rank() >= requested.rank()
  }
}

/// Durability: how long samples outlive their write.
#[derive(
  Copy, Clone, Debug, PartialOrd, PartialEq, Ord, Eq, Serialize_repr, Deserialize_repr,
)]
#[repr(i32)]
pub enum Durability {
  Volatile = 0,
  TransientLocal = 1,
  Transient = 2,
  Persistent = 3,
}

/// History retention policy of a HistoryCache.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum History {
  KeepLast { depth: i32 },
  KeepAll,
}

impl Default for History {
  fn default() -> Self {
    Self::KeepLast { depth: 1 }
  }
}

/// Resource bounds of a HistoryCache. Zero (or negative) means
/// unlimited.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
  pub max_samples: i32,
  pub max_instances: i32,
  pub max_samples_per_instance: i32,
}

/// Maximum period between consecutive samples of one instance.
#[derive(Copy, Clone, Debug, PartialOrd, PartialEq, Ord, Eq, Serialize, Deserialize)]
pub struct Deadline(pub Duration);

impl Default for Deadline {
  fn default() -> Self {
    Self(Duration::INFINITE)
  }
}

/// Samples expire this long after their source timestamp.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifespan {
  pub duration: Duration,
}

impl Default for Lifespan {
  fn default() -> Self {
    Self {
      duration: Duration::INFINITE,
    }
  }
}

/// How a writer asserts it is still alive.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Liveliness {
  Automatic { lease_duration: Duration },
  ManualByParticipant { lease_duration: Duration },
  ManualByTopic { lease_duration: Duration },
}

impl Liveliness {
  pub fn lease_duration(&self) -> Duration {
    match self {
      Self::Automatic { lease_duration }
      | Self::ManualByParticipant { lease_duration }
      | Self::ManualByTopic { lease_duration } => *lease_duration,
    }
  }

  pub(crate) fn kind_value(&self) -> i32 {
    match self {
      Self::Automatic { .. } => 0,
      Self::ManualByParticipant { .. } => 1,
      Self::ManualByTopic { .. } => 2,
    }
  }

  fn rank(&self) -> u8 {
    self.kind_value() as u8
  }

  /// offered `self` satisfies `requested` when the kind is at least as
  /// strict and the lease at most as long
  pub fn offers_at_least(&self, requested: &Self) -> bool {
    self.rank() >= requested.rank() && self.lease_duration() <= requested.lease_duration()
  }
}

impl Default for Liveliness {
  fn default() -> Self {
    Self::Automatic {
      lease_duration: Duration::INFINITE,
    }
  }
}

/// Instance ownership: shared, or exclusive to the strongest writer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ownership {
  Shared,
  Exclusive { strength: i32 },
}

impl Ownership {
  pub fn kind_matches(&self, other: &Self) -> bool {
    matches!(
      (self, other),
      (Self::Shared, Self::Shared) | (Self::Exclusive { .. }, Self::Exclusive { .. })
    )
  }

  pub(crate) fn kind_value(&self) -> i32 {
    match self {
      Self::Shared => 0,
      Self::Exclusive { .. } => 1,
    }
  }
}

/// Logical partitions within a domain. An empty list is the default
/// partition, which only matches another empty list or an explicit "".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
  pub partitions: Vec<String>,
}

impl Partition {
  pub fn intersects(&self, other: &Self) -> bool {
    match (self.partitions.is_empty(), other.partitions.is_empty()) {
      (true, true) => true,
      (true, false) => other.partitions.iter().any(String::is_empty),
      (false, true) => self.partitions.iter().any(String::is_empty),
      (false, false) => self
        .partitions
        .iter()
        .any(|p| other.partitions.contains(p)),
    }
  }
}

/// Opaque application data attached to an endpoint or participant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserData {
  pub data: Vec<u8>,
}

/// Opaque application data attached to a topic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicData {
  pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reliability_ordering() {
    let reliable = Reliability::Reliable {
      max_blocking_time: Duration::from_millis(100),
    };
    assert!(reliable.offers_at_least(&Reliability::BestEffort));
    assert!(reliable.offers_at_least(&reliable));
    assert!(!Reliability::BestEffort.offers_at_least(&reliable));
  }

  #[test]
  fn durability_is_totally_ordered() {
    assert!(Durability::Persistent > Durability::Transient);
    assert!(Durability::Transient > Durability::TransientLocal);
    assert!(Durability::TransientLocal > Durability::Volatile);
  }

  #[test]
  fn liveliness_lease_tightens_offer() {
    let offered = Liveliness::Automatic {
      lease_duration: Duration::from_secs(5),
    };
    let requested = Liveliness::Automatic {
      lease_duration: Duration::from_secs(10),
    };
    assert!(offered.offers_at_least(&requested));
    assert!(!requested.offers_at_least(&offered));
  }

  #[test]
  fn partition_rules() {
    let empty = Partition::default();
    let ab = Partition {
      partitions: vec!["A".into(), "B".into()],
    };
    let bc = Partition {
      partitions: vec!["B".into(), "C".into()],
    };
    let with_default = Partition {
      partitions: vec![String::new()],
    };
    assert!(empty.intersects(&empty));
    assert!(ab.intersects(&bc));
    assert!(!ab.intersects(&Partition {
      partitions: vec!["C".into()],
    }));
    assert!(!empty.intersects(&ab));
    assert!(empty.intersects(&with_default));
  }
}
