use std::collections::{BTreeMap, HashMap, VecDeque};

#[allow(unused_imports)]
use log::{debug, error, trace, warn};

use crate::{
  qos::policy::{History, ResourceLimits},
  structure::{
    cache_change::{CacheChange, InstanceHandle},
    guid::GUID,
    sequence_number::SequenceNumber,
  },
};

/// Why [`HistoryCache::add_change`] refused a sample.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RejectedReason {
  SamplesLimit,
  InstancesLimit,
  SamplesPerInstanceLimit,
  BytesLimit,
}

/// Samples evicted to make room for an accepted change.
#[derive(Debug, Default)]
pub struct AddChangeOutcome {
  pub evicted: Vec<SequenceNumber>,
}

#[derive(Clone, Debug)]
pub struct HistoryCacheConfig {
  pub history: History,
  pub resource_limits: ResourceLimits,
  /// Upper bound on resident payload bytes in this cache.
  pub max_bytes: usize,
}

impl Default for HistoryCacheConfig {
  fn default() -> Self {
    Self {
      history: History::KeepAll,
      resource_limits: ResourceLimits::default(),
      max_bytes: usize::MAX,
    }
  }
}

/// Ordered per-endpoint store of [`CacheChange`]s, indexed by sequence
/// number and by instance. Both Writers and Readers keep their samples
/// here; the writer side additionally tracks per-reader acknowledgment
/// watermarks for the purge rule.
pub struct HistoryCache {
  config: HistoryCacheConfig,
  changes: BTreeMap<SequenceNumber, CacheChange>,
  // per-instance FIFO of resident sequence numbers, oldest first
  instances: HashMap<InstanceHandle, VecDeque<SequenceNumber>>,
  resident_bytes: usize,
  // writer side only: per matched reliable reader, highest acknowledged
  acked_watermarks: BTreeMap<GUID, SequenceNumber>,
}

impl HistoryCache {
  pub fn new(config: HistoryCacheConfig) -> Self {
    Self {
      config,
      changes: BTreeMap::new(),
      instances: HashMap::new(),
      resident_bytes: 0,
      acked_watermarks: BTreeMap::new(),
    }
  }

  pub fn len(&self) -> usize {
    self.changes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.changes.is_empty()
  }

  pub fn resident_bytes(&self) -> usize {
    self.resident_bytes
  }

  pub fn get_change(&self, seq: SequenceNumber) -> Option<&CacheChange> {
    self.changes.get(&seq)
  }

  pub fn get_min_seq(&self) -> Option<SequenceNumber> {
    self.changes.keys().next().copied()
  }

  pub fn get_max_seq(&self) -> Option<SequenceNumber> {
    self.changes.keys().next_back().copied()
  }

  /// Changes in ascending sequence number order.
  pub fn changes(&self) -> impl Iterator<Item = &CacheChange> {
    self.changes.values()
  }

  pub fn changes_from(
    &self,
    start: SequenceNumber,
  ) -> impl Iterator<Item = &CacheChange> {
    self.changes.range(start..).map(|(_, c)| c)
  }

  /// Append a change. KEEP_LAST evicts the oldest sample of the same
  /// instance (and oldest overall for the byte bound); KEEP_ALL rejects
  /// when any limit would be exceeded.
  pub fn add_change(
    &mut self,
    change: CacheChange,
  ) -> std::result::Result<AddChangeOutcome, RejectedReason> {
    if self.changes.contains_key(&change.sequence_number) {
      // writers assign strictly increasing numbers and readers dedup
      // before insertion, so a duplicate here is a caller bug
      warn!(
        "HistoryCache: duplicate sequence number {:?}, dropping",
        change.sequence_number
      );
      return Err(RejectedReason::SamplesLimit);
    }

    let mut outcome = AddChangeOutcome::default();
    let limits = self.config.resource_limits;
    let instance = change.instance_handle;
    let is_new_instance = !self.instances.contains_key(&instance);

    match self.config.history {
      History::KeepLast { depth } => {
        let per_instance = self.instances.get(&instance).map_or(0, VecDeque::len);
        if per_instance >= depth as usize {
          if let Some(oldest) = self
            .instances
            .get_mut(&instance)
            .and_then(VecDeque::pop_front)
          {
            self.remove_change_inner(oldest);
            outcome.evicted.push(oldest);
          }
        }
      }
      History::KeepAll => {
        if limits.max_samples > 0 && self.changes.len() >= limits.max_samples as usize {
          return Err(RejectedReason::SamplesLimit);
        }
        if limits.max_samples_per_instance > 0
          && self.instances.get(&instance).map_or(0, VecDeque::len)
            >= limits.max_samples_per_instance as usize
        {
          return Err(RejectedReason::SamplesPerInstanceLimit);
        }
      }
    }

    if is_new_instance
      && limits.max_instances > 0
      && self.instances.len() >= limits.max_instances as usize
    {
      return Err(RejectedReason::InstancesLimit);
    }

    // byte bound applies to both policies
    let incoming = change.payload_size();
    while self.resident_bytes + incoming > self.config.max_bytes {
      match self.config.history {
        History::KeepAll => return Err(RejectedReason::BytesLimit),
        History::KeepLast { .. } => match self.get_min_seq() {
          Some(oldest) => {
            self.remove_change(oldest);
            outcome.evicted.push(oldest);
          }
          None => return Err(RejectedReason::BytesLimit),
        },
      }
    }

    self.resident_bytes += incoming;
    self
      .instances
      .entry(instance)
      .or_default()
      .push_back(change.sequence_number);
    self.changes.insert(change.sequence_number, change);
    Ok(outcome)
  }

  /// Idempotent removal. The payload returns to its pool when the last
  /// holder of the change drops.
  pub fn remove_change(&mut self, seq: SequenceNumber) -> bool {
    let removed = self.remove_change_inner(seq);
    if removed {
      // also unlink from the instance FIFO
      self.instances.retain(|_, fifo| {
        fifo.retain(|s| *s != seq);
        !fifo.is_empty()
      });
    }
    removed
  }

  fn remove_change_inner(&mut self, seq: SequenceNumber) -> bool {
    match self.changes.remove(&seq) {
      Some(change) => {
        self.resident_bytes -= change.payload_size();
        true
      }
      None => false,
    }
  }

  /// Writer side: record that `reader` has acknowledged everything up to
  /// and including `up_to_seq`, then purge changes acknowledged by all
  /// registered readers. Watermarks never move backwards.
  pub fn acked_changes_set(&mut self, reader: GUID, up_to_seq: SequenceNumber) -> Vec<SequenceNumber> {
    match self.acked_watermarks.get_mut(&reader) {
      Some(w) => {
        if *w < up_to_seq {
          *w = up_to_seq;
        }
      }
      None => {
        self.acked_watermarks.insert(reader, up_to_seq);
      }
    }
    self.purge_fully_acked()
  }

  /// Writer side: start tracking a newly matched reliable reader.
  /// Nothing is considered acknowledged by it yet.
  pub fn register_reader(&mut self, reader: GUID) {
    self
      .acked_watermarks
      .entry(reader)
      .or_insert(SequenceNumber::ZERO);
  }

  /// Writer side: stop tracking an unmatched reader. Its watermark no
  /// longer holds back the purge.
  pub fn forget_reader(&mut self, reader: GUID) -> Vec<SequenceNumber> {
    self.acked_watermarks.remove(&reader);
    self.purge_fully_acked()
  }

  pub fn acked_up_to(&self, reader: GUID) -> Option<SequenceNumber> {
    self.acked_watermarks.get(&reader).copied()
  }

  fn purge_fully_acked(&mut self) -> Vec<SequenceNumber> {
    let Some(min_acked) = self.acked_watermarks.values().min().copied() else {
      return Vec::new(); // no reliable readers: retention is up to history depth
    };
    let purgeable: Vec<SequenceNumber> = self
      .changes
      .range(..=min_acked)
      .map(|(s, _)| *s)
      .collect();
    for seq in &purgeable {
      self.remove_change(*seq);
    }
    purgeable
  }

  /// Remove everything, e.g. on endpoint destruction or writer unmatch.
  pub fn clear(&mut self) {
    self.changes.clear();
    self.instances.clear();
    self.resident_bytes = 0;
  }
}

#[cfg(test)]
mod tests {
  use crate::structure::{
    cache_change::ChangeKind,
    guid::{EntityId, EntityKind, GuidPrefix},
    payload_pool::{PayloadPool, PayloadPoolConfig},
  };
  use super::*;

  fn writer_guid() -> GUID {
    GUID::new(
      GuidPrefix::new(&[1; 12]),
      EntityId::create_custom_entity_id([0, 0, 1], EntityKind::WRITER_WITH_KEY_USER_DEFINED),
    )
  }

  fn reader_guid(n: u8) -> GUID {
    GUID::new(
      GuidPrefix::new(&[n; 12]),
      EntityId::create_custom_entity_id([0, 0, 1], EntityKind::READER_WITH_KEY_USER_DEFINED),
    )
  }

  fn change(pool: &PayloadPool, seq: i64, instance: u8, size: usize) -> CacheChange {
    CacheChange::new(
      ChangeKind::Alive,
      writer_guid(),
      SequenceNumber::from(seq),
      InstanceHandle::from_serialized_key(&[instance]),
      Some(pool.get_payload(&vec![0xA5; size]).unwrap()),
    )
  }

  fn keep_last(depth: i32) -> HistoryCache {
    HistoryCache::new(HistoryCacheConfig {
      history: History::KeepLast { depth },
      ..Default::default()
    })
  }

  #[test]
  fn iteration_is_ordered_and_minmax_agree() {
    let pool = PayloadPool::new(PayloadPoolConfig::default());
    let mut cache = HistoryCache::new(HistoryCacheConfig::default());
    for seq in [1, 2, 5, 7] {
      cache.add_change(change(&pool, seq, 0, 4)).unwrap();
    }
    let seqs: Vec<i64> = cache.changes().map(|c| c.sequence_number.into()).collect();
    assert_eq!(seqs, vec![1, 2, 5, 7]);
    assert_eq!(cache.get_min_seq(), Some(SequenceNumber::from(1)));
    assert_eq!(cache.get_max_seq(), Some(SequenceNumber::from(7)));
  }

  #[test]
  fn keep_last_evicts_within_instance() {
    let pool = PayloadPool::new(PayloadPoolConfig::default());
    let mut cache = keep_last(2);
    cache.add_change(change(&pool, 1, 0, 4)).unwrap();
    cache.add_change(change(&pool, 2, 1, 4)).unwrap();
    cache.add_change(change(&pool, 3, 0, 4)).unwrap();
    // third sample of instance 0 evicts seq 1, instance 1 untouched
    let outcome = cache.add_change(change(&pool, 4, 0, 4)).unwrap();
    assert_eq!(outcome.evicted, vec![SequenceNumber::from(1)]);
    let seqs: Vec<i64> = cache.changes().map(|c| c.sequence_number.into()).collect();
    assert_eq!(seqs, vec![2, 3, 4]);
  }

  #[test]
  fn keep_all_rejects_on_sample_limit() {
    let pool = PayloadPool::new(PayloadPoolConfig::default());
    let mut cache = HistoryCache::new(HistoryCacheConfig {
      history: History::KeepAll,
      resource_limits: ResourceLimits {
        max_samples: 2,
        max_instances: 0,
        max_samples_per_instance: 0,
      },
      max_bytes: usize::MAX,
    });
    cache.add_change(change(&pool, 1, 0, 4)).unwrap();
    cache.add_change(change(&pool, 2, 0, 4)).unwrap();
    assert_eq!(
      cache.add_change(change(&pool, 3, 0, 4)).unwrap_err(),
      RejectedReason::SamplesLimit
    );
    // rejection leaves state unchanged
    assert_eq!(cache.len(), 2);
  }

  #[test]
  fn instance_limit_counts_distinct_keys() {
    let pool = PayloadPool::new(PayloadPoolConfig::default());
    let mut cache = HistoryCache::new(HistoryCacheConfig {
      history: History::KeepAll,
      resource_limits: ResourceLimits {
        max_samples: 0,
        max_instances: 2,
        max_samples_per_instance: 0,
      },
      max_bytes: usize::MAX,
    });
    cache.add_change(change(&pool, 1, 0, 4)).unwrap();
    cache.add_change(change(&pool, 2, 1, 4)).unwrap();
    cache.add_change(change(&pool, 3, 1, 4)).unwrap();
    assert_eq!(
      cache.add_change(change(&pool, 4, 2, 4)).unwrap_err(),
      RejectedReason::InstancesLimit
    );
  }

  #[test]
  fn byte_bound_keep_last_evicts_oldest() {
    let pool = PayloadPool::new(PayloadPoolConfig::default());
    let mut cache = HistoryCache::new(HistoryCacheConfig {
      history: History::KeepLast { depth: 10 },
      resource_limits: ResourceLimits::default(),
      max_bytes: 10,
    });
    cache.add_change(change(&pool, 1, 0, 4)).unwrap();
    cache.add_change(change(&pool, 2, 1, 4)).unwrap();
    let outcome = cache.add_change(change(&pool, 3, 2, 4)).unwrap();
    assert_eq!(outcome.evicted, vec![SequenceNumber::from(1)]);
    assert!(cache.resident_bytes() <= 10);
  }

  #[test]
  fn remove_change_is_idempotent() {
    let pool = PayloadPool::new(PayloadPoolConfig::default());
    let mut cache = HistoryCache::new(HistoryCacheConfig::default());
    cache.add_change(change(&pool, 1, 0, 4)).unwrap();
    assert!(cache.remove_change(SequenceNumber::from(1)));
    assert!(!cache.remove_change(SequenceNumber::from(1)));
    assert_eq!(cache.resident_bytes(), 0);
  }

  #[test]
  fn removal_releases_pooled_payload() {
    let pool = PayloadPool::new(PayloadPoolConfig::default());
    let mut cache = HistoryCache::new(HistoryCacheConfig::default());
    cache.add_change(change(&pool, 1, 0, 64)).unwrap();
    assert_eq!(pool.resident_bytes(), 64);
    cache.remove_change(SequenceNumber::from(1));
    assert_eq!(pool.resident_bytes(), 0);
  }

  #[test]
  fn purge_waits_for_all_readers() {
    let pool = PayloadPool::new(PayloadPoolConfig::default());
    let mut cache = HistoryCache::new(HistoryCacheConfig::default());
    for seq in 1..=3 {
      cache.add_change(change(&pool, seq, 0, 4)).unwrap();
    }
    cache.register_reader(reader_guid(10));
    cache.register_reader(reader_guid(11));

    let purged = cache.acked_changes_set(reader_guid(10), SequenceNumber::from(3));
    assert!(purged.is_empty(), "one reader is not enough");

    let purged = cache.acked_changes_set(reader_guid(11), SequenceNumber::from(2));
    assert_eq!(
      purged,
      vec![SequenceNumber::from(1), SequenceNumber::from(2)]
    );
    assert_eq!(cache.get_min_seq(), Some(SequenceNumber::from(3)));
  }

  #[test]
  fn acked_watermark_is_monotonic() {
    let pool = PayloadPool::new(PayloadPoolConfig::default());
    let mut cache = HistoryCache::new(HistoryCacheConfig::default());
    for seq in 1..=4 {
      cache.add_change(change(&pool, seq, 0, 4)).unwrap();
    }
    cache.register_reader(reader_guid(10));
    cache.acked_changes_set(reader_guid(10), SequenceNumber::from(3));
    // stale smaller ack must not move the watermark back
    cache.acked_changes_set(reader_guid(10), SequenceNumber::from(1));
    assert_eq!(cache.acked_up_to(reader_guid(10)), Some(SequenceNumber::from(3)));
  }

  #[test]
  fn forgetting_a_reader_unblocks_purge() {
    let pool = PayloadPool::new(PayloadPoolConfig::default());
    let mut cache = HistoryCache::new(HistoryCacheConfig::default());
    for seq in 1..=2 {
      cache.add_change(change(&pool, seq, 0, 4)).unwrap();
    }
    cache.register_reader(reader_guid(10));
    cache.register_reader(reader_guid(11));
    cache.acked_changes_set(reader_guid(10), SequenceNumber::from(2));
    assert_eq!(cache.len(), 2);
    let purged = cache.forget_reader(reader_guid(11));
    assert_eq!(purged.len(), 2);
    assert!(cache.is_empty());
  }
}
