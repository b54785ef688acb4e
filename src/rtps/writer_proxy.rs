use std::{
  collections::{BTreeMap, HashMap},
  time::Instant,
};

#[allow(unused_imports)]
use log::{debug, error, trace, warn};

use crate::{
  rtps::fragment_assembler::FragmentAssembler,
  structure::{
    cache_change::CacheChange,
    guid::GUID,
    history_cache::{HistoryCache, HistoryCacheConfig, RejectedReason},
    locator::Locator,
    sequence_number::SequenceNumber,
  },
};

/// Reader-side resolution state of one sequence number from one writer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ChangeFromWriterStatus {
  Received,
  Irrelevant,
}

/// Outcome of a HEARTBEAT applied to a WriterProxy.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct HeartbeatOutcome {
  /// Heartbeat was fresh (count advanced) and processed.
  pub accepted: bool,
  /// Sequence numbers the writer no longer has that we never received.
  pub lost: Vec<SequenceNumber>,
  /// True when the reader should respond with an ACKNACK.
  pub missing_changes: bool,
}

/// A Reader's view of one matched remote Writer: the sample range the
/// writer announced, which of those we have or were told to skip, and
/// the in-order delivery cursor. Owns the received-sample cache for this
/// writer, which keeps per-writer sequence numbers unique as required.
pub struct RtpsWriterProxy {
  pub remote_writer_guid: GUID,
  pub unicast_locator_list: Vec<Locator>,
  pub multicast_locator_list: Vec<Locator>,

  history: HistoryCache,
  changes: BTreeMap<SequenceNumber, ChangeFromWriterStatus>,
  // next sequence number to hand to the application; everything below
  // is delivered or skipped
  delivered_base: SequenceNumber,
  hb_first: SequenceNumber,
  hb_last: SequenceNumber,
  last_heartbeat_count: i32,
  pub last_alive: Instant,
  fragment_assemblers: HashMap<SequenceNumber, FragmentAssembler>,
}

impl RtpsWriterProxy {
  pub fn new(
    remote_writer_guid: GUID,
    unicast_locator_list: Vec<Locator>,
    multicast_locator_list: Vec<Locator>,
    cache_config: HistoryCacheConfig,
  ) -> Self {
    Self {
      remote_writer_guid,
      unicast_locator_list,
      multicast_locator_list,
      history: HistoryCache::new(cache_config),
      changes: BTreeMap::new(),
      delivered_base: SequenceNumber::from(1),
      hb_first: SequenceNumber::from(1),
      hb_last: SequenceNumber::ZERO,
      last_heartbeat_count: -1,
      last_alive: Instant::now(),
      fragment_assemblers: HashMap::new(),
    }
  }

  pub fn send_locators(&self) -> &[Locator] {
    if self.unicast_locator_list.is_empty() {
      &self.multicast_locator_list
    } else {
      &self.unicast_locator_list
    }
  }

  /// Duplicate and stale filter for incoming DATA.
  pub fn should_accept_change(&self, seq: SequenceNumber) -> bool {
    seq >= self.delivered_base && !self.changes.contains_key(&seq)
  }

  /// Store a received change. On rejection the sequence stays
  /// unresolved, so a reliable writer will offer it again.
  pub fn receive_change(
    &mut self,
    change: CacheChange,
  ) -> std::result::Result<(), RejectedReason> {
    let seq = change.sequence_number;
    self.history.add_change(change)?;
    self.changes.insert(seq, ChangeFromWriterStatus::Received);
    self.last_alive = Instant::now();
    if seq > self.hb_last {
      self.hb_last = seq;
    }
    Ok(())
  }

  /// Mark GAP-announced sequences irrelevant. Already-received samples
  /// are left as received, which makes repeated GAPs idempotent.
  pub fn irrelevant_changes_set(&mut self, seqs: impl Iterator<Item = SequenceNumber>) {
    for seq in seqs {
      if seq < self.delivered_base {
        continue;
      }
      self
        .changes
        .entry(seq)
        .or_insert(ChangeFromWriterStatus::Irrelevant);
    }
    self.last_alive = Instant::now();
  }

  /// Apply a HEARTBEAT. A count that did not advance is dropped; a
  /// liveliness-only heartbeat (`first > last`) refreshes liveliness but
  /// never touches the missing set.
  pub fn handle_heartbeat(
    &mut self,
    first: SequenceNumber,
    last: SequenceNumber,
    count: i32,
  ) -> HeartbeatOutcome {
    if count <= self.last_heartbeat_count {
      trace!(
        "stale HEARTBEAT count {count} (have {}) from {:?}",
        self.last_heartbeat_count, self.remote_writer_guid
      );
      return HeartbeatOutcome::default();
    }
    self.last_heartbeat_count = count;
    self.last_alive = Instant::now();

    if first > last {
      // liveliness only
      return HeartbeatOutcome {
        accepted: true,
        lost: Vec::new(),
        missing_changes: false,
      };
    }

    self.hb_first = first;
    self.hb_last = std::cmp::max(self.hb_last, last);

    // Everything below `first` the writer no longer offers. What we
    // never resolved there is lost; mark it irrelevant so the delivery
    // cursor can move past.
    let mut lost = Vec::new();
    let mut seq = self.delivered_base;
    while seq < first {
      self
        .changes
        .entry(seq)
        .or_insert_with(|| {
          lost.push(seq);
          ChangeFromWriterStatus::Irrelevant
        });
      seq = seq.next();
    }

    HeartbeatOutcome {
      accepted: true,
      missing_changes: !self.missing_changes().is_empty(),
      lost,
    }
  }

  /// Sequence numbers inside the announced range that we neither
  /// received nor were told to skip.
  pub fn missing_changes(&self) -> Vec<SequenceNumber> {
    let mut missing = Vec::new();
    let mut seq = std::cmp::max(self.delivered_base, self.hb_first);
    while seq <= self.hb_last {
      if !self.changes.contains_key(&seq) {
        missing.push(seq);
      }
      seq = seq.next();
    }
    missing
  }

  /// ACKNACK base: lowest sequence number not yet resolved. Everything
  /// below it counts as received for the writer.
  pub fn acknack_base(&self) -> SequenceNumber {
    let mut base = self.delivered_base;
    while self.changes.contains_key(&base) {
      base = base.next();
    }
    base
  }

  /// Pop every change that is deliverable in order: received changes at
  /// the cursor go out, irrelevant ones are skipped.
  pub fn pop_available(&mut self) -> Vec<CacheChange> {
    let mut out = Vec::new();
    loop {
      match self.changes.get(&self.delivered_base) {
        Some(ChangeFromWriterStatus::Received) => {
          if let Some(change) = self.history.get_change(self.delivered_base).cloned() {
            self.history.remove_change(self.delivered_base);
            out.push(change);
          }
        }
        Some(ChangeFromWriterStatus::Irrelevant) => {}
        None => break,
      }
      self.changes.remove(&self.delivered_base);
      self.fragment_assemblers.remove(&self.delivered_base);
      self.delivered_base = self.delivered_base.next();
    }
    out
  }

  pub fn delivered_base(&self) -> SequenceNumber {
    self.delivered_base
  }

  pub fn available_range(&self) -> (SequenceNumber, SequenceNumber) {
    (self.hb_first, self.hb_last)
  }

  pub fn last_heartbeat_count(&self) -> i32 {
    self.last_heartbeat_count
  }

  /// Feed one DATA_FRAG; returns the full payload when the sample
  /// completes.
  pub fn assemble_fragment(
    &mut self,
    seq: SequenceNumber,
    fragment_starting_num: u32,
    fragments_in_submessage: u16,
    fragment_size: u16,
    data_size: u32,
    payload: &[u8],
  ) -> Option<bytes::Bytes> {
    if !self.should_accept_change(seq) {
      return None;
    }
    let assembler = self
      .fragment_assemblers
      .entry(seq)
      .or_insert_with(|| FragmentAssembler::new(fragment_size, data_size));
    let complete = assembler.insert_frags(fragment_starting_num, fragments_in_submessage, payload);
    if complete.is_some() {
      self.fragment_assemblers.remove(&seq);
    }
    complete
  }

  /// Drop all state, e.g. on unmatch. The per-writer history is
  /// discarded with it.
  pub fn clear(&mut self) {
    self.history.clear();
    self.changes.clear();
    self.fragment_assemblers.clear();
  }

  pub fn resident_samples(&self) -> usize {
    self.history.len()
  }
}

#[cfg(test)]
mod tests {
  use crate::structure::{
    cache_change::{ChangeKind, InstanceHandle},
    guid::{EntityId, EntityKind, GuidPrefix},
    payload_pool::{PayloadPool, PayloadPoolConfig},
  };
  use super::*;

  fn writer_guid() -> GUID {
    GUID::new(
      GuidPrefix::new(&[3; 12]),
      EntityId::create_custom_entity_id([0, 0, 2], EntityKind::WRITER_WITH_KEY_USER_DEFINED),
    )
  }

  fn sn(n: i64) -> SequenceNumber {
    SequenceNumber::from(n)
  }

  fn proxy() -> RtpsWriterProxy {
    RtpsWriterProxy::new(writer_guid(), vec![], vec![], HistoryCacheConfig::default())
  }

  fn change(pool: &PayloadPool, seq: i64) -> CacheChange {
    CacheChange::new(
      ChangeKind::Alive,
      writer_guid(),
      sn(seq),
      InstanceHandle::NIL,
      Some(pool.get_payload(&[seq as u8; 8]).unwrap()),
    )
  }

  #[test]
  fn in_order_delivery_gate() {
    let pool = PayloadPool::new(PayloadPoolConfig::default());
    let mut p = proxy();
    p.receive_change(change(&pool, 2)).unwrap();
    // 1 is missing, nothing deliverable
    assert!(p.pop_available().is_empty());
    p.receive_change(change(&pool, 1)).unwrap();
    let delivered = p.pop_available();
    assert_eq!(
      delivered.iter().map(|c| c.sequence_number).collect::<Vec<_>>(),
      vec![sn(1), sn(2)]
    );
    assert_eq!(p.delivered_base(), sn(3));
  }

  #[test]
  fn duplicates_and_stale_are_filtered() {
    let pool = PayloadPool::new(PayloadPoolConfig::default());
    let mut p = proxy();
    p.receive_change(change(&pool, 1)).unwrap();
    assert!(!p.should_accept_change(sn(1)));
    p.pop_available();
    // already delivered: stale
    assert!(!p.should_accept_change(sn(1)));
    assert!(p.should_accept_change(sn(2)));
  }

  #[test]
  fn heartbeat_computes_missing_and_acknack_base() {
    let pool = PayloadPool::new(PayloadPoolConfig::default());
    let mut p = proxy();
    p.receive_change(change(&pool, 1)).unwrap();
    p.receive_change(change(&pool, 2)).unwrap();
    p.receive_change(change(&pool, 4)).unwrap();
    let outcome = p.handle_heartbeat(sn(1), sn(5), 1);
    assert!(outcome.accepted);
    assert!(outcome.missing_changes);
    assert!(outcome.lost.is_empty());
    assert_eq!(p.missing_changes(), vec![sn(3), sn(5)]);
    assert_eq!(p.acknack_base(), sn(3));
  }

  #[test]
  fn stale_heartbeat_count_is_ignored() {
    let mut p = proxy();
    assert!(p.handle_heartbeat(sn(1), sn(2), 5).accepted);
    assert!(!p.handle_heartbeat(sn(1), sn(3), 5).accepted);
    assert!(!p.handle_heartbeat(sn(1), sn(3), 4).accepted);
    assert!(p.handle_heartbeat(sn(1), sn(3), 6).accepted);
  }

  #[test]
  fn liveliness_only_heartbeat_leaves_missing_alone() {
    let mut p = proxy();
    p.handle_heartbeat(sn(1), sn(4), 1);
    let missing_before = p.missing_changes();
    let outcome = p.handle_heartbeat(sn(9), sn(8), 2);
    assert!(outcome.accepted);
    assert!(!outcome.missing_changes);
    assert_eq!(p.missing_changes(), missing_before);
  }

  #[test]
  fn advancing_first_marks_lost_and_unblocks_cursor() {
    let pool = PayloadPool::new(PayloadPoolConfig::default());
    let mut p = proxy();
    p.receive_change(change(&pool, 3)).unwrap();
    // writer evicted 1..2
    let outcome = p.handle_heartbeat(sn(3), sn(3), 1);
    assert_eq!(outcome.lost, vec![sn(1), sn(2)]);
    let delivered = p.pop_available();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].sequence_number, sn(3));
  }

  #[test]
  fn gap_is_idempotent_over_received() {
    let pool = PayloadPool::new(PayloadPoolConfig::default());
    let mut p = proxy();
    p.receive_change(change(&pool, 1)).unwrap();
    p.irrelevant_changes_set([sn(1), sn(2)].into_iter());
    p.irrelevant_changes_set([sn(1), sn(2)].into_iter());
    let delivered = p.pop_available();
    // received sample still delivered, gap'd one skipped
    assert_eq!(delivered.len(), 1);
    assert_eq!(p.delivered_base(), sn(3));
  }
}
