use std::collections::{BTreeMap, BTreeSet};

#[allow(unused_imports)]
use log::{debug, error, trace, warn};

use crate::structure::{guid::GUID, locator::Locator, sequence_number::SequenceNumber};

/// Writer-side delivery state of one change towards one reader.
/// UNSENT -> UNDERWAY -> UNACKNOWLEDGED -> ACKNOWLEDGED, with the side
/// loop UNACKNOWLEDGED -> REQUESTED -> UNDERWAY driven by ACKNACKs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChangeForReaderStatus {
  Unsent,
  Underway,
  Unacknowledged,
  Acknowledged,
  Requested,
}

/// A Writer's view of one matched remote Reader: where to send, what has
/// been sent, and what the reader still owes an acknowledgment for.
/// Holds GUIDs and locators only, never a handle to a local endpoint.
#[derive(Debug)]
pub struct RtpsReaderProxy {
  pub remote_reader_guid: GUID,
  pub unicast_locator_list: Vec<Locator>,
  pub multicast_locator_list: Vec<Locator>,
  pub expects_inline_qos: bool,
  pub is_reliable: bool,

  changes_for_reader: BTreeMap<SequenceNumber, ChangeForReaderStatus>,
  // sequences the reader asked for that history no longer has
  pending_gap: BTreeSet<SequenceNumber>,
  // highest ACKNACK count seen, for dropping stale or duplicate acknacks
  pub last_received_acknack_count: i32,
  acked_up_to: SequenceNumber,
  // a nack response is already scheduled; further acknacks before it
  // fires only extend the requested set
  pub nack_response_scheduled: bool,
}

impl RtpsReaderProxy {
  pub fn new(
    remote_reader_guid: GUID,
    unicast_locator_list: Vec<Locator>,
    multicast_locator_list: Vec<Locator>,
    expects_inline_qos: bool,
    is_reliable: bool,
  ) -> Self {
    Self {
      remote_reader_guid,
      unicast_locator_list,
      multicast_locator_list,
      expects_inline_qos,
      is_reliable,
      changes_for_reader: BTreeMap::new(),
      pending_gap: BTreeSet::new(),
      last_received_acknack_count: 0,
      acked_up_to: SequenceNumber::ZERO,
      nack_response_scheduled: false,
    }
  }

  /// Locators to send to: all unicast targets, or the multicast ones if
  /// no unicast locator is known.
  pub fn send_locators(&self) -> &[Locator] {
    if self.unicast_locator_list.is_empty() {
      &self.multicast_locator_list
    } else {
      &self.unicast_locator_list
    }
  }

  /// A fresh change enters as UNSENT.
  pub fn add_new_change(&mut self, seq: SequenceNumber) {
    self
      .changes_for_reader
      .insert(seq, ChangeForReaderStatus::Unsent);
  }

  /// Seed the proxy with changes that existed before the match. Used
  /// for TRANSIENT_LOCAL late joiners; VOLATILE readers never see these.
  pub fn init_existing_changes(&mut self, seqs: impl Iterator<Item = SequenceNumber>) {
    for seq in seqs {
      self
        .changes_for_reader
        .insert(seq, ChangeForReaderStatus::Unsent);
    }
  }

  pub fn has_unsent_changes(&self) -> bool {
    self
      .changes_for_reader
      .values()
      .any(|status| *status == ChangeForReaderStatus::Unsent)
  }

  pub fn next_unsent_change(&self) -> Option<SequenceNumber> {
    self
      .changes_for_reader
      .iter()
      .find(|(_, status)| **status == ChangeForReaderStatus::Unsent)
      .map(|(seq, _)| *seq)
  }

  pub fn requested_changes(&self) -> Vec<SequenceNumber> {
    self
      .changes_for_reader
      .iter()
      .filter(|(_, status)| **status == ChangeForReaderStatus::Requested)
      .map(|(seq, _)| *seq)
      .collect()
  }

  pub fn change_status(&self, seq: SequenceNumber) -> Option<ChangeForReaderStatus> {
    self.changes_for_reader.get(&seq).copied()
  }

  /// Sent on the wire. Best-effort readers hold no further state, so
  /// their changes complete immediately.
  pub fn mark_underway(&mut self, seq: SequenceNumber) {
    let status = if self.is_reliable {
      ChangeForReaderStatus::Underway
    } else {
      ChangeForReaderStatus::Acknowledged
    };
    self.changes_for_reader.insert(seq, status);
  }

  /// The nack suppression window has elapsed: UNDERWAY changes become
  /// eligible for re-request.
  pub fn suppression_elapsed(&mut self) {
    for status in self.changes_for_reader.values_mut() {
      if *status == ChangeForReaderStatus::Underway {
        *status = ChangeForReaderStatus::Unacknowledged;
      }
    }
  }

  /// Positive acknowledgment of everything up to and including `up_to`.
  /// The watermark never regresses. Returns true if it advanced.
  pub fn acked_changes_set(&mut self, up_to: SequenceNumber) -> bool {
    if up_to <= self.acked_up_to {
      return false;
    }
    self.acked_up_to = up_to;
    self.changes_for_reader = self.changes_for_reader.split_off(&up_to.next());
    self.pending_gap = self.pending_gap.split_off(&up_to.next());
    true
  }

  /// Negative acknowledgment: the reader wants these again. Requests for
  /// UNDERWAY changes are suppressed; requests for sequences history no
  /// longer holds become pending GAPs.
  pub fn requested_changes_set(
    &mut self,
    seqs: impl Iterator<Item = SequenceNumber>,
    history_has: impl Fn(SequenceNumber) -> bool,
  ) {
    for seq in seqs {
      if seq <= self.acked_up_to {
        continue;
      }
      if !history_has(seq) {
        self.pending_gap.insert(seq);
        self.changes_for_reader.remove(&seq);
        continue;
      }
      match self.changes_for_reader.get(&seq) {
        Some(ChangeForReaderStatus::Unacknowledged) | None => {
          self
            .changes_for_reader
            .insert(seq, ChangeForReaderStatus::Requested);
        }
        Some(ChangeForReaderStatus::Underway) => {
          trace!("nack for {seq:?} suppressed, change is underway");
        }
        Some(_) => {}
      }
    }
  }

  /// A change was evicted from history before this reader acknowledged
  /// it; the reader must be told to advance past it.
  pub fn change_evicted(&mut self, seq: SequenceNumber) {
    if seq <= self.acked_up_to {
      return;
    }
    match self.changes_for_reader.remove(&seq) {
      Some(ChangeForReaderStatus::Acknowledged) => {}
      _ => {
        self.pending_gap.insert(seq);
      }
    }
  }

  pub fn take_pending_gaps(&mut self) -> BTreeSet<SequenceNumber> {
    std::mem::take(&mut self.pending_gap)
  }

  pub fn has_pending_gaps(&self) -> bool {
    !self.pending_gap.is_empty()
  }

  /// Anything sent (or sendable) that the reader has not acknowledged.
  /// Governs the HEARTBEAT Final flag and the purge rule.
  pub fn unacked_changes_exist(&self) -> bool {
    self
      .changes_for_reader
      .values()
      .any(|status| *status != ChangeForReaderStatus::Acknowledged)
  }

  pub fn acked_up_to(&self) -> SequenceNumber {
    self.acked_up_to
  }
}

#[cfg(test)]
mod tests {
  use crate::structure::guid::{EntityId, EntityKind, GuidPrefix};
  use super::*;

  fn proxy(reliable: bool) -> RtpsReaderProxy {
    RtpsReaderProxy::new(
      GUID::new(
        GuidPrefix::new(&[7; 12]),
        EntityId::create_custom_entity_id([0, 0, 1], EntityKind::READER_WITH_KEY_USER_DEFINED),
      ),
      vec![],
      vec![],
      false,
      reliable,
    )
  }

  fn sn(n: i64) -> SequenceNumber {
    SequenceNumber::from(n)
  }

  #[test]
  fn unsent_to_underway_to_unacknowledged() {
    let mut p = proxy(true);
    p.add_new_change(sn(1));
    p.add_new_change(sn(2));
    assert_eq!(p.next_unsent_change(), Some(sn(1)));
    p.mark_underway(sn(1));
    assert_eq!(p.next_unsent_change(), Some(sn(2)));
    p.suppression_elapsed();
    assert_eq!(
      p.change_status(sn(1)),
      Some(ChangeForReaderStatus::Unacknowledged)
    );
  }

  #[test]
  fn best_effort_completes_on_send() {
    let mut p = proxy(false);
    p.add_new_change(sn(1));
    p.mark_underway(sn(1));
    assert_eq!(
      p.change_status(sn(1)),
      Some(ChangeForReaderStatus::Acknowledged)
    );
    assert!(!p.has_unsent_changes());
  }

  #[test]
  fn ack_watermark_is_monotonic_and_trims_state() {
    let mut p = proxy(true);
    for i in 1..=4 {
      p.add_new_change(sn(i));
      p.mark_underway(sn(i));
    }
    p.suppression_elapsed();
    assert!(p.acked_changes_set(sn(3)));
    assert_eq!(p.acked_up_to(), sn(3));
    assert_eq!(p.change_status(sn(2)), None);
    // stale ack does not regress
    assert!(!p.acked_changes_set(sn(1)));
    assert_eq!(p.acked_up_to(), sn(3));
    assert!(p.unacked_changes_exist()); // seq 4 still out
  }

  #[test]
  fn nack_moves_unacknowledged_to_requested_but_not_underway() {
    let mut p = proxy(true);
    p.add_new_change(sn(1));
    p.add_new_change(sn(2));
    p.mark_underway(sn(1));
    p.suppression_elapsed(); // 1 now unacknowledged
    p.mark_underway(sn(2)); // 2 underway, inside suppression window
    p.requested_changes_set([sn(1), sn(2)].into_iter(), |_| true);
    assert_eq!(p.change_status(sn(1)), Some(ChangeForReaderStatus::Requested));
    assert_eq!(p.change_status(sn(2)), Some(ChangeForReaderStatus::Underway));
    assert_eq!(p.requested_changes(), vec![sn(1)]);
  }

  #[test]
  fn request_for_evicted_change_becomes_gap() {
    let mut p = proxy(true);
    p.add_new_change(sn(5));
    p.requested_changes_set([sn(4), sn(5)].into_iter(), |seq| seq != sn(4));
    assert!(p.has_pending_gaps());
    assert_eq!(p.take_pending_gaps().into_iter().collect::<Vec<_>>(), vec![sn(4)]);
    assert_eq!(p.change_status(sn(5)), Some(ChangeForReaderStatus::Requested));
  }

  #[test]
  fn eviction_of_unacked_change_gaps_it() {
    let mut p = proxy(true);
    p.add_new_change(sn(1));
    p.mark_underway(sn(1));
    p.suppression_elapsed();
    p.change_evicted(sn(1));
    assert!(p.has_pending_gaps());
    assert!(!p.unacked_changes_exist());
  }
}
