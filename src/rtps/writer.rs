use std::{
  collections::{BTreeMap, BTreeSet},
  sync::{Arc, Condvar, Mutex, Weak},
};

use bytes::Bytes;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  error::{Error, Result},
  messages::submessages::submessages::{AckSubmessage, DataFrag, Gap},
  qos::{policy::Durability, QosPolicies},
  rtps::{
    flow_control::{FlowFilterChain, FlowQueueItem},
    message::{Message, MessageBuilder},
    reader_proxy::RtpsReaderProxy,
    stateless_writer::StatelessWriter,
  },
  statusevents::{CountWithChange, DataWriterStatus, StatusChannelSender},
  structure::{
    cache_change::{CacheChange, ChangeKind, InstanceHandle},
    duration::Duration,
    entity::RTPSEntity,
    guid::{EntityId, GUID},
    history_cache::{HistoryCache, HistoryCacheConfig},
    locator::Locator,
    payload_pool::PayloadPool,
    sequence_number::SequenceNumber,
    time::Timestamp,
  },
  timed_event::{AfterFire, TimedEventScheduler},
  transport::Transport,
};

/// Everything needed to construct a writer. Mirrors the endpoint
/// attributes discovery will advertise about it.
pub struct WriterIngredients {
  pub guid: GUID,
  pub topic_name: String,
  pub type_name: String,
  pub qos: QosPolicies,
  pub cache_config: HistoryCacheConfig,
  pub heartbeat_period: Duration,
  pub nack_response_delay: Duration,
  pub nack_suppression_duration: Duration,
  pub max_data_size: usize,
  pub pool: PayloadPool,
  pub transport: Arc<dyn Transport>,
  pub status_sender: StatusChannelSender<DataWriterStatus>,
  pub flow_filters: FlowFilterChain,
}

/// Either flavour of local writer, as stored in the Participant's
/// endpoint registry.
pub enum WriterKind {
  Stateful(StatefulWriter),
  Stateless(StatelessWriter),
}

impl WriterKind {
  pub fn guid(&self) -> GUID {
    match self {
      Self::Stateful(w) => w.guid(),
      Self::Stateless(w) => w.guid(),
    }
  }

  pub fn topic_name(&self) -> &str {
    match self {
      Self::Stateful(w) => &w.topic_name,
      Self::Stateless(w) => &w.topic_name,
    }
  }

  pub fn handle_ack_submessage(&mut self, source: crate::structure::guid::GuidPrefix, ack: &AckSubmessage) -> bool {
    match self {
      Self::Stateful(w) => w.handle_ack_submessage(source, ack),
      // acknowledgment of best-effort data is not acknowledged back
      Self::Stateless(_) => false,
    }
  }

  pub fn type_name(&self) -> &str {
    match self {
      Self::Stateful(w) => &w.type_name,
      Self::Stateless(_) => "",
    }
  }

  pub fn qos(&self) -> &QosPolicies {
    match self {
      Self::Stateful(w) => &w.qos,
      Self::Stateless(w) => &w.qos,
    }
  }

  pub fn matched_reader_add(
    &mut self,
    remote_reader_guid: GUID,
    unicast_locator_list: Vec<Locator>,
    multicast_locator_list: Vec<Locator>,
    expects_inline_qos: bool,
    reader_qos: &QosPolicies,
  ) {
    match self {
      Self::Stateful(w) => w.matched_reader_add(
        remote_reader_guid,
        unicast_locator_list,
        multicast_locator_list,
        expects_inline_qos,
        reader_qos,
      ),
      Self::Stateless(w) => {
        let mut locators = unicast_locator_list;
        locators.extend(multicast_locator_list);
        w.matched_reader_add(remote_reader_guid, locators);
      }
    }
  }

  pub fn matched_reader_remove(&mut self, remote_reader_guid: GUID) -> bool {
    match self {
      Self::Stateful(w) => w.matched_reader_remove(remote_reader_guid),
      Self::Stateless(w) => w.matched_reader_remove(remote_reader_guid),
    }
  }

  pub fn write_change(
    &mut self,
    kind: crate::structure::cache_change::ChangeKind,
    instance_handle: crate::structure::cache_change::InstanceHandle,
    payload: Option<&[u8]>,
    source_timestamp: Option<crate::structure::time::Timestamp>,
  ) -> Result<SequenceNumber> {
    match self {
      Self::Stateful(w) => {
        let seq = w.write_change(kind, instance_handle, payload, source_timestamp)?;
        w.send_unsent_changes();
        Ok(seq)
      }
      Self::Stateless(w) => w.write_change(kind, instance_handle, payload, source_timestamp),
    }
  }
}

/// A writer cell in the endpoint registry: the writer plus the condvar
/// that blocked `write` calls wait on for cache space.
pub struct WriterCell {
  pub mutex: Mutex<WriterKind>,
  pub ack_cv: Condvar,
}

impl WriterCell {
  pub fn new(kind: WriterKind) -> Arc<Self> {
    Arc::new(Self {
      mutex: Mutex::new(kind),
      ack_cv: Condvar::new(),
    })
  }
}

/// Reliable RTPS writer: per-reader delivery state, HEARTBEAT
/// solicitation, NACK-driven repair, GAP emission for evicted samples.
pub struct StatefulWriter {
  guid: GUID,
  pub topic_name: String,
  pub type_name: String,
  pub qos: QosPolicies,
  history: HistoryCache,
  pool: PayloadPool,
  reader_proxies: BTreeMap<GUID, RtpsReaderProxy>,

  last_change_sequence_number: SequenceNumber,
  heartbeat_count: i32,
  pub heartbeat_period: Duration,
  nack_response_delay: Duration,
  nack_suppression_duration: Duration,
  max_data_size: usize,

  transport: Arc<dyn Transport>,
  status_sender: StatusChannelSender<DataWriterStatus>,
  flow_filters: FlowFilterChain,

  // set by the Participant once the writer is in its registry, so that
  // scheduled events can find their way back without ownership cycles
  scheduler: Option<Arc<TimedEventScheduler>>,
  self_ref: Weak<WriterCell>,

  matched_total: i32,
  matched_current: i32,
  last_write_time: std::time::Instant,
  deadline_missed_count: i32,
}

impl RTPSEntity for StatefulWriter {
  fn guid(&self) -> GUID {
    self.guid
  }
}

impl StatefulWriter {
  pub fn new(i: WriterIngredients) -> Self {
    Self {
      guid: i.guid,
      topic_name: i.topic_name,
      type_name: i.type_name,
      qos: i.qos,
      history: HistoryCache::new(i.cache_config),
      pool: i.pool,
      reader_proxies: BTreeMap::new(),
      last_change_sequence_number: SequenceNumber::ZERO,
      heartbeat_count: 0,
      heartbeat_period: i.heartbeat_period,
      nack_response_delay: i.nack_response_delay,
      nack_suppression_duration: i.nack_suppression_duration,
      max_data_size: i.max_data_size,
      transport: i.transport,
      status_sender: i.status_sender,
      flow_filters: i.flow_filters,
      scheduler: None,
      self_ref: Weak::new(),
      matched_total: 0,
      matched_current: 0,
      last_write_time: std::time::Instant::now(),
      deadline_missed_count: 0,
    }
  }

  pub(crate) fn attach_scheduler(
    &mut self,
    scheduler: Arc<TimedEventScheduler>,
    self_ref: Weak<WriterCell>,
  ) {
    self.scheduler = Some(scheduler);
    self.self_ref = self_ref;
  }

  pub fn history(&self) -> &HistoryCache {
    &self.history
  }

  pub fn matched_readers(&self) -> impl Iterator<Item = &GUID> {
    self.reader_proxies.keys()
  }

  /// Append a new sample to the history cache and stage it for every
  /// matched reader. Does not send; call [`Self::send_unsent_changes`]
  /// after, outside any deadline-sensitive section.
  pub fn write_change(
    &mut self,
    kind: ChangeKind,
    instance_handle: InstanceHandle,
    payload: Option<&[u8]>,
    source_timestamp: Option<Timestamp>,
  ) -> Result<SequenceNumber> {
    let pooled = match payload {
      Some(bytes) => Some(self.pool.get_payload(bytes)?),
      None => None,
    };
    let seq = self.last_change_sequence_number.next();
    let change = CacheChange::new(kind, self.guid, seq, instance_handle, pooled)
      .with_timestamp(source_timestamp.or_else(|| Some(Timestamp::now())));

    match self.history.add_change(change) {
      Ok(outcome) => {
        self.last_change_sequence_number = seq;
        self.last_write_time = std::time::Instant::now();
        for evicted in outcome.evicted {
          for proxy in self.reader_proxies.values_mut() {
            proxy.change_evicted(evicted);
          }
        }
        for proxy in self.reader_proxies.values_mut() {
          proxy.add_new_change(seq);
        }
        Ok(seq)
      }
      Err(reason) => {
        debug!(
          "Writer {:?} cache rejected seq {seq:?}: {reason:?}",
          self.guid
        );
        Err(Error::CacheFull)
      }
    }
  }

  /// Drain UNSENT changes for every reader through the flow filters.
  pub fn send_unsent_changes(&mut self) {
    let readers: Vec<GUID> = self.reader_proxies.keys().copied().collect();
    for reader in readers {
      self.send_staged_changes(reader, StagedKind::Unsent);
    }
  }

  /// Drain REQUESTED changes for one reader, the NACK response.
  pub fn send_requested_changes(&mut self, reader: GUID) {
    if let Some(proxy) = self.reader_proxies.get_mut(&reader) {
      proxy.nack_response_scheduled = false;
    }
    self.send_staged_changes(reader, StagedKind::Requested);
  }

  fn send_staged_changes(&mut self, reader: GUID, staged: StagedKind) {
    let Some(proxy) = self.reader_proxies.get_mut(&reader) else {
      return;
    };

    // collect candidates; sequences history no longer holds become GAPs
    let candidates: Vec<SequenceNumber> = match staged {
      StagedKind::Unsent => {
        let mut seqs = Vec::new();
        while let Some(seq) = proxy.next_unsent_change() {
          if seqs.contains(&seq) || seqs.len() >= 64 {
            break;
          }
          if self.history.get_change(seq).is_some() {
            seqs.push(seq);
            proxy.mark_underway(seq); // reverted below if withheld
          } else {
            proxy.change_evicted(seq);
          }
        }
        seqs
      }
      StagedKind::Requested => {
        let mut seqs = Vec::new();
        for seq in proxy.requested_changes() {
          if self.history.get_change(seq).is_some() {
            seqs.push(seq);
            proxy.mark_underway(seq);
          } else {
            proxy.change_evicted(seq);
          }
        }
        seqs
      }
    };

    let mut items: Vec<FlowQueueItem> = candidates
      .iter()
      .map(|seq| FlowQueueItem {
        seq: *seq,
        payload_size: self
          .history
          .get_change(*seq)
          .map_or(0, |c| c.payload_size() as u32),
      })
      .collect();
    let staged_count = items.len();
    self.flow_filters.filter(&mut items);
    let withheld = staged_count - items.len();

    let dst_prefix = reader.prefix;
    let reader_entity = reader.entity_id;
    let locators: Vec<Locator> = self
      .reader_proxies
      .get(&reader)
      .map(|p| p.send_locators().to_vec())
      .unwrap_or_default();

    let mut sent_items = Vec::new();
    let mut unreachable = false;
    for item in &items {
      let Some(change) = self.history.get_change(item.seq).cloned() else {
        continue;
      };
      let messages = build_data_messages(
        self.guid,
        &change,
        reader_entity,
        dst_prefix,
        self.max_data_size,
      );
      let all_sent = messages
        .iter()
        .all(|message| send_message(&*self.transport, message, &locators));
      if all_sent {
        sent_items.push(*item);
      } else {
        warn!(
          "Writer {:?}: reader {reader:?} unreachable this round",
          self.guid
        );
        unreachable = true;
        break;
      }
    }

    for item in &sent_items {
      self.flow_filters.notify_change_sent(item);
    }

    if self.nack_suppression_duration == Duration::ZERO {
      let proxy = self.reader_proxies.get_mut(&reader).unwrap();
      proxy.suppression_elapsed();
    } else {
      self.schedule_suppression_end(reader);
    }

    // what was staged but not sent goes back to the repair pool, so the
    // flow-control retry round picks it up again
    let sent_set: Vec<SequenceNumber> = sent_items.iter().map(|i| i.seq).collect();
    let proxy = self.reader_proxies.get_mut(&reader).unwrap();
    let history = &self.history;
    proxy.requested_changes_set(
      candidates.iter().copied().filter(|s| !sent_set.contains(s)),
      |seq| history.get_change(seq).is_some(),
    );
    self.send_pending_gaps(reader);

    // anything withheld by flow control is retried when it refills
    if withheld > 0 && !unreachable {
      self.schedule_flow_retry();
    }
  }

  fn schedule_suppression_end(&mut self, reader: GUID) {
    let Some(scheduler) = self.scheduler.clone() else {
      return;
    };
    let self_ref = self.self_ref.clone();
    let delay: std::time::Duration = self.nack_suppression_duration.into();
    scheduler.schedule(delay, move || {
      if let Some(cell) = self_ref.upgrade() {
        if let WriterKind::Stateful(w) = &mut *cell.mutex.lock().unwrap() {
          if let Some(proxy) = w.reader_proxies.get_mut(&reader) {
            proxy.suppression_elapsed();
          }
        }
      }
      AfterFire::Done
    });
  }

  fn schedule_flow_retry(&mut self) {
    let Some(delay) = self.flow_filters.retry_after() else {
      return;
    };
    let Some(scheduler) = self.scheduler.clone() else {
      return;
    };
    let self_ref = self.self_ref.clone();
    scheduler.schedule(delay.max(std::time::Duration::from_millis(1)), move || {
      if let Some(cell) = self_ref.upgrade() {
        if let WriterKind::Stateful(w) = &mut *cell.mutex.lock().unwrap() {
          w.send_unsent_changes();
          let readers: Vec<GUID> = w.reader_proxies.keys().copied().collect();
          for reader in readers {
            w.send_requested_changes(reader);
          }
        }
      }
      AfterFire::Done
    });
  }

  fn send_pending_gaps(&mut self, reader: GUID) {
    let Some(proxy) = self.reader_proxies.get_mut(&reader) else {
      return;
    };
    if !proxy.has_pending_gaps() {
      return;
    }
    let gaps = build_gaps(
      proxy.take_pending_gaps(),
      reader.entity_id,
      self.guid.entity_id,
    );
    let locators: Vec<Locator> = proxy.send_locators().to_vec();
    let mut builder = MessageBuilder::new().dst_submessage(reader.prefix);
    for gap in gaps {
      builder = builder.gap_msg(gap);
    }
    let message = builder.add_header_and_build(self.guid.prefix);
    send_message(&*self.transport, &message, &locators);
  }

  /// Periodic HEARTBEAT: announce the available range to every reliable
  /// reader. Final flag set when the reader owes us nothing.
  pub fn perform_heartbeat(&mut self) {
    self.heartbeat_count += 1;
    let count = self.heartbeat_count;
    let (first, last) = self.heartbeat_range();
    let prefix = self.guid.prefix;
    let writer_id = self.guid.entity_id;

    let targets: Vec<(GUID, Vec<Locator>, bool)> = self
      .reader_proxies
      .values()
      .filter(|p| p.is_reliable)
      .map(|p| {
        (
          p.remote_reader_guid,
          p.send_locators().to_vec(),
          !p.unacked_changes_exist(),
        )
      })
      .collect();

    for (reader, locators, all_acked) in targets {
      let message = MessageBuilder::new()
        .dst_submessage(reader.prefix)
        .heartbeat_msg(writer_id, reader.entity_id, first, last, count, all_acked, false)
        .add_header_and_build(prefix);
      send_message(&*self.transport, &message, &locators);
    }
  }

  // With an empty cache announce (last+1, last): liveliness only.
  fn heartbeat_range(&self) -> (SequenceNumber, SequenceNumber) {
    match (self.history.get_min_seq(), self.history.get_max_seq()) {
      (Some(min), Some(max)) => (min, max),
      _ => (
        self.last_change_sequence_number.next(),
        self.last_change_sequence_number,
      ),
    }
  }

  /// Process an ACKNACK or NACK_FRAG addressed to this writer. Returns
  /// true when acknowledged changes were purged, so the caller can wake
  /// blocked `write` calls.
  pub fn handle_ack_submessage(
    &mut self,
    source: crate::structure::guid::GuidPrefix,
    ack: &AckSubmessage,
  ) -> bool {
    match ack {
      AckSubmessage::AckNack(acknack) => {
        let reader = GUID::new(source, acknack.reader_id);
        let Some(proxy) = self.reader_proxies.get_mut(&reader) else {
          trace!("ACKNACK from unmatched reader {reader:?}");
          return false;
        };
        if acknack.count <= proxy.last_received_acknack_count {
          trace!(
            "stale ACKNACK count {} from {reader:?}",
            acknack.count
          );
          return false;
        }
        proxy.last_received_acknack_count = acknack.count;

        let acked_up_to = acknack.reader_sn_state.base() - 1;
        let advanced = proxy.acked_changes_set(acked_up_to);
        let history = &self.history;
        proxy.requested_changes_set(acknack.reader_sn_state.iter(), |seq| {
          history.get_change(seq).is_some()
        });

        let needs_response =
          !proxy.requested_changes().is_empty() || proxy.has_pending_gaps();
        if needs_response && !proxy.nack_response_scheduled {
          proxy.nack_response_scheduled = true;
          self.schedule_nack_response(reader);
        }

        let mut purged_any = false;
        if advanced {
          let purged = self.history.acked_changes_set(reader, acked_up_to);
          purged_any = !purged.is_empty();
        }
        purged_any
      }
      AckSubmessage::NackFrag(nack_frag) => {
        // fragment-level repair resends the whole sample
        let reader = GUID::new(source, nack_frag.reader_id);
        if let Some(proxy) = self.reader_proxies.get_mut(&reader) {
          let history = &self.history;
          proxy.requested_changes_set(std::iter::once(nack_frag.writer_sn), |seq| {
            history.get_change(seq).is_some()
          });
          if !proxy.nack_response_scheduled {
            proxy.nack_response_scheduled = true;
            self.schedule_nack_response(reader);
          }
        }
        false
      }
    }
  }

  fn schedule_nack_response(&self, reader: GUID) {
    let Some(scheduler) = self.scheduler.clone() else {
      return;
    };
    let self_ref = self.self_ref.clone();
    let delay: std::time::Duration = self.nack_response_delay.into();
    scheduler.schedule(delay, move || {
      if let Some(cell) = self_ref.upgrade() {
        if let WriterKind::Stateful(w) = &mut *cell.mutex.lock().unwrap() {
          w.send_requested_changes(reader);
        }
      }
      AfterFire::Done
    });
  }

  /// Install or refresh the proxy for a matched remote reader.
  pub fn matched_reader_add(
    &mut self,
    remote_reader_guid: GUID,
    unicast_locator_list: Vec<Locator>,
    multicast_locator_list: Vec<Locator>,
    expects_inline_qos: bool,
    reader_qos: &QosPolicies,
  ) {
    let is_reliable = reader_qos.is_reliable();
    let mut proxy = RtpsReaderProxy::new(
      remote_reader_guid,
      unicast_locator_list,
      multicast_locator_list,
      expects_inline_qos,
      is_reliable,
    );

    // TRANSIENT_LOCAL late joiners get what the cache still holds;
    // VOLATILE readers start from the next sample
    if reader_qos.durability_or_default() >= Durability::TransientLocal {
      proxy.init_existing_changes(self.history.changes().map(|c| c.sequence_number));
    } else {
      proxy.acked_changes_set(self.last_change_sequence_number);
    }

    if is_reliable {
      self.history.register_reader(remote_reader_guid);
      if reader_qos.durability_or_default() == Durability::Volatile {
        self
          .history
          .acked_changes_set(remote_reader_guid, self.last_change_sequence_number);
      }
    }

    let fresh = self
      .reader_proxies
      .insert(remote_reader_guid, proxy)
      .is_none();
    if fresh {
      self.matched_total += 1;
      self.matched_current += 1;
      self.status_sender.try_send(DataWriterStatus::PublicationMatched {
        total: CountWithChange::new(self.matched_total, 1),
        current: CountWithChange::new(self.matched_current, 1),
        reader: remote_reader_guid,
      });
    }

    self.send_unsent_changes();
    if is_reliable {
      self.perform_heartbeat();
    }
  }

  pub fn matched_reader_remove(&mut self, remote_reader_guid: GUID) -> bool {
    let removed = self.reader_proxies.remove(&remote_reader_guid).is_some();
    if removed {
      self.history.forget_reader(remote_reader_guid);
      self.matched_current -= 1;
      self.status_sender.try_send(DataWriterStatus::PublicationMatched {
        total: CountWithChange::new(self.matched_total, 0),
        current: CountWithChange::new(self.matched_current, -1),
        reader: remote_reader_guid,
      });
    }
    removed
  }

  pub fn is_matched_with(&self, reader: GUID) -> bool {
    self.reader_proxies.contains_key(&reader)
  }

  /// All matched reliable readers have acknowledged everything written.
  pub fn all_acked(&self) -> bool {
    !self
      .reader_proxies
      .values()
      .filter(|p| p.is_reliable)
      .any(RtpsReaderProxy::unacked_changes_exist)
  }

  /// Periodic deadline supervision: the application failed to write
  /// within the offered deadline period.
  pub fn check_deadline(&mut self, period: std::time::Duration) {
    if self.reader_proxies.is_empty() {
      return;
    }
    if std::time::Instant::now().duration_since(self.last_write_time) > period {
      self.deadline_missed_count += 1;
      self
        .status_sender
        .try_send(DataWriterStatus::OfferedDeadlineMissed {
          count: CountWithChange::new(self.deadline_missed_count, 1),
        });
      self.last_write_time = std::time::Instant::now();
    }
  }

  pub(crate) fn report_offered_incompatible_qos(
    &mut self,
    reader: GUID,
    policy: crate::qos::QosPolicyId,
    count: i32,
  ) {
    self
      .status_sender
      .try_send(DataWriterStatus::OfferedIncompatibleQos {
        count: CountWithChange::new(count, 1),
        last_policy_id: policy,
        reader,
      });
  }
}

enum StagedKind {
  Unsent,
  Requested,
}

/// DATA when it fits, a train of DATA_FRAGs when it does not.
fn build_data_messages(
  writer_guid: GUID,
  change: &CacheChange,
  reader_id: EntityId,
  dst_prefix: crate::structure::guid::GuidPrefix,
  max_data_size: usize,
) -> Vec<Message> {
  let payload_len = change.payload_size();
  if payload_len <= max_data_size {
    return vec![MessageBuilder::new()
      .dst_submessage(dst_prefix)
      .ts_msg(change.source_timestamp)
      .data_msg(change, reader_id)
      .add_header_and_build(writer_guid.prefix)];
  }

  let payload = change
    .payload
    .as_ref()
    .map(|p| p.bytes())
    .unwrap_or_else(Bytes::new);
  let fragment_size = max_data_size as u16;
  let total = payload_len.div_ceil(max_data_size);
  let mut messages = Vec::with_capacity(total);
  for index in 0..total {
    let from = index * max_data_size;
    let to = std::cmp::min(from + max_data_size, payload_len);
    let frag = DataFrag {
      reader_id,
      writer_id: writer_guid.entity_id,
      writer_sn: change.sequence_number,
      fragment_starting_num: crate::structure::sequence_number::FragmentNumber(index as u32 + 1),
      fragments_in_submessage: 1,
      fragment_size,
      data_size: payload_len as u32,
      inline_qos: change.inline_qos.clone(),
      serialized_payload: payload.slice(from..to),
    };
    messages.push(
      MessageBuilder::new()
        .dst_submessage(dst_prefix)
        .ts_msg(change.source_timestamp)
        .datafrag_msg(frag, change.kind.is_key_only())
        .add_header_and_build(writer_guid.prefix),
    );
  }
  messages
}

/// Coalesce a set of irrelevant sequence numbers into GAP submessages:
/// a contiguous head range plus a bitmap, repeated while the set spans
/// more than one bitmap window.
fn build_gaps(
  mut seqs: BTreeSet<SequenceNumber>,
  reader_id: EntityId,
  writer_id: EntityId,
) -> Vec<Gap> {
  use crate::structure::sequence_number::SequenceNumberSet;

  let mut gaps = Vec::new();
  while let Some(start) = seqs.iter().next().copied() {
    // contiguous run from start
    let mut run_end = start;
    while seqs.contains(&run_end.next()) {
      run_end = run_end.next();
    }
    let list_base = run_end.next();
    let mut gap_list = SequenceNumberSet::new_empty(list_base);
    seqs.retain(|seq| {
      if *seq < list_base {
        false // covered by the contiguous range
      } else {
        !gap_list.insert(*seq) // keep only what did not fit the window
      }
    });
    gaps.push(Gap {
      reader_id,
      writer_id,
      gap_start: start,
      gap_list,
    });
  }
  gaps
}

/// Send one message to the first locator that accepts it. Returns
/// whether anything was handed to the transport.
pub(crate) fn send_message(
  transport: &dyn Transport,
  message: &Message,
  locators: &[Locator],
) -> bool {
  let bytes = match message.write_to_vec() {
    Ok(bytes) => bytes,
    Err(e) => {
      error!("cannot serialize RTPS message: {e}");
      return false;
    }
  };
  let mut any = false;
  for locator in locators {
    match transport.send(&bytes, locator, None) {
      Ok(()) => {
        any = true;
        break;
      }
      Err(e) => {
        debug!("send to {locator:?} failed: {e}");
      }
    }
  }
  if !any && !locators.is_empty() {
    trace!("message undeliverable to all of {locators:?}");
  }
  any
}

#[cfg(test)]
pub(crate) mod tests {
  use std::net::{Ipv4Addr, SocketAddrV4};
  use std::sync::Mutex as StdMutex;
  use std::time::Instant;

  use crate::{
    qos::QosPolicies,
    rtps::message::Message,
    statusevents::sync_status_channel,
    structure::{
      guid::{EntityKind, GuidPrefix},
      payload_pool::PayloadPoolConfig,
    },
  };
  use super::*;

  /// Transport that records every outgoing message.
  pub(crate) struct RecordingTransport {
    pub sent: StdMutex<Vec<(Locator, Message)>>,
    pub fail: StdMutex<bool>,
  }

  impl RecordingTransport {
    pub fn new() -> Arc<Self> {
      Arc::new(Self {
        sent: StdMutex::new(Vec::new()),
        fail: StdMutex::new(false),
      })
    }

    pub fn messages(&self) -> Vec<(Locator, Message)> {
      self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
      self.sent.lock().unwrap().clear();
    }
  }

  impl Transport for RecordingTransport {
    fn is_locator_supported(&self, _locator: &Locator) -> bool {
      true
    }
    fn open_channel(&self, _locator: &Locator) -> Result<()> {
      Ok(())
    }
    fn close_channel(&self, _locator: &Locator) {}
    fn send(&self, buffer: &[u8], to: &Locator, _deadline: Option<Instant>) -> Result<()> {
      if *self.fail.lock().unwrap() {
        return Err(Error::transport("injected failure"));
      }
      let message = Message::read_from_buffer(&Bytes::copy_from_slice(buffer)).unwrap();
      self.sent.lock().unwrap().push((*to, message));
      Ok(())
    }
  }

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

  fn reader_locator(n: u8) -> Locator {
    Locator::UdpV4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, n), 7411))
  }

  fn reliable_qos() -> QosPolicies {
    QosPolicies::builder()
      .reliable(Duration::from_millis(100))
      .build()
  }

  fn make_writer(transport: Arc<RecordingTransport>) -> StatefulWriter {
    let (status_sender, _status_receiver) = sync_status_channel(16);
    StatefulWriter::new(WriterIngredients {
      guid: writer_guid(),
      topic_name: "square".to_string(),
      type_name: "ShapeType".to_string(),
      qos: reliable_qos(),
      cache_config: HistoryCacheConfig::default(),
      heartbeat_period: Duration::from_secs(3),
      nack_response_delay: Duration::ZERO,
      nack_suppression_duration: Duration::ZERO,
      max_data_size: 1024,
      pool: PayloadPool::new(PayloadPoolConfig::default()),
      transport,
      status_sender,
      flow_filters: FlowFilterChain::unlimited(),
    })
  }

  fn payload(n: u8) -> Vec<u8> {
    let mut bytes = vec![0x00, 0x01, 0x00, 0x00];
    bytes.extend_from_slice(&[n; 16]);
    bytes
  }

  fn find_data_seqs(messages: &[(Locator, Message)]) -> Vec<i64> {
    use crate::messages::submessages::submessages::WriterSubmessage;
    use crate::rtps::SubmessageBody;
    messages
      .iter()
      .flat_map(|(_, m)| &m.submessages)
      .filter_map(|s| match &s.body {
        SubmessageBody::Writer(WriterSubmessage::Data(d, _)) => Some(d.writer_sn.as_i64()),
        _ => None,
      })
      .collect()
  }

  #[test]
  fn writes_are_sent_to_matched_reader() {
    let transport = RecordingTransport::new();
    let mut writer = make_writer(transport.clone());
    writer.matched_reader_add(
      reader_guid(9),
      vec![reader_locator(9)],
      vec![],
      false,
      &reliable_qos(),
    );
    transport.clear();

    writer
      .write_change(ChangeKind::Alive, InstanceHandle::NIL, Some(&payload(1)), None)
      .unwrap();
    writer.send_unsent_changes();

    let sent = transport.messages();
    assert_eq!(find_data_seqs(&sent), vec![1]);
    assert_eq!(sent[0].0, reader_locator(9));
  }

  #[test]
  fn acknack_ack_purges_and_nack_triggers_resend() {
    use crate::messages::submessages::submessages::AckNack;
    use crate::structure::sequence_number::SequenceNumberSet;

    let transport = RecordingTransport::new();
    let mut writer = make_writer(transport.clone());
    writer.matched_reader_add(
      reader_guid(9),
      vec![reader_locator(9)],
      vec![],
      false,
      &reliable_qos(),
    );
    for n in 1..=3 {
      writer
        .write_change(ChangeKind::Alive, InstanceHandle::NIL, Some(&payload(n)), None)
        .unwrap();
    }
    writer.send_unsent_changes();
    transport.clear();

    // reader acks 1, wants 2 again
    let mut sn_state = SequenceNumberSet::new_empty(SequenceNumber::from(2));
    sn_state.insert(SequenceNumber::from(2));
    let purged = writer.handle_ack_submessage(
      reader_guid(9).prefix,
      &AckSubmessage::AckNack(AckNack {
        reader_id: reader_guid(9).entity_id,
        writer_id: writer_guid().entity_id,
        reader_sn_state: sn_state,
        count: 1,
      }),
    );
    assert!(purged, "seq 1 acked by the only reader, must purge");
    assert_eq!(writer.history.get_min_seq(), Some(SequenceNumber::from(2)));

    // nack response delay is zero but runs via scheduler; emulate it
    writer.send_requested_changes(reader_guid(9));
    assert_eq!(find_data_seqs(&transport.messages()), vec![2]);
  }

  #[test]
  fn stale_acknack_count_is_ignored() {
    use crate::messages::submessages::submessages::AckNack;
    use crate::structure::sequence_number::SequenceNumberSet;

    let transport = RecordingTransport::new();
    let mut writer = make_writer(transport.clone());
    writer.matched_reader_add(
      reader_guid(9),
      vec![reader_locator(9)],
      vec![],
      false,
      &reliable_qos(),
    );
    writer
      .write_change(ChangeKind::Alive, InstanceHandle::NIL, Some(&payload(1)), None)
      .unwrap();
    writer.send_unsent_changes();

    let acknack = |count| {
      AckSubmessage::AckNack(AckNack {
        reader_id: reader_guid(9).entity_id,
        writer_id: writer_guid().entity_id,
        reader_sn_state: SequenceNumberSet::new_empty(SequenceNumber::from(2)),
        count,
      })
    };
    assert!(writer.handle_ack_submessage(reader_guid(9).prefix, &acknack(5)));
    // same and lower counts are duplicates
    assert!(!writer.handle_ack_submessage(reader_guid(9).prefix, &acknack(5)));
    assert!(!writer.handle_ack_submessage(reader_guid(9).prefix, &acknack(4)));
  }

  #[test]
  fn heartbeat_final_flag_tracks_unacked() {
    use crate::messages::submessages::submessages::{HEARTBEAT_Flags, WriterSubmessage};
    use crate::rtps::SubmessageBody;

    let transport = RecordingTransport::new();
    let mut writer = make_writer(transport.clone());
    writer.matched_reader_add(
      reader_guid(9),
      vec![reader_locator(9)],
      vec![],
      false,
      &reliable_qos(),
    );
    transport.clear();
    writer.perform_heartbeat();
    let final_flag = |messages: &[(Locator, Message)]| {
      messages
        .iter()
        .flat_map(|(_, m)| &m.submessages)
        .find_map(|s| match &s.body {
          SubmessageBody::Writer(WriterSubmessage::Heartbeat(_, flags)) => {
            Some(flags.contains(HEARTBEAT_Flags::Final))
          }
          _ => None,
        })
        .unwrap()
    };
    assert!(final_flag(&transport.messages()), "nothing outstanding");

    writer
      .write_change(ChangeKind::Alive, InstanceHandle::NIL, Some(&payload(1)), None)
      .unwrap();
    transport.clear();
    writer.perform_heartbeat();
    assert!(!final_flag(&transport.messages()), "seq 1 unacknowledged");
  }

  #[test]
  fn transient_local_late_joiner_gets_cache_volatile_does_not() {
    let transport = RecordingTransport::new();
    let mut writer = make_writer(transport.clone());
    for n in 1..=2 {
      writer
        .write_change(ChangeKind::Alive, InstanceHandle::NIL, Some(&payload(n)), None)
        .unwrap();
    }

    let tl_qos = QosPolicies::builder()
      .reliable(Duration::from_millis(100))
      .durability(Durability::TransientLocal)
      .build();
    writer.matched_reader_add(
      reader_guid(9),
      vec![reader_locator(9)],
      vec![],
      false,
      &tl_qos,
    );
    assert_eq!(find_data_seqs(&transport.messages()), vec![1, 2]);

    transport.clear();
    writer.matched_reader_add(
      reader_guid(10),
      vec![reader_locator(10)],
      vec![],
      false,
      &reliable_qos(), // volatile by default
    );
    assert!(find_data_seqs(&transport.messages()).is_empty());
  }

  #[test]
  fn evicted_requested_change_turns_into_gap() {
    use crate::messages::submessages::submessages::{AckNack, WriterSubmessage};
    use crate::rtps::SubmessageBody;
    use crate::structure::sequence_number::SequenceNumberSet;
    use crate::qos::policy::History;

    let transport = RecordingTransport::new();
    let (status_sender, _r) = sync_status_channel(4);
    let mut writer = StatefulWriter::new(WriterIngredients {
      guid: writer_guid(),
      topic_name: "square".to_string(),
      type_name: "ShapeType".to_string(),
      qos: reliable_qos(),
      cache_config: HistoryCacheConfig {
        history: History::KeepLast { depth: 1 },
        ..Default::default()
      },
      heartbeat_period: Duration::from_secs(3),
      nack_response_delay: Duration::ZERO,
      nack_suppression_duration: Duration::ZERO,
      max_data_size: 1024,
      pool: PayloadPool::new(PayloadPoolConfig::default()),
      transport: transport.clone(),
      status_sender,
      flow_filters: FlowFilterChain::unlimited(),
    });
    writer.matched_reader_add(
      reader_guid(9),
      vec![reader_locator(9)],
      vec![],
      false,
      &reliable_qos(),
    );
    // seq 1 evicted by KEEP_LAST(1) before being acked
    for n in 1..=2 {
      writer
        .write_change(ChangeKind::Alive, InstanceHandle::NIL, Some(&payload(n)), None)
        .unwrap();
    }
    writer.send_unsent_changes();
    transport.clear();

    // reader nacks 1, which is gone
    let mut sn_state = SequenceNumberSet::new_empty(SequenceNumber::from(1));
    sn_state.insert(SequenceNumber::from(1));
    writer.handle_ack_submessage(
      reader_guid(9).prefix,
      &AckSubmessage::AckNack(AckNack {
        reader_id: reader_guid(9).entity_id,
        writer_id: writer_guid().entity_id,
        reader_sn_state: sn_state,
        count: 1,
      }),
    );
    writer.send_requested_changes(reader_guid(9));

    let has_gap_for_1 = transport
      .messages()
      .iter()
      .flat_map(|(_, m)| &m.submessages)
      .any(|s| match &s.body {
        SubmessageBody::Writer(WriterSubmessage::Gap(gap, _)) => {
          gap.gap_start == SequenceNumber::from(1)
        }
        _ => false,
      });
    assert!(has_gap_for_1);
  }

  #[test]
  fn large_payload_goes_out_fragmented() {
    use crate::messages::submessages::submessages::WriterSubmessage;
    use crate::rtps::SubmessageBody;

    let transport = RecordingTransport::new();
    let mut writer = make_writer(transport.clone());
    writer.matched_reader_add(
      reader_guid(9),
      vec![reader_locator(9)],
      vec![],
      false,
      &reliable_qos(),
    );
    transport.clear();

    let big = vec![0xAB; 3000]; // max_data_size is 1024
    writer
      .write_change(ChangeKind::Alive, InstanceHandle::NIL, Some(&big), None)
      .unwrap();
    writer.send_unsent_changes();

    let frags: Vec<u32> = transport
      .messages()
      .iter()
      .flat_map(|(_, m)| &m.submessages)
      .filter_map(|s| match &s.body {
        SubmessageBody::Writer(WriterSubmessage::DataFrag(frag, _)) => {
          Some(frag.fragment_starting_num.0)
        }
        _ => None,
      })
      .collect();
    assert_eq!(frags, vec![1, 2, 3]);
  }

  #[test]
  fn build_gaps_coalesces_runs() {
    let seqs: BTreeSet<SequenceNumber> =
      [1i64, 2, 3, 7, 9].iter().map(|n| SequenceNumber::from(*n)).collect();
    let gaps = build_gaps(seqs, EntityId::UNKNOWN, writer_guid().entity_id);
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].gap_start, SequenceNumber::from(1));
    assert_eq!(gaps[0].gap_list.base(), SequenceNumber::from(4));
    let listed: Vec<i64> = gaps[0].gap_list.iter().map(i64::from).collect();
    assert_eq!(listed, vec![7, 9]);
  }
}
