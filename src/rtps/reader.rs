use std::{
  collections::{BTreeSet, BTreeMap, VecDeque},
  sync::{Arc, Mutex, Weak},
};

use enumflags2::BitFlags;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use rand::Rng;

use crate::{
  messages::submessages::{
    elements::parameter::ParameterId,
    submessages::{
      AckNack, Data, DataFrag, Gap, Heartbeat, DATAFRAG_Flags, DATA_Flags,
    },
  },
  qos::QosPolicies,
  rtps::{
    message::MessageBuilder,
    message_receiver::MessageReceiverState,
    stateless_reader::StatelessReader,
    writer::send_message,
    writer_proxy::RtpsWriterProxy,
  },
  statusevents::{
    CountWithChange, DataReaderStatus, SampleRejectedStatusKind, StatusChannelSender,
  },
  structure::{
    cache_change::{CacheChange, ChangeKind, InstanceHandle},
    duration::Duration,
    entity::RTPSEntity,
    guid::{GuidPrefix, GUID},
    history_cache::{HistoryCacheConfig, RejectedReason},
    locator::Locator,
    payload_pool::PayloadPool,
    sequence_number::{SequenceNumber, SequenceNumberSet},
    time::Timestamp,
  },
  timed_event::{AfterFire, TimedEventScheduler},
  transport::Transport,
};

/// Everything needed to construct a reader.
pub struct ReaderIngredients {
  pub guid: GUID,
  pub topic_name: String,
  pub type_name: String,
  pub qos: QosPolicies,
  pub cache_config: HistoryCacheConfig,
  pub heartbeat_response_delay: Duration,
  pub pool: PayloadPool,
  pub transport: Arc<dyn Transport>,
  pub status_sender: StatusChannelSender<DataReaderStatus>,
  /// Receives this reader's EntityId whenever new samples become
  /// available to take.
  pub data_available_notifier: Option<crossbeam_channel::Sender<crate::structure::guid::EntityId>>,
}

/// Either flavour of local reader, as stored in the Participant's
/// endpoint registry.
pub enum ReaderKind {
  Stateful(StatefulReader),
  Stateless(StatelessReader),
}

pub type SharedReader = Arc<Mutex<ReaderKind>>;

impl ReaderKind {
  pub fn guid(&self) -> GUID {
    match self {
      Self::Stateful(r) => r.guid(),
      Self::Stateless(r) => r.guid(),
    }
  }

  pub fn topic_name(&self) -> &str {
    match self {
      Self::Stateful(r) => &r.topic_name,
      Self::Stateless(r) => &r.topic_name,
    }
  }

  pub fn contains_writer(&self, writer_id: crate::structure::guid::EntityId) -> bool {
    match self {
      Self::Stateful(r) => r
        .matched_writers
        .keys()
        .any(|guid| guid.entity_id == writer_id),
      Self::Stateless(r) => r.contains_writer_entity(writer_id),
    }
  }

  pub fn handle_data_msg(
    &mut self,
    data: Data,
    flags: BitFlags<DATA_Flags>,
    mr_state: &MessageReceiverState,
  ) {
    match self {
      Self::Stateful(r) => r.handle_data_msg(data, flags, mr_state),
      Self::Stateless(r) => r.handle_data_msg(data, flags, mr_state),
    }
  }

  pub fn handle_heartbeat_msg(
    &mut self,
    heartbeat: &Heartbeat,
    final_flag: bool,
    mr_state: &MessageReceiverState,
  ) {
    match self {
      Self::Stateful(r) => r.handle_heartbeat_msg(heartbeat, final_flag, mr_state),
      // stateless readers are best-effort: heartbeats are not for them
      Self::Stateless(_) => {}
    }
  }

  pub fn handle_gap_msg(&mut self, gap: &Gap, mr_state: &MessageReceiverState) {
    match self {
      Self::Stateful(r) => r.handle_gap_msg(gap, mr_state),
      Self::Stateless(_) => {}
    }
  }

  pub fn handle_datafrag_msg(
    &mut self,
    datafrag: &DataFrag,
    flags: BitFlags<DATAFRAG_Flags>,
    mr_state: &MessageReceiverState,
  ) {
    match self {
      Self::Stateful(r) => r.handle_datafrag_msg(datafrag, flags, mr_state),
      Self::Stateless(_) => {
        trace!("stateless reader ignores DATA_FRAG");
      }
    }
  }

  pub fn take(&mut self, max_samples: usize) -> Vec<CacheChange> {
    match self {
      Self::Stateful(r) => r.take(max_samples),
      Self::Stateless(r) => r.take(max_samples),
    }
  }

  pub fn type_name(&self) -> &str {
    match self {
      Self::Stateful(r) => &r.type_name,
      Self::Stateless(r) => &r.type_name,
    }
  }

  pub fn qos(&self) -> &QosPolicies {
    match self {
      Self::Stateful(r) => &r.qos,
      Self::Stateless(r) => &r.qos,
    }
  }

  pub fn matched_writer_add(
    &mut self,
    remote_writer_guid: GUID,
    unicast_locator_list: Vec<Locator>,
    multicast_locator_list: Vec<Locator>,
  ) {
    match self {
      Self::Stateful(r) => {
        r.matched_writer_add(remote_writer_guid, unicast_locator_list, multicast_locator_list);
      }
      Self::Stateless(r) => r.matched_writer_add(remote_writer_guid),
    }
  }

  pub fn matched_writer_remove(&mut self, remote_writer_guid: GUID) -> bool {
    match self {
      Self::Stateful(r) => r.matched_writer_remove(remote_writer_guid),
      Self::Stateless(r) => r.matched_writer_remove(remote_writer_guid),
    }
  }
}

/// Reliable RTPS reader: tracks each matched writer through a
/// [`RtpsWriterProxy`], answers HEARTBEAT with ACKNACK, reorders into
/// per-writer FIFO before making samples available.
pub struct StatefulReader {
  guid: GUID,
  pub topic_name: String,
  pub type_name: String,
  pub qos: QosPolicies,
  cache_config: HistoryCacheConfig,
  pool: PayloadPool,
  matched_writers: BTreeMap<GUID, RtpsWriterProxy>,
  available_buffer: VecDeque<CacheChange>,

  heartbeat_response_delay: Duration,
  acknack_count: i32,
  // writers with an ACKNACK response already scheduled
  acknack_pending: BTreeSet<GUID>,

  transport: Arc<dyn Transport>,
  status_sender: StatusChannelSender<DataReaderStatus>,
  data_available_notifier: Option<crossbeam_channel::Sender<crate::structure::guid::EntityId>>,

  scheduler: Option<Arc<TimedEventScheduler>>,
  self_ref: Weak<Mutex<ReaderKind>>,

  matched_total: i32,
  matched_current: i32,
  alive_writers: i32,
  not_alive_writers: i32,
  sample_lost_count: i32,
  sample_rejected_count: i32,
  deadline_missed_count: i32,
}

impl RTPSEntity for StatefulReader {
  fn guid(&self) -> GUID {
    self.guid
  }
}

impl StatefulReader {
  pub fn new(i: ReaderIngredients) -> Self {
    Self {
      guid: i.guid,
      topic_name: i.topic_name,
      type_name: i.type_name,
      qos: i.qos,
      cache_config: i.cache_config,
      pool: i.pool,
      matched_writers: BTreeMap::new(),
      available_buffer: VecDeque::new(),
      heartbeat_response_delay: i.heartbeat_response_delay,
      acknack_count: 0,
      acknack_pending: BTreeSet::new(),
      transport: i.transport,
      status_sender: i.status_sender,
      data_available_notifier: i.data_available_notifier,
      scheduler: None,
      self_ref: Weak::new(),
      matched_total: 0,
      matched_current: 0,
      alive_writers: 0,
      not_alive_writers: 0,
      sample_lost_count: 0,
      sample_rejected_count: 0,
      deadline_missed_count: 0,
    }
  }

  pub(crate) fn attach_scheduler(
    &mut self,
    scheduler: Arc<TimedEventScheduler>,
    self_ref: Weak<Mutex<ReaderKind>>,
  ) {
    self.scheduler = Some(scheduler);
    self.self_ref = self_ref;
  }

  pub fn matched_writer_add(
    &mut self,
    remote_writer_guid: GUID,
    unicast_locator_list: Vec<Locator>,
    multicast_locator_list: Vec<Locator>,
  ) {
    let fresh = !self.matched_writers.contains_key(&remote_writer_guid);
    self.matched_writers.insert(
      remote_writer_guid,
      RtpsWriterProxy::new(
        remote_writer_guid,
        unicast_locator_list,
        multicast_locator_list,
        self.cache_config.clone(),
      ),
    );
    if fresh {
      self.matched_total += 1;
      self.matched_current += 1;
      self.alive_writers += 1;
      self
        .status_sender
        .try_send(DataReaderStatus::SubscriptionMatched {
          total: CountWithChange::new(self.matched_total, 1),
          current: CountWithChange::new(self.matched_current, 1),
          writer: remote_writer_guid,
        });
      // a zero-state ACKNACK solicits a HEARTBEAT, and any
      // TRANSIENT_LOCAL backlog with it
      if self.qos.is_reliable() {
        self.send_preemptive_acknack(remote_writer_guid);
      }
    }
  }

  pub fn matched_writer_remove(&mut self, remote_writer_guid: GUID) -> bool {
    match self.matched_writers.remove(&remote_writer_guid) {
      Some(mut proxy) => {
        proxy.clear();
        self.matched_current -= 1;
        self.alive_writers -= 1;
        self.not_alive_writers += 1;
        self
          .status_sender
          .try_send(DataReaderStatus::SubscriptionMatched {
            total: CountWithChange::new(self.matched_total, 0),
            current: CountWithChange::new(self.matched_current, -1),
            writer: remote_writer_guid,
          });
        self
          .status_sender
          .try_send(DataReaderStatus::LivelinessChanged {
            alive_total: CountWithChange::new(self.alive_writers, -1),
            not_alive_total: CountWithChange::new(self.not_alive_writers, 1),
          });
        true
      }
      None => false,
    }
  }

  pub fn is_matched_with(&self, writer: GUID) -> bool {
    self.matched_writers.contains_key(&writer)
  }

  pub fn handle_data_msg(
    &mut self,
    data: Data,
    flags: BitFlags<DATA_Flags>,
    mr_state: &MessageReceiverState,
  ) {
    let writer_guid = GUID::new(mr_state.source_guid_prefix, data.writer_id);
    let Some(proxy) = self.matched_writers.get_mut(&writer_guid) else {
      trace!("DATA from unmatched writer {writer_guid:?}");
      return;
    };
    if !proxy.should_accept_change(data.writer_sn) {
      trace!("duplicate DATA {:?} from {writer_guid:?}", data.writer_sn);
      return;
    }

    let change = match change_from_data(&data, flags, writer_guid, mr_state, &self.pool) {
      Ok(change) => change,
      Err(reason) => {
        self.report_rejected(reason);
        return;
      }
    };

    if let Err(reason) = proxy.receive_change(change) {
      self.report_rejected(reason);
      return;
    }
    self.drain_available(writer_guid);
  }

  pub fn handle_datafrag_msg(
    &mut self,
    datafrag: &DataFrag,
    flags: BitFlags<DATAFRAG_Flags>,
    mr_state: &MessageReceiverState,
  ) {
    let writer_guid = GUID::new(mr_state.source_guid_prefix, datafrag.writer_id);
    let Some(proxy) = self.matched_writers.get_mut(&writer_guid) else {
      return;
    };
    let Some(payload) = proxy.assemble_fragment(
      datafrag.writer_sn,
      datafrag.fragment_starting_num.0,
      datafrag.fragments_in_submessage,
      datafrag.fragment_size,
      datafrag.data_size,
      &datafrag.serialized_payload,
    ) else {
      return;
    };

    // sample complete, ingest like a plain DATA
    let kind = change_kind_from_inline_qos(
      datafrag.inline_qos.as_ref(),
      flags.contains(DATAFRAG_Flags::Key),
    );
    let instance_handle =
      instance_handle_from_inline_qos(datafrag.inline_qos.as_ref()).unwrap_or(InstanceHandle::NIL);
    let pooled = match self.pool.get_payload(&payload) {
      Ok(pooled) => pooled,
      Err(_) => {
        self.report_rejected(RejectedReason::SamplesLimit);
        return;
      }
    };
    let change = CacheChange::new(kind, writer_guid, datafrag.writer_sn, instance_handle, Some(pooled))
      .with_timestamp(mr_state.source_timestamp)
      .with_inline_qos(datafrag.inline_qos.clone());
    let proxy = self.matched_writers.get_mut(&writer_guid).unwrap();
    if let Err(reason) = proxy.receive_change(change) {
      self.report_rejected(reason);
      return;
    }
    self.drain_available(writer_guid);
  }

  pub fn handle_heartbeat_msg(
    &mut self,
    heartbeat: &Heartbeat,
    final_flag: bool,
    mr_state: &MessageReceiverState,
  ) {
    let writer_guid = GUID::new(mr_state.source_guid_prefix, heartbeat.writer_id);
    let Some(proxy) = self.matched_writers.get_mut(&writer_guid) else {
      trace!("HEARTBEAT from unmatched writer {writer_guid:?}");
      return;
    };

    let outcome = proxy.handle_heartbeat(heartbeat.first_sn, heartbeat.last_sn, heartbeat.count);
    if !outcome.accepted {
      return;
    }
    if !outcome.lost.is_empty() {
      self.sample_lost_count += outcome.lost.len() as i32;
      self.status_sender.try_send(DataReaderStatus::SampleLost {
        count: CountWithChange::new(self.sample_lost_count, outcome.lost.len() as i32),
      });
    }
    // cursor may have moved past lost samples
    self.drain_available(writer_guid);

    if outcome.missing_changes || !final_flag {
      self.schedule_acknack(writer_guid);
    }
  }

  pub fn handle_gap_msg(&mut self, gap: &Gap, mr_state: &MessageReceiverState) {
    let writer_guid = GUID::new(mr_state.source_guid_prefix, gap.writer_id);
    let Some(proxy) = self.matched_writers.get_mut(&writer_guid) else {
      return;
    };

    // irrelevant set: the contiguous range plus the explicit list
    let mut irrelevant = Vec::new();
    let mut seq = gap.gap_start;
    while seq < gap.gap_list.base() {
      irrelevant.push(seq);
      seq = seq.next();
    }
    irrelevant.extend(gap.gap_list.iter());
    proxy.irrelevant_changes_set(irrelevant.into_iter());
    self.drain_available(writer_guid);
  }

  /// Move everything deliverable into the take() buffer, per-writer
  /// FIFO preserved.
  fn drain_available(&mut self, writer_guid: GUID) {
    let Some(proxy) = self.matched_writers.get_mut(&writer_guid) else {
      return;
    };
    let newly_available = proxy.pop_available();
    if newly_available.is_empty() {
      return;
    }
    self.available_buffer.extend(newly_available);
    if let Some(notifier) = &self.data_available_notifier {
      let _ = notifier.try_send(self.guid.entity_id);
    }
  }

  /// Take up to `max_samples` available samples, oldest first.
  pub fn take(&mut self, max_samples: usize) -> Vec<CacheChange> {
    let n = max_samples.min(self.available_buffer.len());
    self.available_buffer.drain(..n).collect()
  }

  pub fn available_len(&self) -> usize {
    self.available_buffer.len()
  }

  fn schedule_acknack(&mut self, writer_guid: GUID) {
    if !self.acknack_pending.insert(writer_guid) {
      return; // one response per solicitation window
    }
    let Some(scheduler) = self.scheduler.clone() else {
      // no scheduler attached (unit tests): respond immediately
      self.acknack_pending.remove(&writer_guid);
      self.send_acknack_to(writer_guid);
      return;
    };
    let self_ref = self.self_ref.clone();
    // jittered to avoid synchronized ACKNACK storms after a multicast
    // heartbeat
    let jitter = rand::rng().random_range(0.75..1.25);
    let delay: std::time::Duration = self.heartbeat_response_delay.mul_f64(jitter).into();
    scheduler.schedule(delay, move || {
      if let Some(cell) = self_ref.upgrade() {
        if let ReaderKind::Stateful(r) = &mut *cell.lock().unwrap() {
          r.acknack_pending.remove(&writer_guid);
          r.send_acknack_to(writer_guid);
        }
      }
      AfterFire::Done
    });
  }

  fn send_acknack_to(&mut self, writer_guid: GUID) {
    let Some(proxy) = self.matched_writers.get(&writer_guid) else {
      return;
    };
    let base = proxy.acknack_base();
    let mut sn_state = SequenceNumberSet::new_empty(base);
    for seq in proxy.missing_changes() {
      if !sn_state.insert(seq) {
        break; // bitmap window full, the rest goes in a later round
      }
    }
    let missing_any = !sn_state.is_empty();
    self.acknack_count += 1;

    let acknack = AckNack {
      reader_id: self.guid.entity_id,
      writer_id: writer_guid.entity_id,
      reader_sn_state: sn_state,
      count: self.acknack_count,
    };
    let message = MessageBuilder::new()
      .dst_submessage(writer_guid.prefix)
      .acknack_msg(acknack, !missing_any)
      .add_header_and_build(self.guid.prefix);
    let locators = proxy.send_locators().to_vec();
    send_message(&*self.transport, &message, &locators);
  }

  /// Zero-state ACKNACK sent on match to let the writer know we exist.
  fn send_preemptive_acknack(&mut self, writer_guid: GUID) {
    self.acknack_count += 1;
    let acknack = AckNack {
      reader_id: self.guid.entity_id,
      writer_id: writer_guid.entity_id,
      reader_sn_state: SequenceNumberSet::new_empty(SequenceNumber::from(1)),
      count: self.acknack_count,
    };
    let message = MessageBuilder::new()
      .dst_submessage(writer_guid.prefix)
      .acknack_msg(acknack, false)
      .add_header_and_build(self.guid.prefix);
    let locators = self
      .matched_writers
      .get(&writer_guid)
      .map(|p| p.send_locators().to_vec())
      .unwrap_or_default();
    send_message(&*self.transport, &message, &locators);
  }

  fn report_rejected(&mut self, reason: RejectedReason) {
    self.sample_rejected_count += 1;
    let last_reason = match reason {
      RejectedReason::InstancesLimit => SampleRejectedStatusKind::ByInstancesLimit,
      RejectedReason::SamplesLimit | RejectedReason::BytesLimit => {
        SampleRejectedStatusKind::BySamplesLimit
      }
      RejectedReason::SamplesPerInstanceLimit => {
        SampleRejectedStatusKind::BySamplesPerInstanceLimit
      }
    };
    self.status_sender.try_send(DataReaderStatus::SampleRejected {
      count: CountWithChange::new(self.sample_rejected_count, 1),
      last_reason,
    });
  }

  /// Periodic deadline supervision: a matched writer that has not
  /// produced a sample within `period` misses the requested deadline.
  pub fn check_deadlines(&mut self, period: std::time::Duration) {
    let now = std::time::Instant::now();
    let mut missed = 0;
    for proxy in self.matched_writers.values() {
      if now.duration_since(proxy.last_alive) > period {
        missed += 1;
      }
    }
    if missed > 0 {
      self.deadline_missed_count += missed;
      self
        .status_sender
        .try_send(DataReaderStatus::RequestedDeadlineMissed {
          count: CountWithChange::new(self.deadline_missed_count, missed),
        });
    }
  }

  pub(crate) fn report_requested_incompatible_qos(
    &mut self,
    writer: GUID,
    policy: crate::qos::QosPolicyId,
    count: i32,
  ) {
    self
      .status_sender
      .try_send(DataReaderStatus::RequestedIncompatibleQos {
        count: CountWithChange::new(count, 1),
        last_policy_id: policy,
        writer,
      });
  }
}

/// Interpret one DATA submessage as a cache change.
fn change_from_data(
  data: &Data,
  flags: BitFlags<DATA_Flags>,
  writer_guid: GUID,
  mr_state: &MessageReceiverState,
  pool: &PayloadPool,
) -> std::result::Result<CacheChange, RejectedReason> {
  let kind = change_kind_from_inline_qos(
    data.inline_qos.as_ref(),
    flags.contains(DATA_Flags::Key),
  );
  let instance_handle =
    instance_handle_from_inline_qos(data.inline_qos.as_ref()).unwrap_or(InstanceHandle::NIL);

  let pooled = match &data.serialized_payload {
    Some(payload) => Some(
      pool
        .get_payload(payload)
        .map_err(|_| RejectedReason::SamplesLimit)?,
    ),
    None => None,
  };

  Ok(
    CacheChange::new(kind, writer_guid, data.writer_sn, instance_handle, pooled)
      .with_timestamp(mr_state.source_timestamp)
      .with_inline_qos(data.inline_qos.clone()),
  )
}

fn change_kind_from_inline_qos(
  inline_qos: Option<&crate::messages::submessages::elements::parameter_list::ParameterList>,
  key_flag: bool,
) -> ChangeKind {
  if !key_flag {
    return ChangeKind::Alive;
  }
  inline_qos
    .and_then(|pl| pl.find(ParameterId::PID_STATUS_INFO))
    .filter(|bytes| bytes.len() >= 4)
    .map(|bytes| {
      ChangeKind::from_status_info(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    })
    .unwrap_or(ChangeKind::NotAliveDisposed)
}

fn instance_handle_from_inline_qos(
  inline_qos: Option<&crate::messages::submessages::elements::parameter_list::ParameterList>,
) -> Option<InstanceHandle> {
  inline_qos
    .and_then(|pl| pl.find(ParameterId::PID_KEY_HASH))
    .filter(|bytes| bytes.len() >= 16)
    .map(|bytes| {
      let mut hash = [0; 16];
      hash.copy_from_slice(&bytes[..16]);
      InstanceHandle::from_key_hash(hash)
    })
}
