use std::sync::Arc;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  error::{Error, Result},
  qos::QosPolicies,
  rtps::{
    flow_control::{FlowFilterChain, FlowQueueItem},
    message::MessageBuilder,
    writer::send_message,
  },
  statusevents::{DataWriterStatus, StatusChannelSender},
  structure::{
    cache_change::{CacheChange, ChangeKind, InstanceHandle},
    entity::RTPSEntity,
    guid::{EntityId, GuidPrefix, GUID},
    history_cache::{HistoryCache, HistoryCacheConfig},
    locator::Locator,
    payload_pool::PayloadPool,
    sequence_number::SequenceNumber,
    time::Timestamp,
  },
  transport::Transport,
};

/// One destination of a stateless writer. No per-reader protocol state
/// beyond the address itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReaderLocator {
  pub locator: Locator,
  pub expects_inline_qos: bool,
}

/// Best-effort RTPS writer: sends each sample once to a fixed locator
/// list, keeps no acknowledgment state, never emits HEARTBEAT. The SPDP
/// announcement writer is the canonical user.
pub struct StatelessWriter {
  guid: GUID,
  pub topic_name: String,
  pub qos: QosPolicies,
  history: HistoryCache,
  pool: PayloadPool,
  reader_locators: Vec<ReaderLocator>,
  // matched readers contribute their locators but no protocol state
  matched_readers: std::collections::BTreeMap<GUID, Vec<Locator>>,
  last_change_sequence_number: SequenceNumber,
  transport: Arc<dyn Transport>,
  status_sender: StatusChannelSender<DataWriterStatus>,
  flow_filters: FlowFilterChain,
}

impl RTPSEntity for StatelessWriter {
  fn guid(&self) -> GUID {
    self.guid
  }
}

impl StatelessWriter {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    guid: GUID,
    topic_name: String,
    qos: QosPolicies,
    cache_config: HistoryCacheConfig,
    pool: PayloadPool,
    transport: Arc<dyn Transport>,
    status_sender: StatusChannelSender<DataWriterStatus>,
    flow_filters: FlowFilterChain,
  ) -> Self {
    Self {
      guid,
      topic_name,
      qos,
      history: HistoryCache::new(cache_config),
      pool,
      reader_locators: Vec::new(),
      matched_readers: std::collections::BTreeMap::new(),
      last_change_sequence_number: SequenceNumber::ZERO,
      transport,
      status_sender,
      flow_filters,
    }
  }

  pub fn reader_locator_add(&mut self, reader_locator: ReaderLocator) {
    if !self.reader_locators.contains(&reader_locator) {
      self.reader_locators.push(reader_locator);
    }
  }

  pub fn reader_locator_remove(&mut self, locator: &Locator) {
    self.reader_locators.retain(|rl| rl.locator != *locator);
  }

  /// A matched best-effort reader: remembered only as a set of
  /// destinations.
  pub fn matched_reader_add(&mut self, remote_reader_guid: GUID, locators: Vec<Locator>) {
    self.matched_readers.insert(remote_reader_guid, locators);
  }

  pub fn matched_reader_remove(&mut self, remote_reader_guid: GUID) -> bool {
    self.matched_readers.remove(&remote_reader_guid).is_some()
  }

  pub fn is_matched_with(&self, reader: GUID) -> bool {
    self.matched_readers.contains_key(&reader)
  }

  pub fn reader_locators(&self) -> impl Iterator<Item = &ReaderLocator> {
    self.reader_locators.iter()
  }

  pub fn history(&self) -> &HistoryCache {
    &self.history
  }

  /// Append a sample and send it once to every reader locator.
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
      Ok(_outcome) => {
        self.last_change_sequence_number = seq;
        self.send_change(seq);
        Ok(seq)
      }
      Err(reason) => {
        debug!(
          "StatelessWriter {:?} cache rejected seq {seq:?}: {reason:?}",
          self.guid
        );
        Err(Error::CacheFull)
      }
    }
  }

  /// Re-send everything still in history, the periodic announcement
  /// path of SPDP.
  pub fn resend_all(&mut self) {
    let seqs: Vec<SequenceNumber> = self.history.changes().map(|c| c.sequence_number).collect();
    for seq in seqs {
      self.send_change(seq);
    }
  }

  fn send_change(&mut self, seq: SequenceNumber) {
    let Some(change) = self.history.get_change(seq).cloned() else {
      return;
    };
    let mut items = vec![FlowQueueItem {
      seq,
      payload_size: change.payload_size() as u32,
    }];
    self.flow_filters.filter(&mut items);
    if items.is_empty() {
      trace!("StatelessWriter {:?}: flow control withheld {seq:?}", self.guid);
      return;
    }

    // best-effort DATA addressed to no reader in particular
    let message = MessageBuilder::new()
      .ts_msg(change.source_timestamp)
      .data_msg(&change, EntityId::UNKNOWN)
      .add_header_and_build(self.guid.prefix);

    // deduplicated union of fixed locators and matched readers'
    let mut destinations: Vec<Locator> = self
      .reader_locators
      .iter()
      .map(|rl| rl.locator)
      .chain(self.matched_readers.values().flatten().copied())
      .collect();
    destinations.sort();
    destinations.dedup();

    let mut sent_any = false;
    for locator in &destinations {
      if send_message(&*self.transport, &message, std::slice::from_ref(locator)) {
        sent_any = true;
      }
    }
    if sent_any {
      self.flow_filters.notify_change_sent(&items[0]);
    }
  }

  /// Remove a sample, e.g. when announcement content is replaced.
  pub fn remove_change(&mut self, seq: SequenceNumber) -> bool {
    self.history.remove_change(seq)
  }

  pub fn participant_guid_prefix(&self) -> GuidPrefix {
    self.guid.prefix
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
        count: crate::statusevents::CountWithChange::new(count, 1),
        last_policy_id: policy,
        reader,
      });
  }
}

#[cfg(test)]
mod tests {
  use std::net::{Ipv4Addr, SocketAddrV4};

  use crate::{
    messages::submessages::submessages::WriterSubmessage,
    rtps::{writer::tests::RecordingTransport, SubmessageBody},
    statusevents::sync_status_channel,
    structure::{
      guid::EntityKind,
      payload_pool::{PayloadPool, PayloadPoolConfig},
    },
  };
  use super::*;

  fn make_writer(transport: Arc<RecordingTransport>) -> StatelessWriter {
    let (status_sender, _r) = sync_status_channel(4);
    StatelessWriter::new(
      GUID::new(
        GuidPrefix::new(&[2; 12]),
        EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER,
      ),
      "DCPSParticipant".to_string(),
      QosPolicies::builder().best_effort().build(),
      HistoryCacheConfig::default(),
      PayloadPool::new(PayloadPoolConfig::default()),
      transport,
      status_sender,
      FlowFilterChain::unlimited(),
    )
  }

  fn locator(n: u8) -> Locator {
    Locator::UdpV4(SocketAddrV4::new(Ipv4Addr::new(239, 255, 0, n), 7400))
  }

  #[test]
  fn sends_once_to_every_locator_no_heartbeat() {
    let transport = RecordingTransport::new();
    let mut writer = make_writer(transport.clone());
    writer.reader_locator_add(ReaderLocator {
      locator: locator(1),
      expects_inline_qos: false,
    });
    writer.reader_locator_add(ReaderLocator {
      locator: locator(2),
      expects_inline_qos: false,
    });

    writer
      .write_change(
        ChangeKind::Alive,
        InstanceHandle::NIL,
        Some(&[0, 1, 0, 0, 9, 9]),
        None,
      )
      .unwrap();

    let sent = transport.messages();
    assert_eq!(sent.len(), 2);
    for (_, message) in &sent {
      assert!(message.submessages.iter().all(|s| !matches!(
        s.body,
        SubmessageBody::Writer(WriterSubmessage::Heartbeat(..))
      )));
    }
  }

  #[test]
  fn resend_all_repeats_current_history() {
    let transport = RecordingTransport::new();
    let mut writer = make_writer(transport.clone());
    writer.reader_locator_add(ReaderLocator {
      locator: locator(1),
      expects_inline_qos: false,
    });
    writer
      .write_change(
        ChangeKind::Alive,
        InstanceHandle::NIL,
        Some(&[0, 1, 0, 0, 5]),
        None,
      )
      .unwrap();
    transport.clear();
    writer.resend_all();
    assert_eq!(transport.messages().len(), 1);
  }

  #[test]
  fn duplicate_locator_not_added() {
    let transport = RecordingTransport::new();
    let mut writer = make_writer(transport);
    let rl = ReaderLocator {
      locator: locator(1),
      expects_inline_qos: false,
    };
    writer.reader_locator_add(rl.clone());
    writer.reader_locator_add(rl);
    assert_eq!(writer.reader_locators().count(), 1);
  }
}
