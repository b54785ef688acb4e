use std::collections::{BTreeMap, VecDeque};

use enumflags2::BitFlags;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  messages::submessages::submessages::{Data, DATA_Flags},
  qos::QosPolicies,
  rtps::message_receiver::MessageReceiverState,
  statusevents::{DataReaderStatus, StatusChannelSender},
  structure::{
    cache_change::{CacheChange, ChangeKind},
    entity::RTPSEntity,
    guid::{EntityId, GUID},
    payload_pool::PayloadPool,
    sequence_number::SequenceNumber,
  },
};

/// Best-effort RTPS reader: no writer proxies, no HEARTBEAT/ACKNACK
/// protocol. Accepts DATA from matched writers in per-writer monotonic
/// order, dropping anything older than the newest already seen.
///
/// The SPDP reader is one of these, with `promiscuous_writer_entity`
/// set so announcements from not-yet-known Participants are accepted.
pub struct StatelessReader {
  guid: GUID,
  pub topic_name: String,
  pub type_name: String,
  pub qos: QosPolicies,
  pool: PayloadPool,
  // per-writer newest accepted sequence number
  matched_writers: BTreeMap<GUID, SequenceNumber>,
  /// When set, DATA from any writer with this entity id is accepted
  /// even if its Participant is not matched yet.
  promiscuous_writer_entity: Option<EntityId>,
  available_buffer: VecDeque<CacheChange>,
  status_sender: StatusChannelSender<DataReaderStatus>,
  data_available_notifier: Option<crossbeam_channel::Sender<EntityId>>,
}

impl RTPSEntity for StatelessReader {
  fn guid(&self) -> GUID {
    self.guid
  }
}

impl StatelessReader {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    guid: GUID,
    topic_name: String,
    type_name: String,
    qos: QosPolicies,
    pool: PayloadPool,
    promiscuous_writer_entity: Option<EntityId>,
    status_sender: StatusChannelSender<DataReaderStatus>,
    data_available_notifier: Option<crossbeam_channel::Sender<EntityId>>,
  ) -> Self {
    Self {
      guid,
      topic_name,
      type_name,
      qos,
      pool,
      matched_writers: BTreeMap::new(),
      promiscuous_writer_entity,
      available_buffer: VecDeque::new(),
      status_sender,
      data_available_notifier,
    }
  }

  pub fn matched_writer_add(&mut self, remote_writer_guid: GUID) {
    self
      .matched_writers
      .entry(remote_writer_guid)
      .or_insert(SequenceNumber::ZERO);
  }

  pub fn matched_writer_remove(&mut self, remote_writer_guid: GUID) -> bool {
    self.matched_writers.remove(&remote_writer_guid).is_some()
  }

  pub fn contains_writer_entity(&self, writer_id: EntityId) -> bool {
    self.promiscuous_writer_entity == Some(writer_id)
      || self
        .matched_writers
        .keys()
        .any(|guid| guid.entity_id == writer_id)
  }

  pub fn handle_data_msg(
    &mut self,
    data: Data,
    flags: BitFlags<DATA_Flags>,
    mr_state: &MessageReceiverState,
  ) {
    let writer_guid = GUID::new(mr_state.source_guid_prefix, data.writer_id);

    let highest_seen = match self.matched_writers.get(&writer_guid) {
      Some(highest) => *highest,
      None if self.promiscuous_writer_entity == Some(data.writer_id) => {
        // unknown writer on a promiscuous topic: implicit match
        self.matched_writers.insert(writer_guid, SequenceNumber::ZERO);
        SequenceNumber::ZERO
      }
      None => {
        trace!("best-effort DATA from unmatched writer {writer_guid:?}");
        return;
      }
    };

    if data.writer_sn <= highest_seen {
      trace!(
        "stale best-effort DATA {:?} from {writer_guid:?}",
        data.writer_sn
      );
      return;
    }

    let kind = if flags.contains(DATA_Flags::Key) {
      ChangeKind::NotAliveDisposed
    } else {
      ChangeKind::Alive
    };
    let pooled = match &data.serialized_payload {
      Some(payload) => match self.pool.get_payload(payload) {
        Ok(pooled) => Some(pooled),
        Err(e) => {
          debug!("best-effort sample dropped, pool: {e}");
          return;
        }
      },
      None => None,
    };

    self.matched_writers.insert(writer_guid, data.writer_sn);
    let change = CacheChange::new(
      kind,
      writer_guid,
      data.writer_sn,
      crate::structure::cache_change::InstanceHandle::NIL,
      pooled,
    )
    .with_timestamp(mr_state.source_timestamp)
    .with_inline_qos(data.inline_qos.clone());
    self.available_buffer.push_back(change);
    if let Some(notifier) = &self.data_available_notifier {
      let _ = notifier.try_send(self.guid.entity_id);
    }
  }

  pub fn take(&mut self, max_samples: usize) -> Vec<CacheChange> {
    let n = max_samples.min(self.available_buffer.len());
    self.available_buffer.drain(..n).collect()
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
        count: crate::statusevents::CountWithChange::new(count, 1),
        last_policy_id: policy,
        writer,
      });
  }
}

#[cfg(test)]
mod tests {
  use bytes::Bytes;

  use crate::{
    statusevents::sync_status_channel,
    structure::{
      guid::{EntityKind, GuidPrefix},
      payload_pool::{PayloadPool, PayloadPoolConfig},
    },
  };
  use super::*;

  fn reader(promiscuous: Option<EntityId>) -> StatelessReader {
    let (status_sender, _r) = sync_status_channel(4);
    StatelessReader::new(
      GUID::new(
        GuidPrefix::new(&[4; 12]),
        EntityId::SPDP_BUILTIN_PARTICIPANT_READER,
      ),
      "DCPSParticipant".to_string(),
      "ParticipantProxyData".to_string(),
      QosPolicies::builder().best_effort().build(),
      PayloadPool::new(PayloadPoolConfig::default()),
      promiscuous,
      status_sender,
      None,
    )
  }

  fn spdp_writer_guid(n: u8) -> GUID {
    GUID::new(
      GuidPrefix::new(&[n; 12]),
      EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER,
    )
  }

  fn data(writer: GUID, seq: i64) -> Data {
    Data {
      reader_id: EntityId::UNKNOWN,
      writer_id: writer.entity_id,
      writer_sn: SequenceNumber::from(seq),
      inline_qos: None,
      serialized_payload: Some(Bytes::from_static(&[0x00, 0x03, 0x00, 0x00, 0xAA])),
    }
  }

  fn state_from(writer: GUID) -> MessageReceiverState {
    MessageReceiverState {
      source_guid_prefix: writer.prefix,
      ..Default::default()
    }
  }

  fn flags() -> BitFlags<DATA_Flags> {
    DATA_Flags::Endianness | DATA_Flags::Data
  }

  #[test]
  fn promiscuous_reader_accepts_unknown_spdp_writer() {
    let mut r = reader(Some(EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER));
    let w = spdp_writer_guid(1);
    r.handle_data_msg(data(w, 1), flags(), &state_from(w));
    assert_eq!(r.take(10).len(), 1);
  }

  #[test]
  fn non_promiscuous_reader_requires_match() {
    let mut r = reader(None);
    let w = spdp_writer_guid(1);
    r.handle_data_msg(data(w, 1), flags(), &state_from(w));
    assert!(r.take(10).is_empty());
    r.matched_writer_add(w);
    r.handle_data_msg(data(w, 2), flags(), &state_from(w));
    assert_eq!(r.take(10).len(), 1);
  }

  #[test]
  fn stale_and_duplicate_sequences_are_dropped() {
    let mut r = reader(Some(EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER));
    let w = spdp_writer_guid(1);
    r.handle_data_msg(data(w, 2), flags(), &state_from(w));
    r.handle_data_msg(data(w, 2), flags(), &state_from(w));
    r.handle_data_msg(data(w, 1), flags(), &state_from(w));
    r.handle_data_msg(data(w, 3), flags(), &state_from(w));
    let taken = r.take(10);
    assert_eq!(
      taken.iter().map(|c| c.sequence_number.as_i64()).collect::<Vec<_>>(),
      vec![2, 3]
    );
  }

  #[test]
  fn per_writer_ordering_is_independent() {
    let mut r = reader(Some(EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER));
    let w1 = spdp_writer_guid(1);
    let w2 = spdp_writer_guid(2);
    r.handle_data_msg(data(w1, 5), flags(), &state_from(w1));
    r.handle_data_msg(data(w2, 1), flags(), &state_from(w2));
    assert_eq!(r.take(10).len(), 2);
  }
}
