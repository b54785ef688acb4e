use std::{
  collections::BTreeMap,
  sync::Arc,
  time::Instant,
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  error::Result,
  messages::submessages::elements::{
    parameter::ParameterId, serialized_payload::SerializedPayload,
  },
  qos::{policy::Durability, QosPolicies},
  rtps::{
    message_receiver::{ReaderRegistry, WriterRegistry},
    writer::WriterCell,
  },
  statusevents::{
    DomainParticipantStatusEvent, EndpointDescription, LostReason, ParticipantDescription,
    StatusChannelSender,
  },
  structure::{
    cache_change::{CacheChange, ChangeKind, InstanceHandle},
    duration::Duration,
    guid::{EntityId, GuidPrefix, GUID},
    locator::Locator,
    time::Timestamp,
  },
};
use super::{
  discovery_db::DiscoveryDb,
  sedp_messages::{DiscoveredEndpointData, DiscoveredReaderData, DiscoveredWriterData},
  spdp_participant_data::{BuiltinEndpointSet, SpdpDiscoveredParticipantData},
};

/// QoS of the SEDP built-in endpoints: reliable, with local history
/// served to late joiners.
pub fn sedp_qos() -> QosPolicies {
  QosPolicies::builder()
    .reliable(Duration::from_millis(100))
    .durability(Durability::TransientLocal)
    .build()
}

/// The discovery engine: runs SPDP participant tracking and SEDP
/// endpoint exchange over the built-in endpoints the Participant wires
/// in. Lock order: the Discovery mutex is taken before any endpoint
/// lock, never the other way around.
pub struct Discovery {
  own_guid_prefix: GuidPrefix,
  own_participant_data: SpdpDiscoveredParticipantData,
  db: DiscoveryDb,

  spdp_writer: Arc<WriterCell>,
  sedp_publications_writer: Arc<WriterCell>,
  sedp_subscriptions_writer: Arc<WriterCell>,
  readers: ReaderRegistry,
  writers: WriterRegistry,

  // what we advertise, re-published to late-joining peers via the
  // transient-local SEDP writers
  local_writer_data: BTreeMap<GUID, DiscoveredWriterData>,
  local_reader_data: BTreeMap<GUID, DiscoveredReaderData>,

  participant_status: StatusChannelSender<DomainParticipantStatusEvent>,
  incompatible_qos_counts: BTreeMap<GUID, i32>,
}

impl Discovery {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    own_participant_data: SpdpDiscoveredParticipantData,
    spdp_writer: Arc<WriterCell>,
    sedp_publications_writer: Arc<WriterCell>,
    sedp_subscriptions_writer: Arc<WriterCell>,
    readers: ReaderRegistry,
    writers: WriterRegistry,
    participant_status: StatusChannelSender<DomainParticipantStatusEvent>,
  ) -> Self {
    Self {
      own_guid_prefix: own_participant_data.participant_guid.prefix,
      own_participant_data,
      db: DiscoveryDb::new(),
      spdp_writer,
      sedp_publications_writer,
      sedp_subscriptions_writer,
      readers,
      writers,
      local_writer_data: BTreeMap::new(),
      local_reader_data: BTreeMap::new(),
      participant_status,
      incompatible_qos_counts: BTreeMap::new(),
    }
  }

  pub fn known_participants(&self) -> usize {
    self.db.participant_count()
  }

  pub fn participant_is_known(&self, prefix: GuidPrefix) -> bool {
    self.db.participant(prefix).is_some()
  }

  /// Multicast our participant announcement.
  pub fn announce_participant(&mut self) -> Result<()> {
    let payload = self.own_participant_data.to_serialized_payload()?;
    let handle = InstanceHandle::from(self.own_participant_data.participant_guid);
    let mut writer = self.spdp_writer.mutex.lock().unwrap();
    writer
      .write_change(
        ChangeKind::Alive,
        handle,
        Some(&payload.to_bytes()),
        Some(Timestamp::now()),
      )
      .map(|_| ())
  }

  /// Clean-shutdown announcement: peers unmatch immediately instead of
  /// waiting out the lease.
  pub fn dispose_participant(&mut self) -> Result<()> {
    let handle = InstanceHandle::from(self.own_participant_data.participant_guid);
    let mut writer = self.spdp_writer.mutex.lock().unwrap();
    writer
      .write_change(
        ChangeKind::NotAliveDisposedUnregistered,
        handle,
        None,
        Some(Timestamp::now()),
      )
      .map(|_| ())
  }

  /// SPDP DATA arrived on the built-in reader.
  pub fn handle_spdp_samples(&mut self, changes: Vec<CacheChange>) {
    for change in changes {
      match change.kind {
        ChangeKind::Alive => {
          let Some(payload) = change.payload.as_ref() else {
            continue;
          };
          let participant_data = match SerializedPayload::from_bytes(&payload.bytes())
            .and_then(|sp| SpdpDiscoveredParticipantData::from_serialized_payload(&sp))
          {
            Ok(data) => data,
            Err(e) => {
              warn!("Undecodable SPDP announcement: {e}");
              continue;
            }
          };
          self.handle_participant_announcement(participant_data);
        }
        _ => {
          // disposed: the key hash names the departing participant
          if let Some(prefix) = key_hash_prefix(&change) {
            self.remove_remote_participant(prefix, LostReason::Disposed);
          }
        }
      }
    }
  }

  fn handle_participant_announcement(&mut self, data: SpdpDiscoveredParticipantData) {
    if data.participant_guid.prefix == self.own_guid_prefix {
      return; // our own multicast loopback
    }
    let is_new = self.db.update_participant(data.clone());
    if !is_new {
      return;
    }

    self
      .participant_status
      .try_send(DomainParticipantStatusEvent::ParticipantDiscovered {
        participant: ParticipantDescription {
          updated_time: data.updated_time,
          protocol_version: data.protocol_version,
          vendor_id: data.vendor_id,
          guid: data.participant_guid,
          lease_duration: data.lease_duration,
          entity_name: data.entity_name.clone(),
        },
      });

    self.match_builtin_endpoints(&data);

    // answer promptly so the peer does not wait out our announce period
    if let Err(e) = self.announce_participant() {
      warn!("SPDP reply announcement failed: {e}");
    }
  }

  /// Wire our built-in SEDP endpoints to the peer's, per its advertised
  /// BuiltinEndpointSet. The transient-local SEDP writers then replay
  /// our endpoint records to the newcomer by themselves.
  fn match_builtin_endpoints(&mut self, data: &SpdpDiscoveredParticipantData) {
    let prefix = data.participant_guid.prefix;
    let unicast = data.metatraffic_unicast_locators.clone();
    let multicast = data.metatraffic_multicast_locators.clone();
    let endpoints = data.available_builtin_endpoints;
    let qos = sedp_qos();

    let pairs: &[(u32, &Arc<WriterCell>, EntityId)] = &[
      (
        BuiltinEndpointSet::PUBLICATIONS_DETECTOR,
        &self.sedp_publications_writer,
        EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
      ),
      (
        BuiltinEndpointSet::SUBSCRIPTIONS_DETECTOR,
        &self.sedp_subscriptions_writer,
        EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_READER,
      ),
    ];
    for (bit, writer_cell, reader_entity) in pairs {
      if endpoints.contains(*bit) {
        writer_cell.mutex.lock().unwrap().matched_reader_add(
          GUID::new(prefix, *reader_entity),
          unicast.clone(),
          multicast.clone(),
          false,
          &qos,
        );
      }
    }

    let reader_pairs: &[(u32, EntityId, EntityId)] = &[
      (
        BuiltinEndpointSet::PUBLICATIONS_ANNOUNCER,
        EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
        EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
      ),
      (
        BuiltinEndpointSet::SUBSCRIPTIONS_ANNOUNCER,
        EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_READER,
        EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_WRITER,
      ),
    ];
    let readers = self.readers.read().unwrap();
    for (bit, local_reader_entity, remote_writer_entity) in reader_pairs {
      if endpoints.contains(*bit) {
        if let Some(shared) = readers.get(local_reader_entity) {
          shared.lock().unwrap().matched_writer_add(
            GUID::new(prefix, *remote_writer_entity),
            unicast.clone(),
            multicast.clone(),
          );
        }
      }
    }
  }

  /// Lease bookkeeping; fires the removal cascade for expired peers.
  pub fn check_participant_leases(&mut self) {
    let now = Instant::now();
    for prefix in self.db.expired_participants(now) {
      let (lease, elapsed) = self
        .db
        .participant(prefix)
        .map(|p| {
          (
            p.data.lease_duration.unwrap_or(Duration::from_secs(100)),
            Duration::from(now.duration_since(p.last_refresh)),
          )
        })
        .unwrap_or((Duration::from_secs(100), Duration::ZERO));
      warn!("Participant {prefix:?} lease expired");
      self.remove_remote_participant(prefix, LostReason::Timeout { lease, elapsed });
    }
  }

  pub fn refresh_lease(&mut self, prefix: GuidPrefix) {
    self.db.refresh_lease(prefix);
  }

  fn remove_remote_participant(&mut self, prefix: GuidPrefix, reason: LostReason) {
    // single-shot: the second call finds nothing to remove
    let Some((_participant, writer_guids, reader_guids)) = self.db.remove_participant(prefix)
    else {
      return;
    };

    for writer_guid in writer_guids {
      self.unmatch_remote_writer(writer_guid, &reason);
    }
    for reader_guid in reader_guids {
      self.unmatch_remote_reader(reader_guid, &reason);
    }

    // detach the peer's built-in endpoints too
    for writer_cell in [
      &self.sedp_publications_writer,
      &self.sedp_subscriptions_writer,
    ] {
      let mut writer = writer_cell.mutex.lock().unwrap();
      for entity in [
        EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
        EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_READER,
      ] {
        writer.matched_reader_remove(GUID::new(prefix, entity));
      }
    }
    {
      let readers = self.readers.read().unwrap();
      for (local_entity, remote_entity) in [
        (
          EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
          EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
        ),
        (
          EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_READER,
          EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_WRITER,
        ),
      ] {
        if let Some(shared) = readers.get(&local_entity) {
          shared
            .lock()
            .unwrap()
            .matched_writer_remove(GUID::new(prefix, remote_entity));
        }
      }
    }

    self
      .participant_status
      .try_send(DomainParticipantStatusEvent::ParticipantLost { id: prefix, reason });
  }

  /// SEDP publication (`DCPSPublication`) samples arrived.
  pub fn handle_sedp_publication_samples(&mut self, changes: Vec<CacheChange>) {
    for change in changes {
      match change.kind {
        ChangeKind::Alive => {
          let Some(data) = decode_endpoint_data(&change) else {
            continue;
          };
          let writer_data = DiscoveredWriterData(data);
          self.handle_discovered_writer(writer_data);
        }
        _ => {
          if let Some(guid) = key_hash_guid(&change) {
            self.db.remove_writer(guid);
            self.unmatch_remote_writer(guid, &LostReason::Disposed);
          }
        }
      }
    }
  }

  /// SEDP subscription (`DCPSSubscription`) samples arrived.
  pub fn handle_sedp_subscription_samples(&mut self, changes: Vec<CacheChange>) {
    for change in changes {
      match change.kind {
        ChangeKind::Alive => {
          let Some(data) = decode_endpoint_data(&change) else {
            continue;
          };
          let reader_data = DiscoveredReaderData(data);
          self.handle_discovered_reader(reader_data);
        }
        _ => {
          if let Some(guid) = key_hash_guid(&change) {
            self.db.remove_reader(guid);
            self.unmatch_remote_reader(guid, &LostReason::Disposed);
          }
        }
      }
    }
  }

  fn handle_discovered_writer(&mut self, writer_data: DiscoveredWriterData) {
    let data = &writer_data.0;
    if data.endpoint_guid.prefix == self.own_guid_prefix {
      return;
    }
    self
      .participant_status
      .try_send(DomainParticipantStatusEvent::WriterDetected {
        writer: EndpointDescription {
          updated_time: data.updated_time,
          guid: data.endpoint_guid,
          topic_name: data.topic_name.clone(),
          type_name: data.type_name.clone(),
          qos: data.qos.clone(),
        },
      });
    self.db.update_writer(writer_data.clone());

    // try the new writer against every local user reader
    let readers = Arc::clone(&self.readers);
    let registry = readers.read().unwrap();
    for (entity_id, shared) in registry.iter() {
      if !entity_id.kind().is_user_defined() {
        continue;
      }
      let mut reader = shared.lock().unwrap();
      self.match_writer_to_local_reader(&writer_data, &mut reader);
    }
  }

  fn match_writer_to_local_reader(
    &mut self,
    writer_data: &DiscoveredWriterData,
    reader: &mut crate::rtps::reader::ReaderKind,
  ) {
    let data = &writer_data.0;
    let reader_guid = reader.guid();
    if reader.topic_name() != data.topic_name
      || reader.type_name() != data.type_name
      || reader_guid.entity_id.entity_kind.is_with_key() != data.is_with_key_topic()
    {
      return;
    }
    let reader_qos = reader.qos().clone();
    if !reader_qos
      .partition_or_default()
      .intersects(&data.qos.partition_or_default())
    {
      return;
    }
    match reader_qos.compliance_failure_wrt(&data.qos) {
      None => {
        let (unicast, multicast) = self.effective_locators(data);
        reader.matched_writer_add(data.endpoint_guid, unicast, multicast);
        self
          .participant_status
          .try_send(DomainParticipantStatusEvent::RemoteWriterMatched {
            local_reader: reader_guid,
            remote_writer: data.endpoint_guid,
          });
      }
      Some(policy) => {
        let count = self.bump_incompatible_count(reader_guid);
        match reader {
          crate::rtps::reader::ReaderKind::Stateful(r) => {
            r.report_requested_incompatible_qos(data.endpoint_guid, policy, count);
          }
          crate::rtps::reader::ReaderKind::Stateless(r) => {
            r.report_requested_incompatible_qos(data.endpoint_guid, policy, count);
          }
        }
        self
          .participant_status
          .try_send(DomainParticipantStatusEvent::RemoteWriterQosIncompatible {
            local_reader: reader_guid,
            remote_writer: data.endpoint_guid,
            policy,
          });
      }
    }
  }

  fn handle_discovered_reader(&mut self, reader_data: DiscoveredReaderData) {
    let data = &reader_data.0;
    if data.endpoint_guid.prefix == self.own_guid_prefix {
      return;
    }
    self
      .participant_status
      .try_send(DomainParticipantStatusEvent::ReaderDetected {
        reader: EndpointDescription {
          updated_time: data.updated_time,
          guid: data.endpoint_guid,
          topic_name: data.topic_name.clone(),
          type_name: data.type_name.clone(),
          qos: data.qos.clone(),
        },
      });
    self.db.update_reader(reader_data.clone());

    let writers = Arc::clone(&self.writers);
    let registry = writers.read().unwrap();
    for (entity_id, cell) in registry.iter() {
      if !entity_id.kind().is_user_defined() {
        continue;
      }
      let mut writer = cell.mutex.lock().unwrap();
      self.match_reader_to_local_writer(&reader_data, &mut writer);
    }
  }

  fn match_reader_to_local_writer(
    &mut self,
    reader_data: &DiscoveredReaderData,
    writer: &mut crate::rtps::writer::WriterKind,
  ) {
    let data = &reader_data.0;
    let writer_guid = writer.guid();
    if writer.topic_name() != data.topic_name
      || writer.type_name() != data.type_name
      || writer_guid.entity_id.entity_kind.is_with_key() != data.is_with_key_topic()
    {
      return;
    }
    let writer_qos = writer.qos().clone();
    if !writer_qos
      .partition_or_default()
      .intersects(&data.qos.partition_or_default())
    {
      return;
    }
    // request-vs-offer: the remote reader requests, we offer
    match data.qos.compliance_failure_wrt(&writer_qos) {
      None => {
        let (unicast, multicast) = self.effective_locators(data);
        writer.matched_reader_add(
          data.endpoint_guid,
          unicast,
          multicast,
          data.expects_inline_qos,
          &data.qos,
        );
        self
          .participant_status
          .try_send(DomainParticipantStatusEvent::RemoteReaderMatched {
            local_writer: writer_guid,
            remote_reader: data.endpoint_guid,
          });
      }
      Some(policy) => {
        let count = self.bump_incompatible_count(writer_guid);
        match writer {
          crate::rtps::writer::WriterKind::Stateful(w) => {
            w.report_offered_incompatible_qos(data.endpoint_guid, policy, count);
          }
          crate::rtps::writer::WriterKind::Stateless(w) => {
            w.report_offered_incompatible_qos(data.endpoint_guid, policy, count);
          }
        }
        self
          .participant_status
          .try_send(DomainParticipantStatusEvent::RemoteReaderQosIncompatible {
            local_writer: writer_guid,
            remote_reader: data.endpoint_guid,
            policy,
          });
      }
    }
  }

  fn bump_incompatible_count(&mut self, local_endpoint: GUID) -> i32 {
    let count = self.incompatible_qos_counts.entry(local_endpoint).or_insert(0);
    *count += 1;
    *count
  }

  // Discovered endpoints without locators of their own are reached via
  // their participant's defaults.
  fn effective_locators(&self, data: &DiscoveredEndpointData) -> (Vec<Locator>, Vec<Locator>) {
    if !data.unicast_locators.is_empty() || !data.multicast_locators.is_empty() {
      return (data.unicast_locators.clone(), data.multicast_locators.clone());
    }
    match self.db.participant(data.endpoint_guid.prefix) {
      Some(participant) => (
        participant.data.default_unicast_locators.clone(),
        participant.data.default_multicast_locators.clone(),
      ),
      None => (Vec::new(), Vec::new()),
    }
  }

  fn unmatch_remote_writer(&mut self, writer_guid: GUID, reason: &LostReason) {
    let readers = self.readers.read().unwrap();
    for (entity_id, shared) in readers.iter() {
      if !entity_id.kind().is_user_defined() {
        continue;
      }
      shared.lock().unwrap().matched_writer_remove(writer_guid);
    }
    drop(readers);
    self
      .participant_status
      .try_send(DomainParticipantStatusEvent::WriterLost {
        guid: writer_guid,
        reason: reason.clone(),
      });
  }

  fn unmatch_remote_reader(&mut self, reader_guid: GUID, reason: &LostReason) {
    let writers = self.writers.read().unwrap();
    for (entity_id, cell) in writers.iter() {
      if !entity_id.kind().is_user_defined() {
        continue;
      }
      cell.mutex.lock().unwrap().matched_reader_remove(reader_guid);
    }
    drop(writers);
    self
      .participant_status
      .try_send(DomainParticipantStatusEvent::ReaderLost {
        guid: reader_guid,
        reason: reason.clone(),
      });
  }

  /// Advertise a newly created local writer and match it against
  /// already-known remote readers.
  pub fn publish_local_writer(&mut self, data: DiscoveredWriterData) -> Result<()> {
    let guid = data.0.endpoint_guid;
    self.local_writer_data.insert(guid, data.clone());
    let payload = data.0.to_serialized_payload()?;
    {
      let mut writer = self.sedp_publications_writer.mutex.lock().unwrap();
      writer.write_change(
        ChangeKind::Alive,
        InstanceHandle::from(guid),
        Some(&payload.to_bytes()),
        Some(Timestamp::now()),
      )?;
    }

    // late-created writer against known remote readers
    let known_readers: Vec<DiscoveredReaderData> = self.db.readers().cloned().collect();
    if !known_readers.is_empty() {
      let writers = Arc::clone(&self.writers);
      let registry = writers.read().unwrap();
      if let Some(cell) = registry.get(&guid.entity_id) {
        let mut writer = cell.mutex.lock().unwrap();
        for reader_data in known_readers {
          self.match_reader_to_local_writer(&reader_data, &mut writer);
        }
      }
    }
    Ok(())
  }

  pub fn unpublish_local_writer(&mut self, guid: GUID) -> Result<()> {
    self.local_writer_data.remove(&guid);
    let mut writer = self.sedp_publications_writer.mutex.lock().unwrap();
    writer.write_change(
      ChangeKind::NotAliveDisposedUnregistered,
      InstanceHandle::from(guid),
      None,
      Some(Timestamp::now()),
    )?;
    Ok(())
  }

  /// Advertise a newly created local reader and match it against
  /// already-known remote writers.
  pub fn publish_local_reader(&mut self, data: DiscoveredReaderData) -> Result<()> {
    let guid = data.0.endpoint_guid;
    self.local_reader_data.insert(guid, data.clone());
    let payload = data.0.to_serialized_payload()?;
    {
      let mut writer = self.sedp_subscriptions_writer.mutex.lock().unwrap();
      writer.write_change(
        ChangeKind::Alive,
        InstanceHandle::from(guid),
        Some(&payload.to_bytes()),
        Some(Timestamp::now()),
      )?;
    }

    let known_writers: Vec<DiscoveredWriterData> = self.db.writers().cloned().collect();
    if !known_writers.is_empty() {
      let readers = Arc::clone(&self.readers);
      let registry = readers.read().unwrap();
      if let Some(shared) = registry.get(&guid.entity_id) {
        let mut reader = shared.lock().unwrap();
        for writer_data in known_writers {
          self.match_writer_to_local_reader(&writer_data, &mut reader);
        }
      }
    }
    Ok(())
  }

  pub fn unpublish_local_reader(&mut self, guid: GUID) -> Result<()> {
    self.local_reader_data.remove(&guid);
    let mut writer = self.sedp_subscriptions_writer.mutex.lock().unwrap();
    writer.write_change(
      ChangeKind::NotAliveDisposedUnregistered,
      InstanceHandle::from(guid),
      None,
      Some(Timestamp::now()),
    )?;
    Ok(())
  }
}

fn decode_endpoint_data(change: &CacheChange) -> Option<DiscoveredEndpointData> {
  let payload = change.payload.as_ref()?;
  match SerializedPayload::from_bytes(&payload.bytes())
    .and_then(|sp| DiscoveredEndpointData::from_serialized_payload(&sp))
  {
    Ok(data) => Some(data),
    Err(e) => {
      warn!("Undecodable SEDP sample: {e}");
      None
    }
  }
}

/// GUID carried in the key hash of a dispose/unregister sample.
fn key_hash_guid(change: &CacheChange) -> Option<GUID> {
  let hash = change
    .inline_qos
    .as_ref()
    .and_then(|pl| pl.find(ParameterId::PID_KEY_HASH))
    .filter(|bytes| bytes.len() >= 16)
    .map(|bytes| {
      let mut key = [0u8; 16];
      key.copy_from_slice(&bytes[..16]);
      key
    })
    .or_else(|| {
      (change.instance_handle != InstanceHandle::NIL).then(|| *change.instance_handle.as_bytes())
    })?;
  let prefix = GuidPrefix::new(&hash[..12]);
  let entity_id = EntityId::new(
    [hash[12], hash[13], hash[14]],
    crate::structure::guid::EntityKind::from(hash[15]),
  );
  Some(GUID::new(prefix, entity_id))
}

fn key_hash_prefix(change: &CacheChange) -> Option<GuidPrefix> {
  key_hash_guid(change).map(|guid| guid.prefix)
}
