use std::{
  collections::BTreeMap,
  time::Instant,
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::structure::{duration::Duration, guid::GuidPrefix, guid::GUID};
use super::{
  sedp_messages::{DiscoveredReaderData, DiscoveredWriterData},
  spdp_participant_data::SpdpDiscoveredParticipantData,
};

pub struct DiscoveredParticipant {
  pub data: SpdpDiscoveredParticipantData,
  pub lease_deadline: Instant,
  pub last_refresh: Instant,
}

/// Everything discovery currently knows about the rest of the domain:
/// remote Participants with their lease deadlines, and remote endpoints
/// keyed by GUID. Purely bookkeeping; matching decisions live in the
/// discovery engine.
#[derive(Default)]
pub struct DiscoveryDb {
  participants: BTreeMap<GuidPrefix, DiscoveredParticipant>,
  remote_writers: BTreeMap<GUID, DiscoveredWriterData>,
  remote_readers: BTreeMap<GUID, DiscoveredReaderData>,
}

impl DiscoveryDb {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record a participant announcement. Returns true when this prefix
  /// was not known before.
  pub fn update_participant(&mut self, data: SpdpDiscoveredParticipantData) -> bool {
    let prefix = data.participant_guid.prefix;
    let lease: std::time::Duration = data
      .lease_duration
      .unwrap_or(Duration::from_secs(100))
      .into();
    let now = Instant::now();
    let is_new = self
      .participants
      .insert(
        prefix,
        DiscoveredParticipant {
          data,
          lease_deadline: now + lease,
          last_refresh: now,
        },
      )
      .is_none();
    if is_new {
      info!("New remote participant {prefix:?}");
    }
    is_new
  }

  /// Push the lease deadline forward, e.g. on any SPDP traffic from the
  /// peer. Unknown prefixes are ignored.
  pub fn refresh_lease(&mut self, prefix: GuidPrefix) {
    if let Some(participant) = self.participants.get_mut(&prefix) {
      let lease: std::time::Duration = participant
        .data
        .lease_duration
        .unwrap_or(Duration::from_secs(100))
        .into();
      let now = Instant::now();
      participant.lease_deadline = now + lease;
      participant.last_refresh = now;
    }
  }

  pub fn participant(&self, prefix: GuidPrefix) -> Option<&DiscoveredParticipant> {
    self.participants.get(&prefix)
  }

  pub fn participant_count(&self) -> usize {
    self.participants.len()
  }

  /// Prefixes whose lease has expired by `now`.
  pub fn expired_participants(&self, now: Instant) -> Vec<GuidPrefix> {
    self
      .participants
      .iter()
      .filter(|(_, p)| p.lease_deadline <= now)
      .map(|(prefix, _)| *prefix)
      .collect()
  }

  /// Drop a participant and everything discovered through it. Returns
  /// the removed participant record with the GUIDs of its endpoints, or
  /// None when the prefix was already gone, which makes removal
  /// cascades single-shot.
  pub fn remove_participant(
    &mut self,
    prefix: GuidPrefix,
  ) -> Option<(DiscoveredParticipant, Vec<GUID>, Vec<GUID>)> {
    let participant = self.participants.remove(&prefix)?;
    let writer_guids: Vec<GUID> = self
      .remote_writers
      .keys()
      .filter(|guid| guid.prefix == prefix)
      .copied()
      .collect();
    let reader_guids: Vec<GUID> = self
      .remote_readers
      .keys()
      .filter(|guid| guid.prefix == prefix)
      .copied()
      .collect();
    for guid in &writer_guids {
      self.remote_writers.remove(guid);
    }
    for guid in &reader_guids {
      self.remote_readers.remove(guid);
    }
    Some((participant, writer_guids, reader_guids))
  }

  pub fn update_writer(&mut self, data: DiscoveredWriterData) -> bool {
    self
      .remote_writers
      .insert(data.0.endpoint_guid, data)
      .is_none()
  }

  pub fn remove_writer(&mut self, guid: GUID) -> Option<DiscoveredWriterData> {
    self.remote_writers.remove(&guid)
  }

  pub fn writer(&self, guid: GUID) -> Option<&DiscoveredWriterData> {
    self.remote_writers.get(&guid)
  }

  pub fn writers(&self) -> impl Iterator<Item = &DiscoveredWriterData> {
    self.remote_writers.values()
  }

  pub fn update_reader(&mut self, data: DiscoveredReaderData) -> bool {
    self
      .remote_readers
      .insert(data.0.endpoint_guid, data)
      .is_none()
  }

  pub fn remove_reader(&mut self, guid: GUID) -> Option<DiscoveredReaderData> {
    self.remote_readers.remove(&guid)
  }

  pub fn readers(&self) -> impl Iterator<Item = &DiscoveredReaderData> {
    self.remote_readers.values()
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use crate::{
    discovery::{
      sedp_messages::DiscoveredEndpointData,
      spdp_participant_data::BuiltinEndpointSet,
    },
    messages::{protocol_version::ProtocolVersion, vendor_id::VendorId},
    qos::QosPolicies,
    structure::guid::{EntityId, EntityKind},
  };
  use super::*;

  fn participant_data(prefix: GuidPrefix, lease_secs: i32) -> SpdpDiscoveredParticipantData {
    SpdpDiscoveredParticipantData {
      updated_time: Utc::now(),
      protocol_version: ProtocolVersion::THIS_IMPLEMENTATION,
      vendor_id: VendorId::THIS_IMPLEMENTATION,
      participant_guid: GUID::from_prefix(prefix),
      domain_id: 0,
      metatraffic_unicast_locators: vec![],
      metatraffic_multicast_locators: vec![],
      default_unicast_locators: vec![],
      default_multicast_locators: vec![],
      available_builtin_endpoints: BuiltinEndpointSet::all_simple_discovery(),
      lease_duration: Some(Duration::from_secs(lease_secs)),
      entity_name: None,
    }
  }

  fn writer_data(prefix: GuidPrefix) -> DiscoveredWriterData {
    DiscoveredWriterData(DiscoveredEndpointData::new(
      GUID::new(
        prefix,
        EntityId::create_custom_entity_id([0, 0, 1], EntityKind::WRITER_WITH_KEY_USER_DEFINED),
      ),
      "t",
      "T",
      QosPolicies::qos_none(),
      vec![],
      vec![],
    ))
  }

  #[test]
  fn first_announcement_is_new_refresh_is_not() {
    let mut db = DiscoveryDb::new();
    let prefix = GuidPrefix::new(&[1; 12]);
    assert!(db.update_participant(participant_data(prefix, 100)));
    assert!(!db.update_participant(participant_data(prefix, 100)));
    assert_eq!(db.participant_count(), 1);
  }

  #[test]
  fn expiry_and_single_shot_removal() {
    let mut db = DiscoveryDb::new();
    let prefix = GuidPrefix::new(&[1; 12]);
    db.update_participant(participant_data(prefix, 0));
    db.update_writer(writer_data(prefix));

    let expired = db.expired_participants(Instant::now() + std::time::Duration::from_millis(1));
    assert_eq!(expired, vec![prefix]);

    let (_participant, writers, readers) = db.remove_participant(prefix).unwrap();
    assert_eq!(writers.len(), 1);
    assert!(readers.is_empty());
    // second removal: already gone
    assert!(db.remove_participant(prefix).is_none());
    assert_eq!(db.writers().count(), 0);
  }

  #[test]
  fn refresh_pushes_deadline_forward() {
    let mut db = DiscoveryDb::new();
    let prefix = GuidPrefix::new(&[1; 12]);
    db.update_participant(participant_data(prefix, 0));
    // immediately expired without a refresh
    assert!(!db
      .expired_participants(Instant::now() + std::time::Duration::from_millis(1))
      .is_empty());
    // stretch the lease by re-announcing with a longer one
    db.update_participant(participant_data(prefix, 100));
    assert!(db.expired_participants(Instant::now()).is_empty());
  }
}
