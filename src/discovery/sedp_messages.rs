use chrono::Utc;
#[allow(unused_imports)]
use log::{debug, error, trace, warn};
use serde::{Deserialize, Serialize};
use speedy::{Endianness, Readable, Writable};

use crate::{
  error::{Error, Result},
  messages::submessages::elements::{
    parameter::ParameterId,
    parameter_list::ParameterList,
    serialized_payload::{RepresentationIdentifier, SerializedPayload},
  },
  qos::{policy, QosPolicies},
  structure::{duration::Duration, guid::GUID, locator::Locator},
};
use super::spdp_participant_data::{decode_parameter, encode_parameter, LocatorData};

// Wire images of the QoS policies carried in SEDP parameter lists,
// DDS-RTPS mapping Section 9.6.2.2.
#[derive(Serialize, Deserialize)]
struct ReliabilityData {
  kind: i32,
  max_blocking_time: Duration,
}

#[derive(Serialize, Deserialize)]
struct LivelinessData {
  kind: i32,
  lease_duration: Duration,
}

#[derive(Serialize, Deserialize)]
struct HistoryData {
  kind: i32,
  depth: i32,
}

/// What SEDP tells the world about one endpoint, reader or writer:
/// identity, topic, type, addressing, and the offered/requested QoS.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveredEndpointData {
  pub updated_time: chrono::DateTime<Utc>,
  pub endpoint_guid: GUID,
  pub topic_name: String,
  pub type_name: String,
  pub qos: QosPolicies,
  pub unicast_locators: Vec<Locator>,
  pub multicast_locators: Vec<Locator>,
  pub expects_inline_qos: bool,
}

/// `DCPSPublication` sample.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveredWriterData(pub DiscoveredEndpointData);

/// `DCPSSubscription` sample.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveredReaderData(pub DiscoveredEndpointData);

impl DiscoveredEndpointData {
  pub fn new(
    endpoint_guid: GUID,
    topic_name: impl Into<String>,
    type_name: impl Into<String>,
    qos: QosPolicies,
    unicast_locators: Vec<Locator>,
    multicast_locators: Vec<Locator>,
  ) -> Self {
    Self {
      updated_time: Utc::now(),
      endpoint_guid,
      topic_name: topic_name.into(),
      type_name: type_name.into(),
      qos,
      unicast_locators,
      multicast_locators,
      expects_inline_qos: false,
    }
  }

  pub fn is_with_key_topic(&self) -> bool {
    self.endpoint_guid.entity_id.entity_kind.is_with_key()
  }

  fn to_parameter_list(&self) -> Result<ParameterList> {
    let mut pl = ParameterList::new();
    pl.push(
      ParameterId::PID_ENDPOINT_GUID,
      encode_parameter(&self.endpoint_guid)?,
    );
    pl.push(
      ParameterId::PID_TOPIC_NAME,
      encode_parameter(&self.topic_name)?,
    );
    pl.push(
      ParameterId::PID_TYPE_NAME,
      encode_parameter(&self.type_name)?,
    );
    for locator in &self.unicast_locators {
      pl.push(
        ParameterId::PID_UNICAST_LOCATOR,
        encode_parameter(&LocatorData::from(locator))?,
      );
    }
    for locator in &self.multicast_locators {
      pl.push(
        ParameterId::PID_MULTICAST_LOCATOR,
        encode_parameter(&LocatorData::from(locator))?,
      );
    }
    if self.expects_inline_qos {
      pl.push(
        ParameterId::PID_EXPECTS_INLINE_QOS,
        encode_parameter(&true)?,
      );
    }

    let qos = &self.qos;
    if let Some(reliability) = qos.reliability {
      let max_blocking_time = qos
        .reliable_max_blocking_time()
        .unwrap_or(Duration::from_millis(100));
      pl.push(
        ParameterId::PID_RELIABILITY,
        encode_parameter(&ReliabilityData {
          kind: reliability.kind_value(),
          max_blocking_time,
        })?,
      );
    }
    if let Some(durability) = qos.durability {
      pl.push(
        ParameterId::PID_DURABILITY,
        encode_parameter(&(durability as i32))?,
      );
    }
    if let Some(deadline) = qos.deadline {
      pl.push(ParameterId::PID_DEADLINE, encode_parameter(&deadline.0)?);
    }
    if let Some(liveliness) = qos.liveliness {
      pl.push(
        ParameterId::PID_LIVELINESS,
        encode_parameter(&LivelinessData {
          kind: liveliness.kind_value(),
          lease_duration: liveliness.lease_duration(),
        })?,
      );
    }
    if let Some(ownership) = qos.ownership {
      pl.push(
        ParameterId::PID_OWNERSHIP,
        encode_parameter(&ownership.kind_value())?,
      );
    }
    if let Some(lifespan) = qos.lifespan {
      pl.push(
        ParameterId::PID_LIFESPAN,
        encode_parameter(&lifespan.duration)?,
      );
    }
    if let Some(partition) = &qos.partition {
      pl.push(
        ParameterId::PID_PARTITION,
        encode_parameter(&partition.partitions)?,
      );
    }
    if let Some(history) = qos.history {
      let (kind, depth) = match history {
        policy::History::KeepLast { depth } => (0, depth),
        policy::History::KeepAll => (1, 0),
      };
      pl.push(
        ParameterId::PID_HISTORY,
        encode_parameter(&HistoryData { kind, depth })?,
      );
    }
    if let Some(resource_limits) = qos.resource_limits {
      pl.push(
        ParameterId::PID_RESOURCE_LIMITS,
        encode_parameter(&resource_limits)?,
      );
    }
    if let Some(user_data) = &qos.user_data {
      pl.push(
        ParameterId::PID_USER_DATA,
        encode_parameter(&user_data.data)?,
      );
    }
    if let Some(topic_data) = &qos.topic_data {
      pl.push(
        ParameterId::PID_TOPIC_DATA,
        encode_parameter(&topic_data.data)?,
      );
    }
    Ok(pl)
  }

  fn from_parameter_list(pl: &ParameterList, endianness: Endianness) -> Result<Self> {
    let endpoint_guid: GUID = pl
      .find(ParameterId::PID_ENDPOINT_GUID)
      .ok_or_else(|| Error::malformed("SEDP data without PID_ENDPOINT_GUID"))
      .and_then(|bytes| decode_parameter(bytes, endianness))?;
    let topic_name: String = pl
      .find(ParameterId::PID_TOPIC_NAME)
      .ok_or_else(|| Error::malformed("SEDP data without PID_TOPIC_NAME"))
      .and_then(|bytes| decode_parameter(bytes, endianness))?;
    let type_name: String = pl
      .find(ParameterId::PID_TYPE_NAME)
      .ok_or_else(|| Error::malformed("SEDP data without PID_TYPE_NAME"))
      .and_then(|bytes| decode_parameter(bytes, endianness))?;

    let mut qos = QosPolicies::default();
    if let Some(bytes) = pl.find(ParameterId::PID_RELIABILITY) {
      let data: ReliabilityData = decode_parameter(bytes, endianness)?;
      qos.reliability = Some(match data.kind {
        2 => policy::Reliability::Reliable {
          max_blocking_time: data.max_blocking_time,
        },
        _ => policy::Reliability::BestEffort,
      });
    }
    if let Some(bytes) = pl.find(ParameterId::PID_DURABILITY) {
      let kind: i32 = decode_parameter(bytes, endianness)?;
      qos.durability = Some(match kind {
        1 => policy::Durability::TransientLocal,
        2 => policy::Durability::Transient,
        3 => policy::Durability::Persistent,
        _ => policy::Durability::Volatile,
      });
    }
    if let Some(bytes) = pl.find(ParameterId::PID_DEADLINE) {
      qos.deadline = Some(policy::Deadline(decode_parameter(bytes, endianness)?));
    }
    if let Some(bytes) = pl.find(ParameterId::PID_LIVELINESS) {
      let data: LivelinessData = decode_parameter(bytes, endianness)?;
      qos.liveliness = Some(match data.kind {
        1 => policy::Liveliness::ManualByParticipant {
          lease_duration: data.lease_duration,
        },
        2 => policy::Liveliness::ManualByTopic {
          lease_duration: data.lease_duration,
        },
        _ => policy::Liveliness::Automatic {
          lease_duration: data.lease_duration,
        },
      });
    }
    if let Some(bytes) = pl.find(ParameterId::PID_OWNERSHIP) {
      let kind: i32 = decode_parameter(bytes, endianness)?;
      qos.ownership = Some(match kind {
        1 => policy::Ownership::Exclusive { strength: 0 },
        _ => policy::Ownership::Shared,
      });
    }
    if let Some(bytes) = pl.find(ParameterId::PID_LIFESPAN) {
      qos.lifespan = Some(policy::Lifespan {
        duration: decode_parameter(bytes, endianness)?,
      });
    }
    if let Some(bytes) = pl.find(ParameterId::PID_PARTITION) {
      qos.partition = Some(policy::Partition {
        partitions: decode_parameter(bytes, endianness)?,
      });
    }
    if let Some(bytes) = pl.find(ParameterId::PID_HISTORY) {
      let data: HistoryData = decode_parameter(bytes, endianness)?;
      qos.history = Some(match data.kind {
        1 => policy::History::KeepAll,
        _ => policy::History::KeepLast { depth: data.depth },
      });
    }
    if let Some(bytes) = pl.find(ParameterId::PID_RESOURCE_LIMITS) {
      qos.resource_limits = Some(decode_parameter(bytes, endianness)?);
    }
    if let Some(bytes) = pl.find(ParameterId::PID_USER_DATA) {
      qos.user_data = Some(policy::UserData {
        data: decode_parameter(bytes, endianness)?,
      });
    }
    if let Some(bytes) = pl.find(ParameterId::PID_TOPIC_DATA) {
      qos.topic_data = Some(policy::TopicData {
        data: decode_parameter(bytes, endianness)?,
      });
    }

    let locators = |pid: ParameterId| -> Result<Vec<Locator>> {
      pl.find_all(pid)
        .map(|bytes| decode_parameter::<LocatorData>(bytes, endianness).map(Locator::from))
        .collect()
    };

    Ok(Self {
      updated_time: Utc::now(),
      endpoint_guid,
      topic_name,
      type_name,
      qos,
      unicast_locators: locators(ParameterId::PID_UNICAST_LOCATOR)?,
      multicast_locators: locators(ParameterId::PID_MULTICAST_LOCATOR)?,
      expects_inline_qos: pl
        .find(ParameterId::PID_EXPECTS_INLINE_QOS)
        .map(|bytes| decode_parameter(bytes, endianness))
        .transpose()?
        .unwrap_or(false),
    })
  }

  pub fn to_serialized_payload(&self) -> Result<SerializedPayload> {
    let pl = self.to_parameter_list()?;
    let bytes = pl
      .write_to_vec_with_ctx(Endianness::LittleEndian)
      .map_err(Error::from)?;
    Ok(SerializedPayload::new(
      RepresentationIdentifier::PL_CDR_LE,
      bytes.into(),
    ))
  }

  pub fn from_serialized_payload(payload: &SerializedPayload) -> Result<Self> {
    if !payload.representation_identifier.is_parameter_list() {
      return Err(Error::malformed(format!(
        "SEDP payload is not PL_CDR: {:?}",
        payload.representation_identifier
      )));
    }
    let endianness = payload.representation_identifier.endianness();
    let pl = ParameterList::read_from_buffer_with_ctx(endianness, &payload.value)?;
    Self::from_parameter_list(&pl, endianness)
  }
}
