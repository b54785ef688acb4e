use byteorder::{BigEndian, LittleEndian};
use chrono::Utc;
#[allow(unused_imports)]
use log::{debug, error, trace, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use speedy::{Endianness, Readable, Writable};

use crate::{
  error::{Error, Result},
  messages::{
    protocol_version::ProtocolVersion,
    submessages::elements::{
      parameter::ParameterId,
      parameter_list::ParameterList,
      serialized_payload::{RepresentationIdentifier, SerializedPayload},
    },
    vendor_id::VendorId,
  },
  structure::{duration::Duration, guid::GUID, locator::Locator},
};

/// Bit mask of the built-in discovery endpoints a Participant runs.
/// RTPS spec Section 9.3.2, Table 9.4.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltinEndpointSet(pub u32);

impl BuiltinEndpointSet {
  pub const PARTICIPANT_ANNOUNCER: u32 = 1 << 0;
  pub const PARTICIPANT_DETECTOR: u32 = 1 << 1;
  pub const PUBLICATIONS_ANNOUNCER: u32 = 1 << 2;
  pub const PUBLICATIONS_DETECTOR: u32 = 1 << 3;
  pub const SUBSCRIPTIONS_ANNOUNCER: u32 = 1 << 4;
  pub const SUBSCRIPTIONS_DETECTOR: u32 = 1 << 5;
  pub const PARTICIPANT_MESSAGE_WRITER: u32 = 1 << 10;
  pub const PARTICIPANT_MESSAGE_READER: u32 = 1 << 11;

  pub fn all_simple_discovery() -> Self {
    Self(
      Self::PARTICIPANT_ANNOUNCER
        | Self::PARTICIPANT_DETECTOR
        | Self::PUBLICATIONS_ANNOUNCER
        | Self::PUBLICATIONS_DETECTOR
        | Self::SUBSCRIPTIONS_ANNOUNCER
        | Self::SUBSCRIPTIONS_DETECTOR,
    )
  }

  pub fn contains(&self, bits: u32) -> bool {
    self.0 & bits == bits
  }
}

// Locator wire image inside parameter lists. The in-memory Locator is
// an enum, which must not leak its serde shape onto the wire.
#[derive(Serialize, Deserialize)]
pub(crate) struct LocatorData {
  kind: i32,
  port: u32,
  address: [u8; 16],
}

impl From<&Locator> for LocatorData {
  fn from(locator: &Locator) -> Self {
    Self {
      kind: locator.kind(),
      port: locator.port(),
      address: locator.address_bytes(),
    }
  }
}

impl From<LocatorData> for Locator {
  fn from(data: LocatorData) -> Self {
    Locator::from_parts(data.kind, data.port, data.address)
  }
}

/// The SPDP announcement record: who a Participant is and where to
/// reach it. One of these multicasts periodically from every
/// Participant; receiving a fresh one starts the peer's lease.
#[derive(Clone, Debug, PartialEq)]
pub struct SpdpDiscoveredParticipantData {
  pub updated_time: chrono::DateTime<Utc>,
  pub protocol_version: ProtocolVersion,
  pub vendor_id: VendorId,
  pub participant_guid: GUID,
  pub domain_id: u16,
  pub metatraffic_unicast_locators: Vec<Locator>,
  pub metatraffic_multicast_locators: Vec<Locator>,
  pub default_unicast_locators: Vec<Locator>,
  pub default_multicast_locators: Vec<Locator>,
  pub available_builtin_endpoints: BuiltinEndpointSet,
  pub lease_duration: Option<Duration>,
  pub entity_name: Option<String>,
}

pub(crate) fn encode_parameter<T: Serialize>(value: &T) -> Result<Vec<u8>> {
  cdr_encoding::to_vec::<T, LittleEndian>(value)
    .map_err(|e| Error::bad_parameter(format!("CDR encode: {e}")))
}

pub(crate) fn decode_parameter<T: DeserializeOwned>(
  bytes: &[u8],
  endianness: Endianness,
) -> Result<T> {
  let result = match endianness {
    Endianness::LittleEndian => cdr_encoding::from_bytes::<T, LittleEndian>(bytes),
    Endianness::BigEndian => cdr_encoding::from_bytes::<T, BigEndian>(bytes),
  };
  result
    .map(|(value, _consumed)| value)
    .map_err(|e| Error::malformed(format!("CDR decode: {e}")))
}

impl SpdpDiscoveredParticipantData {
  pub fn to_parameter_list(&self) -> Result<ParameterList> {
    let mut pl = ParameterList::new();
    pl.push(
      ParameterId::PID_PROTOCOL_VERSION,
      encode_parameter(&self.protocol_version)?,
    );
    pl.push(ParameterId::PID_VENDOR_ID, encode_parameter(&self.vendor_id)?);
    pl.push(
      ParameterId::PID_PARTICIPANT_GUID,
      encode_parameter(&self.participant_guid)?,
    );
    pl.push(
      ParameterId::PID_DOMAIN_ID,
      encode_parameter(&u32::from(self.domain_id))?,
    );
    for locator in &self.metatraffic_unicast_locators {
      pl.push(
        ParameterId::PID_METATRAFFIC_UNICAST_LOCATOR,
        encode_parameter(&LocatorData::from(locator))?,
      );
    }
    for locator in &self.metatraffic_multicast_locators {
      pl.push(
        ParameterId::PID_METATRAFFIC_MULTICAST_LOCATOR,
        encode_parameter(&LocatorData::from(locator))?,
      );
    }
    for locator in &self.default_unicast_locators {
      pl.push(
        ParameterId::PID_DEFAULT_UNICAST_LOCATOR,
        encode_parameter(&LocatorData::from(locator))?,
      );
    }
    for locator in &self.default_multicast_locators {
      pl.push(
        ParameterId::PID_DEFAULT_MULTICAST_LOCATOR,
        encode_parameter(&LocatorData::from(locator))?,
      );
    }
    pl.push(
      ParameterId::PID_BUILTIN_ENDPOINT_SET,
      encode_parameter(&self.available_builtin_endpoints)?,
    );
    if let Some(lease) = self.lease_duration {
      pl.push(
        ParameterId::PID_PARTICIPANT_LEASE_DURATION,
        encode_parameter(&lease)?,
      );
    }
    if let Some(name) = &self.entity_name {
      pl.push(ParameterId::PID_ENTITY_NAME, encode_parameter(name)?);
    }
    Ok(pl)
  }

  pub fn from_parameter_list(pl: &ParameterList, endianness: Endianness) -> Result<Self> {
    let participant_guid: GUID = pl
      .find(ParameterId::PID_PARTICIPANT_GUID)
      .ok_or_else(|| Error::malformed("SPDP data without PID_PARTICIPANT_GUID"))
      .and_then(|bytes| decode_parameter(bytes, endianness))?;

    let protocol_version = pl
      .find(ParameterId::PID_PROTOCOL_VERSION)
      .map(|bytes| decode_parameter(bytes, endianness))
      .transpose()?
      .unwrap_or(ProtocolVersion::PROTOCOLVERSION_2_1);
    let vendor_id = pl
      .find(ParameterId::PID_VENDOR_ID)
      .map(|bytes| decode_parameter(bytes, endianness))
      .transpose()?
      .unwrap_or(VendorId::VENDOR_UNKNOWN);
    let domain_id: u32 = pl
      .find(ParameterId::PID_DOMAIN_ID)
      .map(|bytes| decode_parameter(bytes, endianness))
      .transpose()?
      .unwrap_or(0);

    let locators = |pid: ParameterId| -> Result<Vec<Locator>> {
      pl.find_all(pid)
        .map(|bytes| decode_parameter::<LocatorData>(bytes, endianness).map(Locator::from))
        .collect()
    };

    Ok(Self {
      updated_time: Utc::now(),
      protocol_version,
      vendor_id,
      participant_guid,
      domain_id: domain_id as u16,
      metatraffic_unicast_locators: locators(ParameterId::PID_METATRAFFIC_UNICAST_LOCATOR)?,
      metatraffic_multicast_locators: locators(ParameterId::PID_METATRAFFIC_MULTICAST_LOCATOR)?,
      default_unicast_locators: locators(ParameterId::PID_DEFAULT_UNICAST_LOCATOR)?,
      default_multicast_locators: locators(ParameterId::PID_DEFAULT_MULTICAST_LOCATOR)?,
      available_builtin_endpoints: pl
        .find(ParameterId::PID_BUILTIN_ENDPOINT_SET)
        .map(|bytes| decode_parameter(bytes, endianness))
        .transpose()?
        .unwrap_or(BuiltinEndpointSet(0)),
      lease_duration: pl
        .find(ParameterId::PID_PARTICIPANT_LEASE_DURATION)
        .map(|bytes| decode_parameter(bytes, endianness))
        .transpose()?,
      entity_name: pl
        .find(ParameterId::PID_ENTITY_NAME)
        .map(|bytes| decode_parameter(bytes, endianness))
        .transpose()?,
    })
  }

  /// PL_CDR_LE payload, ready for a DATA submessage.
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
        "SPDP payload is not PL_CDR: {:?}",
        payload.representation_identifier
      )));
    }
    let endianness = payload.representation_identifier.endianness();
    let pl = ParameterList::read_from_buffer_with_ctx(endianness, &payload.value)?;
    Self::from_parameter_list(&pl, endianness)
  }
}
