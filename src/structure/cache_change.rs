use std::fmt;

use serde::{Deserialize, Serialize};
use speedy::{Readable, Writable};

use crate::{
  messages::submessages::elements::parameter_list::ParameterList,
  structure::{
    guid::GUID, payload_pool::PayloadHandle, sequence_number::SequenceNumber, time::Timestamp,
  },
};

/// Kind of a change to a data instance. RTPS spec Section 8.2.7.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
  Alive,
  NotAliveDisposed,
  NotAliveUnregistered,
  NotAliveDisposedUnregistered,
}

impl ChangeKind {
  /// DATA submessages for non-ALIVE kinds carry the key, not the data.
  pub fn is_key_only(&self) -> bool {
    !matches!(self, Self::Alive)
  }

  /// Value of the STATUS_INFO inline QoS parameter for this kind.
  /// Bit 0 = dispose, bit 1 = unregister.
  pub fn status_info(&self) -> u32 {
    match self {
      Self::Alive => 0,
      Self::NotAliveDisposed => 0b01,
      Self::NotAliveUnregistered => 0b10,
      Self::NotAliveDisposedUnregistered => 0b11,
    }
  }

  pub fn from_status_info(status_info: u32) -> Self {
    match status_info & 0b11 {
      0b01 => Self::NotAliveDisposed,
      0b10 => Self::NotAliveUnregistered,
      0b11 => Self::NotAliveDisposedUnregistered,
      _ => Self::Alive,
    }
  }
}

/// 16-byte key of a data instance within a topic, RTPS "KeyHash".
///
/// For WITH_KEY topics this is derived deterministically from the key
/// fields: the big-endian CDR serialization of the key if it fits in 16
/// bytes (zero padded), otherwise its MD5 digest. See RTPS spec
/// Section 9.6.3.3.
#[derive(
  Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash, Readable, Writable, Serialize, Deserialize,
)]
pub struct InstanceHandle {
  hash: [u8; 16],
}

impl InstanceHandle {
  pub const NIL: Self = Self { hash: [0; 16] };

  pub fn from_key_hash(hash: [u8; 16]) -> Self {
    Self { hash }
  }

  /// Derive the handle from a serialized (big-endian CDR) key.
  pub fn from_serialized_key(cdr_key: &[u8]) -> Self {
    let mut hash = [0; 16];
    if cdr_key.len() <= 16 {
      hash[..cdr_key.len()].copy_from_slice(cdr_key);
    } else {
      hash = md5::compute(cdr_key).0;
    }
    Self { hash }
  }

  pub fn as_bytes(&self) -> &[u8; 16] {
    &self.hash
  }
}

impl From<GUID> for InstanceHandle {
  // Built-in discovery topics are keyed by GUID.
  fn from(guid: GUID) -> Self {
    Self {
      hash: guid.as_bytes(),
    }
  }
}

impl fmt::Debug for InstanceHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for b in self.hash {
      write!(f, "{b:02x}")?;
    }
    Ok(())
  }
}

/// One publication sample as held in a HistoryCache: change kind, origin,
/// sequence number, instance, and the pooled serialized payload.
#[derive(Clone, Debug)]
pub struct CacheChange {
  pub kind: ChangeKind,
  pub writer_guid: GUID,
  pub sequence_number: SequenceNumber,
  pub instance_handle: InstanceHandle,
  pub source_timestamp: Option<Timestamp>,
  pub inline_qos: Option<ParameterList>,
  // None for key-only changes whose key travels in inline QoS.
  pub payload: Option<PayloadHandle>,
}

impl CacheChange {
  pub fn new(
    kind: ChangeKind,
    writer_guid: GUID,
    sequence_number: SequenceNumber,
    instance_handle: InstanceHandle,
    payload: Option<PayloadHandle>,
  ) -> Self {
    Self {
      kind,
      writer_guid,
      sequence_number,
      instance_handle,
      source_timestamp: Some(Timestamp::now()),
      inline_qos: None,
      payload,
    }
  }

  pub fn with_timestamp(mut self, timestamp: Option<Timestamp>) -> Self {
    self.source_timestamp = timestamp;
    self
  }

  pub fn with_inline_qos(mut self, inline_qos: Option<ParameterList>) -> Self {
    self.inline_qos = inline_qos;
    self
  }

  pub fn payload_size(&self) -> usize {
    self.payload.as_ref().map_or(0, |p| p.len())
  }
}
