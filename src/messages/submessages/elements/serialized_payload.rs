use bytes::{BufMut, Bytes, BytesMut};
use speedy::Endianness;

use crate::error::{Error, Result};

/// Two-byte encapsulation identifier at the start of every serialized
/// payload. RTPS spec Section 10.2.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RepresentationIdentifier {
  pub bytes: [u8; 2],
}

impl RepresentationIdentifier {
  pub const CDR_BE: Self = Self {
    bytes: [0x00, 0x00],
  };
  pub const CDR_LE: Self = Self {
    bytes: [0x00, 0x01],
  };
  pub const PL_CDR_BE: Self = Self {
    bytes: [0x00, 0x02],
  };
  pub const PL_CDR_LE: Self = Self {
    bytes: [0x00, 0x03],
  };

  pub fn endianness(&self) -> Endianness {
    // odd second byte means little-endian in all the classic CDR ids
    if self.bytes[0] == 0 && self.bytes[1] & 0x01 != 0 {
      Endianness::LittleEndian
    } else {
      Endianness::BigEndian
    }
  }

  pub fn is_parameter_list(&self) -> bool {
    *self == Self::PL_CDR_BE || *self == Self::PL_CDR_LE
  }
}

/// Serialized sample as carried in DATA: encapsulation header plus the
/// CDR bytes of the value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerializedPayload {
  pub representation_identifier: RepresentationIdentifier,
  pub representation_options: [u8; 2],
  pub value: Bytes,
}

impl SerializedPayload {
  pub fn new(representation_identifier: RepresentationIdentifier, value: Bytes) -> Self {
    Self {
      representation_identifier,
      representation_options: [0, 0],
      value,
    }
  }

  pub fn from_bytes(bytes: &Bytes) -> Result<Self> {
    if bytes.len() < 4 {
      return Err(Error::malformed(format!(
        "serialized payload too short: {} bytes",
        bytes.len()
      )));
    }
    Ok(Self {
      representation_identifier: RepresentationIdentifier {
        bytes: [bytes[0], bytes[1]],
      },
      representation_options: [bytes[2], bytes[3]],
      value: bytes.slice(4..),
    })
  }

  pub fn to_bytes(&self) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + self.value.len());
    buf.put_slice(&self.representation_identifier.bytes);
    buf.put_slice(&self.representation_options);
    buf.put_slice(&self.value);
    buf.freeze()
  }

  pub fn len_serialized(&self) -> usize {
    4 + self.value.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn representation_identifier_endianness() {
    assert_eq!(
      RepresentationIdentifier::CDR_LE.endianness(),
      Endianness::LittleEndian
    );
    assert_eq!(
      RepresentationIdentifier::PL_CDR_LE.endianness(),
      Endianness::LittleEndian
    );
    assert_eq!(
      RepresentationIdentifier::CDR_BE.endianness(),
      Endianness::BigEndian
    );
    assert_eq!(
      RepresentationIdentifier::PL_CDR_BE.endianness(),
      Endianness::BigEndian
    );
  }

  #[test]
  fn payload_roundtrip() {
    let payload = SerializedPayload::new(
      RepresentationIdentifier::CDR_LE,
      Bytes::from_static(&[1, 2, 3, 4, 5]),
    );
    let bytes = payload.to_bytes();
    assert_eq!(&bytes[..4], &[0x00, 0x01, 0x00, 0x00]);
    assert_eq!(SerializedPayload::from_bytes(&bytes).unwrap(), payload);
  }

  #[test]
  fn short_payload_is_malformed() {
    assert!(SerializedPayload::from_bytes(&Bytes::from_static(&[0, 1])).is_err());
  }
}
