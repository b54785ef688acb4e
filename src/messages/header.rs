use speedy::{Context, Readable, Reader, Writable, Writer};
use static_assertions::const_assert_eq;

use crate::{
  messages::{protocol_version::ProtocolVersion, vendor_id::VendorId},
  structure::guid::GuidPrefix,
};

/// The 4-byte protocol magic, always `RTPS`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProtocolId;

impl ProtocolId {
  pub const MAGIC: [u8; 4] = *b"RTPS";
}

impl<'a, C: Context> Readable<'a, C> for ProtocolId {
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let mut magic = [0; 4];
    for b in &mut magic {
      *b = reader.read_u8()?;
    }
    if magic != Self::MAGIC {
      return Err(speedy::Error::custom("message does not start with RTPS").into());
    }
    Ok(Self)
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    4
  }
}

impl<C: Context> Writable<C> for ProtocolId {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    for b in Self::MAGIC {
      writer.write_u8(b)?;
    }
    Ok(())
  }
}

pub const RTPS_MESSAGE_HEADER_SIZE: usize = 20;
const_assert_eq!(RTPS_MESSAGE_HEADER_SIZE, 4 + 2 + 2 + 12);

/// The 20-byte header that begins every RTPS message.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Readable, Writable)]
pub struct Header {
  pub protocol_id: ProtocolId,
  pub protocol_version: ProtocolVersion,
  pub vendor_id: VendorId,
  pub guid_prefix: GuidPrefix,
}

impl Header {
  pub fn new(guid_prefix: GuidPrefix) -> Self {
    Self {
      protocol_id: ProtocolId,
      protocol_version: ProtocolVersion::THIS_IMPLEMENTATION,
      vendor_id: VendorId::THIS_IMPLEMENTATION,
      guid_prefix,
    }
  }
}
