use enumflags2::BitFlags;
use log::error;
use speedy::{Context, Readable, Reader, Writable, Writer};

use crate::{
  messages::{
    protocol_version::ProtocolVersion, submessages::submessages::SubmessageHeader,
    vendor_id::VendorId,
  },
  rtps::{Submessage, SubmessageBody},
  structure::guid::GuidPrefix,
};
use super::{
  submessage::InterpreterSubmessage, submessage_flag::INFOSRC_Flags,
  submessage_kind::SubmessageKind,
};

/// Rewrites the logical source of the submessages that follow, as if
/// they had arrived in a message with this header. Used by relays.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct InfoSource {
  pub protocol_version: ProtocolVersion,
  pub vendor_id: VendorId,
  pub guid_prefix: GuidPrefix,
}

impl InfoSource {
  pub fn create_submessage(self, flags: BitFlags<INFOSRC_Flags>) -> Option<Submessage> {
    let submessage_len = match self.write_to_vec() {
      Ok(bytes) => bytes.len() as u16,
      Err(e) => {
        error!("Couldn't write INFO_SRC to bytes: {e}");
        return None;
      }
    };

    Some(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::INFO_SRC,
        flags: flags.bits(),
        content_length: submessage_len,
      },
      body: SubmessageBody::Interpreter(InterpreterSubmessage::InfoSource(self, flags)),
    })
  }
}

impl<'a, C: Context> Readable<'a, C> for InfoSource {
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let _unused: u32 = reader.read_value()?;
    Ok(Self {
      protocol_version: ProtocolVersion::read_from(reader)?,
      vendor_id: VendorId::read_from(reader)?,
      guid_prefix: GuidPrefix::read_from(reader)?,
    })
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    20
  }
}

impl<C: Context> Writable<C> for InfoSource {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&0u32)?; // unused, per RTPS spec Section 9.4.5.10
    self.protocol_version.write_to(writer)?;
    self.vendor_id.write_to(writer)?;
    self.guid_prefix.write_to(writer)
  }
}
