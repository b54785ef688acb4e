use enumflags2::BitFlags;
use log::error;
use speedy::{Context, Writable, Writer};

use crate::{
  messages::submessages::submessages::SubmessageHeader,
  rtps::{Submessage, SubmessageBody},
  structure::time::Timestamp,
};
use super::{
  submessage::InterpreterSubmessage, submessage_flag::INFOTS_Flags,
  submessage_kind::SubmessageKind,
};

/// Source timestamp for the submessages that follow. `None` corresponds
/// to the Invalidate flag: the previous timestamp no longer applies.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct InfoTimestamp {
  pub timestamp: Option<Timestamp>,
}

impl InfoTimestamp {
  /// Flags consistent with the payload: Invalidate iff no timestamp.
  pub fn flags(&self) -> BitFlags<INFOTS_Flags> {
    match self.timestamp {
      Some(_) => BitFlags::from(INFOTS_Flags::Endianness),
      None => INFOTS_Flags::Endianness | INFOTS_Flags::Invalidate,
    }
  }

  pub fn create_submessage(self, flags: BitFlags<INFOTS_Flags>) -> Option<Submessage> {
    let submessage_len = match self.write_to_vec() {
      Ok(bytes) => bytes.len() as u16,
      Err(e) => {
        error!("Couldn't write INFO_TS to bytes: {e}");
        return None;
      }
    };

    Some(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::INFO_TS,
        flags: flags.bits(),
        content_length: submessage_len,
      },
      body: SubmessageBody::Interpreter(InterpreterSubmessage::InfoTimestamp(self, flags)),
    })
  }

  /// The content is flag-dependent: with Invalidate set there is no
  /// timestamp on the wire at all.
  pub fn read_from_bytes(
    buffer: &[u8],
    flags: BitFlags<INFOTS_Flags>,
  ) -> Result<Self, speedy::Error> {
    use speedy::Readable;

    if flags.contains(INFOTS_Flags::Invalidate) {
      Ok(Self { timestamp: None })
    } else {
      let endianness = super::submessage_flag::endianness_flag(flags.bits());
      let timestamp = Timestamp::read_from_buffer_with_ctx(endianness, buffer)?;
      Ok(Self {
        timestamp: Some(timestamp),
      })
    }
  }
}

impl<C: Context> Writable<C> for InfoTimestamp {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    match self.timestamp {
      Some(ts) => ts.write_to(writer),
      None => Ok(()),
    }
  }
}
