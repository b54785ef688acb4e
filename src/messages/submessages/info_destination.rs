use enumflags2::BitFlags;
use log::error;
use speedy::{Readable, Writable};

use crate::{
  messages::submessages::submessages::SubmessageHeader,
  rtps::{Submessage, SubmessageBody},
  structure::guid::GuidPrefix,
};
use super::{
  submessage::InterpreterSubmessage, submessage_flag::INFODST_Flags,
  submessage_kind::SubmessageKind,
};

/// Redirects the submessages that follow to the Participant with the
/// given prefix. GUIDPREFIX_UNKNOWN resets the target back to the
/// receiver itself.
#[derive(Debug, PartialEq, Eq, Clone, Readable, Writable)]
pub struct InfoDestination {
  pub guid_prefix: GuidPrefix,
}

impl InfoDestination {
  pub fn create_submessage(self, flags: BitFlags<INFODST_Flags>) -> Option<Submessage> {
    let submessage_len = match self.write_to_vec() {
      Ok(bytes) => bytes.len() as u16,
      Err(e) => {
        error!("Couldn't write INFO_DST to bytes: {e}");
        return None;
      }
    };

    Some(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::INFO_DST,
        flags: flags.bits(),
        content_length: submessage_len,
      },
      body: SubmessageBody::Interpreter(InterpreterSubmessage::InfoDestination(self, flags)),
    })
  }
}

#[cfg(test)]
mod tests {
  use crate::serialization_test;
  use super::*;

  serialization_test!( type = InfoDestination,
  {
    info_destination,
    InfoDestination {
      guid_prefix: GuidPrefix::new(&[
        0x01, 0x03, 0x00, 0x0C, 0x29, 0x2D, 0x31, 0xA2, 0x28, 0x20, 0x02, 0x08,
      ]),
    },
    le = [0x01, 0x03, 0x00, 0x0C,
          0x29, 0x2D, 0x31, 0xA2,
          0x28, 0x20, 0x02, 0x08],
    be = [0x01, 0x03, 0x00, 0x0C,
          0x29, 0x2D, 0x31, 0xA2,
          0x28, 0x20, 0x02, 0x08],
  });
}
