use enumflags2::BitFlags;
use log::error;
use speedy::{Readable, Writable};

use crate::{
  messages::submessages::submessages::SubmessageHeader,
  rtps::{Submessage, SubmessageBody},
  structure::{guid::EntityId, sequence_number::SequenceNumber},
};
use super::{
  submessage::{HasEntityIds, WriterSubmessage},
  submessage_flag::HEARTBEAT_Flags,
  submessage_kind::SubmessageKind,
};

/// Writer's announcement of the sequence numbers it has available,
/// `first_sn ..= last_sn`. With the Final flag clear it solicits an
/// ACKNACK response. `first_sn > last_sn` (by exactly one) announces an
/// empty cache and must not change reader state beyond liveliness.
#[derive(Debug, PartialEq, Eq, Clone, Readable, Writable)]
pub struct Heartbeat {
  pub reader_id: EntityId,
  pub writer_id: EntityId,
  pub first_sn: SequenceNumber,
  pub last_sn: SequenceNumber,
  /// Incremented for every distinct HEARTBEAT; readers drop stale counts.
  pub count: i32,
}

impl Heartbeat {
  pub fn create_submessage(self, flags: BitFlags<HEARTBEAT_Flags>) -> Option<Submessage> {
    let submessage_len = match self.write_to_vec() {
      Ok(bytes) => bytes.len() as u16,
      Err(e) => {
        error!("Writer couldn't write HEARTBEAT to bytes: {e}");
        return None;
      }
    };

    Some(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::HEARTBEAT,
        flags: flags.bits(),
        content_length: submessage_len,
      },
      body: SubmessageBody::Writer(WriterSubmessage::Heartbeat(self, flags)),
    })
  }
}

impl HasEntityIds for Heartbeat {
  fn receiver_entity_id(&self) -> EntityId {
    self.reader_id
  }
  fn sender_entity_id(&self) -> EntityId {
    self.writer_id
  }
}

#[cfg(test)]
mod tests {
  use crate::serialization_test;
  use super::*;

  serialization_test!( type = Heartbeat,
  {
    heartbeat_with_range,
    Heartbeat {
      reader_id: EntityId::UNKNOWN,
      writer_id: EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER,
      first_sn: SequenceNumber::from(1),
      last_sn: SequenceNumber::from(3),
      count: 7,
    },
    le = [0x00, 0x00, 0x00, 0x00,
          0x00, 0x01, 0x00, 0xC2,
          0x00, 0x00, 0x00, 0x00,
          0x01, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00,
          0x03, 0x00, 0x00, 0x00,
          0x07, 0x00, 0x00, 0x00],
    be = [0x00, 0x00, 0x00, 0x00,
          0x00, 0x01, 0x00, 0xC2,
          0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x01,
          0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x03,
          0x00, 0x00, 0x00, 0x07],
    liveliness_only,
    Heartbeat {
      reader_id: EntityId::UNKNOWN,
      writer_id: EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER,
      first_sn: SequenceNumber::from(1),
      last_sn: SequenceNumber::from(0),
      count: 1,
    },
    le = [0x00, 0x00, 0x00, 0x00,
          0x00, 0x01, 0x00, 0xC2,
          0x00, 0x00, 0x00, 0x00,
          0x01, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00,
          0x01, 0x00, 0x00, 0x00],
    be = [0x00, 0x00, 0x00, 0x00,
          0x00, 0x01, 0x00, 0xC2,
          0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x01,
          0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x01],
  });
}
