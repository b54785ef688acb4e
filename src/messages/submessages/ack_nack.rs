use enumflags2::BitFlags;
use log::error;
use speedy::{Readable, Writable};

use crate::{
  messages::submessages::submessages::SubmessageHeader,
  rtps::{Submessage, SubmessageBody},
  structure::{guid::EntityId, sequence_number::SequenceNumberSet},
};
use super::{
  submessage::{HasEntityIds, ReaderSubmessage},
  submessage_flag::ACKNACK_Flags,
  submessage_kind::SubmessageKind,
};

/// Reader's combined positive and negative acknowledgment: everything
/// below `reader_sn_state.base` has been received; the bitmap lists the
/// sequence numbers the reader is still missing.
#[derive(Debug, PartialEq, Eq, Clone, Readable, Writable)]
pub struct AckNack {
  pub reader_id: EntityId,
  pub writer_id: EntityId,
  pub reader_sn_state: SequenceNumberSet,
  /// Incremented for every distinct ACKNACK; writers drop stale counts.
  pub count: i32,
}

impl AckNack {
  pub fn create_submessage(self, flags: BitFlags<ACKNACK_Flags>) -> Option<Submessage> {
    let submessage_len = match self.write_to_vec() {
      Ok(bytes) => bytes.len() as u16,
      Err(e) => {
        error!("Reader couldn't write ACKNACK to bytes: {e}");
        return None;
      }
    };

    Some(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::ACKNACK,
        flags: flags.bits(),
        content_length: submessage_len,
      },
      body: SubmessageBody::Reader(ReaderSubmessage::AckNack(self, flags)),
    })
  }
}

impl HasEntityIds for AckNack {
  fn receiver_entity_id(&self) -> EntityId {
    self.writer_id
  }
  fn sender_entity_id(&self) -> EntityId {
    self.reader_id
  }
}

#[cfg(test)]
mod tests {
  use crate::{serialization_test, structure::sequence_number::SequenceNumber};
  use super::*;

  serialization_test!( type = AckNack,
  {
    acknack_empty_set,
    AckNack {
      reader_id: EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_READER,
      writer_id: EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_WRITER,
      reader_sn_state: SequenceNumberSet::new_empty(SequenceNumber::from(2)),
      count: 3,
    },
    le = [0x00, 0x00, 0x04, 0xC7,
          0x00, 0x00, 0x04, 0xC2,
          0x00, 0x00, 0x00, 0x00,
          0x02, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00,
          0x03, 0x00, 0x00, 0x00],
    be = [0x00, 0x00, 0x04, 0xC7,
          0x00, 0x00, 0x04, 0xC2,
          0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x02,
          0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x03],
    acknack_with_missing,
    AckNack {
      reader_id: EntityId::UNKNOWN,
      writer_id: EntityId::UNKNOWN,
      reader_sn_state: {
        let mut set = SequenceNumberSet::new_empty(SequenceNumber::from(3));
        set.insert(SequenceNumber::from(3));
        set
      },
      count: 1,
    },
    le = [0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00,
          0x03, 0x00, 0x00, 0x00,
          0x01, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x80,
          0x01, 0x00, 0x00, 0x00],
    be = [0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x03,
          0x00, 0x00, 0x00, 0x01,
          0x80, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x01],
  });
}
