use enumflags2::BitFlags;
use log::error;
use speedy::{Readable, Writable};

use crate::{
  messages::submessages::submessages::SubmessageHeader,
  rtps::{Submessage, SubmessageBody},
  structure::{
    guid::EntityId,
    sequence_number::{SequenceNumber, SequenceNumberSet},
  },
};
use super::{
  submessage::{HasEntityIds, WriterSubmessage},
  submessage_flag::GAP_Flags,
  submessage_kind::SubmessageKind,
};

/// Writer's declaration that a set of sequence numbers is irrelevant and
/// the reader should advance past them without waiting.
///
/// The irrelevant set is the contiguous range
/// `gap_start <= sn < gap_list.base` plus every member of `gap_list`
/// itself.
#[derive(Debug, PartialEq, Eq, Clone, Readable, Writable)]
pub struct Gap {
  pub reader_id: EntityId,
  pub writer_id: EntityId,
  pub gap_start: SequenceNumber,
  pub gap_list: SequenceNumberSet,
}

impl Gap {
  pub fn create_submessage(self, flags: BitFlags<GAP_Flags>) -> Option<Submessage> {
    let submessage_len = match self.write_to_vec() {
      Ok(bytes) => bytes.len() as u16,
      Err(e) => {
        error!("Writer couldn't write GAP to bytes: {e}");
        return None;
      }
    };

    Some(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::GAP,
        flags: flags.bits(),
        content_length: submessage_len,
      },
      body: SubmessageBody::Writer(WriterSubmessage::Gap(self, flags)),
    })
  }

  /// GAP for the single sequence number `seq`.
  pub fn for_one(reader_id: EntityId, writer_id: EntityId, seq: SequenceNumber) -> Self {
    Self {
      reader_id,
      writer_id,
      gap_start: seq,
      gap_list: SequenceNumberSet::new_empty(seq.next()),
    }
  }
}

impl HasEntityIds for Gap {
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

  serialization_test!( type = Gap,
  {
    gap_contiguous_range,
    Gap {
      reader_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
      writer_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
      gap_start: SequenceNumber::from(5),
      gap_list: SequenceNumberSet::new_empty(SequenceNumber::from(9)),
    },
    le = [0x00, 0x00, 0x03, 0xC7,
          0x00, 0x00, 0x03, 0xC2,
          0x00, 0x00, 0x00, 0x00,
          0x05, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00,
          0x09, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00],
    be = [0x00, 0x00, 0x03, 0xC7,
          0x00, 0x00, 0x03, 0xC2,
          0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x05,
          0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x09,
          0x00, 0x00, 0x00, 0x00],
  });

  #[test]
  fn single_sequence_gap_shape() {
    let gap = Gap::for_one(
      EntityId::UNKNOWN,
      EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
      SequenceNumber::from(42),
    );
    assert_eq!(gap.gap_start, SequenceNumber::from(42));
    assert_eq!(gap.gap_list.base(), SequenceNumber::from(43));
    assert!(gap.gap_list.is_empty());
  }
}
