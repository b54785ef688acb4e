use speedy::{Readable, Writable};

use crate::structure::{
  guid::EntityId,
  sequence_number::{FragmentNumberSet, SequenceNumber},
};
use super::submessage::HasEntityIds;

/// Reader's request for retransmission of specific fragments of one
/// sample, the fragmented counterpart of the negative half of ACKNACK.
#[derive(Debug, PartialEq, Eq, Clone, Readable, Writable)]
pub struct NackFrag {
  pub reader_id: EntityId,
  pub writer_id: EntityId,
  pub writer_sn: SequenceNumber,
  pub fragment_number_state: FragmentNumberSet,
  pub count: i32,
}

impl HasEntityIds for NackFrag {
  fn receiver_entity_id(&self) -> EntityId {
    self.writer_id
  }
  fn sender_entity_id(&self) -> EntityId {
    self.reader_id
  }
}

#[cfg(test)]
mod tests {
  use crate::{serialization_test, structure::sequence_number::FragmentNumber};
  use super::*;

  serialization_test!( type = NackFrag,
  {
    nack_frag,
    NackFrag {
      reader_id: EntityId::UNKNOWN,
      writer_id: EntityId::UNKNOWN,
      writer_sn: SequenceNumber::from(9),
      fragment_number_state: {
        let mut set = FragmentNumberSet::new_empty(FragmentNumber(2));
        set.insert(FragmentNumber(2));
        set
      },
      count: 5,
    },
    le = [0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00,
          0x09, 0x00, 0x00, 0x00,
          0x02, 0x00, 0x00, 0x00,
          0x01, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x80,
          0x05, 0x00, 0x00, 0x00],
    be = [0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x09,
          0x00, 0x00, 0x00, 0x02,
          0x00, 0x00, 0x00, 0x01,
          0x80, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x05],
  });
}
