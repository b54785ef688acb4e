use speedy::{Readable, Writable};

use crate::structure::{
  guid::EntityId,
  sequence_number::{FragmentNumber, SequenceNumber},
};
use super::submessage::HasEntityIds;

/// Writer's announcement of how many fragments of one large sample are
/// available, the fragmented counterpart of HEARTBEAT.
#[derive(Debug, PartialEq, Eq, Clone, Readable, Writable)]
pub struct HeartbeatFrag {
  pub reader_id: EntityId,
  pub writer_id: EntityId,
  pub writer_sn: SequenceNumber,
  pub last_fragment_num: FragmentNumber,
  pub count: i32,
}

impl HasEntityIds for HeartbeatFrag {
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

  serialization_test!( type = HeartbeatFrag,
  {
    heartbeat_frag,
    HeartbeatFrag {
      reader_id: EntityId::UNKNOWN,
      writer_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
      writer_sn: SequenceNumber::from(4),
      last_fragment_num: FragmentNumber(2),
      count: 1,
    },
    le = [0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x03, 0xC2,
          0x00, 0x00, 0x00, 0x00,
          0x04, 0x00, 0x00, 0x00,
          0x02, 0x00, 0x00, 0x00,
          0x01, 0x00, 0x00, 0x00],
    be = [0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x03, 0xC2,
          0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x04,
          0x00, 0x00, 0x00, 0x02,
          0x00, 0x00, 0x00, 0x01],
  });
}
