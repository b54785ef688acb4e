use enumflags2::BitFlags;

use crate::structure::guid::EntityId;
use super::{
  ack_nack::AckNack,
  data::Data,
  data_frag::DataFrag,
  gap::Gap,
  heartbeat::Heartbeat,
  heartbeat_frag::HeartbeatFrag,
  info_destination::InfoDestination,
  info_reply::InfoReply,
  info_source::InfoSource,
  info_timestamp::InfoTimestamp,
  nack_frag::NackFrag,
  submessage_flag::{
    ACKNACK_Flags, DATAFRAG_Flags, DATA_Flags, GAP_Flags, HEARTBEATFRAG_Flags, HEARTBEAT_Flags,
    INFODST_Flags, INFOREPLY_Flags, INFOSRC_Flags, INFOTS_Flags, NACKFRAG_Flags,
  },
};

/// Submessages carrying entity ids name their addressee and their sender.
pub trait HasEntityIds {
  fn receiver_entity_id(&self) -> EntityId;
  fn sender_entity_id(&self) -> EntityId;
}

/// Submessages originating at a Writer, dispatched to Readers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriterSubmessage {
  Data(Data, BitFlags<DATA_Flags>),
  DataFrag(DataFrag, BitFlags<DATAFRAG_Flags>),
  Heartbeat(Heartbeat, BitFlags<HEARTBEAT_Flags>),
  HeartbeatFrag(HeartbeatFrag, BitFlags<HEARTBEATFRAG_Flags>),
  Gap(Gap, BitFlags<GAP_Flags>),
}

/// Submessages originating at a Reader, dispatched to Writers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReaderSubmessage {
  AckNack(AckNack, BitFlags<ACKNACK_Flags>),
  NackFrag(NackFrag, BitFlags<NACKFRAG_Flags>),
}

/// Submessages that only modify the receiver's interpretation context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InterpreterSubmessage {
  InfoSource(InfoSource, BitFlags<INFOSRC_Flags>),
  InfoDestination(InfoDestination, BitFlags<INFODST_Flags>),
  InfoTimestamp(InfoTimestamp, BitFlags<INFOTS_Flags>),
  InfoReply(InfoReply, BitFlags<INFOREPLY_Flags>),
}

/// Acknowledgment-ish submessages routed from the receiver context to the
/// addressed Writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AckSubmessage {
  AckNack(AckNack),
  NackFrag(NackFrag),
}

impl AckSubmessage {
  pub fn writer_id(&self) -> EntityId {
    match self {
      Self::AckNack(a) => a.writer_id,
      Self::NackFrag(n) => n.writer_id,
    }
  }

  pub fn reader_id(&self) -> EntityId {
    match self {
      Self::AckNack(a) => a.reader_id,
      Self::NackFrag(n) => n.reader_id,
    }
  }
}
