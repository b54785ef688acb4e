use speedy::{Readable, Writable};

use super::submessage_kind::SubmessageKind;

// Submessage types and elements, collected for one-stop importing.
pub use super::{
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
  submessage::{
    AckSubmessage, HasEntityIds, InterpreterSubmessage, ReaderSubmessage, WriterSubmessage,
  },
  submessage_flag::*,
  submessage_kind,
};

/// Four bytes that precede every submessage: kind, flags, and the length
/// of the content that follows. A zero `content_length` on the last
/// submessage means "extends to the end of the message".
#[derive(Copy, Clone, Debug, PartialEq, Eq, Readable, Writable)]
pub struct SubmessageHeader {
  pub kind: SubmessageKind,
  pub flags: u8,
  pub content_length: u16,
}

pub const SUBMESSAGE_HEADER_SIZE: usize = 4;
