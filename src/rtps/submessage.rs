use speedy::{Context, Endianness, Writable, Writer};

use crate::messages::submessages::submessages::{
  InterpreterSubmessage, ReaderSubmessage, SubmessageHeader, WriterSubmessage,
};

/// One parsed submessage: header plus interpreted body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submessage {
  pub header: SubmessageHeader,
  pub body: SubmessageBody,
}

/// Submessage bodies grouped by the entity kind that processes them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmessageBody {
  Writer(WriterSubmessage),
  Reader(ReaderSubmessage),
  Interpreter(InterpreterSubmessage),
}

impl Submessage {
  pub fn len_serialized(&self) -> usize {
    4 + usize::from(self.header.content_length)
  }

  pub fn write_to_vec(&self) -> Result<Vec<u8>, speedy::Error> {
    self.write_to_vec_with_ctx(Endianness::LittleEndian)
  }
}

impl<C: Context> Writable<C> for Submessage {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    self.header.write_to(writer)?;
    match &self.body {
      SubmessageBody::Writer(m) => match m {
        WriterSubmessage::Data(s, _) => s.write_to(writer),
        WriterSubmessage::DataFrag(s, _) => s.write_to(writer),
        WriterSubmessage::Heartbeat(s, _) => s.write_to(writer),
        WriterSubmessage::HeartbeatFrag(s, _) => s.write_to(writer),
        WriterSubmessage::Gap(s, _) => s.write_to(writer),
      },
      SubmessageBody::Reader(m) => match m {
        ReaderSubmessage::AckNack(s, _) => s.write_to(writer),
        ReaderSubmessage::NackFrag(s, _) => s.write_to(writer),
      },
      SubmessageBody::Interpreter(m) => match m {
        InterpreterSubmessage::InfoSource(s, _) => s.write_to(writer),
        InterpreterSubmessage::InfoDestination(s, _) => s.write_to(writer),
        InterpreterSubmessage::InfoTimestamp(s, _) => s.write_to(writer),
        InterpreterSubmessage::InfoReply(s, _) => s.write_to(writer),
      },
    }
  }
}
