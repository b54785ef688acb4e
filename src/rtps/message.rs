use bytes::Bytes;
use enumflags2::BitFlags;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use speedy::{Context, Endianness, Readable, Writable, Writer};

use crate::{
  error::{Error, Result},
  messages::{
    header::{Header, RTPS_MESSAGE_HEADER_SIZE},
    submessages::{
      submessage_flag::endianness_flag,
      submessage_kind::SubmessageKind,
      submessages::*,
    },
  },
  rtps::{Submessage, SubmessageBody},
  structure::{
    cache_change::CacheChange, guid::EntityId, guid::GuidPrefix, sequence_number::SequenceNumber,
    time::Timestamp,
  },
};

/// One RTPS message: header plus the submessages that parsed cleanly
/// under the rules of RTPS spec Section 9.4.5.1.3.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
  pub header: Header,
  pub submessages: Vec<Submessage>,
}

impl Message {
  pub fn new(header: Header) -> Self {
    Self {
      header,
      submessages: Vec::new(),
    }
  }

  pub fn add_submessage(&mut self, submessage: Submessage) {
    self.submessages.push(submessage);
  }

  /// Parse a received datagram.
  ///
  /// An unknown submessage kind with the vendor-specific bit set is
  /// skipped over using its length; an unknown kind without it makes us
  /// discard the rest of the message but keep what was already
  /// interpreted. A malformed known submessage fails the whole message.
  pub fn read_from_buffer(buffer: &Bytes) -> Result<Self> {
    if buffer.len() < RTPS_MESSAGE_HEADER_SIZE {
      return Err(Error::malformed(format!(
        "message shorter than RTPS header: {} bytes",
        buffer.len()
      )));
    }
    let header =
      Header::read_from_buffer_with_ctx(Endianness::BigEndian, &buffer[..RTPS_MESSAGE_HEADER_SIZE])?;
    if !header.protocol_version.is_supported() {
      return Err(Error::malformed(format!(
        "unsupported protocol version {:?}",
        header.protocol_version
      )));
    }

    let mut message = Self::new(header);
    let mut cursor = RTPS_MESSAGE_HEADER_SIZE;

    while cursor < buffer.len() {
      if buffer.len() - cursor < SUBMESSAGE_HEADER_SIZE {
        return Err(Error::malformed(format!(
          "{} trailing bytes do not fit a submessage header",
          buffer.len() - cursor
        )));
      }
      let kind = SubmessageKind::new(buffer[cursor]);
      let flags_byte = buffer[cursor + 1];
      let endianness = endianness_flag(flags_byte);
      let content_length = usize::from(u16::read_from_buffer_with_ctx(
        endianness,
        &buffer[cursor + 2..cursor + 4],
      )?);

      let content_start = cursor + SUBMESSAGE_HEADER_SIZE;
      // submessageLength 0 means: last submessage, extends to message end
      let content_end = if content_length == 0 {
        buffer.len()
      } else {
        content_start + content_length
      };
      if content_end > buffer.len() {
        return Err(Error::malformed(format!(
          "submessage {kind:?} length {content_length} overruns the message"
        )));
      }
      let content = buffer.slice(content_start..content_end);

      match parse_submessage(kind, flags_byte, &content)? {
        ParsedSubmessage::Body(body) => {
          message.add_submessage(Submessage {
            header: SubmessageHeader {
              kind,
              flags: flags_byte,
              content_length: (content_end - content_start) as u16,
            },
            body,
          });
        }
        ParsedSubmessage::Ignored => {}
        ParsedSubmessage::UnknownNonVendor => {
          warn!(
            "Unknown non-vendor submessage kind {kind:?}, discarding the rest of the message"
          );
          break;
        }
      }
      cursor = content_end;
    }

    Ok(message)
  }

  pub fn write_to_vec(&self) -> Result<Vec<u8>> {
    self
      .write_to_vec_with_ctx(Endianness::LittleEndian)
      .map_err(Error::from)
  }
}

impl<C: Context> Writable<C> for Message {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> std::result::Result<(), C::Error> {
    self.header.write_to(writer)?;
    for submessage in &self.submessages {
      submessage.write_to(writer)?;
    }
    Ok(())
  }
}

enum ParsedSubmessage {
  Body(SubmessageBody),
  Ignored,
  UnknownNonVendor,
}

fn parse_submessage(
  kind: SubmessageKind,
  flags_byte: u8,
  content: &Bytes,
) -> Result<ParsedSubmessage> {
  let endianness = endianness_flag(flags_byte);
  let body = match kind {
    SubmessageKind::DATA => {
      let flags = BitFlags::<DATA_Flags>::from_bits_truncate(flags_byte);
      SubmessageBody::Writer(WriterSubmessage::Data(
        Data::deserialize_data(content, flags)?,
        flags,
      ))
    }
    SubmessageKind::DATA_FRAG => {
      let flags = BitFlags::<DATAFRAG_Flags>::from_bits_truncate(flags_byte);
      SubmessageBody::Writer(WriterSubmessage::DataFrag(
        DataFrag::deserialize(content, flags)?,
        flags,
      ))
    }
    SubmessageKind::HEARTBEAT => {
      let flags = BitFlags::<HEARTBEAT_Flags>::from_bits_truncate(flags_byte);
      SubmessageBody::Writer(WriterSubmessage::Heartbeat(
        Heartbeat::read_from_buffer_with_ctx(endianness, content)?,
        flags,
      ))
    }
    SubmessageKind::HEARTBEAT_FRAG => {
      let flags = BitFlags::<HEARTBEATFRAG_Flags>::from_bits_truncate(flags_byte);
      SubmessageBody::Writer(WriterSubmessage::HeartbeatFrag(
        HeartbeatFrag::read_from_buffer_with_ctx(endianness, content)?,
        flags,
      ))
    }
    SubmessageKind::GAP => {
      let flags = BitFlags::<GAP_Flags>::from_bits_truncate(flags_byte);
      SubmessageBody::Writer(WriterSubmessage::Gap(
        Gap::read_from_buffer_with_ctx(endianness, content)?,
        flags,
      ))
    }
    SubmessageKind::ACKNACK => {
      let flags = BitFlags::<ACKNACK_Flags>::from_bits_truncate(flags_byte);
      SubmessageBody::Reader(ReaderSubmessage::AckNack(
        AckNack::read_from_buffer_with_ctx(endianness, content)?,
        flags,
      ))
    }
    SubmessageKind::NACK_FRAG => {
      let flags = BitFlags::<NACKFRAG_Flags>::from_bits_truncate(flags_byte);
      SubmessageBody::Reader(ReaderSubmessage::NackFrag(
        NackFrag::read_from_buffer_with_ctx(endianness, content)?,
        flags,
      ))
    }
    SubmessageKind::INFO_TS => {
      let flags = BitFlags::<INFOTS_Flags>::from_bits_truncate(flags_byte);
      SubmessageBody::Interpreter(InterpreterSubmessage::InfoTimestamp(
        InfoTimestamp::read_from_bytes(content, flags)?,
        flags,
      ))
    }
    SubmessageKind::INFO_DST => {
      let flags = BitFlags::<INFODST_Flags>::from_bits_truncate(flags_byte);
      SubmessageBody::Interpreter(InterpreterSubmessage::InfoDestination(
        InfoDestination::read_from_buffer_with_ctx(endianness, content)?,
        flags,
      ))
    }
    SubmessageKind::INFO_SRC => {
      let flags = BitFlags::<INFOSRC_Flags>::from_bits_truncate(flags_byte);
      SubmessageBody::Interpreter(InterpreterSubmessage::InfoSource(
        InfoSource::read_from_buffer_with_ctx(endianness, content)?,
        flags,
      ))
    }
    SubmessageKind::INFO_REPLY => {
      let flags = BitFlags::<INFOREPLY_Flags>::from_bits_truncate(flags_byte);
      SubmessageBody::Interpreter(InterpreterSubmessage::InfoReply(
        InfoReply::read_from_bytes(content, flags)?,
        flags,
      ))
    }
    SubmessageKind::PAD | SubmessageKind::INFO_REPLY_IP4 => {
      // PAD carries nothing; InfoReplyIp4 adds nothing we use
      return Ok(ParsedSubmessage::Ignored);
    }
    unknown => {
      return if unknown.is_vendor_specific() {
        trace!("Skipping vendor-specific submessage kind {unknown:?}");
        Ok(ParsedSubmessage::Ignored)
      } else {
        Ok(ParsedSubmessage::UnknownNonVendor)
      };
    }
  };
  Ok(ParsedSubmessage::Body(body))
}

/// Collects submessages addressed to one destination and stamps the
/// message header on top.
pub struct MessageBuilder {
  submessages: Vec<Submessage>,
}

impl MessageBuilder {
  pub fn new() -> Self {
    Self {
      submessages: Vec::new(),
    }
  }

  pub fn dst_submessage(mut self, dst_guid_prefix: GuidPrefix) -> Self {
    let info_dst = InfoDestination {
      guid_prefix: dst_guid_prefix,
    };
    if let Some(submessage) =
      info_dst.create_submessage(BitFlags::from(INFODST_Flags::Endianness))
    {
      self.submessages.push(submessage);
    }
    self
  }

  pub fn ts_msg(mut self, timestamp: Option<Timestamp>) -> Self {
    let info_ts = InfoTimestamp { timestamp };
    let flags = info_ts.flags();
    if let Some(submessage) = info_ts.create_submessage(flags) {
      self.submessages.push(submessage);
    }
    self
  }

  /// DATA from a cache change. Key-only changes travel with the Key flag
  /// and their key hash in inline QoS.
  pub fn data_msg(mut self, change: &CacheChange, reader_id: EntityId) -> Self {
    use crate::messages::submessages::elements::{
      parameter::ParameterId, parameter_list::ParameterList,
    };

    let key_only = change.kind.is_key_only();
    let mut inline_qos = change.inline_qos.clone().unwrap_or_default();
    if key_only {
      inline_qos.push(
        ParameterId::PID_KEY_HASH,
        change.instance_handle.as_bytes().to_vec(),
      );
      inline_qos.push(
        ParameterId::PID_STATUS_INFO,
        change.kind.status_info().to_be_bytes().to_vec(),
      );
    }

    let data = Data {
      reader_id,
      writer_id: change.writer_guid.entity_id,
      writer_sn: change.sequence_number,
      inline_qos: if inline_qos.is_empty() {
        None
      } else {
        Some(inline_qos)
      },
      serialized_payload: change.payload.as_ref().map(|p| p.bytes()),
    };
    let flags = data.flags(key_only);
    if let Some(submessage) = data.create_submessage(flags) {
      self.submessages.push(submessage);
    }
    self
  }

  pub fn datafrag_msg(mut self, frag: DataFrag, key_only: bool) -> Self {
    let flags = frag.flags(key_only);
    if let Some(submessage) = frag.create_submessage(flags) {
      self.submessages.push(submessage);
    }
    self
  }

  pub fn heartbeat_msg(
    mut self,
    writer_id: EntityId,
    reader_id: EntityId,
    first_sn: SequenceNumber,
    last_sn: SequenceNumber,
    count: i32,
    set_final: bool,
    liveliness: bool,
  ) -> Self {
    let heartbeat = Heartbeat {
      reader_id,
      writer_id,
      first_sn,
      last_sn,
      count,
    };
    let mut flags = BitFlags::from(HEARTBEAT_Flags::Endianness);
    if set_final {
      flags |= HEARTBEAT_Flags::Final;
    }
    if liveliness {
      flags |= HEARTBEAT_Flags::Liveliness;
    }
    if let Some(submessage) = heartbeat.create_submessage(flags) {
      self.submessages.push(submessage);
    }
    self
  }

  pub fn gap_msg(mut self, gap: Gap) -> Self {
    if let Some(submessage) = gap.create_submessage(BitFlags::from(GAP_Flags::Endianness)) {
      self.submessages.push(submessage);
    }
    self
  }

  pub fn acknack_msg(mut self, acknack: AckNack, set_final: bool) -> Self {
    let mut flags = BitFlags::from(ACKNACK_Flags::Endianness);
    if set_final {
      flags |= ACKNACK_Flags::Final;
    }
    if let Some(submessage) = acknack.create_submessage(flags) {
      self.submessages.push(submessage);
    }
    self
  }

  pub fn submessage(mut self, submessage: Submessage) -> Self {
    self.submessages.push(submessage);
    self
  }

  pub fn is_empty(&self) -> bool {
    self.submessages.is_empty()
  }

  pub fn add_header_and_build(self, guid_prefix: GuidPrefix) -> Message {
    Message {
      header: Header::new(guid_prefix),
      submessages: self.submessages,
    }
  }
}

impl Default for MessageBuilder {
  fn default() -> Self {
    Self::new()
  }
}
