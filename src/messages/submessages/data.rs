use bytes::Bytes;
use enumflags2::BitFlags;
use log::error;
use speedy::{Context, Endianness, Readable, Writable, Writer};

use crate::{
  messages::submessages::submessages::SubmessageHeader,
  rtps::{Submessage, SubmessageBody},
  structure::{guid::EntityId, sequence_number::SequenceNumber},
};
use super::{
  elements::parameter_list::ParameterList,
  submessage::{HasEntityIds, WriterSubmessage},
  submessage_flag::{endianness_flag, DATA_Flags},
  submessage_kind::SubmessageKind,
};

/// One sample (or its key) from a Writer. The payload is kept as raw
/// bytes, encapsulation header included; interpretation belongs to the
/// layer above.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Data {
  pub reader_id: EntityId,
  pub writer_id: EntityId,
  pub writer_sn: SequenceNumber,
  /// Present iff the InlineQos flag is set.
  pub inline_qos: Option<ParameterList>,
  /// Present iff the Data or Key flag is set.
  pub serialized_payload: Option<Bytes>,
}

// extraFlags (2) + octetsToInlineQos (2) + readerId (4) + writerId (4)
// + writerSN (8)
const DATA_FIXED_PART: usize = 20;
// count from the octet after octetsToInlineQos to the inline QoS
const OCTETS_TO_INLINE_QOS: u16 = 16;

impl Data {
  /// Parse the content of a DATA submessage. `buffer` must span exactly
  /// the submessage content, since the payload extends to its end.
  pub fn deserialize_data(
    buffer: &Bytes,
    flags: BitFlags<DATA_Flags>,
  ) -> Result<Self, speedy::Error> {
    let endianness = endianness_flag(flags.bits());

    if buffer.len() < DATA_FIXED_PART {
      return Err(speedy::Error::custom(format!(
        "DATA submessage too short: {} bytes",
        buffer.len()
      )));
    }

    let octets_to_inline_qos = u16::read_from_buffer_with_ctx(endianness, &buffer[2..4])?;
    let reader_id = EntityId::read_from_buffer_with_ctx(endianness, &buffer[4..8])?;
    let writer_id = EntityId::read_from_buffer_with_ctx(endianness, &buffer[8..12])?;
    let writer_sn = SequenceNumber::read_from_buffer_with_ctx(endianness, &buffer[12..20])?;

    // octetsToInlineQos may exceed our fixed layout if a future minor
    // version inserts fields; skip whatever we do not know about.
    let mut cursor = 4 + usize::from(octets_to_inline_qos);
    if cursor > buffer.len() {
      return Err(speedy::Error::custom(
        "DATA octetsToInlineQos points past submessage end",
      ));
    }

    let inline_qos = if flags.contains(DATA_Flags::InlineQos) {
      let parameter_list =
        ParameterList::read_from_buffer_with_ctx(endianness, &buffer[cursor..])?;
      cursor += parameter_list.serialized_len();
      Some(parameter_list)
    } else {
      None
    };

    let serialized_payload =
      if flags.contains(DATA_Flags::Data) || flags.contains(DATA_Flags::Key) {
        if cursor > buffer.len() {
          return Err(speedy::Error::custom("DATA inline QoS overruns submessage"));
        }
        Some(buffer.slice(cursor..))
      } else {
        None
      };

    Ok(Self {
      reader_id,
      writer_id,
      writer_sn,
      inline_qos,
      serialized_payload,
    })
  }

  pub fn len_serialized(&self) -> usize {
    DATA_FIXED_PART
      + self.inline_qos.as_ref().map_or(0, ParameterList::serialized_len)
      + self.serialized_payload.as_ref().map_or(0, Bytes::len)
  }

  /// Flags consistent with the optional fields, ALIVE vs key-only chosen
  /// by `key_only`.
  pub fn flags(&self, key_only: bool) -> BitFlags<DATA_Flags> {
    let mut flags = BitFlags::from(DATA_Flags::Endianness);
    if self.inline_qos.is_some() {
      flags |= DATA_Flags::InlineQos;
    }
    if self.serialized_payload.is_some() {
      flags |= if key_only {
        DATA_Flags::Key
      } else {
        DATA_Flags::Data
      };
    }
    flags
  }

  pub fn create_submessage(self, flags: BitFlags<DATA_Flags>) -> Option<Submessage> {
    let submessage_len = match self.write_to_vec_with_ctx(Endianness::LittleEndian) {
      Ok(bytes) => bytes.len() as u16,
      Err(e) => {
        error!("Writer couldn't write DATA to bytes: {e}");
        return None;
      }
    };

    Some(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::DATA,
        flags: flags.bits(),
        content_length: submessage_len,
      },
      body: SubmessageBody::Writer(WriterSubmessage::Data(self, flags)),
    })
  }
}

impl<C: Context> Writable<C> for Data {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&0u16)?; // extraFlags
    writer.write_value(&OCTETS_TO_INLINE_QOS)?;
    self.reader_id.write_to(writer)?;
    self.writer_id.write_to(writer)?;
    self.writer_sn.write_to(writer)?;
    if let Some(inline_qos) = &self.inline_qos {
      inline_qos.write_to(writer)?;
    }
    if let Some(payload) = &self.serialized_payload {
      writer.write_bytes(payload)?;
    }
    Ok(())
  }
}

impl HasEntityIds for Data {
  fn receiver_entity_id(&self) -> EntityId {
    self.reader_id
  }
  fn sender_entity_id(&self) -> EntityId {
    self.writer_id
  }
}

#[cfg(test)]
mod tests {
  use hex_literal::hex;

  use crate::structure::guid::EntityKind;
  use super::*;

  // DATA content captured from a shapes demo publisher (flags 0x05:
  // little-endian, Data): extraFlags, octetsToInlineQos = 16, reader
  // and writer ids, writerSN 91, then a CDR_LE ShapeType value.
  const SHAPES_DATA: &[u8] = &hex!(
    "0000 1000"
    "0000 0007"
    "0000 0102"
    "00000000 5B000000"
    "0001 0000"
    "04000000 52454400"
    "69000000 17000000 1E000000"
  );

  #[test]
  fn parses_captured_data_submessage() {
    let flags = DATA_Flags::Endianness | DATA_Flags::Data;
    let data = Data::deserialize_data(&Bytes::from_static(SHAPES_DATA), flags).unwrap();
    assert_eq!(
      data.reader_id,
      EntityId::create_custom_entity_id([0, 0, 0], EntityKind::READER_WITH_KEY_USER_DEFINED)
    );
    assert_eq!(
      data.writer_id,
      EntityId::create_custom_entity_id([0, 0, 1], EntityKind::WRITER_WITH_KEY_USER_DEFINED)
    );
    assert_eq!(data.writer_sn, SequenceNumber::from(91));
    assert_eq!(data.inline_qos, None);
    let payload = data.serialized_payload.as_ref().unwrap();
    assert_eq!(&payload[..4], &[0x00, 0x01, 0x00, 0x00]);
    assert_eq!(&payload[8..11], b"RED");
  }

  #[test]
  fn writes_back_identical_bytes() {
    let flags = DATA_Flags::Endianness | DATA_Flags::Data;
    let data = Data::deserialize_data(&Bytes::from_static(SHAPES_DATA), flags).unwrap();
    let bytes = data
      .write_to_vec_with_ctx(Endianness::LittleEndian)
      .unwrap();
    assert_eq!(bytes, SHAPES_DATA);
    assert_eq!(data.len_serialized(), SHAPES_DATA.len());
  }

  #[test]
  fn inline_qos_roundtrip() {
    use crate::messages::submessages::elements::parameter::ParameterId;

    let mut inline_qos = ParameterList::new();
    inline_qos.push(ParameterId::PID_STATUS_INFO, vec![0, 0, 0, 1]);
    let data = Data {
      reader_id: EntityId::UNKNOWN,
      writer_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
      writer_sn: SequenceNumber::from(3),
      inline_qos: Some(inline_qos),
      serialized_payload: Some(Bytes::from_static(&[0x00, 0x01, 0x00, 0x00, 0xAA, 0xBB])),
    };
    let flags = data.flags(true);
    assert!(flags.contains(DATA_Flags::Key));
    assert!(flags.contains(DATA_Flags::InlineQos));

    let bytes = Bytes::from(data.write_to_vec_with_ctx(Endianness::LittleEndian).unwrap());
    let decoded = Data::deserialize_data(&bytes, flags).unwrap();
    assert_eq!(decoded, data);
  }

  #[test]
  fn too_short_content_is_rejected() {
    let flags = BitFlags::from(DATA_Flags::Endianness);
    assert!(Data::deserialize_data(&Bytes::from_static(&[0; 10]), flags).is_err());
  }
}
