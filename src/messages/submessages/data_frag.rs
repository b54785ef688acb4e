use bytes::Bytes;
use enumflags2::BitFlags;
use log::error;
use speedy::{Context, Endianness, Readable, Writable, Writer};

use crate::{
  messages::submessages::submessages::SubmessageHeader,
  rtps::{Submessage, SubmessageBody},
  structure::{
    guid::EntityId,
    sequence_number::{FragmentNumber, SequenceNumber},
  },
};
use super::{
  elements::parameter_list::ParameterList,
  submessage::{HasEntityIds, WriterSubmessage},
  submessage_flag::{endianness_flag, DATAFRAG_Flags},
  submessage_kind::SubmessageKind,
};

/// A run of consecutive fragments of one large sample. Fragment numbers
/// start at 1; `data_size` is the size of the complete reassembled
/// payload.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DataFrag {
  pub reader_id: EntityId,
  pub writer_id: EntityId,
  pub writer_sn: SequenceNumber,
  pub fragment_starting_num: FragmentNumber,
  pub fragments_in_submessage: u16,
  pub fragment_size: u16,
  pub data_size: u32,
  pub inline_qos: Option<ParameterList>,
  pub serialized_payload: Bytes,
}

const DATAFRAG_FIXED_PART: usize = 32;
const OCTETS_TO_INLINE_QOS: u16 = 28;

impl DataFrag {
  pub fn deserialize(
    buffer: &Bytes,
    flags: BitFlags<DATAFRAG_Flags>,
  ) -> Result<Self, speedy::Error> {
    let endianness = endianness_flag(flags.bits());

    if buffer.len() < DATAFRAG_FIXED_PART {
      return Err(speedy::Error::custom(format!(
        "DATA_FRAG submessage too short: {} bytes",
        buffer.len()
      )));
    }

    let octets_to_inline_qos = u16::read_from_buffer_with_ctx(endianness, &buffer[2..4])?;
    let reader_id = EntityId::read_from_buffer_with_ctx(endianness, &buffer[4..8])?;
    let writer_id = EntityId::read_from_buffer_with_ctx(endianness, &buffer[8..12])?;
    let writer_sn = SequenceNumber::read_from_buffer_with_ctx(endianness, &buffer[12..20])?;
    let fragment_starting_num =
      FragmentNumber::read_from_buffer_with_ctx(endianness, &buffer[20..24])?;
    let fragments_in_submessage = u16::read_from_buffer_with_ctx(endianness, &buffer[24..26])?;
    let fragment_size = u16::read_from_buffer_with_ctx(endianness, &buffer[26..28])?;
    let data_size = u32::read_from_buffer_with_ctx(endianness, &buffer[28..32])?;

    let mut cursor = 4 + usize::from(octets_to_inline_qos);
    if cursor > buffer.len() {
      return Err(speedy::Error::custom(
        "DATA_FRAG octetsToInlineQos points past submessage end",
      ));
    }

    let inline_qos = if flags.contains(DATAFRAG_Flags::InlineQos) {
      let parameter_list =
        ParameterList::read_from_buffer_with_ctx(endianness, &buffer[cursor..])?;
      cursor += parameter_list.serialized_len();
      Some(parameter_list)
    } else {
      None
    };

    if cursor > buffer.len() {
      return Err(speedy::Error::custom("DATA_FRAG inline QoS overruns submessage"));
    }
    let serialized_payload = buffer.slice(cursor..);

    // sanity bound from RTPS spec Section 8.3.7.3.5
    if serialized_payload.len()
      > usize::from(fragments_in_submessage) * usize::from(fragment_size)
    {
      return Err(speedy::Error::custom(format!(
        "DATA_FRAG payload {} bytes exceeds fragmentsInSubmessage {} x fragmentSize {}",
        serialized_payload.len(),
        fragments_in_submessage,
        fragment_size
      )));
    }

    Ok(Self {
      reader_id,
      writer_id,
      writer_sn,
      fragment_starting_num,
      fragments_in_submessage,
      fragment_size,
      data_size,
      inline_qos,
      serialized_payload,
    })
  }

  pub fn flags(&self, key_flag: bool) -> BitFlags<DATAFRAG_Flags> {
    let mut flags = BitFlags::from(DATAFRAG_Flags::Endianness);
    if self.inline_qos.is_some() {
      flags |= DATAFRAG_Flags::InlineQos;
    }
    if key_flag {
      flags |= DATAFRAG_Flags::Key;
    }
    flags
  }

  pub fn create_submessage(self, flags: BitFlags<DATAFRAG_Flags>) -> Option<Submessage> {
    let submessage_len = match self.write_to_vec_with_ctx(Endianness::LittleEndian) {
      Ok(bytes) => bytes.len() as u16,
      Err(e) => {
        error!("Writer couldn't write DATA_FRAG to bytes: {e}");
        return None;
      }
    };

    Some(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::DATA_FRAG,
        flags: flags.bits(),
        content_length: submessage_len,
      },
      body: SubmessageBody::Writer(WriterSubmessage::DataFrag(self, flags)),
    })
  }
}

impl<C: Context> Writable<C> for DataFrag {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&0u16)?; // extraFlags
    writer.write_value(&OCTETS_TO_INLINE_QOS)?;
    self.reader_id.write_to(writer)?;
    self.writer_id.write_to(writer)?;
    self.writer_sn.write_to(writer)?;
    self.fragment_starting_num.write_to(writer)?;
    writer.write_value(&self.fragments_in_submessage)?;
    writer.write_value(&self.fragment_size)?;
    writer.write_value(&self.data_size)?;
    if let Some(inline_qos) = &self.inline_qos {
      inline_qos.write_to(writer)?;
    }
    writer.write_bytes(&self.serialized_payload)?;
    Ok(())
  }
}

impl HasEntityIds for DataFrag {
  fn receiver_entity_id(&self) -> EntityId {
    self.reader_id
  }
  fn sender_entity_id(&self) -> EntityId {
    self.writer_id
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> DataFrag {
    DataFrag {
      reader_id: EntityId::UNKNOWN,
      writer_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
      writer_sn: SequenceNumber::from(12),
      fragment_starting_num: FragmentNumber(3),
      fragments_in_submessage: 2,
      fragment_size: 4,
      data_size: 40,
      inline_qos: None,
      serialized_payload: Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8]),
    }
  }

  #[test]
  fn roundtrip() {
    let frag = sample();
    let flags = frag.flags(false);
    let bytes = Bytes::from(frag.write_to_vec_with_ctx(Endianness::LittleEndian).unwrap());
    let decoded = DataFrag::deserialize(&bytes, flags).unwrap();
    assert_eq!(decoded, frag);
  }

  #[test]
  fn oversized_payload_is_rejected() {
    let mut frag = sample();
    frag.serialized_payload = Bytes::from_static(&[0; 16]); // > 2 * 4
    let flags = frag.flags(false);
    let bytes = Bytes::from(frag.write_to_vec_with_ctx(Endianness::LittleEndian).unwrap());
    assert!(DataFrag::deserialize(&bytes, flags).is_err());
  }
}
