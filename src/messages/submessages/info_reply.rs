use enumflags2::BitFlags;
use log::error;
use speedy::{Context, Endianness, Readable, Writable, Writer};

use crate::{
  messages::submessages::submessages::SubmessageHeader,
  rtps::{Submessage, SubmessageBody},
  structure::locator::Locator,
};
use super::{
  submessage::InterpreterSubmessage,
  submessage_flag::{endianness_flag, INFOREPLY_Flags},
  submessage_kind::SubmessageKind,
};

const LOCATOR_WIRE_SIZE: usize = 24;

/// Tells the receiver where replies to the submessages that follow
/// should be sent, overriding the defaults derived from the packet
/// source address.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct InfoReply {
  pub unicast_locator_list: Vec<Locator>,
  /// Present exactly when the Multicast flag is set.
  pub multicast_locator_list: Option<Vec<Locator>>,
}

impl InfoReply {
  pub fn flags(&self) -> BitFlags<INFOREPLY_Flags> {
    match self.multicast_locator_list {
      Some(_) => INFOREPLY_Flags::Endianness | INFOREPLY_Flags::Multicast,
      None => BitFlags::from(INFOREPLY_Flags::Endianness),
    }
  }

  pub fn create_submessage(self, flags: BitFlags<INFOREPLY_Flags>) -> Option<Submessage> {
    let submessage_len = match self.write_to_vec() {
      Ok(bytes) => bytes.len() as u16,
      Err(e) => {
        error!("Couldn't write INFO_REPLY to bytes: {e}");
        return None;
      }
    };

    Some(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::INFO_REPLY,
        flags: flags.bits(),
        content_length: submessage_len,
      },
      body: SubmessageBody::Interpreter(InterpreterSubmessage::InfoReply(self, flags)),
    })
  }

  pub fn read_from_bytes(
    buffer: &[u8],
    flags: BitFlags<INFOREPLY_Flags>,
  ) -> Result<Self, speedy::Error> {
    let endianness = endianness_flag(flags.bits());
    let (unicast_locator_list, consumed) = read_locator_list(endianness, buffer)?;
    let multicast_locator_list = if flags.contains(INFOREPLY_Flags::Multicast) {
      let (multicast, _) = read_locator_list(endianness, &buffer[consumed..])?;
      Some(multicast)
    } else {
      None
    };
    Ok(Self {
      unicast_locator_list,
      multicast_locator_list,
    })
  }
}

// LocatorList on the wire: element count, then fixed-size locators.
fn read_locator_list(
  endianness: Endianness,
  buffer: &[u8],
) -> Result<(Vec<Locator>, usize), speedy::Error> {
  let count = u32::read_from_buffer_with_ctx(endianness, buffer)?;
  let mut locators = Vec::new();
  let mut offset = 4;
  for _ in 0..count {
    let locator = Locator::read_from_buffer_with_ctx(endianness, &buffer[offset.min(buffer.len())..])?;
    locators.push(locator);
    offset += LOCATOR_WIRE_SIZE;
  }
  Ok((locators, offset))
}

impl<C: Context> Writable<C> for InfoReply {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&self.unicast_locator_list)?;
    if let Some(multicast) = &self.multicast_locator_list {
      writer.write_value(multicast)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::net::{Ipv4Addr, SocketAddrV4};

  use super::*;

  fn sample() -> InfoReply {
    InfoReply {
      unicast_locator_list: vec![Locator::UdpV4(SocketAddrV4::new(
        Ipv4Addr::new(192, 168, 1, 10),
        7411,
      ))],
      multicast_locator_list: Some(vec![Locator::UdpV4(SocketAddrV4::new(
        Ipv4Addr::new(239, 255, 0, 1),
        7400,
      ))]),
    }
  }

  #[test]
  fn roundtrip_with_multicast() {
    let m = sample();
    let bytes = m
      .write_to_vec_with_ctx(Endianness::LittleEndian)
      .unwrap();
    // two lists of one locator each
    assert_eq!(bytes.len(), 2 * (4 + LOCATOR_WIRE_SIZE));
    let read = InfoReply::read_from_bytes(&bytes, m.flags()).unwrap();
    assert_eq!(read, m);
  }

  #[test]
  fn roundtrip_unicast_only() {
    let m = InfoReply {
      multicast_locator_list: None,
      ..sample()
    };
    let bytes = m.write_to_vec_with_ctx(Endianness::LittleEndian).unwrap();
    let read = InfoReply::read_from_bytes(&bytes, m.flags()).unwrap();
    assert_eq!(read, m);
  }

  #[test]
  fn truncated_list_errors() {
    let m = sample();
    let mut bytes = m.write_to_vec_with_ctx(Endianness::LittleEndian).unwrap();
    bytes.truncate(10);
    assert!(InfoReply::read_from_bytes(&bytes, m.flags()).is_err());
  }
}
