use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use serde::{Deserialize, Serialize};
use speedy::{Context, Readable, Reader, Writable, Writer};

/// Locator kind constants from RTPS spec Section 9.4.2.2 plus the
/// TCP and shared-memory kinds used by the wider DDS ecosystem.
pub mod kind {
  pub const INVALID: i32 = -1;
  pub const RESERVED: i32 = 0;
  pub const UDP_V4: i32 = 1;
  pub const UDP_V6: i32 = 2;
  pub const TCP_V4: i32 = 4;
  pub const TCP_V6: i32 = 8;
  pub const SHM: i32 = 16;
}

/// A routable endpoint: transport kind, port, and 16-byte address.
/// UDPv4 addresses occupy the last four bytes of the address field.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Locator {
  Invalid,
  Reserved,
  UdpV4(SocketAddrV4),
  UdpV6(SocketAddrV6),
  TcpV4(SocketAddrV4),
  TcpV6(SocketAddrV6),
  /// Shared-memory segment; the address bytes identify the segment.
  Shm { port: u32, address: [u8; 16] },
  /// Unrecognized kind, kept for pass-through.
  Other {
    kind: i32,
    port: u32,
    address: [u8; 16],
  },
}

pub const LOCATOR_PORT_INVALID: u32 = 0;

impl Locator {
  pub fn kind(&self) -> i32 {
    match self {
      Self::Invalid => kind::INVALID,
      Self::Reserved => kind::RESERVED,
      Self::UdpV4(_) => kind::UDP_V4,
      Self::UdpV6(_) => kind::UDP_V6,
      Self::TcpV4(_) => kind::TCP_V4,
      Self::TcpV6(_) => kind::TCP_V6,
      Self::Shm { .. } => kind::SHM,
      Self::Other { kind, .. } => *kind,
    }
  }

  pub fn port(&self) -> u32 {
    match self {
      Self::Invalid | Self::Reserved => LOCATOR_PORT_INVALID,
      Self::UdpV4(sa) | Self::TcpV4(sa) => u32::from(sa.port()),
      Self::UdpV6(sa) | Self::TcpV6(sa) => u32::from(sa.port()),
      Self::Shm { port, .. } | Self::Other { port, .. } => *port,
    }
  }

  pub fn address_bytes(&self) -> [u8; 16] {
    match self {
      Self::Invalid | Self::Reserved => [0; 16],
      Self::UdpV4(sa) | Self::TcpV4(sa) => {
        let mut a = [0; 16];
        a[12..16].copy_from_slice(&sa.ip().octets());
        a
      }
      Self::UdpV6(sa) | Self::TcpV6(sa) => sa.ip().octets(),
      Self::Shm { address, .. } | Self::Other { address, .. } => *address,
    }
  }

  pub fn is_multicast(&self) -> bool {
    match self {
      Self::UdpV4(sa) => sa.ip().is_multicast(),
      Self::UdpV6(sa) => sa.ip().is_multicast(),
      _ => false,
    }
  }

  pub fn to_socket_addr(&self) -> Option<SocketAddr> {
    match self {
      Self::UdpV4(sa) | Self::TcpV4(sa) => Some(SocketAddr::V4(*sa)),
      Self::UdpV6(sa) | Self::TcpV6(sa) => Some(SocketAddr::V6(*sa)),
      _ => None,
    }
  }

  pub fn from_parts(kind_value: i32, port: u32, address: [u8; 16]) -> Self {
    match kind_value {
      kind::INVALID => Self::Invalid,
      kind::RESERVED => Self::Reserved,
      kind::UDP_V4 => Self::UdpV4(SocketAddrV4::new(
        Ipv4Addr::new(address[12], address[13], address[14], address[15]),
        port as u16,
      )),
      kind::UDP_V6 => Self::UdpV6(SocketAddrV6::new(
        Ipv6Addr::from(address),
        port as u16,
        0,
        0,
      )),
      kind::TCP_V4 => Self::TcpV4(SocketAddrV4::new(
        Ipv4Addr::new(address[12], address[13], address[14], address[15]),
        port as u16,
      )),
      kind::TCP_V6 => Self::TcpV6(SocketAddrV6::new(
        Ipv6Addr::from(address),
        port as u16,
        0,
        0,
      )),
      kind::SHM => Self::Shm { port, address },
      other => Self::Other {
        kind: other,
        port,
        address,
      },
    }
  }
}

impl From<SocketAddr> for Locator {
  fn from(sa: SocketAddr) -> Self {
    match sa {
      SocketAddr::V4(sa) => Self::UdpV4(sa),
      SocketAddr::V6(sa) => Self::UdpV6(sa),
    }
  }
}

impl<'a, C: Context> Readable<'a, C> for Locator {
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let kind_value: i32 = reader.read_value()?;
    let port: u32 = reader.read_value()?;
    let mut address = [0; 16];
    for b in &mut address {
      *b = reader.read_u8()?;
    }
    Ok(Self::from_parts(kind_value, port, address))
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    24
  }
}

impl<C: Context> Writable<C> for Locator {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&self.kind())?;
    writer.write_value(&self.port())?;
    for b in self.address_bytes() {
      writer.write_u8(b)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use speedy::Endianness;

  use super::*;

  #[test]
  fn udpv4_wire_layout() {
    let loc = Locator::UdpV4(SocketAddrV4::new(Ipv4Addr::new(239, 255, 0, 1), 7400));
    let le = loc.write_to_vec_with_ctx(Endianness::LittleEndian).unwrap();
    assert_eq!(le.len(), 24);
    assert_eq!(&le[0..4], &[0x01, 0x00, 0x00, 0x00]); // kind
    assert_eq!(&le[4..8], &[0xE8, 0x1C, 0x00, 0x00]); // port 7400
    assert_eq!(&le[8..20], &[0u8; 12]);
    assert_eq!(&le[20..24], &[239, 255, 0, 1]);
  }

  #[test]
  fn roundtrip_all_kinds() {
    let locators = [
      Locator::Invalid,
      Locator::UdpV4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 7410)),
      Locator::UdpV6(SocketAddrV6::new(Ipv6Addr::LOCALHOST, 7400, 0, 0)),
      Locator::TcpV4(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 7600)),
      Locator::Shm {
        port: 7411,
        address: [7; 16],
      },
      Locator::Other {
        kind: 0x8000_0001u32 as i32,
        port: 1,
        address: [1; 16],
      },
    ];
    for endianness in [Endianness::LittleEndian, Endianness::BigEndian] {
      for loc in &locators {
        let bytes = loc.write_to_vec_with_ctx(endianness).unwrap();
        let decoded = Locator::read_from_buffer_with_ctx(endianness, &bytes).unwrap();
        assert_eq!(decoded, *loc);
      }
    }
  }

  #[test]
  fn multicast_detection() {
    assert!(Locator::UdpV4(SocketAddrV4::new(Ipv4Addr::new(239, 255, 0, 1), 7400)).is_multicast());
    assert!(!Locator::UdpV4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 4), 7400)).is_multicast());
  }
}
