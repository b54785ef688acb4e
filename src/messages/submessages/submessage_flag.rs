//! Per-submessage-kind flag bit definitions, RTPS spec Section 9.4.5.
//! Bit 0 of every submessage is the endianness flag: set = little-endian.

#![allow(non_camel_case_types)]

use enumflags2::bitflags;
use speedy::Endianness;

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DATA_Flags {
  Endianness = 0b0000_0001,
  InlineQos = 0b0000_0010,
  Data = 0b0000_0100,
  Key = 0b0000_1000,
  NonStandardPayload = 0b0001_0000,
}

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DATAFRAG_Flags {
  Endianness = 0b0000_0001,
  InlineQos = 0b0000_0010,
  Key = 0b0000_0100,
  NonStandardPayload = 0b0000_1000,
}

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HEARTBEAT_Flags {
  Endianness = 0b0000_0001,
  Final = 0b0000_0010,
  Liveliness = 0b0000_0100,
}

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HEARTBEATFRAG_Flags {
  Endianness = 0b0000_0001,
}

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ACKNACK_Flags {
  Endianness = 0b0000_0001,
  Final = 0b0000_0010,
}

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NACKFRAG_Flags {
  Endianness = 0b0000_0001,
}

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GAP_Flags {
  Endianness = 0b0000_0001,
}

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum INFOTS_Flags {
  Endianness = 0b0000_0001,
  Invalidate = 0b0000_0010,
}

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum INFOSRC_Flags {
  Endianness = 0b0000_0001,
}

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum INFODST_Flags {
  Endianness = 0b0000_0001,
}

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum INFOREPLY_Flags {
  Endianness = 0b0000_0001,
  Multicast = 0b0000_0010,
}

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PAD_Flags {
  Endianness = 0b0000_0001,
}

/// Decode the endianness bit shared by all submessage kinds.
pub fn endianness_flag(flags: u8) -> Endianness {
  if flags & 0x01 != 0 {
    Endianness::LittleEndian
  } else {
    Endianness::BigEndian
  }
}
