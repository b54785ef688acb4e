use std::fmt;

use speedy::{Context, Readable, Reader, Writable, Writer};

/// One-byte submessage identifier. Values at or above 0x80 are
/// vendor-specific. RTPS spec Section 9.4.5.1.1.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct SubmessageKind(u8);

impl SubmessageKind {
  pub const PAD: Self = Self(0x01);
  pub const ACKNACK: Self = Self(0x06);
  pub const HEARTBEAT: Self = Self(0x07);
  pub const GAP: Self = Self(0x08);
  pub const INFO_TS: Self = Self(0x09);
  pub const INFO_SRC: Self = Self(0x0C);
  pub const INFO_REPLY_IP4: Self = Self(0x0D);
  pub const INFO_DST: Self = Self(0x0E);
  pub const INFO_REPLY: Self = Self(0x0F);
  pub const NACK_FRAG: Self = Self(0x12);
  pub const HEARTBEAT_FRAG: Self = Self(0x13);
  pub const DATA: Self = Self(0x15);
  pub const DATA_FRAG: Self = Self(0x16);

  pub fn new(value: u8) -> Self {
    Self(value)
  }

  pub fn value(&self) -> u8 {
    self.0
  }

  pub fn is_vendor_specific(&self) -> bool {
    self.0 >= 0x80
  }
}

impl fmt::Debug for SubmessageKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match *self {
      Self::PAD => f.write_str("PAD"),
      Self::ACKNACK => f.write_str("ACKNACK"),
      Self::HEARTBEAT => f.write_str("HEARTBEAT"),
      Self::GAP => f.write_str("GAP"),
      Self::INFO_TS => f.write_str("INFO_TS"),
      Self::INFO_SRC => f.write_str("INFO_SRC"),
      Self::INFO_REPLY_IP4 => f.write_str("INFO_REPLY_IP4"),
      Self::INFO_DST => f.write_str("INFO_DST"),
      Self::INFO_REPLY => f.write_str("INFO_REPLY"),
      Self::NACK_FRAG => f.write_str("NACK_FRAG"),
      Self::HEARTBEAT_FRAG => f.write_str("HEARTBEAT_FRAG"),
      Self::DATA => f.write_str("DATA"),
      Self::DATA_FRAG => f.write_str("DATA_FRAG"),
      Self(other) => write!(f, "SubmessageKind({other:#04x})"),
    }
  }
}

impl<'a, C: Context> Readable<'a, C> for SubmessageKind {
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    Ok(Self(reader.read_u8()?))
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    1
  }
}

impl<C: Context> Writable<C> for SubmessageKind {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_u8(self.0)
  }
}
