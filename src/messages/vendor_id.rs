use serde::{Deserialize, Serialize};
use speedy::{Readable, Writable};

/// Two-byte vendor identifier from the RTPS header.
#[derive(
  Copy, Clone, Debug, PartialOrd, PartialEq, Ord, Eq, Hash, Readable, Writable, Serialize,
  Deserialize,
)]
pub struct VendorId {
  pub vendor_id: [u8; 2],
}

impl VendorId {
  pub const VENDOR_UNKNOWN: Self = Self {
    vendor_id: [0x00, 0x00],
  };

  // Not an OMG-assigned id.
  pub const THIS_IMPLEMENTATION: Self = Self {
    vendor_id: [0x01, 0x42],
  };

  pub fn as_bytes(&self) -> [u8; 2] {
    self.vendor_id
  }
}
