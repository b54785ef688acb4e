use serde::{Deserialize, Serialize};
use speedy::{Readable, Writable};

/// RTPS protocol version: major, minor.
#[derive(
  Copy, Clone, Debug, PartialOrd, PartialEq, Ord, Eq, Readable, Writable, Serialize, Deserialize,
)]
pub struct ProtocolVersion {
  pub major: u8,
  pub minor: u8,
}

impl ProtocolVersion {
  pub const PROTOCOLVERSION_1_0: Self = Self { major: 1, minor: 0 };
  pub const PROTOCOLVERSION_1_1: Self = Self { major: 1, minor: 1 };
  pub const PROTOCOLVERSION_2_0: Self = Self { major: 2, minor: 0 };
  pub const PROTOCOLVERSION_2_1: Self = Self { major: 2, minor: 1 };
  pub const PROTOCOLVERSION_2_2: Self = Self { major: 2, minor: 2 };
  pub const PROTOCOLVERSION_2_3: Self = Self { major: 2, minor: 3 };
  pub const PROTOCOLVERSION_2_4: Self = Self { major: 2, minor: 4 };

  pub const THIS_IMPLEMENTATION: Self = Self::PROTOCOLVERSION_2_4;

  /// Messages from a higher major version cannot be interpreted.
  pub fn is_supported(&self) -> bool {
    self.major <= Self::THIS_IMPLEMENTATION.major
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn major_version_gates_support() {
    assert!(ProtocolVersion::PROTOCOLVERSION_2_1.is_supported());
    assert!(ProtocolVersion::PROTOCOLVERSION_1_1.is_supported());
    assert!(!ProtocolVersion { major: 3, minor: 0 }.is_supported());
  }
}
