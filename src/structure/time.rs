use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use speedy::{Readable, Writable};

use crate::structure::duration::Duration;

/// RTPS Time_t: NTP-style timestamp with 2^-32 second fraction.
/// See RTPS spec Section 9.3.2.
#[derive(
  Copy, Clone, Debug, PartialOrd, PartialEq, Ord, Eq, Hash, Readable, Writable, Serialize,
  Deserialize,
)]
pub struct Timestamp {
  seconds: u32,
  fraction: u32,
}

impl Timestamp {
  pub const ZERO: Self = Self {
    seconds: 0,
    fraction: 0,
  };
  pub const INVALID: Self = Self {
    seconds: 0xFFFF_FFFF,
    fraction: 0xFFFF_FFFF,
  };
  pub const INFINITE: Self = Self {
    seconds: 0x7FFF_FFFF,
    fraction: 0xFFFF_FFFF,
  };

  pub fn now() -> Self {
    match SystemTime::now().duration_since(SystemTime::UNIX_EPOCH) {
      Ok(d) => Self {
        seconds: d.as_secs() as u32,
        fraction: ((u64::from(d.subsec_nanos()) << 32) / 1_000_000_000) as u32,
      },
      // clock before epoch: report zero rather than panic
      Err(_) => Self::ZERO,
    }
  }

  pub fn from_ticks(ticks: u64) -> Self {
    Self {
      seconds: (ticks >> 32) as u32,
      fraction: (ticks & 0xFFFF_FFFF) as u32,
    }
  }

  pub fn to_ticks(&self) -> u64 {
    (u64::from(self.seconds) << 32) | u64::from(self.fraction)
  }

  pub fn duration_since(&self, earlier: Self) -> Duration {
    Duration::from_ticks(self.to_ticks().saturating_sub(earlier.to_ticks()) as i64)
  }
}

impl std::ops::Add<Duration> for Timestamp {
  type Output = Self;
  fn add(self, d: Duration) -> Self {
    Self::from_ticks((self.to_ticks() as i64).saturating_add(d.to_ticks()) as u64)
  }
}

#[cfg(test)]
mod tests {
  use speedy::Endianness;

  use super::*;

  #[test]
  fn timestamp_wire_is_eight_bytes() {
    let ts = Timestamp {
      seconds: 0x5EF3_151A,
      fraction: 0x13FB_CC00,
    };
    let le = ts.write_to_vec_with_ctx(Endianness::LittleEndian).unwrap();
    assert_eq!(le, vec![0x1A, 0x15, 0xF3, 0x5E, 0x00, 0xCC, 0xFB, 0x13]);
  }

  #[test]
  fn duration_since_roundtrip() {
    let t0 = Timestamp::from_ticks(5 << 32);
    let t1 = t0 + Duration::from_secs(3);
    assert_eq!(t1.duration_since(t0), Duration::from_secs(3));
  }
}
