use serde::{Deserialize, Serialize};
use speedy::{Readable, Writable};

/// Signed duration with 2^-32 second fraction, the wire representation of
/// both RTPS Duration_t and the DDS QoS durations carried in discovery
/// parameter lists.
#[derive(
  Copy, Clone, Debug, PartialOrd, PartialEq, Ord, Eq, Hash, Readable, Writable, Serialize,
  Deserialize,
)]
pub struct Duration {
  seconds: i32,
  fraction: u32,
}

impl Duration {
  pub const ZERO: Self = Self {
    seconds: 0,
    fraction: 0,
  };
  pub const INFINITE: Self = Self {
    seconds: 0x7FFF_FFFF,
    fraction: 0xFFFF_FFFF,
  };

  pub const fn from_secs(secs: i32) -> Self {
    Self {
      seconds: secs,
      fraction: 0,
    }
  }

  pub const fn from_millis(millis: i64) -> Self {
    Self {
      seconds: (millis / 1000) as i32,
      fraction: (((millis % 1000) << 32) / 1000) as u32,
    }
  }

  pub fn from_nanos(nanos: i64) -> Self {
    Self {
      seconds: (nanos / 1_000_000_000) as i32,
      fraction: (((nanos % 1_000_000_000) << 32) / 1_000_000_000) as u32,
    }
  }

  pub(crate) fn from_ticks(ticks: i64) -> Self {
    Self {
      seconds: (ticks >> 32) as i32,
      fraction: (ticks & 0xFFFF_FFFF) as u32,
    }
  }

  pub(crate) fn to_ticks(&self) -> i64 {
    (i64::from(self.seconds) << 32) | i64::from(self.fraction)
  }

  pub fn to_millis(&self) -> i64 {
    i64::from(self.seconds) * 1000 + (i64::from(self.fraction) * 1000 >> 32)
  }

  pub fn is_infinite(&self) -> bool {
    *self == Self::INFINITE
  }

  /// Scale by a non-negative factor. Used for response-delay jitter.
  pub fn mul_f64(&self, factor: f64) -> Self {
    Self::from_ticks((self.to_ticks() as f64 * factor) as i64)
  }
}

impl From<std::time::Duration> for Duration {
  fn from(d: std::time::Duration) -> Self {
    Self {
      seconds: d.as_secs() as i32,
      fraction: ((u64::from(d.subsec_nanos()) << 32) / 1_000_000_000) as u32,
    }
  }
}

impl From<Duration> for std::time::Duration {
  fn from(d: Duration) -> Self {
    if d.seconds < 0 {
      return std::time::Duration::ZERO;
    }
    std::time::Duration::new(
      d.seconds as u64,
      ((u64::from(d.fraction) * 1_000_000_000) >> 32) as u32,
    )
  }
}

impl std::ops::Add for Duration {
  type Output = Self;
  fn add(self, rhs: Self) -> Self {
    Self::from_ticks(self.to_ticks().saturating_add(rhs.to_ticks()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn millis_conversion_is_stable() {
    for millis in [0i64, 1, 200, 999, 1000, 1001, 5000, 100_000] {
      let d = Duration::from_millis(millis);
      assert_eq!(d.to_millis(), millis, "millis = {millis}");
    }
  }

  #[test]
  fn std_duration_roundtrip() {
    let d = Duration::from_millis(3500);
    let std: std::time::Duration = d.into();
    assert_eq!(std.as_millis(), 3500);
    assert_eq!(Duration::from(std).to_millis(), 3500);
  }

  #[test]
  fn infinite_compares_greater() {
    assert!(Duration::INFINITE > Duration::from_secs(100));
    assert!(Duration::from_millis(200) > Duration::ZERO);
  }

  #[test]
  fn jitter_scaling_stays_in_band() {
    let base = Duration::from_millis(500);
    let low = base.mul_f64(0.75);
    let high = base.mul_f64(1.25);
    assert!(low.to_millis() >= 374 && low.to_millis() <= 375);
    assert!(high.to_millis() >= 624 && high.to_millis() <= 625);
  }
}
