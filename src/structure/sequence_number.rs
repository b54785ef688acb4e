use std::{
  collections::BTreeSet,
  fmt,
  ops::{Add, AddAssign, Sub},
};

use serde::{Deserialize, Serialize};
use speedy::{Context, Readable, Reader, Writable, Writer};

/// 64-bit sequence number, monotonically increasing per writer.
/// First sequence number of a writer is 1.
///
/// On the wire this is split into a signed "high" half and an unsigned
/// "low" half, each 32 bits, high first. See RTPS spec Section 9.4.2.5.
#[derive(
  Copy, Clone, Debug, Default, PartialOrd, PartialEq, Ord, Eq, Hash, Serialize, Deserialize,
)]
pub struct SequenceNumber(i64);

impl SequenceNumber {
  pub const ZERO: Self = Self(0);
  /// SEQUENCENUMBER_UNKNOWN: high = -1, low = 0.
  pub const UNKNOWN: Self = Self(-1 << 32);

  pub fn new(value: i64) -> Self {
    Self(value)
  }

  pub(crate) fn from_high_low(high: i32, low: u32) -> Self {
    Self(((high as i64) << 32) + i64::from(low))
  }

  pub(crate) fn high(&self) -> i32 {
    (self.0 >> 32) as i32
  }

  pub(crate) fn low(&self) -> u32 {
    (self.0 & 0xFFFF_FFFF) as u32
  }

  pub fn next(&self) -> Self {
    Self(self.0 + 1)
  }

  pub fn as_i64(&self) -> i64 {
    self.0
  }
}

impl From<i64> for SequenceNumber {
  fn from(value: i64) -> Self {
    Self(value)
  }
}

impl From<SequenceNumber> for i64 {
  fn from(sn: SequenceNumber) -> Self {
    sn.0
  }
}

impl Add<i64> for SequenceNumber {
  type Output = Self;
  fn add(self, rhs: i64) -> Self {
    Self(self.0 + rhs)
  }
}

impl AddAssign<i64> for SequenceNumber {
  fn add_assign(&mut self, rhs: i64) {
    self.0 += rhs;
  }
}

impl Sub<i64> for SequenceNumber {
  type Output = Self;
  fn sub(self, rhs: i64) -> Self {
    Self(self.0 - rhs)
  }
}

impl Sub for SequenceNumber {
  type Output = i64;
  fn sub(self, rhs: Self) -> i64 {
    self.0 - rhs.0
  }
}

impl<'a, C: Context> Readable<'a, C> for SequenceNumber {
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let high: i32 = reader.read_value()?;
    let low: u32 = reader.read_value()?;
    Ok(Self::from_high_low(high, low))
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    8
  }
}

impl<C: Context> Writable<C> for SequenceNumber {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&self.high())?;
    writer.write_value(&self.low())
  }
}

/// Set of sequence numbers within a window of at most 256 starting at
/// `base`, as used in ACKNACK and GAP submessages.
/// Wire format per RTPS spec Section 9.4.2.6: base, number of bits, then
/// `(num_bits+31)/32` 32-bit words, most significant bit first.
#[derive(Clone, PartialEq, Eq)]
pub struct SequenceNumberSet {
  base: SequenceNumber,
  num_bits: u32,
  bitmap: Vec<u32>,
}

impl SequenceNumberSet {
  pub const MAX_BITS: u32 = 256;

  pub fn new_empty(base: SequenceNumber) -> Self {
    Self {
      base,
      num_bits: 0,
      bitmap: Vec::new(),
    }
  }

  /// Construct from base and any iterable of sequence numbers. Numbers
  /// outside the representable window `base .. base+256` are dropped.
  pub fn from_base_and_set(base: SequenceNumber, set: &BTreeSet<SequenceNumber>) -> Self {
    let mut sns = Self::new_empty(base);
    for sn in set {
      sns.insert(*sn);
    }
    sns
  }

  pub fn base(&self) -> SequenceNumber {
    self.base
  }

  /// Insert, returning false if the number does not fit the window.
  pub fn insert(&mut self, sn: SequenceNumber) -> bool {
    let offset = sn - self.base;
    if !(0..i64::from(Self::MAX_BITS)).contains(&offset) {
      return false;
    }
    let offset = offset as u32;
    if offset >= self.num_bits {
      self.num_bits = offset + 1;
      self.bitmap.resize(((self.num_bits + 31) / 32) as usize, 0);
    }
    self.bitmap[(offset / 32) as usize] |= 1 << (31 - (offset % 32));
    true
  }

  pub fn contains(&self, sn: SequenceNumber) -> bool {
    let offset = sn - self.base;
    if !(0..i64::from(self.num_bits)).contains(&offset) {
      return false;
    }
    let offset = offset as u32;
    self.bitmap[(offset / 32) as usize] & (1 << (31 - (offset % 32))) != 0
  }

  pub fn is_empty(&self) -> bool {
    self.iter().next().is_none()
  }

  pub fn iter(&self) -> impl Iterator<Item = SequenceNumber> + '_ {
    let base = self.base;
    (0..self.num_bits)
      .filter(move |offset| self.bitmap[(offset / 32) as usize] & (1 << (31 - (offset % 32))) != 0)
      .map(move |offset| base + i64::from(offset))
  }
}

impl fmt::Debug for SequenceNumberSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "SequenceNumberSet {{ base: {:?}, set: ", self.base)?;
    f.debug_set().entries(self.iter()).finish()?;
    f.write_str(" }")
  }
}

impl<'a, C: Context> Readable<'a, C> for SequenceNumberSet {
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let base = SequenceNumber::read_from(reader)?;
    let num_bits: u32 = reader.read_value()?;
    if num_bits > Self::MAX_BITS {
      return Err(
        speedy::Error::custom(format!(
          "SequenceNumberSet numBits={num_bits} exceeds protocol maximum 256"
        ))
        .into(),
      );
    }
    let word_count = (num_bits + 31) / 32;
    let mut bitmap = Vec::with_capacity(word_count as usize);
    for _ in 0..word_count {
      bitmap.push(reader.read_value::<u32>()?);
    }
    Ok(Self {
      base,
      num_bits,
      bitmap,
    })
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    12
  }
}

impl<C: Context> Writable<C> for SequenceNumberSet {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    self.base.write_to(writer)?;
    writer.write_value(&self.num_bits)?;
    for word in &self.bitmap {
      writer.write_value(word)?;
    }
    Ok(())
  }
}

/// 32-bit fragment number, first fragment is 1.
#[derive(
  Copy, Clone, Debug, PartialOrd, PartialEq, Ord, Eq, Hash, Readable, Writable, Serialize,
  Deserialize,
)]
pub struct FragmentNumber(pub u32);

impl FragmentNumber {
  pub fn new(value: u32) -> Self {
    Self(value)
  }
}

/// Set of fragment numbers, used by NACK_FRAG. Same bitmap shape as
/// [`SequenceNumberSet`] but with 32-bit base.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FragmentNumberSet {
  base: FragmentNumber,
  num_bits: u32,
  bitmap: Vec<u32>,
}

impl FragmentNumberSet {
  pub fn new_empty(base: FragmentNumber) -> Self {
    Self {
      base,
      num_bits: 0,
      bitmap: Vec::new(),
    }
  }

  pub fn base(&self) -> FragmentNumber {
    self.base
  }

  pub fn insert(&mut self, fnum: FragmentNumber) -> bool {
    let offset = i64::from(fnum.0) - i64::from(self.base.0);
    if !(0..256).contains(&offset) {
      return false;
    }
    let offset = offset as u32;
    if offset >= self.num_bits {
      self.num_bits = offset + 1;
      self.bitmap.resize(((self.num_bits + 31) / 32) as usize, 0);
    }
    self.bitmap[(offset / 32) as usize] |= 1 << (31 - (offset % 32));
    true
  }

  pub fn iter(&self) -> impl Iterator<Item = FragmentNumber> + '_ {
    let base = self.base;
    (0..self.num_bits)
      .filter(move |offset| self.bitmap[(offset / 32) as usize] & (1 << (31 - (offset % 32))) != 0)
      .map(move |offset| FragmentNumber(base.0 + offset))
  }
}

impl<'a, C: Context> Readable<'a, C> for FragmentNumberSet {
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let base = FragmentNumber::read_from(reader)?;
    let num_bits: u32 = reader.read_value()?;
    if num_bits > 256 {
      return Err(
        speedy::Error::custom(format!(
          "FragmentNumberSet numBits={num_bits} exceeds protocol maximum 256"
        ))
        .into(),
      );
    }
    let word_count = (num_bits + 31) / 32;
    let mut bitmap = Vec::with_capacity(word_count as usize);
    for _ in 0..word_count {
      bitmap.push(reader.read_value::<u32>()?);
    }
    Ok(Self {
      base,
      num_bits,
      bitmap,
    })
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    8
  }
}

impl<C: Context> Writable<C> for FragmentNumberSet {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    self.base.write_to(writer)?;
    writer.write_value(&self.num_bits)?;
    for word in &self.bitmap {
      writer.write_value(word)?;
    }
    Ok(())
  }
}
