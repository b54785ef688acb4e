use bit_vec::BitVec;
use bytes::{Bytes, BytesMut};
#[allow(unused_imports)]
use log::{debug, error, trace, warn};

/// Reassembles one large sample from DATA_FRAG submessages. Fragment
/// numbers start at 1; all fragments except the last are exactly
/// `fragment_size` bytes.
pub struct FragmentAssembler {
  fragment_size: u16,
  data_size: u32,
  total_fragments: u32,
  received: BitVec,
  received_count: u32,
  buffer: BytesMut,
}

impl FragmentAssembler {
  pub fn new(fragment_size: u16, data_size: u32) -> Self {
    let fragment_size_u32 = u32::from(fragment_size.max(1));
    let total_fragments = data_size.div_ceil(fragment_size_u32).max(1);
    let mut buffer = BytesMut::with_capacity(data_size as usize);
    buffer.resize(data_size as usize, 0);
    Self {
      fragment_size,
      data_size,
      total_fragments,
      received: BitVec::from_elem(total_fragments as usize, false),
      received_count: 0,
      buffer,
    }
  }

  /// Insert a run of consecutive fragments. Returns the complete
  /// payload once every fragment has arrived.
  pub fn insert_frags(
    &mut self,
    fragment_starting_num: u32,
    fragments_in_submessage: u16,
    payload: &[u8],
  ) -> Option<Bytes> {
    if fragment_starting_num == 0 {
      warn!("DATA_FRAG with fragment number 0, fragments start at 1");
      return None;
    }
    let fragment_size = usize::from(self.fragment_size);

    for i in 0..u32::from(fragments_in_submessage) {
      let fragment_num = fragment_starting_num + i;
      if fragment_num > self.total_fragments {
        warn!(
          "fragment {fragment_num} out of range, sample has {} fragments",
          self.total_fragments
        );
        break;
      }
      let index = (fragment_num - 1) as usize;
      let payload_from = i as usize * fragment_size;
      if payload_from >= payload.len() {
        break; // submessage shorter than advertised
      }

      let buffer_from = index * fragment_size;
      let buffer_to = std::cmp::min(buffer_from + fragment_size, self.data_size as usize);
      let payload_to = std::cmp::min(payload_from + (buffer_to - buffer_from), payload.len());
      if payload_to - payload_from < buffer_to - buffer_from {
        warn!("fragment {fragment_num} truncated, ignoring");
        continue;
      }

      if !self.received.get(index).unwrap_or(true) {
        self.buffer[buffer_from..buffer_to].copy_from_slice(&payload[payload_from..payload_to]);
        self.received.set(index, true);
        self.received_count += 1;
      }
    }

    if self.received_count == self.total_fragments {
      Some(std::mem::take(&mut self.buffer).freeze())
    } else {
      None
    }
  }

  pub fn is_complete(&self) -> bool {
    self.received_count == self.total_fragments
  }
}
