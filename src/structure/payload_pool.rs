use std::{
  fmt,
  sync::{Arc, Mutex, Weak},
};

use bytes::{Bytes, BytesMut};
#[allow(unused_imports)]
use log::{debug, trace, warn};

use crate::error::{Error, Result};

/// Bounds for a [`PayloadPool`].
#[derive(Copy, Clone, Debug)]
pub struct PayloadPoolConfig {
  /// Total bytes the pool may hold, resident plus free.
  pub max_bytes: usize,
  /// Maximum number of simultaneously resident payloads.
  pub max_payloads: usize,
  /// When false, exhaustion fails instead of allocating past the bounds.
  pub allow_growth: bool,
}

impl Default for PayloadPoolConfig {
  fn default() -> Self {
    Self {
      max_bytes: 16 * 1024 * 1024,
      max_payloads: 8192,
      allow_growth: false,
    }
  }
}

struct PoolState {
  free: Vec<BytesMut>,
  free_bytes: usize,
  resident_bytes: usize,
  resident_payloads: usize,
}

struct PoolInner {
  config: PayloadPoolConfig,
  state: Mutex<PoolState>,
}

/// Process-wide pool of serialized-payload buffers. Buffers are handed
/// out as refcounted [`PayloadHandle`]s and return to the free list when
/// the last handle drops. Thread safe; shared by all HistoryCaches of a
/// Participant.
#[derive(Clone)]
pub struct PayloadPool {
  inner: Arc<PoolInner>,
}

impl PayloadPool {
  pub fn new(config: PayloadPoolConfig) -> Self {
    Self {
      inner: Arc::new(PoolInner {
        config,
        state: Mutex::new(PoolState {
          free: Vec::new(),
          free_bytes: 0,
          resident_bytes: 0,
          resident_payloads: 0,
        }),
      }),
    }
  }

  /// Copy `data` into a pooled buffer. Fails with `PoolExhausted` when
  /// the pool bounds are hit and growth is not allowed; callers treat
  /// this the same as a full history cache.
  pub fn get_payload(&self, data: &[u8]) -> Result<PayloadHandle> {
    let mut state = self.inner.state.lock().unwrap();

    if state.resident_payloads >= self.inner.config.max_payloads && !self.inner.config.allow_growth
    {
      warn!(
        "PayloadPool exhausted: {} payloads resident",
        state.resident_payloads
      );
      return Err(Error::PoolExhausted);
    }

    // Prefer recycling the smallest free buffer that fits.
    let recycled = state
      .free
      .iter()
      .enumerate()
      .filter(|(_, b)| b.capacity() >= data.len())
      .min_by_key(|(_, b)| b.capacity())
      .map(|(i, _)| i);

    let mut buf = match recycled {
      Some(i) => {
        let buf = state.free.swap_remove(i);
        state.free_bytes -= buf.capacity();
        buf
      }
      None => {
        let in_use = state.resident_bytes + state.free_bytes;
        if in_use + data.len() > self.inner.config.max_bytes && !self.inner.config.allow_growth {
          warn!(
            "PayloadPool exhausted: {} bytes in use, {} requested",
            in_use,
            data.len()
          );
          return Err(Error::PoolExhausted);
        }
        BytesMut::with_capacity(data.len())
      }
    };

    buf.clear();
    buf.extend_from_slice(data);
    state.resident_bytes += buf.len();
    state.resident_payloads += 1;

    Ok(PayloadHandle {
      shared: Arc::new(SharedPayload {
        bytes: buf.freeze(),
        pool: Arc::downgrade(&self.inner),
      }),
    })
  }

  /// Bytes currently held by live payload handles.
  pub fn resident_bytes(&self) -> usize {
    self.inner.state.lock().unwrap().resident_bytes
  }

  pub fn resident_payloads(&self) -> usize {
    self.inner.state.lock().unwrap().resident_payloads
  }

  pub fn free_buffers(&self) -> usize {
    self.inner.state.lock().unwrap().free.len()
  }
}

impl fmt::Debug for PayloadPool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.inner.state.lock().unwrap();
    f.debug_struct("PayloadPool")
      .field("resident_bytes", &state.resident_bytes)
      .field("resident_payloads", &state.resident_payloads)
      .field("free", &state.free.len())
      .finish()
  }
}

struct SharedPayload {
  bytes: Bytes,
  pool: Weak<PoolInner>,
}

impl Drop for SharedPayload {
  fn drop(&mut self) {
    let Some(pool) = self.pool.upgrade() else {
      return; // pool itself already gone
    };
    let mut state = pool.state.lock().unwrap();
    let bytes = std::mem::take(&mut self.bytes);
    let capacity = bytes.len();
    state.resident_bytes = state.resident_bytes.saturating_sub(capacity);
    state.resident_payloads = state.resident_payloads.saturating_sub(1);
    // Reclaim the allocation if we were the only user of it.
    if let Ok(buf) = bytes.try_into_mut() {
      state.free_bytes += buf.capacity();
      state.free.push(buf);
    }
  }
}

/// Refcounted view into one pooled payload. Cloning shares the buffer,
/// e.g. between several local readers of the same sample; the buffer is
/// reclaimed when the last clone drops.
#[derive(Clone)]
pub struct PayloadHandle {
  shared: Arc<SharedPayload>,
}

impl PayloadHandle {
  pub fn bytes(&self) -> Bytes {
    self.shared.bytes.clone()
  }

  pub fn as_slice(&self) -> &[u8] {
    &self.shared.bytes
  }

  pub fn len(&self) -> usize {
    self.shared.bytes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.shared.bytes.is_empty()
  }
}

impl fmt::Debug for PayloadHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "PayloadHandle({} bytes)", self.len())
  }
}
