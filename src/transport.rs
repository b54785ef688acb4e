// The core is transport-agnostic: it hands finished RTPS messages to a
// `Transport` and receives datagrams through `Participant::receive_datagram`.
// Concrete UDP/TCP/SHM transports live outside this crate; the in-memory
// implementation here exists for wiring several Participants together in
// one process, chiefly in tests.

use std::{
  collections::HashMap,
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
  },
  thread,
  time::{Duration, Instant},
};

use bytes::Bytes;
use crossbeam_channel as channel;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  error::{Error, Result},
  structure::locator::Locator,
};

/// Lower-layer datagram service consumed by the core.
///
/// `send` must not be called with any endpoint lock held in a way that
/// the delivery path could need. A send failure marks the destination
/// unreachable for the round; it is never fatal, since reliable traffic
/// is re-solicited by HEARTBEAT.
pub trait Transport: Send + Sync {
  fn is_locator_supported(&self, locator: &Locator) -> bool;

  /// Start receiving on `locator`. Received datagrams are delivered to
  /// the Participant by the transport's receiver thread.
  fn open_channel(&self, locator: &Locator) -> Result<()>;

  fn close_channel(&self, locator: &Locator);

  fn send(&self, buffer: &[u8], to: &Locator, deadline: Option<Instant>) -> Result<()>;
}

/// Datagram sink side of a Participant, implemented by `Participant`.
pub trait DatagramReceiver: Send + Sync {
  fn receive_datagram(&self, source: Locator, bytes: Bytes);
}

/// Late-binding receiver: lets a transport be constructed before the
/// Participant that will consume its datagrams exists. Datagrams
/// arriving before `bind` are dropped, which discovery retries absorb.
#[derive(Default)]
pub struct DatagramRelay {
  target: Mutex<Option<Arc<dyn DatagramReceiver>>>,
}

impl DatagramRelay {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn bind(&self, target: Arc<dyn DatagramReceiver>) {
    *self.target.lock().unwrap() = Some(target);
  }
}

impl DatagramReceiver for DatagramRelay {
  fn receive_datagram(&self, source: Locator, bytes: Bytes) {
    let target = self.target.lock().unwrap().clone();
    if let Some(target) = target {
      target.receive_datagram(source, bytes);
    }
  }
}

type DropRule = Box<dyn Fn(&Locator, &[u8]) -> bool + Send + Sync>;

struct NetworkState {
  // channel locator -> subscribed receivers
  channels: HashMap<Locator, Vec<Arc<dyn DatagramReceiver>>>,
  drop_rules: Vec<DropRule>,
  sent_count: usize,
  dropped_count: usize,
}

struct NetworkShared {
  state: Mutex<NetworkState>,
  in_flight: AtomicUsize,
}

/// In-process datagram switchboard. Locators are mailbox keys: a
/// datagram sent to a locator is delivered to every receiver with that
/// channel open, multicast and unicast alike. Delivery happens on a
/// dedicated thread, mirroring the asynchrony of a real socket stack.
#[derive(Clone)]
pub struct MemoryNetwork {
  shared: Arc<NetworkShared>,
  queue: channel::Sender<(Locator, Locator, Bytes)>,
}

impl MemoryNetwork {
  pub fn new() -> Self {
    let shared = Arc::new(NetworkShared {
      state: Mutex::new(NetworkState {
        channels: HashMap::new(),
        drop_rules: Vec::new(),
        sent_count: 0,
        dropped_count: 0,
      }),
      in_flight: AtomicUsize::new(0),
    });
    let (queue, dequeue) = channel::unbounded::<(Locator, Locator, Bytes)>();

    let worker_shared = Arc::clone(&shared);
    thread::Builder::new()
      .name("memory-network".to_string())
      .spawn(move || {
        while let Ok((from, to, bytes)) = dequeue.recv() {
          let receivers = {
            let state = worker_shared.state.lock().unwrap();
            state
              .channels
              .get(&to)
              .map(|subscribers| subscribers.to_vec())
              .unwrap_or_default()
          };
          for receiver in receivers {
            receiver.receive_datagram(from, bytes.clone());
          }
          worker_shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
      })
      .expect("cannot spawn memory network thread");

    Self { shared, queue }
  }

  /// Create a transport endpoint attached to this network that delivers
  /// into `receiver`.
  pub fn attach(&self, receiver: Arc<dyn DatagramReceiver>, source: Locator) -> MemoryTransport {
    MemoryTransport {
      network: self.clone(),
      receiver,
      source,
    }
  }

  /// Install a drop rule: datagrams for which it returns true are
  /// silently discarded. Used to simulate loss.
  pub fn add_drop_rule<F>(&self, rule: F)
  where
    F: Fn(&Locator, &[u8]) -> bool + Send + Sync + 'static,
  {
    self
      .shared
      .state
      .lock()
      .unwrap()
      .drop_rules
      .push(Box::new(rule));
  }

  pub fn clear_drop_rules(&self) {
    self.shared.state.lock().unwrap().drop_rules.clear();
  }

  pub fn sent_count(&self) -> usize {
    self.shared.state.lock().unwrap().sent_count
  }

  pub fn dropped_count(&self) -> usize {
    self.shared.state.lock().unwrap().dropped_count
  }

  /// Wait until queued datagrams have been handed to their receivers.
  pub fn settle(&self, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while self.shared.in_flight.load(Ordering::SeqCst) > 0 {
      if Instant::now() > deadline {
        return false;
      }
      thread::sleep(Duration::from_millis(1));
    }
    true
  }

  fn post(&self, from: &Locator, to: &Locator, buffer: &[u8]) {
    {
      let mut state = self.shared.state.lock().unwrap();
      if state.drop_rules.iter().any(|rule| rule(to, buffer)) {
        state.dropped_count += 1;
        return;
      }
      state.sent_count += 1;
    }
    self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
    if self
      .queue
      .send((*from, *to, Bytes::copy_from_slice(buffer)))
      .is_err()
    {
      self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
  }
}

impl Default for MemoryNetwork {
  fn default() -> Self {
    Self::new()
  }
}

/// One Participant's endpoint on a [`MemoryNetwork`].
pub struct MemoryTransport {
  network: MemoryNetwork,
  receiver: Arc<dyn DatagramReceiver>,
  source: Locator,
}

impl Transport for MemoryTransport {
  fn is_locator_supported(&self, locator: &Locator) -> bool {
    matches!(locator, Locator::UdpV4(_) | Locator::UdpV6(_))
  }

  fn open_channel(&self, locator: &Locator) -> Result<()> {
    if !self.is_locator_supported(locator) {
      return Err(Error::transport(format!(
        "unsupported locator {locator:?}"
      )));
    }
    let mut state = self.network.shared.state.lock().unwrap();
    state
      .channels
      .entry(*locator)
      .or_default()
      .push(Arc::clone(&self.receiver));
    Ok(())
  }

  fn close_channel(&self, locator: &Locator) {
    let mut state = self.network.shared.state.lock().unwrap();
    if let Some(subscribers) = state.channels.get_mut(locator) {
      subscribers.retain(|s| !Arc::ptr_eq(s, &self.receiver));
      if subscribers.is_empty() {
        state.channels.remove(locator);
      }
    }
  }

  fn send(&self, buffer: &[u8], to: &Locator, _deadline: Option<Instant>) -> Result<()> {
    if !self.is_locator_supported(to) {
      return Err(Error::transport(format!("unsupported locator {to:?}")));
    }
    self.network.post(&self.source, to, buffer);
    Ok(())
  }
}
