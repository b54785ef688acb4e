// Outbound flow control in the shape of composable filters over the
// batch of cache changes a writer is about to send. A filter may trim
// the batch; whatever survives every filter goes to the transport, and
// each successful hand-off is reported back through
// `notify_change_sent` exactly once.

use std::{
  collections::VecDeque,
  time::{Duration, Instant},
};

#[allow(unused_imports)]
use log::{debug, trace, warn};

use crate::structure::sequence_number::SequenceNumber;

/// One queued outbound change.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FlowQueueItem {
  pub seq: SequenceNumber,
  pub payload_size: u32,
}

/// A flow control stage. Filters are stateful and shared by all readers
/// of the writer they are bound to.
pub trait FlowFilter: Send {
  /// Trim `changes` down to what may be sent now.
  fn filter(&mut self, changes: &mut Vec<FlowQueueItem>);

  /// Called exactly once per change successfully handed to the
  /// transport. Failed sends are not reported.
  fn notify_change_sent(&mut self, _item: &FlowQueueItem) {}

  /// When the filter withheld something: how long until it is worth
  /// trying again.
  fn retry_after(&self) -> Option<Duration> {
    None
  }
}

/// Passes at most N changes per invocation.
pub struct QuantityFilter {
  quantity: usize,
}

impl QuantityFilter {
  pub fn new(quantity: usize) -> Self {
    Self { quantity }
  }
}

impl FlowFilter for QuantityFilter {
  fn filter(&mut self, changes: &mut Vec<FlowQueueItem>) {
    if changes.len() > self.quantity {
      changes.truncate(self.quantity);
    }
  }
}

/// Passes changes up to a byte budget; spent budget is restored in a
/// staggered fashion, each clearing refunding itself one period later.
pub struct SizeFilter {
  size_to_clear: u32,
  refresh_period: Duration,
  accumulated: u32,
  refunds: VecDeque<(Instant, u32)>,
}

impl SizeFilter {
  pub fn new(size_to_clear: u32, refresh_period: Duration) -> Self {
    Self {
      size_to_clear,
      refresh_period,
      accumulated: 0,
      refunds: VecDeque::new(),
    }
  }

  fn apply_due_refunds(&mut self, now: Instant) {
    while let Some((due, size)) = self.refunds.front().copied() {
      if due > now {
        break;
      }
      self.refunds.pop_front();
      self.accumulated = self.accumulated.saturating_sub(size);
    }
  }
}

impl FlowFilter for SizeFilter {
  fn filter(&mut self, changes: &mut Vec<FlowQueueItem>) {
    let now = Instant::now();
    self.apply_due_refunds(now);

    let mut passed = 0;
    for item in changes.iter() {
      // an oversized single change passes alone on a fresh budget,
      // otherwise it could never be sent at all
      let fits = self.accumulated + item.payload_size <= self.size_to_clear
        || (self.accumulated == 0 && passed == 0);
      if !fits {
        break;
      }
      self.accumulated += item.payload_size;
      self
        .refunds
        .push_back((now + self.refresh_period, item.payload_size));
      passed += 1;
    }
    changes.truncate(passed);
  }

  fn retry_after(&self) -> Option<Duration> {
    self
      .refunds
      .front()
      .map(|(due, _)| due.saturating_duration_since(Instant::now()))
  }
}

/// Lets everything through, but once anything it cleared is actually
/// sent, suppresses the queue for a period.
pub struct ThrottleFilter {
  throttle_period: Duration,
  throttling_until: Option<Instant>,
}

impl ThrottleFilter {
  pub fn new(throttle_period: Duration) -> Self {
    Self {
      throttle_period,
      throttling_until: None,
    }
  }
}

impl FlowFilter for ThrottleFilter {
  fn filter(&mut self, changes: &mut Vec<FlowQueueItem>) {
    match self.throttling_until {
      Some(until) if Instant::now() < until => changes.clear(),
      _ => {
        self.throttling_until = None;
      }
    }
  }

  fn notify_change_sent(&mut self, _item: &FlowQueueItem) {
    self.throttling_until = Some(Instant::now() + self.throttle_period);
  }

  fn retry_after(&self) -> Option<Duration> {
    self
      .throttling_until
      .map(|until| until.saturating_duration_since(Instant::now()))
  }
}

/// Zero or more filters applied in order.
#[derive(Default)]
pub struct FlowFilterChain {
  filters: Vec<Box<dyn FlowFilter>>,
}

impl FlowFilterChain {
  pub fn new(filters: Vec<Box<dyn FlowFilter>>) -> Self {
    Self { filters }
  }

  pub fn unlimited() -> Self {
    Self::default()
  }

  pub fn filter(&mut self, changes: &mut Vec<FlowQueueItem>) {
    for filter in &mut self.filters {
      if changes.is_empty() {
        break;
      }
      filter.filter(changes);
    }
  }

  pub fn notify_change_sent(&mut self, item: &FlowQueueItem) {
    for filter in &mut self.filters {
      filter.notify_change_sent(item);
    }
  }

  /// Earliest moment any filter expects to let more through.
  pub fn retry_after(&self) -> Option<Duration> {
    self.filters.iter().filter_map(|f| f.retry_after()).min()
  }
}
