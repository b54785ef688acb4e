// A purpose-built scheduler for protocol timers: heartbeats, lease
// checks, ACKNACK response delays, SPDP announcements, flow controller
// refills. One thread, one binary heap, one condvar.

use std::{
  cmp::Reverse,
  collections::{BinaryHeap, HashMap},
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Condvar, Mutex, Weak,
  },
  thread,
  time::{Duration, Instant},
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

/// What a fired event wants next.
pub enum AfterFire {
  /// One-shot, forget the event.
  Done,
  /// Fire again after this delay.
  Again(Duration),
}

type EventCallback = Box<dyn FnMut() -> AfterFire + Send>;

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct HeapKey {
  fire_at: Instant,
  id: u64,
  generation: u64,
}

struct EventSlot {
  callback: EventCallback,
  cancelled: Arc<AtomicBool>,
  // bumped by reschedule; heap entries with an older generation are
  // stale and skipped
  generation: u64,
}

struct SchedulerState {
  heap: BinaryHeap<Reverse<HeapKey>>,
  events: HashMap<u64, EventSlot>,
  next_id: u64,
  stopping: bool,
}

struct SchedulerShared {
  state: Mutex<SchedulerState>,
  wakeup: Condvar,
}

/// Handle to one scheduled event. Cancellation is idempotent; a handle
/// whose scheduler is gone is inert.
#[derive(Clone)]
pub struct EventHandle {
  id: u64,
  cancelled: Arc<AtomicBool>,
  shared: Weak<SchedulerShared>,
}

impl EventHandle {
  /// Cancel the event. An event that is concurrently being fired checks
  /// this flag immediately before invoking the callback.
  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
    if let Some(shared) = self.shared.upgrade() {
      let mut state = shared.state.lock().unwrap();
      state.events.remove(&self.id);
      drop(state);
      shared.wakeup.notify_one();
    }
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::SeqCst)
  }
}

/// Single-threaded executor of delayed and periodic protocol events.
/// Callbacks must be short and non-blocking; they may take endpoint
/// locks but never a lock that is held while scheduling.
pub struct TimedEventScheduler {
  shared: Arc<SchedulerShared>,
  thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TimedEventScheduler {
  pub fn new() -> Self {
    let shared = Arc::new(SchedulerShared {
      state: Mutex::new(SchedulerState {
        heap: BinaryHeap::new(),
        events: HashMap::new(),
        next_id: 0,
        stopping: false,
      }),
      wakeup: Condvar::new(),
    });

    let thread_shared = Arc::clone(&shared);
    let thread = thread::Builder::new()
      .name("rtps-timed-events".to_string())
      .spawn(move || Self::run(&thread_shared))
      .expect("cannot spawn timed event thread");

    Self {
      shared,
      thread: Mutex::new(Some(thread)),
    }
  }

  /// Schedule `callback` to fire after `delay`. The callback decides
  /// whether to repeat, which is how periodic events reschedule
  /// themselves.
  pub fn schedule<F>(&self, delay: Duration, callback: F) -> EventHandle
  where
    F: FnMut() -> AfterFire + Send + 'static,
  {
    let cancelled = Arc::new(AtomicBool::new(false));
    let mut state = self.shared.state.lock().unwrap();
    let id = state.next_id;
    state.next_id += 1;
    state.events.insert(
      id,
      EventSlot {
        callback: Box::new(callback),
        cancelled: Arc::clone(&cancelled),
        generation: 0,
      },
    );
    state.heap.push(Reverse(HeapKey {
      fire_at: Instant::now() + delay,
      id,
      generation: 0,
    }));
    drop(state);
    self.shared.wakeup.notify_one();

    EventHandle {
      id,
      cancelled,
      shared: Arc::downgrade(&self.shared),
    }
  }

  /// Convenience: fire every `period` until cancelled.
  pub fn schedule_periodic<F>(&self, period: Duration, mut callback: F) -> EventHandle
  where
    F: FnMut() + Send + 'static,
  {
    self.schedule(period, move || {
      callback();
      AfterFire::Again(period)
    })
  }

  /// Move an already scheduled event to fire `new_delay` from now. The
  /// stale heap entry is left in place and skipped when it surfaces.
  pub fn reschedule(&self, handle: &EventHandle, new_delay: Duration) {
    if handle.is_cancelled() {
      return;
    }
    let mut state = self.shared.state.lock().unwrap();
    if let Some(slot) = state.events.get_mut(&handle.id) {
      slot.generation += 1;
      let generation = slot.generation;
      state.heap.push(Reverse(HeapKey {
        fire_at: Instant::now() + new_delay,
        id: handle.id,
        generation,
      }));
      drop(state);
      self.shared.wakeup.notify_one();
    }
  }

  fn run(shared: &Arc<SchedulerShared>) {
    let mut state = shared.state.lock().unwrap();
    loop {
      if state.stopping {
        return;
      }

      let now = Instant::now();
      match state.heap.peek() {
        None => {
          state = shared.wakeup.wait(state).unwrap();
        }
        Some(Reverse(key)) if key.fire_at > now => {
          let timeout = key.fire_at - now;
          let (guard, _timeout_result) = shared.wakeup.wait_timeout(state, timeout).unwrap();
          state = guard;
        }
        Some(_) => {
          let Reverse(key) = state.heap.pop().unwrap();
          // The slot may be gone (cancelled) or this entry superseded
          // by a reschedule. Either way the stale entry is dropped.
          match state.events.get(&key.id) {
            None => continue,
            Some(slot) if slot.generation != key.generation => continue,
            Some(_) => {}
          }
          let mut slot = state.events.remove(&key.id).unwrap();
          if slot.cancelled.load(Ordering::SeqCst) {
            continue;
          }
          // Run the callback without the scheduler lock, so callbacks
          // may schedule and cancel freely.
          drop(state);
          let after = (slot.callback)();
          state = shared.state.lock().unwrap();
          match after {
            AfterFire::Done => {}
            AfterFire::Again(delay) => {
              if !slot.cancelled.load(Ordering::SeqCst) && !state.stopping {
                let generation = slot.generation;
                state.events.insert(key.id, slot);
                state.heap.push(Reverse(HeapKey {
                  fire_at: Instant::now() + delay,
                  id: key.id,
                  generation,
                }));
              }
            }
          }
        }
      }
    }
  }

  /// Cancel everything and stop the thread. Idempotent.
  pub fn shutdown(&self) {
    {
      let mut state = self.shared.state.lock().unwrap();
      state.stopping = true;
      state.events.clear();
      state.heap.clear();
    }
    self.shared.wakeup.notify_all();
    let thread = self.thread.lock().unwrap().take();
    if let Some(thread) = thread {
      let _ = thread.join();
    }
  }
}

impl Default for TimedEventScheduler {
  fn default() -> Self {
    Self::new()
  }
}

impl Drop for TimedEventScheduler {
  fn drop(&mut self) {
    self.shutdown();
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::AtomicUsize;

  use super::*;

  #[test]
  fn one_shot_fires_once() {
    let scheduler = TimedEventScheduler::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&fired);
    scheduler.schedule(Duration::from_millis(10), move || {
      f.fetch_add(1, Ordering::SeqCst);
      AfterFire::Done
    });
    thread::sleep(Duration::from_millis(100));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn periodic_fires_repeatedly_until_cancelled() {
    let scheduler = TimedEventScheduler::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&fired);
    let handle = scheduler.schedule_periodic(Duration::from_millis(5), move || {
      f.fetch_add(1, Ordering::SeqCst);
    });
    thread::sleep(Duration::from_millis(80));
    handle.cancel();
    let count_at_cancel = fired.load(Ordering::SeqCst);
    assert!(count_at_cancel >= 3, "only fired {count_at_cancel} times");
    thread::sleep(Duration::from_millis(40));
    assert_eq!(fired.load(Ordering::SeqCst), count_at_cancel);
  }

  #[test]
  fn cancel_before_fire_suppresses_callback() {
    let scheduler = TimedEventScheduler::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&fired);
    let handle = scheduler.schedule(Duration::from_millis(50), move || {
      f.fetch_add(1, Ordering::SeqCst);
      AfterFire::Done
    });
    handle.cancel();
    handle.cancel(); // idempotent
    thread::sleep(Duration::from_millis(100));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn reschedule_delays_the_fire() {
    let scheduler = TimedEventScheduler::new();
    let fired_at = Arc::new(Mutex::new(None));
    let f = Arc::clone(&fired_at);
    let start = Instant::now();
    let handle = scheduler.schedule(Duration::from_millis(10), move || {
      *f.lock().unwrap() = Some(Instant::now());
      AfterFire::Done
    });
    scheduler.reschedule(&handle, Duration::from_millis(60));
    thread::sleep(Duration::from_millis(150));
    let fired = fired_at.lock().unwrap().expect("event never fired");
    // the original 10 ms deadline is superseded by the reschedule
    assert!(fired >= start + Duration::from_millis(55));
  }

  #[test]
  fn shutdown_stops_thread_and_cancels_events() {
    let scheduler = TimedEventScheduler::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&fired);
    scheduler.schedule(Duration::from_millis(30), move || {
      f.fetch_add(1, Ordering::SeqCst);
      AfterFire::Done
    });
    scheduler.shutdown();
    thread::sleep(Duration::from_millis(60));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
  }
}
