//! RTPS publish/subscribe protocol core.
//!
//! This crate implements the wire-level heart of a DDS middleware: the
//! OMG DDS-RTPS protocol machinery that turns best-effort datagrams
//! into discovered, matched, optionally reliable, per-writer-ordered
//! sample streams.
//!
//! What is here:
//!
//! - the RTPS message codec: header, all core submessages, parameter
//!   lists, serialized-payload encapsulation ([`messages`]),
//! - the reliability state machines: stateful/stateless writers and
//!   readers with HEARTBEAT / ACKNACK / GAP exchange and per-writer
//!   FIFO delivery ([`rtps`]),
//! - history caches with KEEP_LAST/KEEP_ALL eviction and a refcounted
//!   payload pool ([`structure`]),
//! - two-phase discovery: SPDP participant announcements and SEDP
//!   endpoint exchange with QoS-compatibility matching ([`discovery`]),
//! - a single-threaded timed-event scheduler driving heartbeats,
//!   leases, response delays and flow-controller refills
//!   ([`timed_event`]),
//! - the [`participant::Participant`] root object wiring it all up.
//!
//! What is deliberately *not* here: user-facing DDS entity façades,
//! type support/code generation, XML QoS profiles, security plugins,
//! and concrete socket transports. The core talks to transports through
//! the [`transport::Transport`] trait; an in-process
//! [`transport::MemoryNetwork`] is included for testing and examples.

#[macro_use]
pub mod messages;

pub mod configuration;
pub mod discovery;
pub mod error;
pub mod participant;
pub mod qos;
pub mod rtps;
pub mod statusevents;
pub mod structure;
pub mod timed_event;
pub mod transport;

pub use configuration::ParticipantConfig;
pub use error::{Error, Result};
pub use participant::Participant;
pub use qos::{QosPolicies, QosPolicyBuilder, QosPolicyId};
pub use structure::{
  cache_change::{CacheChange, ChangeKind, InstanceHandle},
  duration::Duration,
  guid::{EntityId, EntityKind, GuidPrefix, GUID},
  locator::Locator,
  sequence_number::SequenceNumber,
  time::Timestamp,
};
