// Communication status changes delivered as events, the mechanism from
// DDS spec v1.4 Section 2.2.4 "Listeners, Conditions, and Wait-sets"
// reduced to its event-channel core: an endpoint publishes status
// events into a bounded channel, the application (or a listener shim)
// drains them.

use chrono::Utc;
use crossbeam_channel as channel;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  messages::{protocol_version::ProtocolVersion, vendor_id::VendorId},
  qos::{QosPolicies, QosPolicyId},
  structure::{duration::Duration, guid::GuidPrefix, guid::GUID},
};

/// Create a bounded status channel pair. Nobody is required to listen,
/// so a full channel loses events rather than blocking the protocol.
pub fn sync_status_channel<T>(capacity: usize) -> (StatusChannelSender<T>, StatusChannelReceiver<T>)
{
  let (sender, receiver) = channel::bounded(capacity);
  (
    StatusChannelSender { sender },
    StatusChannelReceiver { receiver },
  )
}

#[derive(Clone)]
pub struct StatusChannelSender<T> {
  sender: channel::Sender<T>,
}

impl<T> StatusChannelSender<T> {
  /// Best-effort send. A full channel drops the event silently; a
  /// disconnected one is only worth a trace, since receivers may be
  /// gone during teardown.
  pub fn try_send(&self, t: T) {
    match self.sender.try_send(t) {
      Ok(()) => {}
      Err(channel::TrySendError::Full(_)) => {
        trace!("Status channel full, dropping event.");
      }
      Err(channel::TrySendError::Disconnected(_)) => {
        trace!("Status channel receiver is gone.");
      }
    }
  }
}

pub struct StatusChannelReceiver<T> {
  receiver: channel::Receiver<T>,
}

impl<T> StatusChannelReceiver<T> {
  pub fn try_recv(&self) -> Option<T> {
    self.receiver.try_recv().ok()
  }

  pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<T> {
    self.receiver.recv_timeout(timeout).ok()
  }

  pub fn drain(&self) -> Vec<T> {
    self.receiver.try_iter().collect()
  }
}

/// Participant-level events, mostly produced by discovery.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DomainParticipantStatusEvent {
  ParticipantDiscovered {
    participant: ParticipantDescription,
  },
  ParticipantLost {
    id: GuidPrefix,
    reason: LostReason,
  },
  /// New remote Reader seen by discovery, matched or not.
  ReaderDetected {
    reader: EndpointDescription,
  },
  /// New remote Writer seen by discovery, matched or not.
  WriterDetected {
    writer: EndpointDescription,
  },
  ReaderLost {
    guid: GUID,
    reason: LostReason,
  },
  WriterLost {
    guid: GUID,
    reason: LostReason,
  },
  RemoteReaderMatched {
    local_writer: GUID,
    remote_reader: GUID,
  },
  RemoteWriterMatched {
    local_reader: GUID,
    remote_writer: GUID,
  },
  RemoteReaderQosIncompatible {
    local_writer: GUID,
    remote_reader: GUID,
    policy: QosPolicyId,
  },
  RemoteWriterQosIncompatible {
    local_reader: GUID,
    remote_writer: GUID,
    policy: QosPolicyId,
  },
}

/// Why a remote entity is considered to be no longer with us.
#[derive(Debug, Clone)]
pub enum LostReason {
  /// Announced its departure via discovery.
  Disposed,
  /// Lease time exceeded.
  Timeout {
    lease: Duration,
    elapsed: Duration,
  },
}

/// Summary of a discovered Participant, decoupled from the discovery
/// wire records to keep layering one-directional.
#[derive(Debug, Clone)]
pub struct ParticipantDescription {
  pub updated_time: chrono::DateTime<Utc>,
  pub protocol_version: ProtocolVersion,
  pub vendor_id: VendorId,
  pub guid: GUID,
  pub lease_duration: Option<Duration>,
  pub entity_name: Option<String>,
}

/// Summary of a discovered endpoint.
#[derive(Debug, Clone)]
pub struct EndpointDescription {
  pub updated_time: chrono::DateTime<Utc>,
  pub guid: GUID,
  pub topic_name: String,
  pub type_name: String,
  pub qos: QosPolicies,
}

#[derive(Debug, Clone)]
pub enum DataReaderStatus {
  /// Sample was rejected because a resource limit would be exceeded.
  SampleRejected {
    count: CountWithChange,
    last_reason: SampleRejectedStatusKind,
  },
  /// A matched remote Writer became active or inactive.
  LivelinessChanged {
    alive_total: CountWithChange,
    not_alive_total: CountWithChange,
  },
  RequestedDeadlineMissed {
    count: CountWithChange,
  },
  RequestedIncompatibleQos {
    count: CountWithChange,
    last_policy_id: QosPolicyId,
    writer: GUID,
  },
  /// A sample is known lost: the writer advanced past it before we got
  /// it.
  SampleLost {
    count: CountWithChange,
  },
  SubscriptionMatched {
    total: CountWithChange,
    current: CountWithChange,
    writer: GUID,
  },
}

#[derive(Debug, Clone)]
pub enum DataWriterStatus {
  LivelinessLost {
    count: CountWithChange,
  },
  OfferedDeadlineMissed {
    count: CountWithChange,
  },
  OfferedIncompatibleQos {
    count: CountWithChange,
    last_policy_id: QosPolicyId,
    reader: GUID,
  },
  PublicationMatched {
    total: CountWithChange,
    current: CountWithChange,
    reader: GUID,
  },
}

/// Running count plus its delta since the previous event of the same
/// kind. DDS counts are 32-bit signed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CountWithChange {
  count: i32,
  count_change: i32,
}

impl CountWithChange {
  pub fn new(count: i32, count_change: i32) -> Self {
    Self {
      count,
      count_change,
    }
  }

  pub fn count(&self) -> i32 {
    self.count
  }

  pub fn count_change(&self) -> i32 {
    self.count_change
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRejectedStatusKind {
  NotRejected,
  ByInstancesLimit,
  BySamplesLimit,
  BySamplesPerInstanceLimit,
}
