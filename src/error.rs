use thiserror::Error;

use crate::qos::QosPolicyId;

/// Error taxonomy of the protocol core. Every fallible operation fails
/// with exactly one of these.
#[derive(Debug, Error)]
pub enum Error {
  /// Deadline expired before the operation's precondition was met.
  #[error("Operation timed out")]
  Timeout,

  /// History cache has no slot available under the configured policy.
  #[error("History cache full")]
  CacheFull,

  /// Payload pool has no buffer available and may not grow.
  #[error("Payload pool exhausted")]
  PoolExhausted,

  /// The target peer is not, or is no longer, matched.
  #[error("Peer not matched")]
  NotMatched,

  /// QoS check refused endpoint creation or matching.
  #[error("Incompatible QoS: {0:?}")]
  IncompatibleQos(QosPolicyId),

  /// Malformed argument supplied by the caller.
  #[error("Bad parameter: {reason}")]
  BadParameter { reason: String },

  /// Parse error on an incoming datagram. The packet is discarded and
  /// counted; protocol state is unchanged.
  #[error("Malformed packet: {reason}")]
  MalformedPacket { reason: String },

  /// The transport layer refused a send or channel open.
  #[error("Transport error: {reason}")]
  TransportError { reason: String },

  /// Operation issued after the entity was destroyed.
  #[error("Entity already deleted")]
  AlreadyDeleted,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
  pub(crate) fn bad_parameter(reason: impl Into<String>) -> Self {
    Self::BadParameter {
      reason: reason.into(),
    }
  }

  pub(crate) fn malformed(reason: impl Into<String>) -> Self {
    Self::MalformedPacket {
      reason: reason.into(),
    }
  }

  pub(crate) fn transport(reason: impl Into<String>) -> Self {
    Self::TransportError {
      reason: reason.into(),
    }
  }
}

impl From<speedy::Error> for Error {
  fn from(e: speedy::Error) -> Self {
    Self::MalformedPacket {
      reason: e.to_string(),
    }
  }
}
