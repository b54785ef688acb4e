use std::net::Ipv4Addr;

use crate::{
  error::{Error, Result},
  rtps::constant,
  structure::{duration::Duration, payload_pool::PayloadPoolConfig},
};

/// Protocol tunables of one Participant. The defaults are the
/// interoperable RTPS ones; tests tighten the timing.
#[derive(Clone, Debug)]
pub struct ParticipantConfig {
  pub domain_id: u16,
  /// Participant index within the host, drives unicast port selection.
  pub participant_id: u16,
  pub entity_name: Option<String>,

  pub spdp_announce_period: Duration,
  pub participant_lease_duration: Duration,
  pub lease_check_period: Duration,

  pub heartbeat_period: Duration,
  pub nack_response_delay: Duration,
  pub nack_suppression_duration: Duration,
  pub heartbeat_response_delay: Duration,

  /// Payloads above this size leave as DATA_FRAG.
  pub max_data_size: usize,
  pub payload_pool: PayloadPoolConfig,

  /// Address advertised in this Participant's unicast locators.
  pub unicast_address: Ipv4Addr,
}

impl Default for ParticipantConfig {
  fn default() -> Self {
    Self {
      domain_id: 0,
      participant_id: 0,
      entity_name: None,
      spdp_announce_period: constant::SPDP_ANNOUNCE_PERIOD,
      participant_lease_duration: constant::PARTICIPANT_LEASE_DURATION,
      lease_check_period: Duration::from_secs(1),
      heartbeat_period: constant::HEARTBEAT_PERIOD,
      nack_response_delay: constant::NACK_RESPONSE_DELAY,
      nack_suppression_duration: constant::NACK_SUPPRESSION_DURATION,
      heartbeat_response_delay: constant::HEARTBEAT_RESPONSE_DELAY,
      max_data_size: constant::DEFAULT_MAX_MESSAGE_SIZE,
      payload_pool: PayloadPoolConfig::default(),
      unicast_address: Ipv4Addr::new(127, 0, 0, 1),
    }
  }
}

impl ParticipantConfig {
  /// Defaults overridden by the `DOMAIN_ID` and `PARTICIPANT_ID`
  /// environment variables, when present.
  pub fn from_env() -> Result<Self> {
    let mut config = Self::default();
    if let Ok(value) = std::env::var("DOMAIN_ID") {
      config.domain_id = value
        .parse()
        .map_err(|_| Error::bad_parameter(format!("DOMAIN_ID={value} is not a domain id")))?;
    }
    if let Ok(value) = std::env::var("PARTICIPANT_ID") {
      config.participant_id = value.parse().map_err(|_| {
        Error::bad_parameter(format!("PARTICIPANT_ID={value} is not a participant id"))
      })?;
    }
    Ok(config)
  }
}
