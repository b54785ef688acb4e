use std::net::{Ipv4Addr, SocketAddrV4};

use crate::structure::{duration::Duration, locator::Locator};

// Protocol timing defaults. Tunable per Participant via configuration.
pub const SPDP_ANNOUNCE_PERIOD: Duration = Duration::from_secs(5);
pub const PARTICIPANT_LEASE_DURATION: Duration = Duration::from_secs(100);
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(3);
pub const NACK_RESPONSE_DELAY: Duration = Duration::from_millis(200);
pub const NACK_SUPPRESSION_DURATION: Duration = Duration::ZERO;
pub const HEARTBEAT_RESPONSE_DELAY: Duration = Duration::from_millis(500);

/// Ceiling for one RTPS message; larger payloads go out as DATA_FRAG.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 - 8;

// Port mapping parameters, RTPS spec Section 9.6.1.1.
pub const PB: u16 = 7400;
pub const DG: u16 = 250;
pub const PG: u16 = 2;
pub const D0: u16 = 0; // metatraffic multicast offset
pub const D1: u16 = 10; // metatraffic unicast offset
pub const D2: u16 = 1; // user traffic multicast offset
pub const D3: u16 = 11; // user traffic unicast offset

pub const DISCOVERY_MULTICAST_ADDRESS: Ipv4Addr = Ipv4Addr::new(239, 255, 0, 1);

pub fn spdp_well_known_multicast_port(domain_id: u16) -> u16 {
  PB + DG * domain_id + D0
}

pub fn spdp_well_known_unicast_port(domain_id: u16, participant_id: u16) -> u16 {
  PB + DG * domain_id + D1 + PG * participant_id
}

pub fn user_traffic_multicast_port(domain_id: u16) -> u16 {
  PB + DG * domain_id + D2
}

pub fn user_traffic_unicast_port(domain_id: u16, participant_id: u16) -> u16 {
  PB + DG * domain_id + D3 + PG * participant_id
}

/// The well-known SPDP multicast locator of a domain.
pub fn spdp_multicast_locator(domain_id: u16) -> Locator {
  Locator::UdpV4(SocketAddrV4::new(
    DISCOVERY_MULTICAST_ADDRESS,
    spdp_well_known_multicast_port(domain_id),
  ))
}

/// The default user-traffic multicast locator of a domain.
pub fn user_multicast_locator(domain_id: u16) -> Locator {
  Locator::UdpV4(SocketAddrV4::new(
    DISCOVERY_MULTICAST_ADDRESS,
    user_traffic_multicast_port(domain_id),
  ))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn well_known_ports() {
    // domain 0: the classic 7400/7410/7401/7411 family
    assert_eq!(spdp_well_known_multicast_port(0), 7400);
    assert_eq!(spdp_well_known_unicast_port(0, 0), 7410);
    assert_eq!(user_traffic_multicast_port(0), 7401);
    assert_eq!(user_traffic_unicast_port(0, 0), 7411);
    // second participant shifts unicast by PG
    assert_eq!(spdp_well_known_unicast_port(0, 1), 7412);
    // domain 7 shifts everything by 7 * DG
    assert_eq!(spdp_well_known_multicast_port(7), 7400 + 7 * 250);
  }

  #[test]
  fn spdp_locator_is_multicast() {
    let loc = spdp_multicast_locator(0);
    assert!(loc.is_multicast());
    assert_eq!(loc.port(), 7400);
  }
}
