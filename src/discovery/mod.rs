#[allow(clippy::module_inception)]
pub mod discovery;
pub mod discovery_db;
pub mod sedp_messages;
pub mod spdp_participant_data;

pub use sedp_messages::{DiscoveredEndpointData, DiscoveredReaderData, DiscoveredWriterData};
pub use spdp_participant_data::SpdpDiscoveredParticipantData;
