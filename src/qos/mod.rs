pub mod policy;

use serde::{Deserialize, Serialize};

use crate::structure::duration::Duration;
use policy::{
  Deadline, Durability, History, Lifespan, Liveliness, Ownership, Partition, Reliability,
  ResourceLimits, TopicData, UserData,
};

/// Identifies a QoS policy in status events and incompatibility reports.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QosPolicyId {
  Invalid,
  UserData,
  Durability,
  Deadline,
  Ownership,
  Liveliness,
  Partition,
  Reliability,
  History,
  ResourceLimits,
  TopicData,
  Lifespan,
}

/// The QoS policy bundle the protocol core interprets. Every field is
/// optional; absence means the DDS default.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QosPolicies {
  pub reliability: Option<Reliability>,
  pub durability: Option<Durability>,
  pub history: Option<History>,
  pub resource_limits: Option<ResourceLimits>,
  pub deadline: Option<Deadline>,
  pub lifespan: Option<Lifespan>,
  pub liveliness: Option<Liveliness>,
  pub ownership: Option<Ownership>,
  pub partition: Option<Partition>,
  pub user_data: Option<UserData>,
  pub topic_data: Option<TopicData>,
}

impl QosPolicies {
  /// All defaults, nothing specified.
  pub fn qos_none() -> Self {
    Self::default()
  }

  pub fn builder() -> QosPolicyBuilder {
    QosPolicyBuilder::new()
  }

  pub fn is_reliable(&self) -> bool {
    self
      .reliability
      .as_ref()
      .is_some_and(Reliability::is_reliable)
  }

  pub fn reliable_max_blocking_time(&self) -> Option<Duration> {
    match self.reliability {
      Some(Reliability::Reliable { max_blocking_time }) => Some(max_blocking_time),
      _ => None,
    }
  }

  pub fn durability_or_default(&self) -> Durability {
    self.durability.unwrap_or(Durability::Volatile)
  }

  pub fn history_or_default(&self) -> History {
    self.history.unwrap_or_default()
  }

  pub fn deadline_or_default(&self) -> Deadline {
    self.deadline.unwrap_or_default()
  }

  pub fn liveliness_or_default(&self) -> Liveliness {
    self.liveliness.unwrap_or_default()
  }

  pub fn ownership_or_default(&self) -> Ownership {
    self.ownership.unwrap_or(Ownership::Shared)
  }

  pub fn partition_or_default(&self) -> Partition {
    self.partition.clone().unwrap_or_default()
  }

  /// Request-vs-offer check: `self` is what the reader requests,
  /// `offered` is what the writer offers. Returns the first policy that
  /// makes the pair incompatible, None when they match.
  ///
  /// Topic name, type name and partitions are matched separately by
  /// discovery; this checks only the ordered request/offer policies.
  pub fn compliance_failure_wrt(&self, offered: &QosPolicies) -> Option<QosPolicyId> {
    let requested_reliability = self.reliability.unwrap_or(Reliability::BestEffort);
    let offered_reliability = offered.reliability.unwrap_or(Reliability::BestEffort);
    if !offered_reliability.offers_at_least(&requested_reliability) {
      return Some(QosPolicyId::Reliability);
    }

    if offered.durability_or_default() < self.durability_or_default() {
      return Some(QosPolicyId::Durability);
    }

    // writer must publish at least as often as the reader expects
    if offered.deadline_or_default().0 > self.deadline_or_default().0 {
      return Some(QosPolicyId::Deadline);
    }

    if !offered
      .liveliness_or_default()
      .offers_at_least(&self.liveliness_or_default())
    {
      return Some(QosPolicyId::Liveliness);
    }

    if !offered
      .ownership_or_default()
      .kind_matches(&self.ownership_or_default())
    {
      return Some(QosPolicyId::Ownership);
    }

    None
  }
}

/// Builder in the fluent style.
#[derive(Clone, Debug, Default)]
pub struct QosPolicyBuilder {
  qos: QosPolicies,
}

impl QosPolicyBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn reliability(mut self, reliability: Reliability) -> Self {
    self.qos.reliability = Some(reliability);
    self
  }

  pub fn best_effort(self) -> Self {
    self.reliability(Reliability::BestEffort)
  }

  pub fn reliable(self, max_blocking_time: Duration) -> Self {
    self.reliability(Reliability::Reliable { max_blocking_time })
  }

  pub fn durability(mut self, durability: Durability) -> Self {
    self.qos.durability = Some(durability);
    self
  }

  pub fn history(mut self, history: History) -> Self {
    self.qos.history = Some(history);
    self
  }

  pub fn resource_limits(mut self, resource_limits: ResourceLimits) -> Self {
    self.qos.resource_limits = Some(resource_limits);
    self
  }

  pub fn deadline(mut self, deadline: Deadline) -> Self {
    self.qos.deadline = Some(deadline);
    self
  }

  pub fn lifespan(mut self, lifespan: Lifespan) -> Self {
    self.qos.lifespan = Some(lifespan);
    self
  }

  pub fn liveliness(mut self, liveliness: Liveliness) -> Self {
    self.qos.liveliness = Some(liveliness);
    self
  }

  pub fn ownership(mut self, ownership: Ownership) -> Self {
    self.qos.ownership = Some(ownership);
    self
  }

  pub fn partition(mut self, partition: Partition) -> Self {
    self.qos.partition = Some(partition);
    self
  }

  pub fn user_data(mut self, user_data: UserData) -> Self {
    self.qos.user_data = Some(user_data);
    self
  }

  pub fn topic_data(mut self, topic_data: TopicData) -> Self {
    self.qos.topic_data = Some(topic_data);
    self
  }

  pub fn build(self) -> QosPolicies {
    self.qos
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reliability_mismatch_is_reported() {
    let reader = QosPolicies::builder()
      .reliable(Duration::from_millis(100))
      .build();
    let writer = QosPolicies::builder().best_effort().build();
    assert_eq!(
      reader.compliance_failure_wrt(&writer),
      Some(QosPolicyId::Reliability)
    );
    // the reverse is allowed
    assert_eq!(writer.compliance_failure_wrt(&reader), None);
  }

  #[test]
  fn durability_is_ordered_offer_must_dominate() {
    let reader = QosPolicies::builder()
      .durability(Durability::TransientLocal)
      .build();
    let volatile_writer = QosPolicies::builder()
      .durability(Durability::Volatile)
      .build();
    let persistent_writer = QosPolicies::builder()
      .durability(Durability::Persistent)
      .build();
    assert_eq!(
      reader.compliance_failure_wrt(&volatile_writer),
      Some(QosPolicyId::Durability)
    );
    assert_eq!(reader.compliance_failure_wrt(&persistent_writer), None);
  }

  #[test]
  fn deadline_writer_period_must_not_exceed_readers() {
    let reader = QosPolicies::builder()
      .deadline(Deadline(Duration::from_secs(1)))
      .build();
    let slow_writer = QosPolicies::builder()
      .deadline(Deadline(Duration::from_secs(2)))
      .build();
    let fast_writer = QosPolicies::builder()
      .deadline(Deadline(Duration::from_millis(500)))
      .build();
    assert_eq!(
      reader.compliance_failure_wrt(&slow_writer),
      Some(QosPolicyId::Deadline)
    );
    assert_eq!(reader.compliance_failure_wrt(&fast_writer), None);
  }

  #[test]
  fn ownership_kinds_must_agree() {
    let shared = QosPolicies::builder().ownership(Ownership::Shared).build();
    let exclusive = QosPolicies::builder()
      .ownership(Ownership::Exclusive { strength: 10 })
      .build();
    assert_eq!(
      shared.compliance_failure_wrt(&exclusive),
      Some(QosPolicyId::Ownership)
    );
    assert_eq!(exclusive.compliance_failure_wrt(&exclusive), None);
  }

  #[test]
  fn defaults_are_compatible() {
    let a = QosPolicies::qos_none();
    let b = QosPolicies::qos_none();
    assert_eq!(a.compliance_failure_wrt(&b), None);
  }
}
