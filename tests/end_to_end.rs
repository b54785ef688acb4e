//! Two-participant scenarios over the in-memory transport: best-effort
//! delivery, loss recovery, late joiners, QoS mismatch, participant
//! lease supervision.

use std::{
  net::{Ipv4Addr, SocketAddrV4},
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
  },
  time::{Duration as StdDuration, Instant},
};

use bytes::Bytes;
use talaria_dds::{
  configuration::ParticipantConfig,
  qos::{policy, QosPolicies},
  rtps::{constant, Message, SubmessageBody},
  statusevents::{DataReaderStatus, DataWriterStatus, DomainParticipantStatusEvent, LostReason},
  structure::payload_pool::PayloadPoolConfig,
  transport::{DatagramRelay, MemoryNetwork},
  Duration, InstanceHandle, Locator, Participant, QosPolicyId,
};

fn fast_config(domain_id: u16, participant_id: u16) -> ParticipantConfig {
  ParticipantConfig {
    domain_id,
    participant_id,
    entity_name: Some(format!("test-participant-{participant_id}")),
    spdp_announce_period: Duration::from_millis(100),
    participant_lease_duration: Duration::from_millis(600),
    lease_check_period: Duration::from_millis(50),
    heartbeat_period: Duration::from_millis(100),
    nack_response_delay: Duration::from_millis(10),
    nack_suppression_duration: Duration::ZERO,
    heartbeat_response_delay: Duration::from_millis(20),
    payload_pool: PayloadPoolConfig::default(),
    ..Default::default()
  }
}

fn spawn_participant(network: &MemoryNetwork, config: ParticipantConfig) -> Arc<Participant> {
  let relay = DatagramRelay::new();
  let source = Locator::UdpV4(SocketAddrV4::new(
    Ipv4Addr::new(127, 0, 0, 1),
    constant::user_traffic_unicast_port(config.domain_id, config.participant_id),
  ));
  let transport = Arc::new(network.attach(relay.clone(), source));
  let participant = Participant::new(config, transport).expect("participant creation");
  relay.bind(participant.datagram_receiver());
  participant
}

fn wait_until(timeout: StdDuration, mut condition: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    if condition() {
      return true;
    }
    std::thread::sleep(StdDuration::from_millis(10));
  }
  condition()
}

fn cdr_payload(marker: u8) -> Vec<u8> {
  // CDR_LE encapsulation header plus a small value
  vec![0x00, 0x01, 0x00, 0x00, marker, 0, 0, 0]
}

fn best_effort_qos() -> QosPolicies {
  QosPolicies::builder()
    .best_effort()
    .history(policy::History::KeepLast { depth: 10 })
    .build()
}

fn reliable_qos() -> QosPolicies {
  QosPolicies::builder()
    .reliable(Duration::from_millis(500))
    .history(policy::History::KeepLast { depth: 32 })
    .build()
}

#[test_log::test]
fn best_effort_delivery_without_heartbeats() {
  let network = MemoryNetwork::new();

  // observe user-writer HEARTBEAT traffic without dropping anything
  let user_heartbeats = Arc::new(AtomicUsize::new(0));
  {
    let user_heartbeats = Arc::clone(&user_heartbeats);
    network.add_drop_rule(move |_to, bytes| {
      if let Ok(message) = Message::read_from_buffer(&Bytes::copy_from_slice(bytes)) {
        for submessage in &message.submessages {
          if let SubmessageBody::Writer(
            talaria_dds::messages::submessages::submessages::WriterSubmessage::Heartbeat(hb, _),
          ) = &submessage.body
          {
            if hb.writer_id.kind().is_user_defined() {
              user_heartbeats.fetch_add(1, Ordering::SeqCst);
            }
          }
        }
      }
      false
    });
  }

  let p1 = spawn_participant(&network, fast_config(0, 0));
  let p2 = spawn_participant(&network, fast_config(0, 1));

  let (writer, _writer_status) = p1
    .create_writer("Square", "ShapeType", &best_effort_qos(), false)
    .unwrap();
  let (reader, _reader_status) = p2
    .create_reader("Square", "ShapeType", &best_effort_qos(), false)
    .unwrap();

  // wait for mutual discovery and both match directions
  let mut p1_events = Vec::new();
  let mut p2_events = Vec::new();
  assert!(wait_until(StdDuration::from_secs(5), || {
    p1_events.extend(p1.status_events().drain());
    p2_events.extend(p2.status_events().drain());
    p1_events
      .iter()
      .any(|e| matches!(e, DomainParticipantStatusEvent::RemoteReaderMatched { .. }))
      && p2_events
        .iter()
        .any(|e| matches!(e, DomainParticipantStatusEvent::RemoteWriterMatched { .. }))
  }));

  for n in 1..=5 {
    p1.write(writer, &cdr_payload(n), InstanceHandle::NIL).unwrap();
  }

  let mut seqs: Vec<i64> = Vec::new();
  assert!(wait_until(StdDuration::from_secs(5), || {
    for change in p2.take(reader, 100).unwrap() {
      seqs.push(change.sequence_number.as_i64());
    }
    seqs.len() >= 5
  }));
  assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
  assert_eq!(
    user_heartbeats.load(Ordering::SeqCst),
    0,
    "best-effort pair must not exchange HEARTBEAT"
  );
}

#[test_log::test]
fn reliable_pair_recovers_from_loss() {
  let network = MemoryNetwork::new();

  // drop the first DATA carrying seq 3 from a user writer
  let dropped = Arc::new(AtomicUsize::new(0));
  {
    let dropped = Arc::clone(&dropped);
    network.add_drop_rule(move |_to, bytes| {
      if dropped.load(Ordering::SeqCst) > 0 {
        return false;
      }
      if let Ok(message) = Message::read_from_buffer(&Bytes::copy_from_slice(bytes)) {
        for submessage in &message.submessages {
          if let SubmessageBody::Writer(
            talaria_dds::messages::submessages::submessages::WriterSubmessage::Data(data, _),
          ) = &submessage.body
          {
            if data.writer_id.kind().is_user_defined() && data.writer_sn.as_i64() == 3 {
              dropped.fetch_add(1, Ordering::SeqCst);
              return true;
            }
          }
        }
      }
      false
    });
  }

  let p1 = spawn_participant(&network, fast_config(0, 0));
  let p2 = spawn_participant(&network, fast_config(0, 1));

  let (writer, writer_status) = p1
    .create_writer("Square", "ShapeType", &reliable_qos(), false)
    .unwrap();
  let (reader, _reader_status) = p2
    .create_reader("Square", "ShapeType", &reliable_qos(), false)
    .unwrap();

  assert!(wait_until(StdDuration::from_secs(5), || {
    writer_status
      .drain()
      .iter()
      .any(|e| matches!(e, DataWriterStatus::PublicationMatched { .. }))
  }));

  // write 1..5; seq 3's first transmission is eaten by the network
  for n in 1..=5 {
    p1.write(writer, &cdr_payload(n), InstanceHandle::NIL).unwrap();
  }

  let mut received: Vec<i64> = Vec::new();
  assert!(wait_until(StdDuration::from_secs(10), || {
    for change in p2.take(reader, 100).unwrap_or_default() {
      received.push(change.sequence_number.as_i64());
    }
    received.len() >= 5
  }));

  assert_eq!(dropped.load(Ordering::SeqCst), 1, "seq 3 was dropped once");
  assert_eq!(received, vec![1, 2, 3, 4, 5], "in order despite the loss");
}

#[test_log::test]
fn keep_last_eviction_serves_late_joiner_only_recent_samples() {
  let network = MemoryNetwork::new();
  let p1 = spawn_participant(&network, fast_config(0, 0));

  let tl_qos = QosPolicies::builder()
    .reliable(Duration::from_millis(500))
    .durability(policy::Durability::TransientLocal)
    .history(policy::History::KeepLast { depth: 2 })
    .build();

  let (writer, _writer_status) = p1
    .create_writer("Square", "ShapeType", &tl_qos, false)
    .unwrap();

  // no reader yet; each write beyond depth 2 evicts the oldest
  for n in 1..=4 {
    p1.write(writer, &cdr_payload(n), InstanceHandle::NIL).unwrap();
  }

  // late joiner with TRANSIENT_LOCAL gets only {3, 4}
  let p2 = spawn_participant(&network, fast_config(0, 1));
  let (reader, _reader_status) = p2
    .create_reader("Square", "ShapeType", &tl_qos, false)
    .unwrap();

  let mut seqs: Vec<i64> = Vec::new();
  assert!(wait_until(StdDuration::from_secs(10), || {
    for change in p2.take(reader, 100).unwrap_or_default() {
      seqs.push(change.sequence_number.as_i64());
    }
    seqs.len() >= 2
  }));
  assert_eq!(seqs, vec![3, 4]);
}

#[test_log::test]
fn late_joiner_discovery_and_clean_shutdown() {
  let network = MemoryNetwork::new();
  let p1 = spawn_participant(&network, fast_config(7, 0));

  let (_writer, _writer_status) = p1
    .create_writer("Chatter", "String", &reliable_qos(), false)
    .unwrap();

  // the second participant starts later
  std::thread::sleep(StdDuration::from_millis(300));
  let p2 = spawn_participant(&network, fast_config(7, 1));
  let (reader, reader_status) = p2
    .create_reader("Chatter", "String", &reliable_qos(), false)
    .unwrap();

  assert!(wait_until(StdDuration::from_secs(5), || {
    p1.discovered_participant_count() == 1 && p2.discovered_participant_count() == 1
  }));

  // user endpoints match: p2's reader reports a subscription match
  assert!(wait_until(StdDuration::from_secs(5), || {
    reader_status
      .drain()
      .iter()
      .any(|e| matches!(e, DataReaderStatus::SubscriptionMatched { .. }))
  }));

  // clean shutdown announces departure: p2 unmatches well before any
  // lease could expire, with a liveliness change of -1
  let p1_prefix = p1.guid_prefix();
  p1.shutdown();

  assert!(wait_until(StdDuration::from_secs(5), || {
    p2.status_events().drain().iter().any(|e| {
      matches!(
        e,
        DomainParticipantStatusEvent::ParticipantLost {
          id,
          reason: LostReason::Disposed,
        } if *id == p1_prefix
      )
    })
  }));
  assert!(wait_until(StdDuration::from_secs(5), || {
    reader_status.drain().iter().any(|e| {
      matches!(
        e,
        DataReaderStatus::LivelinessChanged { alive_total, .. }
          if alive_total.count_change() == -1
      )
    })
  }));
  let _ = reader;
}

#[test_log::test]
fn qos_mismatch_fires_incompatibility_on_both_sides() {
  let network = MemoryNetwork::new();
  let p1 = spawn_participant(&network, fast_config(0, 0));
  let p2 = spawn_participant(&network, fast_config(0, 1));

  // writer offers BEST_EFFORT, reader requests RELIABLE: no match
  let (_writer, writer_status) = p1
    .create_writer("Square", "ShapeType", &best_effort_qos(), false)
    .unwrap();
  let (reader, reader_status) = p2
    .create_reader("Square", "ShapeType", &reliable_qos(), false)
    .unwrap();

  assert!(wait_until(StdDuration::from_secs(5), || {
    writer_status.drain().iter().any(|e| {
      matches!(
        e,
        DataWriterStatus::OfferedIncompatibleQos {
          last_policy_id: QosPolicyId::Reliability,
          ..
        }
      )
    })
  }));
  assert!(wait_until(StdDuration::from_secs(5), || {
    reader_status.drain().iter().any(|e| {
      matches!(
        e,
        DataReaderStatus::RequestedIncompatibleQos {
          last_policy_id: QosPolicyId::Reliability,
          ..
        }
      )
    })
  }));
  // and of course no subscription match ever happens
  assert!(p2.take(reader, 10).unwrap().is_empty());
}

#[test_log::test]
fn participant_lease_timeout_fires_exactly_once() {
  let network = MemoryNetwork::new();
  let p1 = spawn_participant(&network, fast_config(0, 0));
  let p2 = spawn_participant(&network, fast_config(0, 1));

  assert!(wait_until(StdDuration::from_secs(5), || {
    p1.discovered_participant_count() == 1 && p2.discovered_participant_count() == 1
  }));

  // silence p2: everything it sends is dropped from now on
  let p2_prefix = p2.guid_prefix();
  network.add_drop_rule(move |_to, bytes| {
    Message::read_from_buffer(&Bytes::copy_from_slice(bytes))
      .map(|m| m.header.guid_prefix == p2_prefix)
      .unwrap_or(false)
  });

  // p1 declares p2 dead after the lease, exactly once
  let lost_events = Arc::new(Mutex::new(Vec::new()));
  assert!(wait_until(StdDuration::from_secs(10), || {
    lost_events.lock().unwrap().extend(
      p1.status_events()
        .drain()
        .into_iter()
        .filter(|e| matches!(e, DomainParticipantStatusEvent::ParticipantLost { .. })),
    );
    !lost_events.lock().unwrap().is_empty()
  }));
  assert_eq!(p1.discovered_participant_count(), 0);

  // give the lease checker more rounds: no duplicate events
  std::thread::sleep(StdDuration::from_millis(500));
  lost_events.lock().unwrap().extend(
    p1.status_events()
      .drain()
      .into_iter()
      .filter(|e| matches!(e, DomainParticipantStatusEvent::ParticipantLost { .. })),
  );
  let events = lost_events.lock().unwrap();
  assert_eq!(events.len(), 1, "single-shot unmatch");
  match &events[0] {
    DomainParticipantStatusEvent::ParticipantLost { id, reason } => {
      assert_eq!(*id, p2_prefix);
      assert!(matches!(reason, LostReason::Timeout { .. }));
    }
    other => panic!("unexpected event {other:?}"),
  }
}
