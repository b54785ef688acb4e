use std::{
  collections::BTreeMap,
  net::SocketAddrV4,
  sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, Mutex, RwLock,
  },
  time::Instant,
};

use bytes::Bytes;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  configuration::ParticipantConfig,
  discovery::{
    discovery::{sedp_qos, Discovery},
    sedp_messages::{DiscoveredEndpointData, DiscoveredReaderData, DiscoveredWriterData},
    spdp_participant_data::{BuiltinEndpointSet, SpdpDiscoveredParticipantData},
  },
  error::{Error, Result},
  messages::{protocol_version::ProtocolVersion, vendor_id::VendorId},
  qos::QosPolicies,
  rtps::{
    constant,
    flow_control::FlowFilterChain,
    message_receiver::{MessageReceiver, ReaderRegistry, WriterRegistry},
    reader::{ReaderIngredients, ReaderKind, StatefulReader},
    stateless_reader::StatelessReader,
    stateless_writer::{ReaderLocator, StatelessWriter},
    writer::{StatefulWriter, WriterCell, WriterIngredients, WriterKind},
  },
  statusevents::{
    sync_status_channel, DataReaderStatus, DataWriterStatus, DomainParticipantStatusEvent,
    StatusChannelReceiver,
  },
  structure::{
    cache_change::{CacheChange, ChangeKind, InstanceHandle},
    duration::Duration,
    guid::{EntityId, EntityKind, GuidPrefix, GUID},
    history_cache::HistoryCacheConfig,
    locator::Locator,
    payload_pool::PayloadPool,
    sequence_number::SequenceNumber,
  },
  timed_event::{AfterFire, TimedEventScheduler},
  transport::{DatagramReceiver, Transport},
};

/// The root object of one RTPS endpoint node: owns the endpoint
/// registries, the discovery engine, the payload pool, the timed event
/// scheduler, and the transport attachment. Everything else hangs off
/// it, directly or through `Arc`s it hands out.
pub struct Participant {
  inner: Arc<ParticipantInner>,
}

struct ParticipantInner {
  guid: GUID,
  config: ParticipantConfig,
  scheduler: Arc<TimedEventScheduler>,
  pool: PayloadPool,
  transport: Arc<dyn Transport>,
  readers: ReaderRegistry,
  writers: WriterRegistry,
  receiver: Mutex<MessageReceiver>,
  discovery: Mutex<Discovery>,

  data_available_rx: crossbeam_channel::Receiver<EntityId>,
  spdp_liveness_rx: crossbeam_channel::Receiver<GuidPrefix>,
  participant_status_rx: StatusChannelReceiver<DomainParticipantStatusEvent>,

  deleted: AtomicBool,
  event_handles: Mutex<Vec<crate::timed_event::EventHandle>>,
  entity_counter: AtomicU32,

  metatraffic_unicast_locator: Locator,
  user_unicast_locator: Locator,
  spdp_multicast_locator: Locator,
}

impl Participant {
  /// Create a Participant on `domain_id` and attach it to `transport`.
  /// The transport must already be wired to deliver received datagrams
  /// into the object returned by [`Participant::datagram_receiver`]; see
  /// the crate tests for the pattern with [`crate::transport::MemoryNetwork`].
  pub fn new(config: ParticipantConfig, transport: Arc<dyn Transport>) -> Result<Arc<Self>> {
    let guid_prefix = GuidPrefix::random_for_this_participant();
    let guid = GUID::new(guid_prefix, EntityId::PARTICIPANT);
    let domain_id = config.domain_id;
    let participant_id = config.participant_id;

    let spdp_multicast_locator = constant::spdp_multicast_locator(domain_id);
    let metatraffic_unicast_locator = Locator::UdpV4(SocketAddrV4::new(
      config.unicast_address,
      constant::spdp_well_known_unicast_port(domain_id, participant_id),
    ));
    let user_unicast_locator = Locator::UdpV4(SocketAddrV4::new(
      config.unicast_address,
      constant::user_traffic_unicast_port(domain_id, participant_id),
    ));

    for locator in [
      &spdp_multicast_locator,
      &metatraffic_unicast_locator,
      &user_unicast_locator,
    ] {
      transport.open_channel(locator)?;
    }

    let scheduler = Arc::new(TimedEventScheduler::new());
    let pool = PayloadPool::new(config.payload_pool);
    let readers: ReaderRegistry = Arc::new(RwLock::new(BTreeMap::new()));
    let writers: WriterRegistry = Arc::new(RwLock::new(BTreeMap::new()));

    let (data_available_tx, data_available_rx) = crossbeam_channel::bounded(256);
    let (spdp_liveness_tx, spdp_liveness_rx) = crossbeam_channel::bounded(64);
    let (participant_status_tx, participant_status_rx) = sync_status_channel(64);

    // ---- built-in endpoints ----
    let builtin_cache = HistoryCacheConfig::default();
    let (writer_status_tx, _writer_status_rx) = sync_status_channel(16);
    let spdp_writer = WriterCell::new(WriterKind::Stateless({
      let mut writer = StatelessWriter::new(
        GUID::new(guid_prefix, EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER),
        "DCPSParticipant".to_string(),
        QosPolicies::builder().best_effort().build(),
        HistoryCacheConfig {
          history: crate::qos::policy::History::KeepLast { depth: 1 },
          ..Default::default()
        },
        pool.clone(),
        Arc::clone(&transport),
        writer_status_tx,
        FlowFilterChain::unlimited(),
      );
      writer.reader_locator_add(ReaderLocator {
        locator: spdp_multicast_locator,
        expects_inline_qos: false,
      });
      writer
    }));

    let (reader_status_tx, _reader_status_rx) = sync_status_channel(16);
    let spdp_reader = Arc::new(Mutex::new(ReaderKind::Stateless(StatelessReader::new(
      GUID::new(guid_prefix, EntityId::SPDP_BUILTIN_PARTICIPANT_READER),
      "DCPSParticipant".to_string(),
      "SpdpDiscoveredParticipantData".to_string(),
      QosPolicies::builder().best_effort().build(),
      pool.clone(),
      Some(EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER),
      reader_status_tx,
      Some(data_available_tx.clone()),
    ))));

    let make_sedp_writer = |entity_id: EntityId, topic: &str, type_name: &str| {
      let (status_tx, _status_rx) = sync_status_channel(16);
      WriterCell::new(WriterKind::Stateful(StatefulWriter::new(
        WriterIngredients {
          guid: GUID::new(guid_prefix, entity_id),
          topic_name: topic.to_string(),
          type_name: type_name.to_string(),
          qos: sedp_qos(),
          cache_config: builtin_cache.clone(),
          heartbeat_period: config.heartbeat_period,
          nack_response_delay: Duration::ZERO,
          nack_suppression_duration: Duration::ZERO,
          max_data_size: config.max_data_size,
          pool: pool.clone(),
          transport: Arc::clone(&transport),
          status_sender: status_tx,
          flow_filters: FlowFilterChain::unlimited(),
        },
      )))
    };
    let sedp_publications_writer = make_sedp_writer(
      EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
      "DCPSPublication",
      "DiscoveredWriterData",
    );
    let sedp_subscriptions_writer = make_sedp_writer(
      EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_WRITER,
      "DCPSSubscription",
      "DiscoveredReaderData",
    );

    let make_sedp_reader = |entity_id: EntityId, topic: &str, type_name: &str| {
      let (status_tx, _status_rx) = sync_status_channel(16);
      Arc::new(Mutex::new(ReaderKind::Stateful(StatefulReader::new(
        ReaderIngredients {
          guid: GUID::new(guid_prefix, entity_id),
          topic_name: topic.to_string(),
          type_name: type_name.to_string(),
          qos: sedp_qos(),
          cache_config: builtin_cache.clone(),
          heartbeat_response_delay: Duration::ZERO,
          pool: pool.clone(),
          transport: Arc::clone(&transport),
          status_sender: status_tx,
          data_available_notifier: Some(data_available_tx.clone()),
        },
      ))))
    };
    let sedp_publications_reader = make_sedp_reader(
      EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
      "DCPSPublication",
      "DiscoveredWriterData",
    );
    let sedp_subscriptions_reader = make_sedp_reader(
      EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_READER,
      "DCPSSubscription",
      "DiscoveredReaderData",
    );

    {
      let mut writer_registry = writers.write().unwrap();
      for cell in [
        &spdp_writer,
        &sedp_publications_writer,
        &sedp_subscriptions_writer,
      ] {
        let entity_id = cell.mutex.lock().unwrap().guid().entity_id;
        writer_registry.insert(entity_id, Arc::clone(cell));
      }
      let mut reader_registry = readers.write().unwrap();
      for shared in [
        &spdp_reader,
        &sedp_publications_reader,
        &sedp_subscriptions_reader,
      ] {
        let entity_id = shared.lock().unwrap().guid().entity_id;
        reader_registry.insert(entity_id, Arc::clone(shared));
      }
    }

    // attach schedulers to the stateful built-ins
    for cell in [&sedp_publications_writer, &sedp_subscriptions_writer] {
      if let WriterKind::Stateful(w) = &mut *cell.mutex.lock().unwrap() {
        w.attach_scheduler(Arc::clone(&scheduler), Arc::downgrade(cell));
      }
    }
    for shared in [&sedp_publications_reader, &sedp_subscriptions_reader] {
      if let ReaderKind::Stateful(r) = &mut *shared.lock().unwrap() {
        r.attach_scheduler(Arc::clone(&scheduler), Arc::downgrade(shared));
      }
    }

    let own_participant_data = SpdpDiscoveredParticipantData {
      updated_time: chrono::Utc::now(),
      protocol_version: ProtocolVersion::THIS_IMPLEMENTATION,
      vendor_id: VendorId::THIS_IMPLEMENTATION,
      participant_guid: guid,
      domain_id,
      metatraffic_unicast_locators: vec![metatraffic_unicast_locator],
      metatraffic_multicast_locators: vec![spdp_multicast_locator],
      default_unicast_locators: vec![user_unicast_locator],
      default_multicast_locators: vec![],
      available_builtin_endpoints: BuiltinEndpointSet::all_simple_discovery(),
      lease_duration: Some(config.participant_lease_duration),
      entity_name: config.entity_name.clone(),
    };

    let discovery = Discovery::new(
      own_participant_data,
      Arc::clone(&spdp_writer),
      Arc::clone(&sedp_publications_writer),
      Arc::clone(&sedp_subscriptions_writer),
      Arc::clone(&readers),
      Arc::clone(&writers),
      participant_status_tx,
    );

    let receiver = MessageReceiver::new(
      guid_prefix,
      Arc::clone(&readers),
      Arc::clone(&writers),
      spdp_liveness_tx,
    );

    let inner = Arc::new(ParticipantInner {
      guid,
      config: config.clone(),
      scheduler,
      pool,
      transport,
      readers,
      writers,
      receiver: Mutex::new(receiver),
      discovery: Mutex::new(discovery),
      data_available_rx,
      spdp_liveness_rx,
      participant_status_rx,
      deleted: AtomicBool::new(false),
      event_handles: Mutex::new(Vec::new()),
      entity_counter: AtomicU32::new(0),
      metatraffic_unicast_locator,
      user_unicast_locator,
      spdp_multicast_locator,
    });

    ParticipantInner::start_periodic_events(&inner);
    // first announcement right away, not an announce period later
    inner.discovery.lock().unwrap().announce_participant()?;

    Ok(Arc::new(Self { inner }))
  }

  /// The sink to hand to the transport's receive side.
  pub fn datagram_receiver(self: &Arc<Self>) -> Arc<dyn DatagramReceiver> {
    Arc::clone(&self.inner) as Arc<dyn DatagramReceiver>
  }

  pub fn guid(&self) -> GUID {
    self.inner.guid
  }

  pub fn guid_prefix(&self) -> GuidPrefix {
    self.inner.guid.prefix
  }

  pub fn domain_id(&self) -> u16 {
    self.inner.config.domain_id
  }

  /// Participant-level discovery events.
  pub fn status_events(&self) -> &StatusChannelReceiver<DomainParticipantStatusEvent> {
    &self.inner.participant_status_rx
  }

  pub fn discovered_participant_count(&self) -> usize {
    self.inner.discovery.lock().unwrap().known_participants()
  }

  /// Create a user writer. Reliability selects the stateful or
  /// stateless protocol machine.
  pub fn create_writer(
    &self,
    topic_name: &str,
    type_name: &str,
    qos: &QosPolicies,
    with_key: bool,
  ) -> Result<(GUID, StatusChannelReceiver<DataWriterStatus>)> {
    self.inner.check_alive()?;
    let entity_id = self.inner.next_entity_id(if with_key {
      EntityKind::WRITER_WITH_KEY_USER_DEFINED
    } else {
      EntityKind::WRITER_NO_KEY_USER_DEFINED
    });
    let guid = GUID::new(self.inner.guid.prefix, entity_id);
    let (status_tx, status_rx) = sync_status_channel(16);
    let cache_config = cache_config_from_qos(qos);

    let cell = if qos.is_reliable() {
      let cell = WriterCell::new(WriterKind::Stateful(StatefulWriter::new(WriterIngredients {
        guid,
        topic_name: topic_name.to_string(),
        type_name: type_name.to_string(),
        qos: qos.clone(),
        cache_config,
        heartbeat_period: self.inner.config.heartbeat_period,
        nack_response_delay: self.inner.config.nack_response_delay,
        nack_suppression_duration: self.inner.config.nack_suppression_duration,
        max_data_size: self.inner.config.max_data_size,
        pool: self.inner.pool.clone(),
        transport: Arc::clone(&self.inner.transport),
        status_sender: status_tx,
        flow_filters: FlowFilterChain::unlimited(),
      })));
      if let WriterKind::Stateful(w) = &mut *cell.mutex.lock().unwrap() {
        w.attach_scheduler(Arc::clone(&self.inner.scheduler), Arc::downgrade(&cell));
      }
      self.inner.schedule_writer_heartbeat(&cell);
      self.inner.schedule_writer_deadline(&cell, qos);
      cell
    } else {
      WriterCell::new(WriterKind::Stateless(StatelessWriter::new(
        guid,
        topic_name.to_string(),
        qos.clone(),
        cache_config,
        self.inner.pool.clone(),
        Arc::clone(&self.inner.transport),
        status_tx,
        FlowFilterChain::unlimited(),
      )))
    };

    self
      .inner
      .writers
      .write()
      .unwrap()
      .insert(entity_id, Arc::clone(&cell));

    let discovered = DiscoveredWriterData(DiscoveredEndpointData::new(
      guid,
      topic_name,
      type_name,
      qos.clone(),
      vec![self.inner.user_unicast_locator],
      vec![],
    ));
    self
      .inner
      .discovery
      .lock()
      .unwrap()
      .publish_local_writer(discovered)?;

    Ok((guid, status_rx))
  }

  /// Create a user reader. Reliability selects the stateful or
  /// stateless protocol machine.
  pub fn create_reader(
    &self,
    topic_name: &str,
    type_name: &str,
    qos: &QosPolicies,
    with_key: bool,
  ) -> Result<(GUID, StatusChannelReceiver<DataReaderStatus>)> {
    self.inner.check_alive()?;
    let entity_id = self.inner.next_entity_id(if with_key {
      EntityKind::READER_WITH_KEY_USER_DEFINED
    } else {
      EntityKind::READER_NO_KEY_USER_DEFINED
    });
    let guid = GUID::new(self.inner.guid.prefix, entity_id);
    let (status_tx, status_rx) = sync_status_channel(16);
    let cache_config = cache_config_from_qos(qos);

    let shared: crate::rtps::reader::SharedReader = if qos.is_reliable() {
      let shared = Arc::new(Mutex::new(ReaderKind::Stateful(StatefulReader::new(
        ReaderIngredients {
          guid,
          topic_name: topic_name.to_string(),
          type_name: type_name.to_string(),
          qos: qos.clone(),
          cache_config,
          heartbeat_response_delay: self.inner.config.heartbeat_response_delay,
          pool: self.inner.pool.clone(),
          transport: Arc::clone(&self.inner.transport),
          status_sender: status_tx,
          data_available_notifier: None,
        },
      ))));
      if let ReaderKind::Stateful(r) = &mut *shared.lock().unwrap() {
        r.attach_scheduler(Arc::clone(&self.inner.scheduler), Arc::downgrade(&shared));
      }
      self.inner.schedule_reader_deadline(&shared, qos);
      shared
    } else {
      Arc::new(Mutex::new(ReaderKind::Stateless(StatelessReader::new(
        guid,
        topic_name.to_string(),
        type_name.to_string(),
        qos.clone(),
        self.inner.pool.clone(),
        None,
        status_tx,
        None,
      ))))
    };

    self
      .inner
      .readers
      .write()
      .unwrap()
      .insert(entity_id, shared);

    let mut discovered = DiscoveredEndpointData::new(
      guid,
      topic_name,
      type_name,
      qos.clone(),
      vec![self.inner.user_unicast_locator],
      vec![],
    );
    discovered.expects_inline_qos = false;
    self
      .inner
      .discovery
      .lock()
      .unwrap()
      .publish_local_reader(DiscoveredReaderData(discovered))?;

    Ok((guid, status_rx))
  }

  /// Write one sample. Blocks up to the QoS `max_blocking_time` when
  /// the history cache or payload pool is out of space.
  pub fn write(
    &self,
    writer: GUID,
    payload: &[u8],
    instance_handle: InstanceHandle,
  ) -> Result<SequenceNumber> {
    self.write_with_kind(writer, ChangeKind::Alive, instance_handle, Some(payload))
  }

  /// Dispose an instance: readers learn the instance is gone.
  pub fn dispose_instance(&self, writer: GUID, instance_handle: InstanceHandle) -> Result<()> {
    self
      .write_with_kind(writer, ChangeKind::NotAliveDisposed, instance_handle, None)
      .map(|_| ())
  }

  fn write_with_kind(
    &self,
    writer: GUID,
    kind: ChangeKind,
    instance_handle: InstanceHandle,
    payload: Option<&[u8]>,
  ) -> Result<SequenceNumber> {
    self.inner.check_alive()?;
    let cell = self.inner.writer_cell(writer)?;

    let max_blocking: Option<std::time::Duration> = {
      let guard = cell.mutex.lock().unwrap();
      guard.qos().reliable_max_blocking_time().map(Into::into)
    };
    let deadline = max_blocking.map(|d| Instant::now() + d);

    let mut guard = cell.mutex.lock().unwrap();
    loop {
      match guard.write_change(kind, instance_handle, payload, None) {
        Ok(seq) => return Ok(seq),
        Err(Error::CacheFull) | Err(Error::PoolExhausted) => {
          let Some(deadline) = deadline else {
            return Err(Error::CacheFull);
          };
          let now = Instant::now();
          if now >= deadline {
            return Err(Error::Timeout);
          }
          // woken when acknowledgments purge cache space
          let (g, _timeout) = cell
            .ack_cv
            .wait_timeout(guard, deadline - now)
            .map_err(|_| Error::AlreadyDeleted)?;
          guard = g;
        }
        Err(e) => return Err(e),
      }
    }
  }

  /// Take up to `max_samples` received samples from a reader, oldest
  /// first, per-writer FIFO.
  pub fn take(&self, reader: GUID, max_samples: usize) -> Result<Vec<CacheChange>> {
    self.inner.check_alive()?;
    let registry = self.inner.readers.read().unwrap();
    let shared = registry
      .get(&reader.entity_id)
      .filter(|_| reader.prefix == self.inner.guid.prefix)
      .ok_or(Error::NotMatched)?;
    let result = shared.lock().unwrap().take(max_samples);
    Ok(result)
  }

  pub fn delete_writer(&self, writer: GUID) -> Result<()> {
    self.inner.check_alive()?;
    let removed = self
      .inner
      .writers
      .write()
      .unwrap()
      .remove(&writer.entity_id);
    if removed.is_none() {
      return Err(Error::NotMatched);
    }
    self
      .inner
      .discovery
      .lock()
      .unwrap()
      .unpublish_local_writer(writer)?;
    Ok(())
  }

  pub fn delete_reader(&self, reader: GUID) -> Result<()> {
    self.inner.check_alive()?;
    let removed = self
      .inner
      .readers
      .write()
      .unwrap()
      .remove(&reader.entity_id);
    if removed.is_none() {
      return Err(Error::NotMatched);
    }
    self
      .inner
      .discovery
      .lock()
      .unwrap()
      .unpublish_local_reader(reader)?;
    Ok(())
  }

  /// Orderly shutdown: announce departure, cancel timers, close
  /// transport channels. Further operations fail `AlreadyDeleted`.
  pub fn shutdown(&self) {
    if self.inner.deleted.swap(true, Ordering::SeqCst) {
      return;
    }
    if let Err(e) = self.inner.discovery.lock().unwrap().dispose_participant() {
      warn!("dispose announcement failed: {e}");
    }
    for handle in self.inner.event_handles.lock().unwrap().drain(..) {
      handle.cancel();
    }
    self.inner.scheduler.shutdown();
    for locator in [
      &self.inner.spdp_multicast_locator,
      &self.inner.metatraffic_unicast_locator,
      &self.inner.user_unicast_locator,
    ] {
      self.inner.transport.close_channel(locator);
    }
    self.inner.readers.write().unwrap().clear();
    self.inner.writers.write().unwrap().clear();
  }

  #[cfg(test)]
  pub(crate) fn pool(&self) -> &PayloadPool {
    &self.inner.pool
  }
}

impl Drop for Participant {
  fn drop(&mut self) {
    self.shutdown();
  }
}

impl ParticipantInner {
  fn check_alive(&self) -> Result<()> {
    if self.deleted.load(Ordering::SeqCst) {
      Err(Error::AlreadyDeleted)
    } else {
      Ok(())
    }
  }

  fn next_entity_id(&self, kind: EntityKind) -> EntityId {
    let n = self.entity_counter.fetch_add(1, Ordering::SeqCst) + 1;
    let [_, k0, k1, k2] = n.to_be_bytes();
    EntityId::create_custom_entity_id([k0, k1, k2], kind)
  }

  fn writer_cell(&self, writer: GUID) -> Result<Arc<WriterCell>> {
    if writer.prefix != self.guid.prefix {
      return Err(Error::NotMatched);
    }
    self
      .writers
      .read()
      .unwrap()
      .get(&writer.entity_id)
      .cloned()
      .ok_or(Error::NotMatched)
  }

  fn schedule_writer_heartbeat(&self, cell: &Arc<WriterCell>) {
    let weak = Arc::downgrade(cell);
    let period: std::time::Duration = self.config.heartbeat_period.into();
    let handle = self.scheduler.schedule(period, move || match weak.upgrade() {
      Some(cell) => {
        if let WriterKind::Stateful(w) = &mut *cell.mutex.lock().unwrap() {
          w.perform_heartbeat();
        }
        AfterFire::Again(period)
      }
      None => AfterFire::Done,
    });
    self.event_handles.lock().unwrap().push(handle);
  }

  fn schedule_writer_deadline(&self, cell: &Arc<WriterCell>, qos: &QosPolicies) {
    let deadline = qos.deadline_or_default().0;
    if deadline.is_infinite() {
      return;
    }
    let period: std::time::Duration = deadline.into();
    let weak = Arc::downgrade(cell);
    let handle = self.scheduler.schedule(period, move || match weak.upgrade() {
      Some(cell) => {
        if let WriterKind::Stateful(w) = &mut *cell.mutex.lock().unwrap() {
          w.check_deadline(period);
        }
        AfterFire::Again(period)
      }
      None => AfterFire::Done,
    });
    self.event_handles.lock().unwrap().push(handle);
  }

  fn schedule_reader_deadline(&self, shared: &crate::rtps::reader::SharedReader, qos: &QosPolicies) {
    let deadline = qos.deadline_or_default().0;
    if deadline.is_infinite() {
      return;
    }
    let period: std::time::Duration = deadline.into();
    let weak = Arc::downgrade(shared);
    let handle = self.scheduler.schedule(period, move || match weak.upgrade() {
      Some(shared) => {
        if let ReaderKind::Stateful(r) = &mut *shared.lock().unwrap() {
          r.check_deadlines(period);
        }
        AfterFire::Again(period)
      }
      None => AfterFire::Done,
    });
    self.event_handles.lock().unwrap().push(handle);
  }

  fn start_periodic_events(inner: &Arc<Self>) {
    let this = inner;
    let mut handles = Vec::new();

    // periodic SPDP announcement
    let weak = Arc::downgrade(this);
    let announce_period: std::time::Duration = this.config.spdp_announce_period.into();
    handles.push(this.scheduler.schedule(announce_period, move || {
      match weak.upgrade() {
        Some(inner) => {
          if let Err(e) = inner.discovery.lock().unwrap().announce_participant() {
            warn!("SPDP announcement failed: {e}");
          }
          AfterFire::Again(announce_period)
        }
        None => AfterFire::Done,
      }
    }));

    // lease supervision + deferred notification drain
    let weak = Arc::downgrade(this);
    let lease_period: std::time::Duration = this.config.lease_check_period.into();
    handles.push(this.scheduler.schedule(lease_period, move || {
      match weak.upgrade() {
        Some(inner) => {
          inner.process_notifications();
          inner.discovery.lock().unwrap().check_participant_leases();
          AfterFire::Again(lease_period)
        }
        None => AfterFire::Done,
      }
    }));

    // heartbeats for the built-in SEDP writers
    let registry = this.writers.read().unwrap();
    for entity in [
      EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
      EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_WRITER,
    ] {
      if let Some(cell) = registry.get(&entity) {
        this.schedule_writer_heartbeat(cell);
      }
    }
    drop(registry);

    this.event_handles.lock().unwrap().extend(handles);
  }

  /// Route freshly available built-in samples into discovery and apply
  /// SPDP liveness refreshes.
  fn process_notifications(&self) {
    while let Ok(prefix) = self.spdp_liveness_rx.try_recv() {
      self.discovery.lock().unwrap().refresh_lease(prefix);
    }

    while let Ok(entity_id) = self.data_available_rx.try_recv() {
      let samples = {
        let registry = self.readers.read().unwrap();
        match registry.get(&entity_id) {
          Some(shared) => shared.lock().unwrap().take(usize::MAX),
          None => continue,
        }
      };
      if samples.is_empty() {
        continue;
      }
      let mut discovery = self.discovery.lock().unwrap();
      match entity_id {
        EntityId::SPDP_BUILTIN_PARTICIPANT_READER => discovery.handle_spdp_samples(samples),
        EntityId::SEDP_BUILTIN_PUBLICATIONS_READER => {
          discovery.handle_sedp_publication_samples(samples);
        }
        EntityId::SEDP_BUILTIN_SUBSCRIPTIONS_READER => {
          discovery.handle_sedp_subscription_samples(samples);
        }
        other => trace!("data available on non-builtin {other:?}"),
      }
    }
  }
}

impl DatagramReceiver for ParticipantInner {
  fn receive_datagram(&self, source: Locator, bytes: Bytes) {
    if self.deleted.load(Ordering::SeqCst) {
      return;
    }
    self
      .receiver
      .lock()
      .unwrap()
      .handle_received_packet(&bytes, source);
    self.process_notifications();
  }
}

fn cache_config_from_qos(qos: &QosPolicies) -> HistoryCacheConfig {
  HistoryCacheConfig {
    history: qos.history_or_default(),
    resource_limits: qos.resource_limits.unwrap_or_default(),
    max_bytes: usize::MAX,
  }
}
