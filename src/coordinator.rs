//! Per-site tick loop
//!
//! The coordinator owns the Modbus transport and serializes every access
//! to it: polls, scheduled writes, background detection and commands all
//! run on its task. Consumers observe fully applied ticks through a
//! `watch` channel of [`Snapshot`]s and through registered observers.

use crate::config::{Config, Overrides};
use crate::derived::{DerivedEngine, DerivedValues, Period};
use crate::detect::AutoDetector;
use crate::error::{LambdaError, Result};
use crate::external::StateSource;
use crate::logging::{StructuredLogger, get_logger};
use crate::modbus::ModbusTransport;
use crate::offline::OfflineManager;
use crate::persistence::PersistStore;
use crate::polling::{PollingEngine, RawSnapshot};
use crate::registers::SystemShape;
use crate::retry::RobustReader;
use crate::scheduler::{ScheduleZone, Scheduler};
use crate::writer::Writer;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at, sleep_until};
use tokio_stream::wrappers::WatchStream;

mod commands;
mod types;

pub use commands::{MAX_READ_COUNT, encode_raw_value, encode_sensor_value};
pub use types::{CoordinatorCommand, CoordinatorState, EngineEvent, Observer, Snapshot};

/// Identity re-checks poll a new source this many times
const IDENTITY_ATTEMPTS: u32 = 5;
const IDENTITY_RETRY_DELAY: Duration = Duration::from_secs(2);

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Cloneable access to a running coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands_tx: mpsc::UnboundedSender<CoordinatorCommand>,
    shutdown_tx: mpsc::UnboundedSender<()>,
    snapshot_rx: watch::Receiver<Arc<Snapshot>>,
    state_rx: watch::Receiver<CoordinatorState>,
    stopping: Arc<AtomicBool>,
}

impl CoordinatorHandle {
    pub fn subscribe_snapshot(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot_rx.clone()
    }

    /// Snapshot updates as a stream, starting with the current one
    pub fn snapshot_stream(&self) -> WatchStream<Arc<Snapshot>> {
        WatchStream::new(self.snapshot_rx.clone())
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CoordinatorState> {
        self.state_rx.clone()
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.snapshot_rx.borrow().clone()
    }

    pub fn send(&self, cmd: CoordinatorCommand) -> Result<()> {
        self.commands_tx
            .send(cmd)
            .map_err(|_| LambdaError::Shutdown)
    }

    pub async fn read_register(&self, address: u16, count: u16) -> Result<Vec<u16>> {
        let (reply, rx) = oneshot::channel();
        self.send(CoordinatorCommand::ReadRegister {
            address,
            count,
            reply,
        })?;
        rx.await.map_err(|_| LambdaError::Shutdown)?
    }

    pub async fn write_register(&self, address: u16, value: i32) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(CoordinatorCommand::WriteRegister {
            address,
            value,
            reply: Some(reply),
        })?;
        rx.await.map_err(|_| LambdaError::Shutdown)?
    }

    pub async fn write_sensor(&self, sensor_id: &str, value: f64) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(CoordinatorCommand::WriteSensor {
            sensor_id: sensor_id.to_string(),
            value,
            reply: Some(reply),
        })?;
        rx.await.map_err(|_| LambdaError::Shutdown)?
    }

    pub fn reload(&self) -> Result<()> {
        self.send(CoordinatorCommand::Reload)
    }

    pub fn reset(&self, scope: Period) -> Result<()> {
        self.send(CoordinatorCommand::Reset(scope))
    }

    /// Stop the loop; Modbus calls in flight give up at their next check
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::Relaxed);
        let _ = self.shutdown_tx.send(());
    }
}

pub struct Coordinator {
    config: Config,
    shape: SystemShape,
    transport: Box<dyn ModbusTransport>,
    reader: RobustReader,
    polling: PollingEngine,
    derived: DerivedEngine,
    store: PersistStore,
    writer: Option<Writer>,
    detector: AutoDetector,
    offline: OfflineManager<Arc<Snapshot>>,
    states: Arc<dyn StateSource>,
    observers: Vec<Arc<dyn Observer>>,
    logger: StructuredLogger,

    stopping: Arc<AtomicBool>,
    state_tx: watch::Sender<CoordinatorState>,
    snapshot_tx: watch::Sender<Arc<Snapshot>>,
    commands_tx: mpsc::UnboundedSender<CoordinatorCommand>,
    commands_rx: mpsc::UnboundedReceiver<CoordinatorCommand>,
    shutdown_tx: mpsc::UnboundedSender<()>,
    shutdown_rx: mpsc::UnboundedReceiver<()>,
    reset_tx: mpsc::UnboundedSender<Period>,
    reset_rx: mpsc::UnboundedReceiver<Period>,

    sequence: u64,
    total_polls: u64,
    overrun_count: u64,
    first_poll_at: Option<Instant>,
    detection_at: Option<Instant>,
    detection_started_at: Option<Instant>,
    last_raw: Option<RawSnapshot>,
    unavailable_logged: bool,
}

impl Coordinator {
    /// Build a coordinator for one site. The persist document is loaded
    /// here so the last operating states are known before the first poll.
    pub fn new(
        config: Config,
        overrides: Overrides,
        transport: Box<dyn ModbusTransport>,
        states: Arc<dyn StateSource>,
    ) -> Result<Self> {
        config.validate()?;
        let site = &config.site;
        let logger = get_logger("coordinator").for_site(&site.id);

        let shape = site.shape(&overrides.disabled_registers)?;
        let stopping = Arc::new(AtomicBool::new(false));
        let reader = RobustReader::from_config(&config.modbus, stopping.clone());
        let polling = PollingEngine::new(&shape, &config.polling, site.slave_id, site.int32_word_order)
            .with_pv_surplus_mode(site.pv_surplus_mode);

        let store = PersistStore::new(&config.persistence.file);
        let persist = store.load_blocking();
        let derived = DerivedEngine::new(site, &shape, &config.heating_curve, overrides, persist);

        let writer = Writer::should_start(site).then(|| Writer::new(site, shape.num_hc));
        let detector = AutoDetector::new(&config.detection, site.slave_id);
        let offline = OfflineManager::new(Duration::from_secs(config.polling.offline_max_secs));

        let (state_tx, _) = watch::channel(CoordinatorState::Initializing);
        let initial = Arc::new(Snapshot {
            site_id: site.id.clone(),
            ..Snapshot::default()
        });
        let (snapshot_tx, _) = watch::channel(initial);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let (reset_tx, reset_rx) = mpsc::unbounded_channel();

        logger.info(&format!(
            "Site {}:{} slave {} with {} HP, {} boiler, {} buffer, {} solar, {} HC",
            site.host,
            site.port,
            site.slave_id,
            shape.num_hp,
            shape.num_boil,
            shape.num_buff,
            shape.num_sol,
            shape.num_hc
        ));

        Ok(Self {
            config,
            shape,
            transport,
            reader,
            polling,
            derived,
            store,
            writer,
            detector,
            offline,
            states,
            observers: Vec::new(),
            logger,
            stopping,
            state_tx,
            snapshot_tx,
            commands_tx,
            commands_rx,
            shutdown_tx,
            shutdown_rx,
            reset_tx,
            reset_rx,
            sequence: 0,
            total_polls: 0,
            overrun_count: 0,
            first_poll_at: None,
            detection_at: None,
            detection_started_at: None,
            last_raw: None,
            unavailable_logged: false,
        })
    }

    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            commands_tx: self.commands_tx.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
            snapshot_rx: self.snapshot_tx.subscribe(),
            state_rx: self.state_tx.subscribe(),
            stopping: self.stopping.clone(),
        }
    }

    pub fn add_observer(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn shape(&self) -> &SystemShape {
        &self.shape
    }

    pub fn derived(&self) -> &DerivedEngine {
        &self.derived
    }

    fn set_state(&self, state: CoordinatorState) {
        self.state_tx.send_replace(state);
    }

    fn notify(&self, event: &EngineEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }

    fn publish(&mut self, mut snapshot: Snapshot, notify: bool) -> Arc<Snapshot> {
        self.sequence += 1;
        snapshot.sequence = self.sequence;
        let snapshot = Arc::new(snapshot);
        self.snapshot_tx.send_replace(snapshot.clone());
        if notify {
            self.notify(&EngineEvent::SnapshotUpdated(snapshot.clone()));
        }
        snapshot
    }

    /// Run until shutdown
    pub async fn run(&mut self) -> Result<()> {
        self.logger.info("Starting coordinator");
        self.set_state(CoordinatorState::Connecting);
        if let Err(e) = self.ensure_connected().await {
            self.logger
                .warn(&format!("Initial connection failed, retrying on next tick: {}", e));
        }

        if self.config.detection.enabled {
            if self.config.site.counts_configured() {
                // Configured counts are verified in the loop, before the first write
                self.schedule_detection(Duration::ZERO);
            } else {
                self.run_detection().await;
            }
        }

        if self
            .derived
            .check_identities(None, self.states.as_ref(), IDENTITY_ATTEMPTS, IDENTITY_RETRY_DELAY)
            .await
        {
            self.persist().await;
        }

        let zone = ScheduleZone::parse(&self.config.timezone).unwrap_or_else(|e| {
            self.logger
                .warn(&format!("{}; period resets use local time", e));
            ScheduleZone::Local
        });
        let scheduler = Scheduler::new(zone, self.reset_tx.clone(), &self.config.site.id);
        let scheduler_task: JoinHandle<()> = tokio::spawn(scheduler.run());

        let poll_period = Duration::from_secs(self.config.site.update_interval.max(1));
        let mut poll_interval = interval_at(Instant::now() + self.jitter(), poll_period);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let write_period = Duration::from_secs(self.config.site.write_interval.max(1));
        let mut write_interval = interval_at(Instant::now() + write_period, write_period);
        write_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    let started = Instant::now();
                    self.tick().await;
                    self.total_polls = self.total_polls.saturating_add(1);
                    if started.elapsed() > poll_period {
                        self.overrun_count = self.overrun_count.saturating_add(1);
                        self.logger.warn(&format!(
                            "Poll cycle took {:.1}s, longer than the {}s interval ({} overruns)",
                            started.elapsed().as_secs_f64(),
                            poll_period.as_secs(),
                            self.overrun_count
                        ));
                    }
                }
                _ = write_interval.tick(), if self.writer.is_some() => {
                    self.write_tick().await;
                }
                Some(scope) = self.reset_rx.recv() => {
                    self.apply_reset(scope).await;
                }
                Some(cmd) = self.commands_rx.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = wait_until(self.detection_at), if self.detection_at.is_some() => {
                    self.detection_at = None;
                    self.run_detection().await;
                }
                _ = self.shutdown_rx.recv() => {
                    self.logger.info("Shutdown requested");
                    break;
                }
            }
        }

        self.stopping.store(true, Ordering::Relaxed);
        self.set_state(CoordinatorState::ShuttingDown);
        scheduler_task.abort();
        self.transport.close().await;
        self.logger.info(&format!(
            "Coordinator stopped after {} polls",
            self.total_polls
        ));
        Ok(())
    }

    fn jitter(&self) -> Duration {
        let secs = self.config.polling.jitter_secs;
        if secs == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(rand::rng().random_range(0.0..=secs as f64))
    }

    fn schedule_detection(&mut self, delay: Duration) {
        self.detection_at = Some(Instant::now() + delay);
        self.logger.debug(&format!(
            "Module detection scheduled in {}s",
            delay.as_secs()
        ));
    }

    async fn run_detection(&mut self) {
        self.detection_started_at.get_or_insert_with(Instant::now);
        let result = self
            .detector
            .detect(self.transport.as_mut(), &mut self.reader)
            .await;
        match result {
            Ok(counts) => {
                if counts.apply(&mut self.shape) {
                    self.logger.info(&format!(
                        "Module counts changed: {} HP, {} boiler, {} buffer, {} solar, {} HC",
                        self.shape.num_hp,
                        self.shape.num_boil,
                        self.shape.num_buff,
                        self.shape.num_sol,
                        self.shape.num_hc
                    ));
                    self.apply_shape();
                }
            }
            Err(LambdaError::Shutdown) => {}
            Err(e) => self
                .logger
                .warn(&format!("Module detection failed, keeping current counts: {}", e)),
        }
    }

    fn apply_shape(&mut self) {
        self.polling.replan(&self.shape);
        self.derived.set_shape(&self.shape);
        if let Some(writer) = self.writer.as_mut() {
            writer.set_num_hc(self.shape.num_hc);
        }
    }

    pub(crate) async fn ensure_connected(&mut self) -> Result<()> {
        if self.transport.is_connected() {
            return Ok(());
        }
        self.set_state(CoordinatorState::Connecting);
        self.transport.connect().await?;
        self.logger.info(&format!(
            "Connected to {}:{}",
            self.config.site.host, self.config.site.port
        ));
        Ok(())
    }

    /// Probe register 0 every `health_check_every` ticks; a silent device
    /// gets a fresh connection before the poll
    async fn health_check(&mut self) -> Result<()> {
        let every = u64::from(self.config.modbus.health_check_every);
        if every == 0 || self.total_polls == 0 || self.total_polls % every != 0 {
            return Ok(());
        }
        let deadline = self.reader.timeout_for(0);
        let slave_id = self.config.site.slave_id;
        match self
            .transport
            .read_holding_registers(slave_id, 0, 1, deadline)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_protocol() => Ok(()),
            Err(e) => {
                self.logger
                    .warn(&format!("Health check failed, reconnecting: {}", e));
                self.transport.close().await;
                self.ensure_connected().await
            }
        }
    }

    async fn persist(&mut self) {
        if let Err(e) = self.store.save(self.derived.persist()).await {
            self.logger.warn(&format!("Persisting counters failed: {}", e));
        }
    }

    async fn poll_once(&mut self) -> Result<Arc<Snapshot>> {
        self.ensure_connected().await?;
        self.health_check().await?;

        self.set_state(CoordinatorState::Reading);
        let raw = self
            .polling
            .poll(self.transport.as_mut(), &mut self.reader)
            .await?;
        if self.reader.is_stopping() {
            return Err(LambdaError::Shutdown);
        }

        self.set_state(CoordinatorState::Processing);
        let readings = self.derived.gather_readings(&raw, self.states.as_ref()).await;
        let derived = self.derived.process(&raw, &readings);

        self.set_state(CoordinatorState::Persisting);
        self.persist().await;

        let snapshot = Snapshot {
            site_id: self.config.site.id.clone(),
            sequence: 0,
            timestamp: raw.timestamp,
            raw: raw.clone(),
            derived,
            stale: false,
            available: true,
        };
        self.last_raw = Some(raw);
        Ok(self.publish(snapshot, true))
    }

    async fn tick(&mut self) {
        match self.poll_once().await {
            Ok(snapshot) => {
                if self.offline.is_offline() {
                    self.logger.info("Heat pump reachable again");
                }
                self.offline.update(snapshot);
                self.unavailable_logged = false;
                self.first_poll_at.get_or_insert_with(Instant::now);
                self.set_state(CoordinatorState::Sleeping);
            }
            Err(LambdaError::Shutdown) => {}
            Err(e) => self.on_poll_failure(e).await,
        }
    }

    async fn on_poll_failure(&mut self, err: LambdaError) {
        if err.is_connection() {
            self.transport.close().await;
        }
        match self.offline.offline_data() {
            Some(last) => {
                self.logger.warn(&format!(
                    "Poll failed, serving last data ({:.0}s offline): {}",
                    self.offline
                        .offline_duration()
                        .unwrap_or_default()
                        .as_secs_f64(),
                    err
                ));
                let stale = Snapshot {
                    stale: true,
                    ..(*last).clone()
                };
                self.publish(stale, false);
                self.set_state(CoordinatorState::Disconnected);
            }
            None => {
                if !self.unavailable_logged {
                    self.logger.error(&format!(
                        "Heat pump unavailable after {}s offline: {}",
                        self.config.polling.offline_max_secs, err
                    ));
                    self.unavailable_logged = true;
                }
                let unavailable = Snapshot {
                    site_id: self.config.site.id.clone(),
                    available: false,
                    ..Snapshot::default()
                };
                self.publish(unavailable, false);
                self.set_state(CoordinatorState::Unavailable);
            }
        }
    }

    /// Writes start `writer_grace_secs` after the first detection started,
    /// or after the first poll when detection is off
    fn writer_ready(&self) -> bool {
        let grace = Duration::from_secs(self.config.detection.writer_grace_secs);
        if self.first_poll_at.is_none() {
            return false;
        }
        let since = if self.config.detection.enabled {
            self.detection_started_at
        } else {
            self.first_poll_at
        };
        since.is_some_and(|start| start.elapsed() >= grace)
    }

    async fn write_tick(&mut self) {
        if !self.writer_ready() {
            return;
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        match writer
            .run_once(self.transport.as_mut(), &mut self.reader, self.states.as_ref())
            .await
        {
            Ok(n) => self.logger.trace(&format!("Write round wrote {} registers", n)),
            Err(LambdaError::Shutdown) => {}
            Err(e) => {
                self.logger.warn(&format!("Write round aborted: {}", e));
                self.transport.close().await;
            }
        }
    }

    pub(crate) async fn reload(&mut self) {
        self.logger.info("Reloading overrides");
        let overrides = match self.config.site.overrides_file.as_deref() {
            Some(path) => Overrides::from_file(path),
            None => Overrides::default(),
        };
        self.shape.disabled_registers = overrides.disabled_registers.clone();
        self.polling.replan(&self.shape);
        self.derived.reload(overrides);
        self.derived
            .check_identities(
                self.last_raw.as_ref(),
                self.states.as_ref(),
                IDENTITY_ATTEMPTS,
                IDENTITY_RETRY_DELAY,
            )
            .await;
        self.persist().await;
        if self.config.detection.enabled {
            let delay = Duration::from_secs(self.config.detection.background_delay_secs);
            self.schedule_detection(delay);
        }
    }

    pub(crate) async fn apply_reset(&mut self, scope: Period) {
        self.derived.reset(scope);
        self.persist().await;
        self.logger.debug(&format!("Period reset: {}", scope));
        self.notify(&EngineEvent::PeriodReset {
            scope,
            site_id: self.config.site.id.clone(),
        });

        let current = self.snapshot_tx.borrow().clone();
        if current.available && !current.stale {
            let refreshed = Snapshot {
                derived: self.derived.values(),
                ..(*current).clone()
            };
            self.publish(refreshed, true);
        }
    }

    /// Derived values as of now, without polling
    pub fn derived_values(&self) -> DerivedValues {
        self.derived.values()
    }
}
