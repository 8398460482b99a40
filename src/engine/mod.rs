mod admission;
mod equipment;
mod error;
mod slots;

pub use error::EngineError;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::config::FacilityConfig;
use crate::model::*;
use crate::observability::*;
use crate::wal::Wal;

pub type SharedDay = Arc<RwLock<DayState>>;
pub type SharedSession = Arc<RwLock<SessionState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    /// Events that commit together: all flushed in one batch, or none acknowledged.
    Append {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first command arrives.
/// 2. Drain every Append already queued behind it (the batch window).
/// 3. Single flush_sync for the whole batch, then answer every sender.
/// 4. A non-append command found while draining runs after the batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { events, response } = cmd else {
            handle_command(&mut wal, cmd);
            continue;
        };

        let mut batch = vec![(events, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { events, response } => batch.push((events, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_command(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    let size: usize = batch.iter().map(|(events, _)| events.len()).sum();
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(size as f64);
    let flush_start = Instant::now();

    let mut result = Ok(());
    'write: for (events, _) in &batch {
        for event in events {
            if let Err(e) = wal.append_buffered(event) {
                result = Err(e);
                break 'write;
            }
        }
    }
    // Always flush, even after an append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_command(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Append { events, response } => commit_batch(wal, vec![(events, response)]),
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
    }
}

/// The reservation store and both allocators.
///
/// Durable state is the WAL; the tables below are its replayed image. Each
/// capacity bucket (a date for slots, a `(date, start)` for equipment) has its
/// own lock, held across count, WAL append and apply, so admission never
/// overshoots a ceiling.
pub struct Engine {
    pub(super) config: FacilityConfig,
    /// Slot table. Records are immutable once booked.
    pub(super) slots: DashMap<Ulid, SlotRecord>,
    /// Equipment reservation table.
    pub(super) reservations: DashMap<Ulid, EquipmentRecord>,
    /// Owner → slot ids in booking order.
    pub(super) user_slots: DashMap<String, Vec<Ulid>>,
    pub(super) days: DashMap<String, SharedDay>,
    pub(super) sessions: DashMap<SessionKey, SharedSession>,
    /// Mutations hold this shared; compaction holds it exclusively so its
    /// snapshot can't miss an in-flight commit. Always taken before a bucket lock.
    pub(super) commit_gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf, config: FacilityConfig) -> io::Result<Self> {
        config
            .validate()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

        let (events, discarded) = Wal::recover(&wal_path)?;
        if discarded > 0 {
            warn!(
                "discarded {discarded} unreadable bytes at the tail of {}",
                wal_path.display()
            );
        }
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            config,
            slots: DashMap::new(),
            reservations: DashMap::new(),
            user_slots: DashMap::new(),
            days: DashMap::new(),
            sessions: DashMap::new(),
            commit_gate: RwLock::new(()),
            wal_tx,
        };

        // Buckets are built unshared and wrapped once replay is done.
        let mut days: HashMap<String, DayState> = HashMap::new();
        let mut sessions: HashMap<SessionKey, SessionState> = HashMap::new();

        for event in &events {
            match event {
                Event::SlotBooked(r) => {
                    let day = days
                        .entry(r.date.clone())
                        .or_insert_with(|| DayState::new(r.date.clone()));
                    engine.apply_slot_event(day, event);
                }
                Event::SlotDeleted { id } => {
                    let date = engine.slots.get(id).map(|r| r.date.clone());
                    if let Some(date) = date
                        && let Some(day) = days.get_mut(&date)
                    {
                        engine.apply_slot_event(day, event);
                    }
                }
                Event::EquipmentBooked(r) => {
                    let session = sessions.entry(r.session_key()).or_default();
                    engine.apply_equipment_event(session, event);
                }
                Event::EquipmentReleased { id } => {
                    let key = engine.reservations.get(id).map(|r| r.session_key());
                    if let Some(key) = key
                        && let Some(session) = sessions.get_mut(&key)
                    {
                        engine.apply_equipment_event(session, event);
                    }
                }
            }
        }

        // A slot deletion is one commit with its releases; if a failed flush
        // still left the deletion on disk, its reservations go with it here.
        let orphans: Vec<(Ulid, SessionKey)> = engine
            .reservations
            .iter()
            .filter(|r| !engine.slots.contains_key(&r.slot_id))
            .map(|r| (r.id, r.session_key()))
            .collect();
        for (id, key) in &orphans {
            if let Some(session) = sessions.get_mut(key) {
                engine.apply_equipment_event(session, &Event::EquipmentReleased { id: *id });
            }
        }
        if !orphans.is_empty() {
            warn!("released {} reservations whose slot was deleted", orphans.len());
        }

        for (date, day) in days {
            engine.days.insert(date, Arc::new(RwLock::new(day)));
        }
        for (key, session) in sessions {
            engine.sessions.insert(key, Arc::new(RwLock::new(session)));
        }

        info!(
            "replayed {} events from {}: {} slots, {} equipment reservations",
            events.len(),
            wal_path.display(),
            engine.slots.len(),
            engine.reservations.len()
        );
        Ok(engine)
    }

    pub fn config(&self) -> &FacilityConfig {
        &self.config
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_commit(std::slice::from_ref(event)).await
    }

    /// Write several events as one commit. Either all are durable or the
    /// caller gets an error and must apply none of them.
    pub(super) async fn wal_commit(&self, events: &[Event]) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                events: events.to_vec(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::StoreUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StoreUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| {
                error!("WAL append failed: {e}");
                EngineError::StoreUnavailable(e.to_string())
            })
    }

    pub(super) fn day(&self, date: &str) -> SharedDay {
        if let Some(day) = self.days.get(date) {
            return day.value().clone();
        }
        self.days
            .entry(date.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(DayState::new(date.to_string()))))
            .value()
            .clone()
    }

    pub(super) fn session(&self, key: &SessionKey) -> SharedSession {
        if let Some(session) = self.sessions.get(key) {
            return session.value().clone();
        }
        self.sessions
            .entry(key.clone())
            .or_default()
            .value()
            .clone()
    }

    /// Apply a slot event to its day (caller holds the day's lock) and the tables.
    pub(super) fn apply_slot_event(&self, day: &mut DayState, event: &Event) {
        match event {
            Event::SlotBooked(r) => {
                day.insert(Occupancy {
                    id: r.id,
                    span: r.span,
                });
                self.slots.insert(r.id, r.clone());
                self.user_slots.entry(r.user_id.clone()).or_default().push(r.id);
            }
            Event::SlotDeleted { id } => {
                day.remove(*id);
                if let Some((_, r)) = self.slots.remove(id)
                    && let Some(mut ids) = self.user_slots.get_mut(&r.user_id)
                {
                    ids.retain(|s| s != id);
                }
            }
            Event::EquipmentBooked(_) | Event::EquipmentReleased { .. } => {}
        }
    }

    /// Apply an equipment event to its session (caller holds the session's lock).
    pub(super) fn apply_equipment_event(&self, session: &mut SessionState, event: &Event) {
        match event {
            Event::EquipmentBooked(r) => {
                session.insert(r.clone());
                self.reservations.insert(r.id, r.clone());
            }
            Event::EquipmentReleased { id } => {
                session.remove(*id);
                self.reservations.remove(id);
            }
            Event::SlotBooked(_) | Event::SlotDeleted { .. } => {}
        }
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut slots: Vec<SlotRecord> = self.slots.iter().map(|e| e.value().clone()).collect();
        slots.sort_by_key(|r| r.id);
        let mut reservations: Vec<EquipmentRecord> =
            self.reservations.iter().map(|e| e.value().clone()).collect();
        reservations.sort_by_key(|r| r.id);

        let events: Vec<Event> = slots
            .into_iter()
            .map(Event::SlotBooked)
            .chain(reservations.into_iter().map(Event::EquipmentBooked))
            .collect();
        let kept = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::StoreUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StoreUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;

        self.prune_empty_buckets();
        info!("compacted WAL to {kept} events");
        Ok(())
    }

    /// Drop buckets and owner entries that no longer hold anything. Caller
    /// holds `commit_gate` exclusively, so no mutation is inside a bucket.
    fn prune_empty_buckets(&self) {
        self.days.retain(|_, day| {
            day.try_read()
                .map_or(true, |d| !d.occupancy.is_empty())
        });
        self.sessions.retain(|_, session| {
            session
                .try_read()
                .map_or(true, |s| !s.reservations.is_empty())
        });
        self.user_slots.retain(|_, ids| !ids.is_empty());
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Count and time one admission decision.
pub(super) fn record_admission<T>(
    resource: &'static str,
    result: &Result<T, EngineError>,
    started: Instant,
) {
    let outcome = match result {
        Ok(_) => OUTCOME_ACCEPTED,
        Err(e) => e.kind(),
    };
    metrics::counter!(ADMISSIONS_TOTAL, "resource" => resource, "outcome" => outcome).increment(1);
    metrics::histogram!(ADMISSION_DURATION_SECONDS, "resource" => resource)
        .record(started.elapsed().as_secs_f64());
}

pub(super) fn record_deletion(resource: &'static str, result: &Result<(), EngineError>) {
    let outcome = match result {
        Ok(()) => OUTCOME_ACCEPTED,
        Err(e) => e.kind(),
    };
    metrics::counter!(DELETIONS_TOTAL, "resource" => resource, "outcome" => outcome).increment(1);
}
