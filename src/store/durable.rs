use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::locks::{KeyGuard, KeyedLocks};
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

use super::{InMemoryStore, ReservationStore, StoreError};

// ── Group-commit log channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
    Close {
        response: oneshot::Sender<io::Result<()>>,
    },
}

/// Background task that owns the log file and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain all immediately available Appends (the batch window).
/// 3. Single flush_sync for the whole batch, then answer every sender.
///
/// Exits after Close or once every sender is gone.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let pending = match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut pending = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            pending = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }
                commit_batch(&mut wal, &mut batch);
                pending
            }
            other => Some(other),
        };
        if let Some(cmd) = pending
            && !handle_non_append(&mut wal, cmd) {
                return;
            }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("log flush of {} records failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so half-buffered bytes don't leak into
    // the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

/// Returns false when the writer should stop.
fn handle_non_append(wal: &mut Wal, cmd: WalCommand) -> bool {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
            true
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
            true
        }
        WalCommand::Close { response } => {
            let _ = response.send(wal.flush_sync());
            false
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

fn writer_gone() -> StoreError {
    StoreError::Io("log writer shut down".into())
}

/// Reservation store made durable by an append-only log.
///
/// State lives in an [`InMemoryStore`]; every write is checked, appended to the
/// log, and only then applied, all while holding the affected slot locks.
pub struct WalStore {
    memory: InMemoryStore,
    locks: KeyedLocks<SlotKey>,
    /// Writes hold it shared; compaction and close hold it exclusively so no
    /// append can land between the snapshot and the file swap.
    gate: RwLock<()>,
    wal_tx: mpsc::Sender<WalCommand>,
    path: PathBuf,
}

impl WalStore {
    /// Replay the log at `path` and start the background writer.
    /// Must be called from within a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let memory = InMemoryStore::new();
        for event in &events {
            memory.apply(event);
        }
        info!(
            "replayed {} log records from {}: {} reservations",
            events.len(),
            path.display(),
            memory.len()
        );

        Ok(Self {
            memory,
            locks: KeyedLocks::new(),
            gate: RwLock::new(()),
            wal_tx,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| writer_gone())?;
        rx.await
            .map_err(|_| StoreError::Io("log writer dropped response".into()))?
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    /// Log first, then apply. A failed append leaves memory untouched.
    async fn persist_and_apply(&self, event: Event) -> Result<(), StoreError> {
        self.wal_append(&event).await?;
        self.memory.apply(&event);
        Ok(())
    }

    /// Lock the slot currently holding `id` (plus `extra`), retrying if the
    /// record moved while we waited.
    async fn lock_current(
        &self,
        id: Ulid,
        extra: Option<SlotKey>,
    ) -> Result<(SlotKey, Vec<KeyGuard<SlotKey>>), StoreError> {
        loop {
            let slot = self.memory.slot_of(&id).ok_or(StoreError::NotFound(id))?;
            let mut keys = vec![slot];
            keys.extend(extra);
            let guards = self.locks.lock_all(keys).await;
            if self.memory.slot_of(&id) == Some(slot) {
                return Ok((slot, guards));
            }
        }
    }

    /// Rewrite the log as one insert per live reservation.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _exclusive = self.gate.write().await;
        let events: Vec<Event> = self
            .memory
            .all()
            .into_iter()
            .map(|reservation| Event::ReservationInserted { reservation })
            .collect();
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| writer_gone())?;
        rx.await
            .map_err(|_| StoreError::Io("log writer dropped response".into()))?
            .map_err(|e| StoreError::Io(e.to_string()))?;

        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!("compacted {} to {count} records", self.path.display());
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
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

    /// Flush and stop the writer. Later writes fail with a storage error;
    /// reads keep working from memory.
    pub async fn close(&self) -> Result<(), StoreError> {
        let _exclusive = self.gate.write().await;
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Close { response: tx })
            .await
            .map_err(|_| writer_gone())?;
        rx.await
            .map_err(|_| writer_gone())?
            .map_err(|e| StoreError::Io(e.to_string()))?;
        info!("closed {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl ReservationStore for WalStore {
    async fn find_by_space_and_day(
        &self,
        space_id: Ulid,
        day: Day,
        status_not_in: &[ReservationStatus],
    ) -> Result<Vec<Reservation>, StoreError> {
        self.memory
            .find_by_space_and_day(space_id, day, status_not_in)
            .await
    }

    async fn find_by_id(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        Ok(self.memory.get(&id))
    }

    async fn find_all(&self, owner_id: Option<Ulid>) -> Result<Vec<Reservation>, StoreError> {
        self.memory.find_all(owner_id).await
    }

    async fn insert(&self, reservation: Reservation) -> Result<Reservation, StoreError> {
        let _shared = self.gate.read().await;
        let _slot = self.locks.lock(reservation.slot()).await;
        if self.memory.slot_of(&reservation.id).is_some() {
            return Err(StoreError::AlreadyExists(reservation.id));
        }
        self.memory.check(&reservation)?;
        self.persist_and_apply(Event::ReservationInserted {
            reservation: reservation.clone(),
        })
        .await?;
        Ok(reservation)
    }

    async fn update_by_id(&self, reservation: Reservation) -> Result<Reservation, StoreError> {
        let _shared = self.gate.read().await;
        let (_, _guards) = self
            .lock_current(reservation.id, Some(reservation.slot()))
            .await?;
        self.memory.check(&reservation)?;
        self.persist_and_apply(Event::ReservationUpdated {
            reservation: reservation.clone(),
        })
        .await?;
        Ok(reservation)
    }

    async fn delete_by_id(&self, id: Ulid) -> Result<Reservation, StoreError> {
        let _shared = self.gate.read().await;
        let ((space_id, day), _guards) = self.lock_current(id, None).await?;
        let existing = self.memory.get(&id).ok_or(StoreError::NotFound(id))?;
        self.persist_and_apply(Event::ReservationDeleted { id, space_id, day })
            .await?;
        Ok(existing)
    }
}
