use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::warn;

use crate::model::*;
use crate::wal::Wal;

use super::store::{snapshot, RoomTable, Store};
use super::EngineError;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        unit: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        units: Vec<Vec<Event>>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { unit, response } => {
                let mut batch = vec![(unit, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { unit, response }) => batch.push((unit, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (unit, _) in batch {
        if let Err(e) = wal.append_buffered(unit) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { units, response } => {
            let result = Wal::write_compact_file(wal.path(), &units)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        // Appends never reach here; the loop batches them.
        WalCommand::Append { response, .. } => {
            let _ = response.send(Err(io::Error::other("append routed outside batch")));
        }
    }
}

/// Durable store: the in-memory room table, rebuilt from and appended to a WAL.
pub struct WalStore {
    table: RoomTable,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Serialises room creation so two creators can't both pass the existence check.
    catalog: Mutex<()>,
}

impl WalStore {
    /// Replay the WAL at `path` and start the group-commit writer.
    /// Must be called inside a tokio runtime.
    pub async fn open(path: &Path) -> io::Result<Self> {
        let units = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let table = RoomTable::new();
        for unit in &units {
            if let Err(e) = table.replay(unit).await {
                warn!("skipping unreplayable WAL unit: {e}");
            }
        }

        Ok(Self {
            table,
            wal_tx,
            catalog: Mutex::new(()),
        })
    }

    async fn wal_append(&self, unit: Vec<Event>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { unit, response: tx })
            .await
            .map_err(|_| EngineError::Persistence("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Persistence("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }
}

#[async_trait]
impl Store for WalStore {
    async fn insert_room(&self, room: Room) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        self.table.check_new_room(&room)?;
        self.wal_append(vec![Event::RoomCreated { room: room.clone() }])
            .await?;
        self.table.add_room(room);
        Ok(())
    }

    async fn get_room(&self, id: RoomId) -> Result<Option<Room>, EngineError> {
        Ok(self.table.get_room(id).await)
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, EngineError> {
        Ok(self.table.list_rooms().await)
    }

    async fn restrictions_overlapping(
        &self,
        room_id: RoomId,
        span: &Span,
    ) -> Result<Vec<RoomRestriction>, EngineError> {
        self.table.restrictions_overlapping(room_id, span).await
    }

    async fn find_restriction(
        &self,
        id: RestrictionId,
    ) -> Result<Option<RoomRestriction>, EngineError> {
        Ok(self.table.find_restriction(id).await)
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, EngineError> {
        Ok(self.table.get_reservation(id).await)
    }

    async fn list_reservations(&self) -> Result<Vec<Reservation>, EngineError> {
        Ok(self.table.list_reservations().await)
    }

    /// Stage, log, then publish. Nothing becomes visible unless the WAL write
    /// succeeded.
    async fn commit(&self, room_id: RoomId, events: Vec<Event>) -> Result<(), EngineError> {
        let shared = self.table.room_state(room_id)?;
        let mut guard = shared.write().await;
        let staged = self.table.stage(&guard, &events, |_| Ok(()))?;
        self.wal_append(events.clone()).await?;
        self.table.publish(&mut guard, staged, &events);
        Ok(())
    }

    /// Rewrite the WAL with only the units needed to recreate the current state.
    async fn compact(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        // Rooms stay write-locked until the compacted file is in place, so no
        // commit can land in the old WAL after the snapshot was taken.
        let guards = self.table.lock_all().await;
        let units = snapshot(guards.iter().map(|g| &**g));
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { units, response: tx })
            .await
            .map_err(|_| EngineError::Persistence("WAL writer shut down".into()))?;
        let result = rx.await;
        drop(guards);
        result
            .map_err(|_| EngineError::Persistence("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }

    async fn appends_since_compact(&self) -> u64 {
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
