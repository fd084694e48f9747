use std::io;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex};
use uuid::Uuid;

use crate::model::*;
use crate::wal::Wal;

#[derive(Debug)]
pub enum StoreError {
    Wal(String),
    DuplicateId(Uuid),
    Closed,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
            StoreError::DuplicateId(id) => write!(f, "duplicate reservation id: {id}"),
            StoreError::Closed => write!(f, "store is closed"),
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub room: Option<String>,
    pub active_only: bool,
}

/// Precondition for a single-record update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCondition {
    /// Only touch the record while it is still active.
    Active,
    /// Only touch the record while its user is still this raw text.
    RawUser(String),
    Any,
}

impl UpdateCondition {
    fn matches(&self, current: &Reservation) -> bool {
        match self {
            UpdateCondition::Active => current.is_active(),
            UpdateCondition::RawUser(raw) => {
                matches!(&current.user, UserRef::Raw(current_raw) if current_raw == raw)
            }
            UpdateCondition::Any => true,
        }
    }
}

/// Field-level change to one reservation. Only `Some` fields are written; the
/// rest keep whatever the stored record holds at write time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationPatch {
    pub room: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub title: Option<Option<String>>,
    /// Resolved user and the raw text it came from.
    pub user: Option<(UserRef, Option<String>)>,
    pub participants_num: Option<u32>,
    pub edit_password: Option<Option<String>>,
    pub status: Option<ReservationStatus>,
    /// Stamp `updated_time` and bump `updated_count`. Data fixes leave both alone.
    pub touched_at: Option<DateTime<Utc>>,
}

impl ReservationPatch {
    pub fn applied_to(self, current: &Reservation) -> Reservation {
        let mut next = current.clone();
        if let Some(room) = self.room {
            next.room = room;
        }
        if let Some(start) = self.start_time {
            next.start_time = start;
        }
        if let Some(end) = self.end_time {
            next.end_time = end;
        }
        if let Some(title) = self.title {
            next.title = title;
        }
        if let Some((user, raw)) = self.user {
            next.user = user;
            next.user_raw = raw;
        }
        if let Some(n) = self.participants_num {
            next.participants_num = n;
        }
        if let Some(password) = self.edit_password {
            next.edit_password = password;
        }
        if let Some(status) = self.status {
            next.status = status;
        }
        if let Some(at) = self.touched_at {
            next.updated_time = Some(at);
            next.updated_count += 1;
        }
        next
    }
}

/// The reservation collection.
///
/// Atomic primitives are limited to what a document store offers: one
/// conditional single-record update and one all-or-nothing multi-record
/// insert. Nothing here spans a read and a later write.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Reservation>, StoreError>;

    /// Active reservations of `room` whose interval intersects `span`.
    async fn find_active_overlapping(
        &self,
        room: &str,
        span: Span,
    ) -> Result<Vec<Reservation>, StoreError>;

    async fn list(&self, filter: ListFilter) -> Result<Vec<Reservation>, StoreError>;

    async fn insert_many(&self, reservations: Vec<Reservation>) -> Result<(), StoreError>;

    /// Apply `patch` to the current version of record `id` if `condition` holds.
    /// Returns the post-image, or `None` when no record matched.
    async fn patch_one(
        &self,
        id: Uuid,
        patch: ReservationPatch,
        condition: UpdateCondition,
    ) -> Result<Option<Reservation>, StoreError>;
}

// ── Group-commit WAL channel ─────────────────────────────

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

/// Background task that owns the WAL and batches appends for group commit:
/// take the first append, drain whatever else is already queued, then a single
/// fsync for the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let mut pending = Some(cmd);
        let mut batch = Vec::new();
        while let Some(cmd) = pending.take() {
            match cmd {
                WalCommand::Append { event, response } => {
                    batch.push((event, response));
                    pending = rx.try_recv().ok();
                }
                other => {
                    flush_batch(&mut wal, &mut batch);
                    if handle_non_append(&mut wal, other) {
                        return;
                    }
                }
            }
        }
        flush_batch(&mut wal, &mut batch);
    }
}

fn flush_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    if batch.is_empty() {
        return;
    }
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Always flush so partially buffered bytes don't leak into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// Returns true when the writer should stop.
fn handle_non_append(wal: &mut Wal, cmd: WalCommand) -> bool {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
            false
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
            false
        }
        WalCommand::Close { response } => {
            let _ = response.send(wal.flush_sync());
            true
        }
        WalCommand::Append { .. } => false,
    }
}

/// Reservation store backed by the WAL, with the full collection held in memory
/// and a per-room interval index of active reservations.
pub struct WalStore {
    docs: DashMap<Uuid, Reservation>,
    rooms: DashMap<String, RoomIndex>,
    /// Serializes writers so WAL order matches apply order.
    write_lock: Mutex<()>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl WalStore {
    /// Replay the WAL at `path` and start the writer task. Must run inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            docs: DashMap::new(),
            rooms: DashMap::new(),
            write_lock: Mutex::new(()),
            wal_tx,
        };
        for event in &events {
            store.apply(event);
        }
        tracing::info!(
            path = %path.display(),
            events = events.len(),
            reservations = store.docs.len(),
            "reservation store opened"
        );
        Ok(store)
    }

    /// Flush and stop the WAL writer. Later writes fail with `StoreError::Closed`.
    pub async fn close(&self) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Close { response: tx })
            .await
            .map_err(|_| StoreError::Closed)?;
        rx.await
            .map_err(|_| StoreError::Closed)?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.rooms.iter().map(|e| e.value().len()).sum()
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Closed)?;
        rx.await
            .map_err(|_| StoreError::Closed)?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    async fn persist_and_apply(&self, event: Event) -> Result<(), StoreError> {
        self.wal_append(&event).await?;
        self.apply(&event);
        metrics::gauge!(crate::observability::RESERVATIONS_ACTIVE).set(self.active_count() as f64);
        Ok(())
    }

    fn index(&self, r: &Reservation) {
        if r.is_active() {
            self.rooms.entry(r.room.clone()).or_default().insert_interval(Interval {
                id: r.id,
                span: r.span(),
            });
        }
    }

    fn unindex(&self, r: &Reservation) {
        if let Some(mut idx) = self.rooms.get_mut(&r.room) {
            idx.remove_interval(r.id);
        }
    }

    /// Apply an event to the in-memory collection. Docs are written before the
    /// index so an indexed id always resolves.
    fn apply(&self, event: &Event) {
        match event {
            Event::ReservationsInserted { reservations } => {
                for r in reservations {
                    self.docs.insert(r.id, r.clone());
                    self.index(r);
                }
            }
            Event::ReservationReplaced { reservation } => {
                let previous = self.docs.insert(reservation.id, reservation.clone());
                if let Some(prev) = previous {
                    self.unindex(&prev);
                }
                self.index(reservation);
            }
        }
    }

    /// Rewrite the WAL with one insert per stored record, cancelled ones included.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut docs: Vec<Reservation> = self.docs.iter().map(|e| e.value().clone()).collect();
        docs.sort_by_key(|r| (r.created_time, r.id));
        let events = docs
            .into_iter()
            .map(|r| Event::ReservationsInserted { reservations: vec![r] })
            .collect();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Closed)?;
        rx.await
            .map_err(|_| StoreError::Closed)?
            .map_err(|e| StoreError::Wal(e.to_string()))
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

#[async_trait]
impl ReservationStore for WalStore {
    async fn get(&self, id: Uuid) -> Result<Option<Reservation>, StoreError> {
        Ok(self.docs.get(&id).map(|e| e.value().clone()))
    }

    async fn find_active_overlapping(
        &self,
        room: &str,
        span: Span,
    ) -> Result<Vec<Reservation>, StoreError> {
        let ids: Vec<Uuid> = match self.rooms.get(room) {
            Some(idx) => idx.overlapping(&span).map(|i| i.id).collect(),
            None => return Ok(Vec::new()),
        };
        Ok(ids
            .into_iter()
            .filter_map(|id| self.docs.get(&id).map(|e| e.value().clone()))
            .filter(Reservation::is_active)
            .collect())
    }

    async fn list(&self, filter: ListFilter) -> Result<Vec<Reservation>, StoreError> {
        let mut out: Vec<Reservation> = self
            .docs
            .iter()
            .filter(|e| !filter.active_only || e.value().is_active())
            .filter(|e| filter.room.as_deref().is_none_or(|room| e.value().room == room))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|r| (r.start_time, r.id));
        Ok(out)
    }

    async fn insert_many(&self, reservations: Vec<Reservation>) -> Result<(), StoreError> {
        if reservations.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        if let Some(dup) = reservations.iter().find(|r| self.docs.contains_key(&r.id)) {
            return Err(StoreError::DuplicateId(dup.id));
        }
        self.persist_and_apply(Event::ReservationsInserted { reservations })
            .await
    }

    async fn patch_one(
        &self,
        id: Uuid,
        patch: ReservationPatch,
        condition: UpdateCondition,
    ) -> Result<Option<Reservation>, StoreError> {
        let _guard = self.write_lock.lock().await;
        let next = match self.docs.get(&id) {
            Some(current) if condition.matches(&current) => patch.applied_to(&current),
            _ => return Ok(None),
        };
        self.persist_and_apply(Event::ReservationReplaced {
            reservation: next.clone(),
        })
        .await?;
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::reservation;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roombook_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn insert_and_find_overlapping() {
        let store = WalStore::open(&test_wal_path("find_overlapping.wal")).unwrap();
        let a = reservation("A101", 1_000, 2_000);
        let b = reservation("A101", 2_000, 3_000);
        let c = reservation("A102", 1_000, 2_000);
        store
            .insert_many(vec![a.clone(), b.clone(), c.clone()])
            .await
            .unwrap();

        let hits = store
            .find_active_overlapping("A101", Span::new(1_500, 2_000))
            .await
            .unwrap();
        assert_eq!(hits, vec![a]);
        assert!(store
            .find_active_overlapping("A103", Span::new(0, 10_000))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.active_count(), 3);
    }

    #[tokio::test]
    async fn duplicate_id_rejects_whole_batch() {
        let store = WalStore::open(&test_wal_path("duplicate.wal")).unwrap();
        let a = reservation("A101", 1_000, 2_000);
        store.insert_many(vec![a.clone()]).await.unwrap();

        let fresh = reservation("A102", 1_000, 2_000);
        let result = store.insert_many(vec![fresh.clone(), a]).await;
        assert!(matches!(result, Err(StoreError::DuplicateId(_))));
        assert!(store.get(fresh.id).await.unwrap().is_none());
    }

    fn cancel() -> ReservationPatch {
        ReservationPatch {
            status: Some(ReservationStatus::Cancelled),
            ..ReservationPatch::default()
        }
    }

    #[tokio::test]
    async fn conditional_patch_skips_cancelled() {
        let store = WalStore::open(&test_wal_path("conditional.wal")).unwrap();
        let a = reservation("A101", 1_000, 2_000);
        store.insert_many(vec![a.clone()]).await.unwrap();

        let cancelled = store
            .patch_one(a.id, cancel(), UpdateCondition::Active)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        assert!(store
            .find_active_overlapping("A101", a.span())
            .await
            .unwrap()
            .is_empty());

        let edit = ReservationPatch {
            title: Some(Some("late edit".into())),
            ..ReservationPatch::default()
        };
        assert!(store
            .patch_one(a.id, edit.clone(), UpdateCondition::Active)
            .await
            .unwrap()
            .is_none());
        let edited = store
            .patch_one(a.id, edit.clone(), UpdateCondition::Any)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(edited.title.as_deref(), Some("late edit"));
        assert!(!edited.is_active());

        assert!(store
            .patch_one(Uuid::new_v4(), edit, UpdateCondition::Any)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn patch_applies_to_current_record() {
        let store = WalStore::open(&test_wal_path("patch_current.wal")).unwrap();
        let a = reservation("A101", 1_000, 2_000);
        store.insert_many(vec![a.clone()]).await.unwrap();

        let now = chrono::Utc::now();
        let moved = ReservationPatch {
            start_time: DateTime::from_timestamp_millis(5_000),
            end_time: DateTime::from_timestamp_millis(6_000),
            touched_at: Some(now),
            ..ReservationPatch::default()
        };
        store.patch_one(a.id, moved, UpdateCondition::Active).await.unwrap();

        // Built against the original snapshot, but only the title is written.
        let retitle = ReservationPatch {
            title: Some(Some("renamed".into())),
            touched_at: Some(now),
            ..ReservationPatch::default()
        };
        let after = store
            .patch_one(a.id, retitle, UpdateCondition::Active)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.span(), Span::new(5_000, 6_000));
        assert_eq!(after.title.as_deref(), Some("renamed"));
        assert_eq!(after.updated_count, 2);
        assert!(store.find_active_overlapping("A101", a.span()).await.unwrap().is_empty());

        // Without `touched_at` nothing is counted.
        let relabel = ReservationPatch {
            participants_num: Some(7),
            ..ReservationPatch::default()
        };
        let after = store
            .patch_one(a.id, relabel, UpdateCondition::Any)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.updated_count, 2);
        assert_eq!(after.participants_num, 7);
    }

    #[tokio::test]
    async fn room_change_moves_index_entry() {
        let store = WalStore::open(&test_wal_path("room_move.wal")).unwrap();
        let a = reservation("A101", 1_000, 2_000);
        store.insert_many(vec![a.clone()]).await.unwrap();

        let to_a103 = ReservationPatch {
            room: Some("A103".into()),
            ..ReservationPatch::default()
        };
        let moved = store
            .patch_one(a.id, to_a103, UpdateCondition::Active)
            .await
            .unwrap()
            .unwrap();

        assert!(store.find_active_overlapping("A101", a.span()).await.unwrap().is_empty());
        assert_eq!(
            store.find_active_overlapping("A103", a.span()).await.unwrap(),
            vec![moved]
        );
    }

    #[tokio::test]
    async fn replay_restores_state() {
        let path = test_wal_path("replay.wal");
        let a = reservation("A101", 1_000, 2_000);
        let b = reservation("A102", 1_000, 2_000);
        let mut b_cancelled = b.clone();
        b_cancelled.status = ReservationStatus::Cancelled;
        {
            let store = WalStore::open(&path).unwrap();
            store.insert_many(vec![a.clone(), b.clone()]).await.unwrap();
            store
                .patch_one(b.id, cancel(), UpdateCondition::Active)
                .await
                .unwrap();
            store.close().await.unwrap();
        }

        let store = WalStore::open(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(b.id).await.unwrap(), Some(b_cancelled));
        let active = store
            .list(ListFilter { room: None, active_only: true })
            .await
            .unwrap();
        assert_eq!(active, vec![a]);
    }

    #[tokio::test]
    async fn compaction_keeps_cancelled_records() {
        let path = test_wal_path("compact.wal");
        let a = reservation("A101", 1_000, 2_000);
        let mut a_cancelled = a.clone();
        a_cancelled.status = ReservationStatus::Cancelled;
        let b = reservation("A101", 1_000, 2_000);
        {
            let store = WalStore::open(&path).unwrap();
            store.insert_many(vec![a.clone()]).await.unwrap();
            store.patch_one(a.id, cancel(), UpdateCondition::Active).await.unwrap();
            store.insert_many(vec![b.clone()]).await.unwrap();
            assert_eq!(store.wal_appends_since_compact().await, 3);
            store.compact().await.unwrap();
            assert_eq!(store.wal_appends_since_compact().await, 0);
            store.close().await.unwrap();
        }

        let store = WalStore::open(&path).unwrap();
        assert_eq!(store.get(a.id).await.unwrap(), Some(a_cancelled));
        assert_eq!(store.get(b.id).await.unwrap(), Some(b));
        assert_eq!(store.active_count(), 1);
    }

    #[tokio::test]
    async fn writes_after_close_fail() {
        let store = WalStore::open(&test_wal_path("closed.wal")).unwrap();
        store.close().await.unwrap();
        let result = store.insert_many(vec![reservation("A101", 0, 10)]).await;
        assert!(matches!(result, Err(StoreError::Closed)));
    }
}
