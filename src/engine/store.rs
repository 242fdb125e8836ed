use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

/// Persistence capability the engine depends on.
///
/// `commit` is the atomic unit of work: either every event lands or none does,
/// and the room's integrity rules hold afterwards.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_room(&self, room: Room) -> Result<(), EngineError>;

    async fn get_room(&self, id: RoomId) -> Result<Option<Room>, EngineError>;

    /// All rooms, ascending by id.
    async fn list_rooms(&self) -> Result<Vec<Room>, EngineError>;

    async fn restrictions_overlapping(
        &self,
        room_id: RoomId,
        span: &Span,
    ) -> Result<Vec<RoomRestriction>, EngineError>;

    async fn find_restriction(
        &self,
        id: RestrictionId,
    ) -> Result<Option<RoomRestriction>, EngineError>;

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, EngineError>;

    async fn list_reservations(&self) -> Result<Vec<Reservation>, EngineError>;

    async fn commit(&self, room_id: RoomId, events: Vec<Event>) -> Result<(), EngineError>;

    /// Rewrite durable state to its minimal form. No-op for volatile stores.
    async fn compact(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn appends_since_compact(&self) -> u64 {
        0
    }
}

/// In-memory room table shared by every store variant.
pub struct RoomTable {
    rooms: DashMap<RoomId, SharedRoomState>,
    reservation_to_room: DashMap<ReservationId, RoomId>,
    restriction_to_room: DashMap<RestrictionId, RoomId>,
}

impl Default for RoomTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomTable {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            reservation_to_room: DashMap::new(),
            restriction_to_room: DashMap::new(),
        }
    }

    // ── Rooms ────────────────────────────────────────────────

    pub fn room_state(&self, id: RoomId) -> Result<SharedRoomState, EngineError> {
        self.rooms
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::NotFound(format!("room {id}")))
    }

    pub fn check_new_room(&self, room: &Room) -> Result<(), EngineError> {
        if self.rooms.contains_key(&room.id) {
            return Err(EngineError::AlreadyExists(format!("room {}", room.id)));
        }
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        Ok(())
    }

    /// Check and insert in one step, under the shard lock for `room.id`.
    pub fn try_add_room(&self, room: Room) -> Result<(), EngineError> {
        if !self.rooms.contains_key(&room.id) && self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        match self.rooms.entry(room.id) {
            Entry::Occupied(_) => Err(EngineError::AlreadyExists(format!("room {}", room.id))),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(RwLock::new(RoomState::new(room))));
                Ok(())
            }
        }
    }

    pub fn add_room(&self, room: Room) {
        self.rooms
            .insert(room.id, Arc::new(RwLock::new(RoomState::new(room))));
    }

    pub async fn get_room(&self, id: RoomId) -> Option<Room> {
        let shared = self.rooms.get(&id).map(|e| e.value().clone())?;
        let guard = shared.read().await;
        Some(guard.room.clone())
    }

    pub async fn list_rooms(&self) -> Vec<Room> {
        let mut rooms = Vec::with_capacity(self.rooms.len());
        for shared in self.shared_states() {
            rooms.push(shared.read().await.room.clone());
        }
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    // ── Restrictions & reservations ──────────────────────────

    pub async fn restrictions_overlapping(
        &self,
        room_id: RoomId,
        span: &Span,
    ) -> Result<Vec<RoomRestriction>, EngineError> {
        let shared = self.room_state(room_id)?;
        let guard = shared.read().await;
        Ok(guard.overlapping(span).cloned().collect())
    }

    pub async fn find_restriction(&self, id: RestrictionId) -> Option<RoomRestriction> {
        let room_id = self.restriction_to_room.get(&id).map(|e| *e.value())?;
        let shared = self.room_state(room_id).ok()?;
        let guard = shared.read().await;
        guard.restriction(id).cloned()
    }

    pub async fn get_reservation(&self, id: ReservationId) -> Option<Reservation> {
        let room_id = self.reservation_to_room.get(&id).map(|e| *e.value())?;
        let shared = self.room_state(room_id).ok()?;
        let guard = shared.read().await;
        guard.reservations.get(&id).cloned()
    }

    pub async fn list_reservations(&self) -> Vec<Reservation> {
        let mut out = Vec::new();
        for shared in self.shared_states() {
            let guard = shared.read().await;
            out.extend(guard.reservations.values().cloned());
        }
        out
    }

    /// Snapshot of the Arcs so no DashMap shard lock is held across an await.
    fn shared_states(&self) -> Vec<SharedRoomState> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    // ── Units of work ────────────────────────────────────────

    /// Apply `events` to a copy of `state`. `hook` runs before each event and may
    /// veto it. Returns the staged state only if every event applied and the
    /// room is still consistent.
    pub fn stage(
        &self,
        state: &RoomState,
        events: &[Event],
        mut hook: impl FnMut(&Event) -> Result<(), EngineError>,
    ) -> Result<RoomState, EngineError> {
        let mut staged = state.clone();
        let mut touched = HashSet::new();
        for event in events {
            if event.room_id() != staged.room.id {
                return Err(EngineError::Persistence(format!(
                    "event for room {} in a unit of work for room {}",
                    event.room_id(),
                    staged.room.id
                )));
            }
            hook(event)?;
            apply_event(&mut staged, event, &mut touched)?;
        }
        check_integrity(&staged, &touched)?;
        Ok(staged)
    }

    /// Swap a staged state in and keep the id indexes in step.
    pub fn publish(&self, current: &mut RoomState, staged: RoomState, events: &[Event]) {
        *current = staged;
        for event in events {
            self.index_event(event);
        }
    }

    fn index_event(&self, event: &Event) {
        match event {
            Event::ReservationInserted { reservation } => {
                self.reservation_to_room
                    .insert(reservation.id, reservation.room_id);
            }
            Event::RestrictionInserted { restriction } => {
                self.restriction_to_room
                    .insert(restriction.id, restriction.room_id);
            }
            Event::ReservationDeleted { id, .. } => {
                self.reservation_to_room.remove(id);
            }
            Event::RestrictionDeleted { id, .. } => {
                self.restriction_to_room.remove(id);
            }
            Event::RoomCreated { .. }
            | Event::GuestUpdated { .. }
            | Event::ReservationProcessed { .. } => {}
        }
    }

    /// Re-apply one recovered unit of work.
    pub async fn replay(&self, events: &[Event]) -> Result<(), EngineError> {
        let Some(first) = events.first() else {
            return Ok(());
        };
        if let Event::RoomCreated { room } = first {
            return self.try_add_room(room.clone());
        }
        let shared = self.room_state(first.room_id())?;
        let mut guard = shared.write().await;
        let staged = self.stage(&guard, events, |_| Ok(()))?;
        self.publish(&mut guard, staged, events);
        Ok(())
    }

    /// Write-lock every room in id order. Holding the guards keeps commits out
    /// while a snapshot is taken and persisted.
    pub async fn lock_all(&self) -> Vec<OwnedRwLockWriteGuard<RoomState>> {
        let mut states: Vec<(RoomId, SharedRoomState)> = self
            .rooms
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        states.sort_by_key(|(id, _)| *id);
        let mut guards = Vec::with_capacity(states.len());
        for (_, shared) in states {
            guards.push(shared.write_owned().await);
        }
        guards
    }
}

/// Minimal list of units that recreates the given rooms.
pub fn snapshot<'a>(states: impl IntoIterator<Item = &'a RoomState>) -> Vec<Vec<Event>> {
    let mut units = Vec::new();
    for rs in states {
        units.push(vec![Event::RoomCreated {
            room: rs.room.clone(),
        }]);
        for restriction in &rs.restrictions {
            let mut unit = Vec::with_capacity(2);
            if let Some(reservation_id) = restriction.reservation_id()
                && let Some(reservation) = rs.reservations.get(&reservation_id)
            {
                unit.push(Event::ReservationInserted {
                    reservation: reservation.clone(),
                });
            }
            unit.push(Event::RestrictionInserted {
                restriction: restriction.clone(),
            });
            units.push(unit);
        }
    }
    units
}

fn apply_event(
    rs: &mut RoomState,
    event: &Event,
    touched: &mut HashSet<ReservationId>,
) -> Result<(), EngineError> {
    match event {
        Event::RoomCreated { room } => {
            return Err(EngineError::Persistence(format!(
                "room {} cannot be created inside a unit of work",
                room.id
            )));
        }
        Event::ReservationInserted { reservation } => {
            if rs.reservations.contains_key(&reservation.id) {
                return Err(EngineError::AlreadyExists(format!(
                    "reservation {}",
                    reservation.id
                )));
            }
            touched.insert(reservation.id);
            rs.reservations.insert(reservation.id, reservation.clone());
        }
        Event::RestrictionInserted { restriction } => {
            if !restriction.span.is_ordered() {
                return Err(EngineError::Validation("restriction span is not ordered".into()));
            }
            if rs.restrictions.len() >= MAX_RESTRICTIONS_PER_ROOM {
                return Err(EngineError::LimitExceeded("too many restrictions on room"));
            }
            if let Some(existing) = rs.overlapping(&restriction.span).next() {
                return Err(EngineError::Conflict {
                    room_id: rs.room.id,
                    restriction_id: existing.id,
                });
            }
            if let Some(reservation_id) = restriction.reservation_id() {
                touched.insert(reservation_id);
            }
            rs.insert_restriction(restriction.clone());
        }
        Event::GuestUpdated { id, guest, .. } => {
            let reservation = rs
                .reservations
                .get_mut(id)
                .ok_or_else(|| EngineError::NotFound(format!("reservation {id}")))?;
            reservation.guest = guest.clone();
        }
        Event::ReservationProcessed { id, processed, .. } => {
            let reservation = rs
                .reservations
                .get_mut(id)
                .ok_or_else(|| EngineError::NotFound(format!("reservation {id}")))?;
            reservation.processed = *processed;
        }
        Event::ReservationDeleted { id, .. } => {
            rs.reservations
                .remove(id)
                .ok_or_else(|| EngineError::NotFound(format!("reservation {id}")))?;
            touched.insert(*id);
        }
        Event::RestrictionDeleted { id, .. } => {
            let removed = rs
                .remove_restriction(*id)
                .ok_or_else(|| EngineError::NotFound(format!("restriction {id}")))?;
            if let Some(reservation_id) = removed.reservation_id() {
                touched.insert(reservation_id);
            }
        }
    }
    Ok(())
}

/// A reservation exists iff exactly one restriction backs it, over the same span.
fn check_integrity(rs: &RoomState, touched: &HashSet<ReservationId>) -> Result<(), EngineError> {
    for reservation_id in touched {
        let backing: Vec<&RoomRestriction> = rs
            .restrictions
            .iter()
            .filter(|r| r.reservation_id() == Some(*reservation_id))
            .collect();
        match (rs.reservations.get(reservation_id), backing.as_slice()) {
            (None, []) => {}
            (Some(reservation), [restriction]) if restriction.span == reservation.span => {}
            (Some(_), []) => {
                return Err(EngineError::Persistence(format!(
                    "reservation {reservation_id} has no room restriction"
                )));
            }
            (None, _) => {
                return Err(EngineError::Persistence(format!(
                    "room restriction references missing reservation {reservation_id}"
                )));
            }
            (Some(_), _) => {
                return Err(EngineError::Persistence(format!(
                    "reservation {reservation_id} must have exactly one matching room restriction"
                )));
            }
        }
    }
    Ok(())
}

// ── In-memory store ──────────────────────────────────────────

/// Injected write failure for the in-memory store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertReservation(RoomId),
    InsertRestriction(RoomId),
}

/// Volatile store, mostly for tests.
#[derive(Default)]
pub struct MemoryStore {
    table: RoomTable,
    fail_points: DashSet<FailPoint>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later write matching `point` fail with a persistence error.
    pub fn fail_on(&self, point: FailPoint) {
        self.fail_points.insert(point);
    }

    pub fn clear_fail_points(&self) {
        self.fail_points.clear();
    }

    fn check_fail_point(&self, event: &Event) -> Result<(), EngineError> {
        let point = match event {
            Event::ReservationInserted { reservation } => {
                FailPoint::InsertReservation(reservation.room_id)
            }
            Event::RestrictionInserted { restriction } => {
                FailPoint::InsertRestriction(restriction.room_id)
            }
            _ => return Ok(()),
        };
        if self.fail_points.contains(&point) {
            return Err(EngineError::Persistence(format!("injected failure: {point:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_room(&self, room: Room) -> Result<(), EngineError> {
        self.table.try_add_room(room)
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

    async fn commit(&self, room_id: RoomId, events: Vec<Event>) -> Result<(), EngineError> {
        let shared = self.table.room_state(room_id)?;
        let mut guard = shared.write().await;
        let staged = self
            .table
            .stage(&guard, &events, |e| self.check_fail_point(e))?;
        self.table.publish(&mut guard, staged, &events);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn guest() -> GuestContact {
        GuestContact {
            first_name: "John".into(),
            last_name: "Smith".into(),
            email: "john@smith.com".into(),
            phone: "123456789".into(),
        }
    }

    fn booking_unit(room_id: RoomId, s: Span) -> (Reservation, Vec<Event>) {
        let reservation = Reservation {
            id: Ulid::new(),
            room_id,
            span: s,
            guest: guest(),
            created_at: 0,
            processed: false,
        };
        let restriction = RoomRestriction {
            id: Ulid::new(),
            room_id,
            span: s,
            kind: RestrictionKind::Reservation { reservation_id: reservation.id },
        };
        let events = vec![
            Event::ReservationInserted { reservation: reservation.clone() },
            Event::RestrictionInserted { restriction },
        ];
        (reservation, events)
    }

    async fn store_with_room(id: RoomId) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_room(Room { id, name: format!("Room {id}") })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn duplicate_room_rejected() {
        let store = store_with_room(1).await;
        let err = store
            .insert_room(Room { id: 1, name: "Again".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn rooms_listed_in_id_order() {
        let store = MemoryStore::new();
        for id in [5, 1, 3] {
            store.insert_room(Room { id, name: format!("R{id}") }).await.unwrap();
        }
        let ids: Vec<RoomId> = store.list_rooms().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn commit_inserts_reservation_and_restriction() {
        let store = store_with_room(1).await;
        let (reservation, events) = booking_unit(1, span("2050-01-01", "2050-01-02"));
        store.commit(1, events).await.unwrap();

        assert_eq!(store.get_reservation(reservation.id).await.unwrap(), Some(reservation.clone()));
        let restrictions = store
            .restrictions_overlapping(1, &span("2050-01-01", "2050-01-02"))
            .await
            .unwrap();
        assert_eq!(restrictions.len(), 1);
        assert_eq!(restrictions[0].reservation_id(), Some(reservation.id));
        assert_eq!(
            store.find_restriction(restrictions[0].id).await.unwrap(),
            Some(restrictions[0].clone())
        );
    }

    #[tokio::test]
    async fn reservation_without_restriction_rejected() {
        let store = store_with_room(1).await;
        let (reservation, mut events) = booking_unit(1, span("2050-01-01", "2050-01-02"));
        events.truncate(1);
        let err = store.commit(1, events).await.unwrap_err();
        assert!(matches!(err, EngineError::Persistence(_)));
        assert_eq!(store.get_reservation(reservation.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn restriction_without_reservation_rejected() {
        let store = store_with_room(1).await;
        let (_, mut events) = booking_unit(1, span("2050-01-01", "2050-01-02"));
        events.remove(0);
        let err = store.commit(1, events).await.unwrap_err();
        assert!(matches!(err, EngineError::Persistence(_)));
        let left = store
            .restrictions_overlapping(1, &span("2050-01-01", "2050-01-02"))
            .await
            .unwrap();
        assert!(left.is_empty());
    }

    #[tokio::test]
    async fn store_rejects_overlapping_restriction() {
        let store = store_with_room(1).await;
        let (_, first) = booking_unit(1, span("2050-01-01", "2050-01-05"));
        store.commit(1, first).await.unwrap();

        let (second_res, second) = booking_unit(1, span("2050-01-04", "2050-01-06"));
        let err = store.commit(1, second).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.get_reservation(second_res.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn fail_point_on_restriction_rolls_back_reservation() {
        let store = store_with_room(1000).await;
        store.fail_on(FailPoint::InsertRestriction(1000));
        let (reservation, events) = booking_unit(1000, span("2050-01-01", "2050-01-02"));
        let err = store.commit(1000, events.clone()).await.unwrap_err();
        assert!(matches!(err, EngineError::Persistence(_)));
        assert_eq!(store.get_reservation(reservation.id).await.unwrap(), None);
        assert!(store.list_reservations().await.unwrap().is_empty());

        store.clear_fail_points();
        store.commit(1000, events).await.unwrap();
        assert!(store.get_reservation(reservation.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn fail_point_on_reservation_writes_nothing() {
        let store = store_with_room(2).await;
        store.fail_on(FailPoint::InsertReservation(2));
        let (_, events) = booking_unit(2, span("2050-01-01", "2050-01-02"));
        assert!(store.commit(2, events).await.is_err());
        let left = store
            .restrictions_overlapping(2, &span("2050-01-01", "2050-01-02"))
            .await
            .unwrap();
        assert!(left.is_empty());
    }

    #[tokio::test]
    async fn delete_pair_in_one_unit() {
        let store = store_with_room(1).await;
        let s = span("2050-01-01", "2050-01-03");
        let (reservation, events) = booking_unit(1, s);
        store.commit(1, events).await.unwrap();
        let restriction = store.restrictions_overlapping(1, &s).await.unwrap().remove(0);

        // Deleting only the restriction would orphan the reservation.
        let err = store
            .commit(1, vec![Event::RestrictionDeleted { id: restriction.id, room_id: 1 }])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Persistence(_)));

        store
            .commit(
                1,
                vec![
                    Event::ReservationDeleted { id: reservation.id, room_id: 1 },
                    Event::RestrictionDeleted { id: restriction.id, room_id: 1 },
                ],
            )
            .await
            .unwrap();
        assert_eq!(store.get_reservation(reservation.id).await.unwrap(), None);
        assert_eq!(store.find_restriction(restriction.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unit_for_unknown_room_fails() {
        let store = MemoryStore::new();
        let (_, events) = booking_unit(9, span("2050-01-01", "2050-01-02"));
        assert!(matches!(store.commit(9, events).await, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn unit_mixing_rooms_rejected() {
        let store = store_with_room(1).await;
        let (_, events) = booking_unit(2, span("2050-01-01", "2050-01-02"));
        assert!(matches!(store.commit(1, events).await, Err(EngineError::Persistence(_))));
    }

    #[tokio::test]
    async fn snapshot_replays_into_same_state() {
        let store = store_with_room(1).await;
        let (reservation, events) = booking_unit(1, span("2050-01-01", "2050-01-02"));
        store.commit(1, events).await.unwrap();
        store
            .commit(
                1,
                vec![Event::RestrictionInserted {
                    restriction: RoomRestriction {
                        id: Ulid::new(),
                        room_id: 1,
                        span: span("2050-02-01", "2050-02-05"),
                        kind: RestrictionKind::OwnerBlock,
                    },
                }],
            )
            .await
            .unwrap();

        let guards = store.table.lock_all().await;
        let units = snapshot(guards.iter().map(|g| &**g));
        drop(guards);
        assert_eq!(units.len(), 3);

        let fresh = RoomTable::new();
        for unit in &units {
            fresh.replay(unit).await.unwrap();
        }
        assert_eq!(fresh.get_reservation(reservation.id).await, Some(reservation));
        let all = fresh
            .restrictions_overlapping(1, &span("2050-01-01", "2050-12-31"))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }
}
