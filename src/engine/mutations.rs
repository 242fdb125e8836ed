use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{COMMITS_TOTAL, COMMIT_CONFLICTS_TOTAL};

use super::conflict::{check_no_conflict, now_ms, validate_guest, validate_span};
use super::{Engine, EngineError};

fn record_commit<T>(kind: &'static str, result: &Result<T, EngineError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::counter!(COMMITS_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
    if matches!(result, Err(e) if e.is_conflict()) {
        metrics::counter!(COMMIT_CONFLICTS_TOTAL, "kind" => kind).increment(1);
    }
}

impl Engine {
    /// Administrative provisioning of a room.
    pub async fn create_room(&self, id: RoomId, name: String) -> Result<Room, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::Validation("room name is required".into()));
        }
        if name.len() > MAX_ROOM_NAME_LEN {
            return Err(EngineError::LimitExceeded("room name too long"));
        }
        let room = Room { id, name };
        self.store.insert_room(room.clone()).await?;
        info!(room_id = id, name = %room.name, "room created");
        Ok(room)
    }

    /// Re-check availability and insert the reservation with its restriction,
    /// as one unit, under the room's commit lock.
    pub async fn commit_reservation(
        &self,
        candidate: NewReservation,
    ) -> Result<ReservationId, EngineError> {
        self.reserve(candidate).await.map(|r| r.id)
    }

    /// Same as [`Engine::commit_reservation`], handing back the committed row
    /// so callers need no follow-up read.
    pub async fn reserve(&self, candidate: NewReservation) -> Result<Reservation, EngineError> {
        let result = self.reserve_inner(candidate).await;
        record_commit("reservation", &result);
        result
    }

    async fn reserve_inner(&self, candidate: NewReservation) -> Result<Reservation, EngineError> {
        let NewReservation {
            room_id,
            span,
            guest,
        } = candidate;
        validate_span(&span)?;
        validate_guest(&guest)?;
        self.get_room(room_id).await?;

        let _room_lock = self.lock_room(room_id).await;

        let existing = self.store.restrictions_overlapping(room_id, &span).await?;
        if let Err(e) = check_no_conflict(room_id, &existing, &span) {
            warn!(room_id, start = %span.start, end = %span.end, "reservation lost the race: {e}");
            return Err(e);
        }

        let reservation = Reservation {
            id: Ulid::new(),
            room_id,
            span,
            guest,
            created_at: now_ms(),
            processed: false,
        };
        let restriction = RoomRestriction {
            id: Ulid::new(),
            room_id,
            span,
            kind: RestrictionKind::Reservation {
                reservation_id: reservation.id,
            },
        };
        self.store
            .commit(
                room_id,
                vec![
                    Event::ReservationInserted {
                        reservation: reservation.clone(),
                    },
                    Event::RestrictionInserted { restriction },
                ],
            )
            .await?;

        info!(id = %reservation.id, room_id, start = %span.start, end = %span.end, "reservation committed");
        Ok(reservation)
    }

    /// Close a room for `span` without a reservation.
    pub async fn commit_owner_block(
        &self,
        room_id: RoomId,
        span: Span,
    ) -> Result<RestrictionId, EngineError> {
        let result = self.commit_owner_block_inner(room_id, span).await;
        record_commit("owner_block", &result);
        result
    }

    async fn commit_owner_block_inner(
        &self,
        room_id: RoomId,
        span: Span,
    ) -> Result<RestrictionId, EngineError> {
        validate_span(&span)?;
        self.get_room(room_id).await?;

        let _room_lock = self.lock_room(room_id).await;

        let existing = self.store.restrictions_overlapping(room_id, &span).await?;
        check_no_conflict(room_id, &existing, &span)?;

        let restriction = RoomRestriction {
            id: Ulid::new(),
            room_id,
            span,
            kind: RestrictionKind::OwnerBlock,
        };
        let id = restriction.id;
        self.store
            .commit(room_id, vec![Event::RestrictionInserted { restriction }])
            .await?;

        info!(%id, room_id, start = %span.start, end = %span.end, "owner block placed");
        Ok(id)
    }

    /// Delete a reservation and its restriction together.
    pub async fn cancel_reservation(&self, id: ReservationId) -> Result<RoomId, EngineError> {
        let room_id = self.get_reservation(id).await?.room_id;
        let _room_lock = self.lock_room(room_id).await;

        // Re-read under the lock: a concurrent cancel may have won.
        let reservation = self.get_reservation(id).await?;
        let restriction = self
            .store
            .restrictions_overlapping(room_id, &reservation.span)
            .await?
            .into_iter()
            .find(|r| r.reservation_id() == Some(id))
            .ok_or_else(|| {
                EngineError::Persistence(format!("reservation {id} has no room restriction"))
            })?;

        self.store
            .commit(
                room_id,
                vec![
                    Event::ReservationDeleted { id, room_id },
                    Event::RestrictionDeleted {
                        id: restriction.id,
                        room_id,
                    },
                ],
            )
            .await?;

        info!(%id, room_id, "reservation cancelled");
        Ok(room_id)
    }

    /// Lift an owner block. Reservation-backed restrictions go through
    /// [`Engine::cancel_reservation`] instead.
    pub async fn remove_owner_block(&self, id: RestrictionId) -> Result<RoomId, EngineError> {
        let restriction = self
            .store
            .find_restriction(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("restriction {id}")))?;
        if let Some(reservation_id) = restriction.reservation_id() {
            return Err(EngineError::Validation(format!(
                "restriction {id} belongs to reservation {reservation_id}; cancel the reservation instead"
            )));
        }
        let room_id = restriction.room_id;
        let _room_lock = self.lock_room(room_id).await;
        self.store
            .commit(room_id, vec![Event::RestrictionDeleted { id, room_id }])
            .await?;

        info!(%id, room_id, "owner block removed");
        Ok(room_id)
    }

    pub async fn update_guest(
        &self,
        id: ReservationId,
        guest: GuestContact,
    ) -> Result<(), EngineError> {
        validate_guest(&guest)?;
        let room_id = self.get_reservation(id).await?.room_id;
        let _room_lock = self.lock_room(room_id).await;
        self.store
            .commit(room_id, vec![Event::GuestUpdated { id, room_id, guest }])
            .await
    }

    pub async fn set_processed(&self, id: ReservationId, processed: bool) -> Result<(), EngineError> {
        let room_id = self.get_reservation(id).await?.room_id;
        let _room_lock = self.lock_room(room_id).await;
        self.store
            .commit(
                room_id,
                vec![Event::ReservationProcessed {
                    id,
                    room_id,
                    processed,
                }],
            )
            .await
    }
}
