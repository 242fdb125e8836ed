use chrono::NaiveDate;

use crate::model::*;

use super::availability::{day_statuses, free_spans};
use super::conflict::validate_span;
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_room(&self, id: RoomId) -> Result<Room, EngineError> {
        self.store
            .get_room(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("room {id}")))
    }

    pub async fn list_rooms(&self) -> Result<Vec<Room>, EngineError> {
        self.store.list_rooms().await
    }

    /// True iff no restriction on `room_id` overlaps `span`.
    ///
    /// An unknown room is `NotFound`, never "busy".
    pub async fn is_room_free(&self, room_id: RoomId, span: Span) -> Result<bool, EngineError> {
        validate_span(&span)?;
        self.get_room(room_id).await?;
        let hits = self.store.restrictions_overlapping(room_id, &span).await?;
        Ok(hits.is_empty())
    }

    /// Every room free for the whole of `span`, ascending by id.
    pub async fn search_available_rooms(&self, span: Span) -> Result<Vec<Room>, EngineError> {
        validate_span(&span)?;
        let mut free = Vec::new();
        for room in self.store.list_rooms().await? {
            match self.store.restrictions_overlapping(room.id, &span).await {
                Ok(hits) if hits.is_empty() => free.push(room),
                Ok(_) => {}
                // Rooms are never deleted, but tolerate a racing catalogue.
                Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        metrics::counter!(crate::observability::SEARCHES_TOTAL).increment(1);
        Ok(free)
    }

    pub async fn restrictions_for_room(
        &self,
        room_id: RoomId,
        span: Span,
    ) -> Result<Vec<RoomRestriction>, EngineError> {
        validate_span(&span)?;
        self.get_room(room_id).await?;
        self.store.restrictions_overlapping(room_id, &span).await
    }

    /// Free sub-spans of `window` on a room.
    pub async fn free_spans(&self, room_id: RoomId, window: Span) -> Result<Vec<Span>, EngineError> {
        let restrictions = self.restrictions_for_room(room_id, window).await?;
        Ok(free_spans(&restrictions, &window))
    }

    pub async fn get_reservation(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        self.store
            .get_reservation(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("reservation {id}")))
    }

    /// Reservations ordered by start date, then id.
    pub async fn list_reservations(
        &self,
        filter: ReservationFilter,
    ) -> Result<Vec<Reservation>, EngineError> {
        let mut all = self.store.list_reservations().await?;
        if filter == ReservationFilter::New {
            all.retain(|r| !r.processed);
        }
        all.sort_by(|a, b| a.span.start.cmp(&b.span.start).then(a.id.cmp(&b.id)));
        Ok(all)
    }

    /// Admin calendar: every room's occupancy for each day of a month.
    pub async fn calendar(&self, year: i32, month: u32) -> Result<Vec<RoomCalendar>, EngineError> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| EngineError::Validation(format!("no such month: {year}-{month}")))?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        }
        .ok_or_else(|| EngineError::Validation(format!("no such month: {year}-{month}")))?;
        let window = Span::new(first, next);
        validate_span(&window)?;
        let last = next.pred_opt().unwrap_or(first);

        let mut rows = Vec::new();
        for room in self.store.list_rooms().await? {
            let restrictions = self.store.restrictions_overlapping(room.id, &window).await?;
            let days = day_statuses(&restrictions, first, last);
            rows.push(RoomCalendar { room, days });
        }
        Ok(rows)
    }
}
