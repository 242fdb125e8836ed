//! Per-session reservation draft: search → choose room → confirm.
//!
//! The draft lives only in the session store. Availability is always
//! re-checked by the engine at commit time; nothing here is trusted for it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::engine::{validate_guest, validate_span, Engine, EngineError};
use crate::model::*;
use crate::session::{SessionStore, SessionToken};

pub const STAGED_KEY: &str = "reservation";
pub const SUMMARY_KEY: &str = "reservation_summary";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StagingState {
    #[default]
    Empty,
    DatesChosen {
        span: Span,
        /// Rooms returned by the latest search, ascending by id.
        offered: Vec<RoomId>,
    },
    RoomChosen {
        span: Span,
        offered: Vec<RoomId>,
        /// Snapshot for display only.
        room: Room,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub reservation_id: ReservationId,
    pub reservation: Reservation,
}

pub struct Staging {
    engine: Arc<Engine>,
    sessions: Arc<dyn SessionStore>,
}

impl Staging {
    pub fn new(engine: Arc<Engine>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { engine, sessions }
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn state(&self, token: &SessionToken) -> StagingState {
        self.read(token, STAGED_KEY).unwrap_or_default()
    }

    /// Start (or restart) a draft from a date search. Valid from any state.
    pub async fn search(&self, token: &SessionToken, span: Span) -> Result<Vec<Room>, EngineError> {
        let rooms = self.engine.search_available_rooms(span).await?;
        let offered = rooms.iter().map(|r| r.id).collect();
        self.write(token, STAGED_KEY, &StagingState::DatesChosen { span, offered })?;
        Ok(rooms)
    }

    /// Pick one of the rooms the latest search offered.
    pub async fn choose_room(&self, token: &SessionToken, room_id: RoomId) -> Result<Room, EngineError> {
        let (span, offered) = match self.state(token) {
            StagingState::DatesChosen { span, offered }
            | StagingState::RoomChosen { span, offered, .. } => (span, offered),
            StagingState::Empty => return Err(EngineError::NothingStaged),
        };
        if !offered.contains(&room_id) {
            warn!(%token, room_id, "room selection was never offered");
            return Err(EngineError::InvalidSelection(room_id));
        }
        let room = self.engine.get_room(room_id).await?;
        self.write(
            token,
            STAGED_KEY,
            &StagingState::RoomChosen {
                span,
                offered,
                room: room.clone(),
            },
        )?;
        Ok(room)
    }

    /// Stage a specific room and dates directly, as from a room's own page.
    /// The room must be free for the span right now.
    pub async fn book_room(
        &self,
        token: &SessionToken,
        room_id: RoomId,
        span: Span,
    ) -> Result<Room, EngineError> {
        validate_span(&span)?;
        let room = self.engine.get_room(room_id).await?;
        let blocking = self.engine.restrictions_for_room(room_id, span).await?;
        if let Some(first) = blocking.first() {
            return Err(EngineError::Conflict {
                room_id,
                restriction_id: first.id,
            });
        }
        self.write(
            token,
            STAGED_KEY,
            &StagingState::RoomChosen {
                span,
                offered: vec![room_id],
                room: room.clone(),
            },
        )?;
        Ok(room)
    }

    /// Hand the assembled draft to the engine.
    ///
    /// Success clears the draft and leaves a summary behind. A conflict drops
    /// back to `DatesChosen` without the lost room so the guest can re-search.
    /// Any other failure keeps the draft as it was.
    pub async fn confirm(
        &self,
        token: &SessionToken,
        guest: GuestContact,
    ) -> Result<Confirmation, EngineError> {
        let StagingState::RoomChosen { span, offered, room } = self.state(token) else {
            return Err(EngineError::NothingStaged);
        };
        validate_guest(&guest)?;

        let candidate = NewReservation {
            room_id: room.id,
            span,
            guest,
        };
        match self.engine.reserve(candidate).await {
            Ok(reservation) => {
                let reservation_id = reservation.id;
                self.sessions.remove(token, STAGED_KEY);
                if let Err(e) = self.write(token, SUMMARY_KEY, &reservation) {
                    warn!(%token, %reservation_id, "summary not saved: {e}");
                }
                debug!(%token, %reservation_id, "staged reservation confirmed");
                Ok(Confirmation {
                    reservation_id,
                    reservation,
                })
            }
            Err(e) if e.is_conflict() => {
                let offered = offered.into_iter().filter(|id| *id != room.id).collect();
                self.write(token, STAGED_KEY, &StagingState::DatesChosen { span, offered })?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Pop the summary of the last confirmed reservation.
    pub fn take_summary(&self, token: &SessionToken) -> Option<Reservation> {
        let value = self.sessions.remove(token, SUMMARY_KEY)?;
        serde_json::from_value(value).ok()
    }

    /// Start over. Nothing persisted needs undoing.
    pub fn reset(&self, token: &SessionToken) {
        self.sessions.remove(token, STAGED_KEY);
    }

    fn read<T: DeserializeOwned>(&self, token: &SessionToken, key: &str) -> Option<T> {
        let value = self.sessions.get(token, key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(%token, key, "discarding unreadable session value: {e}");
                None
            }
        }
    }

    fn write<T: Serialize>(&self, token: &SessionToken, key: &str, value: &T) -> Result<(), EngineError> {
        let value = serde_json::to_value(value)
            .map_err(|e| EngineError::Persistence(format!("session encode: {e}")))?;
        self.sessions.put(token, key, value);
        Ok(())
    }
}
