use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::observability::{command_label, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use crate::protocol::{error_line, ok_line, parse_request, ProtocolError, Request};
use crate::session::{SessionStore, SessionToken};
use crate::staging::Staging;

/// Everything a connection needs, shared across all of them.
pub struct Service {
    engine: Arc<Engine>,
    staging: Staging,
}

impl Service {
    pub fn new(engine: Arc<Engine>, sessions: Arc<dyn SessionStore>) -> Self {
        let staging = Staging::new(engine.clone(), sessions);
        Self { engine, staging }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        self.staging.sessions()
    }

    /// Run one request to completion.
    pub async fn execute(&self, req: Request) -> Result<Value, ProtocolError> {
        let engine = &self.engine;
        let staging = &self.staging;
        match req {
            Request::NewSession => {
                let token = SessionToken::new();
                Ok(json!({ "session": token }))
            }
            Request::Search {
                session,
                start,
                end,
            } => to_data(staging.search(&session, Span::new(start, end)).await?),
            Request::RoomFree {
                room_id,
                start,
                end,
            } => {
                let free = engine.is_room_free(room_id, Span::new(start, end)).await?;
                Ok(json!({ "free": free }))
            }
            Request::ChooseRoom { session, room_id } => {
                to_data(staging.choose_room(&session, room_id).await?)
            }
            Request::BookRoom {
                session,
                room_id,
                start,
                end,
            } => to_data(
                staging
                    .book_room(&session, room_id, Span::new(start, end))
                    .await?,
            ),
            Request::Confirm { session, guest } => to_data(staging.confirm(&session, guest).await?),
            Request::Summary { session } => {
                let summary = staging
                    .take_summary(&session)
                    .ok_or(EngineError::NothingStaged)?;
                to_data(summary)
            }
            Request::Reset { session } => {
                staging.reset(&session);
                Ok(Value::Null)
            }
            Request::Rooms => to_data(engine.list_rooms().await?),
            Request::OwnerBlock {
                room_id,
                start,
                end,
            } => {
                let id = engine
                    .commit_owner_block(room_id, Span::new(start, end))
                    .await?;
                Ok(json!({ "restriction_id": id }))
            }
            Request::RemoveBlock { restriction_id } => {
                let room_id = engine.remove_owner_block(restriction_id).await?;
                Ok(json!({ "room_id": room_id }))
            }
            Request::Cancel { reservation_id } => {
                let room_id = engine.cancel_reservation(reservation_id).await?;
                Ok(json!({ "room_id": room_id }))
            }
            Request::SetProcessed {
                reservation_id,
                processed,
            } => {
                engine.set_processed(reservation_id, processed).await?;
                Ok(Value::Null)
            }
            Request::UpdateGuest {
                reservation_id,
                guest,
            } => {
                engine.update_guest(reservation_id, guest).await?;
                Ok(Value::Null)
            }
            Request::Reservation { reservation_id } => {
                to_data(engine.get_reservation(reservation_id).await?)
            }
            Request::Reservations { filter } => to_data(engine.list_reservations(filter).await?),
            Request::Calendar { year, month } => to_data(engine.calendar(year, month).await?),
            Request::FreeSpans {
                room_id,
                start,
                end,
            } => to_data(engine.free_spans(room_id, Span::new(start, end)).await?),
        }
    }
}

fn to_data<T: Serialize>(value: T) -> Result<Value, ProtocolError> {
    serde_json::to_value(value)
        .map_err(|e| ProtocolError::Engine(EngineError::Persistence(format!("encode: {e}"))))
}

/// Answer one raw line. Every line gets exactly one response line.
pub async fn handle_line(service: &Service, line: &str) -> String {
    let req = match parse_request(line) {
        Ok(req) => req,
        Err(e) => {
            metrics::counter!(REQUESTS_TOTAL, "command" => "unknown", "status" => "error")
                .increment(1);
            return error_line(&e);
        }
    };

    let label = command_label(&req);
    let start = Instant::now();
    let result = service.execute(req).await;
    metrics::histogram!(REQUEST_DURATION_SECONDS, "command" => label)
        .record(start.elapsed().as_secs_f64());

    match result {
        Ok(data) => {
            metrics::counter!(REQUESTS_TOTAL, "command" => label, "status" => "ok").increment(1);
            ok_line(data)
        }
        Err(e) => {
            metrics::counter!(REQUESTS_TOTAL, "command" => label, "status" => "error").increment(1);
            debug!(command = label, "request failed: {e}");
            error_line(&e)
        }
    }
}

/// Serve a JSON-lines connection until the peer hangs up. An overlong line
/// gets an error response and ends the connection.
pub async fn process_connection<S>(
    socket: S,
    service: Arc<Service>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(frame) = framed.next().await {
        let response = match frame {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                handle_line(&service, &line).await
            }
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!("request line exceeds {MAX_LINE_LEN} bytes, closing connection");
                let response = error_line(&ProtocolError::Engine(EngineError::LimitExceeded(
                    "request line too long",
                )));
                framed.send(response).await?;
                break;
            }
            Err(LinesCodecError::Io(e)) => return Err(e.into()),
        };
        framed.send(response).await?;
    }
    Ok(())
}
