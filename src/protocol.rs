use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::engine::EngineError;
use crate::model::*;
use crate::session::SessionToken;

/// One request per line, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    NewSession,
    Search {
        session: SessionToken,
        start: NaiveDate,
        end: NaiveDate,
    },
    RoomFree {
        room_id: RoomId,
        start: NaiveDate,
        end: NaiveDate,
    },
    ChooseRoom {
        session: SessionToken,
        room_id: RoomId,
    },
    BookRoom {
        session: SessionToken,
        room_id: RoomId,
        start: NaiveDate,
        end: NaiveDate,
    },
    Confirm {
        session: SessionToken,
        guest: GuestContact,
    },
    Summary {
        session: SessionToken,
    },
    Reset {
        session: SessionToken,
    },
    Rooms,
    OwnerBlock {
        room_id: RoomId,
        start: NaiveDate,
        end: NaiveDate,
    },
    RemoveBlock {
        restriction_id: RestrictionId,
    },
    Cancel {
        reservation_id: ReservationId,
    },
    SetProcessed {
        reservation_id: ReservationId,
        processed: bool,
    },
    UpdateGuest {
        reservation_id: ReservationId,
        guest: GuestContact,
    },
    Reservation {
        reservation_id: ReservationId,
    },
    Reservations {
        #[serde(default)]
        filter: ReservationFilter,
    },
    Calendar {
        year: i32,
        month: u32,
    },
    FreeSpans {
        room_id: RoomId,
        start: NaiveDate,
        end: NaiveDate,
    },
}

/// Failure of a single request line. Never tears down the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The line was not a request we understand.
    BadRequest(String),
    Engine(EngineError),
}

impl ProtocolError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::BadRequest(_) => "bad_request",
            ProtocolError::Engine(e) => e.kind(),
        }
    }
}

impl From<EngineError> for ProtocolError {
    fn from(e: EngineError) -> Self {
        ProtocolError::Engine(e)
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::BadRequest(msg) => write!(f, "bad request: {msg}"),
            ProtocolError::Engine(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

pub fn parse_request(line: &str) -> Result<Request, ProtocolError> {
    serde_json::from_str(line).map_err(|e| ProtocolError::BadRequest(e.to_string()))
}

pub fn ok_line(data: Value) -> String {
    json!({ "ok": true, "data": data }).to_string()
}

pub fn error_line(err: &ProtocolError) -> String {
    let mut error = json!({ "kind": err.kind(), "message": err.to_string() });
    if let ProtocolError::Engine(EngineError::Conflict {
        room_id,
        restriction_id,
    }) = err
    {
        error["room_id"] = json!(room_id);
        error["restriction_id"] = json!(restriction_id);
    }
    json!({ "ok": false, "error": error }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn parse_search() {
        let token = SessionToken::new();
        let line = format!(
            r#"{{"op":"search","session":"{token}","start":"2050-01-01","end":"2050-01-02"}}"#
        );
        let req = parse_request(&line).unwrap();
        assert_eq!(
            req,
            Request::Search {
                session: token,
                start: day("2050-01-01"),
                end: day("2050-01-02"),
            }
        );
    }

    #[test]
    fn parse_unit_ops() {
        assert_eq!(parse_request(r#"{"op":"new_session"}"#).unwrap(), Request::NewSession);
        assert_eq!(parse_request(r#"{"op":"rooms"}"#).unwrap(), Request::Rooms);
    }

    #[test]
    fn reservations_filter_defaults_to_all() {
        assert_eq!(
            parse_request(r#"{"op":"reservations"}"#).unwrap(),
            Request::Reservations {
                filter: ReservationFilter::All
            }
        );
        assert_eq!(
            parse_request(r#"{"op":"reservations","filter":"new"}"#).unwrap(),
            Request::Reservations {
                filter: ReservationFilter::New
            }
        );
    }

    #[test]
    fn parse_confirm_with_guest() {
        let token = SessionToken::new();
        let line = format!(
            r#"{{"op":"confirm","session":"{token}","guest":{{"first_name":"John","last_name":"Smith","email":"john@smith.com","phone":"555"}}}}"#
        );
        match parse_request(&line).unwrap() {
            Request::Confirm { session, guest } => {
                assert_eq!(session, token);
                assert_eq!(guest.first_name, "John");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn malformed_lines_are_bad_requests() {
        for line in [
            "not json",
            r#"{"op":"teleport"}"#,
            r#"{"op":"search","session":"x","start":"2050-01-01","end":"2050-01-02"}"#,
            r#"{"op":"room_free","room_id":1,"start":"2050-13-01","end":"2050-01-02"}"#,
        ] {
            let err = parse_request(line).unwrap_err();
            assert_eq!(err.kind(), "bad_request", "{line}");
        }
    }

    #[test]
    fn error_line_carries_kind_and_conflict_detail() {
        let restriction_id = Ulid::new();
        let line = error_line(&ProtocolError::Engine(EngineError::Conflict {
            room_id: 3,
            restriction_id,
        }));
        let v: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"]["kind"], "conflict");
        assert_eq!(v["error"]["room_id"], 3);
        assert_eq!(v["error"]["restriction_id"], restriction_id.to_string());
    }

    #[test]
    fn ok_line_wraps_data() {
        let v: Value = serde_json::from_str(&ok_line(json!([1, 2]))).unwrap();
        assert_eq!(v, json!({"ok": true, "data": [1, 2]}));
    }
}
