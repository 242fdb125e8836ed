use crate::model::{RestrictionId, RoomId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed input: unordered dates, bad guest fields.
    Validation(String),
    NotFound(String),
    AlreadyExists(String),
    /// The room is taken for (part of) the requested span.
    Conflict {
        room_id: RoomId,
        restriction_id: RestrictionId,
    },
    /// A room id that was not offered by the session's latest search.
    InvalidSelection(RoomId),
    /// The session holds no draft in the state the operation needs.
    NothingStaged,
    LimitExceeded(&'static str),
    Persistence(String),
}

impl EngineError {
    /// Stable label for wire responses and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::Conflict { .. } => "conflict",
            EngineError::InvalidSelection(_) => "invalid_selection",
            EngineError::NothingStaged => "nothing_staged",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Persistence(_) => "persistence",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict { .. })
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::NotFound(what) => write!(f, "not found: {what}"),
            EngineError::AlreadyExists(what) => write!(f, "already exists: {what}"),
            EngineError::Conflict {
                room_id,
                restriction_id,
            } => write!(
                f,
                "room {room_id} is no longer available (conflicts with restriction {restriction_id})"
            ),
            EngineError::InvalidSelection(room_id) => {
                write!(f, "room {room_id} was not offered for the chosen dates")
            }
            EngineError::NothingStaged => write!(f, "no reservation in progress for this session"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Persistence(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
