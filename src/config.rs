use std::path::PathBuf;
use std::str::FromStr;

use crate::model::{Room, RoomId};

pub const DEFAULT_ROOMS: &str = "1=General's Quarters;2=Major's Suite";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub session_ttl_secs: u64,
    pub metrics_port: Option<u16>,
    pub rooms: Vec<Room>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue { var: &'static str, value: String },
    InvalidRooms(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue { var, value } => {
                write!(f, "invalid value for {var}: {value:?}")
            }
            ConfigError::InvalidRooms(msg) => write!(f, "invalid STAYBOOK_ROOMS: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, so tests don't need to touch the process env.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let rooms = get("STAYBOOK_ROOMS").unwrap_or_else(|| DEFAULT_ROOMS.to_string());
        Ok(Self {
            bind: get("STAYBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&get, "STAYBOOK_PORT", 7878)?,
            data_dir: PathBuf::from(get("STAYBOOK_DATA_DIR").unwrap_or_else(|| "./data".into())),
            max_connections: parse_or(&get, "STAYBOOK_MAX_CONNECTIONS", 256)?,
            compact_threshold: parse_or(&get, "STAYBOOK_COMPACT_THRESHOLD", 1000)?,
            session_ttl_secs: parse_or(&get, "STAYBOOK_SESSION_TTL_SECS", 86_400)?,
            metrics_port: get("STAYBOOK_METRICS_PORT")
                .map(|v| parse_var("STAYBOOK_METRICS_PORT", v))
                .transpose()?,
            rooms: parse_rooms(&rooms)?,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("staybook.wal")
    }
}

fn parse_var<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    match value.trim().parse() {
        Ok(v) => Ok(v),
        Err(_) => Err(ConfigError::InvalidValue { var, value }),
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(var) {
        Some(value) => parse_var(var, value),
        None => Ok(default),
    }
}

/// Parse a `id=name;id=name` room catalogue.
pub fn parse_rooms(spec: &str) -> Result<Vec<Room>, ConfigError> {
    let mut rooms: Vec<Room> = Vec::new();
    for entry in spec.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, name) = entry
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidRooms(format!("expected id=name, got {entry:?}")))?;
        let id: RoomId = id
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidRooms(format!("bad room id {id:?}")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::InvalidRooms(format!("room {id} has no name")));
        }
        if rooms.iter().any(|r| r.id == id) {
            return Err(ConfigError::InvalidRooms(format!("room {id} listed twice")));
        }
        rooms.push(Room {
            id,
            name: name.to_string(),
        });
    }
    Ok(rooms)
}
