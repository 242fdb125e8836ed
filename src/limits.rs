pub const MAX_ROOMS: usize = 10_000;
pub const MAX_RESTRICTIONS_PER_ROOM: usize = 100_000;
pub const MAX_ROOM_NAME_LEN: usize = 256;
pub const MAX_GUEST_FIELD_LEN: usize = 256;
pub const MIN_FIRST_NAME_LEN: usize = 3;

/// Longest stay (and widest search window) in nights.
pub const MAX_STAY_NIGHTS: i64 = 366;
pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 2200;

pub const MAX_LINE_LEN: usize = 64 * 1024;
