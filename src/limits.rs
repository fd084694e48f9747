use crate::model::Ms;

pub const MIN_VALID_TIMESTAMP_MS: Ms = 0; // 1970-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999; // 9999-12-31T23:59:59.999Z
pub const MAX_SPAN_DURATION_MS: Ms = 31 * 24 * 3_600_000;

pub const MAX_ROOMS_PER_BOOKING: usize = 16;
pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_USER_INPUT_LEN: usize = 256;
pub const MAX_PASSWORD_LEN: usize = 128;

pub const MAX_WAL_ENTRY_BYTES: usize = 16 * 1024 * 1024;
