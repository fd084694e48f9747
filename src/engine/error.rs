use crate::model::{ConflictInfo, Ms};

use super::store::StoreError;

/// Why a start/end pair was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeError {
    Unparsable { field: &'static str, value: String },
    NotOrdered { start: Ms, end: Ms },
}

impl std::fmt::Display for TimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeError::Unparsable { field, value } => {
                write!(f, "{field} is not a valid timestamp: {value:?}")
            }
            TimeError::NotOrdered { start, end } => {
                write!(f, "end ({end}) must be strictly after start ({start})")
            }
        }
    }
}

#[derive(Debug)]
pub enum BookingError {
    MissingFields(Vec<&'static str>),
    MalformedBody(String),
    InvalidTime(TimeError),
    UnknownRoom(String),
    UserNotFound(String),
    Conflict(Vec<ConflictInfo>),
    WrongPassword,
    EmptyUpdate,
    NotFound(String),
    LimitExceeded(&'static str),
    Storage(StoreError),
}

impl BookingError {
    /// Machine-readable error kind for clients and audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::MissingFields(_) => "MissingFields",
            BookingError::MalformedBody(_) => "MalformedBody",
            BookingError::InvalidTime(_) => "InvalidTime",
            BookingError::UnknownRoom(_) => "UnknownRoom",
            BookingError::UserNotFound(_) => "UserNotFound",
            BookingError::Conflict(_) => "Conflict",
            BookingError::WrongPassword => "WrongPassword",
            BookingError::EmptyUpdate => "EmptyUpdate",
            BookingError::NotFound(_) => "NotFound",
            BookingError::LimitExceeded(_) => "LimitExceeded",
            BookingError::Storage(_) => "StorageFailure",
        }
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::MissingFields(fields) => {
                write!(f, "missing required fields: {}", fields.join(", "))
            }
            BookingError::MalformedBody(e) => write!(f, "could not parse request body: {e}"),
            BookingError::InvalidTime(e) => write!(f, "invalid time: {e}"),
            BookingError::UnknownRoom(room) => write!(f, "unknown room: {room}"),
            BookingError::UserNotFound(raw) => write!(f, "no user matches {raw:?}"),
            BookingError::Conflict(conflicts) => {
                write!(f, "time slot already booked ({} conflicting)", conflicts.len())
            }
            BookingError::WrongPassword => write!(f, "wrong edit password"),
            BookingError::EmptyUpdate => write!(f, "update payload is empty"),
            BookingError::NotFound(id) => write!(f, "reservation not found or not updated: {id}"),
            BookingError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            BookingError::Storage(e) => write!(f, "storage failure: {e}"),
        }
    }
}

impl std::error::Error for BookingError {}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        BookingError::Storage(e)
    }
}

impl From<TimeError> for BookingError {
    fn from(e: TimeError) -> Self {
        BookingError::InvalidTime(e)
    }
}
