use crate::model::Id;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    Validation(&'static str),
    Conflict(&'static str),
    NotFound { what: &'static str, id: Id },
    Unauthorized,
    EmailTaken(String),
    PlateTaken(String),
    HasReservations(Id),
    AlreadyReturned(Id),
    LimitExceeded(&'static str),
    Wal(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "{msg}"),
            EngineError::Conflict(msg) => write!(f, "{msg}"),
            EngineError::NotFound { what, id } => write!(f, "{what} not found: {id}"),
            EngineError::Unauthorized => write!(f, "invalid credentials"),
            EngineError::EmailTaken(email) => write!(f, "email already registered: {email}"),
            EngineError::PlateTaken(plate) => write!(f, "plate already registered: {plate}"),
            EngineError::HasReservations(id) => {
                write!(f, "cannot delete user {id}: reservations exist")
            }
            EngineError::AlreadyReturned(id) => {
                write!(f, "reservation {id} has already been returned")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
