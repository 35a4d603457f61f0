use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input: bad spans, bad scores, bad card fields.
    Validation(&'static str),
    LimitExceeded(&'static str),
    /// Input is well formed but the clock forbids it.
    Temporal(&'static str),
    /// The booking's current status forbids the transition.
    State(&'static str),
    Forbidden,
    SpaceNotFound(Ulid),
    BookingNotFound(Ulid),
    PaymentNotFound(Ulid),
    Conflict(Ulid),
    DuplicatePayment(Ulid),
    WalError(String),
}

impl EngineError {
    /// Status code reported on the wire alongside the message.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Validation(_)
            | EngineError::LimitExceeded(_)
            | EngineError::Temporal(_)
            | EngineError::State(_) => 400,
            EngineError::Forbidden => 403,
            EngineError::SpaceNotFound(_)
            | EngineError::BookingNotFound(_)
            | EngineError::PaymentNotFound(_) => 404,
            EngineError::Conflict(_) | EngineError::DuplicatePayment(_) => 409,
            EngineError::WalError(_) => 500,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "{msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Temporal(msg) => write!(f, "{msg}"),
            EngineError::State(msg) => write!(f, "{msg}"),
            EngineError::Forbidden => write!(f, "not allowed"),
            EngineError::SpaceNotFound(id) => write!(f, "space not found: {id}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::PaymentNotFound(id) => {
                write!(f, "no payment recorded for booking: {id}")
            }
            EngineError::Conflict(id) => {
                write!(f, "time slot not available: conflicts with booking {id}")
            }
            EngineError::DuplicatePayment(id) => {
                write!(f, "payment already exists for booking: {id}")
            }
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
