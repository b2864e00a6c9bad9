use thiserror::Error;

/// Failure reported by an external collaborator (feed, portfolio, order router)
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VenueError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("rejected by venue: {0}")]
    Rejected(String),

    #[error("venue unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("insufficient data for {instrument}: have {have} bars, need {need}")]
    InsufficientData {
        instrument: String,
        have: usize,
        need: usize,
    },

    #[error("bracket rejected for {instrument}: {reason} (entry flattened: {flattened})")]
    BracketRejected {
        instrument: String,
        reason: String,
        flattened: bool,
    },

    #[error("entry order for {instrument} not filled: {reason}")]
    EntryRejected { instrument: String, reason: String },

    #[error("{operation} failed for {instrument}")]
    ExternalCallFailure {
        instrument: String,
        operation: &'static str,
        #[source]
        source: VenueError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("cannot {action} {instrument} while {state}")]
    InvalidTransition {
        instrument: String,
        action: &'static str,
        state: &'static str,
    },

    #[error("invalid bar for {instrument}: {reason}")]
    InvalidBar { instrument: String, reason: String },
}

impl EngineError {
    pub fn external(instrument: &str, operation: &'static str, source: VenueError) -> Self {
        Self::ExternalCallFailure {
            instrument: instrument.to_string(),
            operation,
            source,
        }
    }
}
