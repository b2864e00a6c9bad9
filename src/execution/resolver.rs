use crate::models::Signal;
use serde::{Deserialize, Serialize};

/// What the engine does for one instrument this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionAction {
    Enter,
    Exit,
    Skip,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionDecision {
    pub action: ExecutionAction,
    pub reason: String,
}

/// Map a signal and the current position to an action
///
/// Only Buy while flat and Sell while positioned act; every other
/// combination is suppressed.
pub fn resolve(signal: Signal, has_position: bool) -> ExecutionDecision {
    match (signal, has_position) {
        (Signal::Buy, false) => ExecutionDecision {
            action: ExecutionAction::Enter,
            reason: "Buy signal with no open position".to_string(),
        },
        (Signal::Buy, true) => ExecutionDecision {
            action: ExecutionAction::Skip,
            reason: "Already have open position".to_string(),
        },
        (Signal::Sell, true) => ExecutionDecision {
            action: ExecutionAction::Exit,
            reason: "Sell signal with open position".to_string(),
        },
        (Signal::Sell, false) => ExecutionDecision {
            action: ExecutionAction::Skip,
            reason: "No position to sell".to_string(),
        },
        (Signal::Ignore, _) => ExecutionDecision {
            action: ExecutionAction::Skip,
            reason: "Ignore signal".to_string(),
        },
    }
}
