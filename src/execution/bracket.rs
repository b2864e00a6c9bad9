//! Bracket ("double barrier") order lifecycle.
//!
//! `Flat -> Entering -> Protected -> Exiting -> Flat`
//!
//! An entry is only ever recorded as `Protected` once both protective legs
//! were accepted. A failed bracket flattens the fresh position instead of
//! leaving it unprotected.

use super::venue::ExecutionVenue;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::{BracketOrderPair, BracketRequest, OrderHandle, OrderStatus};
use crate::risk::PositionSizer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BracketState {
    /// No position, no bracket
    #[default]
    Flat,
    /// Entry filled, protective pair not yet accepted
    Entering { entry: OrderHandle },
    /// Position guarded by an accepted OCO pair
    Protected { pair: BracketOrderPair },
    /// Close requested but not confirmed yet
    Exiting {
        since: DateTime<Utc>,
        released: Option<BracketOrderPair>,
    },
}

impl BracketState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Entering { .. } => "entering",
            Self::Protected { .. } => "protected",
            Self::Exiting { .. } => "exiting",
        }
    }

    pub fn pair(&self) -> Option<&BracketOrderPair> {
        match self {
            Self::Protected { pair } => Some(pair),
            Self::Exiting { released, .. } => released.as_ref(),
            _ => None,
        }
    }
}

/// Result of a successful entry
#[derive(Debug, Clone, PartialEq)]
pub struct EntryOutcome {
    pub notional: f64,
    pub entry: OrderHandle,
    pub pair: BracketOrderPair,
}

/// Result of a confirmed close
#[derive(Debug, Clone, PartialEq)]
pub struct ExitOutcome {
    pub released: Option<BracketOrderPair>,
    pub cancelled_bracket: bool,
}

/// What reconciling the recorded state against the venue changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reconciliation {
    Unchanged,
    /// Position gone while protected: one leg filled and the venue cancelled the other
    BracketResolved,
    /// Position gone while exiting: close confirmed
    CloseConfirmed,
    /// Close still outstanding; needs another close request
    CloseOutstanding,
    /// Position without any recorded bracket
    Unprotected,
}

#[derive(Debug, Clone)]
pub struct BracketOrderManager {
    take_profit_pct: f64,
    stop_loss_pct: f64,
    fee_rate: f64,
    sizer: PositionSizer,
}

impl BracketOrderManager {
    pub fn new(take_profit_pct: f64, stop_loss_pct: f64, fee_rate: f64, sizer: PositionSizer) -> Self {
        Self {
            take_profit_pct,
            stop_loss_pct,
            fee_rate,
            sizer,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.take_profit_pct,
            config.stop_loss_pct,
            config.fee_rate,
            PositionSizer::new(config.balance_fraction, config.max_buy_notional),
        )
    }

    /// Protective pair for a filled entry
    ///
    /// The legs sell the filled quantity less fees; trigger prices sit at
    /// `entry * (1 + take_profit_pct)` and `entry * (1 - stop_loss_pct)`.
    pub fn bracket_request(&self, instrument: &str, filled_quantity: f64, entry_price: f64) -> BracketRequest {
        BracketRequest {
            instrument: instrument.to_string(),
            quantity: filled_quantity * (1.0 - self.fee_rate),
            entry_price,
            take_profit_pct: self.take_profit_pct,
            stop_loss_pct: self.stop_loss_pct,
            take_profit_price: entry_price * (1.0 + self.take_profit_pct),
            stop_loss_price: entry_price * (1.0 - self.stop_loss_pct),
            oco_group: Uuid::new_v4(),
        }
    }

    /// Buy at market and protect the fill with an OCO bracket
    ///
    /// # Arguments
    /// * `reference_price` - Latest close, used when the venue reports no fill price
    /// * `now` - Tick time, stamped on an `Exiting` state if flattening fails
    pub fn enter<V: ExecutionVenue + ?Sized>(
        &self,
        venue: &mut V,
        instrument: &str,
        reference_price: f64,
        state: &mut BracketState,
        now: DateTime<Utc>,
    ) -> Result<EntryOutcome, EngineError> {
        if !matches!(state, BracketState::Flat) {
            return Err(EngineError::InvalidTransition {
                instrument: instrument.to_string(),
                action: "enter",
                state: state.name(),
            });
        }

        let balance = venue
            .available_quoted_balance()
            .map_err(|e| EngineError::external(instrument, "available_quoted_balance", e))?;
        let notional = self
            .sizer
            .entry_notional(balance)
            .ok_or_else(|| EngineError::EntryRejected {
                instrument: instrument.to_string(),
                reason: format!("no quoted balance to spend ({:.2})", balance),
            })?;

        let entry = venue
            .submit_market_order_by_value(instrument, notional)
            .map_err(|e| EngineError::external(instrument, "submit_market_order_by_value", e))?;

        if entry.status != OrderStatus::Filled || entry.filled_quantity <= 0.0 {
            return Err(EngineError::EntryRejected {
                instrument: instrument.to_string(),
                reason: entry
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("entry order {:?}", entry.status)),
            });
        }

        *state = BracketState::Entering {
            entry: entry.clone(),
        };

        let entry_price = entry.average_price.unwrap_or(reference_price);
        let request = self.bracket_request(instrument, entry.filled_quantity, entry_price);

        let (upper, lower) = match venue.submit_bracket_pair(&request) {
            Ok(legs) => legs,
            Err(e) => {
                tracing::error!(instrument, error = %e, "bracket submission failed, flattening entry");
                self.flatten(venue, instrument, state, now);
                return Err(EngineError::external(instrument, "submit_bracket_pair", e));
            }
        };

        if upper.status != OrderStatus::Pending || lower.status != OrderStatus::Pending {
            let reason = rejection_reason(&upper, &lower);
            tracing::error!(instrument, %reason, "bracket rejected, flattening entry");

            // A leg the venue kept must not outlive the position
            if !venue.close_supersedes_brackets()
                && (upper.status == OrderStatus::Pending || lower.status == OrderStatus::Pending)
            {
                let partial = make_pair(&request, upper.clone(), lower.clone());
                if let Err(e) = venue.cancel_bracket(&partial) {
                    tracing::warn!(instrument, error = %e, "failed to cancel surviving bracket leg");
                }
            }

            let flattened = self.flatten(venue, instrument, state, now);
            return Err(EngineError::BracketRejected {
                instrument: instrument.to_string(),
                reason,
                flattened,
            });
        }

        let pair = make_pair(&request, upper, lower);
        *state = BracketState::Protected { pair: pair.clone() };

        Ok(EntryOutcome {
            notional,
            entry,
            pair,
        })
    }

    /// Close the whole position, releasing the recorded bracket
    ///
    /// The pair is cancelled first unless the venue drops pending protective
    /// orders on a full close by itself.
    pub fn exit<V: ExecutionVenue + ?Sized>(
        &self,
        venue: &mut V,
        instrument: &str,
        state: &mut BracketState,
        now: DateTime<Utc>,
    ) -> Result<ExitOutcome, EngineError> {
        let mut cancelled_bracket = false;

        let released = match state {
            BracketState::Protected { pair } => {
                if !venue.close_supersedes_brackets() {
                    // Still protected if this fails
                    venue
                        .cancel_bracket(pair)
                        .map_err(|e| EngineError::external(instrument, "cancel_bracket", e))?;
                    cancelled_bracket = true;
                }
                Some(pair.clone())
            }
            BracketState::Exiting { released, .. } => released.clone(),
            BracketState::Flat | BracketState::Entering { .. } => None,
        };

        *state = BracketState::Exiting {
            since: now,
            released: released.clone(),
        };

        venue
            .close_position(instrument)
            .map_err(|e| EngineError::external(instrument, "close_position", e))?;

        *state = BracketState::Flat;

        Ok(ExitOutcome {
            released,
            cancelled_bracket,
        })
    }

    /// Line up the recorded state with whether the venue still holds a position
    pub fn reconcile(&self, state: &mut BracketState, has_position: bool, now: DateTime<Utc>) -> Reconciliation {
        match (&*state, has_position) {
            (BracketState::Protected { .. }, false) => {
                *state = BracketState::Flat;
                Reconciliation::BracketResolved
            }
            (BracketState::Exiting { .. }, false) | (BracketState::Entering { .. }, false) => {
                *state = BracketState::Flat;
                Reconciliation::CloseConfirmed
            }
            (BracketState::Exiting { .. }, true) => Reconciliation::CloseOutstanding,
            (BracketState::Entering { .. }, true) => {
                *state = BracketState::Exiting {
                    since: now,
                    released: None,
                };
                Reconciliation::CloseOutstanding
            }
            (BracketState::Flat, true) => Reconciliation::Unprotected,
            _ => Reconciliation::Unchanged,
        }
    }

    /// Close a position left without protection; true if the close went through
    fn flatten<V: ExecutionVenue + ?Sized>(
        &self,
        venue: &mut V,
        instrument: &str,
        state: &mut BracketState,
        now: DateTime<Utc>,
    ) -> bool {
        match venue.close_position(instrument) {
            Ok(()) => {
                *state = BracketState::Flat;
                true
            }
            Err(e) => {
                tracing::error!(instrument, error = %e, "failed to flatten unprotected position");
                *state = BracketState::Exiting {
                    since: now,
                    released: None,
                };
                false
            }
        }
    }
}

fn make_pair(request: &BracketRequest, upper: OrderHandle, lower: OrderHandle) -> BracketOrderPair {
    BracketOrderPair {
        instrument: request.instrument.clone(),
        created_time: upper.created_time,
        upper_order: upper,
        lower_order: lower,
        oco_group: request.oco_group,
        quantity: request.quantity,
        take_profit_price: request.take_profit_price,
        stop_loss_price: request.stop_loss_price,
    }
}

fn rejection_reason(upper: &OrderHandle, lower: &OrderHandle) -> String {
    [("take-profit", upper), ("stop-loss", lower)]
        .into_iter()
        .filter(|(_, leg)| leg.status != OrderStatus::Pending)
        .map(|(name, leg)| {
            format!(
                "{} leg {:?}: {}",
                name,
                leg.status,
                leg.error.as_deref().unwrap_or("no reason given")
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}
