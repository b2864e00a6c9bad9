//! In-memory venue for paper trading, backtests and tests.
//!
//! Fills market orders at the last known price, keeps bracket pairs live
//! until a bar touches one of their trigger prices, and charges a flat fee
//! rate on every fill.

use super::metrics::{ExitReason, TradeRecord};
use crate::error::VenueError;
use crate::execution::{ExecutionVenue, MarketFeed};
use crate::models::{
    Bar, BracketLeg, BracketOrderPair, BracketRequest, OrderHandle, OrderStatus, Position,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Venue operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VenueOp {
    GetBars,
    Balance,
    OpenPosition,
    MarketOrder,
    BracketPair,
    CancelBracket,
    ClosePosition,
}

/// Order-side call the venue received
#[derive(Debug, Clone, PartialEq)]
pub enum VenueCall {
    MarketOrder { instrument: String, notional: f64 },
    BracketPair(BracketRequest),
    CancelBracket { instrument: String, oco_group: Uuid },
    ClosePosition { instrument: String },
}

/// Both legs of an accepted pair, waiting for a trigger
#[derive(Debug, Clone, PartialEq)]
pub struct LiveBracket {
    pub oco_group: Uuid,
    pub quantity: f64,
    pub take_profit_price: f64,
    pub stop_loss_price: f64,
}

#[derive(Debug, Clone)]
struct Holding {
    quantity: f64,
    /// Quoted currency spent, fees included
    cost: f64,
    entry_price: f64,
    entry_time: DateTime<Utc>,
}

#[derive(Debug)]
pub struct PaperVenue {
    quoted_balance: f64,
    fee_rate: f64,
    close_supersedes_brackets: bool,
    clock: Option<DateTime<Utc>>,
    prices: HashMap<String, f64>,
    history: HashMap<String, Vec<Bar>>,
    holdings: HashMap<String, Holding>,
    brackets: HashMap<String, Vec<LiveBracket>>,
    rejected_legs: HashMap<String, (BracketLeg, String)>,
    failures: HashMap<VenueOp, VenueError>,
    instrument_failures: HashMap<String, VenueError>,
    calls: Vec<VenueCall>,
    trades: Vec<TradeRecord>,
}

impl PaperVenue {
    pub fn new(quoted_balance: f64, fee_rate: f64) -> Self {
        Self {
            quoted_balance,
            fee_rate,
            close_supersedes_brackets: false,
            clock: None,
            prices: HashMap::new(),
            history: HashMap::new(),
            holdings: HashMap::new(),
            brackets: HashMap::new(),
            rejected_legs: HashMap::new(),
            failures: HashMap::new(),
            instrument_failures: HashMap::new(),
            calls: Vec::new(),
            trades: Vec::new(),
        }
    }

    /// Whether `close_position` also drops the instrument's live brackets
    pub fn with_close_supersedes_brackets(mut self, supersedes: bool) -> Self {
        self.close_supersedes_brackets = supersedes;
        self
    }

    pub fn set_price(&mut self, instrument: &str, price: f64) {
        self.prices.insert(instrument.to_string(), price);
    }

    pub fn price(&self, instrument: &str) -> Option<f64> {
        self.prices.get(instrument).copied()
    }

    /// Publish a new bar: live brackets are matched against its range, then
    /// the close becomes the last price
    ///
    /// Returns the trades the bar triggered.
    pub fn push_bar(&mut self, bar: Bar) -> Vec<TradeRecord> {
        self.clock = Some(self.clock.map_or(bar.timestamp, |c| c.max(bar.timestamp)));
        let fills = self.match_brackets(&bar);

        self.prices.insert(bar.instrument.clone(), bar.close);
        self.history
            .entry(bar.instrument.clone())
            .or_default()
            .push(bar);

        fills
    }

    /// Put a holding on the books directly, replacing any existing one
    pub fn insert_position(&mut self, instrument: &str, quantity: f64, price: f64) {
        let entry_time = self.now();
        self.prices.entry(instrument.to_string()).or_insert(price);
        self.holdings.insert(
            instrument.to_string(),
            Holding {
                quantity,
                cost: quantity * price,
                entry_price: price,
                entry_time,
            },
        );
    }

    /// Make the venue reject one leg of every bracket for the instrument
    pub fn reject_leg(&mut self, instrument: &str, leg: BracketLeg, reason: &str) {
        self.rejected_legs
            .insert(instrument.to_string(), (leg, reason.to_string()));
    }

    /// Make every call of this kind fail until cleared
    pub fn fail_operation(&mut self, op: VenueOp, error: VenueError) {
        self.failures.insert(op, error);
    }

    /// Make every instrument-scoped call for `instrument` fail until cleared
    pub fn fail_calls_for(&mut self, instrument: &str, error: VenueError) {
        self.instrument_failures.insert(instrument.to_string(), error);
    }

    pub fn clear_failures(&mut self) {
        self.failures.clear();
        self.instrument_failures.clear();
        self.rejected_legs.clear();
    }

    pub fn calls(&self) -> &[VenueCall] {
        &self.calls
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn live_brackets(&self, instrument: &str) -> Vec<LiveBracket> {
        self.brackets.get(instrument).cloned().unwrap_or_default()
    }

    pub fn quoted_balance(&self) -> f64 {
        self.quoted_balance
    }

    /// Quoted balance plus holdings marked at the last price
    pub fn equity(&self) -> f64 {
        let marked: f64 = self
            .holdings
            .iter()
            .map(|(instrument, h)| h.quantity * self.price(instrument).unwrap_or(h.entry_price))
            .sum();
        self.quoted_balance + marked
    }

    /// Sell everything still held at the last price
    pub fn liquidate_all(&mut self) -> Vec<TradeRecord> {
        let instruments: Vec<String> = self.holdings.keys().cloned().collect();
        let mut closed = Vec::new();
        for instrument in instruments {
            self.brackets.remove(&instrument);
            if let Some(price) = self.price(&instrument) {
                if let Some(trade) = self.sell(&instrument, f64::INFINITY, price, ExitReason::MarketClose) {
                    closed.push(trade);
                }
            }
        }
        closed
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }

    fn check(&self, op: VenueOp, instrument: Option<&str>) -> Result<(), VenueError> {
        if let Some(err) = instrument.and_then(|i| self.instrument_failures.get(i)) {
            return Err(err.clone());
        }
        match self.failures.get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn handle(&self, instrument: &str, status: OrderStatus) -> OrderHandle {
        OrderHandle {
            id: Uuid::new_v4(),
            instrument: instrument.to_string(),
            status,
            filled_quantity: 0.0,
            average_price: None,
            created_time: self.now(),
            error: None,
        }
    }

    fn rejected(&self, instrument: &str, reason: &str) -> OrderHandle {
        OrderHandle {
            error: Some(reason.to_string()),
            ..self.handle(instrument, OrderStatus::Rejected)
        }
    }

    /// Stop is checked before target when one bar spans both
    fn match_brackets(&mut self, bar: &Bar) -> Vec<TradeRecord> {
        let Some(live) = self.brackets.remove(&bar.instrument) else {
            return Vec::new();
        };

        let mut fills = Vec::new();
        let mut still_live = Vec::new();

        for bracket in live {
            let hit = if bar.low <= bracket.stop_loss_price {
                Some((bracket.stop_loss_price.min(bar.open), ExitReason::StopLoss))
            } else if bar.high >= bracket.take_profit_price {
                Some((bracket.take_profit_price.max(bar.open), ExitReason::TakeProfit))
            } else {
                None
            };

            match hit {
                Some((price, reason)) => {
                    self.clock = Some(bar.timestamp);
                    match self.sell(&bar.instrument, bracket.quantity, price, reason) {
                        Some(trade) => {
                            tracing::debug!(
                                instrument = %bar.instrument,
                                ?reason,
                                price,
                                "bracket leg filled, sibling cancelled"
                            );
                            fills.push(trade);
                        }
                        None => {
                            tracing::warn!(instrument = %bar.instrument, "bracket triggered with nothing held, dropped");
                        }
                    }
                }
                None => still_live.push(bracket),
            }
        }

        if !still_live.is_empty() {
            self.brackets.insert(bar.instrument.clone(), still_live);
        }
        fills
    }

    /// Sell up to `quantity` of the holding at `price`
    fn sell(&mut self, instrument: &str, quantity: f64, price: f64, reason: ExitReason) -> Option<TradeRecord> {
        let holding = self.holdings.get_mut(instrument)?;
        let sold = quantity.min(holding.quantity);
        if sold <= 0.0 {
            return None;
        }

        let share = sold / holding.quantity;
        let cost = holding.cost * share;
        let entry_fee = cost * self.fee_rate;
        let gross = sold * price;
        let exit_fee = gross * self.fee_rate;
        let proceeds = gross - exit_fee;

        let trade = TradeRecord {
            instrument: instrument.to_string(),
            entry_time: holding.entry_time,
            exit_time: self.clock.unwrap_or_else(Utc::now),
            entry_price: holding.entry_price,
            exit_price: price,
            quantity: sold,
            pnl: (price - holding.entry_price) * sold,
            pnl_pct: (price - holding.entry_price) / holding.entry_price * 100.0,
            holding_period_minutes: (self.clock.unwrap_or_else(Utc::now) - holding.entry_time).num_minutes(),
            transaction_cost: entry_fee + exit_fee,
            net_pnl: proceeds - cost,
            exit_reason: reason,
        };

        holding.quantity -= sold;
        holding.cost -= cost;
        if holding.quantity <= f64::EPSILON {
            self.holdings.remove(instrument);
        }
        self.quoted_balance += proceeds;
        self.trades.push(trade.clone());

        Some(trade)
    }
}

impl MarketFeed for PaperVenue {
    fn get_bars(&self, instrument: &str, window_size: usize) -> Result<Vec<Bar>, VenueError> {
        self.check(VenueOp::GetBars, Some(instrument))?;

        let bars = self.history.get(instrument).map(Vec::as_slice).unwrap_or(&[]);
        let start = bars.len().saturating_sub(window_size);
        Ok(bars[start..].to_vec())
    }
}

impl ExecutionVenue for PaperVenue {
    fn available_quoted_balance(&self) -> Result<f64, VenueError> {
        self.check(VenueOp::Balance, None)?;
        Ok(self.quoted_balance)
    }

    fn open_position(&self, instrument: &str) -> Result<Option<Position>, VenueError> {
        self.check(VenueOp::OpenPosition, Some(instrument))?;

        Ok(self.holdings.get(instrument).map(|h| Position {
            instrument: instrument.to_string(),
            quantity: h.quantity,
            entry_time: h.entry_time,
            exposure: h.quantity * self.price(instrument).unwrap_or(h.entry_price),
        }))
    }

    fn submit_market_order_by_value(&mut self, instrument: &str, notional: f64) -> Result<OrderHandle, VenueError> {
        self.calls.push(VenueCall::MarketOrder {
            instrument: instrument.to_string(),
            notional,
        });
        self.check(VenueOp::MarketOrder, Some(instrument))?;

        let Some(price) = self.price(instrument).filter(|p| *p > 0.0) else {
            return Ok(self.rejected(instrument, "no market price"));
        };
        if !(notional > 0.0) || notional > self.quoted_balance {
            return Ok(self.rejected(instrument, "insufficient balance"));
        }

        let quantity = notional * (1.0 - self.fee_rate) / price;
        let now = self.now();
        self.quoted_balance -= notional;

        let holding = self.holdings.entry(instrument.to_string()).or_insert(Holding {
            quantity: 0.0,
            cost: 0.0,
            entry_price: price,
            entry_time: now,
        });
        let total = holding.quantity + quantity;
        holding.entry_price = (holding.entry_price * holding.quantity + price * quantity) / total;
        holding.quantity = total;
        holding.cost += notional;

        Ok(OrderHandle {
            filled_quantity: quantity,
            average_price: Some(price),
            ..self.handle(instrument, OrderStatus::Filled)
        })
    }

    fn submit_bracket_pair(&mut self, request: &BracketRequest) -> Result<(OrderHandle, OrderHandle), VenueError> {
        let instrument = request.instrument.as_str();
        self.calls.push(VenueCall::BracketPair(request.clone()));
        self.check(VenueOp::BracketPair, Some(instrument))?;

        // The group is accepted or refused as a whole
        if let Some((leg, reason)) = self.rejected_legs.get(instrument) {
            let (upper, lower) = match leg {
                BracketLeg::TakeProfit => (
                    self.rejected(instrument, reason),
                    self.handle(instrument, OrderStatus::Cancelled),
                ),
                BracketLeg::StopLoss => (
                    self.handle(instrument, OrderStatus::Cancelled),
                    self.rejected(instrument, reason),
                ),
            };
            return Ok((upper, lower));
        }

        let held = self.holdings.get(instrument).map_or(0.0, |h| h.quantity);
        if request.quantity > held + f64::EPSILON {
            let reason = "bracket quantity exceeds holding";
            return Ok((self.rejected(instrument, reason), self.rejected(instrument, reason)));
        }

        self.brackets
            .entry(instrument.to_string())
            .or_default()
            .push(LiveBracket {
                oco_group: request.oco_group,
                quantity: request.quantity,
                take_profit_price: request.take_profit_price,
                stop_loss_price: request.stop_loss_price,
            });

        Ok((
            self.handle(instrument, OrderStatus::Pending),
            self.handle(instrument, OrderStatus::Pending),
        ))
    }

    fn cancel_bracket(&mut self, pair: &BracketOrderPair) -> Result<(), VenueError> {
        let instrument = pair.instrument.as_str();
        self.calls.push(VenueCall::CancelBracket {
            instrument: instrument.to_string(),
            oco_group: pair.oco_group,
        });
        self.check(VenueOp::CancelBracket, Some(instrument))?;

        // Already filled or cancelled groups are simply gone
        if let Some(live) = self.brackets.get_mut(instrument) {
            live.retain(|b| b.oco_group != pair.oco_group);
            if live.is_empty() {
                self.brackets.remove(instrument);
            }
        }
        Ok(())
    }

    fn close_position(&mut self, instrument: &str) -> Result<(), VenueError> {
        self.calls.push(VenueCall::ClosePosition {
            instrument: instrument.to_string(),
        });
        self.check(VenueOp::ClosePosition, Some(instrument))?;

        let price = self
            .price(instrument)
            .ok_or_else(|| VenueError::Rejected(format!("no market price for {}", instrument)))?;

        // Without superseding, a live bracket keeps the quantity it reserved
        let reserved: f64 = if self.close_supersedes_brackets {
            self.brackets.remove(instrument);
            0.0
        } else {
            self.live_brackets(instrument).iter().map(|b| b.quantity).sum()
        };

        let held = self.holdings.get(instrument).map_or(0.0, |h| h.quantity);
        if held <= 0.0 {
            return Err(VenueError::Rejected(format!("no open position for {}", instrument)));
        }
        if reserved >= held {
            return Err(VenueError::Rejected(format!(
                "position for {} is locked by a pending bracket",
                instrument
            )));
        }

        self.sell(instrument, held - reserved, price, ExitReason::MarketClose);
        Ok(())
    }

    fn close_supersedes_brackets(&self) -> bool {
        self.close_supersedes_brackets
    }
}
