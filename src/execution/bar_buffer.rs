use crate::error::EngineError;
use crate::models::Bar;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Rolling window of bars for a single instrument
///
/// Append-only and chronological. Once `capacity` is reached the oldest bar is
/// evicted for every new one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesWindow {
    instrument: String,
    bars: VecDeque<Bar>,
    capacity: usize,
}

impl SeriesWindow {
    /// Create an empty window
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of bars to keep (at least 1)
    pub fn new(instrument: impl Into<String>, capacity: usize) -> Self {
        Self {
            instrument: instrument.into(),
            bars: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Build a window from bars, keeping only the most recent `capacity`
    pub fn from_bars(
        instrument: impl Into<String>,
        capacity: usize,
        bars: &[Bar],
    ) -> Result<Self, EngineError> {
        let mut window = Self::new(instrument, capacity);
        for bar in bars {
            window.push(bar.clone())?;
        }
        Ok(window)
    }

    /// Append a bar
    ///
    /// Rejects malformed bars, bars for another instrument, and bars that are
    /// not strictly newer than the last one.
    pub fn push(&mut self, bar: Bar) -> Result<(), EngineError> {
        if bar.instrument != self.instrument {
            return Err(self.invalid(format!("bar belongs to {}", bar.instrument)));
        }
        if !bar.is_well_formed() {
            return Err(self.invalid(format!("malformed bar at {}", bar.timestamp)));
        }
        if let Some(last) = self.bars.back() {
            if bar.timestamp <= last.timestamp {
                return Err(self.invalid(format!(
                    "bar at {} is not after {}",
                    bar.timestamp, last.timestamp
                )));
            }
        }

        self.bars.push_back(bar);
        while self.bars.len() > self.capacity {
            self.bars.pop_front();
        }

        Ok(())
    }

    /// Merge a freshly fetched window from the feed
    ///
    /// Bars already held are skipped; newer ones are appended. Bars that fail
    /// validation are skipped and returned so the caller can report them.
    /// Returns the number of bars appended alongside the rejections.
    pub fn refresh(&mut self, fetched: &[Bar]) -> (usize, Vec<EngineError>) {
        let mut appended = 0;
        let mut rejected = Vec::new();

        for bar in fetched {
            if self.last().is_some_and(|last| bar.timestamp <= last.timestamp) {
                continue;
            }
            match self.push(bar.clone()) {
                Ok(()) => appended += 1,
                Err(e) => rejected.push(e),
            }
        }

        (appended, rejected)
    }

    /// Error unless at least `need` bars are held
    pub fn require(&self, need: usize) -> Result<(), EngineError> {
        if self.bars.len() < need {
            return Err(EngineError::InsufficientData {
                instrument: self.instrument.clone(),
                have: self.bars.len(),
                need,
            });
        }
        Ok(())
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.back()
    }

    pub fn bars(&self) -> std::collections::vec_deque::Iter<'_, Bar> {
        self.bars.iter()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    fn invalid(&self, reason: String) -> EngineError {
        EngineError::InvalidBar {
            instrument: self.instrument.clone(),
            reason,
        }
    }
}
