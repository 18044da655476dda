use crate::error::TraderError;
use crate::models::Bar;
use crate::Result;
use std::collections::VecDeque;

/// What `append_or_correct` did with an incoming bar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarUpdate {
    /// Strictly newer timestamp: a new bar completed
    Appended,
    /// Same timestamp as the last bar: the in-progress bar was overwritten
    Corrected,
}

impl BarUpdate {
    pub fn is_new_bar(&self) -> bool {
        matches!(self, Self::Appended)
    }
}

/// Time-ordered price history for one instrument
///
/// Maintains a rolling window of bars, trimmed oldest-first
#[derive(Debug, Clone)]
pub struct BarStore {
    bars: VecDeque<Bar>,
    max_bars: usize,
}

impl BarStore {
    /// Create a new bar store
    ///
    /// # Arguments
    /// * `max_bars` - Maximum number of bars to keep
    pub fn new(max_bars: usize) -> Self {
        Self {
            bars: VecDeque::with_capacity(max_bars),
            max_bars: max_bars.max(1),
        }
    }

    /// Seed the store from a history read; bars must be in ascending time order
    pub fn load_history(&mut self, history: Vec<Bar>) -> Result<usize> {
        self.bars.clear();
        for bar in history {
            self.append_or_correct(bar)?;
        }
        Ok(self.bars.len())
    }

    /// Upsert by timestamp
    ///
    /// Newer bars are appended, a repeat of the last timestamp replaces it and
    /// anything older is rejected without touching the store.
    pub fn append_or_correct(&mut self, bar: Bar) -> Result<BarUpdate> {
        if let Some(last) = self.bars.back_mut() {
            if bar.timestamp < last.timestamp {
                return Err(TraderError::OutOfOrderBar {
                    incoming: bar.timestamp,
                    last: last.timestamp,
                });
            }
            if bar.timestamp == last.timestamp {
                *last = bar;
                return Ok(BarUpdate::Corrected);
            }
        }

        self.bars.push_back(bar);
        while self.bars.len() > self.max_bars {
            self.bars.pop_front();
        }

        Ok(BarUpdate::Appended)
    }

    /// Drop the most recent bar (the terminal's still-forming candle)
    pub fn drop_last(&mut self) -> Option<Bar> {
        self.bars.pop_back()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.back()
    }

    /// Contiguous copy of the trailing window, oldest first
    pub fn window(&self) -> Vec<Bar> {
        self.bars.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn max_bars(&self) -> usize {
        self.max_bars
    }
}
