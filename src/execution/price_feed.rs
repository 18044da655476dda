use std::sync::Arc;

use super::{BarStore, BarUpdate};
use crate::gateway::MarketDataFeed;
use crate::models::{Bar, Timeframe};
use crate::Result;

/// Polls the terminal for completed bars and keeps the rolling history
pub struct PriceFeed {
    source: Arc<dyn MarketDataFeed>,
    symbol: String,
    timeframe: Timeframe,
    store: BarStore,
}

impl PriceFeed {
    pub fn new(source: Arc<dyn MarketDataFeed>, symbol: impl Into<String>, timeframe: Timeframe, max_bars: usize) -> Self {
        Self {
            source,
            symbol: symbol.into(),
            timeframe,
            store: BarStore::new(max_bars),
        }
    }

    /// Seed the store with `count` bars; the still-forming last bar is discarded
    pub async fn load_history(&mut self, count: usize) -> Result<usize> {
        let history = self
            .source
            .get_history(&self.symbol, self.timeframe, count)
            .await?;
        self.store.load_history(history)?;
        self.store.drop_last();

        tracing::info!(
            symbol = %self.symbol,
            timeframe = %self.timeframe,
            bars = self.store.len(),
            "Loaded price history"
        );
        Ok(self.store.len())
    }

    /// Read the most recent completed bar and merge it into the store
    ///
    /// An empty read is not an error: it is logged and reported as `None`.
    pub async fn poll(&mut self) -> Result<Option<BarUpdate>> {
        let Some(bar) = self.source.get_latest(&self.symbol, self.timeframe).await? else {
            tracing::warn!(symbol = %self.symbol, "⚠️  Empty bar read, retrying next poll");
            return Ok(None);
        };

        let update = self.store.append_or_correct(bar)?;
        if update.is_new_bar() {
            if let Some(bar) = self.store.last() {
                tracing::debug!(
                    symbol = %self.symbol,
                    timestamp = %bar.timestamp,
                    close = bar.close,
                    "New bar"
                );
            }
        }
        Ok(Some(update))
    }

    pub fn window(&self) -> Vec<Bar> {
        self.store.window()
    }

    pub fn last_bar(&self) -> Option<&Bar> {
        self.store.last()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}
