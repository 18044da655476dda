use chrono::{DateTime, Utc};

use crate::error::TraderError;
use crate::models::{BrokerPosition, Position, Signal};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Signal turned neutral
    Signal,
    /// Opposite signal; an open in the other direction follows
    Reversal,
    /// Bar at or after the daily cutoff
    SessionEnd,
    /// Clock entered an hour without parameters
    InactiveHour,
    /// Session loop finished or was interrupted
    Shutdown,
    /// Broker closed it (TP/SL hit or manual close)
    BrokerClosed,
}

/// Result of comparing local state against the broker's position list
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    Unchanged,
    /// Our position is gone at the broker
    ClosedExternally(Position),
    /// A broker position carrying our magic number was taken over
    Adopted(Position),
}

/// Single-instrument position state machine: FLAT, LONG or SHORT
///
/// Holds at most one position. `last_signal` is the signal whose transition
/// was last acted on; a transition is executed only when the desired signal
/// differs from it.
#[derive(Debug, Clone)]
pub struct PositionManager {
    symbol: String,
    magic_number: u64,
    position: Option<Position>,
    last_signal: Signal,
}

impl PositionManager {
    pub fn new(symbol: impl Into<String>, magic_number: u64) -> Self {
        Self {
            symbol: symbol.into(),
            magic_number,
            position: None,
            last_signal: Signal::Flat,
        }
    }

    /// Current state (FLAT when no position is held)
    pub fn state(&self) -> Signal {
        self.position
            .as_ref()
            .map(Position::direction)
            .unwrap_or(Signal::Flat)
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn has_open_position(&self) -> bool {
        self.position.is_some()
    }

    pub fn last_signal(&self) -> Signal {
        self.last_signal
    }

    /// Record that the transition to `signal` has been handled
    pub fn mark_acted(&mut self, signal: Signal) {
        self.last_signal = signal;
    }

    /// Record an accepted open
    pub fn open_position(&mut self, position: Position) -> Result<()> {
        if let Some(existing) = &self.position {
            return Err(TraderError::PositionState(format!(
                "already holding {} ticket {} on {}",
                existing.direction(),
                existing.ticket,
                self.symbol
            )));
        }

        tracing::info!(
            symbol = %self.symbol,
            ticket = position.ticket,
            side = %position.side,
            price = position.open_price,
            volume = position.volume,
            "Position opened"
        );
        self.position = Some(position);
        Ok(())
    }

    /// Record an accepted close of `filled_volume`
    ///
    /// Returns the position once it is fully closed; a partial fill leaves the
    /// remainder open.
    pub fn close_position(&mut self, filled_volume: f64, reason: ExitReason) -> Result<Option<Position>> {
        let position = self.position.as_mut().ok_or_else(|| {
            TraderError::PositionState(format!("no open position on {} to close", self.symbol))
        })?;

        let remaining = position.volume - filled_volume;
        if remaining > 1e-9 {
            position.volume = remaining;
            tracing::warn!(
                symbol = %self.symbol,
                ticket = position.ticket,
                remaining,
                "Partial close, position still open"
            );
            return Ok(None);
        }

        let closed = self.position.take();
        if let Some(position) = &closed {
            tracing::info!(
                symbol = %self.symbol,
                ticket = position.ticket,
                reason = ?reason,
                "Position closed"
            );
        }
        Ok(closed)
    }

    /// Drop local state without trading (forced flatten fallback)
    pub fn reset_flat(&mut self) -> Option<Position> {
        self.position.take()
    }

    /// Bring local state in line with the broker's view of `symbol`
    pub fn reconcile(&mut self, broker_positions: &[BrokerPosition], now: DateTime<Utc>) -> Reconciliation {
        let ours: Vec<&BrokerPosition> = broker_positions
            .iter()
            .filter(|p| p.symbol == self.symbol)
            .collect();

        if let Some(position) = self.position.as_mut() {
            if let Some(broker) = ours.iter().find(|p| p.ticket == position.ticket) {
                position.volume = broker.volume;
                position.stop_loss = broker.sl;
                position.take_profit = broker.tp;
                return Reconciliation::Unchanged;
            }

            let ticket = position.ticket;
            return match self.position.take() {
                Some(closed) => {
                    tracing::info!(
                        symbol = %self.symbol,
                        ticket,
                        "Position closed at the broker (TP/SL or manual)"
                    );
                    Reconciliation::ClosedExternally(closed)
                }
                None => Reconciliation::Unchanged,
            };
        }

        let mut tagged = ours.iter().filter(|p| p.magic == self.magic_number);
        let Some(broker) = tagged.next() else {
            return Reconciliation::Unchanged;
        };
        if tagged.next().is_some() {
            tracing::warn!(
                symbol = %self.symbol,
                "Several broker positions carry our magic number, adopting ticket {}",
                broker.ticket
            );
        }

        let adopted = Position {
            ticket: broker.ticket,
            side: broker.side,
            open_price: broker.price_open,
            stop_loss: broker.sl,
            take_profit: broker.tp,
            volume: broker.volume,
            opened_at: now,
        };
        tracing::warn!(
            symbol = %self.symbol,
            ticket = adopted.ticket,
            side = %adopted.side,
            "Adopted broker position"
        );
        self.position = Some(adopted.clone());
        Reconciliation::Adopted(adopted)
    }
}
