use crate::config::NeutralPolicy;
use crate::execution::{ExitReason, PositionManager};
use crate::models::{Side, Signal};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExecutionAction {
    Open { side: Side },
    Close { reason: ExitReason },
}

/// Ordered steps that move the position state machine toward `target`
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionDecision {
    pub actions: Vec<ExecutionAction>,
    /// Signal to record as acted on once every action succeeded
    pub target: Signal,
    pub reason: String,
}

impl ExecutionDecision {
    fn skip(target: Signal, reason: impl Into<String>) -> Self {
        Self {
            actions: Vec::new(),
            target,
            reason: reason.into(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }

    /// Number of open actions in the plan
    pub fn opens(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, ExecutionAction::Open { .. }))
            .count()
    }
}

/// Context for one decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionContext {
    /// The evaluated bar is at or after the daily cutoff
    pub session_closed: bool,
    /// Parameters are active; false suppresses new opens
    pub allow_open: bool,
}

impl Default for DecisionContext {
    fn default() -> Self {
        Self {
            session_closed: false,
            allow_open: true,
        }
    }
}

/// Translates signal transitions into open/close steps
pub struct Executor {
    neutral_policy: NeutralPolicy,
}

impl Executor {
    pub fn new(neutral_policy: NeutralPolicy) -> Self {
        Self { neutral_policy }
    }

    pub fn neutral_policy(&self) -> NeutralPolicy {
        self.neutral_policy
    }

    /// Process the latest desired signal and decide what to do
    ///
    /// Reversals are two steps: close the current side, then open the other.
    pub fn process_signal(
        &self,
        pm: &PositionManager,
        desired: Signal,
        ctx: DecisionContext,
    ) -> ExecutionDecision {
        let state = pm.state();

        if ctx.session_closed {
            return if state == Signal::Flat {
                ExecutionDecision::skip(Signal::Flat, "Session closed, already flat")
            } else {
                ExecutionDecision {
                    actions: vec![ExecutionAction::Close {
                        reason: ExitReason::SessionEnd,
                    }],
                    target: Signal::Flat,
                    reason: format!("Session closed, closing {}", state),
                }
            };
        }

        if desired == pm.last_signal() {
            return ExecutionDecision::skip(desired, format!("No transition (still {})", desired));
        }

        let mut actions = match (state, desired) {
            (current, wanted) if current == wanted => Vec::new(),
            (_, Signal::Flat) => match self.neutral_policy {
                NeutralPolicy::Close => vec![ExecutionAction::Close {
                    reason: ExitReason::Signal,
                }],
                NeutralPolicy::Hold => Vec::new(),
            },
            (Signal::Flat, wanted) => wanted
                .open_side()
                .map(|side| vec![ExecutionAction::Open { side }])
                .unwrap_or_default(),
            (_, wanted) => {
                let mut steps = vec![ExecutionAction::Close {
                    reason: ExitReason::Reversal,
                }];
                if let Some(side) = wanted.open_side() {
                    steps.push(ExecutionAction::Open { side });
                }
                steps
            }
        };

        let suppressed = !ctx.allow_open && actions.iter().any(|a| matches!(a, ExecutionAction::Open { .. }));
        if suppressed {
            actions.retain(|a| !matches!(a, ExecutionAction::Open { .. }));
        }

        let reason = if suppressed {
            format!("{} -> {} (opens suppressed: no active parameters)", state, desired)
        } else if actions.is_empty() {
            format!("{} -> {} needs no order", state, desired)
        } else {
            format!("{} -> {}", state, desired)
        };

        ExecutionDecision {
            actions,
            target: desired,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Position;
    use chrono::Utc;

    fn holding(side: Side) -> PositionManager {
        let mut pm = PositionManager::new("WIN$N", 2);
        pm.open_position(Position {
            ticket: 1,
            side,
            open_price: 100.0,
            stop_loss: 97.0,
            take_profit: 105.0,
            volume: 1.0,
            opened_at: Utc::now(),
        })
        .unwrap();
        pm.mark_acted(side.direction());
        pm
    }

    fn close(reason: ExitReason) -> ExecutionAction {
        ExecutionAction::Close { reason }
    }

    #[test]
    fn test_flat_to_long_opens() {
        let pm = PositionManager::new("WIN$N", 2);
        let decision = Executor::new(NeutralPolicy::Close).process_signal(&pm, Signal::Long, DecisionContext::default());

        assert_eq!(decision.actions, vec![ExecutionAction::Open { side: Side::Buy }]);
        assert_eq!(decision.target, Signal::Long);
    }

    #[test]
    fn test_flat_to_short_opens() {
        let pm = PositionManager::new("WIN$N", 2);
        let decision = Executor::new(NeutralPolicy::Close).process_signal(&pm, Signal::Short, DecisionContext::default());
        assert_eq!(decision.actions, vec![ExecutionAction::Open { side: Side::Sell }]);
    }

    #[test]
    fn test_reversal_is_close_then_open() {
        let pm = holding(Side::Buy);
        let decision = Executor::new(NeutralPolicy::Close).process_signal(&pm, Signal::Short, DecisionContext::default());

        assert_eq!(
            decision.actions,
            vec![close(ExitReason::Reversal), ExecutionAction::Open { side: Side::Sell }]
        );
    }

    #[test]
    fn test_neutral_closes_under_close_policy() {
        let pm = holding(Side::Sell);
        let decision = Executor::new(NeutralPolicy::Close).process_signal(&pm, Signal::Flat, DecisionContext::default());
        assert_eq!(decision.actions, vec![close(ExitReason::Signal)]);
    }

    #[test]
    fn test_neutral_holds_under_hold_policy() {
        let pm = holding(Side::Sell);
        let decision = Executor::new(NeutralPolicy::Hold).process_signal(&pm, Signal::Flat, DecisionContext::default());

        assert!(decision.is_noop());
        assert_eq!(decision.target, Signal::Flat);
    }

    #[test]
    fn test_same_signal_is_noop() {
        let pm = holding(Side::Buy);
        let decision = Executor::new(NeutralPolicy::Close).process_signal(&pm, Signal::Long, DecisionContext::default());
        assert!(decision.is_noop());
        assert!(decision.reason.contains("No transition"));
    }

    #[test]
    fn test_no_reopen_after_broker_close() {
        // TP hit: state is flat but the long transition was already acted on
        let mut pm = PositionManager::new("WIN$N", 2);
        pm.mark_acted(Signal::Long);

        let decision = Executor::new(NeutralPolicy::Close).process_signal(&pm, Signal::Long, DecisionContext::default());
        assert!(decision.is_noop());
    }

    #[test]
    fn test_session_closed_forces_close() {
        let pm = holding(Side::Buy);
        let ctx = DecisionContext {
            session_closed: true,
            allow_open: true,
        };
        // Hold policy does not keep a position past the cutoff
        let decision = Executor::new(NeutralPolicy::Hold).process_signal(&pm, Signal::Flat, ctx);
        assert_eq!(decision.actions, vec![close(ExitReason::SessionEnd)]);
    }

    #[test]
    fn test_session_closed_when_flat_is_noop() {
        let pm = PositionManager::new("WIN$N", 2);
        let ctx = DecisionContext {
            session_closed: true,
            allow_open: true,
        };
        assert!(Executor::new(NeutralPolicy::Close).process_signal(&pm, Signal::Flat, ctx).is_noop());
    }

    #[test]
    fn test_inactive_hour_suppresses_opens() {
        let ctx = DecisionContext {
            session_closed: false,
            allow_open: false,
        };

        let pm = PositionManager::new("WIN$N", 2);
        let decision = Executor::new(NeutralPolicy::Close).process_signal(&pm, Signal::Long, ctx);
        assert!(decision.is_noop());
        assert!(decision.reason.contains("suppressed"));

        let pm = holding(Side::Buy);
        let decision = Executor::new(NeutralPolicy::Close).process_signal(&pm, Signal::Short, ctx);
        assert_eq!(decision.actions, vec![close(ExitReason::Reversal)]);
        assert_eq!(decision.opens(), 0);
    }
}
