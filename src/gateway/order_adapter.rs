use std::sync::Arc;

use super::retcode::{self, Retcode};
use super::{OrderGateway, OrderRequest, OrderResult, OrderTime};
use crate::error::TraderError;
use crate::models::{
    FillPolicy, IntentKind, OrderIntent, OrderOutcome, RejectionClass, Side, SymbolSpec,
    Tick,
};
use crate::Result;

/// Fallback order when the preferred filling policy is unsupported
const FILLING_FALLBACK: [FillPolicy; 3] = [FillPolicy::Fok, FillPolicy::Ioc, FillPolicy::Return];

/// Round `volume` to the nearest `volume_step` and clamp it to the instrument limits
pub fn normalize_volume(volume: f64, spec: &SymbolSpec) -> Result<f64> {
    if !volume.is_finite() || volume <= 0.0 {
        return Err(TraderError::Preflight(format!("volume {} must be positive", volume)));
    }
    if spec.volume_min > spec.volume_max {
        return Err(TraderError::Preflight(format!(
            "{} volume limits are inconsistent (min {} > max {})",
            spec.symbol, spec.volume_min, spec.volume_max
        )));
    }

    let stepped = if spec.volume_step > 0.0 {
        (volume / spec.volume_step).round() * spec.volume_step
    } else {
        volume
    };
    // Strip float noise such as 0.30000000000000004
    let cleaned = (stepped * 1e8).round() / 1e8;

    Ok(cleaned.clamp(spec.volume_min, spec.volume_max))
}

/// Round `price` to the instrument's tick size, then to its digit precision
pub fn round_price(price: f64, spec: &SymbolSpec) -> f64 {
    let ticked = if spec.tick_size > 0.0 {
        (price / spec.tick_size).round() * spec.tick_size
    } else {
        price
    };
    let scale = 10f64.powi(spec.digits as i32);
    (ticked * scale).round() / scale
}

/// Preferred policy if supported, else the first supported fallback
pub fn select_filling(preferred: FillPolicy, supported: &[FillPolicy]) -> Option<FillPolicy> {
    if supported.contains(&preferred) {
        return Some(preferred);
    }
    FILLING_FALLBACK
        .into_iter()
        .find(|policy| supported.contains(policy))
}

/// Volume and filling that passed local validation
#[derive(Debug, Clone, Copy, PartialEq)]
struct Prepared {
    volume: f64,
    filling: FillPolicy,
}

/// Builds, validates, submits and classifies orders for one instrument
pub struct OrderAdapter {
    gateway: Arc<dyn OrderGateway>,
    symbol: String,
    magic: u64,
    deviation: u32,
    spec: Option<SymbolSpec>,
}

impl OrderAdapter {
    pub fn new(
        gateway: Arc<dyn OrderGateway>,
        symbol: impl Into<String>,
        magic: u64,
        deviation: u32,
    ) -> Self {
        Self {
            gateway,
            symbol: symbol.into(),
            magic,
            deviation,
            spec: None,
        }
    }

    /// Instrument constraints, fetched once per session
    pub async fn spec(&mut self) -> Result<&SymbolSpec> {
        if self.spec.is_none() {
            let spec = self.gateway.symbol_info(&self.symbol).await?;
            tracing::debug!(
                symbol = %spec.symbol,
                digits = spec.digits,
                volume_min = spec.volume_min,
                volume_step = spec.volume_step,
                "Loaded symbol constraints"
            );
            self.spec = Some(spec);
        }
        self.spec
            .as_ref()
            .ok_or_else(|| TraderError::Gateway(format!("no symbol info for {}", self.symbol)))
    }

    /// Pre-flight, check and submit `intent`
    ///
    /// Local validation failures are `Err(Preflight)`; everything the terminal
    /// says comes back as an `OrderOutcome`. A transient rejection is retried
    /// once with a fresh quote.
    pub async fn submit(&mut self, intent: &OrderIntent) -> Result<OrderOutcome> {
        let spec = self.spec().await?.clone();
        let prepared = self.preflight(intent, &spec)?;

        let mut outcome = self.attempt(intent, prepared, &spec).await;
        if let OrderOutcome::Rejected {
            retcode,
            class: RejectionClass::Transient,
            ..
        } = &outcome
        {
            tracing::warn!(
                symbol = %self.symbol,
                retcode,
                "Transient rejection ({}), retrying once with a fresh quote",
                retcode::describe(*retcode)
            );
            outcome = self.attempt(intent, prepared, &spec).await;
        }

        self.log_outcome(intent, &outcome);
        Ok(outcome)
    }

    fn preflight(&self, intent: &OrderIntent, spec: &SymbolSpec) -> Result<Prepared> {
        if !spec.trade_allowed {
            return Err(TraderError::Preflight(format!("trading is disabled for {}", spec.symbol)));
        }
        if intent.kind == IntentKind::Close && intent.position_ticket.is_none() {
            return Err(TraderError::Preflight("close intent without a position ticket".to_string()));
        }

        let volume = normalize_volume(intent.volume, spec)?;
        if (volume - intent.volume).abs() > 1e-9 {
            tracing::debug!(requested = intent.volume, volume, "Volume adjusted to instrument step");
        }

        let filling = select_filling(intent.filling, &spec.filling_modes).ok_or_else(|| {
            TraderError::Preflight(format!(
                "{} supports none of the filling policies {:?}",
                spec.symbol, FILLING_FALLBACK
            ))
        })?;

        Ok(Prepared { volume, filling })
    }

    fn build_request(
        &self,
        intent: &OrderIntent,
        prepared: Prepared,
        spec: &SymbolSpec,
        tick: &Tick,
    ) -> OrderRequest {
        let market = match intent.side {
            Side::Buy => tick.ask,
            Side::Sell => tick.bid,
        };
        let price = round_price(intent.price.unwrap_or(market), spec);
        let direction = match intent.side {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        };

        OrderRequest {
            symbol: self.symbol.clone(),
            volume: prepared.volume,
            side: intent.side,
            price,
            sl: intent
                .sl_points
                .map(|points| round_price(price - direction * points, spec)),
            tp: intent
                .tp_points
                .map(|points| round_price(price + direction * points, spec)),
            deviation: self.deviation,
            magic: self.magic,
            comment: intent.comment.clone(),
            type_time: OrderTime::Day,
            type_filling: prepared.filling,
            position: intent.position_ticket,
            tag: intent.tag,
        }
    }

    async fn attempt(&self, intent: &OrderIntent, prepared: Prepared, spec: &SymbolSpec) -> OrderOutcome {
        let tick = match self.gateway.tick(&self.symbol).await {
            Ok(tick) => tick,
            Err(e) => return gateway_error(format!("no quote: {}", e)),
        };
        let request = self.build_request(intent, prepared, spec, &tick);

        match self.gateway.check(&request).await {
            Ok(check) if check.passed() => {}
            Ok(check) => return rejection(check.retcode, check.comment),
            Err(e) => return gateway_error(format!("order check failed: {}", e)),
        }

        match self.gateway.submit(&request).await {
            Ok(Some(result)) => outcome_from_result(&request, result),
            Ok(None) => gateway_error("order send returned a null result".to_string()),
            Err(e) => gateway_error(format!("order send failed: {}", e)),
        }
    }

    fn log_outcome(&self, intent: &OrderIntent, outcome: &OrderOutcome) {
        match outcome {
            OrderOutcome::Accepted { ticket, price, volume, retcode } => tracing::info!(
                symbol = %self.symbol,
                tag = %intent.tag,
                ticket,
                price,
                volume,
                retcode,
                "{:?} {} accepted",
                intent.kind,
                intent.side
            ),
            OrderOutcome::Rejected { retcode, class, comment } => tracing::error!(
                symbol = %self.symbol,
                tag = %intent.tag,
                retcode,
                class = ?class,
                "{:?} {} rejected: {} ({})",
                intent.kind,
                intent.side,
                retcode::describe(*retcode),
                comment
            ),
            OrderOutcome::GatewayError { message } => tracing::error!(
                symbol = %self.symbol,
                tag = %intent.tag,
                "{:?} {} failed: {}",
                intent.kind,
                intent.side,
                message
            ),
        }
    }
}

fn gateway_error(message: String) -> OrderOutcome {
    OrderOutcome::GatewayError { message }
}

fn rejection(code: u32, comment: String) -> OrderOutcome {
    let class = match retcode::classify(code) {
        Retcode::Rejected(class) => class,
        // An acceptance code where a check failure was reported
        Retcode::Accepted { .. } => RejectionClass::Environment,
    };
    OrderOutcome::Rejected {
        retcode: code,
        class,
        comment,
    }
}

fn outcome_from_result(request: &OrderRequest, result: OrderResult) -> OrderOutcome {
    match retcode::classify(result.retcode) {
        Retcode::Accepted { partial } => {
            let volume = if result.volume > 0.0 { result.volume } else { request.volume };
            if partial {
                tracing::warn!(requested = request.volume, filled = volume, "Partial fill");
            }
            let ticket = request
                .position
                .or(Some(result.order).filter(|t| *t > 0))
                .unwrap_or(result.deal);
            OrderOutcome::Accepted {
                ticket,
                price: if result.price > 0.0 { result.price } else { request.price },
                volume,
                retcode: result.retcode,
            }
        }
        Retcode::Rejected(class) => OrderOutcome::Rejected {
            retcode: result.retcode,
            class,
            comment: result.comment,
        },
    }
}
