//! Stop-loss policy engine.
//!
//! Pure decision logic: given a position's observed price extremes and
//! profit, produce the next candidate stop level, or nothing. The
//! engine performs no I/O and never emits a candidate that is not
//! strictly more protective than the current stop, so every accepted
//! move keeps the monotonic-favorable invariant by construction.
//!
//! Mode progression: fixed → breakeven (profit ≥ breakeven trigger,
//! stop moves to entry) → trailing (profit ≥ trailing trigger, stop
//! follows the extreme price at a distance) → tightened trailing
//! (profit ≥ tighten trigger, distance shrinks). The trail distance is
//! volatility-scaled when the position carries an ATR, otherwise the
//! configured static width.

use rust_decimal::Decimal;

use stopguard_core::config::StopPolicyConfig;
use stopguard_core::position::{Position, Side, StopMode};

/// A candidate stop change produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopDecision {
    pub new_stop: Decimal,
    pub mode: StopMode,
    pub trailing_distance: Decimal,
    pub reason: String,
}

/// Evaluates the policy state machine for one position.
///
/// Returns `None` when the current stop should stay where it is.
#[must_use]
pub fn evaluate(pos: &Position, config: &StopPolicyConfig) -> Option<StopDecision> {
    let pnl = pos.pnl_fraction();

    // Trailing activation takes precedence over breakeven: if profit
    // already clears the trailing trigger the breakeven step is skipped.
    if config.enable_trailing && pos.stop_mode != StopMode::Trailing && pnl >= config.trailing_trigger
    {
        let distance = initial_distance(pos, config);
        let candidate = trail_stop(pos.extreme_price, pos.side, distance);
        if pos.is_more_favorable(candidate) {
            tracing::info!(
                symbol = %pos.symbol,
                profit = %pnl,
                distance = %distance,
                "Trailing stop activated"
            );
            return Some(StopDecision {
                new_stop: candidate,
                mode: StopMode::Trailing,
                trailing_distance: distance,
                reason: format!("trailing activated at {} profit, distance {distance}", pnl),
            });
        }
        return None;
    }

    if pos.stop_mode == StopMode::Trailing {
        return evaluate_trailing(pos, config, pnl);
    }

    // fixed → breakeven
    if config.enable_breakeven && pos.stop_mode == StopMode::Fixed && pnl >= config.breakeven_trigger
    {
        let candidate = pos.entry_price;
        if pos.is_more_favorable(candidate) {
            tracing::info!(symbol = %pos.symbol, profit = %pnl, "Moving stop to breakeven");
            return Some(StopDecision {
                new_stop: candidate,
                mode: StopMode::Breakeven,
                trailing_distance: pos.trailing_distance,
                reason: format!("breakeven at {} profit", pnl),
            });
        }
    }

    None
}

/// Steady-state and tightening logic for a position already trailing.
fn evaluate_trailing(
    pos: &Position,
    config: &StopPolicyConfig,
    pnl: Decimal,
) -> Option<StopDecision> {
    let mut distance = pos.trailing_distance;
    let mut reason = None;

    // Tighten once profit clears the tighten trigger and the current
    // trail is wider than the tightened target.
    if pnl >= config.trailing_tighten_trigger {
        let tight = tight_distance(pos, config);
        if distance > tight {
            distance = tight;
            reason = Some(format!("trail tightened to {tight} at {} profit", pnl));
        }
    }

    let candidate = trail_stop(pos.extreme_price, pos.side, distance);
    if !pos.is_more_favorable(candidate) {
        return None;
    }

    let reason = reason.unwrap_or_else(|| {
        format!(
            "trailing {} at distance {distance} from extreme {}",
            pos.side, pos.extreme_price
        )
    });
    Some(StopDecision {
        new_stop: candidate,
        mode: StopMode::Trailing,
        trailing_distance: distance,
        reason,
    })
}

/// One-shot partial take-profit: the base-asset quantity to close at
/// market, or `None`. Guarded by `partial_tp_executed` so it can never
/// re-fire for the same position.
#[must_use]
pub fn partial_take_profit(pos: &Position, config: &StopPolicyConfig) -> Option<Decimal> {
    if !config.enable_partial_tp || pos.partial_tp_executed {
        return None;
    }
    if pos.pnl_fraction() < config.partial_tp_trigger {
        return None;
    }
    Some(pos.quantity * config.partial_tp_ratio)
}

/// Stop level at `distance` behind the extreme price.
fn trail_stop(extreme: Decimal, side: Side, distance: Decimal) -> Decimal {
    match side {
        Side::Long => extreme * (Decimal::ONE - distance),
        Side::Short => extreme * (Decimal::ONE + distance),
    }
}

/// Trail width at activation: ATR-scaled when a volatility measure is
/// available, otherwise the configured static width.
fn initial_distance(pos: &Position, config: &StopPolicyConfig) -> Decimal {
    scaled_distance(pos, config.atr_multiplier_initial)
        .unwrap_or(config.trailing_distance_initial)
}

/// Trail width after tightening.
fn tight_distance(pos: &Position, config: &StopPolicyConfig) -> Decimal {
    scaled_distance(pos, config.atr_multiplier_tight).unwrap_or(config.trailing_distance_tight)
}

fn scaled_distance(pos: &Position, multiplier: Decimal) -> Option<Decimal> {
    let atr = pos.atr?;
    if atr <= Decimal::ZERO || pos.current_price <= Decimal::ZERO {
        return None;
    }
    Some(atr / pos.current_price * multiplier)
}
