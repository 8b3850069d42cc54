//! Monetary arithmetic for the AR ledger.
//!
//! Every balance-carrying field in the engine is a `Decimal` normalized
//! through this module before it is stored or compared. The canonical
//! rounding rule is two decimal places, half-up.

use rust_decimal::{Decimal, RoundingStrategy};

/// Monetary precision (2 decimal places).
pub const DECIMAL_PLACES: u32 = 2;

/// Tolerance for drift introduced by upstream float conversions (1e-6).
pub const MONEY_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 6);

/// Round to 2 decimal places, half-up.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

/// `value × rate / 100`, rounded. Used for tax rates and discount percentages.
pub fn percent_of(value: Decimal, rate: Decimal) -> Decimal {
    round2(value * rate / Decimal::ONE_HUNDRED)
}

/// `a − b`, rounded; results negative by no more than [`MONEY_EPSILON`]
/// are clamped to exactly zero.
pub fn sub_clamped(a: Decimal, b: Decimal) -> Decimal {
    let diff = a - b;
    if diff < Decimal::ZERO && -diff <= MONEY_EPSILON {
        return Decimal::ZERO;
    }
    round2(diff)
}

/// True when a balance is zero within [`MONEY_EPSILON`].
pub fn is_settled(balance: Decimal) -> bool {
    balance.abs() <= MONEY_EPSILON
}

/// Split `total` into `count` installments: each truncated down to 2
/// decimals, with the rounding remainder absorbed by the final installment
/// so the parts always sum back to `round2(total)` exactly.
pub fn split_installments(total: Decimal, count: u32) -> Vec<Decimal> {
    debug_assert!(count > 0, "installment count must be positive");
    let total = round2(total);
    let base = (total / Decimal::from(count))
        .round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::ToZero);
    let mut parts = vec![base; count as usize];
    if let Some(last) = parts.last_mut() {
        *last = total - base * Decimal::from(count - 1);
    }
    parts
}
