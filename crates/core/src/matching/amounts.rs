//! Overflow-safe arithmetic for document amounts.
//!
//! Amounts come straight from captured documents, so any of them may be absurd.
//! These helpers saturate or clamp instead of panicking; a malformed line then shows
//! up as a large out-of-tolerance variance rather than aborting the match.

use rust_decimal::Decimal;

/// Largest percentage a variance reports. Bigger or overflowing ratios clamp here.
pub fn variance_pct_cap() -> Decimal {
    Decimal::from(1_000_000)
}

/// `|amount| / |base| * 100`, rounded to four places and clamped to
/// [`variance_pct_cap`]. A zero base also yields the cap.
pub fn percent_of(amount: Decimal, base: Decimal) -> Decimal {
    let cap = variance_pct_cap();
    amount
        .abs()
        .checked_div(base.abs())
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .map_or(cap, |pct| pct.min(cap))
        .round_dp(4)
}

/// `|actual - expected|` as a percentage of `expected`.
pub fn divergence_pct(actual: Decimal, expected: Decimal) -> Decimal {
    if expected.is_zero() {
        return if actual.is_zero() { Decimal::ZERO } else { Decimal::ONE_HUNDRED };
    }
    percent_of(actual.saturating_sub(expected), expected)
}

pub fn saturating_sum<I>(values: I) -> Decimal
where
    I: IntoIterator<Item = Decimal>,
{
    values.into_iter().fold(Decimal::ZERO, Decimal::saturating_add)
}
