//! Display precision for prices and quantities.
//!
//! Precision follows magnitude so that both a BTC price and a sub-cent token
//! price stay readable in a fixed-width ladder.

use rust_decimal::{Decimal, RoundingStrategy};

/// Render a price: 2 dp at or above 1000, 4 dp at or above 1, 6 dp at or
/// above 0.01, otherwise 8 dp.
#[must_use]
pub fn format_price(price: Decimal) -> String {
    let abs = price.abs();
    let dp = if abs >= Decimal::ONE_THOUSAND {
        2
    } else if abs >= Decimal::ONE {
        4
    } else if abs >= Decimal::new(1, 2) {
        6
    } else {
        8
    };
    fixed(price, dp)
}

/// Render a quantity: 2 dp at or above 1000, 4 dp at or above 1, otherwise
/// 6 dp.
#[must_use]
pub fn format_qty(quantity: Decimal) -> String {
    let abs = quantity.abs();
    let dp = if abs >= Decimal::ONE_THOUSAND {
        2
    } else if abs >= Decimal::ONE {
        4
    } else {
        6
    };
    fixed(quantity, dp)
}

fn fixed(value: Decimal, dp: u32) -> String {
    let rounded = value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
    format!("{rounded:.prec$}", prec = dp as usize)
}
