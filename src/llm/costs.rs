//! Per-token pricing for known models.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// (input, output) USD cost per token for a model name. Unknown models
/// fall back to Sonnet pricing.
pub fn model_cost(model: &str) -> (Decimal, Decimal) {
    let per_million = if model.contains("haiku") {
        (dec!(0.80), dec!(4.00))
    } else if model.contains("opus") {
        (dec!(15.00), dec!(75.00))
    } else {
        (dec!(3.00), dec!(15.00))
    };
    (
        per_million.0 / dec!(1_000_000),
        per_million.1 / dec!(1_000_000),
    )
}
