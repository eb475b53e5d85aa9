//! Per-token pricing for known models.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// (input, output) USD per token. Unknown models are free.
pub fn model_cost(model: &str) -> (Decimal, Decimal) {
    let model = model.rsplit('/').next().unwrap_or(model);
    let (input_per_m, output_per_m) = if model.starts_with("claude-3-5-haiku")
        || model.starts_with("claude-haiku")
    {
        (dec!(0.80), dec!(4))
    } else if model.starts_with("claude-opus") || model.starts_with("claude-3-opus") {
        (dec!(15), dec!(75))
    } else if model.starts_with("claude") {
        (dec!(3), dec!(15))
    } else if model.starts_with("gpt-4o-mini") {
        (dec!(0.15), dec!(0.60))
    } else if model.starts_with("gpt-4o") {
        (dec!(2.50), dec!(10))
    } else if model.starts_with("gpt-4.1-mini") {
        (dec!(0.40), dec!(1.60))
    } else if model.starts_with("gpt-4.1") {
        (dec!(2), dec!(8))
    } else {
        return (Decimal::ZERO, Decimal::ZERO);
    };
    let per_million = dec!(1_000_000);
    (input_per_m / per_million, output_per_m / per_million)
}

/// Cost of a single call.
pub fn call_cost(rates: (Decimal, Decimal), input_tokens: u32, output_tokens: u32) -> Decimal {
    rates.0 * Decimal::from(input_tokens) + rates.1 * Decimal::from(output_tokens)
}
