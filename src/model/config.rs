use crate::model::symbols::UnknownSymbolPolicy;
use rust_decimal::Decimal;

/// Absolute difference in USD tolerated when reconciling amounts.
pub const DEFAULT_ROUNDING_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Engine settings. Flag parsing happens in the binary; these are the resolved values.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Translate amounts to EUR. When disabled, everything is reported in USD at parity and no
    /// currency gains arise.
    pub currency_output_enabled: bool,

    pub unknown_symbol_policy: UnknownSymbolPolicy,

    /// Route realized losses on written options to the term-loss pot.
    pub term_loss_includes_written_options: bool,

    /// Process up to the end of this year, and report only its rows and bucket.
    pub restrict_to_tax_year: Option<i32>,

    pub rounding_tolerance: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency_output_enabled: true,
            unknown_symbol_policy: UnknownSymbolPolicy::Fail,
            term_loss_includes_written_options: false,
            restrict_to_tax_year: None,
            rounding_tolerance: DEFAULT_ROUNDING_TOLERANCE,
        }
    }
}
