pub use self::asset_ledger::{AssetLedger, AssetLedgerError, PositionState, RealizedAssetResult};
pub use self::classifier::{EngineError, TaxClassifier};
pub use self::currency_ledger::{split_at_zero, BalanceState, CurrencyGainResult, CurrencyLedger};
pub use self::engine::{Engine, LedgerContext};
pub use self::lot::{CurrencyLot, CurrencyOrigin, Lot};
use crate::model::{Report, Warning};
use chrono::{DateTime, Utc};
use std::fmt::{self, Display};

mod asset_ledger;
mod classifier;
mod currency_ledger;
mod engine;
mod lot;

/// End-of-run list of everything that needs a manual look.
pub struct CheckList<'a> {
    warnings: &'a [(DateTime<Utc>, Warning)],
}

impl Display for CheckList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Warnings CheckList")?;
        writeln!(f, "======== =========")?;
        writeln!(f)?;

        if self.is_passing() {
            writeln!(f, "No issues detected! 🎉")?;
        } else {
            for (time, warning) in self.warnings {
                writeln!(f, "⚠️ {time}: {warning}")?;
            }
        }

        Ok(())
    }
}

impl<'a> CheckList<'a> {
    pub fn new(report: &'a Report) -> Self {
        Self {
            warnings: &report.warnings,
        }
    }

    pub fn is_passing(&self) -> bool {
        self.warnings.is_empty()
    }
}
