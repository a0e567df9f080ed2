use crate::basis::asset_ledger::{AssetLedgerError, RealizedAssetResult};
use crate::basis::currency_ledger::CurrencyGainResult;
use crate::model::amount::{EurAmount, UsdAmount};
use crate::model::exchange_rate::{EurUsdRate, ExchangeRateError};
use crate::model::record::{Category, OutputRecord, Warning};
use crate::model::transaction::Transaction;
use crate::model::year::YearBucket;
use crate::util::year_ext::GetYear as _;
use chrono::{DateTime, Datelike as _, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::trace;

/// Fatal conditions. Any of these aborts the run without output.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{time}: Unknown symbol `{symbol}`, add it to the symbol table or assume individual stocks")]
    UnknownSymbol { symbol: String, time: DateTime<Utc> },

    #[error("Transaction at {current} is earlier than the previous one at {previous}")]
    OutOfOrderTransaction {
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    #[error("{time}: Unsupported transaction `{code}` / `{subcode}` ({description})")]
    UnsupportedTransactionKind {
        time: DateTime<Utc>,
        code: String,
        subcode: String,
        description: String,
    },

    #[error("{time}: Account reference changed from `{expected}` to `{found}`")]
    AccountChanged {
        time: DateTime<Utc>,
        expected: String,
        found: String,
    },

    #[error("Asset ledger error")]
    AssetLedger(#[from] AssetLedgerError),

    #[error("Exchange rate error")]
    ExchangeRate(#[from] ExchangeRateError),
}

impl EngineError {
    pub(crate) fn unsupported(tx: &Transaction) -> Self {
        Self::UnsupportedTransactionKind {
            time: tx.time,
            code: tx.code.to_string(),
            subcode: tx.subcode.to_string(),
            description: tx.description.clone(),
        }
    }
}

/// Merges ledger results into output records, and keeps the running totals and year buckets.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TaxClassifier {
    account_total: UsdAmount,
    last_time: Option<DateTime<Utc>>,
    account_ref: Option<String>,
    years: BTreeMap<i32, YearBucket>,
}

impl TaxClassifier {
    /// Reject transactions that go back in time or belong to another account.
    pub fn check(&self, tx: &Transaction) -> Result<(), EngineError> {
        if let Some(previous) = self.last_time {
            if tx.time < previous {
                return Err(EngineError::OutOfOrderTransaction {
                    previous,
                    current: tx.time,
                });
            }
        }
        if let Some(expected) = &self.account_ref {
            if !tx.account_ref.is_empty() && *expected != tx.account_ref {
                return Err(EngineError::AccountChanged {
                    time: tx.time,
                    expected: expected.clone(),
                    found: tx.account_ref.clone(),
                });
            }
        }

        Ok(())
    }

    /// Build the output row for `tx` and fold it into its year.
    #[allow(clippy::too_many_arguments)]
    pub fn classify(
        &mut self,
        tx: &Transaction,
        category: Category,
        asset_result: Option<&RealizedAssetResult>,
        currency_result: &CurrencyGainResult,
        rate: EurUsdRate,
        open_cost: UsdAmount,
        warnings: Vec<Warning>,
    ) -> OutputRecord {
        let cash_effect = tx.cash_effect();
        let eur_amount = rate.usd_to_eur(cash_effect);
        self.account_total += cash_effect;
        self.last_time = Some(tx.time);
        if self.account_ref.is_none() && !tx.account_ref.is_empty() {
            self.account_ref = Some(tx.account_ref.clone());
        }

        let (pnl, term_loss, quantity) = match asset_result {
            Some(result) => (result.pnl, result.term_loss, result.quantity),
            None if category == Category::Transfer => (EurAmount::ZERO, EurAmount::ZERO, tx.quantity),
            // Daily futures settlement is realized PnL, and its losses are term losses.
            None if category == Category::Future && eur_amount.is_negative() => {
                (eur_amount, eur_amount, tx.quantity)
            }
            None => (eur_amount, EurAmount::ZERO, tx.quantity),
        };

        let record = OutputRecord {
            time: tx.time,
            category,
            pnl,
            term_loss,
            eur_amount,
            usd_amount: tx.amount,
            fees: tx.fee,
            eurusd: rate,
            quantity,
            asset: tx.asset.clone(),
            symbol: tx.symbol.clone(),
            description: tx.description.clone(),
            account_total: self.account_total,
            net_total: self.account_total + open_cost,
            tax_free: category == Category::Transfer || tx.is_split(),
            usd_gains: currency_result.taxable_gain,
            usd_gains_notax: currency_result.free_gain,
            warnings,
        };
        trace!("Classified: {record:?}");

        let year = tx.get_year();
        self.years
            .entry(year)
            .or_insert_with(|| YearBucket::new(year))
            .add(&record);

        record
    }

    /// The year of the most recent transaction, if it has not been finalized yet.
    pub fn open_year(&self) -> Option<i32> {
        let year = self.last_time?.year();

        self.years
            .get(&year)
            .is_some_and(|bucket| !bucket.finalized)
            .then_some(year)
    }

    pub fn year_mut(&mut self, year: i32) -> Option<&mut YearBucket> {
        self.years.get_mut(&year)
    }

    pub fn year(&self, year: i32) -> Option<&YearBucket> {
        self.years.get(&year)
    }

    pub fn account_total(&self) -> UsdAmount {
        self.account_total
    }

    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.last_time
    }
}
