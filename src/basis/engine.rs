use crate::basis::asset_ledger::AssetLedger;
use crate::basis::classifier::{EngineError, TaxClassifier};
use crate::basis::currency_ledger::CurrencyLedger;
use crate::basis::lot::CurrencyOrigin;
use crate::model::config::EngineConfig;
use crate::model::exchange_rate::{EurUsdRate, RateProvider};
use crate::model::record::{Category, OutputRecord, Warning};
use crate::model::report::Report;
use crate::model::symbols::{AssetClass, SymbolTable, UnknownSymbolPolicy};
use crate::model::transaction::{Transaction, TransactionCode, TransactionSubcode};
use crate::model::year::YearBucket;
use crate::util::year_ext::GetYear as _;
use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Broker description of interest paid on a positive cash balance.
const CREDIT_INTEREST: &str = "INTEREST ON CREDIT BALANCE";

/// The only balance adjustment the broker books in practice.
const REGULATORY_FEE_ADJUSTMENT: &str = "Regulatory fee adjustment";

/// All mutable state of a run. Saved to and restored from checkpoints.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct LedgerContext {
    pub(crate) assets: AssetLedger,
    pub(crate) currency: CurrencyLedger,
    pub(crate) classifier: TaxClassifier,

    /// Number of transactions processed so far.
    pub(crate) sequence: usize,
}

impl LedgerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assets(&self) -> &AssetLedger {
        &self.assets
    }

    pub fn currency(&self) -> &CurrencyLedger {
        &self.currency
    }

    pub fn classifier(&self) -> &TaxClassifier {
        &self.classifier
    }

    pub fn sequence(&self) -> usize {
        self.sequence
    }

    /// Close the year of the last transaction with the current ledger snapshots.
    fn finalize_open_year(&mut self) {
        if let Some(year) = self.classifier.open_year() {
            let positions = self.assets.snapshot();
            let currency_lots = self.currency.snapshot();
            if let Some(bucket) = self.classifier.year_mut(year) {
                bucket.finalize(positions, currency_lots);
            }
        }
    }
}

/// Drives transactions through the ledgers. Holds only immutable collaborators, so one engine can
/// run any number of contexts.
#[derive(Debug)]
pub struct Engine<R> {
    config: EngineConfig,
    rates: R,
    symbols: SymbolTable,
}

impl<R: RateProvider> Engine<R> {
    pub fn new(config: EngineConfig, rates: R, symbols: SymbolTable) -> Self {
        Self {
            config,
            rates,
            symbols,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Process one transaction. On error the context must be discarded.
    pub fn process(
        &self,
        ctx: &mut LedgerContext,
        tx: &Transaction,
    ) -> Result<OutputRecord, EngineError> {
        ctx.classifier.check(tx)?;
        if ctx
            .classifier
            .open_year()
            .is_some_and(|year| year < tx.get_year())
        {
            ctx.finalize_open_year();
        }

        let rate = if self.config.currency_output_enabled {
            self.rates.rate_for(tx.date())?
        } else {
            EurUsdRate::PARITY
        };

        let mut warnings = Vec::new();
        let (category, asset_result, inflow_origin) = match &tx.code {
            TransactionCode::MoneyMovement => {
                let (category, origin) = money_movement_category(tx)?;
                (category, None, origin)
            }
            TransactionCode::Trade | TransactionCode::ReceiveDeliver => {
                check_trade_kind(tx)?;
                let class = self.asset_class(tx, &mut warnings)?;
                let mut result = ctx
                    .assets
                    .apply(tx, class, rate, &self.config, ctx.sequence)?;
                warnings.append(&mut result.warnings);
                if let Some(warning) = self.check_amount(tx, class) {
                    warnings.push(warning);
                }

                let origin = if class == AssetClass::Option
                    && tx.subcode == TransactionSubcode::SellToOpen
                {
                    // Option premium is income, not an exchange of EUR for USD
                    CurrencyOrigin::ExemptInflow
                } else {
                    CurrencyOrigin::Purchase
                };
                (Category::from(class), Some(result), origin)
            }
            TransactionCode::Unrecognized(_) => return Err(EngineError::unsupported(tx)),
        };

        let currency_result = if self.config.currency_output_enabled {
            ctx.currency
                .apply(tx.cash_effect(), inflow_origin, tx.time, rate)
        } else {
            Default::default()
        };

        let record = ctx.classifier.classify(
            tx,
            category,
            asset_result.as_ref(),
            &currency_result,
            rate,
            ctx.assets.open_cost(),
            warnings,
        );
        ctx.sequence += 1;

        Ok(record)
    }

    /// Process a whole time-ordered history, continuing from `ctx`.
    pub fn run(
        &self,
        ctx: &mut LedgerContext,
        txs: &[Transaction],
    ) -> Result<Report, EngineError> {
        self.run_restricted(ctx, txs, self.config.restrict_to_tax_year)
    }

    fn run_restricted(
        &self,
        ctx: &mut LedgerContext,
        txs: &[Transaction],
        restrict_to_tax_year: Option<i32>,
    ) -> Result<Report, EngineError> {
        let mut report = Report::default();
        let mut current_year = None;
        let mut years = BTreeSet::new();

        for tx in txs {
            let year = tx.get_year();
            if restrict_to_tax_year.is_some_and(|restrict| year > restrict) {
                debug!("Stopping at {}, past tax year", tx.time);
                break;
            }
            if current_year != Some(year) {
                report.openings.entry(year).or_insert_with(|| ctx.clone());
                current_year = Some(year);
            }

            report.records.push(self.process(ctx, tx)?);
            years.insert(year);
        }

        ctx.assets.finish()?;
        ctx.finalize_open_year();

        report.years = years
            .into_iter()
            .filter_map(|year| ctx.classifier.year(year).cloned().map(|bucket| (year, bucket)))
            .collect();
        if let Some(year) = restrict_to_tax_year {
            report.records.retain(|record| record.get_year() == year);
            report.years.retain(|&bucket_year, _| bucket_year == year);
        }
        report.collect_warnings();

        Ok(report)
    }

    fn asset_class(
        &self,
        tx: &Transaction,
        warnings: &mut Vec<Warning>,
    ) -> Result<AssetClass, EngineError> {
        if let Some(class) = self.symbols.classify(tx) {
            return Ok(class);
        }

        match self.config.unknown_symbol_policy {
            UnknownSymbolPolicy::Fail => Err(EngineError::UnknownSymbol {
                symbol: tx.symbol.clone(),
                time: tx.time,
            }),
            UnknownSymbolPolicy::AssumeIndividualStock => {
                warn!("{}: Assuming `{}` is an individual stock", tx.time, tx.symbol);
                warnings.push(Warning::AssumedIndividualStock {
                    symbol: tx.symbol.clone(),
                });

                Ok(AssetClass::Equity)
            }
        }
    }

    /// Trades must settle at `-quantity * price`, removals and split legs without cash.
    ///
    /// Futures are skipped, their amounts include the contract multiplier.
    fn check_amount(&self, tx: &Transaction, class: AssetClass) -> Option<Warning> {
        let expected = if class == AssetClass::Future {
            return None;
        } else if tx.code == TransactionCode::Trade {
            -tx.price.scale(tx.quantity)
        } else if tx.is_removal() || tx.is_split() {
            Default::default()
        } else {
            return None;
        };

        (!tx.amount.is_within(expected, self.config.rounding_tolerance)).then(|| {
            warn!(
                "{}: `{}` amount {} does not match quantity and price ({expected})",
                tx.time, tx.asset, tx.amount,
            );
            Warning::RoundingMismatch {
                context: format!("{} {} amount", tx.time.format("%F %T"), tx.asset),
                expected: expected.to_decimal(),
                found: tx.amount.to_decimal(),
            }
        })
    }
}

impl<R: RateProvider + Sync> Engine<R> {
    /// Re-run every tax year of `report` in isolation, starting from the context at the beginning
    /// of that year. Years run in parallel.
    ///
    /// Returns a [`Warning::RoundingMismatch`] for every year total that differs from the
    /// cumulative run by more than the rounding tolerance.
    pub fn run_years(
        &self,
        txs: &[Transaction],
        report: &Report,
    ) -> Result<Vec<Warning>, EngineError> {
        let results: Vec<_> = report
            .openings
            .par_iter()
            .filter(|(year, _)| report.years.contains_key(*year))
            .map(|(&year, opening)| {
                let start = txs.partition_point(|tx| tx.get_year() < year);
                let end = txs.partition_point(|tx| tx.get_year() <= year);
                debug!("Reconciling tax year {year} with {} transactions", end - start);

                let mut ctx = opening.clone();
                let isolated = self.run_restricted(&mut ctx, &txs[start..end], Some(year))?;

                Ok(match (report.years.get(&year), isolated.years.get(&year)) {
                    (Some(expected), Some(found)) => {
                        compare_buckets(expected, found, self.config.rounding_tolerance)
                    }
                    _ => Vec::new(),
                })
            })
            .collect::<Result<_, EngineError>>()?;

        Ok(results.into_iter().flatten().collect())
    }
}

/// Map a money movement to its category, and the origin of any USD it brings in.
fn money_movement_category(tx: &Transaction) -> Result<(Category, CurrencyOrigin), EngineError> {
    use TransactionSubcode::*;

    if tx.subcode != Transfer && !tx.fee.is_zero() {
        return Err(EngineError::unsupported(tx));
    }

    let income = |category| (category, CurrencyOrigin::ExemptInflow);
    let category = match tx.subcode {
        Transfer => (Category::Transfer, CurrencyOrigin::Purchase),
        CreditInterest | DebitInterest => income(Category::Interest),
        Deposit if tx.description == CREDIT_INTEREST => income(Category::Interest),
        // Cash paid in. Dividends always name their stock.
        Deposit if tx.symbol.is_empty() => (Category::Transfer, CurrencyOrigin::Purchase),
        Deposit | Dividend if tx.amount.is_negative() => income(Category::WithholdingTax),
        Deposit | Dividend => income(Category::Dividend),
        // Dividend owed on a short stock position
        Withdrawal if !tx.symbol.is_empty() => income(Category::Dividend),
        Withdrawal => (Category::Transfer, CurrencyOrigin::Purchase),
        Fee => income(Category::BrokerFee),
        BalanceAdjustment if tx.description == REGULATORY_FEE_ADJUSTMENT => {
            income(Category::OrderFee)
        }
        MarkToMarket => (Category::Future, CurrencyOrigin::Purchase),
        _ => return Err(EngineError::unsupported(tx)),
    };

    Ok(category)
}

fn check_trade_kind(tx: &Transaction) -> Result<(), EngineError> {
    use TransactionSubcode::*;

    let trades = matches!(
        tx.subcode,
        BuyToOpen | SellToOpen | BuyToClose | SellToClose | Buy | Sell
    );
    let deliveries = matches!(
        tx.subcode,
        Expiration | Assignment | Exercise | ForwardSplit | ReverseSplit
    );
    let valid = match tx.code {
        TransactionCode::Trade => trades,
        TransactionCode::ReceiveDeliver => trades || deliveries,
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(EngineError::unsupported(tx))
    }
}

/// Every total that differs by more than `tolerance`, as warnings.
fn compare_buckets(expected: &YearBucket, found: &YearBucket, tolerance: Decimal) -> Vec<Warning> {
    let categories: BTreeSet<_> = expected.pnl.keys().chain(found.pnl.keys()).collect();
    let mut figures: Vec<(String, _, _)> = categories
        .into_iter()
        .map(|&category| {
            (
                category.to_string(),
                expected.total(category),
                found.total(category),
            )
        })
        .collect();
    figures.extend([
        ("equity gains".to_string(), expected.equity_gains, found.equity_gains),
        ("equity losses".to_string(), expected.equity_losses, found.equity_losses),
        ("interest received".to_string(), expected.interest_received, found.interest_received),
        ("interest paid".to_string(), expected.interest_paid, found.interest_paid),
        ("dividends paid".to_string(), expected.dividends_paid, found.dividends_paid),
        ("term-loss pot".to_string(), expected.term_loss_pot, found.term_loss_pot),
        ("usd gains".to_string(), expected.usd_gains_taxable, found.usd_gains_taxable),
        ("usd gains tax-free".to_string(), expected.usd_gains_free, found.usd_gains_free),
        ("fees".to_string(), expected.fees, found.fees),
    ]);

    figures
        .into_iter()
        .filter(|(_, expected, found)| !expected.is_within(*found, tolerance))
        .map(|(name, expected_total, found_total)| {
            warn!("Tax year {}: isolated run disagrees on {name}", expected.year);
            Warning::RoundingMismatch {
                context: format!("{} {name}", expected.year),
                expected: expected_total.to_decimal(),
                found: found_total.to_decimal(),
            }
        })
        .collect()
}
