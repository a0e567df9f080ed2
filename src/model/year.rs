use crate::basis::{CurrencyLot, Lot};
use crate::model::amount::{EurAmount, UsdAmount};
use crate::model::record::{escape, Category, OutputRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use tracing::debug;

/// Totals for one tax year.
///
/// Realized PnL lands in its category, except for term losses which are held in a separate pot.
/// Equity gains and losses are also kept apart because they offset only each other.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct YearBucket {
    pub year: i32,
    pub pnl: BTreeMap<Category, EurAmount>,
    pub equity_gains: EurAmount,
    pub equity_losses: EurAmount,

    /// Interest credited and charged. Both are part of the interest total.
    pub interest_received: EurAmount,
    pub interest_paid: EurAmount,

    /// Dividends paid on short stock. Part of the dividend total.
    pub dividends_paid: EurAmount,

    /// Restricted losses from futures (and written options, if configured). Never positive.
    pub term_loss_pot: EurAmount,
    pub usd_gains_taxable: EurAmount,
    pub usd_gains_free: EurAmount,

    /// Commissions plus broker fees, net of refunds.
    pub fees: EurAmount,
    pub account_total: UsdAmount,

    /// Open positions when the year was closed.
    pub positions: BTreeMap<String, Vec<Lot>>,

    /// The USD cash queue when the year was closed.
    pub currency_lots: Vec<CurrencyLot>,
    pub finalized: bool,
}

impl YearBucket {
    pub fn new(year: i32) -> Self {
        Self {
            year,
            ..Default::default()
        }
    }

    /// Fold one classified record into the totals.
    pub fn add(&mut self, record: &OutputRecord) {
        if self.finalized {
            // A checkpoint taken mid-year, resumed with more rows of the same year
            debug!("Reopening tax year {}", self.year);
            self.finalized = false;
        }

        let category = record.category;
        match category {
            Category::Transfer => (),
            Category::Dividend | Category::WithholdingTax | Category::Interest => {
                *self.pnl.entry(category).or_default() += record.pnl;

                match category {
                    Category::Interest if record.pnl.is_negative() => {
                        self.interest_paid += record.pnl;
                    }
                    Category::Interest => self.interest_received += record.pnl,
                    Category::Dividend if record.pnl.is_negative() => {
                        self.dividends_paid += record.pnl;
                    }
                    _ => (),
                }
            }
            Category::OrderFee | Category::BrokerFee => {
                *self.pnl.entry(category).or_default() += record.pnl;
                self.fees -= record.pnl;
            }
            Category::Equity
            | Category::EquityFund
            | Category::MixedFund
            | Category::RealEstateFund
            | Category::OtherFund
            | Category::Option
            | Category::Future
            | Category::Crypto => {
                *self.pnl.entry(category).or_default() += record.pnl - record.term_loss;
                self.term_loss_pot += record.term_loss;

                if category == Category::Equity {
                    if record.pnl.is_positive() {
                        self.equity_gains += record.pnl;
                    } else {
                        self.equity_losses += record.pnl;
                    }
                }
            }
        }

        self.fees += record.eurusd.usd_to_eur(record.fees);
        self.usd_gains_taxable += record.usd_gains;
        self.usd_gains_free += record.usd_gains_notax;
        self.account_total = record.account_total;
    }

    /// Close the year with end-of-year snapshots.
    pub fn finalize(
        &mut self,
        positions: BTreeMap<String, Vec<Lot>>,
        currency_lots: Vec<CurrencyLot>,
    ) {
        debug!("Finalizing tax year {}", self.year);
        self.positions = positions;
        self.currency_lots = currency_lots;
        self.finalized = true;
    }

    pub fn total(&self, category: Category) -> EurAmount {
        self.pnl.get(&category).copied().unwrap_or_default()
    }

    /// Gains from every category except equity, transfers and fees.
    pub fn other_pnl(&self) -> EurAmount {
        self.pnl
            .iter()
            .filter(|(category, _)| {
                !matches!(
                    category,
                    Category::Equity
                        | Category::Transfer
                        | Category::OrderFee
                        | Category::BrokerFee
                )
            })
            .map(|(_, amount)| *amount)
            .sum()
    }
}

impl Display for YearBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Write the CSV header
        writeln!(f, r#""Year {year}","Amount""#, year = self.year)?;

        for category in Category::ALL {
            if let Some(amount) = self.pnl.get(&category) {
                writeln!(f, r#""{category}","{amount}""#)?;
            }
        }

        let rows = [
            ("equity gains", self.equity_gains),
            ("equity losses", self.equity_losses),
            ("interest received", self.interest_received),
            ("interest paid", self.interest_paid),
            ("dividends paid", self.dividends_paid),
            ("other pnl", self.other_pnl()),
            ("term-loss pot", self.term_loss_pot),
            ("usd gains", self.usd_gains_taxable),
            ("usd gains tax-free", self.usd_gains_free),
            ("fees", self.fees),
        ];
        for (name, amount) in rows {
            writeln!(f, r#""{name}","{amount}""#)?;
        }
        writeln!(f, r#""account total (USD)","{}""#, self.account_total)?;

        // Open positions at the end of the year
        for (asset, lots) in &self.positions {
            for lot in lots {
                writeln!(
                    f,
                    r#""open {asset}","{quantity} @ {unit_cost} since {acquired}""#,
                    asset = escape(asset),
                    quantity = lot.quantity.normalize(),
                    unit_cost = lot.unit_cost,
                    acquired = lot.acquired.format("%F"),
                )?;
            }
        }
        for lot in &self.currency_lots {
            writeln!(
                f,
                r#""account-usd","{quantity} for {eur_cost} EUR since {acquired} ({origin:?})""#,
                quantity = lot.quantity,
                eur_cost = lot.eur_cost,
                acquired = lot.acquired.format("%F"),
                origin = lot.origin,
            )?;
        }

        Ok(())
    }
}
