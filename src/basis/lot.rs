use crate::model::amount::{EurAmount, UsdAmount};
use crate::model::exchange_rate::EurUsdRate;
use crate::util::{HasSplit, Splittable};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Holding period after which currency disposals are tax-free, in days. The acquisition day does
/// not count.
pub(crate) const CURRENCY_HOLDING_DAYS: i64 = 365;

/// An open quantity of one asset, acquired at one cost.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Lot {
    /// Negative for short lots.
    pub quantity: Decimal,

    /// Cost per unit including the allocated opening fee.
    pub unit_cost: UsdAmount,

    /// Cost of the whole lot in EUR at the acquisition rate. Signed like `quantity`.
    pub eur_cost: EurAmount,
    pub acquired: DateTime<Utc>,

    /// Sequence number of the transaction that opened this lot.
    pub origin: usize,
}

impl Lot {
    pub fn cost_basis(&self) -> UsdAmount {
        self.unit_cost.scale(self.quantity)
    }
}

impl Splittable for Lot {
    fn magnitude(&self) -> Decimal {
        self.quantity.abs()
    }

    fn split(self, magnitude: Decimal) -> HasSplit<Self> {
        let take = magnitude * self.quantity.signum();
        let take_cost = self.eur_cost.scale(take).per(self.quantity);

        HasSplit {
            take: Self {
                quantity: take,
                eur_cost: take_cost,
                ..self.clone()
            },
            leave: Self {
                quantity: self.quantity - take,
                eur_cost: self.eur_cost - take_cost,
                ..self
            },
        }
    }
}

/// How a USD lot came into the account. Decides the tax status of its later disposal.
#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum CurrencyOrigin {
    /// Acquired in exchange for something else, e.g. sale proceeds or a deposit.
    Purchase,

    /// Income received in USD: dividends, option premium, interest, fee refunds.
    ExemptInflow,

    /// A negative balance. Inflows that repay it are not acquisitions.
    Debit,
}

/// USD held (or owed) with the EUR paid for it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CurrencyLot {
    /// Negative for [`CurrencyOrigin::Debit`] lots.
    pub quantity: UsdAmount,
    pub eur_cost: EurAmount,
    pub acquired: DateTime<Utc>,
    pub origin: CurrencyOrigin,
}

impl CurrencyLot {
    pub fn new(
        quantity: UsdAmount,
        rate: EurUsdRate,
        acquired: DateTime<Utc>,
        origin: CurrencyOrigin,
    ) -> Self {
        Self {
            quantity,
            eur_cost: rate.usd_to_eur(quantity),
            acquired,
            origin,
        }
    }

    /// Whether disposing of this lot on `date` is tax-free.
    pub fn is_tax_free_at(&self, date: NaiveDate) -> bool {
        match self.origin {
            CurrencyOrigin::ExemptInflow | CurrencyOrigin::Debit => true,
            CurrencyOrigin::Purchase => {
                (date - self.acquired.date_naive()).num_days() > CURRENCY_HOLDING_DAYS
            }
        }
    }
}

impl Splittable for CurrencyLot {
    fn magnitude(&self) -> Decimal {
        self.quantity.abs().to_decimal()
    }

    fn split(self, magnitude: Decimal) -> HasSplit<Self> {
        let total = self.quantity.to_decimal();
        let take = magnitude * total.signum();
        let take_cost = self.eur_cost.scale(take / total);

        HasSplit {
            take: Self {
                quantity: UsdAmount::new(take),
                eur_cost: take_cost,
                ..self.clone()
            },
            leave: Self {
                quantity: UsdAmount::new(total - take),
                eur_cost: self.eur_cost - take_cost,
                ..self
            },
        }
    }
}
