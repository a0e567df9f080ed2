use crate::basis::lot::{CurrencyLot, CurrencyOrigin};
use crate::model::amount::{EurAmount, UsdAmount};
use crate::model::exchange_rate::EurUsdRate;
use crate::util::fifo::FIFO;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Sign of the USD cash balance.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BalanceState {
    NonNegative,
    Negative,
}

/// Currency gains realized by one cash effect, in EUR.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CurrencyGainResult {
    pub taxable_gain: EurAmount,
    pub free_gain: EurAmount,
    pub new_balance: UsdAmount,

    /// Lots (or parts of lots) closed, oldest first.
    pub consumed_lots: Vec<CurrencyLot>,
}

/// FIFO queue of USD lots for the cash account ("account-usd").
///
/// Positive lots hold USD bought with EUR at some rate. Negative lots are debit, created when the
/// balance drops below zero. A queue never mixes the two.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CurrencyLedger {
    lots: FIFO<CurrencyLot>,
}

impl CurrencyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a net cash effect (`amount - fees`).
    ///
    /// `inflow_origin` classifies any positive balance this creates. Effects that move the balance
    /// across zero are split there: the part up to zero closes existing lots, the rest opens a new
    /// lot on the other side.
    pub fn apply(
        &mut self,
        effect: UsdAmount,
        inflow_origin: CurrencyOrigin,
        time: DateTime<Utc>,
        rate: EurUsdRate,
    ) -> CurrencyGainResult {
        let (closing, opening) = split_at_zero(self.balance(), effect);
        let mut result = CurrencyGainResult::default();

        if !closing.is_zero() {
            let taken = self.lots.splittable_take_while(closing.abs().to_decimal());
            let date = time.date_naive();

            for take in &taken.takes {
                let gain = rate.usd_to_eur(take.quantity) - take.eur_cost;
                let tax_free = take.is_tax_free_at(date);
                trace!(
                    "account-usd: close {} from {} ({:?}) = {gain}, tax-free: {tax_free}",
                    take.quantity,
                    take.acquired,
                    take.origin,
                );

                if tax_free {
                    result.free_gain += gain;
                } else {
                    result.taxable_gain += gain;
                }
            }
            result.consumed_lots = taken.takes;
        }

        if let Some(opening) = opening {
            let origin = if opening.is_negative() {
                CurrencyOrigin::Debit
            } else {
                inflow_origin
            };
            trace!("account-usd: open {opening} ({origin:?})");
            self.lots
                .append_back(CurrencyLot::new(opening, rate, time, origin));
        }

        result.new_balance = self.balance();
        debug!(
            "account-usd: applied {effect}, taxable {}, free {}, balance {}",
            result.taxable_gain, result.free_gain, result.new_balance,
        );

        result
    }

    pub fn balance(&self) -> UsdAmount {
        self.lots.iter().map(|lot| lot.quantity).sum()
    }

    pub fn state(&self) -> BalanceState {
        if self.balance().is_negative() {
            BalanceState::Negative
        } else {
            BalanceState::NonNegative
        }
    }

    pub fn lots(&self) -> impl Iterator<Item = &CurrencyLot> {
        self.lots.iter()
    }

    /// The full queue, for year-end reporting.
    pub fn snapshot(&self) -> Vec<CurrencyLot> {
        self.lots.iter().cloned().collect()
    }
}

/// Split a cash effect where it moves `balance` across zero.
///
/// Returns the part that reduces the balance toward zero (consuming lots), and the part that opens
/// new lots, if any. Effects in the direction of the balance, or on a zero balance, only open.
pub fn split_at_zero(balance: UsdAmount, effect: UsdAmount) -> (UsdAmount, Option<UsdAmount>) {
    let same_direction = balance.is_zero()
        || effect.is_zero()
        || balance.is_negative() == effect.is_negative();

    if same_direction {
        let opening = (!effect.is_zero()).then_some(effect);
        (UsdAmount::ZERO, opening)
    } else if effect.abs() <= balance.abs() {
        (effect, None)
    } else {
        (-balance, Some(effect + balance))
    }
}
