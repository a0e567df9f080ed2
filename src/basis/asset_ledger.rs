use crate::basis::lot::Lot;
use crate::model::amount::{EurAmount, UsdAmount};
use crate::model::config::EngineConfig;
use crate::model::exchange_rate::EurUsdRate;
use crate::model::record::Warning;
use crate::model::symbols::{is_cash_settled, AssetClass};
use crate::model::transaction::{Transaction, TransactionSubcode};
use crate::util::fifo::FIFO;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, trace, warn};

#[derive(Debug, Error)]
pub enum AssetLedgerError {
    #[error("{time}: No open position in `{asset}` to remove")]
    NoOpenPosition { asset: String, time: DateTime<Utc> },

    #[error("{time}: Zero quantity for `{asset}`")]
    ZeroQuantity { asset: String, time: DateTime<Utc> },

    #[error("{time}: Split leg for `{asset}` has no matching leg")]
    UnpairedSplit { asset: String, time: DateTime<Utc> },

    #[error("{time}: Split of `{asset}` removes {delivered} shares, but the position is {position}")]
    SplitMismatch {
        asset: String,
        time: DateTime<Utc>,
        delivered: Decimal,
        position: Decimal,
    },
}

/// Direction of one asset's position.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PositionState {
    Flat,
    Long,
    Short,
}

/// What one transaction did to its asset's position.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RealizedAssetResult {
    /// Realized profit or loss, net of the allocated fee. EUR proceeds at today's rate minus the
    /// EUR cost of the consumed lots at their acquisition rates.
    pub pnl: EurAmount,

    /// The loss portions of `pnl` that belong to the term-loss pot. Never positive.
    pub term_loss: EurAmount,

    /// Signed quantity applied to the position, after resolving removals.
    pub quantity: Decimal,

    /// Lots (or parts of lots) closed, oldest first.
    pub consumed_lots: Vec<Lot>,
    pub remaining_position: Decimal,
    pub warnings: Vec<Warning>,
}

/// First leg of a split, waiting for its partner.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
struct PendingSplit {
    asset: String,
    symbol: String,
    time: DateTime<Utc>,
    quantity: Decimal,
}

/// FIFO lot queues for every asset with an open position.
///
/// All lots in one queue share a sign. Closing transactions consume lots from the front; any
/// excess opens a lot on the other side.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct AssetLedger {
    positions: BTreeMap<String, FIFO<Lot>>,
    pending_split: Option<PendingSplit>,
}

impl AssetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one trade or receive/deliver transaction of an already classified asset.
    ///
    /// `rate` converts this transaction's USD amounts. `sequence` identifies the transaction in lots
    /// it opens.
    pub fn apply(
        &mut self,
        tx: &Transaction,
        class: AssetClass,
        rate: EurUsdRate,
        config: &EngineConfig,
        sequence: usize,
    ) -> Result<RealizedAssetResult, AssetLedgerError> {
        if let Some(pending) = &self.pending_split {
            if !tx.is_split() || pending.asset != tx.asset || pending.time != tx.time {
                return Err(AssetLedgerError::UnpairedSplit {
                    asset: pending.asset.clone(),
                    time: pending.time,
                });
            }
        }
        if tx.is_split() {
            return self.apply_split_leg(tx);
        }

        let position = self.position(&tx.asset);
        let delta = if tx.is_removal() {
            // The feed's side is unreliable on removals. We cannot be both long and short, so the
            // position decides.
            if position.is_zero() {
                return Err(AssetLedgerError::NoOpenPosition {
                    asset: tx.asset.clone(),
                    time: tx.time,
                });
            }
            -position.signum() * tx.quantity.abs()
        } else {
            tx.quantity
        };
        if delta.is_zero() {
            return Err(AssetLedgerError::ZeroQuantity {
                asset: tx.asset.clone(),
                time: tx.time,
            });
        }

        let mut result = self.trade(
            &tx.asset,
            delta,
            tx.unit_price(),
            tx.fee,
            tx.time,
            class,
            rate,
            config,
            sequence,
        );

        let delivers_shares = matches!(
            tx.subcode,
            TransactionSubcode::Assignment | TransactionSubcode::Exercise
        );
        if delivers_shares
            && class == AssetClass::Option
            && delta.is_sign_negative()
            && !is_cash_settled(&tx.symbol)
        {
            warn!(
                "{}: Assignment/Exercise for long option `{}`, cost basis is not moved to the stock",
                tx.time, tx.asset,
            );
            result.warnings.push(Warning::AssignmentCostBasis {
                asset: tx.asset.clone(),
            });
        }

        Ok(result)
    }

    /// Open, add to, reduce, or reverse a position.
    #[allow(clippy::too_many_arguments)]
    fn trade(
        &mut self,
        asset: &str,
        delta: Decimal,
        price: UsdAmount,
        fee: UsdAmount,
        time: DateTime<Utc>,
        class: AssetClass,
        rate: EurUsdRate,
        config: &EngineConfig,
        sequence: usize,
    ) -> RealizedAssetResult {
        let fifo = self.positions.entry(asset.to_string()).or_default();
        let position_sign = fifo.peek_front().map(|lot| lot.quantity.signum());
        let mut result = RealizedAssetResult {
            quantity: delta,
            ..Default::default()
        };
        let mut open_qty = delta;

        if position_sign.is_some_and(|sign| sign != delta.signum()) {
            let taken = fifo.splittable_take_while(delta.abs());

            for take in &taken.takes {
                let fee_share = fee.scale(take.quantity.abs()).per(delta.abs());
                let proceeds = rate.usd_to_eur(price.scale(take.quantity) - fee_share);
                let portion = proceeds - take.eur_cost;
                trace!(
                    "{asset}: close {} @ {} (opened {} for {} EUR) = {portion} EUR",
                    take.quantity,
                    price,
                    take.acquired,
                    take.eur_cost,
                );

                result.pnl += portion;
                if portion.is_negative() && is_term_loss(class, take, config) {
                    result.term_loss += portion;
                }
            }
            result.consumed_lots = taken.takes;

            open_qty = taken.unfilled * delta.signum();
            if !open_qty.is_zero() {
                warn!("{time}: Position reversal on `{asset}`, new position {open_qty}");
                result.warnings.push(Warning::PositionReversal {
                    asset: asset.to_string(),
                    residual: open_qty,
                });
            }
        }

        if !open_qty.is_zero() {
            let fee_share = fee.scale(open_qty.abs()).per(delta.abs());
            let cost = price.scale(open_qty) + fee_share;
            let unit_cost = cost.per(open_qty);
            trace!("{asset}: open {open_qty} @ {unit_cost}");

            fifo.append_back(Lot {
                quantity: open_qty,
                unit_cost,
                eur_cost: rate.usd_to_eur(cost),
                acquired: time,
                origin: sequence,
            });
        }

        result.remaining_position = fifo.iter().map(|lot| lot.quantity).sum();
        if fifo.is_empty() {
            self.positions.remove(asset);
        }
        debug!(
            "{asset}: applied {delta}, pnl {}, position {}",
            result.pnl, result.remaining_position,
        );

        result
    }

    fn apply_split_leg(&mut self, tx: &Transaction) -> Result<RealizedAssetResult, AssetLedgerError> {
        let position = self.position(&tx.asset);
        let Some(first) = self.pending_split.take() else {
            debug!("{}: first split leg {} for `{}`", tx.time, tx.quantity, tx.asset);
            self.pending_split = Some(PendingSplit {
                asset: tx.asset.clone(),
                symbol: tx.symbol.clone(),
                time: tx.time,
                quantity: tx.quantity,
            });

            return Ok(RealizedAssetResult {
                quantity: tx.quantity,
                remaining_position: position,
                ..Default::default()
            });
        };

        // The leg against the position removes the old shares, the other one delivers new ones.
        let (removed, added) = if first.quantity.signum() != position.signum() {
            (first.quantity, tx.quantity)
        } else {
            (tx.quantity, first.quantity)
        };
        if position.is_zero()
            || removed.signum() != -position.signum()
            || added.signum() != position.signum()
            || removed.abs() != position.abs()
        {
            return Err(AssetLedgerError::SplitMismatch {
                asset: tx.asset.clone(),
                time: tx.time,
                delivered: removed,
                position,
            });
        }

        self.split(&tx.asset, added.abs(), removed.abs());

        let mut result = RealizedAssetResult {
            quantity: tx.quantity,
            remaining_position: self.position(&tx.asset),
            ..Default::default()
        };

        let prefix = format!("{} ", first.symbol);
        let options: Vec<_> = self
            .positions
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect();
        if !options.is_empty() {
            warn!(
                "{}: Split of `{}` leaves open options unadjusted: {options:?}",
                tx.time, first.symbol,
            );
            result.warnings.push(Warning::OptionsNotSplitAdjusted {
                symbol: first.symbol,
                assets: options,
            });
        }

        Ok(result)
    }

    /// Replace `removed` units of `asset` by `received` units. Cost basis is unchanged.
    ///
    /// Each lot is rescaled multiplying before dividing. Any rounding remainder goes to the newest
    /// lot, so the position equals `received` exactly.
    pub fn split(&mut self, asset: &str, received: Decimal, removed: Decimal) {
        let Some(fifo) = self.positions.get_mut(asset) else {
            return;
        };
        debug!("{asset}: split {removed} into {received}");

        let sign = fifo.peek_front().map_or(Decimal::ONE, |lot| lot.quantity.signum());
        let mut lots: Vec<_> = fifo
            .iter()
            .map(|lot| (lot.cost_basis(), lot.quantity * received / removed, lot.clone()))
            .collect();
        let allotted: Decimal = lots.iter().map(|(_, quantity, _)| *quantity).sum();
        if let Some((_, quantity, _)) = lots.last_mut() {
            *quantity += sign * received - allotted;
        }

        *fifo = lots
            .into_iter()
            .map(|(cost, quantity, lot)| Lot {
                quantity,
                unit_cost: cost.per(quantity),
                ..lot
            })
            .collect();
    }

    /// Fails if a split leg is still waiting for its partner.
    pub fn finish(&self) -> Result<(), AssetLedgerError> {
        match &self.pending_split {
            Some(pending) => Err(AssetLedgerError::UnpairedSplit {
                asset: pending.asset.clone(),
                time: pending.time,
            }),
            None => Ok(()),
        }
    }

    /// Signed sum of the asset's lots.
    pub fn position(&self, asset: &str) -> Decimal {
        self.positions
            .get(asset)
            .map(|fifo| fifo.iter().map(|lot| lot.quantity).sum())
            .unwrap_or_default()
    }

    pub fn state(&self, asset: &str) -> PositionState {
        let position = self.position(asset);
        if position.is_zero() {
            PositionState::Flat
        } else if position.is_sign_positive() {
            PositionState::Long
        } else {
            PositionState::Short
        }
    }

    pub fn lots(&self, asset: &str) -> impl Iterator<Item = &Lot> {
        self.positions.get(asset).into_iter().flatten()
    }

    /// Sum of quantity times unit cost over every open lot.
    pub fn open_cost(&self) -> UsdAmount {
        self.positions
            .values()
            .flatten()
            .map(|lot| lot.cost_basis())
            .sum()
    }

    /// All open lots per asset.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<Lot>> {
        self.positions
            .iter()
            .map(|(asset, fifo)| (asset.clone(), fifo.iter().cloned().collect()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

fn is_term_loss(class: AssetClass, lot: &Lot, config: &EngineConfig) -> bool {
    match class {
        AssetClass::Future => true,
        AssetClass::Option => {
            config.term_loss_includes_written_options && lot.quantity.is_sign_negative()
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::transaction::fixtures::*;
    use crate::model::transaction::{OptionInfo, OptionRight};
    use arbtest::arbtest;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use tracing_test::traced_test;

    const PARITY: EurUsdRate = EurUsdRate::PARITY;

    fn setup() -> (AssetLedger, EngineConfig) {
        (AssetLedger::new(), EngineConfig::default())
    }

    fn eur(value: Decimal) -> EurAmount {
        EurAmount::new(value)
    }

    fn put(strike: Decimal) -> OptionInfo {
        OptionInfo {
            expiry: NaiveDate::from_ymd_opt(2022, 3, 18).unwrap(),
            strike,
            right: OptionRight::Put,
        }
    }

    #[test]
    #[traced_test]
    fn test_open_then_partial_close() {
        let _ = tracing_log::LogTracer::init();
        let (mut ledger, config) = setup();

        let buy = trade("2022-02-01 15:00:00", "XYZ", dec!(100), dec!(10.00), dec!(1.00));
        let result = ledger.apply(&buy, AssetClass::Equity, PARITY, &config, 0).unwrap();
        assert_eq!(result.pnl, EurAmount::ZERO);
        assert_eq!(
            ledger.lots("XYZ").cloned().collect::<Vec<_>>(),
            vec![Lot {
                quantity: dec!(100),
                unit_cost: usd(dec!(10.01)),
                eur_cost: eur(dec!(1001)),
                acquired: buy.time,
                origin: 0,
            }],
        );

        let sell = trade("2022-02-15 15:00:00", "XYZ", dec!(-50), dec!(12.00), dec!(0.50));
        let result = ledger.apply(&sell, AssetClass::Equity, PARITY, &config, 1).unwrap();
        assert_eq!(result.pnl, eur(dec!(99.00)));
        assert_eq!(result.remaining_position, dec!(50));
        assert_eq!(result.consumed_lots.len(), 1);

        let remaining: Vec<_> = ledger.lots("XYZ").collect();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].quantity, dec!(50));
        assert_eq!(remaining[0].unit_cost, usd(dec!(10.01)));
        assert_eq!(remaining[0].acquired, buy.time);
    }

    #[test]
    #[traced_test]
    fn test_fifo_order() {
        let (mut ledger, config) = setup();

        for (i, (time, price)) in [
            ("2022-01-03 15:00:00", dec!(10)),
            ("2022-01-04 15:00:00", dec!(20)),
            ("2022-01-05 15:00:00", dec!(30)),
        ]
        .into_iter()
        .enumerate()
        {
            let buy = trade(time, "XYZ", dec!(10), price, dec!(0));
            ledger.apply(&buy, AssetClass::Equity, PARITY, &config, i).unwrap();
        }

        let sell = trade("2022-01-06 15:00:00", "XYZ", dec!(-15), dec!(40), dec!(0));
        let result = ledger.apply(&sell, AssetClass::Equity, PARITY, &config, 3).unwrap();

        let consumed: Vec<_> = result
            .consumed_lots
            .iter()
            .map(|lot| (lot.origin, lot.quantity))
            .collect();
        assert_eq!(consumed, vec![(0, dec!(10)), (1, dec!(5))]);
        // 10 * (40 - 10) + 5 * (40 - 20)
        assert_eq!(result.pnl, eur(dec!(400)));

        let origins: Vec<_> = ledger.lots("XYZ").map(|lot| (lot.origin, lot.quantity)).collect();
        assert_eq!(origins, vec![(1, dec!(5)), (2, dec!(10))]);
    }

    #[test]
    #[traced_test]
    fn test_short_position_round_trip() {
        let (mut ledger, config) = setup();

        let sell = trade("2022-01-03 15:00:00", "XYZ", dec!(-100), dec!(10), dec!(1));
        ledger.apply(&sell, AssetClass::Equity, PARITY, &config, 0).unwrap();
        assert_eq!(ledger.state("XYZ"), PositionState::Short);
        assert_eq!(ledger.lots("XYZ").next().unwrap().unit_cost, usd(dec!(9.99)));

        let buy = trade("2022-01-10 15:00:00", "XYZ", dec!(100), dec!(8), dec!(1));
        let result = ledger.apply(&buy, AssetClass::Equity, PARITY, &config, 1).unwrap();
        // Received 999 net, paid 801 net.
        assert_eq!(result.pnl, eur(dec!(198)));
        assert_eq!(ledger.state("XYZ"), PositionState::Flat);
        assert!(ledger.is_empty());
    }

    #[test]
    #[traced_test]
    fn test_over_close_reverses_position() {
        let (mut ledger, config) = setup();

        let buy = trade("2022-01-03 15:00:00", "XYZ", dec!(10), dec!(5), dec!(0));
        ledger.apply(&buy, AssetClass::Equity, PARITY, &config, 0).unwrap();

        let sell = trade("2022-01-04 15:00:00", "XYZ", dec!(-15), dec!(6), dec!(1.50));
        let result = ledger.apply(&sell, AssetClass::Equity, PARITY, &config, 1).unwrap();

        // 10 * (6 - 5) - 1.00 of the fee
        assert_eq!(result.pnl, eur(dec!(9)));
        assert_eq!(result.remaining_position, dec!(-5));
        assert_eq!(
            result.warnings,
            vec![Warning::PositionReversal {
                asset: "XYZ".to_string(),
                residual: dec!(-5),
            }],
        );
        assert_eq!(ledger.state("XYZ"), PositionState::Short);

        // The residual carries its share of the fee: (-5 * 6 + 0.50) / -5
        let lot = ledger.lots("XYZ").next().unwrap();
        assert_eq!(lot.unit_cost, usd(dec!(5.9)));
        assert!(logs_contain("Position reversal"));
    }

    #[test]
    #[traced_test]
    fn test_split_preserves_cost_basis() {
        let (mut ledger, config) = setup();

        let buy = trade("2022-01-03 15:00:00", "XYZ", dec!(100), dec!(10.00), dec!(0));
        ledger.apply(&buy, AssetClass::Equity, PARITY, &config, 0).unwrap();
        let before = ledger.open_cost();

        let deliver = split_leg(
            "2022-06-06 09:00:00",
            "XYZ",
            TransactionSubcode::ForwardSplit,
            dec!(-100),
        );
        let receive = split_leg(
            "2022-06-06 09:00:00",
            "XYZ",
            TransactionSubcode::ForwardSplit,
            dec!(200),
        );
        let first = ledger.apply(&deliver, AssetClass::Equity, PARITY, &config, 1).unwrap();
        assert_eq!(first.pnl, EurAmount::ZERO);
        let second = ledger.apply(&receive, AssetClass::Equity, PARITY, &config, 2).unwrap();
        assert_eq!(second.pnl, EurAmount::ZERO);
        assert_eq!(second.remaining_position, dec!(200));

        let lot = ledger.lots("XYZ").next().unwrap();
        assert_eq!(lot.quantity, dec!(200));
        assert_eq!(lot.unit_cost, usd(dec!(5)));
        assert!((ledger.open_cost() - before).abs().to_decimal() <= dec!(0.000001));
        assert_eq!(ledger.open_cost(), usd(dec!(1000)));
        ledger.finish().unwrap();
    }

    #[test]
    #[traced_test]
    fn test_reverse_split_warns_about_options() {
        let (mut ledger, config) = setup();

        let buy = trade("2022-01-03 15:00:00", "XYZ", dec!(30), dec!(2), dec!(0));
        ledger.apply(&buy, AssetClass::Equity, PARITY, &config, 0).unwrap();
        let short_put = option_trade(
            "2022-01-04 15:00:00",
            "XYZ",
            put(dec!(2)),
            TransactionSubcode::SellToOpen,
            dec!(-1),
            dec!(25),
            dec!(1),
        );
        ledger.apply(&short_put, AssetClass::Option, PARITY, &config, 1).unwrap();

        let receive = split_leg(
            "2022-02-01 09:00:00",
            "XYZ",
            TransactionSubcode::ReverseSplit,
            dec!(3),
        );
        let deliver = split_leg(
            "2022-02-01 09:00:00",
            "XYZ",
            TransactionSubcode::ReverseSplit,
            dec!(-30),
        );
        ledger.apply(&receive, AssetClass::Equity, PARITY, &config, 2).unwrap();
        let result = ledger.apply(&deliver, AssetClass::Equity, PARITY, &config, 3).unwrap();

        assert_eq!(ledger.position("XYZ"), dec!(3));
        assert_eq!(ledger.lots("XYZ").next().unwrap().unit_cost, usd(dec!(20)));
        assert_eq!(
            result.warnings,
            vec![Warning::OptionsNotSplitAdjusted {
                symbol: "XYZ".to_string(),
                assets: vec![short_put.asset.clone()],
            }],
        );
    }

    #[test]
    #[traced_test]
    fn test_reverse_split_one_for_three_is_exact() {
        let (mut ledger, config) = setup();

        let buy = trade("2022-01-03 15:00:00", "XYZ", dec!(30), dec!(2), dec!(0));
        ledger.apply(&buy, AssetClass::Equity, PARITY, &config, 0).unwrap();

        for (sequence, quantity) in [(1, dec!(-30)), (2, dec!(10))] {
            let leg = split_leg(
                "2022-02-01 09:00:00",
                "XYZ",
                TransactionSubcode::ReverseSplit,
                quantity,
            );
            ledger.apply(&leg, AssetClass::Equity, PARITY, &config, sequence).unwrap();
        }
        assert_eq!(ledger.position("XYZ"), dec!(10));
        assert_eq!(ledger.lots("XYZ").next().unwrap().unit_cost, usd(dec!(6)));

        let sell = trade("2022-03-01 15:00:00", "XYZ", dec!(-10), dec!(7), dec!(0));
        let result = ledger.apply(&sell, AssetClass::Equity, PARITY, &config, 3).unwrap();
        assert_eq!(result.pnl, eur(dec!(10)));
        assert!(result.warnings.is_empty());
        assert_eq!(ledger.state("XYZ"), PositionState::Flat);
        assert!(ledger.is_empty());
    }

    #[test]
    #[traced_test]
    fn test_reverse_split_remainder_goes_to_newest_lot() {
        let (mut ledger, config) = setup();

        let first = trade("2022-01-03 15:00:00", "XYZ", dec!(20), dec!(2), dec!(0));
        let second = trade("2022-01-04 15:00:00", "XYZ", dec!(10), dec!(3), dec!(0));
        ledger.apply(&first, AssetClass::Equity, PARITY, &config, 0).unwrap();
        ledger.apply(&second, AssetClass::Equity, PARITY, &config, 1).unwrap();
        let eur_cost: EurAmount = ledger.lots("XYZ").map(|lot| lot.eur_cost).sum();

        ledger.split("XYZ", dec!(10), dec!(30));

        assert_eq!(ledger.position("XYZ"), dec!(10));
        let lots: Vec<_> = ledger.lots("XYZ").collect();
        assert_eq!(lots.len(), 2);
        assert!(lots[0].quantity > dec!(6.666) && lots[0].quantity < dec!(6.667));
        assert_eq!(lots[0].quantity + lots[1].quantity, dec!(10));
        assert_eq!(lots.iter().map(|lot| lot.eur_cost).sum::<EurAmount>(), eur_cost);
        assert!(ledger.open_cost().is_within(usd(dec!(70)), dec!(0.000001)));
    }

    #[test]
    #[traced_test]
    fn test_split_errors() {
        let (mut ledger, config) = setup();

        let buy = trade("2022-01-03 15:00:00", "XYZ", dec!(100), dec!(10), dec!(0));
        ledger.apply(&buy, AssetClass::Equity, PARITY, &config, 0).unwrap();

        let deliver = split_leg(
            "2022-06-06 09:00:00",
            "XYZ",
            TransactionSubcode::ForwardSplit,
            dec!(-60),
        );
        let receive = split_leg(
            "2022-06-06 09:00:00",
            "XYZ",
            TransactionSubcode::ForwardSplit,
            dec!(120),
        );
        ledger.apply(&deliver, AssetClass::Equity, PARITY, &config, 1).unwrap();
        let err = ledger.apply(&receive, AssetClass::Equity, PARITY, &config, 2).unwrap_err();
        assert!(matches!(err, AssetLedgerError::SplitMismatch { .. }));

        let (mut ledger, config) = setup();
        ledger.apply(&buy, AssetClass::Equity, PARITY, &config, 0).unwrap();
        ledger.apply(&deliver, AssetClass::Equity, PARITY, &config, 1).unwrap();
        assert!(matches!(
            ledger.finish(),
            Err(AssetLedgerError::UnpairedSplit { .. }),
        ));
        let next = trade("2022-06-07 15:00:00", "XYZ", dec!(1), dec!(10), dec!(0));
        assert!(matches!(
            ledger.apply(&next, AssetClass::Equity, PARITY, &config, 2),
            Err(AssetLedgerError::UnpairedSplit { .. }),
        ));
    }

    #[test]
    #[traced_test]
    fn test_expiration_resolves_sign() {
        let (mut ledger, config) = setup();

        let short_put = option_trade(
            "2022-03-01 15:00:00",
            "XYZ",
            put(dec!(50)),
            TransactionSubcode::SellToOpen,
            dec!(-2),
            dec!(120),
            dec!(2.20),
        );
        ledger.apply(&short_put, AssetClass::Option, PARITY, &config, 0).unwrap();

        let expired = removal(
            "2022-03-18 22:00:00",
            &short_put,
            TransactionSubcode::Expiration,
            dec!(2),
        );
        let result = ledger.apply(&expired, AssetClass::Option, PARITY, &config, 1).unwrap();
        assert_eq!(result.quantity, dec!(2));
        // Premium 240 minus fee 2.20 kept.
        assert_eq!(result.pnl, eur(dec!(237.80)));
        assert_eq!(result.term_loss, EurAmount::ZERO);
        assert!(result.warnings.is_empty());
        assert_eq!(ledger.state(&short_put.asset), PositionState::Flat);

        let err = ledger.apply(&expired, AssetClass::Option, PARITY, &config, 2).unwrap_err();
        assert!(matches!(err, AssetLedgerError::NoOpenPosition { .. }));
    }

    #[test]
    #[traced_test]
    fn test_exercise_of_long_option_is_flagged() {
        let (mut ledger, config) = setup();

        let long_put = option_trade(
            "2022-03-01 15:00:00",
            "XYZ",
            put(dec!(50)),
            TransactionSubcode::BuyToOpen,
            dec!(1),
            dec!(300),
            dec!(1),
        );
        ledger.apply(&long_put, AssetClass::Option, PARITY, &config, 0).unwrap();

        let exercised = removal(
            "2022-03-18 22:00:00",
            &long_put,
            TransactionSubcode::Exercise,
            dec!(1),
        );
        let result = ledger.apply(&exercised, AssetClass::Option, PARITY, &config, 1).unwrap();
        assert_eq!(result.quantity, dec!(-1));
        assert_eq!(
            result.warnings,
            vec![Warning::AssignmentCostBasis {
                asset: long_put.asset.clone(),
            }],
        );

        // Cash-settled index options deliver no shares.
        let (mut ledger, config) = setup();
        let spx = option_trade(
            "2022-03-01 15:00:00",
            "SPXW",
            put(dec!(4000)),
            TransactionSubcode::BuyToOpen,
            dec!(1),
            dec!(300),
            dec!(1),
        );
        ledger.apply(&spx, AssetClass::Option, PARITY, &config, 0).unwrap();
        let exercised = removal(
            "2022-03-18 22:00:00",
            &spx,
            TransactionSubcode::Exercise,
            dec!(1),
        );
        let result = ledger.apply(&exercised, AssetClass::Option, PARITY, &config, 1).unwrap();
        assert!(result.warnings.is_empty());
    }

    #[test]
    #[traced_test]
    fn test_term_loss_routing() {
        let config = EngineConfig {
            term_loss_includes_written_options: true,
            ..Default::default()
        };

        // Future loss always counts.
        let mut ledger = AssetLedger::new();
        let buy = trade("2022-03-01 15:00:00", "/MESH2", dec!(1), dec!(100), dec!(0));
        ledger.apply(&buy, AssetClass::Future, PARITY, &config, 0).unwrap();
        let sell = trade("2022-03-02 15:00:00", "/MESH2", dec!(-1), dec!(60), dec!(0));
        let result = ledger.apply(&sell, AssetClass::Future, PARITY, &config, 1).unwrap();
        assert_eq!(result.term_loss, eur(dec!(-40)));

        // Written option closed at a loss counts under the flag.
        let mut ledger = AssetLedger::new();
        let option = put(dec!(50));
        let sto = option_trade(
            "2022-03-01 15:00:00",
            "XYZ",
            option.clone(),
            TransactionSubcode::SellToOpen,
            dec!(-1),
            dec!(100),
            dec!(0),
        );
        ledger.apply(&sto, AssetClass::Option, PARITY, &config, 0).unwrap();
        let btc = option_trade(
            "2022-03-02 15:00:00",
            "XYZ",
            option.clone(),
            TransactionSubcode::BuyToClose,
            dec!(1),
            dec!(250),
            dec!(0),
        );
        let result = ledger.apply(&btc, AssetClass::Option, PARITY, &config, 1).unwrap();
        assert_eq!(result.pnl, eur(dec!(-150)));
        assert_eq!(result.term_loss, eur(dec!(-150)));

        // Without the flag it stays in the general pot.
        let mut ledger = AssetLedger::new();
        let config = EngineConfig::default();
        ledger.apply(&sto, AssetClass::Option, PARITY, &config, 0).unwrap();
        let result = ledger.apply(&btc, AssetClass::Option, PARITY, &config, 1).unwrap();
        assert_eq!(result.term_loss, EurAmount::ZERO);

        // Equity losses never count.
        let mut ledger = AssetLedger::new();
        let buy = trade("2022-03-01 15:00:00", "XYZ", dec!(1), dec!(100), dec!(0));
        ledger.apply(&buy, AssetClass::Equity, PARITY, &config, 0).unwrap();
        let sell = trade("2022-03-02 15:00:00", "XYZ", dec!(-1), dec!(60), dec!(0));
        let result = ledger.apply(&sell, AssetClass::Equity, PARITY, &config, 1).unwrap();
        assert_eq!(result.term_loss, EurAmount::ZERO);
    }

    #[test]
    fn prop_test_position_conservation() {
        arbtest(|u| {
            let (mut ledger, config) = setup();
            let assets = ["AAA", "BBB"];
            let mut expected = BTreeMap::<&str, Decimal>::new();

            for sequence in 0..u.int_in_range(1..=40)? {
                let asset = *u.choose(&assets)?;
                let quantity = Decimal::from(u.int_in_range(-50_i64..=50)?);
                if quantity.is_zero() {
                    continue;
                }
                let price = Decimal::new(u.int_in_range(1_i64..=50_000)?, 2);
                let fee = Decimal::new(u.int_in_range(0_i64..=500)?, 2);
                let time = format!("2022-01-{:02} 15:00:00", sequence % 28 + 1);
                let tx = trade(&time, asset, quantity, price, fee);

                let result = ledger
                    .apply(&tx, AssetClass::Equity, PARITY, &config, sequence)
                    .unwrap();
                *expected.entry(asset).or_default() += result.quantity;

                for asset in assets {
                    let position = ledger.position(asset);
                    assert_eq!(position, expected.get(asset).copied().unwrap_or_default());

                    // Lots never mix directions.
                    let lots: Vec<_> = ledger.lots(asset).collect();
                    assert!(lots.iter().all(|lot| lot.quantity.signum() == position.signum()));
                }
            }

            Ok(())
        });
    }
}
