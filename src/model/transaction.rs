use crate::model::amount::UsdAmount;
use crate::util::year_ext::GetYear;
use chrono::{DateTime, Datelike as _, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, fmt, str::FromStr};

/// Top-level transaction kind as exported by the broker.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum TransactionCode {
    MoneyMovement,
    Trade,
    ReceiveDeliver,
    Unrecognized(String),
}

/// Detailed transaction kind.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum TransactionSubcode {
    // Money Movement
    Transfer,
    Deposit,
    CreditInterest,
    DebitInterest,
    BalanceAdjustment,
    Fee,
    Withdrawal,
    Dividend,
    MarkToMarket,

    // Trade and Receive Deliver
    BuyToOpen,
    SellToOpen,
    BuyToClose,
    SellToClose,
    Buy,
    Sell,

    // Receive Deliver only
    Expiration,
    Assignment,
    Exercise,
    ForwardSplit,
    ReverseSplit,

    Unrecognized(String),
}

#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OpenClose {
    Open,
    Close,
}

#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OptionRight {
    Call,
    Put,
}

/// Contract terms for option rows.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct OptionInfo {
    pub expiry: NaiveDate,
    pub strike: Decimal,
    pub right: OptionRight,
}

/// One normalized row of the transaction history.
///
/// `quantity` is signed (negative for sells) except on removals (expiration, assignment,
/// exercise), where the feed does not report a reliable side. Those carry the unsigned magnitude
/// and the position decides the sign.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Transaction {
    pub time: DateTime<Utc>,
    pub code: TransactionCode,
    pub subcode: TransactionSubcode,

    /// Position key: the symbol for stocks and futures, or the full contract for options.
    pub asset: String,

    /// Underlying symbol.
    pub symbol: String,

    pub side: Option<Side>,
    pub open_close: Option<OpenClose>,
    pub quantity: Decimal,

    /// Per share, or per contract for options.
    pub price: UsdAmount,
    pub fee: UsdAmount,

    /// Gross cash amount, not including fees.
    pub amount: UsdAmount,
    pub description: String,
    pub option: Option<OptionInfo>,
    pub account_ref: String,
}

impl Transaction {
    pub fn date(&self) -> NaiveDate {
        self.time.date_naive()
    }

    /// Net effect on the cash balance.
    pub fn cash_effect(&self) -> UsdAmount {
        self.amount - self.fee
    }

    /// The realized price per unit, derived from the cash amount when there is one.
    ///
    /// Removals settle without cash, so they fall back to the quoted price.
    pub fn unit_price(&self) -> UsdAmount {
        if self.amount.is_zero() || self.quantity.is_zero() {
            self.price
        } else {
            self.amount.abs().per(self.quantity.abs())
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(
            self.subcode,
            TransactionSubcode::Expiration
                | TransactionSubcode::Assignment
                | TransactionSubcode::Exercise
        )
    }

    pub fn is_split(&self) -> bool {
        matches!(
            self.subcode,
            TransactionSubcode::ForwardSplit | TransactionSubcode::ReverseSplit
        )
    }
}

impl GetYear for Transaction {
    fn get_year(&self) -> i32 {
        self.time.year()
    }
}

impl FromStr for TransactionCode {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "Money Movement" => Self::MoneyMovement,
            "Trade" => Self::Trade,
            "Receive Deliver" => Self::ReceiveDeliver,
            other => Self::Unrecognized(other.to_string()),
        })
    }
}

impl FromStr for TransactionSubcode {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "Transfer" => Self::Transfer,
            "Deposit" => Self::Deposit,
            "Credit Interest" => Self::CreditInterest,
            "Debit Interest" => Self::DebitInterest,
            "Balance Adjustment" => Self::BalanceAdjustment,
            "Fee" => Self::Fee,
            "Withdrawal" => Self::Withdrawal,
            "Dividend" => Self::Dividend,
            "Mark to Market" => Self::MarkToMarket,
            "Buy to Open" => Self::BuyToOpen,
            "Sell to Open" => Self::SellToOpen,
            "Buy to Close" => Self::BuyToClose,
            "Sell to Close" => Self::SellToClose,
            "Buy" => Self::Buy,
            "Sell" => Self::Sell,
            "Expiration" => Self::Expiration,
            "Assignment" => Self::Assignment,
            "Exercise" => Self::Exercise,
            "Forward Split" => Self::ForwardSplit,
            "Reverse Split" => Self::ReverseSplit,
            other => Self::Unrecognized(other.to_string()),
        })
    }
}

impl fmt::Display for TransactionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MoneyMovement => "Money Movement",
            Self::Trade => "Trade",
            Self::ReceiveDeliver => "Receive Deliver",
            Self::Unrecognized(other) => other,
        })
    }
}

impl fmt::Display for TransactionSubcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transfer => "Transfer",
            Self::Deposit => "Deposit",
            Self::CreditInterest => "Credit Interest",
            Self::DebitInterest => "Debit Interest",
            Self::BalanceAdjustment => "Balance Adjustment",
            Self::Fee => "Fee",
            Self::Withdrawal => "Withdrawal",
            Self::Dividend => "Dividend",
            Self::MarkToMarket => "Mark to Market",
            Self::BuyToOpen => "Buy to Open",
            Self::SellToOpen => "Sell to Open",
            Self::BuyToClose => "Buy to Close",
            Self::SellToClose => "Sell to Close",
            Self::Buy => "Buy",
            Self::Sell => "Sell",
            Self::Expiration => "Expiration",
            Self::Assignment => "Assignment",
            Self::Exercise => "Exercise",
            Self::ForwardSplit => "Forward Split",
            Self::ReverseSplit => "Reverse Split",
            Self::Unrecognized(other) => other,
        })
    }
}

/// Position key for an option contract, e.g. `SPY P400 23-01-20`.
pub fn option_asset_id(symbol: &str, option: &OptionInfo) -> String {
    let right = match option.right {
        OptionRight::Call => 'C',
        OptionRight::Put => 'P',
    };

    format!(
        "{symbol} {right}{strike} {expiry}",
        strike = option.strike.normalize(),
        expiry = option.expiry.format("%y-%m-%d"),
    )
}
