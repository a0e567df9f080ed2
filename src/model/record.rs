use crate::model::amount::{EurAmount, UsdAmount};
use crate::model::exchange_rate::EurUsdRate;
use crate::model::symbols::AssetClass;
use crate::util::year_ext::GetYear;
use chrono::{DateTime, Datelike as _, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Display category of an output row.
#[derive(Copy, Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Equity,
    EquityFund,
    MixedFund,
    RealEstateFund,
    OtherFund,
    Option,
    Future,
    Crypto,
    Dividend,
    WithholdingTax,
    Interest,
    Transfer,
    OrderFee,
    BrokerFee,
}

impl Category {
    pub const ALL: [Category; 14] = [
        Category::Equity,
        Category::EquityFund,
        Category::MixedFund,
        Category::RealEstateFund,
        Category::OtherFund,
        Category::Option,
        Category::Future,
        Category::Crypto,
        Category::Dividend,
        Category::WithholdingTax,
        Category::Interest,
        Category::Transfer,
        Category::OrderFee,
        Category::BrokerFee,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Category::Equity => "equity",
            Category::EquityFund => "equity-fund",
            Category::MixedFund => "mixed-fund",
            Category::RealEstateFund => "real-estate-fund",
            Category::OtherFund => "other-fund",
            Category::Option => "option",
            Category::Future => "future",
            Category::Crypto => "crypto",
            Category::Dividend => "dividend",
            Category::WithholdingTax => "withholding-tax",
            Category::Interest => "interest",
            Category::Transfer => "transfer",
            Category::OrderFee => "order-fee",
            Category::BrokerFee => "broker-fee",
        }
    }
}

impl From<AssetClass> for Category {
    fn from(class: AssetClass) -> Self {
        match class {
            AssetClass::Equity => Category::Equity,
            AssetClass::EquityFund => Category::EquityFund,
            AssetClass::MixedFund => Category::MixedFund,
            AssetClass::RealEstateFund => Category::RealEstateFund,
            AssetClass::OtherFund => Category::OtherFund,
            AssetClass::Option => Category::Option,
            AssetClass::Future => Category::Future,
            AssetClass::Crypto => Category::Crypto,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Non-fatal findings. Attached to the affected row and collected for the end-of-run list.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Warning {
    /// A close exceeded the open position and flipped it. Can indicate a bad premium in the feed.
    PositionReversal { asset: String, residual: Decimal },

    /// A long option was assigned or exercised. Its cost basis was not rolled into the delivered
    /// shares and needs a manual adjustment.
    AssignmentCostBasis { asset: String },

    /// Symbol has no classification; treated as an individual stock.
    AssumedIndividualStock { symbol: String },

    /// A reconciled figure differs from the expected one by more than the tolerance.
    RoundingMismatch {
        context: String,
        expected: Decimal,
        found: Decimal,
    },

    /// A split was applied to shares while options on the same underlying were left as-is.
    OptionsNotSplitAdjusted { symbol: String, assets: Vec<String> },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::PositionReversal { asset, residual } => {
                write!(f, "Position reversal on `{asset}`, new position {residual}")
            }
            Warning::AssignmentCostBasis { asset } => write!(
                f,
                "Assignment or exercise of long `{asset}`: move its cost basis to the delivered shares manually",
            ),
            Warning::AssumedIndividualStock { symbol } => {
                write!(f, "Unknown symbol `{symbol}` assumed to be an individual stock")
            }
            Warning::RoundingMismatch {
                context,
                expected,
                found,
            } => write!(f, "{context}: expected {expected}, found {found}"),
            Warning::OptionsNotSplitAdjusted { symbol, assets } => write!(
                f,
                "Split of `{symbol}` does not adjust open options: {}",
                assets.join(", "),
            ),
        }
    }
}

/// One classified row of the worksheet.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OutputRecord {
    pub time: DateTime<Utc>,
    pub category: Category,

    /// Realized by this transaction alone, in the reporting currency.
    pub pnl: EurAmount,

    /// Portion of `pnl` routed to the term-loss pot.
    pub term_loss: EurAmount,

    /// Net cash effect in the reporting currency.
    pub eur_amount: EurAmount,

    /// Gross cash amount.
    pub usd_amount: UsdAmount,
    pub fees: UsdAmount,
    pub eurusd: EurUsdRate,

    /// Signed quantity applied to the position.
    pub quantity: Decimal,
    pub asset: String,
    pub symbol: String,
    pub description: String,
    pub account_total: UsdAmount,
    pub net_total: UsdAmount,
    pub tax_free: bool,
    pub usd_gains: EurAmount,
    pub usd_gains_notax: EurAmount,
    pub warnings: Vec<Warning>,
}

impl GetYear for OutputRecord {
    fn get_year(&self) -> i32 {
        self.time.year()
    }
}

impl fmt::Display for OutputRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Columns A-E
        write!(
            f,
            r#""{time}","{category}","{pnl}","{term_loss}","{eur_amount}","#,
            time = self.time.format("%F %T"),
            category = self.category,
            pnl = self.pnl,
            term_loss = self.term_loss,
            eur_amount = self.eur_amount,
        )?;
        // Columns F-J
        write!(
            f,
            r#""{usd_amount}","{fees}","{eurusd}","{quantity}","{asset}","#,
            usd_amount = self.usd_amount,
            fees = self.fees,
            eurusd = self.eurusd,
            quantity = self.quantity.normalize(),
            asset = escape(&self.asset),
        )?;
        // Columns K-O
        write!(
            f,
            r#""{symbol}","{description}","{account_total}","{net_total}","{tax_free}","#,
            symbol = escape(&self.symbol),
            description = escape(&self.description),
            account_total = self.account_total,
            net_total = self.net_total,
            tax_free = self.tax_free,
        )?;
        // Columns P-R
        let warnings = self
            .warnings
            .iter()
            .map(|warning| warning.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        write!(
            f,
            r#""{usd_gains}","{usd_gains_notax}","{warnings}""#,
            usd_gains = self.usd_gains,
            usd_gains_notax = self.usd_gains_notax,
            warnings = escape(&warnings),
        )
    }
}

/// Double embedded quotes for CSV output.
pub(crate) fn escape(field: &str) -> String {
    field.replace('"', r#""""#)
}
