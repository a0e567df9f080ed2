use crate::model::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};
use thiserror::Error;

/// Cash-settled index option roots. Exercise or assignment settles in cash, never in shares.
const CASH_SETTLED_SYMBOLS: [&str; 3] = ["SPXW", "SPX", "VIXW"];

/// Equity index funds.
const EQUITY_FUNDS: [&str; 28] = [
    "DXJ", "EEM", "EFA", "EWZ", "FEZ", "FXI", "GDX", "GDXJ", "IWM", "KRE", "OIH", "QQQ", "RSX",
    "SMH", "SPY", "XBI", "XHB", "XLB", "XLE", "XLF", "XLI", "XLK", "XLP", "XLU", "XLV", "XME",
    "XOP", "XRT",
];

const REAL_ESTATE_FUNDS: [&str; 1] = ["IYR"];

/// Bond, commodity, currency and volatility products.
const OTHER_FUNDS: [&str; 10] = [
    "FXB", "FXE", "GLD", "HYG", "IEF", "SLV", "TLT", "UNG", "USO", "VXX",
];

const EQUITIES: [&str; 3] = ["AAPL", "M", "TSLA"];

#[derive(Debug, Error)]
pub enum SymbolTableError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("RON parsing error")]
    Parse(#[from] ron::de::SpannedError),
}

/// Tax-relevant classification of an asset.
#[derive(Copy, Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum AssetClass {
    Equity,
    EquityFund,
    MixedFund,
    RealEstateFund,
    OtherFund,
    Option,
    Future,
    Crypto,
}

/// What to do with a symbol that has no classification.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum UnknownSymbolPolicy {
    #[default]
    Fail,
    AssumeIndividualStock,
}

/// Data-driven symbol to asset class lookup.
#[derive(Clone, Debug)]
pub struct SymbolTable {
    entries: BTreeMap<String, AssetClass>,
}

impl SymbolTable {
    /// The built-in table of well known funds and stocks.
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        let groups: [(&[&str], AssetClass); 4] = [
            (&EQUITY_FUNDS, AssetClass::EquityFund),
            (&REAL_ESTATE_FUNDS, AssetClass::RealEstateFund),
            (&OTHER_FUNDS, AssetClass::OtherFund),
            (&EQUITIES, AssetClass::Equity),
        ];
        for (symbols, class) in groups {
            entries.extend(symbols.iter().map(|symbol| (symbol.to_string(), class)));
        }

        Self { entries }
    }

    /// Extend the table with a RON map of `"SYMBOL": AssetClass` entries. Entries in the file
    /// override built-in ones.
    pub fn load_overrides(&mut self, path: impl AsRef<Path>) -> Result<(), SymbolTableError> {
        let data = std::fs::read_to_string(path)?;
        let overrides = ron::from_str::<BTreeMap<String, AssetClass>>(&data)?;
        self.entries.extend(overrides);

        Ok(())
    }

    /// Classify the asset a transaction trades. `None` when the symbol is not in the table.
    ///
    /// Contract metadata wins over the symbol: any option row is an option, any `/` root is a
    /// future, and `XXX/USD` pairs are crypto.
    pub fn classify(&self, tx: &Transaction) -> Option<AssetClass> {
        let symbol = tx.symbol.trim();

        if symbol.ends_with("/USD") {
            Some(AssetClass::Crypto)
        } else if symbol.starts_with('/') || symbol.starts_with("./") {
            Some(AssetClass::Future)
        } else if tx.option.is_some() {
            Some(AssetClass::Option)
        } else {
            self.entries.get(symbol).copied()
        }
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether an option on this underlying settles in cash.
pub fn is_cash_settled(symbol: &str) -> bool {
    symbol
        .split_whitespace()
        .next()
        .is_some_and(|root| {
            CASH_SETTLED_SYMBOLS
                .iter()
                .any(|prefix| root.starts_with(prefix))
        })
}
