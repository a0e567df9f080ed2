use crate::model::amount::{EurAmount, UsdAmount};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, io, path::Path};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Exchange rate lookup failures.
#[cfg_attr(test, derive(Eq, PartialEq))]
#[derive(Debug, Error)]
pub enum ExchangeRateError {
    #[error("No EURUSD exchange rate on or before {0}")]
    NotFound(NaiveDate),

    #[error("EURUSD rate must be positive, found `{0}`")]
    NonPositive(Decimal),
}

#[derive(Debug, Error)]
pub enum ExchangeRatesDbError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error")]
    Csv(#[from] csv::Error),

    #[error("Invalid EURUSD rate `{1}` on {0}")]
    Rate(NaiveDate, String, #[source] rust_decimal::Error),

    #[error("EURUSD rate must be positive, found `{1}` on {0}")]
    NonPositive(NaiveDate, Decimal),
}

/// The published EURUSD quote: US Dollars per one Euro.
#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct EurUsdRate(Decimal);

impl EurUsdRate {
    /// One to one. Used when reporting in USD.
    pub const PARITY: Self = Self(Decimal::ONE);

    pub fn new(quote: Decimal) -> Result<Self, ExchangeRateError> {
        if quote > Decimal::ZERO {
            Ok(Self(quote))
        } else {
            Err(ExchangeRateError::NonPositive(quote))
        }
    }

    pub fn quote(self) -> Decimal {
        self.0
    }

    pub fn usd_to_eur(self, amount: UsdAmount) -> EurAmount {
        EurAmount::new(amount.to_decimal() / self.0)
    }
}

impl fmt::Display for EurUsdRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0.round_dp(4))
    }
}

/// Date-indexed exchange rate lookup.
pub trait RateProvider {
    /// The rate for `date`, or the nearest earlier published rate when `date` has none.
    fn rate_for(&self, date: NaiveDate) -> Result<EurUsdRate, ExchangeRateError>;
}

/// Daily reference rates, as published by the Deutsche Bundesbank.
#[derive(Debug, Default)]
pub struct ExchangeRates {
    rates: BTreeMap<NaiveDate, EurUsdRate>,
}

impl ExchangeRates {
    /// Load the Bundesbank time series `BBEX3.D.USD.EUR.BB.AC.000` from a CSV file.
    pub fn load<P>(path: P) -> Result<Self, ExchangeRatesDbError>
    where
        P: AsRef<Path>,
    {
        debug!("Loading EURUSD exchange rates from {:?}", path.as_ref());
        let file = std::fs::File::open(path)?;

        Self::from_reader(file)
    }

    /// The series has a few header rows and footer rows, and "." on days without a fixing.
    /// Rows that do not start with an ISO date are skipped.
    pub fn from_reader<R: io::Read>(reader: R) -> Result<Self, ExchangeRatesDbError> {
        let mut rates = BTreeMap::new();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        for result in reader.records() {
            let record = result?;
            let Some(date) = record
                .get(0)
                .and_then(|date| NaiveDate::parse_from_str(date.trim(), "%F").ok())
            else {
                trace!("Skipping row: {record:?}");
                continue;
            };
            let value = record.get(1).map(str::trim).unwrap_or_default();
            if value.is_empty() || value == "." {
                trace!("No fixing on {date}");
                continue;
            }

            let quote = value
                .parse::<Decimal>()
                .map_err(|err| ExchangeRatesDbError::Rate(date, value.to_string(), err))?;
            let rate = EurUsdRate::new(quote)
                .map_err(|_| ExchangeRatesDbError::NonPositive(date, quote))?;
            rates.insert(date, rate);
        }

        if rates.is_empty() {
            warn!("Missing EURUSD exchange rates");
        }

        Ok(Self { rates })
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

impl FromIterator<(NaiveDate, EurUsdRate)> for ExchangeRates {
    fn from_iter<T: IntoIterator<Item = (NaiveDate, EurUsdRate)>>(iter: T) -> Self {
        Self {
            rates: iter.into_iter().collect(),
        }
    }
}

impl RateProvider for ExchangeRates {
    fn rate_for(&self, date: NaiveDate) -> Result<EurUsdRate, ExchangeRateError> {
        self.rates
            .range(..=date)
            .next_back()
            .map(|(found, rate)| {
                if *found != date {
                    trace!("EURUSD for {date} falls back to {found}");
                }
                *rate
            })
            .ok_or(ExchangeRateError::NotFound(date))
    }
}
