use crate::model::{option_asset_id, ConvertAmountError, UsdAmount};
use crate::model::{OpenClose, OptionInfo, OptionRight, Side, Stats};
use crate::model::{Transaction, TransactionCode, TransactionSubcode};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::{io, str::FromStr};
use thiserror::Error;
use tracing::{debug, trace};

/// Shares per equity option contract.
const OPTION_MULTIPLIER: Decimal = Decimal::ONE_HUNDRED;

/// Timestamp formats seen in the transaction history export, tried in order.
const DATETIME_FORMATS: [&str; 5] = [
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %H:%M",
    "%F %T",
    "%F %H:%M",
    "%Y-%m-%dT%H:%M:%S%z",
];

/// Two-digit years first, `%Y` would accept them as the first century.
const DATE_FORMATS: [&str; 3] = ["%m/%d/%y", "%m/%d/%Y", "%F"];

#[derive(Debug, Error)]
pub enum TastyworksError {
    #[error("CSV Error")]
    Csv(#[from] csv::Error),

    #[error("FS Error")]
    Fs(#[from] std::io::Error),

    #[error("Unable to parse date/time `{0}`")]
    DateTime(String),

    #[error("Unable to parse {field} `{value}`")]
    Decimal {
        field: &'static str,
        value: String,
        #[source]
        source: rust_decimal::Error,
    },

    #[error("Amount parsing error")]
    Amount(#[from] ConvertAmountError),

    #[error("Unknown option right `{0}`")]
    OptionRight(String),

    #[error("Option row is missing `{0}`")]
    IncompleteOption(&'static str),

    #[error("Negative price `{0}`")]
    NegativePrice(String),

    #[error("Exports {earlier:?} and {later:?} overlap at {time}")]
    OverlappingExports {
        earlier: PathBuf,
        later: PathBuf,
        time: DateTime<Utc>,
    },
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct TastyworksCSVRow {
    #[serde(rename = "Date/Time")]
    pub(crate) time: String,
    #[serde(rename = "Transaction Code")]
    pub(crate) code: String,
    #[serde(rename = "Transaction Subcode")]
    pub(crate) subcode: String,
    #[serde(rename = "Symbol")]
    pub(crate) symbol: String,
    #[serde(rename = "Buy/Sell")]
    pub(crate) side: String,
    #[serde(rename = "Open/Close")]
    pub(crate) open_close: String,
    #[serde(rename = "Quantity")]
    pub(crate) quantity: String,
    #[serde(rename = "Expiration Date")]
    pub(crate) expiration: String,
    #[serde(rename = "Strike")]
    pub(crate) strike: String,
    #[serde(rename = "Call/Put")]
    pub(crate) right: String,
    #[serde(rename = "Price")]
    pub(crate) price: String,
    #[serde(rename = "Fees")]
    pub(crate) fees: String,
    #[serde(rename = "Amount")]
    pub(crate) amount: String,
    #[serde(rename = "Description")]
    pub(crate) description: String,
    #[serde(rename = "Account Reference", default)]
    pub(crate) account_ref: String,
}

/// Read a transaction history CSV, oldest transaction first.
pub fn read_transactions(
    s: &mut Stats,
    path: impl AsRef<Path>,
) -> Result<Vec<Transaction>, TastyworksError> {
    let file = std::fs::File::open(path)?;

    read_transactions_from_reader(s, file)
}

pub fn read_transactions_from_reader<R: io::Read>(
    s: &mut Stats,
    reader: R,
) -> Result<Vec<Transaction>, TastyworksError> {
    let mut rows = Vec::new();
    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .flexible(true)
        .from_reader(reader);

    debug!("Parsing Tastyworks rows");
    for result in reader.deserialize() {
        let record: TastyworksCSVRow = result?;
        trace!("Deserialized: {record:?}");

        let tx = transaction_parse(record)?;
        trace!("Parsed: {tx:?}");

        match tx.code {
            TransactionCode::MoneyMovement => s.inc_money_movements(),
            TransactionCode::Trade => s.inc_trades(),
            TransactionCode::ReceiveDeliver => s.inc_receive_deliver(),
            TransactionCode::Unrecognized(_) => s.inc_skipped(),
        }
        rows.push(tx);
    }

    // The broker exports newest first
    if rows.first().zip(rows.last()).is_some_and(|(first, last)| first.time > last.time) {
        debug!("Reversing newest-first export");
        rows.reverse();
    }

    Ok(rows)
}

/// Merge several exports into one history, oldest transaction first.
///
/// Exports must cover disjoint time spans. Overlapping exports repeat the same rows, and there is
/// no way to tell a repeated row from two identical fills.
pub fn merge_exports(
    exports: Vec<(PathBuf, Vec<Transaction>)>,
) -> Result<Vec<Transaction>, TastyworksError> {
    let mut spans: Vec<_> = exports
        .iter()
        .filter_map(|(path, txs)| {
            let first = txs.iter().map(|tx| tx.time).min()?;
            let last = txs.iter().map(|tx| tx.time).max()?;
            Some((first, last, path))
        })
        .collect();
    spans.sort_by_key(|(first, _, _)| *first);

    for pair in spans.windows(2) {
        let (_, earlier_last, earlier) = pair[0];
        let (later_first, _, later) = pair[1];
        if later_first <= earlier_last {
            return Err(TastyworksError::OverlappingExports {
                earlier: earlier.clone(),
                later: later.clone(),
                time: later_first,
            });
        }
    }

    let mut txs: Vec<_> = exports.into_iter().flat_map(|(_, txs)| txs).collect();
    // Stable, so rows keep their export order within a timestamp.
    txs.sort_by_key(|tx| tx.time);

    Ok(txs)
}

pub(crate) fn transaction_parse(row: TastyworksCSVRow) -> Result<Transaction, TastyworksError> {
    let time = parse_datetime(&row.time)?;
    let code = row
        .code
        .parse::<TransactionCode>()
        .unwrap_or_else(|never| match never {});
    let subcode = row
        .subcode
        .parse::<TransactionSubcode>()
        .unwrap_or_else(|never| match never {});

    let side = match row.side.trim() {
        "Buy" => Some(Side::Buy),
        "Sell" => Some(Side::Sell),
        _ => None,
    };
    let open_close = match row.open_close.trim() {
        "Open" => Some(OpenClose::Open),
        "Close" => Some(OpenClose::Close),
        _ => None,
    };

    let quantity = match row.quantity.trim() {
        "" => Decimal::ONE,
        value => parse_decimal("quantity", value)?.abs(),
    };
    // Removals carry no reliable side, the ledger resolves their sign
    let quantity = if side == Some(Side::Sell) {
        -quantity
    } else {
        quantity
    };

    let option = parse_option(&row)?;
    let mut price = parse_amount(&row.price)?;
    if price.is_negative() {
        return Err(TastyworksError::NegativePrice(row.price));
    }
    let symbol = row.symbol.trim().to_string();
    let asset = match &option {
        Some(option) => {
            price = price.scale(OPTION_MULTIPLIER);
            option_asset_id(&symbol, option)
        }
        None => symbol.clone(),
    };

    Ok(Transaction {
        time,
        code,
        subcode,
        asset,
        symbol,
        side,
        open_close,
        quantity,
        price,
        fee: parse_amount(&row.fees)?.abs(),
        amount: parse_amount(&row.amount)?,
        description: row.description.trim().to_string(),
        option,
        account_ref: row.account_ref.trim().to_string(),
    })
}

fn parse_option(row: &TastyworksCSVRow) -> Result<Option<OptionInfo>, TastyworksError> {
    let right = match row.right.trim().to_ascii_uppercase().as_str() {
        "" => return Ok(None),
        "C" | "CALL" => OptionRight::Call,
        "P" | "PUT" => OptionRight::Put,
        _ => return Err(TastyworksError::OptionRight(row.right.clone())),
    };

    let expiration = row.expiration.trim();
    if expiration.is_empty() {
        return Err(TastyworksError::IncompleteOption("Expiration Date"));
    }
    let expiry = DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(expiration, format).ok())
        .ok_or_else(|| TastyworksError::DateTime(expiration.to_string()))?;

    let strike = row.strike.trim();
    if strike.is_empty() {
        return Err(TastyworksError::IncompleteOption("Strike"));
    }

    Ok(Some(OptionInfo {
        expiry,
        strike: parse_decimal("strike", strike)?,
        right,
    }))
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>, TastyworksError> {
    let value = value.trim();

    DATETIME_FORMATS
        .iter()
        .find_map(|format| {
            DateTime::parse_from_str(value, format)
                .map(|time| time.with_timezone(&Utc))
                .or_else(|_| NaiveDateTime::parse_from_str(value, format).map(|time| time.and_utc()))
                .ok()
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|time| time.with_timezone(&Utc))
        })
        .ok_or_else(|| TastyworksError::DateTime(value.to_string()))
}

fn parse_decimal(field: &'static str, value: &str) -> Result<Decimal, TastyworksError> {
    let cleaned = value.trim().replace(',', "");

    Decimal::from_str(&cleaned).map_err(|source| TastyworksError::Decimal {
        field,
        value: value.to_string(),
        source,
    })
}

fn parse_amount(value: &str) -> Result<UsdAmount, TastyworksError> {
    match value.trim() {
        "" => Ok(UsdAmount::ZERO),
        value => Ok(value.parse()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::transaction::fixtures::get_datetime;
    use rust_decimal_macros::dec;
    use tracing_test::traced_test;

    const HEADER: &str = "Date/Time,Transaction Code,Transaction Subcode,Symbol,Buy/Sell,\
        Open/Close,Quantity,Expiration Date,Strike,Call/Put,Price,Fees,Amount,Description,\
        Account Reference\n";

    fn read(rows: &str) -> Result<Vec<Transaction>, TastyworksError> {
        let mut stats = Stats::default();
        let csv = format!("{HEADER}{rows}");

        read_transactions_from_reader(&mut stats, csv.as_bytes())
    }

    #[test]
    #[traced_test]
    fn test_newest_first_is_reversed() {
        let _ = tracing_log::LogTracer::init();
        let txs = read(concat!(
            "03/02/2022 3:00 PM,Trade,Sell to Close,AAPL,Sell,Close,5,,,,160.00,0.10,800.00,",
            "Sold 5 AAPL @ 160.00,5WT00001\n",
            "03/01/2022 3:00 PM,Trade,Buy to Open,AAPL,Buy,Open,5,,,,150.00,1.00,-750.00,",
            "Bought 5 AAPL @ 150.00,5WT00001\n",
        ))
        .unwrap();

        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].time, get_datetime("2022-03-01 15:00:00"));
        assert_eq!(txs[0].quantity, dec!(5));
        assert_eq!(txs[0].fee, UsdAmount::new(dec!(1)));
        assert_eq!(txs[1].quantity, dec!(-5));
        assert_eq!(txs[1].amount, UsdAmount::new(dec!(800)));
        assert_eq!(txs[1].account_ref, "5WT00001");
        assert!(logs_contain("Reversing newest-first export"));
    }

    #[test]
    #[traced_test]
    fn test_option_rows() {
        let txs = read(concat!(
            "01/03/2023 10:30 AM,Trade,Sell to Open,SPY,Sell,Open,1,1/20/2023,402.5,PUT,2.50,",
            "1.16,250.00,Sold 1 SPY 01/20/23 Put 402.50 @ 2.50,5WT00001\n",
            "01/20/2023 10:00 PM,Receive Deliver,Expiration,SPY,,,1,1/20/2023,402.5,PUT,,",
            "0.00,0.00,Removal of option due to expiration,5WT00001\n",
        ))
        .unwrap();

        assert_eq!(txs[0].asset, "SPY P402.5 23-01-20");
        assert_eq!(txs[0].symbol, "SPY");
        assert_eq!(txs[0].price, UsdAmount::new(dec!(250)));
        assert_eq!(txs[0].quantity, dec!(-1));
        assert_eq!(txs[0].option.as_ref().unwrap().right, OptionRight::Put);

        assert_eq!(txs[1].asset, txs[0].asset);
        assert_eq!(txs[1].subcode, TransactionSubcode::Expiration);
        assert!(txs[1].is_removal());
        assert_eq!(txs[1].quantity, dec!(1));
        assert_eq!(txs[1].side, None);
    }

    #[test]
    #[traced_test]
    fn test_money_movement_rows() {
        let txs = read(concat!(
            "2022-01-03 00:00:00,Money Movement,Deposit,,,,,,,,,0.00,\"5,000.00\",ACH DEPOSIT,\n",
            "2022-01-15 00:00:00,Money Movement,Dividend,AAPL,,,,,,,,0.00,2.20,",
            "APPLE INC,5WT00001\n",
        ))
        .unwrap();

        assert_eq!(txs[0].code, TransactionCode::MoneyMovement);
        assert_eq!(txs[0].quantity, Decimal::ONE);
        assert_eq!(txs[0].amount, UsdAmount::new(dec!(5000)));
        assert_eq!(txs[0].account_ref, "");
        assert_eq!(txs[1].subcode, TransactionSubcode::Dividend);
        assert_eq!(txs[1].symbol, "AAPL");
    }

    #[test]
    #[traced_test]
    fn test_bad_rows() {
        let err = read("not a date,Trade,Buy,AAPL,Buy,,1,,,,1,0,-1,,\n").unwrap_err();
        assert!(matches!(err, TastyworksError::DateTime(_)));

        let err = read("2022-01-03 10:00:00,Trade,Buy,AAPL,Buy,,x,,,,1,0,-1,,\n").unwrap_err();
        assert!(matches!(err, TastyworksError::Decimal { field: "quantity", .. }));

        let err = read("2022-01-03 10:00:00,Trade,Buy,AAPL,Buy,,1,,,,-1,0,-1,,\n").unwrap_err();
        assert!(matches!(err, TastyworksError::NegativePrice(_)));
    }

    #[test]
    #[traced_test]
    fn test_merge_exports() {
        let first = read(concat!(
            "2022-01-03 10:00:00,Trade,Buy to Open,AAPL,Buy,Open,5,,,,150.00,1.00,-750.00,,\n",
            "2022-02-01 10:00:00,Trade,Buy to Open,AAPL,Buy,Open,1,,,,150.00,0.00,-150.00,,\n",
        ))
        .unwrap();
        let second = read(
            "2022-03-01 10:00:00,Trade,Sell to Close,AAPL,Sell,Close,6,,,,160.00,0.10,960.00,,\n",
        )
        .unwrap();

        // Given out of order, merged by time.
        let txs = merge_exports(vec![
            (PathBuf::from("march.csv"), second.clone()),
            (PathBuf::from("empty.csv"), Vec::new()),
            (PathBuf::from("jan-feb.csv"), first.clone()),
        ])
        .unwrap();
        let times: Vec<_> = txs.iter().map(|tx| tx.time).collect();
        assert_eq!(
            times,
            vec![
                get_datetime("2022-01-03 10:00:00"),
                get_datetime("2022-02-01 10:00:00"),
                get_datetime("2022-03-01 10:00:00"),
            ]
        );

        // The same export twice would count every row twice.
        let err = merge_exports(vec![
            (PathBuf::from("jan-feb.csv"), first.clone()),
            (PathBuf::from("copy.csv"), first),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            TastyworksError::OverlappingExports { time, .. }
                if time == get_datetime("2022-01-03 10:00:00")
        ));
    }

    #[test]
    #[traced_test]
    fn test_datetime_formats() {
        let expected = get_datetime("2022-07-05 21:45:00");
        for value in [
            "07/05/2022 9:45 PM",
            "07/05/2022 21:45",
            "2022-07-05 21:45:00",
            "2022-07-05 21:45",
            "2022-07-05T21:45:00+0000",
            "2022-07-05T21:45:00Z",
        ] {
            assert_eq!(parse_datetime(value).unwrap(), expected, "{value}");
        }
    }
}
