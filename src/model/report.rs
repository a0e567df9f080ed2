use crate::basis::LedgerContext;
use crate::model::record::{OutputRecord, Warning};
use crate::model::year::YearBucket;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::{self, Display};

/// Everything one run produced.
#[derive(Debug, Default)]
pub struct Report {
    /// One row per processed transaction, in input order.
    pub records: Vec<OutputRecord>,
    pub years: BTreeMap<i32, YearBucket>,

    /// Every warning attached to a record, with the record's time.
    pub warnings: Vec<(DateTime<Utc>, Warning)>,

    /// Context as it was before the first transaction of each year.
    pub(crate) openings: BTreeMap<i32, LedgerContext>,
}

impl Report {
    pub(crate) fn collect_warnings(&mut self) {
        self.warnings = self
            .records
            .iter()
            .flat_map(|record| {
                record
                    .warnings
                    .iter()
                    .map(|warning| (record.time, warning.clone()))
            })
            .collect();
    }

    /// The record stream as a CSV worksheet.
    pub fn worksheet(&self) -> Worksheet<'_> {
        Worksheet(&self.records)
    }
}

pub struct Worksheet<'a>(&'a [OutputRecord]);

impl Display for Worksheet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Write the CSV header
        writeln!(
            f,
            concat!(
                r#""datetime","type","pnl","term_loss","eur_amount","usd_amount","fees","#,
                r#""eurusd","quantity","asset","symbol","description","account_total","#,
                r#""net_total","tax_free","usd_gains","usd_gains_notax","warnings""#,
            ),
        )?;

        for record in self.0 {
            writeln!(f, "{record}")?;
        }

        Ok(())
    }
}
