#![forbid(unsafe_code)]

use error_iter::ErrorIter as _;
use is_terminal::IsTerminal as _;
use onlyargs::CliError;
use onlyargs_derive::OnlyArgs;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::{env, process::ExitCode};
use tastytax::basis::{CheckList, Engine, LedgerContext};
use tastytax::imports::tastyworks::{merge_exports, read_transactions};
use tastytax::model::{constants, EngineConfig, ExchangeRates, Stats, SymbolTable};
use tastytax::model::{Transaction, UnknownSymbolPolicy};
use tastytax::util::year_ext::CheckYearsExt as _;
use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

#[derive(Debug, OnlyArgs)]
#[footer = "Additional environment variables:"]
#[footer = "  - RUST_LOG sets the log filter, e.g. `debug` or `tastytax=trace`"]
#[footer = "  - TERM_COLOR accepts \"always\" to override automatic terminal sensing"]
struct Args {
    /// Read Tastyworks transaction history CSV from a file.
    ///   May be specified multiple times for many CSVs.
    ///
    #[long]
    input: Vec<PathBuf>,

    /// Override the EUR/USD exchange rates CSV (Bundesbank export).
    ///   Default is "./eurusd.csv".
    ///
    exchange_rates: Option<PathBuf>,

    /// Read additional symbol classifications from a RON file.
    symbols: Option<PathBuf>,

    /// Treat unknown symbols as individual stocks instead of failing.
    assume_individual_stock: bool,

    /// Report in USD without currency conversion or currency gains.
    usd: bool,

    /// Route losses on written options to the term-loss pot.
    term_loss_written_options: bool,

    /// Process up to the end of this year and only report it.
    #[long]
    tax_year: Option<i32>,

    /// Cross-check every tax year with an isolated run.
    per_year: bool,

    /// Write the transaction worksheet CSV to a file.
    #[short('o')]
    output_csv: Option<PathBuf>,

    /// Write the yearly totals as JSON to a file.
    #[long]
    output_summary: Option<PathBuf>,

    /// Read checkpoint from a file.
    #[long]
    input_checkpoint: Option<PathBuf>,

    /// Write checkpoint to a file.
    ///
    #[long]
    output_checkpoint: Option<PathBuf>,

    /// Enable verbose output.
    /// Prints the worksheet to stdout when not written to a file.
    verbose: bool,
}

#[derive(Debug, Error)]
enum Error {
    #[error("Failed to import {0:?}")]
    Import(PathBuf, #[source] tastytax::errors::TastyworksError),

    #[error("Unable to merge input files")]
    Merge(#[source] tastytax::errors::TastyworksError),

    #[error("Unable to load exchange rates")]
    ExchangeRatesDb(#[from] tastytax::errors::ExchangeRatesDbError),

    #[error("Unable to load symbol table {0:?}")]
    Symbols(PathBuf, #[source] tastytax::errors::SymbolTableError),

    #[error("Argument parsing error")]
    Args(#[from] CliError),

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("Unable to write summary")]
    Json(#[from] serde_json::Error),

    #[error("Checkpoint error, unable to read {0:?}")]
    InputCheckpoint(PathBuf, #[source] Box<tastytax::errors::CheckpointError>),

    #[error("Checkpoint error, unable to write {0:?}")]
    OutputCheckpoint(PathBuf, #[source] Box<tastytax::errors::CheckpointError>),

    #[error("Processing failed")]
    Engine(#[from] tastytax::errors::EngineError),

    #[error("Input data has no transactions for tax year {0}, found {1:?}")]
    InvalidYear(i32, BTreeSet<i32>),
}

fn main() -> ExitCode {
    // Initialize the tracing subscriber for instrumentation.
    // Uses the `RUST_LOG` environment var for configuration. E.g. `RUST_LOG=debug cargo run`
    // This is very useful to see the input CSV row that caused an error.
    //
    // See: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/struct.EnvFilter.html#directives
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let term_color = env::var("TERM_COLOR")
        .map(|color| color == "always")
        .unwrap_or_else(|_| std::io::stdout().is_terminal());
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_ansi(term_color))
        .with(env_filter)
        .init();

    match run(onlyargs::parse()) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            for source in err.sources().skip(1) {
                eprintln!("  Caused by: {source}");
            }

            ExitCode::FAILURE
        }
    }
}

fn run(args: Result<Args, CliError>) -> Result<(), Error> {
    let args = args?;
    let mut stats = Stats::default();

    // Load state from checkpoint if a path is provided.
    let mut ctx = match args.input_checkpoint {
        Some(path) => {
            debug!("Loading checkpoint from {path:?}");
            LedgerContext::load(&path).map_err(|e| Error::InputCheckpoint(path, Box::new(e)))?
        }
        None => LedgerContext::new(),
    };

    let mut exports = Vec::new();
    for input in args.input {
        let txs =
            read_transactions(&mut stats, &input).map_err(|e| Error::Import(input.clone(), e))?;
        exports.push((input, txs));
    }
    let txs: Vec<Transaction> = merge_exports(exports).map_err(Error::Merge)?;

    if let Some(year) = args.tax_year {
        if let Err(years) = txs.check_years(year) {
            return Err(Error::InvalidYear(year, years));
        }
    }

    let exchange_rates = match args.exchange_rates {
        Some(path) => ExchangeRates::load(path)?,
        None if args.usd => ExchangeRates::default(),
        None => ExchangeRates::load(constants::DEFAULT_PATH_EXCHANGE_RATES)?,
    };

    let mut symbols = SymbolTable::new();
    if let Some(path) = args.symbols {
        symbols
            .load_overrides(&path)
            .map_err(|e| Error::Symbols(path, e))?;
    }

    let config = EngineConfig {
        currency_output_enabled: !args.usd,
        unknown_symbol_policy: if args.assume_individual_stock {
            UnknownSymbolPolicy::AssumeIndividualStock
        } else {
            UnknownSymbolPolicy::Fail
        },
        term_loss_includes_written_options: args.term_loss_written_options,
        restrict_to_tax_year: args.tax_year,
        ..Default::default()
    };
    let engine = Engine::new(config, exchange_rates, symbols);

    let mut report = engine.run(&mut ctx, &txs)?;
    if args.per_year {
        let mismatches = engine.run_years(&txs, &report)?;
        info!("Isolated tax years found {} mismatches", mismatches.len());
        let time = txs.last().map(|tx| tx.time).unwrap_or_default();
        report
            .warnings
            .extend(mismatches.into_iter().map(|warning| (time, warning)));
    }
    println!("{}", CheckList::new(&report));

    // Save state to a new checkpoint.
    if let Some(path) = args.output_checkpoint {
        debug!("Saving checkpoint to {path:?}");
        ctx.save(&path)
            .map_err(|e| Error::OutputCheckpoint(path, Box::new(e)))?;
        debug!("Saving checkpoint completed");
    }

    let worksheet = report.worksheet();
    if let Some(path) = args.output_csv {
        std::fs::write(&path, worksheet.to_string())?;

        let path = path.display();
        let underline = "=".repeat(path.to_string().len());
        println!("Transaction Worksheet written to {path}");
        println!("=========== ========= ======= == {underline}");
        println!();
    } else if args.verbose {
        println!("Transaction Worksheet");
        println!("=========== =========");
        println!();
        println!("{worksheet}");
        println!();
    }

    if let Some(path) = args.output_summary {
        std::fs::write(&path, serde_json::to_string_pretty(&report.years)?)?;
        println!("Yearly summary written to {}", path.display());
        println!();
    }

    for (year, bucket) in &report.years {
        println!("Tax Year {year}");
        println!("=== ==== ====");
        println!();
        println!("{bucket}");
    }
    stats.pretty_print();

    Ok(())
}
