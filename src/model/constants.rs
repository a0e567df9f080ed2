/// Bundesbank EUR/USD reference rates, as downloaded.
pub const DEFAULT_PATH_EXCHANGE_RATES: &str = "eurusd.csv";
