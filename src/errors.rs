pub use crate::basis::{AssetLedgerError, EngineError};
pub use crate::imports::tastyworks::TastyworksError;
pub use crate::model::{
    CheckpointError, ConvertAmountError, ExchangeRateError, ExchangeRatesDbError,
    SymbolTableError,
};
