pub use self::{
    amount::*, checkpoint::*, config::*, exchange_rate::*, record::*, report::*, stats::*,
    symbols::*, transaction::*, year::*,
};

pub(crate) mod amount;
pub(crate) mod checkpoint;
pub(crate) mod config;
pub mod constants;
pub(crate) mod exchange_rate;
pub(crate) mod record;
pub(crate) mod report;
mod stats;
pub(crate) mod symbols;
pub(crate) mod transaction;
pub(crate) mod year;
