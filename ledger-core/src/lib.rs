//! ledger-core: shared infrastructure for the club AR ledger.

pub mod config;
pub mod error;
pub mod money;
pub mod observability;

pub use error::{LedgerError, LedgerResult};
