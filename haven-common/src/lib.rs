pub mod address;
pub mod config;
pub mod fs;
pub mod headers;
pub mod ledger;
pub mod logging;
pub mod notes;
pub mod stream;
pub mod transaction;
pub mod verdict;

pub use tracing;

pub use address::Address;
pub use transaction::{Connection, Transaction};
pub use verdict::{Reply, Status, Verdict};
