//! Alias rule engine.
//!
//! Rewrites a transaction's recipient list using rule files found per
//! recipient. A rule file is a list of header conditions and target
//! addresses:
//!
//! ```text
//! # forward invoices to a sub-folder
//! Subject:/invoice/i
//! john+invoice
//!
//! !X-Spam-Flag:yes
//! archive@example.org
//! ```
//!
//! A condition that does not hold stops the rest of its file. Every address
//! line reached is added to the new recipient list.

pub mod config;
pub mod error;
pub mod pattern;
pub mod resolver;
pub mod rule;

pub use config::{AliasConfig, AliasScope};
pub use error::{AliasError, RuleError};
pub use resolver::AliasResolver;
pub use rule::RuleFile;
