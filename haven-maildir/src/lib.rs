//! Maildir delivery.
//!
//! A message is written once into `tmp/` of every target mailbox and only
//! renamed into `new/` after every copy is complete. Recipients that map to
//! the same mailbox folder receive a single copy. Plus-addressed recipients
//! are delivered into a Maildir++ sub-folder: `john+work+2024@example.com`
//! lands in `<root>/.work.2024/new/`.

pub mod config;
pub mod deliver;
pub mod error;
mod fanout;
pub mod identity;
pub mod target;

pub use config::{MaildirConfig, MaildirScope};
pub use deliver::{Delivery, MaildirDelivery};
pub use error::MaildirError;
pub use identity::DeliveryIdentity;
pub use target::MaildirTarget;
