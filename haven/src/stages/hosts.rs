//! Local-host checks for senders and recipients.

use async_trait::async_trait;
use haven_common::{Address, Connection, Reply, Transaction, internal};

use crate::{error::StageError, hostfs::HostChecker, pipeline::Stage};

/// Transaction note set when the sender's host is served locally.
pub const LOCAL_SENDER: &str = "local_sender";

const PRODUCER: &str = "hosts";

pub struct HostsStage {
    checker: HostChecker,
}

impl HostsStage {
    pub const fn new(checker: HostChecker) -> Self {
        Self { checker }
    }
}

#[async_trait]
impl Stage for HostsStage {
    fn name(&self) -> &'static str {
        PRODUCER
    }

    /// Marks local senders. A relaying session may only send from a local
    /// host.
    async fn mail(
        &self,
        connection: &Connection,
        txn: &mut Transaction,
    ) -> Result<Reply, StageError> {
        let Some(sender) = txn.sender().cloned() else {
            return Ok(Reply::next());
        };

        let local = self.checker.exists(&sender).await?;
        txn.notes.insert(LOCAL_SENDER, local);

        if local {
            txn.results.pass(PRODUCER, "mail_from");
        } else if connection.relaying {
            internal!(
                level = INFO,
                "Relaying sender {sender} is not from a local host"
            );
            txn.results.fail(PRODUCER, "mail_from");
            return Ok(Reply::hard_reject(format!(
                "Mail from domain '{}' is not handled by this server",
                sender.original_host()
            )));
        }

        Ok(Reply::next())
    }

    /// Accepts recipients of local hosts, and any recipient of a local
    /// sender on a relaying session. Anything else is left to later stages.
    async fn rcpt(
        &self,
        connection: &Connection,
        txn: &mut Transaction,
        recipient: &Address,
    ) -> Result<Reply, StageError> {
        if connection.relaying && txn.notes.flag(LOCAL_SENDER) {
            txn.results.pass(PRODUCER, "rcpt_to.relaying");
            return Ok(Reply::accept(None));
        }

        if self.checker.exists(recipient).await? {
            txn.results.pass(PRODUCER, "rcpt_to");
            return Ok(Reply::accept(None));
        }

        internal!(level = DEBUG, "Recipient host {} is not local", recipient.host());
        Ok(Reply::next())
    }
}
