//! Rewrites the recipient list before delivery.

use async_trait::async_trait;
use haven_alias::AliasResolver;
use haven_common::{Connection, Reply, Transaction, internal};

use crate::{error::StageError, pipeline::Stage};

const PRODUCER: &str = "aliases";

pub struct AliasStage {
    resolver: AliasResolver,
}

impl AliasStage {
    pub const fn new(resolver: AliasResolver) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Stage for AliasStage {
    fn name(&self) -> &'static str {
        PRODUCER
    }

    /// An empty result accepts the message without delivering it.
    async fn queue(
        &self,
        _connection: &Connection,
        txn: &mut Transaction,
    ) -> Result<Reply, StageError> {
        let recipients = self
            .resolver
            .resolve(txn.recipients(), txn.headers())
            .await?;

        if recipients.is_empty() {
            internal!(
                level = INFO,
                "Transaction {} aliased to no recipients, discarding",
                txn.id()
            );
            txn.set_recipients(recipients);
            txn.results.msg(PRODUCER, "discarded");
            return Ok(Reply::accept(String::from("Message discarded")));
        }

        if recipients != txn.recipients() {
            txn.results.msg(
                PRODUCER,
                recipients
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }
        txn.set_recipients(recipients);

        Ok(Reply::next())
    }
}
