//! Sender verification. Never rejects; outcomes go to the ledger and to
//! headers.

use async_trait::async_trait;
use haven_auth::{AuthOrchestrator, result::PRODUCER};
use haven_common::{Connection, Reply, Transaction, internal};

use crate::{error::StageError, pipeline::Stage};

pub struct MailAuthStage {
    orchestrator: AuthOrchestrator,
}

impl MailAuthStage {
    pub const fn new(orchestrator: AuthOrchestrator) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Stage for MailAuthStage {
    fn name(&self) -> &'static str {
        PRODUCER
    }

    async fn mail(
        &self,
        connection: &Connection,
        txn: &mut Transaction,
    ) -> Result<Reply, StageError> {
        self.orchestrator.on_mail(connection, txn).await;
        Ok(Reply::next())
    }

    /// Reads a fork of the message so the original stays unread for
    /// delivery.
    async fn data_post(
        &self,
        connection: &Connection,
        txn: &mut Transaction,
    ) -> Result<Reply, StageError> {
        if connection.relaying {
            return Ok(Reply::next());
        }
        let Some(message) = txn.message_mut() else {
            return Ok(Reply::next());
        };

        let mut copy = message.fork()?;
        match copy.read_to_end().await {
            Ok(bytes) => self.orchestrator.on_data(connection, txn, &bytes).await,
            Err(err) => {
                internal!(level = ERROR, "Failed to read message for verification: {err}");
                txn.results.err(PRODUCER, "message");
            }
        }

        Ok(Reply::next())
    }
}
