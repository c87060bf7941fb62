//! Commits the message to local maildirs.

use async_trait::async_trait;
use haven_common::{Connection, Reply, Transaction, internal};
use haven_maildir::MaildirDelivery;

use crate::{error::StageError, pipeline::Stage};

/// Transaction note naming the queue that should take the message. Any value
/// other than `maildir` makes this stage step aside.
pub const QUEUE_WANTS: &str = "queue.wants";

const PRODUCER: &str = "maildir";

pub struct MaildirStage {
    delivery: MaildirDelivery,
}

impl MaildirStage {
    pub const fn new(delivery: MaildirDelivery) -> Self {
        Self { delivery }
    }
}

#[async_trait]
impl Stage for MaildirStage {
    fn name(&self) -> &'static str {
        PRODUCER
    }

    async fn queue(
        &self,
        _connection: &Connection,
        txn: &mut Transaction,
    ) -> Result<Reply, StageError> {
        if let Some(wanted) = txn.notes.get::<String>(QUEUE_WANTS)
            && wanted != PRODUCER
        {
            internal!(level = DEBUG, "Queue {wanted} wants the message, skipping");
            return Ok(Reply::next());
        }

        let Some(mut message) = txn.take_message() else {
            txn.results.err(PRODUCER, "no message");
            return Ok(Reply::soft_reject(String::from(
                "Temporary error saving message to maildir storage.",
            )));
        };

        match self.delivery.deliver(txn.recipients(), &mut message).await {
            Ok(delivery) => {
                for target in &delivery.targets {
                    txn.results.pass(PRODUCER, target.recipient().to_string());
                }
                Ok(Reply::accept(format!(
                    "Message {} accepted for {} mailbox(es)",
                    txn.id(),
                    delivery.targets.len()
                )))
            }
            Err(err) => {
                if err.is_partial() {
                    internal!(level = WARN, "Delivery of {} was partial: {err}", txn.id());
                } else {
                    internal!(level = ERROR, "Delivery of {} failed: {err}", txn.id());
                }
                txn.results.fail(PRODUCER, err.to_string());
                Ok(Reply::soft_reject(err.reply_reason()))
            }
        }
    }
}
