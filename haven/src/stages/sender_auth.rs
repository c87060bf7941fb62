//! Outbound sender authorisation: an authenticated user may only send as
//! itself or as one of its plus-extensions.

use async_trait::async_trait;
use haven_common::{Connection, Reply, Transaction, internal};

use crate::{error::StageError, pipeline::Stage};

const PRODUCER: &str = "sender_auth";

#[derive(Debug, Default)]
pub struct SenderAuthStage;

#[async_trait]
impl Stage for SenderAuthStage {
    fn name(&self) -> &'static str {
        PRODUCER
    }

    async fn mail(
        &self,
        connection: &Connection,
        txn: &mut Transaction,
    ) -> Result<Reply, StageError> {
        if !connection.relaying {
            return Ok(Reply::next());
        }

        let Some(user) = &connection.auth_user else {
            txn.results.fail(PRODUCER, "auth_user");
            return Ok(Reply::hard_reject(String::from(
                "Authentication required to relay",
            )));
        };

        match txn.sender() {
            Some(sender) if sender.is_extension_of(user) => {
                txn.results.pass(PRODUCER, "mail_from");
                Ok(Reply::next())
            }
            sender => {
                internal!(
                    level = WARN,
                    "{user} attempted to send as {}",
                    sender.map_or_else(|| String::from("<>"), ToString::to_string)
                );
                txn.results.fail(PRODUCER, "mail_from!auth_user");
                Ok(Reply::hard_reject(format!(
                    "{user} is not allowed to send from this address"
                )))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::net::IpAddr;

    use haven_common::{Address, Verdict, ledger::Class};

    use super::*;

    fn addr(text: &str) -> Address {
        Address::parse(text).unwrap()
    }

    fn relaying(user: &str) -> Connection {
        Connection::new(IpAddr::from([10, 0, 0, 2]), "mx.example.com").authenticated(addr(user))
    }

    async fn check(connection: &Connection, sender: Option<&str>) -> (Reply, Transaction) {
        let mut txn = Transaction::new(sender.map(addr));
        let reply = SenderAuthStage.mail(connection, &mut txn).await.unwrap();
        (reply, txn)
    }

    #[tokio::test]
    async fn own_address_and_extensions_pass() {
        let connection = relaying("alice@example.com");

        for sender in ["alice@example.com", "Alice+news@Example.com"] {
            let (reply, txn) = check(&connection, Some(sender)).await;
            assert_eq!(reply.verdict, Verdict::Continue, "{sender}");
            assert!(txn.results.has(PRODUCER, Class::Pass, "mail_from"));
        }
    }

    #[tokio::test]
    async fn other_senders_are_refused() {
        let connection = relaying("alice@example.com");

        for sender in [Some("bob@example.com"), Some("alice@example.org"), None] {
            let (reply, txn) = check(&connection, sender).await;
            assert_eq!(reply.verdict, Verdict::HardReject, "{sender:?}");
            assert!(txn.results.has(PRODUCER, Class::Fail, "mail_from!auth_user"));
        }
    }

    #[tokio::test]
    async fn inbound_sessions_are_not_checked() {
        let connection = Connection::new(IpAddr::from([192, 0, 2, 1]), "mx.example.com");

        let (reply, txn) = check(&connection, Some("anyone@example.org")).await;

        assert_eq!(reply.verdict, Verdict::Continue);
        assert!(txn.results.entries().is_empty());
    }
}
