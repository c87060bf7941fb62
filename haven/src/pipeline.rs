//! The stage coordinator.
//!
//! A [`Pipeline`] holds stages in order. For every hook each stage runs in
//! turn until one returns a final verdict; if none does, the hook's default
//! applies. A [`Session`] drives one client connection through the hooks and
//! owns the transaction between `MAIL FROM` and the queue verdict.

use std::{
    fmt::{self, Display},
    sync::Arc,
};

use async_trait::async_trait;
use haven_common::{
    Address, Connection, Reply, Transaction, Verdict, headers::Headers, incoming, internal,
    outgoing, stream::MessageStream,
};

use crate::error::StageError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hook {
    Capabilities,
    Mail,
    Rcpt,
    DataPost,
    Queue,
}

impl Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Capabilities => "capabilities",
            Self::Mail => "mail",
            Self::Rcpt => "rcpt",
            Self::DataPost => "data_post",
            Self::Queue => "queue",
        })
    }
}

/// One step of the pipeline. Every hook defaults to having no opinion.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Adds EHLO keywords to `capabilities`.
    async fn capabilities(
        &self,
        _connection: &mut Connection,
        _capabilities: &mut Vec<String>,
    ) -> Result<Reply, StageError> {
        Ok(Reply::next())
    }

    async fn mail(
        &self,
        _connection: &Connection,
        _txn: &mut Transaction,
    ) -> Result<Reply, StageError> {
        Ok(Reply::next())
    }

    /// `recipient` is not yet part of the transaction; it is added when the
    /// hook accepts it.
    async fn rcpt(
        &self,
        _connection: &Connection,
        _txn: &mut Transaction,
        _recipient: &Address,
    ) -> Result<Reply, StageError> {
        Ok(Reply::next())
    }

    /// Runs once the message is attached to the transaction.
    async fn data_post(
        &self,
        _connection: &Connection,
        _txn: &mut Transaction,
    ) -> Result<Reply, StageError> {
        Ok(Reply::next())
    }

    async fn queue(
        &self,
        _connection: &Connection,
        _txn: &mut Transaction,
    ) -> Result<Reply, StageError> {
        Ok(Reply::next())
    }
}

#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|stage| stage.name()))
            .finish()
    }
}

/// Logs a stage's verdict and returns it if it ends the hook.
fn decided(hook: Hook, stage: &dyn Stage, reply: Reply) -> Option<Reply> {
    if reply.is_final() {
        internal!(
            level = DEBUG,
            "{hook}: {} returned {} {}",
            stage.name(),
            reply.verdict,
            reply.reason.as_deref().unwrap_or_default()
        );
        Some(reply)
    } else {
        internal!("{hook}: {} continued", stage.name());
        None
    }
}

impl Pipeline {
    pub const fn new() -> Self {
        Self { stages: Vec::new() }
    }

    #[must_use]
    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn push(&mut self, stage: Arc<dyn Stage>) {
        self.stages.push(stage);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub const fn session(&self, connection: Connection) -> Session<'_> {
        Session {
            pipeline: self,
            connection,
            transaction: None,
        }
    }

    async fn capabilities(
        &self,
        connection: &mut Connection,
        capabilities: &mut Vec<String>,
    ) -> Result<Option<Reply>, StageError> {
        for stage in &self.stages {
            let reply = stage.capabilities(connection, capabilities).await?;
            if let Some(reply) = decided(Hook::Capabilities, stage.as_ref(), reply) {
                return Ok(Some(reply));
            }
        }
        Ok(None)
    }

    async fn mail(
        &self,
        connection: &Connection,
        txn: &mut Transaction,
    ) -> Result<Option<Reply>, StageError> {
        for stage in &self.stages {
            let reply = stage.mail(connection, txn).await?;
            if let Some(reply) = decided(Hook::Mail, stage.as_ref(), reply) {
                return Ok(Some(reply));
            }
        }
        Ok(None)
    }

    async fn rcpt(
        &self,
        connection: &Connection,
        txn: &mut Transaction,
        recipient: &Address,
    ) -> Result<Option<Reply>, StageError> {
        for stage in &self.stages {
            let reply = stage.rcpt(connection, txn, recipient).await?;
            if let Some(reply) = decided(Hook::Rcpt, stage.as_ref(), reply) {
                return Ok(Some(reply));
            }
        }
        Ok(None)
    }

    async fn data_post(
        &self,
        connection: &Connection,
        txn: &mut Transaction,
    ) -> Result<Option<Reply>, StageError> {
        for stage in &self.stages {
            let reply = stage.data_post(connection, txn).await?;
            if let Some(reply) = decided(Hook::DataPost, stage.as_ref(), reply) {
                return Ok(Some(reply));
            }
        }
        Ok(None)
    }

    async fn queue(
        &self,
        connection: &Connection,
        txn: &mut Transaction,
    ) -> Result<Option<Reply>, StageError> {
        for stage in &self.stages {
            let reply = stage.queue(connection, txn).await?;
            if let Some(reply) = decided(Hook::Queue, stage.as_ref(), reply) {
                return Ok(Some(reply));
            }
        }
        Ok(None)
    }
}

/// One client connection running through a [`Pipeline`].
///
/// Hooks must be called in protocol order; a hook that needs a transaction
/// when there is none replies with a permanent failure.
#[derive(Debug)]
pub struct Session<'p> {
    pipeline: &'p Pipeline,
    pub connection: Connection,
    transaction: Option<Transaction>,
}

fn out_of_sequence() -> Reply {
    Reply::hard_reject(String::from("Bad sequence of commands"))
}

impl Session<'_> {
    pub const fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    /// The EHLO keywords to advertise.
    pub async fn capabilities(&mut self) -> Result<Vec<String>, StageError> {
        let mut capabilities = Vec::new();
        self.pipeline
            .capabilities(&mut self.connection, &mut capabilities)
            .await?;
        Ok(capabilities)
    }

    /// `MAIL FROM`. On acceptance a new transaction replaces any previous
    /// one.
    #[tracing::instrument(level = "debug", skip_all, fields(sender = ?sender.as_ref().map(Address::normalized)))]
    pub async fn mail(&mut self, sender: Option<Address>) -> Result<Reply, StageError> {
        incoming!(
            level = DEBUG,
            "MAIL FROM:<{}>",
            sender.as_ref().map(ToString::to_string).unwrap_or_default()
        );
        self.transaction = None;
        let mut txn = Transaction::new(sender);

        let reply = self
            .pipeline
            .mail(&self.connection, &mut txn)
            .await?
            .unwrap_or_else(|| Reply::accept(None));

        if matches!(reply.verdict, Verdict::Accept) {
            internal!(level = INFO, "Transaction {} started", txn.id());
            self.transaction = Some(txn);
        }
        outgoing!(level = DEBUG, "{reply}");

        Ok(reply)
    }

    /// `RCPT TO`. The recipient joins the transaction only when a stage
    /// accepts it.
    #[tracing::instrument(level = "debug", skip_all, fields(recipient = %recipient))]
    pub async fn rcpt(&mut self, recipient: Address) -> Result<Reply, StageError> {
        incoming!(level = DEBUG, "RCPT TO:<{recipient}>");
        let Some(txn) = self.transaction.as_mut() else {
            return Ok(out_of_sequence());
        };

        let reply = self
            .pipeline
            .rcpt(&self.connection, txn, &recipient)
            .await?
            .unwrap_or_else(|| {
                Reply::hard_reject(format!("I cannot deliver mail for {recipient}"))
            });

        if matches!(reply.verdict, Verdict::Accept) {
            txn.add_recipient(recipient);
        }
        outgoing!(level = DEBUG, "{reply}");

        Ok(reply)
    }

    /// The end of `DATA`: attaches the message, then runs the `data_post`
    /// and `queue` hooks. The transaction is over afterwards, whatever the
    /// verdict.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn data(
        &mut self,
        headers: Headers,
        message: MessageStream,
    ) -> Result<Reply, StageError> {
        let Some(mut txn) = self.transaction.take() else {
            return Ok(out_of_sequence());
        };
        if txn.recipients().is_empty() {
            return Ok(out_of_sequence());
        }

        txn.attach_message(headers, message);

        if let Some(reply) = self.pipeline.data_post(&self.connection, &mut txn).await?
            && !matches!(reply.verdict, Verdict::Accept)
        {
            internal!(level = INFO, "Transaction {} rejected: {reply}", txn.id());
            return Ok(reply);
        }

        let reply = self
            .pipeline
            .queue(&self.connection, &mut txn)
            .await?
            .unwrap_or_else(|| {
                Reply::soft_reject(String::from("Queuing declined or disabled"))
            });

        internal!(
            level = INFO,
            "Transaction {} finished with {reply}",
            txn.id()
        );

        Ok(reply)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{
        net::IpAddr,
        sync::{Arc, Mutex},
    };

    use pretty_assertions::assert_eq;

    use super::*;

    /// Replies from a fixed script and records which hooks it saw.
    struct Scripted {
        name: &'static str,
        reply: Reply,
        seen: Seen,
    }

    impl Scripted {
        fn saw(&self, hook: Hook) -> Result<Reply, StageError> {
            self.seen.lock().unwrap().push((self.name, hook));
            Ok(self.reply.clone())
        }
    }

    #[async_trait]
    impl Stage for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn mail(&self, _: &Connection, _: &mut Transaction) -> Result<Reply, StageError> {
            self.saw(Hook::Mail)
        }

        async fn rcpt(
            &self,
            _: &Connection,
            _: &mut Transaction,
            _: &Address,
        ) -> Result<Reply, StageError> {
            self.saw(Hook::Rcpt)
        }

        async fn data_post(
            &self,
            _: &Connection,
            _: &mut Transaction,
        ) -> Result<Reply, StageError> {
            self.saw(Hook::DataPost)
        }

        async fn queue(&self, _: &Connection, _: &mut Transaction) -> Result<Reply, StageError> {
            self.saw(Hook::Queue)
        }
    }

    fn connection() -> Connection {
        Connection::new(IpAddr::from([192, 0, 2, 1]), "mx.local")
    }

    fn address(text: &str) -> Address {
        Address::parse(text).unwrap()
    }

    const MESSAGE: &[u8] = b"Subject: hi\r\n\r\nbody\r\n";

    type Seen = Arc<Mutex<Vec<(&'static str, Hook)>>>;

    fn pipeline(replies: &[(&'static str, Reply)]) -> (Pipeline, Seen) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = replies
            .iter()
            .fold(Pipeline::new(), |pipeline, (name, reply)| {
                pipeline.with_stage(Scripted {
                    name: *name,
                    reply: reply.clone(),
                    seen: Arc::clone(&seen),
                })
            });
        (pipeline, seen)
    }

    #[tokio::test]
    async fn defaults_when_every_stage_continues() {
        let (pipeline, seen) = pipeline(&[("a", Reply::next()), ("b", Reply::next())]);
        let mut session = pipeline.session(connection());

        let reply = session.mail(Some(address("alice@example.org"))).await.unwrap();
        assert_eq!(reply.verdict, Verdict::Accept);
        assert!(session.transaction().is_some());

        let reply = session.rcpt(address("bob@example.net")).await.unwrap();
        assert_eq!(reply.verdict, Verdict::HardReject);
        assert_eq!(
            reply.reason.as_deref(),
            Some("I cannot deliver mail for bob@example.net")
        );
        assert!(session.transaction().unwrap().recipients().is_empty());

        assert_eq!(
            *seen.lock().unwrap(),
            [
                ("a", Hook::Mail),
                ("b", Hook::Mail),
                ("a", Hook::Rcpt),
                ("b", Hook::Rcpt)
            ]
        );
    }

    #[tokio::test]
    async fn final_verdict_stops_the_hook() {
        let (pipeline, seen) = pipeline(&[
            ("a", Reply::soft_reject(String::from("later"))),
            ("b", Reply::next()),
        ]);
        let mut session = pipeline.session(connection());

        let reply = session.mail(None).await.unwrap();

        assert_eq!(reply.to_string(), "451 later");
        assert!(session.transaction().is_none());
        assert_eq!(*seen.lock().unwrap(), [("a", Hook::Mail)]);
    }

    #[tokio::test]
    async fn accepted_message_reaches_queue_default() {
        let (pipeline, seen) = pipeline(&[("a", Reply::accept(None))]);
        let mut session = pipeline.session(connection());

        session.mail(None).await.unwrap();
        session.rcpt(address("bob@example.org")).await.unwrap();
        assert_eq!(session.transaction().unwrap().recipients().len(), 1);

        let reply = session
            .data(
                Headers::parse(MESSAGE).unwrap(),
                MessageStream::from_bytes(MESSAGE),
            )
            .await
            .unwrap();

        assert_eq!(reply.verdict, Verdict::Accept);
        assert!(session.transaction().is_none());
        assert_eq!(
            *seen.lock().unwrap(),
            [
                ("a", Hook::Mail),
                ("a", Hook::Rcpt),
                ("a", Hook::DataPost),
                ("a", Hook::Queue)
            ]
        );
    }

    #[tokio::test]
    async fn queue_declined_by_default() {
        let (pipeline, _) = pipeline(&[]);
        let mut session = pipeline.session(connection());

        session.mail(None).await.unwrap();
        session.transaction.as_mut().unwrap().add_recipient(address("bob@example.org"));

        let reply = session
            .data(
                Headers::parse(MESSAGE).unwrap(),
                MessageStream::from_bytes(MESSAGE),
            )
            .await
            .unwrap();

        assert_eq!(reply.verdict, Verdict::SoftReject);
        assert_eq!(reply.reason.as_deref(), Some("Queuing declined or disabled"));
    }

    #[tokio::test]
    async fn hooks_out_of_sequence() {
        let (pipeline, seen) = pipeline(&[("a", Reply::accept(None))]);
        let mut session = pipeline.session(connection());

        let reply = session.rcpt(address("bob@example.org")).await.unwrap();
        assert_eq!(reply.verdict, Verdict::HardReject);

        let reply = session
            .data(Headers::default(), MessageStream::from_bytes(MESSAGE))
            .await
            .unwrap();
        assert_eq!(reply.verdict, Verdict::HardReject);

        assert!(seen.lock().unwrap().is_empty());
    }
}
