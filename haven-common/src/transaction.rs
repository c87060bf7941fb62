use std::{
    fmt::{self, Debug},
    net::IpAddr,
};

use ulid::Ulid;

use crate::{
    address::Address,
    headers::Headers,
    ledger::Ledger,
    notes::Notes,
    stream::{HeaderEdits, MessageStream},
};

/// What the protocol engine knows about the client session.
#[derive(Debug)]
pub struct Connection {
    pub remote_ip: IpAddr,
    /// The HELO/EHLO argument, once given.
    pub helo: Option<String>,
    /// Our own host name, as announced in the greeting.
    pub local_host: String,
    /// Authenticated submission; mail is outbound.
    pub relaying: bool,
    pub auth_user: Option<Address>,
    pub tls: bool,
    pub notes: Notes,
    pub results: Ledger,
}

impl Connection {
    pub fn new(remote_ip: IpAddr, local_host: impl Into<String>) -> Self {
        Self {
            remote_ip,
            helo: None,
            local_host: local_host.into(),
            relaying: false,
            auth_user: None,
            tls: false,
            notes: Notes::default(),
            results: Ledger::default(),
        }
    }

    #[must_use]
    pub fn with_helo(mut self, helo: impl Into<String>) -> Self {
        self.helo = Some(helo.into());
        self
    }

    /// Marks the session as authenticated by `user`, which makes it relaying.
    #[must_use]
    pub fn authenticated(mut self, user: Address) -> Self {
        self.auth_user = Some(user);
        self.relaying = true;
        self
    }

    #[must_use]
    pub const fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Loopback, link-local and private-range clients.
    pub fn is_private(&self) -> bool {
        match self.remote_ip {
            IpAddr::V4(ip) => ip.is_loopback() || ip.is_private() || ip.is_link_local(),
            IpAddr::V6(ip) => {
                ip.is_loopback() || ip.is_unique_local() || ip.is_unicast_link_local()
            }
        }
    }
}

/// One message in flight, from an accepted sender to the queue verdict.
pub struct Transaction {
    id: Ulid,
    sender: Option<Address>,
    recipients: Vec<Address>,
    headers: Headers,
    message: Option<MessageStream>,
    edits: HeaderEdits,
    auth_results: Vec<String>,
    pub notes: Notes,
    pub results: Ledger,
}

impl Transaction {
    /// A transaction for `sender`, where `None` is the null sender.
    pub fn new(sender: Option<Address>) -> Self {
        Self {
            id: Ulid::new(),
            sender,
            recipients: Vec::new(),
            headers: Headers::default(),
            message: None,
            edits: HeaderEdits::default(),
            auth_results: Vec::new(),
            notes: Notes::default(),
            results: Ledger::default(),
        }
    }

    pub const fn id(&self) -> Ulid {
        self.id
    }

    pub const fn sender(&self) -> Option<&Address> {
        self.sender.as_ref()
    }

    pub fn recipients(&self) -> &[Address] {
        &self.recipients
    }

    /// Adds `recipient` unless an equal address is already present.
    pub fn add_recipient(&mut self, recipient: Address) -> bool {
        if self.recipients.contains(&recipient) {
            return false;
        }
        self.recipients.push(recipient);
        true
    }

    pub fn set_recipients(&mut self, recipients: Vec<Address>) {
        self.recipients = recipients;
    }

    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Attaches the received message: its parsed header section and the
    /// stream of the full message, headers included.
    ///
    /// Edits made before the message arrived are applied to `headers`.
    pub fn attach_message(&mut self, mut headers: Headers, message: MessageStream) {
        self.edits.apply_to(&mut headers);
        self.headers = headers;
        self.message = Some(message);
    }

    pub fn message_mut(&mut self) -> Option<&mut MessageStream> {
        self.message.as_mut()
    }

    /// Takes the message stream for delivery, with every header edit
    /// applied.
    pub fn take_message(&mut self) -> Option<MessageStream> {
        self.message
            .take()
            .map(|message| message.edited(self.edits.clone()))
    }

    pub fn add_leading_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        self.headers.prepend(name, value.clone());
        self.edits.prepend(name, value);
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.remove(name);
        self.edits.remove(name);
    }

    pub const fn header_edits(&self) -> &HeaderEdits {
        &self.edits
    }

    /// Adds a fragment such as `spf=pass smtp.mailfrom=example.com` for the
    /// `Authentication-Results` header.
    pub fn add_auth_result(&mut self, fragment: impl Into<String>) {
        self.auth_results.push(fragment.into());
    }

    pub fn auth_results(&self) -> &[String] {
        &self.auth_results
    }
}

impl Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("sender", &self.sender)
            .field("recipients", &self.recipients)
            .field("notes", &self.notes)
            .finish_non_exhaustive()
    }
}
