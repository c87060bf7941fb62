//! Runs messages through the haven pipeline from the command line.
//!
//! - `deliver` feeds a message from stdin through every hook, as an SMTP
//!   session would
//! - `aliases` shows how recipients are rewritten
//! - `check-host` tells whether a domain is served locally

use std::{net::IpAddr, path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use haven::{Config, HostChecker, stages};
use haven_alias::AliasResolver;
use haven_auth::{OfflineVerifier, Verifier};
use haven_common::{
    Address, Connection, Reply, Verdict, headers::Headers, logging, stream::MessageStream,
};
use haven_maildir::DeliveryIdentity;
use tokio::io::AsyncReadExt;

/// Inbound routing and delivery for a mail transfer agent
#[derive(Parser, Debug)]
#[command(name = "haven")]
#[command(about = "Route and deliver inbound mail", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file, otherwise `HAVEN_CONFIG`, `./haven.toml` or
    /// `/etc/haven/haven.toml`
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deliver the message on stdin
    Deliver {
        /// Envelope sender, `<>` for bounces
        #[arg(short, long)]
        from: String,

        /// Envelope recipients
        #[arg(short, long, required = true, num_args = 1..)]
        to: Vec<Address>,

        #[arg(long, default_value = "127.0.0.1")]
        remote_ip: IpAddr,

        #[arg(long, default_value = "localhost")]
        helo: String,

        #[arg(long, default_value = "localhost")]
        local_host: String,

        /// Treat the session as authenticated by this user
        #[arg(long)]
        auth_user: Option<Address>,

        #[arg(long)]
        tls: bool,

        /// Skip DNS; every verification answers `none`
        #[arg(long)]
        offline: bool,
    },
    /// Show the recipients a message would be delivered to
    Aliases {
        #[arg(required = true)]
        recipients: Vec<Address>,

        /// A header of the message, as `Name: value`
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },
    /// Check whether the domain of an address is served locally
    CheckHost { address: Address },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    logging::init();

    let cli = Cli::parse();
    let config = match Config::locate(cli.config)? {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Deliver {
            from,
            to,
            remote_ip,
            helo,
            local_host,
            auth_user,
            tls,
            offline,
        } => {
            let mut connection = Connection::new(remote_ip, local_host)
                .with_helo(helo)
                .with_tls(tls);
            if let Some(user) = auth_user {
                connection = connection.authenticated(user);
            }
            let sender = Address::parse_reverse_path(&from)?;
            deliver(&config, connection, sender, to, offline).await
        }
        Commands::Aliases {
            recipients,
            headers,
        } => {
            let mut parsed = Headers::default();
            for header in &headers {
                let (name, value) = header
                    .split_once(':')
                    .with_context(|| format!("Header '{header}' is not 'Name: value'"))?;
                parsed.append(name.trim(), value.trim());
            }

            let resolved = AliasResolver::new(config.aliases)
                .resolve(&recipients, &parsed)
                .await?;
            if resolved.is_empty() {
                println!("(discarded)");
            }
            for recipient in resolved {
                println!("{recipient}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::CheckHost { address } => {
            let checker = HostChecker::new(&config.hosts);
            let local = checker.exists(&address).await?;
            println!(
                "{}: {} ({})",
                address.host(),
                if local { "local" } else { "not local" },
                checker.path(&address).display()
            );
            Ok(if local {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

#[cfg(feature = "mail-auth")]
fn verifier(config: &Config, offline: bool) -> anyhow::Result<Arc<dyn Verifier>> {
    if offline {
        return Ok(Arc::new(OfflineVerifier));
    }
    Ok(Arc::new(haven_auth::MailAuthVerifier::new(&config.mailauth)?))
}

#[cfg(not(feature = "mail-auth"))]
#[allow(clippy::unnecessary_wraps)]
fn verifier(_config: &Config, _offline: bool) -> anyhow::Result<Arc<dyn Verifier>> {
    Ok(Arc::new(OfflineVerifier))
}

/// Maps a final reply to a sysexits code.
fn exit_code(reply: &Reply) -> ExitCode {
    match reply.verdict {
        Verdict::Accept | Verdict::Continue => ExitCode::SUCCESS,
        Verdict::SoftReject => ExitCode::from(75),
        Verdict::HardReject => ExitCode::from(69),
    }
}

async fn deliver(
    config: &Config,
    connection: Connection,
    sender: Option<Address>,
    recipients: Vec<Address>,
    offline: bool,
) -> anyhow::Result<ExitCode> {
    let verifier = verifier(config, offline)?;
    let identity = Arc::new(DeliveryIdentity::load(config.maildir.main.id.as_deref()).await);
    let pipeline = stages::build(config, &verifier, &identity);

    let mut session = pipeline.session(connection);
    let capabilities = session.capabilities().await?;
    if !capabilities.is_empty() {
        eprintln!("capabilities: {}", capabilities.join(", "));
    }

    let reply = session.mail(sender).await?;
    println!("MAIL: {reply}");
    if reply.verdict != Verdict::Accept {
        return Ok(exit_code(&reply));
    }

    let mut accepted = 0_usize;
    for recipient in recipients {
        let reply = session.rcpt(recipient.clone()).await?;
        println!("RCPT {recipient}: {reply}");
        if reply.verdict == Verdict::Accept {
            accepted += 1;
        }
    }
    if accepted == 0 {
        return Ok(ExitCode::from(69));
    }

    let mut message = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut message)
        .await
        .context("Failed to read message from stdin")?;
    let headers = Headers::parse(&message).context("Failed to parse message headers")?;

    let reply = session
        .data(headers, MessageStream::from_bytes(message))
        .await?;
    println!("DATA: {reply}");

    Ok(exit_code(&reply))
}
