//! The built-in stages and the pipeline they form.

use std::sync::Arc;

use haven_alias::AliasResolver;
use haven_auth::{AuthOrchestrator, Verifier};
use haven_maildir::{DeliveryIdentity, MaildirDelivery};

use crate::{
    config::{Config, StageKind},
    hostfs::HostChecker,
    pipeline::Pipeline,
};

pub mod aliases;
pub mod capabilities;
pub mod hosts;
pub mod mailauth;
pub mod maildir;
pub mod sender_auth;

pub use aliases::AliasStage;
pub use capabilities::CapabilitiesStage;
pub use hosts::HostsStage;
pub use mailauth::MailAuthStage;
pub use maildir::MaildirStage;
pub use sender_auth::SenderAuthStage;

/// Builds the pipeline named by `[pipeline] stages`, in that order.
pub fn build(
    config: &Config,
    verifier: &Arc<dyn Verifier>,
    identity: &Arc<DeliveryIdentity>,
) -> Pipeline {
    let mut pipeline = Pipeline::new();

    for kind in &config.pipeline.stages {
        match kind {
            StageKind::Capabilities => {
                pipeline.push(Arc::new(CapabilitiesStage::new(&config.auth)));
            }
            StageKind::SenderAuth => pipeline.push(Arc::new(SenderAuthStage)),
            StageKind::Hosts => {
                pipeline.push(Arc::new(HostsStage::new(HostChecker::new(&config.hosts))));
            }
            StageKind::Mailauth => pipeline.push(Arc::new(MailAuthStage::new(
                AuthOrchestrator::new(Arc::clone(verifier), config.mailauth.clone()),
            ))),
            StageKind::Aliases => pipeline.push(Arc::new(AliasStage::new(AliasResolver::new(
                config.aliases.clone(),
            )))),
            StageKind::Maildir => pipeline.push(Arc::new(MaildirStage::new(
                MaildirDelivery::new(config.maildir.clone(), Arc::clone(identity)),
            ))),
        }
    }

    pipeline
}
