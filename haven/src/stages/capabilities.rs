//! Advertises `AUTH` to clients that may authenticate.

use async_trait::async_trait;
use haven_common::{Connection, Reply};

use crate::{config::AuthConfig, error::StageError, pipeline::Stage};

/// Connection note listing the advertised mechanisms.
pub const ALLOWED_AUTH_METHODS: &str = "allowed_auth_methods";

#[derive(Debug)]
pub struct CapabilitiesStage {
    methods: Vec<String>,
}

impl CapabilitiesStage {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            methods: config
                .methods
                .iter()
                .map(|method| method.to_ascii_uppercase())
                .collect(),
        }
    }
}

#[async_trait]
impl Stage for CapabilitiesStage {
    fn name(&self) -> &'static str {
        "capabilities"
    }

    /// Only offered over TLS or to private-network clients.
    async fn capabilities(
        &self,
        connection: &mut Connection,
        capabilities: &mut Vec<String>,
    ) -> Result<Reply, StageError> {
        if self.methods.is_empty() || !(connection.tls || connection.is_private()) {
            return Ok(Reply::next());
        }

        capabilities.push(format!("AUTH {}", self.methods.join(" ")));
        connection
            .notes
            .insert(ALLOWED_AUTH_METHODS, self.methods.clone());

        Ok(Reply::next())
    }
}
