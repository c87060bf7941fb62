use serde::Deserialize;

use crate::backend::dns::DnsConfig;

/// The `[mailauth]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct MailAuthConfig {
    /// Smallest accepted DKIM and ARC signing key, in bits.
    #[serde(default = "default_min_bit_length")]
    pub min_bit_length: u32,

    /// Most DNS lookups a single SPF evaluation may cause.
    #[serde(default = "default_dns_max_lookups")]
    pub dns_max_lookups: u32,

    /// The `authserv-id` of `Authentication-Results`. Defaults to the local
    /// host name of the connection.
    #[serde(default)]
    pub authserv_id: Option<String>,

    #[serde(default)]
    pub dns: DnsConfig,
}

const fn default_min_bit_length() -> u32 {
    1024
}

const fn default_dns_max_lookups() -> u32 {
    10
}

impl Default for MailAuthConfig {
    fn default() -> Self {
        Self {
            min_bit_length: default_min_bit_length(),
            dns_max_lookups: default_dns_max_lookups(),
            authserv_id: None,
            dns: DnsConfig::default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config: MailAuthConfig = toml::from_str("").unwrap();

        assert_eq!(config.min_bit_length, 1024);
        assert_eq!(config.dns_max_lookups, 10);
        assert!(config.authserv_id.is_none());
        assert_eq!(config.dns.timeout_secs, 5);
    }

    #[test]
    fn overrides() {
        let config: MailAuthConfig = toml::from_str(
            r#"
            min_bit_length = 2048
            dns_max_lookups = 5
            authserv_id = "mx.example.com"

            [dns]
            timeout_secs = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.min_bit_length, 2048);
        assert_eq!(config.dns_max_lookups, 5);
        assert_eq!(config.authserv_id.as_deref(), Some("mx.example.com"));
        assert_eq!(config.dns.timeout_secs, 2);
        assert_eq!(config.dns.min_cache_ttl_secs, 60);
    }
}
