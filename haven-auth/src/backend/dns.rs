//! Cached TXT lookups for policy records.
//!
//! Entries live for the record's TTL, bounded to `[min_cache_ttl_secs,
//! max_cache_ttl_secs]`, unless `cache_ttl_secs` overrides it. A name without
//! TXT records is cached as an empty set for the minimum TTL.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use haven_common::internal;
use hickory_resolver::{
    TokioResolver,
    config::{ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
    proto::rr::Record,
};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("DNS lookup failed: {0}")]
    LookupFailed(#[from] hickory_resolver::ResolveError),
}

impl DnsError {
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::LookupFailed(_))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
    /// Query timeout in seconds (default: 5)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Replaces the record TTL for every cached entry
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,

    #[serde(default = "default_min_cache_ttl_secs")]
    pub min_cache_ttl_secs: u64,

    #[serde(default = "default_max_cache_ttl_secs")]
    pub max_cache_ttl_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    5
}

const fn default_min_cache_ttl_secs() -> u64 {
    60
}

const fn default_max_cache_ttl_secs() -> u64 {
    3600
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            cache_ttl_secs: None,
            min_cache_ttl_secs: default_min_cache_ttl_secs(),
            max_cache_ttl_secs: default_max_cache_ttl_secs(),
        }
    }
}

impl DnsConfig {
    /// How long to keep an answer whose records carried `dns_ttl`.
    pub fn cache_ttl(&self, dns_ttl: u32) -> u64 {
        self.cache_ttl_secs.unwrap_or_else(|| {
            u64::from(dns_ttl).clamp(self.min_cache_ttl_secs, self.max_cache_ttl_secs)
        })
    }
}

#[derive(Debug, Clone)]
struct CachedTxt {
    records: Arc<Vec<String>>,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct DnsResolver {
    resolver: TokioResolver,
    cache: DashMap<String, CachedTxt>,
    config: DnsConfig,
}

impl DnsResolver {
    /// A resolver using the system configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the system DNS configuration cannot be loaded.
    pub fn new(config: DnsConfig) -> Result<Self, DnsError> {
        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(Self::options(&config))
            .build();

        Ok(Self::with_resolver(resolver, config))
    }

    /// A resolver querying Cloudflare's public servers.
    pub fn cloudflare(config: DnsConfig) -> Self {
        let resolver = TokioResolver::builder_with_config(
            ResolverConfig::cloudflare(),
            TokioConnectionProvider::default(),
        )
        .with_options(Self::options(&config))
        .build();

        Self::with_resolver(resolver, config)
    }

    fn options(config: &DnsConfig) -> ResolverOpts {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(config.timeout_secs);
        opts
    }

    fn with_resolver(resolver: TokioResolver, config: DnsConfig) -> Self {
        Self {
            resolver,
            cache: DashMap::new(),
            config,
        }
    }

    /// Every TXT record at `name`, each with its character-strings joined.
    pub async fn txt(&self, name: &str) -> Result<Arc<Vec<String>>, DnsError> {
        let name = name.to_ascii_lowercase();

        if let Some(cached) = self.cache.get(&name)
            && cached.expires_at > Instant::now()
        {
            return Ok(Arc::clone(&cached.records));
        }

        let (records, dns_ttl) = match self.resolver.txt_lookup(name.as_str()).await {
            Ok(lookup) => {
                let ttl = lookup
                    .as_lookup()
                    .records()
                    .iter()
                    .map(Record::ttl)
                    .min()
                    .unwrap_or(300);

                let records = lookup
                    .iter()
                    .map(|txt| {
                        txt.txt_data()
                            .iter()
                            .map(|data| String::from_utf8_lossy(data))
                            .collect::<String>()
                    })
                    .collect();

                (records, ttl)
            }
            Err(err) if err.is_no_records_found() => {
                internal!(level = DEBUG, "No TXT records at {name}");
                (Vec::new(), 0)
            }
            Err(err) => {
                internal!(level = WARN, "TXT lookup failed for {name}: {err}");
                return Err(DnsError::LookupFailed(err));
            }
        };

        let records = Arc::new(records);
        let expires_at = Instant::now() + Duration::from_secs(self.config.cache_ttl(dns_ttl));
        self.cache.insert(
            name,
            CachedTxt {
                records: Arc::clone(&records),
                expires_at,
            },
        );

        Ok(records)
    }
}

/// The organisational domain: the registrable part of `domain` under the
/// public suffix list. A name that is itself a public suffix is returned as
/// is. Expects a lowercase name without the trailing dot.
pub fn organizational_domain(domain: &str) -> &str {
    psl::domain_str(domain).unwrap_or(domain)
}
