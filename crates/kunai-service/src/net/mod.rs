//! DNS queries used by peer authorization and key lookup.

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};

use crate::error::{ServiceError, ServiceResult};

/// The DNS operations this crate needs.
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Addresses of a host name. An IP literal resolves to itself.
    ///
    /// ## Errors
    /// Returns an error if the lookup fails.
    async fn lookup_ips(&self, host: &str) -> ServiceResult<Vec<IpAddr>>;

    /// Host names of an address, without trailing dots.
    ///
    /// ## Errors
    /// Returns an error if the lookup fails.
    async fn reverse(&self, ip: IpAddr) -> ServiceResult<Vec<String>>;

    /// TXT records at a name, each record's strings concatenated.
    ///
    /// ## Errors
    /// Returns an error if the lookup fails.
    async fn txt(&self, name: &str) -> ServiceResult<Vec<String>>;
}

/// System resolver backed by hickory.
pub struct HickoryHostResolver {
    resolver: TokioAsyncResolver,
}

impl HickoryHostResolver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }
}

impl Default for HickoryHostResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HickoryHostResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HickoryHostResolver").finish_non_exhaustive()
    }
}

fn dns_error(e: &hickory_resolver::error::ResolveError) -> ServiceError {
    ServiceError::NotFound(format!("DNS lookup failed: {e}"))
}

#[async_trait]
impl HostResolver for HickoryHostResolver {
    async fn lookup_ips(&self, host: &str) -> ServiceResult<Vec<IpAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        let lookup = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| dns_error(&e))?;
        Ok(lookup.iter().collect())
    }

    async fn reverse(&self, ip: IpAddr) -> ServiceResult<Vec<String>> {
        let lookup = self
            .resolver
            .reverse_lookup(ip)
            .await
            .map_err(|e| dns_error(&e))?;
        Ok(lookup
            .iter()
            .map(|name| name.to_string().trim_end_matches('.').to_string())
            .collect())
    }

    async fn txt(&self, name: &str) -> ServiceResult<Vec<String>> {
        let lookup = self
            .resolver
            .txt_lookup(name)
            .await
            .map_err(|e| dns_error(&e))?;
        Ok(lookup
            .iter()
            .map(|record| {
                record
                    .txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                    .collect::<String>()
            })
            .collect())
    }
}

/// Fixed answers, for deployments without usable DNS and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticHostResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
    names: HashMap<IpAddr, Vec<String>>,
    txt: HashMap<String, Vec<String>>,
}

impl StaticHostResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers forward and reverse entries for a host.
    #[must_use]
    pub fn with_host(mut self, host: &str, ip: IpAddr) -> Self {
        self.hosts
            .entry(host.to_ascii_lowercase())
            .or_default()
            .push(ip);
        self.names.entry(ip).or_default().push(host.to_string());
        self
    }

    #[must_use]
    pub fn with_txt(mut self, name: &str, record: &str) -> Self {
        self.txt
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(record.to_string());
        self
    }
}

#[async_trait]
impl HostResolver for StaticHostResolver {
    async fn lookup_ips(&self, host: &str) -> ServiceResult<Vec<IpAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        self.hosts
            .get(&host.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("no address for {host}")))
    }

    async fn reverse(&self, ip: IpAddr) -> ServiceResult<Vec<String>> {
        Ok(self.names.get(&ip).cloned().unwrap_or_default())
    }

    async fn txt(&self, name: &str) -> ServiceResult<Vec<String>> {
        self.txt
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("no TXT record at {name}")))
    }
}
