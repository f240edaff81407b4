//! Remote iSchedule servers and the servers of this deployment.
//!
//! - `ServerRegistry`: remote domains and how to reach them, reloaded when
//!   its file changes
//! - `local`: the pods of this deployment and their trust settings

mod local;
pub(crate) mod xml;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use regex::Regex;

use crate::error::{ServiceError, ServiceResult};
use xml::XmlElement;

pub use local::{LocalServers, PodServer};

/// Where requests to a server are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLocation {
    pub tls: bool,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl ServerLocation {
    /// Parses an absolute `http(s)://host[:port][/path]` URI.
    #[must_use]
    pub fn parse(uri: &str) -> Option<Self> {
        let uri = uri.trim();
        let (tls, rest) = if let Some(rest) = strip_prefix_ignore_case(uri, "https://") {
            (true, rest)
        } else if let Some(rest) = strip_prefix_ignore_case(uri, "http://") {
            (false, rest)
        } else {
            return None;
        };

        let (authority, path) = match rest.find('/') {
            Some(index) => (&rest[..index], &rest[index..]),
            None => (rest, "/"),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) if !port.contains(']') => (host, port.parse::<u16>().ok()?),
            _ => (authority, if tls { 443 } else { 80 }),
        };
        if host.is_empty() {
            return None;
        }

        Some(Self {
            tls,
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// Resolves a `Location` header against this location. Absolute URIs
    /// replace it, absolute paths keep the scheme and authority.
    #[must_use]
    pub fn join(&self, location: &str) -> Option<Self> {
        if location.starts_with('/') {
            return Some(Self {
                path: location.to_string(),
                ..self.clone()
            });
        }
        Self::parse(location)
    }

    #[must_use]
    pub fn host_header(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            if self.tls { "https" } else { "http" },
            self.host,
            self.port,
            self.path
        )
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub user: String,
    pub password: String,
}

/// IPs, host names or host regexes a server connects from.
///
/// Patterns are compiled once, anchored at the start of the name; an entry
/// that is not a valid pattern still matches exactly.
#[derive(Debug, Clone, Default)]
pub struct HostPatterns {
    entries: Vec<String>,
    patterns: Vec<Regex>,
}

impl HostPatterns {
    #[must_use]
    pub fn new<S: Into<String>>(entries: impl IntoIterator<Item = S>) -> Self {
        let mut hosts = Self::default();
        hosts.extend(entries);
        hosts
    }

    pub fn extend<S: Into<String>>(&mut self, entries: impl IntoIterator<Item = S>) {
        for entry in entries {
            let entry = entry.into();
            match Regex::new(&format!("^(?:{entry})")) {
                Ok(re) => self.patterns.push(re),
                Err(e) => tracing::warn!(pattern = %entry, error = %e, "Invalid client host pattern"),
            }
            self.entries.push(entry);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// An entry equal to `name`, ignoring ASCII case.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|h| h.eq_ignore_ascii_case(name))
    }

    /// Exact entries first, then the compiled patterns.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.contains(name) || self.patterns.iter().any(|re| re.is_match(name))
    }
}

/// A server that accepts iSchedule requests.
///
/// The location sits behind a lock because a permanent redirect rewrites it
/// for every later delivery; concurrent deliveries see either the old or the
/// new location.
#[derive(Debug)]
pub struct DestinationServer {
    uri: String,
    location: RwLock<ServerLocation>,
    pub authentication: Option<BasicAuth>,
    /// Inbound requests from this server are accepted.
    pub allow_from: bool,
    /// Outbound requests to this server are allowed.
    pub allow_to: bool,
    /// Exact domains or `*.domain` wildcards this server handles.
    pub domains: Vec<String>,
    pub client_hosts: HostPatterns,
    /// Extra headers added to every outbound request.
    pub headers: Vec<(String, String)>,
    /// Send directory-displayable addresses instead of internal ones.
    pub unnormalize_addresses: bool,
    /// A server of this deployment; requests carry the shared secret and
    /// are not DKIM signed.
    pub podding: bool,
}

impl DestinationServer {
    /// A server with default permissions: outbound allowed, inbound denied.
    ///
    /// ## Errors
    /// Returns an error if `uri` is not an absolute HTTP(S) URI.
    pub fn new(uri: impl Into<String>) -> ServiceResult<Self> {
        let uri = uri.into();
        let location = ServerLocation::parse(&uri)
            .ok_or_else(|| ServiceError::InvalidConfiguration(format!("invalid server URI: {uri}")))?;
        Ok(Self {
            uri,
            location: RwLock::new(location),
            authentication: None,
            allow_from: false,
            allow_to: true,
            domains: Vec::new(),
            client_hosts: HostPatterns::default(),
            headers: Vec::new(),
            unnormalize_addresses: true,
            podding: false,
        })
    }

    /// The URI the server was configured with.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The current location, following cached permanent redirects.
    #[must_use]
    pub fn location(&self) -> ServerLocation {
        self.location.read().clone()
    }

    /// Records a permanent redirect for later deliveries.
    ///
    /// ## Errors
    /// Returns an error if the location cannot be resolved.
    pub fn redirect(&self, location: &str) -> ServiceResult<ServerLocation> {
        let mut current = self.location.write();
        let next = current.join(location).ok_or_else(|| {
            ServiceError::DeliveryFailed(format!("invalid redirect location: {location}"))
        })?;
        tracing::info!(server = %self.uri, location = %next.url(), "Caching permanent redirect");
        *current = next.clone();
        Ok(next)
    }

    /// Returns whether this server handles `domain`.
    #[must_use]
    pub fn matches_domain(&self, domain: &str) -> bool {
        self.domains.iter().any(|d| domain_matches(d, domain))
    }

    fn from_element(element: &XmlElement) -> ServiceResult<Self> {
        let uri = element
            .child("uri")
            .and_then(XmlElement::text)
            .ok_or_else(|| ServiceError::InvalidConfiguration("server without uri".to_string()))?;
        let mut server = Self::new(uri)?;

        for child in &element.children {
            match child.name.as_str() {
                "uri" => {}
                "authentication" => {
                    if child.attribute("type") == Some("basic") {
                        server.authentication = Some(BasicAuth {
                            user: child
                                .child("user")
                                .and_then(XmlElement::text)
                                .unwrap_or_default()
                                .to_string(),
                            password: child
                                .child("password")
                                .and_then(XmlElement::text)
                                .unwrap_or_default()
                                .to_string(),
                        });
                    }
                }
                "allow-requests-from" => server.allow_from = true,
                "allow-requests-to" => server.allow_to = true,
                "domains" => server
                    .domains
                    .extend(child.list("domain").into_iter().map(|d| d.to_ascii_lowercase())),
                "hosts" | "client-hosts" => server.client_hosts.extend(child.list("host")),
                "headers" => {
                    for header in child.children_named("header") {
                        if let Some(name) = header.attribute("name") {
                            server.headers.push((
                                name.to_string(),
                                header.text().unwrap_or_default().to_string(),
                            ));
                        }
                    }
                }
                "unnormalize-addresses" => {
                    server.unnormalize_addresses =
                        !matches!(child.text(), Some("false" | "no" | "0"));
                }
                other => {
                    return Err(ServiceError::InvalidConfiguration(format!(
                        "unknown element in server entry: {other}"
                    )));
                }
            }
        }
        Ok(server)
    }
}

fn domain_matches(pattern: &str, domain: &str) -> bool {
    let domain = domain.to_ascii_lowercase();
    match pattern.strip_prefix("*.") {
        Some(suffix) => domain
            .strip_suffix(suffix)
            .is_some_and(|head| head.ends_with('.') && head.len() > 1),
        None => pattern == domain,
    }
}

/// Parses a registry document.
///
/// ## Errors
/// Returns an error if the XML is malformed, the root is not `servers`, or
/// an entry is invalid.
pub fn parse_servers(xml: &[u8]) -> ServiceResult<Vec<DestinationServer>> {
    let root = xml::parse_document(xml)?;
    if root.name != "servers" {
        return Err(ServiceError::InvalidConfiguration(format!(
            "expected servers document, found {}",
            root.name
        )));
    }
    root.children_named("server")
        .map(DestinationServer::from_element)
        .collect()
}

#[derive(Debug, Default)]
struct Snapshot {
    file_info: Option<(SystemTime, u64)>,
    servers: Vec<Arc<DestinationServer>>,
}

/// Maps remote domains to the servers that handle them.
///
/// ## Summary
/// When backed by a file, every lookup compares the file's modification
/// time and size with those of the loaded table and reloads on change.
/// Readers always see a complete table: a reload builds a new snapshot and
/// swaps it in. A file that fails to parse leaves the previous table in
/// place until the file changes again.
#[derive(Debug)]
pub struct ServerRegistry {
    path: Option<PathBuf>,
    snapshot: ArcSwap<Snapshot>,
    reload_lock: Mutex<()>,
}

impl ServerRegistry {
    /// A registry backed by an XML file, loaded on first use.
    #[must_use]
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            reload_lock: Mutex::new(()),
        }
    }

    /// A fixed registry.
    #[must_use]
    pub fn from_servers(servers: Vec<DestinationServer>) -> Self {
        Self {
            path: None,
            snapshot: ArcSwap::from_pointee(Snapshot {
                file_info: None,
                servers: servers.into_iter().map(Arc::new).collect(),
            }),
            reload_lock: Mutex::new(()),
        }
    }

    /// ## Errors
    /// Returns an error if the document is invalid.
    pub fn from_xml(xml: &str) -> ServiceResult<Self> {
        Ok(Self::from_servers(parse_servers(xml.as_bytes())?))
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::from_servers(Vec::new())
    }

    /// Returns the server for a domain. Exact domains win over wildcards.
    #[must_use]
    pub fn server_for_domain(&self, domain: &str) -> Option<Arc<DestinationServer>> {
        self.refresh();
        let snapshot = self.snapshot.load();
        let domain = domain.to_ascii_lowercase();
        snapshot
            .servers
            .iter()
            .find(|s| s.domains.iter().any(|d| *d == domain))
            .or_else(|| snapshot.servers.iter().find(|s| s.matches_domain(&domain)))
            .cloned()
    }

    #[must_use]
    pub fn servers(&self) -> Vec<Arc<DestinationServer>> {
        self.refresh();
        self.snapshot.load().servers.clone()
    }

    /// Reloads the file now, regardless of its modification time.
    ///
    /// ## Errors
    /// Returns an error if the file cannot be read or parsed; the previous
    /// table is kept.
    pub fn reload(&self) -> ServiceResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.reload_lock.lock();
        let info = file_info(path)?;
        self.load_file(path, info)
    }

    fn refresh(&self) {
        let Some(path) = &self.path else {
            return;
        };

        let info = match file_info(path) {
            Ok(info) => info,
            Err(e) => {
                if self.snapshot.load().file_info.is_some() {
                    tracing::warn!(path = %path.display(), error = %e, "Server registry file is gone; clearing registry");
                    self.snapshot.store(Arc::new(Snapshot::default()));
                }
                return;
            }
        };
        if self.snapshot.load().file_info == Some(info) {
            return;
        }

        let _guard = self.reload_lock.lock();
        if self.snapshot.load().file_info == Some(info) {
            return;
        }
        if let Err(e) = self.load_file(path, info) {
            tracing::error!(path = %path.display(), error = %e, "Failed to load server registry");
        }
    }

    /// Caller holds `reload_lock`.
    fn load_file(&self, path: &Path, info: (SystemTime, u64)) -> ServiceResult<()> {
        let data = std::fs::read(path);
        let parsed = data
            .map_err(ServiceError::from)
            .and_then(|data| parse_servers(&data));

        match parsed {
            Ok(servers) => {
                tracing::info!(path = %path.display(), servers = servers.len(), "Loaded server registry");
                self.snapshot.store(Arc::new(Snapshot {
                    file_info: Some(info),
                    servers: servers.into_iter().map(Arc::new).collect(),
                }));
                Ok(())
            }
            Err(e) => {
                let previous = self.snapshot.load_full();
                self.snapshot.store(Arc::new(Snapshot {
                    file_info: Some(info),
                    servers: previous.servers.clone(),
                }));
                Err(e)
            }
        }
    }
}

fn file_info(path: &Path) -> ServiceResult<(SystemTime, u64)> {
    let metadata = std::fs::metadata(path)?;
    Ok((metadata.modified()?, metadata.len()))
}
