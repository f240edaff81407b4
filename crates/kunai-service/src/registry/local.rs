//! The servers ("pods") making up this deployment.
//!
//! Every pod is described by an id and a base URI. Principals carry the id
//! of the pod hosting them, and pods deliver to each other over iSchedule
//! authenticated by source address and an optional shared secret rather
//! than DKIM.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use kunai_core::constants::{ISCHEDULE_ROUTE_PREFIX, SHARED_SECRET_HEADER};

use super::xml::{XmlElement, parse_document};
use super::{DestinationServer, ServerLocation};
use crate::error::{ServiceError, ServiceResult};
use crate::net::HostResolver;

/// One server of this deployment.
#[derive(Debug, Clone)]
pub struct PodServer {
    pub id: String,
    pub uri: String,
    /// Addresses the pod's own host name resolves to.
    pub ips: HashSet<IpAddr>,
    /// Addresses of the `allowed-from` entries.
    pub allowed_from_ips: HashSet<IpAddr>,
    pub shared_secret: Option<String>,
    /// The pod understands internal calendar-user addresses.
    pub implicit: bool,
    destination: Arc<DestinationServer>,
}

impl PodServer {
    #[must_use]
    pub fn check_this_ip(&self, ip: IpAddr) -> bool {
        self.ips.contains(&ip)
    }

    #[must_use]
    pub fn has_allowed_from(&self) -> bool {
        !self.allowed_from_ips.is_empty()
    }

    #[must_use]
    pub fn check_allowed_from(&self, ip: IpAddr) -> bool {
        self.allowed_from_ips.contains(&ip)
    }

    /// Compares the request's secret header with the configured secret.
    /// Both must be absent or both present and equal.
    #[must_use]
    pub fn check_shared_secret(&self, provided: Option<&str>) -> bool {
        match (provided, self.shared_secret.as_deref()) {
            (None, None) => true,
            (Some(_), None) => {
                tracing::warn!(pod = %self.id, "iSchedule request included unexpected {SHARED_SECRET_HEADER} header");
                false
            }
            (None, Some(_)) => {
                tracing::warn!(pod = %self.id, "iSchedule request did not include required {SHARED_SECRET_HEADER} header");
                false
            }
            (Some(provided), Some(expected)) => {
                let matched = provided.trim() == expected;
                if !matched {
                    tracing::warn!(pod = %self.id, "iSchedule request {SHARED_SECRET_HEADER} header did not match");
                }
                matched
            }
        }
    }

    /// Where deliveries to principals on this pod are sent.
    #[must_use]
    pub fn destination(&self) -> Arc<DestinationServer> {
        Arc::clone(&self.destination)
    }

    #[must_use]
    pub fn host(&self) -> Option<String> {
        ServerLocation::parse(&self.uri).map(|l| l.host)
    }
}

/// The pods of this deployment, keyed by id.
#[derive(Debug, Default)]
pub struct LocalServers {
    servers: HashMap<String, PodServer>,
    this_server: Option<String>,
}

impl LocalServers {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads the pods file and resolves every host it names.
    ///
    /// ## Errors
    /// Returns an error if the file cannot be read or is invalid, or if
    /// `this_server_id` names no pod in it.
    #[tracing::instrument(skip(resolver), fields(path = %path.display()))]
    pub async fn load(
        path: &Path,
        this_server_id: Option<&str>,
        resolver: &dyn HostResolver,
    ) -> ServiceResult<Self> {
        let data = tokio::fs::read(path).await?;
        Self::from_xml(&data, this_server_id, resolver).await
    }

    /// ## Errors
    /// See [`LocalServers::load`].
    pub async fn from_xml(
        xml: &[u8],
        this_server_id: Option<&str>,
        resolver: &dyn HostResolver,
    ) -> ServiceResult<Self> {
        let root = parse_document(xml)?;
        if root.name != "servers" {
            return Err(ServiceError::InvalidConfiguration(format!(
                "expected servers document, found {}",
                root.name
            )));
        }

        let mut servers = HashMap::new();
        for element in &root.children {
            if element.name != "server" {
                return Err(ServiceError::InvalidConfiguration(format!(
                    "unknown server type: {}",
                    element.name
                )));
            }
            let pod = parse_pod(element, resolver).await?;
            servers.insert(pod.id.clone(), pod);
        }

        if let Some(id) = this_server_id
            && !servers.contains_key(id)
        {
            return Err(ServiceError::InvalidConfiguration(format!(
                "no server in servers file matches this server ({id})"
            )));
        }

        tracing::info!(servers = servers.len(), "Loaded local servers");
        Ok(Self {
            servers,
            this_server: this_server_id.map(str::to_string),
        })
    }

    #[must_use]
    pub fn server(&self, id: &str) -> Option<&PodServer> {
        self.servers.get(id)
    }

    #[must_use]
    pub fn this_server(&self) -> Option<&PodServer> {
        self.this_server.as_deref().and_then(|id| self.servers.get(id))
    }

    /// Checks that a connecting peer may speak for the given pod.
    ///
    /// ## Summary
    /// A peer is accepted when it is this server itself. Otherwise, if this
    /// server lists `allowed-from` addresses, the peer must be one of them;
    /// if not, it must be an address of the pod's own host. This server's
    /// shared secret must then match as well.
    pub async fn authorize_peer(
        &self,
        pod: &PodServer,
        client_ip: IpAddr,
        shared_secret: Option<&str>,
        resolver: &dyn HostResolver,
    ) -> bool {
        let this = self.this_server();
        let matched = if this.is_some_and(|s| s.check_this_ip(client_ip)) {
            true
        } else if let Some(this) = this.filter(|s| s.has_allowed_from()) {
            this.check_allowed_from(client_ip)
        } else if let Some(host) = pod.host() {
            match host.parse::<IpAddr>() {
                Ok(ip) => ip == client_ip,
                Err(_) => resolver
                    .lookup_ips(&host)
                    .await
                    .is_ok_and(|ips| ips.contains(&client_ip)),
            }
        } else {
            false
        };

        if !matched {
            tracing::warn!(pod = %pod.id, client = %client_ip, "Invalid iSchedule connection from client");
            return false;
        }
        this.unwrap_or(pod).check_shared_secret(shared_secret)
    }
}

async fn parse_pod(element: &XmlElement, resolver: &dyn HostResolver) -> ServiceResult<PodServer> {
    let mut id = None;
    let mut uri = None;
    let mut allowed_from = Vec::new();
    let mut shared_secret = None;

    for child in &element.children {
        match child.name.as_str() {
            "id" => id = child.text().map(str::to_string),
            "uri" => uri = child.text().map(str::to_string),
            "allowed-from" => allowed_from.extend(child.text().map(str::to_string)),
            "shared-secret" => shared_secret = child.text().map(str::to_string),
            other => {
                return Err(ServiceError::InvalidConfiguration(format!(
                    "invalid element in servers file: {other}"
                )));
            }
        }
    }

    let (Some(id), Some(uri)) = (id, uri) else {
        return Err(ServiceError::InvalidConfiguration(
            "server entry without id or uri".to_string(),
        ));
    };
    let implicit = element.attribute("implicit").is_none_or(|v| v == "yes");

    let location = ServerLocation::parse(&uri)
        .ok_or_else(|| ServiceError::InvalidConfiguration(format!("invalid server URI: {uri}")))?;
    let ips = match resolver.lookup_ips(&location.host).await {
        Ok(ips) => ips.into_iter().collect(),
        Err(e) => {
            tracing::error!(pod = %id, host = %location.host, error = %e, "Unable to look up pod address");
            HashSet::new()
        }
    };

    let mut allowed_from_ips = HashSet::new();
    for entry in &allowed_from {
        match resolver.lookup_ips(entry).await {
            Ok(ips) => allowed_from_ips.extend(ips),
            Err(e) => {
                tracing::error!(pod = %id, host = %entry, error = %e, "Unable to look up allowed-from address");
            }
        }
    }

    let mut destination =
        DestinationServer::new(format!("{}{ISCHEDULE_ROUTE_PREFIX}", uri.trim_end_matches('/')))?;
    destination.podding = true;
    destination.unnormalize_addresses = !implicit;
    if let Some(secret) = &shared_secret {
        destination
            .headers
            .push((SHARED_SECRET_HEADER.to_string(), secret.clone()));
    }

    Ok(PodServer {
        id,
        uri,
        ips,
        allowed_from_ips,
        shared_secret,
        implicit,
        destination: Arc::new(destination),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::StaticHostResolver;

    const PODS: &str = r#"<servers>
  <server>
    <id>A</id>
    <uri>https://pod-a.example.com:8443</uri>
  </server>
  <server implicit="no">
    <id>B</id>
    <uri>https://pod-b.example.com:8443/</uri>
    <allowed-from>10.0.0.20</allowed-from>
    <shared-secret>s3cret</shared-secret>
  </server>
  <server>
    <id>C</id>
    <uri>http://10.0.0.30:8008</uri>
  </server>
</servers>"#;

    fn resolver() -> StaticHostResolver {
        StaticHostResolver::new()
            .with_host("pod-a.example.com", "10.0.0.10".parse().unwrap())
            .with_host("pod-b.example.com", "10.0.0.2".parse().unwrap())
    }

    #[tokio::test]
    async fn loads_pods() {
        let pods = LocalServers::from_xml(PODS.as_bytes(), Some("A"), &resolver())
            .await
            .unwrap();
        assert_eq!(pods.this_server().map(|p| p.id.as_str()), Some("A"));

        let b = pods.server("B").unwrap();
        assert!(!b.implicit);
        assert!(b.has_allowed_from());
        let destination = b.destination();
        assert!(destination.podding);
        assert!(destination.unnormalize_addresses);
        assert_eq!(destination.location().url(), "https://pod-b.example.com:8443/ischedule");
        assert_eq!(
            destination.headers,
            vec![(SHARED_SECRET_HEADER.to_string(), "s3cret".to_string())]
        );
    }

    #[tokio::test]
    async fn unknown_this_server_is_an_error() {
        assert!(
            LocalServers::from_xml(PODS.as_bytes(), Some("Z"), &resolver())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn peer_authorization_with_allowed_from() {
        let resolver = resolver();
        let pods = LocalServers::from_xml(PODS.as_bytes(), Some("B"), &resolver)
            .await
            .unwrap();
        let a = pods.server("A").unwrap();
        let ip = |s: &str| s.parse::<IpAddr>().unwrap();

        // allowed-from replaces the pod host check
        assert!(pods.authorize_peer(a, ip("10.0.0.20"), Some("s3cret"), &resolver).await);
        assert!(!pods.authorize_peer(a, ip("10.0.0.10"), Some("s3cret"), &resolver).await);
        assert!(!pods.authorize_peer(a, ip("10.0.0.20"), None, &resolver).await);
        assert!(!pods.authorize_peer(a, ip("10.0.0.20"), Some("wrong"), &resolver).await);

        // this server may always speak for any pod
        assert!(pods.authorize_peer(a, ip("10.0.0.2"), Some("s3cret"), &resolver).await);
    }

    #[tokio::test]
    async fn peer_authorization_by_pod_host() {
        let resolver = resolver();
        let pods = LocalServers::from_xml(PODS.as_bytes(), Some("A"), &resolver)
            .await
            .unwrap();
        let b = pods.server("B").unwrap();
        let c = pods.server("C").unwrap();
        let ip = |s: &str| s.parse::<IpAddr>().unwrap();

        assert!(pods.authorize_peer(b, ip("10.0.0.2"), None, &resolver).await);
        assert!(!pods.authorize_peer(b, ip("10.0.0.20"), None, &resolver).await);

        // IP literal host, no secret configured here
        assert!(pods.authorize_peer(c, ip("10.0.0.30"), None, &resolver).await);
        assert!(!pods.authorize_peer(c, ip("10.0.0.30"), Some("unexpected"), &resolver).await);
        assert!(pods.authorize_peer(c, ip("10.0.0.10"), None, &resolver).await);
    }
}
