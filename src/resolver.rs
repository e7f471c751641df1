//! Subdomain resolution.

use previewd_common::{ContainerRoute, PreviewError, PreviewResult};

use crate::storage::Store;

/// Maps a subdomain to the container it routes to. Reads committed rows only,
/// so a container is either fully routable or absent.
#[derive(Clone)]
pub struct SubdomainResolver {
    store: Store,
}

impl SubdomainResolver {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, subdomain: &str) -> PreviewResult<ContainerRoute> {
        let subdomain = subdomain.to_ascii_lowercase();
        self.store
            .find_by_subdomain(&subdomain)
            .await?
            .ok_or_else(|| PreviewError::not_found("subdomain", subdomain))
    }
}

/// Extract `<sub>` from a Host header of the form `<sub>.<base-domain>[:port]`.
///
/// Matching is case-insensitive. Hosts outside the base domain, the bare base
/// domain and nested labels (`a.b.<base-domain>`) yield `None`.
pub fn subdomain_from_host(host: &str, base_domain: &str) -> Option<String> {
    let host = host.trim().to_ascii_lowercase();
    let host = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name.to_string(),
        _ => host,
    };
    let base = base_domain.trim().trim_start_matches('.').to_ascii_lowercase();
    let label = host.strip_suffix(&base)?.strip_suffix('.')?;
    if label.is_empty() || label.contains('.') {
        return None;
    }
    Some(label.to_string())
}
