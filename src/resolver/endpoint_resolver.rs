use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};

use super::lookup::{NameLookup, SystemLookup};
use crate::configuration::types::{
    DEFAULT_RESOLVER_CONCURRENCY, DEFAULT_RESOLVER_TIMEOUT_MS, MAX_RESOLVER_CONCURRENCY,
    MAX_RESOLVER_TIMEOUT_MS, MIN_RESOLVER_CONCURRENCY, MIN_RESOLVER_TIMEOUT_MS,
};
use crate::storage::types::Endpoint;

/// How long a successful resolution is reused.
pub const SUCCESS_TTL: Duration = Duration::from_secs(600);
/// How long an address that yielded no name is left alone.
pub const MISS_TTL: Duration = Duration::from_secs(60);

/// Address to hostnames, for addresses that resolved to at least one name.
pub type HostnameMap = HashMap<IpAddr, Vec<String>>;

#[derive(Debug, Clone, PartialEq)]
pub struct ResolverSettings {
    /// When false, no lookups are made at all.
    pub enabled: bool,
    pub concurrency: usize,
    /// Budget for all attempts on one address.
    pub per_ip_timeout: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: DEFAULT_RESOLVER_CONCURRENCY,
            per_ip_timeout: Duration::from_millis(DEFAULT_RESOLVER_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    names: Vec<String>,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        self.stored_at.elapsed() < self.ttl
    }
}

/// Resolves sets of addresses to hostnames with a bounded worker pool and a
/// shared cache. Clones share the cache.
#[derive(Clone)]
pub struct EndpointResolver {
    lookup: Arc<dyn NameLookup>,
    settings: ResolverSettings,
    cache: Arc<Mutex<HashMap<IpAddr, CacheEntry>>>,
}

impl EndpointResolver {
    pub fn new(lookup: Arc<dyn NameLookup>, settings: ResolverSettings) -> Self {
        Self {
            lookup,
            settings,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolver backed by system DNS and name service.
    pub fn system(settings: ResolverSettings) -> Self {
        Self::new(Arc::new(SystemLookup::new()), settings)
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Resolves `addresses` with the configured concurrency and budget.
    pub async fn resolve<I, S>(&self, addresses: I) -> HostnameMap
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.resolve_with(
            addresses,
            self.settings.concurrency,
            self.settings.per_ip_timeout,
        )
        .await
    }

    /// Resolves `addresses`, deduplicated, with at most `concurrency` lookups
    /// in flight and `per_ip_timeout` per address. Entries that are not IP
    /// literals are ignored. Never fails; unresolved addresses are absent
    /// from the result.
    pub async fn resolve_with<I, S>(
        &self,
        addresses: I,
        concurrency: usize,
        per_ip_timeout: Duration,
    ) -> HostnameMap
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut resolved = HostnameMap::new();
        if !self.settings.enabled {
            debug!("Hostname resolution disabled, skipping lookups");
            return resolved;
        }

        let concurrency = concurrency.clamp(MIN_RESOLVER_CONCURRENCY, MAX_RESOLVER_CONCURRENCY);
        let per_ip_timeout = per_ip_timeout.clamp(
            Duration::from_millis(MIN_RESOLVER_TIMEOUT_MS),
            Duration::from_millis(MAX_RESOLVER_TIMEOUT_MS),
        );

        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for raw in addresses {
            let raw = raw.as_ref().trim();
            let ip = match raw.parse::<IpAddr>() {
                Ok(ip) => ip,
                Err(_) => {
                    debug!("Skipping non-literal address {:?}", raw);
                    continue;
                }
            };
            if !seen.insert(ip) {
                continue;
            }
            match self.cached(ip) {
                Some(names) => {
                    trace!("Resolver cache hit for {}: {:?}", ip, names);
                    if !names.is_empty() {
                        resolved.insert(ip, names);
                    }
                }
                None => pending.push(ip),
            }
        }

        if pending.is_empty() {
            return resolved;
        }
        debug!(
            "Resolving {} addresses ({} cached) with {} workers, {:?} each",
            pending.len(),
            seen.len() - pending.len(),
            concurrency,
            per_ip_timeout
        );

        let permits = Arc::new(Semaphore::new(concurrency));
        let mut workers = JoinSet::new();
        for ip in pending {
            let permits = permits.clone();
            let lookup = self.lookup.clone();
            workers.spawn(async move {
                // The budget starts once a worker slot is free
                let _permit = permits.acquire_owned().await.ok();
                let names = resolve_one(lookup.as_ref(), ip, per_ip_timeout).await;
                (ip, names)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((ip, names)) => {
                    self.store(ip, &names);
                    if !names.is_empty() {
                        debug!("Resolved {} -> {}", ip, names.join(", "));
                        resolved.insert(ip, names);
                    }
                }
                Err(e) => warn!("Resolver worker failed: {}", e),
            }
        }
        resolved
    }

    fn cached(&self, ip: IpAddr) -> Option<Vec<String>> {
        let cache = self.cache.lock().ok()?;
        cache
            .get(&ip)
            .filter(|entry| entry.is_fresh())
            .map(|entry| entry.names.clone())
    }

    fn store(&self, ip: IpAddr, names: &[String]) {
        let ttl = if names.is_empty() { MISS_TTL } else { SUCCESS_TTL };
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                ip,
                CacheEntry {
                    names: names.to_vec(),
                    stored_at: Instant::now(),
                    ttl,
                },
            );
        }
    }
}

/// Reverse lookup first; the name service only when that yields nothing.
/// Both attempts share one deadline.
async fn resolve_one(lookup: &dyn NameLookup, ip: IpAddr, budget: Duration) -> Vec<String> {
    let deadline = Instant::now() + budget;

    match timeout_at(deadline, lookup.reverse(ip)).await {
        Ok(Ok(names)) => {
            let names = clean_names(names, ip);
            if !names.is_empty() {
                return names;
            }
        }
        Ok(Err(e)) => debug!("{}: {}", ip, e),
        Err(_) => {
            debug!("Reverse lookup of {} timed out after {:?}", ip, budget);
            return Vec::new();
        }
    }

    match timeout_at(deadline, lookup.name_service(ip)).await {
        Ok(Ok(names)) => clean_names(names, ip),
        Ok(Err(e)) => {
            debug!("{}: {}", ip, e);
            Vec::new()
        }
        Err(_) => {
            debug!("Name service lookup of {} ran out of time", ip);
            Vec::new()
        }
    }
}

/// Strips trailing dots, drops empty names and the literal address itself,
/// and removes duplicates keeping the first occurrence.
fn clean_names(names: Vec<String>, ip: IpAddr) -> Vec<String> {
    let literal = ip.to_string();
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|n| n.trim().trim_end_matches('.').to_string())
        .filter(|n| !n.is_empty() && *n != literal)
        .filter(|n| seen.insert(n.to_ascii_lowercase()))
        .collect()
}

/// Copies resolved names onto every endpoint whose address was resolved.
pub fn apply_hostnames<'a, I>(names: &HostnameMap, endpoints: I)
where
    I: IntoIterator<Item = &'a mut Endpoint>,
{
    for endpoint in endpoints {
        let Ok(ip) = endpoint.address.parse::<IpAddr>() else {
            continue;
        };
        if let Some(found) = names.get(&ip) {
            endpoint.hostnames = found.clone();
        }
    }
}
