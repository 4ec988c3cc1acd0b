use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::process::Stdio;

use log::{debug, warn};
use tokio::process::Command;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

use crate::error_handling::types::LookupError;

pub type LookupFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<String>, LookupError>> + Send + 'a>>;

/// Source of hostnames for an address.
///
/// Implementations do not apply timeouts; the caller bounds every call.
pub trait NameLookup: Send + Sync {
    /// PTR-style reverse resolution.
    fn reverse(&self, ip: IpAddr) -> LookupFuture<'_>;

    /// The host's own name service, which also knows local-discovery
    /// names that have no PTR record.
    fn name_service(&self, ip: IpAddr) -> LookupFuture<'_>;
}

/// DNS through `trust-dns-resolver` plus the platform name service.
#[derive(Clone)]
pub struct SystemLookup {
    resolver: TokioAsyncResolver,
}

impl SystemLookup {
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            warn!(
                "System resolver configuration unavailable ({}), using default upstreams",
                e
            );
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { resolver }
    }
}

impl Default for SystemLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl NameLookup for SystemLookup {
    fn reverse(&self, ip: IpAddr) -> LookupFuture<'_> {
        Box::pin(async move {
            let lookup = self
                .resolver
                .reverse_lookup(ip)
                .await
                .map_err(|e| LookupError::Resolver(e.to_string()))?;
            Ok(lookup
                .into_iter()
                .map(|name| name.to_string().trim_end_matches('.').to_string())
                .collect())
        })
    }

    fn name_service(&self, ip: IpAddr) -> LookupFuture<'_> {
        Box::pin(async move {
            let Some(mut cmd) = name_service_command(ip) else {
                return Ok(Vec::new());
            };
            let output = cmd
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| LookupError::NameService(e.to_string()))?;

            // getent exits 2 for an unknown key
            if !output.status.success() {
                debug!("Name service has no entry for {} ({})", ip, output.status);
                return Ok(Vec::new());
            }
            Ok(parse_name_service_output(&String::from_utf8_lossy(
                &output.stdout,
            )))
        })
    }
}

#[cfg(target_os = "macos")]
fn name_service_command(ip: IpAddr) -> Option<Command> {
    let mut cmd = Command::new("dscacheutil");
    cmd.args(["-q", "host", "-a", "ip_address"]).arg(ip.to_string());
    Some(cmd)
}

#[cfg(all(unix, not(target_os = "macos")))]
fn name_service_command(ip: IpAddr) -> Option<Command> {
    let mut cmd = Command::new("getent");
    cmd.arg("hosts").arg(ip.to_string());
    Some(cmd)
}

#[cfg(not(unix))]
fn name_service_command(_ip: IpAddr) -> Option<Command> {
    None
}

#[cfg(target_os = "macos")]
fn parse_name_service_output(output: &str) -> Vec<String> {
    parse_dscacheutil(output)
}

#[cfg(not(target_os = "macos"))]
fn parse_name_service_output(output: &str) -> Vec<String> {
    parse_getent(output)
}

/// `getent hosts` prints `<addr> <canonical> [aliases...]` per line.
#[cfg_attr(target_os = "macos", allow(dead_code))]
fn parse_getent(output: &str) -> Vec<String> {
    output
        .lines()
        .flat_map(|line| line.split_whitespace().skip(1))
        .map(str::to_string)
        .collect()
}

/// `dscacheutil -q host` prints `name: <host>` and `alias: <host>` lines.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_dscacheutil(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            match key.trim() {
                "name" | "alias" => Some(value.trim().to_string()),
                _ => None,
            }
        })
        .filter(|name| !name.is_empty())
        .collect()
}
