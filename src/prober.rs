use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, SurgeError, ICMP};

use crate::types::ProbeOutcome;

/// Echo payload size, same as the classic `ping` default.
const PAYLOAD: [u8; 56] = [0; 56];

/// Reachability check for a single host.
///
/// Implementations own the timeout: the caller adds no timer of its own and
/// waits for the outcome.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, host: &str, timeout: Duration) -> ProbeOutcome;
}

/// Echo sequence numbers, one wrapping counter per host.
#[derive(Debug, Default)]
pub struct Sequences {
    next: Mutex<HashMap<String, u16>>,
}

impl Sequences {
    /// Take the next sequence number for `host`, starting at 0.
    pub fn next(&self, host: &str) -> u16 {
        let mut next = self.next.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let slot = next.entry(host.to_string()).or_insert(0);
        let seq = *slot;
        *slot = slot.wrapping_add(1);
        seq
    }
}

/// ICMP echo prober backed by `surge-ping`.
pub struct IcmpProber {
    v4: Client,
    v6: Option<Client>,
    sequences: Sequences,
}

impl IcmpProber {
    /// Open the ICMP sockets. Fails when the IPv4 socket cannot be created,
    /// typically for lack of raw/ping socket permission. IPv6 is optional.
    pub fn new() -> Result<Self> {
        let v4 = Client::new(&Config::default())
            .context("failed to open ICMPv4 socket (raw socket permission or net.ipv4.ping_group_range)")?;
        let v6 = match Client::new(&Config::builder().kind(ICMP::V6).build()) {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::warn!(error = %e, "ICMPv6 unavailable, IPv6 hosts will be logged as Error");
                None
            }
        };
        Ok(Self {
            v4,
            v6,
            sequences: Sequences::default(),
        })
    }
}

impl std::fmt::Debug for IcmpProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IcmpProber")
            .field("ipv6", &self.v6.is_some())
            .finish_non_exhaustive()
    }
}

/// Resolve a hostname or literal address to one IP.
pub async fn resolve_host(host: &str) -> std::io::Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    tokio::net::lookup_host((host, 0))
        .await?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses found"))
}

#[async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, host: &str, timeout: Duration) -> ProbeOutcome {
        let ip = match resolve_host(host).await {
            Ok(ip) => ip,
            Err(e) => {
                tracing::debug!(host, error = %e, "host resolution failed");
                return ProbeOutcome::Error;
            }
        };

        let client = match (ip, &self.v6) {
            (IpAddr::V4(_), _) => &self.v4,
            (IpAddr::V6(_), Some(v6)) => v6,
            (IpAddr::V6(_), None) => return ProbeOutcome::Error,
        };

        let mut pinger = client.pinger(ip, PingIdentifier(rand::random())).await;
        pinger.timeout(timeout);
        let seq = PingSequence(self.sequences.next(host));

        match pinger.ping(seq, &PAYLOAD).await {
            Ok((_, rtt)) => ProbeOutcome::Success(rtt.as_secs_f64()),
            Err(SurgeError::Timeout { .. }) => ProbeOutcome::Timeout,
            Err(e) => {
                tracing::debug!(host, %ip, error = %e, "echo request failed");
                ProbeOutcome::Error
            }
        }
    }
}
