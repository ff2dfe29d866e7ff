//! Environment-change sources feeding the trigger channel.
//!
//! `SIGHUP` is the operator's (or the network manager's) way of saying the
//! network changed. The optional poller notices on its own when the local
//! address used to reach the controller changes.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Publish a trigger for every `SIGHUP`.
#[cfg(unix)]
pub fn spawn_sighup(trigger: broadcast::Sender<()>) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = signal(SignalKind::hangup())?;
    Ok(tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            tracing::info!("Received SIGHUP, re-running bootstrap");
            if trigger.send(()).is_err() {
                tracing::debug!("No trigger subscriber for SIGHUP");
            }
        }
    }))
}

/// Remembers the last address set and reports changes.
#[derive(Debug, Default)]
pub struct AddressTracker {
    last: Option<BTreeSet<IpAddr>>,
}

impl AddressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `current`; true if it differs from the previous observation.
    /// The first observation is the baseline and never counts as a change.
    pub fn observe(&mut self, current: BTreeSet<IpAddr>) -> bool {
        match self.last.replace(current) {
            None => false,
            Some(previous) => self.last.as_ref() != Some(&previous),
        }
    }
}

/// Local addresses the host would use to reach `target` (`host:port`).
///
/// Connecting a UDP socket picks a route without sending anything. An
/// unresolvable target or an unroutable address contributes nothing, so a
/// lost network shows up as an empty set.
pub async fn local_addresses(target: &str) -> BTreeSet<IpAddr> {
    let remotes = match tokio::net::lookup_host(target).await {
        Ok(remotes) => remotes.collect::<Vec<_>>(),
        Err(e) => {
            tracing::debug!(controller = %target, error = %e, "Controller address lookup failed");
            return BTreeSet::new();
        }
    };

    let mut locals = BTreeSet::new();
    for remote in remotes {
        if let Some(local) = route_source(remote).await {
            locals.insert(local);
        }
    }
    locals
}

async fn route_source(remote: SocketAddr) -> Option<IpAddr> {
    let unspecified = match remote {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    let socket = UdpSocket::bind(SocketAddr::new(unspecified, 0)).await.ok()?;
    socket.connect(remote).await.ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

/// Poll the route to `target` every `interval` and publish a trigger when
/// the local address set changes.
pub fn spawn_address_poller(
    target: String,
    interval: Duration,
    trigger: broadcast::Sender<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tracker = AddressTracker::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let current = local_addresses(&target).await;
            let addresses = current.iter().map(ToString::to_string).collect::<Vec<_>>();
            if tracker.observe(current) {
                tracing::info!(
                    addresses = ?addresses,
                    "Local addresses changed, re-running bootstrap"
                );
                if trigger.send(()).is_err() {
                    tracing::debug!("No trigger subscriber for address change");
                }
            }
        }
    })
}
