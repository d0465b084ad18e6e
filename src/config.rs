//! Per-peering configuration.
//!
//! Loading configuration from a file or the command line is explicitly out
//! of scope for the core (it is the demo binary's job, grounded in
//! `delegation-feed/arg.rs`'s `clap::Parser` style); this module only
//! defines the programmatic surface the FSM and peering manager read from.

// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::wire::capability::{Afi, Safi};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Configuration for one peering (spec.md Section 6, "Configuration
/// surface per peering").
#[derive(Clone, Debug)]
pub struct PeerConfig {
    /// Local 16-bit ASN. 4-byte ASNs are a non-goal.
    pub local_asn: u16,
    /// Local BGP identifier. When `None`, derived from the local TCP
    /// endpoint's IPv4 address on connection (spec.md Section 4.4).
    pub local_bgp_id: Option<Ipv4Addr>,
    /// Remote peer address; also the outbound connection target.
    pub peer_addr: IpAddr,
    /// Initial Hold Time offered in the local OPEN; negotiated down to
    /// `min(local, peer)`.
    pub hold_time: Duration,
    /// ConnectRetry timer period.
    pub connect_retry_time: Duration,
    /// Whether to use the optional DelayOpen feature (event 12).
    pub delay_open: bool,
    /// IdleHold timer period, used for automatic-start oscillation
    /// damping (event 13).
    pub idle_hold_time: Duration,
    /// Address families to negotiate and advertise on.
    pub address_families: Vec<(Afi, Safi)>,
}

impl PeerConfig {
    /// A config with RFC 4271 default timer values and IPv4 unicast only.
    #[must_use]
    pub fn new(local_asn: u16, peer_addr: IpAddr) -> Self {
        Self {
            local_asn,
            local_bgp_id: None,
            peer_addr,
            hold_time: Duration::from_secs(180),
            connect_retry_time: Duration::from_secs(30),
            delay_open: false,
            idle_hold_time: Duration::from_secs(30),
            address_families: vec![(Afi::Ipv4, Safi::Unicast)],
        }
    }

    #[must_use]
    pub fn keep_alive_time(&self) -> Duration {
        self.hold_time / 3
    }

    #[must_use]
    pub fn supports(&self, afi: Afi, safi: Safi) -> bool {
        self.address_families.contains(&(afi, safi))
    }
}

/// "Large hold time" used before OPEN negotiation completes (spec.md
/// Section 3).
pub const LARGE_HOLD_TIME: Duration = Duration::from_secs(240);

/// BGP's well-known TCP port.
pub const BGP_PORT: u16 = 179;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_keep_alive_is_hold_over_three() {
        let cfg = PeerConfig::new(64512, "192.0.2.1".parse().unwrap());
        assert_eq!(cfg.keep_alive_time(), Duration::from_secs(60));
    }

    #[test]
    fn default_supports_v4_unicast_only() {
        let cfg = PeerConfig::new(64512, "192.0.2.1".parse().unwrap());
        assert!(cfg.supports(Afi::Ipv4, Safi::Unicast));
        assert!(!cfg.supports(Afi::Ipv6, Safi::Unicast));
    }
}
