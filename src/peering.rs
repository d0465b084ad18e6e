//! Peering manager: collision detection between candidate connections,
//! and turning a RIB diff into a sequence of packed UPDATE messages.
//!
//! The original implementation's `Peering` owns up to two candidate
//! connections (`estabProtocol` plus whichever of `inConnections`/
//! `outConnections` is still racing to come up), resolves a collision
//! between them with `collisionDetect`, and on every routing change
//! computes `_calculateChanges` then drains it through `_sendUpdates`/
//! `_sendInetUnicastUpdates`/`_sendMPUpdates`. This module keeps that
//! split: collision resolution and the RIB diff are pure functions
//! (independently testable, spec.md Section 9's "no timer/socket
//! reachable from pure logic"), and `send_updates` is the only piece
//! that touches the wire, built on `update_builder::UpdateMessage`.

// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::attrs::FrozenAttributeDict;
use crate::connection::Connection;
use crate::update_builder::{Overflow, UpdateMessage};
use crate::wire::path::PathAttributes;
use crate::wire::route::Value as RouteValue;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// A route key within one (AFI, SAFI) RIB: the NLRI prefix alone, since
/// attributes live in the `Rib` value.
pub type RouteKey = RouteValue;

/// The set of routes most recently advertised to (or received from) one
/// peer, for a single address family.
pub type Rib = HashMap<RouteKey, FrozenAttributeDict>;

/// Which of two colliding connections for the same peer should be kept
/// (RFC 4271 Section 6.8).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CollisionOutcome {
    KeepThis,
    KeepOther,
    /// Both sides reported the same BGP Identifier: this is a
    /// misconfiguration, not a resolvable collision.
    ConfigurationError,
}

/// Resolve a collision between two OPENs received for the same peer.
///
/// Grounded in `bgp.py`'s `collisionDetect`: a connection already in
/// Established always wins outright, since tearing down an established
/// session to let a younger one take over would be destructive; between
/// two connections neither of which is Established yet, the one
/// initiated by the BGP speaker with the numerically higher BGP
/// Identifier survives and the other is dumped with Cease. Equal
/// identifiers can never be legitimately resolved this way.
#[must_use]
pub fn resolve_collision(
    this_established: bool,
    this_bgp_id: Ipv4Addr,
    other_established: bool,
    other_bgp_id: Ipv4Addr,
) -> CollisionOutcome {
    if this_established && other_established {
        return CollisionOutcome::ConfigurationError;
    }
    if this_established {
        return CollisionOutcome::KeepThis;
    }
    if other_established {
        return CollisionOutcome::KeepOther;
    }
    match this_bgp_id.cmp(&other_bgp_id) {
        Ordering::Greater => CollisionOutcome::KeepThis,
        Ordering::Less => CollisionOutcome::KeepOther,
        Ordering::Equal => CollisionOutcome::ConfigurationError,
    }
}

/// Result of diffing one peer's old and new advertised RIB: prefixes to
/// withdraw, plus prefixes to (re)advertise grouped by the exact
/// attribute set they share (so each group packs into UPDATEs that all
/// carry one attribute block, per RFC 4271 Section 4.3).
#[derive(Debug, Default)]
pub struct Changes {
    pub withdrawals: Vec<RouteKey>,
    pub advertisements: Vec<(PathAttributes, Vec<RouteKey>)>,
}

/// Diff `old` against `new`. A prefix present in `old` but absent from
/// `new` is withdrawn; a prefix that is new, or whose attributes
/// changed, is (re)advertised. Unchanged prefixes generate nothing,
/// mirroring `_calculateChanges`'s use of `FrozenAttributeDict` equality
/// to skip no-op updates.
#[must_use]
pub fn calculate_changes(old: &Rib, new: &Rib) -> Changes {
    let mut withdrawals = Vec::new();
    for key in old.keys() {
        if !new.contains_key(key) {
            withdrawals.push(key.clone());
        }
    }

    let mut advertisements: Vec<(PathAttributes, Vec<RouteKey>)> = Vec::new();
    for (key, attrs) in new {
        if old.get(key) == Some(attrs) {
            continue;
        }
        let path_attrs = attrs.get().clone().into_path_attributes();
        if let Some((_, keys)) = advertisements
            .iter_mut()
            .find(|(existing, _)| *existing == path_attrs)
        {
            keys.push(key.clone());
        } else {
            advertisements.push((path_attrs, vec![key.clone()]));
        }
    }

    Changes {
        withdrawals,
        advertisements,
    }
}

/// Error returned by [`send_updates`] when a run of UPDATE messages for
/// `changes` could not be sent in full.
#[derive(Debug, thiserror::Error)]
pub enum SendUpdatesError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A single advertisement group's attribute set does not fit in a
    /// fresh, otherwise-empty UPDATE message. None of its routes were
    /// advertised.
    #[error("{routes} route(s) dropped: {source}")]
    AttributesDoNotFit { source: Overflow, routes: usize },
}

/// Pack `changes` into as few UPDATE messages as
/// [`UpdateMessage`](crate::update_builder::UpdateMessage) allows and
/// send each one, in the order the original's packing loop uses:
/// withdrawals first (they need no attributes and so are cheapest to
/// flush), then one run of messages per distinct attribute group.
///
/// # Errors
///
/// Returns the first I/O error hit while writing to `conn`, or
/// [`SendUpdatesError::AttributesDoNotFit`] if an advertisement group's
/// attribute set can never fit in an UPDATE message on its own.
pub async fn send_updates(conn: &mut Connection, changes: Changes) -> Result<(), SendUpdatesError> {
    let mut withdrawals = changes.withdrawals;
    while !withdrawals.is_empty() {
        let mut msg = UpdateMessage::new();
        let packed = msg.add_some_withdrawals(&mut withdrawals);
        if packed == 0 {
            break;
        }
        conn.send_update(msg.into_message()).await?;
    }

    for (attrs, mut routes) in changes.advertisements {
        while !routes.is_empty() {
            let mut msg = UpdateMessage::new();
            if let Err(source) = msg.add_attributes(attrs.clone()) {
                // The budget a fresh message offers never changes, so this
                // group can never be packed; report it instead of silently
                // dropping the remaining routes.
                return Err(SendUpdatesError::AttributesDoNotFit {
                    source,
                    routes: routes.len(),
                });
            }
            let packed = msg.add_some_nlri(&mut routes);
            if packed == 0 {
                break;
            }
            conn.send_update(msg.into_message()).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::cidr::Cidr4;
    use crate::wire::path::{Data, Flags, Origin, Value};
    use std::net::Ipv4Addr as V4;

    fn route(last_octet: u8) -> RouteKey {
        RouteKey::from(Cidr4 {
            addr: V4::new(10, 0, 0, last_octet),
            prefix_len: 32,
        })
    }

    fn frozen_origin() -> FrozenAttributeDict {
        crate::attrs::AttributeDict::from_path_attributes(
            PathAttributes(vec![Value {
                flags: Flags::WELL_KNOWN_COMPLETE,
                data: Data::Origin(Origin::Igp),
            }]),
            false,
            false,
        )
        .unwrap()
        .freeze()
    }

    #[test]
    fn established_connection_always_wins_collision() {
        let outcome = resolve_collision(true, V4::new(1, 1, 1, 1), false, V4::new(9, 9, 9, 9));
        assert_eq!(outcome, CollisionOutcome::KeepThis);
        let outcome = resolve_collision(false, V4::new(9, 9, 9, 9), true, V4::new(1, 1, 1, 1));
        assert_eq!(outcome, CollisionOutcome::KeepOther);
    }

    #[test]
    fn higher_bgp_id_wins_when_neither_established() {
        let outcome = resolve_collision(false, V4::new(10, 0, 0, 2), false, V4::new(10, 0, 0, 1));
        assert_eq!(outcome, CollisionOutcome::KeepThis);
        let outcome = resolve_collision(false, V4::new(10, 0, 0, 1), false, V4::new(10, 0, 0, 2));
        assert_eq!(outcome, CollisionOutcome::KeepOther);
    }

    #[test]
    fn equal_bgp_ids_are_a_configuration_error() {
        let outcome = resolve_collision(false, V4::new(10, 0, 0, 1), false, V4::new(10, 0, 0, 1));
        assert_eq!(outcome, CollisionOutcome::ConfigurationError);
    }

    #[test]
    fn new_route_is_advertised_and_removed_route_is_withdrawn() {
        let mut old = Rib::new();
        old.insert(route(1), frozen_origin());
        let mut new = Rib::new();
        new.insert(route(2), frozen_origin());

        let changes = calculate_changes(&old, &new);
        assert_eq!(changes.withdrawals, vec![route(1)]);
        assert_eq!(changes.advertisements.len(), 1);
        assert_eq!(changes.advertisements[0].1, vec![route(2)]);
    }

    #[test]
    fn unchanged_route_generates_no_changes() {
        let mut rib = Rib::new();
        rib.insert(route(1), frozen_origin());
        let changes = calculate_changes(&rib, &rib);
        assert!(changes.withdrawals.is_empty());
        assert!(changes.advertisements.is_empty());
    }

    #[test]
    fn routes_sharing_attributes_are_grouped_together() {
        let mut new = Rib::new();
        new.insert(route(1), frozen_origin());
        new.insert(route(2), frozen_origin());
        let changes = calculate_changes(&Rib::new(), &new);
        assert_eq!(changes.advertisements.len(), 1);
        assert_eq!(changes.advertisements[0].1.len(), 2);
    }

    #[tokio::test]
    async fn send_updates_reports_an_attribute_set_that_can_never_fit() {
        use crate::config::PeerConfig;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move { tokio::net::TcpStream::connect(addr).await.unwrap() });
        let (_server_sock, _) = listener.accept().await.unwrap();
        let client_sock = client.await.unwrap();
        let config = PeerConfig::new(64512, client_sock.peer_addr().unwrap().ip());
        let mut conn = Connection::new(client_sock, &config).unwrap();

        let huge_attrs = PathAttributes(vec![Value {
            flags: Flags::OPTIONAL_TRANSITIVE_EXTENDED,
            data: Data::Unsupported(200, bytes::Bytes::from(vec![0u8; crate::update_builder::MAX_MESSAGE_SIZE])),
        }]);
        let changes = Changes {
            withdrawals: Vec::new(),
            advertisements: vec![(huge_attrs, vec![route(1)])],
        };

        let err = send_updates(&mut conn, changes).await.unwrap_err();
        assert!(matches!(err, SendUpdatesError::AttributesDoNotFit { routes: 1, .. }));
    }
}
