//! Incremental UPDATE message packer.
//!
//! RFC 4271 bounds a message to 4096 bytes; a peering advertising more
//! prefixes than fit in one UPDATE has to split them across several. The
//! peering manager's packing loop (spec.md Section 4.5 and `bgp.py`'s
//! `_sendInetUnicastUpdates`/`_sendMPUpdates`) needs an incremental
//! builder: try to add withdrawals, then try to add attributes plus
//! NLRI to the *same* packet, and flush (or clear attributes) depending
//! on what fit. `UpdateMessage` exposes that as a small stateful buffer
//! over `wire::route::Routes`' existing size-bounded splitting
//! algorithm.

// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::wire::endec::Component;
use crate::wire::path::PathAttributes;
use crate::wire::route::{Routes, Value as RouteValue};
use crate::wire::{Message, Update};

/// Maximum total BGP message size (RFC 4271 Section 4.1).
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Fixed overhead of an UPDATE: 19-byte header, 2-byte withdrawn-routes
/// length, 2-byte total-path-attribute length.
const UPDATE_FIXED_OVERHEAD: usize = 19 + 2 + 2;

/// An UPDATE under construction, capped at [`MAX_MESSAGE_SIZE`] bytes.
///
/// Built by repeatedly calling `addSome*`/`addAttributes`/
/// `clearAttributes`; at every point `encoded_len()` is an accurate
/// prediction of what `clone().into_message().to_bytes()` would produce.
#[derive(Clone, Debug, Default)]
pub struct UpdateMessage {
    withdrawn_routes: Vec<RouteValue>,
    path_attributes: Vec<crate::wire::path::Value>,
    nlri: Vec<RouteValue>,
}

/// Returned by [`UpdateMessage::add_attributes`] when the attribute set,
/// as a whole, cannot fit in the remaining budget of an otherwise-empty
/// message. The peering manager treats this as a fatal pack error (spec.md
/// Section 4.5, Section 7).
#[derive(Debug, thiserror::Error)]
#[error("attribute set of {attrs_len} bytes does not fit the {budget} bytes remaining")]
pub struct Overflow {
    pub attrs_len: usize,
    pub budget: usize,
}

impl UpdateMessage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn fixed_len(&self) -> usize {
        UPDATE_FIXED_OVERHEAD
    }

    fn withdrawn_len(&self) -> usize {
        self.withdrawn_routes.iter().map(|r| 1 + r.prefix.len()).sum()
    }

    fn attrs_len(&self) -> usize {
        self.path_attributes.iter().map(Component::encoded_len).sum()
    }

    fn nlri_len(&self) -> usize {
        self.nlri.iter().map(|r| 1 + r.prefix.len()).sum()
    }

    /// Total encoded size of the message as it stands.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.fixed_len() + self.withdrawn_len() + self.attrs_len() + self.nlri_len()
    }

    fn remaining_budget(&self) -> usize {
        MAX_MESSAGE_SIZE.saturating_sub(self.encoded_len())
    }

    /// Pack as many prefixes from the front of `prefixes` as fit into the
    /// withdrawn-routes block, removing them from `prefixes`. Returns the
    /// number packed.
    pub fn add_some_withdrawals(&mut self, prefixes: &mut Vec<RouteValue>) -> usize {
        self.add_some(prefixes, true)
    }

    /// Symmetric to [`Self::add_some_withdrawals`], for the NLRI block.
    pub fn add_some_nlri(&mut self, prefixes: &mut Vec<RouteValue>) -> usize {
        self.add_some(prefixes, false)
    }

    fn add_some(&mut self, prefixes: &mut Vec<RouteValue>, withdrawn: bool) -> usize {
        let already = if withdrawn {
            self.withdrawn_len()
        } else {
            self.nlri_len()
        };
        let budget = MAX_MESSAGE_SIZE
            .saturating_sub(self.fixed_len() + self.attrs_len())
            .saturating_sub(if withdrawn {
                self.nlri_len()
            } else {
                self.withdrawn_len()
            })
            .saturating_sub(already);
        let routes = Routes(prefixes.clone());
        let split_points = routes.split_routes_to_allowed_size_each(budget);
        let n = split_points.first().copied().unwrap_or(0);
        let packed: Vec<RouteValue> = prefixes.drain(..n).collect();
        if withdrawn {
            self.withdrawn_routes.extend(packed);
        } else {
            self.nlri.extend(packed);
        }
        n
    }

    /// Append a whole attribute set. Fails without modifying the message
    /// if the attributes do not fit in the space left after withdrawn
    /// routes and NLRI already packed.
    pub fn add_attributes(&mut self, attrs: PathAttributes) -> Result<(), Overflow> {
        let attrs_len = attrs.encoded_len();
        let budget = self.remaining_budget();
        if attrs_len > budget {
            return Err(Overflow { attrs_len, budget });
        }
        self.path_attributes.extend(attrs.0);
        Ok(())
    }

    /// Whether `attrs` would fit without actually appending it.
    #[must_use]
    pub fn attributes_fit(&self, attrs: &PathAttributes) -> bool {
        attrs.encoded_len() <= self.remaining_budget()
    }

    /// Truncate the attribute block back to empty.
    pub fn clear_attributes(&mut self) {
        self.path_attributes.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.withdrawn_routes.is_empty() && self.path_attributes.is_empty() && self.nlri.is_empty()
    }

    /// Consume the builder into a finished `Update` message, ready to be
    /// handed to [`crate::wire::endec`]/the codec for encoding.
    #[must_use]
    pub fn into_message(self) -> Message {
        Message::Update(Update {
            withdrawn_routes: Routes(self.withdrawn_routes),
            path_attributes: PathAttributes(self.path_attributes),
            nlri: Routes(self.nlri),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::cidr::Cidr4;
    use crate::wire::endec::Component;
    use crate::wire::path::{Flags, Origin};
    use std::net::Ipv4Addr;

    fn prefixes(n: usize) -> Vec<RouteValue> {
        (0..n)
            .map(|i| {
                #[allow(clippy::cast_possible_truncation)]
                RouteValue::from(Cidr4 {
                    addr: Ipv4Addr::new(10, 0, (i / 256) as u8, (i % 256) as u8),
                    prefix_len: 32,
                })
            })
            .collect()
    }

    fn sample_attrs() -> PathAttributes {
        PathAttributes(vec![
            crate::wire::path::Value {
                flags: Flags::WELL_KNOWN_COMPLETE,
                data: crate::wire::path::Data::Origin(Origin::Igp),
            },
            crate::wire::path::Value {
                flags: Flags::WELL_KNOWN_COMPLETE,
                data: crate::wire::path::Data::NextHop(Ipv4Addr::new(10, 0, 0, 1)),
            },
        ])
    }

    #[test]
    fn add_some_nlri_packs_all_when_small() {
        let mut msg = UpdateMessage::new();
        let mut todo = prefixes(5);
        let n = msg.add_some_nlri(&mut todo);
        assert_eq!(n, 5);
        assert!(todo.is_empty());
        assert!(msg.encoded_len() <= MAX_MESSAGE_SIZE);
    }

    #[test]
    fn add_some_nlri_splits_large_set_across_calls() {
        let mut todo = prefixes(2000);
        let total = todo.len();
        let mut packed = 0;
        let mut messages = Vec::new();
        while !todo.is_empty() {
            let mut msg = UpdateMessage::new();
            msg.add_attributes(sample_attrs()).unwrap();
            let n = msg.add_some_nlri(&mut todo);
            assert!(n > 0, "packer made no progress");
            assert!(msg.encoded_len() <= MAX_MESSAGE_SIZE);
            packed += n;
            messages.push(msg);
        }
        assert_eq!(packed, total);
        assert!(messages.len() > 1);
    }

    #[test]
    fn add_attributes_overflow_leaves_message_unmodified() {
        let mut msg = UpdateMessage::new();
        let huge = PathAttributes(vec![crate::wire::path::Value {
            flags: Flags::OPTIONAL_TRANSITIVE_EXTENDED,
            data: crate::wire::path::Data::Unsupported(
                200,
                bytes::Bytes::from(vec![0u8; MAX_MESSAGE_SIZE]),
            ),
        }]);
        let err = msg.add_attributes(huge).unwrap_err();
        assert!(err.attrs_len > err.budget);
        assert!(msg.is_empty());
    }

    #[test]
    fn clear_attributes_empties_block_only() {
        let mut msg = UpdateMessage::new();
        msg.add_attributes(sample_attrs()).unwrap();
        let mut todo = prefixes(3);
        msg.add_some_nlri(&mut todo);
        msg.clear_attributes();
        assert_eq!(msg.attrs_len(), 0);
        assert_eq!(msg.nlri.len(), 3);
    }

    #[test]
    fn round_trips_through_the_wire_codec() {
        let mut msg = UpdateMessage::new();
        msg.add_attributes(sample_attrs()).unwrap();
        let mut todo = prefixes(4);
        msg.add_some_nlri(&mut todo);
        let message = msg.into_message();
        let Message::Update(update) = message.clone() else {
            panic!("expected an Update message")
        };
        let mut buf = bytes::BytesMut::new();
        update.to_bytes(&mut buf);
        let mut frozen = buf.freeze();
        let decoded = Update::from_bytes(&mut frozen).unwrap();
        assert_eq!(decoded.nlri.len(), 4);
        assert_eq!(decoded.path_attributes.len(), 2);
    }
}
