//! Attribute dictionary over a decoded UPDATE's path attributes.
//!
//! `wire::path::PathAttributes` is just a `Vec` in arrival order; it does
//! not enforce the invariants RFC 4271 attaches to the attribute set as a
//! whole (no duplicates, required well-knowns present when NLRI is
//! carried, flag bits pinned per attribute class). The original
//! implementation keeps those invariants in `AttributeDict`/
//! `FrozenAttributeDict`, a dict keyed by attribute class with a
//! `checkMissing` validation pass; this module is the Rust equivalent,
//! keyed by `wire::path::Type` instead of by class.

// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::error::{NotificationError, UpdateErrorKind};
use crate::wire::path::{Data, Flags, PathAttributes, Type, Value};
use bytes::Bytes;

/// Required flag bits for a known attribute type (RFC 4271 Section 5, RFC
/// 4760 Section 3). `mask` selects which bits are pinned; `bits` is their
/// required value. Partial (0x20) is never pinned: transitive optional
/// attributes may legitimately pick up the partial bit as they cross an AS
/// that does not recognize them.
fn required_flags(type_: Type) -> (u8, u8) {
    const OPTIONAL: u8 = 0x80;
    const TRANSITIVE: u8 = 0x40;
    match type_ {
        Type::Origin | Type::AsPath | Type::NextHop => (OPTIONAL | TRANSITIVE, TRANSITIVE),
        Type::LocalPref | Type::MultiExitDisc | Type::MpReachNlri | Type::MpUnreachNlri => {
            (OPTIONAL | TRANSITIVE, OPTIONAL)
        }
        Type::AtomicAggregate => (OPTIONAL, 0),
        Type::Aggregator | Type::Community => (OPTIONAL | TRANSITIVE, OPTIONAL | TRANSITIVE),
    }
}

fn check_flags(type_: Type, flags: Flags) -> Result<(), NotificationError> {
    let (mask, want) = required_flags(type_);
    if flags.0 & mask != want {
        return Err(NotificationError::update(
            UpdateErrorKind::AttributeFlags,
            Bytes::new(),
        ));
    }
    Ok(())
}

/// Slots for the well-known/commonly-used attributes, indexed directly;
/// anything else (unrecognized optional-transitive attributes that must be
/// preserved and re-advertised with the partial bit set, per RFC 4271
/// Section 5) lives in `unknown`.
#[derive(Clone, Debug, Default)]
pub struct AttributeDict {
    slots: [Option<Value>; NUM_SLOTS],
    unknown: Vec<Value>,
}

const NUM_SLOTS: usize = 10;

fn slot_index(type_: Type) -> Option<usize> {
    Some(match type_ {
        Type::Origin => 0,
        Type::AsPath => 1,
        Type::NextHop => 2,
        Type::MultiExitDisc => 3,
        Type::LocalPref => 4,
        Type::AtomicAggregate => 5,
        Type::Aggregator => 6,
        Type::MpReachNlri => 7,
        Type::MpUnreachNlri => 8,
        Type::Community => 9,
    })
}

impl AttributeDict {
    /// Build a dictionary from a decoded attribute list, rejecting
    /// duplicates and invalid flag bits. `check_missing` additionally
    /// requires Origin, AS-Path and Next-Hop (or, for an MP-BGP-only
    /// update carrying no IPv4 unicast NLRI, just Origin and AS-Path) to be
    /// present, mirroring `AttributeDict.__init__(checkMissing=True)` in
    /// the original implementation, used when the UPDATE carries NLRI of
    /// its own (RFC 4271 Section 5).
    pub fn from_path_attributes(
        attrs: PathAttributes,
        check_missing: bool,
        has_v4_nlri: bool,
    ) -> Result<Self, NotificationError> {
        let mut dict = Self::default();
        for value in attrs.0 {
            let type_byte = u8::from(&value.data);
            match Type::try_from(type_byte) {
                Ok(type_) => {
                    check_flags(type_, value.flags)?;
                    let idx = slot_index(type_).expect("every Type has a slot");
                    if dict.slots[idx].is_some() {
                        return Err(NotificationError::update(
                            UpdateErrorKind::MalformedAttributeList,
                            Bytes::new(),
                        ));
                    }
                    dict.slots[idx] = Some(value);
                }
                Err(_) => {
                    if !value.flags.is_optional() {
                        return Err(NotificationError::update(
                            UpdateErrorKind::UnrecognizedWellKnown,
                            Bytes::new(),
                        ));
                    }
                    // Unrecognized optional non-transitive attributes are
                    // silently discarded (RFC 4271 Section 5); only
                    // optional-transitive ones are preserved, with Partial
                    // forced to 1 as they are re-advertised.
                    if value.flags.is_transitive() {
                        let mut value = value;
                        value.flags.0 |= 0x20;
                        dict.unknown.push(value);
                    }
                }
            }
        }
        if check_missing {
            if dict.origin().is_none() || dict.as_path().is_none() {
                return Err(NotificationError::update(
                    UpdateErrorKind::MissingWellKnown,
                    Bytes::new(),
                ));
            }
            if has_v4_nlri && dict.next_hop().is_none() {
                return Err(NotificationError::update(
                    UpdateErrorKind::MissingWellKnown,
                    Bytes::new(),
                ));
            }
        }
        Ok(dict)
    }

    #[must_use]
    pub fn origin(&self) -> Option<&Value> {
        self.slots[0].as_ref()
    }

    #[must_use]
    pub fn as_path(&self) -> Option<&Value> {
        self.slots[1].as_ref()
    }

    #[must_use]
    pub fn next_hop(&self) -> Option<&Value> {
        self.slots[2].as_ref()
    }

    #[must_use]
    pub fn get(&self, type_: Type) -> Option<&Value> {
        slot_index(type_).and_then(|idx| self.slots[idx].as_ref())
    }

    /// Flatten back into wire order: known attributes first (type-code
    /// order), then the preserved-but-unrecognized ones.
    #[must_use]
    pub fn into_path_attributes(self) -> PathAttributes {
        let mut out: Vec<Value> = self.slots.into_iter().flatten().collect();
        out.extend(self.unknown);
        PathAttributes(out)
    }

    /// Freeze into an immutable, shareable snapshot (the dictionary is
    /// cloned into a `FrozenAttributeDict` once a route has been selected
    /// for advertisement, the way the original implementation freezes a
    /// dict before handing it to consumers).
    #[must_use]
    pub fn freeze(self) -> FrozenAttributeDict {
        FrozenAttributeDict(self)
    }
}

/// An `AttributeDict` that is advertised to consumers and never mutated
/// again; equality compares the wire-relevant attribute set, used to
/// detect whether a route's attributes actually changed between RIB
/// updates.
#[derive(Clone, Debug)]
pub struct FrozenAttributeDict(AttributeDict);

impl FrozenAttributeDict {
    #[must_use]
    pub fn get(&self) -> &AttributeDict {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> AttributeDict {
        self.0
    }
}

impl PartialEq for FrozenAttributeDict {
    fn eq(&self, other: &Self) -> bool {
        fn key(v: &Value) -> &Data {
            &v.data
        }
        self.0.slots.iter().map(|s| s.as_ref().map(key)).eq(other.0.slots.iter().map(|s| s.as_ref().map(key)))
            && self.0.unknown.iter().map(key).eq(other.0.unknown.iter().map(key))
    }
}
