//! Local error taxonomy, mirroring the on-wire NOTIFICATION space (RFC 4271
//! Section 6) plus the handful of purely-local conditions the speaker needs
//! to distinguish (spec.md Section 7).

// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::wire::{MessageHeaderErrorSubcode, NotificationErrorCode, OpenMessageErrorSubcode};
use bytes::Bytes;

/// A NOTIFICATION that the speaker should send on the wire before closing
/// the connection, together with the local condition that produced it.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {code:?}/{subcode}")]
pub struct NotificationError {
    pub kind: ErrorKind,
    pub code: NotificationErrorCode,
    pub subcode: u8,
    pub data: Bytes,
}

impl NotificationError {
    #[must_use]
    pub fn new(kind: ErrorKind, code: NotificationErrorCode, subcode: u8, data: Bytes) -> Self {
        Self {
            kind,
            code,
            subcode,
            data,
        }
    }

    #[must_use]
    pub fn cease() -> Self {
        Self::new(ErrorKind::Cease, NotificationErrorCode::Cease, 0, Bytes::new())
    }

    #[must_use]
    pub fn hold_timer_expired() -> Self {
        Self::new(
            ErrorKind::HoldTimerExpired,
            NotificationErrorCode::HoldTimerExpired,
            0,
            Bytes::new(),
        )
    }

    #[must_use]
    pub fn fsm() -> Self {
        Self::new(
            ErrorKind::Fsm,
            NotificationErrorCode::FiniteStateMachineError,
            0,
            Bytes::new(),
        )
    }

    #[must_use]
    pub fn header(subcode: MessageHeaderErrorSubcode, data: Bytes) -> Self {
        Self::new(
            ErrorKind::Header(subcode),
            NotificationErrorCode::MessageHeaderError,
            subcode as u8,
            data,
        )
    }

    #[must_use]
    pub fn open(subcode: OpenMessageErrorSubcode, data: Bytes) -> Self {
        Self::new(
            ErrorKind::Open(subcode),
            NotificationErrorCode::OpenMessageError,
            subcode as u8,
            data,
        )
    }

    #[must_use]
    pub fn update(subcode: UpdateErrorKind, data: Bytes) -> Self {
        Self::new(
            ErrorKind::Update(subcode),
            NotificationErrorCode::UpdateMessageError,
            subcode as u8,
            data,
        )
    }
}

/// Local classification of a NOTIFICATION, used by callers that need to
/// branch on *why* a session closed without re-parsing the wire subcode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Header(MessageHeaderErrorSubcode),
    Open(OpenMessageErrorSubcode),
    Update(UpdateErrorKind),
    HoldTimerExpired,
    Fsm,
    Cease,
}

/// UPDATE message error subcodes (RFC 4271 Section 6.3), spec.md Section 7.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum UpdateErrorKind {
    MalformedAttributeList = 1,
    UnrecognizedWellKnown = 2,
    MissingWellKnown = 3,
    AttributeFlags = 4,
    AttributeLength = 5,
    InvalidOrigin = 6,
    InvalidNextHop = 8,
    OptionalAttribute = 9,
    InvalidNetworkField = 10,
    MalformedAsPath = 11,
}
