//! The BGP session finite-state machine (RFC 4271 Section 8).
//!
//! The original implementation ties the FSM, the connection, and the
//! peering together with mutable back-references and hands the FSM
//! instance from peering to connection on promotion (spec.md Section 9,
//! "Cyclic ownership"). Here the FSM is the pure function the redesign
//! note asks for: `(state, event) -> (state', actions)`. `Fsm` holds only
//! the state and the negotiated parameters needed to decide future
//! transitions; it owns no socket and no timer. The actions it emits
//! (`Action`) are interpreted by the connection/peering layer, which owns
//! the actual timers and the transport.

// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::error::NotificationError;
use crate::wire::{Notification, NotificationErrorCode, Open};
use std::time::Duration;

/// The six canonical BGP states (RFC 4271 Section 8.2.1).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Connect,
    Active,
    OpenSent,
    OpenConfirm,
    Established,
}

/// Named timers the FSM can ask to be started or cancelled. The FSM
/// itself never touches a clock; `timer::Timer` instances live in the
/// connection/peering layer, one per name, started/cancelled on request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimerName {
    ConnectRetry,
    Hold,
    KeepAlive,
    DelayOpen,
    IdleHold,
}

/// Events driving the FSM, numbered to match RFC 4271 Section 8.1 where
/// the RFC assigns a number (spec.md Section 4.3).
#[derive(Clone, Debug)]
pub enum Event {
    /// 1
    ManualStart,
    /// 2
    ManualStop,
    /// 3
    AutomaticStart { idle_hold: bool },
    /// 9
    ConnectRetryTimerExpires,
    /// 10
    HoldTimerExpires,
    /// 11
    KeepAliveTimerExpires,
    /// 12
    DelayOpenTimerExpires,
    /// 13
    IdleHoldTimerExpires,
    /// 16/17
    TcpConnectionConfirmed,
    /// 18
    TcpConnectionFails,
    /// 19/20
    OpenReceived(Open),
    /// 21
    HeaderError(NotificationError),
    /// 22
    OpenMessageError(NotificationError),
    /// 23
    CollisionDump,
    /// 24/25
    NotificationReceived(Notification),
    /// 26
    KeepAliveReceived,
    /// 27
    UpdateReceived,
    /// 28
    UpdateMalformed(NotificationError),
}

/// Side effects the interpreter (connection/peering layer) must perform
/// in response to a transition.
#[derive(Clone, Debug)]
pub enum Action {
    SendOpen,
    SendKeepAlive,
    SendNotification(NotificationError),
    StartTimer(TimerName, Duration),
    CancelTimer(TimerName),
    /// Close the transport, independent of any NOTIFICATION already
    /// queued by a `SendNotification` action in the same batch.
    CloseConnection,
    /// Request a fresh outbound TCP connection.
    OpenTcpConnection,
    RequestAutomaticStart { idle_hold: bool },
    /// Resolves the one-shot "session established" future exactly once.
    SessionEstablished,
    /// Hand the OPEN/KEEPALIVE collision event up for arbitration; the
    /// FSM cannot resolve it alone since that requires comparing against
    /// sibling candidate connections.
    RunCollisionDetection,
    /// A valid UPDATE reached Established; hand its bytes to the peering
    /// manager (the FSM itself does not parse UPDATE bodies).
    DeliverUpdate,
    IncrementConnectRetryCounter,
}

/// An FSM instance: just the state plus the negotiated parameters needed
/// to arm timers correctly. One instance is "handed over" to whichever
/// candidate connection wins promotion; this type has no identity tied to
/// a connection, so handoff is just moving the value (spec.md Section 9).
#[derive(Clone, Debug)]
pub struct Fsm {
    state: State,
    hold_time: Duration,
    keep_alive_time: Duration,
    connect_retry_time: Duration,
    idle_hold_time: Duration,
    delay_open_enabled: bool,
    delay_open_time: Duration,
}

/// RFC 4271 Section 9.2.1.3's "large hold time" used before negotiation.
pub const LARGE_HOLD_TIME: Duration = Duration::from_secs(240);

impl Fsm {
    #[must_use]
    pub fn new(
        hold_time: Duration,
        connect_retry_time: Duration,
        idle_hold_time: Duration,
        delay_open_enabled: bool,
    ) -> Self {
        Self {
            state: State::Idle,
            hold_time,
            keep_alive_time: hold_time / 3,
            connect_retry_time,
            idle_hold_time,
            delay_open_enabled,
            delay_open_time: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub fn hold_time(&self) -> Duration {
        self.hold_time
    }

    /// "Error close": cancel all timers, close the transport, bump the
    /// retry counter, go to Idle (spec.md Section 4.3).
    fn error_close(&mut self, notification: Option<NotificationError>) -> Vec<Action> {
        self.state = State::Idle;
        let mut actions = vec![
            Action::CancelTimer(TimerName::ConnectRetry),
            Action::CancelTimer(TimerName::Hold),
            Action::CancelTimer(TimerName::KeepAlive),
            Action::CancelTimer(TimerName::DelayOpen),
            Action::CancelTimer(TimerName::IdleHold),
        ];
        if let Some(n) = notification {
            actions.push(Action::SendNotification(n));
        }
        actions.push(Action::CloseConnection);
        actions.push(Action::IncrementConnectRetryCounter);
        actions
    }

    fn fsm_error(&mut self) -> Vec<Action> {
        self.error_close(Some(NotificationError::fsm()))
    }

    /// Apply one event, returning the ordered actions the caller must
    /// execute. Every `(state, event)` pair either transitions (possibly
    /// to the same state) or is treated as an FSM error per spec.md
    /// Section 8 ("no event is silently ignored outside documented
    /// no-ops").
    #[allow(clippy::too_many_lines)]
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        use State::{Active, Connect, Established, Idle, OpenConfirm, OpenSent};

        match (self.state, event) {
            (Idle, Event::ManualStart) => {
                self.state = Connect;
                vec![
                    Action::StartTimer(TimerName::ConnectRetry, self.connect_retry_time),
                    Action::OpenTcpConnection,
                ]
            }
            (Idle, Event::AutomaticStart { idle_hold: true }) => {
                vec![Action::StartTimer(TimerName::IdleHold, self.idle_hold_time)]
            }
            (Idle, Event::AutomaticStart { idle_hold: false }) => {
                self.state = Connect;
                vec![
                    Action::StartTimer(TimerName::ConnectRetry, self.connect_retry_time),
                    Action::OpenTcpConnection,
                ]
            }
            (Idle, Event::IdleHoldTimerExpires) => {
                vec![Action::RequestAutomaticStart { idle_hold: false }]
            }

            (_, Event::ManualStop) => self.manual_stop(),

            (Connect | Active, Event::ConnectRetryTimerExpires) => {
                self.state = Connect;
                vec![
                    Action::CloseConnection,
                    Action::StartTimer(TimerName::ConnectRetry, self.connect_retry_time),
                    Action::OpenTcpConnection,
                ]
            }
            (OpenSent | OpenConfirm | Established, Event::ConnectRetryTimerExpires) => {
                self.fsm_error()
            }

            (OpenSent | OpenConfirm | Established, Event::HoldTimerExpires) => {
                self.error_close(Some(NotificationError::hold_timer_expired()))
            }

            (OpenConfirm | Established, Event::KeepAliveTimerExpires) => {
                if self.hold_time.is_zero() {
                    vec![]
                } else {
                    vec![
                        Action::SendKeepAlive,
                        Action::StartTimer(TimerName::KeepAlive, self.keep_alive_time),
                    ]
                }
            }

            (Connect | Active, Event::DelayOpenTimerExpires) => {
                self.state = OpenSent;
                vec![
                    Action::SendOpen,
                    Action::StartTimer(TimerName::Hold, LARGE_HOLD_TIME),
                ]
            }

            (Connect | Active, Event::TcpConnectionConfirmed) => {
                if self.delay_open_enabled {
                    vec![Action::StartTimer(
                        TimerName::DelayOpen,
                        self.delay_open_time,
                    )]
                } else {
                    self.state = OpenSent;
                    vec![
                        Action::CancelTimer(TimerName::ConnectRetry),
                        Action::SendOpen,
                        Action::StartTimer(TimerName::Hold, LARGE_HOLD_TIME),
                    ]
                }
            }

            (Connect, Event::TcpConnectionFails) => {
                self.state = Idle;
                vec![Action::CancelTimer(TimerName::ConnectRetry)]
            }
            (Active, Event::TcpConnectionFails) => {
                self.state = Idle;
                vec![
                    Action::CancelTimer(TimerName::ConnectRetry),
                    Action::IncrementConnectRetryCounter,
                ]
            }
            (OpenSent, Event::TcpConnectionFails) => {
                self.state = Active;
                vec![Action::StartTimer(
                    TimerName::ConnectRetry,
                    self.connect_retry_time,
                )]
            }
            (OpenConfirm | Established, Event::TcpConnectionFails) => self.fsm_error(),

            (Connect | Active, Event::OpenReceived(open)) => self.open_received(open),
            (OpenSent, Event::OpenReceived(open)) => self.open_received(open),
            (OpenConfirm, Event::OpenReceived(_)) => {
                vec![Action::RunCollisionDetection]
            }
            (Established, Event::OpenReceived(_)) => self.fsm_error(),

            (_, Event::HeaderError(n)) => self.error_close(Some(n)),
            (_, Event::OpenMessageError(n)) => self.error_close(Some(n)),

            (_, Event::CollisionDump) => self.error_close(Some(NotificationError::cease())),

            (OpenSent | OpenConfirm, Event::NotificationReceived(n))
                if n.error_code == NotificationErrorCode::OpenMessageError
                    && n.error_subcode
                        == crate::wire::OpenMessageErrorSubcode::UnsupportedVersionNumber as u8 =>
            {
                self.state = Idle;
                vec![
                    Action::CancelTimer(TimerName::ConnectRetry),
                    Action::CancelTimer(TimerName::Hold),
                    Action::CancelTimer(TimerName::KeepAlive),
                    Action::CancelTimer(TimerName::DelayOpen),
                    Action::CancelTimer(TimerName::IdleHold),
                    Action::CloseConnection,
                ]
            }
            (Idle, Event::NotificationReceived(_)) => vec![],
            (_, Event::NotificationReceived(_)) => self.error_close(None),

            (OpenConfirm, Event::KeepAliveReceived) => {
                self.state = Established;
                let mut actions = vec![Action::SessionEstablished];
                if !self.hold_time.is_zero() {
                    actions.push(Action::StartTimer(TimerName::Hold, self.hold_time));
                }
                actions
            }
            (Established, Event::KeepAliveReceived) => {
                if self.hold_time.is_zero() {
                    vec![]
                } else {
                    vec![Action::StartTimer(TimerName::Hold, self.hold_time)]
                }
            }
            (Connect | Active, Event::KeepAliveReceived) => self.fsm_error(),

            (Established, Event::UpdateReceived) => {
                let mut actions = vec![Action::DeliverUpdate];
                if !self.hold_time.is_zero() {
                    actions.push(Action::StartTimer(TimerName::Hold, self.hold_time));
                }
                actions
            }
            (Connect | Active, Event::UpdateReceived) => self.fsm_error(),
            (OpenSent | OpenConfirm, Event::UpdateReceived) => self.fsm_error(),

            (Established, Event::UpdateMalformed(n)) => self.error_close(Some(n)),
            (OpenSent | OpenConfirm, Event::UpdateMalformed(_)) => self.fsm_error(),
            (Connect | Active, Event::UpdateMalformed(_)) => self.fsm_error(),

            // Anything else is an event that is illegal in the current
            // state: close with an FSM error rather than silently drop it.
            _ => self.fsm_error(),
        }
    }

    fn manual_stop(&mut self) -> Vec<Action> {
        self.state = State::Idle;
        vec![
            Action::SendNotification(NotificationError::cease()),
            Action::CancelTimer(TimerName::ConnectRetry),
            Action::CancelTimer(TimerName::Hold),
            Action::CancelTimer(TimerName::KeepAlive),
            Action::CancelTimer(TimerName::DelayOpen),
            Action::CancelTimer(TimerName::IdleHold),
            Action::CloseConnection,
        ]
    }

    /// OPEN received while in Connect/Active/OpenSent (events 19/20):
    /// negotiate Hold/KeepAlive, send our own OPEN and a KEEPALIVE, arm
    /// the negotiated timers, and move to OpenConfirm.
    ///
    /// The source this is grounded on (`bgp.py::openReceived`) has two
    /// typos here — `self.KeepAliveTimer` (wrong case) and
    /// `self.holdTimer.reset(self.holdTimer)` (a timer object passed
    /// where a duration in seconds is expected) — that could never have
    /// run without raising. Spec.md Section 9 asks for the intended
    /// behavior: arm both timers with the negotiated periods.
    fn open_received(&mut self, open: Open) -> Vec<Action> {
        let peer_hold = Duration::from_secs(u64::from(open.hold_time));
        let negotiated_hold = self.hold_time.min(peer_hold);
        if !negotiated_hold.is_zero() && negotiated_hold < Duration::from_secs(3) {
            return self.error_close(Some(NotificationError::open(
                crate::wire::OpenMessageErrorSubcode::UnacceptableHoldTime,
                bytes::Bytes::new(),
            )));
        }
        self.hold_time = negotiated_hold;
        self.keep_alive_time = negotiated_hold / 3;
        self.state = State::OpenConfirm;
        let mut actions = vec![
            Action::CancelTimer(TimerName::DelayOpen),
            Action::SendOpen,
            Action::SendKeepAlive,
        ];
        if negotiated_hold.is_zero() {
            actions.push(Action::CancelTimer(TimerName::KeepAlive));
            actions.push(Action::CancelTimer(TimerName::Hold));
        } else {
            actions.push(Action::StartTimer(TimerName::KeepAlive, self.keep_alive_time));
            actions.push(Action::StartTimer(TimerName::Hold, self.hold_time));
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn open(hold_time: u16, asn: u16, bgp_id: Ipv4Addr) -> Open {
        Open {
            version: 4,
            asn,
            hold_time,
            bgp_id,
            opt_params: Vec::new().into(),
        }
    }

    fn has_action(actions: &[Action], f: impl Fn(&Action) -> bool) -> bool {
        actions.iter().any(f)
    }

    #[test]
    fn manual_start_from_idle_goes_to_connect() {
        let mut fsm = Fsm::new(Duration::from_secs(180), Duration::from_secs(30), Duration::from_secs(30), false);
        let actions = fsm.handle(Event::ManualStart);
        assert_eq!(fsm.state(), State::Connect);
        assert!(has_action(&actions, |a| matches!(a, Action::OpenTcpConnection)));
    }

    #[test]
    fn clean_session_reaches_established() {
        let mut fsm = Fsm::new(Duration::from_secs(180), Duration::from_secs(30), Duration::from_secs(30), false);
        fsm.handle(Event::ManualStart);
        fsm.handle(Event::TcpConnectionConfirmed);
        assert_eq!(fsm.state(), State::OpenSent);
        let actions = fsm.handle(Event::OpenReceived(open(90, 64513, Ipv4Addr::new(2, 2, 2, 2))));
        assert_eq!(fsm.state(), State::OpenConfirm);
        assert_eq!(fsm.hold_time(), Duration::from_secs(90));
        assert!(has_action(&actions, |a| matches!(a, Action::SendOpen)));
        assert!(has_action(&actions, |a| matches!(a, Action::SendKeepAlive)));
        let actions = fsm.handle(Event::KeepAliveReceived);
        assert_eq!(fsm.state(), State::Established);
        assert!(has_action(&actions, |a| matches!(a, Action::SessionEstablished)));
    }

    #[test]
    fn unacceptable_hold_time_is_rejected() {
        let mut fsm = Fsm::new(Duration::from_secs(180), Duration::from_secs(30), Duration::from_secs(30), false);
        fsm.handle(Event::ManualStart);
        fsm.handle(Event::TcpConnectionConfirmed);
        let actions = fsm.handle(Event::OpenReceived(open(1, 64513, Ipv4Addr::new(2, 2, 2, 2))));
        assert_eq!(fsm.state(), State::Idle);
        assert!(has_action(&actions, |a| matches!(
            a,
            Action::SendNotification(n) if n.kind == crate::error::ErrorKind::Open(crate::wire::OpenMessageErrorSubcode::UnacceptableHoldTime)
        )));
    }

    #[test]
    fn hold_timer_expiry_in_established_sends_notification_and_resets() {
        let mut fsm = Fsm::new(Duration::from_secs(180), Duration::from_secs(30), Duration::from_secs(30), false);
        fsm.handle(Event::ManualStart);
        fsm.handle(Event::TcpConnectionConfirmed);
        fsm.handle(Event::OpenReceived(open(90, 64513, Ipv4Addr::new(2, 2, 2, 2))));
        fsm.handle(Event::KeepAliveReceived);
        assert_eq!(fsm.state(), State::Established);
        let actions = fsm.handle(Event::HoldTimerExpires);
        assert_eq!(fsm.state(), State::Idle);
        assert!(has_action(&actions, |a| matches!(
            a,
            Action::SendNotification(n) if n.kind == crate::error::ErrorKind::HoldTimerExpired
        )));
    }

    #[test]
    fn version_mismatch_notification_closes_cleanly_from_open_sent() {
        let mut fsm = Fsm::new(Duration::from_secs(180), Duration::from_secs(30), Duration::from_secs(30), false);
        fsm.handle(Event::ManualStart);
        fsm.handle(Event::TcpConnectionConfirmed);
        assert_eq!(fsm.state(), State::OpenSent);
        let n = Notification::new(
            NotificationErrorCode::OpenMessageError,
            crate::wire::OpenMessageErrorSubcode::UnsupportedVersionNumber as u8,
            bytes::Bytes::from_static(&[0x04]),
        );
        fsm.handle(Event::NotificationReceived(n));
        assert_eq!(fsm.state(), State::Idle);
    }

    #[test]
    fn update_received_in_connect_is_fsm_error() {
        let mut fsm = Fsm::new(Duration::from_secs(180), Duration::from_secs(30), Duration::from_secs(30), false);
        fsm.handle(Event::ManualStart);
        assert_eq!(fsm.state(), State::Connect);
        let actions = fsm.handle(Event::UpdateReceived);
        assert_eq!(fsm.state(), State::Idle);
        assert!(has_action(&actions, |a| matches!(
            a,
            Action::SendNotification(n) if n.kind == crate::error::ErrorKind::Fsm
        )));
    }

    #[test]
    fn keepalive_timer_expiry_with_zero_hold_is_a_no_op() {
        let mut fsm = Fsm::new(Duration::ZERO, Duration::from_secs(30), Duration::from_secs(30), false);
        fsm.handle(Event::ManualStart);
        fsm.handle(Event::TcpConnectionConfirmed);
        fsm.handle(Event::OpenReceived(open(0, 64513, Ipv4Addr::new(2, 2, 2, 2))));
        fsm.handle(Event::KeepAliveReceived);
        assert_eq!(fsm.state(), State::Established);
        let actions = fsm.handle(Event::KeepAliveTimerExpires);
        assert!(actions.is_empty());
        assert_eq!(fsm.state(), State::Established);
    }
}
