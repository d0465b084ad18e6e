//! Connection protocol: one TCP byte stream, framed into whole BGP
//! messages (via [`crate::wire::Codec`]) and dispatched to an [`Fsm`]
//! instance, translating its [`Action`]s back into wire bytes, timer
//! starts/cancels, and socket close (spec.md Section 4.4).
//!
//! Grounded in the teacher's `session.rs::Feeder`, which drives a single
//! connection through a simplified state walk with `FramedRead`/
//! `FramedWrite` over split `TcpStream` halves and a `tokio::select!` loop
//! once established. This module generalizes that shape to the full
//! 6-state/21-event FSM instead of the teacher's linear happy path.

// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::attrs::AttributeDict;
use crate::config::PeerConfig;
use crate::error::NotificationError;
use crate::fsm::{Action, Event, Fsm, State, TimerName};
use crate::timer::Timer;
use crate::wire::capability::{Afi, Safi};
use crate::wire::{Codec, Message, MessageHeaderErrorSubcode, Notification, Open};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::{tcp, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};

/// Whether a candidate connection was initiated by us or accepted from
/// the peer; determined by whether the remote TCP port is 179 (spec.md
/// Section 3, "Connection").
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Translate a codec decode failure into the wire-level NOTIFICATION spec.md
/// Section 4.1 requires for it: a non-all-ones marker is
/// `ConnectionNotSynchronized`, an out-of-range length is `BadMessageLength`
/// with the offending length as diagnostic data, an unknown type byte is
/// `BadMessageType` carrying that byte, and anything deeper in the message
/// body falls back to `BadMessageLength` since the header itself was fine.
fn header_error_for(err: crate::wire::Error) -> NotificationError {
    match err {
        crate::wire::Error::Marker => {
            NotificationError::header(MessageHeaderErrorSubcode::ConnectionNotSynchronized, Bytes::new())
        }
        crate::wire::Error::HeaderLength(len) => NotificationError::header(
            MessageHeaderErrorSubcode::BadMessageLength,
            Bytes::copy_from_slice(&len.to_be_bytes()),
        ),
        crate::wire::Error::MessageType(b) => NotificationError::header(
            MessageHeaderErrorSubcode::BadMessageType,
            Bytes::copy_from_slice(&[b]),
        ),
        crate::wire::Error::InternalLength(..) | crate::wire::Error::InternalType(..) | crate::wire::Error::Io(_) => {
            NotificationError::header(MessageHeaderErrorSubcode::BadMessageLength, Bytes::new())
        }
    }
}

fn direction_of(peer_addr: SocketAddr) -> Direction {
    if peer_addr.port() == crate::config::BGP_PORT {
        Direction::Outbound
    } else {
        Direction::Inbound
    }
}

struct ConnectionTimers {
    connect_retry: Timer,
    hold: Timer,
    keep_alive: Timer,
    delay_open: Timer,
    idle_hold: Timer,
}

impl ConnectionTimers {
    fn new() -> Self {
        Self {
            connect_retry: Timer::new("ConnectRetry"),
            hold: Timer::new("Hold"),
            keep_alive: Timer::new("KeepAlive"),
            delay_open: Timer::new("DelayOpen"),
            idle_hold: Timer::new("IdleHold"),
        }
    }

    fn slot(&mut self, name: TimerName) -> &mut Timer {
        match name {
            TimerName::ConnectRetry => &mut self.connect_retry,
            TimerName::Hold => &mut self.hold,
            TimerName::KeepAlive => &mut self.keep_alive,
            TimerName::DelayOpen => &mut self.delay_open,
            TimerName::IdleHold => &mut self.idle_hold,
        }
    }
}

/// Outcome of driving a connection to completion.
#[derive(Debug)]
pub enum Outcome {
    /// The connection reached Established and then later closed normally
    /// (ManualStop) or on a peer-initiated Cease.
    Closed,
    /// A validation or framing error forced the session down; carries the
    /// NOTIFICATION that was sent (if any) so the peering manager can
    /// surface it to consumers.
    Failed(Option<NotificationError>),
    /// `RunCollisionDetection` was requested; the caller (peering
    /// manager) must compare this connection against its siblings and
    /// call back in with either `Event::CollisionDump` or let it proceed.
    CollisionCheck,
}

/// A live candidate connection: the transport, its FSM, and its timers.
pub struct Connection {
    pub direction: Direction,
    fsm: Fsm,
    timers: ConnectionTimers,
    rx: FramedRead<tcp::OwnedReadHalf, Codec>,
    tx: FramedWrite<tcp::OwnedWriteHalf, Codec>,
    local_bgp_id: Ipv4Addr,
    local_asn: u16,
    peer_bgp_id: Option<Ipv4Addr>,
    enabled_families: Vec<(Afi, Safi)>,
}

impl Connection {
    /// Wrap an already-connected socket. `local_addr` is used to derive
    /// the local BGP identifier when `config.local_bgp_id` is unset
    /// (spec.md Section 4.4).
    pub fn new(socket: TcpStream, config: &PeerConfig) -> std::io::Result<Self> {
        let peer_addr = socket.peer_addr()?;
        let local_addr = socket.local_addr()?;
        let direction = direction_of(peer_addr);
        let local_bgp_id = config.local_bgp_id.unwrap_or(match local_addr.ip() {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        });
        let (read_half, write_half) = socket.into_split();
        let fsm = Fsm::new(
            config.hold_time,
            config.connect_retry_time,
            config.idle_hold_time,
            config.delay_open,
        );
        Ok(Self {
            direction,
            fsm,
            timers: ConnectionTimers::new(),
            rx: FramedRead::new(read_half, Codec),
            tx: FramedWrite::new(write_half, Codec),
            local_bgp_id,
            local_asn: config.local_asn,
            peer_bgp_id: None,
            enabled_families: config.address_families.clone(),
        })
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.fsm.state()
    }

    #[must_use]
    pub fn peer_bgp_id(&self) -> Option<Ipv4Addr> {
        self.peer_bgp_id
    }

    /// Initialize the FSM to `Connect` (outbound) or `Active` (inbound)
    /// and drive event 16/17 (TCP connection confirmed), as a freshly
    /// accepted/established socket enters the FSM already connected
    /// (spec.md Section 4.5).
    pub async fn start(&mut self) -> std::io::Result<Outcome> {
        let mut actions = self.fsm.handle(Event::ManualStart);
        actions.extend(self.fsm.handle(Event::TcpConnectionConfirmed));
        self.run_actions(actions).await
    }

    fn build_open(&self) -> Open {
        use crate::wire::capability::CapabilitiesBuilder;
        let mut builder = CapabilitiesBuilder::new();
        for (afi, safi) in &self.enabled_families {
            builder = builder.multi_protocol(*afi, *safi);
        }
        Open::new_easy(
            u32::from(self.local_asn),
            u16::try_from(self.fsm.hold_time().as_secs()).unwrap_or(u16::MAX),
            self.local_bgp_id,
            builder.build(),
        )
    }

    /// Translate one inbound wire message into the FSM event it
    /// represents, validating UPDATE attribute sets along the way
    /// (spec.md Section 4.4: "Parsing or validation errors translate to
    /// FSM header/open/update error events").
    fn message_to_event(&mut self, message: Message) -> Event {
        match message {
            Message::Open(open) => {
                self.peer_bgp_id = Some(open.bgp_id);
                Event::OpenReceived(open)
            }
            Message::Keepalive => Event::KeepAliveReceived,
            Message::Notification(n) => Event::NotificationReceived(n),
            Message::Update(update) => {
                let has_v4_nlri = !update.nlri.is_empty();
                match AttributeDict::from_path_attributes(
                    update.path_attributes,
                    true,
                    has_v4_nlri,
                ) {
                    Ok(_) => Event::UpdateReceived,
                    Err(n) => Event::UpdateMalformed(n),
                }
            }
        }
    }

    /// Run one FSM step and apply its actions (send bytes, arm/cancel
    /// timers, close). Returns `Some(outcome)` once the step produces a
    /// terminal or collision-check result.
    async fn run_actions(&mut self, actions: Vec<Action>) -> std::io::Result<Outcome> {
        let mut failed_with: Option<NotificationError> = None;
        let mut closing = false;
        let mut collision = false;
        for action in actions {
            match action {
                Action::SendOpen => {
                    let open = self.build_open();
                    self.tx.send(Message::Open(open)).await?;
                }
                Action::SendKeepAlive => {
                    self.tx.send(Message::Keepalive).await?;
                }
                Action::SendNotification(n) => {
                    self.tx
                        .send(Message::Notification(Notification::new(
                            n.code,
                            n.subcode,
                            n.data.clone(),
                        )))
                        .await?;
                    failed_with = Some(n);
                }
                Action::StartTimer(name, period) => self.timers.slot(name).reset(period),
                Action::CancelTimer(name) => self.timers.slot(name).cancel(),
                Action::CloseConnection => closing = true,
                Action::OpenTcpConnection => {
                    // A fresh outbound dial is the peering manager's job
                    // (it owns the candidate-connection lists); a
                    // `Connection` only drives the socket it already has.
                }
                Action::RequestAutomaticStart { .. } => {}
                Action::SessionEstablished | Action::DeliverUpdate => {}
                Action::IncrementConnectRetryCounter => {}
                Action::RunCollisionDetection => collision = true,
            }
        }
        if collision {
            return Ok(Outcome::CollisionCheck);
        }
        if closing {
            return Ok(Outcome::Failed(failed_with));
        }
        Ok(Outcome::Closed)
    }

    /// Drive the connection until it reaches a terminal outcome,
    /// multiplexing the socket and all five timers exactly as the
    /// teacher's `established()` multiplexes the update-broadcast channel
    /// against the read half.
    pub async fn drive(&mut self) -> std::io::Result<Outcome> {
        loop {
            let event = tokio::select! {
                frame = self.rx.next() => {
                    match frame {
                        Some(Ok(message)) => self.message_to_event(message),
                        Some(Err(err)) => Event::HeaderError(header_error_for(err)),
                        None => Event::TcpConnectionFails,
                    }
                }
                () = self.timers.connect_retry.wait() => Event::ConnectRetryTimerExpires,
                () = self.timers.hold.wait() => Event::HoldTimerExpires,
                () = self.timers.keep_alive.wait() => Event::KeepAliveTimerExpires,
                () = self.timers.delay_open.wait() => Event::DelayOpenTimerExpires,
                () = self.timers.idle_hold.wait() => Event::IdleHoldTimerExpires,
            };
            let actions = self.fsm.handle(event);
            match self.run_actions(actions).await? {
                Outcome::Closed if self.fsm.state() != State::Idle => continue,
                outcome => return Ok(outcome),
            }
        }
    }

    /// Apply a collision-dump decision handed down by the peering
    /// manager after `Outcome::CollisionCheck`.
    pub async fn apply_collision_dump(&mut self) -> std::io::Result<Outcome> {
        let actions = self.fsm.handle(Event::CollisionDump);
        self.run_actions(actions).await
    }

    /// Send an UPDATE once Established (the peering manager's packing
    /// loop calls this once per built `UpdateMessage`).
    pub async fn send_update(&mut self, message: Message) -> std::io::Result<()> {
        self.tx.send(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_from_port() {
        let peer: SocketAddr = "10.0.0.1:179".parse().unwrap();
        assert_eq!(direction_of(peer), Direction::Outbound);
        let peer: SocketAddr = "10.0.0.1:54321".parse().unwrap();
        assert_eq!(direction_of(peer), Direction::Inbound);
    }

    #[test]
    fn bad_marker_maps_to_connection_not_synchronized() {
        let err = header_error_for(crate::wire::Error::Marker);
        assert_eq!(
            err.kind,
            crate::error::ErrorKind::Header(MessageHeaderErrorSubcode::ConnectionNotSynchronized)
        );
    }

    #[test]
    fn bad_length_maps_to_bad_message_length_with_diagnostic_data() {
        let err = header_error_for(crate::wire::Error::HeaderLength(5000));
        assert_eq!(
            err.kind,
            crate::error::ErrorKind::Header(MessageHeaderErrorSubcode::BadMessageLength)
        );
        assert_eq!(err.data, Bytes::copy_from_slice(&5000u16.to_be_bytes()));
    }

    #[test]
    fn unknown_type_maps_to_bad_message_type_with_the_offending_byte() {
        let err = header_error_for(crate::wire::Error::MessageType(200));
        assert_eq!(
            err.kind,
            crate::error::ErrorKind::Header(MessageHeaderErrorSubcode::BadMessageType)
        );
        assert_eq!(err.data, Bytes::copy_from_slice(&[200]));
    }

    #[tokio::test]
    async fn start_sends_open_over_a_real_socket_pair() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server_sock, _) = listener.accept().await.unwrap();
        let client_sock = client.await.unwrap();

        let config = PeerConfig::new(64512, client_sock.peer_addr().unwrap().ip());
        let mut conn = Connection::new(client_sock, &config).unwrap();
        let outcome = conn.start().await.unwrap();
        assert!(matches!(outcome, Outcome::Closed));
        assert_eq!(conn.state(), State::OpenSent);

        let mut server_rx = FramedRead::new(server_sock, Codec);
        let message = server_rx.next().await.unwrap().unwrap();
        assert!(matches!(message, Message::Open(_)));
    }
}
