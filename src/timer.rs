//! Cancellable one-shot timers used by the session FSM.
//!
//! RFC 4271 Section 8 names five timers (ConnectRetry, Hold, KeepAlive,
//! DelayOpen and — per the idle-hold damping text in Section 6.8 additions
//! — an IdleHold timer). Each is a restartable one-shot: `reset` replaces
//! whatever is currently scheduled, `cancel` disarms it, and `wait` is the
//! `tokio::select!` arm that resolves when (and only when) the timer is
//! currently armed and has expired.

// SPDX-License-Identifier: AGPL-3.0-or-later

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{sleep, Sleep};

/// A restartable one-shot timer that is either disarmed or counting down.
pub struct Timer {
    name: &'static str,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Timer {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self { name, sleep: None }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Arm (or re-arm) the timer to fire `period` from now. A period of
    /// zero per RFC 4271 Section 9.2.1.3 ("keep alive interval of zero
    /// disables") is represented by simply not calling `reset`, i.e. by
    /// `cancel`.
    pub fn reset(&mut self, period: Duration) {
        self.sleep = Some(Box::pin(sleep(period)));
    }

    /// Disarm the timer. `wait` on a disarmed timer never resolves.
    pub fn cancel(&mut self) {
        self.sleep = None;
    }

    /// A future that resolves once, when the timer next expires, and then
    /// leaves the timer disarmed (mirroring a one-shot alarm: the caller is
    /// expected to `reset` it again if periodic behavior is needed, as the
    /// FSM does for KeepAlive).
    pub fn wait(&mut self) -> TimerWait<'_> {
        TimerWait { timer: self }
    }
}

pub struct TimerWait<'a> {
    timer: &'a mut Timer,
}

impl Future for TimerWait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.timer.sleep.as_mut() {
            None => Poll::Pending,
            Some(sleep) => match sleep.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    this.timer.sleep = None;
                    Poll::Ready(())
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
