//! Timer events and their dispatch

use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::Bytes;
use shingo_core::{Endpoint, EventQueue, InterfaceId, Scheduler, TimerId, Timestamp};
use tracing::trace;

use super::ShingoRouter;

/// Every event the engine schedules for itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterTimer {
    /// Full zone advertisement
    PeriodicUpdate,
    /// Advertise settled changes
    TriggeredUpdate,
    /// Settling time of a metric change for this destination elapsed
    Settling(Ipv4Addr),
    /// No reply yet for the discovery of this destination
    RreqRetry(Ipv4Addr),
    /// No acknowledgment yet from this neighbor
    AckTimeout(Ipv4Addr),
    /// Start a new one-second request budget
    RateLimitReset,
    /// Route request postponed by the rate limit
    SendRequest(Ipv4Addr),
    /// Jittered control transmission
    Transmit {
        interface: InterfaceId,
        destination: Ipv4Addr,
        datagram: Bytes,
        ttl: u8,
    },
    /// Paced release of buffered packets for this destination
    ReleaseQueued { dst: Ipv4Addr },
}

impl<E: Endpoint, S: Scheduler<RouterTimer>> ShingoRouter<E, S> {
    /// Handle a timer event that came due
    pub fn handle_timer(&mut self, id: TimerId, timer: RouterTimer) {
        trace!(%id, ?timer, "Timer fired");
        match timer {
            RouterTimer::PeriodicUpdate => {
                if self.periodic_timer.is_some_and(|current| current != id) {
                    return;
                }
                self.send_periodic_update();
            }
            RouterTimer::TriggeredUpdate | RouterTimer::Settling(_) => self.send_triggered_update(),
            RouterTimer::RreqRetry(dst) => {
                if self.request_timers.get(&dst) != Some(&id) {
                    return;
                }
                self.request_timers.remove(&dst);
                self.route_request_timer_expire(dst);
            }
            RouterTimer::AckTimeout(neighbor) => {
                if self.ack_timers.get(&neighbor) != Some(&id) {
                    return;
                }
                self.ack_timers.remove(&neighbor);
                self.ack_timeout(neighbor);
            }
            RouterTimer::RateLimitReset => {
                self.rreq_count = 0;
                self.rate_limit_timer = Some(
                    self.scheduler
                        .schedule(Duration::from_secs(1), RouterTimer::RateLimitReset),
                );
            }
            RouterTimer::SendRequest(dst) => {
                if self.postponed_requests.get(&dst) != Some(&id) {
                    return;
                }
                self.postponed_requests.remove(&dst);
                self.send_request(dst);
            }
            RouterTimer::Transmit {
                interface,
                destination,
                datagram,
                ttl,
            } => self.transmit(interface, destination, datagram, ttl),
            RouterTimer::ReleaseQueued { dst } => self.release_queued(dst),
        }
    }
}

impl<E: Endpoint> ShingoRouter<E, EventQueue<RouterTimer>> {
    /// Handle every timer due at the current time, returning how many ran
    pub fn run_due_timers(&mut self) -> usize {
        let mut handled = 0;
        while let Some((id, timer)) = self.scheduler.pop_due() {
            self.handle_timer(id, timer);
            handled += 1;
        }
        handled
    }

    /// Advance the clock to `now` and handle every timer due on the way, in order
    pub fn advance_to(&mut self, now: Timestamp) -> usize {
        let mut handled = 0;
        loop {
            match self.scheduler.next_deadline() {
                Some(deadline) if deadline <= now => {
                    self.scheduler.advance_to(deadline);
                    handled += self.run_due_timers();
                }
                _ => break,
            }
        }
        self.scheduler.advance_to(now);
        handled
    }

    /// Advance the clock by `delta`, handling due timers on the way
    pub fn advance_by(&mut self, delta: Duration) -> usize {
        let target = self.now() + delta;
        self.advance_to(target)
    }

    /// Deadline of the earliest pending timer
    pub fn next_deadline(&mut self) -> Option<Timestamp> {
        self.scheduler.next_deadline()
    }
}
