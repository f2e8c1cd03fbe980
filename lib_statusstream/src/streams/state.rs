//! # Connection State Machine
//!
//! The finite set of states a status stream can be in, the triggers that move it
//! between them, and the backoff policy that decides how long to wait before the
//! next reconnect attempt and when to give up.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default delay before the first reconnect attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(3000);
/// Default number of consecutive failures tolerated before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default ceiling for a single reconnect delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);
/// Growth factor applied per attempt.
pub const BACKOFF_FACTOR: f64 = 1.5;

/// Health of a status stream. Exactly one is current at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No transport and no pending retry.
    #[default]
    Disconnected,
    /// A transport is being opened.
    Connecting,
    /// The transport is open and events are flowing.
    Connected,
    /// The last transport failed; a retry timer is pending.
    Reconnecting,
    /// Reconnect attempts are exhausted. Recoverable by an explicit connect.
    Error,
}

/// Events that move a [`ConnectionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Explicit `connect()`.
    Connect,
    /// The transport reported a successful open.
    Opened,
    /// The transport failed and another attempt is allowed.
    RetryScheduled,
    /// The transport failed and no attempts remain.
    Exhausted,
    /// The retry timer fired.
    RetryFired,
    /// Explicit `disconnect()`.
    Disconnect,
}

impl ConnectionState {
    /// Returns the state reached from `self` through `trigger`, or `None` when the
    /// trigger has no meaning in the current state.
    pub fn next(self, trigger: Trigger) -> Option<ConnectionState> {
        use ConnectionState::*;
        match (self, trigger) {
            (_, Trigger::Connect) => Some(Connecting),
            (_, Trigger::Disconnect) => Some(Disconnected),
            (Connecting, Trigger::Opened) => Some(Connected),
            (Connecting | Connected, Trigger::RetryScheduled) => Some(Reconnecting),
            (Connecting | Connected, Trigger::Exhausted) => Some(Error),
            (Reconnecting, Trigger::RetryFired) => Some(Connecting),
            _ => None,
        }
    }

    /// `true` while events are flowing.
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    /// `true` while a transport is being opened.
    pub fn is_connecting(self) -> bool {
        self == ConnectionState::Connecting
    }

    /// `true` while waiting for the retry timer.
    pub fn is_reconnecting(self) -> bool {
        self == ConnectionState::Reconnecting
    }

    /// Lower-case name, as used in logs and serialized snapshots.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geometric reconnect backoff with an attempt ceiling.
///
/// The delay before retry `n` (1-indexed) is `base * factor^(n-1)`, clamped to
/// `max_delay` when one is set. Failure number `n` may retry only while
/// `n < max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry, and the value restored after a successful open.
    pub base: Duration,
    /// Growth factor per attempt.
    pub factor: f64,
    /// Consecutive failures after which the session gives up.
    pub max_attempts: u32,
    /// Upper bound for a single delay. `None` lets the delay grow without bound.
    pub max_delay: Option<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_DELAY,
            factor: BACKOFF_FACTOR,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_delay: Some(DEFAULT_MAX_DELAY),
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait before retry `attempt`. Attempt `0` maps to the base delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.base.as_millis() as f64;
        // `as u64` saturates, so an overflowing power lands on u64::MAX.
        let millis = (base_ms * self.factor.powi(exponent)).round() as u64;
        let delay = Duration::from_millis(millis);
        match self.max_delay {
            Some(ceiling) => delay.min(ceiling),
            None => delay,
        }
    }

    /// Whether failure number `attempt` may still be followed by a retry.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_and_disconnect_are_accepted_everywhere() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
            ConnectionState::Error,
        ] {
            assert_eq!(state.next(Trigger::Connect), Some(ConnectionState::Connecting));
            assert_eq!(state.next(Trigger::Disconnect), Some(ConnectionState::Disconnected));
        }
    }

    #[test]
    fn open_is_only_meaningful_while_connecting() {
        assert_eq!(
            ConnectionState::Connecting.next(Trigger::Opened),
            Some(ConnectionState::Connected)
        );
        assert_eq!(ConnectionState::Disconnected.next(Trigger::Opened), None);
        assert_eq!(ConnectionState::Reconnecting.next(Trigger::Opened), None);
        assert_eq!(ConnectionState::Error.next(Trigger::Opened), None);
    }

    #[test]
    fn failures_lead_to_reconnecting_or_error() {
        for state in [ConnectionState::Connecting, ConnectionState::Connected] {
            assert_eq!(state.next(Trigger::RetryScheduled), Some(ConnectionState::Reconnecting));
            assert_eq!(state.next(Trigger::Exhausted), Some(ConnectionState::Error));
        }
        assert_eq!(ConnectionState::Disconnected.next(Trigger::RetryScheduled), None);
        assert_eq!(
            ConnectionState::Reconnecting.next(Trigger::RetryFired),
            Some(ConnectionState::Connecting)
        );
        assert_eq!(ConnectionState::Connected.next(Trigger::RetryFired), None);
    }

    #[test]
    fn derived_flags_follow_the_state() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connected.is_connecting());
        assert!(ConnectionState::Connecting.is_connecting());
        assert!(ConnectionState::Reconnecting.is_reconnecting());
        assert!(!ConnectionState::Error.is_reconnecting());
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }

    #[test]
    fn delays_grow_by_one_and_a_half() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u128> = (1..=4).map(|n| policy.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![3000, 4500, 6750, 10125]);
        assert_eq!(policy.delay_for(0), policy.base);
    }

    #[test]
    fn delay_is_clamped_when_a_ceiling_is_set() {
        let policy = BackoffPolicy {
            max_delay: Some(Duration::from_secs(5)),
            ..BackoffPolicy::default()
        };
        assert_eq!(policy.delay_for(2), Duration::from_millis(4500));
        assert_eq!(policy.delay_for(3), Duration::from_secs(5));
        assert_eq!(policy.delay_for(40), Duration::from_secs(5));
    }

    #[test]
    fn unclamped_delay_saturates_instead_of_overflowing() {
        let policy = BackoffPolicy {
            max_delay: None,
            ..BackoffPolicy::default()
        };
        assert!(policy.delay_for(30) > policy.delay_for(29));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn attempt_ceiling() {
        let policy = BackoffPolicy::default();
        assert!(policy.allows_retry(4));
        assert!(!policy.allows_retry(5));
    }
}
