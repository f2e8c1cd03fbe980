//! # Stream Session
//!
//! `StreamSession` is the synchronous core of the status stream client. It owns
//! the reconnect bookkeeping (attempt counter, current delay, manual-disconnect
//! flag, last error), the single-slot latest status register, and a session
//! epoch. It performs no I/O: every input produces a list of [`Effect`]s that the
//! client executes (open or close the transport, schedule or cancel the retry
//! timer, notify callbacks).
//!
//! Every transport open and every disconnect bumps the epoch. Inputs coming from a
//! transport or timer carry the epoch they were created under; anything older
//! than the current epoch is stale and ignored, so a late error from a torn-down
//! connection can never trigger a retry.

use std::time::Duration;

use super::error::{StreamError, TransportError};
use super::event::{decode_status_event, EventKind, StatusEvent};
use super::state::{BackoffPolicy, ConnectionState, Trigger};

/// Generation counter tagging transports and retry timers.
pub type Epoch = u64;

/// Everything that can happen to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    /// Explicit `connect()`.
    Connect,
    /// Explicit `disconnect()`.
    Disconnect,
    /// The transport opened under `epoch` is up.
    Opened {
        /// Epoch of the transport.
        epoch: Epoch,
    },
    /// The transport opened under `epoch` delivered a named event.
    Message {
        /// Epoch of the transport.
        epoch: Epoch,
        /// Event category.
        event: String,
        /// Raw payload.
        data: String,
    },
    /// The transport opened under `epoch` failed or was closed by the remote.
    Failed {
        /// Epoch of the transport.
        epoch: Epoch,
        /// What went wrong.
        error: TransportError,
    },
    /// The retry timer scheduled under `epoch` fired.
    RetryElapsed {
        /// Epoch of the failed transport.
        epoch: Epoch,
    },
}

/// Observable consequences handed to the callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A new latest status was decoded.
    StatusUpdated(StatusEvent),
    /// A transport failure, or the terminal exhaustion error.
    Error(StreamError),
}

/// Work the client must carry out after an input.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Resolve the endpoint and open a transport tagged with `epoch`.
    OpenTransport {
        /// Epoch to tag the transport's inputs with.
        epoch: Epoch,
    },
    /// Close the live transport.
    CloseTransport,
    /// Start the retry timer.
    ScheduleRetry {
        /// Epoch to tag the timer's input with.
        epoch: Epoch,
        /// How long to wait.
        delay: Duration,
    },
    /// Cancel the pending retry timer.
    CancelRetry,
    /// Invoke a callback.
    Notify(Notification),
}

/// Reconnect bookkeeping and state for one logical stream.
#[derive(Debug)]
pub struct StreamSession {
    policy: BackoffPolicy,
    state: ConnectionState,
    epoch: Epoch,
    reconnect_attempt: u32,
    reconnect_delay: Duration,
    manual_disconnect: bool,
    last_error: Option<StreamError>,
    latest: Option<StatusEvent>,
    transport_live: bool,
    retry_pending: bool,
}

impl StreamSession {
    /// A disconnected session using `policy`.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            epoch: 0,
            reconnect_attempt: 0,
            reconnect_delay: policy.base,
            manual_disconnect: false,
            last_error: None,
            latest: None,
            transport_live: false,
            retry_pending: false,
        }
    }

    /// Applies one input and returns the effects to execute, in order.
    pub fn handle(&mut self, input: SessionInput) -> Vec<Effect> {
        let mut effects = Vec::new();
        match input {
            SessionInput::Connect => self.on_connect(&mut effects),
            SessionInput::Disconnect => self.on_disconnect(&mut effects),
            SessionInput::Opened { epoch } => self.on_opened(epoch, &mut effects),
            SessionInput::Message { epoch, event, data } => {
                self.on_message(epoch, &event, &data, &mut effects)
            }
            SessionInput::Failed { epoch, error } => self.on_failed(epoch, error, &mut effects),
            SessionInput::RetryElapsed { epoch } => self.on_retry_elapsed(epoch, &mut effects),
        }
        effects
    }

    fn on_connect(&mut self, effects: &mut Vec<Effect>) {
        self.manual_disconnect = false;
        self.teardown(effects);
        self.reconnect_attempt = 0;
        self.reconnect_delay = self.policy.base;
        self.last_error = None;
        self.open(Trigger::Connect, effects);
    }

    fn on_disconnect(&mut self, effects: &mut Vec<Effect>) {
        // The flag goes first so failure inputs already in flight see it.
        self.manual_disconnect = true;
        self.epoch += 1;
        self.teardown(effects);
        self.latest = None;
        self.last_error = None;
        self.transition(Trigger::Disconnect, effects);
    }

    fn on_opened(&mut self, epoch: Epoch, effects: &mut Vec<Effect>) {
        if !self.is_live(epoch) {
            tracing::trace!(epoch, current = self.epoch, "ignoring open from stale transport");
            return;
        }
        if self.transition(Trigger::Opened, effects) {
            self.reconnect_attempt = 0;
            self.reconnect_delay = self.policy.base;
            self.last_error = None;
        }
    }

    fn on_message(&mut self, epoch: Epoch, event: &str, data: &str, effects: &mut Vec<Effect>) {
        if !self.is_live(epoch) {
            tracing::trace!(epoch, current = self.epoch, "ignoring event from stale transport");
            return;
        }
        let Some(kind) = EventKind::from_name(event) else {
            tracing::trace!(event, "ignoring event category");
            return;
        };
        match decode_status_event(data) {
            Ok(status) => {
                self.latest = Some(status.clone());
                effects.push(Effect::Notify(Notification::StatusUpdated(status)));
            }
            Err(e) => {
                tracing::warn!(kind = kind.as_str(), error = %e, "discarding malformed stream payload");
            }
        }
    }

    fn on_failed(&mut self, epoch: Epoch, error: TransportError, effects: &mut Vec<Effect>) {
        if self.manual_disconnect {
            tracing::debug!(epoch, error = %error, "transport failure after manual disconnect");
            return;
        }
        if !self.is_live(epoch) {
            tracing::trace!(epoch, current = self.epoch, "ignoring failure from stale transport");
            return;
        }

        self.transport_live = false;
        effects.push(Effect::CloseTransport);

        let error = StreamError::Transport(error);
        self.last_error = Some(error.clone());
        effects.push(Effect::Notify(Notification::Error(error)));

        self.reconnect_attempt += 1;
        if self.policy.allows_retry(self.reconnect_attempt) {
            self.reconnect_delay = self.policy.delay_for(self.reconnect_attempt);
            self.transition(Trigger::RetryScheduled, effects);
            self.retry_pending = true;
            effects.push(Effect::ScheduleRetry {
                epoch: self.epoch,
                delay: self.reconnect_delay,
            });
        } else {
            let exhausted = StreamError::Exhausted {
                attempts: self.reconnect_attempt,
            };
            self.last_error = Some(exhausted.clone());
            self.transition(Trigger::Exhausted, effects);
            effects.push(Effect::Notify(Notification::Error(exhausted)));
        }
    }

    fn on_retry_elapsed(&mut self, epoch: Epoch, effects: &mut Vec<Effect>) {
        if self.manual_disconnect || epoch != self.epoch || !self.retry_pending {
            tracing::trace!(epoch, current = self.epoch, "ignoring stale retry timer");
            return;
        }
        self.retry_pending = false;
        self.open(Trigger::RetryFired, effects);
    }

    fn open(&mut self, trigger: Trigger, effects: &mut Vec<Effect>) {
        self.epoch += 1;
        self.transition(trigger, effects);
        self.transport_live = true;
        effects.push(Effect::OpenTransport { epoch: self.epoch });
    }

    fn teardown(&mut self, effects: &mut Vec<Effect>) {
        if self.retry_pending {
            self.retry_pending = false;
            effects.push(Effect::CancelRetry);
        }
        if self.transport_live {
            self.transport_live = false;
            effects.push(Effect::CloseTransport);
        }
    }

    fn transition(&mut self, trigger: Trigger, effects: &mut Vec<Effect>) -> bool {
        match self.state.next(trigger) {
            Some(next) => {
                if next != self.state {
                    self.state = next;
                    effects.push(Effect::Notify(Notification::StateChanged(next)));
                }
                true
            }
            None => {
                tracing::debug!(state = %self.state, ?trigger, "trigger has no transition");
                false
            }
        }
    }

    fn is_live(&self, epoch: Epoch) -> bool {
        !self.manual_disconnect && self.transport_live && epoch == self.epoch
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failures since the last successful open.
    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt
    }

    /// Delay used for the most recent retry, or the base delay.
    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    /// The most recent failure, cleared on open and on explicit connect.
    pub fn last_error(&self) -> Option<&StreamError> {
        self.last_error.as_ref()
    }

    /// The most recently decoded status.
    pub fn latest(&self) -> Option<&StatusEvent> {
        self.latest.as_ref()
    }

    /// Whether a transport is currently open or opening.
    pub fn has_live_transport(&self) -> bool {
        self.transport_live
    }

    /// Whether a retry timer is pending.
    pub fn has_pending_retry(&self) -> bool {
        self.retry_pending
    }

    /// Whether the last control operation was `disconnect()`.
    pub fn is_manually_disconnected(&self) -> bool {
        self.manual_disconnect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> StreamSession {
        StreamSession::new(BackoffPolicy::default())
    }

    fn opened_epoch(effects: &[Effect]) -> Epoch {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::OpenTransport { epoch } => Some(*epoch),
                _ => None,
            })
            .expect("no OpenTransport effect")
    }

    fn retry(effects: &[Effect]) -> Option<(Epoch, Duration)> {
        effects.iter().find_map(|e| match e {
            Effect::ScheduleRetry { epoch, delay } => Some((*epoch, *delay)),
            _ => None,
        })
    }

    fn states(effects: &[Effect]) -> Vec<ConnectionState> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Notify(Notification::StateChanged(s)) => Some(*s),
                _ => None,
            })
            .collect()
    }

    fn payload(status: &str) -> String {
        format!(
            r#"{{"monitor_id":42,"status":"{}","response_time":120,"timestamp":"2024-05-01T00:00:00Z"}}"#,
            status
        )
    }

    /// Fails the current transport and returns the scheduled retry, if any.
    fn fail(s: &mut StreamSession, epoch: Epoch) -> (Vec<Effect>, Option<(Epoch, Duration)>) {
        let effects = s.handle(SessionInput::Failed {
            epoch,
            error: TransportError::Closed,
        });
        let scheduled = retry(&effects);
        (effects, scheduled)
    }

    #[test]
    fn connect_opens_a_transport() {
        let mut s = session();
        let effects = s.handle(SessionInput::Connect);
        assert_eq!(
            effects,
            vec![
                Effect::Notify(Notification::StateChanged(ConnectionState::Connecting)),
                Effect::OpenTransport { epoch: 1 },
            ]
        );
        assert!(s.has_live_transport());
    }

    #[test]
    fn open_resets_backoff() {
        let mut s = session();
        let epoch = opened_epoch(&s.handle(SessionInput::Connect));
        let (_, scheduled) = fail(&mut s, epoch);
        let (timer_epoch, _) = scheduled.unwrap();
        let epoch = opened_epoch(&s.handle(SessionInput::RetryElapsed { epoch: timer_epoch }));
        let (_, scheduled) = fail(&mut s, epoch);
        let epoch = opened_epoch(&s.handle(SessionInput::RetryElapsed {
            epoch: scheduled.unwrap().0,
        }));
        assert_eq!(s.reconnect_attempt(), 2);
        assert_eq!(s.reconnect_delay(), Duration::from_millis(4500));

        let effects = s.handle(SessionInput::Opened { epoch });
        assert_eq!(states(&effects), vec![ConnectionState::Connected]);
        assert_eq!(s.reconnect_attempt(), 0);
        assert_eq!(s.reconnect_delay(), Duration::from_millis(3000));
        assert!(s.last_error().is_none());
    }

    #[test]
    fn backoff_schedule_and_attempt_ceiling() {
        let mut s = session();
        let mut epoch = opened_epoch(&s.handle(SessionInput::Connect));
        let mut delays = Vec::new();

        for _ in 0..4 {
            let (effects, scheduled) = fail(&mut s, epoch);
            assert_eq!(s.state(), ConnectionState::Reconnecting);
            assert!(states(&effects).contains(&ConnectionState::Reconnecting));
            let (timer_epoch, delay) = scheduled.unwrap();
            delays.push(delay.as_millis());
            epoch = opened_epoch(&s.handle(SessionInput::RetryElapsed { epoch: timer_epoch }));
            assert_eq!(s.state(), ConnectionState::Connecting);
        }
        assert_eq!(delays, vec![3000, 4500, 6750, 10125]);

        let (effects, scheduled) = fail(&mut s, epoch);
        assert!(scheduled.is_none());
        assert_eq!(s.state(), ConnectionState::Error);
        assert_eq!(s.reconnect_attempt(), 5);
        assert_eq!(s.last_error(), Some(&StreamError::Exhausted { attempts: 5 }));
        assert!(effects.contains(&Effect::Notify(Notification::Error(StreamError::Exhausted {
            attempts: 5
        }))));
        assert!(!s.has_live_transport());
        assert!(!s.has_pending_retry());
    }

    #[test]
    fn every_failure_is_reported() {
        let mut s = session();
        let epoch = opened_epoch(&s.handle(SessionInput::Connect));
        let effects = s.handle(SessionInput::Failed {
            epoch,
            error: TransportError::Status { status: 502 },
        });
        assert_eq!(effects[0], Effect::CloseTransport);
        assert_eq!(
            effects[1],
            Effect::Notify(Notification::Error(StreamError::Transport(TransportError::Status {
                status: 502
            })))
        );
        assert_eq!(
            s.last_error(),
            Some(&StreamError::Transport(TransportError::Status { status: 502 }))
        );
    }

    #[test]
    fn error_state_recovers_on_connect() {
        let mut s = StreamSession::new(BackoffPolicy {
            max_attempts: 1,
            ..BackoffPolicy::default()
        });
        let epoch = opened_epoch(&s.handle(SessionInput::Connect));
        fail(&mut s, epoch);
        assert_eq!(s.state(), ConnectionState::Error);

        let effects = s.handle(SessionInput::Connect);
        assert_eq!(states(&effects), vec![ConnectionState::Connecting]);
        assert_eq!(s.reconnect_attempt(), 0);
        assert!(s.last_error().is_none());
        assert!(s.has_live_transport());
    }

    #[test]
    fn disconnect_while_reconnecting_cancels_the_timer() {
        let mut s = session();
        let epoch = opened_epoch(&s.handle(SessionInput::Connect));
        let (_, scheduled) = fail(&mut s, epoch);
        let (timer_epoch, _) = scheduled.unwrap();

        let effects = s.handle(SessionInput::Disconnect);
        assert_eq!(
            effects,
            vec![
                Effect::CancelRetry,
                Effect::Notify(Notification::StateChanged(ConnectionState::Disconnected)),
            ]
        );
        assert!(s.is_manually_disconnected());

        // A timer that already fired must not reopen.
        assert!(s.handle(SessionInput::RetryElapsed { epoch: timer_epoch }).is_empty());
        assert_eq!(s.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn late_failure_after_disconnect_is_suppressed() {
        let mut s = session();
        let epoch = opened_epoch(&s.handle(SessionInput::Connect));
        s.handle(SessionInput::Opened { epoch });
        s.handle(SessionInput::Disconnect);

        let effects = s.handle(SessionInput::Failed {
            epoch,
            error: TransportError::Read("reset".into()),
        });
        assert!(effects.is_empty());
        assert!(s.last_error().is_none());
        assert!(!s.has_pending_retry());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut s = session();
        assert!(s.handle(SessionInput::Disconnect).is_empty());
        let epoch = opened_epoch(&s.handle(SessionInput::Connect));
        s.handle(SessionInput::Opened { epoch });

        let effects = s.handle(SessionInput::Disconnect);
        assert_eq!(
            effects,
            vec![
                Effect::CloseTransport,
                Effect::Notify(Notification::StateChanged(ConnectionState::Disconnected)),
            ]
        );
        assert!(s.handle(SessionInput::Disconnect).is_empty());
    }

    #[test]
    fn reconnect_tears_down_the_previous_transport() {
        let mut s = session();
        let first = opened_epoch(&s.handle(SessionInput::Connect));
        s.handle(SessionInput::Opened { epoch: first });

        let effects = s.handle(SessionInput::Connect);
        assert_eq!(effects[0], Effect::CloseTransport);
        let second = opened_epoch(&effects);
        assert!(second > first);

        // Inputs from the first transport are now inert.
        assert!(s
            .handle(SessionInput::Message {
                epoch: first,
                event: "status".into(),
                data: payload("failed"),
            })
            .is_empty());
        assert!(s
            .handle(SessionInput::Failed {
                epoch: first,
                error: TransportError::Closed
            })
            .is_empty());
        assert_eq!(s.state(), ConnectionState::Connecting);
    }

    #[test]
    fn status_events_replace_the_latest_value() {
        let mut s = session();
        let epoch = opened_epoch(&s.handle(SessionInput::Connect));
        s.handle(SessionInput::Opened { epoch });

        let effects = s.handle(SessionInput::Message {
            epoch,
            event: "status".into(),
            data: payload("success"),
        });
        let latest = s.latest().cloned().unwrap();
        assert_eq!(effects, vec![Effect::Notify(Notification::StatusUpdated(latest.clone()))]);
        assert_eq!(latest.response_time_ms, Some(120.0));

        s.handle(SessionInput::Message {
            epoch,
            event: "result".into(),
            data: payload("failed"),
        });
        assert_eq!(s.latest().unwrap().status.as_str(), "failed");
    }

    #[test]
    fn malformed_payloads_change_nothing() {
        let mut s = session();
        let epoch = opened_epoch(&s.handle(SessionInput::Connect));
        s.handle(SessionInput::Opened { epoch });
        s.handle(SessionInput::Message {
            epoch,
            event: "status".into(),
            data: payload("success"),
        });
        let before = s.latest().cloned();

        let effects = s.handle(SessionInput::Message {
            epoch,
            event: "status".into(),
            data: "{\"monitor_id\": 42, \"status\":".into(),
        });
        assert!(effects.is_empty());
        assert_eq!(s.latest().cloned(), before);
        assert_eq!(s.state(), ConnectionState::Connected);
        assert!(s.has_live_transport());
    }

    #[test]
    fn other_event_categories_are_ignored() {
        let mut s = session();
        let epoch = opened_epoch(&s.handle(SessionInput::Connect));
        s.handle(SessionInput::Opened { epoch });
        let effects = s.handle(SessionInput::Message {
            epoch,
            event: "message".into(),
            data: payload("success"),
        });
        assert!(effects.is_empty());
        assert!(s.latest().is_none());
    }

    #[test]
    fn disconnect_clears_latest_and_error() {
        let mut s = session();
        let epoch = opened_epoch(&s.handle(SessionInput::Connect));
        s.handle(SessionInput::Opened { epoch });
        s.handle(SessionInput::Message {
            epoch,
            event: "status".into(),
            data: payload("success"),
        });
        fail(&mut s, epoch);
        assert!(s.latest().is_some());
        assert!(s.last_error().is_some());

        s.handle(SessionInput::Disconnect);
        assert!(s.latest().is_none());
        assert!(s.last_error().is_none());
    }

    #[test]
    fn failure_while_connected_starts_from_the_base_delay() {
        let mut s = session();
        let epoch = opened_epoch(&s.handle(SessionInput::Connect));
        s.handle(SessionInput::Opened { epoch });
        let (_, scheduled) = fail(&mut s, epoch);
        assert_eq!(scheduled.unwrap().1, Duration::from_millis(3000));
        assert_eq!(s.reconnect_attempt(), 1);
    }

    #[test]
    fn at_most_one_transport_and_one_timer() {
        #[derive(Clone, Copy)]
        enum Step {
            Connect,
            Disconnect,
            Open,
            Fail,
            FireTimer,
        }
        use Step::*;

        let mut s = session();
        let mut live = 0i32;
        let mut timers = 0i32;
        let mut last_epoch = 0;
        let mut last_timer = 0;

        let script = [
            Connect, Fail, Connect, Fail, FireTimer, Open, Connect, Disconnect, FireTimer, Connect,
            Fail, Disconnect, Disconnect,
        ];

        for step in script {
            let input = match step {
                Connect => SessionInput::Connect,
                Disconnect => SessionInput::Disconnect,
                Open => SessionInput::Opened { epoch: last_epoch },
                Fail => SessionInput::Failed {
                    epoch: last_epoch,
                    error: TransportError::Closed,
                },
                FireTimer => {
                    // A fired timer task is finished whatever the session does with it.
                    if s.has_pending_retry() {
                        timers -= 1;
                    }
                    SessionInput::RetryElapsed { epoch: last_timer }
                }
            };
            for effect in s.handle(input) {
                match effect {
                    Effect::OpenTransport { epoch } => {
                        live += 1;
                        last_epoch = epoch;
                    }
                    Effect::CloseTransport => live -= 1,
                    Effect::ScheduleRetry { epoch, .. } => {
                        timers += 1;
                        last_timer = epoch;
                    }
                    Effect::CancelRetry => timers -= 1,
                    Effect::Notify(_) => {}
                }
                assert!((0..=1).contains(&live), "live transports: {}", live);
                assert!((0..=1).contains(&timers), "pending timers: {}", timers);
            }
        }
        assert_eq!((live, timers), (0, 0));
        assert_eq!(s.state(), ConnectionState::Disconnected);
    }
}
