//! # Status Stream Client
//!
//! [`StatusStreamClient`] is the public face of a status stream: it owns a
//! [`StreamSession`] behind a mutex and carries out the session's effects on the
//! tokio runtime it was created on.
//!
//! - `OpenTransport` spawns a reader task that resolves the endpoint, opens the
//!   transport and feeds its events back into the session.
//! - `ScheduleRetry` spawns a timer task that sleeps and then fires `RetryElapsed`.
//! - `CloseTransport` / `CancelRetry` abort those tasks.
//! - `Notify` is queued and handed to the callbacks once the lock is released,
//!   so callbacks may call back into the client. One thread at a time drains the
//!   queue, which keeps callbacks in the order the session produced them even
//!   when reader tasks and user calls race on a multi-threaded runtime.
//!
//! Tasks only hold a weak reference to the client; once it is dropped they wind
//! down on their own.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::endpoint::EndpointResolver;
use super::error::{ClientError, StreamError, TransportError};
use super::event::{ResourceId, StatusEvent};
use super::session::{Effect, Epoch, Notification, SessionInput, StreamSession};
use super::state::{BackoffPolicy, ConnectionState};
use super::transport::{PushTransport, TransportEvent};
use crate::configs::StreamSettings;

type StatusCallback = Arc<dyn Fn(&StatusEvent) + Send + Sync>;
type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&StreamError) + Send + Sync>;

#[derive(Clone, Default)]
struct Callbacks {
    on_status_update: Option<StatusCallback>,
    on_connection_state_change: Option<StateCallback>,
    on_error: Option<ErrorCallback>,
}

/// Construction options for [`StatusStreamClient`].
///
/// ```no_run
/// use std::time::Duration;
/// use lib_statusstream::streams::ClientOptions;
///
/// let options = ClientOptions::new(42)
///     .auto_connect(true)
///     .max_reconnect_attempts(8)
///     .base_reconnect_delay(Duration::from_secs(1))
///     .on_status_update(|event| println!("{} is {}", event.resource_id, event.status));
/// ```
#[derive(Clone)]
pub struct ClientOptions {
    resource_id: ResourceId,
    auto_connect: bool,
    policy: BackoffPolicy,
    callbacks: Callbacks,
}

impl ClientOptions {
    /// Options for `resource_id` with the default backoff and no callbacks.
    pub fn new(resource_id: impl Into<ResourceId>) -> Self {
        Self {
            resource_id: resource_id.into(),
            auto_connect: false,
            policy: BackoffPolicy::default(),
            callbacks: Callbacks::default(),
        }
    }

    /// Options for `resource_id` taken from loaded settings.
    pub fn from_settings(resource_id: impl Into<ResourceId>, settings: &StreamSettings) -> Self {
        Self::new(resource_id)
            .auto_connect(settings.auto_connect())
            .base_reconnect_delay(settings.base_reconnect_delay())
            .max_reconnect_attempts(settings.max_reconnect_attempts())
            .max_reconnect_delay(settings.max_reconnect_delay())
    }

    /// Connect on creation and disconnect on drop.
    pub fn auto_connect(mut self, enabled: bool) -> Self {
        self.auto_connect = enabled;
        self
    }

    /// Consecutive failures before the client gives up.
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    /// Delay before the first retry.
    pub fn base_reconnect_delay(mut self, delay: Duration) -> Self {
        self.policy.base = delay;
        self
    }

    /// Ceiling for one retry delay; `None` removes it.
    pub fn max_reconnect_delay(mut self, ceiling: Option<Duration>) -> Self {
        self.policy.max_delay = ceiling;
        self
    }

    /// Replaces the whole backoff policy.
    pub fn policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Called with every decoded status.
    pub fn on_status_update<F>(mut self, f: F) -> Self
    where
        F: Fn(&StatusEvent) + Send + Sync + 'static,
    {
        self.callbacks.on_status_update = Some(Arc::new(f));
        self
    }

    /// Called on every state change.
    pub fn on_connection_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.callbacks.on_connection_state_change = Some(Arc::new(f));
        self
    }

    /// Called on every transport failure and once on exhaustion.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.callbacks.on_error = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("resource_id", &self.resource_id)
            .field("auto_connect", &self.auto_connect)
            .field("policy", &self.policy)
            .field("on_status_update", &self.callbacks.on_status_update.is_some())
            .field(
                "on_connection_state_change",
                &self.callbacks.on_connection_state_change.is_some(),
            )
            .field("on_error", &self.callbacks.on_error.is_some())
            .finish()
    }
}

/// Point-in-time view of a client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSnapshot {
    /// Current state.
    pub connection_state: ConnectionState,
    /// Most recently decoded status.
    pub latest_status: Option<StatusEvent>,
    /// Consecutive failures since the last successful open.
    pub reconnect_attempt: u32,
    /// Delay of the most recent retry, or the base delay.
    pub reconnect_delay: Duration,
    /// Most recent failure.
    pub last_error: Option<StreamError>,
    /// Resource being followed.
    pub resource_id: ResourceId,
}

struct Driver {
    session: StreamSession,
    resource: ResourceId,
    reader: Option<(Epoch, JoinHandle<()>)>,
    retry: Option<(Epoch, JoinHandle<()>)>,
    pending: VecDeque<Notification>,
    delivering: bool,
}

impl Driver {
    fn abort_tasks(&mut self) {
        if let Some((_, handle)) = self.reader.take() {
            handle.abort();
        }
        if let Some((_, handle)) = self.retry.take() {
            handle.abort();
        }
    }
}

struct Inner {
    driver: Mutex<Driver>,
    callbacks: Callbacks,
    resolver: Arc<dyn EndpointResolver>,
    transport: Arc<dyn PushTransport>,
    runtime: Handle,
    auto_connect: bool,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Driver> {
        // Callbacks run outside the lock, so a poisoned driver is still consistent.
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(self: &Arc<Self>, input: SessionInput) {
        {
            let mut driver = self.lock();
            if let SessionInput::RetryElapsed { epoch } = input {
                // The firing timer is finishing; forget its handle instead of aborting it.
                if matches!(driver.retry, Some((pending, _)) if pending == epoch) {
                    driver.retry = None;
                }
            }
            let effects = driver.session.handle(input);
            self.execute(&mut driver, effects);
        }
        self.deliver();
    }

    fn execute(self: &Arc<Self>, driver: &mut Driver, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::OpenTransport { epoch } => {
                    if let Some((_, previous)) = driver.reader.take() {
                        previous.abort();
                    }
                    let task = run_reader(Arc::downgrade(self), epoch, driver.resource.clone());
                    driver.reader = Some((epoch, self.runtime.spawn(task)));
                }
                Effect::CloseTransport => {
                    if let Some((epoch, handle)) = driver.reader.take() {
                        tracing::debug!(resource = %driver.resource, epoch, "closing stream transport");
                        handle.abort();
                    }
                }
                Effect::ScheduleRetry { epoch, delay } => {
                    if let Some((_, previous)) = driver.retry.take() {
                        previous.abort();
                    }
                    tracing::warn!(
                        resource = %driver.resource,
                        attempt = driver.session.reconnect_attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "status stream lost, retrying"
                    );
                    let task = run_retry_timer(Arc::downgrade(self), epoch, delay);
                    driver.retry = Some((epoch, self.runtime.spawn(task)));
                }
                Effect::CancelRetry => {
                    if let Some((_, handle)) = driver.retry.take() {
                        handle.abort();
                    }
                }
                Effect::Notify(notification) => {
                    match &notification {
                        Notification::StateChanged(state) => {
                            tracing::info!(resource = %driver.resource, state = %state, "connection state changed");
                        }
                        Notification::Error(error @ StreamError::Exhausted { .. }) => {
                            tracing::error!(resource = %driver.resource, %error, "giving up on status stream");
                        }
                        Notification::Error(error) => {
                            tracing::warn!(resource = %driver.resource, %error, "status stream failure");
                        }
                        Notification::StatusUpdated(_) => {}
                    }
                    driver.pending.push_back(notification);
                }
            }
        }
    }

    /// Drains queued notifications unless another thread is already doing so.
    /// The lock is taken per item and never held while a callback runs.
    fn deliver(&self) {
        {
            let mut driver = self.lock();
            if driver.delivering || driver.pending.is_empty() {
                return;
            }
            driver.delivering = true;
        }

        let mut delivery = Delivery {
            inner: self,
            finished: false,
        };
        loop {
            let next = {
                let mut driver = self.lock();
                match driver.pending.pop_front() {
                    Some(notification) => notification,
                    None => {
                        driver.delivering = false;
                        delivery.finished = true;
                        return;
                    }
                }
            };
            self.notify(next);
        }
    }

    fn notify(&self, notification: Notification) {
        let callbacks = &self.callbacks;
        match notification {
            Notification::StateChanged(state) => {
                if let Some(cb) = &callbacks.on_connection_state_change {
                    cb(state);
                }
            }
            Notification::StatusUpdated(event) => {
                if let Some(cb) = &callbacks.on_status_update {
                    cb(&event);
                }
            }
            Notification::Error(error) => {
                if let Some(cb) = &callbacks.on_error {
                    cb(&error);
                }
            }
        }
    }
}

/// Releases the delivery slot if a callback panics mid-drain.
struct Delivery<'a> {
    inner: &'a Inner,
    finished: bool,
}

impl Drop for Delivery<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.lock().delivering = false;
        }
    }
}

/// Feeds `input` to the client if it still exists.
fn report(inner: &Weak<Inner>, input: SessionInput) -> bool {
    match inner.upgrade() {
        Some(inner) => {
            inner.dispatch(input);
            true
        }
        None => false,
    }
}

async fn run_reader(inner: Weak<Inner>, epoch: Epoch, resource: ResourceId) {
    let Some((resolver, transport)) = inner
        .upgrade()
        .map(|i| (Arc::clone(&i.resolver), Arc::clone(&i.transport)))
    else {
        return;
    };

    let endpoint = match resolver.resolve(&resource).await {
        Ok(endpoint) => endpoint,
        Err(error) => {
            report(&inner, SessionInput::Failed { epoch, error });
            return;
        }
    };
    tracing::info!(%resource, epoch, %endpoint, "opening status stream");

    let mut events = match transport.open(&endpoint) {
        Ok(events) => events,
        Err(error) => {
            report(&inner, SessionInput::Failed { epoch, error });
            return;
        }
    };

    while let Some(item) = events.next().await {
        let input = match item {
            Ok(TransportEvent::Opened) => SessionInput::Opened { epoch },
            Ok(TransportEvent::Message { event, data, .. }) => {
                tracing::trace!(%resource, epoch, event = %event, "stream event");
                SessionInput::Message { epoch, event, data }
            }
            Err(error) => {
                report(&inner, SessionInput::Failed { epoch, error });
                return;
            }
        };
        if !report(&inner, input) {
            return;
        }
    }
    report(
        &inner,
        SessionInput::Failed {
            epoch,
            error: TransportError::Closed,
        },
    );
}

async fn run_retry_timer(inner: Weak<Inner>, epoch: Epoch, delay: Duration) {
    tokio::time::sleep(delay).await;
    report(&inner, SessionInput::RetryElapsed { epoch });
}

/// Resilient client for one resource's status stream.
///
/// Must be created inside a tokio runtime. All methods are synchronous and
/// cheap: they update the session and spawn or abort tasks.
pub struct StatusStreamClient {
    inner: Arc<Inner>,
}

impl StatusStreamClient {
    /// Creates a client. Connects immediately when `auto_connect` is set.
    ///
    /// # Errors
    /// [`ClientError::NoRuntime`] when called outside a tokio runtime.
    pub fn new(
        options: ClientOptions,
        resolver: Arc<dyn EndpointResolver>,
        transport: Arc<dyn PushTransport>,
    ) -> Result<Self, ClientError> {
        let runtime = Handle::try_current().map_err(|_| ClientError::NoRuntime)?;
        let ClientOptions {
            resource_id,
            auto_connect,
            policy,
            callbacks,
        } = options;

        let inner = Arc::new(Inner {
            driver: Mutex::new(Driver {
                session: StreamSession::new(policy),
                resource: resource_id,
                reader: None,
                retry: None,
                pending: VecDeque::new(),
                delivering: false,
            }),
            callbacks,
            resolver,
            transport,
            runtime,
            auto_connect,
        });

        let client = Self { inner };
        if auto_connect {
            client.connect();
        }
        Ok(client)
    }

    /// Opens the stream, replacing any live transport or pending retry and
    /// starting over with fresh counters. Also recovers from `Error`.
    pub fn connect(&self) {
        self.inner.dispatch(SessionInput::Connect);
    }

    /// Closes the stream and stops retrying. Safe to call in any state.
    pub fn disconnect(&self) {
        self.inner.dispatch(SessionInput::Disconnect);
    }

    /// Switches to another resource.
    ///
    /// With auto-connect enabled, or while a session is active, the old stream is
    /// torn down and a new one opened for `resource_id`. Otherwise the id is only
    /// recorded for the next `connect()`.
    pub fn set_resource(&self, resource_id: impl Into<ResourceId>) {
        let resource_id = resource_id.into();
        let restart = {
            let mut driver = self.inner.lock();
            if driver.resource == resource_id {
                return;
            }
            tracing::info!(from = %driver.resource, to = %resource_id, "switching status stream resource");
            driver.resource = resource_id;
            self.inner.auto_connect || driver.session.state() != ConnectionState::Disconnected
        };
        if restart {
            self.inner.dispatch(SessionInput::Disconnect);
            self.inner.dispatch(SessionInput::Connect);
        }
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock().session.state()
    }

    /// Whether the stream is open.
    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// Whether a transport is being opened.
    pub fn is_connecting(&self) -> bool {
        self.connection_state().is_connecting()
    }

    /// Whether a retry is pending.
    pub fn is_reconnecting(&self) -> bool {
        self.connection_state().is_reconnecting()
    }

    /// Most recently decoded status.
    pub fn latest_status(&self) -> Option<StatusEvent> {
        self.inner.lock().session.latest().cloned()
    }

    /// Consecutive failures since the last successful open.
    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.lock().session.reconnect_attempt()
    }

    /// Delay of the most recent retry, or the base delay.
    pub fn reconnect_delay(&self) -> Duration {
        self.inner.lock().session.reconnect_delay()
    }

    /// Most recent failure.
    pub fn last_error(&self) -> Option<StreamError> {
        self.inner.lock().session.last_error().cloned()
    }

    /// Resource being followed.
    pub fn resource_id(&self) -> ResourceId {
        self.inner.lock().resource.clone()
    }

    /// Everything above, read under one lock.
    pub fn snapshot(&self) -> ClientSnapshot {
        let driver = self.inner.lock();
        ClientSnapshot {
            connection_state: driver.session.state(),
            latest_status: driver.session.latest().cloned(),
            reconnect_attempt: driver.session.reconnect_attempt(),
            reconnect_delay: driver.session.reconnect_delay(),
            last_error: driver.session.last_error().cloned(),
            resource_id: driver.resource.clone(),
        }
    }
}

impl fmt::Debug for StatusStreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusStreamClient")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl Drop for StatusStreamClient {
    fn drop(&mut self) {
        if self.inner.auto_connect {
            self.inner.dispatch(SessionInput::Disconnect);
        } else {
            self.inner.lock().abort_tasks();
        }
    }
}
