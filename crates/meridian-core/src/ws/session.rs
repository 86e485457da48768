//! Reconnecting streaming session manager.
//!
//! Wraps a [`Connector`]/[`DuplexTransport`] pair and a vendor
//! [`StreamCodec`] into a facade that behaves like a single always-available
//! authenticated channel. A background tokio task owns the connection state
//! machine:
//!
//! ```text
//! Disconnected ─connect()─► Connecting ─opened─► Authenticating ─ok─► Connected
//!       ▲                       ▲                    │ fatal              │ closed/error
//!       │                       └──── delay ─── Reconnecting ◄───────────┘
//!       │                                            │ attempts exhausted
//!       └───────────── disconnect() ───────────► Terminated
//! ```
//!
//! Immediately after each successful authentication the *full* set of active
//! subscription keys is replayed (never a delta), then the reconnect counter
//! resets. Fatal credential rejections are never retried. Subscriber
//! callbacks are isolated per-handler: a panic surfaces as a
//! [`SessionEvent::Warning`] and never disturbs sibling handlers or the
//! receive loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::ReconnectPolicy;
use crate::error::MeridianError;
use crate::ws::registry::{ItemCallback, StreamKey, SubscriptionHandle, SubscriptionRegistry};
use crate::ws::transport::{Connector, DuplexTransport, Frame};

/// How long to wait for the server's authentication response.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between codec-supplied keepalive frames, when the codec uses any.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Resolved credentials for stream authentication.
#[derive(Debug, Clone)]
pub struct StreamAuth {
    pub key: String,
    pub secret: String,
}

/// Vendor-specific frame encoding for one stream endpoint.
///
/// Implementations translate between the session's logical operations and
/// the wire format; the session manager itself is protocol-agnostic.
pub trait StreamCodec: Send + Sync + 'static {
    /// The item type delivered to subscribers.
    type Item: Send + 'static;

    /// Frame sent immediately after the socket opens.
    fn auth_frame(&self, auth: &StreamAuth) -> String;

    /// Frame subscribing to `keys`.
    fn subscribe_frame(&self, keys: &[StreamKey]) -> String;

    /// Frame unsubscribing from `keys`.
    fn unsubscribe_frame(&self, keys: &[StreamKey]) -> String;

    /// Decode one text frame into zero or more messages.
    fn parse(&self, text: &str) -> Vec<StreamMessage<Self::Item>>;

    /// Optional application-level keepalive frame.
    fn ping_frame(&self) -> Option<String> {
        None
    }
}

/// One decoded message from the stream.
#[derive(Debug)]
pub enum StreamMessage<T> {
    /// A data item for a logical channel.
    Item { key: StreamKey, item: T },
    /// Authentication succeeded.
    AuthOk { message: String },
    /// Authentication was rejected with a vendor fault code.
    AuthFailed { code: u16, message: String },
    /// Subscription ack or other housekeeping — logged at debug only.
    Control(String),
    /// An error the server reported over the channel. Surfaced on the error
    /// event; does not by itself force a reconnect.
    VendorError { code: u16, message: String },
    /// A frame the codec could not make sense of — surfaced as a warning,
    /// dispatch continues.
    Malformed(String),
}

/// Result of an authentication exchange, surfaced from `connect()`.
#[derive(Debug, Clone)]
pub struct AuthStatus {
    pub authorized: bool,
    pub message: String,
}

/// Lifecycle event emitted by the session.
#[derive(Debug)]
pub enum SessionEvent {
    /// The underlying socket opened (also fires on every reconnect).
    Opened,
    /// Authentication completed on a (re)connected socket.
    Authenticated { status: AuthStatus },
    /// The underlying socket closed.
    Closed { code: Option<u16> },
    /// Recoverable oddity: malformed frame, panicking subscriber callback.
    Warning(String),
    /// Transport fault, server-reported error, or terminal failure.
    Error(MeridianError),
}

/// Receiver half of the session event channel.
pub type SessionEventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Session lifecycle states. Written only by the session task; readable by
/// callers through [`StreamSession::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Disconnected = 0,
    Connecting = 1,
    Authenticating = 2,
    Connected = 3,
    Reconnecting = 4,
    Terminated = 5,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Authenticating,
            3 => Self::Connected,
            4 => Self::Reconnecting,
            5 => Self::Terminated,
            _ => Self::Disconnected,
        }
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(SessionState::Disconnected as u8))
    }

    fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }
}

/// Subscription delta pushed to the session task while connected.
enum Command {
    Subscribe(Vec<StreamKey>),
    Unsubscribe(Vec<StreamKey>),
}

/// Everything the session task needs; consumed on `connect()`.
struct Startup<C: StreamCodec, K> {
    connector: K,
    codec: C,
    auth: StreamAuth,
    policy: ReconnectPolicy,
    command_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    shutdown_rx: watch::Receiver<bool>,
}

/// A reconnecting, resubscribing streaming session.
pub struct StreamSession<C: StreamCodec, K: Connector> {
    registry: Arc<SubscriptionRegistry<C::Item>>,
    state: Arc<StateCell>,
    command_tx: mpsc::UnboundedSender<Command>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<tokio::task::JoinHandle<()>>,
    startup: Option<Startup<C, K>>,
}

impl<C, K> StreamSession<C, K>
where
    C: StreamCodec,
    K: Connector + 'static,
    K::Transport: 'static,
{
    /// Create a session around `connector`/`codec`. Nothing connects until
    /// [`connect`](Self::connect) is called; subscriptions registered before
    /// then are sent during the first post-auth replay.
    pub fn new(
        connector: K,
        codec: C,
        auth: StreamAuth,
        policy: ReconnectPolicy,
    ) -> (Self, SessionEventReceiver) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let session = Self {
            registry: Arc::new(SubscriptionRegistry::new()),
            state: Arc::new(StateCell::new()),
            command_tx,
            shutdown_tx,
            task: None,
            startup: Some(Startup {
                connector,
                codec,
                auth,
                policy,
                command_rx,
                event_tx,
                shutdown_rx,
            }),
        };
        (session, event_rx)
    }

    /// Spawn the session task and wait for the first authentication outcome.
    ///
    /// Transient connect/auth failures are retried under the reconnect
    /// policy before this returns; only a fatal credential rejection or an
    /// exhausted attempt budget produces an error.
    pub async fn connect(&mut self) -> Result<AuthStatus, MeridianError> {
        let startup = self.startup.take().ok_or_else(|| {
            MeridianError::InvalidRequest("session already connected".into())
        })?;

        let (auth_tx, auth_rx) = oneshot::channel();
        let registry = Arc::clone(&self.registry);
        let state = Arc::clone(&self.state);
        self.task = Some(tokio::spawn(run_session(startup, registry, state, auth_tx)));

        match auth_rx.await {
            Ok(result) => result,
            Err(_) => Err(MeridianError::Terminated(
                "session task exited before authentication".into(),
            )),
        }
    }

    /// Register `callback` for `keys` and subscribe to any newly-live keys.
    ///
    /// Fails immediately once the session is terminated.
    pub fn subscribe(
        &self,
        keys: Vec<StreamKey>,
        callback: ItemCallback<C::Item>,
    ) -> Result<SubscriptionHandle, MeridianError> {
        if self.state.get() == SessionState::Terminated {
            return Err(MeridianError::Terminated("session is terminated".into()));
        }
        let (handle, newly_live) = self.registry.add(keys, callback);
        if !newly_live.is_empty() {
            let _ = self.command_tx.send(Command::Subscribe(newly_live));
        }
        Ok(handle)
    }

    /// Drop the handle's registrations and unsubscribe keys nobody else
    /// still holds.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let removed = self.registry.remove(&handle);
        if !removed.is_empty() {
            let _ = self.command_tx.send(Command::Unsubscribe(removed));
        }
    }

    /// Current lifecycle state (for status queries only).
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Terminate the session, cancelling any in-flight backoff wait.
    pub async fn disconnect(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.startup = None;
        self.state.set(SessionState::Terminated);
    }
}

impl<C: StreamCodec, K: Connector> Drop for StreamSession<C, K> {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

enum AuthOutcome {
    Authorized(AuthStatus),
    Fatal(String),
    Transient(MeridianError),
}

enum LoopExit {
    Shutdown,
    Disconnected { code: Option<u16>, reason: String },
}

enum RetryDecision {
    Retry,
    Stop(MeridianError),
}

type FirstAuth = Option<oneshot::Sender<Result<AuthStatus, MeridianError>>>;

async fn run_session<C, K>(
    startup: Startup<C, K>,
    registry: Arc<SubscriptionRegistry<C::Item>>,
    state: Arc<StateCell>,
    auth_tx: oneshot::Sender<Result<AuthStatus, MeridianError>>,
) where
    C: StreamCodec,
    K: Connector,
{
    let Startup {
        connector,
        codec,
        auth,
        policy,
        mut command_rx,
        event_tx,
        mut shutdown_rx,
    } = startup;

    let mut backoff = Backoff::new(policy.min_delay(), policy.max_delay());
    let mut first_auth: FirstAuth = Some(auth_tx);

    loop {
        if *shutdown_rx.borrow() {
            state.set(SessionState::Terminated);
            notify_terminal(&mut first_auth, MeridianError::Cancelled);
            return;
        }

        state.set(SessionState::Connecting);
        let mut transport = match connector.connect().await {
            Ok(transport) => transport,
            Err(err) => {
                warn!("stream connect failed: {err}");
                match pause_before_retry(&mut backoff, &policy, &mut shutdown_rx, &event_tx, &state, &err)
                    .await
                {
                    RetryDecision::Retry => continue,
                    RetryDecision::Stop(terminal) => {
                        notify_terminal(&mut first_auth, terminal);
                        return;
                    }
                }
            }
        };
        let _ = event_tx.send(SessionEvent::Opened);
        state.set(SessionState::Authenticating);

        match authenticate(&mut transport, &codec, &auth, &policy).await {
            AuthOutcome::Authorized(status) => {
                // Deltas queued while offline are superseded by the full
                // replay below; drop them so the server sees the set once.
                while command_rx.try_recv().is_ok() {}

                let keys = registry.active_keys();
                if !keys.is_empty() {
                    if let Err(err) = transport.send(codec.subscribe_frame(&keys)).await {
                        warn!("subscription replay failed: {err}");
                        match pause_before_retry(
                            &mut backoff,
                            &policy,
                            &mut shutdown_rx,
                            &event_tx,
                            &state,
                            &err,
                        )
                        .await
                        {
                            RetryDecision::Retry => continue,
                            RetryDecision::Stop(terminal) => {
                                notify_terminal(&mut first_auth, terminal);
                                return;
                            }
                        }
                    }
                    debug!("replayed {} subscription(s)", keys.len());
                }

                backoff.reset();
                state.set(SessionState::Connected);
                info!("stream authenticated: {}", status.message);
                let _ = event_tx.send(SessionEvent::Authenticated {
                    status: status.clone(),
                });
                if let Some(tx) = first_auth.take() {
                    let _ = tx.send(Ok(status));
                }
            }
            AuthOutcome::Fatal(message) => {
                warn!("authentication rejected: {message}");
                let _ = event_tx.send(SessionEvent::Error(MeridianError::Auth(message.clone())));
                state.set(SessionState::Terminated);
                notify_terminal(&mut first_auth, MeridianError::Auth(message));
                return;
            }
            AuthOutcome::Transient(err) => {
                warn!("authentication attempt failed: {err}");
                match pause_before_retry(&mut backoff, &policy, &mut shutdown_rx, &event_tx, &state, &err)
                    .await
                {
                    RetryDecision::Retry => continue,
                    RetryDecision::Stop(terminal) => {
                        notify_terminal(&mut first_auth, terminal);
                        return;
                    }
                }
            }
        }

        match read_loop(
            &mut transport,
            &codec,
            &registry,
            &event_tx,
            &mut command_rx,
            &mut shutdown_rx,
        )
        .await
        {
            LoopExit::Shutdown => {
                transport.close().await;
                state.set(SessionState::Terminated);
                info!("stream session shut down");
                return;
            }
            LoopExit::Disconnected { code, reason } => {
                let _ = event_tx.send(SessionEvent::Closed { code });
                warn!("stream disconnected: {reason}");
                let err = MeridianError::WebSocket(reason);
                match pause_before_retry(&mut backoff, &policy, &mut shutdown_rx, &event_tx, &state, &err)
                    .await
                {
                    RetryDecision::Retry => continue,
                    RetryDecision::Stop(terminal) => {
                        notify_terminal(&mut first_auth, terminal);
                        return;
                    }
                }
            }
        }
    }
}

/// Send the authentication frame and wait for the server's verdict.
async fn authenticate<T, C>(
    transport: &mut T,
    codec: &C,
    auth: &StreamAuth,
    policy: &ReconnectPolicy,
) -> AuthOutcome
where
    T: DuplexTransport,
    C: StreamCodec,
{
    if let Err(err) = transport.send(codec.auth_frame(auth)).await {
        return AuthOutcome::Transient(err);
    }

    let verdict = tokio::time::timeout(AUTH_TIMEOUT, async {
        loop {
            match transport.next_frame().await {
                Some(Ok(Frame::Text(text))) => {
                    for msg in codec.parse(&text) {
                        match msg {
                            StreamMessage::AuthOk { message } => {
                                return AuthOutcome::Authorized(AuthStatus {
                                    authorized: true,
                                    message,
                                });
                            }
                            StreamMessage::AuthFailed { code, message } => {
                                return if policy.retryable_fault_codes.contains(&code) {
                                    AuthOutcome::Transient(MeridianError::WebSocket(format!(
                                        "auth deferred (code {code}): {message}"
                                    )))
                                } else {
                                    AuthOutcome::Fatal(message)
                                };
                            }
                            // Items/control frames before the auth verdict
                            // are dropped.
                            _ => {}
                        }
                    }
                }
                Some(Ok(Frame::Binary(_))) => {}
                Some(Ok(Frame::Close(code))) => {
                    return AuthOutcome::Transient(MeridianError::WebSocket(format!(
                        "closed during authentication (code {code:?})"
                    )));
                }
                Some(Err(err)) => return AuthOutcome::Transient(err),
                None => {
                    return AuthOutcome::Transient(MeridianError::WebSocket(
                        "stream ended during authentication".into(),
                    ));
                }
            }
        }
    })
    .await;

    match verdict {
        Ok(outcome) => outcome,
        Err(_) => AuthOutcome::Transient(MeridianError::Timeout(AUTH_TIMEOUT)),
    }
}

/// Pump frames and subscription commands until the connection drops or the
/// session is shut down.
async fn read_loop<T, C>(
    transport: &mut T,
    codec: &C,
    registry: &SubscriptionRegistry<C::Item>,
    event_tx: &mpsc::UnboundedSender<SessionEvent>,
    command_rx: &mut mpsc::UnboundedReceiver<Command>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> LoopExit
where
    T: DuplexTransport,
    C: StreamCodec,
{
    let ping_frame = codec.ping_frame();
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await; // skip the immediate first tick

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return LoopExit::Shutdown;
                }
            }

            frame = transport.next_frame() => {
                match frame {
                    Some(Ok(Frame::Text(text))) => {
                        dispatch_frame(codec, registry, event_tx, &text);
                    }
                    Some(Ok(Frame::Binary(_))) => {
                        debug!("ignoring binary frame");
                    }
                    Some(Ok(Frame::Close(code))) => {
                        return LoopExit::Disconnected {
                            code,
                            reason: format!("close frame received (code {code:?})"),
                        };
                    }
                    Some(Err(err)) => {
                        let reason = err.to_string();
                        let _ = event_tx.send(SessionEvent::Error(err));
                        return LoopExit::Disconnected { code: None, reason };
                    }
                    None => {
                        return LoopExit::Disconnected {
                            code: None,
                            reason: "stream ended".into(),
                        };
                    }
                }
            }

            Some(command) = command_rx.recv() => {
                let frame = match command {
                    Command::Subscribe(keys) => codec.subscribe_frame(&keys),
                    Command::Unsubscribe(keys) => codec.unsubscribe_frame(&keys),
                };
                if let Err(err) = transport.send(frame).await {
                    return LoopExit::Disconnected {
                        code: None,
                        reason: format!("subscription update send failed: {err}"),
                    };
                }
            }

            _ = ping.tick(), if ping_frame.is_some() => {
                if let Some(ref frame) = ping_frame {
                    if let Err(err) = transport.send(frame.clone()).await {
                        return LoopExit::Disconnected {
                            code: None,
                            reason: format!("ping send failed: {err}"),
                        };
                    }
                }
            }
        }
    }
}

/// Decode one frame and route each contained message.
fn dispatch_frame<C: StreamCodec>(
    codec: &C,
    registry: &SubscriptionRegistry<C::Item>,
    event_tx: &mpsc::UnboundedSender<SessionEvent>,
    text: &str,
) {
    for msg in codec.parse(text) {
        match msg {
            StreamMessage::Item { key, item } => {
                let panics = registry.deliver(&key, &item);
                if panics > 0 {
                    let _ = event_tx.send(SessionEvent::Warning(format!(
                        "{panics} subscriber callback(s) panicked on {key}"
                    )));
                }
            }
            StreamMessage::VendorError { code, message } => {
                let _ = event_tx.send(SessionEvent::Error(MeridianError::Http {
                    status: code,
                    body: None,
                    raw: message,
                }));
            }
            StreamMessage::Malformed(detail) => {
                let _ = event_tx.send(SessionEvent::Warning(detail));
            }
            StreamMessage::Control(detail) => {
                debug!("control message: {detail}");
            }
            StreamMessage::AuthOk { .. } | StreamMessage::AuthFailed { .. } => {
                debug!("late auth frame ignored");
            }
        }
    }
}

/// Wait out the backoff delay, or give up when the attempt budget is spent.
async fn pause_before_retry(
    backoff: &mut Backoff,
    policy: &ReconnectPolicy,
    shutdown_rx: &mut watch::Receiver<bool>,
    event_tx: &mpsc::UnboundedSender<SessionEvent>,
    state: &StateCell,
    cause: &MeridianError,
) -> RetryDecision {
    if backoff.attempt() >= policy.max_attempts {
        let message = format!(
            "reconnect attempts exhausted after {} attempts: {cause}",
            policy.max_attempts
        );
        let _ = event_tx.send(SessionEvent::Error(MeridianError::Terminated(message.clone())));
        state.set(SessionState::Terminated);
        return RetryDecision::Stop(MeridianError::Terminated(message));
    }

    state.set(SessionState::Reconnecting);
    let delay = backoff.next_delay();
    debug!("reconnecting in {delay:?} (attempt {})", backoff.attempt());

    tokio::select! {
        _ = tokio::time::sleep(delay) => RetryDecision::Retry,
        changed = shutdown_rx.changed() => {
            if changed.is_err() || *shutdown_rx.borrow() {
                state.set(SessionState::Terminated);
                RetryDecision::Stop(MeridianError::Cancelled)
            } else {
                RetryDecision::Retry
            }
        }
    }
}

fn notify_terminal(first_auth: &mut FirstAuth, err: MeridianError) {
    if let Some(tx) = first_auth.take() {
        let _ = tx.send(Err(err));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use crate::types::MessageKind;

    // -- scripted transport --------------------------------------------------

    struct MockTransport {
        incoming: mpsc::UnboundedReceiver<Frame>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl DuplexTransport for MockTransport {
        async fn send(&mut self, text: String) -> Result<(), MeridianError> {
            self.sent.lock().unwrap().push(text);
            Ok(())
        }

        async fn next_frame(&mut self) -> Option<Result<Frame, MeridianError>> {
            self.incoming.recv().await.map(Ok)
        }

        async fn close(&mut self) {}
    }

    struct MockConnector {
        transports: Mutex<VecDeque<MockTransport>>,
        connects: AtomicUsize,
    }

    impl MockConnector {
        fn new(transports: Vec<MockTransport>) -> Self {
            Self {
                transports: Mutex::new(transports.into()),
                connects: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Transport = MockTransport;

        async fn connect(&self) -> Result<MockTransport, MeridianError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.transports
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| MeridianError::Network("connection refused".into()))
        }
    }

    fn mock_transport() -> (MockTransport, mpsc::UnboundedSender<Frame>, Arc<Mutex<Vec<String>>>) {
        let (feed, incoming) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            MockTransport {
                incoming,
                sent: Arc::clone(&sent),
            },
            feed,
            sent,
        )
    }

    // -- line-oriented test codec --------------------------------------------

    struct TestCodec;

    impl StreamCodec for TestCodec {
        type Item = String;

        fn auth_frame(&self, auth: &StreamAuth) -> String {
            format!("AUTH {}", auth.key)
        }

        fn subscribe_frame(&self, keys: &[StreamKey]) -> String {
            let mut names: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
            names.sort();
            format!("SUB {}", names.join(","))
        }

        fn unsubscribe_frame(&self, keys: &[StreamKey]) -> String {
            let mut names: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
            names.sort();
            format!("UNSUB {}", names.join(","))
        }

        fn parse(&self, text: &str) -> Vec<StreamMessage<String>> {
            if text == "AUTH_OK" {
                vec![StreamMessage::AuthOk {
                    message: "authenticated".into(),
                }]
            } else if let Some(code) = text.strip_prefix("AUTH_FAIL ") {
                vec![StreamMessage::AuthFailed {
                    code: code.parse().unwrap_or(0),
                    message: "denied".into(),
                }]
            } else if let Some(rest) = text.strip_prefix("ITEM ") {
                let (symbol, payload) = rest.split_once(' ').unwrap_or((rest, ""));
                vec![StreamMessage::Item {
                    key: StreamKey::new(symbol, MessageKind::Trade),
                    item: payload.to_string(),
                }]
            } else {
                vec![StreamMessage::Malformed(format!("unrecognized frame: {text}"))]
            }
        }
    }

    // -- helpers -------------------------------------------------------------

    fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            min_delay_ms: 1,
            max_delay_ms: 5,
            max_attempts,
            retryable_fault_codes: vec![406, 429],
        }
    }

    fn auth() -> StreamAuth {
        StreamAuth {
            key: "test-key".into(),
            secret: "test-secret".into(),
        }
    }

    fn trade_key(symbol: &str) -> StreamKey {
        StreamKey::new(symbol, MessageKind::Trade)
    }

    fn noop() -> ItemCallback<String> {
        Arc::new(|_key, _item| {})
    }

    async fn next_event(events: &mut SessionEventReceiver) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed")
    }

    // -- tests ---------------------------------------------------------------

    #[tokio::test]
    async fn replays_full_subscription_set_after_reconnect() {
        let (t1, feed1, _sent1) = mock_transport();
        let (t2, feed2, sent2) = mock_transport();
        let connector = MockConnector::new(vec![t1, t2]);

        let (mut session, mut events) =
            StreamSession::new(connector, TestCodec, auth(), fast_policy(5));

        session
            .subscribe(vec![trade_key("AAPL"), trade_key("MSFT")], noop())
            .unwrap();

        feed1.send(Frame::Text("AUTH_OK".into())).unwrap();
        feed2.send(Frame::Text("AUTH_OK".into())).unwrap();

        let status = session.connect().await.unwrap();
        assert!(status.authorized);

        // Kill the first connection; the session must reconnect and replay.
        drop(feed1);

        // Wait for the second Authenticated event (the first connect's is
        // still queued ahead of it).
        let mut authenticated = 0;
        while authenticated < 2 {
            if let SessionEvent::Authenticated { .. } = next_event(&mut events).await {
                authenticated += 1;
            }
        }

        let replayed = sent2.lock().unwrap().clone();
        let subs: Vec<&String> = replayed.iter().filter(|f| f.starts_with("SUB ")).collect();
        // Exactly one subscribe frame, carrying the complete set.
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0], "SUB trades:AAPL,trades:MSFT");
        assert_eq!(session.state(), SessionState::Connected);

        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Terminated);
        drop(feed2);
    }

    #[tokio::test]
    async fn fatal_auth_rejection_is_never_retried() {
        let (t1, feed1, _sent) = mock_transport();
        let connector = MockConnector::new(vec![t1]);

        let (mut session, _events) =
            StreamSession::new(connector, TestCodec, auth(), fast_policy(5));

        feed1.send(Frame::Text("AUTH_FAIL 401".into())).unwrap();

        let result = session.connect().await;
        assert!(matches!(result, Err(MeridianError::Auth(_))));
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[tokio::test]
    async fn retryable_auth_code_reconnects_and_succeeds() {
        let (t1, feed1, _s1) = mock_transport();
        let (t2, feed2, _s2) = mock_transport();
        let connector = MockConnector::new(vec![t1, t2]);

        let (mut session, _events) =
            StreamSession::new(connector, TestCodec, auth(), fast_policy(5));

        // 406 (connection limit) is in the retryable set.
        feed1.send(Frame::Text("AUTH_FAIL 406".into())).unwrap();
        feed2.send(Frame::Text("AUTH_OK".into())).unwrap();

        let status = session.connect().await.unwrap();
        assert!(status.authorized);

        session.disconnect().await;
        drop(feed2);
    }

    #[tokio::test]
    async fn exhausted_attempts_terminate_with_one_error_event() {
        let connector = MockConnector::new(vec![]);

        let (mut session, mut events) =
            StreamSession::new(connector, TestCodec, auth(), fast_policy(2));

        let result = session.connect().await;
        assert!(matches!(result, Err(MeridianError::Terminated(_))));
        assert_eq!(session.state(), SessionState::Terminated);

        let mut terminal_errors = 0;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(50), events.recv()).await
        {
            if let SessionEvent::Error(MeridianError::Terminated(_)) = event {
                terminal_errors += 1;
            }
        }
        assert_eq!(terminal_errors, 1);

        // Further calls fail immediately rather than silently doing nothing.
        let err = session.subscribe(vec![trade_key("AAPL")], noop());
        assert!(matches!(err, Err(MeridianError::Terminated(_))));
    }

    #[tokio::test]
    async fn panicking_subscriber_is_isolated_as_warning() {
        let (t1, feed1, _sent) = mock_transport();
        let connector = MockConnector::new(vec![t1]);

        let (mut session, mut events) =
            StreamSession::new(connector, TestCodec, auth(), fast_policy(5));

        let delivered: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);

        session
            .subscribe(
                vec![trade_key("AAPL")],
                Arc::new(|_key, _item: &String| panic!("subscriber bug")),
            )
            .unwrap();
        session
            .subscribe(
                vec![trade_key("AAPL")],
                Arc::new(move |_key, item: &String| sink.lock().unwrap().push(item.clone())),
            )
            .unwrap();

        feed1.send(Frame::Text("AUTH_OK".into())).unwrap();
        session.connect().await.unwrap();

        feed1.send(Frame::Text("ITEM AAPL first".into())).unwrap();
        loop {
            if let SessionEvent::Warning(detail) = next_event(&mut events).await {
                assert!(detail.contains("panicked"));
                break;
            }
        }

        // The sibling handler still received the item and the loop survives.
        assert_eq!(delivered.lock().unwrap().clone(), vec!["first".to_string()]);
        feed1.send(Frame::Text("ITEM AAPL second".into())).unwrap();
        loop {
            if let SessionEvent::Warning(_) = next_event(&mut events).await {
                break;
            }
        }
        assert_eq!(
            delivered.lock().unwrap().clone(),
            vec!["first".to_string(), "second".to_string()]
        );
        assert_eq!(session.state(), SessionState::Connected);

        session.disconnect().await;
        drop(feed1);
    }

    #[tokio::test]
    async fn malformed_frame_warns_without_reconnecting() {
        let (t1, feed1, _sent) = mock_transport();
        let connector = MockConnector::new(vec![t1]);

        let (mut session, mut events) =
            StreamSession::new(connector, TestCodec, auth(), fast_policy(5));

        feed1.send(Frame::Text("AUTH_OK".into())).unwrap();
        session.connect().await.unwrap();

        feed1.send(Frame::Text("garbage?!".into())).unwrap();
        loop {
            if let SessionEvent::Warning(detail) = next_event(&mut events).await {
                assert!(detail.contains("unrecognized"));
                break;
            }
        }
        assert_eq!(session.state(), SessionState::Connected);

        session.disconnect().await;
        drop(feed1);
    }

    #[tokio::test]
    async fn unsubscribe_sends_delta_only_for_fully_removed_keys() {
        let (t1, feed1, sent1) = mock_transport();
        let connector = MockConnector::new(vec![t1]);

        let (mut session, _events) =
            StreamSession::new(connector, TestCodec, auth(), fast_policy(5));

        let h1 = session.subscribe(vec![trade_key("AAPL")], noop()).unwrap();
        let h2 = session.subscribe(vec![trade_key("AAPL")], noop()).unwrap();

        feed1.send(Frame::Text("AUTH_OK".into())).unwrap();
        session.connect().await.unwrap();

        // First removal leaves the other handle live: no frame.
        session.unsubscribe(h1);
        // Second removal frees the key: exactly one UNSUB frame.
        session.unsubscribe(h2);

        // Give the otherwise idle read loop a moment to drain the commands.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let frames = sent1.lock().unwrap().clone();
        let unsubs: Vec<&String> = frames.iter().filter(|f| f.starts_with("UNSUB ")).collect();
        assert_eq!(unsubs.len(), 1);
        assert_eq!(unsubs[0], "UNSUB trades:AAPL");

        session.disconnect().await;
        drop(feed1);
    }
}
