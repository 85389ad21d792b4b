//! Gateway session machine
//!
//! [`GatewaySession::spawn`] starts one control task that owns the
//! [`Session`] and the current link. Everything that happens to the session
//! reaches that task as a message:
//!
//! - caller commands (connect, disconnect, outbound commands) on the command
//!   channel
//! - frames, closes and link errors from the reader task, heartbeat ticks,
//!   finished connection attempts and start permits on one ordered inbound
//!   queue
//!
//! Every spawned helper is tagged with the link epoch it was started for;
//! messages from an older epoch are dropped, so a torn-down link can never
//! mutate the session.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use conduit_common::error::ErrorClassification;
use conduit_common::resilience::{BackoffStrategy, Jitter, RetryConfig};
use conduit_domain::constants::{CLOSE_NORMAL, CLOSE_RESUMABLE};
use conduit_domain::{
    CloseCode, CloseDisposition, ConduitError, GatewayConfig, GatewayFrame, Hello, Identify,
    OpCode, Ready, Result, Resume, SessionState, Transition,
};
use rand::Rng;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::ports::{EventDecoder, FrameSink, FrameStream, GatewayConnector, GatewayLink, InboundEvent};
use super::start_limiter::{SessionStartLimiter, StartPermit};
use super::state::{advance, Session, Trigger};
use crate::context::{duration_ms, interrupted, CallContext};
use crate::rest::ports::TokenProvider;

const COMMAND_BUFFER: usize = 32;
const INBOUND_BUFFER: usize = 128;

enum Command {
    Connect { ctx: CallContext, reply: oneshot::Sender<Result<()>> },
    Disconnect { reply: oneshot::Sender<()> },
    Send { frame: GatewayFrame, reply: oneshot::Sender<Result<()>> },
    Shutdown,
}

struct Inbound {
    epoch: u64,
    signal: Signal,
}

enum Signal {
    /// Backoff and budget wait finished; the transport may be opened
    AttemptReady(Result<()>),
    Linked(Result<GatewayLink>),
    Permit(Result<StartPermit>),
    Frame(GatewayFrame),
    Closed(Option<u16>),
    LinkError(ConduitError),
    HeartbeatDue,
}

/// Configuration and collaborators for one gateway connection
pub struct GatewaySession<D: EventDecoder> {
    connector: Arc<dyn GatewayConnector>,
    tokens: Arc<dyn TokenProvider>,
    limiter: Arc<SessionStartLimiter>,
    decoder: D,
    config: GatewayConfig,
    url: String,
}

impl<D: EventDecoder> GatewaySession<D> {
    /// `limiter` must be the process-wide instance shared by every session
    pub fn new(
        connector: Arc<dyn GatewayConnector>,
        tokens: Arc<dyn TokenProvider>,
        limiter: Arc<SessionStartLimiter>,
        decoder: D,
        config: GatewayConfig,
        url: impl Into<String>,
    ) -> Self {
        Self { connector, tokens, limiter, decoder, config, url: url.into() }
    }

    /// Start the control task; the session stays `Disconnected` until
    /// [`SessionHandle::connect`] is called
    pub fn spawn(self) -> SessionHandle<D::Event> {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (failure_tx, failure_rx) = watch::channel(None);
        let buffer = self.config.event_buffer.max(1);
        let (transitions, _) = broadcast::channel(buffer);
        let (events, _) = broadcast::channel(buffer);

        let backoff = RetryConfig {
            backoff: BackoffStrategy::Exponential {
                initial_delay: self.config.reconnect_backoff_base,
                base: 2.0,
                max_delay: self.config.reconnect_backoff_cap,
            },
            jitter: Jitter::Decorrelated { base: self.config.reconnect_backoff_base },
            ..RetryConfig::default()
        };

        let machine = Machine {
            connector: self.connector,
            tokens: self.tokens,
            limiter: self.limiter,
            decoder: self.decoder,
            config: self.config,
            url: self.url,
            backoff,
            inbound_tx,
            state_tx,
            failure_tx,
            transitions: transitions.clone(),
            events: events.clone(),
            state: SessionState::Disconnected,
            session: Session::default(),
            epoch: 0,
            sink: None,
            tasks: Vec::new(),
            permit: None,
            waiters: Vec::new(),
            start_ctx: CallContext::new(),
            attempting: false,
            handshake_deadline: None,
            reconnects: 0,
            last_backoff: None,
        };
        let task = tokio::spawn(machine.run(command_rx, inbound_rx));

        SessionHandle {
            commands: command_tx,
            state: state_rx,
            failure: failure_rx,
            transitions,
            events,
            task,
        }
    }
}

/// Caller-facing side of a running session
///
/// Dropping the handle stops the control task and closes the link.
pub struct SessionHandle<E> {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
    failure: watch::Receiver<Option<ConduitError>>,
    transitions: broadcast::Sender<Transition>,
    events: broadcast::Sender<(u64, E)>,
    task: JoinHandle<()>,
}

fn stopped() -> ConduitError {
    ConduitError::Internal("gateway session task has stopped".to_string())
}

impl<E: Clone + Send + 'static> SessionHandle<E> {
    /// Connect and wait until the session is `Connected`
    ///
    /// Before a new session is started the shared start budget is consulted;
    /// when it is empty this waits for its reset.
    ///
    /// # Errors
    /// - `BudgetExhausted` when the reset lands after the context's deadline
    /// - `SessionInvalidated` when the service rejects the session for good
    /// - `ProtocolViolation` when the handshake times out or is malformed
    /// - `Cancelled` on context expiry or a concurrent disconnect
    #[instrument(skip_all)]
    pub async fn connect(&self, ctx: &CallContext) -> Result<()> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::Connect { ctx: ctx.clone(), reply })
            .await
            .map_err(|_| stopped())?;
        ctx.run(outcome).await.map_err(interrupted)?.map_err(|_| stopped())?
    }

    /// Close the link and forget the session
    ///
    /// # Errors
    /// Returns `ConduitError::Internal` if the control task has stopped.
    pub async fn disconnect(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.commands.send(Command::Disconnect { reply }).await.map_err(|_| stopped())?;
        done.await.map_err(|_| stopped())
    }

    /// Send a caller command (presence, voice state, member request)
    ///
    /// # Errors
    /// - `InvalidRequest` for opcodes the session manages itself, or while
    ///   not `Connected`
    /// - `Transient` when the link fails while sending
    pub async fn send_command<P: Serialize>(&self, op: OpCode, payload: &P) -> Result<()> {
        if !op.is_user_command() {
            return Err(ConduitError::InvalidRequest(format!("{op:?} is managed by the session")));
        }
        let frame = GatewayFrame::with_payload(op, payload)?;
        let (reply, outcome) = oneshot::channel();
        self.commands.send(Command::Send { frame, reply }).await.map_err(|_| stopped())?;
        outcome.await.map_err(|_| stopped())?
    }

    /// State the control task last published
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that observes every published state
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Every state change from now on
    pub fn transitions(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    /// Decoded dispatches paired with their sequence numbers
    ///
    /// A subscriber that falls behind by more than the configured buffer
    /// observes `RecvError::Lagged` and skips ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<(u64, E)> {
        self.events.subscribe()
    }

    /// Why the session last stopped on its own, if it did
    pub fn last_failure(&self) -> Option<ConduitError> {
        self.failure.borrow().clone()
    }

    /// Disconnect and wait for the control task to finish
    pub async fn shutdown(self) {
        if self.commands.send(Command::Shutdown).await.is_ok() {
            if let Err(err) = self.task.await {
                warn!(error = %err, "Gateway session task ended abnormally");
            }
        }
    }
}

struct Machine<D: EventDecoder> {
    connector: Arc<dyn GatewayConnector>,
    tokens: Arc<dyn TokenProvider>,
    limiter: Arc<SessionStartLimiter>,
    decoder: D,
    config: GatewayConfig,
    url: String,
    backoff: RetryConfig,

    inbound_tx: mpsc::Sender<Inbound>,
    state_tx: watch::Sender<SessionState>,
    failure_tx: watch::Sender<Option<ConduitError>>,
    transitions: broadcast::Sender<Transition>,
    events: broadcast::Sender<(u64, D::Event)>,

    state: SessionState,
    session: Session,
    epoch: u64,
    sink: Option<Box<dyn FrameSink>>,
    tasks: Vec<JoinHandle<()>>,
    permit: Option<StartPermit>,
    waiters: Vec<oneshot::Sender<Result<()>>>,
    /// Context of the connect call being served; bounds budget waits
    start_ctx: CallContext,
    /// A backoff/budget wait or transport open is in flight
    attempting: bool,
    handshake_deadline: Option<Instant>,
    reconnects: u32,
    last_backoff: Option<Duration>,
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl<D: EventDecoder> Machine<D> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut inbound: mpsc::Receiver<Inbound>,
    ) {
        loop {
            let deadline = self.handshake_deadline;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => {
                        self.disconnect().await;
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                },
                Some(Inbound { epoch, signal }) = inbound.recv() => {
                    if epoch == self.epoch {
                        self.handle_signal(signal).await;
                    }
                }
                () = until(deadline) => {
                    self.handshake_deadline = None;
                    self.protocol_violation("handshake timed out".to_string()).await;
                }
            }
        }
        debug!("Gateway session task stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { ctx, reply } => {
                if self.state == SessionState::Connected {
                    reply.send(Ok(())).ok();
                    return;
                }
                self.waiters.push(reply);
                if self.state == SessionState::Disconnected && !self.attempting {
                    info!(url = %self.url, "Connecting to gateway");
                    self.start_ctx = ctx;
                    self.failure_tx.send_replace(None);
                    self.begin_attempt(Duration::ZERO);
                }
            }
            Command::Disconnect { reply } => {
                self.disconnect().await;
                reply.send(()).ok();
            }
            Command::Send { frame, reply } => {
                let outcome = if self.state == SessionState::Connected {
                    self.send_frame(&frame).await
                } else {
                    Err(ConduitError::InvalidRequest(format!(
                        "cannot send {:?} while {}",
                        frame.op, self.state
                    )))
                };
                reply.send(outcome).ok();
            }
            Command::Shutdown => {}
        }
    }

    async fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::AttemptReady(Ok(())) => self.open_link(),
            Signal::AttemptReady(Err(err)) => {
                self.attempting = false;
                warn!(error = %err, "Gateway connection attempt abandoned");
                if self.state != SessionState::Disconnected {
                    self.transition(Trigger::ConnectAborted);
                }
                self.fail_waiters(&err);
            }
            Signal::Linked(Ok(link)) => {
                self.attempting = false;
                self.link_established(link);
            }
            Signal::Linked(Err(err)) if err.is_retryable() => {
                self.attempting = false;
                warn!(error = %err, "Gateway transport failed to open");
                self.transition(Trigger::LinkFailed);
                self.schedule_reconnect();
            }
            Signal::Linked(Err(err)) => {
                self.attempting = false;
                error!(error = %err, "Gateway transport cannot be opened");
                self.failure_tx.send_replace(Some(err.clone()));
                self.reconnects = 0;
                self.last_backoff = None;
                self.transition(Trigger::ConnectAborted);
                self.fail_waiters(&err);
            }
            Signal::Permit(Ok(permit)) => self.identify(permit).await,
            Signal::Permit(Err(err)) => self.abort_handshake(err).await,
            Signal::Frame(frame) => self.handle_frame(frame).await,
            Signal::Closed(code) => self.link_closed(code).await,
            Signal::LinkError(ConduitError::Decode(message)) => {
                self.protocol_violation(format!("malformed frame: {message}")).await;
            }
            Signal::LinkError(err) => {
                warn!(error = %err, "Gateway link lost");
                self.connection_lost(None).await;
            }
            Signal::HeartbeatDue => self.heartbeat_due().await,
        }
    }

    fn transition(&mut self, trigger: Trigger) -> bool {
        match advance(self.state, trigger) {
            Ok(next) => {
                if next != self.state {
                    let change = Transition { from: self.state, to: next };
                    self.state = next;
                    self.state_tx.send_replace(next);
                    self.transitions.send(change).ok();
                    debug!(from = %change.from, to = %change.to, "Session state changed");
                }
                true
            }
            Err(err) => {
                error!(error = %err, "Rejected session transition");
                false
            }
        }
    }

    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.retain(|handle| !handle.is_finished());
        self.tasks.push(tokio::spawn(task));
    }

    fn notifier(&self) -> (u64, mpsc::Sender<Inbound>) {
        (self.epoch, self.inbound_tx.clone())
    }

    /// Wait out `delay` and, when the next handshake will identify, the
    /// start budget; then report back
    fn begin_attempt(&mut self, delay: Duration) {
        self.epoch += 1;
        self.attempting = true;
        let (epoch, tx) = self.notifier();
        let identify = !self.session.can_resume();
        let limiter = Arc::clone(&self.limiter);
        let ctx = self.start_ctx.clone();

        self.spawn(async move {
            let outcome = async {
                ctx.sleep(delay).await.map_err(interrupted)?;
                if identify {
                    limiter.wait_available(&ctx).await?;
                }
                Ok::<(), ConduitError>(())
            }
            .await;
            tx.send(Inbound { epoch, signal: Signal::AttemptReady(outcome) }).await.ok();
        });
    }

    fn open_link(&mut self) {
        let trigger = if self.state == SessionState::Reconnecting {
            Trigger::ReconnectStarted
        } else {
            Trigger::ConnectRequested
        };
        if !self.transition(trigger) {
            self.attempting = false;
            return;
        }

        let url = match &self.session.resume_url {
            Some(url) if self.session.can_resume() => url.clone(),
            _ => self.url.clone(),
        };
        let (epoch, tx) = self.notifier();
        let connector = Arc::clone(&self.connector);
        let timeout = self.config.handshake_timeout;

        self.spawn(async move {
            let linked = match tokio::time::timeout(timeout, connector.connect(&url)).await {
                Ok(linked) => linked,
                Err(_) => Err(ConduitError::transient(format!("connecting to {url} timed out"))),
            };
            tx.send(Inbound { epoch, signal: Signal::Linked(linked) }).await.ok();
        });
    }

    fn link_established(&mut self, link: GatewayLink) {
        if !self.transition(Trigger::LinkEstablished) {
            return;
        }
        let GatewayLink { sink, stream } = link;
        self.sink = Some(sink);
        self.session.reset_link();
        self.handshake_deadline = Some(Instant::now() + self.config.handshake_timeout);

        let (epoch, tx) = self.notifier();
        self.spawn(read_frames(stream, epoch, tx));
    }

    async fn handle_frame(&mut self, frame: GatewayFrame) {
        match frame.op {
            OpCode::Hello => self.hello(&frame).await,
            OpCode::Dispatch => self.dispatch(frame).await,
            OpCode::Heartbeat => {
                debug!("Heartbeat requested by gateway");
                self.send_heartbeat().await;
            }
            OpCode::HeartbeatAck => {
                self.session.heartbeat_acked(Instant::now());
                if let Some(latency) = self.session.latency() {
                    debug!(latency_ms = duration_ms(latency), "Heartbeat acknowledged");
                }
            }
            OpCode::Reconnect => {
                info!("Gateway requested reconnect");
                self.connection_lost(Some(CLOSE_RESUMABLE)).await;
            }
            OpCode::InvalidSession => {
                if frame.d.as_bool().unwrap_or(false) {
                    info!("Session invalidated as resumable");
                    self.connection_lost(Some(CLOSE_RESUMABLE)).await;
                } else {
                    self.invalidate(None, "invalid session".to_string()).await;
                }
            }
            op => self.protocol_violation(format!("unexpected {op:?} from gateway")).await,
        }
    }

    async fn hello(&mut self, frame: &GatewayFrame) {
        if self.state != SessionState::AwaitingHandshake {
            self.protocol_violation(format!("Hello while {}", self.state)).await;
            return;
        }
        let hello: Hello = match frame.payload() {
            Ok(hello) => hello,
            Err(err) => {
                self.protocol_violation(err.to_string()).await;
                return;
            }
        };

        let interval = hello.heartbeat_interval;
        self.session.heartbeat_interval = Some(interval);
        self.start_heartbeat(interval);

        let resume = self.session.can_resume();
        if !self.transition(Trigger::HelloReceived { resume }) {
            return;
        }
        if resume {
            self.resume().await;
        } else {
            self.session.session_id = None;
            self.session.sequence = None;
            self.session.resume_url = None;
            // Slot waits may be long; the timeout restarts once Identify is sent
            self.handshake_deadline = None;
            let (epoch, tx) = self.notifier();
            let limiter = Arc::clone(&self.limiter);
            let ctx = self.start_ctx.clone();
            self.spawn(async move {
                let permit = limiter.acquire(&ctx).await;
                tx.send(Inbound { epoch, signal: Signal::Permit(permit) }).await.ok();
            });
        }
    }

    fn start_heartbeat(&mut self, interval: Duration) {
        let first = if self.config.jitter_first_heartbeat {
            interval.mul_f64(rand::thread_rng().gen::<f64>())
        } else {
            interval
        };
        let (epoch, tx) = self.notifier();
        self.spawn(async move {
            tokio::time::sleep(first).await;
            loop {
                if tx.send(Inbound { epoch, signal: Signal::HeartbeatDue }).await.is_err() {
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        });
    }

    async fn resume(&mut self) {
        let (Some(session_id), Some(seq)) = (self.session.session_id.clone(), self.session.sequence)
        else {
            self.protocol_violation("resume without a session".to_string()).await;
            return;
        };
        let token = match self.tokens.token().await {
            Ok(token) => token,
            Err(err) => return self.abort_handshake(err).await,
        };
        info!(%session_id, seq, "Resuming gateway session");
        let frame = match GatewayFrame::with_payload(OpCode::Resume, &Resume { token, session_id, seq }) {
            Ok(frame) => frame,
            Err(err) => return self.abort_handshake(err).await,
        };
        if self.send_frame(&frame).await.is_ok() {
            self.handshake_deadline = Some(Instant::now() + self.config.handshake_timeout);
        }
    }

    async fn identify(&mut self, permit: StartPermit) {
        if self.state != SessionState::Identifying {
            return;
        }
        self.permit = Some(permit);
        let token = match self.tokens.token().await {
            Ok(token) => token,
            Err(err) => return self.abort_handshake(err).await,
        };
        let identify = Identify {
            token,
            properties: self.config.properties.clone(),
            intents: self.config.intents,
            shard: self.config.shard,
            large_threshold: Some(self.config.large_threshold),
            presence: None,
        };
        info!(shard = ?identify.shard, intents = identify.intents, "Identifying");
        let frame = match GatewayFrame::with_payload(OpCode::Identify, &identify) {
            Ok(frame) => frame,
            Err(err) => return self.abort_handshake(err).await,
        };
        if self.send_frame(&frame).await.is_ok() {
            self.handshake_deadline = Some(Instant::now() + self.config.handshake_timeout);
        }
    }

    async fn dispatch(&mut self, frame: GatewayFrame) {
        let Some(name) = frame.t.clone() else {
            self.protocol_violation("dispatch without an event name".to_string()).await;
            return;
        };

        match (self.state, name.as_str()) {
            (SessionState::Identifying, "READY") => {
                let ready: Ready = match frame.payload() {
                    Ok(ready) => ready,
                    Err(err) => return self.protocol_violation(err.to_string()).await,
                };
                if let Some(seq) = frame.s {
                    self.session.observe_sequence(seq);
                }
                info!(session_id = %ready.session_id, "Gateway session ready");
                self.session.session_id = Some(ready.session_id);
                self.session.resume_url = ready.resume_gateway_url;
                if self.transition(Trigger::Ready) {
                    self.connected();
                }
            }
            (SessionState::Resuming, "RESUMED") => {
                if let Some(seq) = frame.s {
                    self.session.observe_sequence(seq);
                }
                info!(seq = ?self.session.sequence, "Gateway session resumed");
                if self.transition(Trigger::Resumed) {
                    self.connected();
                }
            }
            (SessionState::Resuming | SessionState::Connected, _) => {
                if let Some(seq) = frame.s {
                    self.session.observe_sequence(seq);
                }
            }
            (state, name) => {
                return self.protocol_violation(format!("{name} dispatch while {state}")).await;
            }
        }

        let seq = frame.s.or(self.session.sequence).unwrap_or_default();
        match self.decoder.decode(&name, &frame.d) {
            Ok(event) => {
                self.events.send((seq, event)).ok();
            }
            Err(err) => warn!(event = %name, seq, error = %err, "Skipping undecodable dispatch"),
        }
    }

    fn connected(&mut self) {
        self.permit = None;
        self.handshake_deadline = None;
        self.reconnects = 0;
        self.last_backoff = None;
        self.start_ctx = CallContext::new();
        for waiter in self.waiters.drain(..) {
            waiter.send(Ok(())).ok();
        }
    }

    async fn heartbeat_due(&mut self) {
        if !self.state.has_link() {
            return;
        }
        if self.session.ack_outstanding {
            warn!("Heartbeat not acknowledged, closing zombied connection");
            self.connection_lost(Some(CLOSE_RESUMABLE)).await;
            return;
        }
        self.send_heartbeat().await;
    }

    async fn send_heartbeat(&mut self) {
        let frame = GatewayFrame::heartbeat(self.session.sequence);
        if self.send_frame(&frame).await.is_ok() {
            self.session.heartbeat_sent(Instant::now());
        }
    }

    async fn send_frame(&mut self, frame: &GatewayFrame) -> Result<()> {
        let Some(sink) = self.sink.as_mut() else {
            return Err(ConduitError::transient("no gateway link"));
        };
        match sink.send(frame).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(op = ?frame.op, error = %err, "Failed to send gateway frame");
                self.connection_lost(None).await;
                Err(err)
            }
        }
    }

    async fn link_closed(&mut self, code: Option<u16>) {
        info!(code = ?code, "Gateway closed the connection");
        match CloseCode::classify(code) {
            CloseDisposition::Resume => self.connection_lost(None).await,
            CloseDisposition::Reidentify => {
                self.invalidate(code, "session can no longer be resumed".to_string()).await;
            }
            CloseDisposition::Fatal => self.fatal(code).await,
        }
    }

    async fn close_link(&mut self, code: u16) {
        if let Some(mut sink) = self.sink.take() {
            if let Err(err) = sink.close(code).await {
                debug!(code, error = %err, "Closing gateway link failed");
            }
        }
    }

    /// Tear down the link and every helper task
    fn drop_link(&mut self) {
        self.epoch += 1;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.sink = None;
        self.permit = None;
        self.attempting = false;
        self.handshake_deadline = None;
        self.session.reset_link();
    }

    /// Resumable loss: close with `close` if given, then reconnect
    async fn connection_lost(&mut self, close: Option<u16>) {
        if !self.state.has_link() {
            return;
        }
        if let Some(code) = close {
            self.close_link(code).await;
        }
        self.drop_link();
        self.session.resumable = true;
        if self.transition(Trigger::ConnectionLost) {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        let delay = match self.reconnects.checked_sub(1) {
            None => Duration::ZERO,
            Some(retry) => self.backoff.delay_for(retry, self.last_backoff),
        };
        self.reconnects = self.reconnects.saturating_add(1);
        if !delay.is_zero() {
            self.last_backoff = Some(delay);
            info!(delay_ms = duration_ms(delay), attempt = self.reconnects, "Reconnecting after backoff");
        }
        self.begin_attempt(delay);
    }

    /// Non-resumable invalidation: forget the session and identify afresh
    async fn invalidate(&mut self, code: Option<u16>, reason: String) {
        warn!(code = ?code, %reason, "Gateway session invalidated, re-identifying");
        self.close_link(CLOSE_NORMAL).await;
        self.drop_link();
        self.session.clear();
        if self.transition(Trigger::Invalidated) && self.transition(Trigger::InvalidationHandled) {
            self.schedule_reconnect();
        }
    }

    /// Invalidation that reconnecting cannot fix
    async fn fatal(&mut self, code: Option<u16>) {
        let err = ConduitError::SessionInvalidated {
            code,
            reason: "gateway closed the session with a fatal code".to_string(),
        };
        error!(code = ?code, "Gateway session closed fatally");
        self.failure_tx.send_replace(Some(err.clone()));
        self.drop_link();
        self.session.clear();
        self.transition(Trigger::Invalidated);
        self.transition(Trigger::InvalidationHandled);
        self.fail_waiters(&err);
    }

    /// Malformed or out-of-sequence traffic: drop this link and reconnect
    async fn protocol_violation(&mut self, message: String) {
        warn!(%message, state = %self.state, "Gateway protocol violation");
        let err = ConduitError::ProtocolViolation(message);
        if self.state != SessionState::Connected {
            self.fail_waiters(&err);
        }
        self.connection_lost(Some(CLOSE_RESUMABLE)).await;
    }

    /// A handshake that cannot continue (credential or budget failure)
    async fn abort_handshake(&mut self, err: ConduitError) {
        warn!(error = %err, "Gateway handshake aborted");
        self.failure_tx.send_replace(Some(err.clone()));
        self.close_link(CLOSE_NORMAL).await;
        self.drop_link();
        self.transition(Trigger::ConnectAborted);
        self.fail_waiters(&err);
    }

    async fn disconnect(&mut self) {
        if self.state != SessionState::Disconnected || self.attempting {
            info!("Disconnecting from gateway");
        }
        self.close_link(CLOSE_NORMAL).await;
        self.drop_link();
        self.session.clear();
        self.reconnects = 0;
        self.last_backoff = None;
        self.transition(Trigger::DisconnectRequested);
        self.fail_waiters(&ConduitError::cancelled("disconnect requested"));
    }

    fn fail_waiters(&mut self, err: &ConduitError) {
        for waiter in self.waiters.drain(..) {
            waiter.send(Err(err.clone())).ok();
        }
    }
}

/// Forward everything the stream yields into the control queue
async fn read_frames(mut stream: Box<dyn FrameStream>, epoch: u64, tx: mpsc::Sender<Inbound>) {
    loop {
        let (signal, last) = match stream.next().await {
            Ok(InboundEvent::Frame(frame)) => (Signal::Frame(frame), false),
            Ok(InboundEvent::Closed { code }) => (Signal::Closed(code), true),
            Err(err) => (Signal::LinkError(err), true),
        };
        if tx.send(Inbound { epoch, signal }).await.is_err() || last {
            break;
        }
    }
}
