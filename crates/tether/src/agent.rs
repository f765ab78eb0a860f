//! The reliable socket agent.
//!
//! A [`ReliableSocket`] owns one socket at a time and keeps a connection
//! alive on the caller's behalf: it retries after every unexpected close,
//! sends a heartbeat while open, and buffers outbound messages while no
//! socket is usable. The buffer is flushed oldest-first as soon as the next
//! socket opens.
//!
//! All work happens on the current tokio `LocalSet`. Socket signals,
//! heartbeat ticks and reconnect timers are processed one at a time, and
//! user callbacks run only after the state change that produced them has
//! been applied.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::buffer::BoundedBuffer;
use crate::config::AgentConfig;
use crate::error::TetherResult;
use crate::events::{Handlers, Notice};
use crate::socket::{Address, CloseFrame, Connector, EventSender, Payload, Socket, SocketEvent, TaggedEvent};
use crate::state::ConnectionState;
use crate::timer::TimerSlot;

/// A self-healing connection built on top of a [`Connector`].
///
/// Cloning yields another handle to the same agent. The agent stops when
/// [`close`](Self::close) is called or the last handle is dropped.
pub struct ReliableSocket<C: Connector> {
    shared: Rc<Shared<C>>,
}

/// Non-owning handle, for use inside callbacks.
pub struct WeakReliableSocket<C: Connector> {
    shared: Weak<Shared<C>>,
}

struct Shared<C: Connector> {
    state: RefCell<Inner<C>>,
    handlers: RefCell<Handlers<C::Error>>,
}

/// The socket currently owned by the agent.
struct Live<S> {
    generation: u64,
    socket: S,
    close_sent: bool,
}

impl<S: Socket> Live<S> {
    fn close_once(&mut self) {
        if !self.close_sent {
            self.close_sent = true;
            self.socket.close();
        }
    }
}

struct Inner<C: Connector> {
    this: Weak<Shared<C>>,
    address: Address,
    args: Option<C::Args>,
    connector: C,
    config: AgentConfig,
    buffer: BoundedBuffer<Payload>,
    live: Option<Live<C::Socket>>,
    generation: u64,
    open: bool,
    opened_once: bool,
    shutting_down: bool,
    attempts: u32,
    heartbeat: TimerSlot,
    reconnect: TimerSlot,
    pump: TimerSlot,
    events_tx: mpsc::UnboundedSender<TaggedEvent<C::Error>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl<C: Connector + 'static> ReliableSocket<C> {
    /// Create an agent and start connecting immediately.
    ///
    /// Must be called from within a [`tokio::task::LocalSet`].
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn new(address: impl Into<Address>, config: AgentConfig, connector: C) -> TetherResult<Self> {
        Self::build(address.into(), config, connector, None)
    }

    /// Like [`new`](Self::new), passing `args` to every `connect` call.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn with_args(
        address: impl Into<Address>,
        config: AgentConfig,
        connector: C,
        args: C::Args,
    ) -> TetherResult<Self> {
        Self::build(address.into(), config, connector, Some(args))
    }

    fn build(address: Address, config: AgentConfig, connector: C, args: Option<C::Args>) -> TetherResult<Self> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        let buffer = BoundedBuffer::new(config.buffer_capacity, config.eviction);

        let shared = Rc::new_cyclic(|this: &Weak<Shared<C>>| {
            let mut pump = TimerSlot::default();
            pump.arm(pump_events(this.clone(), events_rx));

            Shared {
                state: RefCell::new(Inner {
                    this: this.clone(),
                    address,
                    args,
                    connector,
                    config,
                    buffer,
                    live: None,
                    generation: 0,
                    open: false,
                    opened_once: false,
                    shutting_down: false,
                    attempts: 0,
                    heartbeat: TimerSlot::default(),
                    reconnect: TimerSlot::default(),
                    pump,
                    events_tx,
                    state_tx,
                }),
                handlers: RefCell::new(Handlers::default()),
            }
        });

        shared.state.borrow_mut().connect();
        Ok(Self { shared })
    }

    /// Send a message, or buffer it while disconnected.
    ///
    /// Returns `true` if the message was written or retained by the buffer,
    /// `false` if the buffer rejected it or the agent is shutting down.
    pub fn send(&self, payload: impl Into<Payload>) -> bool {
        let payload = payload.into();
        let mut guard = self.shared.state.borrow_mut();
        let inner = &mut *guard;

        if inner.shutting_down {
            debug!("agent is shutting down, rejecting message");
            return false;
        }

        if inner.open {
            if let Some(live) = inner.live.as_mut() {
                live.socket.send(payload);
                return true;
            }
        }

        let accepted = inner.buffer.push(payload);
        debug!(accepted, buffered = inner.buffer.len(), "socket not open, buffering message");
        accepted
    }

    /// Send a message only if the socket is open right now. Never buffers.
    pub fn send_or_drop(&self, payload: impl Into<Payload>) -> bool {
        let mut guard = self.shared.state.borrow_mut();
        let inner = &mut *guard;

        if inner.shutting_down || !inner.open {
            return false;
        }
        match inner.live.as_mut() {
            Some(live) => {
                live.socket.send(payload.into());
                true
            }
            None => false,
        }
    }

    /// Replace the configuration.
    ///
    /// A running heartbeat restarts with the new interval. A buffer whose
    /// capacity or policy changed is rebuilt, replaying the pending messages
    /// oldest-first under the new rules.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation; the current
    /// configuration is left untouched.
    pub fn change_config(&self, config: AgentConfig) -> TetherResult<()> {
        config.validate()?;

        let mut inner = self.shared.state.borrow_mut();
        let rearm = inner.heartbeat.cancel();

        if config.buffer_capacity != inner.buffer.capacity() || config.eviction != inner.buffer.policy() {
            let dropped = inner.buffer.rebuild(config.buffer_capacity, config.eviction);
            if dropped > 0 {
                warn!(
                    dropped,
                    capacity = config.buffer_capacity,
                    eviction = %config.eviction,
                    "buffered messages dropped while resizing buffer"
                );
            }
        }

        inner.config = config;
        if rearm {
            inner.arm_heartbeat();
        }
        Ok(())
    }

    /// Stop for good.
    ///
    /// Cancels both timers, discards buffered messages and closes the
    /// socket if there is one. `on_close` fires once the socket reports its
    /// close, or immediately when there is no socket. Calling this again has
    /// no effect.
    pub fn close(&self) {
        let notice = self.shared.state.borrow_mut().shutdown();
        if let Some(notice) = notice {
            notice.dispatch(&self.shared.handlers);
        }
    }

    /// Called on the first successful open.
    pub fn on_open<F>(&self, handler: F)
    where
        F: FnMut() + 'static,
    {
        self.shared.handlers.borrow_mut().open = Some(Box::new(handler));
    }

    /// Called on every successful open after the first.
    pub fn on_reconnect<F>(&self, handler: F)
    where
        F: FnMut() + 'static,
    {
        self.shared.handlers.borrow_mut().reconnect = Some(Box::new(handler));
    }

    /// Called for every transport error reported by the current socket.
    pub fn on_error<F>(&self, handler: F)
    where
        F: FnMut(&C::Error) + 'static,
    {
        self.shared.handlers.borrow_mut().error = Some(Box::new(handler));
    }

    /// Called for every inbound message while open.
    pub fn on_message<F>(&self, handler: F)
    where
        F: FnMut(&Payload) + 'static,
    {
        self.shared.handlers.borrow_mut().message = Some(Box::new(handler));
    }

    /// Called once, when the agent has shut down.
    pub fn on_close<F>(&self, handler: F)
    where
        F: FnMut(&CloseFrame) + 'static,
    {
        self.shared.handlers.borrow_mut().close = Some(Box::new(handler));
    }

    /// Called on every unexpected close with the number of consecutive
    /// failed attempts, including this one.
    pub fn on_disconnect<F>(&self, handler: F)
    where
        F: FnMut(&CloseFrame, u32) + 'static,
    {
        self.shared.handlers.borrow_mut().disconnect = Some(Box::new(handler));
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow().state_tx.borrow()
    }

    /// Whether messages are currently written straight to the socket.
    #[must_use]
    pub fn is_open(&self) -> bool {
        let inner = self.shared.state.borrow();
        inner.open && !inner.shutting_down
    }

    /// Consecutive failed attempts since the last successful open.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.shared.state.borrow().attempts
    }

    /// Messages waiting for the next open, oldest first.
    #[must_use]
    pub fn buffered(&self) -> Vec<Payload> {
        self.shared.state.borrow().buffer.to_vec()
    }

    /// A copy of the active configuration.
    #[must_use]
    pub fn config(&self) -> AgentConfig {
        self.shared.state.borrow().config.clone()
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.borrow().state_tx.subscribe()
    }

    /// Wait until the agent reaches [`ConnectionState::Closed`].
    pub async fn closed(&self) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so this only returns once closed.
        let _ = rx.wait_for(|state| state.is_terminal()).await;
    }

    /// A handle that does not keep the agent alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakReliableSocket<C> {
        WeakReliableSocket {
            shared: Rc::downgrade(&self.shared),
        }
    }
}

impl<C: Connector> Clone for ReliableSocket<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<C: Connector> fmt::Debug for ReliableSocket<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shared.state.try_borrow() {
            Ok(inner) => f
                .debug_struct("ReliableSocket")
                .field("state", &*inner.state_tx.borrow())
                .field("address", &inner.address)
                .field("attempts", &inner.attempts)
                .field("buffered", &inner.buffer.len())
                .finish_non_exhaustive(),
            Err(_) => f.write_str("ReliableSocket { .. }"),
        }
    }
}

impl<C: Connector> WeakReliableSocket<C> {
    /// Recover a strong handle if the agent is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<ReliableSocket<C>> {
        self.shared.upgrade().map(|shared| ReliableSocket { shared })
    }
}

impl<C: Connector> Clone for WeakReliableSocket<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<C: Connector> fmt::Debug for WeakReliableSocket<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakReliableSocket { .. }")
    }
}

async fn pump_events<C: Connector + 'static>(
    this: Weak<Shared<C>>,
    mut events_rx: mpsc::UnboundedReceiver<TaggedEvent<C::Error>>,
) {
    while let Some((generation, event)) = events_rx.recv().await {
        let Some(shared) = this.upgrade() else {
            break;
        };
        shared.handle_event(generation, event);
    }
}

impl<C: Connector + 'static> Shared<C> {
    fn handle_event(&self, generation: u64, event: SocketEvent<C::Error>) {
        let notice = {
            let mut inner = self.state.borrow_mut();
            if inner.live.as_ref().map(|live| live.generation) != Some(generation) {
                debug!(generation, current = inner.generation, "ignoring event from stale socket");
                return;
            }

            match event {
                SocketEvent::Open => Some(inner.socket_opened()),
                SocketEvent::Message(payload) => inner.open.then_some(Notice::Message(payload)),
                SocketEvent::Error(error) => {
                    debug!(generation, %error, "socket error");
                    Some(Notice::Error(error))
                }
                SocketEvent::Close(frame) => Some(inner.socket_closed(frame)),
            }
        };

        if let Some(notice) = notice {
            notice.dispatch(&self.handlers);
        }
    }

    fn heartbeat_tick(&self) {
        let mut guard = self.state.borrow_mut();
        let inner = &mut *guard;
        if !inner.open {
            return;
        }
        if let Some(live) = inner.live.as_mut() {
            debug!("sending heartbeat");
            live.socket.send(inner.config.heartbeat_payload.clone());
        }
    }

    fn reconnect_due(&self) {
        let mut inner = self.state.borrow_mut();
        inner.reconnect.release();
        inner.connect();
    }
}

impl<C: Connector + 'static> Inner<C> {
    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            info!("state: {} -> {}", current, next);
            *current = next;
            true
        });
    }

    fn connect(&mut self) {
        if self.shutting_down {
            return;
        }

        let Some(address) = self.address.resolve() else {
            debug!("address not available yet");
            self.schedule_reconnect();
            self.set_state(ConnectionState::AwaitingRetry);
            return;
        };

        self.generation += 1;
        let events = EventSender::new(self.generation, self.events_tx.clone());
        info!(%address, generation = self.generation, "connecting");
        let socket = self.connector.connect(&address, self.args.as_ref(), events);
        self.live = Some(Live {
            generation: self.generation,
            socket,
            close_sent: false,
        });
        self.set_state(ConnectionState::Connecting);
    }

    fn socket_opened(&mut self) -> Notice<C::Error> {
        self.open = true;
        self.attempts = 0;
        let first = !self.opened_once;
        self.opened_once = true;

        if let Some(live) = self.live.as_mut() {
            let backlog = self.buffer.len();
            for payload in self.buffer.drain() {
                live.socket.send(payload);
            }
            if backlog > 0 {
                debug!(backlog, "flushed buffered messages");
            }

            if self.shutting_down {
                live.close_once();
            }
        }

        if self.shutting_down {
            info!("socket opened during shutdown, closing");
        } else {
            info!(first, "socket open");
            if !self.heartbeat.is_armed() {
                self.arm_heartbeat();
            }
            self.set_state(ConnectionState::Open);
        }

        if first { Notice::Opened } else { Notice::Reconnected }
    }

    fn socket_closed(&mut self, frame: CloseFrame) -> Notice<C::Error> {
        self.live = None;
        self.open = false;

        if self.shutting_down {
            info!(%frame, "socket closed");
            self.set_state(ConnectionState::Closed);
            return Notice::Closed(frame);
        }

        self.attempts = self.attempts.saturating_add(1);
        self.heartbeat.cancel();
        warn!(attempts = self.attempts, %frame, "socket disconnected");
        self.schedule_reconnect();
        self.set_state(ConnectionState::AwaitingRetry);
        Notice::Disconnected(frame, self.attempts)
    }

    fn shutdown(&mut self) -> Option<Notice<C::Error>> {
        if self.shutting_down {
            return None;
        }
        self.shutting_down = true;

        if !self.opened_once && self.config.reconnect.delay_for_attempt(self.attempts) > Duration::ZERO {
            warn!("close() called before any connection was successful");
        }

        self.heartbeat.cancel();
        self.reconnect.cancel();
        self.buffer.clear();

        match self.live.as_mut() {
            Some(live) => {
                live.close_once();
                self.set_state(ConnectionState::ShuttingDown);
                None
            }
            None => {
                info!("closed with no socket");
                self.set_state(ConnectionState::Closed);
                Some(Notice::Closed(CloseFrame::normal("closed before connecting")))
            }
        }
    }

    fn arm_heartbeat(&mut self) {
        let Some(period) = self.config.heartbeat_interval() else {
            return;
        };

        let this = self.this.clone();
        let start = Instant::now() + period;
        self.heartbeat.arm(async move {
            let mut ticker = time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = this.upgrade() else {
                    break;
                };
                shared.heartbeat_tick();
            }
        });
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.config.reconnect.delay_for_attempt(self.attempts);
        info!(
            attempts = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );

        let this = self.this.clone();
        self.reconnect.arm(async move {
            time::sleep(delay).await;
            if let Some(shared) = this.upgrade() {
                shared.reconnect_due();
            }
        });
    }
}
