//! The client connection state machine.
//!
//! One actor task owns a [`ConnectionState`] and is the only mutator of it.
//! API calls arrive as [`Command`]s; bootstrap completions and transport
//! losses arrive as internal events tagged with the generation of the
//! connection attempt that produced them, so a notification from a replaced
//! transport cannot disturb its successor.
//!
//! Transitions follow the table in the transport design: requests submitted
//! before the handshake completes are queued (bounded; overflow fails the
//! oldest), a bootstrap rejected with a stale-channel status is retried
//! exactly once with a fresh channel id, and a lost connection moves to
//! `Reconnecting` carrying the in-flight requests for resubmission.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use uastack_core::channel::SecureChannel;
use uastack_core::message::{RequestMessage, ResponseMessage};
use uastack_core::status;
use uastack_core::UaError;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::transport::{bootstrap, Transport, TransportInactive};

/// Upper bound on requests buffered while a handshake is in progress.
const MAX_QUEUED_REQUESTS: usize = 256;

/// API-level commands into the state machine.
pub enum Command {
    Connect {
        reply: oneshot::Sender<Result<Arc<SecureChannel>, ClientError>>,
    },
    SendRequest {
        request: RequestMessage,
        reply: oneshot::Sender<Result<ResponseMessage, UaError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

struct QueuedRequest {
    request: RequestMessage,
    reply: oneshot::Sender<Result<ResponseMessage, UaError>>,
}

/// A request carried over from a lost transport, to resend once the
/// replacement handshake completes.
struct CarriedRequest {
    request: RequestMessage,
    reply: oneshot::Sender<Result<ResponseMessage, UaError>>,
}

#[derive(Default)]
struct HandshakePending {
    waiters: Vec<oneshot::Sender<Result<Arc<SecureChannel>, ClientError>>>,
    queued: VecDeque<QueuedRequest>,
    carried: Vec<CarriedRequest>,
}

impl HandshakePending {
    /// Queue a request, failing the oldest on overflow.
    fn queue(&mut self, request: RequestMessage, reply: oneshot::Sender<Result<ResponseMessage, UaError>>) {
        if self.queued.len() >= MAX_QUEUED_REQUESTS {
            if let Some(oldest) = self.queued.pop_front() {
                let _ = oldest.reply.send(Err(UaError::new(
                    status::BAD_RESOURCE_UNAVAILABLE,
                    "pre-handshake request queue full",
                )));
            }
        }
        self.queued.push_back(QueuedRequest { request, reply });
    }

    fn fail_all(self, error: &ClientError) {
        for waiter in self.waiters {
            let _ = waiter.send(Err(error.clone()));
        }
        let queued_error = UaError::from_code(status::BAD_CONNECTION_CLOSED);
        for queued in self.queued {
            let _ = queued.reply.send(Err(queued_error.clone()));
        }
        for carried in self.carried {
            let _ = carried.reply.send(Err(queued_error.clone()));
        }
    }
}

struct DisconnectPending {
    replies: Vec<oneshot::Sender<()>>,
    /// Work that arrived while shutting down; triggers a fresh connect once
    /// the channel is closed.
    after: HandshakePending,
}

enum ConnectionState {
    Idle,
    Connecting(HandshakePending),
    Connected(Arc<Transport>),
    Reconnecting(HandshakePending),
    Disconnecting(DisconnectPending),
    Disconnected,
}

impl ConnectionState {
    fn name(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Connecting(_) => "Connecting",
            ConnectionState::Connected(_) => "Connected",
            ConnectionState::Reconnecting(_) => "Reconnecting",
            ConnectionState::Disconnecting(_) => "Disconnecting",
            ConnectionState::Disconnected => "Disconnected",
        }
    }
}

struct ConnectOutcome {
    generation: u64,
    result: Result<Transport, ClientError>,
}

/// Spawn the state machine actor; the returned sender is the client's
/// handle to it.
pub fn spawn(config: ClientConfig) -> mpsc::Sender<Command> {
    let (command_tx, command_rx) = mpsc::channel(64);
    tokio::spawn(run(config, command_rx));
    command_tx
}

async fn run(config: ClientConfig, mut command_rx: mpsc::Receiver<Command>) {
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<ConnectOutcome>(4);
    let (inactive_tx, mut inactive_rx) = mpsc::channel::<TransportInactive>(8);

    let mut fsm = Fsm {
        config,
        state: ConnectionState::Idle,
        generation: 0,
        outcome_tx,
        inactive_tx,
    };

    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(command) => fsm.handle_command(command),
                // Client dropped: tear everything down.
                None => {
                    if let ConnectionState::Connected(transport) = &fsm.state {
                        transport.close();
                    }
                    break;
                }
            },
            Some(outcome) = outcome_rx.recv() => fsm.handle_outcome(outcome),
            Some(inactive) = inactive_rx.recv() => fsm.handle_inactive(inactive),
        }
    }
}

struct Fsm {
    config: ClientConfig,
    state: ConnectionState,
    /// Generation of the connection attempt currently in flight or active.
    generation: u64,
    outcome_tx: mpsc::Sender<ConnectOutcome>,
    inactive_tx: mpsc::Sender<TransportInactive>,
}

impl Fsm {
    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => self.on_connect(reply),
            Command::SendRequest { request, reply } => self.on_send(request, reply),
            Command::Disconnect { reply } => self.on_disconnect(reply),
        }
    }

    fn on_connect(&mut self, reply: oneshot::Sender<Result<Arc<SecureChannel>, ClientError>>) {
        match &mut self.state {
            ConnectionState::Idle | ConnectionState::Disconnected => {
                let mut pending = HandshakePending::default();
                pending.waiters.push(reply);
                self.start_bootstrap(0);
                self.state = ConnectionState::Connecting(pending);
            }
            ConnectionState::Connecting(pending) | ConnectionState::Reconnecting(pending) => {
                pending.waiters.push(reply);
            }
            ConnectionState::Connected(transport) => {
                let _ = reply.send(Ok(Arc::clone(&transport.channel)));
            }
            ConnectionState::Disconnecting(pending) => {
                pending.after.waiters.push(reply);
            }
        }
    }

    fn on_send(
        &mut self,
        request: RequestMessage,
        reply: oneshot::Sender<Result<ResponseMessage, UaError>>,
    ) {
        match &mut self.state {
            ConnectionState::Connected(transport) => {
                transport.submit(request, reply);
            }
            ConnectionState::Connecting(pending) | ConnectionState::Reconnecting(pending) => {
                debug!("queueing request submitted before handshake completed");
                pending.queue(request, reply);
            }
            ConnectionState::Idle | ConnectionState::Disconnected => {
                // A request on a cold client implies a connect.
                let mut pending = HandshakePending::default();
                pending.queue(request, reply);
                self.start_bootstrap(0);
                self.state = ConnectionState::Connecting(pending);
            }
            ConnectionState::Disconnecting(pending) => {
                pending.after.queue(request, reply);
            }
        }
    }

    fn on_disconnect(&mut self, reply: oneshot::Sender<()>) {
        match std::mem::replace(&mut self.state, ConnectionState::Idle) {
            ConnectionState::Connected(transport) => {
                info!("disconnecting secure channel {}", transport.channel.channel_id());
                transport.channel.fail_all_pending(&UaError::from_code(
                    status::BAD_CONNECTION_CLOSED,
                ));
                transport.send_close();
                transport.close();
                self.state = ConnectionState::Disconnecting(DisconnectPending {
                    replies: vec![reply],
                    after: HandshakePending::default(),
                });
            }
            ConnectionState::Disconnecting(mut pending) => {
                pending.replies.push(reply);
                self.state = ConnectionState::Disconnecting(pending);
            }
            ConnectionState::Connecting(pending) | ConnectionState::Reconnecting(pending) => {
                // Abandon the attempt; its outcome will arrive with a stale
                // generation and be discarded.
                self.generation += 1;
                pending.fail_all(&ClientError::Stopped);
                let _ = reply.send(());
                self.state = ConnectionState::Disconnected;
            }
            state @ (ConnectionState::Idle | ConnectionState::Disconnected) => {
                let _ = reply.send(());
                self.state = state;
            }
        }
    }

    fn handle_outcome(&mut self, outcome: ConnectOutcome) {
        if outcome.generation != self.generation {
            debug!("discarding bootstrap outcome from stale generation {}", outcome.generation);
            if let Ok(transport) = outcome.result {
                transport.close();
            }
            return;
        }

        match std::mem::replace(&mut self.state, ConnectionState::Idle) {
            ConnectionState::Connecting(pending) | ConnectionState::Reconnecting(pending) => {
                match outcome.result {
                    Ok(transport) => self.enter_connected(transport, pending),
                    Err(error) => {
                        warn!("connect failed: {error}");
                        pending.fail_all(&error);
                        self.state = ConnectionState::Idle;
                    }
                }
            }
            ConnectionState::Disconnecting(mut pending) => {
                // A disconnect raced the bootstrap; drop the fresh transport.
                if let Ok(transport) = outcome.result {
                    transport.close();
                }
                for reply in pending.replies.drain(..) {
                    let _ = reply.send(());
                }
                self.finish_disconnect(pending.after);
            }
            state => {
                debug!("bootstrap outcome ignored in state {}", state.name());
                self.state = state;
            }
        }
    }

    fn handle_inactive(&mut self, event: TransportInactive) {
        if event.generation != self.generation {
            return;
        }

        match std::mem::replace(&mut self.state, ConnectionState::Idle) {
            ConnectionState::Connected(transport) => {
                // Re-open whatever id the channel holds right now; the
                // server decides whether it still knows it.
                let reconnect_id = transport.channel.channel_id();
                info!("channel {reconnect_id} inactive; reconnecting");
                // Keep the in-flight requests: they ride over to the new
                // channel, oldest first.
                let mut entries = transport.channel.drain_pending();
                entries.sort_by_key(|(_, pending)| pending.submitted_at);
                let carried = entries
                    .into_iter()
                    .map(|(_, pending)| CarriedRequest {
                        request: pending.request,
                        reply: pending.sender,
                    })
                    .collect();
                transport.close();

                let pending = HandshakePending {
                    waiters: Vec::new(),
                    queued: VecDeque::new(),
                    carried,
                };
                self.start_bootstrap(reconnect_id);
                self.state = ConnectionState::Reconnecting(pending);
            }
            ConnectionState::Disconnecting(mut pending) => {
                for reply in pending.replies.drain(..) {
                    let _ = reply.send(());
                }
                self.finish_disconnect(pending.after);
            }
            state => {
                self.state = state;
            }
        }
    }

    fn enter_connected(&mut self, transport: Transport, pending: HandshakePending) {
        if !transport.is_alive() {
            // The fresh transport died before its outcome was processed;
            // its inactive notification was consumed against the wrong
            // state, so go straight back to bootstrapping.
            warn!("freshly bootstrapped transport already dead; retrying");
            let channel_id = transport.channel.channel_id();
            self.start_bootstrap(channel_id);
            self.state = ConnectionState::Reconnecting(pending);
            return;
        }
        let transport = Arc::new(transport);
        info!("secure channel {} connected", transport.channel.channel_id());

        for waiter in pending.waiters {
            let _ = waiter.send(Ok(Arc::clone(&transport.channel)));
        }
        for carried in pending.carried {
            transport.submit(carried.request, carried.reply);
        }
        for queued in pending.queued {
            transport.submit(queued.request, queued.reply);
        }
        self.state = ConnectionState::Connected(transport);
    }

    fn finish_disconnect(&mut self, after: HandshakePending) {
        if after.waiters.is_empty() && after.queued.is_empty() {
            self.state = ConnectionState::Disconnected;
        } else {
            // Work arrived while the old channel was closing.
            self.start_bootstrap(0);
            self.state = ConnectionState::Connecting(after);
        }
    }

    /// Launch a bootstrap attempt for the next generation; its outcome comes
    /// back through the actor mailbox.
    fn start_bootstrap(&mut self, channel_id: u32) {
        self.generation += 1;
        let generation = self.generation;
        let config = self.config.clone();
        let outcome_tx = self.outcome_tx.clone();
        let inactive_tx = self.inactive_tx.clone();

        tokio::spawn(async move {
            let result =
                connect_with_retry(&config, channel_id, generation, inactive_tx).await;
            let _ = outcome_tx
                .send(ConnectOutcome { generation, result })
                .await;
        });
    }
}

/// One bootstrap attempt, retried exactly once with a brand-new channel id
/// when the server no longer knows the one we asked to re-open.
async fn connect_with_retry(
    config: &ClientConfig,
    channel_id: u32,
    generation: u64,
    inactive_tx: mpsc::Sender<TransportInactive>,
) -> Result<Transport, ClientError> {
    match bootstrap(config, channel_id, generation, inactive_tx.clone()).await {
        Ok(transport) => Ok(transport),
        Err(error) if is_stale_channel(&error) => {
            debug!("previous channel unusable ({error}); retrying with channelId=0");
            bootstrap(config, 0, generation, inactive_tx).await
        }
        Err(error) => Err(error),
    }
}

fn is_stale_channel(error: &ClientError) -> bool {
    matches!(
        error.status(),
        Some(status::BAD_TCP_SECURE_CHANNEL_UNKNOWN | status::BAD_SECURE_CHANNEL_ID_INVALID)
    )
}
