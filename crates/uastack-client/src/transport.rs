//! One established connection: bootstrap, read/write loops, correlation.
//!
//! `bootstrap` runs the HEL/ACK exchange and the asymmetric OPN handshake,
//! then hands back a [`Transport`] with three tasks behind it: a writer
//! draining a chunk-list mailbox (so every message's chunks hit the socket
//! contiguously), a read loop feeding the framing accumulator, and a token
//! renewal timer. Decode work runs on the channel's serialization queue;
//! responses are matched to pending requests by request id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::RngCore;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use uastack_core::channel::{
    decode_asymmetric, decode_symmetric, encode_asymmetric, encode_symmetric, ChannelParameters,
    ChannelRole, ChunkCollector, DecodedMessage, PendingRequest, SecureChannel, SecurityToken,
};
use uastack_core::framing::{
    AcknowledgeMessage, ErrorMessage, FramedReader, HelloMessage, MessageHeader, MessageType,
    PROTOCOL_VERSION,
};
use uastack_core::message::{
    CloseSecureChannelRequest, OpenSecureChannelRequest, RequestHeader, RequestMessage,
    ResponseMessage, SecurityTokenRequestType,
};
use uastack_core::security::ApplicationKeyPair;
use uastack_core::status;
use uastack_core::{SerializationQueue, UaError};

use crate::config::{socket_address, ClientConfig};
use crate::error::ClientError;

/// Notification that a transport's socket or pipeline died.
#[derive(Debug, Clone, Copy)]
pub struct TransportInactive {
    /// Which bootstrap produced the transport; lets the FSM ignore
    /// notifications from a connection it already replaced.
    pub generation: u64,
}

/// A live connection bound to one secure channel.
pub struct Transport {
    pub channel: Arc<SecureChannel>,
    queue: Arc<SerializationQueue>,
    writer_tx: mpsc::UnboundedSender<Vec<Vec<u8>>>,
    shutdown: watch::Sender<bool>,
    alive: Arc<AtomicBool>,
    keypair: Option<Arc<ApplicationKeyPair>>,
    default_timeout: Duration,
}

impl Transport {
    /// Whether the read loop is still running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Submit a request: assign the id, register the pending entry, encode,
    /// and hand the chunks to the writer, all as one ordered encode job.
    pub fn submit(
        &self,
        request: RequestMessage,
        sender: oneshot::Sender<Result<ResponseMessage, UaError>>,
    ) {
        let channel = Arc::clone(&self.channel);
        let writer = self.writer_tx.clone();
        let timeout = match request.request_header().timeout_hint {
            0 => self.default_timeout,
            hint => Duration::from_millis(u64::from(hint)),
        };

        let submitted = self.queue.encode(move || {
            let request_id = channel.next_request_id();
            let body = request.encode();
            match encode_symmetric(&channel, request_id, &body) {
                Ok(chunks) => {
                    channel.register_pending(
                        request_id,
                        PendingRequest {
                            request,
                            sender,
                            submitted_at: Instant::now(),
                        },
                    );

                    // Terminal watchdog: whatever else happens, the pending
                    // entry is removed once the timeout elapses.
                    let watchdog_channel = Arc::clone(&channel);
                    tokio::spawn(async move {
                        tokio::time::sleep(timeout).await;
                        if let Some(pending) = watchdog_channel.complete_pending(request_id) {
                            let _ = pending.sender.send(Err(UaError::new(
                                status::BAD_TIMEOUT,
                                "request timed out",
                            )));
                        }
                    });

                    // A closed writer means the connection is dying; the
                    // entry stays registered so the reconnect path carries
                    // it to the next channel (or the watchdog times it out).
                    if writer.send(chunks).is_err() {
                        debug!("writer closed; requestId={request_id} awaits reconnect");
                    }
                }
                Err(e) => {
                    let _ = sender.send(Err(e));
                }
            }
        });

        if let Err(e) = submitted {
            // The closure (and the response sender inside it) was dropped;
            // the caller observes a closed oneshot.
            warn!("encode submission rejected: {e}");
        }
    }

    /// Send a CloseSecureChannel request and let the writer flush it.
    pub fn send_close(&self) {
        let channel = Arc::clone(&self.channel);
        let writer = self.writer_tx.clone();
        let keypair = self.keypair.clone();
        let result = self.queue.encode(move || {
            let request = RequestMessage::CloseSecureChannel(CloseSecureChannelRequest {
                request_header: RequestHeader::new(0),
            });
            let request_id = channel.next_request_id();
            match encode_asymmetric(
                &channel,
                MessageType::CloseSecureChannel,
                request_id,
                &request.encode(),
                keypair.as_deref(),
            ) {
                Ok(chunk) => {
                    let _ = writer.send(vec![chunk]);
                }
                Err(e) => warn!("failed to encode CLO: {e}"),
            }
        });
        if let Err(e) = result {
            warn!("close submission rejected: {e}");
        }
    }

    /// Tear the connection down: stops the read loop and closes the writer.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Connect the socket, run HEL/ACK and the OPN handshake, spawn the
/// connection tasks.
///
/// `channel_id` 0 requests a brand-new channel; a nonzero id asks the server
/// to re-open that existing channel with a fresh token.
pub async fn bootstrap(
    config: &ClientConfig,
    channel_id: u32,
    generation: u64,
    inactive_tx: mpsc::Sender<TransportInactive>,
) -> Result<Transport, ClientError> {
    let address = socket_address(&config.endpoint_url)?;
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&address))
        .await
        .map_err(|_| ClientError::ConnectTimeout)??;
    let _ = stream.set_nodelay(true);

    let (read_half, mut write_half) = stream.into_split();
    // Until negotiation finishes, bound inbound messages by our own chunk
    // size; the ACK and the OPN response must fit regardless.
    let mut framed = FramedReader::new(read_half, config.channel.max_chunk_size);

    // HEL -> ACK
    let hello = HelloMessage {
        protocol_version: PROTOCOL_VERSION,
        receive_buffer_size: config.channel.max_chunk_size,
        send_buffer_size: config.channel.max_chunk_size,
        max_message_size: config.channel.max_message_size,
        max_chunk_count: config.channel.max_chunk_count,
        endpoint_url: config.endpoint_url.clone(),
    };
    write_half.write_all(&hello.encode()).await.map_err(UaError::from)?;

    let message = framed.next().await?;
    let ack = match MessageHeader::decode(&message)?.message_type {
        MessageType::Acknowledge => AcknowledgeMessage::decode(&message)?,
        MessageType::Error => {
            let error = ErrorMessage::decode(&message)?;
            return Err(UaError::new(error.error, error.reason).into());
        }
        other => {
            return Err(UaError::new(
                status::BAD_TCP_MESSAGE_TYPE_INVALID,
                format!("expected ACK, got {other:?}"),
            )
            .into());
        }
    };
    debug!(
        "negotiated: rx={} tx={} max_msg={} chunks={}",
        ack.receive_buffer_size, ack.send_buffer_size, ack.max_message_size, ack.max_chunk_count
    );

    let parameters = ChannelParameters::from_acknowledge(&ack, &config.channel)?;
    let channel = Arc::new(SecureChannel::new(
        ChannelRole::Client,
        Arc::clone(&config.security_policy),
        config.security_mode,
        parameters,
        config.keypair.as_ref().map(|k| k.certificate()),
    ));
    channel.set_channel_id(channel_id);
    channel.set_remote_certificate(config.server_certificate.clone());

    // OPN handshake.
    let client_nonce = random_nonce(config.security_policy.nonce_length());
    let open = RequestMessage::OpenSecureChannel(OpenSecureChannelRequest {
        request_header: RequestHeader::new(0),
        client_protocol_version: PROTOCOL_VERSION,
        request_type: if channel_id == 0 {
            SecurityTokenRequestType::Issue
        } else {
            SecurityTokenRequestType::Renew
        },
        security_mode: config.security_mode,
        client_nonce: (!client_nonce.is_empty()).then(|| client_nonce.clone()),
        requested_lifetime_ms: config.channel_lifetime.as_millis() as u32,
    });
    let open_request_id = channel.next_request_id();
    let open_chunk = encode_asymmetric(
        &channel,
        MessageType::OpenSecureChannel,
        open_request_id,
        &open.encode(),
        config.keypair.as_deref(),
    )?;
    write_half.write_all(&open_chunk).await.map_err(UaError::from)?;

    let message = framed.next().await?;
    let response = match MessageHeader::decode(&message)?.message_type {
        MessageType::OpenSecureChannel => {
            let decoded = decode_asymmetric(&channel, &message, config.keypair.as_deref())?;
            match ResponseMessage::decode(&decoded.body)? {
                ResponseMessage::OpenSecureChannel(response) => response,
                other => {
                    return Err(UaError::new(
                        status::BAD_TCP_INTERNAL_ERROR,
                        format!("expected OpenSecureChannelResponse, got {other:?}"),
                    )
                    .into());
                }
            }
        }
        MessageType::Error => {
            let error = ErrorMessage::decode(&message)?;
            return Err(UaError::new(error.error, error.reason).into());
        }
        other => {
            return Err(UaError::new(
                status::BAD_TCP_MESSAGE_TYPE_INVALID,
                format!("expected OPN, got {other:?}"),
            )
            .into());
        }
    };
    if response.response_header.service_result.is_bad() {
        return Err(UaError::new(
            response.response_header.service_result,
            "secure channel open rejected",
        )
        .into());
    }

    channel.set_channel_id(response.token.channel_id);
    let server_nonce = response.server_nonce.clone().unwrap_or_default();
    let lifetime = Duration::from_millis(u64::from(response.token.revised_lifetime_ms));
    channel.install_token(SecurityToken {
        channel_id: response.token.channel_id,
        token_id: response.token.token_id,
        created_at: Instant::now(),
        lifetime,
        keys: config
            .security_policy
            .derive_keys(&client_nonce, &server_nonce),
    });
    debug!(
        "secure channel {} open, token {}",
        response.token.channel_id, response.token.token_id
    );

    // Re-bound inbound framing by the negotiated receive buffer.
    framed.set_limit(parameters.local_receive_buffer_size);

    let queue = Arc::new(SerializationQueue::spawn());
    let (writer_tx, writer_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let renew_nonce = Arc::new(Mutex::new(client_nonce));
    let alive = Arc::new(AtomicBool::new(true));

    tokio::spawn(write_loop(write_half, writer_rx));
    tokio::spawn(read_loop(ReadLoop {
        channel: Arc::clone(&channel),
        queue: Arc::clone(&queue),
        framed,
        keypair: config.keypair.clone(),
        renew_nonce: Arc::clone(&renew_nonce),
        shutdown: shutdown_rx,
        shutdown_tx: shutdown_tx.clone(),
        alive: Arc::clone(&alive),
        inactive_tx,
        generation,
    }));
    tokio::spawn(renew_loop(RenewLoop {
        channel: Arc::clone(&channel),
        queue: Arc::clone(&queue),
        writer_tx: writer_tx.clone(),
        keypair: config.keypair.clone(),
        renew_nonce,
        security_mode: config.security_mode,
        lifetime,
        shutdown: shutdown_tx.subscribe(),
    }));

    Ok(Transport {
        channel,
        queue,
        writer_tx,
        shutdown: shutdown_tx,
        alive,
        keypair: config.keypair.clone(),
        default_timeout: config.request_timeout,
    })
}

fn random_nonce(length: usize) -> Vec<u8> {
    let mut nonce = vec![0u8; length];
    if length > 0 {
        rand::rngs::OsRng.fill_bytes(&mut nonce);
    }
    nonce
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Vec<Vec<u8>>>) {
    while let Some(chunks) = rx.recv().await {
        for chunk in &chunks {
            if writer.write_all(chunk).await.is_err() {
                return;
            }
        }
        if writer.flush().await.is_err() {
            return;
        }
    }
    let _ = writer.shutdown().await;
}

struct ReadLoop {
    channel: Arc<SecureChannel>,
    queue: Arc<SerializationQueue>,
    framed: FramedReader<tokio::net::tcp::OwnedReadHalf>,
    keypair: Option<Arc<ApplicationKeyPair>>,
    renew_nonce: Arc<Mutex<Vec<u8>>>,
    shutdown: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
    alive: Arc<AtomicBool>,
    inactive_tx: mpsc::Sender<TransportInactive>,
    generation: u64,
}

async fn read_loop(mut ctx: ReadLoop) {
    let mut collector = ChunkCollector::new(ctx.channel.parameters.local_max_chunk_count);

    let outcome: Result<(), UaError> = loop {
        let message = tokio::select! {
            result = ctx.framed.next() => match result {
                Ok(message) => message,
                Err(e) => break Err(e),
            },
            _ = ctx.shutdown.changed() => break Ok(()),
        };

        let header = match MessageHeader::decode(&message) {
            Ok(header) => header,
            Err(e) => break Err(e),
        };

        match header.message_type {
            MessageType::SecureMessage => match collector.push(message) {
                Ok(Some(chunks)) => {
                    let channel = Arc::clone(&ctx.channel);
                    let fatal = ctx.shutdown_tx.clone();
                    let submitted = ctx.queue.decode(move || {
                        decode_and_correlate(&channel, &chunks, &fatal);
                    });
                    if let Err(e) = submitted {
                        break Err(e);
                    }
                }
                Ok(None) => {}
                Err(e) => break Err(e),
            },
            MessageType::OpenSecureChannel => {
                // Token renewal response.
                let channel = Arc::clone(&ctx.channel);
                let keypair = ctx.keypair.clone();
                let renew_nonce = Arc::clone(&ctx.renew_nonce);
                let submitted = ctx.queue.decode(move || {
                    install_renewed_token(&channel, &message, keypair.as_deref(), &renew_nonce);
                });
                if let Err(e) = submitted {
                    break Err(e);
                }
            }
            MessageType::CloseSecureChannel => {
                debug!("server closed the secure channel");
                break Ok(());
            }
            MessageType::Error => {
                let error = ErrorMessage::decode(&message)
                    .map(|e| UaError::new(e.error, e.reason))
                    .unwrap_or_else(|e| e);
                break Err(error);
            }
            other => {
                break Err(UaError::new(
                    status::BAD_TCP_MESSAGE_TYPE_INVALID,
                    format!("unexpected {other:?} on established channel"),
                ));
            }
        }
    };

    if let Err(e) = &outcome {
        warn!("connection lost: {e}");
    }

    // Trailing buffers on the wire are dropped. Pending requests are NOT
    // failed here: the state machine decides whether they ride over to a
    // replacement channel or fail with the connection.
    ctx.queue.pause();
    ctx.alive.store(false, Ordering::SeqCst);
    let _ = ctx.inactive_tx.try_send(TransportInactive {
        generation: ctx.generation,
    });
}

/// Decode one reassembled message and resolve its pending request. Decode
/// failures are fatal to the connection: the shutdown signal stops the read
/// loop and the teardown path runs.
fn decode_and_correlate(
    channel: &Arc<SecureChannel>,
    chunks: &[Vec<u8>],
    fatal: &watch::Sender<bool>,
) {
    match decode_symmetric(channel, chunks) {
        Ok(DecodedMessage::Message { request_id, body }) => {
            match ResponseMessage::decode(&body) {
                Ok(response) => match channel.complete_pending(request_id) {
                    Some(pending) => {
                        let _ = pending.sender.send(Ok(response));
                    }
                    None => {
                        warn!("no pending request for requestId={request_id}; response dropped");
                    }
                },
                Err(e) => {
                    warn!("undecodable response for requestId={request_id}: {e}");
                    if let Some(pending) = channel.complete_pending(request_id) {
                        let _ = pending.sender.send(Err(e));
                    }
                }
            }
        }
        Ok(DecodedMessage::Aborted {
            request_id,
            status: abort_status,
            reason,
        }) => {
            debug!("message aborted: requestId={request_id} status={abort_status} ({reason})");
            if let Some(pending) = channel.complete_pending(request_id) {
                let _ = pending
                    .sender
                    .send(Err(UaError::new(abort_status, format!("message aborted: {reason}"))));
            }
        }
        Err(e) => {
            warn!("failed to decode message: {e}");
            channel.fail_all_pending(&e);
            let _ = fatal.send(true);
        }
    }
}

/// Handle an OPN renewal response: derive the new keys and rotate tokens.
fn install_renewed_token(
    channel: &Arc<SecureChannel>,
    message: &[u8],
    keypair: Option<&ApplicationKeyPair>,
    renew_nonce: &Mutex<Vec<u8>>,
) {
    let result = decode_asymmetric(channel, message, keypair)
        .and_then(|decoded| ResponseMessage::decode(&decoded.body));
    match result {
        Ok(ResponseMessage::OpenSecureChannel(response)) => {
            let client_nonce = renew_nonce.lock().expect("lock poisoned").clone();
            let server_nonce = response.server_nonce.unwrap_or_default();
            channel.install_token(SecurityToken {
                channel_id: response.token.channel_id,
                token_id: response.token.token_id,
                created_at: Instant::now(),
                lifetime: Duration::from_millis(u64::from(response.token.revised_lifetime_ms)),
                keys: channel.policy.derive_keys(&client_nonce, &server_nonce),
            });
            debug!("token renewed: id={}", response.token.token_id);
        }
        Ok(other) => warn!("unexpected OPN payload: {other:?}"),
        Err(e) => warn!("failed to decode renewal response: {e}"),
    }
}

struct RenewLoop {
    channel: Arc<SecureChannel>,
    queue: Arc<SerializationQueue>,
    writer_tx: mpsc::UnboundedSender<Vec<Vec<u8>>>,
    keypair: Option<Arc<ApplicationKeyPair>>,
    renew_nonce: Arc<Mutex<Vec<u8>>>,
    security_mode: uastack_core::MessageSecurityMode,
    lifetime: Duration,
    shutdown: watch::Receiver<bool>,
}

/// Request a fresh token at 75 % of the token lifetime, forever.
async fn renew_loop(mut ctx: RenewLoop) {
    let interval = (ctx.lifetime * 3 / 4).max(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = ctx.shutdown.changed() => return,
        }

        let channel = Arc::clone(&ctx.channel);
        let writer = ctx.writer_tx.clone();
        let keypair = ctx.keypair.clone();
        let renew_nonce = Arc::clone(&ctx.renew_nonce);
        let security_mode = ctx.security_mode;
        let lifetime_ms = ctx.lifetime.as_millis() as u32;

        let submitted = ctx.queue.encode(move || {
            let client_nonce = random_nonce(channel.policy.nonce_length());
            *renew_nonce.lock().expect("lock poisoned") = client_nonce.clone();

            let request = RequestMessage::OpenSecureChannel(OpenSecureChannelRequest {
                request_header: RequestHeader::new(0),
                client_protocol_version: PROTOCOL_VERSION,
                request_type: SecurityTokenRequestType::Renew,
                security_mode,
                client_nonce: (!client_nonce.is_empty()).then_some(client_nonce),
                requested_lifetime_ms: lifetime_ms,
            });
            let request_id = channel.next_request_id();
            match encode_asymmetric(
                &channel,
                MessageType::OpenSecureChannel,
                request_id,
                &request.encode(),
                keypair.as_deref(),
            ) {
                Ok(chunk) => {
                    let _ = writer.send(vec![chunk]);
                }
                Err(e) => warn!("failed to encode renewal OPN: {e}"),
            }
        });
        if submitted.is_err() {
            return;
        }
    }
}
