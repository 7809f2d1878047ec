//! The per-connection handler pipeline.
//!
//! Each accepted socket walks three phases in order: Hello, then Opening,
//! then Open. The first message of each phase must be HEL, OPN, and MSG/CLO
//! respectively; anything else is fatal. Fatal protocol errors emit an ERR
//! message before the socket closes; plain IO errors close silently.
//!
//! Request handlers run on the worker executor, never on the channel's
//! decode queue.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngCore;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use uastack_core::channel::{
    decode_asymmetric, decode_symmetric, encode_asymmetric, encode_symmetric, peek_channel_id,
    peek_asymmetric_policy_uri, ChannelParameters, ChannelRole, ChunkCollector, DecodedMessage,
    DecodedOpen, SecureChannel, SecurityToken,
};
use uastack_core::framing::{
    AcknowledgeMessage, ErrorMessage, FramedReader, HelloMessage, MessageHeader, MessageType,
    PROTOCOL_VERSION,
};
use uastack_core::message::{
    ChannelSecurityToken, OpenSecureChannelRequest, OpenSecureChannelResponse, RequestMessage,
    ResponseHeader, ResponseMessage,
};
use uastack_core::security::{self, ApplicationKeyPair};
use uastack_core::status;
use uastack_core::{SerializationQueue, UaError};

use crate::ServerContext;

/// Why the symmetric phase ended.
enum LoopSignal {
    /// Client sent CLO; remove the channel.
    Closed,
    /// A decode job hit a fatal error; ERR was already queued.
    Fatal,
}

/// Serve one accepted connection to completion.
pub(crate) async fn serve(ctx: Arc<ServerContext>, stream: TcpStream, peer: SocketAddr) {
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    let mut framed = FramedReader::new(read_half, ctx.config.channel.max_chunk_size);
    let (writer_tx, writer_rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(write_half, writer_rx));

    match run_pipeline(&ctx, &mut framed, &writer_tx, peer).await {
        Ok(()) => debug!(remote = %peer, "connection finished"),
        Err(error) if error.code == status::BAD_CONNECTION_CLOSED => {
            // IO failures close silently.
            debug!(remote = %peer, "io error; channel closed: {}", error.message);
        }
        Err(error) => {
            warn!(remote = %peer, "fatal transport error: {error}");
            let _ = writer_tx.send(vec![ErrorMessage::from_error(&error).encode()]);
        }
    }
}

async fn run_pipeline(
    ctx: &Arc<ServerContext>,
    framed: &mut FramedReader<OwnedReadHalf>,
    writer_tx: &mpsc::UnboundedSender<Vec<Vec<u8>>>,
    peer: SocketAddr,
) -> Result<(), UaError> {
    // -- Phase 1: Hello ---------------------------------------------------
    let message = framed.next().await?;
    let header = MessageHeader::decode(&message)?;
    if header.message_type != MessageType::Hello {
        return Err(UaError::new(
            status::BAD_TCP_MESSAGE_TYPE_INVALID,
            format!("expected HEL, got {:?}", header.message_type),
        ));
    }
    if message.len() as u32 > uastack_core::framing::messages::MAX_HANDSHAKE_MESSAGE_SIZE {
        return Err(UaError::new(
            status::BAD_TCP_MESSAGE_TOO_LARGE,
            format!("HEL of {} bytes exceeds handshake limit", message.len()),
        ));
    }
    let hello = HelloMessage::decode(&message)?;
    debug!(remote = %peer, "received Hello for {}", hello.endpoint_url);

    if hello.protocol_version < PROTOCOL_VERSION {
        return Err(UaError::new(
            status::BAD_PROTOCOL_VERSION_UNSUPPORTED,
            format!("unsupported protocol version: {}", hello.protocol_version),
        ));
    }
    if !ctx.endpoints.knows_url(&hello.endpoint_url) {
        return Err(UaError::new(
            status::BAD_TCP_ENDPOINT_URL_INVALID,
            format!("unrecognized endpoint url: {}", hello.endpoint_url),
        ));
    }

    let parameters = ChannelParameters::from_hello(&hello, &ctx.config.channel)?;
    framed.set_limit(parameters.local_receive_buffer_size);

    let ack = AcknowledgeMessage {
        protocol_version: PROTOCOL_VERSION,
        receive_buffer_size: parameters.local_receive_buffer_size,
        send_buffer_size: parameters.local_send_buffer_size,
        max_message_size: parameters.local_max_message_size,
        max_chunk_count: parameters.local_max_chunk_count,
    };
    writer_tx
        .send(vec![ack.encode()])
        .map_err(|_| UaError::from_code(status::BAD_CONNECTION_CLOSED))?;
    debug!(remote = %peer, "sent Acknowledge");

    // -- Phase 2: Opening -------------------------------------------------
    let message = framed.next().await?;
    let header = MessageHeader::decode(&message)?;
    if header.message_type != MessageType::OpenSecureChannel {
        return Err(UaError::new(
            status::BAD_TCP_MESSAGE_TYPE_INVALID,
            format!("expected OPN, got {:?}", header.message_type),
        ));
    }

    let requested_channel_id = peek_channel_id(&message)?;
    let policy_uri = peek_asymmetric_policy_uri(&message)?;
    let policy = security::policy_from_uri(&policy_uri)?;

    let channel = if requested_channel_id == 0 {
        Arc::new(SecureChannel::new(
            ChannelRole::Server,
            policy,
            uastack_core::MessageSecurityMode::None,
            parameters,
            ctx.config.keypair.as_ref().map(|k| k.certificate()),
        ))
    } else {
        // Client asks to re-open an existing channel over a new socket.
        let existing = ctx.channel(requested_channel_id).ok_or_else(|| {
            UaError::new(
                status::BAD_TCP_SECURE_CHANNEL_UNKNOWN,
                format!("unknown secure channel id: {requested_channel_id}"),
            )
        })?;
        if existing.policy.uri() != policy_uri {
            return Err(UaError::new(
                status::BAD_SECURITY_POLICY_REJECTED,
                "policy changed on channel re-open",
            ));
        }
        existing.reset_receive_sequence();
        existing
    };

    let decoded = decode_asymmetric(&channel, &message, ctx.config.keypair.as_deref())?;
    let open = match RequestMessage::decode(&decoded.body)? {
        RequestMessage::OpenSecureChannel(open) => open,
        other => {
            return Err(UaError::new(
                status::BAD_TCP_MESSAGE_TYPE_INVALID,
                format!("expected OpenSecureChannelRequest, got {other:?}"),
            ));
        }
    };

    if ctx.endpoints.find(&policy_uri, open.security_mode).is_none() {
        return Err(UaError::new(
            status::BAD_SECURITY_MODE_REJECTED,
            format!(
                "no endpoint for policy {policy_uri} with mode {:?}",
                open.security_mode
            ),
        ));
    }
    channel.set_mode(open.security_mode);
    channel.set_remote_certificate(decoded.header.sender_certificate.clone());

    let channel_id = if requested_channel_id == 0 {
        ctx.next_channel_id.next()
    } else {
        requested_channel_id
    };
    channel.set_channel_id(channel_id);

    issue_token(ctx, &channel, &open, channel_id, decoded.request_id, writer_tx)?;

    ctx.register_channel(Arc::clone(&channel));
    let (close_tx, mut close_rx) = watch::channel(false);
    ctx.register_connection(channel_id, close_tx);
    info!(remote = %peer, "secure channel {channel_id} open ({policy_uri})");

    // -- Phase 3: Open ----------------------------------------------------
    let queue = Arc::new(SerializationQueue::spawn());
    let mut collector = ChunkCollector::new(channel.parameters.local_max_chunk_count);
    let (signal_tx, mut signal_rx) = mpsc::channel::<LoopSignal>(4);

    let outcome: Result<Option<LoopSignal>, UaError> = loop {
        let message = tokio::select! {
            result = framed.next() => match result {
                Ok(message) => message,
                Err(e) => break Err(e),
            },
            _ = close_rx.changed() => {
                debug!(remote = %peer, "connection force-closed");
                break Ok(None);
            }
            Some(signal) = signal_rx.recv() => break Ok(Some(signal)),
        };

        let header = match MessageHeader::decode(&message) {
            Ok(header) => header,
            Err(e) => break Err(e),
        };

        match header.message_type {
            MessageType::SecureMessage => match collector.push(message) {
                Ok(Some(chunks)) => {
                    let job = SymmetricJob {
                        ctx: Arc::clone(ctx),
                        channel: Arc::clone(&channel),
                        queue: Arc::clone(&queue),
                        writer_tx: writer_tx.clone(),
                        signal_tx: signal_tx.clone(),
                    };
                    if let Err(e) = queue.decode(move || job.run(chunks)) {
                        break Err(e);
                    }
                }
                Ok(None) => {}
                Err(e) => break Err(e),
            },
            MessageType::OpenSecureChannel => {
                // Token renewal on the established channel.
                let ctx = Arc::clone(ctx);
                let channel = Arc::clone(&channel);
                let writer = writer_tx.clone();
                let keypair = ctx.config.keypair.clone();
                let signal = signal_tx.clone();
                if let Err(e) = queue.decode(move || {
                    if let Err(e) = renew_token(&ctx, &channel, &message, keypair.as_deref(), &writer)
                    {
                        warn!("token renewal failed: {e}");
                        let _ = writer.send(vec![ErrorMessage::from_error(&e).encode()]);
                        let _ = signal.try_send(LoopSignal::Fatal);
                    }
                }) {
                    break Err(e);
                }
            }
            MessageType::CloseSecureChannel => {
                let channel = Arc::clone(&channel);
                let keypair = ctx.config.keypair.clone();
                let signal = signal_tx.clone();
                if let Err(e) = queue.decode(move || {
                    match decode_asymmetric(&channel, &message, keypair.as_deref()) {
                        Ok(_) => {
                            let _ = signal.try_send(LoopSignal::Closed);
                        }
                        Err(e) => {
                            warn!("undecodable CLO: {e}");
                            let _ = signal.try_send(LoopSignal::Fatal);
                        }
                    }
                }) {
                    break Err(e);
                }
            }
            other => {
                break Err(UaError::new(
                    status::BAD_TCP_MESSAGE_TYPE_INVALID,
                    format!("unexpected {other:?} on established channel"),
                ));
            }
        }
    };

    queue.pause();
    ctx.remove_connection(channel_id);

    match outcome {
        Ok(Some(LoopSignal::Closed)) => {
            // A clean CLO frees the channel id immediately.
            ctx.remove_channel(channel_id);
            info!(remote = %peer, "secure channel {channel_id} closed");
            Ok(())
        }
        Ok(Some(LoopSignal::Fatal)) => {
            ctx.remove_channel(channel_id);
            Ok(())
        }
        // Connection lost without CLO: the channel stays in the table so
        // the client can re-open it on a new socket.
        Ok(None) => Ok(()),
        Err(e) if e.code == status::BAD_CONNECTION_CLOSED => {
            debug!(remote = %peer, "connection lost; channel {channel_id} retained for re-open");
            Err(e)
        }
        Err(e) => {
            ctx.remove_channel(channel_id);
            Err(e)
        }
    }
}

/// Issue a fresh security token for `channel` and queue the OPN response.
fn issue_token(
    ctx: &Arc<ServerContext>,
    channel: &Arc<SecureChannel>,
    open: &OpenSecureChannelRequest,
    channel_id: u32,
    request_id: u32,
    writer_tx: &mpsc::UnboundedSender<Vec<Vec<u8>>>,
) -> Result<(), UaError> {
    let token_id = ctx.next_token_id.next();
    let client_nonce = open.client_nonce.clone().unwrap_or_default();
    let server_nonce = random_nonce(channel.policy.nonce_length());

    let requested = Duration::from_millis(u64::from(open.requested_lifetime_ms));
    let lifetime = if requested.is_zero() {
        ctx.config.max_token_lifetime
    } else {
        requested.min(ctx.config.max_token_lifetime)
    };

    channel.install_token(SecurityToken {
        channel_id,
        token_id,
        created_at: Instant::now(),
        lifetime,
        keys: channel.policy.derive_keys(&client_nonce, &server_nonce),
    });

    let response = ResponseMessage::OpenSecureChannel(OpenSecureChannelResponse {
        response_header: ResponseHeader::good(open.request_header.request_handle),
        server_protocol_version: PROTOCOL_VERSION,
        token: ChannelSecurityToken {
            channel_id,
            token_id,
            revised_lifetime_ms: lifetime.as_millis() as u32,
        },
        server_nonce: (!server_nonce.is_empty()).then_some(server_nonce),
    });
    let chunk = encode_asymmetric(
        channel,
        MessageType::OpenSecureChannel,
        request_id,
        &response.encode(),
        ctx.config.keypair.as_deref(),
    )?;
    writer_tx
        .send(vec![chunk])
        .map_err(|_| UaError::from_code(status::BAD_CONNECTION_CLOSED))?;
    debug!("issued token {token_id} on channel {channel_id}");
    Ok(())
}

/// Handle an OPN renewal on an established channel.
fn renew_token(
    ctx: &Arc<ServerContext>,
    channel: &Arc<SecureChannel>,
    message: &[u8],
    keypair: Option<&ApplicationKeyPair>,
    writer_tx: &mpsc::UnboundedSender<Vec<Vec<u8>>>,
) -> Result<(), UaError> {
    let decoded: DecodedOpen = decode_asymmetric(channel, message, keypair)?;
    let open = match RequestMessage::decode(&decoded.body)? {
        RequestMessage::OpenSecureChannel(open) => open,
        other => {
            return Err(UaError::new(
                status::BAD_TCP_MESSAGE_TYPE_INVALID,
                format!("expected OpenSecureChannelRequest, got {other:?}"),
            ));
        }
    };
    issue_token(
        ctx,
        channel,
        &open,
        channel.channel_id(),
        decoded.request_id,
        writer_tx,
    )
}

/// Decode work for one reassembled symmetric message.
struct SymmetricJob {
    ctx: Arc<ServerContext>,
    channel: Arc<SecureChannel>,
    queue: Arc<SerializationQueue>,
    writer_tx: mpsc::UnboundedSender<Vec<Vec<u8>>>,
    signal_tx: mpsc::Sender<LoopSignal>,
}

impl SymmetricJob {
    fn run(self, chunks: Vec<Vec<u8>>) {
        match decode_symmetric(&self.channel, &chunks) {
            Ok(DecodedMessage::Message { request_id, body }) => {
                match RequestMessage::decode(&body) {
                    Ok(request) => self.dispatch(request_id, request),
                    Err(e) => {
                        debug!("undecodable request ({e}); answering with fault");
                        self.respond(request_id, ResponseMessage::fault(0, e.code));
                    }
                }
            }
            Ok(DecodedMessage::Aborted {
                request_id,
                status: abort_status,
                reason,
            }) => {
                debug!(
                    "client aborted requestId={request_id}: {abort_status} ({reason}); chunks discarded"
                );
            }
            Err(e) => {
                warn!("failed to decode message: {e}");
                let _ = self
                    .writer_tx
                    .send(vec![ErrorMessage::from_error(&e).encode()]);
                let _ = self.signal_tx.try_send(LoopSignal::Fatal);
            }
        }
    }

    /// Run the handler on the worker executor and queue the response.
    fn dispatch(self, request_id: u32, request: RequestMessage) {
        tokio::spawn(async move {
            let response = match &request {
                // GetEndpoints is answered by the stack itself.
                RequestMessage::GetEndpoints(r) => {
                    ResponseMessage::GetEndpoints(uastack_core::message::GetEndpointsResponse {
                        response_header: ResponseHeader::good(r.request_header.request_handle),
                        endpoints: self.ctx.endpoints.descriptions(
                            self.ctx
                                .config
                                .keypair
                                .as_ref()
                                .map(|k| k.certificate())
                                .as_deref(),
                        ),
                    })
                }
                _ => self.ctx.dispatcher.dispatch(&request),
            };
            self.respond(request_id, response);
        });
    }

    fn respond(&self, request_id: u32, response: ResponseMessage) {
        let channel = Arc::clone(&self.channel);
        let writer = self.writer_tx.clone();
        let result = self.queue.encode(move || {
            match encode_symmetric(&channel, request_id, &response.encode()) {
                Ok(chunk_list) => {
                    let _ = writer.send(chunk_list);
                }
                Err(e) if e.code == status::BAD_REQUEST_TOO_LARGE => {
                    // The response does not fit the peer's negotiated
                    // limits: abort this one message, keep the channel.
                    debug!("response for requestId={request_id} oversized; sending abort");
                    match uastack_core::channel::encode_abort(
                        &channel,
                        request_id,
                        status::BAD_RESPONSE_TOO_LARGE,
                        &e.message,
                    ) {
                        Ok(abort) => {
                            let _ = writer.send(vec![abort]);
                        }
                        Err(e) => warn!("failed to encode abort chunk: {e}"),
                    }
                }
                Err(e) => warn!("failed to encode response for requestId={request_id}: {e}"),
            }
        });
        if let Err(e) = result {
            warn!("response encode submission rejected: {e}");
        }
    }
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
