//! SCTP association management for NGAP transport.
//!
//! The association state machine from `sctp-proto` is owned by a driver task
//! spawned at connect time. [`SctpAssociation`] is a cheap handle onto it:
//! sends are forwarded as commands, received user messages arrive through a
//! channel, and closing the handle shuts the driver down, which ends the
//! receive channel and unblocks the reader.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use sctp_proto::{
    Association, AssociationHandle, ClientConfig, DatagramEvent, Endpoint, EndpointConfig, Event,
    Payload, PayloadProtocolIdentifier, StreamEvent, TransportConfig, Transmit,
};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::transport::{NgapTransport, ReceivedMessage, Result, SctpError, NGAP_PPID};

/// Default number of SCTP streams for NGAP
pub const DEFAULT_NUM_STREAMS: u16 = 2;
/// Default maximum message size (64KB)
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 65536;
/// Default receive buffer size (256KB)
pub const DEFAULT_RECEIVE_BUFFER_SIZE: u32 = 262144;

const COMMAND_QUEUE: usize = 256;
const INBOUND_QUEUE: usize = 1024;
const IDLE_WAKEUP: Duration = Duration::from_millis(100);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// SCTP association state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationState {
    Closed,
    Connecting,
    Established,
    ShuttingDown,
}

/// Configuration for SCTP association
#[derive(Debug, Clone)]
pub struct SctpConfig {
    pub max_outbound_streams: u16,
    pub max_inbound_streams: u16,
    pub max_message_size: u32,
    pub max_receive_buffer_size: u32,
    pub connect_timeout: Duration,
    pub rto_initial_ms: u64,
    pub rto_min_ms: u64,
    pub rto_max_ms: u64,
}

impl Default for SctpConfig {
    fn default() -> Self {
        Self {
            max_outbound_streams: DEFAULT_NUM_STREAMS,
            max_inbound_streams: DEFAULT_NUM_STREAMS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            connect_timeout: Duration::from_secs(30),
            rto_initial_ms: 3000,
            rto_min_ms: 1000,
            rto_max_ms: 60000,
        }
    }
}

enum Command {
    Send {
        stream_id: u16,
        data: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Maps a `sctp-proto` PPI back to its numeric value; NGAP's 60 is not one of
/// the WebRTC identifiers the library names, so it surfaces as `Unknown`.
fn ppid_value(ppi: PayloadProtocolIdentifier) -> u32 {
    match ppi {
        PayloadProtocolIdentifier::Dcep => 50,
        PayloadProtocolIdentifier::String => 51,
        PayloadProtocolIdentifier::Binary => 53,
        PayloadProtocolIdentifier::StringEmpty => 56,
        PayloadProtocolIdentifier::BinaryEmpty => 57,
        PayloadProtocolIdentifier::Unknown => NGAP_PPID,
    }
}

fn unspecified_for(remote: &SocketAddr) -> SocketAddr {
    let ip = if remote.is_ipv6() {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    } else {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    };
    SocketAddr::new(ip, 0)
}

/// Owns the Sans-IO association and its socket.
struct AssociationDriver {
    socket: Arc<UdpSocket>,
    remote_addr: SocketAddr,
    endpoint: Endpoint,
    handle: AssociationHandle,
    association: Association,
    state: AssociationState,
    pending_transmits: VecDeque<Transmit>,
    inbound: VecDeque<ReceivedMessage>,
    state_tx: watch::Sender<AssociationState>,
    config: SctpConfig,
}

impl AssociationDriver {
    fn set_state(&mut self, state: AssociationState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    /// Perform SCTP 4-way handshake
    async fn perform_handshake(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.config.connect_timeout;
        let mut buf = vec![0u8; self.config.max_receive_buffer_size as usize];

        while self.state == AssociationState::Connecting {
            if Instant::now() > deadline {
                return Err(SctpError::Timeout("Connection handshake timed out".into()));
            }

            self.poll_events();
            self.flush_transmits().await?;

            if !self.association.is_handshaking() {
                self.set_state(AssociationState::Established);
                info!("SCTP association established with {}", self.remote_addr);
                return Ok(());
            }

            match timeout(IDLE_WAKEUP, self.socket.recv_from(&mut buf)).await {
                Ok(Ok((len, from))) => self.handle_datagram(from, Bytes::copy_from_slice(&buf[..len])),
                Ok(Err(e)) => warn!("Error receiving during handshake: {}", e),
                Err(_) => trace!("Receive timeout, continuing handshake"),
            }
        }

        Ok(())
    }

    fn handle_datagram(&mut self, from: SocketAddr, data: Bytes) {
        trace!("Received {} bytes from {}", data.len(), from);

        if let Some((handle, event)) = self.endpoint.handle(Instant::now(), from, None, None, data) {
            if handle != self.handle {
                return;
            }
            match event {
                DatagramEvent::AssociationEvent(assoc_event) => {
                    self.association.handle_event(assoc_event);
                }
                DatagramEvent::NewAssociation(_) => {
                    debug!("Ignoring new association event (client mode)");
                }
            }
        }
    }

    /// Drive timers, drain association events and queue outgoing packets.
    fn poll_events(&mut self) {
        let now = Instant::now();
        if let Some(deadline) = self.association.poll_timeout() {
            if now >= deadline {
                self.association.handle_timeout(now);
            }
        }

        while let Some(event) = self.association.poll() {
            match event {
                Event::Connected => {
                    debug!("Association connected event");
                    if self.state == AssociationState::Connecting {
                        self.set_state(AssociationState::Established);
                    }
                }
                Event::AssociationLost { reason } => {
                    warn!("Association with {} lost: {}", self.remote_addr, reason);
                    self.set_state(AssociationState::Closed);
                }
                Event::Stream(StreamEvent::Readable { id }) => self.read_stream(id),
                Event::Stream(stream_event) => {
                    trace!("Stream event: {:?}", stream_event);
                }
                Event::DatagramReceived => {
                    trace!("Datagram received event");
                }
            }
        }

        // Streams opened by the peer
        while let Some(id) = self.association.accept_stream().map(|s| s.stream_identifier()) {
            debug!("Accepted stream {}", id);
            self.read_stream(id);
        }

        while let Some(transmit) = self.association.poll_transmit(now) {
            self.pending_transmits.push_back(transmit);
        }
        while let Some(transmit) = self.endpoint.poll_transmit() {
            self.pending_transmits.push_back(transmit);
        }
    }

    fn read_stream(&mut self, stream_id: u16) {
        let Ok(mut stream) = self.association.stream(stream_id) else {
            return;
        };
        while let Ok(Some(chunks)) = stream.read() {
            let total_len = chunks.len();
            if total_len == 0 {
                continue;
            }
            let mut buf = vec![0u8; total_len];
            match chunks.read(&mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    let msg = ReceivedMessage {
                        stream_id,
                        data: Bytes::from(buf),
                        ppid: ppid_value(chunks.ppi),
                    };
                    debug!(
                        "Received {} bytes on stream {} with PPID {}",
                        msg.data.len(),
                        stream_id,
                        msg.ppid
                    );
                    self.inbound.push_back(msg);
                }
                Err(e) => warn!("Failed to read chunks on stream {}: {}", stream_id, e),
            }
        }
    }

    /// Flush pending transmits to the network
    async fn flush_transmits(&mut self) -> Result<()> {
        while let Some(transmit) = self.pending_transmits.pop_front() {
            match &transmit.payload {
                Payload::RawEncode(chunks) => {
                    for chunk in chunks {
                        self.socket.send_to(chunk, transmit.remote).await?;
                        trace!("Sent {} bytes to {}", chunk.len(), transmit.remote);
                    }
                }
                Payload::PartialDecode(_) => {
                    trace!("Skipping PartialDecode payload for transmit");
                }
            }
        }
        Ok(())
    }

    fn write(&mut self, stream_id: u16, data: &[u8]) -> Result<()> {
        if self.state != AssociationState::Established {
            return Err(SctpError::InvalidState(
                "Cannot send: association not established".into(),
            ));
        }

        let ppi = PayloadProtocolIdentifier::from(NGAP_PPID);
        if self.association.stream(stream_id).is_err() {
            self.association
                .open_stream(stream_id, ppi)
                .map_err(|e| SctpError::StreamError(e.to_string()))?;
        }
        let mut stream = self
            .association
            .stream(stream_id)
            .map_err(|e| SctpError::StreamError(e.to_string()))?;
        stream
            .write_with_ppi(data, ppi)
            .map_err(|e| SctpError::StreamError(e.to_string()))?;

        debug!("Queued {} bytes on stream {} with PPID {}", data.len(), stream_id, NGAP_PPID);
        Ok(())
    }

    /// Graceful shutdown, bounded by [`SHUTDOWN_TIMEOUT`].
    async fn shutdown(&mut self, buf: &mut [u8]) {
        if self.state == AssociationState::Closed {
            return;
        }

        info!("Initiating SCTP shutdown with {}", self.remote_addr);
        self.set_state(AssociationState::ShuttingDown);

        if let Err(e) = self.association.shutdown() {
            debug!("Shutdown request rejected: {}", e);
        }
        self.poll_events();
        if let Err(e) = self.flush_transmits().await {
            warn!("Failed to flush shutdown: {}", e);
        }

        let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
        while !self.association.is_closed() && Instant::now() < deadline {
            if let Ok(Ok((len, from))) = timeout(IDLE_WAKEUP, self.socket.recv_from(buf)).await {
                self.handle_datagram(from, Bytes::copy_from_slice(&buf[..len]));
            }
            self.poll_events();
            if self.flush_transmits().await.is_err() {
                break;
            }
        }

        self.set_state(AssociationState::Closed);
        info!("SCTP shutdown complete");
    }

    /// Driver loop. Ends when the association closes or the handle asks it to;
    /// dropping `incoming` on exit ends the reader's stream.
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        incoming: mpsc::Sender<ReceivedMessage>,
    ) {
        let socket = Arc::clone(&self.socket);
        let mut buf = vec![0u8; self.config.max_receive_buffer_size as usize];
        let mut close_reply = None;

        while self.state == AssociationState::Established {
            let wake = self
                .association
                .poll_timeout()
                .map(tokio::time::Instant::from_std)
                .unwrap_or_else(|| tokio::time::Instant::now() + IDLE_WAKEUP);

            tokio::select! {
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => self.handle_datagram(from, Bytes::copy_from_slice(&buf[..len])),
                    Err(e) => {
                        warn!("Socket error on association with {}: {}", self.remote_addr, e);
                        self.set_state(AssociationState::Closed);
                    }
                },
                command = commands.recv() => match command {
                    Some(Command::Send { stream_id, data, reply }) => {
                        let _ = reply.send(self.write(stream_id, &data));
                    }
                    Some(Command::Close { reply }) => {
                        close_reply = Some(reply);
                        break;
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(wake) => {}
            }

            self.poll_events();
            while let Some(msg) = self.inbound.pop_front() {
                if incoming.send(msg).await.is_err() {
                    trace!("Receiver dropped, discarding message");
                }
            }
            if let Err(e) = self.flush_transmits().await {
                warn!("Failed to transmit to {}: {}", self.remote_addr, e);
                self.set_state(AssociationState::Closed);
            }
        }

        self.shutdown(&mut buf).await;
        if let Some(reply) = close_reply {
            let _ = reply.send(());
        }
        debug!("SCTP driver for {} stopped", self.remote_addr);
    }
}

/// Handle onto an SCTP association toward one AMF.
pub struct SctpAssociation {
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    commands: mpsc::Sender<Command>,
    incoming: Mutex<mpsc::Receiver<ReceivedMessage>>,
    state: watch::Receiver<AssociationState>,
    num_streams: u16,
}

impl SctpAssociation {
    /// Connect to a remote SCTP endpoint (AMF)
    pub async fn connect(remote_addr: SocketAddr, config: SctpConfig) -> Result<Self> {
        Self::connect_with_local(unspecified_for(&remote_addr), remote_addr, config).await
    }

    /// Connect to a remote SCTP endpoint with a specific local address
    pub async fn connect_with_local(
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        config: SctpConfig,
    ) -> Result<Self> {
        info!("Connecting to SCTP endpoint at {}", remote_addr);

        let socket = UdpSocket::bind(local_addr).await?;
        let actual_local = socket.local_addr()?;
        debug!("Bound to local address: {}", actual_local);

        let mut endpoint = Endpoint::new(Arc::new(EndpointConfig::new()), None);

        let transport_config = TransportConfig::default()
            .with_max_num_outbound_streams(config.max_outbound_streams)
            .with_max_num_inbound_streams(config.max_inbound_streams)
            .with_max_message_size(config.max_message_size)
            .with_max_receive_buffer_size(config.max_receive_buffer_size)
            .with_rto_initial_ms(config.rto_initial_ms)
            .with_rto_min_ms(config.rto_min_ms)
            .with_rto_max_ms(config.rto_max_ms);

        let mut client_config = ClientConfig::new();
        client_config.transport = Arc::new(transport_config);

        let (handle, association) = endpoint
            .connect(client_config, remote_addr)
            .map_err(|e| SctpError::ConnectionFailed(e.to_string()))?;

        let (state_tx, state_rx) = watch::channel(AssociationState::Connecting);
        let num_streams = config.max_outbound_streams;
        let mut driver = AssociationDriver {
            socket: Arc::new(socket),
            remote_addr,
            endpoint,
            handle,
            association,
            state: AssociationState::Connecting,
            pending_transmits: VecDeque::new(),
            inbound: VecDeque::new(),
            state_tx,
            config,
        };
        driver.perform_handshake().await?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (incoming_tx, incoming_rx) = mpsc::channel(INBOUND_QUEUE);
        tokio::spawn(driver.run(command_rx, incoming_tx));

        Ok(Self {
            remote_addr,
            local_addr: actual_local,
            commands: command_tx,
            incoming: Mutex::new(incoming_rx),
            state: state_rx,
            num_streams,
        })
    }

    /// Get the current state
    pub fn state(&self) -> AssociationState {
        *self.state.borrow()
    }

    /// Check if the association is established
    pub fn is_established(&self) -> bool {
        self.state() == AssociationState::Established
    }

    /// Get the remote address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Get the local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Outbound streams requested at association setup.
    pub fn num_streams(&self) -> u16 {
        self.num_streams
    }
}

#[async_trait]
impl NgapTransport for SctpAssociation {
    async fn send(&self, stream_id: u16, data: Bytes) -> Result<()> {
        let (reply, result) = oneshot::channel();
        self.commands
            .send(Command::Send {
                stream_id,
                data,
                reply,
            })
            .await
            .map_err(|_| SctpError::AssociationClosed)?;
        result.await.map_err(|_| SctpError::AssociationClosed)?
    }

    async fn recv(&self) -> Result<Option<ReceivedMessage>> {
        Ok(self.incoming.lock().await.recv().await)
    }

    async fn close(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Close { reply }).await.is_err() {
            // Driver already gone
            return Ok(());
        }
        let _ = done.await;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state() == AssociationState::Closed
    }

    fn peer(&self) -> String {
        self.remote_addr.to_string()
    }
}
