//! GTP-U tunnel management
//!
//! A [`TunnelManager`] owns the gNB's N3 socket. Each tunnel binds one
//! downlink TEID to a local interface: G-PDUs arriving with that TEID are
//! written to the interface, and IP packets read from the interface are sent
//! to the UPF as G-PDUs with the uplink TEID and the session's QFI.
//!
//! At most one tunnel exists per downlink TEID. Closing a tunnel stops its
//! uplink task and removes the interface before returning, so the same
//! interface name can be used again right away.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use coretester_common::{log_gtp_message, Direction};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::codec::{GtpError, GtpMessage, GtpMessageType};
use crate::device::{DeviceSpec, PacketPort, TunnelDevice, MAX_INTERFACE_NAME_LEN};

/// GTP-U default port
pub const GTP_U_PORT: u16 = 2152;

/// Largest datagram read from the N3 socket.
const MAX_DATAGRAM_SIZE: usize = 65535;

/// Tunnel management errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("a tunnel with DL TEID {0:#x} already exists")]
    TeidInUse(u32),
    #[error("no tunnel with DL TEID {0:#x}")]
    NotFound(u32),
    #[error("interface {0} already exists")]
    InterfaceExists(String),
    #[error("invalid tunnel parameter: {0}")]
    InvalidParameter(String),
    #[error("tunnel device error: {0}")]
    Device(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("GTP codec error: {0}")]
    Codec(#[from] GtpError),
}

/// Parameters of one tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    /// Local interface to create, e.g. `ellatun0`
    pub interface_name: String,
    /// UE address assigned to the interface
    pub ue_ip: IpAddr,
    /// Prefix routed through the interface
    pub prefix_len: u8,
    /// UPF N3 address
    pub peer_ip: IpAddr,
    pub peer_port: u16,
    pub ul_teid: u32,
    pub dl_teid: u32,
    pub mtu: u16,
    pub qfi: u8,
}

impl TunnelConfig {
    pub fn new(
        interface_name: impl Into<String>,
        ue_ip: IpAddr,
        peer_ip: IpAddr,
        ul_teid: u32,
        dl_teid: u32,
        mtu: u16,
        qfi: u8,
    ) -> Self {
        Self {
            interface_name: interface_name.into(),
            ue_ip,
            prefix_len: if ue_ip.is_ipv4() { 32 } else { 128 },
            peer_ip,
            peer_port: GTP_U_PORT,
            ul_teid,
            dl_teid,
            mtu,
            qfi,
        }
    }

    pub fn with_prefix_len(mut self, prefix_len: u8) -> Self {
        self.prefix_len = prefix_len;
        self
    }

    pub fn peer(&self) -> SocketAddr {
        SocketAddr::new(self.peer_ip, self.peer_port)
    }

    pub fn validate(&self) -> Result<(), TunnelError> {
        let invalid = |what: String| Err(TunnelError::InvalidParameter(what));
        if self.interface_name.is_empty() || self.interface_name.len() > MAX_INTERFACE_NAME_LEN {
            return invalid(format!("interface name {:?}", self.interface_name));
        }
        if self.ul_teid == 0 || self.dl_teid == 0 {
            return invalid("TEID 0".into());
        }
        if self.qfi > 63 {
            return invalid(format!("QFI {}", self.qfi));
        }
        if self.mtu == 0 {
            return invalid("MTU 0".into());
        }
        let max_prefix = if self.ue_ip.is_ipv4() { 32 } else { 128 };
        if self.prefix_len > max_prefix {
            return invalid(format!("prefix length {}", self.prefix_len));
        }
        Ok(())
    }
}

/// Packet counters of one tunnel.
#[derive(Debug, Default)]
pub struct TunnelStats {
    pub uplink_packets: AtomicU64,
    pub downlink_packets: AtomicU64,
}

impl TunnelStats {
    pub fn uplink(&self) -> u64 {
        self.uplink_packets.load(Ordering::Relaxed)
    }

    pub fn downlink(&self) -> u64 {
        self.downlink_packets.load(Ordering::Relaxed)
    }
}

/// Returned by [`TunnelManager::add_tunnel`].
#[derive(Debug, Clone)]
pub struct TunnelHandle {
    pub interface_name: String,
    pub ul_teid: u32,
    pub dl_teid: u32,
    pub peer: SocketAddr,
    pub qfi: u8,
    pub stats: Arc<TunnelStats>,
}

struct TunnelEntry {
    handle: TunnelHandle,
    port: Arc<dyn PacketPort>,
    uplink: JoinHandle<()>,
}

enum TunnelSlot {
    /// Interface creation in progress; the TEID is reserved.
    Opening,
    Open(TunnelEntry),
}

type TunnelTable = Arc<Mutex<HashMap<u32, TunnelSlot>>>;

fn lock(table: &TunnelTable) -> MutexGuard<'_, HashMap<u32, TunnelSlot>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Tunnel manager for GTP-U
pub struct TunnelManager {
    socket: Arc<UdpSocket>,
    device: Arc<dyn TunnelDevice>,
    tunnels: TunnelTable,
    reader: JoinHandle<()>,
}

impl TunnelManager {
    /// Binds the N3 socket and starts the downlink reader.
    pub async fn bind(local: SocketAddr, device: Arc<dyn TunnelDevice>) -> Result<Self, TunnelError> {
        let socket = Arc::new(UdpSocket::bind(local).await?);
        info!(address = %socket.local_addr()?, "GTP-U socket bound");
        let tunnels: TunnelTable = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn(downlink_loop(Arc::clone(&socket), Arc::clone(&tunnels)));
        Ok(Self {
            socket,
            device,
            tunnels,
            reader,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TunnelError> {
        Ok(self.socket.local_addr()?)
    }

    /// Creates the interface and starts forwarding for `config.dl_teid`.
    pub async fn add_tunnel(&self, config: TunnelConfig) -> Result<TunnelHandle, TunnelError> {
        config.validate()?;
        {
            let mut tunnels = lock(&self.tunnels);
            if tunnels.contains_key(&config.dl_teid) {
                return Err(TunnelError::TeidInUse(config.dl_teid));
            }
            tunnels.insert(config.dl_teid, TunnelSlot::Opening);
        }

        let spec = DeviceSpec {
            name: config.interface_name.clone(),
            address: config.ue_ip,
            prefix_len: config.prefix_len,
            mtu: config.mtu,
        };
        let port = match self.device.create(&spec).await {
            Ok(port) => port,
            Err(e) => {
                lock(&self.tunnels).remove(&config.dl_teid);
                return Err(e);
            }
        };

        let handle = TunnelHandle {
            interface_name: config.interface_name.clone(),
            ul_teid: config.ul_teid,
            dl_teid: config.dl_teid,
            peer: config.peer(),
            qfi: config.qfi,
            stats: Arc::new(TunnelStats::default()),
        };
        let uplink = tokio::spawn(uplink_loop(
            Arc::clone(&self.socket),
            Arc::clone(&port),
            handle.clone(),
        ));

        lock(&self.tunnels).insert(
            config.dl_teid,
            TunnelSlot::Open(TunnelEntry {
                handle: handle.clone(),
                port,
                uplink,
            }),
        );
        info!(
            interface = %handle.interface_name,
            ue_ip = %config.ue_ip,
            peer = %handle.peer,
            ul_teid = handle.ul_teid,
            dl_teid = handle.dl_teid,
            qfi = handle.qfi,
            "GTP tunnel added"
        );
        Ok(handle)
    }

    /// Stops forwarding for `dl_teid` and removes its interface.
    pub async fn close_tunnel(&self, dl_teid: u32) -> Result<(), TunnelError> {
        let entry = {
            let mut tunnels = lock(&self.tunnels);
            match tunnels.remove(&dl_teid) {
                Some(TunnelSlot::Open(entry)) => entry,
                Some(TunnelSlot::Opening) => {
                    tunnels.insert(dl_teid, TunnelSlot::Opening);
                    return Err(TunnelError::NotFound(dl_teid));
                }
                None => return Err(TunnelError::NotFound(dl_teid)),
            }
        };

        entry.uplink.abort();
        // Wait for the task to drop its port before the interface goes away.
        let _ = entry.uplink.await;
        drop(entry.port);
        self.device.destroy(&entry.handle.interface_name).await?;
        info!(interface = %entry.handle.interface_name, dl_teid, "GTP tunnel closed");
        Ok(())
    }

    pub fn get(&self, dl_teid: u32) -> Option<TunnelHandle> {
        match lock(&self.tunnels).get(&dl_teid) {
            Some(TunnelSlot::Open(entry)) => Some(entry.handle.clone()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.tunnels)
            .values()
            .filter(|slot| matches!(slot, TunnelSlot::Open(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes every tunnel and stops the downlink reader.
    pub async fn shutdown(&self) {
        let teids: Vec<u32> = lock(&self.tunnels).keys().copied().collect();
        for teid in teids {
            if let Err(e) = self.close_tunnel(teid).await {
                warn!(dl_teid = teid, "failed to close tunnel: {}", e);
            }
        }
        self.reader.abort();
    }
}

impl Drop for TunnelManager {
    fn drop(&mut self) {
        self.reader.abort();
        for (_, slot) in lock(&self.tunnels).drain() {
            if let TunnelSlot::Open(entry) = slot {
                entry.uplink.abort();
            }
        }
    }
}

async fn uplink_loop(socket: Arc<UdpSocket>, port: Arc<dyn PacketPort>, handle: TunnelHandle) {
    loop {
        let packet = match port.read_packet().await {
            Ok(packet) => packet,
            Err(e) => {
                debug!(interface = %handle.interface_name, "uplink reader stopped: {}", e);
                return;
            }
        };
        let message = GtpMessage::uplink(handle.ul_teid, handle.qfi, packet);
        let encoded = match message.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(interface = %handle.interface_name, "dropping uplink packet: {}", e);
                continue;
            }
        };
        if let Err(e) = socket.send_to(&encoded, handle.peer).await {
            warn!(peer = %handle.peer, "error writing to GTP-U socket: {}", e);
            continue;
        }
        handle.stats.uplink_packets.fetch_add(1, Ordering::Relaxed);
        log_gtp_message(Direction::Tx, "G-PDU", &encoded);
    }
}

async fn downlink_loop(socket: Arc<UdpSocket>, tunnels: TunnelTable) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("error reading from GTP-U socket: {}", e);
                continue;
            }
        };
        let message = match GtpMessage::decode(&buf[..len]) {
            Ok(message) => message,
            Err(e) => {
                trace!(%from, "dropping malformed GTP-U datagram: {}", e);
                continue;
            }
        };
        log_gtp_message(Direction::Rx, &format!("{:?}", message.message_type), &buf[..len]);

        match message.message_type {
            GtpMessageType::GPdu => deliver(&tunnels, message).await,
            GtpMessageType::EchoRequest => {
                match GtpMessage::echo_response(&message).encode() {
                    Ok(response) => {
                        if let Err(e) = socket.send_to(&response, from).await {
                            warn!(%from, "failed to answer echo request: {}", e);
                        }
                    }
                    Err(e) => warn!("failed to encode echo response: {}", e),
                }
            }
            other => debug!(%from, "ignoring GTP-U {:?}", other),
        }
    }
}

fn lookup(tunnels: &TunnelTable, teid: u32) -> Option<(Arc<dyn PacketPort>, Arc<TunnelStats>)> {
    match lock(tunnels).get(&teid) {
        Some(TunnelSlot::Open(entry)) => Some((Arc::clone(&entry.port), Arc::clone(&entry.handle.stats))),
        _ => None,
    }
}

async fn deliver(tunnels: &TunnelTable, message: GtpMessage) {
    let Some((port, stats)) = lookup(tunnels, message.teid) else {
        warn!(teid = message.teid, "unknown TEID, dropping packet");
        return;
    };
    match port.write_packet(&message.payload).await {
        Ok(()) => {
            stats.downlink_packets.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => warn!(teid = message.teid, "error writing to tunnel interface: {}", e),
    }
}
