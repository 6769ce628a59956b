//! Local tunnel interfaces.
//!
//! A [`TunnelDevice`] creates and destroys the layer-3 interface a tunnel
//! delivers packets to. [`TunDevice`] creates real TUN interfaces with
//! `tun-rs` and assigns their address with `ip`; [`MemoryDevice`] keeps the
//! same lifecycle in memory and exposes the host side of every interface.

use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tun_rs::AsyncDevice;

use crate::tunnel::TunnelError;

/// Maximum buffer size for reading from a TUN interface.
const MAX_PACKET_SIZE: usize = 65535;

/// Linux interface names are limited to 15 bytes.
pub const MAX_INTERFACE_NAME_LEN: usize = 15;

/// What to create: the interface name, the UE address with its prefix, and the MTU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    pub name: String,
    pub address: IpAddr,
    pub prefix_len: u8,
    pub mtu: u16,
}

/// Packet I/O on a created interface.
#[async_trait]
pub trait PacketPort: Send + Sync {
    /// Next IP packet sent by the host into the interface.
    async fn read_packet(&self) -> io::Result<Bytes>;

    /// Delivers an IP packet to the host.
    async fn write_packet(&self, packet: &[u8]) -> io::Result<()>;
}

/// Creates and destroys tunnel interfaces.
#[async_trait]
pub trait TunnelDevice: Send + Sync {
    async fn create(&self, spec: &DeviceSpec) -> Result<Arc<dyn PacketPort>, TunnelError>;

    /// Removes the interface. Callers drop every [`PacketPort`] for it first.
    async fn destroy(&self, name: &str) -> Result<(), TunnelError>;
}

/// TUN interfaces backed by `tun-rs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TunDevice;

impl TunDevice {
    pub fn new() -> Self {
        Self
    }
}

struct TunPort {
    reader: tokio::sync::Mutex<ReadHalf<AsyncDevice>>,
    writer: tokio::sync::Mutex<WriteHalf<AsyncDevice>>,
}

#[async_trait]
impl PacketPort for TunPort {
    async fn read_packet(&self) -> io::Result<Bytes> {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        let n = self.reader.lock().await.read(&mut buf).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "TUN device closed"));
        }
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    async fn write_packet(&self, packet: &[u8]) -> io::Result<()> {
        self.writer.lock().await.write_all(packet).await
    }
}

/// Runs `ip`; returns its stderr when it fails, empty on success.
async fn run_ip(args: &[&str]) -> Result<String, TunnelError> {
    let output = tokio::process::Command::new("ip")
        .args(args)
        .output()
        .await
        .map_err(|e| TunnelError::Device(format!("failed to run ip command: {e}")))?;
    if output.status.success() {
        Ok(String::new())
    } else {
        Ok(String::from_utf8_lossy(&output.stderr).into_owned())
    }
}

#[async_trait]
impl TunnelDevice for TunDevice {
    async fn create(&self, spec: &DeviceSpec) -> Result<Arc<dyn PacketPort>, TunnelError> {
        let mut config = tun_rs::Configuration::default();
        config.name(&spec.name);
        config.mtu(spec.mtu);
        config.layer(tun_rs::Layer::L3);
        config.up();

        let device = tun_rs::create_as_async(&config)
            .map_err(|e| TunnelError::Device(format!("could not open TUN interface {}: {e}", spec.name)))?;

        let cidr = format!("{}/{}", spec.address, spec.prefix_len);
        let stderr = run_ip(&["addr", "add", &cidr, "dev", &spec.name]).await?;
        if !stderr.is_empty() && !stderr.contains("File exists") {
            return Err(TunnelError::Device(format!(
                "could not assign {cidr} to {}: {stderr}",
                spec.name
            )));
        }
        let stderr = run_ip(&["link", "set", &spec.name, "up"]).await?;
        if !stderr.is_empty() {
            return Err(TunnelError::Device(format!(
                "could not set {} up: {stderr}",
                spec.name
            )));
        }

        info!(name = %spec.name, address = %cidr, mtu = spec.mtu, "TUN interface created");

        let (reader, writer) = tokio::io::split(device);
        Ok(Arc::new(TunPort {
            reader: tokio::sync::Mutex::new(reader),
            writer: tokio::sync::Mutex::new(writer),
        }))
    }

    async fn destroy(&self, name: &str) -> Result<(), TunnelError> {
        // Closing the last descriptor already removes a non-persistent TUN link.
        let stderr = run_ip(&["link", "del", name]).await?;
        if !stderr.is_empty() && !stderr.contains("Cannot find device") {
            warn!(name = %name, "error deleting TUN interface: {}", stderr.trim());
        }
        debug!(name = %name, "TUN interface removed");
        Ok(())
    }
}

/// Lifecycle record kept by [`MemoryDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Created(DeviceSpec),
    Destroyed(String),
}

/// Host side of an in-memory interface: what the UE's IP stack would see.
#[derive(Clone)]
pub struct MemoryHost {
    to_tunnel: mpsc::UnboundedSender<Bytes>,
    from_tunnel: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>>,
}

impl MemoryHost {
    /// Sends an IP packet into the interface (uplink).
    pub fn send(&self, packet: Bytes) -> io::Result<()> {
        self.to_tunnel
            .send(packet)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "interface removed"))
    }

    /// Next packet the tunnel delivered (downlink).
    pub async fn recv(&self) -> Option<Bytes> {
        self.from_tunnel.lock().await.recv().await
    }
}

struct MemoryPort {
    from_host: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
    to_host: mpsc::UnboundedSender<Bytes>,
}

#[async_trait]
impl PacketPort for MemoryPort {
    async fn read_packet(&self) -> io::Result<Bytes> {
        self.from_host
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "interface removed"))
    }

    async fn write_packet(&self, packet: &[u8]) -> io::Result<()> {
        self.to_host
            .send(Bytes::copy_from_slice(packet))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "host side dropped"))
    }
}

#[derive(Default)]
struct MemoryState {
    active: HashMap<String, MemoryHost>,
    events: Vec<DeviceEvent>,
}

/// In-memory tunnel interfaces. Like the kernel, it refuses a second
/// interface with a name that is still in use.
#[derive(Default)]
pub struct MemoryDevice {
    state: Mutex<MemoryState>,
}

impl MemoryDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Host side of an active interface.
    pub fn host(&self, name: &str) -> Option<MemoryHost> {
        self.lock().active.get(name).cloned()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.lock().active.contains_key(name)
    }

    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    /// Every create/destroy so far, oldest first.
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.lock().events.clone()
    }
}

#[async_trait]
impl TunnelDevice for MemoryDevice {
    async fn create(&self, spec: &DeviceSpec) -> Result<Arc<dyn PacketPort>, TunnelError> {
        let mut state = self.lock();
        if state.active.contains_key(&spec.name) {
            return Err(TunnelError::InterfaceExists(spec.name.clone()));
        }
        let (to_tunnel, from_host) = mpsc::unbounded_channel();
        let (to_host, from_tunnel) = mpsc::unbounded_channel();
        state.active.insert(
            spec.name.clone(),
            MemoryHost {
                to_tunnel,
                from_tunnel: Arc::new(tokio::sync::Mutex::new(from_tunnel)),
            },
        );
        state.events.push(DeviceEvent::Created(spec.clone()));
        Ok(Arc::new(MemoryPort {
            from_host: tokio::sync::Mutex::new(from_host),
            to_host,
        }))
    }

    async fn destroy(&self, name: &str) -> Result<(), TunnelError> {
        let mut state = self.lock();
        if state.active.remove(name).is_none() {
            return Err(TunnelError::Device(format!("no interface named {name}")));
        }
        state.events.push(DeviceEvent::Destroyed(name.to_string()));
        Ok(())
    }
}
