//! User plane tests
//!
//! A session set up over NGAP becomes a GTP-U tunnel on a [`TunnelManager`]
//! backed by in-memory interfaces; a local UDP socket plays the UPF.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use coretester_gnb::gtp::{open_tunnel, tunnel_config, DEFAULT_TUNNEL_MTU};
use coretester_gnb::GnbError;
use coretester_gtp::{GtpMessage, MemoryDevice, TunnelError, TunnelManager};
use coretester_tests::{init_test_logging, MockAmfConfig, TestNetwork, TestUeConfig, DEFAULT_TEST_TIMEOUT};
use tokio::net::UdpSocket;
use tokio::time::timeout;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const INTERFACE: &str = "uesimtun0";

// ICMP echo request header; the tunnel does not look inside.
const PACKET: &[u8] = &[0x45, 0x00, 0x00, 0x1c, 0x00, 0x01, 0x00, 0x00, 0x40, 0x01];

async fn local_manager(device: &Arc<MemoryDevice>) -> TunnelManager {
    TunnelManager::bind(SocketAddr::new(LOCALHOST, 0), device.clone())
        .await
        .expect("bind GTP-U socket")
}

/// Uplink and downlink packets cross the tunnel between interface and UPF
#[tokio::test]
async fn test_packets_flow_through_session_tunnel() {
    init_test_logging();
    let network = TestNetwork::start_with(MockAmfConfig {
        upf_address: LOCALHOST,
        ..MockAmfConfig::default()
    })
    .await
    .expect("network");
    let ue = network.register(&TestUeConfig::default()).await.expect("registration");
    let pdu_session = ue.wait_for_pdu_session(1, DEFAULT_TEST_TIMEOUT).await.expect("PDU session");
    ue.wait_for_tunnel(1, DEFAULT_TEST_TIMEOUT).await.expect("tunnel");
    let session = network.gnb.session(ue.ran_ue_ngap_id(), 1).expect("gNB session");

    let upf = UdpSocket::bind(SocketAddr::new(LOCALHOST, 0)).await.expect("UPF socket");
    let device = Arc::new(MemoryDevice::new());
    let manager = local_manager(&device).await;
    let mut config = tunnel_config(
        &session,
        IpAddr::V4(pdu_session.ue_ip),
        INTERFACE,
        pdu_session.mtu.unwrap_or(DEFAULT_TUNNEL_MTU),
    );
    config.peer_port = upf.local_addr().expect("UPF address").port();
    let handle = manager.add_tunnel(config).await.expect("add tunnel");
    let host = device.host(INTERFACE).expect("interface");

    host.send(Bytes::from_static(PACKET)).expect("uplink send");
    let mut buf = vec![0u8; 2048];
    let (len, from) = timeout(DEFAULT_TEST_TIMEOUT, upf.recv_from(&mut buf))
        .await
        .expect("uplink within timeout")
        .expect("recv");
    let uplink = GtpMessage::decode(&buf[..len]).expect("G-PDU");
    assert_eq!(uplink.teid, session.ul_teid);
    assert_eq!(uplink.qfi(), Some(session.qfi));
    assert_eq!(&uplink.payload[..], PACKET);
    assert_eq!(from, manager.local_addr().expect("local address"));

    let downlink = GtpMessage::g_pdu(session.dl_teid, Bytes::from_static(PACKET))
        .encode()
        .expect("encode");
    upf.send_to(&downlink, from).await.expect("downlink send");
    let delivered = timeout(DEFAULT_TEST_TIMEOUT, host.recv())
        .await
        .expect("downlink within timeout")
        .expect("packet");
    assert_eq!(&delivered[..], PACKET);
    assert_eq!(handle.stats.uplink(), 1);
    assert_eq!(handle.stats.downlink(), 1);

    manager.shutdown().await;
    network.shutdown().await;
}

/// A closed tunnel can be opened again under the same name and TEID
#[tokio::test]
async fn test_tunnel_reopens_after_close() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let ue = network.register(&TestUeConfig::default()).await.expect("registration");
    ue.wait_for_tunnel(1, DEFAULT_TEST_TIMEOUT).await.expect("tunnel");
    let session = network.gnb.session(ue.ran_ue_ngap_id(), 1).expect("gNB session");

    let device = Arc::new(MemoryDevice::new());
    let manager = local_manager(&device).await;
    let handle = open_tunnel(&manager, &ue, &session, INTERFACE).await.expect("open");
    assert_eq!(handle.dl_teid, session.dl_teid);
    assert!(device.is_active(INTERFACE));

    let again = open_tunnel(&manager, &ue, &session, INTERFACE).await;
    assert!(again.is_err(), "duplicate DL TEID accepted");
    assert_eq!(manager.len(), 1);

    manager.close_tunnel(session.dl_teid).await.expect("close");
    assert!(!device.is_active(INTERFACE));
    assert!(manager.get(session.dl_teid).is_none());
    assert!(matches!(
        manager.close_tunnel(session.dl_teid).await,
        Err(TunnelError::NotFound(teid)) if teid == session.dl_teid
    ));

    open_tunnel(&manager, &ue, &session, INTERFACE).await.expect("reopen");
    assert!(device.is_active(INTERFACE));
    assert_eq!(manager.len(), 1);

    manager.shutdown().await;
    assert!(manager.is_empty());
    assert_eq!(device.active_count(), 0);
    network.shutdown().await;
}

/// Opening a tunnel for a session the UE never established fails
#[tokio::test]
async fn test_open_tunnel_requires_ue_session() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let ue = network.register(&TestUeConfig::default()).await.expect("registration");
    ue.wait_for_tunnel(1, DEFAULT_TEST_TIMEOUT).await.expect("tunnel");
    let mut session = network.gnb.session(ue.ran_ue_ngap_id(), 1).expect("gNB session");
    session.psi = 5;

    let device = Arc::new(MemoryDevice::new());
    let manager = local_manager(&device).await;
    assert!(open_tunnel(&manager, &ue, &session, INTERFACE).await.is_err());
    assert!(manager.is_empty());
    network.shutdown().await;
}

/// Closing the gNB tears down the tunnels of its user plane
#[tokio::test]
async fn test_gnb_close_shuts_down_tunnels() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let ue = network.register(&TestUeConfig::default()).await.expect("registration");
    ue.wait_for_tunnel(1, DEFAULT_TEST_TIMEOUT).await.expect("tunnel");

    assert!(matches!(
        network.gnb.open_session_tunnel(&ue, 1, INTERFACE).await,
        Err(GnbError::NoUserPlane)
    ));
    let device = Arc::new(MemoryDevice::new());
    let manager = Arc::new(local_manager(&device).await);
    assert!(network.gnb.set_tunnel_manager(manager.clone()).is_none());

    let handle = network
        .gnb
        .open_session_tunnel(&ue, 1, INTERFACE)
        .await
        .expect("open");
    assert_eq!(Some(handle.dl_teid), network.gnb.session(ue.ran_ue_ngap_id(), 1).map(|s| s.dl_teid));
    assert!(device.is_active(INTERFACE));
    assert!(matches!(
        network.gnb.open_session_tunnel(&ue, 9, INTERFACE).await,
        Err(GnbError::UnknownSession { psi: 9, .. })
    ));

    network.shutdown().await;
    assert!(manager.is_empty());
    assert_eq!(device.active_count(), 0);
}
