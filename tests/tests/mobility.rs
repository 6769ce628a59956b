//! Xn handover path switch tests

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use coretester_gnb::gtp::{tunnel_config, DEFAULT_TUNNEL_MTU};
use coretester_gnb::GnbError;
use coretester_gtp::{GtpMessage, MemoryDevice, TunnelManager};
use coretester_ngap::ies::Cause;
use coretester_tests::{
    init_test_logging, MockAmfConfig, MockAmfEvent, TestNetwork, TestUeConfig, DEFAULT_TEST_TIMEOUT,
    TEST_HANDOVER_UPF_ADDRESS,
};
use tokio::net::UdpSocket;
use tokio::time::timeout;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// The acknowledge moves the session onto a new uplink TEID
#[tokio::test]
async fn test_path_switch_updates_tunnel() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let ue = network.register(&TestUeConfig::default()).await.expect("registration");
    let before = ue.wait_for_tunnel(1, DEFAULT_TEST_TIMEOUT).await.expect("tunnel");

    let switched = network
        .gnb
        .path_switch(ue.ran_ue_ngap_id(), DEFAULT_TEST_TIMEOUT)
        .await
        .expect("path switch");
    assert_eq!(switched.len(), 1);
    let session = switched[0];
    assert_eq!(session.psi, 1);
    assert_ne!(session.ul_teid, before.ul_teid);
    assert_ne!(session.dl_teid, before.dl_teid);
    assert_ne!(session.upf_address, before.upf_address);
    assert_eq!(session.upf_address, TEST_HANDOVER_UPF_ADDRESS);
    assert_eq!(network.gnb.session(ue.ran_ue_ngap_id(), 1), Some(session));

    let event = network
        .amf
        .wait_for_event(|e| matches!(e, MockAmfEvent::PathSwitched { .. }), DEFAULT_TEST_TIMEOUT)
        .await
        .expect("PathSwitched event");
    match event {
        MockAmfEvent::PathSwitched {
            amf_ue_ngap_id,
            ran_ue_ngap_id,
            sessions,
        } => {
            assert_eq!(Some(amf_ue_ngap_id), ue.amf_ue_ngap_id());
            assert_eq!(ran_ue_ngap_id, ue.ran_ue_ngap_id());
            assert_eq!(sessions.len(), 1);
            assert_eq!(sessions[0].ul_teid, session.ul_teid);
            assert_eq!(sessions[0].dl_teid, Some(session.dl_teid));
        }
        other => panic!("unexpected event {other:?}"),
    }

    // The UE is told about the moved tunnel as well.
    let after = ue.wait_for_tunnel(1, DEFAULT_TEST_TIMEOUT).await.expect("new tunnel");
    assert_eq!(after.ul_teid, session.ul_teid);
    assert_eq!(after.dl_teid, session.dl_teid);
    assert_eq!(after.upf_address, TEST_HANDOVER_UPF_ADDRESS);
    assert!(ue.is_registered());
    network.shutdown().await;
}

/// A tunnel built from the switched session carries traffic to the new UPF
#[tokio::test]
async fn test_tunnel_usable_after_path_switch() {
    init_test_logging();
    let network = TestNetwork::start_with(MockAmfConfig {
        handover_upf_address: LOCALHOST,
        ..MockAmfConfig::default()
    })
    .await
    .expect("network");
    let ue = network.register(&TestUeConfig::default()).await.expect("registration");
    let pdu_session = ue.wait_for_pdu_session(1, DEFAULT_TEST_TIMEOUT).await.expect("PDU session");
    let before = ue.wait_for_tunnel(1, DEFAULT_TEST_TIMEOUT).await.expect("tunnel");
    assert_ne!(before.upf_address, LOCALHOST);

    let switched = network
        .gnb
        .path_switch(ue.ran_ue_ngap_id(), DEFAULT_TEST_TIMEOUT)
        .await
        .expect("path switch");
    let session = switched[0];
    assert_eq!(session.upf_address, LOCALHOST);

    let upf = UdpSocket::bind(SocketAddr::new(LOCALHOST, 0)).await.expect("UPF socket");
    let device = Arc::new(MemoryDevice::new());
    let manager = TunnelManager::bind(SocketAddr::new(LOCALHOST, 0), device.clone())
        .await
        .expect("bind GTP-U socket");
    let mut config = tunnel_config(
        &session,
        IpAddr::V4(pdu_session.ue_ip),
        "uesimtun0",
        pdu_session.mtu.unwrap_or(DEFAULT_TUNNEL_MTU),
    );
    config.peer_port = upf.local_addr().expect("UPF address").port();
    manager.add_tunnel(config).await.expect("add tunnel");
    let host = device.host("uesimtun0").expect("interface");

    let packet = Bytes::from_static(&[0x45, 0x00, 0x00, 0x14]);
    host.send(packet.clone()).expect("uplink send");
    let mut buf = vec![0u8; 2048];
    let (len, from) = timeout(DEFAULT_TEST_TIMEOUT, upf.recv_from(&mut buf))
        .await
        .expect("uplink within timeout")
        .expect("recv");
    let uplink = GtpMessage::decode(&buf[..len]).expect("G-PDU");
    assert_eq!(uplink.teid, session.ul_teid);
    assert_ne!(uplink.teid, before.ul_teid);

    let downlink = GtpMessage::g_pdu(session.dl_teid, packet.clone()).encode().expect("encode");
    upf.send_to(&downlink, from).await.expect("downlink send");
    let delivered = timeout(DEFAULT_TEST_TIMEOUT, host.recv())
        .await
        .expect("downlink within timeout")
        .expect("packet");
    assert_eq!(delivered, packet);

    manager.shutdown().await;
    network.shutdown().await;
}

/// Repeated path switches keep handing out fresh TEIDs
#[tokio::test]
async fn test_repeated_path_switch() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let ue = network.register(&TestUeConfig::default()).await.expect("registration");
    let mut previous = ue.wait_for_tunnel(1, DEFAULT_TEST_TIMEOUT).await.expect("tunnel");

    for _ in 0..3 {
        let switched = network
            .gnb
            .path_switch(ue.ran_ue_ngap_id(), DEFAULT_TEST_TIMEOUT)
            .await
            .expect("path switch");
        assert_ne!(switched[0].ul_teid, previous.ul_teid);
        previous = ue.wait_for_tunnel(1, DEFAULT_TEST_TIMEOUT).await.expect("tunnel");
    }
    network.shutdown().await;
}

/// A refused path switch reports the per-session causes
#[tokio::test]
async fn test_path_switch_failure() {
    init_test_logging();
    let network = TestNetwork::start_with(MockAmfConfig {
        reject_path_switch: true,
        ..MockAmfConfig::default()
    })
    .await
    .expect("network");
    let ue = network.register(&TestUeConfig::default()).await.expect("registration");
    ue.wait_for_tunnel(1, DEFAULT_TEST_TIMEOUT).await.expect("tunnel");

    let err = network
        .gnb
        .path_switch(ue.ran_ue_ngap_id(), DEFAULT_TEST_TIMEOUT)
        .await
        .unwrap_err();
    match err {
        GnbError::PathSwitchFailed {
            ran_ue_ngap_id,
            released,
        } => {
            assert_eq!(ran_ue_ngap_id, ue.ran_ue_ngap_id());
            assert_eq!(released, vec![(1, Cause::RADIO_NETWORK_UNSPECIFIED)]);
        }
        other => panic!("unexpected error {other:?}"),
    }
    network.shutdown().await;
}

/// Path switch needs an NG connection
#[tokio::test]
async fn test_path_switch_of_idle_ue() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let ue = network.attach(&TestUeConfig::default()).expect("attach");

    let err = network
        .gnb
        .path_switch(ue.ran_ue_ngap_id(), DEFAULT_TEST_TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, GnbError::NotConnected(id) if id == ue.ran_ue_ngap_id()), "{err:?}");
    assert!(matches!(
        network.gnb.path_switch(0xFFFF, DEFAULT_TEST_TIMEOUT).await,
        Err(GnbError::UnknownUe(0xFFFF))
    ));
    network.shutdown().await;
}
