//! UE registration integration tests
//!
//! Full initial registration through the gNB against the mock AMF:
//! SUCI deconcealment, 5G-AKA, NAS security mode and the default PDU
//! session the UE asks for once registered.

use std::net::Ipv4Addr;

use coretester_common::{Guti, ProtectionScheme};
use coretester_crypto::HomeNetworkPrivateKey;
use coretester_nas::RegistrationType;
use coretester_ngap::ies::Cause;
use coretester_tests::{
    init_test_logging, MockAmfConfig, MockAmfEvent, TestNetwork, TestUeConfig, DEFAULT_TEST_TIMEOUT,
};
use coretester_ue::{MmState, UeError, UeEvent};

/// Registration with a null-scheme SUCI, then the default PDU session
#[tokio::test]
async fn test_initial_registration_with_default_session() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let subscriber = TestUeConfig::default();

    let ue = network.register(&subscriber).await.expect("registration");
    assert!(ue.is_registered());
    assert_eq!(ue.mm_state(), MmState::Registered);
    let guti = ue.guti().expect("GUTI assigned");
    assert_eq!(guti.amf_region_id, network.amf.config().guami.amf_region_id);

    let event = network
        .amf
        .wait_for_event(|e| matches!(e, MockAmfEvent::Registered { .. }), DEFAULT_TEST_TIMEOUT)
        .await
        .expect("Registered event");
    match event {
        MockAmfEvent::Registered { supi, guti: assigned, .. } => {
            assert_eq!(supi, subscriber.imsi());
            assert_eq!(assigned, guti);
        }
        other => panic!("unexpected event {other:?}"),
    }

    let session = ue
        .wait_for_pdu_session(subscriber.pdu_session_id, DEFAULT_TEST_TIMEOUT)
        .await
        .expect("PDU session");
    assert_eq!(session.ue_ip.octets()[..2], [10, 45]);
    assert_ne!(session.ue_ip, Ipv4Addr::new(10, 45, 0, 0));
    assert_eq!(session.qfi, 1);
    assert_eq!(session.five_qi, Some(9));
    assert_eq!(session.mtu, Some(network.amf.config().mtu));
    assert_eq!(session.dnn.as_deref(), Some("internet"));

    let tunnel = ue
        .wait_for_tunnel(subscriber.pdu_session_id, DEFAULT_TEST_TIMEOUT)
        .await
        .expect("tunnel");
    assert_eq!(tunnel.upf_address, network.amf.config().upf_address);
    assert_eq!(tunnel.qfi, 1);

    let gnb_session = network
        .gnb
        .session(ue.ran_ue_ngap_id(), subscriber.pdu_session_id)
        .expect("gNB session");
    assert_eq!(gnb_session.ul_teid, tunnel.ul_teid);
    assert_eq!(gnb_session.dl_teid, tunnel.dl_teid);

    let established = network
        .amf
        .wait_for_event(
            |e| matches!(e, MockAmfEvent::PduSessionEstablished { .. }),
            DEFAULT_TEST_TIMEOUT,
        )
        .await
        .expect("PduSessionEstablished event");
    match established {
        MockAmfEvent::PduSessionEstablished { session: amf_session, .. } => {
            assert_eq!(amf_session.ue_ip, session.ue_ip);
            assert_eq!(amf_session.ul_teid, tunnel.ul_teid);
            assert_eq!(amf_session.dl_teid, Some(tunnel.dl_teid));
        }
        other => panic!("unexpected event {other:?}"),
    }

    network.shutdown().await;
}

/// NAS COUNTs move on both sides once the security context is in use
#[tokio::test]
async fn test_nas_counts_advance() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let ue = network
        .register(&TestUeConfig::default().without_pdu_session())
        .await
        .expect("registration");

    // Registration Accept came after the Security Mode Command at COUNT 0.
    assert!(ue.dl_count().await.to_u32() >= 1);
    // Security Mode Complete and Registration Complete went out.
    assert!(ue.ul_count().await.to_u32() >= 2);
    network.shutdown().await;
}

/// SUCI concealed with ECIES Profile A is resolved by the home network key
#[tokio::test]
async fn test_registration_with_profile_a_suci() {
    init_test_logging();
    let key = HomeNetworkPrivateKey::generate(ProtectionScheme::ProfileA, &mut rand::thread_rng()).expect("key");
    let public_key = key.public_key().expect("public key");
    let network = TestNetwork::start_with(MockAmfConfig {
        home_network_key: Some(key),
        ..MockAmfConfig::default()
    })
    .await
    .expect("network");

    let subscriber = TestUeConfig::nth(7).without_pdu_session();
    let ue = network
        .attach_config(subscriber.to_ue_config_with_key(ProtectionScheme::ProfileA, 1, public_key))
        .expect("attach");
    assert_eq!(ue.suci().protection_scheme, 1);
    assert_ne!(ue.suci().scheme_output, subscriber.msin);

    ue.register().await.expect("register");
    ue.wait_for_registration(DEFAULT_TEST_TIMEOUT).await.expect("registered");
    let context = network.amf.ue_by_supi(&subscriber.imsi()).expect("AMF context");
    assert_eq!(context.supi.as_deref(), Some(subscriber.imsi().as_str()));
    network.shutdown().await;
}

/// A serving network name the AMF does not use gives a RES* mismatch
#[tokio::test]
async fn test_wrong_serving_network_name_is_rejected() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let ue = network
        .attach(&TestUeConfig::default().without_pdu_session())
        .expect("attach");
    ue.set_serving_network_name("5G:mnc099.mcc999.3gppnetwork.org");

    ue.register().await.expect("register");
    let result = ue.wait_for_registration(DEFAULT_TEST_TIMEOUT).await;
    assert!(matches!(result, Err(UeError::AuthenticationRejected)), "{result:?}");
    assert_eq!(ue.mm_state(), MmState::Deregistered);

    network
        .amf
        .wait_for_event(
            |e| matches!(e, MockAmfEvent::AuthenticationRejected { .. }),
            DEFAULT_TEST_TIMEOUT,
        )
        .await
        .expect("AuthenticationRejected event");
    assert_eq!(network.amf.registered_count(), 0);
    network.shutdown().await;
}

/// A network SQN behind the USIM triggers resynchronisation, then success
#[tokio::test]
async fn test_sqn_resynchronisation() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let subscriber = TestUeConfig::default().without_pdu_session();
    let ue = network.attach(&subscriber).expect("attach");

    // Re-provision the network side with an older SQN.
    let mut behind = subscriber.to_ue_config();
    behind.sqn = [0x00, 0x00, 0x00, 0x00, 0x00, 0x20];
    network.amf.add_subscriber(&behind).expect("provision");

    ue.register().await.expect("register");
    ue.wait_for_registration(DEFAULT_TEST_TIMEOUT).await.expect("registered after resync");
    network
        .amf
        .wait_for_event(|e| matches!(e, MockAmfEvent::Authenticated { .. }), DEFAULT_TEST_TIMEOUT)
        .await
        .expect("Authenticated event");
    network.shutdown().await;
}

/// A subscriber the AMF does not know never gets authenticated
#[tokio::test]
async fn test_unknown_subscriber_is_not_authenticated() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let config = TestUeConfig::nth(42).without_pdu_session().to_ue_config();
    // Attached directly, so the AMF has no subscription for it.
    let ue = network.gnb.attach_ue(config).expect("attach");
    ue.register().await.expect("register");

    let event = network
        .amf
        .wait_for_event(|e| matches!(e, MockAmfEvent::HandlerFailed { .. }), DEFAULT_TEST_TIMEOUT)
        .await
        .expect("HandlerFailed event");
    match event {
        MockAmfEvent::HandlerFailed { error, .. } => assert!(error.contains("001010000000043"), "{error}"),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(!ue.is_registered());
    network.shutdown().await;
}

/// Periodic registration update from CM-IDLE goes out with the GUTI
#[tokio::test]
async fn test_periodic_registration_from_idle() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let subscriber = TestUeConfig::default().without_pdu_session();
    let ue = network.register(&subscriber).await.expect("registration");
    let guti = ue.guti().expect("GUTI assigned");
    let amf_ue_ngap_id = ue.amf_ue_ngap_id().expect("AMF-UE-NGAP-ID");

    network
        .amf
        .release_ue(amf_ue_ngap_id, Cause::RADIO_NETWORK_USER_INACTIVITY)
        .await
        .expect("release");
    ue.events()
        .wait_for(|e| matches!(e, UeEvent::Released), DEFAULT_TEST_TIMEOUT)
        .await
        .expect("RRC release");
    assert!(ue.is_idle());
    network
        .amf
        .wait_for_event(|e| matches!(e, MockAmfEvent::InitialUeMessage { .. }), DEFAULT_TEST_TIMEOUT)
        .await
        .expect("first InitialUeMessage event");

    ue.register_with(RegistrationType::PeriodicRegistrationUpdating)
        .await
        .expect("periodic registration");
    network
        .amf
        .wait_for_event(|e| matches!(e, MockAmfEvent::InitialUeMessage { .. }), DEFAULT_TEST_TIMEOUT)
        .await
        .expect("second InitialUeMessage event");
    let renewed = ue.wait_for_registration(DEFAULT_TEST_TIMEOUT).await.expect("registration update");
    assert_eq!(renewed.plmn, guti.plmn);
    assert!(ue.is_registered());
    assert_eq!(ue.mm_state(), MmState::Registered);
    network.shutdown().await;
}

/// A GUTI the AMF does not know is answered with an Identity Request for the SUCI
#[tokio::test]
async fn test_registration_with_unknown_guti() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let subscriber = TestUeConfig::nth(3).without_pdu_session();
    let stale = Guti::new(subscriber.hplmn, 0x7F, 0x3FF, 0x3F, 0x0DEA_D001);
    let mut config = subscriber.to_ue_config();
    config.guti = Some(stale);
    let ue = network.attach_config(config).expect("attach");

    ue.register().await.expect("register");
    let guti = ue.wait_for_registration(DEFAULT_TEST_TIMEOUT).await.expect("registered");
    assert_ne!(guti, stale);

    let event = network
        .amf
        .wait_for_event(|e| matches!(e, MockAmfEvent::Registered { .. }), DEFAULT_TEST_TIMEOUT)
        .await
        .expect("Registered event");
    match event {
        MockAmfEvent::Registered { supi, guti: assigned, .. } => {
            assert_eq!(supi, subscriber.imsi());
            assert_eq!(assigned, guti);
        }
        other => panic!("unexpected event {other:?}"),
    }
    network.shutdown().await;
}
