//! Connection release, Service Request and deregistration tests

use coretester_gnb::UeState;
use coretester_nas::ServiceType;
use coretester_ngap::ies::Cause;
use coretester_tests::{init_test_logging, MockAmfEvent, TestNetwork, TestUeConfig, DEFAULT_TEST_TIMEOUT};
use coretester_ue::{MmState, UeError, UeEvent};

/// AMF release then Service Request brings the session's user plane back
#[tokio::test]
async fn test_release_and_service_request() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let ue = network.register(&TestUeConfig::default()).await.expect("registration");
    let tunnel = ue.wait_for_tunnel(1, DEFAULT_TEST_TIMEOUT).await.expect("tunnel");
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
    assert!(ue.is_registered());
    assert_eq!(network.gnb.ue_context(ue.ran_ue_ngap_id()).expect("context").state, UeState::Idle);
    network
        .amf
        .wait_for_event(|e| matches!(e, MockAmfEvent::ContextReleased { .. }), DEFAULT_TEST_TIMEOUT)
        .await
        .expect("ContextReleased event");

    ue.service_request(ServiceType::Data).await.expect("Service Request");
    ue.wait_for_service(DEFAULT_TEST_TIMEOUT).await.expect("Service Accept");
    assert!(!ue.is_idle());
    assert_eq!(ue.mm_state(), MmState::Registered);
    network
        .amf
        .wait_for_event(|e| matches!(e, MockAmfEvent::ServiceAccepted { .. }), DEFAULT_TEST_TIMEOUT)
        .await
        .expect("ServiceAccepted event");

    let restored = ue.wait_for_tunnel(1, DEFAULT_TEST_TIMEOUT).await.expect("restored tunnel");
    assert_eq!(restored.ul_teid, tunnel.ul_teid);
    let session = network.gnb.session(ue.ran_ue_ngap_id(), 1).expect("gNB session");
    assert_eq!(session.ul_teid, tunnel.ul_teid);
    assert!(ue.pdu_session(1).is_some());
    network.shutdown().await;
}

/// Service Request is only sent from CM-IDLE
#[tokio::test]
async fn test_service_request_while_connected() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let ue = network
        .register(&TestUeConfig::default().without_pdu_session())
        .await
        .expect("registration");
    let result = ue.service_request(ServiceType::Signalling).await;
    assert!(matches!(result, Err(UeError::NotIdle)), "{result:?}");
    network.shutdown().await;
}

/// gNB-requested release goes through the AMF's release command
#[tokio::test]
async fn test_gnb_requested_release() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let ue = network.register(&TestUeConfig::default()).await.expect("registration");
    ue.wait_for_tunnel(1, DEFAULT_TEST_TIMEOUT).await.expect("tunnel");

    network
        .gnb
        .ue_context_release_request(ue.ran_ue_ngap_id(), Cause::RADIO_NETWORK_USER_INACTIVITY)
        .await
        .expect("release request");
    ue.events()
        .wait_for(|e| matches!(e, UeEvent::Released), DEFAULT_TEST_TIMEOUT)
        .await
        .expect("RRC release");
    let context = network.gnb.ue_context(ue.ran_ue_ngap_id()).expect("context");
    assert_eq!(context.state, UeState::Idle);
    assert_eq!(context.sessions().count(), 0);
    network
        .amf
        .wait_for_event(|e| matches!(e, MockAmfEvent::ContextReleased { .. }), DEFAULT_TEST_TIMEOUT)
        .await
        .expect("ContextReleased event");
    network.shutdown().await;
}

/// Normal deregistration is accepted, then the connection is released
#[tokio::test]
async fn test_ue_originated_deregistration() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let ue = network.register(&TestUeConfig::default()).await.expect("registration");
    ue.wait_for_pdu_session(1, DEFAULT_TEST_TIMEOUT).await.expect("PDU session");

    ue.deregister(false).await.expect("Deregistration Request");
    ue.wait_for_deregistration(DEFAULT_TEST_TIMEOUT)
        .await
        .expect("Deregistration Accept");
    assert_eq!(ue.mm_state(), MmState::Deregistered);
    ue.events()
        .wait_for(|e| matches!(e, UeEvent::Released), DEFAULT_TEST_TIMEOUT)
        .await
        .expect("RRC release");

    network
        .amf
        .wait_for_event(|e| matches!(e, MockAmfEvent::ContextReleased { .. }), DEFAULT_TEST_TIMEOUT)
        .await
        .expect("ContextReleased event");
    assert_eq!(network.amf.registered_count(), 0);
    assert!(matches!(ue.deregister(false).await, Err(UeError::InvalidState { .. })));
    network.shutdown().await;
}

/// Switch-off deregistration leaves the UE deregistered without an answer
#[tokio::test]
async fn test_switch_off_deregistration() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let ue = network
        .register(&TestUeConfig::default().without_pdu_session())
        .await
        .expect("registration");
    let amf_ue_ngap_id = ue.amf_ue_ngap_id().expect("AMF-UE-NGAP-ID");

    ue.deregister(true).await.expect("Deregistration Request");
    assert_eq!(ue.mm_state(), MmState::Deregistered);

    let event = network
        .amf
        .wait_for_event(|e| matches!(e, MockAmfEvent::Deregistered { .. }), DEFAULT_TEST_TIMEOUT)
        .await
        .expect("Deregistered event");
    assert_eq!(event, MockAmfEvent::Deregistered { amf_ue_ngap_id });
    network
        .amf
        .wait_for_event(|e| matches!(e, MockAmfEvent::ContextReleased { .. }), DEFAULT_TEST_TIMEOUT)
        .await
        .expect("ContextReleased event");
    assert!(ue.events().try_take(|e| matches!(e, UeEvent::Failed { .. })).is_none());
    network.shutdown().await;
}
