//! NG interface management tests
//!
//! NG Setup outcomes, NG Reset in both directions and paging.

use std::time::Duration;

use coretester_gnb::{AmfState, GnbError, UeState};
use coretester_ngap::ies::Cause;
use coretester_ngap::procedures::{NgResetParams, ResetType, UeAssociatedNgConnection};
use coretester_tests::{
    init_test_logging, wait_for_condition, MockAmfConfig, MockAmfEvent, TestNetwork, TestUeConfig,
    DEFAULT_POLL_INTERVAL, DEFAULT_TEST_TIMEOUT,
};

/// The AMF's NG Setup Failure surfaces with its cause and no UE can attach
#[tokio::test]
async fn test_ng_setup_failure() {
    init_test_logging();
    let network = TestNetwork::connect(MockAmfConfig {
        ng_setup_failure: Some(Cause::MISC_UNSPECIFIED),
        ..MockAmfConfig::default()
    })
    .expect("connect");

    let err = network.gnb.ng_setup(0, DEFAULT_TEST_TIMEOUT).await.unwrap_err();
    match err {
        GnbError::NgSetupFailed { cause, .. } => assert_eq!(cause, Cause::MISC_UNSPECIFIED),
        other => panic!("unexpected error {other:?}"),
    }
    let amf = network.gnb.amf(0).expect("association");
    assert!(!amf.is_ready());
    assert_eq!(amf.info().setup_failure.map(|(cause, _)| cause), Some(Cause::MISC_UNSPECIFIED));
    assert!(matches!(
        network.gnb.attach_ue(TestUeConfig::default().to_ue_config()),
        Err(GnbError::NoAmfReady)
    ));
    network.shutdown().await;
}

/// NG Setup Response contents are stored on the association
#[tokio::test]
async fn test_ng_setup_response_is_recorded() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let info = network.gnb.amf(0).expect("association").info();
    assert_eq!(info.state, AmfState::Ready);
    assert_eq!(info.relative_capacity, 255);
    assert_eq!(info.served_guami_list.len(), 1);
    assert_eq!(info.plmn_support_list[0].slice_support_list, network.amf.config().slices);

    let event = network
        .amf
        .wait_for_event(|e| matches!(e, MockAmfEvent::NgSetup { .. }), DEFAULT_TEST_TIMEOUT)
        .await
        .expect("NgSetup event");
    assert!(matches!(event, MockAmfEvent::NgSetup { ran_node_name: Some(_) }));
    network.shutdown().await;
}

/// gNB-initiated reset of the whole interface releases every UE locally
#[tokio::test]
async fn test_gnb_initiated_ng_reset() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let first = network.register(&TestUeConfig::nth(0)).await.expect("registration");
    let second = network.register(&TestUeConfig::nth(1)).await.expect("registration");
    first.wait_for_tunnel(1, DEFAULT_TEST_TIMEOUT).await.expect("tunnel");

    let ack = network
        .gnb
        .ng_reset(
            0,
            NgResetParams {
                cause: Cause::MISC_OM_INTERVENTION,
                reset_type: ResetType::NgInterface,
            },
            DEFAULT_TEST_TIMEOUT,
        )
        .await
        .expect("NG Reset Acknowledge");
    assert!(ack.connections.is_empty());

    for ue in [&first, &second] {
        let context = network.gnb.ue_context(ue.ran_ue_ngap_id()).expect("context kept");
        assert_eq!(context.state, UeState::Idle);
        assert_eq!(context.amf_ue_ngap_id, None);
        assert!(network.gnb.session(ue.ran_ue_ngap_id(), 1).is_none());
    }

    let event = network
        .amf
        .wait_for_event(|e| matches!(e, MockAmfEvent::NgReset { .. }), DEFAULT_TEST_TIMEOUT)
        .await
        .expect("NgReset event");
    assert_eq!(
        event,
        MockAmfEvent::NgReset {
            whole_interface: true,
            connections: 0
        }
    );
    assert!(network.amf.ue_contexts().iter().all(|ue| !ue.connected));
    network.shutdown().await;
}

/// AMF-initiated partial reset releases only the named UE
#[tokio::test]
async fn test_amf_initiated_partial_ng_reset() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let reset_ue = network
        .register(&TestUeConfig::nth(0).without_pdu_session())
        .await
        .expect("registration");
    let kept_ue = network
        .register(&TestUeConfig::nth(1).without_pdu_session())
        .await
        .expect("registration");

    network
        .amf
        .ng_reset(ResetType::PartOfNgInterface(vec![UeAssociatedNgConnection {
            amf_ue_ngap_id: reset_ue.amf_ue_ngap_id(),
            ran_ue_ngap_id: Some(reset_ue.ran_ue_ngap_id()),
        }]))
        .await
        .expect("send NG Reset");

    let event = network
        .amf
        .wait_for_event(
            |e| matches!(e, MockAmfEvent::NgResetAcknowledged { .. }),
            DEFAULT_TEST_TIMEOUT,
        )
        .await
        .expect("NG Reset Acknowledge");
    assert_eq!(event, MockAmfEvent::NgResetAcknowledged { connections: 1 });

    let released = network.gnb.ue_context(reset_ue.ran_ue_ngap_id()).expect("context");
    assert_eq!(released.state, UeState::Idle);
    let kept = network.gnb.ue_context(kept_ue.ran_ue_ngap_id()).expect("context");
    assert_eq!(kept.amf_ue_ngap_id, kept_ue.amf_ue_ngap_id());
    assert_ne!(kept.state, UeState::Idle);

    let ue = reset_ue.clone();
    wait_for_condition(
        || {
            let ue = ue.clone();
            async move { ue.is_idle() }
        },
        DEFAULT_TEST_TIMEOUT,
        DEFAULT_POLL_INTERVAL,
    )
    .await
    .expect("UE back in CM-IDLE");
    assert!(!kept_ue.is_idle());
    network.shutdown().await;
}

/// Paging for a registered UE reaches the gNB's paging waiters
#[tokio::test]
async fn test_paging_reaches_gnb() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let ue = network
        .register(&TestUeConfig::default().without_pdu_session())
        .await
        .expect("registration");
    let guti = ue.guti().expect("GUTI");

    network.amf.page(guti).await.expect("send Paging");
    let paging = network
        .gnb
        .wait_for_paging(0, DEFAULT_TEST_TIMEOUT)
        .await
        .expect("Paging");
    assert_eq!(paging.ue_paging_identity, guti.s_tmsi());
    assert_eq!(paging.tai_list.len(), 1);
    network.shutdown().await;
}

/// Closing the association while waiting ends the wait instead of hanging
#[tokio::test]
async fn test_association_loss_ends_waits() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let gnb = network.gnb.clone();
    let waiter = tokio::spawn(async move { gnb.wait_for_paging(0, Duration::from_secs(30)).await });

    network.amf.stop().await;
    let result = tokio::time::timeout(DEFAULT_TEST_TIMEOUT, waiter)
        .await
        .expect("wait ended")
        .expect("task");
    assert!(result.is_err());
    network.gnb.close().await;
}
