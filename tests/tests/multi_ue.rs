//! Multi-UE integration tests
//!
//! Many UEs registering through one gNB at the same time must each end up
//! with their own NGAP IDs, address and tunnel.

use std::collections::HashSet;
use std::sync::Arc;

use coretester_tests::{init_test_logging, MockAmfEvent, TestNetwork, TestUeConfig, DEFAULT_TEST_TIMEOUT};
use coretester_ue::Ue;

const UE_COUNT: u32 = 100;

/// 100 UEs register and establish a session concurrently
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_registration_of_100_ues() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");

    let ues: Vec<Arc<Ue>> = (0..UE_COUNT)
        .map(|n| network.attach(&TestUeConfig::nth(n)).expect("attach"))
        .collect();

    let mut tasks = Vec::with_capacity(ues.len());
    for ue in &ues {
        let ue = Arc::clone(ue);
        tasks.push(tokio::spawn(async move {
            ue.register().await?;
            ue.wait_for_registration(DEFAULT_TEST_TIMEOUT).await?;
            let session = ue.wait_for_pdu_session(1, DEFAULT_TEST_TIMEOUT).await?;
            let tunnel = ue.wait_for_tunnel(1, DEFAULT_TEST_TIMEOUT).await?;
            Ok::<_, coretester_ue::UeError>((session.ue_ip, tunnel))
        }));
    }

    let mut addresses = HashSet::new();
    let mut dl_teids = HashSet::new();
    let mut ul_teids = HashSet::new();
    for task in tasks {
        let (ue_ip, tunnel) = task.await.expect("task").expect("UE procedures");
        assert!(addresses.insert(ue_ip), "address {ue_ip} handed out twice");
        assert!(dl_teids.insert(tunnel.dl_teid), "DL TEID {:#x} reused", tunnel.dl_teid);
        assert!(ul_teids.insert(tunnel.ul_teid), "UL TEID {:#x} reused", tunnel.ul_teid);
    }

    let ran_ids: HashSet<u32> = ues.iter().map(|ue| ue.ran_ue_ngap_id()).collect();
    let amf_ids: HashSet<u64> = ues.iter().filter_map(|ue| ue.amf_ue_ngap_id()).collect();
    assert_eq!(ran_ids.len(), UE_COUNT as usize);
    assert_eq!(amf_ids.len(), UE_COUNT as usize);
    assert!(ues.iter().all(|ue| ue.is_registered()));
    assert_eq!(network.gnb.ue_count(), UE_COUNT as usize);
    assert_eq!(network.amf.registered_count(), UE_COUNT as usize);

    for ue in &ues {
        let context = network.gnb.ue_context(ue.ran_ue_ngap_id()).expect("gNB context");
        assert_eq!(context.amf_ue_ngap_id, ue.amf_ue_ngap_id());
    }
    network.shutdown().await;
}

/// Every subscriber is authenticated with its own keys
#[tokio::test]
async fn test_each_ue_is_authenticated_as_itself() {
    init_test_logging();
    let network = TestNetwork::start().await.expect("network");
    let subscribers: Vec<TestUeConfig> = (0..5).map(|n| TestUeConfig::nth(n).without_pdu_session()).collect();
    for subscriber in &subscribers {
        network.register(subscriber).await.expect("registration");
    }

    let mut authenticated = HashSet::new();
    while let Some(event) = network
        .amf
        .events()
        .try_take(|e| matches!(e, MockAmfEvent::Authenticated { .. }))
    {
        if let MockAmfEvent::Authenticated { supi, .. } = event {
            authenticated.insert(supi);
        }
    }
    let expected: HashSet<String> = subscribers.iter().map(TestUeConfig::imsi).collect();
    assert_eq!(authenticated, expected);
    network.shutdown().await;
}
