//! Integration test framework for coretester
//!
//! Runs the gNB and its UE engines against a mock AMF over an in-memory
//! association, so that whole procedures can be driven from a test.
//!
//! # Components
//!
//! - [`mock_amf`] - Mock AMF answering NG Setup, 5G-AKA, security mode,
//!   registration, PDU session setup, path switch and NG Reset
//! - [`test_fixtures`] - Subscriber, gNB and AMF configurations shared by the scenarios
//! - [`test_utils`] - Logging, polling and the [`TestNetwork`] harness
//!
//! # Test Categories
//!
//! 1. **Registration** - initial registration, SUCI profiles, authentication failures
//! 2. **PDU Sessions** - establishment over NGAP and the resulting user plane tunnel
//! 3. **Mobility** - Xn handover path switch
//! 4. **Scale** - many UEs registering at once
//! 5. **Interface management** - NG Reset in both directions

pub mod mock_amf;
pub mod test_fixtures;
pub mod test_utils;

pub use mock_amf::{MockAmf, MockAmfConfig, MockAmfError, MockAmfEvent, MockPduSession, MockUeContext};
pub use test_fixtures::{
    test_amf_config, test_gnb_config, TestUeConfig, TEST_HANDOVER_UPF_ADDRESS, TEST_UE_IP_POOL, TEST_UPF_ADDRESS,
};
pub use test_utils::{
    init_test_logging, wait_for_condition, TestNetwork, TestResult, DEFAULT_POLL_INTERVAL, DEFAULT_TEST_TIMEOUT,
};
