//! Test utility functions for integration tests
//!
//! Provides logging setup, condition polling and [`TestNetwork`], a gNB
//! connected to a [`MockAmf`] over an in-memory association.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use coretester_common::UeConfig;
use coretester_gnb::Gnb;
use coretester_sctp::{MemoryTransport, DEFAULT_NUM_STREAMS};
use coretester_ue::Ue;
use tokio::time::{sleep, timeout};
use tracing_subscriber::{fmt, EnvFilter};

use crate::mock_amf::{MockAmf, MockAmfConfig};
use crate::test_fixtures::{test_amf_config, test_gnb_config, TestUeConfig};

/// Result type for integration tests
pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Default timeout for test operations
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default poll interval for condition checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Initialize logging for tests
///
/// Uses RUST_LOG environment variable if set, otherwise defaults to "info"
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt().with_env_filter(filter).with_test_writer().try_init();
}

/// Wait for a condition to become true with timeout
///
/// # Returns
/// * `Ok(())` if condition became true within timeout
/// * `Err` if timeout elapsed
pub async fn wait_for_condition<F, Fut>(mut condition: F, timeout_duration: Duration, poll_interval: Duration) -> TestResult
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = timeout(timeout_duration, async {
        loop {
            if condition().await {
                return;
            }
            sleep(poll_interval).await;
        }
    })
    .await;

    match result {
        Ok(()) => Ok(()),
        Err(_) => Err("Condition not met within timeout".into()),
    }
}

/// A gNB served by a mock AMF.
pub struct TestNetwork {
    pub gnb: Arc<Gnb>,
    pub amf: MockAmf,
}

impl TestNetwork {
    /// Default mock AMF, NG Setup completed.
    pub async fn start() -> TestResult<Self> {
        Self::start_with(test_amf_config()).await
    }

    pub async fn start_with(config: MockAmfConfig) -> TestResult<Self> {
        let network = Self::connect(config)?;
        network.gnb.ng_setup(0, DEFAULT_TEST_TIMEOUT).await?;
        Ok(network)
    }

    /// Association up, NG Setup not yet run. Must be called from a tokio runtime.
    pub fn connect(config: MockAmfConfig) -> TestResult<Self> {
        let (gnb_side, amf_side) = MemoryTransport::pair("gnb", "mock-amf");
        let amf = MockAmf::start(config, amf_side);
        let gnb = Gnb::new(test_gnb_config())?;
        gnb.add_association(Arc::new(gnb_side), DEFAULT_NUM_STREAMS);
        Ok(Self { gnb, amf })
    }

    /// Provisions the subscriber on the AMF and attaches its UE to the gNB.
    pub fn attach(&self, ue: &TestUeConfig) -> TestResult<Arc<Ue>> {
        self.attach_config(ue.to_ue_config())
    }

    pub fn attach_config(&self, config: UeConfig) -> TestResult<Arc<Ue>> {
        self.amf.add_subscriber(&config)?;
        Ok(self.gnb.attach_ue(config)?)
    }

    /// Attaches the UE and waits for its registration to complete.
    pub async fn register(&self, ue: &TestUeConfig) -> TestResult<Arc<Ue>> {
        let ue = self.attach(ue)?;
        ue.register().await?;
        ue.wait_for_registration(DEFAULT_TEST_TIMEOUT).await?;
        Ok(ue)
    }

    pub async fn shutdown(self) {
        self.gnb.close().await;
        self.amf.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_wait_for_condition_success() {
        let flag = Arc::new(AtomicBool::new(false));
        let flag_clone = flag.clone();

        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            flag_clone.store(true, Ordering::SeqCst);
        });

        let result = wait_for_condition(
            || async { flag.load(Ordering::SeqCst) },
            Duration::from_secs(1),
            Duration::from_millis(10),
        )
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_condition_timeout() {
        let result = wait_for_condition(|| async { false }, Duration::from_millis(100), Duration::from_millis(10)).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_network_completes_ng_setup() {
        init_test_logging();
        let network = TestNetwork::start().await.unwrap();
        assert!(network.gnb.amf(0).unwrap().is_ready());
        assert_eq!(network.gnb.amf(0).unwrap().info().amf_name.as_deref(), Some("coretester-mock-amf"));
        network.shutdown().await;
    }
}
