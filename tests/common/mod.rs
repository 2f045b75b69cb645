//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use crabsoup::testing::{router_capabilities, transport_params_json, LoopbackSdk};
use crabsoup::{Connector, ConnectorConfig, ConnectorSource};

pub struct Harness {
    pub sdk: Arc<LoopbackSdk>,
    pub connector: Arc<Connector>,
    pub source: ConnectorSource,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ConnectorConfig::default())
    }

    pub fn with_config(config: ConnectorConfig) -> Self {
        let sdk = LoopbackSdk::shared();
        let connector = Connector::new(sdk.clone(), config).expect("connector");
        let source = connector.attach_source();
        Self {
            sdk,
            connector,
            source,
        }
    }

    /// Config with a short handshake timeout for the timeout tests.
    pub fn with_timeout_ms(timeout_ms: u64) -> Self {
        let mut config = ConnectorConfig::default();
        config.handshake.timeout_ms = timeout_ms;
        config.teardown.transport_close_timeout_ms = 500;
        Self::with_config(config)
    }

    pub fn load_device(&self) {
        let response = self
            .source
            .invoke("load_device", &router_capabilities().to_string());
        assert!(response.success, "load_device failed: {:?}", self.source.pop_last_error());
    }

    pub fn send_transport(&self, id: &str) {
        let response = self
            .source
            .invoke("create_send_transport", &transport_params_json(id));
        assert!(response.success);
    }

    pub fn receive_transport(&self, id: &str) {
        let response = self
            .source
            .invoke("create_receive_transport", &transport_params_json(id));
        assert!(response.success);
    }

    /// Run the full connect + produce exchange for a video producer.
    pub fn produce_video(&self, producer_id: &str) {
        let response = self.source.invoke("create_video_producer", "");
        assert!(response.success);
        let mut output = response.json().expect("handshake output");
        if output.get("connect_params").is_some() {
            let response = self.source.invoke("connect_result", "true");
            assert!(response.success);
            output = response.json().expect("produce params");
        }
        assert!(output.get("produce_params").is_some(), "{output}");
        let response = self.source.invoke("produce_result", producer_id);
        assert!(response.success);
        assert!(response.output.is_empty());
    }

    pub fn produce_audio(&self, producer_id: &str) {
        let response = self.source.invoke("create_audio_producer", "");
        assert!(response.success);
        let mut output = response.json().expect("handshake output");
        if output.get("connect_params").is_some() {
            let response = self.source.invoke("connect_result", "true");
            assert!(response.success);
            output = response.json().expect("produce params");
        }
        assert!(output.get("produce_params").is_some(), "{output}");
        let response = self.source.invoke("produce_result", producer_id);
        assert!(response.success);
    }
}

pub fn wait_for<F: FnMut() -> bool>(timeout_ms: u64, mut condition: F) -> bool {
    let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    condition()
}
