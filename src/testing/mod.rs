//! Testing utilities for crabsoup
//!
//! An in-process SDK and synthetic media so the whole connector can be
//! driven offline, from unit tests, integration tests and benchmarks.

pub mod loopback;
pub mod synthetic;

pub use loopback::{LoopbackOptions, LoopbackSdk, ProduceRecord};
pub use synthetic::{
    constant_planes, consumer_params_json, gradient_frame, plane_refs, router_capabilities,
    sine_planes, transport_params, transport_params_json,
};
