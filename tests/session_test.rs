//! Session lifecycle driven through the loopback SDK.

mod common;

use std::sync::Arc;

use common::{wait_for, Harness};
use crabsoup::audio::{AudioSpec, ReceivedAudioPacket, SampleFormat, SpeakerLayout};
use crabsoup::testing::{
    constant_planes, consumer_params_json, gradient_frame, plane_refs, LoopbackOptions,
};
use crabsoup::types::MediaKind;
use crabsoup::video::VideoFrame;
use crabsoup::{ConnectionState, ConnectorErrorKind};

#[test]
fn test_device_loads_once() {
    let h = Harness::new();
    h.load_device();
    assert!(h.connector.session().device_loaded());
    assert_eq!(h.sdk.factory_threads().len(), 2);

    let again = h
        .source
        .invoke("load_device", &crabsoup::testing::router_capabilities().to_string());
    assert!(!again.success);
    assert!(h.source.pop_last_error().is_some());
}

#[test]
fn test_factory_threads_are_named_per_role() {
    let h = Harness::new();
    h.load_device();
    let threads = h.sdk.factory_threads();
    assert!(threads.iter().any(|t| t[0] == "crabsoup-producer-net"));
    assert!(threads.iter().any(|t| t[2] == "crabsoup-consumer-work"));
    assert_eq!(h.sdk.platform_audio_thread().as_deref(), Some("crabsoup-consumer-adm"));
}

#[test]
fn test_rejected_capabilities_leave_no_device() {
    let h = Harness::new();
    h.sdk.set_options(LoopbackOptions {
        reject_capabilities: true,
        ..LoopbackOptions::default()
    });
    let response = h
        .source
        .invoke("load_device", &crabsoup::testing::router_capabilities().to_string());
    assert!(!response.success);
    assert!(!h.connector.session().device_loaded());

    // A later attempt with a cooperative SDK succeeds
    h.sdk.set_options(LoopbackOptions::default());
    h.load_device();
}

#[test]
fn test_factory_failure_is_reported() {
    let h = Harness::new();
    h.sdk.set_options(LoopbackOptions {
        fail_factory: true,
        ..LoopbackOptions::default()
    });
    let response = h
        .source
        .invoke("load_device", &crabsoup::testing::router_capabilities().to_string());
    assert!(!response.success);
    assert!(!h.connector.session().device_loaded());
}

#[test]
fn test_transport_before_device_is_not_ready() {
    let h = Harness::new();
    let session = h.connector.session();
    let params = crabsoup::TransportParams::from_json(&crabsoup::testing::transport_params_json("s1")).unwrap();
    let err = session.create_send_transport(&params).unwrap_err();
    assert_eq!(err.kind, ConnectorErrorKind::NotReady);
    assert!(!session.sender_created());
}

#[test]
fn test_second_send_transport_already_exists() {
    let h = Harness::new();
    h.load_device();
    h.send_transport("send-1");

    let session = h.connector.session();
    let params = crabsoup::TransportParams::from_json(&crabsoup::testing::transport_params_json("send-2")).unwrap();
    let err = session.create_send_transport(&params).unwrap_err();
    assert_eq!(err.kind, ConnectorErrorKind::AlreadyExists);
    assert_eq!(session.sender_id().as_deref(), Some("send-1"));
}

#[test]
fn test_transport_creation_failure() {
    let h = Harness::new();
    h.load_device();
    h.sdk.set_options(LoopbackOptions {
        fail_transport_create: true,
        ..LoopbackOptions::default()
    });
    let response = h
        .source
        .invoke("create_receive_transport", &crabsoup::testing::transport_params_json("r1"));
    assert!(!response.success);
    assert!(!h.connector.session().receiver_created());
}

#[test]
fn test_transport_reports_new_state() {
    let h = Harness::new();
    h.load_device();
    h.send_transport("send-1");
    let session = h.connector.session();
    assert_eq!(session.connection_state("send-1"), Some(ConnectionState::New));
    assert!(!session.sender_connected());
}

#[test]
fn test_video_producer_flow() {
    let h = Harness::new();
    h.load_device();
    h.send_transport("send-1");
    h.produce_video("p-video");

    let session = h.connector.session();
    assert!(session.sender_connected());
    assert!(session.video_producer_ready());
    assert_eq!(session.producer_id(MediaKind::Video).as_deref(), Some("p-video"));
    assert!(!session.handshake_in_progress());
    assert!(session.handshake_slots_clear());
    assert_eq!(h.sdk.connect_calls(), 1);

    // Three default simulcast layers on the signaling thread
    let records = h.sdk.produce_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].encodings.len(), 3);
    assert_eq!(records[0].thread.as_deref(), Some("crabsoup-producer-signal"));

    // Source starts black, then follows the newest pushed frame
    let first = h.sdk.pull_video_frame("p-video").unwrap();
    assert!(first.data_y().iter().all(|b| *b == 0));
    assert!(h.connector.push_outgoing_video(gradient_frame(64, 48, 10)));
    assert!(h.connector.push_outgoing_video(gradient_frame(64, 48, 11)));
    let pulled = h.sdk.pull_video_frame("p-video").unwrap();
    assert_eq!(pulled.data_y()[0], 11);
}

#[test]
fn test_video_encodings_from_hints() {
    let h = Harness::new();
    h.load_device();
    h.send_transport("send-1");

    let hints = r#"{"encodings":[{"maxBitrate":300000},{"maxBitrate":900000,"scaleResolutionDownBy":2.0}],"codecOptions":{"videoGoogleStartBitrate":1000}}"#;
    let response = h.source.invoke("create_video_producer", hints);
    assert!(response.success);
    let response = h.source.invoke("connect_result", "true");
    assert!(response.json().unwrap().get("produce_params").is_some());
    assert!(h.source.invoke("produce_result", r#"{"id":"p-hinted"}"#).success);

    let record = &h.sdk.produce_records()[0];
    assert_eq!(record.producer_id, "p-hinted");
    assert_eq!(record.encodings.len(), 2);
    assert_eq!(record.encodings[0].max_bitrate, Some(300_000));
    assert_eq!(record.codec_options.as_ref().unwrap()["videoGoogleStartBitrate"], 1000);
}

#[test]
fn test_second_producer_skips_connect() {
    let h = Harness::new();
    h.load_device();
    h.send_transport("send-1");
    h.produce_video("p-video");

    let response = h.source.invoke("create_audio_producer", "");
    assert!(response.success);
    let output = response.json().unwrap();
    assert!(output.get("connect_params").is_none());
    let params: serde_json::Value =
        serde_json::from_str(output["produce_params"].as_str().unwrap()).unwrap();
    assert_eq!(params["kind"], "audio");
    assert_eq!(params["transportId"], "send-1");

    assert!(h.source.invoke("produce_result", "p-audio").success);
    assert_eq!(h.sdk.connect_calls(), 1);
    assert!(h.connector.session().audio_producer_ready());
}

#[test]
fn test_duplicate_producer_kind() {
    let h = Harness::new();
    h.load_device();
    h.send_transport("send-1");
    h.produce_video("p-video");

    let err = h
        .connector
        .session()
        .create_producer(MediaKind::Video, Default::default())
        .unwrap_err();
    assert_eq!(err.kind, ConnectorErrorKind::AlreadyExists);
}

#[test]
fn test_cannot_produce_kind() {
    let h = Harness::new();
    h.sdk.set_options(LoopbackOptions {
        can_produce_audio: false,
        ..LoopbackOptions::default()
    });
    h.load_device();
    h.send_transport("send-1");
    let err = h
        .connector
        .session()
        .create_producer(MediaKind::Audio, Default::default())
        .unwrap_err();
    assert_eq!(err.kind, ConnectorErrorKind::CannotProduce);
}

#[test]
fn test_producer_without_transport() {
    let h = Harness::new();
    h.load_device();
    let response = h.source.invoke("create_video_producer", "");
    assert!(!response.success);
    assert!(h.source.pop_last_error().is_some());
    assert!(!h.connector.session().handshake_in_progress());
}

#[test]
fn test_audio_producer_forces_opus_options() {
    let h = Harness::new();
    h.load_device();
    h.send_transport("send-1");
    h.produce_audio("p-audio");

    let record = &h.sdk.produce_records()[0];
    assert_eq!(record.kind, MediaKind::Audio);
    let codec_options = record.codec_options.as_ref().unwrap();
    assert_eq!(codec_options["opusStereo"], true);
    assert_eq!(codec_options["opusDtx"], true);
    let audio = record.audio_options.unwrap();
    assert!(!audio.echo_cancellation);
    assert!(!audio.auto_gain_control);
    assert!(!audio.noise_suppression);
}

#[test]
fn test_audio_pump_delivers_chunks() {
    let h = Harness::new();
    h.load_device();
    h.send_transport("send-1");
    h.produce_audio("p-audio");

    let spec = AudioSpec::new(SampleFormat::FloatPlanar, SpeakerLayout::Stereo, 48_000);
    let planes = constant_planes(&spec, 960, 0.25);
    assert!(h.connector.push_outgoing_audio(spec, &plane_refs(&planes), 960).unwrap());

    let sdk = h.sdk.clone();
    let mut captured = Vec::new();
    assert!(wait_for(2_000, || {
        captured.extend(sdk.captured_audio());
        captured.len() >= 2
    }));
    assert_eq!(captured[0].frames, 480);
    assert_eq!(captured[0].channels, 2);
    assert_eq!(captured[0].samples.len(), 960);
    let expected = (0.25f32 * 32767.0) as i16;
    assert!((captured[0].samples[0] - expected).abs() <= 1);
}

#[test]
fn test_audio_dropped_without_producer() {
    let h = Harness::new();
    h.load_device();
    let spec = AudioSpec::new(SampleFormat::S16Planar, SpeakerLayout::Mono, 48_000);
    let planes = constant_planes(&spec, 480, 0.1);
    assert!(!h.connector.push_outgoing_audio(spec, &plane_refs(&planes), 480).unwrap());
    assert!(!h.connector.push_outgoing_video(gradient_frame(16, 16, 0)));
}

#[test]
fn test_first_consumer_connects_then_rest_are_synchronous() {
    let h = Harness::new();
    h.load_device();
    h.receive_transport("recv-1");

    let response = h
        .source
        .invoke("video_consumer_response", &consumer_params_json("c-video", "p-remote-v", "video"));
    assert!(response.success);
    let connect: serde_json::Value =
        serde_json::from_str(response.json().unwrap()["connect_params"].as_str().unwrap()).unwrap();
    assert_eq!(connect["transportId"], "recv-1");

    let response = h.source.invoke("connect_result", "true");
    assert!(response.success);
    assert!(response.output.is_empty());

    let session = h.connector.session();
    assert!(session.receive_transport_connected_once());
    assert!(session.consumer_ready("c-video"));

    let response = h
        .source
        .invoke("audio_consumer_response", &consumer_params_json("c-audio", "p-remote-a", "audio"));
    assert!(response.success);
    assert!(response.output.is_empty());
    assert_eq!(session.consumer_count(), 2);
    assert_eq!(session.consumer_kind("c-audio"), Some(MediaKind::Audio));
    assert_eq!(h.sdk.consume_calls(), 2);
    assert_eq!(h.sdk.connect_calls(), 1);
}

#[test]
fn test_consumer_without_receive_transport() {
    let h = Harness::new();
    h.load_device();
    let response = h
        .source
        .invoke("video_consumer_response", &consumer_params_json("c1", "p1", "video"));
    assert!(!response.success);
    assert_eq!(h.connector.session().consumer_count(), 0);
}

#[test]
fn test_duplicate_consumer_id() {
    let h = Harness::new();
    h.load_device();
    h.receive_transport("recv-1");
    h.source
        .invoke("video_consumer_response", &consumer_params_json("c1", "p1", "video"));
    h.source.invoke("connect_result", "true");

    let params = crabsoup::ConsumerParams::from_json(&consumer_params_json("c1", "p1", "video")).unwrap();
    let err = h
        .connector
        .session()
        .create_consumer(MediaKind::Video, params)
        .unwrap_err();
    assert_eq!(err.kind, ConnectorErrorKind::AlreadyExists);
    assert_eq!(h.connector.session().consumer_count(), 1);
}

#[test]
fn test_consumer_kind_mismatch() {
    let h = Harness::new();
    h.load_device();
    h.receive_transport("recv-1");
    let response = h
        .source
        .invoke("audio_consumer_response", &consumer_params_json("c1", "p1", "video"));
    assert!(!response.success);
    assert!(!h.connector.session().handshake_in_progress());
}

#[test]
fn test_received_media_reaches_source() {
    let h = Harness::new();
    h.load_device();
    h.receive_transport("recv-1");
    h.source
        .invoke("video_consumer_response", &consumer_params_json("c-video", "p1", "video"));
    h.source.invoke("connect_result", "true");
    h.source
        .invoke("audio_consumer_response", &consumer_params_json("c-audio", "p2", "audio"));

    assert!(h.source.pop_video_frame().is_none());
    let frame = VideoFrame::new(Arc::new(gradient_frame(32, 32, 3)), 1_000);
    assert!(h.sdk.deliver_video("c-video", &frame));
    assert_eq!(h.source.pop_video_frame(), Some(frame));
    assert!(h.source.pop_video_frame().is_none());

    let packet = ReceivedAudioPacket {
        data: bytes::Bytes::from(vec![0u8; 960 * 2]),
        bits_per_sample: 16,
        sample_rate: 48_000,
        channels: 1,
        frames: 960,
        capture_time_ms: None,
    };
    assert!(h.sdk.deliver_audio("c-audio", &packet));
    // 24-bit audio cannot be played and is dropped by the sink
    assert!(h.sdk.deliver_audio(
        "c-audio",
        &ReceivedAudioPacket {
            bits_per_sample: 24,
            ..packet.clone()
        }
    ));
    assert_eq!(h.source.pop_audio(), vec![packet]);
}

#[test]
fn test_stop_consumer_by_producer() {
    let h = Harness::new();
    h.load_device();
    h.receive_transport("recv-1");
    h.source
        .invoke("video_consumer_response", &consumer_params_json("c-video", "p-remote", "video"));
    h.source.invoke("connect_result", "true");

    let response = h.source.invoke("stop_consumer", "p-remote");
    assert!(response.success);
    assert_eq!(response.json().unwrap()["consumerId"], "c-video");
    assert_eq!(h.sdk.consumer_closed("c-video"), Some(true));
    assert!(h.source.consumer_id(MediaKind::Video).is_none());

    // Unknown producer: success with no output
    let response = h.source.invoke("stop_consumer", "p-remote");
    assert!(response.success);
    assert!(response.output.is_empty());
}

#[test]
fn test_unrelated_stop_keeps_consumer_awaiting_connect() {
    let h = Harness::new();
    h.load_device();
    h.receive_transport("recv-1");
    let response = h
        .source
        .invoke("video_consumer_response", &consumer_params_json("c1", "p1", "video"));
    assert!(response.json().unwrap()["connect_params"].is_string());

    let response = h.source.invoke("stop_consumer", "p-unrelated");
    assert!(response.success);
    assert!(response.output.is_empty());
    h.connector.session().stop_consumer_by_id("c-unrelated");

    let response = h.source.invoke("connect_result", "true");
    assert!(response.success, "{:?}", h.source.pop_last_error());
    let session = h.connector.session();
    assert!(session.consumer_ready("c1"));
    assert_eq!(h.sdk.consumer_closed("c1"), Some(false));
}

#[test]
fn test_stop_consumer_reports_greatest_id_of_producer() {
    let h = Harness::new();
    h.load_device();
    h.receive_transport("recv-1");
    h.source
        .invoke("video_consumer_response", &consumer_params_json("c-b", "p-shared", "video"));
    assert!(h.source.invoke("connect_result", "true").success);
    let response = h
        .source
        .invoke("audio_consumer_response", &consumer_params_json("c-a", "p-shared", "audio"));
    assert!(response.success);

    let response = h.source.invoke("stop_consumer", "p-shared");
    assert_eq!(response.json().unwrap()["consumerId"], "c-b");
    assert_eq!(h.sdk.consumer_closed("c-a"), Some(true));
    assert_eq!(h.sdk.consumer_closed("c-b"), Some(true));
    assert_eq!(h.connector.session().consumer_count(), 0);
}

#[test]
fn test_stop_unknown_consumer_id_is_noop() {
    let h = Harness::new();
    h.load_device();
    h.connector.session().stop_consumer_by_id("never-created");
    assert_eq!(h.connector.session().consumer_count(), 0);
}

#[test]
fn test_remote_consumer_close_forgets_it() {
    let h = Harness::new();
    h.load_device();
    h.receive_transport("recv-1");
    h.source
        .invoke("video_consumer_response", &consumer_params_json("c-video", "p1", "video"));
    h.source.invoke("connect_result", "true");

    assert!(h.sdk.close_consumer_remotely("c-video"));
    assert!(!h.connector.session().consumer_ready("c-video"));
    assert!(h.source.pop_video_frame().is_none());
}

#[test]
fn test_remote_producer_close_forgets_it() {
    let h = Harness::new();
    h.load_device();
    h.send_transport("send-1");
    h.produce_video("p-video");

    assert!(h.sdk.close_producer_remotely("p-video"));
    let session = h.connector.session();
    assert!(!session.video_producer_ready());
    assert!(session.producer_id(MediaKind::Video).is_none());
}

#[test]
fn test_stop_sender_closes_producers() {
    let h = Harness::new();
    h.load_device();
    h.send_transport("send-1");
    h.produce_video("p-video");

    let response = h.source.invoke("stop_sender", "");
    assert!(response.success);
    let session = h.connector.session();
    assert!(!session.sender_created());
    assert_eq!(h.sdk.transport_closed("send-1"), Some(true));
    assert_eq!(h.sdk.producer_closed("p-video"), Some(true));
    assert!(session.connection_state("send-1").is_none());

    // A fresh transport can be created afterwards
    h.send_transport("send-2");
    assert_eq!(session.sender_id().as_deref(), Some("send-2"));
}

#[test]
fn test_stop_receiver_closes_consumers() {
    let h = Harness::new();
    h.load_device();
    h.receive_transport("recv-1");
    h.source
        .invoke("video_consumer_response", &consumer_params_json("c-video", "p1", "video"));
    h.source.invoke("connect_result", "true");

    assert!(h.source.invoke("stop_receiver", "").success);
    let session = h.connector.session();
    assert_eq!(session.consumer_count(), 0);
    assert!(!session.receive_transport_connected_once());
    assert_eq!(h.sdk.consumer_closed("c-video"), Some(true));
    assert!(h.source.consumer_id(MediaKind::Video).is_none());

    // Stopping twice is harmless
    assert!(h.source.invoke("stop_receiver", "").success);
}

#[test]
fn test_dropping_last_source_tears_down() {
    let h = Harness::new();
    h.load_device();
    h.send_transport("send-1");
    h.produce_video("p-video");
    let client_id = h.connector.session().client_id().to_string();

    let Harness {
        sdk,
        connector,
        source,
    } = h;
    drop(source);

    assert_eq!(sdk.transport_closed("send-1"), Some(true));
    assert_eq!(sdk.producer_closed("p-video"), Some(true));
    let fresh = connector.session();
    assert_ne!(fresh.client_id(), client_id);
    assert!(!fresh.device_loaded());
}

#[test]
fn test_dropping_source_stops_its_consumers() {
    let h = Harness::new();
    let keeper = h.connector.attach_source();
    h.load_device();
    h.receive_transport("recv-1");
    h.source
        .invoke("video_consumer_response", &consumer_params_json("c-video", "p1", "video"));
    h.source.invoke("connect_result", "true");

    let Harness {
        sdk,
        connector,
        source,
    } = h;
    drop(source);

    assert_eq!(sdk.consumer_closed("c-video"), Some(true));
    let session = connector.session();
    assert!(session.device_loaded());
    assert!(session.receiver_created());
    drop(keeper);
}
