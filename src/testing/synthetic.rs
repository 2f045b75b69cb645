//! Synthetic media and signaling fixtures
//!
//! Generates host-format audio planes, I420 frames and the JSON documents a
//! mediasoup server would send, so the connector can be exercised without a
//! server or capture hardware.

use bytes::Bytes;
use serde_json::{json, Value};

use crate::audio::resample::{AudioSpec, SampleFormat};
use crate::video::I420Frame;

/// Encode one sample in `[-1.0, 1.0]` in the spec's sample format.
fn encode_sample(format: SampleFormat, value: f32, out: &mut Vec<u8>) {
    let value = value.clamp(-1.0, 1.0);
    match format {
        SampleFormat::U8Planar => out.push((value * 127.0 + 128.0).round() as u8),
        SampleFormat::S16Planar => out.extend_from_slice(&((value * 32767.0).round() as i16).to_ne_bytes()),
        SampleFormat::S32Planar => {
            out.extend_from_slice(&((value as f64 * 2_147_483_647.0).round() as i32).to_ne_bytes())
        }
        SampleFormat::FloatPlanar => out.extend_from_slice(&value.to_ne_bytes()),
    }
}

/// One plane per channel holding a sine wave at `frequency` Hz.
///
/// Each channel is phase shifted slightly so interleaving mistakes show up.
pub fn sine_planes(spec: &AudioSpec, frames: usize, frequency: f32) -> Vec<Vec<u8>> {
    let rate = spec.sample_rate as f32;
    (0..spec.channels)
        .map(|ch| {
            let mut plane = Vec::with_capacity(frames * spec.bytes_per_sample);
            let phase = ch as f32 * 0.25;
            for i in 0..frames {
                let t = i as f32 / rate;
                let value = (2.0 * std::f32::consts::PI * frequency * t + phase).sin() * 0.5;
                encode_sample(spec.format, value, &mut plane);
            }
            plane
        })
        .collect()
}

/// One plane per channel where every sample is `value`.
pub fn constant_planes(spec: &AudioSpec, frames: usize, value: f32) -> Vec<Vec<u8>> {
    (0..spec.channels)
        .map(|_| {
            let mut plane = Vec::with_capacity(frames * spec.bytes_per_sample);
            for _ in 0..frames {
                encode_sample(spec.format, value, &mut plane);
            }
            plane
        })
        .collect()
}

/// Borrow owned planes the way the mailbox takes them.
pub fn plane_refs(planes: &[Vec<u8>]) -> Vec<&[u8]> {
    planes.iter().map(|p| p.as_slice()).collect()
}

/// An I420 frame with a diagonal luma gradient starting at `seed`.
///
/// Different seeds give different frames; `data_y()[0] == seed as u8`.
pub fn gradient_frame(width: u32, height: u32, seed: u32) -> I420Frame {
    let base = (seed % 256) as u8;
    let mut y = Vec::with_capacity((width * height) as usize);
    for row in 0..height {
        for col in 0..width {
            y.push(base.wrapping_add(((row + col) % 256) as u8));
        }
    }

    let chroma = (((width + 1) / 2) * ((height + 1) / 2)) as usize;
    let u = vec![base.wrapping_mul(3); chroma];
    let v = vec![128u8; chroma];

    // Sizes are computed from the same dimensions, so construction cannot fail
    match I420Frame::new(width, height, Bytes::from(y), Bytes::from(u), Bytes::from(v)) {
        Ok(frame) => frame,
        Err(_) => I420Frame::black(width, height),
    }
}

/// Router RTP capabilities offering Opus and VP8.
pub fn router_capabilities() -> Value {
    json!({
        "codecs": [
            {
                "kind": "audio",
                "mimeType": "audio/opus",
                "preferredPayloadType": 100,
                "clockRate": 48000,
                "channels": 2,
                "parameters": {},
                "rtcpFeedback": [{ "type": "transport-cc" }]
            },
            {
                "kind": "video",
                "mimeType": "video/VP8",
                "preferredPayloadType": 101,
                "clockRate": 90000,
                "parameters": {},
                "rtcpFeedback": [
                    { "type": "nack" },
                    { "type": "nack", "parameter": "pli" },
                    { "type": "ccm", "parameter": "fir" },
                    { "type": "goog-remb" },
                    { "type": "transport-cc" }
                ]
            }
        ],
        "headerExtensions": [
            {
                "kind": "audio",
                "uri": "urn:ietf:params:rtp-hdrext:sdes:mid",
                "preferredId": 1
            },
            {
                "kind": "video",
                "uri": "urn:ietf:params:rtp-hdrext:sdes:mid",
                "preferredId": 1
            }
        ]
    })
}

/// Transport parameters as the server returns them from `createWebRtcTransport`.
pub fn transport_params(id: &str) -> Value {
    json!({
        "id": id,
        "iceParameters": {
            "usernameFragment": format!("ufrag-{id}"),
            "password": "synthetic-password",
            "iceLite": true
        },
        "iceCandidates": [
            {
                "foundation": "udpcandidate",
                "priority": 1076302079,
                "ip": "127.0.0.1",
                "protocol": "udp",
                "port": 40000,
                "type": "host"
            }
        ],
        "dtlsParameters": {
            "role": "auto",
            "fingerprints": [
                { "algorithm": "sha-256", "value": "AB:CD:EF:01:23:45:67:89" }
            ]
        }
    })
}

pub fn transport_params_json(id: &str) -> String {
    transport_params(id).to_string()
}

/// A consume answer for `producer_id`.
pub fn consumer_params_json(id: &str, producer_id: &str, kind: &str) -> String {
    json!({
        "id": id,
        "producerId": producer_id,
        "kind": kind,
        "rtpParameters": {
            "mid": "0",
            "codecs": [],
            "encodings": [{ "ssrc": 1111 }]
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::resample::{AudioResampler, SpeakerLayout};
    use crate::types::{ConsumerParams, TransportParams};

    #[test]
    fn test_constant_planes_decode_to_value() {
        for format in [
            SampleFormat::U8Planar,
            SampleFormat::S16Planar,
            SampleFormat::S32Planar,
            SampleFormat::FloatPlanar,
        ] {
            let spec = AudioSpec::new(format, SpeakerLayout::Stereo, 48_000);
            let planes = constant_planes(&spec, 8, 0.5);
            assert_eq!(planes.len(), 2);
            assert_eq!(planes[0].len(), 8 * spec.bytes_per_sample);

            let rs = AudioResampler::new(spec).unwrap();
            let float = rs.to_float(&plane_refs(&planes), 8);
            assert!((float[1][7] - 0.5).abs() < 0.01, "{format:?}");
        }
    }

    #[test]
    fn test_gradient_frame_seed() {
        let frame = gradient_frame(6, 4, 7);
        assert_eq!(frame.data_y()[0], 7);
        assert_eq!(frame.data_y().len(), 24);
        assert_eq!(frame.data_u().len(), 6);
        assert_ne!(gradient_frame(6, 4, 8), frame);
    }

    #[test]
    fn test_fixtures_parse() {
        assert!(TransportParams::from_json(&transport_params_json("t1")).is_ok());
        let consumer = ConsumerParams::from_json(&consumer_params_json("c1", "p1", "video")).unwrap();
        assert_eq!(consumer.producer_id, "p1");
        assert!(router_capabilities()["codecs"].is_array());
    }
}
