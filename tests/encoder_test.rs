//! H.264 encoder tests against synthetic camera content
//!
//! Run with: cargo test --test encoder_test

use camsignal::encoder::H264Encoder;
use camsignal::testing::synthetic_video_frame;

/// Walk the Annex B stream and collect NAL unit types
fn nal_unit_types(data: &[u8]) -> Vec<u8> {
    let mut types = Vec::new();
    let mut i = 0;
    while i + 3 < data.len() {
        let start = if data[i..].starts_with(&[0, 0, 0, 1]) {
            Some(4)
        } else if data[i..].starts_with(&[0, 0, 1]) {
            Some(3)
        } else {
            None
        };
        match start {
            Some(len) if i + len < data.len() => {
                types.push(data[i + len] & 0x1f);
                i += len;
            }
            _ => i += 1,
        }
    }
    types
}

fn checkerboard(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            let v = if (x / 8 + y / 8) % 2 == 0 { 0 } else { 255 };
            data.extend_from_slice(&[v, v, v]);
        }
    }
    data
}

#[test]
fn test_encoder_creation_for_common_sizes() {
    for (width, height, fps, bitrate) in [
        (320, 240, 15.0, 500_000),
        (640, 480, 30.0, 1_000_000),
        (1280, 720, 30.0, 4_000_000),
    ] {
        let encoder = H264Encoder::new(width, height, fps, bitrate)
            .unwrap_or_else(|e| panic!("{}x{} should be supported: {}", width, height, e));
        assert_eq!(encoder.frame_count(), 0);
        assert!(!encoder.last_was_keyframe());
    }
}

#[test]
fn test_first_access_unit_carries_parameter_sets() {
    let mut encoder = H264Encoder::new(320, 240, 30.0, 500_000).unwrap();
    let frame = synthetic_video_frame(0, 320, 240);

    let encoded = encoder.encode_rgb(&frame.data).unwrap();
    assert!(encoded.is_keyframe);

    let types = nal_unit_types(&encoded.data);
    assert!(types.contains(&7), "missing SPS in {:?}", types);
    assert!(types.contains(&8), "missing PPS in {:?}", types);
    assert!(types.contains(&5), "missing IDR slice in {:?}", types);
}

#[test]
fn test_encoding_varied_content() {
    let (width, height) = (320u32, 240u32);
    let mut encoder = H264Encoder::new(width, height, 30.0, 1_000_000).unwrap();
    let size = (width * height * 3) as usize;

    let frames = [
        ("black", vec![0u8; size]),
        ("white", vec![255u8; size]),
        ("gradient", synthetic_video_frame(7, width, height).data),
        ("checkerboard", checkerboard(width, height)),
    ];

    for (name, rgb) in frames {
        let encoded = encoder
            .encode_rgb(&rgb)
            .unwrap_or_else(|e| panic!("encoding {} failed: {}", name, e));
        if !encoded.data.is_empty() {
            assert!(
                encoded.data.starts_with(&[0, 0, 0, 1]) || encoded.data.starts_with(&[0, 0, 1]),
                "{} frame is not Annex B",
                name
            );
        }
    }
    assert_eq!(encoder.frame_count(), 4);
}

#[test]
fn test_forced_keyframes() {
    let mut encoder = H264Encoder::new(320, 240, 30.0, 500_000).unwrap();
    let mut keyframes = Vec::new();

    for i in 0..30u64 {
        if i > 0 && i % 10 == 0 {
            encoder.force_keyframe();
        }
        let frame = synthetic_video_frame(i, 320, 240);
        if encoder.encode_rgb(&frame.data).unwrap().is_keyframe {
            keyframes.push(i);
        }
    }

    assert_eq!(keyframes.first(), Some(&0));
    assert!(keyframes.len() >= 3, "keyframes at {:?}", keyframes);
}

#[test]
fn test_encoder_recovers_after_bad_input() {
    let mut encoder = H264Encoder::new(320, 240, 30.0, 500_000).unwrap();

    for bad in [
        vec![0u8; 100],
        vec![0u8; 320 * 240 * 3 + 1],
        vec![0u8; 320 * 240 * 2],
    ] {
        let err = encoder.encode_rgb(&bad).unwrap_err();
        assert!(err.to_string().contains("Invalid frame size"));
    }

    let frame = synthetic_video_frame(0, 320, 240);
    assert!(encoder.encode_rgb(&frame.data).is_ok());
    assert_eq!(encoder.frame_count(), 1);
}
