//! Integration tests for the wire protocol.
//!
//! These exercise the crate through its public API only, using byte
//! sequences a device would actually put on the wire.

use fleetcast_protocol::{
    CanvasMessage, ColorChannel, CurrentWeather, DeviceConfig, DeviceId, Forecast,
    ForecastDay, FullFrame, Heartbeat, MessageType, MoonPhase, PixelBatch, PixelUpdate,
    ProtocolError, SyncRequest, VersionNotice, WireMessage, decode, encode,
};

// =========================================================================
// Helpers
// =========================================================================

/// Frame as the firmware builds a bootup message.
fn bootup_frame(id: &str, key: &str) -> Vec<u8> {
    let mut payload = vec![2, id.len() as u8];
    payload.extend_from_slice(id.as_bytes());
    payload.push(key.len() as u8);
    payload.extend_from_slice(key.as_bytes());
    encode(MessageType::DeviceConfig.as_byte(), &payload).unwrap()
}

// =========================================================================
// Frame header
// =========================================================================

#[test]
fn test_every_message_kind_carries_its_type_byte() {
    let frames: Vec<(u8, Vec<u8>)> = vec![
        (0x01, CurrentWeather { temp_f: 70 }.to_frame().unwrap()),
        (0x02, Forecast { days: vec![] }.to_frame().unwrap()),
        (0x03, DeviceConfig::new(["a"]).to_frame().unwrap()),
        (0x10, VersionNotice { version: 1 }.to_frame().unwrap()),
        (
            0x11,
            Heartbeat {
                device: DeviceId::new("x"),
            }
            .to_frame()
            .unwrap(),
        ),
        (0x20, SyncRequest.to_frame().unwrap()),
        (0x21, FullFrame::default().to_frame().unwrap()),
        (
            0x22,
            PixelBatch {
                sequence: 0,
                pixels: vec![],
            }
            .to_frame()
            .unwrap(),
        ),
    ];

    for (expected, frame) in frames {
        assert_eq!(frame[0], expected);
        assert_eq!(usize::from(frame[1]), frame.len() - 2);
    }
}

#[test]
fn test_decode_rejects_mismatched_type() {
    let frame = VersionNotice { version: 3 }.to_frame().unwrap();
    assert_eq!(
        CurrentWeather::from_frame(&frame),
        Err(ProtocolError::UnexpectedType {
            expected: 0x01,
            found: 0x10
        })
    );
}

#[test]
fn test_raw_decode_then_typed_decode() {
    let frame = bootup_frame("dev0", "94107");
    let raw = decode(&frame).unwrap();
    assert_eq!(raw.kind(), Ok(MessageType::DeviceConfig));

    let config = DeviceConfig::from_raw(&raw).unwrap();
    assert_eq!(config.strings, vec!["dev0", "94107"]);
}

// =========================================================================
// Device-originated messages
// =========================================================================

#[test]
fn test_bootup_with_display_name() {
    let frame = DeviceConfig::new(["ESP32_Device", "12345", "Kitchen"])
        .to_frame()
        .unwrap();
    let decoded = DeviceConfig::from_frame(&frame).unwrap();
    assert_eq!(decoded.strings.len(), 3);
    assert_eq!(decoded.strings[2], "Kitchen");
}

#[test]
fn test_heartbeat_with_trailing_garbage_still_parses() {
    let mut frame = Heartbeat {
        device: DeviceId::new("dev7"),
    }
    .to_frame()
    .unwrap();
    frame.extend_from_slice(&[0xDE, 0xAD]);
    assert_eq!(
        Heartbeat::from_frame(&frame).unwrap().device,
        DeviceId::new("dev7")
    );
}

#[test]
fn test_heartbeat_empty_name_is_valid() {
    let decoded = Heartbeat::from_frame(&[0x11, 1, 0]).unwrap();
    assert_eq!(decoded.device.as_str(), "");
}

// =========================================================================
// Weather
// =========================================================================

#[test]
fn test_known_temperature_byte() {
    assert_eq!(
        CurrentWeather::from_frame(&[0x01, 0x01, 0x46]).unwrap(),
        CurrentWeather { temp_f: 20 }
    );
}

#[test]
fn test_forecast_three_days() {
    let days: Vec<ForecastDay> = [(80, 10, 0.2), (85, 55, 0.96), (79, 0, 1.0)]
        .into_iter()
        .map(|(high, precip, moon)| ForecastDay {
            high_temp: high,
            precip_percent: precip,
            moon: MoonPhase::from_fraction(moon),
        })
        .collect();

    let frame = Forecast { days: days.clone() }.to_frame().unwrap();
    assert_eq!(frame.len(), 2 + 1 + 9);
    assert_eq!(&frame[2..], &[3, 80, 10, 0, 85, 55, 1, 79, 0, 2]);
    assert_eq!(Forecast::from_frame(&frame).unwrap().days, days);
}

#[test]
fn test_forecast_unknown_moon_code() {
    assert!(matches!(
        Forecast::from_frame(&[0x02, 4, 1, 80, 0, 9]),
        Err(ProtocolError::OutOfRange(_))
    ));
}

// =========================================================================
// Canvas
// =========================================================================

#[test]
fn test_full_frame_is_exactly_100_bytes_on_the_wire() {
    let frame = FullFrame {
        sequence: 42,
        red: [0xFFFF; 16],
        ..FullFrame::default()
    };
    let bytes = frame.to_frame().unwrap();
    assert_eq!(bytes.len(), 100);

    match CanvasMessage::from_frame(&bytes).unwrap() {
        CanvasMessage::FullFrame(decoded) => assert_eq!(decoded, frame),
        other => panic!("expected full frame, got {other:?}"),
    }
}

#[test]
fn test_pixel_batch_via_canvas_dispatch() {
    let batch = PixelBatch {
        sequence: 9,
        pixels: vec![PixelUpdate::new(0, 0, ColorChannel::Red)],
    };
    let bytes = batch.to_frame().unwrap();
    assert_eq!(
        CanvasMessage::from_frame(&bytes).unwrap(),
        CanvasMessage::PixelBatch(batch)
    );
}

#[test]
fn test_pixel_batch_encoder_skips_out_of_range_coordinates() {
    let batch = PixelBatch {
        sequence: 1,
        pixels: vec![
            PixelUpdate::new(16, 0, ColorChannel::Red),
            PixelUpdate::new(1, 1, ColorChannel::Blue),
        ],
    };
    let decoded = PixelBatch::from_frame(&batch.to_frame().unwrap()).unwrap();
    assert_eq!(decoded.pixels, vec![PixelUpdate::new(1, 1, ColorChannel::Blue)]);
}

#[test]
fn test_pixel_batch_length_mismatch_that_is_not_legacy() {
    // count = 2 but five body bytes: neither 2×2 nor 2×3.
    let frame = [0x22, 8, 0, 1, 2, 1, 1, 1, 1, 1];
    assert_eq!(
        PixelBatch::from_frame(&frame),
        Err(ProtocolError::LengthMismatch {
            declared: 4,
            available: 5
        })
    );
}
