//! Concurrency tests for the shared canvas.

use std::sync::Arc;

use fleetcast_canvas::SharedCanvas;
use fleetcast_protocol::{ColorChannel, FullFrame, PixelUpdate};

#[tokio::test]
async fn test_concurrent_batches_each_bump_sequence_once() {
    let canvas = Arc::new(SharedCanvas::new());

    let mut handles = Vec::new();
    for i in 0..16u8 {
        let canvas = Arc::clone(&canvas);
        handles.push(tokio::spawn(async move {
            canvas
                .apply_pixel_updates(&[PixelUpdate::new(i, i, ColorChannel::Red)])
                .await
        }));
    }

    let mut sequences = Vec::new();
    for handle in handles {
        sequences.push(handle.await.unwrap());
    }
    sequences.sort_unstable();

    // Every writer saw a distinct sequence: no lost increments.
    assert_eq!(sequences, (1..=16).collect::<Vec<u16>>());
    assert_eq!(canvas.sequence().await, 16);
    for i in 0..16u8 {
        assert!(canvas.is_set(i, i, ColorChannel::Red).await);
    }
}

#[tokio::test]
async fn test_full_frame_then_batch_continues_from_new_sequence() {
    let canvas = SharedCanvas::new();
    canvas
        .replace_full_frame(&FullFrame {
            sequence: 500,
            ..FullFrame::default()
        })
        .await;

    let seq = canvas
        .apply_pixel_updates(&[PixelUpdate::new(0, 1, ColorChannel::Green)])
        .await;
    assert_eq!(seq, 501);
    assert_eq!(canvas.snapshot().await.green[0], 0b10);
}

#[tokio::test]
async fn test_encoded_frame_matches_snapshot_sequence() {
    let canvas = SharedCanvas::new();
    canvas.apply_pixel_updates(&[]).await;
    canvas.apply_pixel_updates(&[]).await;

    let bytes = canvas.encode_full_frame().await.unwrap();
    // Sequence is big-endian right after the header.
    assert_eq!(&bytes[2..4], &[0, 2]);
}
