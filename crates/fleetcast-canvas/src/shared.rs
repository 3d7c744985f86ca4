use fleetcast_protocol::{ColorChannel, FullFrame, PixelUpdate, ProtocolError};
use tokio::sync::RwLock;

use crate::Canvas;

/// A [`Canvas`] that many tasks can use at once.
///
/// Readers (snapshots, sync requests) proceed concurrently; writers
/// (pixel batches, full-frame replacements) are serialized. Each method
/// takes the lock for exactly one operation, so callers can't
/// accidentally hold it across a publish.
#[derive(Debug, Default)]
pub struct SharedCanvas {
    inner: RwLock<Canvas>,
}

impl SharedCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    /// See [`Canvas::apply_pixel_updates`].
    pub async fn apply_pixel_updates(&self, batch: &[PixelUpdate]) -> u16 {
        self.inner.write().await.apply_pixel_updates(batch)
    }

    /// See [`Canvas::replace_full_frame`].
    pub async fn replace_full_frame(&self, frame: &FullFrame) {
        self.inner.write().await.replace_full_frame(frame);
    }

    pub async fn snapshot(&self) -> FullFrame {
        self.inner.read().await.snapshot()
    }

    /// Encodes under the read lock and returns owned bytes.
    pub async fn encode_full_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        self.inner.read().await.encode_full_frame()
    }

    pub async fn sequence(&self) -> u16 {
        self.inner.read().await.sequence()
    }

    pub async fn is_set(&self, row: u8, col: u8, channel: ColorChannel) -> bool {
        self.inner.read().await.is_set(row, col, channel)
    }
}
