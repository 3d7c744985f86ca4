use fleetcast_protocol::{
    CANVAS_SIZE, ColorChannel, FullFrame, PixelUpdate, ProtocolError, WireMessage,
};

/// The 16x16 tri-channel canvas.
///
/// Bit `N` of `red[row]` is the red sub-pixel in column `N`. The pixel
/// path can only turn bits on; clearing happens by replacing the whole
/// frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Canvas {
    red: [u16; CANVAS_SIZE],
    green: [u16; CANVAS_SIZE],
    blue: [u16; CANVAS_SIZE],
    sequence: u16,
}

impl Canvas {
    /// An all-dark canvas at sequence 0.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    fn layer_mut(&mut self, channel: ColorChannel) -> &mut [u16; CANVAS_SIZE] {
        match channel {
            ColorChannel::Red => &mut self.red,
            ColorChannel::Green => &mut self.green,
            ColorChannel::Blue => &mut self.blue,
        }
    }

    fn layer(&self, channel: ColorChannel) -> &[u16; CANVAS_SIZE] {
        match channel {
            ColorChannel::Red => &self.red,
            ColorChannel::Green => &self.green,
            ColorChannel::Blue => &self.blue,
        }
    }

    /// Turns on every in-range pixel in `batch` and returns the new
    /// sequence number.
    ///
    /// The sequence advances by exactly one per call, even for an empty
    /// batch or one whose pixels were all out of range, and wraps at
    /// `u16::MAX`.
    pub fn apply_pixel_updates(&mut self, batch: &[PixelUpdate]) -> u16 {
        let mut skipped = 0usize;
        for update in batch {
            let (row, col) = (usize::from(update.row), usize::from(update.col));
            if row >= CANVAS_SIZE || col >= CANVAS_SIZE {
                skipped += 1;
                continue;
            }
            self.layer_mut(update.channel)[row] |= 1 << col;
        }
        if skipped > 0 {
            tracing::debug!(skipped, "ignored out-of-range pixel updates");
        }

        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    /// Overwrites all three layers and the sequence with `frame`.
    ///
    /// The incoming sequence is taken as-is, even if it's lower than ours:
    /// the most recent full frame is the truth.
    pub fn replace_full_frame(&mut self, frame: &FullFrame) {
        if frame.sequence < self.sequence {
            tracing::debug!(
                from = self.sequence,
                to = frame.sequence,
                "full frame moves sequence backwards"
            );
        }
        self.red = frame.red;
        self.green = frame.green;
        self.blue = frame.blue;
        self.sequence = frame.sequence;
    }

    /// A copy of the current state in wire form.
    pub fn snapshot(&self) -> FullFrame {
        FullFrame {
            sequence: self.sequence,
            red: self.red,
            green: self.green,
            blue: self.blue,
        }
    }

    /// The current state as a complete `0x21` frame, ready to publish.
    pub fn encode_full_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        self.snapshot().to_frame()
    }

    /// Whether the given sub-pixel is lit. Out-of-range coordinates are
    /// never lit.
    pub fn is_set(&self, row: u8, col: u8, channel: ColorChannel) -> bool {
        let (row, col) = (usize::from(row), usize::from(col));
        row < CANVAS_SIZE && col < CANVAS_SIZE && self.layer(channel)[row] & (1 << col) != 0
    }
}
