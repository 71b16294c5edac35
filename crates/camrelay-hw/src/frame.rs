//! Captured frame buffers.

use crate::format::PixelFormat;
use chrono::{DateTime, Utc};
use std::fmt;

/// A frame as delivered by the device, in its negotiated pixel format.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Device-side frame counter.
    pub frame_id: u64,
    /// Host time at which the frame was received.
    pub timestamp: DateTime<Utc>,
    /// False when the transfer did not fill the buffer.
    pub complete: bool,
}

impl Frame {
    /// Buffer size implied by the geometry and pixel format.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("frame_id", &self.frame_id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pixel_format", &self.pixel_format)
            .field("bytes", &self.data.len())
            .field("complete", &self.complete)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}
