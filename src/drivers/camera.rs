//! Imaging camera contract and frame types.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Driver;

/// Pixel data in the camera's native format.
///
/// Astronomy cameras deliver 16-bit ADU counts; drivers that only expose a
/// generic image array (32-bit ints or doubles) keep that representation instead
/// of converting on the hot path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PixelBuffer {
    /// 16-bit unsigned ADU (2 bytes/pixel)
    U16(Vec<u16>),
    /// 32-bit signed image array (4 bytes/pixel)
    I32(Vec<i32>),
    /// 64-bit floating point (8 bytes/pixel)
    F64(Vec<f64>),
}

impl PixelBuffer {
    /// Returns the number of pixels in the buffer.
    pub fn len(&self) -> usize {
        match self {
            PixelBuffer::U16(data) => data.len(),
            PixelBuffer::I32(data) => data.len(),
            PixelBuffer::F64(data) => data.len(),
        }
    }

    /// Returns true if the buffer contains no pixels.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes per pixel of the native format.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelBuffer::U16(_) => 2,
            PixelBuffer::I32(_) => 4,
            PixelBuffer::F64(_) => 8,
        }
    }

    /// Returns the memory size in bytes.
    pub fn memory_bytes(&self) -> usize {
        self.len() * self.bytes_per_pixel()
    }

    /// Short name of the pixel format, as written to frame sidecars.
    pub fn format_name(&self) -> &'static str {
        match self {
            PixelBuffer::U16(_) => "u16",
            PixelBuffer::I32(_) => "i32",
            PixelBuffer::F64(_) => "f64",
        }
    }

    /// Little-endian byte dump of the pixels.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.memory_bytes());
        match self {
            PixelBuffer::U16(data) => data.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
            PixelBuffer::I32(data) => data.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
            PixelBuffer::F64(data) => data.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
        }
        out
    }
}

/// A downloaded exposure.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row-major pixel data
    pub pixels: PixelBuffer,
    /// Requested exposure time
    pub exposure: Duration,
    /// Light frame (shutter open) vs dark frame
    pub light: bool,
}

/// Sensor geometry and optional features, read on connect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct CameraCapabilities {
    /// Sensor width in pixels
    pub sensor_width: u32,
    /// Sensor height in pixels
    pub sensor_height: u32,
    /// Pixel pitch in micrometres
    pub pixel_size_um: f64,
    /// Whether the sensor cooler can be driven
    pub can_set_ccd_temperature: bool,
    /// Whether a running exposure can be aborted
    pub can_abort_exposure: bool,
}

/// Imaging camera.
#[async_trait]
pub trait Camera: Driver {
    /// Capability snapshot, only meaningful while connected.
    fn capabilities(&self) -> CameraCapabilities;

    /// Start an exposure and return immediately.
    async fn start_exposure(&self, duration: Duration, light: bool) -> Result<()>;

    /// Whether the last exposure has been read out and can be fetched with [`Camera::image`].
    async fn image_ready(&self) -> Result<bool>;

    /// The last completed exposure, `None` if nothing has been downloaded.
    async fn image(&self) -> Result<Option<Frame>>;

    /// Abort the running exposure. Fails unless `can_abort_exposure` is set.
    async fn abort_exposure(&self) -> Result<()> {
        anyhow::bail!("Abort exposure not supported by this camera")
    }

    /// Whether the cooler is running
    async fn cooler_on(&self) -> Result<bool>;

    /// Switch the cooler on or off.
    async fn set_cooler_on(&self, enabled: bool) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_buffer_sizes() {
        let buffer = PixelBuffer::U16(vec![0; 16]);
        assert_eq!(buffer.len(), 16);
        assert_eq!(buffer.memory_bytes(), 32);
        assert_eq!(buffer.format_name(), "u16");
        assert!(PixelBuffer::F64(Vec::new()).is_empty());
    }

    #[test]
    fn test_pixel_buffer_little_endian_dump() {
        let buffer = PixelBuffer::U16(vec![0x0102, 0xA0B0]);
        assert_eq!(buffer.to_le_bytes(), vec![0x02, 0x01, 0xB0, 0xA0]);
    }
}
