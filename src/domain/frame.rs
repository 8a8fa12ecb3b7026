//! Raw captured frames and the capture primitive that produces them.
//!
//! Capture devices hand back whatever pixel layout their driver produces.
//! A [`Frame`] carries that layout verbatim; normalisation into a common
//! RGB buffer happens in the encoder, not here.

use std::fmt;

/// Pixel layout of a raw [`Frame`] buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit luminance.
    Gray8,
    /// 16-bit little-endian luminance.
    Gray16,
    /// 8-bit red, green, blue.
    Rgb8,
    /// 8-bit red, green, blue, alpha.
    Rgba8,
    /// 8-bit blue, green, red.
    Bgr8,
    /// 8-bit blue, green, red, alpha.
    Bgra8,
}

impl PixelFormat {
    /// Number of bytes per pixel for this layout.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Gray8 => 1,
            Self::Gray16 => 2,
            Self::Rgb8 | Self::Bgr8 => 3,
            Self::Rgba8 | Self::Bgra8 => 4,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gray8 => "gray8",
            Self::Gray16 => "gray16",
            Self::Rgb8 => "rgb8",
            Self::Rgba8 => "rgba8",
            Self::Bgr8 => "bgr8",
            Self::Bgra8 => "bgra8",
        };
        f.write_str(name)
    }
}

/// One image as returned by a capture device.
///
/// Nothing about the buffer is trusted: `data` may be shorter or longer
/// than `width * height * bytes_per_pixel`, and either dimension may be zero.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Layout of `data`.
    pub format: PixelFormat,
    /// Raw pixel bytes, row-major, no padding.
    pub data: Vec<u8>,
}

impl Frame {
    /// Creates a frame from its parts without validating them.
    #[must_use]
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            data,
        }
    }

    /// Buffer length a well-formed frame of these dimensions would have.
    ///
    /// Returns `None` if the product overflows `usize`.
    #[must_use]
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.format.bytes_per_pixel())
    }

    /// Checks that both dimensions are positive.
    ///
    /// Buffer length is deliberately not checked here; a short buffer is an
    /// encoder concern and ends in the placeholder path rather than a
    /// dropped tick.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::InvalidDimensions`] if either dimension is zero.
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// Failure reported by a [`FrameSource`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// The device is not ready or has gone away.
    #[error("camera unavailable: {0}")]
    Unavailable(String),

    /// The device returned an error while capturing.
    #[error("capture failed: {0}")]
    Device(String),

    /// The device returned an image with a zero dimension.
    #[error("invalid image dimensions: {width}x{height}")]
    InvalidDimensions {
        /// Reported width.
        width: u32,
        /// Reported height.
        height: u32,
    },
}

/// Synchronous per-camera capture primitive.
///
/// Implementations may block for the device's capture latency. `Ok(None)`
/// means the device produced no image this time.
pub trait FrameSource: Send + Sync + fmt::Debug {
    /// Captures one frame.
    ///
    /// # Errors
    ///
    /// Returns a [`CaptureError`] when the device fails.
    fn capture(&self) -> Result<Option<Frame>, CaptureError>;
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn expected_len_accounts_for_format() {
        let frame = Frame::new(4, 3, PixelFormat::Rgba8, Vec::new());
        assert_eq!(frame.expected_len(), Some(48));
        let frame = Frame::new(4, 3, PixelFormat::Gray16, Vec::new());
        assert_eq!(frame.expected_len(), Some(24));
    }

    #[test]
    fn validate_rejects_zero_dimensions() {
        let frame = Frame::new(0, 10, PixelFormat::Gray8, Vec::new());
        assert_eq!(
            frame.validate(),
            Err(CaptureError::InvalidDimensions {
                width: 0,
                height: 10
            })
        );
    }

    #[test]
    fn validate_ignores_buffer_length() {
        let frame = Frame::new(2, 2, PixelFormat::Rgb8, vec![0; 3]);
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn debug_omits_pixel_bytes() {
        let frame = Frame::new(1, 1, PixelFormat::Gray8, vec![7]);
        let text = format!("{frame:?}");
        assert!(text.contains("data_len: 1"));
    }
}
