//! Frame encoding with a layered fallback chain.
//!
//! Capture devices hand back whatever pixel layout their driver produces,
//! and individual encoder paths reject some of them. [`FrameEncoder`]
//! normalizes every frame to packed RGB first, then tries in order:
//!
//! 1. JPEG at the tier's quality ([`EncodeStage::Direct`])
//! 2. JPEG through the generic image writer ([`EncodeStage::Generic`])
//! 3. PNG ([`EncodeStage::Lossless`])
//! 4. a rendered placeholder naming the camera ([`EncodeStage::Placeholder`])
//!
//! Only when the placeholder itself cannot be encoded does `encode` fail.

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, RgbImage};

use super::placeholder;
use super::request::QualityTier;
use crate::domain::{Frame, PixelFormat};

/// Encoding failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// The raw frame could not be converted to RGB.
    #[error("unsupported frame: {0}")]
    Convert(String),

    /// A codec rejected the image.
    #[error("{strategy} encoding failed: {reason}")]
    Codec {
        /// Strategy that failed.
        strategy: Strategy,
        /// Codec error text.
        reason: String,
    },
}

/// One encoding attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// JPEG with an explicit quality (1–100).
    JpegQuality(u8),
    /// JPEG with the writer's default settings.
    JpegGeneric,
    /// Lossless PNG.
    Png,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JpegQuality(q) => write!(f, "jpeg(q={q})"),
            Self::JpegGeneric => f.write_str("jpeg"),
            Self::Png => f.write_str("png"),
        }
    }
}

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// `image/jpeg`.
    Jpeg,
    /// `image/png`.
    Png,
}

impl ImageKind {
    /// MIME type of this format.
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

/// Which step of the chain produced an [`EncodedImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeStage {
    /// Primary JPEG path.
    Direct,
    /// Generic JPEG writer.
    Generic,
    /// PNG.
    Lossless,
    /// Rendered placeholder.
    Placeholder,
}

/// Result of encoding one frame.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    /// Encoded bytes.
    pub bytes: Vec<u8>,
    /// Container format.
    pub kind: ImageKind,
    /// Step that succeeded.
    pub stage: EncodeStage,
    /// Encoded width in pixels.
    pub width: u32,
    /// Encoded height in pixels.
    pub height: u32,
    /// Why the real frame was replaced, set only for placeholders.
    pub failure: Option<EncodeError>,
}

/// Codec seam: encodes an RGB image with one strategy.
pub trait RasterCodec: Send + Sync + fmt::Debug {
    /// Encodes `image` using `strategy`.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::Codec`] if the codec rejects the image.
    fn encode(&self, image: &RgbImage, strategy: Strategy) -> Result<Vec<u8>, EncodeError>;
}

/// [`RasterCodec`] backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateCodec;

impl RasterCodec for ImageCrateCodec {
    fn encode(&self, image: &RgbImage, strategy: Strategy) -> Result<Vec<u8>, EncodeError> {
        let codec_err = |err: image::ImageError| EncodeError::Codec {
            strategy,
            reason: err.to_string(),
        };
        let mut bytes = Vec::new();
        match strategy {
            Strategy::JpegQuality(quality) => {
                JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
                    .encode_image(image)
                    .map_err(codec_err)?;
            }
            Strategy::JpegGeneric => {
                image
                    .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
                    .map_err(codec_err)?;
            }
            Strategy::Png => {
                PngEncoder::new(&mut bytes)
                    .write_image(
                        image.as_raw(),
                        image.width(),
                        image.height(),
                        ExtendedColorType::Rgb8,
                    )
                    .map_err(codec_err)?;
            }
        }
        Ok(bytes)
    }
}

/// Converts a raw frame to packed RGB.
///
/// # Errors
///
/// Returns [`EncodeError::Convert`] if a dimension is zero or the buffer
/// length does not match the dimensions and pixel format.
pub fn to_rgb(frame: &Frame) -> Result<RgbImage, EncodeError> {
    let expected = frame
        .expected_len()
        .ok_or_else(|| EncodeError::Convert("frame dimensions overflow".to_string()))?;
    if expected == 0 || frame.data.len() != expected {
        return Err(EncodeError::Convert(format!(
            "{}x{} {} frame needs {expected} bytes, got {}",
            frame.width,
            frame.height,
            frame.format,
            frame.data.len()
        )));
    }
    let data = &frame.data;
    let rgb: Vec<u8> = match frame.format {
        PixelFormat::Rgb8 => data.clone(),
        PixelFormat::Bgr8 => data
            .chunks_exact(3)
            .flat_map(|px| px.iter().rev())
            .copied()
            .collect(),
        PixelFormat::Rgba8 => data
            .chunks_exact(4)
            .flat_map(|px| px.iter().take(3))
            .copied()
            .collect(),
        PixelFormat::Bgra8 => data
            .chunks_exact(4)
            .flat_map(|px| px.iter().take(3).rev())
            .copied()
            .collect(),
        PixelFormat::Gray8 => data.iter().flat_map(|&v| [v, v, v]).collect(),
        // little-endian: the second byte is the high byte
        PixelFormat::Gray16 => data
            .chunks_exact(2)
            .flat_map(|px| {
                let v = px.get(1).copied().unwrap_or(0);
                [v, v, v]
            })
            .collect(),
    };
    RgbImage::from_raw(frame.width, frame.height, rgb)
        .ok_or_else(|| EncodeError::Convert("converted buffer has the wrong size".to_string()))
}

/// Encodes frames through the fallback chain.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    codec: Arc<dyn RasterCodec>,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEncoder {
    /// Creates an encoder using [`ImageCrateCodec`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_codec(Arc::new(ImageCrateCodec))
    }

    /// Creates an encoder using a custom codec.
    #[must_use]
    pub fn with_codec(codec: Arc<dyn RasterCodec>) -> Self {
        Self { codec }
    }

    /// Encodes `frame`, falling back to a placeholder naming `camera_id`.
    ///
    /// # Errors
    ///
    /// Returns the last [`EncodeError`] if even the placeholder could not
    /// be encoded.
    pub fn encode(
        &self,
        frame: &Frame,
        quality: QualityTier,
        camera_id: &str,
    ) -> Result<EncodedImage, EncodeError> {
        let failure = match to_rgb(frame) {
            Ok(rgb) => match self.encode_chain(&rgb, quality, camera_id) {
                Ok(encoded) => return Ok(encoded),
                Err(err) => err,
            },
            Err(err) => err,
        };

        tracing::warn!(camera_id, error = %failure, "frame encoding failed; sending placeholder");
        let image = placeholder::render(
            frame.width,
            frame.height,
            camera_id,
            placeholder::FAILURE_LABEL,
        );
        let (bytes, kind) = self
            .codec
            .encode(&image, Strategy::JpegGeneric)
            .map(|bytes| (bytes, ImageKind::Jpeg))
            .or_else(|_| {
                self.codec
                    .encode(&image, Strategy::Png)
                    .map(|bytes| (bytes, ImageKind::Png))
            })?;
        Ok(EncodedImage {
            bytes,
            kind,
            stage: EncodeStage::Placeholder,
            width: image.width(),
            height: image.height(),
            failure: Some(failure),
        })
    }

    fn encode_chain(
        &self,
        image: &RgbImage,
        quality: QualityTier,
        camera_id: &str,
    ) -> Result<EncodedImage, EncodeError> {
        let chain = [
            (Strategy::JpegQuality(quality.jpeg_quality()), ImageKind::Jpeg, EncodeStage::Direct),
            (Strategy::JpegGeneric, ImageKind::Jpeg, EncodeStage::Generic),
            (Strategy::Png, ImageKind::Png, EncodeStage::Lossless),
        ];
        let mut last_error = None;
        for (strategy, kind, stage) in chain {
            match self.codec.encode(image, strategy) {
                Ok(bytes) => {
                    if last_error.is_some() {
                        tracing::debug!(camera_id, %strategy, "encoder fallback succeeded");
                    }
                    return Ok(EncodedImage {
                        bytes,
                        kind,
                        stage,
                        width: image.width(),
                        height: image.height(),
                        failure: None,
                    });
                }
                Err(err) => {
                    tracing::debug!(camera_id, error = %err, "encoder strategy failed");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| EncodeError::Convert("no encoder strategies".to_string())))
    }
}
