//! Camera streaming: request normalization, frame encoding, and the
//! per-connection session lifecycle.

pub mod encoder;
pub mod manager;
pub mod placeholder;
pub mod request;
pub mod session;

pub use encoder::{
    EncodeError, EncodeStage, EncodedImage, FrameEncoder, ImageCrateCodec, ImageKind, RasterCodec,
    Strategy,
};
pub use manager::{StreamSessionManager, StreamSettings};
pub use request::{DEFAULT_FPS, MAX_FPS, QualityTier, StreamRequest};
pub use session::{SessionState, StreamSession};
