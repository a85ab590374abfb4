//! Decoder collaborator
//!
//! The scanner treats decoding as opaque: a frame goes in, a payload or
//! nothing comes out. A per-frame failure is just "no result"; only a
//! decoder that cannot run at all is reported as an error.

use thiserror::Error;

use crate::frame::PixelBuffer;

/// Why a decode attempt produced nothing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Something code-like was found but could not be read from this frame.
    #[error("unreadable code: {0}")]
    Unreadable(String),
    /// The decoder itself could not be invoked.
    #[error("decoder unavailable: {0}")]
    Unavailable(String),
}

/// Turns a frame into a decoded payload.
pub trait Decoder: Send {
    /// Decode the most recent frame. `Ok(None)` means nothing was found.
    fn decode(&mut self, frame: &PixelBuffer) -> Result<Option<String>, DecodeError>;
}

impl<F> Decoder for F
where
    F: FnMut(&PixelBuffer) -> Result<Option<String>, DecodeError> + Send,
{
    fn decode(&mut self, frame: &PixelBuffer) -> Result<Option<String>, DecodeError> {
        self(frame)
    }
}

#[cfg(feature = "qr")]
pub use qr::QrDecoder;

#[cfg(feature = "qr")]
mod qr {
    use super::{DecodeError, Decoder};
    use crate::frame::PixelBuffer;

    /// QR code decoder backed by `rqrr`.
    ///
    /// Returns the first grid that decodes; when every detected grid fails
    /// the last failure is reported as [`DecodeError::Unreadable`].
    #[derive(Debug, Default, Clone, Copy)]
    pub struct QrDecoder;

    impl QrDecoder {
        pub fn new() -> Self {
            Self
        }
    }

    impl Decoder for QrDecoder {
        fn decode(&mut self, frame: &PixelBuffer) -> Result<Option<String>, DecodeError> {
            let mut img = rqrr::PreparedImage::prepare_from_greyscale(
                frame.width() as usize,
                frame.height() as usize,
                |x, y| frame.luma(x as u32, y as u32),
            );

            let mut last_err = None;
            for grid in img.detect_grids() {
                match grid.decode() {
                    Ok((_meta, content)) => return Ok(Some(content)),
                    Err(e) => last_err = Some(e),
                }
            }

            match last_err {
                Some(e) => Err(DecodeError::Unreadable(format!("{e:?}"))),
                None => Ok(None),
            }
        }
    }

}
