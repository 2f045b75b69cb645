//! I420 frames crossing the host/SDK boundary.
//!
//! Pixel-format conversion is the host's job; everything in here is already
//! planar 4:2:0.

pub mod source;

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::ConnectorError;

pub use source::MailboxVideoSource;

/// Immutable planar 4:2:0 frame with tightly packed planes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I420Frame {
    width: u32,
    height: u32,
    y: Bytes,
    u: Bytes,
    v: Bytes,
}

impl I420Frame {
    pub fn new(width: u32, height: u32, y: Bytes, u: Bytes, v: Bytes) -> Result<Self, ConnectorError> {
        if width == 0 || height == 0 {
            return Err(ConnectorError::malformed("frame dimensions must be non-zero"));
        }
        let (luma, chroma) = Self::plane_sizes(width, height);
        if y.len() != luma || u.len() != chroma || v.len() != chroma {
            return Err(ConnectorError::malformed(format!(
                "plane sizes {}/{}/{} do not match {}x{}",
                y.len(),
                u.len(),
                v.len(),
                width,
                height
            )));
        }
        Ok(Self { width, height, y, u, v })
    }

    /// Black frame: Y at 0, chroma at mid-scale.
    pub fn black(width: u32, height: u32) -> Self {
        let (luma, chroma) = Self::plane_sizes(width.max(1), height.max(1));
        Self {
            width: width.max(1),
            height: height.max(1),
            y: Bytes::from(vec![0u8; luma]),
            u: Bytes::from(vec![128u8; chroma]),
            v: Bytes::from(vec![128u8; chroma]),
        }
    }

    fn plane_sizes(width: u32, height: u32) -> (usize, usize) {
        let (w, h) = (width as usize, height as usize);
        (w * h, ((w + 1) / 2) * ((h + 1) / 2))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride_y(&self) -> usize {
        self.width as usize
    }

    pub fn stride_uv(&self) -> usize {
        (self.width as usize + 1) / 2
    }

    pub fn data_y(&self) -> &Bytes {
        &self.y
    }

    pub fn data_u(&self) -> &Bytes {
        &self.u
    }

    pub fn data_v(&self) -> &Bytes {
        &self.v
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoRotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

/// A decoded frame delivered by a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub buffer: Arc<I420Frame>,
    pub rotation: VideoRotation,
    pub timestamp_us: i64,
}

impl VideoFrame {
    pub fn new(buffer: Arc<I420Frame>, timestamp_us: i64) -> Self {
        Self {
            buffer,
            rotation: VideoRotation::Deg0,
            timestamp_us,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_black_frame_planes() {
        let frame = I420Frame::black(4, 2);
        assert_eq!(frame.data_y().len(), 8);
        assert_eq!(frame.data_u().len(), 2);
        assert!(frame.data_y().iter().all(|b| *b == 0));
        assert!(frame.data_v().iter().all(|b| *b == 128));
    }

    #[test]
    fn test_odd_dimensions_round_chroma_up() {
        let frame = I420Frame::black(3, 3);
        assert_eq!(frame.stride_uv(), 2);
        assert_eq!(frame.data_u().len(), 4);
    }

    #[test]
    fn test_new_checks_plane_sizes() {
        let ok = I420Frame::new(
            2,
            2,
            Bytes::from(vec![1u8; 4]),
            Bytes::from(vec![2u8; 1]),
            Bytes::from(vec![3u8; 1]),
        );
        assert!(ok.is_ok());

        let bad = I420Frame::new(
            2,
            2,
            Bytes::from(vec![1u8; 3]),
            Bytes::from(vec![2u8; 1]),
            Bytes::from(vec![3u8; 1]),
        );
        assert!(bad.is_err());
        assert!(I420Frame::new(0, 2, Bytes::new(), Bytes::new(), Bytes::new()).is_err());
    }
}
