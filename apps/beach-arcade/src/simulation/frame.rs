use bytes::Bytes;
use thiserror::Error;

/// Memory layout of a frame as produced by a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// Packed RGB, rows top to bottom.
    Rgb24,
    /// Packed RGB indexed `[x][y]`, the layout surface-oriented renderers
    /// hand out.
    Rgb24ColumnMajor,
    /// Already encoded by the simulation; forwarded untouched.
    Encoded,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub data: Bytes,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height}")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

impl Frame {
    pub fn rgb(width: u32, height: u32, data: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            layout: PixelLayout::Rgb24,
            data: data.into(),
        }
    }

    /// Rewrites column-major buffers into row-major order. Row-major and
    /// encoded frames pass through without copying.
    pub fn into_row_major(self) -> Result<Frame, FrameError> {
        match self.layout {
            PixelLayout::Encoded => Ok(self),
            PixelLayout::Rgb24 => {
                self.check_len()?;
                Ok(self)
            }
            PixelLayout::Rgb24ColumnMajor => {
                self.check_len()?;
                let (w, h) = (self.width as usize, self.height as usize);
                let mut out = vec![0u8; w * h * 3];
                for x in 0..w {
                    for y in 0..h {
                        let src = (x * h + y) * 3;
                        let dst = (y * w + x) * 3;
                        out[dst..dst + 3].copy_from_slice(&self.data[src..src + 3]);
                    }
                }
                Ok(Frame {
                    width: self.width,
                    height: self.height,
                    layout: PixelLayout::Rgb24,
                    data: Bytes::from(out),
                })
            }
        }
    }

    fn check_len(&self) -> Result<(), FrameError> {
        let expected = self.width as usize * self.height as usize * 3;
        if self.data.len() != expected {
            return Err(FrameError::SizeMismatch {
                width: self.width,
                height: self.height,
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }
}
