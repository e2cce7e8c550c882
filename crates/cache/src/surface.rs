//! Rendered page surfaces

use std::fmt;

/// Bytes per RGBA pixel
pub const BYTES_PER_PIXEL: usize = 4;

/// RGBA8 pixel buffer produced by the render backend
///
/// Surfaces are immutable once produced; they cross from worker threads to
/// the main loop by value.
#[derive(Clone, PartialEq, Eq)]
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Surface {
    /// Wrap a pixel buffer. Returns `None` if the buffer length does not
    /// match `width * height * 4`.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        if pixels.len() != width as usize * height as usize * BYTES_PER_PIXEL {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    /// Opaque white surface of the given size
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0xff; width as usize * height as usize * BYTES_PER_PIXEL],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Memory held by the pixel buffer
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    /// Nearest-neighbour copy whose longest edge is at most `max_dim`
    ///
    /// Surfaces already within bounds are cloned unchanged.
    pub fn downscaled(&self, max_dim: u32) -> Surface {
        let longest = self.width.max(self.height);
        if longest <= max_dim || longest == 0 || max_dim == 0 {
            return self.clone();
        }

        let scale = max_dim as f64 / longest as f64;
        let width = ((self.width as f64 * scale).round() as u32).max(1);
        let height = ((self.height as f64 * scale).round() as u32).max(1);

        let mut pixels = Vec::with_capacity(width as usize * height as usize * BYTES_PER_PIXEL);
        for y in 0..height {
            let src_y = ((y as u64 * self.height as u64) / height as u64) as usize;
            for x in 0..width {
                let src_x = ((x as u64 * self.width as u64) / width as u64) as usize;
                let offset = (src_y * self.width as usize + src_x) * BYTES_PER_PIXEL;
                pixels.extend_from_slice(&self.pixels[offset..offset + BYTES_PER_PIXEL]);
            }
        }

        Surface {
            width,
            height,
            pixels,
        }
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}
