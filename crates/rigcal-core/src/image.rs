use crate::error::StreamError;

/// A single channel image stored row major.
#[derive(Debug, Clone, PartialEq)]
pub struct Image<T> {
    width: usize,
    height: usize,
    data: Vec<T>,
}

/// 8-bit intensity image.
pub type GrayImage = Image<u8>;

/// Range image with depth along the optical axis in metres.
pub type RangeImage = Image<f32>;

impl<T> Image<T> {
    /// Creates an image from row major pixel data.
    pub fn new(width: usize, height: usize, data: Vec<T>) -> Result<Self, StreamError> {
        if data.len() != width * height {
            return Err(StreamError::InvalidImageShape {
                expected: width * height,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Creates an image filled with a constant value.
    pub fn from_elem(width: usize, height: usize, value: T) -> Self
    where
        T: Clone,
    {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    /// Creates a zero sized image.
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            data: Vec::new(),
        }
    }

    /// Image width in pixels.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Image height in pixels.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Returns `(width, height)`.
    #[inline]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Check if the image holds no pixels.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw pixel data.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Get the pixel at `(x, y)` or `None` when out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<&T> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(y * self.width + x)
    }
}
