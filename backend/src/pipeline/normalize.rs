use image::imageops::{self, FilterType};
use image::ImageReader;
use ndarray::{Array4, ArrayView4};
use std::io::Cursor;

/// Side length of the square classifier input.
pub const INPUT_SIZE: usize = 224;
pub const CHANNELS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Uploaded file is empty")]
    Empty,
    #[error("Could not read image: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not decode image: {0}")]
    Image(#[from] image::ImageError),
}

/// A single image batch of shape (1, 224, 224, 3) with values in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTensor {
    data: Array4<f32>,
}

impl NormalizedTensor {
    pub const SHAPE: [usize; 4] = [1, INPUT_SIZE, INPUT_SIZE, CHANNELS];

    pub fn shape(&self) -> [usize; 4] {
        Self::SHAPE
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    #[cfg(test)]
    pub(crate) fn filled(value: f32) -> Self {
        Self {
            data: Array4::from_elem(Self::SHAPE, value.clamp(0.0, 1.0)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageNormalizer {
    filter: FilterType,
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self::new(FilterType::CatmullRom)
    }
}

impl ImageNormalizer {
    pub fn new(filter: FilterType) -> Self {
        Self { filter }
    }

    pub fn normalize(&self, raw: &[u8]) -> Result<NormalizedTensor, DecodeError> {
        if raw.is_empty() {
            return Err(DecodeError::Empty);
        }

        let image = ImageReader::new(Cursor::new(raw))
            .with_guessed_format()?
            .decode()?;
        let rgb = image.to_rgb8();
        let resized = imageops::resize(&rgb, INPUT_SIZE as u32, INPUT_SIZE as u32, self.filter);

        let data = Array4::from_shape_fn(NormalizedTensor::SHAPE, |(_, y, x, c)| {
            let pixel = resized.get_pixel(x as u32, y as u32);
            pixel[c] as f32 / 255.0
        });
        Ok(NormalizedTensor { data })
    }
}
