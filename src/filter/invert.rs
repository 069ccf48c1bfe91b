use image::{imageops, GrayImage};

use super::{FilterError, FilterParams, InputFilter};

/// Inverts every sample (`v -> 255 - v`). Takes no parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invert;

impl Invert {
    pub const KEY: &'static str = "invert";
}

impl InputFilter for Invert {
    fn implementation_key(&self) -> &str {
        Self::KEY
    }

    fn process(&self, mut image: GrayImage, _scale: f64) -> Result<GrayImage, FilterError> {
        imageops::invert(&mut image);
        Ok(image)
    }

    fn init(&mut self, _params: &FilterParams) -> Result<(), FilterError> {
        Ok(())
    }

    fn params(&self) -> FilterParams {
        FilterParams::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invert_samples() {
        let img = GrayImage::from_raw(3, 1, vec![0, 100, 255]).unwrap();
        let out = Invert.process(img, 1.0).unwrap();
        assert_eq!(out.as_raw(), &vec![255, 155, 0]);
    }

    #[test]
    fn test_invert_twice_is_identity() {
        let img = GrayImage::from_fn(4, 4, |x, y| image::Luma([(x * 40 + y) as u8]));
        let out = Invert.process(Invert.process(img.clone(), 0.5).unwrap(), 0.5).unwrap();
        assert_eq!(out, img);
    }
}
