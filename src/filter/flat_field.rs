//! Flat Field Correction
//!
//! Divides out the illumination profile captured in a flat-field image and
//! restores the tile's original mean intensity.

use std::path::{Path, PathBuf};

use image::{imageops, GrayImage, Luma};
use once_cell::sync::OnceCell;

use super::{statistics, FilterError, FilterParams, InputFilter};

const NAME: &str = "FlatFieldCorrection";
const IMAGE_KEY: &str = "flatfieldimage";
const EPSILON: f32 = 0.0001;

#[derive(Debug, Default)]
pub struct FlatFieldCorrection {
    flat_field_path: Option<PathBuf>,
    flat_field: OnceCell<GrayImage>,
}

impl FlatFieldCorrection {
    pub const KEY: &'static str = "flat_field_correction";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            flat_field_path: Some(path.into()),
            flat_field: OnceCell::new(),
        }
    }

    pub fn flat_field_path(&self) -> Option<&Path> {
        self.flat_field_path.as_deref()
    }

    fn flat_field(&self) -> Result<&GrayImage, FilterError> {
        let path = self
            .flat_field_path
            .as_deref()
            .ok_or(FilterError::MissingParam { filter: NAME, key: IMAGE_KEY })?;
        self.flat_field.get_or_try_init(|| {
            tracing::debug!(path = %path.display(), "loading flat field image");
            Ok::<_, FilterError>(image::open(path)?.into_luma8())
        })
    }
}

impl Clone for FlatFieldCorrection {
    fn clone(&self) -> Self {
        Self {
            flat_field_path: self.flat_field_path.clone(),
            flat_field: OnceCell::new(),
        }
    }
}

impl PartialEq for FlatFieldCorrection {
    fn eq(&self, other: &Self) -> bool {
        self.flat_field_path == other.flat_field_path
    }
}

impl InputFilter for FlatFieldCorrection {
    fn implementation_key(&self) -> &str {
        Self::KEY
    }

    fn process(&self, mut image: GrayImage, scale: f64) -> Result<GrayImage, FilterError> {
        let (w, h) = image.dimensions();
        let loaded = self.flat_field()?;
        let resized;
        let ff = if scale > 0.0 && loaded.dimensions() != (w, h) {
            resized = imageops::resize(loaded, w, h, imageops::FilterType::Triangle);
            &resized
        } else {
            loaded
        };
        if ff.dimensions() != (w, h) {
            return Err(FilterError::SizeMismatch {
                expected: ff.dimensions(),
                actual: (w, h),
            });
        }

        let Some((_, ff_max, _)) = statistics(ff) else {
            return Ok(image);
        };
        let Some((_, _, image_mean)) = statistics(&image) else {
            return Ok(image);
        };

        let ff_max = f32::from(ff_max);
        let corrected: Vec<f32> = image
            .as_raw()
            .iter()
            .zip(ff.as_raw())
            .map(|(&v, &f)| f32::from(v) * (ff_max / (f32::from(f) + EPSILON)))
            .collect();

        let corrected_mean =
            corrected.iter().map(|&v| f64::from(v)).sum::<f64>() / corrected.len() as f64;
        let factor = if corrected_mean > 0.0 {
            (image_mean / corrected_mean) as f32
        } else {
            1.0
        };

        for (pixel, value) in image.pixels_mut().zip(corrected) {
            *pixel = Luma([(value * factor).clamp(0.0, 255.0) as u8]);
        }
        Ok(image)
    }

    fn init(&mut self, params: &FilterParams) -> Result<(), FilterError> {
        match params.get(IMAGE_KEY) {
            Some(path) if path.trim().is_empty() => Err(FilterError::InvalidParam {
                filter: NAME,
                key: IMAGE_KEY,
                value: path.clone(),
                reason: "path is empty".to_string(),
            }),
            Some(path) => {
                self.flat_field_path = Some(PathBuf::from(path));
                self.flat_field = OnceCell::new();
                Ok(())
            }
            None if self.flat_field_path.is_some() => Ok(()),
            None => Err(FilterError::MissingParam { filter: NAME, key: IMAGE_KEY }),
        }
    }

    fn params(&self) -> FilterParams {
        let mut params = FilterParams::new();
        if let Some(path) = &self.flat_field_path {
            params.insert(IMAGE_KEY.to_string(), path.to_string_lossy().into_owned());
        }
        params
    }
}
