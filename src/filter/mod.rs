//! Runtime Filters - the leaf operations a spec builds into
//!
//! Every filter is configured from a string-keyed map and applied per tile
//! with a scale factor (tile resolution / native resolution).

use std::fmt;
use std::str::FromStr;

use image::GrayImage;
use indexmap::IndexMap;
use thiserror::Error;

mod clahe;
mod flat_field;
mod invert;
mod list;

pub use clahe::Clahe;
pub use flat_field::FlatFieldCorrection;
pub use invert::Invert;
pub use list::InputFilterList;

/// String-keyed filter configuration, kept in insertion order.
pub type FilterParams = IndexMap<String, String>;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("filter implementation '{0}' is not registered")]
    UnknownFilter(String),

    #[error("no className defined for leaf filter spec with id '{spec}'")]
    MissingImplementationKey { spec: String },

    #[error("no params defined for leaf filter spec with id '{spec}'")]
    MissingParams { spec: String },

    #[error("{filter}: required parameter '{key}' is missing")]
    MissingParam { filter: &'static str, key: &'static str },

    #[error("{filter}: invalid value '{value}' for parameter '{key}': {reason}")]
    InvalidParam {
        filter: &'static str,
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("image sizes differ between original image ({actual:?}) and flat field ({expected:?})")]
    SizeMismatch { expected: (u32, u32), actual: (u32, u32) },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// A runtime image operation built from a leaf spec (or a list of them).
pub trait InputFilter: fmt::Debug + Send + Sync {
    /// Registry key this filter is registered under.
    fn implementation_key(&self) -> &str;

    /// Apply the filter. The returned buffer is authoritative; the input may
    /// have been consumed or modified in place.
    fn process(&self, image: GrayImage, scale: f64) -> Result<GrayImage, FilterError>;

    /// Apply configuration. Only keys present in `params` are changed;
    /// unknown keys are ignored.
    fn init(&mut self, params: &FilterParams) -> Result<(), FilterError>;

    /// Current configuration in the form accepted by [`InputFilter::init`].
    fn params(&self) -> FilterParams;

    /// Composite downcast, used when exporting a pipeline back to spec form.
    fn as_list(&self) -> Option<&InputFilterList> {
        None
    }
}

/// Parse `key` from `params` if present.
pub fn parse_param<T>(
    params: &FilterParams,
    filter: &'static str,
    key: &'static str,
) -> Result<Option<T>, FilterError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match params.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| FilterError::InvalidParam {
                filter,
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

/// Parse `key` from `params`, failing if it is absent.
pub fn required_param<T>(
    params: &FilterParams,
    filter: &'static str,
    key: &'static str,
) -> Result<T, FilterError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    parse_param(params, filter, key)?.ok_or(FilterError::MissingParam { filter, key })
}

/// Lenient boolean parsing ("TRUE", " false ").
pub(crate) fn parse_bool_param(
    params: &FilterParams,
    filter: &'static str,
    key: &'static str,
) -> Result<Option<bool>, FilterError> {
    match params.get(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            _ => Err(FilterError::InvalidParam {
                filter,
                key,
                value: raw.clone(),
                reason: "expected 'true' or 'false'".to_string(),
            }),
        },
    }
}

/// Scale a full-resolution pixel length to the tile's resolution.
pub(crate) fn scaled_length(length: u32, scale: f64) -> u32 {
    let scaled = (f64::from(length) * scale).round();
    if scaled <= 0.0 {
        0
    } else {
        scaled as u32
    }
}

/// Min, max and mean over all samples; `None` for an empty image.
pub(crate) fn statistics(image: &GrayImage) -> Option<(u8, u8, f64)> {
    let samples = image.as_raw();
    if samples.is_empty() {
        return None;
    }
    let mut min = u8::MAX;
    let mut max = u8::MIN;
    let mut sum = 0u64;
    for &v in samples {
        min = min.min(v);
        max = max.max(v);
        sum += u64::from(v);
    }
    Some((min, max, sum as f64 / samples.len() as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> FilterParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_param_absent_is_none() {
        let p = params(&[]);
        let v: Option<u32> = parse_param(&p, "test", "bins").unwrap();
        assert!(v.is_none());
    }

    #[test]
    fn test_parse_param_malformed() {
        let p = params(&[("bins", "lots")]);
        let err = parse_param::<u32>(&p, "test", "bins").unwrap_err();
        assert!(matches!(err, FilterError::InvalidParam { key: "bins", .. }));
    }

    #[test]
    fn test_required_param_missing() {
        let p = params(&[("other", "1")]);
        let err = required_param::<u32>(&p, "test", "bins").unwrap_err();
        assert!(err.to_string().contains("'bins' is missing"));
    }

    #[test]
    fn test_bool_param_case_insensitive() {
        let p = params(&[("fast", " TRUE ")]);
        assert_eq!(parse_bool_param(&p, "test", "fast").unwrap(), Some(true));
        let p = params(&[("fast", "yes")]);
        assert!(parse_bool_param(&p, "test", "fast").is_err());
    }

    #[test]
    fn test_scaled_length_rounds() {
        assert_eq!(scaled_length(10, 0.5), 5);
        assert_eq!(scaled_length(3, 0.5), 2);
        assert_eq!(scaled_length(500, 0.0), 0);
    }

    #[test]
    fn test_statistics() {
        let img = GrayImage::from_raw(2, 2, vec![0, 10, 20, 30]).unwrap();
        let (min, max, mean) = statistics(&img).unwrap();
        assert_eq!((min, max), (0, 30));
        assert!((mean - 15.0).abs() < 1e-9);
    }
}
