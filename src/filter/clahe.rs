//! Contrast Limited Adaptive Histogram Equalization
//!
//! `blockradius` is expressed in full-resolution pixels and is scaled by the
//! tile's scale before use. The exact variant equalizes every pixel against
//! its own window; the fast variant samples mappings on a grid spaced one
//! radius apart and interpolates between them.

use image::{GrayImage, Luma};

use super::{parse_bool_param, parse_param, scaled_length, FilterError, FilterParams, InputFilter};

const NAME: &str = "CLAHE";
const MAX_CLIP_ROUNDS: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct Clahe {
    fast: bool,
    block_radius: u32,
    bins: u32,
    slope: f32,
}

impl Default for Clahe {
    fn default() -> Self {
        Self {
            fast: true,
            block_radius: 500,
            bins: 256,
            slope: 2.5,
        }
    }
}

impl Clahe {
    pub const KEY: &'static str = "clahe";

    pub fn new(fast: bool, block_radius: u32, bins: u32, slope: f32) -> Result<Self, FilterError> {
        check_bins(bins)?;
        check_slope(slope)?;
        Ok(Self {
            fast,
            block_radius,
            bins,
            slope,
        })
    }

    pub fn fast(&self) -> bool {
        self.fast
    }

    pub fn block_radius(&self) -> u32 {
        self.block_radius
    }

    pub fn bins(&self) -> u32 {
        self.bins
    }

    pub fn slope(&self) -> f32 {
        self.slope
    }

    fn bin_of(&self, value: u8) -> usize {
        ((u32::from(value) * (self.bins - 1) + 127) / 255) as usize
    }

    /// Build a value -> value lookup table from a window histogram.
    fn mapping(&self, hist: &[u32], count: u32) -> [u8; 256] {
        let clipped = self.clip(hist, count);

        let h_min = clipped.iter().position(|&c| c != 0).unwrap_or(clipped.len() - 1);
        let mut cdf = Vec::with_capacity(clipped.len());
        let mut running = 0u64;
        for &c in &clipped {
            running += u64::from(c);
            cdf.push(running);
        }
        let cdf_min = cdf[h_min];

        let mut lut = [0u8; 256];
        for (v, slot) in lut.iter_mut().enumerate() {
            let v = v as u8;
            *slot = stretch(v, cdf[self.bin_of(v)], cdf_min, running);
        }
        lut
    }

    /// Mapped value of `v` alone, for windows that are used only once.
    fn mapped_value(&self, hist: &[u32], count: u32, v: u8) -> u8 {
        let clipped = self.clip(hist, count);

        let h_min = clipped.iter().position(|&c| c != 0).unwrap_or(clipped.len() - 1);
        let bin = self.bin_of(v);
        let mut below = 0u64;
        let mut total = 0u64;
        for (i, &c) in clipped.iter().enumerate() {
            total += u64::from(c);
            if i == bin {
                below = total;
            }
        }
        // bins before h_min are empty, so the cdf at h_min is its count
        stretch(v, below, u64::from(clipped[h_min]), total)
    }

    /// Clip the histogram at `slope * count / bins` and spread the excess.
    fn clip(&self, hist: &[u32], count: u32) -> Vec<u32> {
        let bins = hist.len() as u32;
        let limit = ((self.slope as f64 * f64::from(count) / f64::from(bins)).round() as u32).max(1);
        let mut clipped = hist.to_vec();
        let mut previous = 0u32;

        for _ in 0..MAX_CLIP_ROUNDS {
            let mut excess = 0u32;
            for c in clipped.iter_mut() {
                if *c > limit {
                    excess += *c - limit;
                    *c = limit;
                }
            }
            let share = excess / bins;
            let remainder = excess % bins;
            for c in clipped.iter_mut() {
                *c += share;
            }
            if remainder != 0 {
                let step = ((bins - 1) / remainder).max(1) as usize;
                for c in clipped.iter_mut().skip(step / 2).step_by(step) {
                    *c += 1;
                }
            }
            if excess == previous {
                break;
            }
            previous = excess;
        }
        clipped
    }

    fn window_histogram(&self, image: &GrayImage, cx: u32, cy: u32, radius: u32) -> (Vec<u32>, u32) {
        let (w, h) = image.dimensions();
        let x0 = cx.saturating_sub(radius);
        let x1 = cx.saturating_add(radius).min(w - 1);
        let y0 = cy.saturating_sub(radius);
        let y1 = cy.saturating_add(radius).min(h - 1);

        let mut hist = vec![0u32; self.bins as usize];
        for y in y0..=y1 {
            for x in x0..=x1 {
                hist[self.bin_of(image.get_pixel(x, y)[0])] += 1;
            }
        }
        (hist, (x1 - x0 + 1) * (y1 - y0 + 1))
    }

    fn equalize_exact(&self, source: &GrayImage, radius: u32) -> GrayImage {
        let (w, h) = source.dimensions();
        let mut target = GrayImage::new(w, h);
        let mut hist = vec![0u32; self.bins as usize];

        for y in 0..h {
            let y0 = y.saturating_sub(radius);
            let y1 = y.saturating_add(radius).min(h - 1);
            let rows = y1 - y0 + 1;

            hist.iter_mut().for_each(|c| *c = 0);
            for x in 0..=radius.min(w - 1) {
                for yy in y0..=y1 {
                    hist[self.bin_of(source.get_pixel(x, yy)[0])] += 1;
                }
            }

            for x in 0..w {
                if x > 0 {
                    if let Some(add) = x.checked_add(radius).filter(|&c| c < w) {
                        for yy in y0..=y1 {
                            hist[self.bin_of(source.get_pixel(add, yy)[0])] += 1;
                        }
                    }
                    if x > radius {
                        let drop = x - radius - 1;
                        for yy in y0..=y1 {
                            hist[self.bin_of(source.get_pixel(drop, yy)[0])] -= 1;
                        }
                    }
                }
                let cols = x.saturating_add(radius).min(w - 1) - x.saturating_sub(radius) + 1;
                let v = source.get_pixel(x, y)[0];
                target.put_pixel(x, y, Luma([self.mapped_value(&hist, cols * rows, v)]));
            }
        }
        target
    }

    fn equalize_fast(&self, source: &GrayImage, radius: u32) -> GrayImage {
        let (w, h) = source.dimensions();
        let step = radius.max(1);
        let xs = grid(w, step);
        let ys = grid(h, step);

        let (j0, j1, _) = bracket(&ys, 0);
        let mut band = self.lut_band(source, &xs, &ys, (j0, j1), radius, None);

        let mut target = GrayImage::new(w, h);
        for y in 0..h {
            let (j0, j1, wy) = bracket(&ys, y);
            if band.rows != (j0, j1) {
                band = self.lut_band(source, &xs, &ys, (j0, j1), radius, Some(band));
            }
            for x in 0..w {
                let (i0, i1, wx) = bracket(&xs, x);
                let v = source.get_pixel(x, y)[0] as usize;
                let top = lerp(f64::from(band.top[i0][v]), f64::from(band.top[i1][v]), wx);
                let bottom = lerp(f64::from(band.bottom[i0][v]), f64::from(band.bottom[i1][v]), wx);
                let value = lerp(top, bottom, wy).round().clamp(0.0, 255.0) as u8;
                target.put_pixel(x, y, Luma([value]));
            }
        }
        target
    }

    fn lut_row(&self, source: &GrayImage, xs: &[u32], gy: u32, radius: u32) -> Vec<[u8; 256]> {
        xs.iter()
            .map(|&gx| {
                let (hist, count) = self.window_histogram(source, gx, gy, radius);
                self.mapping(&hist, count)
            })
            .collect()
    }

    /// LUTs for grid rows `rows`, reusing the previous band's bottom row
    /// when it is the new top row.
    fn lut_band(
        &self,
        source: &GrayImage,
        xs: &[u32],
        ys: &[u32],
        rows: (usize, usize),
        radius: u32,
        previous: Option<LutBand>,
    ) -> LutBand {
        let top = match previous {
            Some(previous) if previous.rows.1 == rows.0 => previous.bottom,
            _ => self.lut_row(source, xs, ys[rows.0], radius),
        };
        let bottom = if rows.1 == rows.0 {
            top.clone()
        } else {
            self.lut_row(source, xs, ys[rows.1], radius)
        };
        LutBand { rows, top, bottom }
    }
}

/// Lookup tables for the two grid rows bracketing the current image row.
struct LutBand {
    rows: (usize, usize),
    top: Vec<[u8; 256]>,
    bottom: Vec<[u8; 256]>,
}

/// Map a cumulative count onto the full output range.
fn stretch(v: u8, cdf: u64, cdf_min: u64, cdf_max: u64) -> u8 {
    if cdf_max == cdf_min {
        return v;
    }
    let c = cdf.max(cdf_min);
    let mapped = (c - cdf_min) as f64 / (cdf_max - cdf_min) as f64;
    (mapped * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Sample positions `0, step, 2*step, ...` always ending at `len - 1`.
fn grid(len: u32, step: u32) -> Vec<u32> {
    let last = len - 1;
    let mut points: Vec<u32> = (0..last).step_by(step as usize).collect();
    points.push(last);
    points
}

/// Indices of the grid points around `p` and the interpolation weight.
fn bracket(points: &[u32], p: u32) -> (usize, usize, f64) {
    let i0 = points.partition_point(|&g| g <= p).saturating_sub(1);
    let i1 = (i0 + 1).min(points.len() - 1);
    if points[i1] == points[i0] {
        (i0, i1, 0.0)
    } else {
        let weight = f64::from(p - points[i0]) / f64::from(points[i1] - points[i0]);
        (i0, i1, weight)
    }
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

fn check_bins(bins: u32) -> Result<(), FilterError> {
    if (1..=256).contains(&bins) {
        Ok(())
    } else {
        Err(FilterError::InvalidParam {
            filter: NAME,
            key: "bins",
            value: bins.to_string(),
            reason: "must be between 1 and 256".to_string(),
        })
    }
}

fn check_slope(slope: f32) -> Result<(), FilterError> {
    if slope.is_finite() && slope > 0.0 {
        Ok(())
    } else {
        Err(FilterError::InvalidParam {
            filter: NAME,
            key: "slope",
            value: slope.to_string(),
            reason: "must be a positive number".to_string(),
        })
    }
}

impl InputFilter for Clahe {
    fn implementation_key(&self) -> &str {
        Self::KEY
    }

    fn process(&self, image: GrayImage, scale: f64) -> Result<GrayImage, FilterError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(image);
        }
        // windows never need to reach past the image
        let radius = scaled_length(self.block_radius, scale).min(image.width().max(image.height()));
        let result = if self.fast {
            self.equalize_fast(&image, radius)
        } else {
            self.equalize_exact(&image, radius)
        };
        Ok(result)
    }

    fn init(&mut self, params: &FilterParams) -> Result<(), FilterError> {
        // validate everything before touching any field
        let fast = parse_bool_param(params, NAME, "fast")?;
        let block_radius = parse_param::<u32>(params, NAME, "blockradius")?;
        let bins = parse_param::<u32>(params, NAME, "bins")?;
        let slope = parse_param::<f32>(params, NAME, "slope")?;
        if let Some(bins) = bins {
            check_bins(bins)?;
        }
        if let Some(slope) = slope {
            check_slope(slope)?;
        }

        if let Some(fast) = fast {
            self.fast = fast;
        }
        if let Some(block_radius) = block_radius {
            self.block_radius = block_radius;
        }
        if let Some(bins) = bins {
            self.bins = bins;
        }
        if let Some(slope) = slope {
            self.slope = slope;
        }
        Ok(())
    }

    fn params(&self) -> FilterParams {
        let mut params = FilterParams::new();
        params.insert("fast".to_string(), self.fast.to_string());
        params.insert("blockradius".to_string(), self.block_radius.to_string());
        params.insert("bins".to_string(), self.bins.to_string());
        params.insert("slope".to_string(), self.slope.to_string());
        params
    }
}
