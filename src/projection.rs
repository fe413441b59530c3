//! 2D manifold projection.
//!
//! Buckets a set of embedded image coordinates into a regular `bins x bins`
//! grid, averages the images falling into each bucket and composites the
//! averages into a single large canvas. The returned extent maps canvas
//! pixels back to embedding-space coordinates.

use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use image::imageops::FilterType;
use log::{debug, info};
use ndarray::{s, Array3, ArrayView1, ArrayView2, Zip};
use rustc_hash::FxHashMap;

/// Load an image, resize it to `output_shape = (height, width)` and normalize
/// it into display range.
///
/// Normalization is per channel: zero mean, unit variance with a
/// `1/sqrt(n_pixels)` floor on the standard deviation, clipped to `[-4, 4]`,
/// then rescaled into `[0, 255]`.
pub fn load_and_normalize(filename: &Path, output_shape: (usize, usize)) -> Result<Array3<f32>> {
    let (height, width) = output_shape;
    ensure!(height > 0 && width > 0, "output_shape must be non-zero, got {:?}", output_shape);

    let image = image::open(filename)
        .with_context(|| format!("reading image '{}'", filename.display()))?
        .to_rgb8();
    let resized = image::imageops::resize(&image, width as u32, height as u32, FilterType::Triangle);

    let mut data = Array3::<f32>::zeros((height, width, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            data[[y as usize, x as usize, c]] = pixel.0[c] as f32;
        }
    }

    per_channel_normalize(&mut data);

    // map [-4, 4] into display range [0, 255]
    data.mapv_inplace(|v| (255.0 * (v + 1.0) / 5.0).clamp(0.0, 255.0));
    Ok(data)
}

/// Independently normalize each channel to zero mean, unit variance, clipped
/// to `[-4, 4]`. The standard deviation is floored at `1/sqrt(n_pixels)` so a
/// near-constant channel does not blow up.
pub fn per_channel_normalize(image: &mut Array3<f32>) {
    let (height, width, channels) = image.dim();
    let n_pixels = (height * width) as f32;
    let std_floor = 1.0 / n_pixels.sqrt();

    for c in 0..channels {
        let mut channel = image.slice_mut(s![.., .., c]);
        let mean = channel.iter().sum::<f32>() / n_pixels;
        let variance = channel.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n_pixels;
        let std = variance.sqrt().max(std_floor);
        channel.mapv_inplace(|v| ((v - mean) / std).clamp(-4.0, 4.0));
    }
}

/// Grid compositor for a 2D embedding of images.
///
/// Each source image corresponds 1:1 to a row of the manifold passed to
/// [`project`](Self::project). With `preload = true` all images are loaded
/// and normalized at construction time and cached for the lifetime of the
/// object. Without preloading, images are loaded lazily during projection,
/// and only the *first* image per occupied bin is loaded and used as that
/// bin's representative - a memory/accuracy trade-off for large datasets,
/// since a true per-bin mean would decode every file on every call.
pub struct ManifoldProjection2D {
    image_files: Vec<PathBuf>,
    output_shape: (usize, usize),
    images: Vec<Array3<f32>>,
}

impl ManifoldProjection2D {
    pub fn new(image_files: Vec<PathBuf>, output_shape: (usize, usize), preload: bool) -> Result<Self> {
        ensure!(
            output_shape.0 > 0 && output_shape.1 > 0,
            "output_shape must be non-zero, got {:?}",
            output_shape
        );

        let images = if preload {
            info!("preloading {} images at {:?}", image_files.len(), output_shape);
            image_files
                .iter()
                .map(|file| load_and_normalize(file, output_shape))
                .collect::<Result<Vec<_>>>()?
        } else {
            vec![]
        };

        Ok(Self {
            image_files,
            output_shape,
            images,
        })
    }

    pub fn output_shape(&self) -> (usize, usize) {
        self.output_shape
    }

    /// Build the projection.
    ///
    /// `manifold` must have one row per image file; only the first two
    /// columns are used. Returns the composited canvas and the extent
    /// `[min_x, max_x, min_y, max_y]` of the bin edges, for mapping canvas
    /// coordinates back into embedding space.
    pub fn project(&self, manifold: ArrayView2<f32>, bins: usize) -> Result<(Array3<u8>, [f32; 4])> {
        ensure!(
            manifold.nrows() == self.image_files.len(),
            "manifold has {} rows but {} image files were supplied",
            manifold.nrows(),
            self.image_files.len()
        );
        ensure!(manifold.nrows() > 0, "manifold is empty");
        ensure!(manifold.ncols() >= 2, "manifold needs at least two components, got {}", manifold.ncols());
        ensure!(bins >= 1, "bins must be >= 1");

        let x_range = axis_range(manifold.column(0));
        let y_range = axis_range(manifold.column(1));

        // equal-width binning along both axes
        let mut grid: FxHashMap<(usize, usize), Vec<usize>> = FxHashMap::default();
        for (idx, point) in manifold.outer_iter().enumerate() {
            let key = (bin_index(point[0], x_range, bins), bin_index(point[1], y_range, bins));
            grid.entry(key).or_default().push(idx);
        }
        debug!("compositing {} occupied bins of {}x{}", grid.len(), bins, bins);

        let (h, w) = self.output_shape;
        let mut canvas = Array3::<u8>::zeros(((h + 1) * bins + h / 2, (w + 1) * bins + w / 2, 3));

        for (&(bx, by), members) in &grid {
            let mean = self.bin_mean(members)?;

            // the x bin indexes canvas rows, starting half a tile inside the margin
            let row = (bx + 1) * h - h / 2;
            let col = (by + 1) * w - w / 2;
            let mut tile = canvas.slice_mut(s![row..row + h, col..col + w, ..]);
            Zip::from(&mut tile).and(&mean).for_each(|t, &m| *t = m.round() as u8);
        }

        let extent = [x_range.0, x_range.1, y_range.0, y_range.1];
        Ok((canvas, extent))
    }

    fn bin_mean(&self, members: &[usize]) -> Result<Array3<f32>> {
        if !self.images.is_empty() {
            let mut acc = self.images[members[0]].clone();
            for &idx in &members[1..] {
                acc += &self.images[idx];
            }
            acc /= members.len() as f32;
            Ok(acc)
        } else {
            // lazy mode: the first member stands in for the whole bin
            load_and_normalize(&self.image_files[members[0]], self.output_shape)
        }
    }
}

/// Value range of one manifold axis. A degenerate axis (all values equal)
/// expands to a unit-width range so every point still lands in a bin.
fn axis_range(values: ArrayView1<f32>) -> (f32, f32) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in values.iter() {
        min = min.min(v);
        max = max.max(v);
    }
    if min == max {
        (min - 0.5, max + 0.5)
    } else {
        (min, max)
    }
}

/// 0-based bin index for `value` within `bins` equal-width bins spanning
/// `range`. Values on the upper edge fall into the last bin.
fn bin_index(value: f32, range: (f32, f32), bins: usize) -> usize {
    let (min, max) = range;
    let t = (value - min) / (max - min);
    ((t * bins as f32) as usize).min(bins - 1)
}

#[cfg(test)]
mod tests {
    use ndarray::arr1;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0.0, (0.0, 10.0), 10, 0)]
    #[case(0.999, (0.0, 10.0), 10, 0)]
    #[case(1.0, (0.0, 10.0), 10, 1)]
    #[case(9.5, (0.0, 10.0), 10, 9)]
    #[case(10.0, (0.0, 10.0), 10, 9)]
    #[case(-2.0, (-2.0, 2.0), 4, 0)]
    #[case(2.0, (-2.0, 2.0), 4, 3)]
    fn test_bin_index(#[case] value: f32, #[case] range: (f32, f32), #[case] bins: usize, #[case] expected: usize) {
        assert_eq!(bin_index(value, range, bins), expected);
    }

    #[test]
    fn test_axis_range_degenerate() {
        let values = arr1(&[3.0_f32, 3.0, 3.0]);
        assert_eq!(axis_range(values.view()), (2.5, 3.5));
    }

    #[test]
    fn test_axis_range_spans_data() {
        let values = arr1(&[-1.0_f32, 0.5, 7.25]);
        assert_eq!(axis_range(values.view()), (-1.0, 7.25));
    }

    #[test]
    fn test_per_channel_normalize_clips() {
        let mut image = Array3::<f32>::zeros((4, 4, 3));
        image[[0, 0, 0]] = 10_000.0;
        image[[3, 3, 1]] = -10_000.0;
        per_channel_normalize(&mut image);
        assert!(image.iter().all(|&v| (-4.0..=4.0).contains(&v)));
    }

    #[test]
    fn test_per_channel_normalize_constant_channel() {
        // the std floor keeps a flat channel at exactly zero
        let mut image = Array3::<f32>::from_elem((8, 8, 3), 42.0);
        per_channel_normalize(&mut image);
        assert!(image.iter().all(|&v| v == 0.0));
    }
}
