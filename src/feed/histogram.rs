use image::imageops::FilterType;
use image::DynamicImage;

/// Working size for histogram sampling, enough to be representative and cheap to build.
const THUMBNAIL_WIDTH: u32 = 160;
const THUMBNAIL_HEIGHT: u32 = 90;

/// Normalized 2-D hue/saturation histogram.
#[derive(Debug, Clone)]
pub struct HueSaturationHistogram {
    hue_bins: usize,
    saturation_bins: usize,
    bins: Vec<f64>,
}

impl HueSaturationHistogram {
    pub fn from_image(image: &DynamicImage, hue_bins: usize, saturation_bins: usize) -> Self {
        let hue_bins = hue_bins.max(1);
        let saturation_bins = saturation_bins.max(1);
        let mut bins = vec![0.0; hue_bins * saturation_bins];

        let small = image.resize_exact(THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT, FilterType::Nearest);
        let rgb = small.to_rgb8();
        for pixel in rgb.pixels() {
            let [r, g, b] = pixel.0;
            let (hue, saturation) = hue_saturation(r, g, b);
            let h = ((hue / 360.0 * hue_bins as f64) as usize).min(hue_bins - 1);
            let s = ((saturation * saturation_bins as f64) as usize).min(saturation_bins - 1);
            bins[h * saturation_bins + s] += 1.0;
        }

        let total: f64 = bins.iter().sum();
        if total > 0.0 {
            bins.iter_mut().for_each(|bin| *bin /= total);
        }

        Self {
            hue_bins,
            saturation_bins,
            bins,
        }
    }

    /// Bhattacharyya distance in [0, 1]; 0 means identical distributions.
    pub fn bhattacharyya(&self, other: &Self) -> f64 {
        if self.hue_bins != other.hue_bins || self.saturation_bins != other.saturation_bins {
            return 1.0;
        }
        let coefficient: f64 = self
            .bins
            .iter()
            .zip(&other.bins)
            .map(|(p, q)| (p * q).sqrt())
            .sum();
        (1.0 - coefficient).max(0.0).sqrt()
    }
}

/// Hue in degrees [0, 360) and saturation in [0, 1].
fn hue_saturation(r: u8, g: u8, b: u8) -> (f64, f64) {
    let r = f64::from(r) / 255.0;
    let g = f64::from(g) / 255.0;
    let b = f64::from(b) / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let saturation = if max > 0.0 { delta / max } else { 0.0 };
    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    (hue, saturation)
}

/// Distance between two images' hue/saturation distributions.
pub fn image_distance(
    a: &DynamicImage,
    b: &DynamicImage,
    hue_bins: usize,
    saturation_bins: usize,
) -> f64 {
    HueSaturationHistogram::from_image(a, hue_bins, saturation_bins)
        .bhattacharyya(&HueSaturationHistogram::from_image(b, hue_bins, saturation_bins))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, RgbImage};

    fn solid(color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(64, 36, Rgb(color)))
    }

    fn gradient() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(320, 180, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        }))
    }

    #[test]
    fn identical_images_have_zero_distance() {
        let image = gradient();
        assert!(image_distance(&image, &image, 30, 32) < 1e-6);
    }

    #[test]
    fn disjoint_colors_are_maximally_distant() {
        let distance = image_distance(&solid([255, 0, 0]), &solid([0, 0, 255]), 30, 32);
        assert!((distance - 1.0).abs() < 1e-9);
    }

    #[test]
    fn histogram_is_normalized() {
        let histogram = HueSaturationHistogram::from_image(&gradient(), 30, 32);
        let total: f64 = histogram.bins.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn hue_saturation_of_primaries() {
        assert_eq!(hue_saturation(255, 0, 0), (0.0, 1.0));
        assert_eq!(hue_saturation(0, 255, 0), (120.0, 1.0));
        assert_eq!(hue_saturation(0, 0, 255), (240.0, 1.0));
        assert_eq!(hue_saturation(128, 128, 128).1, 0.0);
    }
}
