use anyhow::{Context, Result};
use image::DynamicImage;
use image::imageops::{self, FilterType};
use serde::Deserialize;
use std::path::Path;

const DEFAULT_IMAGE_SIZE: u32 = 224;
const IMAGENET_STANDARD_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
const IMAGENET_STANDARD_STD: [f32; 3] = [0.5, 0.5, 0.5];

/// Square resize target as written in `preprocessor_config.json`.
///
/// Older checkpoints store a bare integer, newer ones an object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ImageSize {
    Square(u32),
    HeightWidth { height: u32, width: u32 },
    ShortestEdge { shortest_edge: u32 },
}

impl ImageSize {
    fn side(&self) -> u32 {
        match self {
            ImageSize::Square(side) => *side,
            ImageSize::HeightWidth { height, width } => (*height).max(*width),
            ImageSize::ShortestEdge { shortest_edge } => *shortest_edge,
        }
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        ImageSize::Square(DEFAULT_IMAGE_SIZE)
    }
}

/// Resize and normalization constants of the model's feature extractor.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageProcessorConfig {
    #[serde(default)]
    pub size: ImageSize,
    #[serde(default = "default_mean")]
    pub image_mean: [f32; 3],
    #[serde(default = "default_std")]
    pub image_std: [f32; 3],
}

fn default_mean() -> [f32; 3] {
    IMAGENET_STANDARD_MEAN
}

fn default_std() -> [f32; 3] {
    IMAGENET_STANDARD_STD
}

impl Default for ImageProcessorConfig {
    fn default() -> Self {
        Self {
            size: ImageSize::default(),
            image_mean: IMAGENET_STANDARD_MEAN,
            image_std: IMAGENET_STANDARD_STD,
        }
    }
}

impl ImageProcessorConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn image_size(&self) -> u32 {
        self.size.side()
    }

    /// Converts an image into a normalized `[3, size, size]` buffer in CHW order.
    pub fn pixel_values(&self, image: &DynamicImage) -> Vec<f32> {
        let size = self.image_size();
        let rgb = imageops::resize(&image.to_rgb8(), size, size, FilterType::Triangle);

        let plane = (size * size) as usize;
        let mut data = vec![0f32; 3 * plane];
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let offset = (y * size + x) as usize;
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                data[c * plane + offset] = (value - self.image_mean[c]) / self.image_std[c];
            }
        }
        data
    }

    /// Decodes the file at `path` and returns its pixel values.
    pub fn load(&self, path: &Path) -> Result<Vec<f32>> {
        let image = image::ImageReader::open(path)
            .with_context(|| format!("opening {}", path.display()))?
            .with_guessed_format()
            .context("probing image format")?
            .decode()
            .context("decoding image")?;
        Ok(self.pixel_values(&image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Write;

    #[test]
    fn parses_legacy_and_structured_sizes() {
        let legacy: ImageProcessorConfig = serde_json::from_str(
            r#"{"do_normalize": true, "image_mean": [0.5, 0.5, 0.5], "image_std": [0.5, 0.5, 0.5], "resample": 2, "size": 224}"#,
        )
        .unwrap();
        assert_eq!(legacy.image_size(), 224);

        let structured: ImageProcessorConfig = serde_json::from_str(
            r#"{"size": {"height": 384, "width": 384}, "image_mean": [0.485, 0.456, 0.406], "image_std": [0.229, 0.224, 0.225]}"#,
        )
        .unwrap();
        assert_eq!(structured.image_size(), 384);
        assert_eq!(structured.image_mean, [0.485, 0.456, 0.406]);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config: ImageProcessorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.image_size(), DEFAULT_IMAGE_SIZE);
        assert_eq!(config.image_mean, IMAGENET_STANDARD_MEAN);
        assert_eq!(config.image_std, IMAGENET_STANDARD_STD);
    }

    #[test]
    fn pixel_values_are_normalized_chw() {
        let config = ImageProcessorConfig {
            size: ImageSize::Square(4),
            ..Default::default()
        };
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(9, 5, Rgb([255, 0, 51])));

        let values = config.pixel_values(&image);
        assert_eq!(values.len(), 3 * 4 * 4);

        let plane = 16;
        assert!(values[..plane].iter().all(|v| (v - 1.0).abs() < 1e-5));
        assert!(values[plane..2 * plane].iter().all(|v| (v + 1.0).abs() < 1e-5));
        assert!(values[2 * plane..].iter().all(|v| (v + 0.6).abs() < 1e-5));
    }

    #[test]
    fn grayscale_input_is_expanded_to_three_channels() {
        let config = ImageProcessorConfig {
            size: ImageSize::Square(2),
            ..Default::default()
        };
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(3, 3, Luma([255])));
        let values = config.pixel_values(&image);
        assert_eq!(values.len(), 12);
        assert!(values.iter().all(|v| (v - 1.0).abs() < 1e-5));
    }

    #[test]
    fn alpha_is_dropped_before_resizing() {
        let config = ImageProcessorConfig {
            size: ImageSize::Square(3),
            ..Default::default()
        };
        let mut rgba = RgbaImage::from_pixel(6, 6, Rgba([255, 0, 51, 255]));
        for x in 0..6 {
            rgba.put_pixel(x, 0, Rgba([255, 0, 51, 0]));
        }

        let values = config.pixel_values(&DynamicImage::ImageRgba8(rgba));
        let plane = 9;
        assert!(values[..plane].iter().all(|v| (v - 1.0).abs() < 1e-5));
        assert!(values[plane..2 * plane].iter().all(|v| (v + 1.0).abs() < 1e-5));
        assert!(values[2 * plane..].iter().all(|v| (v + 0.6).abs() < 1e-5));
    }

    #[test]
    fn sixteen_bit_input_is_scaled_to_eight_bit_range() {
        let config = ImageProcessorConfig {
            size: ImageSize::Square(2),
            ..Default::default()
        };
        let deep: ImageBuffer<Rgb<u16>, Vec<u16>> =
            ImageBuffer::from_pixel(5, 5, Rgb([u16::MAX, 0, u16::MAX]));

        let values = config.pixel_values(&DynamicImage::ImageRgb16(deep));
        assert_eq!(values.len(), 12);
        assert!(values[..4].iter().all(|v| (v - 1.0).abs() < 1e-5));
        assert!(values[4..8].iter().all(|v| (v + 1.0).abs() < 1e-5));
        assert!(values[8..].iter().all(|v| (v - 1.0).abs() < 1e-5));
    }

    #[test]
    fn load_rejects_non_images() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"definitely not a png").unwrap();

        let err = ImageProcessorConfig::default()
            .load(file.path())
            .unwrap_err();
        assert!(format!("{err:#}").contains("decoding image"));
    }
}
