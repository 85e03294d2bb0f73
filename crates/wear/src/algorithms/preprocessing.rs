use image::GrayImage;
use imageproc::{
    contrast::{adaptive_threshold, equalize_histogram, otsu_level, threshold},
    distance_transform::Norm,
    filter::{filter3x3, gaussian_blur_f32},
    morphology::{close, open},
};
use tracing::debug;

use crate::{
    config::{Polarity, ThresholdMethod},
    error::ExtractionError,
    traits::ImagePreprocessor,
};

/// Rejects images whose intensity range is too narrow to hold a silhouette
#[derive(Debug, Clone)]
pub struct ContrastGuard {
    pub min_contrast: u8,
}

impl Default for ContrastGuard {
    fn default() -> Self {
        Self { min_contrast: 10 }
    }
}

impl ImagePreprocessor for ContrastGuard {
    fn preprocess(&self, image: &GrayImage) -> Result<GrayImage, ExtractionError> {
        let (min, max) = image
            .pixels()
            .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
        let range = max.saturating_sub(min);
        if range < self.min_contrast {
            return Err(ExtractionError::ContourNotFound(format!(
                "intensity range {range} is below the minimum contrast {}",
                self.min_contrast
            )));
        }
        Ok(image.clone())
    }
}

/// Histogram equalisation followed by a 3x3 sharpening kernel
#[derive(Debug, Clone, Default)]
pub struct EnhancePreprocessor;

const SHARPEN: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];

impl ImagePreprocessor for EnhancePreprocessor {
    fn preprocess(&self, image: &GrayImage) -> Result<GrayImage, ExtractionError> {
        let equalized = equalize_histogram(image);
        Ok(filter3x3::<_, f32, u8>(&equalized, &SHARPEN))
    }
}

/// Gaussian blur preprocessor for noise reduction
#[derive(Debug, Clone)]
pub struct GaussianBlurPreprocessor {
    pub sigma: f32,
}

impl Default for GaussianBlurPreprocessor {
    fn default() -> Self {
        Self { sigma: 1.0 }
    }
}

impl ImagePreprocessor for GaussianBlurPreprocessor {
    fn preprocess(&self, image: &GrayImage) -> Result<GrayImage, ExtractionError> {
        if self.sigma <= 0.0 {
            return Ok(image.clone());
        }
        Ok(gaussian_blur_f32(image, self.sigma))
    }
}

/// Binarizes so that the tooth is foreground (255) whatever its polarity
#[derive(Debug, Clone, Default)]
pub struct ThresholdPreprocessor {
    pub method: ThresholdMethod,
    pub polarity: Polarity,
}

impl ImagePreprocessor for ThresholdPreprocessor {
    fn preprocess(&self, image: &GrayImage) -> Result<GrayImage, ExtractionError> {
        let level = match self.method {
            ThresholdMethod::Otsu => otsu_level(image),
            ThresholdMethod::Fixed { level } => level,
            ThresholdMethod::Adaptive { block_radius } => {
                return Ok(self.adaptive(image, block_radius.max(1)));
            }
        };
        debug!("threshold level {} ({})", level, self.method);

        let mut binary = threshold(image, level);
        if self.polarity == Polarity::DarkOnLight {
            image::imageops::invert(&mut binary);
        }
        Ok(binary)
    }
}

impl ThresholdPreprocessor {
    /// Flat regions compare equal to their local mean and come out light, so
    /// a light tooth is inverted first to keep flat background out of the
    /// foreground.
    fn adaptive(&self, image: &GrayImage, block_radius: u32) -> GrayImage {
        debug!("adaptive threshold, block radius {}", block_radius);
        let mut binary = match self.polarity {
            Polarity::DarkOnLight => adaptive_threshold(image, block_radius),
            Polarity::LightOnDark => {
                let mut inverted = image.clone();
                image::imageops::invert(&mut inverted);
                adaptive_threshold(&inverted, block_radius)
            }
        };
        image::imageops::invert(&mut binary);
        binary
    }
}

/// Morphological close then open, filling pinholes and removing specks
#[derive(Debug, Clone)]
pub struct MorphologyPreprocessor {
    pub radius: u8,
}

impl Default for MorphologyPreprocessor {
    fn default() -> Self {
        Self { radius: 1 }
    }
}

impl ImagePreprocessor for MorphologyPreprocessor {
    fn preprocess(&self, image: &GrayImage) -> Result<GrayImage, ExtractionError> {
        if self.radius == 0 {
            return Ok(image.clone());
        }
        let closed = close(image, Norm::LInf, self.radius);
        Ok(open(&closed, Norm::LInf, self.radius))
    }
}
