pub mod builder;

use image::{imageops::crop_imm, GrayImage};
use tracing::debug;

use crate::{
    algorithms::rank_by_area,
    config::ExtractionConfig,
    error::ExtractionError,
    traits::{ContourExtractor, ContourPostProcessor, ContourSelector, ImagePreprocessor},
    types::{BoundingBox, Contour},
};

/// Staged tooth-silhouette extraction: preprocessors, boundary tracing,
/// selection of the tooth contour, then post-processing.
pub struct ExtractionPipeline {
    preprocessors: Vec<Box<dyn ImagePreprocessor>>,
    contour_extractor: Box<dyn ContourExtractor>,
    selector: Box<dyn ContourSelector>,
    postprocessors: Vec<Box<dyn ContourPostProcessor>>,
}

impl ExtractionPipeline {
    /// Create a new pipeline builder
    pub fn builder() -> builder::PipelineBuilder {
        builder::PipelineBuilder::new()
    }

    pub fn new(
        preprocessors: Vec<Box<dyn ImagePreprocessor>>,
        contour_extractor: Box<dyn ContourExtractor>,
        selector: Box<dyn ContourSelector>,
        postprocessors: Vec<Box<dyn ContourPostProcessor>>,
    ) -> Self {
        Self {
            preprocessors,
            contour_extractor,
            selector,
            postprocessors,
        }
    }

    /// Extract the tooth contour, in full-image pixel coordinates.
    ///
    /// With a region hint only that rectangle is searched.
    pub fn process(
        &self,
        image: &GrayImage,
        region_hint: Option<BoundingBox>,
    ) -> Result<Contour, ExtractionError> {
        let candidates = self.traced(image, region_hint)?;
        let count = candidates.len();

        let contour = self.selector.select(candidates).ok_or_else(|| {
            ExtractionError::ContourNotFound(format!(
                "none of {count} traced boundaries qualifies as a tooth"
            ))
        })?;

        let contour = self
            .postprocessors
            .iter()
            .fold(contour, |contour, stage| stage.process(contour));
        debug!(
            "selected contour: {} points, area {:.1} px² out of {} candidates",
            contour.len(),
            contour.area(),
            count
        );
        Ok(contour)
    }

    /// Every traced boundary, largest area first.
    pub fn candidates(
        &self,
        image: &GrayImage,
        region_hint: Option<BoundingBox>,
    ) -> Result<Vec<Contour>, ExtractionError> {
        let mut candidates = self.traced(image, region_hint)?;
        rank_by_area(&mut candidates);
        Ok(candidates)
    }

    fn traced(
        &self,
        image: &GrayImage,
        region_hint: Option<BoundingBox>,
    ) -> Result<Vec<Contour>, ExtractionError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ExtractionError::EmptyImage);
        }

        let (mut processed, offset) = match region_hint {
            None => (image.clone(), (0, 0)),
            Some(region) => {
                let clipped = region.clip_to(width, height).ok_or(
                    ExtractionError::RegionOutOfBounds {
                        region,
                        width,
                        height,
                    },
                )?;
                let view = crop_imm(image, clipped.x, clipped.y, clipped.width, clipped.height);
                (view.to_image(), (clipped.x, clipped.y))
            }
        };

        for preprocessor in &self.preprocessors {
            processed = preprocessor.preprocess(&processed)?;
        }

        let (dx, dy) = (offset.0 as f64, offset.1 as f64);
        Ok(self
            .contour_extractor
            .extract_contours(&processed)
            .into_iter()
            .filter_map(Contour::new)
            .map(|c| c.translated(dx, dy))
            .collect())
    }

    /// Get information about the pipeline configuration
    pub fn info(&self) -> String {
        format!(
            "ExtractionPipeline: {} preprocessors, 1 contour extractor, 1 selector, {} postprocessors",
            self.preprocessors.len(),
            self.postprocessors.len()
        )
    }
}

/// Extract the tooth silhouette from `image` with the stages described by
/// `config`.
pub fn extract_tooth_contour(
    image: &GrayImage,
    region_hint: Option<BoundingBox>,
    config: &ExtractionConfig,
) -> Result<Contour, ExtractionError> {
    builder::PipelineBuilder::from_config(config)
        .build()
        .process(image, region_hint)
}
