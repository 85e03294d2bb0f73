use crate::{
    algorithms::{
        ChaikinSmoothingProcessor, ContrastGuard, EnhancePreprocessor, GaussianBlurPreprocessor,
        ImageprocContourExtractor, LargestAreaSelector, MorphologyPreprocessor,
        ThresholdPreprocessor,
    },
    config::ExtractionConfig,
    pipeline::ExtractionPipeline,
    traits::{ContourExtractor, ContourPostProcessor, ContourSelector, ImagePreprocessor},
};

/// Builder for extraction pipelines with a fluent API
pub struct PipelineBuilder {
    preprocessors: Vec<Box<dyn ImagePreprocessor>>,
    contour_extractor: Option<Box<dyn ContourExtractor>>,
    selector: Option<Box<dyn ContourSelector>>,
    postprocessors: Vec<Box<dyn ContourPostProcessor>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            preprocessors: Vec::new(),
            contour_extractor: None,
            selector: None,
            postprocessors: Vec::new(),
        }
    }

    /// Standard stage sequence for a tooth photograph: contrast guard,
    /// optional enhancement, blur, threshold, morphological cleanup, then
    /// largest-area selection.
    pub fn from_config(config: &ExtractionConfig) -> Self {
        let mut builder = Self::new().add_preprocessor(ContrastGuard {
            min_contrast: config.min_contrast,
        });
        if config.enhance {
            builder = builder.add_preprocessor(EnhancePreprocessor);
        }
        if config.blur_sigma > 0.0 {
            builder = builder.add_preprocessor(GaussianBlurPreprocessor {
                sigma: config.blur_sigma,
            });
        }
        builder = builder.add_preprocessor(ThresholdPreprocessor {
            method: config.threshold,
            polarity: config.polarity,
        });
        if config.morphology_radius > 0 {
            builder = builder.add_preprocessor(MorphologyPreprocessor {
                radius: config.morphology_radius,
            });
        }
        builder = builder.set_selector(LargestAreaSelector {
            min_perimeter_px: config.min_perimeter_px,
        });
        if config.smoothing_iterations > 0 {
            builder = builder.with_chaikin_smoothing(config.smoothing_iterations);
        }
        builder
    }

    /// Add a preprocessor to the pipeline
    pub fn add_preprocessor<P>(mut self, preprocessor: P) -> Self
    where
        P: ImagePreprocessor + 'static,
    {
        self.preprocessors.push(Box::new(preprocessor));
        self
    }

    /// Set the contour extractor (replaces any existing one)
    pub fn set_contour_extractor<E>(mut self, extractor: E) -> Self
    where
        E: ContourExtractor + 'static,
    {
        self.contour_extractor = Some(Box::new(extractor));
        self
    }

    /// Set the contour selector (replaces any existing one)
    pub fn set_selector<S>(mut self, selector: S) -> Self
    where
        S: ContourSelector + 'static,
    {
        self.selector = Some(Box::new(selector));
        self
    }

    /// Add a post-processor to the pipeline
    pub fn add_postprocessor<P>(mut self, postprocessor: P) -> Self
    where
        P: ContourPostProcessor + 'static,
    {
        self.postprocessors.push(Box::new(postprocessor));
        self
    }

    /// Add Chaikin smoothing as a post-processing step
    pub fn with_chaikin_smoothing(self, iterations: usize) -> Self {
        self.add_postprocessor(ChaikinSmoothingProcessor { iterations })
    }

    /// Build the pipeline with default components if not specified
    pub fn build(self) -> ExtractionPipeline {
        let contour_extractor = self
            .contour_extractor
            .unwrap_or_else(|| Box::new(ImageprocContourExtractor));
        let selector = self
            .selector
            .unwrap_or_else(|| Box::new(LargestAreaSelector::default()));

        ExtractionPipeline::new(
            self.preprocessors,
            contour_extractor,
            selector,
            self.postprocessors,
        )
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_skips_disabled_stages() {
        let config = ExtractionConfig {
            blur_sigma: 0.0,
            morphology_radius: 0,
            ..ExtractionConfig::default()
        };
        let info = PipelineBuilder::from_config(&config).build().info();
        assert!(info.contains("2 preprocessors"), "{info}");
        assert!(info.contains("0 postprocessors"), "{info}");

        let smoothed = ExtractionConfig {
            smoothing_iterations: 2,
            ..ExtractionConfig::default()
        };
        let info = PipelineBuilder::from_config(&smoothed).build().info();
        assert!(info.contains("4 preprocessors"), "{info}");
        assert!(info.contains("1 postprocessors"), "{info}");

        let enhanced = ExtractionConfig {
            enhance: true,
            ..ExtractionConfig::default()
        };
        let info = PipelineBuilder::from_config(&enhanced).build().info();
        assert!(info.contains("5 preprocessors"), "{info}");
    }
}
