//! rust_degenrich: RNA-seq differential expression contrasts and gene set enrichment
//!
//! Counts (a gene matrix or Salmon quantifications) are normalized with
//! median-of-ratios size factors, optionally augmented with surrogate
//! variables for hidden batch effects, and fitted with a negative binomial
//! GLM. Each pairwise contrast is tested with a Wald test; DEGs are then
//! intersected across contrasts and tested for gene set enrichment with
//! ORA and preranked GSEA.
//!
//! # Example
//!
//! ```ignore
//! use rust_degenrich::prelude::*;
//!
//! let config = PipelineConfig::from_path("pipeline.yaml")?;
//! let report = Pipeline::from_config(config)?.run()?;
//! println!("{} common DEGs", report.common_degs);
//! ```

pub mod annotation;
pub mod cli;
pub mod common;
pub mod config;
pub mod contrast;
pub mod data;
pub mod dispersion;
pub mod enrichment;
pub mod error;
pub mod geneset;
pub mod glm;
pub mod io;
pub mod normalization;
pub mod pipeline;
pub mod plot;
pub mod quant;
pub mod rng;
pub mod stats;
pub mod surrogate;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::annotation::GeneAnnotation;
    pub use crate::common::{common_degs, write_common_degs, Change, CommonDeg};
    pub use crate::config::{ContrastSpec, PipelineConfig};
    pub use crate::contrast::{extract_contrast, ContrastResult, ContrastRow, DegThresholds, Regulation};
    pub use crate::data::{CountMatrix, ExpressionDataSet, SampleMetadata};
    pub use crate::dispersion::{estimate_dispersions, DispersionParams, TrendFitMethod};
    pub use crate::enrichment::{
        EnrichmentMethod, EnrichmentResult, EnrichmentTerm, GseaParams, OraParams, OverRepresentation, PrerankedGsea,
    };
    pub use crate::error::{PipelineError, Result};
    pub use crate::geneset::{GeneSet, GeneSetCollection};
    pub use crate::glm::{fit_model, GlmFitParams};
    pub use crate::io::{
        read_contrast_result, read_count_matrix, read_metadata, write_contrast_result, write_count_matrix,
        write_records,
    };
    pub use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    pub use crate::pipeline::{read_report, Pipeline, PipelineReport};
    pub use crate::plot::{enrichment_bar_plot, pca_plot, volcano_plot};
    pub use crate::quant::{import_salmon, QuantSample, TxToGene};
    pub use crate::surrogate::{estimate_surrogates, ResidualPcaEstimator, SurrogateEstimator};
    pub use crate::testing::benjamini_hochberg;
}
