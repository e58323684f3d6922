//! ExpressionDataSet - counts, sample metadata and per-stage model results

use ndarray::{Array1, Array2, Axis};

use super::{CountMatrix, SampleMetadata};
use crate::dispersion::DispersionEstimates;
use crate::error::{PipelineError, Result};
use crate::glm::ModelFit;

/// Main data structure carried through the pipeline
///
/// Counts are read-only once loaded. Each stage fills in its own slot:
/// size factors, dispersions, then the fitted model.
#[derive(Debug, Clone)]
pub struct ExpressionDataSet {
    counts: CountMatrix,
    metadata: SampleMetadata,
    /// Categorical column holding the condition label of each sample
    status_column: String,
    /// Reference level for the status factor (alphabetically first when unset)
    reference_level: Option<String>,
    /// Extra numeric covariates to include in the design besides surrogate variables
    extra_covariates: Vec<String>,

    size_factors: Option<Array1<f64>>,
    normalized_counts: Option<Array2<f64>>,
    dispersions: Option<DispersionEstimates>,
    model: Option<ModelFit>,
}

impl ExpressionDataSet {
    /// Create a dataset, aligning metadata rows to the count matrix columns
    pub fn new(counts: CountMatrix, metadata: SampleMetadata, status_column: &str) -> Result<Self> {
        let metadata = align_metadata(&counts, metadata)?;

        let levels = metadata.levels(status_column).ok_or_else(|| PipelineError::InvalidDesignMatrix {
            reason: format!(
                "Status column '{}' not found in metadata (columns: {})",
                status_column,
                metadata.condition_names().join(", ")
            ),
        })?;

        if levels.len() < 2 {
            return Err(PipelineError::InvalidDesignMatrix {
                reason: format!(
                    "Status column '{}' has only one level ('{}'); at least two are required",
                    status_column,
                    levels.first().map(|s| s.as_str()).unwrap_or("")
                ),
            });
        }

        Ok(Self {
            counts,
            metadata,
            status_column: status_column.to_string(),
            reference_level: None,
            extra_covariates: Vec::new(),
            size_factors: None,
            normalized_counts: None,
            dispersions: None,
            model: None,
        })
    }

    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn metadata(&self) -> &SampleMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut SampleMetadata {
        // Design-dependent results become stale once metadata changes
        self.dispersions = None;
        self.model = None;
        &mut self.metadata
    }

    pub fn status_column(&self) -> &str {
        &self.status_column
    }

    pub fn n_genes(&self) -> usize {
        self.counts.n_genes()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    /// Status levels, sorted
    pub fn levels(&self) -> Vec<String> {
        self.metadata.levels(&self.status_column).unwrap_or_default()
    }

    /// Reference level for the status factor
    pub fn reference_level(&self) -> String {
        self.reference_level
            .clone()
            .or_else(|| self.levels().into_iter().next())
            .unwrap_or_default()
    }

    pub fn set_reference_level(&mut self, level: &str) -> Result<()> {
        if !self.levels().iter().any(|l| l == level) {
            return Err(PipelineError::InvalidDesignMatrix {
                reason: format!(
                    "Reference level '{}' is not a level of '{}'",
                    level, self.status_column
                ),
            });
        }
        self.reference_level = Some(level.to_string());
        self.model = None;
        Ok(())
    }

    pub fn set_extra_covariates(&mut self, names: Vec<String>) -> Result<()> {
        for name in &names {
            if !self.metadata.has_covariate(name) {
                return Err(PipelineError::InvalidDesignMatrix {
                    reason: format!("Covariate '{}' not found in metadata", name),
                });
            }
        }
        self.extra_covariates = names;
        self.dispersions = None;
        self.model = None;
        Ok(())
    }

    /// Numeric covariates that enter the design, extra covariates first, then surrogate variables
    pub fn design_covariates(&self) -> Vec<String> {
        let mut names = self.extra_covariates.clone();
        for sv in self.metadata.surrogate_names() {
            if !names.contains(sv) {
                names.push(sv.clone());
            }
        }
        names
    }

    pub fn size_factors(&self) -> Option<&Array1<f64>> {
        self.size_factors.as_ref()
    }

    /// Store size factors and recompute normalized counts
    pub fn set_size_factors(&mut self, size_factors: Array1<f64>) -> Result<()> {
        if size_factors.len() != self.n_samples() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} size factors", self.n_samples()),
                got: format!("{} size factors", size_factors.len()),
            });
        }
        if size_factors.iter().any(|&s| s <= 0.0 || !s.is_finite()) {
            return Err(PipelineError::SizeFactorFailed {
                reason: "Size factors must be positive and finite".to_string(),
            });
        }

        let mut normalized = self.counts.counts().to_owned();
        for (j, mut col) in normalized.axis_iter_mut(Axis(1)).enumerate() {
            col.mapv_inplace(|x| x / size_factors[j]);
        }

        self.normalized_counts = Some(normalized);
        self.size_factors = Some(size_factors);
        self.dispersions = None;
        self.model = None;
        Ok(())
    }

    pub fn normalized_counts(&self) -> Option<&Array2<f64>> {
        self.normalized_counts.as_ref()
    }

    /// Mean of normalized counts per gene
    pub fn base_means(&self) -> Option<Vec<f64>> {
        let n = self.n_samples() as f64;
        self.normalized_counts
            .as_ref()
            .map(|norm| norm.axis_iter(Axis(0)).map(|row| row.sum() / n).collect())
    }

    pub fn dispersions(&self) -> Option<&DispersionEstimates> {
        self.dispersions.as_ref()
    }

    pub fn set_dispersions(&mut self, dispersions: DispersionEstimates) -> Result<()> {
        if dispersions.final_dispersions.len() != self.n_genes() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} dispersions", self.n_genes()),
                got: format!("{} dispersions", dispersions.final_dispersions.len()),
            });
        }
        self.dispersions = Some(dispersions);
        self.model = None;
        Ok(())
    }

    pub fn model(&self) -> Option<&ModelFit> {
        self.model.as_ref()
    }

    pub fn set_model(&mut self, model: ModelFit) -> Result<()> {
        if model.coefficients.nrows() != self.n_genes() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} fitted genes", self.n_genes()),
                got: format!("{} fitted genes", model.coefficients.nrows()),
            });
        }
        self.model = Some(model);
        Ok(())
    }
}

/// Put metadata rows in count-matrix column order
fn align_metadata(counts: &CountMatrix, metadata: SampleMetadata) -> Result<SampleMetadata> {
    if counts.sample_ids() == metadata.sample_ids() {
        return Ok(metadata);
    }

    if counts.n_samples() != metadata.n_samples() {
        return Err(PipelineError::InvalidMetadata {
            reason: format!(
                "count matrix has {} samples but metadata has {}",
                counts.n_samples(),
                metadata.n_samples()
            ),
        });
    }

    let indices = counts
        .sample_ids()
        .iter()
        .map(|id| {
            metadata
                .sample_ids()
                .iter()
                .position(|m| m == id)
                .ok_or_else(|| PipelineError::InvalidMetadata {
                    reason: format!("sample '{}' missing from metadata", id),
                })
        })
        .collect::<Result<Vec<usize>>>()?;

    log::debug!("Reordering metadata rows to match count matrix columns");
    metadata.subset(&indices)
}
