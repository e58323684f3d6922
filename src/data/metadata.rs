//! Sample metadata: categorical status labels plus numeric covariates

use std::collections::{HashMap, HashSet};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Prefix used for surrogate variable column names (`sv1`, `sv2`, ...)
pub const SURROGATE_PREFIX: &str = "sv";

/// Per-sample annotations
///
/// Categorical columns are loaded once from the metadata file. The only
/// mutation afterwards is [`SampleMetadata::add_surrogate_variables`], which
/// appends the estimated latent covariates as numeric columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleMetadata {
    sample_ids: Vec<String>,
    /// Categorical columns (column name -> value per sample)
    conditions: HashMap<String, Vec<String>>,
    /// Numeric columns (column name -> value per sample)
    covariates: HashMap<String, Vec<f64>>,
    /// Surrogate variable column names in estimation order
    surrogate_names: Vec<String>,
}

impl SampleMetadata {
    pub fn new(sample_ids: Vec<String>) -> Self {
        let mut seen = HashSet::new();
        for id in &sample_ids {
            if !seen.insert(id) {
                log::warn!("Duplicate sample ID detected: '{}'", id);
            }
        }
        Self {
            sample_ids,
            conditions: HashMap::new(),
            covariates: HashMap::new(),
            surrogate_names: Vec::new(),
        }
    }

    /// Add a categorical column
    pub fn add_condition(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        self.check_len(values.len())?;
        self.conditions.insert(name.to_string(), values);
        Ok(())
    }

    /// Add a numeric column
    pub fn add_covariate(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        self.check_len(values.len())?;
        if values.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::InvalidMetadata {
                reason: format!("covariate '{}' contains non-finite values", name),
            });
        }
        self.covariates.insert(name.to_string(), values);
        Ok(())
    }

    /// Store surrogate variables (samples x k) as columns `sv1..svk`.
    ///
    /// Any previously stored surrogate columns are replaced.
    pub fn add_surrogate_variables(&mut self, surrogates: &Array2<f64>) -> Result<()> {
        if surrogates.nrows() != self.n_samples() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} rows of surrogate variables", self.n_samples()),
                got: format!("{} rows", surrogates.nrows()),
            });
        }

        for name in self.surrogate_names.drain(..) {
            self.covariates.remove(&name);
        }

        for k in 0..surrogates.ncols() {
            let name = format!("{}{}", SURROGATE_PREFIX, k + 1);
            if self.has_condition(&name) {
                return Err(PipelineError::InvalidMetadata {
                    reason: format!("categorical column '{}' clashes with surrogate variable name", name),
                });
            }
            let values = surrogates.column(k).to_vec();
            self.add_covariate(&name, values)?;
            self.surrogate_names.push(name);
        }
        Ok(())
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.sample_ids.len() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} values", self.sample_ids.len()),
                got: format!("{} values", len),
            });
        }
        Ok(())
    }

    pub fn has_condition(&self, name: &str) -> bool {
        self.conditions.contains_key(name)
    }

    pub fn has_covariate(&self, name: &str) -> bool {
        self.covariates.contains_key(name)
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn condition(&self, name: &str) -> Option<&Vec<String>> {
        self.conditions.get(name)
    }

    pub fn covariate(&self, name: &str) -> Option<&Vec<f64>> {
        self.covariates.get(name)
    }

    /// Names of the surrogate variable columns, in order
    pub fn surrogate_names(&self) -> &[String] {
        &self.surrogate_names
    }

    pub fn condition_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.conditions.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Sorted unique levels of a categorical column
    pub fn levels(&self, name: &str) -> Option<Vec<String>> {
        self.conditions.get(name).map(|values| {
            let mut unique = values.clone();
            unique.sort();
            unique.dedup();
            unique
        })
    }

    /// Indices of samples whose `name` column equals `level`
    pub fn samples_with_level(&self, name: &str, level: &str) -> Vec<usize> {
        self.conditions
            .get(name)
            .map(|values| {
                values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.as_str() == level)
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Subset (and reorder) samples
    pub fn subset(&self, sample_indices: &[usize]) -> Result<Self> {
        let ids = sample_indices.iter().map(|&i| self.sample_ids[i].clone()).collect();
        let mut meta = SampleMetadata::new(ids);

        for (name, values) in &self.conditions {
            meta.add_condition(name, sample_indices.iter().map(|&i| values[i].clone()).collect())?;
        }
        for (name, values) in &self.covariates {
            meta.add_covariate(name, sample_indices.iter().map(|&i| values[i]).collect())?;
        }
        meta.surrogate_names = self.surrogate_names.clone();
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn meta() -> SampleMetadata {
        let mut meta = SampleMetadata::new(vec![
            "s1".to_string(),
            "s2".to_string(),
            "s3".to_string(),
            "s4".to_string(),
        ]);
        meta.add_condition(
            "status",
            vec![
                "control".to_string(),
                "control".to_string(),
                "treated".to_string(),
                "treated".to_string(),
            ],
        )
        .unwrap();
        meta
    }

    #[test]
    fn test_levels_and_groups() {
        let meta = meta();
        assert_eq!(meta.levels("status").unwrap(), vec!["control", "treated"]);
        assert_eq!(meta.samples_with_level("status", "treated"), vec![2, 3]);
        assert!(meta.levels("missing").is_none());
    }

    #[test]
    fn test_add_surrogate_variables_replaces_previous() {
        let mut meta = meta();
        meta.add_surrogate_variables(&array![[0.1, 1.0], [0.2, 2.0], [0.3, 3.0], [0.4, 4.0]])
            .unwrap();
        assert_eq!(meta.surrogate_names(), &["sv1", "sv2"]);
        assert_eq!(meta.covariate("sv2").unwrap(), &vec![1.0, 2.0, 3.0, 4.0]);

        meta.add_surrogate_variables(&array![[1.0], [2.0], [3.0], [4.0]]).unwrap();
        assert_eq!(meta.surrogate_names(), &["sv1"]);
        assert!(!meta.has_covariate("sv2"));
    }

    #[test]
    fn test_surrogate_row_mismatch() {
        let mut meta = meta();
        let result = meta.add_surrogate_variables(&array![[1.0], [2.0]]);
        assert!(matches!(result, Err(PipelineError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_subset_keeps_covariates() {
        let mut meta = meta();
        meta.add_surrogate_variables(&array![[1.0], [2.0], [3.0], [4.0]]).unwrap();
        let sub = meta.subset(&[3, 0]).unwrap();
        assert_eq!(sub.sample_ids(), &["s4", "s1"]);
        assert_eq!(sub.condition("status").unwrap(), &vec!["treated".to_string(), "control".to_string()]);
        assert_eq!(sub.covariate("sv1").unwrap(), &vec![4.0, 1.0]);
        assert_eq!(sub.surrogate_names(), &["sv1"]);
    }
}
