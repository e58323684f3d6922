//! YAML configuration for full pipeline runs

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::contrast::DegThresholds;
use crate::dispersion::TrendFitMethod;
use crate::error::{PipelineError, Result};
use crate::normalization::SizeFactorMethod;
use crate::quant::QuantSample;

/// Pairwise comparison of two status levels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContrastSpec {
    pub numerator: String,
    pub denominator: String,
}

/// Salmon quantifications used instead of a count matrix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalmonInput {
    pub tx2gene: PathBuf,
    /// Match transcripts without their `.N` version suffix
    #[serde(default = "default_true")]
    pub ignore_tx_version: bool,
    pub samples: Vec<QuantSample>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationConfig {
    pub path: PathBuf,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default = "default_symbol_column")]
    pub symbol_column: String,
}

/// Low count filter applied before normalization
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_min_count")]
    pub min_count: f64,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_count: default_min_count(),
            min_samples: default_min_samples(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// GMT files, merged into one collection
    #[serde(default)]
    pub gene_sets: Vec<PathBuf>,
    #[serde(default = "default_true")]
    pub ora: bool,
    #[serde(default = "default_true")]
    pub gsea: bool,
    #[serde(default = "default_min_set_size")]
    pub min_set_size: usize,
    #[serde(default = "default_max_set_size")]
    pub max_set_size: usize,
    #[serde(default = "default_permutations")]
    pub permutations: usize,
    #[serde(default = "default_seed")]
    pub seed: u32,
    /// Terms shown in enrichment bar charts
    #[serde(default = "default_top_terms")]
    pub top_terms: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            gene_sets: Vec::new(),
            ora: true,
            gsea: true,
            min_set_size: default_min_set_size(),
            max_set_size: default_max_set_size(),
            permutations: default_permutations(),
            seed: default_seed(),
            top_terms: default_top_terms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Count matrix; exactly one of `counts` and `salmon` is required
    #[serde(default)]
    pub counts: Option<PathBuf>,
    #[serde(default)]
    pub salmon: Option<SalmonInput>,
    pub metadata: PathBuf,
    #[serde(default = "default_status_column")]
    pub status_column: String,
    #[serde(default)]
    pub reference_level: Option<String>,
    /// Numeric metadata columns added to the design before surrogate variables
    #[serde(default)]
    pub covariates: Vec<String>,
    pub contrasts: Vec<ContrastSpec>,
    #[serde(default)]
    pub thresholds: DegThresholds,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default = "default_size_factors")]
    pub size_factors: SizeFactorMethod,
    #[serde(default = "default_surrogate_variables")]
    pub surrogate_variables: usize,
    #[serde(default = "default_trend")]
    pub dispersion_trend: TrendFitMethod,
    #[serde(default)]
    pub annotation: Option<AnnotationConfig>,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default = "default_true")]
    pub plots: bool,
    /// Most variable genes used for the PCA plot
    #[serde(default = "default_pca_top_genes")]
    pub pca_top_genes: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_true() -> bool {
    true
}
fn default_id_column() -> String {
    "gene_id".to_string()
}
fn default_symbol_column() -> String {
    "symbol".to_string()
}
fn default_min_count() -> f64 {
    10.0
}
fn default_min_samples() -> usize {
    2
}
fn default_min_set_size() -> usize {
    10
}
fn default_max_set_size() -> usize {
    500
}
fn default_permutations() -> usize {
    1000
}
fn default_seed() -> u32 {
    42
}
fn default_top_terms() -> usize {
    20
}
fn default_status_column() -> String {
    "status".to_string()
}
fn default_size_factors() -> SizeFactorMethod {
    SizeFactorMethod::Ratio
}
fn default_surrogate_variables() -> usize {
    2
}
fn default_trend() -> TrendFitMethod {
    TrendFitMethod::Parametric
}
fn default_pca_top_genes() -> usize {
    500
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

impl PipelineConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate; relative paths are resolved against the file's directory
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(&path)?;
        let mut config: Self = serde_yaml::from_str(&text)?;
        if let Some(base) = path.as_ref().parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        log::info!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        if let Some(counts) = self.counts.as_mut() {
            resolve(counts);
        }
        if let Some(salmon) = self.salmon.as_mut() {
            resolve(&mut salmon.tx2gene);
            for sample in &mut salmon.samples {
                resolve(&mut sample.path);
            }
        }
        resolve(&mut self.metadata);
        if let Some(annotation) = self.annotation.as_mut() {
            resolve(&mut annotation.path);
        }
        for gmt in &mut self.enrichment.gene_sets {
            resolve(gmt);
        }
        resolve(&mut self.output_dir);
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(PipelineError::InvalidConfig { reason });

        match (&self.counts, &self.salmon) {
            (None, None) => return invalid("one of 'counts' or 'salmon' is required".to_string()),
            (Some(_), Some(_)) => return invalid("'counts' and 'salmon' are mutually exclusive".to_string()),
            (None, Some(salmon)) if salmon.samples.is_empty() => {
                return invalid("'salmon.samples' is empty".to_string())
            }
            _ => {}
        }

        if self.contrasts.is_empty() {
            return invalid("at least one contrast is required".to_string());
        }
        for c in &self.contrasts {
            if c.numerator == c.denominator {
                return invalid(format!("contrast compares '{}' with itself", c.numerator));
            }
        }

        let alpha = self.thresholds.alpha;
        if !(alpha > 0.0 && alpha < 1.0) {
            return invalid(format!("alpha must be in (0, 1), got {}", alpha));
        }
        if !(self.thresholds.lfc_cutoff >= 0.0) {
            return invalid(format!(
                "lfc_cutoff must be non-negative, got {}",
                self.thresholds.lfc_cutoff
            ));
        }
        if !(self.filter.min_count >= 0.0) {
            return invalid(format!("filter.min_count must be non-negative, got {}", self.filter.min_count));
        }

        let e = &self.enrichment;
        if e.min_set_size > e.max_set_size {
            return invalid(format!(
                "min_set_size {} is greater than max_set_size {}",
                e.min_set_size, e.max_set_size
            ));
        }
        if e.gsea && e.permutations == 0 {
            return invalid("GSEA needs at least one permutation".to_string());
        }
        if self.status_column.trim().is_empty() {
            return invalid("status_column is empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const MINIMAL: &str = "
counts: counts.tsv
metadata: samples.csv
contrasts:
  - numerator: ko
    denominator: wt
";

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(config.status_column, "status");
        assert_eq!(config.thresholds, DegThresholds::default());
        assert_eq!(config.surrogate_variables, 2);
        assert_eq!(config.size_factors, SizeFactorMethod::Ratio);
        assert_eq!(config.dispersion_trend, TrendFitMethod::Parametric);
        assert_eq!(config.enrichment.permutations, 1000);
        assert_eq!(config.enrichment.seed, 42);
        assert!(config.enrichment.ora && config.enrichment.gsea);
        assert_eq!(config.filter.min_samples, 2);
        assert_eq!(config.output_dir, PathBuf::from("results"));
        assert!(config.covariates.is_empty());
    }

    #[test]
    fn test_full_config() {
        let text = "
salmon:
  tx2gene: tx2gene.tsv
  samples:
    - sample: wt1
      path: quant/wt1/quant.sf
metadata: samples.csv
status_column: genotype
reference_level: wt
covariates: [rin]
contrasts:
  - { numerator: ko, denominator: wt }
  - { numerator: het, denominator: wt }
thresholds: { alpha: 0.1, lfc_cutoff: 0.5 }
size_factors: poscounts
surrogate_variables: 0
dispersion_trend: mean
annotation:
  path: genes.tsv
  symbol_column: gene_name
enrichment:
  gene_sets: [hallmark.gmt]
  gsea: false
  min_set_size: 5
";
        let config = PipelineConfig::from_yaml_str(text).unwrap();
        let salmon = config.salmon.as_ref().unwrap();
        assert!(salmon.ignore_tx_version);
        assert_eq!(salmon.samples[0].sample, "wt1");
        assert_eq!(config.contrasts.len(), 2);
        assert_eq!(config.covariates, vec!["rin".to_string()]);
        assert_eq!(config.thresholds.lfc_cutoff, 0.5);
        assert_eq!(config.size_factors, SizeFactorMethod::PosCounts);
        assert_eq!(config.dispersion_trend, TrendFitMethod::Mean);
        let annotation = config.annotation.as_ref().unwrap();
        assert_eq!(annotation.id_column, "gene_id");
        assert_eq!(annotation.symbol_column, "gene_name");
        assert!(!config.enrichment.gsea);
        assert_eq!(config.enrichment.max_set_size, 500);
    }

    #[test]
    fn test_partial_thresholds_keep_defaults() {
        let config = PipelineConfig::from_yaml_str(&format!("{}thresholds: {{ alpha: 0.1 }}\n", MINIMAL)).unwrap();
        assert_eq!(config.thresholds.alpha, 0.1);
        assert_eq!(config.thresholds.lfc_cutoff, 1.0);

        let config = PipelineConfig::from_yaml_str(&format!("{}thresholds: {{ lfc_cutoff: 0.58 }}\n", MINIMAL)).unwrap();
        assert_eq!(config.thresholds.alpha, 0.05);
        assert_eq!(config.thresholds.lfc_cutoff, 0.58);
    }

    #[test]
    fn test_validation_errors() {
        let bad = [
            "metadata: m.csv\ncontrasts: [{numerator: a, denominator: b}]\n",
            "counts: c.tsv\nmetadata: m.csv\ncontrasts: []\n",
            "counts: c.tsv\nmetadata: m.csv\ncontrasts: [{numerator: a, denominator: a}]\n",
            "counts: c.tsv\nmetadata: m.csv\ncontrasts: [{numerator: a, denominator: b}]\nthresholds: {alpha: 1.5, lfc_cutoff: 1}\n",
            "counts: c.tsv\nmetadata: m.csv\ncontrasts: [{numerator: a, denominator: b}]\nthresholds: {alpha: 0.05, lfc_cutoff: -1}\n",
            "counts: c.tsv\nmetadata: m.csv\ncontrasts: [{numerator: a, denominator: b}]\nenrichment: {min_set_size: 50, max_set_size: 10}\n",
            "counts: c.tsv\nmetadata: m.csv\ncontrasts: [{numerator: a, denominator: b}]\nenrichment: {permutations: 0}\n",
        ];
        for text in bad {
            let err = PipelineConfig::from_yaml_str(text).unwrap_err();
            assert!(matches!(err, PipelineError::InvalidConfig { .. }), "{}", text);
        }
    }

    #[test]
    fn test_from_path_resolves_relative_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, MINIMAL).unwrap();

        let config = PipelineConfig::from_path(&path).unwrap();
        assert_eq!(config.counts.unwrap(), dir.path().join("counts.tsv"));
        assert_eq!(config.output_dir, dir.path().join("results"));

        let round_trip = PipelineConfig::from_yaml_str(&PipelineConfig::from_path(&path).unwrap().to_yaml().unwrap());
        assert!(round_trip.is_ok());
    }
}
