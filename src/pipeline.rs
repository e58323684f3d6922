//! End-to-end run: counts to contrasts, common DEGs and enrichment
//!
//! Each stage logs what it did and writes its outputs under the configured
//! directory:
//!
//! - `normalized_counts.csv`, `size_factors.json`, `metadata.json`, `dispersions.json`
//! - `<num>_vs_<den>.csv` / `.json` and `<num>_vs_<den>_volcano.svg` per contrast
//! - `common_degs.csv`
//! - `<contrast>_<method>_<list>.csv` / `.svg` and `enrichment.json`
//! - `pca.svg`, `report.json`

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::annotation::GeneAnnotation;
use crate::common::{common_degs, write_common_degs};
use crate::config::PipelineConfig;
use crate::contrast::{extract_contrast, ContrastResult, ContrastSummary};
use crate::data::{CountMatrix, ExpressionDataSet};
use crate::dispersion::{estimate_dispersions, DispersionParams};
use crate::enrichment::{EnrichmentMethod, EnrichmentResult, GseaParams, OraParams, OverRepresentation, PrerankedGsea};
use crate::error::{PipelineError, Result};
use crate::geneset::GeneSetCollection;
use crate::glm::{fit_model, GlmFitParams};
use crate::io::{
    read_count_matrix, read_metadata, write_contrast_result, write_json, write_normalized_counts, write_records,
};
use crate::normalization::estimate_size_factors;
use crate::plot::{enrichment_bar_plot, pca_plot, volcano_plot};
use crate::quant::{import_salmon, TxToGene};
use crate::surrogate::{estimate_surrogates, ResidualPcaEstimator};

/// Size factor of one sample, as written to `size_factors.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleSizeFactor {
    pub sample: String,
    pub size_factor: f64,
}

/// Term counts of one enrichment result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentSummary {
    pub label: String,
    pub terms_tested: usize,
    pub significant: usize,
}

/// What a run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub n_genes: usize,
    pub n_samples: usize,
    pub n_surrogates: usize,
    pub contrasts: Vec<ContrastSummary>,
    pub common_degs: usize,
    pub enrichment: Vec<EnrichmentSummary>,
    pub output_dir: PathBuf,
}

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn output(&self, name: &str) -> PathBuf {
        self.config.output_dir.join(name)
    }

    pub fn run(&self) -> Result<PipelineReport> {
        let config = &self.config;
        fs::create_dir_all(&config.output_dir)?;

        let mut dataset = self.load_dataset()?;
        estimate_size_factors(&mut dataset, config.size_factors)?;
        write_normalized_counts(self.output("normalized_counts.csv"), &dataset)?;
        self.write_size_factors(&dataset)?;

        if config.plots {
            warn_on_plot_error(pca_plot(self.output("pca.svg"), &dataset, config.pca_top_genes));
        }

        let n_surrogates = estimate_surrogates(
            &mut dataset,
            &ResidualPcaEstimator {
                n_sv: config.surrogate_variables,
            },
        )?;
        write_json(self.output("metadata.json"), dataset.metadata())?;

        let dispersion_params = DispersionParams {
            trend: config.dispersion_trend,
            ..DispersionParams::default()
        };
        estimate_dispersions(&mut dataset, &dispersion_params)?;
        if let Some(dispersions) = dataset.dispersions() {
            write_json(self.output("dispersions.json"), dispersions)?;
        }
        fit_model(&mut dataset, &GlmFitParams::default())?;

        let annotation = match &config.annotation {
            Some(a) => Some(GeneAnnotation::from_path(&a.path, &a.id_column, &a.symbol_column)?),
            None => None,
        };

        let mut results = Vec::with_capacity(config.contrasts.len());
        let mut summaries = Vec::with_capacity(config.contrasts.len());
        for contrast in &config.contrasts {
            let result = self.run_contrast(&dataset, &contrast.numerator, &contrast.denominator, annotation.as_ref())?;
            let summary = result.summary(&config.thresholds);
            log::info!("{}", summary);
            summaries.push(summary);
            results.push(result);
        }

        let common = common_degs(&results, &config.thresholds)?;
        write_common_degs(self.output("common_degs.csv"), &common)?;

        let enrichment = self.run_enrichment(&results)?;
        let enrichment_summaries = enrichment
            .iter()
            .map(|r| EnrichmentSummary {
                label: r.label(),
                terms_tested: r.terms.len(),
                significant: r.significant(config.thresholds.alpha).len(),
            })
            .collect();

        let report = PipelineReport {
            n_genes: dataset.n_genes(),
            n_samples: dataset.n_samples(),
            n_surrogates,
            contrasts: summaries,
            common_degs: common.len(),
            enrichment: enrichment_summaries,
            output_dir: config.output_dir.clone(),
        };
        write_json(self.output("report.json"), &report)?;
        log::info!("Results written to {}", config.output_dir.display());
        Ok(report)
    }

    fn load_counts(&self) -> Result<CountMatrix> {
        match (&self.config.counts, &self.config.salmon) {
            (Some(path), _) => read_count_matrix(path),
            (None, Some(salmon)) => {
                let tx2gene = TxToGene::from_path(&salmon.tx2gene, salmon.ignore_tx_version)?;
                import_salmon(&salmon.samples, &tx2gene)
            }
            // rejected by validate()
            (None, None) => Err(PipelineError::InvalidConfig {
                reason: "no count input configured".to_string(),
            }),
        }
    }

    fn load_dataset(&self) -> Result<ExpressionDataSet> {
        let config = &self.config;
        let counts = self.load_counts()?;
        let counts = counts.filter_low_counts(config.filter.min_count, config.filter.min_samples)?;
        let metadata = read_metadata(&config.metadata)?;

        let mut dataset = ExpressionDataSet::new(counts, metadata, &config.status_column)?;
        if let Some(reference) = &config.reference_level {
            dataset.set_reference_level(reference)?;
        }
        if !config.covariates.is_empty() {
            dataset.set_extra_covariates(config.covariates.clone())?;
        }
        log::info!(
            "Dataset: {} genes x {} samples, levels {:?} (reference {})",
            dataset.n_genes(),
            dataset.n_samples(),
            dataset.levels(),
            dataset.reference_level()
        );
        Ok(dataset)
    }

    fn write_size_factors(&self, dataset: &ExpressionDataSet) -> Result<()> {
        let Some(size_factors) = dataset.size_factors() else {
            return Ok(());
        };
        let rows: Vec<SampleSizeFactor> = dataset
            .counts()
            .sample_ids()
            .iter()
            .zip(size_factors.iter())
            .map(|(sample, &size_factor)| SampleSizeFactor {
                sample: sample.clone(),
                size_factor,
            })
            .collect();
        write_json(self.output("size_factors.json"), &rows)
    }

    fn run_contrast(
        &self,
        dataset: &ExpressionDataSet,
        numerator: &str,
        denominator: &str,
        annotation: Option<&GeneAnnotation>,
    ) -> Result<ContrastResult> {
        let mut result = extract_contrast(dataset, numerator, denominator)?;
        if let Some(annotation) = annotation {
            result = annotation.annotate(&result);
        }

        let label = result.label();
        write_contrast_result(self.output(&format!("{}.csv", label)), &result)?;
        write_json(self.output(&format!("{}.json", label)), &result)?;
        if self.config.plots {
            warn_on_plot_error(volcano_plot(
                self.output(&format!("{}_volcano.svg", label)),
                &result,
                &self.config.thresholds,
            ));
        }
        Ok(result)
    }

    fn load_gene_sets(&self) -> Result<Option<GeneSetCollection>> {
        let mut collection: Option<GeneSetCollection> = None;
        for path in &self.config.enrichment.gene_sets {
            let sets = GeneSetCollection::read_gmt(path)?;
            collection = Some(match collection {
                Some(existing) => existing.merge(sets)?,
                None => sets,
            });
        }
        Ok(collection)
    }

    fn methods(&self) -> Vec<Box<dyn EnrichmentMethod>> {
        let e = &self.config.enrichment;
        let mut methods: Vec<Box<dyn EnrichmentMethod>> = Vec::new();
        if e.ora {
            methods.push(Box::new(OverRepresentation {
                thresholds: self.config.thresholds,
                params: OraParams {
                    min_size: e.min_set_size,
                    max_size: e.max_set_size,
                },
            }));
        }
        if e.gsea {
            methods.push(Box::new(PrerankedGsea {
                params: GseaParams {
                    min_size: e.min_set_size,
                    max_size: e.max_set_size,
                    permutations: e.permutations,
                    seed: e.seed,
                },
            }));
        }
        methods
    }

    fn run_enrichment(&self, results: &[ContrastResult]) -> Result<Vec<EnrichmentResult>> {
        let Some(sets) = self.load_gene_sets()? else {
            log::info!("No gene set files configured, skipping enrichment");
            return Ok(Vec::new());
        };

        let mut all = Vec::new();
        for result in results {
            for method in self.methods() {
                for enrichment in method.enrich(result, &sets)? {
                    let label = enrichment.label();
                    write_records(self.output(&format!("{}.csv", label)), &enrichment.terms)?;
                    if self.config.plots && !enrichment.terms.is_empty() {
                        warn_on_plot_error(enrichment_bar_plot(
                            self.output(&format!("{}.svg", label)),
                            &enrichment,
                            self.config.enrichment.top_terms,
                        ));
                    }
                    all.push(enrichment);
                }
            }
        }
        write_json(self.output("enrichment.json"), &all)?;
        Ok(all)
    }
}

/// Figures are best effort; a failed plot does not stop the run
fn warn_on_plot_error(result: Result<()>) {
    if let Err(e) = result {
        log::warn!("{}", e);
    }
}

/// Read a pipeline report written by a previous run
pub fn read_report<P: AsRef<Path>>(path: P) -> Result<PipelineReport> {
    crate::io::read_json(path)
}
