//! Gene set enrichment: over-representation analysis and preranked GSEA

mod gsea;
mod ora;

pub use gsea::{enrichment_score, gsea, GseaParams};
pub use ora::{hypergeometric_upper_tail, over_representation, OraParams};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::contrast::{ContrastResult, DegThresholds};
use crate::error::Result;
use crate::geneset::GeneSetCollection;
use crate::io::nullable_f64;
use crate::stats::cmp_nan_last;

/// Statistics for one gene set
///
/// ORA fills the ratios and uses the fold enrichment as `enrichment_score`;
/// GSEA fills `enrichment_score` and `nes`. Unused fields are NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentTerm {
    pub term: String,
    pub description: String,
    /// Genes of the set found in the universe (ORA) or ranked list (GSEA)
    pub set_size: usize,
    /// Overlap with the query (ORA) or leading edge size (GSEA)
    pub hits: usize,
    #[serde(deserialize_with = "nullable_f64")]
    pub gene_ratio: f64,
    #[serde(deserialize_with = "nullable_f64")]
    pub bg_ratio: f64,
    #[serde(deserialize_with = "nullable_f64")]
    pub enrichment_score: f64,
    #[serde(deserialize_with = "nullable_f64")]
    pub nes: f64,
    #[serde(deserialize_with = "nullable_f64")]
    pub pvalue: f64,
    #[serde(deserialize_with = "nullable_f64")]
    pub padj: f64,
    /// Overlapping or leading edge genes, written as `A/B/C`
    #[serde(serialize_with = "join_genes", deserialize_with = "split_genes")]
    pub genes: Vec<String>,
}

fn join_genes<S: Serializer>(genes: &[String], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&genes.join("/"))
}

fn split_genes<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    let joined = String::deserialize(deserializer)?;
    Ok(joined.split('/').filter(|g| !g.is_empty()).map(|g| g.to_string()).collect())
}

/// Enrichment of one gene list of one contrast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentResult {
    /// `ora` or `gsea`
    pub method: String,
    pub contrast: String,
    /// `up`, `down` or `ranked`
    pub gene_list: String,
    pub terms: Vec<EnrichmentTerm>,
}

impl EnrichmentResult {
    /// e.g. `ko_vs_wt_ora_up`
    pub fn label(&self) -> String {
        format!("{}_{}_{}", self.contrast, self.method, self.gene_list)
    }

    pub fn significant(&self, alpha: f64) -> Vec<&EnrichmentTerm> {
        self.terms.iter().filter(|t| t.padj < alpha).collect()
    }

    /// Up to `n` terms by ascending padj
    pub fn top(&self, n: usize) -> Vec<&EnrichmentTerm> {
        let mut terms: Vec<&EnrichmentTerm> = self.terms.iter().collect();
        terms.sort_by(|a, b| cmp_nan_last(a.padj, b.padj).then_with(|| cmp_nan_last(a.pvalue, b.pvalue)));
        terms.truncate(n);
        terms
    }
}

/// A way of testing a contrast against a gene set collection
pub trait EnrichmentMethod {
    fn name(&self) -> &str;

    fn enrich(&self, contrast: &ContrastResult, sets: &GeneSetCollection) -> Result<Vec<EnrichmentResult>>;
}

/// ORA of the up- and down-regulated genes against the tested genes
#[derive(Debug, Clone)]
pub struct OverRepresentation {
    pub thresholds: DegThresholds,
    pub params: OraParams,
}

impl EnrichmentMethod for OverRepresentation {
    fn name(&self) -> &str {
        "ora"
    }

    fn enrich(&self, contrast: &ContrastResult, sets: &GeneSetCollection) -> Result<Vec<EnrichmentResult>> {
        let universe = contrast.tested_genes();
        let lists = [
            ("up", contrast.up_genes(&self.thresholds)),
            ("down", contrast.down_genes(&self.thresholds)),
        ];

        let mut results = Vec::new();
        for (list, genes) in lists {
            let terms = over_representation(&genes, &universe, sets, &self.params);
            log::info!(
                "ORA {} {}: {} genes, {} terms tested",
                contrast.label(),
                list,
                genes.len(),
                terms.len()
            );
            results.push(EnrichmentResult {
                method: self.name().to_string(),
                contrast: contrast.label(),
                gene_list: list.to_string(),
                terms,
            });
        }
        Ok(results)
    }
}

/// Preranked GSEA on the Wald statistic
#[derive(Debug, Clone)]
pub struct PrerankedGsea {
    pub params: GseaParams,
}

impl EnrichmentMethod for PrerankedGsea {
    fn name(&self) -> &str {
        "gsea"
    }

    fn enrich(&self, contrast: &ContrastResult, sets: &GeneSetCollection) -> Result<Vec<EnrichmentResult>> {
        let ranked = contrast.ranked_by_stat();
        let terms = gsea(&ranked, sets, &self.params)?;
        log::info!("GSEA {}: {} ranked genes, {} terms tested", contrast.label(), ranked.len(), terms.len());
        Ok(vec![EnrichmentResult {
            method: self.name().to_string(),
            contrast: contrast.label(),
            gene_list: "ranked".to_string(),
            terms,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contrast::ContrastRow;

    fn contrast() -> ContrastResult {
        let mut rows = Vec::new();
        for i in 0..40 {
            let lfc = if i < 8 { 2.0 } else if i < 12 { -2.0 } else { 0.1 };
            let padj = if i < 12 { 0.001 } else { 0.8 };
            rows.push(ContrastRow {
                gene_id: format!("ENSG{}", i),
                symbol: Some(format!("G{}", i)),
                base_mean: 100.0,
                log2_fold_change: lfc,
                lfc_se: 0.2,
                stat: lfc / 0.2 - i as f64 * 0.01,
                pvalue: padj / 10.0,
                padj,
            });
        }
        ContrastResult {
            status_column: "status".to_string(),
            numerator: "ko".to_string(),
            denominator: "wt".to_string(),
            rows,
        }
    }

    fn sets() -> GeneSetCollection {
        let up: Vec<String> = (0..6).map(|i| format!("G{}", i)).collect();
        let other: Vec<String> = (20..30).map(|i| format!("G{}", i)).collect();
        GeneSetCollection::from_gmt_str(&format!("UP_SET\tna\t{}\nOTHER\tna\t{}\n", up.join("\t"), other.join("\t")))
            .unwrap()
    }

    #[test]
    fn test_ora_method_returns_up_and_down() {
        let method = OverRepresentation {
            thresholds: DegThresholds::default(),
            params: OraParams { min_size: 3, max_size: 500 },
        };
        let results = method.enrich(&contrast(), &sets()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].label(), "ko_vs_wt_ora_up");

        let up = &results[0];
        assert_eq!(up.terms[0].term, "UP_SET");
        assert_eq!(up.terms[0].hits, 6);
        assert!(up.significant(0.05).iter().any(|t| t.term == "UP_SET"));
        assert!(results[1].terms.iter().all(|t| t.term != "UP_SET"));
    }

    #[test]
    fn test_gsea_method() {
        let method = PrerankedGsea {
            params: GseaParams {
                min_size: 3,
                max_size: 500,
                permutations: 200,
                seed: 42,
            },
        };
        let results = method.enrich(&contrast(), &sets()).unwrap();
        assert_eq!(results.len(), 1);
        let up = results[0].terms.iter().find(|t| t.term == "UP_SET").unwrap();
        assert!(up.nes > 0.0);
        assert!(up.pvalue < 0.05);
        assert_eq!(results[0].top(1).len(), 1);
    }
}
