//! Preranked gene set enrichment analysis
//!
//! Weighted Kolmogorov-Smirnov running sum with gene weights |stat|. The null
//! distribution comes from shuffling gene labels over the ranked list with an
//! R-compatible RNG, so a fixed seed gives the same p-values on every run.

use std::collections::HashMap;
use std::ops::Range;

use rayon::prelude::*;

use super::EnrichmentTerm;
use crate::error::{PipelineError, Result};
use crate::geneset::{GeneSet, GeneSetCollection};
use crate::rng::RMersenneTwister;
use crate::stats::cmp_nan_last;
use crate::testing::benjamini_hochberg;

#[derive(Debug, Clone, Copy)]
pub struct GseaParams {
    pub min_size: usize,
    pub max_size: usize,
    pub permutations: usize,
    pub seed: u32,
}

impl Default for GseaParams {
    fn default() -> Self {
        Self {
            min_size: 10,
            max_size: 500,
            permutations: 1000,
            seed: 42,
        }
    }
}

/// Enrichment score of a set at ascending `hit_positions` of a ranked list
///
/// Returns the signed maximum deviation of the running sum and the range of
/// hits forming the leading edge. Zero total weight falls back to equal weights.
pub fn enrichment_score(hit_positions: &[usize], weights: &[f64]) -> (f64, Range<usize>) {
    let n = weights.len();
    let m = hit_positions.len();
    if m == 0 || m >= n {
        return (0.0, 0..0);
    }

    let total: f64 = hit_positions.iter().map(|&p| weights[p]).sum();
    let hit_step = |pos: usize| if total > 0.0 { weights[pos] / total } else { 1.0 / m as f64 };
    let miss_step = 1.0 / (n - m) as f64;

    let mut hit_sum = 0.0;
    let (mut max, mut max_idx) = (0.0, 0);
    let (mut min, mut min_idx) = (0.0, 0);
    for (i, &pos) in hit_positions.iter().enumerate() {
        let miss_sum = (pos - i) as f64 * miss_step;
        let before = hit_sum - miss_sum;
        if before < min {
            min = before;
            min_idx = i;
        }
        hit_sum += hit_step(pos);
        let after = hit_sum - miss_sum;
        if after > max {
            max = after;
            max_idx = i;
        }
    }

    if max >= -min {
        (max, 0..max_idx + 1)
    } else {
        (min, min_idx..m)
    }
}

/// Run preranked GSEA of `ranked` (gene, statistic) against every gene set
///
/// Terms come back by ascending p-value, then by descending |NES|.
pub fn gsea(ranked: &[(String, f64)], sets: &GeneSetCollection, params: &GseaParams) -> Result<Vec<EnrichmentTerm>> {
    if params.permutations == 0 {
        return Err(PipelineError::InvalidInput {
            reason: "GSEA needs at least one permutation".to_string(),
        });
    }

    let mut ranked: Vec<&(String, f64)> = ranked.iter().filter(|(_, s)| s.is_finite()).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let weights: Vec<f64> = ranked.iter().map(|(_, s)| s.abs()).collect();
    let n = ranked.len();

    let mut position: HashMap<&str, usize> = HashMap::with_capacity(n);
    for (i, (gene, _)) in ranked.iter().enumerate() {
        position.entry(gene.as_str()).or_insert(i);
    }

    // sets with their ascending hit positions
    let tested: Vec<(&GeneSet, Vec<usize>)> = sets
        .iter()
        .filter_map(|set| {
            let mut hits: Vec<usize> = set.genes.iter().filter_map(|g| position.get(g.as_str()).copied()).collect();
            hits.sort_unstable();
            hits.dedup();
            let size = hits.len();
            (size >= params.min_size.max(1) && size <= params.max_size && size < n).then_some((set, hits))
        })
        .collect();

    if tested.is_empty() {
        log::warn!("No gene sets within size bounds [{}, {}]", params.min_size, params.max_size);
        return Ok(Vec::new());
    }
    log::debug!(
        "GSEA: {} sets, {} ranked genes, {} permutations",
        tested.len(),
        n,
        params.permutations
    );

    let observed: Vec<(f64, Range<usize>)> = tested
        .par_iter()
        .map(|(_, hits)| enrichment_score(hits, &weights))
        .collect();

    let mut nulls: Vec<Vec<f64>> = vec![Vec::with_capacity(params.permutations); tested.len()];
    let mut rng = RMersenneTwister::new(params.seed);
    for _ in 0..params.permutations {
        let perm = rng.permutation(n);
        let scores: Vec<f64> = tested
            .par_iter()
            .map(|(_, hits)| {
                let mut shuffled: Vec<usize> = hits.iter().map(|&p| perm[p]).collect();
                shuffled.sort_unstable();
                enrichment_score(&shuffled, &weights).0
            })
            .collect();
        for (null, score) in nulls.iter_mut().zip(scores) {
            null.push(score);
        }
    }

    let mut terms: Vec<EnrichmentTerm> = tested
        .iter()
        .zip(observed)
        .zip(&nulls)
        .map(|(((set, hits), (es, leading)), null)| {
            let (nes, pvalue) = normalize(es, null);
            EnrichmentTerm {
                term: set.name.clone(),
                description: set.description.clone(),
                set_size: hits.len(),
                hits: leading.len(),
                gene_ratio: f64::NAN,
                bg_ratio: f64::NAN,
                enrichment_score: es,
                nes,
                pvalue,
                padj: f64::NAN,
                genes: hits[leading].iter().map(|&p| ranked[p].0.clone()).collect(),
            }
        })
        .collect();

    let pvalues: Vec<f64> = terms.iter().map(|t| t.pvalue).collect();
    for (term, padj) in terms.iter_mut().zip(benjamini_hochberg(&pvalues)) {
        term.padj = padj;
    }
    terms.sort_by(|a, b| cmp_nan_last(a.pvalue, b.pvalue).then_with(|| cmp_nan_last(-a.nes.abs(), -b.nes.abs())));
    Ok(terms)
}

/// NES and permutation p-value against the null scores of the same sign
fn normalize(es: f64, null: &[f64]) -> (f64, f64) {
    let same_sign: Vec<f64> = if es >= 0.0 {
        null.iter().copied().filter(|&s| s >= 0.0).collect()
    } else {
        null.iter().copied().filter(|&s| s < 0.0).collect()
    };
    let extreme = if es >= 0.0 {
        same_sign.iter().filter(|&&s| s >= es).count()
    } else {
        same_sign.iter().filter(|&&s| s <= es).count()
    };
    let pvalue = (extreme + 1) as f64 / (same_sign.len() + 1) as f64;

    let mean_abs = same_sign.iter().map(|s| s.abs()).sum::<f64>() / same_sign.len() as f64;
    let nes = if same_sign.is_empty() || mean_abs <= 0.0 {
        f64::NAN
    } else {
        es / mean_abs
    };
    (nes, pvalue.min(1.0))
}
