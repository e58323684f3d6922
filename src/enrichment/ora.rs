//! Over-representation analysis with the hypergeometric test

use std::collections::HashSet;

use statrs::function::factorial::ln_binomial;

use super::EnrichmentTerm;
use crate::geneset::GeneSetCollection;
use crate::stats::cmp_nan_last;
use crate::testing::benjamini_hochberg;

/// Gene set size bounds, counted after restricting sets to the universe
#[derive(Debug, Clone, Copy)]
pub struct OraParams {
    pub min_size: usize,
    pub max_size: usize,
}

impl Default for OraParams {
    fn default() -> Self {
        Self {
            min_size: 10,
            max_size: 500,
        }
    }
}

/// P(X >= k) for X ~ Hypergeometric(population, successes, draws)
pub fn hypergeometric_upper_tail(k: usize, population: usize, successes: usize, draws: usize) -> f64 {
    if k == 0 {
        return 1.0;
    }
    let upper = successes.min(draws);
    if k > upper || draws > population || successes > population {
        return 0.0;
    }
    let failures = population - successes;
    let lower = k.max(draws.saturating_sub(failures));
    let denom = ln_binomial(population as u64, draws as u64);

    let p: f64 = (lower..=upper)
        .map(|x| {
            (ln_binomial(successes as u64, x as u64) + ln_binomial(failures as u64, (draws - x) as u64) - denom).exp()
        })
        .sum();
    p.min(1.0)
}

/// Test every gene set for over-representation of `query` within `universe`
///
/// Query genes outside the universe are ignored. Sets without any query gene
/// are not reported. Terms come back by ascending p-value.
pub fn over_representation(
    query: &[&str],
    universe: &[&str],
    sets: &GeneSetCollection,
    params: &OraParams,
) -> Vec<EnrichmentTerm> {
    let universe: HashSet<&str> = universe.iter().copied().collect();
    let query: HashSet<&str> = query.iter().copied().filter(|g| universe.contains(g)).collect();
    let n_universe = universe.len();
    let n_query = query.len();
    if n_query == 0 {
        return Vec::new();
    }

    let mut terms: Vec<EnrichmentTerm> = sets
        .restrict_to(&universe)
        .filter_by_size(params.min_size, params.max_size)
        .iter()
        .filter_map(|set| {
            let overlap: Vec<String> = set.genes.iter().filter(|g| query.contains(g.as_str())).cloned().collect();
            if overlap.is_empty() {
                return None;
            }
            let gene_ratio = overlap.len() as f64 / n_query as f64;
            let bg_ratio = set.len() as f64 / n_universe as f64;
            Some(EnrichmentTerm {
                term: set.name.clone(),
                description: set.description.clone(),
                set_size: set.len(),
                hits: overlap.len(),
                gene_ratio,
                bg_ratio,
                enrichment_score: gene_ratio / bg_ratio,
                nes: f64::NAN,
                pvalue: hypergeometric_upper_tail(overlap.len(), n_universe, set.len(), n_query),
                padj: f64::NAN,
                genes: overlap,
            })
        })
        .collect();

    let pvalues: Vec<f64> = terms.iter().map(|t| t.pvalue).collect();
    for (term, padj) in terms.iter_mut().zip(benjamini_hochberg(&pvalues)) {
        term.padj = padj;
    }
    terms.sort_by(|a, b| cmp_nan_last(a.pvalue, b.pvalue).then_with(|| a.term.cmp(&b.term)));
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upper_tail_known_values() {
        // phyper(2, 10, 90, 10, lower.tail = FALSE)
        assert!((hypergeometric_upper_tail(3, 100, 10, 10) - 0.06001858177500578).abs() < 1e-10);
        assert!((hypergeometric_upper_tail(1, 100, 10, 10) - 0.6695237889132748).abs() < 1e-10);
        assert!((hypergeometric_upper_tail(6, 40, 6, 8) - 7.2947441368494e-06).abs() < 1e-12);
        assert_eq!(hypergeometric_upper_tail(0, 100, 10, 10), 1.0);
        assert_eq!(hypergeometric_upper_tail(11, 100, 10, 10), 0.0);
    }

    #[test]
    fn test_over_representation() {
        let universe: Vec<String> = (0..40).map(|i| format!("G{}", i)).collect();
        let universe: Vec<&str> = universe.iter().map(|s| s.as_str()).collect();
        let sets = GeneSetCollection::from_gmt_str(
            "HIT\tna\tG0\tG1\tG2\tG3\tG4\tG5\n\
             MISS\tna\tG30\tG31\tG32\n\
             PARTIAL\tna\tG0\tG20\tG21\tG22\tNOT_IN_UNIVERSE\n",
        )
        .unwrap();
        let query = ["G0", "G1", "G2", "G3", "G4", "G5", "G6", "G7", "UNKNOWN"];

        let terms = over_representation(&query, &universe, &sets, &OraParams { min_size: 3, max_size: 10 });
        assert_eq!(terms.len(), 2);
        assert_eq!(terms[0].term, "HIT");
        assert_eq!(terms[0].hits, 6);
        assert_eq!(terms[0].genes.join("/"), "G0/G1/G2/G3/G4/G5");
        assert!((terms[0].gene_ratio - 0.75).abs() < 1e-12);
        assert!((terms[0].bg_ratio - 0.15).abs() < 1e-12);
        assert!((terms[0].pvalue - 7.2947441368494e-06).abs() < 1e-12);

        let partial = &terms[1];
        assert_eq!(partial.set_size, 4);
        assert!(partial.padj >= partial.pvalue);
    }

    #[test]
    fn test_empty_query() {
        let sets = GeneSetCollection::from_gmt_str("A\tna\tG1\tG2\n").unwrap();
        assert!(over_representation(&[], &["G1", "G2"], &sets, &OraParams::default()).is_empty());
    }
}
