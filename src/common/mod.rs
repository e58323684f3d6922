//! Genes called differentially expressed in every contrast

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::contrast::{ContrastResult, DegThresholds, Regulation};
use crate::error::{PipelineError, Result};
use crate::io::write_records;

/// Direction of a common DEG across contrasts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Change {
    Up,
    Down,
    /// Up in some contrasts and down in others
    Mixed,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::Up => write!(f, "up"),
            Change::Down => write!(f, "down"),
            Change::Mixed => write!(f, "mixed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonDeg {
    pub gene: String,
    pub change: Change,
}

/// Genes that are DEGs in all `results`, sorted by gene label
pub fn common_degs(results: &[ContrastResult], thresholds: &DegThresholds) -> Result<Vec<CommonDeg>> {
    if results.is_empty() {
        return Err(PipelineError::EmptyData {
            reason: "no contrast results to intersect".to_string(),
        });
    }

    let mut calls: BTreeMap<&str, Vec<Regulation>> = BTreeMap::new();
    for result in results {
        // one call per gene and contrast
        let mut seen: HashMap<&str, Regulation> = HashMap::new();
        for row in result.degs(thresholds) {
            seen.entry(row.label()).or_insert_with(|| thresholds.classify(row));
        }
        for (gene, regulation) in seen {
            calls.entry(gene).or_default().push(regulation);
        }
    }

    let common: Vec<CommonDeg> = calls
        .into_iter()
        .filter(|(_, regs)| regs.len() == results.len())
        .map(|(gene, regs)| {
            let change = if regs.iter().all(|r| *r == Regulation::Up) {
                Change::Up
            } else if regs.iter().all(|r| *r == Regulation::Down) {
                Change::Down
            } else {
                Change::Mixed
            };
            CommonDeg {
                gene: gene.to_string(),
                change,
            }
        })
        .collect();

    log::info!("{} genes are DEGs in all {} contrasts", common.len(), results.len());
    Ok(common)
}

/// Write `gene,change` rows
pub fn write_common_degs<P: AsRef<Path>>(path: P, degs: &[CommonDeg]) -> Result<()> {
    write_records(path, degs)
}
