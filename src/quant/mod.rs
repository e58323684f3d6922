//! Gene-level counts from Salmon transcript quantifications

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::annotation::strip_version;
use crate::data::CountMatrix;
use crate::error::{PipelineError, Result};
use crate::io::open_delimited;

/// One row of a Salmon `quant.sf`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuantRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Length")]
    pub length: f64,
    #[serde(rename = "EffectiveLength")]
    pub effective_length: f64,
    #[serde(rename = "TPM")]
    pub tpm: f64,
    #[serde(rename = "NumReads")]
    pub num_reads: f64,
}

pub fn read_quant_sf<P: AsRef<Path>>(path: P) -> Result<Vec<QuantRecord>> {
    let mut reader = open_delimited(&path, true)?;
    let mut records = Vec::new();
    for record in reader.deserialize() {
        let record: QuantRecord = record?;
        if !record.num_reads.is_finite() || record.num_reads < 0.0 {
            return Err(PipelineError::InvalidQuant {
                reason: format!(
                    "{}: transcript {} has invalid NumReads {}",
                    path.as_ref().display(),
                    record.name,
                    record.num_reads
                ),
            });
        }
        records.push(record);
    }
    if records.is_empty() {
        return Err(PipelineError::InvalidQuant {
            reason: format!("{} contains no transcripts", path.as_ref().display()),
        });
    }
    Ok(records)
}

/// A sample name and the path of its `quant.sf`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantSample {
    pub sample: String,
    pub path: PathBuf,
}

/// Header names recognised in the first row of a tx2gene table
const TX2GENE_HEADERS: [&str; 7] = ["tx", "txname", "tx_id", "transcript", "transcript_id", "target_id", "name"];

/// Transcript to gene mapping
#[derive(Debug, Clone, Default)]
pub struct TxToGene {
    genes: HashMap<String, String>,
    ignore_version: bool,
}

impl TxToGene {
    pub fn from_pairs<I, S, T>(pairs: I, ignore_version: bool) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let mut genes = HashMap::new();
        for (tx, gene) in pairs {
            let tx = tx.as_ref().trim();
            let tx = if ignore_version { strip_version(tx) } else { tx };
            genes.entry(tx.to_string()).or_insert_with(|| gene.as_ref().trim().to_string());
        }
        Self { genes, ignore_version }
    }

    /// Read a two-column CSV/TSV table; a header row is detected and skipped
    pub fn from_path<P: AsRef<Path>>(path: P, ignore_version: bool) -> Result<Self> {
        let mut reader = open_delimited(&path, false)?;
        let mut pairs = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record?;
            let (Some(tx), Some(gene)) = (record.get(0), record.get(1)) else {
                return Err(PipelineError::InvalidQuant {
                    reason: format!("{}: row {} needs transcript and gene columns", path.as_ref().display(), idx + 1),
                });
            };
            if idx == 0 && TX2GENE_HEADERS.contains(&tx.to_ascii_lowercase().as_str()) {
                continue;
            }
            pairs.push((tx.to_string(), gene.to_string()));
        }

        let map = Self::from_pairs(pairs, ignore_version);
        if map.is_empty() {
            return Err(PipelineError::InvalidQuant {
                reason: format!("{} contains no transcript to gene pairs", path.as_ref().display()),
            });
        }
        log::info!("Loaded tx2gene with {} transcripts", map.len());
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    pub fn gene_for(&self, transcript: &str) -> Option<&str> {
        let key = if self.ignore_version {
            strip_version(transcript)
        } else {
            transcript
        };
        self.genes.get(key).map(|g| g.as_str())
    }
}

/// Sum transcript NumReads per gene for each sample and round to counts
///
/// Genes are sorted by id, samples keep the given order. Transcripts absent
/// from the map are dropped.
pub fn import_salmon(samples: &[QuantSample], tx2gene: &TxToGene) -> Result<CountMatrix> {
    if samples.is_empty() {
        return Err(PipelineError::EmptyData {
            reason: "no Salmon samples given".to_string(),
        });
    }

    let mut per_sample: Vec<HashMap<String, f64>> = Vec::with_capacity(samples.len());
    let mut gene_ids: BTreeMap<String, usize> = BTreeMap::new();
    for sample in samples {
        let records = read_quant_sf(&sample.path)?;
        let mut sums: HashMap<String, f64> = HashMap::new();
        let mut unmapped = 0;
        for record in &records {
            match tx2gene.gene_for(&record.name) {
                Some(gene) => {
                    *sums.entry(gene.to_string()).or_insert(0.0) += record.num_reads;
                    gene_ids.entry(gene.to_string()).or_insert(0);
                }
                None => unmapped += 1,
            }
        }
        if unmapped > 0 {
            log::warn!(
                "{}: {} of {} transcripts missing from tx2gene, dropped",
                sample.sample,
                unmapped,
                records.len()
            );
        }
        log::debug!("{}: {} genes from {} transcripts", sample.sample, sums.len(), records.len());
        per_sample.push(sums);
    }

    if gene_ids.is_empty() {
        return Err(PipelineError::InvalidQuant {
            reason: "no transcript matched the tx2gene table".to_string(),
        });
    }
    for (row, idx) in gene_ids.values_mut().enumerate() {
        *idx = row;
    }

    let mut counts = Array2::zeros((gene_ids.len(), samples.len()));
    for (j, sums) in per_sample.iter().enumerate() {
        for (gene, &reads) in sums {
            if let Some(&i) = gene_ids.get(gene) {
                counts[[i, j]] = reads.max(0.0).round() as u64;
            }
        }
    }

    log::info!("Imported {} genes across {} samples", gene_ids.len(), samples.len());
    CountMatrix::from_integers(
        counts,
        gene_ids.into_keys().collect(),
        samples.iter().map(|s| s.sample.clone()).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const HEADER: &str = "Name\tLength\tEffectiveLength\tTPM\tNumReads";

    fn write_quant(dir: &Path, name: &str, rows: &[(&str, f64)]) -> PathBuf {
        let mut text = format!("{}\n", HEADER);
        for (tx, reads) in rows {
            text.push_str(&format!("{}\t1500\t1320.5\t12.3\t{}\n", tx, reads));
        }
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_read_quant_sf() {
        let dir = tempdir().unwrap();
        let path = write_quant(dir.path(), "quant.sf", &[("ENST1.1", 10.4), ("ENST2.3", 0.0)]);
        let records = read_quant_sf(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "ENST1.1");
        assert_eq!(records[0].effective_length, 1320.5);
        assert_eq!(records[0].num_reads, 10.4);
    }

    #[test]
    fn test_tx2gene_header_detection() {
        let dir = tempdir().unwrap();
        let with_header = dir.path().join("tx2gene.csv");
        fs::write(&with_header, "TXNAME,GENEID\nENST1.1,ENSG1\nENST2.3,ENSG1\n").unwrap();
        let without_header = dir.path().join("tx2gene.tsv");
        fs::write(&without_header, "ENST1.1\tENSG1\nENST3.1\tENSG2\n").unwrap();

        let map = TxToGene::from_path(&with_header, false).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.gene_for("ENST2.3"), Some("ENSG1"));
        assert_eq!(map.gene_for("ENST2"), None);

        let map = TxToGene::from_path(&without_header, true).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.gene_for("ENST3.7"), Some("ENSG2"));
    }

    #[test]
    fn test_import_salmon() {
        let dir = tempdir().unwrap();
        let a = write_quant(dir.path(), "a.sf", &[("ENST1.1", 10.4), ("ENST2.1", 4.7), ("ENST3.1", 7.0), ("ENST9.1", 3.0)]);
        let b = write_quant(dir.path(), "b.sf", &[("ENST1.2", 1.2), ("ENST2.2", 0.0), ("ENST3.2", 30.5)]);
        let tx2gene = TxToGene::from_pairs(
            vec![("ENST1", "ENSG_B"), ("ENST2", "ENSG_B"), ("ENST3", "ENSG_A")],
            true,
        );
        let samples = vec![
            QuantSample {
                sample: "ctrl".to_string(),
                path: a,
            },
            QuantSample {
                sample: "ko".to_string(),
                path: b,
            },
        ];

        let matrix = import_salmon(&samples, &tx2gene).unwrap();
        assert_eq!(matrix.gene_ids(), &["ENSG_A".to_string(), "ENSG_B".to_string()]);
        assert_eq!(matrix.sample_ids(), &["ctrl".to_string(), "ko".to_string()]);
        assert_eq!(matrix.counts()[[0, 0]], 7.0);
        assert_eq!(matrix.counts()[[1, 0]], 15.0);
        assert_eq!(matrix.counts()[[0, 1]], 31.0);
        assert_eq!(matrix.counts()[[1, 1]], 1.0);
    }

    #[test]
    fn test_import_without_matches_fails() {
        let dir = tempdir().unwrap();
        let a = write_quant(dir.path(), "a.sf", &[("ENST1.1", 10.0)]);
        let tx2gene = TxToGene::from_pairs(vec![("ENST5", "ENSG5")], false);
        let samples = vec![QuantSample {
            sample: "a".to_string(),
            path: a,
        }];
        assert!(import_salmon(&samples, &tx2gene).is_err());
    }
}
