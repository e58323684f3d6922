//! Delimited table reading and writing for counts, metadata and results

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ndarray::{Array2, ArrayView2};

use crate::contrast::{ContrastResult, ContrastRow};
use crate::data::{CountMatrix, ExpressionDataSet, SampleMetadata};
use crate::error::{PipelineError, Result};

/// Tab when the first line contains one, otherwise comma
pub fn sniff_delimiter<P: AsRef<Path>>(path: P) -> Result<u8> {
    let mut first = String::new();
    BufReader::new(File::open(path)?).read_line(&mut first)?;
    Ok(if first.contains('\t') { b'\t' } else { b',' })
}

/// Open a CSV or TSV file with quoted fields allowed
pub fn open_delimited<P: AsRef<Path>>(path: P, has_headers: bool) -> Result<::csv::Reader<File>> {
    let delimiter = sniff_delimiter(&path)?;
    let reader = ::csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(has_headers)
        .trim(::csv::Trim::All)
        .comment(Some(b'#'))
        .from_path(path)?;
    Ok(reader)
}

fn writer_for<P: AsRef<Path>>(path: P) -> Result<::csv::Writer<File>> {
    let is_tsv = path
        .as_ref()
        .extension()
        .map(|e| e.eq_ignore_ascii_case("tsv") || e.eq_ignore_ascii_case("txt"))
        .unwrap_or(false);
    let writer = ::csv::WriterBuilder::new()
        .delimiter(if is_tsv { b'\t' } else { b',' })
        .from_path(path)?;
    Ok(writer)
}

/// Read a count matrix: first column gene ids, header row sample ids
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let mut reader = open_delimited(&path, true)?;
    let header = reader.headers()?.clone();
    if header.len() < 2 {
        return Err(PipelineError::InvalidCountMatrix {
            reason: "Not enough columns in header".to_string(),
        });
    }
    let sample_ids: Vec<String> = header.iter().skip(1).map(|s| s.to_string()).collect();
    let n_samples = sample_ids.len();

    let mut gene_ids = Vec::new();
    let mut values = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() != n_samples + 1 {
            return Err(PipelineError::InvalidCountMatrix {
                reason: format!(
                    "Row {} has {} columns, expected {}",
                    gene_ids.len() + 2,
                    record.len(),
                    n_samples + 1
                ),
            });
        }
        gene_ids.push(record[0].to_string());
        for field in record.iter().skip(1) {
            let value = field.parse::<f64>().map_err(|_| PipelineError::InvalidCountMatrix {
                reason: format!("Invalid count value '{}' for gene '{}'", field, &record[0]),
            })?;
            values.push(value);
        }
    }

    if gene_ids.is_empty() {
        return Err(PipelineError::EmptyData {
            reason: "No genes found in count matrix".to_string(),
        });
    }

    let counts = Array2::from_shape_vec((gene_ids.len(), n_samples), values).map_err(|e| {
        PipelineError::InvalidCountMatrix {
            reason: e.to_string(),
        }
    })?;
    CountMatrix::new(counts, gene_ids, sample_ids)
}

/// Read sample metadata: first column sample ids, remaining columns attributes
///
/// Every column is stored as categorical; columns whose values all parse as
/// finite numbers are also available as numeric covariates.
pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<SampleMetadata> {
    let mut reader = open_delimited(&path, true)?;
    let header = reader.headers()?.clone();
    let column_names: Vec<String> = header.iter().skip(1).map(|s| s.to_string()).collect();

    let mut sample_ids = Vec::new();
    let mut columns: Vec<Vec<String>> = vec![Vec::new(); column_names.len()];
    for record in reader.records() {
        let record = record?;
        if record.len() != column_names.len() + 1 {
            return Err(PipelineError::InvalidMetadata {
                reason: format!(
                    "Row {} has {} columns, expected {}",
                    sample_ids.len() + 2,
                    record.len(),
                    column_names.len() + 1
                ),
            });
        }
        sample_ids.push(record[0].to_string());
        for (k, field) in record.iter().skip(1).enumerate() {
            columns[k].push(field.to_string());
        }
    }

    if sample_ids.is_empty() {
        return Err(PipelineError::EmptyData {
            reason: "No samples found in metadata".to_string(),
        });
    }

    let mut metadata = SampleMetadata::new(sample_ids);
    for (name, values) in column_names.iter().zip(columns) {
        let numeric: Option<Vec<f64>> = values
            .iter()
            .map(|v| v.parse::<f64>().ok().filter(|x| x.is_finite()))
            .collect();
        if let Some(numeric) = numeric {
            metadata.add_covariate(name, numeric)?;
        }
        metadata.add_condition(name, values)?;
    }
    Ok(metadata)
}

/// Write a contrast result table (CSV, or TSV for .tsv/.txt paths)
pub fn write_contrast_result<P: AsRef<Path>>(path: P, result: &ContrastResult) -> Result<()> {
    let mut writer = writer_for(&path)?;
    for row in result.sorted_by_padj() {
        writer.serialize(row)?;
    }
    writer.flush()?;
    log::debug!("Wrote {} rows to {}", result.len(), path.as_ref().display());
    Ok(())
}

/// Read a contrast result table written by [`write_contrast_result`]
///
/// The contrast levels are taken from a `<numerator>_vs_<denominator>` file stem when present.
pub fn read_contrast_result<P: AsRef<Path>>(path: P) -> Result<ContrastResult> {
    let mut reader = open_delimited(&path, true)?;
    let rows = reader
        .deserialize::<ContrastRow>()
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let stem = path
        .as_ref()
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let (numerator, denominator) = match stem.split_once("_vs_") {
        Some((num, den)) => (num.to_string(), den.to_string()),
        None => (stem.clone(), String::new()),
    };

    Ok(ContrastResult {
        status_column: String::new(),
        numerator,
        denominator,
        rows,
    })
}

/// Write a count matrix in the layout [`read_count_matrix`] reads
pub fn write_count_matrix<P: AsRef<Path>>(path: P, counts: &CountMatrix) -> Result<()> {
    write_gene_table(path, counts.gene_ids(), counts.sample_ids(), counts.counts(), |v| format!("{}", v))
}

/// Write normalized counts with a gene id column
pub fn write_normalized_counts<P: AsRef<Path>>(path: P, dataset: &ExpressionDataSet) -> Result<()> {
    let normalized = dataset.normalized_counts().ok_or_else(|| PipelineError::InvalidInput {
        reason: "size factors must be estimated before writing normalized counts".to_string(),
    })?;
    let counts = dataset.counts();
    write_gene_table(path, counts.gene_ids(), counts.sample_ids(), normalized.view(), |v| format!("{:.4}", v))
}

fn write_gene_table<P, F>(path: P, gene_ids: &[String], sample_ids: &[String], values: ArrayView2<f64>, format: F) -> Result<()>
where
    P: AsRef<Path>,
    F: Fn(f64) -> String,
{
    let mut writer = writer_for(path)?;
    let mut header = vec!["gene_id".to_string()];
    header.extend(sample_ids.iter().cloned());
    writer.write_record(&header)?;

    for (i, gene_id) in gene_ids.iter().enumerate() {
        let mut record = vec![gene_id.clone()];
        record.extend(values.row(i).iter().map(|&v| format(v)));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write any serializable rows as a table
pub fn write_records<P, T>(path: P, records: &[T]) -> Result<()>
where
    P: AsRef<Path>,
    T: serde::Serialize,
{
    let mut writer = writer_for(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}
