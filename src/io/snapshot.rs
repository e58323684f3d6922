//! JSON snapshots of intermediate objects

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;

/// Write `value` as pretty JSON
pub fn write_json<P: AsRef<Path>, T: Serialize + ?Sized>(path: P, value: &T) -> Result<()> {
    let writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(writer, value)?;
    log::debug!("Wrote snapshot {}", path.as_ref().display());
    Ok(())
}

pub fn read_json<P: AsRef<Path>, T: DeserializeOwned>(path: P) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// JSON writes NaN as `null`; read it back as NaN
pub fn nullable_f64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

pub fn nullable_f64_vec<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<f64>, D::Error> {
    let values = Vec::<Option<f64>>::deserialize(deserializer)?;
    Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contrast::{ContrastResult, ContrastRow};
    use tempfile::tempdir;

    #[derive(Serialize, Deserialize)]
    struct Values {
        #[serde(deserialize_with = "nullable_f64_vec")]
        values: Vec<f64>,
    }

    #[test]
    fn test_nan_survives_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("values.json");
        write_json(&path, &Values { values: vec![1.0, f64::NAN] }).unwrap();
        let back: Values = read_json(&path).unwrap();
        assert_eq!(back.values[0], 1.0);
        assert!(back.values[1].is_nan());
    }

    #[test]
    fn test_contrast_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("contrast.json");
        let result = ContrastResult {
            status_column: "status".to_string(),
            numerator: "b".to_string(),
            denominator: "a".to_string(),
            rows: vec![ContrastRow {
                gene_id: "g1".to_string(),
                symbol: None,
                base_mean: 0.0,
                log2_fold_change: f64::NAN,
                lfc_se: f64::NAN,
                stat: f64::NAN,
                pvalue: f64::NAN,
                padj: f64::NAN,
            }],
        };
        write_json(&path, &result).unwrap();
        let back: ContrastResult = read_json(&path).unwrap();
        assert_eq!(back.label(), "b_vs_a");
        assert!(back.rows[0].padj.is_nan());
    }
}
