//! Gene set collections read from GMT files

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// A named set of gene symbols
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneSet {
    pub name: String,
    pub description: String,
    /// Unique genes in file order
    pub genes: Vec<String>,
}

impl GeneSet {
    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }
}

/// Pathway name -> gene set, iterated in name order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneSetCollection {
    sets: BTreeMap<String, GeneSet>,
}

impl GeneSetCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse GMT text: `name<TAB>description<TAB>gene1<TAB>gene2...`
    pub fn from_gmt_str(text: &str) -> Result<Self> {
        let mut collection = Self::new();
        for (idx, line) in text.lines().enumerate() {
            collection.parse_line(line, idx + 1)?;
        }
        Ok(collection)
    }

    pub fn read_gmt<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(&path)?);
        let mut collection = Self::new();
        for (idx, line) in reader.lines().enumerate() {
            collection.parse_line(&line?, idx + 1)?;
        }
        log::info!("Read {} gene sets from {}", collection.len(), path.as_ref().display());
        Ok(collection)
    }

    fn parse_line(&mut self, line: &str, line_no: usize) -> Result<()> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() || line.starts_with('#') {
            return Ok(());
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 {
            return Err(PipelineError::InvalidGeneSet {
                line: line_no,
                reason: format!("expected at least 3 tab-separated fields, found {}", fields.len()),
            });
        }

        let name = fields[0].trim();
        if name.is_empty() {
            return Err(PipelineError::InvalidGeneSet {
                line: line_no,
                reason: "empty gene set name".to_string(),
            });
        }
        if self.sets.contains_key(name) {
            return Err(PipelineError::InvalidGeneSet {
                line: line_no,
                reason: format!("duplicate gene set '{}'", name),
            });
        }

        let mut seen = HashSet::new();
        let genes: Vec<String> = fields[2..]
            .iter()
            .map(|g| g.trim())
            .filter(|g| !g.is_empty() && seen.insert(*g))
            .map(|g| g.to_string())
            .collect();

        self.sets.insert(
            name.to_string(),
            GeneSet {
                name: name.to_string(),
                description: fields[1].trim().to_string(),
                genes,
            },
        );
        Ok(())
    }

    pub fn insert(&mut self, set: GeneSet) -> Result<()> {
        if self.sets.contains_key(&set.name) {
            return Err(PipelineError::InvalidInput {
                reason: format!("duplicate gene set '{}'", set.name),
            });
        }
        self.sets.insert(set.name.clone(), set);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&GeneSet> {
        self.sets.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeneSet> {
        self.sets.values()
    }

    /// Union of two collections; set names must not clash
    pub fn merge(mut self, other: GeneSetCollection) -> Result<Self> {
        for set in other.sets.into_values() {
            self.insert(set)?;
        }
        Ok(self)
    }

    /// Keep only genes present in `universe`; sets left empty are removed
    pub fn restrict_to(&self, universe: &HashSet<&str>) -> Self {
        let sets = self
            .sets
            .iter()
            .filter_map(|(name, set)| {
                let genes: Vec<String> = set
                    .genes
                    .iter()
                    .filter(|g| universe.contains(g.as_str()))
                    .cloned()
                    .collect();
                (!genes.is_empty()).then(|| {
                    (
                        name.clone(),
                        GeneSet {
                            name: name.clone(),
                            description: set.description.clone(),
                            genes,
                        },
                    )
                })
            })
            .collect();
        Self { sets }
    }

    /// Keep sets whose size lies within [min_size, max_size]
    pub fn filter_by_size(&self, min_size: usize, max_size: usize) -> Self {
        let sets = self
            .sets
            .iter()
            .filter(|(_, set)| set.len() >= min_size && set.len() <= max_size)
            .map(|(name, set)| (name.clone(), set.clone()))
            .collect();
        Self { sets }
    }
}
