use std::collections::HashMap;
use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::ThreadPool;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::domain::Accession;
use crate::error::GeoflatError;
use crate::layout::{Layout, TableKind, list_files_with_suffix, write_atomic_with, write_bytes_atomic};
use crate::sections::{SectionTables, parse_file};
use crate::table::Table;

pub const RAW_FILE_SUFFIX: &str = ".txt";
pub const PROBES_SECTION: &str = "Probes";

/// Descriptive and ontology columns left out of `Probes_PARTIAL.tsv`.
pub const PROBES_DROPPED_COLUMNS: [&str; 7] = [
    "Definition",
    "Ontology_Component",
    "Ontology_Process",
    "Obsolete_Probe_Id",
    "Probe_Sequence",
    "Synonyms",
    "Ontology_Function",
];

/// Collects per-file section tables for one run, keyed by section name.
#[derive(Debug, Default)]
pub struct SectionAccumulator {
    order: Vec<String>,
    tables: HashMap<String, Vec<Table>>,
}

impl SectionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one file's sections. Files must be added in discovery order.
    pub fn add_file(&mut self, sections: SectionTables) {
        for (name, table) in sections {
            self.tables
                .entry(name.clone())
                .or_insert_with(|| {
                    self.order.push(name);
                    Vec::new()
                })
                .push(table);
        }
    }

    /// Concatenates every section's tables in the order they were added.
    pub fn merge(&self) -> ProcessedDatasets {
        let tables = self
            .order
            .iter()
            .map(|name| {
                let parts = self.tables.get(name).map(Vec::as_slice).unwrap_or_default();
                (name.clone(), Table::concat(parts))
            })
            .collect();
        ProcessedDatasets { tables }
    }
}

/// Merged section tables of a whole run.
#[derive(Debug, Clone, Default)]
pub struct ProcessedDatasets {
    tables: Vec<(String, Table)>,
}

impl ProcessedDatasets {
    pub fn get(&self, name: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, table)| table)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Table)> {
        self.tables.iter().map(|(name, table)| (name.as_str(), table))
    }

    pub fn section_names(&self) -> Vec<String> {
        self.tables.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// The `Probes` table without [`PROBES_DROPPED_COLUMNS`].
    pub fn partial_probes(&self) -> Result<Table, GeoflatError> {
        self.get(PROBES_SECTION)
            .map(|probes| probes.without_columns(&PROBES_DROPPED_COLUMNS))
            .ok_or_else(|| GeoflatError::MissingSection(PROBES_SECTION.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyManifest {
    pub accession: String,
    pub created_at: String,
    pub sources: Vec<String>,
    pub sections: Vec<String>,
    pub outputs: Vec<OutputEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub section: String,
    pub kind: String,
    pub file: String,
    pub rows: usize,
}

impl AssemblyManifest {
    pub fn read(path: &Utf8Path) -> Result<Self, GeoflatError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| GeoflatError::Filesystem(format!("read {path}: {err}")))?;
        serde_json::from_str(&content)
            .map_err(|err| GeoflatError::Filesystem(format!("parse {path}: {err}")))
    }

    fn write(&self, path: &Utf8Path) -> Result<(), GeoflatError> {
        let content = serde_json::to_vec_pretty(self)
            .map_err(|err| GeoflatError::Filesystem(err.to_string()))?;
        write_bytes_atomic(path, &content)
    }
}

/// Raw flat files waiting in the base data directory, sorted by name.
pub fn discover_raw_files(layout: &Layout) -> Result<Vec<Utf8PathBuf>, GeoflatError> {
    list_files_with_suffix(&layout.base_dir(), RAW_FILE_SUFFIX)
}

/// Parses `files` on `pool`; results come back in the order of `files`.
pub fn parse_files(
    files: &[Utf8PathBuf],
    pool: &ThreadPool,
) -> Result<Vec<SectionTables>, GeoflatError> {
    pool.install(|| {
        files
            .par_iter()
            .map(|file| parse_file(file))
            .collect::<Result<Vec<_>, _>>()
    })
}

pub fn merge_files(parsed: Vec<SectionTables>) -> ProcessedDatasets {
    let mut accumulator = SectionAccumulator::new();
    for sections in parsed {
        accumulator.add_file(sections);
    }
    accumulator.merge()
}

/// Writes `table` to `path` atomically and returns its row count.
pub fn write_table(path: &Utf8Path, table: &Table) -> Result<usize, GeoflatError> {
    let bytes = write_atomic_with(path, |file| {
        table
            .write_tsv(&mut *file)
            .map_err(|err| GeoflatError::Filesystem(format!("write {path}: {err}")))?;
        file.metadata()
            .map(|meta| meta.len())
            .map_err(|err| GeoflatError::Filesystem(format!("stat {path}: {err}")))
    })?;
    tracing::info!(path = %path, rows = table.len(), bytes, "table written");
    Ok(table.len())
}

/// Persists every merged table as `<Section>_FULL.tsv`, the pruned probes table
/// as `Probes_PARTIAL.tsv`, then the assembly manifest.
///
/// The `Probes` section is checked before anything is written.
pub fn persist(
    layout: &Layout,
    accession: &Accession,
    datasets: &ProcessedDatasets,
    sources: &[Utf8PathBuf],
) -> Result<AssemblyManifest, GeoflatError> {
    let partial = datasets.partial_probes()?;

    let mut outputs = Vec::with_capacity(datasets.len() + 1);
    for (section, table) in datasets.iter() {
        outputs.push(write_output(layout, section, TableKind::Full, table)?);
    }
    outputs.push(write_output(layout, PROBES_SECTION, TableKind::Partial, &partial)?);

    let manifest = AssemblyManifest {
        accession: accession.as_str().to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
        sources: sources.iter().map(|path| path.to_string()).collect(),
        sections: datasets.section_names(),
        outputs,
    };
    manifest.write(&layout.assembly_manifest_path())?;
    Ok(manifest)
}

fn write_output(
    layout: &Layout,
    section: &str,
    kind: TableKind,
    table: &Table,
) -> Result<OutputEntry, GeoflatError> {
    let path = layout.tsv_path(section, kind);
    let rows = write_table(&path, table)?;
    Ok(OutputEntry {
        section: section.to_string(),
        kind: kind.to_string(),
        file: path.file_name().unwrap_or(path.as_str()).to_string(),
        rows,
    })
}

/// Removes consumed raw files. Failures are logged, never returned.
pub fn cleanup_raw_files(files: &[Utf8PathBuf]) -> usize {
    let mut removed = 0;
    for file in files {
        match fs::remove_file(file.as_std_path()) {
            Ok(()) => {
                removed += 1;
                tracing::warn!(path = %file, "removed raw flat file");
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(path = %file, "raw flat file already removed");
            }
            Err(err) => {
                tracing::warn!(path = %file, error = %err, "failed to remove raw flat file");
            }
        }
    }
    removed
}

/// Parse, merge, persist, then clean up: the whole assembler stage.
pub fn assemble(
    layout: &Layout,
    accession: &Accession,
    pool: &ThreadPool,
) -> Result<AssemblyManifest, GeoflatError> {
    let files = discover_raw_files(layout)?;
    tracing::info!(count = files.len(), dir = %layout.base_dir(), "parsing flat files");

    let parsed = parse_files(&files, pool)?;
    let datasets = merge_files(parsed);
    let manifest = persist(layout, accession, &datasets, &files)?;

    cleanup_raw_files(&files);
    Ok(manifest)
}

/// True when the assembly manifest exists and every file it lists is present.
pub fn is_assembled(layout: &Layout) -> bool {
    let Ok(manifest) = AssemblyManifest::read(&layout.assembly_manifest_path()) else {
        return false;
    };
    let tsv_dir = layout.tsv_dir();
    !manifest.outputs.is_empty()
        && manifest
            .outputs
            .iter()
            .all(|output| tsv_dir.join(&output.file).as_std_path().is_file())
}
