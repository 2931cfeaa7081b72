use std::fs::File;
use std::io::{BufRead, BufReader};

use camino::Utf8Path;

use crate::error::GeoflatError;
use crate::table::Table;

/// The one section whose lines carry no column header row.
pub const HEADING_SECTION: &str = "Heading";

/// Section tables of one flat file, in the order their headers first appeared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionTables {
    entries: Vec<(String, Table)>,
}

impl SectionTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `table` under `name`. A repeated name keeps its original position
    /// and takes the new table.
    pub fn insert(&mut self, name: String, table: Table) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = table,
            None => self.entries.push((name, table)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Table> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, table)| table)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for SectionTables {
    type Item = (String, Table);
    type IntoIter = std::vec::IntoIter<(String, Table)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Returns the section name if `line` is a `[Name]` header line.
pub fn section_header(line: &str) -> Option<&str> {
    line.trim_end()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .map(str::trim)
}

pub fn parse_file(path: &Utf8Path) -> Result<SectionTables, GeoflatError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| GeoflatError::Filesystem(format!("open {path}: {err}")))?;
    parse_sections(BufReader::new(file), path.as_str())
}

/// Splits a flat dataset into its sections in a single pass.
///
/// Lines before the first header are preamble and are dropped. The open section
/// is always finalized at end of input, so a trailing header with no data still
/// yields an (empty) table. `source` only labels parse errors.
pub fn parse_sections<R: BufRead>(mut reader: R, source: &str) -> Result<SectionTables, GeoflatError> {
    let mut tables = SectionTables::new();
    let mut current: Option<String> = None;
    let mut buffer = String::new();
    let mut raw = Vec::new();

    loop {
        raw.clear();
        let read = reader
            .read_until(b'\n', &mut raw)
            .map_err(|err| GeoflatError::Filesystem(format!("read {source}: {err}")))?;
        if read == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&raw);

        if let Some(name) = section_header(&line) {
            if let Some(open) = current.take() {
                let table = finalize(&open, &buffer, source)?;
                tables.insert(open, table);
            }
            buffer.clear();
            current = Some(name.to_string());
            continue;
        }

        if current.is_some() {
            buffer.push_str(line.trim_end_matches(['\n', '\r']));
            buffer.push('\n');
        }
    }

    if let Some(open) = current {
        let table = finalize(&open, &buffer, source)?;
        tables.insert(open, table);
    }
    Ok(tables)
}

fn finalize(section: &str, buffer: &str, source: &str) -> Result<Table, GeoflatError> {
    Table::from_tsv(buffer, section != HEADING_SECTION).map_err(|message| GeoflatError::Parse {
        section: section.to_string(),
        file: source.to_string(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn parse(text: &str) -> SectionTables {
        parse_sections(text.as_bytes(), "inline").unwrap()
    }

    #[test]
    fn header_detection() {
        assert_eq!(section_header("[Probes]\n"), Some("Probes"));
        assert_eq!(section_header("[ Control Probes ]\t\t\r\n"), Some("Control Probes"));
        assert_eq!(section_header("Probes]"), None);
        assert_eq!(section_header("[Probes"), None);
        assert_eq!(section_header(" [Probes]"), None);
    }

    #[test]
    fn splits_two_sections() {
        let tables = parse("[A]\nh1\tval1\n[B]\n");
        let a = tables.get("A").unwrap();
        assert_eq!(a.columns(), ["h1".to_string()].as_slice());
        assert_eq!(a.rows(), &[vec!["val1".to_string()]]);
        let b = tables.get("B").unwrap();
        assert!(b.is_empty());
        assert!(b.columns().is_empty());
    }

    #[test]
    fn preamble_before_first_header_is_dropped() {
        let tables = parse("generated by tool\nversion\t2\n[A]\nx\n1\n");
        assert_eq!(tables.names().collect::<Vec<_>>(), vec!["A"]);
        assert_eq!(tables.get("A").unwrap().len(), 1);
    }

    #[test]
    fn heading_has_no_header_row() {
        let tables = parse("[Heading]\nDate\t2010\nNormalization\tnone\n[Probes]\nId\n1\n");
        let heading = tables.get(HEADING_SECTION).unwrap();
        assert_eq!(heading.columns(), ["0".to_string(), "1".to_string()].as_slice());
        assert_eq!(heading.len(), 2);
        assert_eq!(heading.rows()[0][0], "Date");
    }

    #[test]
    fn consecutive_headers_yield_empty_first_table() {
        let tables = parse("[A]\n[B]\nk\nv\n");
        assert!(tables.get("A").unwrap().is_empty());
        assert_eq!(tables.get("B").unwrap().len(), 1);
    }

    #[test]
    fn crlf_input_is_accepted() {
        let tables = parse("[A]\r\nh1\th2\r\n1\t2\r\n");
        let a = tables.get("A").unwrap();
        assert_eq!(a.rows(), &[vec!["1".to_string(), "2".to_string()]]);
    }

    #[test]
    fn wide_row_names_the_section() {
        let err = parse_sections("[Controls]\na\n1\t2\n".as_bytes(), "f.txt").unwrap_err();
        assert_matches!(
            err,
            GeoflatError::Parse { ref section, ref file, .. } if section == "Controls" && file == "f.txt"
        );
    }

    #[test]
    fn no_headers_means_no_tables() {
        assert!(parse("just\ttext\n").is_empty());
    }
}
