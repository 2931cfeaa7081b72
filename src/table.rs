use std::collections::HashMap;
use std::io;

use csv::{ReaderBuilder, WriterBuilder};

/// A rectangular table of string cells with named columns.
///
/// Headerless tables get positional names (`0`, `1`, ...), so every table can be
/// merged and written the same way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Builds a table, padding short rows with empty cells.
    ///
    /// Returns an error message naming the first row wider than `columns`.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, String> {
        let width = columns.len();
        let mut padded = Vec::with_capacity(rows.len());
        for (index, mut row) in rows.into_iter().enumerate() {
            if row.len() > width {
                return Err(format!(
                    "row {} has {} fields, expected at most {width}",
                    index + 1,
                    row.len()
                ));
            }
            row.resize(width, String::new());
            padded.push(row);
        }
        Ok(Self {
            columns,
            rows: padded,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Parses tab-separated text. Blank lines are skipped; `"` quotes fields.
    ///
    /// A quoted field that is still open at the end of `text` is an error.
    pub fn from_tsv(text: &str, has_header: bool) -> Result<Self, String> {
        if let Some(line) = unterminated_quote(text) {
            return Err(format!("quoted field opened on line {line} is never closed"));
        }
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut records = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| err.to_string())?;
            if record.len() == 1 && record[0].is_empty() {
                continue;
            }
            records.push(record.iter().map(str::to_string).collect::<Vec<_>>());
        }

        let mut records = records.into_iter();
        let Some(first) = records.next() else {
            return Ok(Self::default());
        };

        if has_header {
            Self::new(normalize_header(first), records.collect())
        } else {
            let columns = (0..first.len()).map(|index| index.to_string()).collect();
            Self::new(columns, std::iter::once(first).chain(records).collect())
        }
    }

    /// Concatenates tables row-wise.
    ///
    /// The result's columns are the union of the inputs' columns in order of first
    /// appearance; cells a table does not have are left empty.
    pub fn concat<'a, I>(tables: I) -> Self
    where
        I: IntoIterator<Item = &'a Table>,
    {
        let mut columns: Vec<String> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut rows = Vec::new();

        for table in tables {
            let mapping: Vec<usize> = table
                .columns
                .iter()
                .map(|column| {
                    *positions.entry(column.clone()).or_insert_with(|| {
                        columns.push(column.clone());
                        columns.len() - 1
                    })
                })
                .collect();
            for row in &table.rows {
                let mut merged = vec![String::new(); columns.len()];
                for (cell, &target) in row.iter().zip(&mapping) {
                    merged[target] = cell.clone();
                }
                rows.push(merged);
            }
        }

        let width = columns.len();
        for row in &mut rows {
            row.resize(width, String::new());
        }
        Self { columns, rows }
    }

    /// A copy of the table without the named columns. Names that are not present
    /// are ignored.
    pub fn without_columns(&self, names: &[&str]) -> Self {
        let keep: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, column)| !names.contains(&column.as_str()))
            .map(|(index, _)| index)
            .collect();
        Self {
            columns: keep.iter().map(|&index| self.columns[index].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| keep.iter().map(|&index| row[index].clone()).collect())
                .collect(),
        }
    }

    /// Writes the header row followed by every data row. A table without columns
    /// writes nothing.
    pub fn write_tsv<W: io::Write>(&self, writer: W) -> Result<(), csv::Error> {
        if self.columns.is_empty() {
            return Ok(());
        }
        let mut writer = WriterBuilder::new().delimiter(b'\t').from_writer(writer);
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Line (1-based) of a quoted field left open at end of input.
///
/// Follows the reader's rules: a quote only opens at the start of a field and
/// `""` inside a quoted field is an escaped quote.
fn unterminated_quote(text: &str) -> Option<usize> {
    let mut line = 1;
    let mut opened_on = None;
    let mut at_field_start = true;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if opened_on.is_some() {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                }
                '"' => opened_on = None,
                '\n' => line += 1,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if at_field_start => {
                opened_on = Some(line);
                at_field_start = false;
            }
            '\t' => at_field_start = true,
            '\n' => {
                line += 1;
                at_field_start = true;
            }
            _ => at_field_start = false,
        }
    }
    opened_on
}

/// Blank header cells become `Unnamed: <index>` and repeated names get a `.N`
/// suffix, so column names stay unique.
fn normalize_header(raw: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    raw.into_iter()
        .enumerate()
        .map(|(index, name)| {
            let name = if name.trim().is_empty() {
                format!("Unnamed: {index}")
            } else {
                name
            };
            let count = seen.entry(name.clone()).or_insert(0);
            let unique = if *count == 0 {
                name
            } else {
                format!("{name}.{count}")
            };
            *count += 1;
            unique
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn parses_header_and_rows() {
        let table = Table::from_tsv("h1\th2\na\tb\n\nc\td\n", true).unwrap();
        assert_eq!(table.columns(), strings(&["h1", "h2"]).as_slice());
        assert_eq!(table.rows(), &[strings(&["a", "b"]), strings(&["c", "d"])]);
    }

    #[test]
    fn headerless_columns_are_positional() {
        let table = Table::from_tsv("Descriptor\tHumanHT-12\nDate\t2010\n", false).unwrap();
        assert_eq!(table.columns(), strings(&["0", "1"]).as_slice());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn short_rows_are_padded_and_wide_rows_rejected() {
        let table = Table::from_tsv("a\tb\tc\n1\n", true).unwrap();
        assert_eq!(table.rows()[0], strings(&["1", "", ""]));

        let err = Table::from_tsv("a\n1\t2\n", true).unwrap_err();
        assert!(err.contains("row 1 has 2 fields"));
    }

    #[test]
    fn duplicate_and_blank_headers_are_made_unique() {
        let table = Table::from_tsv("x\tx\t\n1\t2\t3\n", true).unwrap();
        assert_eq!(table.columns(), strings(&["x", "x.1", "Unnamed: 2"]).as_slice());
    }

    #[test]
    fn open_quote_at_end_is_rejected() {
        let err = Table::from_tsv("id\tdesc\n1\t\"open\n2\tx\n", true).unwrap_err();
        assert!(err.contains("line 2"), "{err}");

        let closed = Table::from_tsv("id\tdesc\n1\t\"two\nlines\"\n2\ta \"b\" c\n", true).unwrap();
        assert_eq!(closed.rows()[0][1], "two\nlines");
        assert_eq!(closed.rows()[1][1], "a \"b\" c");
        assert!(unterminated_quote("a\t\"x \"\"y\"\" z\"\n").is_none());
    }

    #[test]
    fn concat_unions_columns_in_first_seen_order() {
        let first = Table::new(strings(&["a", "b"]), vec![strings(&["1", "2"])]).unwrap();
        let second = Table::new(strings(&["b", "c"]), vec![strings(&["3", "4"])]).unwrap();

        let merged = Table::concat([&first, &second]);
        assert_eq!(merged.columns(), strings(&["a", "b", "c"]).as_slice());
        assert_eq!(
            merged.rows(),
            &[strings(&["1", "2", ""]), strings(&["", "3", "4"])]
        );
    }

    #[test]
    fn without_columns_ignores_missing_names() {
        let table = Table::new(strings(&["a", "b", "c"]), vec![strings(&["1", "2", "3"])]).unwrap();
        let pruned = table.without_columns(&["b", "zzz"]);
        assert_eq!(pruned.columns(), strings(&["a", "c"]).as_slice());
        assert_eq!(pruned.rows(), &[strings(&["1", "3"])]);
    }

    #[test]
    fn writes_tab_separated_output() {
        let table = Table::new(strings(&["a", "b"]), vec![strings(&["1", "x y"])]).unwrap();
        let mut out = Vec::new();
        table.write_tsv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a\tb\n1\tx y\n");

        let mut empty = Vec::new();
        Table::default().write_tsv(&mut empty).unwrap();
        assert!(empty.is_empty());
    }
}
