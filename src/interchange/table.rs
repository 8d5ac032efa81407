//! A rectangular table with a header row, read from and written to CSV.
//!
//! Fields are quoted when they contain a separator, a quote or a line break;
//! quotes inside quoted fields are doubled.

use std::{collections::HashMap, fs, path::Path};

use crate::domain::{CatalogError, ValidationError};

/// A header row and the data rows below it.
///
/// Every row has exactly as many cells as there are headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    positions: HashMap<String, usize>,
}

impl Table {
    /// An empty table with the given headers.
    #[must_use]
    pub fn new(headers: Vec<String>) -> Self {
        let positions = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), i))
            .collect();
        Self {
            headers,
            rows: Vec::new(),
            positions,
        }
    }

    /// Parse CSV text. The first record is the header row.
    ///
    /// Short rows are padded with empty cells; a row longer than the header
    /// is accepted only if the surplus cells are empty. Blank lines are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Table`] on an unterminated quoted field or
    /// a row with surplus non-empty cells.
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut records = parse_records(text)?.into_iter();
        let Some(headers) = records.next() else {
            return Ok(Self::default());
        };
        let headers = headers.into_iter().map(|h| h.trim().to_string()).collect();

        let mut table = Self::new(headers);
        for (line, record) in records.enumerate() {
            if record.iter().all(String::is_empty) {
                continue;
            }
            table.push_row(record).map_err(|e| match e {
                ValidationError::Table(message) => {
                    ValidationError::Table(format!("record {}: {message}", line + 2))
                }
                other => other,
            })?;
        }
        Ok(table)
    }

    /// Read and parse a CSV file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn read(path: &Path) -> Result<Self, CatalogError> {
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(&text)?)
    }

    /// Write the table as CSV.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write(&self, path: &Path) -> Result<(), CatalogError> {
        fs::write(path, self.to_csv())?;
        Ok(())
    }

    /// Append a row, padding it to the header width.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Table`] if the row has surplus non-empty
    /// cells.
    pub fn push_row(&mut self, row: Vec<String>) -> Result<(), ValidationError> {
        let surplus = row.get(self.headers.len()..).unwrap_or_default();
        if surplus.iter().any(|c| !c.is_empty()) {
            return Err(ValidationError::Table(format!(
                "{} cells for {} headers",
                row.len(),
                self.headers.len()
            )));
        }
        self.push_fitted(row);
        Ok(())
    }

    /// Append a row, dropping cells past the header width and padding
    /// short rows.
    pub(super) fn push_fitted(&mut self, mut row: Vec<String>) {
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    /// The header row.
    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// The data rows.
    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Position of a header, if present.
    #[must_use]
    pub fn position(&self, header: &str) -> Option<usize> {
        self.positions.get(header).copied()
    }

    /// The trimmed cell of `row` under `header`, or `""` if there is no such
    /// column.
    #[must_use]
    pub fn cell<'a>(&self, row: &'a [String], header: &str) -> &'a str {
        self.position(header)
            .and_then(|i| row.get(i))
            .map_or("", |cell| cell.trim())
    }

    /// Render as CSV with `\n` line endings.
    #[must_use]
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        for record in std::iter::once(&self.headers).chain(&self.rows) {
            let line = record
                .iter()
                .map(|value| csv_escape(value))
                .collect::<Vec<_>>()
                .join(",");
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        let escaped = value.replace('"', "\"\"");
        format!("\"{escaped}\"")
    } else {
        value.to_string()
    }
}

fn parse_records(text: &str) -> Result<Vec<Vec<String>>, ValidationError> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => quoted = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => quoted = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }

    if quoted {
        return Err(ValidationError::Table("unterminated quoted field".into()));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_fields() {
        let table = Table::parse(
            "CRE:id,CRE:name,CRE:description\r\n\
             111-111,\"Name, with comma\",\"line one\nline \"\"two\"\"\"\r\n",
        )
        .unwrap();

        assert_eq!(table.headers(), ["CRE:id", "CRE:name", "CRE:description"]);
        let row = &table.rows()[0];
        assert_eq!(table.cell(row, "CRE:name"), "Name, with comma");
        assert_eq!(
            table.cell(row, "CRE:description"),
            "line one\nline \"two\""
        );
        assert_eq!(table.cell(row, "missing"), "");
    }

    #[test]
    fn pads_short_rows_and_skips_blank_lines() {
        let table = Table::parse("a,b,c\n1\n\n,,\n2,3\n").unwrap();
        assert_eq!(table.rows().len(), 2);
        assert_eq!(table.rows()[0], ["1", "", ""]);
    }

    #[test]
    fn tolerates_trailing_empty_cells() {
        let table = Table::parse("a,b\n1,2,,\n").unwrap();
        assert_eq!(table.rows()[0], ["1", "2"]);
        assert!(Table::parse("a,b\n1,2,3\n").is_err());
    }

    #[test]
    fn fitted_rows_match_the_header_width() {
        let mut table = Table::new(vec!["a".into(), "b".into()]);
        table.push_fitted(vec!["1".into()]);
        table.push_fitted(vec!["2".into(), "3".into(), "4".into()]);
        assert_eq!(table.rows(), [["1", ""], ["2", "3"]]);
    }

    #[test]
    fn rejects_unterminated_quote() {
        assert!(Table::parse("a\n\"open\n").is_err());
    }

    #[test]
    fn strips_byte_order_mark() {
        let table = Table::parse("\u{feff}a,b\n1,2").unwrap();
        assert_eq!(table.position("a"), Some(0));
        assert_eq!(table.rows()[0], ["1", "2"]);
    }

    #[test]
    fn written_csv_parses_back() {
        let mut table = Table::new(vec!["name".into(), "notes".into()]);
        table
            .push_row(vec!["a,b".into(), "say \"hi\"\nbye".into()])
            .unwrap();
        table.push_row(vec!["plain".into()]).unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("table.csv");
        table.write(&path).unwrap();
        assert_eq!(Table::read(&path).unwrap(), table);
    }
}
