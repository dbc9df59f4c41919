//! Record source: reads the business CSV into [`BusinessRecord`] values.
//!
//! The file is read fully before dispatch. Rows that are missing a field are
//! skipped with a warning and reported in [`RecordSet::skipped`]; only a
//! missing or unreadable file is fatal.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Column names, in positional order.
pub const COLUMNS: [&str; 4] = ["name", "problem", "solution", "landing_page"];

/// One business idea read from the input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessRecord {
    pub name: String,
    pub problem: String,
    pub solution: String,
    pub landing_page: String,
}

impl BusinessRecord {
    pub fn new(
        name: impl Into<String>,
        problem: impl Into<String>,
        solution: impl Into<String>,
        landing_page: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            problem: problem.into(),
            solution: solution.into(),
            landing_page: landing_page.into(),
        }
    }
}

/// A row that could not be turned into a [`BusinessRecord`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// `row` is the 1-based data row index (the header is not counted).
    #[error("malformed record at row {row}: {reason}")]
    Malformed { row: usize, reason: String },
}

/// Errors that prevent the input from being read at all.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("input file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read input file {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Records that parsed cleanly plus the rows that were skipped.
#[derive(Debug, Default)]
pub struct RecordSet {
    pub records: Vec<BusinessRecord>,
    pub skipped: Vec<RecordError>,
}

/// Where each field lives in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnMap([usize; 4]);

impl ColumnMap {
    const POSITIONAL: Self = Self([0, 1, 2, 3]);

    /// Locate columns by header name, falling back to positional order when
    /// the header does not name all four.
    fn from_headers(headers: &csv::StringRecord) -> Self {
        let mut indices = [0usize; 4];
        for (slot, column) in COLUMNS.iter().enumerate() {
            match headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(column))
            {
                Some(i) => indices[slot] = i,
                None => return Self::POSITIONAL,
            }
        }
        Self(indices)
    }
}

/// Load all records from a CSV file on disk.
pub fn load_records(path: &Path) -> Result<RecordSet, SourceError> {
    if !path.is_file() {
        return Err(SourceError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|source| SourceError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
    read_records(reader).map_err(|source| SourceError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse records from any reader. Exposed for tests and piped input.
pub fn parse_records<R: std::io::Read>(input: R) -> Result<RecordSet, csv::Error> {
    let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(input);
    read_records(reader)
}

fn read_records<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<RecordSet, csv::Error> {
    let columns = ColumnMap::from_headers(reader.headers()?);
    let mut set = RecordSet::default();

    for (index, row) in reader.records().enumerate() {
        let row_number = index + 1;
        let parsed = row
            .map_err(|e| RecordError::Malformed {
                row: row_number,
                reason: e.to_string(),
            })
            .and_then(|row| record_from_row(&row, columns, row_number));

        match parsed {
            Ok(record) => set.records.push(record),
            Err(err) => {
                tracing::warn!(row = row_number, error = %err, "skipping malformed record");
                set.skipped.push(err);
            }
        }
    }

    tracing::debug!(
        records = set.records.len(),
        skipped = set.skipped.len(),
        "loaded business records"
    );
    Ok(set)
}

fn record_from_row(
    row: &csv::StringRecord,
    columns: ColumnMap,
    row_number: usize,
) -> Result<BusinessRecord, RecordError> {
    let mut fields: [String; 4] = Default::default();
    for (slot, (&index, column)) in columns.0.iter().zip(COLUMNS).enumerate() {
        let value = row.get(index).map(str::trim).unwrap_or_default();
        if value.is_empty() {
            return Err(RecordError::Malformed {
                row: row_number,
                reason: format!("missing required field {column:?}"),
            });
        }
        fields[slot] = value.to_string();
    }
    let [name, problem, solution, landing_page] = fields;
    Ok(BusinessRecord {
        name,
        problem,
        solution,
        landing_page,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_rows() {
        let csv = "name,problem,solution,landing_page\n\
                   Acme,No easy invoicing,Automated invoicing SaaS,acme.example.com\n\
                   Globex , Slow shipping , Drone delivery , globex.example.com\n";
        let set = parse_records(csv.as_bytes()).unwrap();
        assert!(set.skipped.is_empty());
        assert_eq!(set.records.len(), 2);
        assert_eq!(
            set.records[0],
            BusinessRecord::new(
                "Acme",
                "No easy invoicing",
                "Automated invoicing SaaS",
                "acme.example.com"
            )
        );
        // Surrounding whitespace is trimmed.
        assert_eq!(set.records[1].name, "Globex");
        assert_eq!(set.records[1].landing_page, "globex.example.com");
    }

    #[test]
    fn short_row_is_skipped_with_row_index() {
        let csv = "name,problem,solution,landing_page\n\
                   Acme,p,s,acme.example.com\n\
                   Broken,only two\n\
                   Initech,p,s,initech.example.com\n";
        let set = parse_records(csv.as_bytes()).unwrap();
        assert_eq!(set.records.len(), 2);
        assert_eq!(set.skipped.len(), 1);
        let RecordError::Malformed { row, reason } = &set.skipped[0];
        assert_eq!(*row, 2);
        assert!(reason.contains("solution"), "unexpected reason: {reason}");
    }

    #[test]
    fn blank_field_counts_as_missing() {
        let csv = "name,problem,solution,landing_page\n  ,p,s,x.example.com\n";
        let set = parse_records(csv.as_bytes()).unwrap();
        assert!(set.records.is_empty());
        assert!(matches!(
            set.skipped[0],
            RecordError::Malformed { row: 1, .. }
        ));
    }

    #[test]
    fn columns_are_located_by_header_name() {
        let csv = "landing_page,Name,solution,problem,notes\n\
                   acme.example.com,Acme,SaaS,Invoicing,ignored\n";
        let set = parse_records(csv.as_bytes()).unwrap();
        assert_eq!(
            set.records,
            vec![BusinessRecord::new("Acme", "Invoicing", "SaaS", "acme.example.com")]
        );
    }

    #[test]
    fn unknown_header_falls_back_to_positions() {
        let csv = "Business,Pain,Fix,URL\nAcme,Invoicing,SaaS,acme.example.com\n";
        let set = parse_records(csv.as_bytes()).unwrap();
        assert_eq!(set.records[0].name, "Acme");
        assert_eq!(set.records[0].landing_page, "acme.example.com");
    }

    #[test]
    fn quoted_fields_may_contain_commas() {
        let csv = "name,problem,solution,landing_page\n\
                   \"Acme, Inc.\",\"Slow, manual invoicing\",SaaS,acme.example.com\n";
        let set = parse_records(csv.as_bytes()).unwrap();
        assert_eq!(set.records[0].name, "Acme, Inc.");
        assert_eq!(set.records[0].problem, "Slow, manual invoicing");
    }

    #[test]
    fn header_only_file_yields_nothing() {
        let set = parse_records("name,problem,solution,landing_page\n".as_bytes()).unwrap();
        assert!(set.records.is_empty());
        assert!(set.skipped.is_empty());
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = load_records(&dir.path().join("nope.csv")).unwrap_err();
        assert!(matches!(err, SourceError::NotFound { .. }));
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("businesses.csv");
        std::fs::write(
            &path,
            "name,problem,solution,landing_page\nAcme,p,s,acme.example.com\n",
        )
        .unwrap();
        let set = load_records(&path).unwrap();
        assert_eq!(set.records.len(), 1);
    }
}
