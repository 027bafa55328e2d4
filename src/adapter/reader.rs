//! Input readers: gazetteer CSV files and annotation JSON files

use super::annotation::AnnotatedDocument;
use super::geographic::ReferenceRecord;
use crate::graph::BridgeError;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while reading input files
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid annotation document in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl From<ReaderError> for BridgeError {
    fn from(e: ReaderError) -> Self {
        BridgeError::MalformedInput(e.to_string())
    }
}

/// Gazetteer exports are latin-1; accept UTF-8 when the bytes are valid.
fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Streams reference records from a CSV source whose first row is the header.
pub struct ReferenceReader<R: Read> {
    reader: csv::Reader<R>,
    header: Arc<Vec<String>>,
}

impl ReferenceReader<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReaderError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ReaderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file)
    }
}

impl<R: Read> ReferenceReader<R> {
    pub fn from_reader(source: R) -> Result<Self, ReaderError> {
        // Rows with the wrong number of fields still come through; the
        // adapter reports them as malformed and the run continues.
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(source);
        let header = reader.byte_headers()?.iter().map(decode).collect();
        Ok(Self {
            reader,
            header: Arc::new(header),
        })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Records with the line they were read from.
    pub fn records(self) -> impl Iterator<Item = Result<(u64, ReferenceRecord), ReaderError>> {
        let header = self.header;
        self.reader.into_byte_records().map(move |row| {
            let row = row?;
            let line = row.position().map(|p| p.line()).unwrap_or_default();
            let values = row.iter().map(decode).collect();
            Ok((line, ReferenceRecord::new(header.clone(), values)))
        })
    }
}

/// An annotation file holds one document or an array of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum DocumentFile {
    Many(Vec<AnnotatedDocument>),
    One(AnnotatedDocument),
}

/// Parse annotated documents from JSON text.
pub fn parse_documents(json: &str) -> Result<Vec<AnnotatedDocument>, serde_json::Error> {
    Ok(match serde_json::from_str::<DocumentFile>(json)? {
        DocumentFile::Many(documents) => documents,
        DocumentFile::One(document) => vec![document],
    })
}

/// Read annotated documents from a JSON file.
pub fn read_documents(path: impl AsRef<Path>) -> Result<Vec<AnnotatedDocument>, ReaderError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|source| ReaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_documents(&json).map_err(|source| ReaderError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_records_against_header() {
        let csv = "PLACEID,PLACE22NM,CTYHISTNM\nIPN1,Soho,Middlesex\nIPN2,Ely,\n";
        let reader = ReferenceReader::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(reader.header(), &["PLACEID", "PLACE22NM", "CTYHISTNM"]);

        let records: Vec<_> = reader.records().collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, 2);
        assert_eq!(records[0].1.get("placeid"), Some("IPN1"));
        assert_eq!(records[1].1.get("CTYHISTNM"), Some(""));
    }

    #[test]
    fn short_rows_are_passed_through() {
        let csv = "PLACEID,PLACE22NM\nIPN1\n";
        let reader = ReferenceReader::from_reader(csv.as_bytes()).unwrap();
        let records: Vec<_> = reader.records().collect::<Result<_, _>>().unwrap();
        assert_eq!(records[0].1.get("PLACE22NM"), None);
    }

    #[test]
    fn latin1_bytes_are_decoded() {
        let mut bytes = b"PLACEID,PLACE22NM\nIPN1,Y F\n".to_vec();
        // "Ynys Môn" style accent written as a single latin-1 byte
        let pos = bytes.iter().rposition(|&b| b == b' ').unwrap();
        bytes[pos] = 0xF4;
        let reader = ReferenceReader::from_reader(bytes.as_slice()).unwrap();
        let records: Vec<_> = reader.records().collect::<Result<_, _>>().unwrap();
        assert_eq!(records[0].1.get("PLACE22NM"), Some("Y\u{f4}F"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ReferenceReader::open("/nonexistent/ipn.csv").err().unwrap();
        assert!(matches!(err, ReaderError::Io { .. }));
    }

    #[test]
    fn document_file_may_hold_one_or_many() {
        let one = r#"{"title": "A", "url": "u1", "paragraphs": []}"#;
        let many = r#"[{"title": "A", "url": "u1"}, {"title": "B", "url": "u2"}]"#;
        assert_eq!(parse_documents(one).unwrap().len(), 1);
        assert_eq!(parse_documents(many).unwrap().len(), 2);
    }

    #[test]
    fn reads_documents_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"title": "Notes", "url": "file:///notes.xml"}}"#).unwrap();

        let documents = read_documents(file.path()).unwrap();
        assert_eq!(documents[0].title, "Notes");
        assert!(documents[0].paragraphs.is_empty());
    }

    #[test]
    fn invalid_json_names_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = read_documents(file.path()).unwrap_err();
        assert!(matches!(err, ReaderError::Json { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }
}
