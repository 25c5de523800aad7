use std::fs;
use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};

use csv::{QuoteStyle, Terminator, WriterBuilder};
use tracing::info;

use super::columns::Column;
use crate::domain::RVError;
use crate::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// Comma separated with quoting, used for file export.
    Comma,
    /// Plain tab separated, used for the clipboard.
    Tab,
}

impl Delimiter {
    fn as_byte(&self) -> u8 {
        match self {
            Delimiter::Comma => b',',
            Delimiter::Tab => b'\t',
        }
    }

    fn quote_style(&self) -> QuoteStyle {
        match self {
            Delimiter::Comma => QuoteStyle::Necessary,
            Delimiter::Tab => QuoteStyle::Never,
        }
    }
}

/// Serializes the header plus one line per record. Lines are separated by `\n`,
/// the last one has no terminator.
pub fn export_delimited(
    records: &[&Record],
    columns: &[Column],
    delimiter: Delimiter,
) -> Result<String, RVError> {
    if columns.is_empty() {
        return Ok(String::new());
    }

    let mut wtr = WriterBuilder::new()
        .delimiter(delimiter.as_byte())
        .quote_style(delimiter.quote_style())
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    wtr.write_record(columns.iter().map(|c| c.name()))?;
    for record in records {
        wtr.write_record(columns.iter().map(|c| record.display(c.name())))?;
    }

    let bytes = wtr.into_inner().map_err(|e| RVError::IoError(e.into_error()))?;
    let mut text =
        String::from_utf8(bytes).map_err(|e| RVError::IoError(Error::new(ErrorKind::InvalidData, e)))?;
    if text.ends_with('\n') {
        text.pop();
    }
    Ok(text)
}

pub fn export_file_name(unix_millis: u128) -> String {
    format!("reporte_{unix_millis}.csv")
}

/// Writes a CSV payload into `dir` and returns the created path.
pub fn write_export(dir: &Path, unix_millis: u128, contents: &str) -> Result<PathBuf, RVError> {
    let path = dir.join(export_file_name(unix_millis));
    fs::write(&path, contents.as_bytes())?;
    info!("Exported {} bytes to {}", contents.len(), path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::columns::project;
    use serde_json::json;

    fn records(v: serde_json::Value) -> Vec<Record> {
        serde_json::from_value(v).unwrap()
    }

    fn read_back(contents: &str) -> (Vec<String>, Vec<Vec<String>>) {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(contents.as_bytes());
        let headers = rdr.headers().unwrap().iter().map(str::to_string).collect();
        let rows = rdr
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect();
        (headers, rows)
    }

    #[test]
    fn quotes_cells_with_comma_and_quote() {
        let rs = records(json!([{"Title": "Game, \"Deluxe\"", "Score": 9}]));
        let cols = project(&rs);
        let rows: Vec<&Record> = rs.iter().collect();
        let csv = export_delimited(&rows, &cols, Delimiter::Comma).unwrap();
        assert_eq!(csv, "Title,Score\n\"Game, \"\"Deluxe\"\"\",9");

        let (headers, parsed) = read_back(&csv);
        assert_eq!(headers, vec!["Title", "Score"]);
        assert_eq!(parsed, vec![vec!["Game, \"Deluxe\"", "9"]]);
    }

    #[test]
    fn csv_renders_nulls_and_containers() {
        let rs = records(json!([
            {"Title": "A", "Genres": ["RPG", "Indie"], "Score": 1},
            {"Title": null, "Genres": [], "Score": null},
        ]));
        let cols = project(&rs);
        let rows: Vec<&Record> = rs.iter().collect();
        let csv = export_delimited(&rows, &cols, Delimiter::Comma).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Title,Genres,Score");
        assert_eq!(lines[1], r#"A,"[""RPG"",""Indie""]",1"#);
        assert_eq!(lines[2], ",[],");

        let (_, parsed) = read_back(&csv);
        assert_eq!(parsed[0], vec!["A", r#"["RPG","Indie"]"#, "1"]);
        assert_eq!(parsed[1], vec!["", "[]", ""]);
    }

    #[test]
    fn csv_quotes_newlines_and_headers() {
        let rs = records(json!([{"Name, full": "line one\nline two"}]));
        let cols = project(&rs);
        let rows: Vec<&Record> = rs.iter().collect();
        let csv = export_delimited(&rows, &cols, Delimiter::Comma).unwrap();
        assert_eq!(csv, "\"Name, full\"\n\"line one\nline two\"");

        let (headers, parsed) = read_back(&csv);
        assert_eq!(headers, vec!["Name, full"]);
        assert_eq!(parsed, vec![vec!["line one\nline two"]]);
    }

    #[test]
    fn tab_export_is_plain() {
        let rs = records(json!([
            {"Title": "Game, \"Deluxe\"", "Score": null},
            {"Title": "B", "Score": 2},
        ]));
        let cols = project(&rs);
        let rows: Vec<&Record> = rs.iter().collect();
        let tsv = export_delimited(&rows, &cols, Delimiter::Tab).unwrap();
        assert_eq!(tsv, "Title\tScore\nGame, \"Deluxe\"\t\nB\t2");
    }

    #[test]
    fn empty_columns_export_blank_header() {
        let tsv = export_delimited(&[], &[], Delimiter::Tab).unwrap();
        assert_eq!(tsv, "");
    }

    #[test]
    fn writes_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_export(dir.path(), 1_700_000_000_123, "a,b\n1,2").unwrap();
        assert_eq!(path.file_name().unwrap(), "reporte_1700000000123.csv");
        assert_eq!(fs::read_to_string(path).unwrap(), "a,b\n1,2");
    }
}
