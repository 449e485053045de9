use chrono::{NaiveDate, NaiveDateTime};
use tracing::info;

use crate::error::AgentError;
use crate::table::{CellValue, Column, ColumnType, Sheet};

pub const MAX_UPLOAD_MB: u64 = 50;
const SAMPLE_VALUES_PER_COLUMN: usize = 5;

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Consumed capability: turns raw upload bytes into named sheets.
pub trait SpreadsheetParser: Send + Sync {
    fn parse(&self, filename: &str, bytes: &[u8]) -> Result<Vec<(String, Sheet)>, AgentError>;
}

/// CSV adapter. A CSV file carries exactly one sheet, named "Sheet1" to
/// keep parity with spreadsheet uploads.
pub struct CsvParser;

impl SpreadsheetParser for CsvParser {
    fn parse(&self, filename: &str, bytes: &[u8]) -> Result<Vec<(String, Sheet)>, AgentError> {
        let size_mb = bytes.len() as f64 / (1024.0 * 1024.0);
        if size_mb > MAX_UPLOAD_MB as f64 {
            return Err(AgentError::FileTooLarge {
                size_mb,
                max_mb: MAX_UPLOAD_MB,
            });
        }

        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if extension != "csv" {
            return Err(AgentError::UnsupportedFormat {
                extension: if extension.is_empty() {
                    "<none>".to_string()
                } else {
                    format!(".{}", extension)
                },
            });
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes);

        let headers = reader
            .headers()
            .map_err(|e| AgentError::CorruptFile {
                message: format!("could not read header row: {}", e),
            })?
            .clone();

        let names = clean_column_names(&headers);
        if names.is_empty() {
            return Err(AgentError::CorruptFile {
                message: "no columns found in header row".to_string(),
            });
        }

        let mut raw_rows: Vec<Vec<String>> = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| AgentError::CorruptFile {
                message: format!("malformed record: {}", e),
            })?;
            let mut row: Vec<String> = (0..names.len())
                .map(|i| record.get(i).unwrap_or("").trim().to_string())
                .collect();
            // Drop fully empty rows.
            if row.iter().all(|cell| cell.is_empty()) {
                continue;
            }
            row.truncate(names.len());
            raw_rows.push(row);
        }

        let types: Vec<ColumnType> = (0..names.len())
            .map(|col| infer_column_type(raw_rows.iter().map(|row| row[col].as_str())))
            .collect();

        let rows: Vec<Vec<CellValue>> = raw_rows
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&types)
                    .map(|(raw, ty)| parse_cell(raw, *ty))
                    .collect()
            })
            .collect();

        let columns = names
            .into_iter()
            .zip(types)
            .enumerate()
            .map(|(idx, (name, column_type))| {
                let sample_values = rows
                    .iter()
                    .map(|row| &row[idx])
                    .filter(|cell| !cell.is_null())
                    .take(SAMPLE_VALUES_PER_COLUMN)
                    .map(|cell| cell.render())
                    .collect();
                Column {
                    name,
                    column_type,
                    description: None,
                    sample_values,
                }
            })
            .collect();

        let sheet = Sheet { columns, rows };
        info!(
            "Parsed CSV '{}': {} rows, {} columns",
            filename,
            sheet.row_count(),
            sheet.columns.len()
        );

        Ok(vec![("Sheet1".to_string(), sheet)])
    }
}

/// Normalize header names the way the upload pipeline expects them:
/// trimmed, lowercased, spaces to underscores, everything outside
/// [a-z0-9_] stripped. Duplicates get a numeric suffix to keep names
/// unique within the sheet.
fn clean_column_names(headers: &csv::StringRecord) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for raw in headers.iter() {
        let cleaned: String = raw
            .trim()
            .to_lowercase()
            .replace(' ', "_")
            .chars()
            .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
            .collect();
        let base = if cleaned.is_empty() {
            format!("column_{}", names.len() + 1)
        } else {
            cleaned
        };
        let mut name = base.clone();
        let mut suffix = 2;
        while names.contains(&name) {
            name = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        names.push(name);
    }
    names
}

fn infer_column_type<'a>(values: impl Iterator<Item = &'a str>) -> ColumnType {
    let mut saw_value = false;
    let mut all_numeric = true;
    let mut all_boolean = true;
    let mut all_datetime = true;

    for raw in values {
        if raw.is_empty() {
            continue;
        }
        saw_value = true;
        if raw.parse::<f64>().is_err() {
            all_numeric = false;
        }
        if !matches!(raw.to_ascii_lowercase().as_str(), "true" | "false") {
            all_boolean = false;
        }
        if parse_datetime(raw).is_none() {
            all_datetime = false;
        }
        if !all_numeric && !all_boolean && !all_datetime {
            return ColumnType::Text;
        }
    }

    if !saw_value {
        return ColumnType::Text;
    }
    if all_boolean {
        ColumnType::Boolean
    } else if all_numeric {
        ColumnType::Numeric
    } else if all_datetime {
        ColumnType::DateTime
    } else {
        ColumnType::Text
    }
}

pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

fn parse_cell(raw: &str, column_type: ColumnType) -> CellValue {
    if raw.is_empty() {
        return CellValue::Null;
    }
    match column_type {
        ColumnType::Numeric => raw
            .parse::<f64>()
            .map(CellValue::Number)
            .unwrap_or(CellValue::Null),
        ColumnType::Boolean => match raw.to_ascii_lowercase().as_str() {
            "true" => CellValue::Bool(true),
            "false" => CellValue::Bool(false),
            _ => CellValue::Null,
        },
        ColumnType::DateTime => parse_datetime(raw)
            .map(CellValue::DateTime)
            .unwrap_or(CellValue::Null),
        ColumnType::Text => CellValue::Text(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALES_CSV: &[u8] =
        b"Region ,Sales Amount,Date,Active\nNorth,100,2024-01-05,true\nSouth,200,2024-02-10,false\nNorth,50,2024-02-20,true\n";

    #[test]
    fn parses_csv_with_cleaned_headers_and_inferred_types() {
        let sheets = CsvParser.parse("sales.csv", SALES_CSV).unwrap();
        assert_eq!(sheets.len(), 1);
        let (name, sheet) = &sheets[0];
        assert_eq!(name, "Sheet1");
        assert_eq!(
            sheet.column_names(),
            vec!["region", "sales_amount", "date", "active"]
        );
        assert_eq!(sheet.columns[0].column_type, ColumnType::Text);
        assert_eq!(sheet.columns[1].column_type, ColumnType::Numeric);
        assert_eq!(sheet.columns[2].column_type, ColumnType::DateTime);
        assert_eq!(sheet.columns[3].column_type, ColumnType::Boolean);
        assert_eq!(sheet.row_count(), 3);
    }

    #[test]
    fn rejects_non_csv_extension() {
        let err = CsvParser.parse("book.xlsx", SALES_CSV).unwrap_err();
        assert!(matches!(err, AgentError::UnsupportedFormat { .. }));
    }

    #[test]
    fn empty_rows_are_dropped_and_empty_cells_become_null() {
        let csv = b"a,b\n1,x\n,\n2,\n";
        let sheets = CsvParser.parse("data.csv", csv).unwrap();
        let sheet = &sheets[0].1;
        assert_eq!(sheet.row_count(), 2);
        assert!(sheet.rows[1][1].is_null());
    }

    #[test]
    fn duplicate_headers_get_suffixes() {
        let csv = b"value,value,Value\n1,2,3\n";
        let sheets = CsvParser.parse("data.csv", csv).unwrap();
        assert_eq!(
            sheets[0].1.column_names(),
            vec!["value", "value_2", "value_3"]
        );
    }

    #[test]
    fn header_only_file_yields_empty_sheet() {
        let sheets = CsvParser.parse("data.csv", b"a,b\n").unwrap();
        assert_eq!(sheets[0].1.row_count(), 0);
    }

    #[test]
    fn mixed_column_falls_back_to_text() {
        let csv = b"v\n1\nx\n";
        let sheets = CsvParser.parse("data.csv", csv).unwrap();
        assert_eq!(sheets[0].1.columns[0].column_type, ColumnType::Text);
    }
}
