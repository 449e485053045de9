use std::collections::HashMap;

use crate::table::{CellValue, Column, ColumnType, Sheet};

/// One retrievable unit of schema context: the textual description of a
/// single column, with a back-reference to where it came from.
#[derive(Debug, Clone)]
pub struct MetadataDocument {
    pub dataset_id: String,
    pub sheet_name: String,
    pub column_name: String,
    /// Position of the column in the sheet; the retrieval tie-break.
    pub column_position: usize,
    pub text: String,
}

/// Build one metadata document per column of a sheet.
pub fn build_column_documents(
    sheet: &Sheet,
    dataset_id: &str,
    sheet_name: &str,
) -> Vec<MetadataDocument> {
    sheet
        .columns
        .iter()
        .enumerate()
        .map(|(position, column)| MetadataDocument {
            dataset_id: dataset_id.to_string(),
            sheet_name: sheet_name.to_string(),
            column_name: column.name.clone(),
            column_position: position,
            text: describe_column(sheet, column, position, sheet_name),
        })
        .collect()
}

fn describe_column(sheet: &Sheet, column: &Column, position: usize, sheet_name: &str) -> String {
    let values: Vec<&CellValue> = sheet.rows.iter().map(|row| &row[position]).collect();
    let null_count = values.iter().filter(|v| v.is_null()).count();
    let null_pct = if values.is_empty() {
        0.0
    } else {
        null_count as f64 / values.len() as f64 * 100.0
    };

    let mut text = format!(
        "Column Name: {}\nSheet: {}\nData Type: {}\nDescription: {}\nNull Values: {} ({:.1}%)\n",
        column.name,
        sheet_name,
        column.column_type,
        column
            .description
            .clone()
            .unwrap_or_else(|| infer_column_meaning(&column.name, column.column_type)),
        null_count,
        null_pct,
    );

    match column.column_type {
        ColumnType::Numeric => {
            let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_number()).collect();
            if !numbers.is_empty() {
                let min = numbers.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = numbers.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
                let std = sample_std(&numbers, mean);
                text.push_str(&format!(
                    "Statistics:\n  - Min: {}\n  - Max: {}\n  - Mean: {}\n  - Std Dev: {}\n",
                    min, max, mean, std
                ));
            }
            if !column.sample_values.is_empty() {
                text.push_str(&format!(
                    "Sample Values: {}\n",
                    column.sample_values.join(", ")
                ));
            }
        }
        ColumnType::DateTime => {
            let stamps: Vec<_> = values.iter().filter_map(|v| v.as_datetime()).collect();
            if let (Some(min), Some(max)) = (stamps.iter().min(), stamps.iter().max()) {
                text.push_str(&format!(
                    "Date Range:\n  - From: {}\n  - To: {}\n",
                    min.format("%Y-%m-%d %H:%M:%S"),
                    max.format("%Y-%m-%d %H:%M:%S")
                ));
            }
        }
        ColumnType::Text | ColumnType::Boolean => {
            let mut distinct: HashMap<String, usize> = HashMap::new();
            for value in values.iter().filter(|v| !v.is_null()) {
                *distinct.entry(value.render()).or_insert(0) += 1;
            }
            text.push_str(&format!("Unique Count: {}\n", distinct.len()));
            if distinct.len() <= 20 {
                let mut names: Vec<&String> = distinct.keys().collect();
                names.sort();
                let listed: Vec<String> = names.into_iter().cloned().collect();
                text.push_str(&format!("Unique Values: {}\n", listed.join(", ")));
            } else if !column.sample_values.is_empty() {
                text.push_str(&format!(
                    "Sample Values: {}\n",
                    column.sample_values.join(", ")
                ));
            }
        }
    }

    text.trim_end().to_string()
}

fn sample_std(numbers: &[f64], mean: f64) -> f64 {
    if numbers.len() < 2 {
        return 0.0;
    }
    let variance =
        numbers.iter().map(|n| (n - mean).powi(2)).sum::<f64>() / (numbers.len() - 1) as f64;
    variance.sqrt()
}

/// Heuristic description from the column name; used when ingestion
/// supplied no explicit description.
fn infer_column_meaning(name: &str, column_type: ColumnType) -> String {
    let lower = name.to_lowercase();
    let meaning = if lower.contains("id") {
        "Identifier or unique key"
    } else if lower.contains("date") || lower.contains("time") {
        "Temporal data (date/time)"
    } else if lower.contains("name") {
        "Name or label"
    } else if lower.contains("price") || lower.contains("cost") || lower.contains("amount") {
        "Monetary value"
    } else if lower.contains("sales") || lower.contains("revenue") {
        "Sales or revenue metric"
    } else if lower.contains("count") || lower.contains("quantity") || lower.contains("qty") {
        "Count or quantity metric"
    } else if lower.contains("percent") || lower.contains("rate") {
        "Percentage or rate metric"
    } else if lower.contains("region") || lower.contains("location") || lower.contains("city") {
        "Geographic or location data"
    } else if lower.contains("category") || lower.contains("type") {
        "Classification or category"
    } else if lower.contains("status") {
        "Status indicator"
    } else {
        match column_type {
            ColumnType::Numeric => "Numeric metric or measurement",
            ColumnType::DateTime => "Date or timestamp",
            ColumnType::Boolean => "Boolean flag",
            ColumnType::Text => "Categorical or text data",
        }
    };
    meaning.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{CsvParser, SpreadsheetParser};

    fn sales_sheet() -> Sheet {
        let csv = b"region,sales,date\nNorth,100,2024-01-05\nSouth,200,2024-02-10\nNorth,50,2024-02-20\n";
        CsvParser.parse("sales.csv", csv).unwrap().remove(0).1
    }

    #[test]
    fn one_document_per_column() {
        let sheet = sales_sheet();
        let docs = build_column_documents(&sheet, "ds_1", "Sheet1");
        assert_eq!(docs.len(), sheet.columns.len());
        assert_eq!(docs[0].column_name, "region");
        assert_eq!(docs[1].column_position, 1);
        assert!(docs.iter().all(|d| d.dataset_id == "ds_1"));
    }

    #[test]
    fn numeric_document_carries_statistics() {
        let sheet = sales_sheet();
        let docs = build_column_documents(&sheet, "ds_1", "Sheet1");
        let sales = &docs[1].text;
        assert!(sales.contains("Data Type: numeric"));
        assert!(sales.contains("Min: 50"));
        assert!(sales.contains("Max: 200"));
        assert!(sales.contains("Sales or revenue metric"));
    }

    #[test]
    fn categorical_document_lists_unique_values() {
        let sheet = sales_sheet();
        let docs = build_column_documents(&sheet, "ds_1", "Sheet1");
        let region = &docs[0].text;
        assert!(region.contains("Unique Count: 2"));
        assert!(region.contains("North"));
        assert!(region.contains("Geographic or location data"));
    }

    #[test]
    fn datetime_document_reports_range() {
        let sheet = sales_sheet();
        let docs = build_column_documents(&sheet, "ds_1", "Sheet1");
        let date = &docs[2].text;
        assert!(date.contains("From: 2024-01-05"));
        assert!(date.contains("To: 2024-02-20"));
    }
}
