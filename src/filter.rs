use crate::error::AgentError;
use crate::ingest::parse_datetime;
use crate::table::{CellValue, ColumnType, Sheet};

/// Restricted boolean condition grammar over one sheet:
///
/// ```text
/// expr    := cmp ("and" cmp)*
/// cmp     := column op literal | column "in" "[" literal ("," literal)* "]"
/// op      := "==" | "!=" | ">" | ">=" | "<" | "<="
/// literal := 'string' | "string" | number | true | false
/// ```
///
/// Unknown columns and operand type clashes are hard errors, never a
/// silent non-match.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpr {
    clauses: Vec<Comparison>,
}

#[derive(Debug, Clone, PartialEq)]
struct Comparison {
    column: String,
    op: CompareOp,
    operands: Vec<Literal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Number(f64),
    Text(String),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Op(CompareOp),
    Literal(Literal),
    And,
    In,
    OpenBracket,
    CloseBracket,
    Comma,
}

impl FilterExpr {
    pub fn parse(input: &str) -> Result<Self, AgentError> {
        let tokens = tokenize(input)?;
        let mut cursor = 0usize;
        let mut clauses = Vec::new();

        loop {
            clauses.push(parse_comparison(&tokens, &mut cursor)?);
            match tokens.get(cursor) {
                Some(Token::And) => cursor += 1,
                None => break,
                Some(other) => {
                    return Err(invalid(format!(
                        "expected 'and' between conditions, found {:?}",
                        other
                    )))
                }
            }
        }

        Ok(FilterExpr { clauses })
    }

    /// Row indices of the sheet matching every clause.
    pub fn matching_rows(&self, sheet: &Sheet) -> Result<Vec<usize>, AgentError> {
        // Resolve columns and check operand types before touching rows,
        // so a bad expression fails the same way on an empty sheet.
        let mut resolved = Vec::with_capacity(self.clauses.len());
        for clause in &self.clauses {
            let idx = sheet.column_index(&clause.column)?;
            let column_type = sheet.columns[idx].column_type;
            for operand in &clause.operands {
                check_operand(&clause.column, column_type, clause.op, operand)?;
            }
            resolved.push((idx, column_type, clause));
        }

        let mut matches = Vec::new();
        'rows: for (row_idx, row) in sheet.rows.iter().enumerate() {
            for (col_idx, column_type, clause) in &resolved {
                if !clause_matches(&row[*col_idx], *column_type, clause)? {
                    continue 'rows;
                }
            }
            matches.push(row_idx);
        }
        Ok(matches)
    }
}

/// Apply an optional filter expression, defaulting to all rows.
pub fn matching_rows(sheet: &Sheet, filter: Option<&str>) -> Result<Vec<usize>, AgentError> {
    match filter {
        Some(expr) if !expr.trim().is_empty() => FilterExpr::parse(expr)?.matching_rows(sheet),
        _ => Ok((0..sheet.row_count()).collect()),
    }
}

fn check_operand(
    column: &str,
    column_type: ColumnType,
    op: CompareOp,
    operand: &Literal,
) -> Result<(), AgentError> {
    let ordered = matches!(
        op,
        CompareOp::Gt | CompareOp::Ge | CompareOp::Lt | CompareOp::Le
    );
    let compatible = match (column_type, operand) {
        (ColumnType::Numeric, Literal::Number(_)) => true,
        (ColumnType::Text, Literal::Text(_)) => !ordered,
        (ColumnType::Boolean, Literal::Bool(_)) => !ordered,
        // Datetime columns compare against parseable string literals.
        (ColumnType::DateTime, Literal::Text(s)) => parse_datetime(s).is_some(),
        _ => false,
    };
    if !compatible {
        return Err(invalid(format!(
            "operator '{}' cannot compare {} column '{}' with {:?}",
            op_str(op),
            column_type,
            column,
            operand
        )));
    }
    Ok(())
}

fn clause_matches(
    cell: &CellValue,
    column_type: ColumnType,
    clause: &Comparison,
) -> Result<bool, AgentError> {
    // Null never matches any comparison.
    if cell.is_null() {
        return Ok(false);
    }
    match clause.op {
        CompareOp::In => {
            for operand in &clause.operands {
                if literal_eq(cell, column_type, operand) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        CompareOp::Eq => Ok(literal_eq(cell, column_type, &clause.operands[0])),
        CompareOp::Ne => Ok(!literal_eq(cell, column_type, &clause.operands[0])),
        op => {
            let ordering = literal_cmp(cell, column_type, &clause.operands[0]);
            let Some(ordering) = ordering else {
                return Ok(false);
            };
            Ok(match op {
                CompareOp::Gt => ordering == std::cmp::Ordering::Greater,
                CompareOp::Ge => ordering != std::cmp::Ordering::Less,
                CompareOp::Lt => ordering == std::cmp::Ordering::Less,
                CompareOp::Le => ordering != std::cmp::Ordering::Greater,
                _ => unreachable!(),
            })
        }
    }
}

fn literal_eq(cell: &CellValue, column_type: ColumnType, literal: &Literal) -> bool {
    match (cell, literal) {
        (CellValue::Number(n), Literal::Number(m)) => n == m,
        (CellValue::Text(s), Literal::Text(t)) => s == t,
        (CellValue::Bool(b), Literal::Bool(c)) => b == c,
        (CellValue::DateTime(dt), Literal::Text(s)) if column_type == ColumnType::DateTime => {
            parse_datetime(s).map(|parsed| parsed == *dt).unwrap_or(false)
        }
        _ => false,
    }
}

fn literal_cmp(
    cell: &CellValue,
    column_type: ColumnType,
    literal: &Literal,
) -> Option<std::cmp::Ordering> {
    match (cell, literal) {
        (CellValue::Number(n), Literal::Number(m)) => n.partial_cmp(m),
        (CellValue::DateTime(dt), Literal::Text(s)) if column_type == ColumnType::DateTime => {
            parse_datetime(s).map(|parsed| dt.cmp(&parsed))
        }
        _ => None,
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, AgentError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '[' => {
                tokens.push(Token::OpenBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::CloseBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' | '!' | '<' | '>' => {
                let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
                let (op, len) = match two.as_str() {
                    "==" => (CompareOp::Eq, 2),
                    "!=" => (CompareOp::Ne, 2),
                    ">=" => (CompareOp::Ge, 2),
                    "<=" => (CompareOp::Le, 2),
                    _ if c == '>' => (CompareOp::Gt, 1),
                    _ if c == '<' => (CompareOp::Lt, 1),
                    _ => {
                        return Err(invalid(format!(
                            "unexpected character '{}' at position {}",
                            c, i
                        )))
                    }
                };
                tokens.push(Token::Op(op));
                i += len;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(invalid("unterminated string literal".to_string()));
                }
                tokens.push(Token::Literal(Literal::Text(
                    chars[start..end].iter().collect(),
                )));
                i = end + 1;
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == 'e' || chars[i] == 'E' || chars[i] == '-' || chars[i] == '+')
                {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                let number = raw
                    .parse::<f64>()
                    .map_err(|_| invalid(format!("invalid number literal '{}'", raw)))?;
                tokens.push(Token::Literal(Literal::Number(number)));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.to_ascii_lowercase().as_str() {
                    "and" => tokens.push(Token::And),
                    "in" => tokens.push(Token::In),
                    "true" => tokens.push(Token::Literal(Literal::Bool(true))),
                    "false" => tokens.push(Token::Literal(Literal::Bool(false))),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            _ => {
                return Err(invalid(format!(
                    "unexpected character '{}' at position {}",
                    c, i
                )))
            }
        }
    }

    if tokens.is_empty() {
        return Err(invalid("empty filter expression".to_string()));
    }
    Ok(tokens)
}

fn parse_comparison(tokens: &[Token], cursor: &mut usize) -> Result<Comparison, AgentError> {
    let column = match tokens.get(*cursor) {
        Some(Token::Ident(name)) => name.clone(),
        other => return Err(invalid(format!("expected column name, found {:?}", other))),
    };
    *cursor += 1;

    match tokens.get(*cursor) {
        Some(Token::Op(op)) => {
            let op = *op;
            *cursor += 1;
            let literal = expect_literal(tokens, cursor)?;
            Ok(Comparison {
                column,
                op,
                operands: vec![literal],
            })
        }
        Some(Token::In) => {
            *cursor += 1;
            if !matches!(tokens.get(*cursor), Some(Token::OpenBracket)) {
                return Err(invalid("expected '[' after 'in'".to_string()));
            }
            *cursor += 1;
            let mut operands = vec![expect_literal(tokens, cursor)?];
            loop {
                match tokens.get(*cursor) {
                    Some(Token::Comma) => {
                        *cursor += 1;
                        operands.push(expect_literal(tokens, cursor)?);
                    }
                    Some(Token::CloseBracket) => {
                        *cursor += 1;
                        break;
                    }
                    other => {
                        return Err(invalid(format!(
                            "expected ',' or ']' in membership list, found {:?}",
                            other
                        )))
                    }
                }
            }
            Ok(Comparison {
                column,
                op: CompareOp::In,
                operands,
            })
        }
        other => Err(invalid(format!(
            "expected a comparison operator or 'in' after '{}', found {:?}",
            column, other
        ))),
    }
}

fn expect_literal(tokens: &[Token], cursor: &mut usize) -> Result<Literal, AgentError> {
    match tokens.get(*cursor) {
        Some(Token::Literal(lit)) => {
            *cursor += 1;
            Ok(lit.clone())
        }
        other => Err(invalid(format!("expected a literal, found {:?}", other))),
    }
}

fn op_str(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "==",
        CompareOp::Ne => "!=",
        CompareOp::Gt => ">",
        CompareOp::Ge => ">=",
        CompareOp::Lt => "<",
        CompareOp::Le => "<=",
        CompareOp::In => "in",
    }
}

fn invalid(message: String) -> AgentError {
    AgentError::InvalidFilter { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{CsvParser, SpreadsheetParser};

    fn sheet() -> Sheet {
        let csv = b"region,sales,date,active\nNorth,100,2024-01-05,true\nSouth,200,2024-02-10,false\nNorth,50,2024-02-20,true\nEast,,2024-03-01,true\n";
        CsvParser.parse("sales.csv", csv).unwrap().remove(0).1
    }

    #[test]
    fn equality_on_text_column() {
        let rows = matching_rows(&sheet(), Some("region == 'North'")).unwrap();
        assert_eq!(rows, vec![0, 2]);
    }

    #[test]
    fn comparison_and_conjunction() {
        let rows = matching_rows(&sheet(), Some("sales >= 100 and region != 'South'")).unwrap();
        assert_eq!(rows, vec![0]);
    }

    #[test]
    fn membership_on_text_column() {
        let rows = matching_rows(&sheet(), Some("region in ['South', 'East']")).unwrap();
        assert_eq!(rows, vec![1, 3]);
    }

    #[test]
    fn datetime_comparison_against_string_literal() {
        let rows = matching_rows(&sheet(), Some("date > '2024-02-01'")).unwrap();
        assert_eq!(rows, vec![1, 2, 3]);
    }

    #[test]
    fn boolean_equality() {
        let rows = matching_rows(&sheet(), Some("active == true")).unwrap();
        assert_eq!(rows, vec![0, 2, 3]);
    }

    #[test]
    fn null_cells_never_match() {
        let rows = matching_rows(&sheet(), Some("sales < 1000")).unwrap();
        assert_eq!(rows, vec![0, 1, 2]);
        let rows = matching_rows(&sheet(), Some("sales != 100")).unwrap();
        assert_eq!(rows, vec![1, 2]);
    }

    #[test]
    fn no_filter_returns_all_rows() {
        assert_eq!(matching_rows(&sheet(), None).unwrap().len(), 4);
        assert_eq!(matching_rows(&sheet(), Some("  ")).unwrap().len(), 4);
    }

    #[test]
    fn unknown_column_is_an_error() {
        let err = matching_rows(&sheet(), Some("price > 10")).unwrap_err();
        assert!(matches!(err, AgentError::ColumnNotFound { .. }));
    }

    #[test]
    fn ordering_on_text_column_is_rejected() {
        let err = matching_rows(&sheet(), Some("region > 'A'")).unwrap_err();
        assert!(matches!(err, AgentError::InvalidFilter { .. }));
    }

    #[test]
    fn type_clash_is_rejected_even_on_matchless_rows() {
        let err = matching_rows(&sheet(), Some("sales == 'North'")).unwrap_err();
        assert!(matches!(err, AgentError::InvalidFilter { .. }));
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        for expr in ["region ==", "== 'North'", "region = 'North'", "region in []", "sales > 1 or sales < 2"] {
            assert!(
                matching_rows(&sheet(), Some(expr)).is_err(),
                "expected error for {expr:?}"
            );
        }
    }
}
