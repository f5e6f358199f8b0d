//! Dataset loading and normalization into a canonical table
//!
//! The loader takes raw bytes from an uploaded file, decodes them (UTF-8
//! with a Latin-1 fallback, never failing on bad bytes), and coerces the
//! columns it recognizes into typed cells. Anything it cannot parse at the
//! cell level becomes an explicit absent value; only a payload that cannot
//! be tokenized into rows at all is an error.

use std::borrow::Cow;
use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, warn};
use serde::Serialize;

use crate::error::AnalyticsError;

/// Encoding to use when decoding the raw payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingHint {
    /// Try strict UTF-8 first, fall back to Latin-1.
    #[default]
    Auto,
    /// Force UTF-8; undecodable bytes become replacement characters.
    Utf8,
    /// Force Latin-1 (Windows-1252).
    Latin1,
}

/// Semantic role a header can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnRole {
    TransactionId,
    Date,
    Category,
    CustomerType,
    Gender,
    UnitPrice,
    Quantity,
    Total,
    PaymentMethod,
    CustomerId,
    Extra,
}

/// Case-sensitive alias set for the column names seen in retail exports.
fn role_for(header: &str) -> ColumnRole {
    match header.trim() {
        "Invoice ID" | "InvoiceNo" | "Transaction ID" | "transaction_id" => {
            ColumnRole::TransactionId
        }
        "Date" | "date" | "InvoiceDate" => ColumnRole::Date,
        "Product line" | "Category" | "category" => ColumnRole::Category,
        "Customer type" | "customer_type" => ColumnRole::CustomerType,
        "Gender" | "gender" => ColumnRole::Gender,
        "Unit price" | "UnitPrice" | "unit_price" => ColumnRole::UnitPrice,
        "Quantity" | "quantity" => ColumnRole::Quantity,
        "Total" | "total" => ColumnRole::Total,
        "Payment" | "Payment method" | "payment_method" => ColumnRole::PaymentMethod,
        "Customer ID" | "CustomerID" | "customer_id" => ColumnRole::CustomerId,
        _ => ColumnRole::Extra,
    }
}

/// One normalized transaction row. Every row in a table carries the full
/// column set; a cell that could not be parsed is `None`, never a silently
/// coerced zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CanonicalRow {
    pub transaction_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub category: Option<String>,
    pub customer_type: Option<String>,
    pub gender: Option<String>,
    pub unit_price: Option<f64>,
    pub quantity: Option<u64>,
    pub total: Option<f64>,
    pub payment_method: Option<String>,
    pub customer_id: Option<String>,
    /// Unrecognized columns, retained verbatim but not interpreted.
    pub extra: BTreeMap<String, String>,
}

/// The normalized in-memory dataset.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CanonicalTable {
    pub rows: Vec<CanonicalRow>,
    /// Header names that did not map to a semantic column.
    pub extra_columns: Vec<String>,
}

impl CanonicalTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Latest observed date across all rows, if any row has one.
    pub fn max_date(&self) -> Option<NaiveDate> {
        self.rows.iter().filter_map(|r| r.date).max()
    }
}

fn decode(bytes: &[u8], hint: EncodingHint) -> Cow<'_, str> {
    match hint {
        EncodingHint::Utf8 => String::from_utf8_lossy(bytes),
        EncodingHint::Latin1 => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            text
        }
        EncodingHint::Auto => match std::str::from_utf8(bytes) {
            Ok(text) => Cow::Borrowed(text),
            Err(_) => {
                debug!("payload is not valid UTF-8, decoding as Latin-1");
                encoding_rs::WINDOWS_1252.decode(bytes).0
            }
        },
    }
}

/// Parse a date cell. Accepts ISO dates with an optional time suffix and
/// the US slash format; anything else is absent.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.date());
        }
    }
    NaiveDate::parse_from_str(raw, "%m/%d/%Y").ok()
}

/// Non-negative decimal or absent.
fn parse_money(raw: &str) -> Option<f64> {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Some(v),
        _ => None,
    }
}

/// Non-negative integer or absent. Tolerates integral decimals ("6.0").
fn parse_quantity(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<u64>() {
        return Some(v);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 && v.fract() == 0.0 => Some(v as u64),
        _ => None,
    }
}

fn non_empty(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

/// Load raw CSV bytes into a [`CanonicalTable`].
///
/// # Arguments
/// * `bytes` - the uploaded payload
/// * `encoding` - decode strategy, usually [`EncodingHint::Auto`]
///
/// # Errors
/// * [`AnalyticsError::Format`] when the payload has no header or no data rows
/// * [`AnalyticsError::Schema`] when no header maps to a known column
pub fn load_csv(bytes: &[u8], encoding: EncodingHint) -> crate::Result<CanonicalTable> {
    let text = decode(bytes, encoding);
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| AnalyticsError::Format(e.to_string()))?
        .clone();
    if headers.is_empty() {
        return Err(AnalyticsError::Format("empty header row".into()));
    }

    let roles: Vec<(ColumnRole, String)> = headers
        .iter()
        .map(|h| (role_for(h), h.to_string()))
        .collect();
    if roles.iter().all(|(role, _)| *role == ColumnRole::Extra) {
        return Err(AnalyticsError::Schema(headers.iter().collect::<Vec<_>>().join(", ")));
    }
    let extra_columns: Vec<String> = roles
        .iter()
        .filter(|(role, _)| *role == ColumnRole::Extra)
        .map(|(_, name)| name.clone())
        .collect();

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                // Row-local tokenization problems stay row-local.
                warn!("skipping unreadable record: {e}");
                skipped += 1;
                continue;
            }
        };
        let mut row = CanonicalRow::default();
        for (idx, (role, name)) in roles.iter().enumerate() {
            let Some(cell) = record.get(idx) else { continue };
            match role {
                ColumnRole::TransactionId => row.transaction_id = non_empty(cell),
                ColumnRole::Date => row.date = parse_date(cell),
                ColumnRole::Category => row.category = non_empty(cell),
                ColumnRole::CustomerType => row.customer_type = non_empty(cell),
                ColumnRole::Gender => row.gender = non_empty(cell),
                ColumnRole::UnitPrice => row.unit_price = parse_money(cell),
                ColumnRole::Quantity => row.quantity = parse_quantity(cell),
                ColumnRole::Total => row.total = parse_money(cell),
                ColumnRole::PaymentMethod => row.payment_method = non_empty(cell),
                ColumnRole::CustomerId => row.customer_id = non_empty(cell),
                ColumnRole::Extra => {
                    if let Some(v) = non_empty(cell) {
                        row.extra.insert(name.clone(), v);
                    }
                }
            }
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(AnalyticsError::Format("no data rows".into()));
    }
    debug!(
        "loaded {} rows ({} skipped), {} unrecognized columns",
        rows.len(),
        skipped,
        extra_columns.len()
    );

    Ok(CanonicalTable {
        rows,
        extra_columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Invoice ID,Date,Product line,Customer type,Gender,Unit price,Quantity,Total,Payment
INV-1,2023-01-01,Electronics,Member,Male,10.0,2,20.0,Cash
INV-2,01/02/2023,Food and beverages,Normal,Female,5.5,4,22.0,Ewallet
INV-3,not-a-date,Electronics,Member,Male,abc,-1,15.0,Credit card
";

    #[test]
    fn test_load_maps_aliases() {
        let table = load_csv(SAMPLE.as_bytes(), EncodingHint::Auto).unwrap();
        assert_eq!(table.len(), 3);

        let first = &table.rows[0];
        assert_eq!(first.transaction_id.as_deref(), Some("INV-1"));
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2023, 1, 1));
        assert_eq!(first.category.as_deref(), Some("Electronics"));
        assert_eq!(first.unit_price, Some(10.0));
        assert_eq!(first.quantity, Some(2));
        assert_eq!(first.payment_method.as_deref(), Some("Cash"));
    }

    #[test]
    fn test_us_slash_dates_parse() {
        let table = load_csv(SAMPLE.as_bytes(), EncodingHint::Auto).unwrap();
        assert_eq!(table.rows[1].date, NaiveDate::from_ymd_opt(2023, 1, 2));
    }

    #[test]
    fn test_cell_problems_become_absent() {
        let table = load_csv(SAMPLE.as_bytes(), EncodingHint::Auto).unwrap();
        let bad = &table.rows[2];
        assert_eq!(bad.date, None);
        assert_eq!(bad.unit_price, None);
        assert_eq!(bad.quantity, None);
        // A parseable cell on the same row survives
        assert_eq!(bad.total, Some(15.0));
    }

    #[test]
    fn test_unrecognized_columns_retained() {
        let data = "Date,Total,Branch\n2023-01-01,10.0,Alpha\n";
        let table = load_csv(data.as_bytes(), EncodingHint::Auto).unwrap();
        assert_eq!(table.extra_columns, vec!["Branch".to_string()]);
        assert_eq!(
            table.rows[0].extra.get("Branch").map(String::as_str),
            Some("Alpha")
        );
    }

    #[test]
    fn test_latin1_fallback() {
        // "Café" with a Latin-1 0xE9 byte, invalid as UTF-8
        let mut data = b"Date,Product line,Total\n2023-01-01,Caf".to_vec();
        data.push(0xE9);
        data.extend_from_slice(b",10.0\n");
        let table = load_csv(&data, EncodingHint::Auto).unwrap();
        assert_eq!(table.rows[0].category.as_deref(), Some("Caf\u{e9}"));
    }

    #[test]
    fn test_empty_payload_is_format_error() {
        let err = load_csv(b"", EncodingHint::Auto).unwrap_err();
        assert!(matches!(err, AnalyticsError::Format(_)));
    }

    #[test]
    fn test_unknown_headers_are_schema_error() {
        let err = load_csv(b"Foo,Bar\n1,2\n", EncodingHint::Auto).unwrap_err();
        assert!(matches!(err, AnalyticsError::Schema(_)));
    }

    #[test]
    fn test_max_date() {
        let table = load_csv(SAMPLE.as_bytes(), EncodingHint::Auto).unwrap();
        assert_eq!(table.max_date(), NaiveDate::from_ymd_opt(2023, 1, 2));
    }
}
