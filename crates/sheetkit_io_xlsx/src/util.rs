//! Stateless helper utilities used by the layout engine and writer kernel.

use serde_json::Value;
use unicode_width::UnicodeWidthStr;

use crate::conf::{N_LEN_EXCEL_SHEET_NAME_MAX, TUP_EXCEL_ILLEGAL};
use crate::spec::{EnumCellValue, ExportError};

////////////////////////////////////////////////////////////////////////////////
// #region RecordAccess

/// Resolve a dotted field path against one record.
///
/// Missing segments and `null` resolve to an empty string, never an error.
/// Numeric segments index into arrays.
pub fn select_field_value(record: &Value, path: &str) -> Value {
    let mut value_current = record;
    for c_segment in path.split('.') {
        let value_next = match value_current {
            Value::Object(dict_fields) => dict_fields.get(c_segment),
            Value::Array(l_items) => c_segment
                .parse::<usize>()
                .ok()
                .and_then(|n_idx| l_items.get(n_idx)),
            _ => None,
        };
        match value_next {
            Some(value) => value_current = value,
            None => return Value::String(String::new()),
        }
    }

    if value_current.is_null() {
        return Value::String(String::new());
    }
    value_current.clone()
}

/// Validate loosely typed input: must be a non-empty array of records.
pub fn derive_records_from_json(value: Value) -> Result<Vec<Value>, ExportError> {
    match value {
        Value::Array(l_records) => {
            validate_records(&l_records)?;
            Ok(l_records)
        }
        other => Err(ExportError::InvalidInput(format!(
            "records must be an array, got {}",
            describe_json_kind(&other)
        ))),
    }
}

/// Reject an empty record collection.
pub fn validate_records(records: &[Value]) -> Result<(), ExportError> {
    if records.is_empty() {
        return Err(ExportError::InvalidInput(
            "records must contain at least one row".to_string(),
        ));
    }
    Ok(())
}

fn describe_json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CellValueConversion

/// Normalize one resolved JSON value into a writable cell value.
pub fn convert_json_to_cell_value(value: &Value) -> EnumCellValue {
    match value {
        Value::Null => EnumCellValue::None,
        Value::String(s) => EnumCellValue::String(s.clone()),
        Value::Bool(b) => EnumCellValue::String(b.to_string()),
        Value::Number(n) => match n.as_f64() {
            Some(x) if x.is_finite() => EnumCellValue::Number(x),
            _ => EnumCellValue::String(n.to_string()),
        },
        Value::Array(_) | Value::Object(_) => EnumCellValue::String(value.to_string()),
    }
}

/// Text form of a resolved value, used when joining multi-field leaves.
pub fn convert_json_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WidthEstimation

/// Estimate displayed width units of `s`.
///
/// East Asian wide / fullwidth characters and emoji count 2. Multi-line text
/// is measured by its widest line.
pub fn estimate_unicode_string_width(s: &str) -> usize {
    s.lines()
        .map(UnicodeWidthStr::width)
        .max()
        .unwrap_or(0)
}

/// Estimate displayed width units for one cell value.
pub fn estimate_cell_width(value: &EnumCellValue) -> usize {
    estimate_unicode_string_width(&value.to_text())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SheetNormalization

/// Replace invalid chars and trim to valid Excel sheet name.
pub fn sanitize_sheet_name(name: &str, replace_to: &str) -> String {
    let mut c_name = name.to_string();
    for c_illegal in TUP_EXCEL_ILLEGAL {
        c_name = c_name.replace(c_illegal, replace_to);
    }
    c_name = c_name.trim().to_string();
    if c_name.is_empty() {
        c_name = "Sheet".to_string();
    }

    c_name.chars().take(N_LEN_EXCEL_SHEET_NAME_MAX).collect()
}

pub fn cast_row_num(value: usize) -> Result<u32, ExportError> {
    u32::try_from(value)
        .map_err(|_| ExportError::InvalidOption(format!("row index overflow: {value}")))
}

pub fn cast_col_num(value: usize) -> Result<u16, ExportError> {
    u16::try_from(value)
        .map_err(|_| ExportError::InvalidOption(format!("column index overflow: {value}")))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
