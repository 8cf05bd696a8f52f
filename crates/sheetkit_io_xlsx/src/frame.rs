//! Polars `DataFrame` / IPC payload conversion into JSON records.

use std::io::Cursor;

use polars::prelude::{AnyValue, DataFrame, IpcReader, SerReader};
use serde_json::{Map, Number, Value};

use crate::spec::ExportError;

/// Decode IPC-serialized dataframe bytes into records.
pub fn derive_records_from_ipc_bytes(v_ipc_df: &[u8]) -> Result<Vec<Value>, ExportError> {
    let df = derive_dataframe_from_ipc_bytes(v_ipc_df)?;
    derive_records_from_dataframe(&df)
}

pub fn derive_dataframe_from_ipc_bytes(v_ipc_df: &[u8]) -> Result<DataFrame, ExportError> {
    IpcReader::new(Cursor::new(v_ipc_df))
        .finish()
        .map_err(|err| ExportError::Frame(format!("Failed to read IPC DataFrame bytes: {err}")))
}

/// Convert every dataframe row into one record object.
///
/// Dotted column names become nested objects (`"test.aa"` -> `{"test": {"aa": ..}}`)
/// so that dotted header paths resolve against them. When a plain column and a
/// dotted column collide, the later column wins.
pub fn derive_records_from_dataframe(df: &DataFrame) -> Result<Vec<Value>, ExportError> {
    let l_colnames: Vec<String> = df
        .get_column_names_str()
        .into_iter()
        .map(ToString::to_string)
        .collect();
    let l_cols = df.get_columns();

    let mut l_records = Vec::with_capacity(df.height());
    for n_idx_row in 0..df.height() {
        let mut dict_record = Map::new();
        for (c_name, col) in l_colnames.iter().zip(l_cols) {
            let value = col
                .get(n_idx_row)
                .map_err(|err| ExportError::Frame(format!("Failed to access cell value: {err}")))?;
            insert_nested_value(&mut dict_record, c_name, derive_json_from_any_value(value));
        }
        l_records.push(Value::Object(dict_record));
    }

    Ok(l_records)
}

fn insert_nested_value(dict_record: &mut Map<String, Value>, c_name: &str, value: Value) {
    let l_segments: Vec<&str> = c_name.split('.').collect();
    let Some((c_leaf, l_parents)) = l_segments.split_last() else {
        return;
    };

    let mut dict_current = dict_record;
    for c_segment in l_parents {
        let entry = dict_current
            .entry(c_segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(dict_next) = entry else {
            return;
        };
        dict_current = dict_next;
    }
    dict_current.insert(c_leaf.to_string(), value);
}

fn derive_json_from_any_value(value: AnyValue<'_>) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(val) => Value::Bool(val),
        AnyValue::String(val) => Value::String(val.to_string()),
        AnyValue::StringOwned(val) => Value::String(val.to_string()),
        AnyValue::UInt8(val) => Value::from(val),
        AnyValue::UInt16(val) => Value::from(val),
        AnyValue::UInt32(val) => Value::from(val),
        AnyValue::UInt64(val) => Value::from(val),
        AnyValue::Int8(val) => Value::from(val),
        AnyValue::Int16(val) => Value::from(val),
        AnyValue::Int32(val) => Value::from(val),
        AnyValue::Int64(val) => Value::from(val),
        AnyValue::Int128(val) => match i64::try_from(val) {
            Ok(val) => Value::from(val),
            Err(_) => derive_json_from_f64(val as f64),
        },
        AnyValue::Float32(val) => derive_json_from_f64(val as f64),
        AnyValue::Float64(val) => derive_json_from_f64(val),
        _ => Value::String(value.to_string()),
    }
}

fn derive_json_from_f64(x: f64) -> Value {
    Number::from_f64(x).map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::util::select_field_value;

    #[test]
    fn test_derive_records_from_dataframe_nests_dotted_columns() {
        let df = polars::df!(
            "orgName" => ["Acme", "Acme"],
            "test.aa" => ["n0", "n1"],
            "score" => [1.5, f64::NAN]
        )
        .expect("build df");

        let records = derive_records_from_dataframe(&df).expect("records");
        assert_eq!(
            records[0],
            json!({"orgName": "Acme", "test": {"aa": "n0"}, "score": 1.5})
        );
        assert_eq!(records[1]["score"], Value::Null);
        assert_eq!(select_field_value(&records[1], "test.aa"), json!("n1"));
    }

    #[test]
    fn test_derive_records_from_ipc_bytes_rejects_garbage() {
        assert!(matches!(
            derive_records_from_ipc_bytes(b"not ipc"),
            Err(ExportError::Frame(_))
        ));
    }
}
