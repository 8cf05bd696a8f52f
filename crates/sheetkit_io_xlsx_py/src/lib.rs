use std::path::PathBuf;
use std::sync::Arc;

use pyo3::IntoPyObjectExt;
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyAny, PyBool, PyBytes, PyDict, PyFloat, PyInt, PyList, PyString, PyTuple};
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};
use sheetkit_io_xlsx::conf::{
    derive_default_alignment, derive_default_layout_options, derive_default_sheet_formats,
};
use sheetkit_io_xlsx::spec::{
    EnumRowMergeRules, ExportError, FnRowSpan, SpecAlignment, SpecAutofitCellsPolicy,
    SpecCellFormat, SpecHeaderNode, SpecMergeRegion, SpecRowHeightPolicy, SpecRowMergeRule,
    SpecSheetFormats, SpecSheetLayoutOptions, SpecXlsxWriteOptions,
};
use sheetkit_io_xlsx::util::derive_records_from_json;
use sheetkit_io_xlsx::XlsxWriter as RsXlsxWriter;

const N_BRIDGE_ABI_VERSION: u64 = 1;
const C_BRIDGE_CONTRACT_VERSION: &str = "sheetkit.xlsx.writer.v1";
const C_BRIDGE_TRANSPORT: &str = "json_records+arrow_ipc";

#[pyclass(name = "XlsxWriter")]
struct PyXlsxWriter {
    #[pyo3(get)]
    file_out: String,
    inner: RsXlsxWriter,
}

#[pymethods]
impl PyXlsxWriter {
    #[new]
    #[pyo3(signature = (
        file_out,
        fmt_title = None,
        fmt_header = None,
        fmt_text = None,
        fmt_note = None,
        write_options = None
    ))]
    fn new(
        file_out: String,
        fmt_title: Option<&Bound<'_, PyAny>>,
        fmt_header: Option<&Bound<'_, PyAny>>,
        fmt_text: Option<&Bound<'_, PyAny>>,
        fmt_note: Option<&Bound<'_, PyAny>>,
        write_options: Option<&Bound<'_, PyAny>>,
    ) -> PyResult<Self> {
        let path_file_out = PathBuf::from(&file_out);

        let cfg_fmts_default = derive_default_sheet_formats();
        let cfg_fmts = SpecSheetFormats {
            title: overlay_cell_format(&cfg_fmts_default.title, fmt_title)?,
            header: overlay_cell_format(&cfg_fmts_default.header, fmt_header)?,
            text: overlay_cell_format(&cfg_fmts_default.text, fmt_text)?,
            note: overlay_cell_format(&cfg_fmts_default.note, fmt_note)?,
        };
        let cfg_write_options =
            parse_spec::<SpecXlsxWriteOptions>(write_options, "write_options")?.unwrap_or_default();

        let inner = RsXlsxWriter::new(path_file_out, cfg_fmts, cfg_write_options);
        Ok(Self { file_out, inner })
    }

    fn __enter__(slf: PyRefMut<'_, Self>) -> PyRefMut<'_, Self> {
        slf
    }

    #[pyo3(signature = (_exc_type=None, _exc=None, _tb=None))]
    fn __exit__(
        &mut self,
        _exc_type: Option<&Bound<'_, PyAny>>,
        _exc: Option<&Bound<'_, PyAny>>,
        _tb: Option<&Bound<'_, PyAny>>,
    ) -> PyResult<()> {
        self.close()
    }

    fn close(&mut self) -> PyResult<()> {
        self.inner.close().map_err(convert_export_error)
    }

    /// Return one `{"sheets": [...], "warnings": [...]}` dict per written sheet.
    fn report(&self, py: Python<'_>) -> PyResult<Py<PyAny>> {
        let l_reports = self.inner.report();

        let mut l_report_obj = Vec::with_capacity(l_reports.len());
        for report in l_reports {
            let mut l_sheet_obj = Vec::with_capacity(report.sheets.len());
            for sheet in report.sheets {
                let dict_sheet = PyDict::new(py);
                dict_sheet.set_item("sheet_name", sheet.sheet_name)?;
                dict_sheet.set_item("n_rows", sheet.n_rows)?;
                dict_sheet.set_item("n_cols", sheet.n_cols)?;
                dict_sheet.set_item("n_merges", sheet.n_merges)?;
                l_sheet_obj.push(dict_sheet);
            }

            let dict_report = PyDict::new(py);
            dict_report.set_item("sheets", PyList::new(py, l_sheet_obj)?)?;
            dict_report.set_item("warnings", report.warnings)?;
            l_report_obj.push(dict_report);
        }

        let tup_report = PyTuple::new(py, l_report_obj)?;
        Ok(tup_report.into_any().unbind())
    }

    /// Write one sheet.
    ///
    /// `records` is a sequence of dicts, or any object `polars.DataFrame(...)`
    /// accepts. `row_merge_rules` is either a list of `{"key", "merge"}` rules or
    /// a callable `(row_idx, col_idx, record) -> span`; callable failures count
    /// as span 0.
    #[pyo3(signature = (
        records,
        sheet_name,
        header = None,
        title = None,
        note = None,
        row_merge_rules = None,
        extra_merges = None,
        default_alignment = None,
        field_separator = None,
        policy_autofit = None,
        policy_row_height = None
    ))]
    #[allow(clippy::too_many_arguments)]
    fn write_sheet<'py>(
        mut slf: PyRefMut<'py, Self>,
        py: Python<'py>,
        records: &Bound<'py, PyAny>,
        sheet_name: &str,
        header: Option<&Bound<'py, PyAny>>,
        title: Option<String>,
        note: Option<String>,
        row_merge_rules: Option<&Bound<'py, PyAny>>,
        extra_merges: Option<&Bound<'py, PyAny>>,
        default_alignment: Option<&Bound<'py, PyAny>>,
        field_separator: Option<String>,
        policy_autofit: Option<&Bound<'py, PyAny>>,
        policy_row_height: Option<&Bound<'py, PyAny>>,
    ) -> PyResult<PyRefMut<'py, Self>> {
        let cfg_defaults = derive_default_layout_options();
        let cfg_layout_options = SpecSheetLayoutOptions {
            title,
            header: parse_spec::<Vec<SpecHeaderNode>>(header, "header")?,
            row_merge_rules: parse_row_merge_rules(row_merge_rules)?,
            extra_merges: parse_spec::<Vec<SpecMergeRegion>>(extra_merges, "extra_merges")?
                .unwrap_or_default(),
            note,
            default_alignment: match parse_spec::<SpecAlignment>(
                default_alignment,
                "default_alignment",
            )? {
                Some(alignment) => derive_default_alignment().merge(&alignment),
                None => cfg_defaults.default_alignment,
            },
            field_separator: field_separator.unwrap_or(cfg_defaults.field_separator),
            policy_autofit: parse_spec::<SpecAutofitCellsPolicy>(policy_autofit, "policy_autofit")?
                .unwrap_or_default(),
            policy_row_height: parse_spec::<SpecRowHeightPolicy>(
                policy_row_height,
                "policy_row_height",
            )?
            .unwrap_or_default(),
        };

        if records.is_instance_of::<PyList>() || records.is_instance_of::<PyTuple>() {
            let l_records = derive_records_from_json(convert_py_to_json(records)?)
                .map_err(convert_export_error)?;
            slf.inner
                .write_sheet(&l_records, sheet_name, &cfg_layout_options)
                .map_err(convert_export_error)?;
        } else {
            let v_ipc_df = derive_ipc_bytes_from_any_dataframe(py, records)?;
            slf.inner
                .write_sheet_from_ipc_bytes(&v_ipc_df, sheet_name, &cfg_layout_options)
                .map_err(convert_export_error)?;
        }

        Ok(slf)
    }
}

fn convert_export_error(err: ExportError) -> PyErr {
    match err {
        ExportError::InvalidInput(_) | ExportError::InvalidOption(_) | ExportError::Frame(_) => {
            PyValueError::new_err(err.to_string())
        }
        _ => PyRuntimeError::new_err(err.to_string()),
    }
}

fn overlay_cell_format(
    base: &SpecCellFormat,
    obj: Option<&Bound<'_, PyAny>>,
) -> PyResult<SpecCellFormat> {
    Ok(match parse_spec::<SpecCellFormat>(obj, "cell format")? {
        Some(patch) => base.merge(&patch),
        None => base.clone(),
    })
}

fn parse_spec<T: DeserializeOwned>(
    obj: Option<&Bound<'_, PyAny>>,
    c_name: &str,
) -> PyResult<Option<T>> {
    let Some(obj) = obj else {
        return Ok(None);
    };
    if obj.is_none() {
        return Ok(None);
    }

    let value = convert_py_to_json(obj)?;
    serde_json::from_value(value)
        .map(Some)
        .map_err(|err| PyValueError::new_err(format!("Invalid `{c_name}`: {err}")))
}

fn parse_row_merge_rules(obj: Option<&Bound<'_, PyAny>>) -> PyResult<EnumRowMergeRules> {
    let Some(obj) = obj else {
        return Ok(EnumRowMergeRules::default());
    };
    if obj.is_none() {
        return Ok(EnumRowMergeRules::default());
    }

    if obj.is_callable() {
        let fn_py: Py<PyAny> = obj.clone().unbind();
        let fn_span: FnRowSpan = Arc::new(move |n_row, n_col, record| {
            Python::with_gil(|py| {
                convert_json_to_py(py, record)
                    .and_then(|record_py| fn_py.call1(py, (n_row, n_col, record_py)))
                    .and_then(|span| span.extract::<usize>(py))
                    .unwrap_or(0)
            })
        });
        return Ok(EnumRowMergeRules::Function(fn_span));
    }

    let l_rules =
        parse_spec::<Vec<SpecRowMergeRule>>(Some(obj), "row_merge_rules")?.unwrap_or_default();
    Ok(EnumRowMergeRules::Rules(l_rules))
}

fn convert_py_to_json(obj: &Bound<'_, PyAny>) -> PyResult<Value> {
    if obj.is_none() {
        return Ok(Value::Null);
    }
    // `bool` is a subclass of `int`.
    if obj.is_instance_of::<PyBool>() {
        return Ok(Value::Bool(obj.extract::<bool>()?));
    }
    if obj.is_instance_of::<PyInt>() {
        if let Ok(val) = obj.extract::<i64>() {
            return Ok(Value::from(val));
        }
        if let Ok(val) = obj.extract::<u64>() {
            return Ok(Value::from(val));
        }
        return Ok(Number::from_f64(obj.extract::<f64>()?).map_or(Value::Null, Value::Number));
    }
    if obj.is_instance_of::<PyFloat>() {
        return Ok(Number::from_f64(obj.extract::<f64>()?).map_or(Value::Null, Value::Number));
    }
    if obj.is_instance_of::<PyString>() {
        return Ok(Value::String(obj.extract::<String>()?));
    }
    if let Ok(dict_obj) = obj.downcast::<PyDict>() {
        let mut dict_value = Map::new();
        for (key, val) in dict_obj.iter() {
            dict_value.insert(key.str()?.to_string(), convert_py_to_json(&val)?);
        }
        return Ok(Value::Object(dict_value));
    }
    if obj.is_instance_of::<PyList>() || obj.is_instance_of::<PyTuple>() {
        let mut l_values = Vec::new();
        for item in obj.try_iter()? {
            l_values.push(convert_py_to_json(&item?)?);
        }
        return Ok(Value::Array(l_values));
    }

    let module_dataclasses = obj.py().import("dataclasses")?;
    if module_dataclasses
        .call_method1("is_dataclass", (obj,))?
        .is_truthy()?
    {
        let dict_obj = module_dataclasses.call_method1("asdict", (obj,))?;
        return convert_py_to_json(&dict_obj);
    }

    Ok(Value::String(obj.str()?.to_string()))
}

fn convert_json_to_py(py: Python<'_>, value: &Value) -> PyResult<Py<PyAny>> {
    match value {
        Value::Null => Ok(py.None()),
        Value::Bool(val) => val.into_py_any(py),
        Value::Number(val) => {
            if let Some(n) = val.as_i64() {
                n.into_py_any(py)
            } else if let Some(n) = val.as_u64() {
                n.into_py_any(py)
            } else {
                val.as_f64().unwrap_or(f64::NAN).into_py_any(py)
            }
        }
        Value::String(val) => val.into_py_any(py),
        Value::Array(l_values) => {
            let l_items = l_values
                .iter()
                .map(|item| convert_json_to_py(py, item))
                .collect::<PyResult<Vec<_>>>()?;
            Ok(PyList::new(py, l_items)?.into_any().unbind())
        }
        Value::Object(dict_value) => {
            let dict_obj = PyDict::new(py);
            for (key, val) in dict_value {
                dict_obj.set_item(key, convert_json_to_py(py, val)?)?;
            }
            Ok(dict_obj.into_any().unbind())
        }
    }
}

fn derive_ipc_bytes_from_any_dataframe(
    py: Python<'_>,
    df: &Bound<'_, PyAny>,
) -> PyResult<Vec<u8>> {
    let df_polars = convert_to_polars_dataframe(py, df)?;
    df_polars
        .call_method1("write_ipc", (py.None(),))?
        .call_method0("getvalue")?
        .downcast_into::<PyBytes>()
        .map(|v_bytes| v_bytes.as_bytes().to_vec())
        .map_err(PyErr::from)
}

fn convert_to_polars_dataframe<'py>(
    py: Python<'py>,
    df: &Bound<'py, PyAny>,
) -> PyResult<Bound<'py, PyAny>> {
    let module_polars = py.import("polars")?;
    let cls_dataframe = module_polars.getattr("DataFrame")?;

    if df.is_instance(&cls_dataframe)? {
        return Ok(df.clone());
    }

    cls_dataframe.call1((df,))
}

#[pymodule]
fn _sheetkit_io_xlsx_rs(_py: Python<'_>, module: &Bound<'_, PyModule>) -> PyResult<()> {
    module.add_class::<PyXlsxWriter>()?;
    module.add("__bridge_abi__", N_BRIDGE_ABI_VERSION)?;
    module.add("__bridge_contract__", C_BRIDGE_CONTRACT_VERSION)?;
    module.add("__bridge_transport__", C_BRIDGE_TRANSPORT)?;
    Ok(())
}
