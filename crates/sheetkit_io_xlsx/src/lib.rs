//! `sheetkit_io_xlsx` v1:
//! Rust-side header/merge layout engine and XLSX writer kernel.
//!
//! Module map:
//! - `conf`   : Excel limits and default presets
//! - `spec`   : specs/models/options/errors
//! - `util`   : pure helper functions (field access, conversion, widths)
//! - `header` : header tree flattening and header-band merge planning
//! - `merge`  : data-row merge planning and merge reconciliation
//! - `layout` : full sheet layout (title, header, data, note)
//! - `frame`  : polars `DataFrame` / IPC payload conversion
//! - `writer` : pure-Rust writer kernel
pub mod conf;
pub mod frame;
pub mod header;
pub mod layout;
pub mod merge;
pub mod spec;
pub mod util;
pub mod writer;

pub use conf::{
    N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX, TUP_EXCEL_ILLEGAL,
    derive_default_alignment, derive_default_layout_options, derive_default_sheet_formats,
};
pub use frame::{derive_records_from_dataframe, derive_records_from_ipc_bytes};
pub use header::{
    SpecHeaderHorizontalPlan, calculate_header_span, derive_header_tree_from_record,
    flatten_header_tree, plan_header_horizontal_merges, plan_header_vertical_merges,
};
pub use layout::plan_sheet_layout;
pub use merge::{plan_row_merges, reconcile_merge_regions};
pub use spec::{
    EnumAutofitColumnsRule, EnumCellValue, EnumRowKind, EnumRowMergeRules, ExportError,
    FnRowSpan, SpecAlignment, SpecAutofitCellsPolicy, SpecCellFormat, SpecHeaderLayout,
    SpecHeaderNode, SpecLeafHeader, SpecMergeReconciliation, SpecMergeRegion, SpecMergeSources,
    SpecRowHeightPolicy, SpecRowMergeRule, SpecSheetFormats, SpecSheetLayout,
    SpecSheetLayoutOptions, SpecSheetSummary, SpecXlsxReport, SpecXlsxWriteOptions,
};
pub use util::{
    convert_json_to_cell_value, derive_records_from_json, sanitize_sheet_name, select_field_value,
};
pub use writer::XlsxWriter;
