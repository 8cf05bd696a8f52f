//! XLSX constants and default preset factories.

use crate::spec::{SpecAlignment, SpecCellFormat, SpecSheetFormats, SpecSheetLayoutOptions};

/// Excel worksheet maximum row count.
pub const N_NROWS_EXCEL_MAX: usize = 1_048_576;
/// Excel worksheet maximum column count.
pub const N_NCOLS_EXCEL_MAX: usize = 16_384;
/// Excel sheet name maximum length.
pub const N_LEN_EXCEL_SHEET_NAME_MAX: usize = 31;
/// Excel column width upper bound.
pub const N_WIDTH_EXCEL_COLUMN_MAX: usize = 255;
/// Characters not allowed in sheet names.
pub const TUP_EXCEL_ILLEGAL: [&str; 7] = ["*", ":", "?", "/", "\\", "[", "]"];

/// Document row of the title band.
pub const N_ROW_TITLE: usize = 0;
/// Document row of the first header level.
pub const N_ROW_HEADER_START: usize = 1;

/// Default alignment every header node and data column starts from.
pub fn derive_default_alignment() -> SpecAlignment {
    SpecAlignment {
        horizontal: Some("center".to_string()),
        vertical: Some("vcenter".to_string()),
        wrap: Some(false),
    }
}

/// Build default named format presets used by [`crate::writer::XlsxWriter`].
pub fn derive_default_sheet_formats() -> SpecSheetFormats {
    let cfg_base_fmt_spec = SpecCellFormat {
        font_name: Some("Times New Roman".to_string()),
        font_size: Some(11),
        border: Some(1),
        align: Some("center".to_string()),
        valign: Some("vcenter".to_string()),
        ..Default::default()
    };

    SpecSheetFormats {
        title: cfg_base_fmt_spec.with_(SpecCellFormat {
            font_size: Some(16),
            bold: Some(true),
            border: Some(0),
            ..Default::default()
        }),
        header: cfg_base_fmt_spec.with_(SpecCellFormat {
            bold: Some(true),
            text_wrap: Some(true),
            bg_color: Some("#D9E1F2".to_string()),
            ..Default::default()
        }),
        text: cfg_base_fmt_spec.clone(),
        note: cfg_base_fmt_spec.with_(SpecCellFormat {
            border: Some(0),
            align: Some("left".to_string()),
            valign: Some("top".to_string()),
            text_wrap: Some(true),
            ..Default::default()
        }),
    }
}

/// Build default per-sheet layout options.
pub fn derive_default_layout_options() -> SpecSheetLayoutOptions {
    SpecSheetLayoutOptions::default()
}
