//! XLSX writer kernel that renders planned sheet layouts into workbook output.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use polars::prelude::DataFrame;
use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, Workbook, Worksheet, XlsxError};
use serde_json::Value;
use tracing::{info, warn};

use crate::conf::N_LEN_EXCEL_SHEET_NAME_MAX;
use crate::frame::{derive_records_from_dataframe, derive_records_from_ipc_bytes};
use crate::layout::plan_sheet_layout;
use crate::spec::{
    EnumCellValue, EnumRowKind, ExportError, SpecCellFormat, SpecSheetFormats, SpecSheetLayout,
    SpecSheetLayoutOptions, SpecSheetSummary, SpecXlsxReport, SpecXlsxWriteOptions,
};
use crate::util::{cast_col_num, cast_row_num, sanitize_sheet_name};

/// Stateful workbook writer.
pub struct XlsxWriter {
    path_file_out: PathBuf,
    workbook: Workbook,
    formats: SpecSheetFormats,
    write_options: SpecXlsxWriteOptions,
    set_sheet_names_existing: BTreeSet<String>,
    l_reports: Vec<SpecXlsxReport>,
    if_closed: bool,
}

impl XlsxWriter {
    /// Create writer bound to output path and format/options presets.
    ///
    /// The workbook is buffered in memory until [`Self::close`] is called.
    pub fn new(
        path_file_out: PathBuf,
        formats: SpecSheetFormats,
        write_options: SpecXlsxWriteOptions,
    ) -> Self {
        Self {
            path_file_out,
            workbook: Workbook::new(),
            formats,
            write_options,
            set_sheet_names_existing: BTreeSet::new(),
            l_reports: Vec::new(),
            if_closed: false,
        }
    }

    /// Return output file path as string.
    pub fn file_out(&self) -> String {
        self.path_file_out.to_string_lossy().to_string()
    }

    /// Return immutable snapshot of per-sheet write reports.
    pub fn report(&self) -> Vec<SpecXlsxReport> {
        self.l_reports.clone()
    }

    /// Flush workbook to disk. Idempotent.
    pub fn close(&mut self) -> Result<(), ExportError> {
        if self.if_closed {
            return Ok(());
        }
        self.workbook.save(&self.path_file_out)?;
        self.if_closed = true;
        info!(
            target: "sheetkit_io_xlsx::writer",
            path = %self.path_file_out.display(),
            n_sheets = self.l_reports.len(),
            "workbook saved"
        );
        Ok(())
    }

    /// Plan and write one sheet from in-memory records.
    pub fn write_sheet(
        &mut self,
        records: &[Value],
        sheet_name: &str,
        options: &SpecSheetLayoutOptions,
    ) -> Result<(), ExportError> {
        if self.if_closed {
            return Err(ExportError::Closed);
        }
        let layout = plan_sheet_layout(records, options)?;
        self.write_layout(&layout, sheet_name)
    }

    /// Write one sheet from a dataframe; dotted column names become nested fields.
    pub fn write_sheet_from_dataframe(
        &mut self,
        df: &DataFrame,
        sheet_name: &str,
        options: &SpecSheetLayoutOptions,
    ) -> Result<(), ExportError> {
        let records = derive_records_from_dataframe(df)?;
        self.write_sheet(&records, sheet_name, options)
    }

    /// Write one sheet from IPC-serialized dataframe bytes.
    pub fn write_sheet_from_ipc_bytes(
        &mut self,
        v_ipc_df: &[u8],
        sheet_name: &str,
        options: &SpecSheetLayoutOptions,
    ) -> Result<(), ExportError> {
        let records = derive_records_from_ipc_bytes(v_ipc_df)?;
        self.write_sheet(&records, sheet_name, options)
    }

    /// Render an already planned layout into a new worksheet.
    pub fn write_layout(
        &mut self,
        layout: &SpecSheetLayout,
        sheet_name: &str,
    ) -> Result<(), ExportError> {
        if self.if_closed {
            return Err(ExportError::Closed);
        }

        let mut report = SpecXlsxReport::default();
        let sheet_name_unique =
            self.derive_unique_sheet_name(&sanitize_sheet_name(sheet_name, "_"));
        if sheet_name_unique != sheet_name {
            report.warn(format!(
                "Sheet name {sheet_name:?} written as {sheet_name_unique:?}."
            ));
        }

        let worksheet = self.workbook.add_worksheet();
        worksheet.set_name(&sheet_name_unique)?;

        let n_merges_applied =
            write_layout_cells(worksheet, layout, &self.formats, &mut report)?;

        for (n_idx_col, n_width) in layout.widths_by_col.iter().enumerate() {
            worksheet.set_column_width(cast_col_num(n_idx_col)?, *n_width)?;
        }
        for (n_idx_row, n_height) in &layout.heights_by_row {
            worksheet.set_row_height(cast_row_num(*n_idx_row)?, *n_height)?;
        }

        if !self.write_options.if_disable_freeze {
            let n_row_freeze = self
                .write_options
                .row_freeze
                .unwrap_or(layout.row_data_start);
            worksheet.set_freeze_panes(
                cast_row_num(n_row_freeze)?,
                cast_col_num(self.write_options.col_freeze)?,
            )?;
        }

        info!(
            target: "sheetkit_io_xlsx::writer",
            sheet = %sheet_name_unique,
            n_rows = layout.n_rows(),
            n_cols = layout.n_cols(),
            n_merges = n_merges_applied,
            "sheet written"
        );
        report.sheets.push(SpecSheetSummary {
            sheet_name: sheet_name_unique,
            n_rows: layout.n_rows(),
            n_cols: layout.n_cols(),
            n_merges: n_merges_applied,
        });
        self.l_reports.push(report);
        Ok(())
    }

    fn derive_unique_sheet_name(&mut self, name: &str) -> String {
        if !self.set_sheet_names_existing.contains(name) {
            self.set_sheet_names_existing.insert(name.to_string());
            return name.to_string();
        }

        let base_name: String = name
            .chars()
            .take(usize::max(1, N_LEN_EXCEL_SHEET_NAME_MAX - 3))
            .collect();

        let mut n_idx = 2usize;
        loop {
            let candidate: String = format!("{base_name}__{n_idx}")
                .chars()
                .take(N_LEN_EXCEL_SHEET_NAME_MAX)
                .collect();
            if !self.set_sheet_names_existing.contains(&candidate) {
                self.set_sheet_names_existing.insert(candidate.clone());
                return candidate;
            }
            n_idx += 1;
        }
    }
}

/// Resolve the format spec of one grid cell.
///
/// Header anchors of spanning nodes take the node alignment; data cells take
/// their column's resolved alignment.
pub fn derive_cell_format_spec(
    layout: &SpecSheetLayout,
    formats: &SpecSheetFormats,
    row_idx: usize,
    col_idx: usize,
) -> SpecCellFormat {
    match layout.row_kinds[row_idx] {
        EnumRowKind::Title => formats.title.clone(),
        EnumRowKind::Header => match layout.header_alignments.get(&(row_idx, col_idx)) {
            Some(alignment) => formats.header.with_alignment(alignment),
            None => formats.header.clone(),
        },
        EnumRowKind::Data => match layout.header_layout.alignments_by_col.get(col_idx) {
            Some(alignment) => formats.text.with_alignment(alignment),
            None => formats.text.clone(),
        },
        EnumRowKind::Blank => SpecCellFormat::default(),
        EnumRowKind::Note => formats.note.clone(),
    }
}

fn write_layout_cells(
    worksheet: &mut Worksheet,
    layout: &SpecSheetLayout,
    formats: &SpecSheetFormats,
    report: &mut SpecXlsxReport,
) -> Result<usize, ExportError> {
    let mut dict_fmt_cache: HashMap<SpecCellFormat, Format> = HashMap::new();
    let mut derive_format = |row_idx: usize, col_idx: usize| {
        let spec = derive_cell_format_spec(layout, formats, row_idx, col_idx);
        dict_fmt_cache
            .entry(spec)
            .or_insert_with_key(derive_rust_xlsx_format)
            .clone()
    };

    // Anchors are rewritten with their typed value in the cell pass below.
    let mut set_cells_covered = HashSet::new();
    let mut n_merges_applied = 0;
    for region in &layout.merges {
        let format = derive_format(region.row_start, region.col_start);
        let res_merge = worksheet.merge_range(
            cast_row_num(region.row_start)?,
            cast_col_num(region.col_start)?,
            cast_row_num(region.row_end)?,
            cast_col_num(region.col_end)?,
            "",
            &format,
        );
        match res_merge {
            Ok(_) => {}
            Err(err @ (XlsxError::MergeRangeOverlaps(..) | XlsxError::MergeRangeSingleCell)) => {
                warn!(
                    target: "sheetkit_io_xlsx::writer",
                    ?region,
                    %err,
                    "merge region rejected; skipped"
                );
                report.warn(format!("Merge region skipped {region:?}: {err}"));
                continue;
            }
            Err(err) => return Err(err.into()),
        }

        set_cells_covered.reserve(region.n_cells().saturating_sub(1));
        for row_idx in region.row_start..=region.row_end {
            for col_idx in region.col_start..=region.col_end {
                if (row_idx, col_idx) != (region.row_start, region.col_start) {
                    set_cells_covered.insert((row_idx, col_idx));
                }
            }
        }
        n_merges_applied += 1;
    }

    for (row_idx, v_row) in layout.grid.iter().enumerate() {
        if layout.row_kinds[row_idx] == EnumRowKind::Blank {
            continue;
        }
        for (col_idx, value) in v_row.iter().enumerate() {
            if set_cells_covered.contains(&(row_idx, col_idx)) {
                continue;
            }
            let format = derive_format(row_idx, col_idx);
            write_cell_with_format(worksheet, row_idx, col_idx, value, &format)?;
        }
    }

    Ok(n_merges_applied)
}

fn write_cell_with_format(
    worksheet: &mut Worksheet,
    row_idx: usize,
    col_idx: usize,
    value: &EnumCellValue,
    format: &Format,
) -> Result<(), ExportError> {
    if value.is_empty() {
        worksheet.write_blank(cast_row_num(row_idx)?, cast_col_num(col_idx)?, format)?;
        return Ok(());
    }
    match value {
        EnumCellValue::None => {}
        EnumCellValue::String(val) => {
            worksheet.write_string_with_format(
                cast_row_num(row_idx)?,
                cast_col_num(col_idx)?,
                val,
                format,
            )?;
        }
        EnumCellValue::Number(val) => {
            worksheet.write_number_with_format(
                cast_row_num(row_idx)?,
                cast_col_num(col_idx)?,
                *val,
                format,
            )?;
        }
    }
    Ok(())
}

fn derive_rust_xlsx_format(spec: &SpecCellFormat) -> Format {
    let mut format = Format::new();

    if let Some(val) = &spec.font_name {
        format = format.set_font_name(val.clone());
    }
    if let Some(val) = spec.font_size {
        format = format.set_font_size(val as f64);
    }
    if spec.bold.unwrap_or(false) {
        format = format.set_bold();
    }
    if spec.italic.unwrap_or(false) {
        format = format.set_italic();
    }

    if let Some(val) = &spec.align
        && let Some(align) = derive_format_align(val)
    {
        format = format.set_align(align);
    }
    if let Some(val) = &spec.valign
        && let Some(align) = derive_format_align(val)
    {
        format = format.set_align(align);
    }

    if let Some(val) = &spec.num_format {
        format = format.set_num_format(val.clone());
    }
    if let Some(val) = &spec.bg_color {
        format = format.set_background_color(val.as_str());
    }
    if let Some(val) = &spec.font_color {
        format = format.set_font_color(val.as_str());
    }
    if let Some(val) = spec.border {
        format = format.set_border(derive_format_border(val));
    }
    if spec.text_wrap.unwrap_or(false) {
        format = format.set_text_wrap();
    }

    format
}

fn derive_format_border(border: i64) -> FormatBorder {
    match border {
        1 => FormatBorder::Thin,
        2 => FormatBorder::Medium,
        3 => FormatBorder::Dashed,
        4 => FormatBorder::Dotted,
        5 => FormatBorder::Thick,
        6 => FormatBorder::Double,
        7 => FormatBorder::Hair,
        _ => FormatBorder::None,
    }
}

fn derive_format_align(align: &str) -> Option<FormatAlign> {
    let value = align.trim().to_ascii_lowercase();
    match value.as_str() {
        "general" => Some(FormatAlign::General),
        "left" => Some(FormatAlign::Left),
        "center" => Some(FormatAlign::Center),
        "right" => Some(FormatAlign::Right),
        "fill" => Some(FormatAlign::Fill),
        "justify" => Some(FormatAlign::Justify),
        "center_across" => Some(FormatAlign::CenterAcross),
        "distributed" => Some(FormatAlign::Distributed),
        "top" => Some(FormatAlign::Top),
        "bottom" => Some(FormatAlign::Bottom),
        "vcenter" | "vertical_center" | "middle" => Some(FormatAlign::VerticalCenter),
        "vjustify" | "vertical_justify" => Some(FormatAlign::VerticalJustify),
        "vdistributed" | "vertical_distributed" => Some(FormatAlign::VerticalDistributed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::conf::derive_default_sheet_formats;
    use crate::spec::{EnumRowMergeRules, SpecHeaderNode, SpecMergeRegion, SpecRowMergeRule};

    fn derive_writer(tmp: &tempfile::TempDir) -> XlsxWriter {
        XlsxWriter::new(
            tmp.path().join("out.xlsx"),
            derive_default_sheet_formats(),
            SpecXlsxWriteOptions::default(),
        )
    }

    fn derive_records() -> Vec<Value> {
        vec![
            json!({"org": "Acme", "name": "a", "score": 1}),
            json!({"org": "Acme", "name": "b", "score": 2}),
            json!({"org": "Beta", "name": "c", "score": 3}),
        ]
    }

    #[test]
    fn test_write_sheet_and_close_creates_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut writer = derive_writer(&tmp);
        let options = SpecSheetLayoutOptions {
            title: Some("Report".to_string()),
            header: Some(vec![
                SpecHeaderNode::leaf("Org", "org"),
                SpecHeaderNode::group(
                    "Detail",
                    vec![
                        SpecHeaderNode::leaf("Name", "name"),
                        SpecHeaderNode::leaf("Score", "score"),
                    ],
                ),
            ]),
            row_merge_rules: EnumRowMergeRules::Rules(vec![SpecRowMergeRule {
                key: "org".to_string(),
                merge: true,
            }]),
            note: Some("generated".to_string()),
            ..Default::default()
        };

        writer
            .write_sheet(&derive_records(), "Data", &options)
            .expect("write sheet");
        writer.close().expect("close");
        writer.close().expect("close is idempotent");

        assert!(tmp.path().join("out.xlsx").exists());
        let l_reports = writer.report();
        assert_eq!(l_reports.len(), 1);
        assert_eq!(
            l_reports[0].sheets[0],
            SpecSheetSummary {
                sheet_name: "Data".to_string(),
                n_rows: 8,
                n_cols: 3,
                // title, Detail, Org vertical, Acme run, note
                n_merges: 5,
            }
        );
        assert!(l_reports[0].warnings.is_empty());
    }

    #[test]
    fn test_write_after_close_fails() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut writer = derive_writer(&tmp);
        writer.close().expect("close");
        let err = writer
            .write_sheet(&derive_records(), "Data", &SpecSheetLayoutOptions::default())
            .expect_err("closed writer must reject writes");
        assert!(matches!(err, ExportError::Closed));
    }

    #[test]
    fn test_write_sheet_deduplicates_and_sanitizes_names() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut writer = derive_writer(&tmp);
        let options = SpecSheetLayoutOptions::default();
        writer
            .write_sheet(&derive_records(), "a/b", &options)
            .expect("write first");
        writer
            .write_sheet(&derive_records(), "a_b", &options)
            .expect("write second");

        let l_reports = writer.report();
        assert_eq!(l_reports[0].sheets[0].sheet_name, "a_b");
        assert_eq!(l_reports[1].sheets[0].sheet_name, "a_b__2");
        assert_eq!(l_reports[0].warnings.len(), 1);
    }

    #[test]
    fn test_write_sheet_skips_overlapping_extra_merge() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut writer = derive_writer(&tmp);
        let options = SpecSheetLayoutOptions {
            extra_merges: vec![SpecMergeRegion::new(0, 0, 2, 0)],
            ..Default::default()
        };
        writer
            .write_sheet(&derive_records(), "Data", &options)
            .expect("overlap is not fatal");

        let l_reports = writer.report();
        assert_eq!(l_reports[0].sheets[0].n_merges, 1);
        assert_eq!(l_reports[0].warnings.len(), 1);
    }

    #[test]
    fn test_write_sheet_blank_values_inside_merged_run() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut writer = derive_writer(&tmp);
        let records = vec![
            json!({"org": "", "name": "a"}),
            json!({"org": "", "name": ""}),
            json!({"org": null, "name": "c"}),
        ];
        let options = SpecSheetLayoutOptions {
            row_merge_rules: EnumRowMergeRules::Rules(vec![SpecRowMergeRule {
                key: "org".to_string(),
                merge: true,
            }]),
            ..Default::default()
        };
        writer
            .write_sheet(&records, "Blanks", &options)
            .expect("blank cells are written");
        writer.close().expect("close");

        let l_reports = writer.report();
        // title band plus one run over all three rows (null resolves to "")
        assert_eq!(l_reports[0].sheets[0].n_merges, 2);
        assert!(l_reports[0].warnings.is_empty());
    }

    #[test]
    fn test_write_sheet_rejects_empty_records() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut writer = derive_writer(&tmp);
        let err = writer
            .write_sheet(&[], "Data", &SpecSheetLayoutOptions::default())
            .expect_err("empty records must fail");
        assert!(matches!(err, ExportError::InvalidInput(_)));
    }

    #[test]
    fn test_derive_cell_format_spec_applies_column_and_anchor_alignment() {
        let options = SpecSheetLayoutOptions {
            header: Some(vec![
                SpecHeaderNode {
                    alignment: Some(crate::spec::SpecAlignment {
                        horizontal: Some("left".to_string()),
                        ..Default::default()
                    }),
                    ..SpecHeaderNode::leaf("Org", "org")
                },
                SpecHeaderNode {
                    alignment: Some(crate::spec::SpecAlignment {
                        horizontal: Some("right".to_string()),
                        ..Default::default()
                    }),
                    ..SpecHeaderNode::group(
                        "Detail",
                        vec![
                            SpecHeaderNode::leaf("Name", "name"),
                            SpecHeaderNode::leaf("Score", "score"),
                        ],
                    )
                },
            ]),
            ..Default::default()
        };
        let layout = plan_sheet_layout(&derive_records(), &options).expect("layout");
        let formats = derive_default_sheet_formats();

        let fmt_data = derive_cell_format_spec(&layout, &formats, layout.row_data_start, 0);
        assert_eq!(fmt_data.align.as_deref(), Some("left"));
        let fmt_anchor = derive_cell_format_spec(&layout, &formats, 1, 1);
        assert_eq!(fmt_anchor.align.as_deref(), Some("right"));
        assert_eq!(fmt_anchor.bold, Some(true));
        let fmt_leaf_header = derive_cell_format_spec(&layout, &formats, 2, 1);
        assert_eq!(fmt_leaf_header, formats.header);
    }
}
