//! Sheet layout assembly: title band, header band, data rows and note block.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::conf::{
    N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX, N_ROW_HEADER_START, N_ROW_TITLE,
    N_WIDTH_EXCEL_COLUMN_MAX,
};
use crate::header::{
    calculate_header_span, derive_header_tree_from_record, flatten_header_tree,
    plan_header_horizontal_merges, plan_header_vertical_merges,
};
use crate::merge::{plan_row_merges, reconcile_merge_regions};
use crate::spec::{
    EnumAutofitColumnsRule, EnumCellValue, EnumRowKind, ExportError, SpecAutofitCellsPolicy,
    SpecHeaderLayout, SpecLeafHeader, SpecMergeRegion, SpecMergeSources, SpecRowHeightPolicy,
    SpecSheetLayout, SpecSheetLayoutOptions,
};
use crate::util::{
    convert_json_to_cell_value, convert_json_to_text, estimate_cell_width,
    estimate_unicode_string_width, select_field_value, validate_records,
};

/// Plan the full sheet grid, merge list, widths and heights for `records`.
///
/// Only an empty record list is rejected; every other configuration mistake
/// degrades to blank cells or skipped rules.
pub fn plan_sheet_layout(
    records: &[Value],
    options: &SpecSheetLayoutOptions,
) -> Result<SpecSheetLayout, ExportError> {
    validate_records(records)?;
    validate_policy_autofit(&options.policy_autofit)?;

    let l_nodes = match &options.header {
        Some(l_nodes) => l_nodes.clone(),
        None => {
            debug!(
                target: "sheetkit_io_xlsx::layout",
                "no header tree supplied; deriving one level from the first record"
            );
            derive_header_tree_from_record(&records[0])
        }
    };

    let header_layout = flatten_header_tree(&l_nodes, &options.default_alignment);
    let n_cols = header_layout.n_cols;
    let n_levels = header_layout.header_rows.len();
    let n_rows_data = records.len();
    let row_header_start = N_ROW_HEADER_START;
    let row_data_start = row_header_start + n_levels;

    let mut grid = Vec::with_capacity(row_data_start + n_rows_data + 2);
    let mut row_kinds = Vec::with_capacity(grid.capacity());

    grid.push(derive_banner_row(n_cols, options.title.as_deref()));
    row_kinds.push(EnumRowKind::Title);

    for v_header_row in &header_layout.header_rows {
        grid.push(
            v_header_row
                .iter()
                .map(|c_title| {
                    if c_title.is_empty() {
                        EnumCellValue::None
                    } else {
                        EnumCellValue::String(c_title.clone())
                    }
                })
                .collect(),
        );
        row_kinds.push(EnumRowKind::Header);
    }

    for record in records {
        grid.push(
            header_layout
                .leaf_headers
                .iter()
                .map(|leaf| derive_leaf_cell_value(record, leaf, &options.field_separator))
                .collect(),
        );
        row_kinds.push(EnumRowKind::Data);
    }

    let mut row_note = None;
    if let Some(c_note) = &options.note {
        grid.push(vec![EnumCellValue::None; n_cols]);
        row_kinds.push(EnumRowKind::Blank);
        row_note = Some(grid.len());
        grid.push(derive_banner_row(n_cols, Some(c_note)));
        row_kinds.push(EnumRowKind::Note);
    }

    if grid.len() > N_NROWS_EXCEL_MAX || n_cols > N_NCOLS_EXCEL_MAX {
        return Err(ExportError::ExcelLimit {
            n_rows: grid.len(),
            n_cols,
        });
    }

    let plan_horizontal = plan_header_horizontal_merges(
        &l_nodes,
        &options.default_alignment,
        row_header_start,
    );
    let l_merges_vertical =
        plan_header_vertical_merges(&header_layout.header_rows, row_header_start);
    let l_merges_rows = plan_row_merges(
        records,
        &header_layout.leaf_headers,
        &options.row_merge_rules,
        row_data_start,
    );

    let derive_band = |row_idx: usize| {
        (n_cols > 0).then(|| SpecMergeRegion::new(row_idx, 0, row_idx, n_cols - 1))
    };
    let reconciliation = reconcile_merge_regions(SpecMergeSources {
        title: derive_band(N_ROW_TITLE),
        header_horizontal: plan_horizontal.merges,
        header_vertical: l_merges_vertical,
        extra: options.extra_merges.clone(),
        rows: l_merges_rows,
        note: row_note.and_then(derive_band),
    });

    let widths_by_col = plan_column_widths(
        &header_layout,
        &grid[row_data_start..row_data_start + n_rows_data],
        &options.policy_autofit,
    );
    let heights_by_row = plan_row_heights(
        &row_kinds,
        options.note.as_deref(),
        &options.policy_row_height,
    );

    Ok(SpecSheetLayout {
        grid,
        row_kinds,
        merges: reconciliation.merges,
        header_layout,
        header_alignments: plan_horizontal.alignments,
        widths_by_col,
        heights_by_row,
        row_header_start,
        row_data_start,
        n_rows_data,
        n_merges_dropped: reconciliation.n_dropped,
    })
}

fn derive_banner_row(n_cols: usize, text: Option<&str>) -> Vec<EnumCellValue> {
    let mut v_row = vec![EnumCellValue::None; n_cols];
    if let (Some(c_text), Some(cell)) = (text, v_row.first_mut()) {
        *cell = EnumCellValue::String(c_text.to_string());
    }
    v_row
}

/// Resolve one leaf's cell value from a record.
///
/// A single field keeps its JSON type; several fields are joined as text,
/// skipping empty parts.
pub fn derive_leaf_cell_value(
    record: &Value,
    leaf: &SpecLeafHeader,
    field_separator: &str,
) -> EnumCellValue {
    let l_fields = leaf.node.derive_field_names();
    match l_fields.as_slice() {
        [] => EnumCellValue::None,
        [c_field] => convert_json_to_cell_value(&select_field_value(record, c_field)),
        _ => EnumCellValue::String(
            l_fields
                .iter()
                .map(|c_field| convert_json_to_text(&select_field_value(record, c_field)))
                .filter(|c_text| !c_text.is_empty())
                .collect::<Vec<_>>()
                .join(field_separator),
        ),
    }
}

////////////////////////////////////////////////////////////////////////////////
// #region SizePlanning

fn validate_policy_autofit(policy_autofit: &SpecAutofitCellsPolicy) -> Result<(), ExportError> {
    if policy_autofit.width_cell_min == 0 {
        return Err(ExportError::InvalidOption(
            "policy_autofit.width_cell_min must be >= 1.".to_string(),
        ));
    }
    if policy_autofit.width_cell_max < policy_autofit.width_cell_min {
        return Err(ExportError::InvalidOption(
            "policy_autofit.width_cell_max must be >= policy_autofit.width_cell_min.".to_string(),
        ));
    }
    Ok(())
}

/// Final width per column: explicit leaf width wins, otherwise autofit.
///
/// Ancestor titles contribute their width spread evenly over their span.
pub fn plan_column_widths(
    header_layout: &SpecHeaderLayout,
    rows_data: &[Vec<EnumCellValue>],
    policy_autofit: &SpecAutofitCellsPolicy,
) -> Vec<f64> {
    let n_min = usize::max(1, policy_autofit.width_cell_min);
    let n_max = usize::min(
        N_WIDTH_EXCEL_COLUMN_MAX,
        usize::max(n_min, policy_autofit.width_cell_max),
    );
    let n_pad = policy_autofit.width_cell_padding;
    let n_rows_body = match policy_autofit.height_body_inferred_max {
        Some(n_rows_max) => usize::min(n_rows_max, rows_data.len()),
        None => rows_data.len(),
    };

    header_layout
        .leaf_headers
        .iter()
        .map(|leaf| {
            if let Some(n_width) = leaf.node.width {
                return n_width;
            }

            let n_width_header = leaf
                .path
                .iter()
                .map(|node| {
                    estimate_unicode_string_width(&node.title)
                        .div_ceil(calculate_header_span(node))
                })
                .max()
                .unwrap_or(0);
            let n_width_body = rows_data[..n_rows_body]
                .iter()
                .map(|v_row| estimate_cell_width(&v_row[leaf.col_idx]))
                .max()
                .unwrap_or(0);

            let n_width_recorded = match policy_autofit.rule_columns {
                EnumAutofitColumnsRule::None => return n_min as f64,
                EnumAutofitColumnsRule::Header => n_width_header,
                EnumAutofitColumnsRule::Body => n_width_body,
                EnumAutofitColumnsRule::All => usize::max(n_width_header, n_width_body),
            };
            usize::min(n_max, usize::max(n_min, n_width_recorded + n_pad)) as f64
        })
        .collect()
}

/// Explicit heights keyed by grid row.
pub fn plan_row_heights(
    row_kinds: &[EnumRowKind],
    note: Option<&str>,
    policy_row_height: &SpecRowHeightPolicy,
) -> BTreeMap<usize, f64> {
    let n_note_lines = note.map_or(1, |c_note| usize::max(1, c_note.lines().count()));

    row_kinds
        .iter()
        .enumerate()
        .filter_map(|(n_idx_row, kind)| {
            let n_height = match kind {
                EnumRowKind::Title => policy_row_height.height_title,
                EnumRowKind::Header => policy_row_height.height_header,
                EnumRowKind::Data => policy_row_height.height_data,
                EnumRowKind::Blank => None,
                EnumRowKind::Note => policy_row_height
                    .height_note_line
                    .map(|n_line| n_line * n_note_lines as f64),
            };
            n_height.map(|n_height| (n_idx_row, n_height))
        })
        .collect()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
