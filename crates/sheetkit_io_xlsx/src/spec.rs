//! Shared layout/writer specification models, options and errors.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

////////////////////////////////////////////////////////////////////////////////
// #region CellFormatSpecification

/// Cell format specification used for title/header/body/note cells.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(default)]
pub struct SpecCellFormat {
    /// Font family name.
    pub font_name: Option<String>,
    /// Font size in points.
    pub font_size: Option<i64>,
    /// Bold style.
    pub bold: Option<bool>,
    /// Italic style.
    pub italic: Option<bool>,

    /// Horizontal alignment.
    pub align: Option<String>,
    /// Vertical alignment.
    pub valign: Option<String>,
    /// Border style for all sides.
    pub border: Option<i64>,
    /// Text wrap.
    pub text_wrap: Option<bool>,

    /// Number format code.
    pub num_format: Option<String>,
    /// Background fill color.
    pub bg_color: Option<String>,
    /// Font color.
    pub font_color: Option<String>,
}

impl SpecCellFormat {
    /// Return a new format by overlaying `patch` onto `self`.
    pub fn with_(&self, patch: SpecCellFormat) -> SpecCellFormat {
        self.merge(&patch)
    }

    /// Merge two formats with right-side non-`None` overwrite semantics.
    pub fn merge(&self, other: &SpecCellFormat) -> SpecCellFormat {
        SpecCellFormat {
            font_name: other.font_name.clone().or_else(|| self.font_name.clone()),
            font_size: other.font_size.or(self.font_size),
            bold: other.bold.or(self.bold),
            italic: other.italic.or(self.italic),
            align: other.align.clone().or_else(|| self.align.clone()),
            valign: other.valign.clone().or_else(|| self.valign.clone()),
            border: other.border.or(self.border),
            text_wrap: other.text_wrap.or(self.text_wrap),
            num_format: other.num_format.clone().or_else(|| self.num_format.clone()),
            bg_color: other.bg_color.clone().or_else(|| self.bg_color.clone()),
            font_color: other.font_color.clone().or_else(|| self.font_color.clone()),
        }
    }

    /// Overlay the alignment keys that are set in `alignment`.
    pub fn with_alignment(&self, alignment: &SpecAlignment) -> SpecCellFormat {
        self.merge(&SpecCellFormat {
            align: alignment.horizontal.clone(),
            valign: alignment.vertical.clone(),
            text_wrap: alignment.wrap,
            ..Default::default()
        })
    }
}

/// Alignment patch for header nodes and data columns.
///
/// Only `horizontal`, `vertical` and `wrap` are recognized. Merging is a shallow
/// per-key overlay: keys set on the right side win, unset keys are inherited.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(default)]
pub struct SpecAlignment {
    /// Horizontal alignment (`left`, `center`, `right`, ...).
    pub horizontal: Option<String>,
    /// Vertical alignment (`top`, `vcenter`, `bottom`, ...).
    pub vertical: Option<String>,
    /// Wrap text inside the cell.
    pub wrap: Option<bool>,
}

impl SpecAlignment {
    /// Merge two alignments with right-side non-`None` overwrite semantics.
    pub fn merge(&self, other: &SpecAlignment) -> SpecAlignment {
        SpecAlignment {
            horizontal: other
                .horizontal
                .clone()
                .or_else(|| self.horizontal.clone()),
            vertical: other.vertical.clone().or_else(|| self.vertical.clone()),
            wrap: other.wrap.or(self.wrap),
        }
    }

    /// Resolve an optional node-level patch over `self`.
    pub fn resolve(&self, patch: Option<&SpecAlignment>) -> SpecAlignment {
        match patch {
            Some(patch) => self.merge(patch),
            None => self.clone(),
        }
    }
}

/// Named formats used when rendering one sheet.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct SpecSheetFormats {
    /// Title band format (row 0).
    pub title: SpecCellFormat,
    /// Header band format.
    pub header: SpecCellFormat,
    /// Data cell base format.
    pub text: SpecCellFormat,
    /// Note block format.
    pub note: SpecCellFormat,
}

/// Normalized cell value during conversion/write pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumCellValue {
    /// Missing/blank value.
    None,
    /// Text value.
    String(String),
    /// Numeric value.
    Number(f64),
}

impl EnumCellValue {
    /// Display text used for width estimation and merged anchors.
    pub fn to_text(&self) -> String {
        match self {
            EnumCellValue::None => String::new(),
            EnumCellValue::String(s) => s.clone(),
            EnumCellValue::Number(n) => n.to_string(),
        }
    }

    /// `true` for `None` and empty strings.
    pub fn is_empty(&self) -> bool {
        match self {
            EnumCellValue::None => true,
            EnumCellValue::String(s) => s.is_empty(),
            EnumCellValue::Number(_) => false,
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region HeaderSpecification

/// One node of the caller's header tree.
///
/// A node with no children is a leaf and produces exactly one data column.
/// Internal nodes never produce a column of their own.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct SpecHeaderNode {
    /// Comma-joined field list; each field may be a dotted path.
    #[serde(alias = "prop")]
    pub property_path: Option<String>,
    /// Legacy single-field alias.
    #[serde(alias = "key")]
    pub fixed_key: Option<String>,
    /// Header title text.
    pub title: String,
    /// Partial alignment overriding the default alignment.
    pub alignment: Option<SpecAlignment>,
    /// Explicit column width (Excel character units), leaves only.
    pub width: Option<f64>,
    /// Ordered child nodes.
    pub children: Vec<SpecHeaderNode>,
}

impl SpecHeaderNode {
    /// Create a leaf bound to one field.
    pub fn leaf(title: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            fixed_key: Some(key.into()),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Create an internal node.
    pub fn group(title: impl Into<String>, children: Vec<SpecHeaderNode>) -> Self {
        Self {
            title: title.into(),
            children,
            ..Default::default()
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Field names this node reads, in declaration order.
    ///
    /// `property_path` wins over `fixed_key` when both are set.
    pub fn derive_field_names(&self) -> Vec<String> {
        if let Some(c_prop) = &self.property_path {
            let l_fields: Vec<String> = c_prop
                .split(',')
                .map(str::trim)
                .filter(|c_field| !c_field.is_empty())
                .map(ToString::to_string)
                .collect();
            if !l_fields.is_empty() {
                return l_fields;
            }
        }
        match &self.fixed_key {
            Some(c_key) if !c_key.is_empty() => vec![c_key.clone()],
            _ => vec![],
        }
    }

    /// First field name, used as the comparison key of a blank merge rule.
    pub fn derive_primary_key(&self) -> Option<String> {
        self.derive_field_names().into_iter().next()
    }

    /// `true` when a row-merge rule key selects this node's column.
    pub fn matches_field(&self, key: &str) -> bool {
        self.fixed_key.as_deref() == Some(key)
            || self.derive_field_names().iter().any(|c_field| c_field == key)
    }
}

/// One leaf column derived from the header tree.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecLeafHeader {
    /// Source leaf node.
    pub node: SpecHeaderNode,
    /// Default alignment overlaid with the node's own alignment.
    pub alignment: SpecAlignment,
    /// Ancestors from root to the leaf itself (inclusive).
    pub path: Vec<SpecHeaderNode>,
    /// Zero-based column index.
    pub col_idx: usize,
}

/// Flattened header tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecHeaderLayout {
    /// One row per tree depth; `header_rows[d][c]` is the title at depth `d` above column `c`.
    pub header_rows: Vec<Vec<String>>,
    /// Leaves in left-to-right order.
    pub leaf_headers: Vec<SpecLeafHeader>,
    /// Number of leaf columns.
    pub n_cols: usize,
    /// Resolved alignment by column.
    pub alignments_by_col: Vec<SpecAlignment>,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region MergeSpecification

/// Rectangular merge region, zero-based and inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub struct SpecMergeRegion {
    /// First row.
    #[serde(alias = "s_r")]
    pub row_start: usize,
    /// First column.
    #[serde(alias = "s_c")]
    pub col_start: usize,
    /// Last row.
    #[serde(alias = "e_r")]
    pub row_end: usize,
    /// Last column.
    #[serde(alias = "e_c")]
    pub col_end: usize,
}

impl SpecMergeRegion {
    pub fn new(row_start: usize, col_start: usize, row_end: usize, col_end: usize) -> Self {
        Self {
            row_start,
            col_start,
            row_end,
            col_end,
        }
    }

    /// Covers exactly one cell.
    pub fn is_degenerate(&self) -> bool {
        self.row_start == self.row_end && self.col_start == self.col_end
    }

    /// Start lies after end on either axis.
    pub fn is_inverted(&self) -> bool {
        self.row_start > self.row_end || self.col_start > self.col_end
    }

    /// Number of covered cells; 0 for inverted regions.
    pub fn n_cells(&self) -> usize {
        if self.is_inverted() {
            return 0;
        }
        (self.row_end - self.row_start + 1) * (self.col_end - self.col_start + 1)
    }
}

/// Declarative equal-value row merge rule.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct SpecRowMergeRule {
    /// Field name selecting the target column (and compared value).
    pub key: String,
    /// Disabled rules are ignored.
    pub merge: bool,
}

/// Explicit row-span callback: `(row_idx_data, col_idx, record) -> span`.
pub type FnRowSpan = Arc<dyn Fn(usize, usize, &Value) -> usize + Send + Sync>;

/// Row merge rules, selected by container type.
#[derive(Clone, Deserialize)]
#[serde(from = "Vec<SpecRowMergeRule>")]
pub enum EnumRowMergeRules {
    /// Per-cell explicit span count.
    Function(FnRowSpan),
    /// Ordered equal-value rules.
    Rules(Vec<SpecRowMergeRule>),
}

impl Default for EnumRowMergeRules {
    fn default() -> Self {
        EnumRowMergeRules::Rules(vec![])
    }
}

impl From<Vec<SpecRowMergeRule>> for EnumRowMergeRules {
    fn from(rules: Vec<SpecRowMergeRule>) -> Self {
        EnumRowMergeRules::Rules(rules)
    }
}

impl fmt::Debug for EnumRowMergeRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(_) => f.write_str("Function(<fn>)"),
            Self::Rules(rules) => f.debug_tuple("Rules").field(rules).finish(),
        }
    }
}

/// Merge inputs in reconciliation order.
#[derive(Debug, Clone, Default)]
pub struct SpecMergeSources {
    /// Title band across all columns.
    pub title: Option<SpecMergeRegion>,
    /// Internal header nodes spanning several columns.
    pub header_horizontal: Vec<SpecMergeRegion>,
    /// Shallow header titles stretched through empty cells below/above.
    pub header_vertical: Vec<SpecMergeRegion>,
    /// Caller-supplied regions, passed through verbatim.
    pub extra: Vec<SpecMergeRegion>,
    /// Equal-run / explicit-span data merges.
    pub rows: Vec<SpecMergeRegion>,
    /// Note band across all columns.
    pub note: Option<SpecMergeRegion>,
}

/// Reconciled merge list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecMergeReconciliation {
    /// Surviving regions in source order.
    pub merges: Vec<SpecMergeRegion>,
    /// Number of degenerate or inverted regions dropped.
    pub n_dropped: usize,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region LayoutOptions

/// Autofit rule for column width inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnumAutofitColumnsRule {
    /// Disable autofit; columns without explicit width use `width_cell_min`.
    None,
    /// Infer width from header cells only.
    Header,
    /// Infer width from body cells only.
    Body,
    /// Infer width from both header and body cells (default).
    #[default]
    All,
}

/// Autofit policy for column widths.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SpecAutofitCellsPolicy {
    /// Autofit width inference rule.
    pub rule_columns: EnumAutofitColumnsRule,
    /// Max body rows inspected when body-based inference is active.
    pub height_body_inferred_max: Option<usize>,
    /// Minimum final width.
    pub width_cell_min: usize,
    /// Maximum final width.
    pub width_cell_max: usize,
    /// Width padding added after inference.
    pub width_cell_padding: usize,
}

impl Default for SpecAutofitCellsPolicy {
    fn default() -> Self {
        Self {
            rule_columns: EnumAutofitColumnsRule::All,
            height_body_inferred_max: Some(20_000),
            width_cell_min: 8,
            width_cell_max: 60,
            width_cell_padding: 2,
        }
    }
}

/// Row heights in points; `None` keeps the Excel default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SpecRowHeightPolicy {
    /// Title band height.
    pub height_title: Option<f64>,
    /// Height of every header row.
    pub height_header: Option<f64>,
    /// Height of every data row.
    pub height_data: Option<f64>,
    /// Note row height per text line.
    pub height_note_line: Option<f64>,
}

impl Default for SpecRowHeightPolicy {
    fn default() -> Self {
        Self {
            height_title: Some(30.0),
            height_header: Some(20.0),
            height_data: None,
            height_note_line: Some(15.0),
        }
    }
}

/// Per-sheet layout options.
///
/// Unknown fields are ignored when loaded from JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpecSheetLayoutOptions {
    /// Title text for row 0; the band is reserved even when absent.
    pub title: Option<String>,
    /// Header tree; auto-derived from the first record when `None`.
    pub header: Option<Vec<SpecHeaderNode>>,
    /// Row merge rules.
    pub row_merge_rules: EnumRowMergeRules,
    /// Extra regions passed through verbatim.
    pub extra_merges: Vec<SpecMergeRegion>,
    /// Note text written after one blank row below the data.
    pub note: Option<String>,
    /// Alignment every header node/column starts from.
    pub default_alignment: SpecAlignment,
    /// Separator used to join multi-field leaf values.
    pub field_separator: String,
    /// Column autofit policy.
    pub policy_autofit: SpecAutofitCellsPolicy,
    /// Row height policy.
    pub policy_row_height: SpecRowHeightPolicy,
}

impl Default for SpecSheetLayoutOptions {
    fn default() -> Self {
        Self {
            title: None,
            header: None,
            row_merge_rules: EnumRowMergeRules::default(),
            extra_merges: vec![],
            note: None,
            default_alignment: crate::conf::derive_default_alignment(),
            field_separator: " ".to_string(),
            policy_autofit: SpecAutofitCellsPolicy::default(),
            policy_row_height: SpecRowHeightPolicy::default(),
        }
    }
}

/// Writer-wide options.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct SpecXlsxWriteOptions {
    /// Number of frozen columns.
    pub col_freeze: usize,
    /// Frozen row index; defaults to the first data row when `None`.
    pub row_freeze: Option<usize>,
    /// Disable freeze panes entirely.
    pub if_disable_freeze: bool,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SheetLayout

/// Role of one grid row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumRowKind {
    /// Row 0 title band.
    Title,
    /// Header band row.
    Header,
    /// One source record.
    Data,
    /// Spacer before the note.
    Blank,
    /// Note row.
    Note,
}

/// Fully planned sheet handed to the document writer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecSheetLayout {
    /// Cell values, row-major; every row has `header_layout.n_cols` cells.
    pub grid: Vec<Vec<EnumCellValue>>,
    /// Role of each grid row.
    pub row_kinds: Vec<EnumRowKind>,
    /// Reconciled merge regions.
    pub merges: Vec<SpecMergeRegion>,
    /// Flattened header tree.
    pub header_layout: SpecHeaderLayout,
    /// Header anchor alignments keyed by `(row, col)`.
    pub header_alignments: BTreeMap<(usize, usize), SpecAlignment>,
    /// Final column widths.
    pub widths_by_col: Vec<f64>,
    /// Explicit row heights.
    pub heights_by_row: BTreeMap<usize, f64>,
    /// First header row.
    pub row_header_start: usize,
    /// First data row.
    pub row_data_start: usize,
    /// Number of data rows.
    pub n_rows_data: usize,
    /// Regions dropped by reconciliation.
    pub n_merges_dropped: usize,
}

impl SpecSheetLayout {
    pub fn n_rows(&self) -> usize {
        self.grid.len()
    }

    pub fn n_cols(&self) -> usize {
        self.header_layout.n_cols
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ReportAndErrors

/// Summary of one written sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSheetSummary {
    /// Actual unique sheet name in workbook.
    pub sheet_name: String,
    /// Grid rows written.
    pub n_rows: usize,
    /// Grid columns written.
    pub n_cols: usize,
    /// Merge regions applied.
    pub n_merges: usize,
}

/// Per-write call report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecXlsxReport {
    /// Sheets produced by the write call.
    pub sheets: Vec<SpecSheetSummary>,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

impl SpecXlsxReport {
    /// Add a warning message.
    pub fn warn(&mut self, msg: impl AsRef<str>) {
        self.warnings.push(msg.as_ref().to_string());
    }
}

/// Export failure.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Records missing, empty, or not a sequence.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Invalid writer/layout option value.
    #[error("invalid option: {0}")]
    InvalidOption(String),
    /// Planned grid exceeds worksheet limits.
    #[error("sheet too large: {n_rows} rows x {n_cols} columns exceeds Excel limits")]
    ExcelLimit {
        /// Planned row count.
        n_rows: usize,
        /// Planned column count.
        n_cols: usize,
    },
    /// Write attempted after `close()`.
    #[error("cannot write after close()")]
    Closed,
    /// DataFrame conversion failure.
    #[error("dataframe conversion failed: {0}")]
    Frame(String),
    /// Document model / file write failure.
    #[error("xlsx write error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
