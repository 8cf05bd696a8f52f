//! Header tree flattening and header-band merge planning.
//!
//! Depths are zero-based inside the header band; document rows are
//! `row_header_start + depth` because row 0 holds the title band.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::spec::{
    SpecAlignment, SpecHeaderLayout, SpecHeaderNode, SpecLeafHeader, SpecMergeRegion,
};

/// Horizontal header merges plus anchor alignments keyed by `(row, col)`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecHeaderHorizontalPlan {
    /// One region per internal node spanning more than one column.
    pub merges: Vec<SpecMergeRegion>,
    /// Resolved node alignment at each region's anchor cell.
    pub alignments: BTreeMap<(usize, usize), SpecAlignment>,
}

////////////////////////////////////////////////////////////////////////////////
// #region Flattening

/// Flatten a header tree into leaf columns and one title row per depth.
///
/// An empty tree yields an empty layout.
pub fn flatten_header_tree(
    nodes: &[SpecHeaderNode],
    default_alignment: &SpecAlignment,
) -> SpecHeaderLayout {
    let mut l_leaf_headers = Vec::new();
    let mut l_path = Vec::new();
    collect_leaf_headers(nodes, default_alignment, &mut l_path, &mut l_leaf_headers);

    let n_cols = l_leaf_headers.len();
    let n_levels = l_leaf_headers
        .iter()
        .map(|leaf| leaf.path.len())
        .max()
        .unwrap_or(0);

    let mut header_rows = vec![vec![String::new(); n_cols]; n_levels];
    for leaf in &l_leaf_headers {
        for (n_depth, node) in leaf.path.iter().enumerate() {
            let c_cell = &mut header_rows[n_depth][leaf.col_idx];
            if c_cell.is_empty() {
                *c_cell = node.title.clone();
            }
        }
    }

    let alignments_by_col = l_leaf_headers
        .iter()
        .map(|leaf| leaf.alignment.clone())
        .collect();

    SpecHeaderLayout {
        header_rows,
        leaf_headers: l_leaf_headers,
        n_cols,
        alignments_by_col,
    }
}

fn collect_leaf_headers(
    nodes: &[SpecHeaderNode],
    default_alignment: &SpecAlignment,
    path: &mut Vec<SpecHeaderNode>,
    leaf_headers: &mut Vec<SpecLeafHeader>,
) {
    for node in nodes {
        path.push(node.clone());
        if node.is_leaf() {
            leaf_headers.push(SpecLeafHeader {
                node: node.clone(),
                alignment: default_alignment.resolve(node.alignment.as_ref()),
                path: path.clone(),
                col_idx: leaf_headers.len(),
            });
        } else {
            collect_leaf_headers(&node.children, default_alignment, path, leaf_headers);
        }
        path.pop();
    }
}

/// Number of leaf descendants of `node`; 1 for a leaf.
pub fn calculate_header_span(node: &SpecHeaderNode) -> usize {
    if node.is_leaf() {
        return 1;
    }
    node.children.iter().map(calculate_header_span).sum()
}

/// Build a flat one-level header from the first record's own field names.
///
/// Non-object records yield an empty tree.
pub fn derive_header_tree_from_record(record: &Value) -> Vec<SpecHeaderNode> {
    let Value::Object(dict_fields) = record else {
        return vec![];
    };
    dict_fields
        .keys()
        .map(|c_key| SpecHeaderNode::leaf(c_key.clone(), c_key.clone()))
        .collect()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region HeaderMerges

/// Plan one horizontal merge per internal node whose span exceeds one column.
pub fn plan_header_horizontal_merges(
    nodes: &[SpecHeaderNode],
    default_alignment: &SpecAlignment,
    row_header_start: usize,
) -> SpecHeaderHorizontalPlan {
    let mut plan = SpecHeaderHorizontalPlan::default();
    walk_header_spans(nodes, default_alignment, row_header_start, 0, &mut plan);
    plan
}

fn walk_header_spans(
    nodes: &[SpecHeaderNode],
    default_alignment: &SpecAlignment,
    row_idx: usize,
    col_idx_start: usize,
    plan: &mut SpecHeaderHorizontalPlan,
) {
    let mut n_col_cursor = col_idx_start;
    for node in nodes {
        let n_span = calculate_header_span(node);
        if n_span > 1 {
            plan.merges.push(SpecMergeRegion::new(
                row_idx,
                n_col_cursor,
                row_idx,
                n_col_cursor + n_span - 1,
            ));
            plan.alignments.insert(
                (row_idx, n_col_cursor),
                default_alignment.resolve(node.alignment.as_ref()),
            );
        }
        if !node.is_leaf() {
            walk_header_spans(
                &node.children,
                default_alignment,
                row_idx + 1,
                n_col_cursor,
                plan,
            );
        }
        n_col_cursor += n_span;
    }
}

/// Stretch titles vertically through adjacent empty header cells.
///
/// Per column, titles are visited deepest first; an empty cell already
/// absorbed by a deeper title is not absorbed again by a shallower one.
pub fn plan_header_vertical_merges(
    header_rows: &[Vec<String>],
    row_header_start: usize,
) -> Vec<SpecMergeRegion> {
    let mut l_merges = Vec::new();
    let Some(v_header_row_0) = header_rows.first() else {
        return l_merges;
    };
    let n_levels = header_rows.len();
    let n_cols = v_header_row_0.len();

    for n_idx_col in 0..n_cols {
        let if_is_empty = |n_level: usize| header_rows[n_level][n_idx_col].is_empty();
        let mut v_claimed = vec![false; n_levels];

        for n_level in (0..n_levels).rev().filter(|n_level| !if_is_empty(*n_level)) {
            let mut n_level_start = n_level;
            while n_level_start > 0
                && if_is_empty(n_level_start - 1)
                && !v_claimed[n_level_start - 1]
            {
                n_level_start -= 1;
            }

            let mut n_level_end = n_level;
            while n_level_end + 1 < n_levels
                && if_is_empty(n_level_end + 1)
                && !v_claimed[n_level_end + 1]
            {
                n_level_end += 1;
            }

            if n_level_start < n_level_end {
                v_claimed[n_level_start..=n_level_end].fill(true);
                l_merges.push(SpecMergeRegion::new(
                    row_header_start + n_level_start,
                    n_idx_col,
                    row_header_start + n_level_end,
                    n_idx_col,
                ));
            }
        }
    }

    l_merges
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::conf::derive_default_alignment;

    fn derive_sample_tree() -> Vec<SpecHeaderNode> {
        vec![
            SpecHeaderNode::leaf("A", "a"),
            SpecHeaderNode::group(
                "G",
                vec![
                    SpecHeaderNode::leaf("B", "b"),
                    SpecHeaderNode::group(
                        "H",
                        vec![SpecHeaderNode::leaf("C", "c"), SpecHeaderNode::leaf("D", "d")],
                    ),
                ],
            ),
        ]
    }

    #[test]
    fn test_flatten_header_tree_counts_leaves_and_depth() {
        let layout = flatten_header_tree(&derive_sample_tree(), &derive_default_alignment());

        assert_eq!(layout.n_cols, 4);
        assert_eq!(layout.header_rows.len(), 3);
        assert_eq!(layout.header_rows[0], vec!["A", "G", "G", "G"]);
        assert_eq!(layout.header_rows[1], vec!["", "B", "H", "H"]);
        assert_eq!(layout.header_rows[2], vec!["", "", "C", "D"]);
        assert_eq!(
            layout
                .leaf_headers
                .iter()
                .map(|leaf| (leaf.node.title.as_str(), leaf.col_idx, leaf.path.len()))
                .collect::<Vec<_>>(),
            vec![("A", 0, 1), ("B", 1, 2), ("C", 2, 3), ("D", 3, 3)]
        );
    }

    #[test]
    fn test_flatten_header_tree_merges_alignment_per_key() {
        let mut l_nodes = derive_sample_tree();
        l_nodes[0].alignment = Some(SpecAlignment {
            horizontal: Some("left".to_string()),
            ..Default::default()
        });
        let layout = flatten_header_tree(&l_nodes, &derive_default_alignment());

        assert_eq!(layout.alignments_by_col[0].horizontal.as_deref(), Some("left"));
        assert_eq!(layout.alignments_by_col[0].vertical.as_deref(), Some("vcenter"));
        assert_eq!(layout.alignments_by_col[1], derive_default_alignment());
    }

    #[test]
    fn test_calculate_header_span_counts_leaf_descendants() {
        let l_nodes = derive_sample_tree();
        assert_eq!(calculate_header_span(&l_nodes[0]), 1);
        assert_eq!(calculate_header_span(&l_nodes[1]), 3);
        assert_eq!(calculate_header_span(&l_nodes[1].children[1]), 2);
    }

    #[test]
    fn test_plan_header_horizontal_merges_flat_tree_has_none() {
        let l_nodes = vec![SpecHeaderNode::leaf("A", "a"), SpecHeaderNode::leaf("B", "b")];
        let plan = plan_header_horizontal_merges(&l_nodes, &derive_default_alignment(), 1);
        assert!(plan.merges.is_empty());
        assert!(plan.alignments.is_empty());
    }

    #[test]
    fn test_plan_header_horizontal_merges_nested() {
        let mut l_nodes = derive_sample_tree();
        l_nodes[1].alignment = Some(SpecAlignment {
            horizontal: Some("right".to_string()),
            ..Default::default()
        });
        let plan = plan_header_horizontal_merges(&l_nodes, &derive_default_alignment(), 1);

        assert_eq!(
            plan.merges,
            vec![
                SpecMergeRegion::new(1, 1, 1, 3),
                SpecMergeRegion::new(2, 2, 2, 3)
            ]
        );
        assert_eq!(
            plan.alignments[&(1, 1)].horizontal.as_deref(),
            Some("right")
        );
        assert_eq!(plan.alignments[&(2, 2)], derive_default_alignment());
    }

    #[test]
    fn test_plan_header_vertical_merges_stretches_shallow_leaf() {
        let l_nodes = vec![
            SpecHeaderNode::leaf("A", "a"),
            SpecHeaderNode::group("G", vec![SpecHeaderNode::leaf("B", "b")]),
        ];
        let layout = flatten_header_tree(&l_nodes, &derive_default_alignment());

        assert_eq!(
            plan_header_vertical_merges(&layout.header_rows, 1),
            vec![SpecMergeRegion::new(1, 0, 2, 0)]
        );
    }

    #[test]
    fn test_plan_header_vertical_merges_full_grid_has_none() {
        let header_rows = vec![
            vec!["G".to_string(), "G".to_string()],
            vec!["A".to_string(), "B".to_string()],
        ];
        assert!(plan_header_vertical_merges(&header_rows, 1).is_empty());
    }

    #[test]
    fn test_plan_header_vertical_merges_deepest_title_claims_gap_first() {
        let header_rows = vec![
            vec!["X".to_string()],
            vec![String::new()],
            vec!["Y".to_string()],
            vec![String::new()],
        ];

        assert_eq!(
            plan_header_vertical_merges(&header_rows, 1),
            vec![SpecMergeRegion::new(2, 0, 4, 0)]
        );
    }

    #[test]
    fn test_derive_header_tree_from_record_keeps_key_order() {
        let l_nodes = derive_header_tree_from_record(&json!({"z": 1, "a": 2, "m": {"x": 1}}));
        assert_eq!(
            l_nodes
                .iter()
                .map(|node| node.title.as_str())
                .collect::<Vec<_>>(),
            vec!["z", "a", "m"]
        );
        assert!(l_nodes.iter().all(SpecHeaderNode::is_leaf));
        assert!(derive_header_tree_from_record(&json!([1, 2])).is_empty());
    }
}
