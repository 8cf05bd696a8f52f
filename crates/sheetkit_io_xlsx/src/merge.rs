//! Data-row merge detection and merge-list reconciliation.

use serde_json::Value;
use tracing::debug;

use crate::spec::{
    EnumRowMergeRules, FnRowSpan, SpecLeafHeader, SpecMergeReconciliation, SpecMergeRegion,
    SpecMergeSources, SpecRowMergeRule,
};
use crate::util::select_field_value;

////////////////////////////////////////////////////////////////////////////////
// #region RowMerges

/// Plan vertical merges over data rows.
///
/// `row_data_start` is the document row of the first record.
pub fn plan_row_merges(
    records: &[Value],
    leaf_headers: &[SpecLeafHeader],
    rules: &EnumRowMergeRules,
    row_data_start: usize,
) -> Vec<SpecMergeRegion> {
    match rules {
        EnumRowMergeRules::Function(fn_span) => {
            plan_row_merges_by_span(records, leaf_headers.len(), fn_span, row_data_start)
        }
        EnumRowMergeRules::Rules(l_rules) => {
            plan_row_merges_by_rules(records, leaf_headers, l_rules, row_data_start)
        }
    }
}

fn plan_row_merges_by_span(
    records: &[Value],
    n_cols: usize,
    fn_span: &FnRowSpan,
    row_data_start: usize,
) -> Vec<SpecMergeRegion> {
    let n_rows_data = records.len();
    let mut l_merges = Vec::new();

    for (n_idx_row, record) in records.iter().enumerate() {
        for n_idx_col in 0..n_cols {
            let n_span = fn_span(n_idx_row, n_idx_col, record);
            if n_span > 1 && n_span <= n_rows_data - n_idx_row {
                l_merges.push(SpecMergeRegion::new(
                    row_data_start + n_idx_row,
                    n_idx_col,
                    row_data_start + n_idx_row + n_span - 1,
                    n_idx_col,
                ));
            }
        }
    }

    l_merges
}

fn plan_row_merges_by_rules(
    records: &[Value],
    leaf_headers: &[SpecLeafHeader],
    rules: &[SpecRowMergeRule],
    row_data_start: usize,
) -> Vec<SpecMergeRegion> {
    let mut l_merges = Vec::new();

    for rule in rules.iter().filter(|rule| rule.merge) {
        let if_key_blank = rule.key.trim().is_empty();
        // A blank key targets the first leaf read through `property_path` only.
        let leaf_target = if if_key_blank {
            leaf_headers.iter().find(|leaf| {
                leaf.node.fixed_key.is_none() && leaf.node.derive_primary_key().is_some()
            })
        } else {
            leaf_headers
                .iter()
                .find(|leaf| leaf.node.matches_field(&rule.key))
        };
        let Some(leaf) = leaf_target else {
            debug!(
                target: "sheetkit_io_xlsx::merge",
                key = %rule.key,
                "row merge rule matches no column; skipped"
            );
            continue;
        };

        let c_key_target = if if_key_blank {
            match leaf.node.derive_primary_key() {
                Some(c_field) => c_field,
                None => continue,
            }
        } else {
            rule.key.clone()
        };

        for (n_idx_row_start, n_idx_row_end) in derive_equal_value_runs(records, &c_key_target) {
            l_merges.push(SpecMergeRegion::new(
                row_data_start + n_idx_row_start,
                leaf.col_idx,
                row_data_start + n_idx_row_end,
                leaf.col_idx,
            ));
        }
    }

    l_merges
}

/// Maximal runs `(start, end)` (inclusive, length >= 2) of equal values at `key`.
pub fn derive_equal_value_runs(records: &[Value], key: &str) -> Vec<(usize, usize)> {
    let mut l_runs = Vec::new();
    let Some(record_first) = records.first() else {
        return l_runs;
    };

    let mut value_current = select_field_value(record_first, key);
    let mut n_idx_run_start = 0;
    for n_idx_row in 1..=records.len() {
        let value_next = records
            .get(n_idx_row)
            .map(|record| select_field_value(record, key));
        if value_next
            .as_ref()
            .is_some_and(|value| if_field_values_equal(value, &value_current))
        {
            continue;
        }

        if n_idx_row - 1 > n_idx_run_start {
            l_runs.push((n_idx_run_start, n_idx_row - 1));
        }
        if let Some(value) = value_next {
            value_current = value;
            n_idx_run_start = n_idx_row;
        }
    }

    l_runs
}

/// Numbers compare by value, so `1` and `1.0` are equal.
fn if_field_values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(n_left), Value::Number(n_right)) => n_left.as_f64() == n_right.as_f64(),
        _ => left == right,
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Reconciliation

/// Concatenate all merge sources in fixed order and drop degenerate/inverted regions.
///
/// Overlaps between surviving regions are not detected.
pub fn reconcile_merge_regions(sources: SpecMergeSources) -> SpecMergeReconciliation {
    let SpecMergeSources {
        title,
        header_horizontal,
        header_vertical,
        extra,
        rows,
        note,
    } = sources;

    let mut reconciliation = SpecMergeReconciliation::default();
    let l_regions = title
        .into_iter()
        .chain(header_horizontal)
        .chain(header_vertical)
        .chain(extra)
        .chain(rows)
        .chain(note);

    for region in l_regions {
        if region.is_degenerate() || region.is_inverted() {
            debug!(
                target: "sheetkit_io_xlsx::merge",
                ?region,
                "dropped degenerate or inverted merge region"
            );
            reconciliation.n_dropped += 1;
            continue;
        }
        reconciliation.merges.push(region);
    }

    reconciliation
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::conf::derive_default_alignment;
    use crate::header::flatten_header_tree;
    use crate::spec::SpecHeaderNode;

    fn derive_leaf_headers() -> Vec<SpecLeafHeader> {
        let l_nodes = vec![
            SpecHeaderNode::leaf("Org", "orgName"),
            SpecHeaderNode {
                property_path: Some("dept.name, dept.code".to_string()),
                title: "Dept".to_string(),
                ..Default::default()
            },
            SpecHeaderNode::leaf("Value", "value"),
        ];
        flatten_header_tree(&l_nodes, &derive_default_alignment()).leaf_headers
    }

    fn derive_rules(keys: &[&str]) -> EnumRowMergeRules {
        EnumRowMergeRules::Rules(
            keys.iter()
                .map(|c_key| SpecRowMergeRule {
                    key: c_key.to_string(),
                    merge: true,
                })
                .collect(),
        )
    }

    #[test]
    fn test_derive_equal_value_runs_only_runs_of_two_or_more() {
        let records = vec![
            json!({"k": "a"}),
            json!({"k": "a"}),
            json!({"k": "b"}),
            json!({"k": "c"}),
            json!({"k": "c"}),
            json!({"k": "c"}),
        ];
        assert_eq!(derive_equal_value_runs(&records, "k"), vec![(0, 1), (3, 5)]);
    }

    #[test]
    fn test_derive_equal_value_runs_single_row_and_all_equal() {
        assert!(derive_equal_value_runs(&[json!({"k": 1})], "k").is_empty());
        let records = vec![json!({"k": 1}); 4];
        assert_eq!(derive_equal_value_runs(&records, "k"), vec![(0, 3)]);
        assert!(derive_equal_value_runs(&[], "k").is_empty());
    }

    #[test]
    fn test_plan_row_merges_by_rules_targets_matching_column() {
        let records = vec![
            json!({"orgName": "X", "dept": {"name": "d1"}}),
            json!({"orgName": "X", "dept": {"name": "d1"}}),
            json!({"orgName": "Y", "dept": {"name": "d2"}}),
        ];
        let l_merges = plan_row_merges(
            &records,
            &derive_leaf_headers(),
            &derive_rules(&["orgName", "dept.name"]),
            3,
        );

        assert_eq!(
            l_merges,
            vec![
                SpecMergeRegion::new(3, 0, 4, 0),
                SpecMergeRegion::new(3, 1, 4, 1)
            ]
        );
    }

    #[test]
    fn test_plan_row_merges_skips_unmatched_and_disabled_rules() {
        let records = vec![json!({"orgName": "X"}), json!({"orgName": "X"})];
        let rules = EnumRowMergeRules::Rules(vec![
            SpecRowMergeRule {
                key: "missing".to_string(),
                merge: true,
            },
            SpecRowMergeRule {
                key: "orgName".to_string(),
                merge: false,
            },
        ]);
        assert!(plan_row_merges(&records, &derive_leaf_headers(), &rules, 2).is_empty());
    }

    #[test]
    fn test_plan_row_merges_duplicate_rule_is_not_deduplicated() {
        let records = vec![json!({"orgName": "X"}), json!({"orgName": "X"})];
        let l_merges = plan_row_merges(
            &records,
            &derive_leaf_headers(),
            &derive_rules(&["orgName", "orgName"]),
            2,
        );
        assert_eq!(l_merges.len(), 2);
        assert_eq!(l_merges[0], l_merges[1]);
    }

    #[test]
    fn test_plan_row_merges_by_span_respects_data_bounds() {
        let records = vec![json!({"value": 2}), json!({"value": 1}), json!({"value": 5})];
        let fn_span: FnRowSpan = Arc::new(|_n_row, n_col, record| {
            if n_col == 2 {
                record["value"].as_u64().unwrap_or(0) as usize
            } else {
                0
            }
        });
        let l_merges = plan_row_merges(
            &records,
            &derive_leaf_headers(),
            &EnumRowMergeRules::Function(fn_span),
            2,
        );

        assert_eq!(l_merges, vec![SpecMergeRegion::new(2, 2, 3, 2)]);
    }

    #[test]
    fn test_derive_equal_value_runs_treats_int_and_float_as_equal() {
        let records = vec![json!({"k": 1}), json!({"k": 1.0}), json!({"k": "1"})];
        assert_eq!(derive_equal_value_runs(&records, "k"), vec![(0, 1)]);
    }

    #[test]
    fn test_plan_row_merges_blank_key_uses_first_property_path_leaf() {
        let records = vec![
            json!({"orgName": "X", "dept": {"name": "d"}}),
            json!({"orgName": "Y", "dept": {"name": "d"}}),
        ];
        let rules: EnumRowMergeRules =
            serde_json::from_value(json!([{"merge": true}])).expect("rules");
        let l_merges = plan_row_merges(&records, &derive_leaf_headers(), &rules, 2);

        assert_eq!(l_merges, vec![SpecMergeRegion::new(2, 1, 3, 1)]);
    }

    #[test]
    fn test_plan_row_merges_by_span_ignores_huge_span() {
        let records = vec![json!({"value": 1}), json!({"value": 2})];
        let fn_span: FnRowSpan = Arc::new(|_n_row, _n_col, _record| usize::MAX);
        let l_merges = plan_row_merges(
            &records,
            &derive_leaf_headers(),
            &EnumRowMergeRules::Function(fn_span),
            2,
        );
        assert!(l_merges.is_empty());
    }

    #[test]
    fn test_reconcile_merge_regions_keeps_order_and_drops_invalid() {
        let reconciliation = reconcile_merge_regions(SpecMergeSources {
            title: Some(SpecMergeRegion::new(0, 0, 0, 0)),
            header_horizontal: vec![SpecMergeRegion::new(1, 0, 1, 2)],
            header_vertical: vec![SpecMergeRegion::new(1, 3, 2, 3)],
            extra: vec![
                SpecMergeRegion::new(5, 1, 4, 1),
                SpecMergeRegion::new(6, 0, 6, 1),
            ],
            rows: vec![SpecMergeRegion::new(3, 0, 4, 0)],
            note: Some(SpecMergeRegion::new(8, 0, 8, 3)),
        });

        assert_eq!(reconciliation.n_dropped, 2);
        assert_eq!(
            reconciliation.merges,
            vec![
                SpecMergeRegion::new(1, 0, 1, 2),
                SpecMergeRegion::new(1, 3, 2, 3),
                SpecMergeRegion::new(6, 0, 6, 1),
                SpecMergeRegion::new(3, 0, 4, 0),
                SpecMergeRegion::new(8, 0, 8, 3),
            ]
        );
        assert!(
            reconciliation
                .merges
                .iter()
                .all(|region| !region.is_degenerate() && !region.is_inverted())
        );
    }
}
