// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;

// Only equality-based selectors (matchLabels) are supported. A selector is
// the label map itself: an object is selected when it carries every pair.

/// Returns true if `labels` contains every key/value pair of `selector`.
/// An empty selector matches everything.
pub fn matches(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(key, val)| labels.get(key).map_or(false, |v| v == val))
}

/// Same as `matches`, for objects whose metadata may carry no labels at all.
pub fn matches_opt(
    selector: &BTreeMap<String, String>,
    labels: Option<&BTreeMap<String, String>>,
) -> bool {
    match labels {
        Some(labels) => matches(selector, labels),
        None => selector.is_empty(),
    }
}

/// Renders the selector in the `key1=value1,key2=value2` form accepted by
/// the `labelSelector` list parameter. Keys come out in sorted order.
pub fn to_selector_string(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(key, val)| format!("{}={}", key, val))
        .collect::<Vec<_>>()
        .join(",")
}
