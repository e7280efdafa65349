//! Region / result model
//!
//! A region is one labeled span: geometry (`start`/`end` in the value
//! payload), a label set, and an optional link to a parent region of the
//! same annotation.
//!
//! Inside the editor every region id is scoped to its owning annotation as
//! `<raw-id>#<annotation-local-id>`. Raw ids are reused freely across
//! annotations (a copy of a prediction keeps them), the suffix keeps them
//! unique across the whole task. Export strips the suffix again.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use spanlab_common::uuid_utils;
use std::collections::{HashMap, HashSet};

/// Origin tag for results imported from a prediction
pub const ORIGIN_PREDICTION: &str = "prediction";
/// Origin tag for results created or imported as user work
pub const ORIGIN_MANUAL: &str = "manual";

const SCOPE_SEPARATOR: char = '#';
const RAW_ID_LEN: usize = 10;

/// One labeled span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Scoped id inside the editor, raw id on the wire
    #[serde(default)]
    pub id: String,

    /// Control tag producing the labels (e.g. `tricks`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_name: Option<String>,

    /// Object tag the region sits on (e.g. `video`, `chart`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_name: Option<String>,

    /// Result type (e.g. `timeserieslabels`)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Geometry plus label arrays
    #[serde(default)]
    pub value: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    /// Parent region within the same annotation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// `Some(false)` marks prediction results that seed new annotations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactive_mode: Option<bool>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub readonly: bool,

    /// View state only, never sent to the backend
    #[serde(default, skip_serializing)]
    pub hidden: bool,

    /// Unknown fields, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Region {
    /// New span region with the given labels under `from_name`
    pub fn span(raw_id: &str, from_name: &str, to_name: &str, start: f64, end: f64, labels: &[&str]) -> Self {
        let mut value = Map::new();
        value.insert("start".into(), Value::from(start));
        value.insert("end".into(), Value::from(end));
        value.insert(
            "timeserieslabels".into(),
            Value::Array(labels.iter().map(|l| Value::from(*l)).collect()),
        );

        Self {
            id: raw_id.to_string(),
            from_name: Some(from_name.to_string()),
            to_name: Some(to_name.to_string()),
            kind: Some("timeserieslabels".to_string()),
            value,
            origin: None,
            parent_id: None,
            interactive_mode: None,
            readonly: false,
            hidden: false,
            extra: Map::new(),
        }
    }

    /// Id without the annotation scope
    pub fn raw_id(&self) -> &str {
        raw_id(&self.id)
    }

    pub fn start(&self) -> Option<f64> {
        self.value.get("start").and_then(Value::as_f64)
    }

    pub fn end(&self) -> Option<f64> {
        self.value.get("end").and_then(Value::as_f64)
    }

    /// All labels in the value payload (`labels`, `*labels`, `choices`)
    pub fn labels(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (key, val) in &self.value {
            if !(key.ends_with("labels") || key == "choices") {
                continue;
            }
            if let Some(items) = val.as_array() {
                out.extend(items.iter().filter_map(Value::as_str).map(str::to_string));
            }
        }
        out
    }

    /// Same labels and geometry, ignoring ids and view state
    pub fn same_content(&self, other: &Region) -> bool {
        self.from_name == other.from_name
            && self.to_name == other.to_name
            && self.kind == other.kind
            && self.value == other.value
    }
}

/// Id without the `#<annotation>` suffix
pub fn raw_id(id: &str) -> &str {
    match id.find(SCOPE_SEPARATOR) {
        Some(idx) => &id[..idx],
        None => id,
    }
}

/// `<raw-id>#<annotation-id>`
pub fn scoped_id(id: &str, annotation_id: &str) -> String {
    format!("{}{}{}", raw_id(id), SCOPE_SEPARATOR, annotation_id)
}

/// Re-scope a batch of regions into `annotation_id`
///
/// Pass 1 assigns every region its new id (generating raw ids for regions
/// that arrive without one, and for duplicates inside the batch) and records
/// old → new. Pass 2 rewrites `parent_id` through that table; references
/// that do not resolve inside the batch become `None`.
pub fn rescope(regions: Vec<Region>, annotation_id: &str) -> Vec<Region> {
    let mut table: HashMap<String, String> = HashMap::with_capacity(regions.len());
    let mut used: HashSet<String> = HashSet::with_capacity(regions.len());
    let mut out = Vec::with_capacity(regions.len());

    for mut region in regions {
        let mut raw = raw_id(&region.id).to_string();
        if raw.is_empty() || used.contains(&raw) {
            raw = uuid_utils::unique_short_id(RAW_ID_LEN, |c| used.contains(c));
        }
        used.insert(raw.clone());

        let new_id = scoped_id(&raw, annotation_id);
        if !region.id.is_empty() {
            // First occurrence wins for parent lookups
            table.entry(region.id.clone()).or_insert_with(|| new_id.clone());
        }
        region.id = new_id;
        out.push(region);
    }

    relink_parents(&mut out, &table);
    out
}

/// Export copy of `regions` with the annotation scope stripped
///
/// Same two-pass shape as [`rescope`]: build the id table for everything
/// being exported, then rewrite `parent_id` through it.
pub fn export(regions: &[Region]) -> Vec<Region> {
    let table: HashMap<String, String> = regions
        .iter()
        .map(|r| (r.id.clone(), r.raw_id().to_string()))
        .collect();

    let mut out: Vec<Region> = regions
        .iter()
        .map(|r| {
            let mut copy = r.clone();
            copy.id = r.raw_id().to_string();
            copy
        })
        .collect();

    relink_parents(&mut out, &table);
    out
}

fn relink_parents(regions: &mut [Region], table: &HashMap<String, String>) {
    for region in regions.iter_mut() {
        let Some(parent) = region.parent_id.take() else {
            continue;
        };
        match table.get(&parent) {
            Some(mapped) => region.parent_id = Some(mapped.clone()),
            None => {
                tracing::warn!(region = %region.id, parent = %parent, "Dangling parent_id dropped");
            }
        }
    }
}
