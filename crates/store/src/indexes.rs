//! Append-only lookup indexes keyed by string, holding record ids.

#![forbid(unsafe_code)]

use kmap_core::{NormalizedRecord, RecordId};
use rustc_hash::FxHashMap;
use serde::Serialize;

/// key -> record ids, in append order. Duplicates are kept.
pub type Postings = FxHashMap<String, Vec<RecordId>>;

fn push(post: &mut Postings, key: &str, id: RecordId) {
    match post.get_mut(key) {
        Some(v) => v.push(id),
        None => { post.insert(key.to_string(), vec![id]); }
    }
}

fn get<'a>(post: &'a Postings, key: &str) -> &'a [RecordId] {
    post.get(key).map(|v| v.as_slice()).unwrap_or(&[])
}

/// Kind, namespace, name and composite indexes plus annotation key/value indexes.
///
/// There is no removal; callers submit each record exactly once.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Indexes {
    pub by_kind: Postings,
    pub by_namespace: Postings,
    pub by_name: Postings,
    /// `namespace.kind.name`
    pub by_composite: Postings,
    pub anno_keys: Postings,
    pub anno_values: Postings,
}

impl Indexes {
    pub fn insert(&mut self, rec: &NormalizedRecord) {
        push(&mut self.by_kind, &rec.kind, rec.id);
        push(&mut self.by_namespace, &rec.namespace, rec.id);
        push(&mut self.by_name, &rec.name, rec.id);
        push(&mut self.by_composite, &rec.composite_key(), rec.id);
    }

    pub fn insert_annotation(&mut self, id: RecordId, key: &str, value: &str) {
        push(&mut self.anno_keys, key, id);
        push(&mut self.anno_values, value, id);
    }

    pub fn kind(&self, kind: &str) -> &[RecordId] { get(&self.by_kind, kind) }
    pub fn namespace(&self, ns: &str) -> &[RecordId] { get(&self.by_namespace, ns) }
    pub fn name(&self, name: &str) -> &[RecordId] { get(&self.by_name, name) }
    pub fn annotation_key(&self, key: &str) -> &[RecordId] { get(&self.anno_keys, key) }
    pub fn annotation_value(&self, value: &str) -> &[RecordId] { get(&self.anno_values, value) }

    pub fn composite(&self, ns: &str, kind: &str, name: &str) -> &[RecordId] {
        get(&self.by_composite, &format!("{}.{}.{}", ns, kind, name))
    }

    /// Intersect any combination of kind/namespace/name filters. `None` means no filter.
    pub fn lookup(&self, kind: Option<&str>, ns: Option<&str>, name: Option<&str>) -> Vec<RecordId> {
        let mut lists: Vec<&[RecordId]> = Vec::new();
        if let Some(k) = kind { lists.push(self.kind(k)); }
        if let Some(n) = ns { lists.push(self.namespace(n)); }
        if let Some(n) = name { lists.push(self.name(n)); }
        let Some((first, rest)) = lists.split_first() else {
            let mut all: Vec<RecordId> = self.by_kind.values().flatten().copied().collect();
            all.sort_unstable();
            return all;
        };
        let mut out: Vec<RecordId> = first.to_vec();
        out.sort_unstable();
        out.dedup();
        for other in rest {
            let mut b = other.to_vec();
            b.sort_unstable();
            out = intersect_sorted(&out, &b);
        }
        out
    }
}

fn intersect_sorted(a: &[RecordId], b: &[RecordId]) -> Vec<RecordId> {
    let mut i = 0usize;
    let mut j = 0usize;
    let mut out = Vec::new();
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => { out.push(a[i]); i += 1; j += 1; }
        }
    }
    out
}

/// Logical label categories. Template labels describe future pods, not the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LabelCategory {
    Labels,
    PodLabels,
    MatchLabels,
}

impl LabelCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelCategory::Labels => "Labels",
            LabelCategory::PodLabels => "PodLabels",
            LabelCategory::MatchLabels => "MatchLabels",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LabelPostings {
    /// `key=value`
    pub pairs: Postings,
    pub keys: Postings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelEntry {
    pub category: LabelCategory,
    pub key: String,
    pub value: String,
}

/// Label postings kept apart per category, plus the per-record list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LabelIndex {
    pub labels: LabelPostings,
    pub pod_labels: LabelPostings,
    pub match_labels: LabelPostings,
    pub by_record: FxHashMap<RecordId, Vec<LabelEntry>>,
}

impl LabelIndex {
    pub fn category(&self, cat: LabelCategory) -> &LabelPostings {
        match cat {
            LabelCategory::Labels => &self.labels,
            LabelCategory::PodLabels => &self.pod_labels,
            LabelCategory::MatchLabels => &self.match_labels,
        }
    }

    fn category_mut(&mut self, cat: LabelCategory) -> &mut LabelPostings {
        match cat {
            LabelCategory::Labels => &mut self.labels,
            LabelCategory::PodLabels => &mut self.pod_labels,
            LabelCategory::MatchLabels => &mut self.match_labels,
        }
    }

    pub fn insert(&mut self, cat: LabelCategory, id: RecordId, key: &str, value: &str) {
        let post = self.category_mut(cat);
        push(&mut post.pairs, &format!("{}={}", key, value), id);
        push(&mut post.keys, key, id);
        self.by_record.entry(id).or_default().push(LabelEntry {
            category: cat,
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    pub fn with_pair(&self, cat: LabelCategory, key: &str, value: &str) -> &[RecordId] {
        get(&self.category(cat).pairs, &format!("{}={}", key, value))
    }

    pub fn with_key(&self, cat: LabelCategory, key: &str) -> &[RecordId] {
        get(&self.category(cat).keys, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: RecordId, kind: &str, ns: &str, name: &str) -> NormalizedRecord {
        NormalizedRecord {
            id,
            api_version: "v1".into(),
            kind: kind.into(),
            namespace: ns.into(),
            name: name.into(),
            uid: None,
            namespaced: true,
        }
    }

    #[test]
    fn composite_collisions_append() {
        let mut idx = Indexes::default();
        idx.insert(&rec(1, "ConfigMap", "ns1", "cfg"));
        idx.insert(&rec(2, "ConfigMap", "ns1", "cfg"));
        idx.insert(&rec(3, "ConfigMap", "ns2", "cfg"));
        assert_eq!(idx.composite("ns1", "ConfigMap", "cfg"), &[1, 2]);
        assert_eq!(idx.name("cfg"), &[1, 2, 3]);
        assert!(idx.kind("Secret").is_empty());
    }

    #[test]
    fn lookup_intersects_filters() {
        let mut idx = Indexes::default();
        idx.insert(&rec(1, "Pod", "a", "p1"));
        idx.insert(&rec(2, "Pod", "b", "p1"));
        idx.insert(&rec(3, "Service", "a", "p1"));
        assert_eq!(idx.lookup(Some("Pod"), Some("a"), None), vec![1]);
        assert_eq!(idx.lookup(None, None, Some("p1")), vec![1, 2, 3]);
        assert_eq!(idx.lookup(None, None, None), vec![1, 2, 3]);
        assert!(idx.lookup(Some("Pod"), Some("zzz"), None).is_empty());
    }

    #[test]
    fn annotation_values_keep_duplicates() {
        let mut idx = Indexes::default();
        idx.insert_annotation(4, "a", "same");
        idx.insert_annotation(4, "b", "same");
        assert_eq!(idx.annotation_value("same"), &[4, 4]);
        assert_eq!(idx.annotation_key("a"), &[4]);
    }

    #[test]
    fn label_categories_stay_apart() {
        let mut li = LabelIndex::default();
        li.insert(LabelCategory::Labels, 1, "app", "web");
        li.insert(LabelCategory::PodLabels, 1, "app", "web-pod");
        assert_eq!(li.with_pair(LabelCategory::Labels, "app", "web"), &[1]);
        assert!(li.with_pair(LabelCategory::Labels, "app", "web-pod").is_empty());
        assert_eq!(li.with_key(LabelCategory::PodLabels, "app"), &[1]);
        assert_eq!(li.by_record[&1].len(), 2);
    }
}
