//! Entity deduplication driven by an oracle-produced duplicate mapping.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::graph::KnowledgeGraph;
use super::model::{unique_in_order, Description, Entity, Relationship};
use crate::error::{Error, Result};

/// One canonical name and the names to fold into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupGroup {
    pub canonical: String,
    pub members: Vec<String>,
}

/// Validated `{"duplicate_entities": [{canonical: [names...]}, ...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupMapping {
    pub groups: Vec<DedupGroup>,
}

impl DedupMapping {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| Error::ExtractionFormat(format!("dedup mapping is not JSON: {}", e)))?;
        Self::from_value(&value)
    }

    /// Groups keep the order they were supplied in. Every key of a group
    /// object is its own group; non-string members are dropped.
    pub fn from_value(value: &Value) -> Result<Self> {
        let items = value
            .get("duplicate_entities")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::ExtractionFormat("missing `duplicate_entities` array".into()))?;

        let mut groups = Vec::new();
        for item in items {
            let Some(object) = item.as_object() else {
                debug!("Ignoring non-object dedup group: {}", item);
                continue;
            };
            for (canonical, members) in object {
                let Some(members) = members.as_array() else {
                    debug!("Ignoring dedup group `{}` without member list", canonical);
                    continue;
                };
                let members: Vec<String> = members
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect();
                groups.push(DedupGroup {
                    canonical: canonical.clone(),
                    members,
                });
            }
        }

        Ok(Self { groups })
    }
}

/// What deduplication did.
#[derive(Debug, Default)]
pub struct DedupReport {
    pub groups_applied: usize,
    pub entities_merged: usize,
    pub endpoints_rewritten: usize,
    pub relationships_collapsed: usize,
    /// Groups that could not be applied (`Error::MergeReference`).
    pub skipped: Vec<Error>,
}

/// Arena over the graph's entities: slots are vacated, never shifted.
struct WorkingSet {
    slots: Vec<Option<Entity>>,
    by_name: HashMap<String, Vec<usize>>,
}

impl WorkingSet {
    fn new(entities: Vec<Entity>) -> Self {
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, entity) in entities.iter().enumerate() {
            by_name.entry(entity.name.clone()).or_default().push(idx);
        }
        Self {
            slots: entities.into_iter().map(Some).collect(),
            by_name,
        }
    }

    fn first_named(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).and_then(|slots| slots.first().copied())
    }

    fn all_named(&self, name: &str) -> &[usize] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    fn take(&mut self, idx: usize) -> Option<Entity> {
        let entity = self.slots[idx].take()?;
        if let Some(slots) = self.by_name.get_mut(&entity.name) {
            slots.retain(|&s| s != idx);
        }
        Some(entity)
    }

    fn into_entities(self) -> Vec<Entity> {
        self.slots.into_iter().flatten().collect()
    }
}

/// Apply a duplicate mapping to the graph.
///
/// Groups are applied one after another in mapping order, so a later group
/// sees the effect of earlier ones. Afterwards relationships sharing
/// `(source, target)` are merged and every reference and fragment list is
/// made duplicate-free.
pub fn deduplicate(graph: &mut KnowledgeGraph, mapping: &DedupMapping) -> DedupReport {
    let mut report = DedupReport::default();
    let (entities, mut relationships) = std::mem::take(graph).into_parts();
    let mut working = WorkingSet::new(entities);

    for group in &mapping.groups {
        let Some(canonical_idx) = working.first_named(&group.canonical) else {
            warn!("Dedup group skipped: canonical `{}` not in graph", group.canonical);
            report.skipped.push(Error::MergeReference(format!(
                "canonical `{}` not found",
                group.canonical
            )));
            continue;
        };

        let mut member_slots: Vec<usize> = Vec::new();
        for name in &group.members {
            for &idx in working.all_named(name) {
                if idx != canonical_idx && !member_slots.contains(&idx) {
                    member_slots.push(idx);
                }
            }
        }

        if member_slots.is_empty() {
            warn!("Dedup group skipped: no members of `{}` in graph", group.canonical);
            report.skipped.push(Error::MergeReference(format!(
                "none of {:?} found for `{}`",
                group.members, group.canonical
            )));
            continue;
        }

        for idx in member_slots {
            let Some(member) = working.take(idx) else {
                continue;
            };

            if let Some(canonical) = working.slots[canonical_idx].as_mut() {
                canonical.references.extend(member.references.iter().cloned());
                unique_in_order(&mut canonical.references);
                canonical.description.union(&member.description);
            }

            if member.name != group.canonical {
                for relationship in relationships.iter_mut() {
                    if relationship.source == member.name {
                        relationship.source = group.canonical.clone();
                        report.endpoints_rewritten += 1;
                    }
                    if relationship.target == member.name {
                        relationship.target = group.canonical.clone();
                        report.endpoints_rewritten += 1;
                    }
                }
            }

            debug!("Merged `{}` into `{}`", member.name, group.canonical);
            report.entities_merged += 1;
        }

        report.groups_applied += 1;
    }

    let mut entities = working.into_entities();
    for entity in &mut entities {
        unique_in_order(&mut entity.references);
        entity.description.dedup();
    }

    let (relationships, collapsed) = collapse_relationships(relationships);
    report.relationships_collapsed = collapsed;

    *graph = KnowledgeGraph::from_parts(entities, relationships);

    info!(
        "Dedup: {} groups applied, {} skipped, {} entities merged, {} relationships collapsed",
        report.groups_applied,
        report.skipped.len(),
        report.entities_merged,
        report.relationships_collapsed
    );

    report
}

fn collapse_relationships(relationships: Vec<Relationship>) -> (Vec<Relationship>, usize) {
    let mut merged: Vec<Relationship> = Vec::with_capacity(relationships.len());
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    let mut collapsed = 0;

    for relationship in relationships {
        match index.get(&relationship.key()) {
            Some(&idx) => {
                let existing = &mut merged[idx];
                existing.description.union(&relationship.description);
                existing.references.extend(relationship.references);
                collapsed += 1;
            }
            None => {
                index.insert(relationship.key(), merged.len());
                merged.push(relationship);
            }
        }
    }

    for relationship in &mut merged {
        unique_in_order(&mut relationship.references);
        relationship.description.dedup();
    }

    (merged, collapsed)
}

/// Entity listing handed to the dedup oracle, sorted by name.
pub fn dedup_listing(graph: &KnowledgeGraph) -> String {
    let mut entities: Vec<&Entity> = graph.entities().iter().collect();
    entities.sort_by(|a, b| a.name.cmp(&b.name));

    let mut listing = String::new();
    for entity in entities {
        let description = match &entity.description {
            Description::Text(text) => text.clone(),
            Description::Fragments(items) => items.join(" | "),
        };
        listing.push_str(&format!("- {}: {}\n", entity.name, entity.entity_type));
        listing.push_str(&format!("  {}\n\n", description));
    }
    listing
}
