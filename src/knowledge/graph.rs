use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::extraction::ExtractionResult;
use super::model::{Entity, Relationship};

/// What a single merge did to the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub added_entities: usize,
    pub added_relationships: usize,
    pub updated_entities: usize,
    pub updated_relationships: usize,
}

impl MergeOutcome {
    /// True if the merge created at least one entity or relationship.
    pub fn added_something(&self) -> bool {
        self.added_entities > 0 || self.added_relationships > 0
    }

    pub fn absorb(&mut self, other: MergeOutcome) {
        self.added_entities += other.added_entities;
        self.added_relationships += other.added_relationships;
        self.updated_entities += other.updated_entities;
        self.updated_relationships += other.updated_relationships;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GraphSnapshot {
    #[serde(default)]
    entities: Vec<Entity>,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

/// Project knowledge graph.
///
/// Entities are unique by `(name, type)` and relationships by
/// `(source, target)`. Both keep insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "GraphSnapshot", into = "GraphSnapshot")]
pub struct KnowledgeGraph {
    entities: Vec<Entity>,
    entity_index: HashMap<(String, String), usize>,
    relationships: Vec<Relationship>,
    relationship_index: HashMap<(String, String), usize>,
}

impl From<GraphSnapshot> for KnowledgeGraph {
    fn from(snapshot: GraphSnapshot) -> Self {
        KnowledgeGraph::from_parts(snapshot.entities, snapshot.relationships)
    }
}

impl From<KnowledgeGraph> for GraphSnapshot {
    fn from(graph: KnowledgeGraph) -> Self {
        let (entities, relationships) = graph.into_parts();
        GraphSnapshot {
            entities,
            relationships,
        }
    }
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from stored records. Records sharing a key are folded
    /// together.
    pub fn from_parts(entities: Vec<Entity>, relationships: Vec<Relationship>) -> Self {
        let mut graph = Self::new();
        for entity in entities {
            graph.insert_entity(entity);
        }
        for relationship in relationships {
            graph.insert_relationship(relationship);
        }
        graph
    }

    pub fn into_parts(self) -> (Vec<Entity>, Vec<Relationship>) {
        (self.entities, self.relationships)
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn entity(&self, name: &str, entity_type: &str) -> Option<&Entity> {
        self.entity_index
            .get(&(name.to_string(), entity_type.to_string()))
            .map(|&idx| &self.entities[idx])
    }

    pub fn relationship(&self, source: &str, target: &str) -> Option<&Relationship> {
        self.relationship_index
            .get(&(source.to_string(), target.to_string()))
            .map(|&idx| &self.relationships[idx])
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    /// Descriptions may be rewritten in place; keys may not.
    pub(crate) fn entities_mut(&mut self) -> &mut [Entity] {
        &mut self.entities
    }

    pub(crate) fn relationships_mut(&mut self) -> &mut [Relationship] {
        &mut self.relationships
    }

    /// Insert an entity, folding it into an existing one with the same key.
    /// Returns true if a new entity was created.
    pub fn insert_entity(&mut self, entity: Entity) -> bool {
        match self.entity_index.get(&entity.key()) {
            Some(&idx) => {
                let existing = &mut self.entities[idx];
                for fragment in entity.description.fragments() {
                    existing.description.push(fragment);
                }
                existing.references.extend(entity.references);
                false
            }
            None => {
                self.entity_index.insert(entity.key(), self.entities.len());
                self.entities.push(entity);
                true
            }
        }
    }

    /// Insert a relationship, folding it into an existing one with the same
    /// key. Returns true if a new relationship was created.
    pub fn insert_relationship(&mut self, relationship: Relationship) -> bool {
        match self.relationship_index.get(&relationship.key()) {
            Some(&idx) => {
                let existing = &mut self.relationships[idx];
                for fragment in relationship.description.fragments() {
                    existing.description.push(fragment);
                }
                existing.references.extend(relationship.references);
                false
            }
            None => {
                self.relationship_index
                    .insert(relationship.key(), self.relationships.len());
                self.relationships.push(relationship);
                true
            }
        }
    }

    /// Fold one chunk's validated extraction result into the graph.
    ///
    /// Matching entities (same name and type) and relationships (same source
    /// and target) get the new description fragment and the chunk id
    /// appended; anything else is created.
    pub fn merge_chunk_result(
        &mut self,
        result: &ExtractionResult,
        chunk_id: &str,
    ) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        for extracted in &result.entities {
            let mut entity = Entity::new(&extracted.name, &extracted.entity_type);
            entity.description.push(&extracted.description);
            entity.references.push(chunk_id.to_string());

            if self.insert_entity(entity) {
                outcome.added_entities += 1;
            } else {
                outcome.updated_entities += 1;
            }
        }

        for extracted in &result.relationships {
            let mut relationship = Relationship::new(&extracted.source, &extracted.target);
            relationship.description.push(&extracted.description);
            relationship.references.push(chunk_id.to_string());

            if self.insert_relationship(relationship) {
                outcome.added_relationships += 1;
            } else {
                outcome.updated_relationships += 1;
            }
        }

        outcome
    }

    /// Entity snapshot shown to the extraction oracle.
    pub fn entity_listing(&self) -> String {
        if self.entities.is_empty() {
            return "No identified entities yet.".to_string();
        }

        self.entities
            .iter()
            .map(|e| format!("* {}: {}", e.name, e.entity_type))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
