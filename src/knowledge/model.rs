use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Entity or relationship description.
///
/// During accumulation a description is a list of fragments, one per
/// mentioning chunk. Consolidation collapses it into a single text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Description {
    Text(String),
    Fragments(Vec<String>),
}

impl Default for Description {
    fn default() -> Self {
        Description::Fragments(Vec::new())
    }
}

impl Description {
    pub fn fragment(text: impl Into<String>) -> Self {
        Description::Fragments(vec![text.into()])
    }

    /// Fragments view; a scalar description is a single fragment.
    pub fn fragments(&self) -> Vec<String> {
        match self {
            Description::Text(text) => vec![text.clone()],
            Description::Fragments(items) => items.clone(),
        }
    }

    pub fn fragment_count(&self) -> usize {
        match self {
            Description::Text(_) => 1,
            Description::Fragments(items) => items.len(),
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Description::Text(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Description::Text(text) => Some(text),
            Description::Fragments(_) => None,
        }
    }

    /// Append a fragment, turning a scalar description into a fragment list.
    pub fn push(&mut self, fragment: impl Into<String>) {
        self.make_fragments().push(fragment.into());
    }

    /// Set union with another description, first occurrence wins.
    pub fn union(&mut self, other: &Description) {
        let items = self.make_fragments();
        items.extend(other.fragments());
        unique_in_order(items);
    }

    /// Remove repeated fragments. Scalar descriptions are left alone.
    pub fn dedup(&mut self) {
        if let Description::Fragments(items) = self {
            unique_in_order(items);
        }
    }

    fn make_fragments(&mut self) -> &mut Vec<String> {
        if let Description::Text(text) = self {
            *self = Description::Fragments(vec![std::mem::take(text)]);
        }
        match self {
            Description::Fragments(items) => items,
            Description::Text(_) => unreachable!("description normalised above"),
        }
    }
}

/// Graph node. Identity is `(name, entity_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub description: Description,
    #[serde(default)]
    pub references: Vec<String>,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            description: Description::default(),
            references: Vec::new(),
        }
    }

    pub fn key(&self) -> (String, String) {
        (self.name.clone(), self.entity_type.clone())
    }
}

/// Directed edge between two entity names. Identity is `(source, target)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub description: Description,
    #[serde(default)]
    pub references: Vec<String>,
}

impl Relationship {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            description: Description::default(),
            references: Vec::new(),
        }
    }

    pub fn key(&self) -> (String, String) {
        (self.source.clone(), self.target.clone())
    }
}

/// Drop repeated items, keeping the first occurrence of each.
pub fn unique_in_order(items: &mut Vec<String>) {
    let mut seen = HashSet::with_capacity(items.len());
    items.retain(|item| seen.insert(item.clone()));
}
