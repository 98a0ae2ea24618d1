//! Project graph in Neo4j.
//!
//! Entities are `(:Entity {name, type, project_id})` nodes and relationships
//! are `RELATED_TO` edges. A persist replaces the project graph inside one
//! transaction.

use async_trait::async_trait;
use neo4rs::{query, Graph, Query, Row, Txn};
use tracing::{debug, info, warn};

use super::GraphStore;
use crate::knowledge::model::{Description, Entity, Relationship};
use crate::knowledge::KnowledgeGraph;
use crate::Result;

/// Graph store backed by Neo4j
pub struct Neo4jGraphStore {
    graph: Graph,
}

impl Neo4jGraphStore {
    /// Connect to Neo4j server
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password).await?;
        info!("Connected to Neo4j at {}", uri);
        Ok(Self { graph })
    }

    /// Create the uniqueness constraint and lookup index.
    pub async fn init_schema(&self) -> Result<()> {
        let statements = [
            "CREATE CONSTRAINT entity_key IF NOT EXISTS FOR (e:Entity) REQUIRE (e.project_id, e.name, e.type) IS UNIQUE",
            "CREATE INDEX entity_project IF NOT EXISTS FOR (e:Entity) ON (e.project_id)",
        ];
        for statement in statements {
            self.graph.run(query(statement)).await?;
        }
        Ok(())
    }

    async fn write_graph(txn: &mut Txn, project_id: &str, graph: &KnowledgeGraph) -> Result<()> {
        for entity in graph.entities() {
            let q = with_description(
                query(
                    "MERGE (e:Entity {name: $name, type: $type, project_id: $project_id})
                     SET e.description = $description,
                         e.references = $references",
                )
                .param("name", entity.name.clone())
                .param("type", entity.entity_type.clone())
                .param("project_id", project_id)
                .param("references", entity.references.clone()),
                &entity.description,
            );
            txn.run(q).await?;
        }

        for relationship in graph.relationships() {
            let q = with_description(
                query(
                    "MATCH (a:Entity {name: $source, project_id: $project_id})
                     MATCH (b:Entity {name: $target, project_id: $project_id})
                     MERGE (a)-[r:RELATED_TO]->(b)
                     SET r.description = $description,
                         r.references = $references,
                         r.project_id = $project_id",
                )
                .param("source", relationship.source.clone())
                .param("target", relationship.target.clone())
                .param("project_id", project_id)
                .param("references", relationship.references.clone()),
                &relationship.description,
            );
            txn.run(q).await?;
        }

        let entity_keys: Vec<Vec<String>> = graph
            .entities()
            .iter()
            .map(|e| vec![e.name.clone(), e.entity_type.clone()])
            .collect();
        let relationship_keys: Vec<Vec<String>> = graph
            .relationships()
            .iter()
            .map(|r| vec![r.source.clone(), r.target.clone()])
            .collect();

        txn.run(
            query(
                "MATCH (a:Entity {project_id: $project_id})-[r:RELATED_TO]->(b:Entity {project_id: $project_id})
                 WHERE NOT [a.name, b.name] IN $keys
                 DELETE r",
            )
            .param("project_id", project_id)
            .param("keys", relationship_keys),
        )
        .await?;

        txn.run(
            query(
                "MATCH (e:Entity {project_id: $project_id})
                 WHERE NOT [e.name, e.type] IN $keys
                 DETACH DELETE e",
            )
            .param("project_id", project_id)
            .param("keys", entity_keys),
        )
        .await?;

        Ok(())
    }
}

fn with_description(q: Query, description: &Description) -> Query {
    match description {
        Description::Text(text) => q.param("description", text.clone()),
        Description::Fragments(items) => q.param("description", items.clone()),
    }
}

fn description_of(row: &Row) -> Description {
    if let Ok(text) = row.get::<String>("description") {
        return Description::Text(text);
    }
    Description::Fragments(row.get::<Vec<String>>("description").unwrap_or_default())
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn fetch(&self, project_id: &str) -> Result<KnowledgeGraph> {
        let mut entities = Vec::new();
        let mut result = self
            .graph
            .execute(
                query(
                    "MATCH (e:Entity {project_id: $project_id})
                     RETURN e.name AS name, e.type AS type,
                            e.description AS description, e.references AS references",
                )
                .param("project_id", project_id),
            )
            .await?;

        while let Some(row) = result.next().await? {
            let (Ok(name), Ok(entity_type)) = (row.get::<String>("name"), row.get::<String>("type"))
            else {
                warn!("Skipping entity row without name/type");
                continue;
            };
            entities.push(Entity {
                name,
                entity_type,
                description: description_of(&row),
                references: row.get::<Vec<String>>("references").unwrap_or_default(),
            });
        }

        let mut relationships = Vec::new();
        let mut result = self
            .graph
            .execute(
                query(
                    "MATCH (a:Entity {project_id: $project_id})-[r:RELATED_TO]->(b:Entity {project_id: $project_id})
                     RETURN DISTINCT a.name AS source, b.name AS target,
                            r.description AS description, r.references AS references",
                )
                .param("project_id", project_id),
            )
            .await?;

        while let Some(row) = result.next().await? {
            let (Ok(source), Ok(target)) =
                (row.get::<String>("source"), row.get::<String>("target"))
            else {
                continue;
            };
            relationships.push(Relationship {
                source,
                target,
                description: description_of(&row),
                references: row.get::<Vec<String>>("references").unwrap_or_default(),
            });
        }

        debug!(
            "Fetched {} entities and {} relationships for {}",
            entities.len(),
            relationships.len(),
            project_id
        );
        Ok(KnowledgeGraph::from_parts(entities, relationships))
    }

    async fn persist(&self, project_id: &str, graph: &KnowledgeGraph) -> Result<()> {
        let mut txn = self.graph.start_txn().await?;

        match Self::write_graph(&mut txn, project_id, graph).await {
            Ok(()) => {
                txn.commit().await?;
                info!(
                    "Persisted {} entities and {} relationships for {}",
                    graph.entity_count(),
                    graph.relationship_count(),
                    project_id
                );
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!("Rollback failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }
}
