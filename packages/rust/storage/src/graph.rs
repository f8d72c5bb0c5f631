//! Entity graph: the [`GraphStore`] boundary and its libSQL implementation.
//!
//! Nodes are keyed by [`DerivedKey`]; upserting a known key merges
//! attribution (one `entity_sources` row per distinct source URL) instead of
//! creating a second node.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use intelgraph_shared::{Entity, EntityLabel, IntelError, Relationship, Result};

use crate::key::{DerivedKey, normalize_entity_text};
use crate::migrations;

/// Traversal depth bounds for [`GraphStore::neighborhood`].
pub const MIN_DEPTH: u32 = 1;
pub const MAX_DEPTH: u32 = 3;

/// An entity node with its accumulated attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: Uuid,
    pub label: EntityLabel,
    /// Normalized key text.
    pub key: String,
    /// Surface text from the first sighting.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Distinct source URLs, oldest first.
    pub sources: Vec<String>,
    /// Distinct job ids that contributed a sighting.
    pub job_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A typed edge with its attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: Uuid,
    pub target: Uuid,
    pub kind: String,
    pub sources: Vec<String>,
}

/// Result of a bounded traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subgraph {
    pub root: Uuid,
    pub depth: u32,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: u64,
    pub relationships: u64,
    /// Node count per label.
    pub labels: BTreeMap<String, u64>,
}

/// Graph store boundary used by the knowledge writer and the query surface.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create the node for `key`, or merge `entity`'s attribution into it.
    async fn upsert_entity(&self, key: &DerivedKey, entity: &Entity) -> Result<GraphNode>;

    async fn get_entity(&self, id: Uuid) -> Result<Option<GraphNode>>;

    /// Nodes whose normalized text equals `name`, across labels.
    async fn find_entities(&self, name: &str) -> Result<Vec<GraphNode>>;

    /// Create (or merge attribution into) an edge. Both endpoints must exist.
    async fn upsert_relationship(&self, relationship: &Relationship) -> Result<GraphEdge>;

    /// Read-only traversal from `id`, depth clamped to `1..=3`.
    async fn neighborhood(&self, id: Uuid, depth: u32) -> Result<Option<Subgraph>>;

    /// Substring search over normalized entity text.
    async fn search(&self, text: &str, limit: usize) -> Result<Vec<GraphNode>>;

    async fn stats(&self) -> Result<GraphStats>;

    /// All node ids (for parity audits).
    async fn entity_ids(&self) -> Result<Vec<Uuid>>;
}

// ---------------------------------------------------------------------------
// libSQL implementation
// ---------------------------------------------------------------------------

/// Graph store backed by a local libSQL database.
pub struct LibsqlGraphStore {
    #[allow(dead_code)]
    db: Database,
    conn: Mutex<Connection>,
}

impl LibsqlGraphStore {
    /// Open or create a database at `path` and apply migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IntelError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(IntelError::storage)?;
        let conn = db.connect().map_err(IntelError::storage)?;

        let store = Self {
            db,
            conn: Mutex::new(conn),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;
        let conn = self.conn.lock().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                conn.execute_batch(migration.sql).await.map_err(|e| {
                    IntelError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 before the first migration.
    pub async fn schema_version(&self) -> u32 {
        let conn = self.conn.lock().await;
        let result = conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| IntelError::Storage(format!("bad timestamp '{raw}': {e}")))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| IntelError::Storage(format!("bad id '{raw}': {e}")))
}

fn parse_label(raw: &str) -> Result<EntityLabel> {
    raw.parse::<EntityLabel>().map_err(IntelError::Storage)
}

const NODE_COLUMNS: &str = "id, label, norm_key, name, confidence, created_at, updated_at";

async fn load_node(conn: &Connection, id: &str) -> Result<Option<GraphNode>> {
    let mut rows = conn
        .query(
            &format!("SELECT {NODE_COLUMNS} FROM entities WHERE id = ?1"),
            params![id],
        )
        .await
        .map_err(IntelError::storage)?;

    let row = match rows.next().await.map_err(IntelError::storage)? {
        Some(row) => row,
        None => return Ok(None),
    };
    let node = row_to_node(&row)?;
    drop(rows);

    Ok(Some(with_sources(conn, node).await?))
}

fn row_to_node(row: &libsql::Row) -> Result<GraphNode> {
    let id = row.get::<String>(0).map_err(IntelError::storage)?;
    let label = row.get::<String>(1).map_err(IntelError::storage)?;
    let created_at = row.get::<String>(5).map_err(IntelError::storage)?;
    let updated_at = row.get::<String>(6).map_err(IntelError::storage)?;

    Ok(GraphNode {
        id: parse_id(&id)?,
        label: parse_label(&label)?,
        key: row.get::<String>(2).map_err(IntelError::storage)?,
        name: row.get::<String>(3).map_err(IntelError::storage)?,
        confidence: row
            .get::<Option<f64>>(4)
            .map_err(IntelError::storage)?
            .map(|c| c as f32),
        sources: Vec::new(),
        job_ids: Vec::new(),
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

async fn with_sources(conn: &Connection, mut node: GraphNode) -> Result<GraphNode> {
    let mut rows = conn
        .query(
            "SELECT source_url, job_id FROM entity_sources
             WHERE entity_id = ?1 ORDER BY seen_at, source_url",
            params![node.id.to_string()],
        )
        .await
        .map_err(IntelError::storage)?;

    while let Some(row) = rows.next().await.map_err(IntelError::storage)? {
        node.sources
            .push(row.get::<String>(0).map_err(IntelError::storage)?);
        if let Some(job_id) = row.get::<Option<String>>(1).map_err(IntelError::storage)? {
            if !node.job_ids.contains(&job_id) {
                node.job_ids.push(job_id);
            }
        }
    }
    Ok(node)
}

async fn load_nodes(conn: &Connection, sql: &str, values: impl libsql::params::IntoParams) -> Result<Vec<GraphNode>> {
    let mut rows = conn.query(sql, values).await.map_err(IntelError::storage)?;
    let mut nodes = Vec::new();
    while let Some(row) = rows.next().await.map_err(IntelError::storage)? {
        nodes.push(row_to_node(&row)?);
    }
    drop(rows);

    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        out.push(with_sources(conn, node).await?);
    }
    Ok(out)
}

async fn edge_sources(conn: &Connection, relationship_id: i64) -> Result<Vec<String>> {
    let mut rows = conn
        .query(
            "SELECT source_url FROM relationship_sources WHERE relationship_id = ?1 ORDER BY source_url",
            params![relationship_id],
        )
        .await
        .map_err(IntelError::storage)?;
    let mut sources = Vec::new();
    while let Some(row) = rows.next().await.map_err(IntelError::storage)? {
        sources.push(row.get::<String>(0).map_err(IntelError::storage)?);
    }
    Ok(sources)
}

#[async_trait]
impl GraphStore for LibsqlGraphStore {
    async fn upsert_entity(&self, key: &DerivedKey, entity: &Entity) -> Result<GraphNode> {
        if key.is_empty() {
            return Err(IntelError::validation("entity text is empty"));
        }

        let id = key.id().to_string();
        let now = Utc::now().to_rfc3339();
        let confidence = entity.confidence.map(f64::from);
        let conn = self.conn.lock().await;

        let tx = conn.transaction().await.map_err(IntelError::storage)?;
        tx.execute(
            "INSERT INTO entities (id, label, norm_key, name, confidence, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(id) DO UPDATE SET
               updated_at = excluded.updated_at,
               confidence = CASE
                 WHEN excluded.confidence IS NULL THEN entities.confidence
                 WHEN entities.confidence IS NULL THEN excluded.confidence
                 ELSE MAX(entities.confidence, excluded.confidence)
               END",
            params![
                id.as_str(),
                key.label.as_str(),
                key.normalized.as_str(),
                entity.text.trim(),
                confidence,
                now.as_str(),
            ],
        )
        .await
        .map_err(IntelError::storage)?;

        if let Some(source_url) = entity.source_url.as_deref() {
            let job_id = entity.job_id.as_ref().map(ToString::to_string);
            tx.execute(
                "INSERT OR IGNORE INTO entity_sources (entity_id, source_url, job_id, seen_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id.as_str(), source_url, job_id, now.as_str()],
            )
            .await
            .map_err(IntelError::storage)?;
        }
        tx.commit().await.map_err(IntelError::storage)?;

        load_node(&conn, &id)
            .await?
            .ok_or_else(|| IntelError::Storage(format!("entity {id} vanished after upsert")))
    }

    async fn get_entity(&self, id: Uuid) -> Result<Option<GraphNode>> {
        let conn = self.conn.lock().await;
        load_node(&conn, &id.to_string()).await
    }

    async fn find_entities(&self, name: &str) -> Result<Vec<GraphNode>> {
        let conn = self.conn.lock().await;
        load_nodes(
            &conn,
            &format!("SELECT {NODE_COLUMNS} FROM entities WHERE norm_key = ?1 ORDER BY label"),
            params![normalize_entity_text(name)],
        )
        .await
    }

    async fn upsert_relationship(&self, relationship: &Relationship) -> Result<GraphEdge> {
        let source = DerivedKey::new(&relationship.source_text, relationship.source_label).id();
        let target = DerivedKey::new(&relationship.target_text, relationship.target_label).id();
        let kind = relationship.kind.trim().to_ascii_uppercase();
        if kind.is_empty() {
            return Err(IntelError::validation("relationship type is empty"));
        }

        let conn = self.conn.lock().await;
        for endpoint in [source, target] {
            if load_node(&conn, &endpoint.to_string()).await?.is_none() {
                return Err(IntelError::Storage(format!(
                    "relationship endpoint {endpoint} does not exist"
                )));
            }
        }

        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction().await.map_err(IntelError::storage)?;
        tx.execute(
            "INSERT OR IGNORE INTO relationships (source_id, target_id, kind, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![source.to_string(), target.to_string(), kind.as_str(), now.as_str()],
        )
        .await
        .map_err(IntelError::storage)?;

        let relationship_id = {
            let mut rows = tx
                .query(
                    "SELECT id FROM relationships WHERE source_id = ?1 AND target_id = ?2 AND kind = ?3",
                    params![source.to_string(), target.to_string(), kind.as_str()],
                )
                .await
                .map_err(IntelError::storage)?;
            let row = rows
                .next()
                .await
                .map_err(IntelError::storage)?
                .ok_or_else(|| IntelError::Storage("relationship vanished after insert".into()))?;
            row.get::<i64>(0).map_err(IntelError::storage)?
        };

        if let Some(source_url) = relationship.source_url.as_deref() {
            tx.execute(
                "INSERT OR IGNORE INTO relationship_sources (relationship_id, source_url) VALUES (?1, ?2)",
                params![relationship_id, source_url],
            )
            .await
            .map_err(IntelError::storage)?;
        }
        tx.commit().await.map_err(IntelError::storage)?;

        Ok(GraphEdge {
            source,
            target,
            kind,
            sources: edge_sources(&conn, relationship_id).await?,
        })
    }

    async fn neighborhood(&self, id: Uuid, depth: u32) -> Result<Option<Subgraph>> {
        let depth = depth.clamp(MIN_DEPTH, MAX_DEPTH);
        let conn = self.conn.lock().await;

        let Some(root) = load_node(&conn, &id.to_string()).await? else {
            return Ok(None);
        };

        let mut nodes: HashMap<Uuid, GraphNode> = HashMap::from([(id, root)]);
        let mut order = vec![id];
        let mut edges: Vec<GraphEdge> = Vec::new();
        let mut seen_edges: HashSet<i64> = HashSet::new();
        let mut queue = VecDeque::from([(id, 0u32)]);

        while let Some((current, level)) = queue.pop_front() {
            if level >= depth {
                continue;
            }

            let mut found = Vec::new();
            {
                let mut rows = conn
                    .query(
                        "SELECT id, source_id, target_id, kind FROM relationships
                         WHERE source_id = ?1 OR target_id = ?1 ORDER BY id",
                        params![current.to_string()],
                    )
                    .await
                    .map_err(IntelError::storage)?;
                while let Some(row) = rows.next().await.map_err(IntelError::storage)? {
                    found.push((
                        row.get::<i64>(0).map_err(IntelError::storage)?,
                        parse_id(&row.get::<String>(1).map_err(IntelError::storage)?)?,
                        parse_id(&row.get::<String>(2).map_err(IntelError::storage)?)?,
                        row.get::<String>(3).map_err(IntelError::storage)?,
                    ));
                }
            }

            for (edge_id, source, target, kind) in found {
                if seen_edges.insert(edge_id) {
                    edges.push(GraphEdge {
                        source,
                        target,
                        kind,
                        sources: edge_sources(&conn, edge_id).await?,
                    });
                }
                let neighbor = if source == current { target } else { source };
                if !nodes.contains_key(&neighbor) {
                    if let Some(node) = load_node(&conn, &neighbor.to_string()).await? {
                        nodes.insert(neighbor, node);
                        order.push(neighbor);
                        queue.push_back((neighbor, level + 1));
                    }
                }
            }
        }

        let nodes = order
            .into_iter()
            .filter_map(|node_id| nodes.remove(&node_id))
            .collect();
        Ok(Some(Subgraph {
            root: id,
            depth,
            nodes,
            edges,
        }))
    }

    async fn search(&self, text: &str, limit: usize) -> Result<Vec<GraphNode>> {
        let needle = normalize_entity_text(text);
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().await;
        load_nodes(
            &conn,
            &format!(
                "SELECT {NODE_COLUMNS} FROM entities
                 WHERE instr(norm_key, ?1) > 0
                 ORDER BY length(norm_key), norm_key LIMIT ?2"
            ),
            params![needle, limit as i64],
        )
        .await
    }

    async fn stats(&self) -> Result<GraphStats> {
        let conn = self.conn.lock().await;
        let mut stats = GraphStats::default();

        let mut rows = conn
            .query(
                "SELECT label, COUNT(*) FROM entities GROUP BY label ORDER BY label",
                params![],
            )
            .await
            .map_err(IntelError::storage)?;
        while let Some(row) = rows.next().await.map_err(IntelError::storage)? {
            let count = row.get::<i64>(1).map_err(IntelError::storage)? as u64;
            stats
                .labels
                .insert(row.get::<String>(0).map_err(IntelError::storage)?, count);
            stats.nodes += count;
        }
        drop(rows);

        let mut rows = conn
            .query("SELECT COUNT(*) FROM relationships", params![])
            .await
            .map_err(IntelError::storage)?;
        if let Some(row) = rows.next().await.map_err(IntelError::storage)? {
            stats.relationships = row.get::<i64>(0).map_err(IntelError::storage)? as u64;
        }

        Ok(stats)
    }

    async fn entity_ids(&self) -> Result<Vec<Uuid>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query("SELECT id FROM entities ORDER BY id", params![])
            .await
            .map_err(IntelError::storage)?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await.map_err(IntelError::storage)? {
            ids.push(parse_id(&row.get::<String>(0).map_err(IntelError::storage)?)?);
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> LibsqlGraphStore {
        let tmp = std::env::temp_dir().join(format!("ig_graph_{}.db", Uuid::now_v7()));
        LibsqlGraphStore::open(&tmp).await.expect("open graph store")
    }

    fn org(text: &str, url: &str) -> Entity {
        Entity::new(text, EntityLabel::Organization).with_source(url)
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let store = test_store().await;
        assert_eq!(store.schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("ig_graph_{}.db", Uuid::now_v7()));
        drop(LibsqlGraphStore::open(&tmp).await.expect("first open"));
        let again = LibsqlGraphStore::open(&tmp).await.expect("second open");
        assert_eq!(again.schema_version().await, 1);
    }

    #[tokio::test]
    async fn upsert_merges_attribution() {
        let store = test_store().await;
        let key = DerivedKey::new("SpaceX", EntityLabel::Organization);

        let first = store
            .upsert_entity(&key, &org("SpaceX", "https://a.example/1"))
            .await
            .unwrap();
        let second = store
            .upsert_entity(&key, &org("spacex", "https://b.example/2"))
            .await
            .unwrap();
        let third = store
            .upsert_entity(&key, &org("SpaceX", "https://a.example/1"))
            .await
            .unwrap();

        assert_eq!(first.id, key.id());
        assert_eq!(second.id, first.id);
        assert_eq!(second.name, "SpaceX");
        assert_eq!(
            third.sources,
            vec!["https://a.example/1".to_string(), "https://b.example/2".to_string()]
        );
        assert_eq!(store.stats().await.unwrap().nodes, 1);
    }

    #[tokio::test]
    async fn empty_key_rejected() {
        let store = test_store().await;
        let key = DerivedKey::new("   ", EntityLabel::Generic);
        let err = store
            .upsert_entity(&key, &Entity::new("   ", EntityLabel::Generic))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[tokio::test]
    async fn relationships_and_traversal() {
        let store = test_store().await;
        for (text, label) in [
            ("Elon Musk", EntityLabel::Person),
            ("SpaceX", EntityLabel::Organization),
            ("Hawthorne", EntityLabel::Location),
            ("Tesla", EntityLabel::Organization),
        ] {
            let entity = Entity::new(text, label).with_source("https://a.example/");
            store
                .upsert_entity(&DerivedKey::new(text, label), &entity)
                .await
                .unwrap();
        }

        let rel = |a: &str, al, b: &str, bl, kind: &str| Relationship {
            source_text: a.into(),
            source_label: al,
            target_text: b.into(),
            target_label: bl,
            kind: kind.into(),
            source_url: Some("https://a.example/".into()),
        };
        use EntityLabel::*;
        store
            .upsert_relationship(&rel("Elon Musk", Person, "SpaceX", Organization, "founded"))
            .await
            .unwrap();
        store
            .upsert_relationship(&rel("SpaceX", Organization, "Hawthorne", Location, "LOCATED_IN"))
            .await
            .unwrap();
        let again = store
            .upsert_relationship(&rel("Elon Musk", Person, "SpaceX", Organization, "FOUNDED"))
            .await
            .unwrap();
        assert_eq!(again.kind, "FOUNDED");
        assert_eq!(again.sources.len(), 1);

        let musk = DerivedKey::new("Elon Musk", Person).id();
        let one = store.neighborhood(musk, 1).await.unwrap().unwrap();
        assert_eq!(one.nodes.len(), 2);
        assert_eq!(one.edges.len(), 1);

        let two = store.neighborhood(musk, 2).await.unwrap().unwrap();
        assert_eq!(two.nodes.len(), 3);
        assert_eq!(two.edges.len(), 2);

        let clamped = store.neighborhood(musk, 0).await.unwrap().unwrap();
        assert_eq!(clamped.depth, 1);
        assert_eq!(store.neighborhood(musk, 99).await.unwrap().unwrap().depth, 3);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.nodes, 4);
        assert_eq!(stats.relationships, 2);
        assert_eq!(stats.labels.get("organization"), Some(&2));
    }

    #[tokio::test]
    async fn relationship_requires_endpoints() {
        let store = test_store().await;
        let err = store
            .upsert_relationship(&Relationship {
                source_text: "Nobody".into(),
                source_label: EntityLabel::Person,
                target_text: "Nowhere".into(),
                target_label: EntityLabel::Location,
                kind: "LOCATED_IN".into(),
                source_url: None,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn search_and_find() {
        let store = test_store().await;
        for text in ["SpaceX", "Space Force", "Blue Origin"] {
            let key = DerivedKey::new(text, EntityLabel::Organization);
            store.upsert_entity(&key, &org(text, "https://a.example/")).await.unwrap();
        }

        let hits = store.search("space", 10).await.unwrap();
        let names: Vec<&str> = hits.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["SpaceX", "Space Force"]);

        assert_eq!(store.search("space", 1).await.unwrap().len(), 1);
        assert_eq!(store.find_entities("  blue ORIGIN ").await.unwrap().len(), 1);
        assert_eq!(store.entity_ids().await.unwrap().len(), 3);
    }
}
