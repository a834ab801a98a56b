//! The knowledge graph: sqlite persistence + in-memory working copy
//!
//! Writes go to persistent storage first, then update the in-memory copy,
//! so the in-memory graph is always a function of persistent state. On
//! `reload()` it is rebuilt from storage and any races lose to
//! persistence.
//!
//! Traversals run against the in-memory copy under a reader-writer lock:
//! queries are readers, reload is the writer. The graph contains cycles
//! (mutual resource dependencies are real in scheduler estates), so every
//! breadth-first routine carries a `max_depth` and a visited set.

use crate::model::{GraphEdge, GraphNode, NodeType, RelationType, Triplet};
use parking_lot::Mutex;
use rusqlite::Connection;
use rustc_hash::FxHashMap;
use sentra_core::{Error, Result};
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Graph-wide statistics
#[derive(Debug, Clone)]
pub struct GraphStatistics {
    /// Total nodes
    pub node_count: usize,
    /// Total edges
    pub edge_count: usize,
    /// Edges carrying negative knowledge
    pub error_edge_count: usize,
    /// Node counts by type name
    pub nodes_by_type: FxHashMap<String, usize>,
    /// Edge counts by relation name
    pub edges_by_type: FxHashMap<String, usize>,
}

/// In-memory working copy: nodes plus adjacency by edge index
#[derive(Default)]
struct GraphState {
    nodes: FxHashMap<String, GraphNode>,
    edges: Vec<GraphEdge>,
    outgoing: FxHashMap<String, Vec<usize>>,
    incoming: FxHashMap<String, Vec<usize>>,
}

impl GraphState {
    fn index_edge(&mut self, edge: GraphEdge) {
        let position = self.edges.len();
        self.outgoing
            .entry(edge.source.clone())
            .or_default()
            .push(position);
        self.incoming
            .entry(edge.target.clone())
            .or_default()
            .push(position);
        self.edges.push(edge);
    }

    fn rebuild(&mut self, nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) {
        self.nodes = nodes.into_iter().map(|n| (n.id.clone(), n)).collect();
        self.edges = Vec::with_capacity(edges.len());
        self.outgoing = FxHashMap::default();
        self.incoming = FxHashMap::default();
        for edge in edges {
            self.index_edge(edge);
        }
    }
}

/// Typed graph over persistent nodes and edges
pub struct KnowledgeGraph {
    conn: Mutex<Connection>,
    memory: RwLock<GraphState>,
}

impl KnowledgeGraph {
    /// Open (or create) the graph under `dir/kg.db`
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let conn = Connection::open(dir.join("kg.db"))
            .map_err(|e| Error::Store(format!("open knowledge graph: {e}")))?;
        Self::build(conn)
    }

    /// In-memory graph for tests and ephemeral runs
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Store(format!("open knowledge graph: {e}")))?;
        Self::build(conn)
    }

    fn build(conn: Connection) -> Result<Self> {
        let graph = KnowledgeGraph {
            conn: Mutex::new(conn),
            memory: RwLock::new(GraphState::default()),
        };
        graph.init_schema()?;
        info!("knowledge graph opened");
        Ok(graph)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                properties TEXT NOT NULL DEFAULT '{}'
            );
            CREATE TABLE IF NOT EXISTS edges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL REFERENCES nodes(id),
                target TEXT NOT NULL REFERENCES nodes(id),
                type TEXT NOT NULL,
                properties TEXT NOT NULL DEFAULT '{}',
                is_error_knowledge INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_edges_source_type ON edges(source, type);
            CREATE INDEX IF NOT EXISTS idx_edges_target_type ON edges(target, type);",
        )
        .map_err(store_err)?;
        Ok(())
    }

    // ========================================================================
    // Mutations (persist first, then memory)
    // ========================================================================

    /// Upsert a node; property maps merge, a type change is allowed but
    /// warned
    pub async fn add_node(
        &self,
        id: &str,
        node_type: NodeType,
        properties: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        if id.is_empty() {
            return Err(Error::Validation("node id cannot be empty".to_string()));
        }

        let merged = {
            let conn = self.conn.lock();
            let existing: Option<(String, String)> = conn
                .query_row(
                    "SELECT type, properties FROM nodes WHERE id = ?1",
                    [id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map(Some)
                .or_else(no_rows_to_none)?;

            let mut merged = match &existing {
                Some((existing_type, existing_props)) => {
                    if existing_type != node_type.as_str() {
                        warn!(
                            id,
                            old_type = %existing_type,
                            new_type = node_type.as_str(),
                            "node re-typed"
                        );
                    }
                    serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(
                        existing_props,
                    )
                    .unwrap_or_default()
                }
                None => serde_json::Map::new(),
            };
            for (key, value) in properties {
                merged.insert(key, value);
            }

            conn.execute(
                "INSERT INTO nodes (id, type, properties) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET type = ?2, properties = ?3",
                rusqlite::params![id, node_type.as_str(), serde_json::to_string(&merged)?],
            )
            .map_err(store_err)?;
            merged
        };

        let mut memory = self.memory.write().await;
        memory.nodes.insert(
            id.to_string(),
            GraphNode {
                id: id.to_string(),
                node_type,
                properties: merged,
            },
        );
        debug!(id, node_type = node_type.as_str(), "node upserted");
        Ok(())
    }

    /// Insert a directed edge; missing endpoints are created as Concept
    /// nodes. Returns the edge's row id.
    ///
    /// Every insertion is a distinct row: an error-knowledge edge never
    /// replaces a positive edge of the same (source, target, type).
    pub async fn add_edge(
        &self,
        source: &str,
        target: &str,
        relation: RelationType,
        properties: serde_json::Map<String, serde_json::Value>,
    ) -> Result<i64> {
        if source.is_empty() || target.is_empty() {
            return Err(Error::Validation(
                "edge endpoints cannot be empty".to_string(),
            ));
        }

        for endpoint in [source, target] {
            let known = {
                let memory = self.memory.read().await;
                memory.nodes.contains_key(endpoint)
            };
            if !known {
                self.add_node(endpoint, NodeType::Concept, serde_json::Map::new())
                    .await?;
            }
        }

        let is_error = relation.is_error_knowledge();
        let edge_id = {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO edges (source, target, type, properties, is_error_knowledge)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    source,
                    target,
                    relation.as_str(),
                    serde_json::to_string(&properties)?,
                    is_error as i64
                ],
            )
            .map_err(store_err)?;
            conn.last_insert_rowid()
        };

        let mut memory = self.memory.write().await;
        memory.index_edge(GraphEdge {
            id: edge_id,
            source: source.to_string(),
            target: target.to_string(),
            relation,
            properties,
            is_error_knowledge: is_error,
        });
        debug!(source, target, relation = relation.as_str(), "edge added");
        Ok(edge_id)
    }

    /// Insert a triplet: endpoints upserted with their declared types, then
    /// the edge with confidence/source metadata merged into `extra_props`
    pub async fn add_triplet(
        &self,
        triplet: &Triplet,
        mut extra_props: serde_json::Map<String, serde_json::Value>,
    ) -> Result<i64> {
        triplet.validate()?;

        self.add_node(&triplet.subject_id, triplet.subject_type, serde_json::Map::new())
            .await?;
        self.add_node(&triplet.object_id, triplet.object_type, serde_json::Map::new())
            .await?;

        extra_props.insert("confidence".to_string(), triplet.confidence.into());
        extra_props.insert(
            "source_memory_id".to_string(),
            triplet.source_memory_id.clone().into(),
        );
        self.add_edge(
            &triplet.subject_id,
            &triplet.object_id,
            triplet.predicate,
            extra_props,
        )
        .await
    }

    /// Remove a node and every edge touching it; returns whether it existed
    pub async fn remove_node(&self, id: &str) -> Result<bool> {
        let existed = {
            let conn = self.conn.lock();
            conn.execute(
                "DELETE FROM edges WHERE source = ?1 OR target = ?1",
                [id],
            )
            .map_err(store_err)?;
            conn.execute("DELETE FROM nodes WHERE id = ?1", [id])
                .map_err(store_err)?
                > 0
        };
        if existed {
            self.reload().await?;
        }
        Ok(existed)
    }

    /// Remove one edge by row id; returns whether it existed
    pub async fn remove_edge(&self, edge_id: i64) -> Result<bool> {
        let existed = {
            let conn = self.conn.lock();
            conn.execute("DELETE FROM edges WHERE id = ?1", [edge_id])
                .map_err(store_err)?
                > 0
        };
        if existed {
            self.reload().await?;
        }
        Ok(existed)
    }

    /// Rebuild the in-memory copy from persistent storage
    ///
    /// Registered as the refresh callback with the KG cache manager.
    pub async fn reload(&self) -> Result<()> {
        let (nodes, edges) = {
            let conn = self.conn.lock();

            let mut node_statement = conn
                .prepare("SELECT id, type, properties FROM nodes")
                .map_err(store_err)?;
            let nodes: Vec<GraphNode> = node_statement
                .query_map([], |row| {
                    let type_name: String = row.get(1)?;
                    let props_text: String = row.get(2)?;
                    Ok(GraphNode {
                        id: row.get(0)?,
                        node_type: NodeType::from_name(&type_name).unwrap_or(NodeType::Concept),
                        properties: serde_json::from_str(&props_text).unwrap_or_default(),
                    })
                })
                .map_err(store_err)?
                .collect::<std::result::Result<_, _>>()
                .map_err(store_err)?;

            let mut edge_statement = conn
                .prepare(
                    "SELECT id, source, target, type, properties, is_error_knowledge
                     FROM edges ORDER BY id",
                )
                .map_err(store_err)?;
            let edges: Vec<GraphEdge> = edge_statement
                .query_map([], |row| {
                    let type_name: String = row.get(3)?;
                    let props_text: String = row.get(4)?;
                    Ok(GraphEdge {
                        id: row.get(0)?,
                        source: row.get(1)?,
                        target: row.get(2)?,
                        relation: RelationType::from_name(&type_name)
                            .unwrap_or(RelationType::IncorrectAssociation),
                        properties: serde_json::from_str(&props_text).unwrap_or_default(),
                        is_error_knowledge: row.get::<_, i64>(5)? != 0,
                    })
                })
                .map_err(store_err)?
                .collect::<std::result::Result<_, _>>()
                .map_err(store_err)?;

            (nodes, edges)
        };

        let mut memory = self.memory.write().await;
        memory.rebuild(nodes, edges);
        info!(
            nodes = memory.nodes.len(),
            edges = memory.edges.len(),
            "knowledge graph reloaded"
        );
        Ok(())
    }

    // ========================================================================
    // Queries (readers of the in-memory copy)
    // ========================================================================

    /// Fetch a node by id
    pub async fn node(&self, id: &str) -> Option<GraphNode> {
        self.memory.read().await.nodes.get(id).cloned()
    }

    /// Upstream dependency chain of a job over DEPENDS_ON edges
    ///
    /// Breadth-first from the job, bounded by `max_depth`, error edges
    /// ignored. The returned list starts with the job itself, in visit
    /// order.
    pub async fn dependency_chain(&self, job: &str, max_depth: usize) -> Vec<String> {
        self.bounded_bfs(job, max_depth, Direction::Outgoing, |edge| {
            edge.relation == RelationType::DependsOn && !edge.is_error_knowledge
        })
        .await
    }

    /// Jobs downstream of a job: the dual of `dependency_chain` over
    /// reversed DEPENDS_ON edges
    pub async fn downstream_jobs(&self, job: &str, max_depth: usize) -> Vec<String> {
        self.bounded_bfs(job, max_depth, Direction::Incoming, |edge| {
            edge.relation == RelationType::DependsOn && !edge.is_error_knowledge
        })
        .await
    }

    async fn bounded_bfs(
        &self,
        start: &str,
        max_depth: usize,
        direction: Direction,
        follow: impl Fn(&GraphEdge) -> bool,
    ) -> Vec<String> {
        let memory = self.memory.read().await;
        if !memory.nodes.contains_key(start) {
            return Vec::new();
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut order = Vec::new();
        let mut frontier = VecDeque::new();
        visited.insert(start.to_string());
        order.push(start.to_string());
        frontier.push_back((start.to_string(), 0usize));

        while let Some((node, depth)) = frontier.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let adjacency = match direction {
                Direction::Outgoing => memory.outgoing.get(&node),
                Direction::Incoming => memory.incoming.get(&node),
            };
            let Some(edge_indices) = adjacency else {
                continue;
            };
            for &index in edge_indices {
                let edge = &memory.edges[index];
                if !follow(edge) {
                    continue;
                }
                let next = match direction {
                    Direction::Outgoing => &edge.target,
                    Direction::Incoming => &edge.source,
                };
                if visited.insert(next.clone()) {
                    order.push(next.clone());
                    frontier.push_back((next.clone(), depth + 1));
                }
            }
        }
        order
    }

    /// Jobs with a USES_RESOURCE edge onto the given resource
    pub async fn jobs_using_resource(&self, resource: &str) -> Vec<String> {
        let memory = self.memory.read().await;
        memory
            .incoming
            .get(resource)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| &memory.edges[i])
                    .filter(|e| {
                        e.relation == RelationType::UsesResource && !e.is_error_knowledge
                    })
                    .map(|e| e.source.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resources a job holds USES_RESOURCE edges onto
    pub async fn resources_of_job(&self, job: &str) -> Vec<String> {
        let memory = self.memory.read().await;
        memory
            .outgoing
            .get(job)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| &memory.edges[i])
                    .filter(|e| {
                        e.relation == RelationType::UsesResource && !e.is_error_knowledge
                    })
                    .map(|e| e.target.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Job nodes ranked by degree centrality over positive edges
    pub async fn critical_jobs(&self, top_n: usize) -> Vec<(String, usize)> {
        let memory = self.memory.read().await;
        let mut degrees: Vec<(String, usize)> = memory
            .nodes
            .values()
            .filter(|node| node.node_type == NodeType::Job)
            .map(|node| {
                let count_positive = |indices: Option<&Vec<usize>>| {
                    indices
                        .map(|list| {
                            list.iter()
                                .filter(|&&i| !memory.edges[i].is_error_knowledge)
                                .count()
                        })
                        .unwrap_or(0)
                };
                let degree = count_positive(memory.outgoing.get(&node.id))
                    + count_positive(memory.incoming.get(&node.id));
                (node.id.clone(), degree)
            })
            .collect();
        degrees.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        degrees.truncate(top_n);
        degrees
    }

    /// Direct neighbors over both edge directions
    ///
    /// Error-knowledge edges are only followed with `include_errors`.
    pub async fn neighbors(&self, node: &str, include_errors: bool) -> Vec<String> {
        let memory = self.memory.read().await;
        let mut seen = HashSet::new();
        let mut result = Vec::new();

        let mut collect = |indices: Option<&Vec<usize>>, pick_target: bool| {
            if let Some(list) = indices {
                for &i in list {
                    let edge = &memory.edges[i];
                    if edge.is_error_knowledge && !include_errors {
                        continue;
                    }
                    let other = if pick_target { &edge.target } else { &edge.source };
                    if seen.insert(other.clone()) {
                        result.push(other.clone());
                    }
                }
            }
        };
        collect(memory.outgoing.get(node), true);
        collect(memory.incoming.get(node), false);
        result
    }

    /// Shortest directed path over positive edges, if any
    pub async fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let memory = self.memory.read().await;
        if !memory.nodes.contains_key(from) || !memory.nodes.contains_key(to) {
            return None;
        }
        if from == to {
            return Some(vec![from.to_string()]);
        }

        let mut predecessor: FxHashMap<String, String> = FxHashMap::default();
        let mut frontier = VecDeque::new();
        frontier.push_back(from.to_string());
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(from.to_string());

        while let Some(node) = frontier.pop_front() {
            let Some(indices) = memory.outgoing.get(&node) else {
                continue;
            };
            for &i in indices {
                let edge = &memory.edges[i];
                if edge.is_error_knowledge {
                    continue;
                }
                if visited.insert(edge.target.clone()) {
                    predecessor.insert(edge.target.clone(), node.clone());
                    if edge.target == to {
                        let mut path = vec![to.to_string()];
                        let mut current = to.to_string();
                        while let Some(prev) = predecessor.get(&current) {
                            path.push(prev.clone());
                            current = prev.clone();
                        }
                        path.reverse();
                        return Some(path);
                    }
                    frontier.push_back(edge.target.clone());
                }
            }
        }
        None
    }

    /// Error-knowledge edges leaving a node
    pub async fn error_edges_from(&self, node: &str) -> Vec<GraphEdge> {
        let memory = self.memory.read().await;
        memory
            .outgoing
            .get(node)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| memory.edges[i].clone())
                    .filter(|e| e.is_error_knowledge)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Count of error-knowledge edges in the graph
    pub async fn error_edge_count(&self) -> usize {
        self.memory
            .read()
            .await
            .edges
            .iter()
            .filter(|e| e.is_error_knowledge)
            .count()
    }

    /// Graph-wide statistics
    pub async fn statistics(&self) -> GraphStatistics {
        let memory = self.memory.read().await;
        let mut nodes_by_type: FxHashMap<String, usize> = FxHashMap::default();
        for node in memory.nodes.values() {
            *nodes_by_type
                .entry(node.node_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        let mut edges_by_type: FxHashMap<String, usize> = FxHashMap::default();
        let mut error_edge_count = 0usize;
        for edge in &memory.edges {
            *edges_by_type
                .entry(edge.relation.as_str().to_string())
                .or_insert(0) += 1;
            if edge.is_error_knowledge {
                error_edge_count += 1;
            }
        }
        GraphStatistics {
            node_count: memory.nodes.len(),
            edge_count: memory.edges.len(),
            error_edge_count,
            nodes_by_type,
            edges_by_type,
        }
    }
}

enum Direction {
    Outgoing,
    Incoming,
}

fn store_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}

fn no_rows_to_none<T>(e: rusqlite::Error) -> Result<Option<T>> {
    match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(store_err(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    async fn job_chain() -> KnowledgeGraph {
        // EXTRACT -> TRANSFORM -> LOAD, LOAD uses DB_LOCK
        let kg = KnowledgeGraph::in_memory().unwrap();
        for job in ["EXTRACT", "TRANSFORM", "LOAD"] {
            kg.add_node(job, NodeType::Job, serde_json::Map::new())
                .await
                .unwrap();
        }
        kg.add_node("DB_LOCK", NodeType::Resource, serde_json::Map::new())
            .await
            .unwrap();
        kg.add_edge("LOAD", "TRANSFORM", RelationType::DependsOn, serde_json::Map::new())
            .await
            .unwrap();
        kg.add_edge(
            "TRANSFORM",
            "EXTRACT",
            RelationType::DependsOn,
            serde_json::Map::new(),
        )
        .await
        .unwrap();
        kg.add_edge("LOAD", "DB_LOCK", RelationType::UsesResource, serde_json::Map::new())
            .await
            .unwrap();
        kg
    }

    #[tokio::test]
    async fn test_dependency_chain_bounded() {
        let kg = job_chain().await;
        let chain = kg.dependency_chain("LOAD", 5).await;
        assert_eq!(chain, vec!["LOAD", "TRANSFORM", "EXTRACT"]);

        let shallow = kg.dependency_chain("LOAD", 1).await;
        assert_eq!(shallow, vec!["LOAD", "TRANSFORM"]);
    }

    #[tokio::test]
    async fn test_downstream_is_dual() {
        let kg = job_chain().await;
        let downstream = kg.downstream_jobs("EXTRACT", 5).await;
        assert_eq!(downstream, vec!["EXTRACT", "TRANSFORM", "LOAD"]);
    }

    #[tokio::test]
    async fn test_cycle_terminates() {
        let kg = KnowledgeGraph::in_memory().unwrap();
        kg.add_edge("A", "B", RelationType::DependsOn, serde_json::Map::new())
            .await
            .unwrap();
        kg.add_edge("B", "A", RelationType::DependsOn, serde_json::Map::new())
            .await
            .unwrap();
        let chain = kg.dependency_chain("A", 10).await;
        assert_eq!(chain, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_resource_queries() {
        let kg = job_chain().await;
        assert_eq!(kg.jobs_using_resource("DB_LOCK").await, vec!["LOAD"]);
        assert_eq!(kg.resources_of_job("LOAD").await, vec!["DB_LOCK"]);
        assert!(kg.resources_of_job("EXTRACT").await.is_empty());
    }

    #[tokio::test]
    async fn test_error_edges_ignored_by_traversal() {
        let kg = job_chain().await;
        kg.add_edge(
            "LOAD",
            "BOGUS_JOB",
            RelationType::IncorrectAssociation,
            props(&[("confidence", 0.9.into())]),
        )
        .await
        .unwrap();

        // Positive traversal unchanged
        let chain = kg.dependency_chain("LOAD", 5).await;
        assert!(!chain.contains(&"BOGUS_JOB".to_string()));
        // Neighbors hide error edges unless asked
        assert!(!kg.neighbors("LOAD", false).await.contains(&"BOGUS_JOB".to_string()));
        assert!(kg.neighbors("LOAD", true).await.contains(&"BOGUS_JOB".to_string()));
        // And the error edge is discoverable where it matters
        assert_eq!(kg.error_edges_from("LOAD").await.len(), 1);
    }

    #[tokio::test]
    async fn test_error_edge_coexists_with_positive_edge() {
        let kg = KnowledgeGraph::in_memory().unwrap();
        kg.add_edge("J1", "WS1", RelationType::RunsOn, serde_json::Map::new())
            .await
            .unwrap();
        kg.add_edge(
            "J1",
            "WS1",
            RelationType::RunsOn,
            serde_json::Map::new(),
        )
        .await
        .unwrap();
        kg.add_edge(
            "J1",
            "WS1",
            RelationType::IncorrectAssociation,
            serde_json::Map::new(),
        )
        .await
        .unwrap();

        let stats = kg.statistics().await;
        assert_eq!(stats.edge_count, 3);
        assert_eq!(stats.error_edge_count, 1);
        assert_eq!(stats.edges_by_type["RUNS_ON"], 2);
    }

    #[tokio::test]
    async fn test_node_property_merge_and_retype_warning() {
        let kg = KnowledgeGraph::in_memory().unwrap();
        kg.add_node("X", NodeType::Job, props(&[("a", 1.into())]))
            .await
            .unwrap();
        kg.add_node("X", NodeType::Concept, props(&[("b", 2.into())]))
            .await
            .unwrap();

        let node = kg.node("X").await.unwrap();
        assert_eq!(node.node_type, NodeType::Concept);
        assert_eq!(node.properties["a"], serde_json::json!(1));
        assert_eq!(node.properties["b"], serde_json::json!(2));
    }

    #[tokio::test]
    async fn test_triplet_insertion() {
        let kg = KnowledgeGraph::in_memory().unwrap();
        let triplet = Triplet {
            subject_id: "BATCH_A".to_string(),
            subject_type: NodeType::Job,
            predicate: RelationType::IncorrectSolutionFor,
            object_id: "AWSBIS529".to_string(),
            object_type: NodeType::ErrorCode,
            confidence: 0.9,
            source_memory_id: "m-1".to_string(),
        };
        kg.add_triplet(&triplet, serde_json::Map::new()).await.unwrap();

        assert_eq!(kg.node("BATCH_A").await.unwrap().node_type, NodeType::Job);
        assert_eq!(
            kg.node("AWSBIS529").await.unwrap().node_type,
            NodeType::ErrorCode
        );
        let edges = kg.error_edges_from("BATCH_A").await;
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].properties["confidence"], serde_json::json!(0.9));
        assert_eq!(edges[0].properties["source_memory_id"], serde_json::json!("m-1"));
    }

    #[tokio::test]
    async fn test_shortest_path() {
        let kg = job_chain().await;
        assert_eq!(
            kg.shortest_path("LOAD", "EXTRACT").await,
            Some(vec![
                "LOAD".to_string(),
                "TRANSFORM".to_string(),
                "EXTRACT".to_string()
            ])
        );
        assert_eq!(kg.shortest_path("EXTRACT", "LOAD").await, None);
        assert_eq!(
            kg.shortest_path("LOAD", "LOAD").await,
            Some(vec!["LOAD".to_string()])
        );
    }

    #[tokio::test]
    async fn test_critical_jobs_by_degree() {
        let kg = job_chain().await;
        let critical = kg.critical_jobs(2).await;
        // LOAD and TRANSFORM both have degree 2; ties break by name
        assert_eq!(critical[0].0, "LOAD".to_string());
        assert_eq!(critical.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_node_cascades() {
        let kg = job_chain().await;
        assert!(kg.remove_node("TRANSFORM").await.unwrap());
        assert!(kg.node("TRANSFORM").await.is_none());
        let chain = kg.dependency_chain("LOAD", 5).await;
        assert_eq!(chain, vec!["LOAD"]);
        assert!(!kg.remove_node("TRANSFORM").await.unwrap());
    }

    #[tokio::test]
    async fn test_reload_rebuilds_from_persistence() {
        let tmp = tempfile::TempDir::new().unwrap();
        {
            let kg = KnowledgeGraph::open(tmp.path()).unwrap();
            kg.add_edge("A", "B", RelationType::DependsOn, serde_json::Map::new())
                .await
                .unwrap();
        }
        // A fresh handle starts with an empty working copy until reload
        let kg = KnowledgeGraph::open(tmp.path()).unwrap();
        assert!(kg.dependency_chain("A", 5).await.is_empty());
        kg.reload().await.unwrap();
        assert_eq!(kg.dependency_chain("A", 5).await, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_statistics() {
        let kg = job_chain().await;
        let stats = kg.statistics().await;
        assert_eq!(stats.node_count, 4);
        assert_eq!(stats.edge_count, 3);
        assert_eq!(stats.error_edge_count, 0);
        assert_eq!(stats.nodes_by_type["job"], 3);
        assert_eq!(stats.nodes_by_type["resource"], 1);
    }
}
