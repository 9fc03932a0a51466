//! A read-only snapshot of the resolved links of one cache.
//!
//! Nodes are the cache's entities, edges run from parent to child and carry the association
//! name. Useful for inspecting self-referencing hierarchies (an employee's management chain) and
//! for spotting cycles in them.

use petgraph::{algo::kosaraju_scc, graph::NodeIndex, visit::EdgeRef, Direction};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::{
    cache::EntityGraph,
    error::CacheError,
    properties::{EntityId, ManagerId},
};

#[derive(Debug, Clone, Default, Serialize)]
pub struct RelationGraph {
    graph: petgraph::Graph<EntityId, String>,
    #[serde(skip)]
    index: BTreeMap<EntityId, NodeIndex>,
}

impl RelationGraph {
    pub fn as_graph(&self) -> &petgraph::Graph<EntityId, String> {
        &self.graph
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn add_node(&mut self, id: EntityId) -> NodeIndex {
        *self
            .index
            .entry(id)
            .or_insert_with(|| self.graph.add_node(id))
    }

    /// Children of `id`, across every association, with the association name.
    pub fn children(&self, id: EntityId) -> Vec<(EntityId, &str)> {
        self.neighbours(id, Direction::Outgoing)
    }

    pub fn parents(&self, id: EntityId) -> Vec<(EntityId, &str)> {
        self.neighbours(id, Direction::Incoming)
    }

    fn neighbours(&self, id: EntityId, direction: Direction) -> Vec<(EntityId, &str)> {
        let Some(idx) = self.index.get(&id) else {
            return vec![];
        };
        let mut found: Vec<(EntityId, &str)> = self
            .graph
            .edges_directed(*idx, direction)
            .map(|edge| {
                let other = match direction {
                    Direction::Outgoing => edge.target(),
                    Direction::Incoming => edge.source(),
                };
                (self.graph[other], edge.weight().as_str())
            })
            .collect();
        found.sort();
        found
    }

    /// Groups of entities that are linked in a cycle, including an entity that is its own
    /// parent.
    pub fn cycles(&self) -> Vec<Vec<EntityId>> {
        kosaraju_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.graph.find_edge(scc[0], scc[0]).is_some())
            .map(|scc| {
                let mut ids: Vec<EntityId> = scc.into_iter().map(|idx| self.graph[idx]).collect();
                ids.sort();
                ids
            })
            .collect()
    }
}

impl EntityGraph {
    pub fn relation_graph(&self, mid: ManagerId) -> Result<RelationGraph, CacheError> {
        let mut relations = RelationGraph::default();
        let mut members: Vec<EntityId> = self.manager(mid)?.entities().map(|(_, id)| id).collect();
        members.sort();
        for id in members.iter() {
            relations.add_node(*id);
        }
        for id in members {
            let record = self.record(id)?;
            for (association, set) in record.children.iter() {
                let name = &self.metadata.association(*association).name;
                let source = relations.add_node(id);
                for child in set.iter() {
                    let sink = relations.add_node(child);
                    relations.graph.add_edge(source, sink, name.clone());
                }
            }
        }
        Ok(relations)
    }
}
