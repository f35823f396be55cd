/// Petgraph-based workflow adjacency
///
/// Builds a directed graph from a workflow's branches once per execution so
/// reachability, descendant sets, and parent lookups don't re-scan the branch
/// list. Nodes cover both actions and triggers, since branches may originate
/// from either.

use crate::workflow::types::Workflow;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};

/// Directed adjacency over a workflow's branches
#[derive(Debug)]
pub struct WorkflowGraph {
    /// The petgraph DiGraph structure; node weights are node ids
    graph: DiGraph<String, ()>,
    /// Mapping from node id to graph node index
    node_indices: HashMap<String, NodeIndex>,
}

impl WorkflowGraph {
    /// Build the adjacency for a workflow
    ///
    /// Branches referencing unknown endpoints are ignored; a valid workflow
    /// has none.
    pub fn new(workflow: &Workflow) -> Self {
        let mut graph = DiGraph::new();
        let mut node_indices = HashMap::new();

        for action in &workflow.actions {
            let index = graph.add_node(action.id.clone());
            node_indices.insert(action.id.clone(), index);
        }
        for trigger in &workflow.triggers {
            let index = graph.add_node(trigger.id.clone());
            node_indices.insert(trigger.id.clone(), index);
        }

        for branch in &workflow.branches {
            let source = node_indices.get(&branch.source_id);
            let destination = node_indices.get(&branch.destination_id);
            if let (Some(&source), Some(&destination)) = (source, destination) {
                graph.add_edge(source, destination, ());
            }
        }

        Self { graph, node_indices }
    }

    /// All node ids reachable from the given node via outgoing branches,
    /// including the node itself. BFS over the adjacency.
    pub fn reachable_from(&self, node_id: &str) -> HashSet<String> {
        let mut reachable: HashSet<NodeIndex> = HashSet::new();
        let Some(&start) = self.node_indices.get(node_id) else {
            return HashSet::new();
        };

        let mut queue = VecDeque::new();
        queue.push_back(start);
        reachable.insert(start);

        while let Some(current) = queue.pop_front() {
            for neighbor in self.graph.neighbors_directed(current, Direction::Outgoing) {
                if reachable.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }

        reachable
            .into_iter()
            .map(|index| self.graph[index].clone())
            .collect()
    }

    /// Immediate parents of a node (sources of its incoming branches)
    pub fn parents(&self, node_id: &str) -> Vec<String> {
        let Some(&index) = self.node_indices.get(node_id) else {
            return Vec::new();
        };

        self.graph
            .neighbors_directed(index, Direction::Incoming)
            .map(|parent| self.graph[parent].clone())
            .collect()
    }
}
