use std::collections::{HashMap, HashSet};

use super::{parse_vertex, Edge, Node};

/// Vertex every run starts from.
pub const START_VERTEX: usize = 1;

/// Adjacency list keyed by numeric vertex id. Neighbors keep edge insertion
/// order. Edges whose endpoints are not numeric, or whose source is larger than
/// every node id, are ignored. Storage grows with the edge count, never with the
/// magnitude of the ids.
pub fn build_adjacency(nodes: &[Node], edges: &[Edge]) -> HashMap<usize, Vec<usize>> {
    let max_id = nodes
        .iter()
        .filter_map(Node::vertex)
        .fold(START_VERTEX, usize::max);

    let mut adjacency: HashMap<usize, Vec<usize>> = HashMap::new();
    for edge in edges {
        let (Some(source), Some(target)) = (parse_vertex(&edge.source), parse_vertex(&edge.target))
        else {
            tracing::debug!(source = %edge.source, target = %edge.target, "ignoring non-numeric edge");
            continue;
        };
        if source > max_id {
            tracing::debug!(source, target, "ignoring edge from unknown vertex");
            continue;
        }
        adjacency.entry(source).or_default().push(target);
    }
    adjacency
}

/// Ordered list of nodes reachable from `start`, in depth-first discovery order.
///
/// Visiting vertex `v` appends every node whose id equals `v` (duplicates
/// included), marks `v` visited, then descends into its neighbors in edge order.
/// Each vertex is visited at most once, so cycles terminate. The walk uses an
/// explicit stack; neighbors are pushed in reverse so the pop order matches a
/// recursive walk exactly.
pub fn resolve<'a>(nodes: &'a [Node], edges: &[Edge], start: usize) -> Vec<&'a Node> {
    let adjacency = build_adjacency(nodes, edges);
    let mut by_vertex: HashMap<usize, Vec<&'a Node>> = HashMap::new();
    for node in nodes {
        if let Some(vertex) = node.vertex() {
            by_vertex.entry(vertex).or_default().push(node);
        }
    }

    let mut visited = HashSet::new();
    let mut result = Vec::new();
    let mut stack = vec![start];

    while let Some(vertex) = stack.pop() {
        if !visited.insert(vertex) {
            continue;
        }
        if let Some(matching) = by_vertex.get(&vertex) {
            result.extend(matching.iter().copied());
        }

        if let Some(neighbors) = adjacency.get(&vertex) {
            stack.extend(neighbors.iter().rev().filter(|&&n| !visited.contains(&n)));
        }
    }

    result
}
