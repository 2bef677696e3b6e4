/// Path queries over a [`CapGraph`]: BFS shortest path, bounded DFS
/// all-paths enumeration, and specificity-weighted best path.
///
/// The neighbour relation everywhere is [`CapGraph::get_outgoing`] —
/// matching, not adjacency — so traversal honours wildcard edges. Node
/// identity during traversal is the canonical media-URN string of an edge's
/// `to_spec`; termination compares `to_spec` against the target canonically.
use std::collections::{HashMap, HashSet, VecDeque};

use crate::graph::{CapEdge, CapGraph};
use crate::media::MediaUrn;

/// Default maximum number of hops for [`find_all_paths`] and
/// [`find_best_path`].
pub const DEFAULT_MAX_DEPTH: usize = 20;

/// Returns the shortest path from `from` to `to` as an edge sequence.
///
/// BFS, terminating as soon as an edge's `to_spec` equals `to`. The empty
/// path is returned when `from` equals `to` canonically. `None` means `to`
/// is unreachable.
pub fn find_path<'g>(
    graph: &'g CapGraph,
    from: &MediaUrn,
    to: &MediaUrn,
) -> Option<Vec<&'g CapEdge>> {
    let target = to.canonical();
    if from.canonical() == target {
        return Some(Vec::new());
    }

    // predecessor: reached node canonical → (previous node canonical, edge index)
    let mut predecessor: HashMap<String, (String, usize)> = HashMap::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<MediaUrn> = VecDeque::new();

    visited.insert(from.canonical());
    queue.push_back(from.clone());

    while let Some(current) = queue.pop_front() {
        let current_id = current.canonical();
        for (edge_index, edge) in graph.outgoing_indexed(&current) {
            let reached = edge.to_spec.canonical();
            if visited.contains(&reached) {
                continue;
            }
            visited.insert(reached.clone());
            predecessor.insert(reached.clone(), (current_id.clone(), edge_index));

            if reached == target {
                return Some(reconstruct(graph, &predecessor, &from.canonical(), &reached));
            }
            queue.push_back(edge.to_spec.clone());
        }
    }

    None
}

/// Walks the predecessor map back from `reached` to `start`, returning the
/// edge sequence in forward order.
fn reconstruct<'g>(
    graph: &'g CapGraph,
    predecessor: &HashMap<String, (String, usize)>,
    start: &str,
    reached: &str,
) -> Vec<&'g CapEdge> {
    let mut path: Vec<&CapEdge> = Vec::new();
    let mut current = reached.to_owned();
    while current != start {
        let Some((previous, edge_index)) = predecessor.get(&current) else {
            // BFS recorded a predecessor for every reached node, so the
            // chain back to the start is unbroken.
            break;
        };
        path.push(&graph.edges()[*edge_index]);
        current = previous.clone();
    }
    path.reverse();
    path
}

/// Returns all simple paths from `from` to `to` with at most `max_depth`
/// edges, sorted ascending by length.
///
/// Backtracking DFS with a shared path vector and on-path set; a path is
/// simple when no intermediate media-URN node repeats. When `from` equals
/// `to` the single empty path is returned.
pub fn find_all_paths<'g>(
    graph: &'g CapGraph,
    from: &MediaUrn,
    to: &MediaUrn,
    max_depth: usize,
) -> Vec<Vec<&'g CapEdge>> {
    let target = to.canonical();
    if from.canonical() == target {
        return vec![Vec::new()];
    }

    let mut results: Vec<Vec<usize>> = Vec::new();
    let mut path: Vec<usize> = Vec::new();
    let mut on_path: HashSet<String> = HashSet::new();
    on_path.insert(from.canonical());

    dfs(
        graph,
        from,
        &target,
        max_depth,
        &mut path,
        &mut on_path,
        &mut results,
    );

    results.sort_by_key(Vec::len);
    results
        .into_iter()
        .map(|indices| {
            indices
                .into_iter()
                .map(|edge_index| &graph.edges()[edge_index])
                .collect()
        })
        .collect()
}

fn dfs(
    graph: &CapGraph,
    current: &MediaUrn,
    target: &str,
    depth_limit: usize,
    path: &mut Vec<usize>,
    on_path: &mut HashSet<String>,
    results: &mut Vec<Vec<usize>>,
) {
    if path.len() >= depth_limit {
        return;
    }

    for (edge_index, edge) in graph.outgoing_indexed(current) {
        let reached = edge.to_spec.canonical();

        if reached == target {
            path.push(edge_index);
            results.push(path.clone());
            path.pop();
            continue;
        }

        if on_path.contains(&reached) {
            continue;
        }

        path.push(edge_index);
        on_path.insert(reached.clone());

        dfs(
            graph,
            &edge.to_spec,
            target,
            depth_limit,
            path,
            on_path,
            results,
        );

        path.pop();
        on_path.remove(&reached);
    }
}

/// Returns the path from `from` to `to` maximising summed edge specificity,
/// with ties broken by path length (shorter first) and then by enumeration
/// order.
pub fn find_best_path<'g>(
    graph: &'g CapGraph,
    from: &MediaUrn,
    to: &MediaUrn,
    max_depth: usize,
) -> Option<Vec<&'g CapEdge>> {
    let paths = find_all_paths(graph, from, to, max_depth);
    let mut best: Option<(usize, Vec<&CapEdge>)> = None;
    for path in paths {
        let score: usize = path.iter().map(|edge| edge.specificity).sum();
        let better = match &best {
            None => true,
            Some((best_score, best_path)) => {
                score > *best_score || (score == *best_score && path.len() < best_path.len())
            }
        };
        if better {
            best = Some((score, path));
        }
    }
    best.map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use crate::graph::build_graph;
    use crate::test_helpers::{conversion_cap, media, named_caps};

    fn chain_graph() -> CapGraph {
        // pdf → md → json, plus a direct wildcard route bytes → json.
        build_graph(&named_caps(vec![
            conversion_cap("media:bytes;pdf", "media:md;textable"),
            conversion_cap("media:md;textable", "media:form=map;json;textable"),
            conversion_cap("media:bytes", "media:form=map;json;textable"),
        ]))
        .expect("builds")
    }

    /// BFS finds the one-hop route even when a two-hop route exists.
    #[test]
    fn test_find_path_shortest() {
        let g = chain_graph();
        let path = find_path(
            &g,
            &media("media:bytes;pdf"),
            &media("media:form=map;json;textable"),
        )
        .expect("reachable");
        assert_eq!(path.len(), 1, "the wildcard bytes edge is one hop");
        assert_eq!(path[0].from_spec.canonical(), "media:bytes");
    }

    /// Identical endpoints produce the empty path.
    #[test]
    fn test_find_path_identity() {
        let g = chain_graph();
        let path = find_path(&g, &media("media:md;textable"), &media("media:md;textable"))
            .expect("identity");
        assert!(path.is_empty());
    }

    /// Unreachable targets produce `None`.
    #[test]
    fn test_find_path_unreachable() {
        let g = chain_graph();
        assert!(
            find_path(
                &g,
                &media("media:form=map;json;textable"),
                &media("media:bytes;pdf")
            )
            .is_none()
        );
    }

    /// Path edges chain: each hop's output feeds the next hop's input.
    #[test]
    fn test_find_path_edges_chain() {
        let g = build_graph(&named_caps(vec![
            conversion_cap("media:bytes;pdf", "media:md;textable"),
            conversion_cap("media:md;textable", "media:form=map;json;textable"),
        ]))
        .expect("builds");
        let path = find_path(
            &g,
            &media("media:bytes;pdf"),
            &media("media:form=map;json;textable"),
        )
        .expect("reachable");
        assert_eq!(path.len(), 2);
        for pair in path.windows(2) {
            assert!(pair[0].to_spec.conforms_to(&pair[1].from_spec));
        }
    }

    /// All simple paths are enumerated, shortest first.
    #[test]
    fn test_find_all_paths() {
        let g = chain_graph();
        let paths = find_all_paths(
            &g,
            &media("media:bytes;pdf"),
            &media("media:form=map;json;textable"),
            DEFAULT_MAX_DEPTH,
        );
        // One-hop wildcard route and the two-hop pdf → md → json route.
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].len(), 1);
        assert_eq!(paths[1].len(), 2);
    }

    /// The depth bound prunes longer paths.
    #[test]
    fn test_find_all_paths_depth_bound() {
        let g = chain_graph();
        let paths = find_all_paths(
            &g,
            &media("media:bytes;pdf"),
            &media("media:form=map;json;textable"),
            1,
        );
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].len(), 1);
    }

    /// Identical endpoints enumerate the single empty path.
    #[test]
    fn test_find_all_paths_identity() {
        let g = chain_graph();
        let paths = find_all_paths(
            &g,
            &media("media:bytes;pdf"),
            &media("media:bytes;pdf"),
            DEFAULT_MAX_DEPTH,
        );
        assert_eq!(paths, vec![Vec::<&CapEdge>::new()]);
    }

    /// Best path maximises summed specificity, not hop count.
    #[test]
    fn test_find_best_path_prefers_specificity() {
        let g = chain_graph();
        let best = find_best_path(
            &g,
            &media("media:bytes;pdf"),
            &media("media:form=map;json;textable"),
            DEFAULT_MAX_DEPTH,
        )
        .expect("reachable");
        // The two-hop typed route scores 2+2 + 2+3 over the wildcard's 1+3.
        assert_eq!(best.len(), 2);
        assert_eq!(best[0].from_spec.canonical(), "media:bytes;pdf");
    }

    /// Cycles do not hang the enumeration.
    #[test]
    fn test_cycles_are_bounded() {
        let g = build_graph(&named_caps(vec![
            conversion_cap("media:a-form", "media:b-form"),
            conversion_cap("media:b-form", "media:a-form"),
            conversion_cap("media:b-form", "media:c-form"),
        ]))
        .expect("builds");
        let paths = find_all_paths(
            &g,
            &media("media:a-form"),
            &media("media:c-form"),
            DEFAULT_MAX_DEPTH,
        );
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].len(), 2);
    }
}
