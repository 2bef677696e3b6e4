/// Cap-graph construction over media-URN nodes using `petgraph`, plus the
/// matching-based outgoing-edge query.
///
/// # Construction
///
/// [`build_graph`] runs one pass over the cap list: for each cap it inserts
/// the nodes for the cap's `in` and `out` media specs (a literal `*` spec
/// maps to the bare `media:` wildcard, which behaves identically under
/// matching) and one edge from `in` to `out` carrying the cap, the name of
/// the registry that contributed it, and the edge's specificity.
///
/// Parallel edges between the same pair of nodes are legal — two registries
/// may offer different caps for the same conversion. The same `(from_spec,
/// cap_urn)` pair recurring is not: that means the registry handed over a
/// stale snapshot, and construction aborts with an internal error rather
/// than silently planning against duplicate data.
///
/// # Outgoing query
///
/// [`CapGraph::get_outgoing`] is *not* an adjacency lookup. It scans the
/// edge set and includes every edge whose `from_spec` matches the query URN
/// in the tagged-URN wildcard sense, so a concrete query like
/// `media:bytes;png` traverses an edge whose `from_spec` is the wildcarder
/// `media:bytes`. Results are sorted by descending edge specificity with a
/// stable sort, keeping registry insertion order among ties.
pub mod queries;

pub use queries::{DEFAULT_MAX_DEPTH, find_all_paths, find_best_path, find_path};

use std::collections::{HashMap, HashSet};

use petgraph::stable_graph::{NodeIndex, StableDiGraph};

use crate::cap::Cap;
use crate::cap_urn::IoSpec;
use crate::error::{Component, Error};
use crate::media::MediaUrn;

/// Weight stored inline on each petgraph node.
#[derive(Debug, Clone)]
pub struct MediaNode {
    /// Canonical string form of the node's media URN.
    pub canonical: String,
    /// The parsed media URN.
    pub urn: MediaUrn,
}

/// One edge of the cap graph: a single cap's `in → out` conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct CapEdge {
    /// The cap's input media URN (graph source node).
    pub from_spec: MediaUrn,
    /// The cap's output media URN (graph target node).
    pub to_spec: MediaUrn,
    /// The cap itself.
    pub cap: Cap,
    /// Name of the registry that contributed the cap.
    pub registry_name: String,
    /// Combined specificity of `from_spec` and `to_spec`; more precisely
    /// typed conversions sort first and score higher in best-path search.
    pub specificity: usize,
}

/// Resolves an [`IoSpec`] to the media URN used as a graph node.
///
/// The literal `*` and the bare `media:` URN match the same set of payloads,
/// so both collapse onto the `media:` node.
fn spec_node(spec: &IoSpec) -> MediaUrn {
    match spec {
        IoSpec::Wildcard => MediaUrn::wildcard(),
        IoSpec::Media(urn) => urn.clone(),
    }
}

/// A directed multigraph of caps over media-URN nodes.
///
/// Built once per registry snapshot and read-only afterwards; concurrent
/// queries against the same graph never conflict.
#[derive(Debug)]
pub struct CapGraph {
    graph: StableDiGraph<MediaNode, usize>,
    edges: Vec<CapEdge>,
    id_to_index: HashMap<String, NodeIndex>,
}

impl CapGraph {
    /// Returns the number of media-URN nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges (one per cap).
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Returns all edges in insertion order.
    pub fn edges(&self) -> &[CapEdge] {
        &self.edges
    }

    /// Returns `true` if a node with the given canonical media URN exists.
    pub fn contains_node(&self, canonical: &str) -> bool {
        self.id_to_index.contains_key(canonical)
    }

    /// Returns the canonical URN strings of all nodes, in insertion order.
    pub fn nodes(&self) -> Vec<&str> {
        self.graph
            .node_weights()
            .map(|w| w.canonical.as_str())
            .collect()
    }

    /// Returns every edge whose `from_spec` matches `query`, sorted by
    /// descending specificity.
    ///
    /// Matching, not equality: an edge requiring `media:bytes` is returned
    /// for the concrete query `media:bytes;png`. The scan is linear in the
    /// edge count, which is the size regime cap registries live in.
    pub fn get_outgoing(&self, query: &MediaUrn) -> Vec<&CapEdge> {
        self.outgoing_indexed(query)
            .into_iter()
            .map(|(_, edge)| edge)
            .collect()
    }

    /// [`CapGraph::get_outgoing`] with each edge's index into
    /// [`CapGraph::edges`], for queries that reconstruct paths.
    pub(crate) fn outgoing_indexed(&self, query: &MediaUrn) -> Vec<(usize, &CapEdge)> {
        let mut matching: Vec<(usize, &CapEdge)> = self
            .edges
            .iter()
            .enumerate()
            .filter(|(_, edge)| edge.from_spec.matches(query))
            .collect();
        matching.sort_by(|(_, a), (_, b)| b.specificity.cmp(&a.specificity));
        matching
    }

    /// Returns every edge whose `to_spec` matches `query`, sorted by
    /// descending specificity.
    pub fn get_incoming(&self, query: &MediaUrn) -> Vec<&CapEdge> {
        let mut matching: Vec<&CapEdge> = self
            .edges
            .iter()
            .filter(|edge| edge.to_spec.matches(query))
            .collect();
        matching.sort_by(|a, b| b.specificity.cmp(&a.specificity));
        matching
    }
}

/// Constructs a [`CapGraph`] from caps annotated with their registry names.
///
/// # Errors
///
/// [`Error::Internal`] when the same `(from_spec, cap_urn)` pair occurs
/// twice — duplicate edges indicate stale registry data and abort the build.
pub fn build_graph(caps: &[(String, Cap)]) -> Result<CapGraph, Error> {
    let mut graph: StableDiGraph<MediaNode, usize> =
        StableDiGraph::with_capacity(caps.len() * 2, caps.len());
    let mut id_to_index: HashMap<String, NodeIndex> = HashMap::with_capacity(caps.len() * 2);
    let mut edges: Vec<CapEdge> = Vec::with_capacity(caps.len());
    let mut seen: HashSet<(String, String)> = HashSet::with_capacity(caps.len());

    fn intern(
        graph: &mut StableDiGraph<MediaNode, usize>,
        id_to_index: &mut HashMap<String, NodeIndex>,
        urn: &MediaUrn,
    ) -> NodeIndex {
        let canonical = urn.canonical();
        match id_to_index.get(&canonical) {
            Some(&idx) => idx,
            None => {
                let idx = graph.add_node(MediaNode {
                    canonical: canonical.clone(),
                    urn: urn.clone(),
                });
                id_to_index.insert(canonical, idx);
                idx
            }
        }
    }

    for (registry_name, cap) in caps {
        let from_spec = spec_node(cap.in_spec());
        let to_spec = spec_node(cap.out_spec());
        let cap_urn = cap.urn().canonical();

        if !seen.insert((from_spec.canonical(), cap_urn.clone())) {
            return Err(Error::Internal {
                component: Component::Graph,
                message: format!(
                    "Duplicate cap_urn {cap_urn} at {} indicates stale caps",
                    from_spec.canonical()
                ),
            });
        }

        let from_idx = intern(&mut graph, &mut id_to_index, &from_spec);
        let to_idx = intern(&mut graph, &mut id_to_index, &to_spec);

        let edge_index = edges.len();
        edges.push(CapEdge {
            specificity: from_spec.specificity() + to_spec.specificity(),
            from_spec,
            to_spec,
            cap: cap.clone(),
            registry_name: registry_name.clone(),
        });
        graph.add_edge(from_idx, to_idx, edge_index);
    }

    Ok(CapGraph {
        graph,
        edges,
        id_to_index,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use crate::error::ErrorKind;
    use crate::test_helpers::{conversion_cap, media};

    fn named(caps: Vec<Cap>) -> Vec<(String, Cap)> {
        caps.into_iter().map(|c| ("main".to_owned(), c)).collect()
    }

    /// An empty cap list builds an empty graph.
    #[test]
    fn test_empty_graph() {
        let g = build_graph(&[]).expect("builds");
        assert_eq!(g.node_count(), 0);
        assert_eq!(g.edge_count(), 0);
    }

    /// One edge per cap; endpoints become nodes.
    #[test]
    fn test_counts_match_caps() {
        let caps = named(vec![
            conversion_cap("media:bytes;pdf", "media:md;textable"),
            conversion_cap("media:md;textable", "media:form=map;json;textable"),
        ]);
        let g = build_graph(&caps).expect("builds");
        assert_eq!(g.edge_count(), 2);
        assert_eq!(g.node_count(), 3);
        for edge in g.edges() {
            assert!(g.contains_node(&edge.from_spec.canonical()));
            assert!(g.contains_node(&edge.to_spec.canonical()));
        }
    }

    /// Shared endpoints are interned to a single node.
    #[test]
    fn test_shared_nodes_interned() {
        let caps = named(vec![
            conversion_cap("media:bytes;pdf", "media:md;textable"),
            conversion_cap("media:bytes;docx", "media:md;textable"),
        ]);
        let g = build_graph(&caps).expect("builds");
        assert_eq!(g.node_count(), 3);
    }

    /// Parallel edges from distinct caps are allowed.
    #[test]
    fn test_parallel_edges_from_distinct_caps() {
        let mut alt = conversion_cap("media:bytes;pdf", "media:md;textable");
        alt = crate::test_helpers::retagged(&alt, "engine", "alt");
        let caps = named(vec![
            conversion_cap("media:bytes;pdf", "media:md;textable"),
            alt,
        ]);
        let g = build_graph(&caps).expect("parallel edges are legal");
        assert_eq!(g.edge_count(), 2);
    }

    /// A repeated `(from, cap_urn)` pair aborts with an internal error.
    #[test]
    fn test_duplicate_edge_is_internal_error() {
        let caps = named(vec![
            conversion_cap("media:bytes;pdf", "media:md;textable"),
            conversion_cap("media:bytes;pdf", "media:md;textable"),
        ]);
        let err = build_graph(&caps).expect_err("duplicate must fail");
        assert_eq!(err.kind(), ErrorKind::Internal);
        let msg = err.to_string();
        assert!(msg.contains("Duplicate cap_urn"), "{msg}");
        assert!(msg.contains("stale caps"), "{msg}");
    }

    /// The outgoing query matches wildcard edges against concrete queries.
    #[test]
    fn test_get_outgoing_uses_matching() {
        let caps = named(vec![
            conversion_cap("media:bytes", "media:textable"),
            conversion_cap("media:bytes;png", "media:bytes;png;thumbnail"),
            conversion_cap("media:textable", "media:form=map;json;textable"),
        ]);
        let g = build_graph(&caps).expect("builds");

        let outgoing = g.get_outgoing(&media("media:bytes;png"));
        assert_eq!(outgoing.len(), 2, "wildcard and exact edges both match");
        // Descending specificity: the png-specific edge first.
        assert_eq!(outgoing[0].from_spec.canonical(), "media:bytes;png");
        assert_eq!(outgoing[1].from_spec.canonical(), "media:bytes");

        let none = g.get_outgoing(&media("media:form=list"));
        assert!(none.is_empty());
    }

    /// A `*` in/out spec collapses onto the `media:` wildcard node.
    #[test]
    fn test_star_spec_becomes_media_wildcard_node() {
        let caps = named(vec![crate::test_helpers::cap_from_urn(
            "cap:in=*;out=media:textable;op=slurp",
        )]);
        let g = build_graph(&caps).expect("builds");
        assert!(g.contains_node("media:"));
        // The wildcard edge matches any media query.
        assert_eq!(g.get_outgoing(&media("media:bytes;png")).len(), 1);
    }

    /// Incoming queries mirror outgoing ones.
    #[test]
    fn test_get_incoming() {
        let caps = named(vec![
            conversion_cap("media:bytes;pdf", "media:md;textable"),
            conversion_cap("media:bytes;docx", "media:md;textable"),
        ]);
        let g = build_graph(&caps).expect("builds");
        assert_eq!(g.get_incoming(&media("media:md;textable")).len(), 2);
        assert!(g.get_incoming(&media("media:bytes;pdf")).is_empty());
    }
}
