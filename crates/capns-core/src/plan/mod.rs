/// The executable data-flow plan: a labelled DAG of cap invocations.
///
/// Node and edge variants are explicit sum types so the validator, the
/// topological sorter, and the resolver all match exhaustively — there is no
/// "which fields are live for which variant" ambiguity. Plans are immutable
/// once the builder returns them; the execution engine walks
/// [`Plan::topological_order`] and resolves each cap node's bindings.
pub mod builder;

pub use builder::{ChainStep, build_plan};

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::binding::ArgumentBinding;
use crate::cap_urn::CapUrn;
use crate::cardinality::Cardinality;
use crate::error::{Component, Error};
use crate::media::MediaUrn;

/// Cardinality of the plan's input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotCardinality {
    /// One input value.
    Single,
    /// A sequence of input values.
    Sequence,
}

impl From<Cardinality> for SlotCardinality {
    fn from(c: Cardinality) -> Self {
        match c {
            Cardinality::Single => Self::Single,
            Cardinality::Many => Self::Sequence,
        }
    }
}

/// One node of the plan DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanNode {
    /// Entry point: where the caller's input values arrive.
    InputSlot {
        /// Human-facing slot name.
        name: String,
        /// Media URN of the expected input.
        media_urn: MediaUrn,
        /// Whether one value or a sequence arrives.
        cardinality: SlotCardinality,
    },
    /// One cap invocation.
    Cap {
        /// The cap to invoke.
        cap_urn: CapUrn,
        /// One binding per bound argument name.
        bindings: BTreeMap<String, ArgumentBinding>,
        /// Canonical URN of the concrete registry cap chosen for this step,
        /// when the registry resolved one more specific than `cap_urn`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preferred_cap: Option<String>,
    },
    /// Iterates a sequence, running the body once per element.
    ForEach {
        /// The node producing the iterated sequence.
        input_node: String,
        /// First node of the body.
        body_entry: String,
        /// Last node of the body.
        body_exit: String,
    },
    /// Gathers per-element results back into a sequence.
    Collect {
        /// The body-exit nodes whose results are gathered.
        input_nodes: Vec<String>,
    },
    /// Exit point: a named plan result.
    Output {
        /// Human-facing output name.
        name: String,
        /// The node whose value is the result.
        source_node: String,
    },
}

/// The kind of a plan edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanEdgeKind {
    /// Plain data flow.
    Direct,
    /// Flow into a for-each body (one element per iteration).
    Iteration,
    /// Flow out of a body into a collect.
    Collection,
    /// Flow of a single field of a JSON object output.
    JsonField {
        /// The field name.
        field: String,
    },
    /// Flow of a JSON-path projection of an output.
    JsonPath {
        /// The path expression.
        path: String,
    },
}

/// One directed edge of the plan DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEdge {
    /// Source node id.
    pub from: String,
    /// Target node id.
    pub to: String,
    /// Edge kind.
    #[serde(flatten)]
    pub kind: PlanEdgeKind,
}

/// A labelled DAG of cap invocations with fully-resolved argument bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Human-facing plan name.
    pub name: String,
    /// Open metadata (`source_media`, `target_media`, `cap_count`,
    /// `requires_fan_out`, and anything a host adds).
    pub metadata: BTreeMap<String, serde_json::Value>,
    nodes: Vec<(String, PlanNode)>,
    edges: Vec<PlanEdge>,
}

impl Plan {
    /// Creates an empty plan with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            metadata: BTreeMap::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Adds a node under `id`.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] when `id` is already taken.
    pub fn add_node(&mut self, id: &str, node: PlanNode) -> Result<(), Error> {
        if self.node(id).is_some() {
            return Err(Error::Internal {
                component: Component::Plan,
                message: format!("duplicate plan node id {id:?}"),
            });
        }
        self.nodes.push((id.to_owned(), node));
        Ok(())
    }

    /// Adds an edge. Endpoint existence is checked by [`Plan::validate`].
    pub fn add_edge(&mut self, from: &str, to: &str, kind: PlanEdgeKind) {
        self.edges.push(PlanEdge {
            from: from.to_owned(),
            to: to.to_owned(),
            kind,
        });
    }

    /// Looks up a node by id.
    pub fn node(&self, id: &str) -> Option<&PlanNode> {
        self.nodes
            .iter()
            .find(|(node_id, _)| node_id == id)
            .map(|(_, node)| node)
    }

    /// All nodes with their ids, in insertion order.
    pub fn nodes(&self) -> &[(String, PlanNode)] {
        &self.nodes
    }

    /// All edges, in insertion order.
    pub fn edges(&self) -> &[PlanEdge] {
        &self.edges
    }

    /// The ids of all cap nodes, in insertion order.
    pub fn cap_node_ids(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|(_, node)| matches!(node, PlanNode::Cap { .. }))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Checks the plan's structural invariants.
    ///
    /// - every edge endpoint names an existing node;
    /// - every node-id reference inside `ForEach`, `Collect`, and `Output`
    ///   variants names an existing node;
    /// - the plan has an input slot and at least one output;
    /// - the node graph is acyclic.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] describing the first violated invariant.
    pub fn validate(&self) -> Result<(), Error> {
        let reject = |message: String| {
            Err(Error::Internal {
                component: Component::Plan,
                message,
            })
        };

        for edge in &self.edges {
            if self.node(&edge.from).is_none() {
                return reject(format!("edge references missing node {:?}", edge.from));
            }
            if self.node(&edge.to).is_none() {
                return reject(format!("edge references missing node {:?}", edge.to));
            }
        }

        let mut has_input = false;
        let mut has_output = false;
        for (id, node) in &self.nodes {
            match node {
                PlanNode::InputSlot { .. } => has_input = true,
                PlanNode::Output { source_node, .. } => {
                    has_output = true;
                    if self.node(source_node).is_none() {
                        return reject(format!(
                            "output {id:?} references missing node {source_node:?}"
                        ));
                    }
                }
                PlanNode::ForEach {
                    input_node,
                    body_entry,
                    body_exit,
                } => {
                    for referenced in [input_node, body_entry, body_exit] {
                        if self.node(referenced).is_none() {
                            return reject(format!(
                                "for-each {id:?} references missing node {referenced:?}"
                            ));
                        }
                    }
                }
                PlanNode::Collect { input_nodes } => {
                    for referenced in input_nodes {
                        if self.node(referenced).is_none() {
                            return reject(format!(
                                "collect {id:?} references missing node {referenced:?}"
                            ));
                        }
                    }
                }
                PlanNode::Cap { .. } => {}
            }
        }
        if !has_input {
            return reject("plan has no input slot".to_owned());
        }
        if !has_output {
            return reject("plan has no output node".to_owned());
        }

        self.topological_order().map(|_| ())
    }

    /// Returns the node ids in dependency order (Kahn's algorithm).
    ///
    /// Seeds the queue with zero-in-degree nodes in insertion order, so the
    /// result is deterministic for a given plan.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] when the edge set contains a cycle.
    pub fn topological_order(&self) -> Result<Vec<String>, Error> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|(id, _)| (id.as_str(), 0))
            .collect();
        for edge in &self.edges {
            if let Some(degree) = in_degree.get_mut(edge.to.as_str()) {
                *degree += 1;
            }
        }

        let mut queue: VecDeque<&str> = self
            .nodes
            .iter()
            .map(|(id, _)| id.as_str())
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();

        let mut order: Vec<String> = Vec::with_capacity(self.nodes.len());
        while let Some(current) = queue.pop_front() {
            order.push(current.to_owned());
            for edge in &self.edges {
                if edge.from != current {
                    continue;
                }
                if let Some(degree) = in_degree.get_mut(edge.to.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(edge.to.as_str());
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(Error::Internal {
                component: Component::Plan,
                message: "plan node graph contains a cycle".to_owned(),
            });
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use crate::error::ErrorKind;
    use crate::test_helpers::{cap_urn, media};

    fn input_slot() -> PlanNode {
        PlanNode::InputSlot {
            name: "input".to_owned(),
            media_urn: media("media:bytes;pdf"),
            cardinality: SlotCardinality::Single,
        }
    }

    fn cap_node() -> PlanNode {
        PlanNode::Cap {
            cap_urn: cap_urn(r#"cap:in="media:bytes;pdf";out="media:md;textable""#),
            bindings: BTreeMap::new(),
            preferred_cap: None,
        }
    }

    fn output(source: &str) -> PlanNode {
        PlanNode::Output {
            name: "result".to_owned(),
            source_node: source.to_owned(),
        }
    }

    fn linear_plan() -> Plan {
        let mut plan = Plan::new("Transform: pdf -> md");
        plan.add_node("input_slot", input_slot()).expect("node");
        plan.add_node("cap_0", cap_node()).expect("node");
        plan.add_node("output", output("cap_0")).expect("node");
        plan.add_edge("input_slot", "cap_0", PlanEdgeKind::Direct);
        plan.add_edge("cap_0", "output", PlanEdgeKind::Direct);
        plan
    }

    /// A well-formed linear plan validates and orders.
    #[test]
    fn test_linear_plan_validates() {
        let plan = linear_plan();
        plan.validate().expect("valid");
        let order = plan.topological_order().expect("orders");
        assert_eq!(order, vec!["input_slot", "cap_0", "output"]);
    }

    /// Duplicate node ids are rejected at insertion.
    #[test]
    fn test_duplicate_node_id_rejected() {
        let mut plan = linear_plan();
        let err = plan.add_node("cap_0", cap_node()).expect_err("duplicate");
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    /// Edges to missing nodes reject the plan.
    #[test]
    fn test_edge_to_missing_node_rejected() {
        let mut plan = linear_plan();
        plan.add_edge("cap_0", "ghost", PlanEdgeKind::Direct);
        let err = plan.validate().expect_err("missing node");
        assert!(err.to_string().contains("ghost"));
    }

    /// Output references are checked.
    #[test]
    fn test_output_reference_checked() {
        let mut plan = Plan::new("broken");
        plan.add_node("input_slot", input_slot()).expect("node");
        plan.add_node("output", output("ghost")).expect("node");
        assert!(plan.validate().is_err());
    }

    /// A plan without an input slot or output is rejected.
    #[test]
    fn test_entry_and_output_required() {
        let mut plan = Plan::new("no-entry");
        plan.add_node("cap_0", cap_node()).expect("node");
        plan.add_node("output", output("cap_0")).expect("node");
        assert!(plan.validate().is_err());

        let mut plan = Plan::new("no-output");
        plan.add_node("input_slot", input_slot()).expect("node");
        assert!(plan.validate().is_err());
    }

    /// Cycles fail the topological sort.
    #[test]
    fn test_cycle_detected() {
        let mut plan = linear_plan();
        plan.add_edge("output", "input_slot", PlanEdgeKind::Direct);
        let err = plan.topological_order().expect_err("cycle");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("cycle"));
    }

    /// For-each and collect references are checked.
    #[test]
    fn test_for_each_references_checked() {
        let mut plan = linear_plan();
        plan.add_node(
            "foreach_1",
            PlanNode::ForEach {
                input_node: "cap_0".to_owned(),
                body_entry: "ghost".to_owned(),
                body_exit: "ghost".to_owned(),
            },
        )
        .expect("node");
        assert!(plan.validate().is_err());
    }

    /// Serde round-trips the full plan structure.
    #[test]
    fn test_plan_serde_round_trip() {
        let plan = linear_plan();
        let json = serde_json::to_value(&plan).expect("serialize");
        let back: Plan = serde_json::from_value(json).expect("deserialize");
        assert_eq!(plan, back);
    }

    /// Edge kinds serialize under their external names.
    #[test]
    fn test_edge_kind_external_names() {
        let edge = PlanEdge {
            from: "a".to_owned(),
            to: "b".to_owned(),
            kind: PlanEdgeKind::JsonField {
                field: "path".to_owned(),
            },
        };
        let json = serde_json::to_value(&edge).expect("serialize");
        assert_eq!(json["kind"], "json_field");
        assert_eq!(json["field"], "path");
    }
}
