/// Plan emission: turning a chosen path plus its cardinality analysis into
/// a validated DAG.
///
/// Linear steps chain with `Direct` edges. Each fan-out span becomes a
/// `ForEach` node, the span's cap nodes, and a `Collect` node, wired
/// `prev → foreach → body… → collect`. Per step, the cap's file-path
/// argument binds to the current input file or — when the cap declares a
/// stdin source for exactly its input media — to the previous node's
/// output, which lets the execution engine chain steps through stdin
/// instead of temp files. Every other declared argument binds as a `Slot`,
/// whose resolution precedence (slot value, cap setting, declared default)
/// covers both user-supplied values and defaults.
use std::collections::BTreeMap;

use serde_json::json;

use crate::binding::{ArgumentBinding, ResolvedFile};
use crate::cap::Cap;
use crate::cap_urn::IoSpec;
use crate::cardinality::CardinalityAnalysis;
use crate::error::{Component, Error};
use crate::media::MediaUrn;
use crate::plan::{Plan, PlanEdgeKind, PlanNode, SlotCardinality};

/// The id of the plan's input slot node.
pub const INPUT_SLOT_ID: &str = "input_slot";
/// The id of the plan's output node.
pub const OUTPUT_ID: &str = "output";

/// One step of a chosen path, as resolved against the registry.
#[derive(Debug, Clone)]
pub struct ChainStep {
    /// The cap to invoke at this step.
    pub cap: Cap,
    /// Name of the registry that contributed it.
    pub registry_name: String,
    /// Canonical URN of a more specific registry cap preferred for this
    /// step, when best-match resolution found one.
    pub preferred_cap: Option<String>,
}

impl ChainStep {
    /// A step with no preferred-cap override.
    pub fn new(cap: Cap, registry_name: &str) -> Self {
        Self {
            cap,
            registry_name: registry_name.to_owned(),
            preferred_cap: None,
        }
    }
}

/// `true` when the cap's file-path argument also accepts its value on stdin
/// with a stdin media URN equal to the cap's input spec — the condition for
/// chaining this step behind its predecessor's output.
pub(crate) fn file_path_is_stdin_chainable(cap: &Cap) -> bool {
    let Some(arg) = cap.file_path_arg() else {
        return false;
    };
    let Some(stdin_media) = arg.stdin_media_urn() else {
        return false;
    };
    match cap.in_spec() {
        IoSpec::Media(in_media) => stdin_media == in_media,
        IoSpec::Wildcard => false,
    }
}

/// Builds the binding map for one cap node.
///
/// `file_path_binding` is the binding for the cap's file-path argument (if
/// the cap has one); every other declared argument becomes a slot binding
/// carrying the argument's resolved schema when one is registered.
fn step_bindings(
    cap: &Cap,
    file_path_binding: ArgumentBinding,
) -> BTreeMap<String, ArgumentBinding> {
    let mut bindings = BTreeMap::new();
    let file_path_name = cap.file_path_arg().map(|arg| arg.name.clone());

    if let Some(name) = &file_path_name {
        bindings.insert(name.clone(), file_path_binding);
    }

    for arg in cap.args() {
        if Some(&arg.name) == file_path_name.as_ref() {
            continue;
        }
        let schema = cap
            .resolve_spec_id(&arg.media_urn.canonical())
            .ok()
            .and_then(|spec| spec.schema);
        bindings.insert(
            arg.name.clone(),
            ArgumentBinding::Slot {
                name: arg.name.clone(),
                schema,
            },
        );
    }
    bindings
}

/// The binding for a step's file-path argument in a linear position.
fn linear_file_path_binding(step_index: usize, cap: &Cap, prev: &str) -> ArgumentBinding {
    if step_index > 0 && file_path_is_stdin_chainable(cap) {
        ArgumentBinding::PreviousOutput {
            node_id: prev.to_owned(),
            field: None,
        }
    } else {
        ArgumentBinding::InputFilePath
    }
}

fn cap_node(step: &ChainStep, bindings: BTreeMap<String, ArgumentBinding>) -> PlanNode {
    PlanNode::Cap {
        cap_urn: step.cap.urn().clone(),
        bindings,
        preferred_cap: step.preferred_cap.clone(),
    }
}

/// Emits the plan for a chosen path.
///
/// An empty `chain` produces the identity plan: `input_slot → output` with
/// `cap_count` 0 and no fan-out.
///
/// # Errors
///
/// - [`Error::Internal`] (plan builder) when `chain` and `analysis`
///   disagree on step count;
/// - any [`Error::Internal`] from final plan validation.
pub fn build_plan(
    source_media: &MediaUrn,
    target_media: &MediaUrn,
    chain: &[ChainStep],
    analysis: &CardinalityAnalysis,
    input_files: &[ResolvedFile],
) -> Result<Plan, Error> {
    if chain.len() != analysis.cardinalities.len() {
        return Err(Error::Internal {
            component: Component::PlanBuilder,
            message: format!(
                "chain has {} steps but analysis covers {}",
                chain.len(),
                analysis.cardinalities.len()
            ),
        });
    }

    let mut plan = Plan::new(&format!(
        "Transform: {} -> {}",
        source_media.canonical(),
        target_media.canonical()
    ));
    plan.metadata
        .insert("source_media".to_owned(), json!(source_media.canonical()));
    plan.metadata
        .insert("target_media".to_owned(), json!(target_media.canonical()));
    plan.metadata
        .insert("cap_count".to_owned(), json!(chain.len()));
    plan.metadata.insert(
        "requires_fan_out".to_owned(),
        json!(analysis.requires_fan_out()),
    );

    let cardinality = crate::cardinality::input_cardinality(input_files.len(), source_media);
    plan.add_node(
        INPUT_SLOT_ID,
        PlanNode::InputSlot {
            name: "input".to_owned(),
            media_urn: source_media.clone(),
            cardinality: SlotCardinality::from(cardinality),
        },
    )?;

    let mut prev = INPUT_SLOT_ID.to_owned();
    let mut index = 0usize;
    while index < chain.len() {
        if let Some(span) = analysis.fan_out_at(index) {
            let foreach_id = format!("foreach_{index}");
            let collect_id = format!("collect_{index}");
            let entry_id = format!("cap_{}", span.entry);
            let exit_id = format!("cap_{}", span.exit);

            plan.add_node(
                &foreach_id,
                PlanNode::ForEach {
                    input_node: prev.clone(),
                    body_entry: entry_id.clone(),
                    body_exit: exit_id.clone(),
                },
            )?;
            plan.add_edge(&prev, &foreach_id, PlanEdgeKind::Direct);

            let mut body_prev = foreach_id.clone();
            for body_index in span.entry..=span.exit {
                let step = &chain[body_index];
                let cap_id = format!("cap_{body_index}");
                let file_binding = if body_index == span.entry {
                    // The iteration hands the body one element at a time.
                    ArgumentBinding::InputFilePath
                } else if file_path_is_stdin_chainable(&step.cap) {
                    ArgumentBinding::PreviousOutput {
                        node_id: body_prev.clone(),
                        field: None,
                    }
                } else {
                    ArgumentBinding::InputFilePath
                };
                plan.add_node(&cap_id, cap_node(step, step_bindings(&step.cap, file_binding)))?;
                let edge_kind = if body_index == span.entry {
                    PlanEdgeKind::Iteration
                } else {
                    PlanEdgeKind::Direct
                };
                plan.add_edge(&body_prev, &cap_id, edge_kind);
                body_prev = cap_id;
            }

            plan.add_node(
                &collect_id,
                PlanNode::Collect {
                    input_nodes: vec![exit_id.clone()],
                },
            )?;
            plan.add_edge(&exit_id, &collect_id, PlanEdgeKind::Collection);

            prev = collect_id;
            index = span.exit + 1;
        } else {
            let step = &chain[index];
            let cap_id = format!("cap_{index}");
            let file_binding = linear_file_path_binding(index, &step.cap, &prev);
            plan.add_node(&cap_id, cap_node(step, step_bindings(&step.cap, file_binding)))?;
            plan.add_edge(&prev, &cap_id, PlanEdgeKind::Direct);
            prev = cap_id;
            index += 1;
        }
    }

    plan.add_node(
        OUTPUT_ID,
        PlanNode::Output {
            name: "result".to_owned(),
            source_node: prev.clone(),
        },
    )?;
    plan.add_edge(&prev, OUTPUT_ID, PlanEdgeKind::Direct);

    plan.validate()?;
    Ok(plan)
}
