/// Per-argument resolution analysis for a chosen path.
///
/// Before executing (or even building) a plan, a host wants to know which
/// arguments the path can satisfy by itself and which need user input. This
/// module classifies every argument of every step and gathers the
/// user-facing slots.
use serde::{Deserialize, Serialize};

use crate::cap::Cap;
use crate::cap_urn::CapUrn;
use crate::error::Error;
use crate::media::MediaUrn;
use crate::plan::builder::file_path_is_stdin_chainable;
use crate::registry::CapCube;

/// How one argument will be satisfied at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgResolution {
    /// Bound to an input file's path.
    FromInputFile,
    /// Chained from the previous step's output.
    FromPreviousOutput,
    /// Falls back to the argument's declared default.
    HasDefault,
    /// Must be supplied externally per invocation.
    RequiresUserInput,
}

/// Analysis of one argument of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentInfo {
    /// The argument's name.
    pub name: String,
    /// Media URN of the accepted value.
    pub media_urn: MediaUrn,
    /// Whether the argument is required.
    pub required: bool,
    /// The declared default, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// JSON Schema of acceptable values, when the media spec registers one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
    /// How the argument will be satisfied.
    pub resolution: ArgResolution,
}

/// Analysis of one path step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepArguments {
    /// The step's cap URN.
    pub cap_urn: CapUrn,
    /// One entry per declared argument, in declaration order.
    pub arguments: Vec<ArgumentInfo>,
}

/// A user-facing slot: an argument the path cannot satisfy by itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotRequirement {
    /// The cap the slot belongs to.
    pub cap_urn: CapUrn,
    /// The slot (argument) name.
    pub name: String,
    /// Media URN of the expected value.
    pub media_urn: MediaUrn,
    /// JSON Schema of acceptable values, when registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
}

/// The full analysis: per-step argument classifications and the collected
/// user-facing slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentAnalysis {
    /// One entry per path step, in order.
    pub steps: Vec<StepArguments>,
    /// Every argument classified [`ArgResolution::RequiresUserInput`].
    pub all_slots: Vec<SlotRequirement>,
}

fn classify_step(cap: &Cap, step_index: usize) -> StepArguments {
    let file_path_name = cap.file_path_arg().map(|arg| arg.name.clone());
    let chainable = file_path_is_stdin_chainable(cap);

    let arguments = cap
        .args()
        .iter()
        .map(|arg| {
            let resolution = if Some(&arg.name) == file_path_name.as_ref() {
                if step_index > 0 && chainable {
                    ArgResolution::FromPreviousOutput
                } else {
                    ArgResolution::FromInputFile
                }
            } else if arg.default.is_some() {
                ArgResolution::HasDefault
            } else {
                ArgResolution::RequiresUserInput
            };
            let schema = cap
                .resolve_spec_id(&arg.media_urn.canonical())
                .ok()
                .and_then(|spec| spec.schema);
            ArgumentInfo {
                name: arg.name.clone(),
                media_urn: arg.media_urn.clone(),
                required: arg.required,
                default: arg.default.clone(),
                schema,
                resolution,
            }
        })
        .collect();

    StepArguments {
        cap_urn: cap.urn().clone(),
        arguments,
    }
}

/// Classifies every argument of every cap along `path`.
///
/// # Errors
///
/// [`Error::NotFound`] when a path cap is absent from the registry;
/// [`Error::Registry`] from the cube.
pub fn analyze_path_arguments(
    cube: &CapCube,
    path: &[CapUrn],
) -> Result<ArgumentAnalysis, Error> {
    let mut steps = Vec::with_capacity(path.len());
    let mut all_slots = Vec::new();

    for (step_index, cap_urn) in path.iter().enumerate() {
        let best = cube.find_best_cap_set(cap_urn)?;
        let step = classify_step(&best.cap, step_index);
        for info in &step.arguments {
            if info.resolution == ArgResolution::RequiresUserInput {
                all_slots.push(SlotRequirement {
                    cap_urn: step.cap_urn.clone(),
                    name: info.name.clone(),
                    media_urn: info.media_urn.clone(),
                    schema: info.schema.clone(),
                });
            }
        }
        steps.push(step);
    }

    Ok(ArgumentAnalysis { steps, all_slots })
}
