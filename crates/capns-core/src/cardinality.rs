/// Cardinality analysis for a chosen cap path: classify each step as
/// single- or many-valued on each side, then locate the fan-out subgraphs a
/// plan needs when a sequence meets a single-item cap.
///
/// # The fan-out rule
///
/// Walking the path left to right with a *live* cardinality (seeded from the
/// input files and the source media's list-ness):
///
/// - a fan-out opens at the first Single-in step encountered while the live
///   cardinality is Many;
/// - the open span extends over the following run of Single-in steps;
/// - it closes after a Many-out step inside the run, before the next
///   Many-in step (which consumes the collected sequence), or at the end of
///   the chain;
/// - after a span closes the live cardinality is Many again — the collected
///   results form a sequence.
///
/// Each span becomes one `ForEach`/`Collect` pair in the plan, so every
/// maximal run of Single-in steps gets exactly one pair.
use serde::{Deserialize, Serialize};

use crate::cap::Cap;
use crate::cap_urn::{CapUrn, IoSpec};
use crate::media::MediaUrn;

/// Whether a value position carries one item or a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// One item.
    Single,
    /// A sequence of items.
    Many,
}

/// Classifies an in/out spec: `form=list` means [`Cardinality::Many`].
///
/// A `*` spec has no `form` constraint and classifies as single.
pub fn cardinality_of(spec: &IoSpec) -> Cardinality {
    match spec {
        IoSpec::Wildcard => Cardinality::Single,
        IoSpec::Media(urn) => {
            if urn.is_list() {
                Cardinality::Many
            } else {
                Cardinality::Single
            }
        }
    }
}

/// Derives the cardinality of the plan input from the resolved file count
/// and the source media.
pub fn input_cardinality(input_file_count: usize, source: &MediaUrn) -> Cardinality {
    if input_file_count > 1 || source.is_list() {
        Cardinality::Many
    } else {
        Cardinality::Single
    }
}

/// A file-path argument observed during classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePathArg {
    /// The argument's name.
    pub name: String,
    /// `true` when the argument's media URN pairs `file-path` with
    /// `form=list` (an array of paths rather than one path).
    pub in_list_context: bool,
}

/// Per-step cardinality classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCardinality {
    /// The step's cap URN.
    pub cap_urn: CapUrn,
    /// Cardinality of the cap's input spec.
    pub input: Cardinality,
    /// Cardinality of the cap's output spec.
    pub output: Cardinality,
    /// The cap's file-path arguments and their list context.
    pub file_path_args: Vec<FilePathArg>,
}

/// One fan-out subgraph: the inclusive step-index range its body covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOutSpan {
    /// Index of the first step inside the `ForEach` body.
    pub entry: usize,
    /// Index of the last step inside the body; the `Collect` follows it.
    pub exit: usize,
}

/// The analyzer's result: per-step classifications plus fan-out spans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardinalityAnalysis {
    /// Cardinality of the plan input.
    pub input: Cardinality,
    /// One classification per path step, in order.
    pub cardinalities: Vec<StepCardinality>,
    /// Fan-out subgraphs, in order of their entry step.
    pub fan_outs: Vec<FanOutSpan>,
    /// Live cardinality after the final step.
    pub result: Cardinality,
}

impl CardinalityAnalysis {
    /// The entry step index of each fan-out, the public
    /// `fan_out_points` view.
    pub fn fan_out_points(&self) -> Vec<usize> {
        self.fan_outs.iter().map(|span| span.entry).collect()
    }

    /// `true` when the plan needs at least one `ForEach`/`Collect` pair.
    pub fn requires_fan_out(&self) -> bool {
        !self.fan_outs.is_empty()
    }

    /// `true` when the plan is a straight chain.
    pub fn is_linear(&self) -> bool {
        self.fan_outs.is_empty()
    }

    /// Returns the fan-out span whose body starts at `step`, if any.
    pub fn fan_out_at(&self, step: usize) -> Option<&FanOutSpan> {
        self.fan_outs.iter().find(|span| span.entry == step)
    }

    /// Returns the span containing `step` inside its body, if any.
    pub fn span_containing(&self, step: usize) -> Option<&FanOutSpan> {
        self.fan_outs
            .iter()
            .find(|span| span.entry <= step && step <= span.exit)
    }
}

fn classify_step(cap: &Cap) -> StepCardinality {
    let file_path_args = cap
        .args()
        .iter()
        .filter(|arg| arg.media_urn.is_file_path())
        .map(|arg| FilePathArg {
            name: arg.name.clone(),
            in_list_context: arg.media_urn.is_file_path_list(),
        })
        .collect();
    StepCardinality {
        cap_urn: cap.urn().clone(),
        input: cardinality_of(cap.in_spec()),
        output: cardinality_of(cap.out_spec()),
        file_path_args,
    }
}

/// Analyzes a chosen path.
///
/// `caps` is the ordered list of path steps; `source` and
/// `input_file_count` seed the live cardinality.
pub fn analyze_cardinality(
    source: &MediaUrn,
    input_file_count: usize,
    caps: &[Cap],
) -> CardinalityAnalysis {
    let cardinalities: Vec<StepCardinality> = caps.iter().map(classify_step).collect();
    let input = input_cardinality(input_file_count, source);

    let mut fan_outs: Vec<FanOutSpan> = Vec::new();
    let mut live = input;
    let mut open: Option<usize> = None;

    for (index, step) in cardinalities.iter().enumerate() {
        if let Some(entry) = open {
            if step.input == Cardinality::Many {
                // The Many-in step consumes the collected sequence: the span
                // closes before it, and this step is handled linearly below.
                fan_outs.push(FanOutSpan {
                    entry,
                    exit: index - 1,
                });
                open = None;
                live = Cardinality::Many;
            } else if step.output == Cardinality::Many {
                // A Many-out step inside the run closes the span after it.
                fan_outs.push(FanOutSpan { entry, exit: index });
                open = None;
                live = Cardinality::Many;
                continue;
            } else {
                continue;
            }
        }

        if live == Cardinality::Many && step.input == Cardinality::Single {
            if step.output == Cardinality::Many {
                // A lone Single-in/Many-out step is its own span.
                fan_outs.push(FanOutSpan {
                    entry: index,
                    exit: index,
                });
                live = Cardinality::Many;
            } else {
                open = Some(index);
            }
        } else {
            live = step.output;
        }
    }

    if let Some(entry) = open {
        fan_outs.push(FanOutSpan {
            entry,
            exit: cardinalities.len() - 1,
        });
        live = Cardinality::Many;
    }

    CardinalityAnalysis {
        input,
        cardinalities,
        fan_outs,
        result: live,
    }
}
