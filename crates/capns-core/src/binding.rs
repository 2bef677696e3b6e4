/// Argument bindings and their resolver.
///
/// A plan's cap nodes carry one [`ArgumentBinding`] per declared argument.
/// At execution time the engine walks the plan in topological order and asks
/// [`resolve_binding`] to turn each binding into concrete bytes against a
/// [`ResolutionContext`] — the per-invocation record of input files,
/// previous step outputs, externally supplied slot values, per-cap settings,
/// and plan metadata.
///
/// # JSON-to-bytes rule
///
/// A JSON string becomes its raw UTF-8 bytes with no surrounding quotes;
/// every other JSON value becomes its canonical serialization (object keys
/// sorted). Resolution is pure: the same binding against the same context
/// always yields the same bytes.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cap::Cap;
use crate::error::{Component, Error};
use crate::media::MediaUrn;

/// Where a resolved argument's bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    /// An input file's path or media URN.
    InputFile,
    /// A previous plan node's output.
    PreviousOutput,
    /// The argument's declared default.
    CapDefault,
    /// A per-cap setting.
    CapSetting,
    /// An inline literal.
    Literal,
    /// An externally supplied slot value.
    Slot,
    /// A plan metadata entry.
    PlanMetadata,
}

/// How to obtain the bytes for one argument of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArgumentBinding {
    /// The path of the input file at a fixed index.
    InputFileAtIndex {
        /// Zero-based index into the context's input files.
        index: usize,
    },
    /// The path of the context's current file.
    InputFilePath,
    /// The media URN of the context's current file.
    InputMediaUrn,
    /// A previous node's output, optionally a single field of it.
    PreviousOutput {
        /// The producing node's id.
        node_id: String,
        /// When set, the output must be a JSON object and this field of it
        /// is taken.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
    /// The argument's declared default value.
    CapDefault,
    /// A per-cap setting value.
    CapSetting {
        /// The setting's key within the cap's settings map.
        setting_urn: String,
    },
    /// An inline literal value.
    Literal {
        /// The literal JSON value.
        value: serde_json::Value,
    },
    /// An externally supplied value, with fallback to cap settings and the
    /// argument's default.
    Slot {
        /// The slot name (the argument's name).
        name: String,
        /// Optional JSON Schema describing acceptable values.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<serde_json::Value>,
    },
    /// A plan metadata entry.
    PlanMetadata {
        /// The metadata key.
        key: String,
    },
}

/// Where a resolved input file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSourceType {
    /// Enumerated from a listing.
    Listing,
    /// Attached interactively.
    Chip,
    /// Produced by an earlier cap invocation.
    CapOutput,
}

/// One already-resolved input file.
///
/// Discovery (globbing, directory walking) happens upstream; the planner
/// receives the finished list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedFile {
    /// Filesystem path.
    pub path: String,
    /// The file's media URN.
    pub media_urn: MediaUrn,
    /// Size in bytes.
    pub size: u64,
    /// Optional id of the source that produced the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    /// How the file entered the invocation.
    pub source_type: FileSourceType,
    /// Opaque sandbox bookmark, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_bookmark: Option<String>,
    /// Optional tracking id assigned by the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracked_id: Option<String>,
}

impl ResolvedFile {
    /// A minimal file record with only the required fields set.
    pub fn new(path: &str, media_urn: MediaUrn, size: u64) -> Self {
        Self {
            path: path.to_owned(),
            media_urn,
            size,
            source_id: None,
            source_type: FileSourceType::Listing,
            security_bookmark: None,
            tracked_id: None,
        }
    }
}

/// The per-invocation record threaded through binding resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionContext {
    /// The resolved input files, in order.
    pub input_files: Vec<ResolvedFile>,
    /// Index of the file currently being processed (advanced by for-each
    /// iteration).
    pub current_file_index: usize,
    /// Output of each already-executed plan node, keyed by node id.
    pub previous_outputs: BTreeMap<String, serde_json::Value>,
    /// Externally supplied slot values, keyed `"<cap_urn>:<slot_name>"`.
    pub slot_values: BTreeMap<String, Vec<u8>>,
    /// Per-cap settings: cap URN → setting key → value.
    pub cap_settings: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    /// Plan metadata visible to bindings.
    pub plan_metadata: BTreeMap<String, serde_json::Value>,
}

impl ResolutionContext {
    /// The file at `current_file_index`, if in range.
    pub fn current_file(&self) -> Option<&ResolvedFile> {
        self.input_files.get(self.current_file_index)
    }
}

/// One resolved argument: its name, concrete bytes, and provenance tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedArgument {
    /// The argument's declared name.
    pub name: String,
    /// The byte-level value handed to the command.
    pub value: Vec<u8>,
    /// Where the bytes came from.
    pub source: ValueSource,
}

/// Applies the JSON-to-bytes rule.
///
/// Strings pass through as raw UTF-8; anything else is serialized
/// canonically (object keys sorted).
pub fn json_to_bytes(value: &serde_json::Value) -> Vec<u8> {
    match value {
        serde_json::Value::String(s) => s.as_bytes().to_vec(),
        serde_json::Value::Null
        | serde_json::Value::Bool(_)
        | serde_json::Value::Number(_)
        | serde_json::Value::Array(_)
        | serde_json::Value::Object(_) => {
            // Serialization of a JSON value cannot fail.
            serde_json::to_vec(value).unwrap_or_default()
        }
    }
}

fn resolver_error(message: String) -> Error {
    Error::InvalidInput {
        component: Component::Resolver,
        message,
    }
}

/// Resolves one binding to bytes against `ctx`.
///
/// `cap` supplies the argument table (for defaults and required-ness) and
/// the cap URN used to key slot values and cap settings. Returns `Ok(None)`
/// only for an optional [`ArgumentBinding::Slot`] with no value anywhere in
/// its precedence chain — the step then runs without this argument.
///
/// # Errors
///
/// - [`Error::MissingRequired`] — a required slot has no value.
/// - [`Error::InvalidInput`] (resolver) — every other failure in the
///   variant table: index out of bounds, no current file, missing node,
///   missing field, non-object output when a field was requested, no
///   default, missing settings, missing metadata.
pub fn resolve_binding(
    binding: &ArgumentBinding,
    arg_name: &str,
    cap: &Cap,
    ctx: &ResolutionContext,
) -> Result<Option<ResolvedArgument>, Error> {
    let resolved = |value: Vec<u8>, source: ValueSource| {
        Ok(Some(ResolvedArgument {
            name: arg_name.to_owned(),
            value,
            source,
        }))
    };

    match binding {
        ArgumentBinding::InputFileAtIndex { index } => match ctx.input_files.get(*index) {
            Some(file) => resolved(file.path.as_bytes().to_vec(), ValueSource::InputFile),
            None => Err(resolver_error(format!(
                "input file index {index} out of bounds ({} files)",
                ctx.input_files.len()
            ))),
        },
        ArgumentBinding::InputFilePath => match ctx.current_file() {
            Some(file) => resolved(file.path.as_bytes().to_vec(), ValueSource::InputFile),
            None => Err(resolver_error("no current input file".to_owned())),
        },
        ArgumentBinding::InputMediaUrn => match ctx.current_file() {
            Some(file) => resolved(
                file.media_urn.canonical().into_bytes(),
                ValueSource::InputFile,
            ),
            None => Err(resolver_error("no current input file".to_owned())),
        },
        ArgumentBinding::PreviousOutput { node_id, field } => {
            let Some(output) = ctx.previous_outputs.get(node_id) else {
                return Err(resolver_error(format!(
                    "no recorded output for node {node_id:?}"
                )));
            };
            let value = match field {
                None => output,
                Some(field_name) => {
                    let Some(object) = output.as_object() else {
                        return Err(resolver_error(format!(
                            "output of node {node_id:?} is not an object; cannot take field {field_name:?}"
                        )));
                    };
                    object.get(field_name).ok_or_else(|| {
                        resolver_error(format!(
                            "output of node {node_id:?} has no field {field_name:?}"
                        ))
                    })?
                }
            };
            resolved(json_to_bytes(value), ValueSource::PreviousOutput)
        }
        ArgumentBinding::CapDefault => {
            let default = cap.arg(arg_name).and_then(|arg| arg.default.as_ref());
            match default {
                Some(value) => resolved(json_to_bytes(value), ValueSource::CapDefault),
                None => Err(resolver_error(format!(
                    "argument {arg_name:?} of {} has no default",
                    cap.urn().canonical()
                ))),
            }
        }
        ArgumentBinding::CapSetting { setting_urn } => {
            let cap_key = cap.urn().canonical();
            let Some(settings) = ctx.cap_settings.get(&cap_key) else {
                return Err(resolver_error(format!("no settings for cap {cap_key}")));
            };
            let Some(value) = settings.get(setting_urn) else {
                return Err(resolver_error(format!(
                    "cap {cap_key} has no setting {setting_urn:?}"
                )));
            };
            resolved(json_to_bytes(value), ValueSource::CapSetting)
        }
        ArgumentBinding::Literal { value } => resolved(json_to_bytes(value), ValueSource::Literal),
        ArgumentBinding::Slot { name, schema: _ } => {
            let cap_key = cap.urn().canonical();
            let slot_key = format!("{cap_key}:{name}");
            if let Some(bytes) = ctx.slot_values.get(&slot_key) {
                return resolved(bytes.clone(), ValueSource::Slot);
            }
            if let Some(value) = ctx
                .cap_settings
                .get(&cap_key)
                .and_then(|settings| settings.get(name))
            {
                return resolved(json_to_bytes(value), ValueSource::CapSetting);
            }
            let arg = cap.arg(name);
            if let Some(default) = arg.and_then(|a| a.default.as_ref()) {
                return resolved(json_to_bytes(default), ValueSource::CapDefault);
            }
            if arg.is_some_and(|a| a.required) {
                return Err(Error::MissingRequired {
                    argument: name.clone(),
                });
            }
            Ok(None)
        }
        ArgumentBinding::PlanMetadata { key } => match ctx.plan_metadata.get(key) {
            Some(value) => resolved(json_to_bytes(value), ValueSource::PlanMetadata),
            None => Err(resolver_error(format!("plan metadata has no key {key:?}"))),
        },
    }
}

/// Resolves every binding of a step, skipping optional slots that resolved
/// to nothing.
///
/// # Errors
///
/// The first error from [`resolve_binding`], in binding-name order.
pub fn resolve_bindings(
    cap: &Cap,
    bindings: &BTreeMap<String, ArgumentBinding>,
    ctx: &ResolutionContext,
) -> Result<Vec<ResolvedArgument>, Error> {
    let mut out = Vec::with_capacity(bindings.len());
    for (arg_name, binding) in bindings {
        if let Some(resolved) = resolve_binding(binding, arg_name, cap, ctx)? {
            out.push(resolved);
        }
    }
    Ok(out)
}
