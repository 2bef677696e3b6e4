/// The cap model: a static description of one typed transformation.
///
/// A cap is identified by its [`CapUrn`], names an external command (executed
/// elsewhere; the planner never invokes it), and declares an ordered list of
/// arguments. Each argument carries the media URN of the value it accepts,
/// one or more [`ArgSource`] variants describing how the value reaches the
/// command, an optional default, and optional validation constraints.
///
/// Caps arrive from registries as JSON dictionaries; [`Cap::from_value`]
/// performs the full schema check and fails hard on structural problems so
/// no half-built cap ever enters a graph.
use std::collections::BTreeMap;
use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::cap_urn::{CapUrn, IoSpec};
use crate::error::Error;
use crate::media::MediaUrn;
use crate::media_spec::{MediaSpec, MediaSpecEntry, ValidationConstraints, resolve_media_spec};

/// Errors produced when constructing a [`Cap`] from its dictionary form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapSchemaError {
    /// The dictionary is not an object or a field has the wrong shape.
    Malformed {
        /// Description of the structural problem.
        message: String,
    },
    /// A required top-level field (`urn`, `title`, `command`) is missing.
    MissingField {
        /// The missing field name.
        field: &'static str,
    },
    /// An argument is missing a required field (`name`, `media_urn`, `sources`).
    ArgMissingField {
        /// The argument's name, or its index when the name itself is missing.
        arg: String,
        /// The missing field name.
        field: &'static str,
    },
    /// A URN field failed to parse.
    InvalidUrn {
        /// The parse failure.
        message: String,
    },
    /// An argument source is none of `stdin`, `position`, `cli_flag`.
    InvalidSource {
        /// The argument's name.
        arg: String,
        /// Description of the unrecognized source.
        message: String,
    },
    /// An argument declared an empty `sources` list.
    EmptySources {
        /// The argument's name.
        arg: String,
    },
    /// A required argument also declared a default value.
    RequiredWithDefault {
        /// The argument's name.
        arg: String,
    },
    /// Two arguments share the same position.
    DuplicatePosition {
        /// The repeated position.
        position: usize,
    },
    /// Two arguments share the same CLI flag name.
    DuplicateFlag {
        /// The repeated flag name.
        name: String,
    },
}

impl fmt::Display for CapSchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { message } => write!(f, "malformed cap dictionary: {message}"),
            Self::MissingField { field } => write!(f, "cap is missing required field {field:?}"),
            Self::ArgMissingField { arg, field } => {
                write!(f, "cap argument {arg:?} is missing required field {field:?}")
            }
            Self::InvalidUrn { message } => write!(f, "invalid URN in cap: {message}"),
            Self::InvalidSource { arg, message } => {
                write!(f, "cap argument {arg:?} has an invalid source: {message}")
            }
            Self::EmptySources { arg } => {
                write!(f, "cap argument {arg:?} declares no sources")
            }
            Self::RequiredWithDefault { arg } => {
                write!(f, "required cap argument {arg:?} must not declare a default")
            }
            Self::DuplicatePosition { position } => {
                write!(f, "two cap arguments share position {position}")
            }
            Self::DuplicateFlag { name } => {
                write!(f, "two cap arguments share CLI flag {name:?}")
            }
        }
    }
}

impl std::error::Error for CapSchemaError {}

/// How an argument's value reaches the cap's command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgSource {
    /// Streamed on standard input when the payload conforms to `media_urn`.
    Stdin {
        /// The media URN the command accepts on stdin.
        media_urn: MediaUrn,
    },
    /// Passed as the positional argument at the given index.
    Position(usize),
    /// Passed behind the named CLI flag.
    CliFlag(String),
}

/// One declared argument of a cap.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapArg {
    /// The argument's name, unique within the cap.
    pub name: String,
    /// Media URN of the accepted value (a spec id into `media_specs`).
    pub media_urn: MediaUrn,
    /// Whether the argument must be present at execution time.
    #[serde(default)]
    pub required: bool,
    /// Non-empty list of ways the value reaches the command.
    pub sources: Vec<ArgSource>,
    /// Default value; forbidden when `required` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Optional value-level constraints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationConstraints>,
    /// Open metadata passthrough.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

impl CapArg {
    /// The positional index, when any source is positional.
    pub fn position(&self) -> Option<usize> {
        self.sources.iter().find_map(|s| match s {
            ArgSource::Position(n) => Some(*n),
            ArgSource::Stdin { .. } | ArgSource::CliFlag(_) => None,
        })
    }

    /// The CLI flag name, when any source is a flag.
    pub fn cli_flag(&self) -> Option<&str> {
        self.sources.iter().find_map(|s| match s {
            ArgSource::CliFlag(name) => Some(name.as_str()),
            ArgSource::Stdin { .. } | ArgSource::Position(_) => None,
        })
    }

    /// The stdin media URN, when any source is stdin.
    pub fn stdin_media_urn(&self) -> Option<&MediaUrn> {
        self.sources.iter().find_map(|s| match s {
            ArgSource::Stdin { media_urn } => Some(media_urn),
            ArgSource::Position(_) | ArgSource::CliFlag(_) => None,
        })
    }
}

/// The declared output of a cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapOutput {
    /// Media URN of the produced value.
    pub media_urn: MediaUrn,
    /// Optional value-level constraints on the output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationConstraints>,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A static description of one typed transformation.
#[derive(Debug, Clone, PartialEq)]
pub struct Cap {
    urn: CapUrn,
    title: String,
    command: String,
    args: Vec<CapArg>,
    output: Option<CapOutput>,
    media_specs: BTreeMap<String, MediaSpecEntry>,
}

impl Cap {
    /// Constructs a cap from its JSON dictionary form, running every schema
    /// check of the cap contract.
    ///
    /// # Errors
    ///
    /// All [`CapSchemaError`] variants; see each variant's documentation.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, CapSchemaError> {
        let Some(dict) = value.as_object() else {
            return Err(CapSchemaError::Malformed {
                message: "cap must be a JSON object".to_owned(),
            });
        };

        let urn_str = require_str(dict, "urn")?;
        let urn = CapUrn::parse(urn_str).map_err(|err| CapSchemaError::InvalidUrn {
            message: err.to_string(),
        })?;
        let title = require_str(dict, "title")?.to_owned();
        let command = require_str(dict, "command")?.to_owned();

        let mut args = Vec::new();
        if let Some(raw_args) = dict.get("args") {
            let Some(list) = raw_args.as_array() else {
                return Err(CapSchemaError::Malformed {
                    message: "args must be an array".to_owned(),
                });
            };
            for (index, raw_arg) in list.iter().enumerate() {
                args.push(parse_arg(index, raw_arg)?);
            }
        }

        check_arg_uniqueness(&args)?;

        let output = match dict.get("output") {
            None => None,
            Some(raw) => Some(parse_output(raw)?),
        };

        let media_specs = match dict.get("media_specs") {
            None => BTreeMap::new(),
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|err| {
                CapSchemaError::Malformed {
                    message: format!("media_specs: {err}"),
                }
            })?,
        };

        Ok(Self {
            urn,
            title,
            command,
            args,
            output,
            media_specs,
        })
    }

    /// The cap's URN.
    pub fn urn(&self) -> &CapUrn {
        &self.urn
    }

    /// The human-readable title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// The external command (invoked by an execution engine, not here).
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The declared arguments, in declaration order.
    pub fn args(&self) -> &[CapArg] {
        &self.args
    }

    /// The declared output, if any.
    pub fn output(&self) -> Option<&CapOutput> {
        self.output.as_ref()
    }

    /// The cap-local media-spec table.
    pub fn media_specs(&self) -> &BTreeMap<String, MediaSpecEntry> {
        &self.media_specs
    }

    /// The cap's input spec, from its URN.
    pub fn in_spec(&self) -> &IoSpec {
        self.urn.in_spec()
    }

    /// The cap's output spec, from its URN.
    pub fn out_spec(&self) -> &IoSpec {
        self.urn.out_spec()
    }

    /// Finds an argument by name.
    pub fn arg(&self, name: &str) -> Option<&CapArg> {
        self.args.iter().find(|a| a.name == name)
    }

    /// Finds the first argument whose media URN equals `urn` canonically.
    pub fn find_arg_by_media_urn(&self, urn: &MediaUrn) -> Option<&CapArg> {
        self.args.iter().find(|a| &a.media_urn == urn)
    }

    /// The first argument whose media URN carries the `file-path` tag.
    pub fn file_path_arg(&self) -> Option<&CapArg> {
        self.args.iter().find(|a| a.media_urn.is_file_path())
    }

    /// Positional arguments, sorted by position.
    pub fn get_positional_args(&self) -> Vec<&CapArg> {
        let mut positional: Vec<&CapArg> =
            self.args.iter().filter(|a| a.position().is_some()).collect();
        positional.sort_by_key(|a| a.position());
        positional
    }

    /// Arguments carried behind CLI flags.
    pub fn get_flag_args(&self) -> Vec<&CapArg> {
        self.args.iter().filter(|a| a.cli_flag().is_some()).collect()
    }

    /// The first stdin media URN declared by any argument.
    pub fn get_stdin_media_urn(&self) -> Option<&MediaUrn> {
        self.args.iter().find_map(CapArg::stdin_media_urn)
    }

    /// `true` iff any argument accepts its value on stdin.
    pub fn accepts_stdin(&self) -> bool {
        self.get_stdin_media_urn().is_some()
    }

    /// Resolves a media-URN spec id against this cap's local table, then the
    /// built-in table.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] when the id is unresolvable.
    pub fn resolve_spec_id(&self, urn_str: &str) -> Result<MediaSpec, Error> {
        resolve_media_spec(urn_str, &self.media_specs)
    }
}

fn require_str<'a>(
    dict: &'a serde_json::Map<String, serde_json::Value>,
    field: &'static str,
) -> Result<&'a str, CapSchemaError> {
    match dict.get(field) {
        None | Some(serde_json::Value::Null) => Err(CapSchemaError::MissingField { field }),
        Some(value) => value.as_str().ok_or_else(|| CapSchemaError::Malformed {
            message: format!("{field} must be a string"),
        }),
    }
}

fn parse_arg(index: usize, raw: &serde_json::Value) -> Result<CapArg, CapSchemaError> {
    let Some(dict) = raw.as_object() else {
        return Err(CapSchemaError::Malformed {
            message: format!("args[{index}] must be an object"),
        });
    };

    let name = match dict.get("name").and_then(serde_json::Value::as_str) {
        Some(name) => name.to_owned(),
        None => {
            return Err(CapSchemaError::ArgMissingField {
                arg: format!("args[{index}]"),
                field: "name",
            });
        }
    };

    let media_urn_str = dict
        .get("media_urn")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| CapSchemaError::ArgMissingField {
            arg: name.clone(),
            field: "media_urn",
        })?;
    let media_urn = MediaUrn::parse(media_urn_str).map_err(|err| CapSchemaError::InvalidUrn {
        message: format!("argument {name:?}: {err}"),
    })?;

    let raw_sources = dict
        .get("sources")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| CapSchemaError::ArgMissingField {
            arg: name.clone(),
            field: "sources",
        })?;
    if raw_sources.is_empty() {
        return Err(CapSchemaError::EmptySources { arg: name });
    }
    let mut sources = Vec::with_capacity(raw_sources.len());
    for raw_source in raw_sources {
        let source: ArgSource =
            serde_json::from_value(raw_source.clone()).map_err(|err| {
                CapSchemaError::InvalidSource {
                    arg: name.clone(),
                    message: err.to_string(),
                }
            })?;
        sources.push(source);
    }

    let required = dict
        .get("required")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    let default = dict.get("default").filter(|v| !v.is_null()).cloned();
    if required && default.is_some() {
        return Err(CapSchemaError::RequiredWithDefault { arg: name });
    }

    let validation = match dict.get("validation") {
        None => None,
        Some(raw) => Some(serde_json::from_value(raw.clone()).map_err(|err| {
            CapSchemaError::Malformed {
                message: format!("argument {name:?} validation: {err}"),
            }
        })?),
    };

    let metadata = match dict.get("metadata") {
        None => None,
        Some(raw) => Some(serde_json::from_value(raw.clone()).map_err(|err| {
            CapSchemaError::Malformed {
                message: format!("argument {name:?} metadata: {err}"),
            }
        })?),
    };

    Ok(CapArg {
        name,
        media_urn,
        required,
        sources,
        default,
        validation,
        metadata,
    })
}

fn parse_output(raw: &serde_json::Value) -> Result<CapOutput, CapSchemaError> {
    serde_json::from_value(raw.clone()).map_err(|err| CapSchemaError::Malformed {
        message: format!("output: {err}"),
    })
}

fn check_arg_uniqueness(args: &[CapArg]) -> Result<(), CapSchemaError> {
    let mut positions: Vec<usize> = Vec::new();
    let mut flags: Vec<&str> = Vec::new();
    for arg in args {
        if let Some(position) = arg.position() {
            if positions.contains(&position) {
                return Err(CapSchemaError::DuplicatePosition { position });
            }
            positions.push(position);
        }
        if let Some(flag) = arg.cli_flag() {
            if flags.contains(&flag) {
                return Err(CapSchemaError::DuplicateFlag {
                    name: flag.to_owned(),
                });
            }
            flags.push(flag);
        }
    }
    Ok(())
}

impl Serialize for Cap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("urn", &self.urn)?;
        map.serialize_entry("title", &self.title)?;
        map.serialize_entry("command", &self.command)?;
        if !self.args.is_empty() {
            map.serialize_entry("args", &self.args)?;
        }
        if let Some(output) = &self.output {
            map.serialize_entry("output", output)?;
        }
        if !self.media_specs.is_empty() {
            map.serialize_entry("media_specs", &self.media_specs)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Cap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use serde_json::json;

    use super::*;

    fn cap_dict() -> serde_json::Value {
        json!({
            "urn": "cap:in=\"media:bytes;pdf\";out=\"media:md;textable\"",
            "title": "Extract markdown",
            "command": "pdf2md",
            "args": [
                {
                    "name": "input",
                    "media_urn": "media:file-path",
                    "required": true,
                    "sources": [
                        {"position": 0},
                        {"stdin": {"media_urn": "media:bytes;pdf"}}
                    ]
                },
                {
                    "name": "level",
                    "media_urn": "media:form=scalar;numeric",
                    "sources": [{"cli_flag": "--level"}],
                    "default": 2
                }
            ],
            "output": {
                "media_urn": "media:md;textable",
                "description": "Markdown rendering"
            },
            "media_specs": {
                "media:md;textable": "text/markdown; profile=\"https://example.org/md\"",
                "media:bytes;pdf": {"media_type": "application/pdf"}
            }
        })
    }

    #[test]
    fn full_dictionary_parses() {
        let cap = Cap::from_value(&cap_dict()).expect("valid cap");
        assert_eq!(cap.title(), "Extract markdown");
        assert_eq!(cap.command(), "pdf2md");
        assert_eq!(cap.args().len(), 2);
        assert!(cap.accepts_stdin());
        assert_eq!(
            cap.get_stdin_media_urn().map(MediaUrn::canonical).as_deref(),
            Some("media:bytes;pdf")
        );
        let output = cap.output().expect("output present");
        assert_eq!(output.media_urn.canonical(), "media:md;textable");
    }

    #[test]
    fn missing_required_fields_fail_hard() {
        for field in ["urn", "title", "command"] {
            let mut dict = cap_dict();
            dict.as_object_mut().expect("object").remove(field);
            let err = Cap::from_value(&dict).expect_err("must fail");
            assert_eq!(err, CapSchemaError::MissingField { field });
        }
    }

    #[test]
    fn arg_missing_media_urn_fails() {
        let mut dict = cap_dict();
        dict["args"][0]
            .as_object_mut()
            .expect("object")
            .remove("media_urn");
        let err = Cap::from_value(&dict).expect_err("must fail");
        assert_eq!(
            err,
            CapSchemaError::ArgMissingField {
                arg: "input".to_owned(),
                field: "media_urn"
            }
        );
    }

    #[test]
    fn arg_missing_sources_fails() {
        let mut dict = cap_dict();
        dict["args"][1]
            .as_object_mut()
            .expect("object")
            .remove("sources");
        let err = Cap::from_value(&dict).expect_err("must fail");
        assert_eq!(
            err,
            CapSchemaError::ArgMissingField {
                arg: "level".to_owned(),
                field: "sources"
            }
        );
    }

    #[test]
    fn empty_sources_fail() {
        let mut dict = cap_dict();
        dict["args"][1]["sources"] = json!([]);
        let err = Cap::from_value(&dict).expect_err("must fail");
        assert_eq!(
            err,
            CapSchemaError::EmptySources {
                arg: "level".to_owned()
            }
        );
    }

    #[test]
    fn unknown_source_kind_fails() {
        let mut dict = cap_dict();
        dict["args"][1]["sources"] = json!([{"env_var": "LEVEL"}]);
        let err = Cap::from_value(&dict).expect_err("must fail");
        assert!(matches!(err, CapSchemaError::InvalidSource { .. }));
    }

    #[test]
    fn required_with_default_fails() {
        let mut dict = cap_dict();
        dict["args"][0]["default"] = json!("/tmp/in.pdf");
        let err = Cap::from_value(&dict).expect_err("must fail");
        assert_eq!(
            err,
            CapSchemaError::RequiredWithDefault {
                arg: "input".to_owned()
            }
        );
    }

    #[test]
    fn duplicate_positions_fail() {
        let mut dict = cap_dict();
        dict["args"][1]["sources"] = json!([{"position": 0}]);
        let err = Cap::from_value(&dict).expect_err("must fail");
        assert_eq!(err, CapSchemaError::DuplicatePosition { position: 0 });
    }

    #[test]
    fn duplicate_flags_fail() {
        let mut dict = cap_dict();
        dict["args"][0]["sources"] = json!([{"cli_flag": "--level"}]);
        let err = Cap::from_value(&dict).expect_err("must fail");
        assert_eq!(
            err,
            CapSchemaError::DuplicateFlag {
                name: "--level".to_owned()
            }
        );
    }

    #[test]
    fn helpers_find_the_right_args() {
        let cap = Cap::from_value(&cap_dict()).expect("valid cap");
        let file_arg = cap.file_path_arg().expect("file-path arg");
        assert_eq!(file_arg.name, "input");
        assert_eq!(cap.get_positional_args().len(), 1);
        assert_eq!(cap.get_flag_args().len(), 1);
        let by_urn = cap
            .find_arg_by_media_urn(&MediaUrn::parse("media:file-path").expect("urn"))
            .expect("found");
        assert_eq!(by_urn.name, "input");
        assert!(cap.arg("level").is_some());
        assert!(cap.arg("missing").is_none());
    }

    #[test]
    fn local_media_specs_resolve() {
        let cap = Cap::from_value(&cap_dict()).expect("valid cap");
        let md = cap.resolve_spec_id("media:md;textable").expect("resolves");
        assert_eq!(md.media_type, "text/markdown");
        let pdf = cap.resolve_spec_id("media:bytes;pdf").expect("resolves");
        assert_eq!(pdf.media_type, "application/pdf");
        // Falls through to the built-in table.
        let path = cap.resolve_spec_id("media:file-path").expect("builtin");
        assert_eq!(path.media_type, "text/plain");
    }

    #[test]
    fn serde_round_trip() {
        let cap = Cap::from_value(&cap_dict()).expect("valid cap");
        let json = serde_json::to_value(&cap).expect("serialize");
        let back: Cap = serde_json::from_value(json).expect("deserialize");
        assert_eq!(cap, back);
    }

    #[test]
    fn cap_without_args_accepts_nothing_on_stdin() {
        let dict = json!({
            "urn": "cap:in=media:;out=media:",
            "title": "Identity",
            "command": "identity"
        });
        let cap = Cap::from_value(&dict).expect("valid cap");
        assert!(!cap.accepts_stdin());
        assert!(cap.args().is_empty());
        assert!(cap.output().is_none());
    }
}
