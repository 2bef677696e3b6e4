//! Shared test helper constructors for caps, URNs, and registries.
//!
//! Compiled only in test builds. Integration tests under
//! `crates/capns-core/tests/` define their own local helpers because they
//! link against the non-test library build where this module is absent.
#![allow(clippy::expect_used)]

use serde_json::json;

use crate::cap::Cap;
use crate::cap_urn::CapUrn;
use crate::media::MediaUrn;

/// Parses a media URN, panicking on invalid input (test-only).
pub fn media(s: &str) -> MediaUrn {
    MediaUrn::parse(s).expect("valid media URN")
}

/// Parses a cap URN, panicking on invalid input (test-only).
pub fn cap_urn(s: &str) -> CapUrn {
    CapUrn::parse(s).expect("valid cap URN")
}

/// Annotates caps with the registry name `main`.
pub fn named_caps(caps: Vec<Cap>) -> Vec<(String, Cap)> {
    caps.into_iter().map(|c| ("main".to_owned(), c)).collect()
}

/// A converter cap from `in_spec` to `out_spec` with a stdin-chainable
/// file-path argument (`input`) and an optional numeric flag (`level`).
pub fn conversion_cap(in_spec: &str, out_spec: &str) -> Cap {
    Cap::from_value(&json!({
        "urn": format!(r#"cap:in="{in_spec}";out="{out_spec}""#),
        "title": format!("Convert {in_spec} to {out_spec}"),
        "command": "convert",
        "args": [
            {
                "name": "input",
                "media_urn": "media:file-path",
                "required": true,
                "sources": [
                    {"position": 0},
                    {"stdin": {"media_urn": in_spec}}
                ]
            },
            {
                "name": "level",
                "media_urn": "media:form=scalar;numeric",
                "sources": [{"cli_flag": "--level"}]
            }
        ]
    }))
    .expect("valid conversion cap")
}

/// Like [`conversion_cap`], but the file-path argument has no stdin source,
/// so the step is never stdin-chainable.
pub fn conversion_cap_no_stdin(in_spec: &str, out_spec: &str) -> Cap {
    Cap::from_value(&json!({
        "urn": format!(r#"cap:in="{in_spec}";out="{out_spec}""#),
        "title": format!("Convert {in_spec} to {out_spec}"),
        "command": "convert",
        "args": [
            {
                "name": "input",
                "media_urn": "media:file-path",
                "required": true,
                "sources": [{"position": 0}]
            }
        ]
    }))
    .expect("valid conversion cap")
}

/// A cap with the given URN and no arguments.
pub fn cap_from_urn(urn: &str) -> Cap {
    Cap::from_value(&json!({
        "urn": urn,
        "title": "Test cap",
        "command": "run",
    }))
    .expect("valid cap")
}

/// A cap whose single argument is a flag-borne slot.
pub fn slot_cap(arg_name: &str, required: bool, default: Option<serde_json::Value>) -> Cap {
    let mut arg = json!({
        "name": arg_name,
        "media_urn": "media:form=scalar;textable",
        "required": required,
        "sources": [{"cli_flag": format!("--{arg_name}")}]
    });
    if let Some(default_value) = default {
        arg["default"] = default_value;
    }
    Cap::from_value(&json!({
        "urn": r#"cap:in="media:bytes;pdf";out="media:md;textable";op=slot-test"#,
        "title": "Slot test cap",
        "command": "run",
        "args": [arg]
    }))
    .expect("valid slot cap")
}

/// A cap with explicit positional arguments: `(name, media_urn, required,
/// default)` per entry.
pub fn cap_with_args(
    urn: &str,
    args: Vec<(&str, &str, bool, Option<serde_json::Value>)>,
) -> Cap {
    let raw_args: Vec<serde_json::Value> = args
        .into_iter()
        .enumerate()
        .map(|(position, (name, media_urn, required, default))| {
            let mut raw = json!({
                "name": name,
                "media_urn": media_urn,
                "required": required,
                "sources": [{"position": position}]
            });
            if let Some(default_value) = default {
                raw["default"] = default_value;
            }
            raw
        })
        .collect();
    Cap::from_value(&json!({
        "urn": urn,
        "title": "Test cap",
        "command": "run",
        "args": raw_args
    }))
    .expect("valid cap")
}

/// Rebuilds `cap` with an extra URN tag, producing a distinct cap URN for
/// parallel-edge tests.
pub fn retagged(cap: &Cap, key: &str, value: &str) -> Cap {
    let mut dict = serde_json::to_value(cap).expect("cap serializes");
    let urn = cap
        .urn()
        .with_tag(key, value)
        .expect("valid tag")
        .canonical();
    dict["urn"] = json!(urn);
    Cap::from_value(&dict).expect("valid retagged cap")
}
