/// Media-spec resolution: mapping media URNs to concrete content types,
/// profile URIs, schemas, and validation constraints.
///
/// A cap may carry a local `media_specs` table whose entries are either the
/// compact string form `<mime>; profile="<url>"` or a structured object.
/// Resolution consults the cap's local table first, then the built-in table;
/// an unresolved URN is a hard error.
///
/// The built-in table's profile URLs are rooted at `SCHEMA_BASE_URL` when
/// set, else `REGISTRY_URL` + `/schema`, else a compiled default.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Component, Error};
use crate::media::MediaUrn;

/// Environment variable overriding the profile-URL base of the built-in table.
pub const SCHEMA_BASE_URL_VAR: &str = "SCHEMA_BASE_URL";

/// Environment variable naming the upstream registry; `/schema` is appended.
pub const REGISTRY_URL_VAR: &str = "REGISTRY_URL";

const DEFAULT_SCHEMA_BASE_URL: &str = "https://registry.capns.dev/schema";

/// Returns the profile-URL base for built-in media specs.
///
/// Precedence: `SCHEMA_BASE_URL`, then `REGISTRY_URL` with `/schema`
/// appended, then the compiled default.
pub fn schema_base_url() -> String {
    if let Ok(base) = std::env::var(SCHEMA_BASE_URL_VAR) {
        if !base.is_empty() {
            return base;
        }
    }
    if let Ok(registry) = std::env::var(REGISTRY_URL_VAR) {
        if !registry.is_empty() {
            return format!("{}/schema", registry.trim_end_matches('/'));
        }
    }
    DEFAULT_SCHEMA_BASE_URL.to_owned()
}

/// Value-level validation constraints attached to a media spec.
///
/// All fields are optional; an absent field imposes no constraint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationConstraints {
    /// Inclusive numeric lower bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive numeric upper bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Minimum string length in characters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    /// Maximum string length in characters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Regex the full string value must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Closed set of allowed values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<serde_json::Value>>,
}

impl ValidationConstraints {
    /// Returns `true` if no constraint is set.
    pub fn is_empty(&self) -> bool {
        self.min.is_none()
            && self.max.is_none()
            && self.min_length.is_none()
            && self.max_length.is_none()
            && self.pattern.is_none()
            && self.allowed_values.is_none()
    }
}

/// A resolved description of a media URN.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaSpec {
    /// MIME content type.
    pub media_type: String,
    /// Optional profile URI identifying the schema family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_uri: Option<String>,
    /// Optional JSON Schema for values of this type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
    /// Optional human-readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional value-level constraints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationConstraints>,
    /// Open metadata passthrough.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

/// One entry in a `media_specs` table: the compact string form or a
/// structured object.
///
/// The two forms are distinguished structurally on deserialization, so
/// callers never perform dynamic type tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MediaSpecEntry {
    /// `<mime>; profile="<url>"` (the profile parameter is optional).
    Canonical(String),
    /// The full structured spec.
    Structured(MediaSpec),
}

impl MediaSpecEntry {
    /// Resolves this entry into a [`MediaSpec`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] when the canonical string form is empty.
    pub fn resolve(&self) -> Result<MediaSpec, Error> {
        match self {
            Self::Canonical(s) => parse_canonical(s),
            Self::Structured(spec) => Ok(spec.clone()),
        }
    }
}

/// Parses the compact `<mime>; profile="<url>"` form.
fn parse_canonical(s: &str) -> Result<MediaSpec, Error> {
    let mut parts = s.split(';');
    let media_type = parts.next().map(str::trim).unwrap_or_default();
    if media_type.is_empty() {
        return Err(Error::InvalidInput {
            component: Component::MediaSpec,
            message: format!("empty media type in spec string {s:?}"),
        });
    }
    let mut profile_uri = None;
    for part in parts {
        let part = part.trim();
        if let Some(raw) = part.strip_prefix("profile=") {
            profile_uri = Some(raw.trim_matches('"').to_owned());
        }
    }
    Ok(MediaSpec {
        media_type: media_type.to_owned(),
        profile_uri,
        ..MediaSpec::default()
    })
}

fn builtin(media_type: &str, slug: &str) -> MediaSpec {
    MediaSpec {
        media_type: media_type.to_owned(),
        profile_uri: Some(format!("{}/{slug}", schema_base_url())),
        ..MediaSpec::default()
    }
}

/// The built-in media-spec table shipped with the library.
///
/// Keys are canonical media-URN strings. Caps extend or override this table
/// through their local `media_specs` field.
pub fn builtin_media_specs() -> BTreeMap<String, MediaSpec> {
    let entries: [(&str, MediaSpec); 24] = [
        ("media:", builtin("application/octet-stream", "any")),
        ("media:bytes", builtin("application/octet-stream", "bytes")),
        (
            "media:form=scalar;textable",
            builtin("text/plain", "text-scalar"),
        ),
        ("media:textable", builtin("text/plain", "text")),
        (
            "media:form=map;json;textable",
            builtin("application/json", "json-map"),
        ),
        (
            "media:form=list;json;textable",
            builtin("application/json", "json-list"),
        ),
        ("media:file-path", builtin("text/plain", "file-path")),
        (
            "media:file-path;form=list",
            builtin("application/json", "file-path-list"),
        ),
        ("media:form=scalar;numeric", builtin("text/plain", "number")),
        ("media:bool;form=scalar", builtin("text/plain", "bool")),
        ("media:void", builtin("application/x-empty", "void")),
        ("media:bytes;pdf", builtin("application/pdf", "pdf")),
        ("media:md;textable", builtin("text/markdown", "md")),
        ("media:html;textable", builtin("text/html", "html")),
        ("media:csv;textable", builtin("text/csv", "csv")),
        ("media:bytes;zip", builtin("application/zip", "zip")),
        ("media:bytes;image;png", builtin("image/png", "png")),
        ("media:bytes;image;jpg", builtin("image/jpeg", "jpg")),
        ("media:bytes;image", builtin("image/*", "image")),
        ("media:audio;bytes;wav", builtin("audio/wav", "wav")),
        ("media:audio;bytes;mp3", builtin("audio/mpeg", "mp3")),
        ("media:audio;bytes", builtin("audio/*", "audio")),
        ("media:bytes;mp4;video", builtin("video/mp4", "mp4")),
        ("media:bytes;video", builtin("video/*", "video")),
    ];
    entries
        .into_iter()
        .map(|(urn, spec)| (urn.to_owned(), spec))
        .collect()
}

/// Resolves a media-URN string against a local table, then the built-in one.
///
/// The raw string and its canonical form are both tried against the local
/// table, so caps may key their tables however they were authored.
///
/// # Errors
///
/// [`Error::InvalidInput`] when the URN does not parse as a media URN or no
/// table has an entry for it.
pub fn resolve_media_spec(
    urn_str: &str,
    local: &BTreeMap<String, MediaSpecEntry>,
) -> Result<MediaSpec, Error> {
    let canonical = MediaUrn::parse(urn_str).map_err(Error::from)?.canonical();

    if let Some(entry) = local.get(urn_str).or_else(|| local.get(&canonical)) {
        return entry.resolve();
    }
    if let Some(spec) = builtin_media_specs().get(&canonical) {
        return Ok(spec.clone());
    }
    Err(Error::InvalidInput {
        component: Component::MediaSpec,
        message: format!("no media spec registered for {canonical:?}"),
    })
}
