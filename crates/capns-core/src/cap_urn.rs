/// Cap URNs: tagged URNs with the `cap` prefix and mandatory `in`/`out` tags.
///
/// The `in` and `out` tags name the media URNs a cap consumes and produces,
/// or `*` for a cap that handles anything (the identity cap is
/// `cap:in=media:;out=media:`). Because media URNs may contain `;`, embedded
/// specs are quoted in the string form:
/// `cap:in="media:bytes;pdf";out="media:md;textable"`.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::media::MediaUrn;
use crate::urn::{TaggedUrn, UrnParseError, WILDCARD};

/// The required prefix of every cap URN.
pub const CAP_PREFIX: &str = "cap";

/// The `in` tag key.
pub const TAG_IN: &str = "in";
/// The `out` tag key.
pub const TAG_OUT: &str = "out";

/// A parsed `in` or `out` tag value: the literal `*` or a media URN.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IoSpec {
    /// The cap consumes or produces anything.
    Wildcard,
    /// A concrete (possibly wildcarded-tag) media URN.
    Media(MediaUrn),
}

impl IoSpec {
    fn parse(value: &str) -> Result<Self, UrnParseError> {
        if value == WILDCARD {
            return Ok(Self::Wildcard);
        }
        Ok(Self::Media(MediaUrn::parse(value)?))
    }

    /// The canonical string form (`*` or the media URN's canonical form).
    pub fn canonical(&self) -> String {
        match self {
            Self::Wildcard => WILDCARD.to_owned(),
            Self::Media(urn) => urn.canonical(),
        }
    }

    /// Returns the media URN when this spec is concrete.
    pub fn as_media(&self) -> Option<&MediaUrn> {
        match self {
            Self::Wildcard => None,
            Self::Media(urn) => Some(urn),
        }
    }

    fn matches(&self, other: &IoSpec) -> bool {
        match (self, other) {
            (Self::Wildcard, Self::Wildcard | Self::Media(_)) => true,
            (Self::Media(_), Self::Wildcard) => true,
            (Self::Media(a), Self::Media(b)) => a == b,
        }
    }
}

/// A tagged URN with prefix `cap` and required `in`/`out` tags.
///
/// The parsed [`IoSpec`] values are cached at construction so downstream
/// graph code never re-parses them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CapUrn {
    urn: TaggedUrn,
    in_spec: IoSpec,
    out_spec: IoSpec,
}

impl CapUrn {
    /// Parses a cap URN from its string form.
    ///
    /// # Errors
    ///
    /// Any tagged-URN parse error, plus [`UrnParseError::InvalidFormat`] when
    /// the prefix is not `cap`, when `in` or `out` is missing, or when an
    /// `in`/`out` value is neither `*` nor a parseable media URN.
    pub fn parse(input: &str) -> Result<Self, UrnParseError> {
        Self::from_urn(TaggedUrn::parse(input)?)
    }

    /// Wraps a [`TaggedUrn`], checking the prefix and the `in`/`out` tags.
    ///
    /// # Errors
    ///
    /// See [`CapUrn::parse`].
    pub fn from_urn(urn: TaggedUrn) -> Result<Self, UrnParseError> {
        if urn.prefix() != CAP_PREFIX {
            return Err(UrnParseError::InvalidFormat {
                message: format!("expected prefix {CAP_PREFIX:?}, got {:?}", urn.prefix()),
            });
        }
        let in_spec = Self::required_spec(&urn, TAG_IN)?;
        let out_spec = Self::required_spec(&urn, TAG_OUT)?;
        Ok(Self {
            urn,
            in_spec,
            out_spec,
        })
    }

    fn required_spec(urn: &TaggedUrn, key: &str) -> Result<IoSpec, UrnParseError> {
        let Some(value) = urn.get_tag(key) else {
            return Err(UrnParseError::InvalidFormat {
                message: format!("cap URN missing required tag {key:?}"),
            });
        };
        IoSpec::parse(value).map_err(|err| UrnParseError::InvalidFormat {
            message: format!("cap URN tag {key:?} is neither '*' nor a media URN: {err}"),
        })
    }

    /// Builds a cap URN from in/out specs and no further tags.
    pub fn from_specs(in_spec: IoSpec, out_spec: IoSpec) -> Self {
        // `cap` is a valid prefix and `in`/`out` are valid keys, so the
        // fallible tagged-URN builders cannot fail here.
        let urn = TaggedUrn::new(CAP_PREFIX)
            .and_then(|u| u.with_tag(TAG_IN, &in_spec.canonical()))
            .and_then(|u| u.with_tag(TAG_OUT, &out_spec.canonical()))
            .unwrap_or_else(|_| unreachable!());
        Self {
            urn,
            in_spec,
            out_spec,
        }
    }

    /// Returns the underlying tagged URN.
    pub fn as_urn(&self) -> &TaggedUrn {
        &self.urn
    }

    /// The parsed `in` spec.
    pub fn in_spec(&self) -> &IoSpec {
        &self.in_spec
    }

    /// The parsed `out` spec.
    pub fn out_spec(&self) -> &IoSpec {
        &self.out_spec
    }

    /// Returns the value for `key`, if present.
    pub fn get_tag(&self, key: &str) -> Option<&str> {
        self.urn.get_tag(key)
    }

    /// Returns a copy with `key` set to `value`.
    ///
    /// Setting `in` or `out` through this method is a no-op (the returned
    /// copy equals `self`); use [`CapUrn::with_in_spec`] /
    /// [`CapUrn::with_out_spec`] instead.
    ///
    /// # Errors
    ///
    /// Key validation errors from [`TaggedUrn::with_tag`].
    pub fn with_tag(&self, key: &str, value: &str) -> Result<Self, UrnParseError> {
        let lowered = key.to_ascii_lowercase();
        if lowered == TAG_IN || lowered == TAG_OUT {
            return Ok(self.clone());
        }
        Ok(Self {
            urn: self.urn.with_tag(key, value)?,
            in_spec: self.in_spec.clone(),
            out_spec: self.out_spec.clone(),
        })
    }

    /// Returns a copy with the `in` spec replaced.
    pub fn with_in_spec(&self, in_spec: IoSpec) -> Self {
        let urn = self
            .urn
            .with_tag(TAG_IN, &in_spec.canonical())
            .unwrap_or_else(|_| unreachable!());
        Self {
            urn,
            in_spec,
            out_spec: self.out_spec.clone(),
        }
    }

    /// Returns a copy with the `out` spec replaced.
    pub fn with_out_spec(&self, out_spec: IoSpec) -> Self {
        let urn = self
            .urn
            .with_tag(TAG_OUT, &out_spec.canonical())
            .unwrap_or_else(|_| unreachable!());
        Self {
            urn,
            in_spec: self.in_spec.clone(),
            out_spec,
        }
    }

    /// The number of non-wildcard tags, `in`/`out` included.
    pub fn specificity(&self) -> usize {
        self.urn.specificity()
    }

    /// Returns `true` if this cap can handle `request`.
    ///
    /// 1. `in` specs match: either side is `*`, or the media URNs are equal
    ///    (string equality on canonical forms, not media conformance —
    ///    conformance between a cap's input and a concrete source is the
    ///    graph's concern).
    /// 2. `out` specs match, same rule.
    /// 3. Every other tag in `request` is unconstrained here (absent or `*`),
    ///    wildcarded on the request side, or equal.
    pub fn matches(&self, request: &CapUrn) -> bool {
        if !self.in_spec.matches(&request.in_spec) {
            return false;
        }
        if !self.out_spec.matches(&request.out_spec) {
            return false;
        }
        request
            .urn
            .tags()
            .iter()
            .filter(|(key, _)| key.as_str() != TAG_IN && key.as_str() != TAG_OUT)
            .all(|(key, req_value)| match self.urn.tags().get(key) {
                None => true,
                Some(own_value) => {
                    own_value == WILDCARD || req_value == WILDCARD || own_value == req_value
                }
            })
    }

    /// Returns `true` if the two URNs are tag-compatible and `self` is
    /// strictly more specific.
    pub fn is_more_specific_than(&self, other: &CapUrn) -> bool {
        self.urn.is_more_specific_than(&other.urn)
    }

    /// The canonical string form.
    pub fn canonical(&self) -> String {
        self.urn.serialize()
    }
}

impl fmt::Display for CapUrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for CapUrn {
    type Err = UrnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for CapUrn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for CapUrn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(de::Error::custom)
    }
}
