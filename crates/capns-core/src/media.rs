/// Media URNs: tagged URNs with the `media` prefix, typed tag predicates,
/// and the conformance partial order.
///
/// A media URN identifies a typed data payload by structural and content
/// tags (`form`, `textable`, `bytes`, `json`, `file-path`, format names).
/// Conformance (`A ⊑ B`, [`MediaUrn::conforms_to`]) is the relation the
/// planner uses to decide whether a concrete payload satisfies a cap's
/// declared input: every tag `B` constrains must be satisfied by `A`, and
/// `A` may carry additional tags.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::urn::{TaggedUrn, UrnParseError, WILDCARD};

/// The required prefix of every media URN.
pub const MEDIA_PREFIX: &str = "media";

/// Well-known media tag keys.
pub mod tags {
    /// Structural shape: `scalar`, `map`, or `list`.
    pub const FORM: &str = "form";
    /// May be losslessly rendered as UTF-8 text.
    pub const TEXTABLE: &str = "textable";
    /// Binary payload.
    pub const BYTES: &str = "bytes";
    /// Scalar numeric subtype.
    pub const NUMERIC: &str = "numeric";
    /// Scalar boolean subtype.
    pub const BOOL: &str = "bool";
    /// JSON-serialized form.
    pub const JSON: &str = "json";
    /// The value is a filesystem path (with `form=list`, an array of paths).
    pub const FILE_PATH: &str = "file-path";
    /// Empty / sentinel type.
    pub const VOID: &str = "void";
}

/// Values of the `form` tag.
pub mod forms {
    /// A single value.
    pub const SCALAR: &str = "scalar";
    /// A string-keyed mapping.
    pub const MAP: &str = "map";
    /// An ordered sequence.
    pub const LIST: &str = "list";
}

/// A tagged URN whose prefix is `media`.
///
/// Immutable after construction. All predicates are pure functions over the
/// tag table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MediaUrn(TaggedUrn);

impl MediaUrn {
    /// Parses a media URN from its string form.
    ///
    /// # Errors
    ///
    /// Any [`UrnParseError`] from tagged-URN parsing, plus
    /// [`UrnParseError::InvalidFormat`] when the prefix is not `media`.
    pub fn parse(input: &str) -> Result<Self, UrnParseError> {
        Self::from_urn(TaggedUrn::parse(input)?)
    }

    /// Wraps a [`TaggedUrn`], checking the prefix.
    ///
    /// # Errors
    ///
    /// [`UrnParseError::InvalidFormat`] when the prefix is not `media`.
    pub fn from_urn(urn: TaggedUrn) -> Result<Self, UrnParseError> {
        if urn.prefix() != MEDIA_PREFIX {
            return Err(UrnParseError::InvalidFormat {
                message: format!("expected prefix {MEDIA_PREFIX:?}, got {:?}", urn.prefix()),
            });
        }
        Ok(Self(urn))
    }

    /// The bare `media:` wildcard, which every media URN conforms to.
    pub fn wildcard() -> Self {
        // A bare, valid prefix cannot fail to construct.
        Self(TaggedUrn::new(MEDIA_PREFIX).unwrap_or_else(|_| unreachable!()))
    }

    /// Returns the underlying tagged URN.
    pub fn as_urn(&self) -> &TaggedUrn {
        &self.0
    }

    /// Returns the value for `key` (lowercased), if present.
    pub fn get_tag(&self, key: &str) -> Option<&str> {
        self.0.get_tag(key)
    }

    /// Returns `true` if `key` is present with a non-wildcard value.
    pub fn has_concrete_tag(&self, key: &str) -> bool {
        self.0.get_tag(key).is_some_and(|v| v != WILDCARD)
    }

    /// The number of non-wildcard tags.
    pub fn specificity(&self) -> usize {
        self.0.specificity()
    }

    /// Returns a copy with `key` set to `value`.
    ///
    /// # Errors
    ///
    /// Key validation errors from [`TaggedUrn::with_tag`].
    pub fn with_tag(&self, key: &str, value: &str) -> Result<Self, UrnParseError> {
        Ok(Self(self.0.with_tag(key, value)?))
    }

    /// The canonical string form.
    pub fn canonical(&self) -> String {
        self.0.serialize()
    }

    /// `form=list`.
    pub fn is_list(&self) -> bool {
        self.get_tag(tags::FORM) == Some(forms::LIST)
    }

    /// `form=map`.
    pub fn is_map(&self) -> bool {
        self.get_tag(tags::FORM) == Some(forms::MAP)
    }

    /// `form=scalar`.
    pub fn is_scalar(&self) -> bool {
        self.get_tag(tags::FORM) == Some(forms::SCALAR)
    }

    /// The value is a filesystem path.
    pub fn is_file_path(&self) -> bool {
        self.has_concrete_tag(tags::FILE_PATH)
    }

    /// The value is an array of filesystem paths.
    pub fn is_file_path_list(&self) -> bool {
        self.is_file_path() && self.is_list()
    }

    /// Binary payload.
    pub fn is_binary(&self) -> bool {
        self.has_concrete_tag(tags::BYTES)
    }

    /// Losslessly renderable as UTF-8 text.
    pub fn is_text(&self) -> bool {
        self.has_concrete_tag(tags::TEXTABLE)
    }

    /// JSON-serialized form.
    pub fn is_json(&self) -> bool {
        self.has_concrete_tag(tags::JSON)
    }

    /// Scalar numeric subtype.
    pub fn is_numeric(&self) -> bool {
        self.has_concrete_tag(tags::NUMERIC)
    }

    /// Scalar boolean subtype.
    pub fn is_bool(&self) -> bool {
        self.has_concrete_tag(tags::BOOL)
    }

    /// Empty / sentinel type.
    pub fn is_void(&self) -> bool {
        self.has_concrete_tag(tags::VOID)
    }

    /// Conformance `self ⊑ other`: for every tag `k` set in `other`, either
    /// `other[k]` is `*`, or `self` has `k` and the values are equal or one
    /// of them is `*`. `self` may carry additional tags.
    pub fn conforms_to(&self, other: &MediaUrn) -> bool {
        other.0.tags().iter().all(|(key, required)| {
            if required == WILDCARD {
                return true;
            }
            match self.0.tags().get(key) {
                None => false,
                Some(own) => own == required || own == WILDCARD,
            }
        })
    }

    /// Equivalence: conformance in both directions.
    pub fn is_equivalent_to(&self, other: &MediaUrn) -> bool {
        self.conforms_to(other) && other.conforms_to(self)
    }

    /// Wildcard matching in the tagged-URN sense, with `self` as the
    /// requirement side. Used by the cap graph's outgoing-edge scan.
    pub fn matches(&self, request: &MediaUrn) -> bool {
        self.0.matches(&request.0)
    }
}

impl fmt::Display for MediaUrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for MediaUrn {
    type Err = UrnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for MediaUrn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for MediaUrn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(de::Error::custom)
    }
}
