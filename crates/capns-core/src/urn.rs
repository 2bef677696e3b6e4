/// Tagged URN parsing, canonical serialization, and wildcard matching.
///
/// A tagged URN is a lowercase prefix followed by a `;`-delimited list of
/// `key=value` tags: `media:form=list;textable`. Keys are lowercased on
/// insertion and compared exactly after lowercasing; values are
/// case-preserved. A key without `=value` (a *bare* tag) stores the empty
/// string and serializes back bare. The value `*` is the wildcard.
///
/// # Canonical form
///
/// [`TaggedUrn::serialize`] sorts keys lexicographically and quotes any value
/// containing whitespace, `;`, `=`, `"`, `\`, or an uppercase ASCII letter.
/// Two URNs are equal iff their canonical forms are equal, which the derived
/// `PartialEq` over `(prefix, BTreeMap)` implements directly.
///
/// # Specificity
///
/// The specificity of a URN is the number of tags whose value is not `*`.
/// Bare tags count: the empty string is a concrete value.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// The wildcard tag value.
pub const WILDCARD: &str = "*";

/// Errors produced when parsing or constructing a tagged URN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrnParseError {
    /// The input is empty, has no `:`, or has a malformed prefix or tag list.
    InvalidFormat {
        /// Description of what was malformed.
        message: String,
    },
    /// The same key (after lowercasing) appeared more than once.
    DuplicateKey {
        /// The offending lowercased key.
        key: String,
    },
    /// A tag key consisted solely of ASCII digits.
    NumericKey {
        /// The offending key.
        key: String,
    },
    /// A quoted value was not closed before the end of input.
    UnterminatedQuote,
    /// A `\` escape was followed by something other than `"` or `\`.
    InvalidEscape {
        /// The character following the backslash.
        escape: char,
    },
    /// A character outside the allowed set appeared in a prefix, key, or
    /// bare value.
    InvalidCharacter {
        /// The offending character.
        character: char,
    },
}

impl UrnParseError {
    /// Returns the stable `snake_case` failure code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFormat { .. } => "invalid_format",
            Self::DuplicateKey { .. } => "duplicate_key",
            Self::NumericKey { .. } => "numeric_key",
            Self::UnterminatedQuote => "unterminated_quote",
            Self::InvalidEscape { .. } => "invalid_escape",
            Self::InvalidCharacter { .. } => "invalid_character",
        }
    }
}

impl fmt::Display for UrnParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFormat { message } => write!(f, "invalid URN format: {message}"),
            Self::DuplicateKey { key } => write!(f, "duplicate tag key {key:?}"),
            Self::NumericKey { key } => write!(f, "purely numeric tag key {key:?}"),
            Self::UnterminatedQuote => write!(f, "unterminated quoted value"),
            Self::InvalidEscape { escape } => write!(f, "invalid escape sequence \\{escape}"),
            Self::InvalidCharacter { character } => {
                write!(f, "invalid character {character:?}")
            }
        }
    }
}

impl std::error::Error for UrnParseError {}

fn is_prefix_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_bare_value_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/' | ':' | '.' | '*')
}

fn needs_quoting(value: &str) -> bool {
    // Whitespace, `;`, `=`, `"`, `\`, and uppercase letters force quoting;
    // so does anything else outside the bare-value charset, or the result
    // would not re-parse.
    value
        .chars()
        .any(|c| !is_bare_value_char(c) || c.is_ascii_uppercase())
}

/// A prefix plus a mapping from lowercase tag keys to tag values.
///
/// Immutable after construction: the `with_*` builders return modified
/// copies. Freely shareable and cheap to clone (tag tables are small).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaggedUrn {
    prefix: String,
    tags: BTreeMap<String, String>,
}

impl TaggedUrn {
    /// Creates a URN with the given prefix and no tags.
    ///
    /// # Errors
    ///
    /// Returns [`UrnParseError::InvalidFormat`] for an empty prefix and
    /// [`UrnParseError::InvalidCharacter`] for a prefix containing anything
    /// other than ASCII alphanumerics, `_`, or `-`.
    pub fn new(prefix: &str) -> Result<Self, UrnParseError> {
        if prefix.is_empty() {
            return Err(UrnParseError::InvalidFormat {
                message: "empty prefix".to_owned(),
            });
        }
        if let Some(bad) = prefix.chars().find(|&c| !is_prefix_char(c)) {
            return Err(UrnParseError::InvalidCharacter { character: bad });
        }
        Ok(Self {
            prefix: prefix.to_ascii_lowercase(),
            tags: BTreeMap::new(),
        })
    }

    /// Parses a URN from its string form.
    ///
    /// The prefix is matched case-insensitively (and stored lowercase); the
    /// remainder is a `;`-delimited tag list. A trailing `;` is ignored.
    ///
    /// # Errors
    ///
    /// - [`UrnParseError::InvalidFormat`] — empty input, missing `:`, empty
    ///   prefix, or empty tag key.
    /// - [`UrnParseError::DuplicateKey`] — a key repeats after lowercasing.
    /// - [`UrnParseError::NumericKey`] — a key is all ASCII digits.
    /// - [`UrnParseError::UnterminatedQuote`] — a quoted value never closes.
    /// - [`UrnParseError::InvalidEscape`] — `\` followed by anything other
    ///   than `"` or `\`.
    /// - [`UrnParseError::InvalidCharacter`] — a disallowed character in the
    ///   prefix, a key, or a bare value.
    pub fn parse(input: &str) -> Result<Self, UrnParseError> {
        let Some(colon) = input.find(':') else {
            return Err(UrnParseError::InvalidFormat {
                message: format!("missing ':' in {input:?}"),
            });
        };

        let mut urn = Self::new(&input[..colon])?;
        let rest: Vec<char> = input[colon + 1..].chars().collect();
        let mut pos = 0usize;

        while pos < rest.len() {
            let key_start = pos;
            while pos < rest.len() && is_key_char(rest[pos]) {
                pos += 1;
            }
            let key: String = rest[key_start..pos].iter().collect();
            if key.is_empty() {
                return Err(if pos < rest.len() {
                    UrnParseError::InvalidCharacter {
                        character: rest[pos],
                    }
                } else {
                    UrnParseError::InvalidFormat {
                        message: "empty tag key".to_owned(),
                    }
                });
            }

            let value = if pos < rest.len() && rest[pos] == '=' {
                pos += 1;
                parse_value(&rest, &mut pos)?
            } else {
                String::new()
            };

            insert_tag(&mut urn.tags, &key, value)?;

            if pos < rest.len() {
                if rest[pos] != ';' {
                    return Err(UrnParseError::InvalidCharacter {
                        character: rest[pos],
                    });
                }
                pos += 1;
            }
        }

        Ok(urn)
    }

    /// Returns the lowercase prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the tag table, keyed by lowercase key.
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Returns the value for `key` (lowercased before lookup), if present.
    pub fn get_tag(&self, key: &str) -> Option<&str> {
        self.tags.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    /// Returns `true` if `key` (lowercased) is present, whatever its value.
    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.contains_key(&key.to_ascii_lowercase())
    }

    /// Returns a copy with `key` set to `value`, replacing any existing value.
    ///
    /// # Errors
    ///
    /// Same key validation as [`TaggedUrn::parse`].
    pub fn with_tag(&self, key: &str, value: &str) -> Result<Self, UrnParseError> {
        let mut copy = self.clone();
        insert_or_replace_tag(&mut copy.tags, key, value.to_owned())?;
        Ok(copy)
    }

    /// The number of tags whose value is not the wildcard `*`.
    pub fn specificity(&self) -> usize {
        self.tags.values().filter(|v| v.as_str() != WILDCARD).count()
    }

    /// Returns `true` if this URN (the requirement) matches `request`.
    ///
    /// Prefixes must be equal. For every tag `k` in `request`: this URN
    /// either lacks `k` (absent = wildcard), has `*` for it, `request` has
    /// `*` for it, or the two values are equal. Tags present here but absent
    /// from `request` are unconstrained on the request side and do not block
    /// the match.
    pub fn matches(&self, request: &TaggedUrn) -> bool {
        if self.prefix != request.prefix {
            return false;
        }
        request.tags.iter().all(|(key, req_value)| {
            match self.tags.get(key) {
                None => true,
                Some(own_value) => {
                    own_value == WILDCARD || req_value == WILDCARD || own_value == req_value
                }
            }
        })
    }

    /// Returns `true` if the two URNs are compatible: same prefix, and for
    /// every key present on both sides, one value is `*` or the values are
    /// equal.
    pub fn is_compatible_with(&self, other: &TaggedUrn) -> bool {
        if self.prefix != other.prefix {
            return false;
        }
        self.tags.iter().all(|(key, own_value)| {
            match other.tags.get(key) {
                None => true,
                Some(other_value) => {
                    own_value == WILDCARD || other_value == WILDCARD || own_value == other_value
                }
            }
        })
    }

    /// Returns `true` if this URN is compatible with `other` and strictly
    /// more specific.
    pub fn is_more_specific_than(&self, other: &TaggedUrn) -> bool {
        self.is_compatible_with(other) && self.specificity() > other.specificity()
    }

    /// Returns the canonical string form: lowercase prefix, keys sorted
    /// lexicographically, values quoted only when required.
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(self.prefix.len() + 1 + self.tags.len() * 8);
        out.push_str(&self.prefix);
        out.push(':');
        let mut first = true;
        for (key, value) in &self.tags {
            if !first {
                out.push(';');
            }
            first = false;
            out.push_str(key);
            if value.is_empty() {
                continue;
            }
            out.push('=');
            if needs_quoting(value) {
                out.push('"');
                for c in value.chars() {
                    if c == '"' || c == '\\' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push('"');
            } else {
                out.push_str(value);
            }
        }
        out
    }
}

fn parse_value(rest: &[char], pos: &mut usize) -> Result<String, UrnParseError> {
    if *pos < rest.len() && rest[*pos] == '"' {
        *pos += 1;
        let mut value = String::new();
        loop {
            let Some(&c) = rest.get(*pos) else {
                return Err(UrnParseError::UnterminatedQuote);
            };
            *pos += 1;
            match c {
                '"' => break,
                '\\' => {
                    let Some(&escaped) = rest.get(*pos) else {
                        return Err(UrnParseError::UnterminatedQuote);
                    };
                    *pos += 1;
                    if escaped != '"' && escaped != '\\' {
                        return Err(UrnParseError::InvalidEscape { escape: escaped });
                    }
                    value.push(escaped);
                }
                other => value.push(other),
            }
        }
        if *pos < rest.len() && rest[*pos] != ';' {
            return Err(UrnParseError::InvalidCharacter {
                character: rest[*pos],
            });
        }
        Ok(value)
    } else {
        let start = *pos;
        while *pos < rest.len() && is_bare_value_char(rest[*pos]) {
            *pos += 1;
        }
        if *pos < rest.len() && rest[*pos] != ';' {
            return Err(UrnParseError::InvalidCharacter {
                character: rest[*pos],
            });
        }
        Ok(rest[start..*pos].iter().collect())
    }
}

fn validate_key(key: &str) -> Result<String, UrnParseError> {
    if key.is_empty() {
        return Err(UrnParseError::InvalidFormat {
            message: "empty tag key".to_owned(),
        });
    }
    if let Some(bad) = key.chars().find(|&c| !is_key_char(c)) {
        return Err(UrnParseError::InvalidCharacter { character: bad });
    }
    if key.chars().all(|c| c.is_ascii_digit()) {
        return Err(UrnParseError::NumericKey {
            key: key.to_owned(),
        });
    }
    Ok(key.to_ascii_lowercase())
}

fn insert_tag(
    tags: &mut BTreeMap<String, String>,
    key: &str,
    value: String,
) -> Result<(), UrnParseError> {
    let key = validate_key(key)?;
    if tags.contains_key(&key) {
        return Err(UrnParseError::DuplicateKey { key });
    }
    tags.insert(key, value);
    Ok(())
}

fn insert_or_replace_tag(
    tags: &mut BTreeMap<String, String>,
    key: &str,
    value: String,
) -> Result<(), UrnParseError> {
    let key = validate_key(key)?;
    tags.insert(key, value);
    Ok(())
}

impl fmt::Display for TaggedUrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl FromStr for TaggedUrn {
    type Err = UrnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for TaggedUrn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.serialize())
    }
}

impl<'de> Deserialize<'de> for TaggedUrn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;

    fn urn(s: &str) -> TaggedUrn {
        TaggedUrn::parse(s).expect("valid URN")
    }

    /// A prefix with no tags parses and serializes to itself.
    #[test]
    fn test_parse_bare_prefix() {
        let u = urn("media:");
        assert_eq!(u.prefix(), "media");
        assert!(u.tags().is_empty());
        assert_eq!(u.serialize(), "media:");
    }

    /// Key-value tags parse and sort on serialization.
    #[test]
    fn test_parse_sorts_keys_on_serialize() {
        let u = urn("media:form=list;bytes");
        assert_eq!(u.serialize(), "media:bytes;form=list");
    }

    /// A bare tag stores the empty string and serializes back bare.
    #[test]
    fn test_bare_tag_round_trips() {
        let u = urn("media:png;bytes");
        assert_eq!(u.get_tag("png"), Some(""));
        assert_eq!(u.get_tag("bytes"), Some(""));
        assert_eq!(u.serialize(), "media:bytes;png");
    }

    /// The prefix is lowercased; keys are lowercased; values keep their case.
    #[test]
    fn test_case_handling() {
        let u = urn("MEDIA:Form=scalar");
        assert_eq!(u.prefix(), "media");
        assert_eq!(u.get_tag("FORM"), Some("scalar"));
    }

    /// Quoted values accept `;`, `=`, spaces, and escapes.
    #[test]
    fn test_quoted_value_with_escapes() {
        let u = urn(r#"cap:in="media:bytes;pdf";note="a \"b\" \\c""#);
        assert_eq!(u.get_tag("in"), Some("media:bytes;pdf"));
        assert_eq!(u.get_tag("note"), Some(r#"a "b" \c"#));
    }

    /// Values needing quoting are quoted on serialization and re-parse equal.
    #[test]
    fn test_serialize_quotes_when_needed() {
        let u = TaggedUrn::new("cap")
            .expect("prefix")
            .with_tag("in", "media:bytes;pdf")
            .expect("tag");
        let s = u.serialize();
        assert_eq!(s, r#"cap:in="media:bytes;pdf""#);
        assert_eq!(urn(&s), u);
    }

    /// Uppercase letters in a value force quoting.
    #[test]
    fn test_uppercase_value_quoted() {
        let u = TaggedUrn::new("media")
            .expect("prefix")
            .with_tag("name", "Report")
            .expect("tag");
        assert_eq!(u.serialize(), r#"media:name="Report""#);
    }

    /// A trailing semicolon is ignored.
    #[test]
    fn test_trailing_semicolon_ignored() {
        assert_eq!(urn("media:bytes;"), urn("media:bytes"));
    }

    /// Duplicate keys after lowercasing fail with `duplicate_key`.
    #[test]
    fn test_duplicate_key_rejected() {
        let err = TaggedUrn::parse("media:form=list;FORM=map").expect_err("duplicate");
        assert_eq!(err.code(), "duplicate_key");
    }

    /// Purely numeric keys fail with `numeric_key`.
    #[test]
    fn test_numeric_key_rejected() {
        let err = TaggedUrn::parse("media:123=x").expect_err("numeric");
        assert_eq!(err.code(), "numeric_key");
        assert_eq!(
            err,
            UrnParseError::NumericKey {
                key: "123".to_owned()
            }
        );
    }

    /// An unterminated quote fails with `unterminated_quote`.
    #[test]
    fn test_unterminated_quote() {
        let err = TaggedUrn::parse(r#"media:k="open"#).expect_err("unterminated");
        assert_eq!(err.code(), "unterminated_quote");
    }

    /// A bad escape fails with `invalid_escape`.
    #[test]
    fn test_invalid_escape() {
        let err = TaggedUrn::parse(r#"media:k="a\n""#).expect_err("bad escape");
        assert_eq!(err.code(), "invalid_escape");
    }

    /// A disallowed character in a bare value fails with `invalid_character`.
    #[test]
    fn test_invalid_character_in_value() {
        let err = TaggedUrn::parse("media:k=a b").expect_err("bad char");
        assert_eq!(err.code(), "invalid_character");
    }

    /// Missing `:` or empty input fails with `invalid_format`.
    #[test]
    fn test_invalid_format() {
        assert_eq!(TaggedUrn::parse("media").expect_err("no colon").code(), "invalid_format");
        assert_eq!(TaggedUrn::parse("").expect_err("empty").code(), "invalid_format");
        assert_eq!(TaggedUrn::parse(":k=v").expect_err("no prefix").code(), "invalid_format");
    }

    /// `:` is allowed inside bare values (the prefix splits at the first `:`).
    #[test]
    fn test_colon_allowed_in_bare_value() {
        let u = urn("cap:in=media:;out=media:");
        assert_eq!(u.get_tag("in"), Some("media:"));
        assert_eq!(u.get_tag("out"), Some("media:"));
    }

    /// Specificity counts non-wildcard tags; bare tags are concrete.
    #[test]
    fn test_specificity() {
        assert_eq!(urn("media:").specificity(), 0);
        assert_eq!(urn("media:bytes;png").specificity(), 2);
        assert_eq!(urn("media:form=*;bytes").specificity(), 1);
        assert_eq!(urn("media:form=list;textable;json").specificity(), 3);
    }

    /// Replacing a concrete value with `*` lowers specificity by one.
    #[test]
    fn test_specificity_wildcard_replacement() {
        let u = urn("media:form=list;bytes");
        let widened = u.with_tag("form", WILDCARD).expect("tag");
        assert_eq!(widened.specificity(), u.specificity() - 1);
    }

    /// Every URN matches itself.
    #[test]
    fn test_matches_reflexive() {
        for s in ["media:", "media:bytes;png", "cap:in=*;out=*", "media:form=list"] {
            let u = urn(s);
            assert!(u.matches(&u), "{s} should match itself");
        }
    }

    /// A less-specific requirement matches a more-specific request.
    #[test]
    fn test_matches_wildcard_requirement() {
        let requirement = urn("media:bytes");
        let request = urn("media:bytes;png");
        assert!(requirement.matches(&request));
        // Tags absent from the request side are unconstrained.
        assert!(request.matches(&requirement));
        // A shared key with conflicting concrete values blocks the match.
        assert!(!urn("media:ext=png").matches(&urn("media:ext=jpg")));
    }

    /// A `*` value on either side satisfies the tag.
    #[test]
    fn test_matches_star_values() {
        assert!(urn("media:form=*").matches(&urn("media:form=list")));
        assert!(urn("media:form=list").matches(&urn("media:form=*")));
        assert!(!urn("media:form=map").matches(&urn("media:form=list")));
    }

    /// Different prefixes never match.
    #[test]
    fn test_matches_prefix_mismatch() {
        assert!(!urn("media:bytes").matches(&urn("cap:in=*;out=*;bytes")));
    }

    /// Compatibility and specificity ordering.
    #[test]
    fn test_is_more_specific_than() {
        let narrow = urn("media:bytes;png;image");
        let wide = urn("media:bytes");
        assert!(narrow.is_more_specific_than(&wide));
        assert!(!wide.is_more_specific_than(&narrow));
        // Incompatible values are never ordered.
        let other = urn("media:bytes;form=map");
        let listy = urn("media:bytes;form=list;png");
        assert!(!listy.is_more_specific_than(&other));
    }

    /// `with_tag` replaces existing values and validates the key.
    #[test]
    fn test_with_tag() {
        let u = urn("media:form=scalar");
        let v = u.with_tag("form", "list").expect("tag");
        assert_eq!(v.get_tag("form"), Some("list"));
        assert_eq!(u.get_tag("form"), Some("scalar"));
        assert_eq!(u.with_tag("77", "x").expect_err("numeric").code(), "numeric_key");
    }

    /// Serde round-trips through the string form.
    #[test]
    fn test_serde_round_trip() {
        let u = urn("media:bytes;form=list");
        let json = serde_json::to_string(&u).expect("serialize");
        assert_eq!(json, "\"media:bytes;form=list\"");
        let back: TaggedUrn = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(u, back);
    }

    /// Parse-serialize-parse is identity for assorted inputs.
    #[test]
    fn test_round_trip_assorted() {
        for s in [
            "media:",
            "media:bytes;png",
            "media:form=list;file-path",
            r#"cap:in="media:bytes;zip";out="media:bytes;form=list;pdf""#,
            "cap:in=media:;out=media:",
        ] {
            let first = urn(s);
            let again = urn(&first.serialize());
            assert_eq!(first, again, "round trip failed for {s}");
        }
    }
}
