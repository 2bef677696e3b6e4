/// Unified error type for the planner core.
///
/// The legacy implementation spread errors across per-module domains with
/// integer codes. Here every fallible planner operation returns this single
/// enum; the producing subsystem is preserved as a [`Component`] field rather
/// than a domain string. Leaf parse errors ([`crate::urn::UrnParseError`],
/// [`crate::cap::CapSchemaError`]) convert into [`Error::InvalidInput`] via
/// `From` at the planner boundary.
use std::fmt;

use crate::cap::CapSchemaError;
use crate::urn::UrnParseError;

/// The subsystem that produced an error.
///
/// Attribution only: two errors of the same kind from different components
/// compare unequal, which keeps diagnostics precise without multiplying
/// error domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    /// Tagged-URN parsing and algebra.
    Urn,
    /// Media-spec resolution tables.
    MediaSpec,
    /// Cap construction and schema checks.
    Cap,
    /// Registry and cube lookups.
    Registry,
    /// Cap-graph construction and raw graph queries.
    Graph,
    /// Conformance-driven path finding.
    PathFinder,
    /// Cardinality analysis.
    Cardinality,
    /// Plan DAG emission.
    PlanBuilder,
    /// Plan structural validation and ordering.
    Plan,
    /// Argument-binding resolution.
    Resolver,
}

impl Component {
    /// Returns the lowercase name used in serialized diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urn => "urn",
            Self::MediaSpec => "media_spec",
            Self::Cap => "cap",
            Self::Registry => "registry",
            Self::Graph => "graph",
            Self::PathFinder => "path_finder",
            Self::Cardinality => "cardinality",
            Self::PlanBuilder => "plan_builder",
            Self::Plan => "plan",
            Self::Resolver => "resolver",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error taxonomy, independent of the data each variant carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A caller-supplied URN, media string, or cap dictionary is malformed.
    InvalidInput,
    /// A requested cap is absent, or no path exists between source and target.
    NotFound,
    /// An upstream registry call failed; propagated verbatim.
    RegistryError,
    /// An invariant violation inside the planner; aborts the current call.
    Internal,
    /// A schema or typed-argument check failed.
    Validation,
    /// A required argument had no binding or value during resolution.
    MissingRequired,
}

impl ErrorKind {
    /// Returns the `snake_case` kind string used in serialized output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::NotFound => "not_found",
            Self::RegistryError => "registry_error",
            Self::Internal => "internal",
            Self::Validation => "validation",
            Self::MissingRequired => "missing_required",
        }
    }
}

/// An error produced by any core planner operation.
///
/// Internal errors must never be coerced into [`Error::NotFound`]: a
/// duplicate graph edge or an inconsistent plan aborts the whole call so
/// stale registry state cannot masquerade as an unreachable target.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Caller-supplied input failed to parse or failed a schema check.
    InvalidInput {
        /// The subsystem that rejected the input.
        component: Component,
        /// Human-readable description of the problem.
        message: String,
    },
    /// A cap or path was not found.
    NotFound {
        /// The subsystem that searched.
        component: Component,
        /// What was looked for.
        message: String,
    },
    /// The upstream registry reported a failure.
    Registry {
        /// The registry's message, propagated verbatim.
        message: String,
    },
    /// An internal invariant was violated.
    Internal {
        /// The subsystem whose invariant broke.
        component: Component,
        /// Description of the violated invariant.
        message: String,
    },
    /// A value failed schema or constraint validation.
    Validation {
        /// One entry per failed check.
        errors: Vec<String>,
    },
    /// A required argument had no binding or resolvable value.
    MissingRequired {
        /// The argument's declared name.
        argument: String,
    },
}

impl Error {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Registry { .. } => ErrorKind::RegistryError,
            Self::Internal { .. } => ErrorKind::Internal,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::MissingRequired { .. } => ErrorKind::MissingRequired,
        }
    }

    /// Returns the producing [`Component`], if the variant records one.
    pub fn component(&self) -> Option<Component> {
        match self {
            Self::InvalidInput { component, .. }
            | Self::NotFound { component, .. }
            | Self::Internal { component, .. } => Some(*component),
            Self::Registry { .. } | Self::Validation { .. } | Self::MissingRequired { .. } => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput { component, message } => {
                write!(f, "invalid input ({component}): {message}")
            }
            Self::NotFound { component, message } => {
                write!(f, "not found ({component}): {message}")
            }
            Self::Registry { message } => write!(f, "registry error: {message}"),
            Self::Internal { component, message } => {
                write!(f, "internal error ({component}): {message}")
            }
            Self::Validation { errors } => {
                write!(f, "validation failed: {}", errors.join("; "))
            }
            Self::MissingRequired { argument } => {
                write!(f, "missing required argument {argument:?}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<UrnParseError> for Error {
    fn from(err: UrnParseError) -> Self {
        Self::InvalidInput {
            component: Component::Urn,
            message: err.to_string(),
        }
    }
}

impl From<CapSchemaError> for Error {
    fn from(err: CapSchemaError) -> Self {
        Self::InvalidInput {
            component: Component::Cap,
            message: err.to_string(),
        }
    }
}
