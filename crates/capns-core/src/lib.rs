#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod binding;
pub mod cap;
pub mod cap_urn;
pub mod cardinality;
pub mod error;
pub mod graph;
pub mod media;
pub mod media_spec;
pub mod plan;
pub mod planner;
pub mod registry;
pub mod urn;
pub mod validator;

#[cfg(test)]
mod test_helpers;

pub use binding::{
    ArgumentBinding, FileSourceType, ResolutionContext, ResolvedArgument, ResolvedFile,
    ValueSource, json_to_bytes, resolve_binding, resolve_bindings,
};
pub use cap::{ArgSource, Cap, CapArg, CapOutput, CapSchemaError};
pub use cap_urn::{CAP_PREFIX, CapUrn, IoSpec};
pub use cardinality::{
    Cardinality, CardinalityAnalysis, FanOutSpan, FilePathArg, StepCardinality,
    analyze_cardinality, cardinality_of, input_cardinality,
};
pub use error::{Component, Error, ErrorKind};
pub use graph::{
    CapEdge, CapGraph, DEFAULT_MAX_DEPTH, MediaNode, build_graph, find_all_paths, find_best_path,
    find_path,
};
pub use media::{MEDIA_PREFIX, MediaUrn};
pub use media_spec::{
    MediaSpec, MediaSpecEntry, SCHEMA_BASE_URL_VAR, ValidationConstraints, builtin_media_specs,
    resolve_media_spec, schema_base_url,
};
pub use plan::{
    ChainStep, Plan, PlanEdge, PlanEdgeKind, PlanNode, SlotCardinality, build_plan,
    builder::{INPUT_SLOT_ID, OUTPUT_ID},
};
pub use planner::{
    ArgResolution, ArgumentAnalysis, ArgumentInfo, Planner, PlannerOptions, ReachableTarget,
    SlotRequirement, StepArguments,
};
pub use registry::{BUILTIN_REGISTRY, BestCap, CapCube, CapRegistry, StaticRegistry, identity_cap};
pub use urn::{TaggedUrn, UrnParseError, WILDCARD};
pub use validator::{ConstraintValidator, SchemaValidator, check_constraints, validate_value};

/// Returns the current version of the capns-core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;

    #[test]
    fn version_is_semver() {
        let v = version();
        let parts: Vec<&str> = v.split('.').collect();
        assert_eq!(parts.len(), 3, "version should have 3 parts: {v}");
        for part in parts {
            part.parse::<u32>().expect("each part should be a number");
        }
    }
}
