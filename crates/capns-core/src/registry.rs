/// Registry interfaces and the cap cube.
///
/// The planner consumes caps through the [`CapRegistry`] trait: an injected,
/// object-safe handle whose concrete implementation may cache, hit the
/// network, or serve fixed data. The core performs no I/O itself; a
/// [`StaticRegistry`] over an in-memory snapshot ships for hosts and tests.
///
/// A [`CapCube`] is the union of named registries. Lookup returns the *best*
/// (most specific) cap whose URN matches a request URN, together with the
/// name of the registry that contributed it. Every cube carries the identity
/// cap (`cap:in=media:;out=media:`): handlers that must always have some cap
/// to invoke can rely on it, and it never appears in planned paths because
/// identity conversions plan to the empty path first.
use serde_json::json;

use crate::cap::Cap;
use crate::cap_urn::CapUrn;
use crate::error::{Component, Error};

/// The registry name under which the built-in identity cap is reported.
pub const BUILTIN_REGISTRY: &str = "builtin";

/// An injected source of caps.
///
/// Implementations must be deterministic for a given snapshot: the planner's
/// output is a pure function of the cap list this returns. The trait is
/// synchronous by design; cancellation is dropping the call, and no lock is
/// held across it.
pub trait CapRegistry {
    /// Returns the registry's current cap snapshot.
    ///
    /// # Errors
    ///
    /// [`Error::Registry`] when the upstream source fails; the planner
    /// propagates it verbatim and never retries.
    fn cached_caps(&self) -> Result<Vec<Cap>, Error>;
}

/// A registry over a fixed in-memory snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    caps: Vec<Cap>,
}

impl StaticRegistry {
    /// Creates a registry serving exactly `caps`.
    pub fn new(caps: Vec<Cap>) -> Self {
        Self { caps }
    }
}

impl CapRegistry for StaticRegistry {
    fn cached_caps(&self) -> Result<Vec<Cap>, Error> {
        Ok(self.caps.clone())
    }
}

/// The best match for a request URN: the cap, its specificity, and the
/// registry that contributed it.
#[derive(Debug, Clone, PartialEq)]
pub struct BestCap {
    /// The matched cap.
    pub cap: Cap,
    /// The cap URN's specificity at match time.
    pub specificity: usize,
    /// Name of the contributing registry.
    pub registry_name: String,
}

struct NamedRegistry {
    name: String,
    registry: Box<dyn CapRegistry>,
}

/// The union of named registries, plus the built-in identity cap.
pub struct CapCube {
    sources: Vec<NamedRegistry>,
}

impl CapCube {
    /// Creates an empty cube (identity cap only).
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Adds a named registry. Later registries lose specificity ties to
    /// earlier ones, keeping lookups deterministic under union.
    pub fn add_registry(&mut self, name: &str, registry: Box<dyn CapRegistry>) {
        self.sources.push(NamedRegistry {
            name: name.to_owned(),
            registry,
        });
    }

    /// Returns every registry cap in the cube with its registry name, in
    /// registry insertion order.
    ///
    /// # Errors
    ///
    /// Propagates the first [`Error::Registry`] from any source.
    pub fn all_caps(&self) -> Result<Vec<(String, Cap)>, Error> {
        let mut out = Vec::new();
        for source in &self.sources {
            for cap in source.registry.cached_caps()? {
                out.push((source.name.clone(), cap));
            }
        }
        Ok(out)
    }

    /// Returns the most specific cap whose URN matches `request`.
    ///
    /// Candidates are registry caps for which `cap.urn().matches(request)`
    /// holds; among them the highest URN specificity wins, with ties resolved
    /// in registry insertion order. When no registry cap matches, the
    /// identity cap is returned as a last resort if its URN matches the
    /// request, so handlers that must always have some cap to invoke get
    /// one. The identity cap never shadows a registry cap.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] (`no hosts found`) when nothing matches.
    /// - [`Error::Registry`] when an upstream source fails.
    pub fn find_best_cap_set(&self, request: &CapUrn) -> Result<BestCap, Error> {
        let mut best: Option<BestCap> = None;
        for (registry_name, cap) in self.all_caps()? {
            if !cap.urn().matches(request) {
                continue;
            }
            let specificity = cap.urn().specificity();
            let better = match &best {
                None => true,
                Some(current) => specificity > current.specificity,
            };
            if better {
                best = Some(BestCap {
                    cap,
                    specificity,
                    registry_name,
                });
            }
        }
        if best.is_none() {
            let identity = identity_cap();
            if identity.urn().matches(request) {
                best = Some(BestCap {
                    specificity: identity.urn().specificity(),
                    cap: identity,
                    registry_name: BUILTIN_REGISTRY.to_owned(),
                });
            }
        }
        best.ok_or_else(|| Error::NotFound {
            component: Component::Registry,
            message: format!("no hosts found for {}", request.canonical()),
        })
    }
}

impl Default for CapCube {
    fn default() -> Self {
        Self::new()
    }
}

/// The mandatory identity cap: consumes and produces any media.
pub fn identity_cap() -> Cap {
    let dict = json!({
        "urn": "cap:in=media:;out=media:",
        "title": "Identity",
        "command": "identity",
    });
    // The literal above is a schema-valid cap dictionary.
    Cap::from_value(&dict).unwrap_or_else(|_| unreachable!())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    fn cap(urn: &str, title: &str) -> Cap {
        Cap::from_value(&json!({
            "urn": urn,
            "title": title,
            "command": "run",
        }))
        .expect("valid cap")
    }

    fn cube_with(caps: Vec<Cap>) -> CapCube {
        let mut cube = CapCube::new();
        cube.add_registry("main", Box::new(StaticRegistry::new(caps)));
        cube
    }

    /// An empty cube still answers wildcard requests with the identity cap.
    #[test]
    fn test_identity_cap_fallback() {
        let cube = CapCube::new();
        assert!(cube.all_caps().expect("caps").is_empty());

        let request = CapUrn::parse("cap:in=*;out=*").expect("urn");
        let best = cube.find_best_cap_set(&request).expect("identity fallback");
        assert_eq!(best.registry_name, BUILTIN_REGISTRY);
        assert_eq!(best.cap.urn().canonical(), "cap:in=media:;out=media:");
    }

    /// The identity fallback never shadows a matching registry cap.
    #[test]
    fn test_identity_does_not_shadow_registry_caps() {
        let cube = cube_with(vec![cap("cap:in=*;out=*;op=convert", "Generic")]);
        let request = CapUrn::parse("cap:in=*;out=*").expect("urn");
        let best = cube.find_best_cap_set(&request).expect("match");
        assert_eq!(best.cap.title(), "Generic");
        assert_eq!(best.registry_name, "main");
    }

    /// The most specific matching cap wins.
    #[test]
    fn test_find_best_prefers_specificity() {
        let generic = cap("cap:in=*;out=*;op=convert", "Generic");
        let specific = cap(
            r#"cap:in="media:bytes;pdf";out="media:md;textable";op=convert"#,
            "Specific",
        );
        let cube = cube_with(vec![generic, specific]);

        let request = CapUrn::parse("cap:in=*;out=*;op=convert").expect("urn");
        let best = cube.find_best_cap_set(&request).expect("match");
        assert_eq!(best.cap.title(), "Specific");
        assert_eq!(best.registry_name, "main");
        assert!(best.specificity >= 3);
    }

    /// Ties go to the earlier registry.
    #[test]
    fn test_tie_breaks_by_registry_order() {
        let mut cube = CapCube::new();
        cube.add_registry(
            "first",
            Box::new(StaticRegistry::new(vec![cap("cap:in=*;out=*;op=x", "A")])),
        );
        cube.add_registry(
            "second",
            Box::new(StaticRegistry::new(vec![cap("cap:in=*;out=*;op=x", "B")])),
        );
        let request = CapUrn::parse("cap:in=*;out=*;op=x").expect("urn");
        let best = cube.find_best_cap_set(&request).expect("match");
        assert_eq!(best.cap.title(), "A");
        assert_eq!(best.registry_name, "first");
    }

    /// An unmatched request with concrete in/out reports `not_found`; the
    /// identity cap only answers requests its exact specs match.
    #[test]
    fn test_no_hosts_found() {
        let cube = cube_with(vec![cap("cap:in=*;out=*;op=convert", "Generic")]);
        let request =
            CapUrn::parse(r#"cap:in="media:bytes;wav";out=media:textable;op=transcribe"#)
                .expect("urn");
        let err = cube.find_best_cap_set(&request).expect_err("no match");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("no hosts found"));
    }

    /// Registry failures propagate verbatim.
    #[test]
    fn test_registry_error_propagates() {
        struct Failing;
        impl CapRegistry for Failing {
            fn cached_caps(&self) -> Result<Vec<Cap>, Error> {
                Err(Error::Registry {
                    message: "upstream offline".to_owned(),
                })
            }
        }
        let mut cube = CapCube::new();
        cube.add_registry("flaky", Box::new(Failing));
        let err = cube.all_caps().expect_err("propagates");
        assert_eq!(err.kind(), ErrorKind::RegistryError);
        assert!(err.to_string().contains("upstream offline"));
    }
}
