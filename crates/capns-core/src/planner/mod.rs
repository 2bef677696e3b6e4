/// The planner facade: conformance-driven path finding over a cap cube,
/// cardinality analysis, plan assembly, and argument analysis.
///
/// Planner-level path finding differs from the raw graph queries in one
/// critical way: node equality is replaced by media *conformance*. A state
/// URN expands through every cap whose input it conforms to, and the search
/// terminates as soon as the state conforms to the target. This is what lets
/// a concrete `media:png;bytes` source reach a `media:bytes` target with an
/// empty path, or traverse a cap declared for plain `media:bytes`.
///
/// The planner is a thin, synchronous facade: it loads a cap snapshot from
/// the injected [`CapCube`], indexes it once, and answers queries against
/// the immutable index. Determinism follows from the fixed expansion order
/// (cap inputs sorted by descending specificity, registry order within
/// ties).
pub mod arguments;

pub use arguments::{ArgResolution, ArgumentAnalysis, ArgumentInfo, SlotRequirement, StepArguments};

use std::collections::{HashSet, VecDeque};

use crate::binding::ResolvedFile;
use crate::cap::Cap;
use crate::cap_urn::{CapUrn, IoSpec};
use crate::cardinality::{CardinalityAnalysis, analyze_cardinality};
use crate::error::{Component, Error};
use crate::graph::DEFAULT_MAX_DEPTH;
use crate::media::MediaUrn;
use crate::plan::{ChainStep, Plan, build_plan};
use crate::registry::CapCube;

/// Options controlling a planner instance.
#[derive(Debug, Clone, Default)]
pub struct PlannerOptions {
    /// When set, only caps whose canonical URN is in this set participate.
    pub available: Option<HashSet<String>>,
    /// Depth bound for all-paths enumeration and reachability; `None` uses
    /// [`DEFAULT_MAX_DEPTH`].
    pub max_depth: Option<usize>,
}

/// One expansion edge of the planner index.
#[derive(Debug, Clone)]
struct PlannerEdge {
    cap: Cap,
    registry_name: String,
    out: MediaUrn,
}

/// The planner's immutable cap index: cap-input URNs sorted by descending
/// specificity, each with the edges departing from it.
#[derive(Debug)]
struct PlannerIndex {
    by_input: Vec<(MediaUrn, Vec<PlannerEdge>)>,
}

fn io_media(spec: &IoSpec) -> MediaUrn {
    match spec {
        IoSpec::Wildcard => MediaUrn::wildcard(),
        IoSpec::Media(urn) => urn.clone(),
    }
}

impl PlannerIndex {
    fn build(caps: Vec<(String, Cap)>, available: Option<&HashSet<String>>) -> Result<Self, Error> {
        let mut by_input: Vec<(MediaUrn, Vec<PlannerEdge>)> = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();

        for (registry_name, cap) in caps {
            if let Some(filter) = available {
                if !filter.contains(&cap.urn().canonical()) {
                    continue;
                }
            }
            let input = io_media(cap.in_spec());
            let input_canonical = input.canonical();
            let cap_urn = cap.urn().canonical();
            if !seen.insert((input_canonical.clone(), cap_urn.clone())) {
                return Err(Error::Internal {
                    component: Component::PathFinder,
                    message: format!(
                        "Duplicate cap_urn {cap_urn} at {input_canonical} indicates stale caps"
                    ),
                });
            }

            let edge = PlannerEdge {
                out: io_media(cap.out_spec()),
                cap,
                registry_name,
            };
            match by_input
                .iter_mut()
                .find(|(existing, _)| existing.canonical() == input_canonical)
            {
                Some((_, edges)) => edges.push(edge),
                None => by_input.push((input, vec![edge])),
            }
        }

        // More specific inputs expand first; the sort is stable, so equal
        // specificities keep registry order.
        by_input.sort_by(|(a, _), (b, _)| b.specificity().cmp(&a.specificity()));

        Ok(Self { by_input })
    }

    /// The edges whose input the state URN conforms to, in index order.
    fn expansions<'i>(&'i self, state: &MediaUrn) -> Vec<&'i PlannerEdge> {
        let mut edges = Vec::new();
        for (input, input_edges) in &self.by_input {
            if state.conforms_to(input) {
                edges.extend(input_edges.iter());
            }
        }
        edges
    }
}

/// One reachable conversion target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReachableTarget {
    /// The reachable media URN.
    pub media_urn: MediaUrn,
    /// Fewest hops to reach it.
    pub min_depth: usize,
    /// Most hops over any simple path within the depth bound.
    pub max_depth: usize,
}

/// A capability-composition planner over one registry snapshot.
pub struct Planner<'a> {
    cube: &'a CapCube,
    options: PlannerOptions,
}

impl<'a> Planner<'a> {
    /// Creates a planner with default options.
    pub fn new(cube: &'a CapCube) -> Self {
        Self {
            cube,
            options: PlannerOptions::default(),
        }
    }

    /// Creates a planner with explicit options.
    pub fn with_options(cube: &'a CapCube, options: PlannerOptions) -> Self {
        Self { cube, options }
    }

    fn max_depth(&self) -> usize {
        self.options.max_depth.unwrap_or(DEFAULT_MAX_DEPTH)
    }

    fn index(&self) -> Result<PlannerIndex, Error> {
        PlannerIndex::build(self.cube.all_caps()?, self.options.available.as_ref())
    }

    /// Finds the shortest cap sequence converting `source` into `target`.
    ///
    /// Returns the empty path when `source` already conforms to `target`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] when no sequence exists.
    /// - [`Error::Internal`] on duplicate registry data.
    /// - [`Error::Registry`] from the cube.
    pub fn find_path(&self, source: &MediaUrn, target: &MediaUrn) -> Result<Vec<CapUrn>, Error> {
        let steps = self.find_chain(source, target)?;
        Ok(steps.iter().map(|step| step.cap.urn().clone()).collect())
    }

    /// The path search, returning full chain steps for plan assembly.
    fn find_chain(&self, source: &MediaUrn, target: &MediaUrn) -> Result<Vec<ChainStep>, Error> {
        if source.conforms_to(target) {
            return Ok(Vec::new());
        }
        let index = self.index()?;

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(MediaUrn, Vec<ChainStep>)> = VecDeque::new();
        visited.insert(source.canonical());
        queue.push_back((source.clone(), Vec::new()));

        while let Some((state, path)) = queue.pop_front() {
            if state.conforms_to(target) {
                return Ok(path);
            }
            for edge in index.expansions(&state) {
                let reached = edge.out.canonical();
                if !visited.insert(reached) {
                    continue;
                }
                let mut extended = path.clone();
                extended.push(ChainStep::new(edge.cap.clone(), &edge.registry_name));
                queue.push_back((edge.out.clone(), extended));
            }
        }

        Err(Error::NotFound {
            component: Component::PathFinder,
            message: format!(
                "no path from {} to {}",
                source.canonical(),
                target.canonical()
            ),
        })
    }

    /// Enumerates all simple cap sequences from `source` to `target`, up to
    /// `max_depth` steps, sorted ascending by length.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] on duplicate registry data; [`Error::Registry`]
    /// from the cube. An empty result is not an error.
    pub fn find_all_paths(
        &self,
        source: &MediaUrn,
        target: &MediaUrn,
        max_depth: usize,
    ) -> Result<Vec<Vec<CapUrn>>, Error> {
        if source.conforms_to(target) {
            return Ok(vec![Vec::new()]);
        }
        let index = self.index()?;

        let mut results: Vec<Vec<CapUrn>> = Vec::new();
        let mut path: Vec<CapUrn> = Vec::new();
        let mut on_path: HashSet<String> = HashSet::new();
        on_path.insert(source.canonical());

        fn dfs(
            index: &PlannerIndex,
            state: &MediaUrn,
            target: &MediaUrn,
            depth_limit: usize,
            path: &mut Vec<CapUrn>,
            on_path: &mut HashSet<String>,
            results: &mut Vec<Vec<CapUrn>>,
        ) {
            if path.len() >= depth_limit {
                return;
            }
            for edge in index.expansions(state) {
                let reached = edge.out.canonical();
                path.push(edge.cap.urn().clone());
                if edge.out.conforms_to(target) {
                    results.push(path.clone());
                    path.pop();
                    continue;
                }
                if on_path.contains(&reached) {
                    path.pop();
                    continue;
                }
                on_path.insert(reached.clone());
                dfs(index, &edge.out, target, depth_limit, path, on_path, results);
                on_path.remove(&reached);
                path.pop();
            }
        }

        dfs(
            &index,
            source,
            target,
            max_depth,
            &mut path,
            &mut on_path,
            &mut results,
        );

        results.sort_by_key(Vec::len);
        Ok(results)
    }

    /// Every media URN reachable from `source`, with minimum and maximum
    /// simple-path depths within the bound.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] on duplicate registry data; [`Error::Registry`]
    /// from the cube.
    pub fn get_reachable_targets(
        &self,
        source: &MediaUrn,
        max_depth: Option<usize>,
    ) -> Result<Vec<ReachableTarget>, Error> {
        let depth_limit = max_depth.unwrap_or_else(|| self.max_depth());
        let index = self.index()?;

        // (canonical, min_depth, max_depth) in first-reached order.
        let mut reached: Vec<(MediaUrn, usize, usize)> = Vec::new();
        let mut on_path: HashSet<String> = HashSet::new();
        on_path.insert(source.canonical());

        fn dfs(
            index: &PlannerIndex,
            state: &MediaUrn,
            depth: usize,
            depth_limit: usize,
            on_path: &mut HashSet<String>,
            reached: &mut Vec<(MediaUrn, usize, usize)>,
        ) {
            if depth >= depth_limit {
                return;
            }
            for edge in index.expansions(state) {
                let canonical = edge.out.canonical();
                if on_path.contains(&canonical) {
                    continue;
                }
                let this_depth = depth + 1;
                match reached
                    .iter_mut()
                    .find(|(urn, _, _)| urn.canonical() == canonical)
                {
                    Some((_, min_depth, max_depth)) => {
                        *min_depth = (*min_depth).min(this_depth);
                        *max_depth = (*max_depth).max(this_depth);
                    }
                    None => reached.push((edge.out.clone(), this_depth, this_depth)),
                }
                on_path.insert(canonical.clone());
                dfs(index, &edge.out, this_depth, depth_limit, on_path, reached);
                on_path.remove(&canonical);
            }
        }

        dfs(&index, source, 0, depth_limit, &mut on_path, &mut reached);

        Ok(reached
            .into_iter()
            .map(|(media_urn, min_depth, max_depth)| ReachableTarget {
                media_urn,
                min_depth,
                max_depth,
            })
            .collect())
    }

    /// The plain-URN view of [`Planner::get_reachable_targets`].
    ///
    /// # Errors
    ///
    /// Those of [`Planner::get_reachable_targets`].
    pub fn get_reachable_media(
        &self,
        source: &MediaUrn,
        max_depth: Option<usize>,
    ) -> Result<Vec<MediaUrn>, Error> {
        Ok(self
            .get_reachable_targets(source, max_depth)?
            .into_iter()
            .map(|target| target.media_urn)
            .collect())
    }

    /// Classifies the cardinality of the path from `source` to `target`.
    ///
    /// The input cardinality is derived from the source media alone (one
    /// input value assumed); [`Planner::build_plan`] re-derives it from the
    /// actual file list.
    ///
    /// # Errors
    ///
    /// Those of [`Planner::find_path`].
    pub fn analyze_path_cardinality(
        &self,
        source: &MediaUrn,
        target: &MediaUrn,
    ) -> Result<CardinalityAnalysis, Error> {
        let chain = self.find_chain(source, target)?;
        let caps: Vec<Cap> = chain.into_iter().map(|step| step.cap).collect();
        Ok(analyze_cardinality(source, 1, &caps))
    }

    /// Plans the conversion of `input_files` from `source` to `target`.
    ///
    /// Finds the shortest conforming path, resolves each step against the
    /// cube's best match, analyzes cardinality, and emits a validated plan.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] — no path, or a step's cap vanished from the
    ///   registry between path finding and plan assembly.
    /// - [`Error::Internal`] — duplicate registry data or an inconsistent
    ///   emitted plan.
    /// - [`Error::Registry`] — from the cube.
    pub fn build_plan(
        &self,
        source: &MediaUrn,
        target: &MediaUrn,
        input_files: &[ResolvedFile],
    ) -> Result<Plan, Error> {
        let mut chain = self.find_chain(source, target)?;

        // Re-resolve each step against the registry's best match so a more
        // specific cap, when one exists, is recorded as preferred.
        for step in &mut chain {
            let best = self.cube.find_best_cap_set(step.cap.urn())?;
            if best.cap.urn() != step.cap.urn() {
                step.preferred_cap = Some(best.cap.urn().canonical());
            }
            step.registry_name = best.registry_name;
        }

        let caps: Vec<Cap> = chain.iter().map(|step| step.cap.clone()).collect();
        let analysis = analyze_cardinality(source, input_files.len(), &caps);
        build_plan(source, target, &chain, &analysis, input_files)
    }

    /// Analyzes how each argument of each path step will be resolved.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when a path cap is absent from the registry;
    /// [`Error::Registry`] from the cube.
    pub fn analyze_path_arguments(&self, path: &[CapUrn]) -> Result<ArgumentAnalysis, Error> {
        arguments::analyze_path_arguments(self.cube, path)
    }
}
