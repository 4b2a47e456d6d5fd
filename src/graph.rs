//! The build graph: nodes resolved from rules, the shared execution
//! records behind them, and cached file state.
//!
//! A `Node` is one resolved build request ("make target T").  Several
//! nodes can share one `Info`, the rule-execution record, when they
//! resolve to an equivalent underlying rule: the recipe then runs once
//! and every waiter observes the same outcome.

use crate::eval::{self, Scope};
use crate::rules::{Attrs, FileLoc, MetaMatch};
use std::sync::{Condvar, Mutex};
use std::time::SystemTime;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct NodeId(pub(crate) usize);
impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct InfoId(pub(crate) usize);
impl InfoId {
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

/// A filesystem path with cached stat state.
#[derive(Debug, Clone)]
pub struct File {
    pub name: String,
    pub mtime: Option<SystemTime>,
    pub exists: bool,
    /// Externally declared as freshly modified; forces dependents to
    /// rebuild regardless of hashes or timestamps.
    pub updated: bool,
}

impl File {
    pub fn stat(name: &str) -> File {
        match std::fs::metadata(name) {
            Ok(meta) => File {
                name: name.to_string(),
                mtime: meta.modified().ok(),
                exists: true,
                updated: false,
            },
            Err(_) => File {
                name: name.to_string(),
                mtime: None,
                exists: false,
                updated: false,
            },
        }
    }

    /// Re-stat after a recipe ran.
    pub fn refresh(&mut self) {
        let updated = self.updated;
        *self = File::stat(&self.name);
        self.updated = updated;
    }
}

/// The effective rule a target resolved to, after direct/meta merging.
/// Target and prerequisite names are local to the owning directory.
#[derive(Debug, Clone)]
pub struct ResolvedRule {
    pub targets: Vec<String>,
    pub prereqs: Vec<String>,
    /// Unexpanded recipe text; the materialized commands live in
    /// `InfoState::recipe`.
    pub recipe: Vec<String>,
    pub attrs: Attrs,
    pub loc: Option<FileLoc>,
}

impl ResolvedRule {
    /// Semantic equality, ignoring source location.
    pub fn equiv(&self, other: &ResolvedRule) -> bool {
        self.targets == other.targets
            && self.prereqs == other.prereqs
            && self.recipe == other.recipe
            && self.attrs == other.attrs
    }
}

/// Executor-visible lifecycle of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Unresolved,
    Queued,
    Done,
}

/// Why a record was (or wasn't) considered stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// The rule carries the rebuild attribute.
    Rebuild,
    /// A declared output is missing from disk.
    NoExist,
    /// A prerequisite's output was externally marked updated.
    ForceUpdate,
    /// No fingerprint recorded for this rule application yet.
    Untracked,
    /// A prerequisite's content fingerprint changed.
    HashModified,
    /// A prerequisite is newer than our outputs.
    TimeModified,
    /// The recipe text changed since it last ran.
    RecipeModified,
    /// A prerequisite needs to rebuild.
    Prereq,
    UpToDate,
}

impl Reason {
    pub fn stale(self) -> bool {
        !matches!(self, Reason::UpToDate)
    }
}

/// Everything execution mutates, behind the record's lock.
#[derive(Debug)]
pub struct InfoState {
    pub outputs: Vec<File>,
    /// Materialized (expanded) recipe commands.
    pub recipe: Vec<String>,
    pub status: Status,
    pub failed: bool,
    /// Traversal has claimed this record (guards double enqueue when the
    /// record is shared by several nodes).
    pub visited: bool,
    /// Staleness memo, computed at most once per run.
    pub stale: Option<Reason>,
}

/// A shared rule-execution record.  Topology is immutable after
/// resolution; `state` is mutated during execution and `cond` broadcasts
/// completion to all waiting dependents.
#[derive(Debug)]
pub struct Info {
    pub rule: ResolvedRule,
    /// The directory the recipe runs in (the owning rule set's dir).
    pub dir: String,
    pub prereqs: Vec<NodeId>,
    pub meta: Option<MetaMatch>,
    pub state: Mutex<InfoState>,
    pub cond: Condvar,
}

impl Info {
    pub(crate) fn new(
        rule: ResolvedRule,
        dir: String,
        meta: Option<MetaMatch>,
        outputs: Vec<File>,
    ) -> Info {
        Info {
            rule,
            dir,
            prereqs: Vec::new(),
            meta,
            state: Mutex::new(InfoState {
                outputs,
                recipe: Vec::new(),
                status: Status::Unresolved,
                failed: false,
                visited: false,
                stale: None,
            }),
            cond: Condvar::new(),
        }
    }

    /// A display name for progress reporting.
    pub fn name(&self) -> &str {
        self.rule.targets.first().map(|t| t.as_str()).unwrap_or("?")
    }
}

/// One resolved build request, pointing at its shared record.
#[derive(Debug)]
pub struct Node {
    pub target: String,
    pub info: InfoId,
}

#[derive(Debug)]
pub struct Graph {
    pub(crate) nodes: Vec<Node>,
    pub(crate) infos: Vec<Info>,
    pub root: NodeId,
}

impl Graph {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn info(&self, id: InfoId) -> &Info {
        &self.infos[id.index()]
    }

    pub fn node_info(&self, id: NodeId) -> &Info {
        self.info(self.nodes[id.index()].info)
    }

    pub fn all_infos(&self) -> impl Iterator<Item = InfoId> {
        (0..self.infos.len()).map(InfoId)
    }

    /// Materialize every record's recipe, injecting the per-rule context
    /// variables before each expansion pass.  Failed references are left
    /// verbatim; the collected errors are returned and are not fatal.
    pub fn expand_recipes(&self, scope: &mut dyn Scope) -> Vec<anyhow::Error> {
        let mut errs = Vec::new();
        for info in &self.infos {
            let rule = &info.rule;
            if rule.recipe.is_empty() {
                continue;
            }
            scope.set_var(
                "output",
                rule.targets.first().cloned().unwrap_or_default(),
            );
            scope.set_var("outputs", rule.targets.join(" "));
            scope.set_var("input", rule.prereqs.first().cloned().unwrap_or_default());
            scope.set_var("inputs", rule.prereqs.join(" "));
            if let Some(m) = &info.meta {
                scope.set_var("match", m.stem().to_string());
                scope.set_var("matches", m.captures[1..].join(" "));
                for (i, cap) in m.captures.iter().enumerate() {
                    scope.set_var(&format!("match{}", i), cap.clone());
                }
            }
            let mut commands = Vec::with_capacity(rule.recipe.len());
            for line in &rule.recipe {
                let (expanded, err) = eval::expand(line, scope, false);
                if let Some(err) = err {
                    errs.push(match &rule.loc {
                        Some(loc) => err.context(format!("{}", loc)),
                        None => err,
                    });
                }
                commands.push(expanded);
            }
            info.state.lock().unwrap().recipe = commands;
        }
        errs
    }
}
