//! Resolving requested targets into a dependency graph.
//!
//! Resolution walks rule sets recursively: direct rules are accumulated
//! and merged, then meta rules are tried in reverse declaration order,
//! speculatively resolving each candidate's prerequisites and rejecting
//! the whole match if any of them fails.  Registration in the node map
//! is journaled so a rejected candidate leaves no partial graph entries.

use crate::graph::{File, Graph, Info, InfoId, Node, NodeId, ResolvedRule};
use crate::paths;
use crate::rules::{Attrs, MetaMatch, RuleSet};
use anyhow::{anyhow, bail};
use rustc_hash::FxHashMap;
use std::collections::HashSet;

/// A built graph plus the non-fatal diagnostics collected on the way.
#[derive(Debug)]
pub struct Resolution {
    pub graph: Graph,
    pub warnings: Vec<String>,
}

/// Build the dependency graph for the requested targets.  `updated` names
/// files externally declared as freshly modified.
pub fn build_graph(
    rulesets: &[RuleSet],
    targets: &[String],
    updated: &HashSet<String>,
) -> anyhow::Result<Resolution> {
    if targets.is_empty() {
        bail!("no target requested");
    }
    let mut b = Builder::new(rulesets, updated);
    let root = if targets.len() == 1 {
        b.resolve(&targets[0])?
    } else {
        b.synthesize_root(targets)?
    };
    b.check_cycles(root)?;
    Ok(Resolution {
        graph: Graph {
            nodes: b.nodes,
            infos: b.infos,
            root,
        },
        warnings: b.warnings,
    })
}

/// Snapshot of the builder's registration state, for rollback when a
/// speculative meta-rule candidate is rejected.
#[derive(Clone, Copy)]
struct Mark {
    nodes: usize,
    infos: usize,
    journal: usize,
}

struct Builder<'a> {
    rulesets: &'a [RuleSet],
    dir_index: FxHashMap<&'a str, usize>,
    updated: &'a HashSet<String>,
    nodes: Vec<Node>,
    infos: Vec<Info>,
    node_map: FxHashMap<String, NodeId>,
    /// Node-map keys in registration order; entries past a `Mark` are
    /// removed on rollback.
    journal: Vec<String>,
    /// Per (rule set, meta rule) application count along the current
    /// resolution path.  A meta rule applies at most once per path.
    meta_budget: Vec<Vec<u32>>,
    warnings: Vec<String>,
}

impl<'a> Builder<'a> {
    fn new(rulesets: &'a [RuleSet], updated: &'a HashSet<String>) -> Builder<'a> {
        let mut dir_index = FxHashMap::default();
        for (i, rs) in rulesets.iter().enumerate() {
            dir_index.entry(rs.dir.as_str()).or_insert(i);
        }
        Builder {
            rulesets,
            dir_index,
            updated,
            nodes: Vec::new(),
            infos: Vec::new(),
            node_map: FxHashMap::default(),
            journal: Vec::new(),
            meta_budget: rulesets.iter().map(|rs| vec![0; rs.metas().len()]).collect(),
            warnings: Vec::new(),
        }
    }

    fn mark(&self) -> Mark {
        Mark {
            nodes: self.nodes.len(),
            infos: self.infos.len(),
            journal: self.journal.len(),
        }
    }

    fn rollback(&mut self, mark: Mark) {
        for key in self.journal.drain(mark.journal..) {
            self.node_map.remove(&key);
        }
        self.nodes.truncate(mark.nodes);
        self.infos.truncate(mark.infos);
    }

    fn stat(&self, name: String) -> File {
        let mut file = File::stat(&name);
        if self.updated.contains(&file.name) {
            file.updated = true;
        }
        file
    }

    /// Resolve a (qualified) target name to a node, creating it and its
    /// whole prerequisite subtree on first sight.
    fn resolve(&mut self, target: &str) -> anyhow::Result<NodeId> {
        let target = paths::normalize(target);
        if let Some(&id) = self.node_map.get(&target) {
            return Ok(id);
        }

        // Find the owning rule set: an exact directory match is
        // authoritative; otherwise probe every search directory in listed
        // order with the target rewritten relative to it.
        let dir = paths::dir_of(&target);
        if let Some(&rs) = self.dir_index.get(dir) {
            let local = paths::relative_to(&self.rulesets[rs].dir, &target);
            return self.resolve_in(rs, &local, &target);
        }
        let mut last_err = None;
        for rs in 0..self.rulesets.len() {
            let local = paths::relative_to(&self.rulesets[rs].dir, &target);
            let mark = self.mark();
            match self.resolve_in(rs, &local, &target) {
                Ok(id) => return Ok(id),
                Err(err) => {
                    self.rollback(mark);
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("no rule to make target {:?}", target)))
    }

    fn resolve_in(&mut self, rs: usize, local: &str, target: &str) -> anyhow::Result<NodeId> {
        // Copy the shared reference out of self so rule borrows don't
        // conflict with the recursive mutation below.
        let rulesets: &'a [RuleSet] = self.rulesets;
        let ruleset = &rulesets[rs];
        let dir = ruleset.dir.clone();

        // Accumulate the direct rules registered for this exact name.
        // Prereq-only rules merge; a rule carrying a recipe becomes
        // canonical and overwrites what was accumulated before it.
        let mut targets = vec![local.to_string()];
        let mut prereqs: Vec<String> = Vec::new();
        let mut recipe: Vec<String> = Vec::new();
        let mut attrs = Attrs::default();
        let mut loc = None;
        let mut have_recipe = false;
        for rule in ruleset.directs_for(local) {
            if !rule.recipe.is_empty() {
                if have_recipe {
                    self.warnings.push(format!(
                        "{}: ambiguous recipe for target {:?}",
                        rule.loc, local
                    ));
                }
                have_recipe = true;
                targets = rule.targets.clone();
                prereqs = rule.prereqs.clone();
                recipe = rule.recipe.clone();
                attrs = rule.attrs;
                loc = Some(rule.loc.clone());
            } else {
                prereqs.extend(rule.prereqs.iter().cloned());
                attrs = attrs.union(rule.attrs);
                if loc.is_none() {
                    loc = Some(rule.loc.clone());
                }
            }
        }

        // No direct recipe: scan meta rules, most recently declared first.
        let mut meta: Option<MetaMatch> = None;
        if !have_recipe && !attrs.no_meta {
            for mi in (0..ruleset.metas().len()).rev() {
                if self.meta_budget[rs][mi] >= 1 {
                    continue;
                }
                let mrule = &rulesets[rs].metas()[mi];
                let m = match mrule.match_target(local) {
                    Some(m) => m,
                    None => continue,
                };
                let expanded: Vec<String> = mrule
                    .prereqs
                    .iter()
                    .map(|t| mrule.expand_prereq(t, &m))
                    .collect();

                // Speculatively resolve every candidate prerequisite; any
                // failure rejects this match and falls through to the next
                // meta rule.
                let mark = self.mark();
                self.meta_budget[rs][mi] += 1;
                let ok = expanded
                    .iter()
                    .all(|p| self.resolve(&paths::join(&dir, p)).is_ok());
                self.meta_budget[rs][mi] -= 1;
                if !ok {
                    self.rollback(mark);
                    continue;
                }

                prereqs.extend(expanded);
                recipe = mrule.recipe.clone();
                attrs = mrule.attrs;
                loc = Some(mrule.loc.clone());
                meta = Some(m);
                break;
            }
        }

        // Nothing produces this target: it has to already exist on disk.
        if recipe.is_empty() && prereqs.is_empty() && !attrs.virtual_ {
            if !File::stat(target).exists {
                bail!("no rule to make target {:?}", target);
            }
        }

        // Speculative prereq resolution may have registered this target
        // through a dependency loop; keep the first registration.
        if let Some(&id) = self.node_map.get(target) {
            return Ok(id);
        }

        let rule = ResolvedRule {
            targets,
            prereqs,
            recipe,
            attrs,
            loc,
        };

        // De-duplicate: if an equivalent rule was already built for any of
        // the same targets, share its record so the recipe runs once.
        for i in 0..self.infos.len() {
            let info = &self.infos[i];
            if info.dir == dir && info.rule.equiv(&rule) {
                return Ok(self.register(target, InfoId(i)));
            }
        }

        let outputs = if rule.attrs.virtual_ {
            Vec::new()
        } else {
            rule.targets
                .iter()
                .map(|t| self.stat(paths::join(&dir, t)))
                .collect()
        };
        let iid = InfoId(self.infos.len());
        self.infos
            .push(Info::new(rule, dir.clone(), meta, outputs));
        let id = self.register(target, iid);

        // Link prerequisites.  Meta-resolved ones hit the node map; direct
        // ones resolve here, and their failure is fatal.
        let prereq_names = self.infos[iid.index()].rule.prereqs.clone();
        let mut prereq_ids = Vec::with_capacity(prereq_names.len());
        for p in &prereq_names {
            prereq_ids.push(self.resolve(&paths::join(&dir, p))?);
        }
        self.infos[iid.index()].prereqs = prereq_ids;
        Ok(id)
    }

    fn register(&mut self, target: &str, info: InfoId) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            target: target.to_string(),
            info,
        });
        self.node_map.insert(target.to_string(), id);
        self.journal.push(target.to_string());
        id
    }

    /// Wrap several requested targets in one virtual root record.
    fn synthesize_root(&mut self, targets: &[String]) -> anyhow::Result<NodeId> {
        let mut prereq_ids = Vec::with_capacity(targets.len());
        for t in targets {
            prereq_ids.push(self.resolve(t)?);
        }
        let rule = ResolvedRule {
            targets: vec!["<request>".to_string()],
            prereqs: targets.to_vec(),
            recipe: Vec::new(),
            attrs: Attrs {
                virtual_: true,
                ..Attrs::default()
            },
            loc: None,
        };
        let iid = InfoId(self.infos.len());
        let mut info = Info::new(rule, String::new(), None, Vec::new());
        info.prereqs = prereq_ids;
        self.infos.push(info);
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            target: "<request>".to_string(),
            info: iid,
        });
        Ok(id)
    }

    /// Depth-first cycle check over the finished graph, using a transient
    /// on-path marker cleared on backtrack.
    fn check_cycles(&self, root: NodeId) -> anyhow::Result<()> {
        let mut on_path = vec![false; self.infos.len()];
        let mut done = vec![false; self.infos.len()];
        self.cycle_dfs(root, &mut on_path, &mut done)
    }

    fn cycle_dfs(
        &self,
        id: NodeId,
        on_path: &mut Vec<bool>,
        done: &mut Vec<bool>,
    ) -> anyhow::Result<()> {
        let iid = self.nodes[id.index()].info;
        if done[iid.index()] {
            return Ok(());
        }
        if on_path[iid.index()] {
            if !self.infos[iid.index()].prereqs.is_empty() {
                bail!(
                    "dependency cycle detected at target {:?}",
                    self.nodes[id.index()].target
                );
            }
            return Ok(());
        }
        on_path[iid.index()] = true;
        for &p in &self.infos[iid.index()].prereqs {
            self.cycle_dfs(p, on_path, done)?;
        }
        on_path[iid.index()] = false;
        done[iid.index()] = true;
        Ok(())
    }
}
