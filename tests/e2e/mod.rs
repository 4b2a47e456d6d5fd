//! Support code for e2e tests, which run full builds in a temp directory.

mod basic;
mod directories;
mod parallel;

use mek::db::Db;
use mek::eval::MapScope;
use mek::progress::NullPrinter;
use mek::resolve::{self, Resolution};
use mek::rules::{Attrs, DirectRule, FileLoc, MetaRule, Pattern, Rule, RuleSet};
use mek::work::{BuildOpts, Work};
use std::collections::HashSet;

pub fn loc() -> FileLoc {
    FileLoc::new("mekfile", 1)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// A direct rule with default attributes.
pub fn rule(targets: &[&str], prereqs: &[&str], recipe: &[&str]) -> Rule {
    rule_attrs(targets, prereqs, recipe, Attrs::default())
}

pub fn rule_attrs(targets: &[&str], prereqs: &[&str], recipe: &[&str], attrs: Attrs) -> Rule {
    Rule::Direct(DirectRule {
        targets: strings(targets),
        prereqs: strings(prereqs),
        recipe: strings(recipe),
        attrs,
        loc: loc(),
    })
}

pub fn virtual_rule(targets: &[&str], prereqs: &[&str], recipe: &[&str]) -> Rule {
    rule_attrs(
        targets,
        prereqs,
        recipe,
        Attrs {
            virtual_: true,
            ..Attrs::default()
        },
    )
}

/// A suffix-pattern meta rule with default attributes.
pub fn meta(pattern: &str, prereqs: &[&str], recipe: &[&str]) -> Rule {
    Rule::Meta(MetaRule {
        patterns: vec![Pattern::suffix(pattern).unwrap()],
        prereqs: strings(prereqs),
        recipe: strings(recipe),
        attrs: Attrs::default(),
        loc: loc(),
    })
}

/// Manages a temporary directory for running builds.
pub struct TestSpace {
    dir: tempfile::TempDir,
}

impl TestSpace {
    pub fn new() -> anyhow::Result<TestSpace> {
        Ok(TestSpace {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn root(&self) -> String {
        self.dir.path().to_str().unwrap().to_string()
    }

    /// A rule set rooted at the space's directory.
    pub fn ruleset(&self) -> RuleSet {
        RuleSet::new(self.root())
    }

    /// A rule set for a subdirectory, creating it on disk.
    pub fn subset(&self, sub: &str) -> RuleSet {
        let dir = self.dir.path().join(sub);
        std::fs::create_dir_all(&dir).unwrap();
        RuleSet::new(dir.to_str().unwrap())
    }

    /// Write a file into the working space.
    pub fn write(&self, path: &str, content: &str) -> std::io::Result<()> {
        std::fs::write(self.dir.path().join(path), content)
    }

    /// Read a file from the working space.
    pub fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.dir.path().join(path))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.dir.path().join(path).exists()
    }

    pub fn remove(&self, path: &str) -> std::io::Result<()> {
        std::fs::remove_file(self.dir.path().join(path))
    }

    pub fn resolve_updated(
        &self,
        rulesets: &[RuleSet],
        target: &str,
        updated: &[&str],
    ) -> anyhow::Result<Resolution> {
        let qualified = format!("{}/{}", self.root(), target);
        let updated: HashSet<String> = updated
            .iter()
            .map(|p| format!("{}/{}", self.root(), p))
            .collect();
        resolve::build_graph(rulesets, &[qualified], &updated)
    }

    /// Resolve, expand, and execute one target.  Returns the number of
    /// recipes that ran.
    pub fn build(
        &self,
        rulesets: &[RuleSet],
        target: &str,
        opts: BuildOpts,
    ) -> anyhow::Result<usize> {
        self.build_updated(rulesets, target, opts, &[])
    }

    pub fn build_updated(
        &self,
        rulesets: &[RuleSet],
        target: &str,
        opts: BuildOpts,
        updated: &[&str],
    ) -> anyhow::Result<usize> {
        let res = self.resolve_updated(rulesets, target, updated)?;
        res.graph.expand_recipes(&mut MapScope::new());
        let mut db = Db::open(&self.dir.path().join(".mek"));
        Work::new(&res.graph, &mut db, &NullPrinter, opts).run()
    }
}
