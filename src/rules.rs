//! The rule model: direct rules, pattern ("meta") rules, and their
//! attributes.  Rules are immutable once constructed; the resolver in
//! `resolve.rs` merges them into effective per-target rules.

use anyhow::bail;
use regex::Regex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Where a rule came from, for error messages.  Shared across threads by
/// the executor, hence Arc.
#[derive(Debug, Clone)]
pub struct FileLoc {
    pub filename: Arc<String>,
    pub line: usize,
}

impl FileLoc {
    pub fn new(filename: impl Into<String>, line: usize) -> Self {
        FileLoc {
            filename: Arc::new(filename.into()),
            line,
        }
    }
}

impl fmt::Display for FileLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.line)
    }
}

/// Per-rule behavior flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attrs {
    /// Patterns are full regular expressions rather than % wildcards.
    pub regex: bool,
    /// The rule produces no filesystem output (a named action).
    pub virtual_: bool,
    /// Don't print the recipe's commands as they run.
    pub quiet: bool,
    /// Never apply meta rules to this rule's targets.
    pub no_meta: bool,
    /// Always considered stale.
    pub rebuild: bool,
    /// Forced to rebuild whenever it is visited.
    pub linked: bool,
    /// The recipe runs serialized against every other recipe.
    pub exclusive: bool,
    /// Keep running the remaining commands after one fails.
    pub non_stop: bool,
}

impl Attrs {
    pub fn union(self, other: Attrs) -> Attrs {
        Attrs {
            regex: self.regex || other.regex,
            virtual_: self.virtual_ || other.virtual_,
            quiet: self.quiet || other.quiet,
            no_meta: self.no_meta || other.no_meta,
            rebuild: self.rebuild || other.rebuild,
            linked: self.linked || other.linked,
            exclusive: self.exclusive || other.exclusive,
            non_stop: self.non_stop || other.non_stop,
        }
    }
}

/// Parse a string of single-letter rule attributes.
pub fn parse_attrs(letters: &str) -> anyhow::Result<Attrs> {
    let mut attrs = Attrs::default();
    for ch in letters.chars() {
        match ch {
            'R' => attrs.regex = true,
            'V' => attrs.virtual_ = true,
            'Q' => attrs.quiet = true,
            'M' => attrs.no_meta = true,
            'B' => attrs.rebuild = true,
            'L' => attrs.linked = true,
            'X' => attrs.exclusive = true,
            'E' => attrs.non_stop = true,
            _ => bail!("unrecognized attribute {:?}", ch),
        }
    }
    Ok(attrs)
}

/// A meta-rule target pattern, compiled once at construction.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// A single-% wildcard, e.g. "%.o".  Matches via a synthesized regex
    /// anchored around the literal prefix/suffix.
    Suffix {
        prefix: String,
        suffix: String,
        rx: Regex,
    },
    /// A full regular expression target pattern.
    Regex(Regex),
}

impl Pattern {
    pub fn suffix(pat: &str) -> anyhow::Result<Pattern> {
        let pos = match pat.find('%') {
            Some(pos) => pos,
            None => bail!("pattern {:?} has no % wildcard", pat),
        };
        if pat[pos + 1..].contains('%') {
            bail!("pattern {:?} has more than one % wildcard", pat);
        }
        let (prefix, suffix) = (&pat[..pos], &pat[pos + 1..]);
        let rx = Regex::new(&format!(
            "^{}(.*){}$",
            regex::escape(prefix),
            regex::escape(suffix)
        ))?;
        Ok(Pattern::Suffix {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            rx,
        })
    }

    pub fn regex(pat: &str) -> anyhow::Result<Pattern> {
        Ok(Pattern::Regex(Regex::new(pat)?))
    }

    fn rx(&self) -> &Regex {
        match self {
            Pattern::Suffix { rx, .. } => rx,
            Pattern::Regex(rx) => rx,
        }
    }

    /// Match a target name, returning all capture groups (0 = whole match).
    pub fn match_target(&self, target: &str) -> Option<Vec<String>> {
        self.rx().captures(target).map(|caps| {
            caps.iter()
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect()
        })
    }
}

/// The captures of a successful meta-rule match against one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaMatch {
    /// The matching pattern was a % wildcard rather than a regex.
    pub suffix: bool,
    /// Capture 0 is the whole target; capture 1 is the stem for % patterns.
    pub captures: Vec<String>,
}

impl MetaMatch {
    pub fn stem(&self) -> &str {
        self.captures.get(1).map(|s| s.as_str()).unwrap_or("")
    }
}

/// A rule with exact, literal target names.
#[derive(Debug, Clone)]
pub struct DirectRule {
    pub targets: Vec<String>,
    pub prereqs: Vec<String>,
    pub recipe: Vec<String>,
    pub attrs: Attrs,
    pub loc: FileLoc,
}

/// A rule whose targets are patterns matched against requested names.
#[derive(Debug, Clone)]
pub struct MetaRule {
    pub patterns: Vec<Pattern>,
    pub prereqs: Vec<String>,
    pub recipe: Vec<String>,
    pub attrs: Attrs,
    pub loc: FileLoc,
}

impl MetaRule {
    /// Try every pattern against a target name.
    pub fn match_target(&self, target: &str) -> Option<MetaMatch> {
        for pat in &self.patterns {
            if let Some(captures) = pat.match_target(target) {
                return Some(MetaMatch {
                    suffix: matches!(pat, Pattern::Suffix { .. }),
                    captures,
                });
            }
        }
        None
    }

    /// Substitute a match's captures into a prerequisite template.
    /// For % patterns every % becomes the stem; for regex patterns %N
    /// (N in 1..=9) becomes capture N and a bare % becomes capture 1.
    /// %% is a literal percent in both kinds.
    pub fn expand_prereq(&self, template: &str, m: &MetaMatch) -> String {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.peek() {
                Some('%') => {
                    chars.next();
                    out.push('%');
                }
                Some(&d @ '1'..='9') if !m.suffix => {
                    chars.next();
                    let idx = d.to_digit(10).unwrap() as usize;
                    if let Some(cap) = m.captures.get(idx) {
                        out.push_str(cap);
                    }
                }
                _ => out.push_str(m.stem()),
            }
        }
        out
    }
}

/// Either kind of rule.  A closed sum: the resolver branches exhaustively.
#[derive(Debug, Clone)]
pub enum Rule {
    Direct(DirectRule),
    Meta(MetaRule),
}

/// All rules for one directory scope.  Direct rules are indexed by every
/// target name (a target may be produced by several accumulating rules);
/// meta rules keep declaration order, with later declarations matching
/// first.
pub struct RuleSet {
    pub dir: String,
    directs: Vec<DirectRule>,
    metas: Vec<MetaRule>,
    target_index: FxHashMap<String, Vec<usize>>,
}

impl RuleSet {
    pub fn new(dir: impl Into<String>) -> RuleSet {
        RuleSet {
            dir: dir.into(),
            directs: Vec::new(),
            metas: Vec::new(),
            target_index: FxHashMap::default(),
        }
    }

    pub fn add(&mut self, rule: Rule) {
        match rule {
            Rule::Direct(rule) => {
                let idx = self.directs.len();
                for target in &rule.targets {
                    self.target_index
                        .entry(target.clone())
                        .or_default()
                        .push(idx);
                }
                self.directs.push(rule);
            }
            Rule::Meta(rule) => self.metas.push(rule),
        }
    }

    /// Direct rules registered for an exact target name, declaration order.
    pub fn directs_for<'s>(&'s self, target: &str) -> impl Iterator<Item = &'s DirectRule> + 's {
        self.target_index
            .get(target)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |&i| &self.directs[i])
    }

    pub fn metas(&self) -> &[MetaRule] {
        &self.metas
    }
}
