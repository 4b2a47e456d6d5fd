//! Recipe text expansion: substituting `$name` and `$(expr)` references
//! into plain strings.
//!
//! Expansion is best-effort: a reference that fails to resolve is kept
//! verbatim in the output and the scan continues, so one bad variable
//! still yields diagnostics for the rest of a recipe block.  The first
//! error encountered is reported after the whole string has been scanned.

use anyhow::anyhow;
use rustc_hash::FxHashMap;

/// The scripting-runtime collaborator: resolves variable and expression
/// references, and accepts per-rule context injected before expansion
/// (`input`, `output`, `match`, ...).
pub trait Scope {
    fn set_var(&mut self, name: &str, value: String);
    fn resolve_var(&mut self, name: &str) -> anyhow::Result<String>;
    fn resolve_expr(&mut self, expr: &str) -> anyhow::Result<String>;
}

/// Map-backed scope with no expression interpreter attached.
#[derive(Default)]
pub struct MapScope {
    vars: FxHashMap<String, String>,
}

impl MapScope {
    pub fn new() -> MapScope {
        MapScope::default()
    }
}

impl Scope for MapScope {
    fn set_var(&mut self, name: &str, value: String) {
        self.vars.insert(name.to_string(), value);
    }

    fn resolve_var(&mut self, name: &str) -> anyhow::Result<String> {
        self.vars
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("undefined variable {:?}", name))
    }

    fn resolve_expr(&mut self, expr: &str) -> anyhow::Result<String> {
        Err(anyhow!(
            "cannot evaluate {:?}: no expression interpreter attached",
            expr
        ))
    }
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Expand `$`-references in `text` against `scope`.
///
/// `$$` collapses to a literal `$`, or survives as `$$` when `keep_escape`
/// is set (so the result can go through a second expansion pass).  `$name`
/// resolves a variable; `$(expr)` tracks balanced parentheses and resolves
/// an expression.  Returns the fully scanned output together with the
/// first resolution error, if any.
pub fn expand(
    text: &str,
    scope: &mut dyn Scope,
    keep_escape: bool,
) -> (String, Option<anyhow::Error>) {
    let mut out = String::with_capacity(text.len());
    let mut first_err: Option<anyhow::Error> = None;

    let mut rest = text;
    loop {
        let pos = match rest.find('$') {
            Some(pos) => pos,
            None => {
                out.push_str(rest);
                break;
            }
        };
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];

        if let Some(tail) = rest.strip_prefix('$') {
            out.push_str(if keep_escape { "$$" } else { "$" });
            rest = tail;
        } else if rest.starts_with('(') {
            let mut depth = 0usize;
            let mut close = None;
            for (i, c) in rest.char_indices() {
                match c {
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            close = Some(i);
                            break;
                        }
                    }
                    _ => {}
                }
            }
            match close {
                None => {
                    if first_err.is_none() {
                        first_err = Some(anyhow!("unterminated expression in {:?}", text));
                    }
                    out.push('$');
                    out.push_str(rest);
                    break;
                }
                Some(close) => {
                    let expr = &rest[1..close];
                    match scope.resolve_expr(expr) {
                        Ok(v) => out.push_str(&v),
                        Err(e) => {
                            out.push_str("$(");
                            out.push_str(expr);
                            out.push(')');
                            if first_err.is_none() {
                                first_err = Some(e);
                            }
                        }
                    }
                    rest = &rest[close + 1..];
                }
            }
        } else {
            let len = rest.find(|c: char| !is_ident(c)).unwrap_or(rest.len());
            if len == 0 {
                // A lone sigil before a non-identifier is literal.
                out.push('$');
                continue;
            }
            let name = &rest[..len];
            match scope.resolve_var(name) {
                Ok(v) => out.push_str(&v),
                Err(e) => {
                    out.push('$');
                    out.push_str(name);
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
            rest = &rest[len..];
        }
    }

    (out, first_err)
}
