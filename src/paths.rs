//! Lexical path manipulation for target names.
//!
//! Targets and prerequisites are plain strings qualified against a rule
//! set's directory.  All of this is lexical: "foo/./bar" => "foo/bar"
//! without touching the disk.  Such paths show up via variable expansion
//! and pattern substitution in particular.

/// Lexically normalize a path, removing `.` components, doubled slashes,
/// and `..` where a parent component is available to cancel.
pub fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                if parts.last().map_or(false, |&p| p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            _ => parts.push(comp),
        }
    }
    let mut out = String::with_capacity(path.len());
    if absolute {
        out.push('/');
    }
    out.push_str(&parts.join("/"));
    out
}

/// Qualify `name` against `dir`.  An absolute name ignores `dir`.
pub fn join(dir: &str, name: &str) -> String {
    if name.starts_with('/') || dir.is_empty() {
        normalize(name)
    } else {
        normalize(&format!("{}/{}", dir, name))
    }
}

/// The directory component of a target name, "" if it has none.
pub fn dir_of(target: &str) -> &str {
    match target.rfind('/') {
        Some(0) => "/",
        Some(pos) => &target[..pos],
        None => "",
    }
}

/// Rewrite `target` relative to `dir`.  Both must be normalized and share
/// the same root form (both relative to the same point, or both absolute).
pub fn relative_to(dir: &str, target: &str) -> String {
    if dir.is_empty() {
        return target.to_string();
    }
    let d: Vec<&str> = dir.split('/').filter(|c| !c.is_empty()).collect();
    let t: Vec<&str> = target.split('/').filter(|c| !c.is_empty()).collect();
    let common = d.iter().zip(t.iter()).take_while(|(a, b)| a == b).count();
    let mut parts: Vec<&str> = Vec::new();
    for _ in common..d.len() {
        parts.push("..");
    }
    parts.extend(&t[common..]);
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}
