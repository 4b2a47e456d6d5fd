//! Rule sets scoped to different directories.

use super::*;
use mek::work::BuildOpts;

#[test]
fn prereq_resolves_in_subdirectory_ruleset() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut root = space.ruleset();
    root.add(rule(&["out"], &["sub/dep"], &["cp sub/dep out"]));
    let mut sub = space.subset("sub");
    sub.add(rule(&["dep"], &[], &["echo dep > dep"]));

    assert_eq!(space.build(&[root, sub], "out", BuildOpts::default())?, 2);
    assert_eq!(space.read("out")?, b"dep\n");
    // The subdirectory recipe ran in its own directory.
    assert!(space.exists("sub/dep"));
    Ok(())
}

#[test]
fn unowned_directory_probes_listed_rulesets() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    // No rule set owns the "build" directory; the root rule set resolves
    // the target via its relative name.
    let mut root = space.ruleset();
    root.add(rule(
        &["build/lib.a"],
        &[],
        &["mkdir -p build && echo lib > build/lib.a"],
    ));
    assert_eq!(space.build(&[root], "build/lib.a", BuildOpts::default())?, 1);
    assert!(space.exists("build/lib.a"));
    Ok(())
}

#[test]
fn subdirectory_meta_rule_applies() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut sub = space.subset("sub");
    space.write("sub/foo.c", "src")?;
    sub.add(meta("%.o", &["%.c"], &["cp $input $output"]));
    let root = space.ruleset();

    assert_eq!(
        space.build(&[root, sub], "sub/foo.o", BuildOpts::default())?,
        1
    );
    assert_eq!(space.read("sub/foo.o")?, b"src");
    Ok(())
}
