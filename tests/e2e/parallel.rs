//! Scheduling: shared records run once, and single-threaded runs are
//! deterministic.

use super::*;
use mek::work::BuildOpts;

#[test]
fn shared_record_runs_once_under_parallelism() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut rs = space.ruleset();
    // One rule produces both headers; two consumers race to want it.
    rs.add(rule(
        &["gen.h", "gen.c"],
        &[],
        &["echo gen >> gen.log", "touch gen.h gen.c"],
    ));
    rs.add(rule(&["a"], &["gen.h"], &["cp gen.h a"]));
    rs.add(rule(&["b"], &["gen.c"], &["cp gen.c b"]));
    rs.add(virtual_rule(&["all"], &["a", "b"], &[]));
    let opts = BuildOpts {
        threads: 4,
        ..BuildOpts::default()
    };
    assert_eq!(space.build(&[rs], "all", opts)?, 3);
    // The generator's recipe executed exactly once.
    assert_eq!(space.read("gen.log")?, b"gen\n");
    Ok(())
}

#[test]
fn diamond_prereq_builds_once() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut rs = space.ruleset();
    rs.add(virtual_rule(&["a"], &["b", "c"], &[]));
    rs.add(rule(&["b"], &["d"], &["cp d b"]));
    rs.add(rule(&["c"], &["d"], &["cp d c"]));
    rs.add(rule(&["d"], &[], &["echo d >> d.log", "echo data > d"]));
    let opts = BuildOpts {
        threads: 4,
        ..BuildOpts::default()
    };
    assert_eq!(space.build(&[rs], "a", opts)?, 3);
    assert_eq!(space.read("d.log")?, b"d\n");
    Ok(())
}

#[test]
fn single_thread_order_is_reproducible() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let rules = |space: &TestSpace| {
        let mut rs = space.ruleset();
        rs.add(virtual_rule(&["all"], &["one", "two", "three"], &[]));
        rs.add(virtual_rule(&["one"], &[], &["echo one >> order.log"]));
        rs.add(virtual_rule(&["two"], &[], &["echo two >> order.log"]));
        rs.add(virtual_rule(&["three"], &[], &["echo three >> order.log"]));
        rs
    };
    let opts = BuildOpts {
        build_all: true,
        ..BuildOpts::default()
    };

    assert_eq!(space.build(&[rules(&space)], "all", opts.clone())?, 3);
    let first = space.read("order.log")?;
    space.remove("order.log")?;
    assert_eq!(space.build(&[rules(&space)], "all", opts)?, 3);
    let second = space.read("order.log")?;
    // Byte-identical execution order across runs.
    assert_eq!(first, second);
    assert_eq!(first, b"one\ntwo\nthree\n");
    Ok(())
}

#[test]
fn exclusive_rules_build_fine_in_parallel() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let attrs = mek::rules::Attrs {
        exclusive: true,
        ..mek::rules::Attrs::default()
    };
    let mut rs = space.ruleset();
    rs.add(virtual_rule(&["all"], &["x", "y"], &[]));
    rs.add(rule_attrs(&["x"], &[], &["echo x > x"], attrs));
    rs.add(rule_attrs(&["y"], &[], &["echo y > y"], attrs));
    let opts = BuildOpts {
        threads: 4,
        ..BuildOpts::default()
    };
    assert_eq!(space.build(&[rs], "all", opts)?, 2);
    assert!(space.exists("x") && space.exists("y"));
    Ok(())
}
