use super::*;
use mek::work::BuildOpts;

#[test]
fn build_then_up_to_date_then_content_change() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut rs = space.ruleset();
    rs.add(rule(&["out"], &["in"], &["cp in out"]));
    space.write("in", "hello")?;

    // First run executes the copy and records fingerprints.
    assert_eq!(space.build(&[rs], "out", BuildOpts::default())?, 1);
    assert_eq!(space.read("out")?, b"hello");

    // Nothing changed: nothing to rebuild.
    let mut rs = space.ruleset();
    rs.add(rule(&["out"], &["in"], &["cp in out"]));
    assert_eq!(space.build(&[rs], "out", BuildOpts::default())?, 0);

    // Content change is detected in hash mode even though `out` is newer.
    space.write("in", "world")?;
    let mut rs = space.ruleset();
    rs.add(rule(&["out"], &["in"], &["cp in out"]));
    assert_eq!(space.build(&[rs], "out", BuildOpts::default())?, 1);
    assert_eq!(space.read("out")?, b"world");
    Ok(())
}

#[test]
fn timestamp_mode_rebuilds_on_mtime() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let opts = BuildOpts {
        hash: false,
        ..BuildOpts::default()
    };
    let mut rs = space.ruleset();
    rs.add(rule(&["out"], &["in"], &["cp in out"]));
    space.write("in", "v1")?;

    assert_eq!(space.build(&[rs], "out", opts.clone())?, 1);

    let mut rs = space.ruleset();
    rs.add(rule(&["out"], &["in"], &["cp in out"]));
    assert_eq!(space.build(&[rs], "out", opts.clone())?, 0);

    // Push `in`'s mtime well past `out`'s.
    let out_meta = std::fs::metadata(format!("{}/out", space.root()))?;
    let bumped = filetime::FileTime::from_unix_time(
        filetime::FileTime::from_last_modification_time(&out_meta).unix_seconds() + 5,
        0,
    );
    filetime::set_file_mtime(format!("{}/in", space.root()), bumped)?;

    let mut rs = space.ruleset();
    rs.add(rule(&["out"], &["in"], &["cp in out"]));
    assert_eq!(space.build(&[rs], "out", opts)?, 1);
    Ok(())
}

#[test]
fn recipe_text_change_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "x")?;
    let mut rs = space.ruleset();
    rs.add(rule(&["out"], &["in"], &["cp in out"]));
    assert_eq!(space.build(&[rs], "out", BuildOpts::default())?, 1);

    // Same target, different command text.
    let mut rs = space.ruleset();
    rs.add(rule(&["out"], &["in"], &["cat in > out"]));
    assert_eq!(space.build(&[rs], "out", BuildOpts::default())?, 1);

    let mut rs = space.ruleset();
    rs.add(rule(&["out"], &["in"], &["cat in > out"]));
    assert_eq!(space.build(&[rs], "out", BuildOpts::default())?, 0);
    Ok(())
}

#[test]
fn missing_output_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "x")?;
    let mut rs = space.ruleset();
    rs.add(rule(&["out"], &["in"], &["cp in out"]));
    assert_eq!(space.build(&[rs], "out", BuildOpts::default())?, 1);

    space.remove("out")?;
    let mut rs = space.ruleset();
    rs.add(rule(&["out"], &["in"], &["cp in out"]));
    assert_eq!(space.build(&[rs], "out", BuildOpts::default())?, 1);
    Ok(())
}

#[test]
fn virtual_target_drives_real_one() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "x")?;
    let mut rs = space.ruleset();
    rs.add(virtual_rule(&["all"], &["out"], &[]));
    rs.add(rule(&["out"], &["in"], &["cp in out"]));
    assert_eq!(space.build(&[rs], "all", BuildOpts::default())?, 1);
    assert!(space.exists("out"));
    // No file named "all" was created.
    assert!(!space.exists("all"));

    let mut rs = space.ruleset();
    rs.add(virtual_rule(&["all"], &["out"], &[]));
    rs.add(rule(&["out"], &["in"], &["cp in out"]));
    assert_eq!(space.build(&[rs], "all", BuildOpts::default())?, 0);
    Ok(())
}

#[test]
fn externally_updated_prereq_forces_rebuild() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "x")?;
    let mut rs = space.ruleset();
    rs.add(rule(&["out"], &["in"], &["cp in out"]));
    assert_eq!(space.build(&[rs], "out", BuildOpts::default())?, 1);

    // Nothing actually changed, but `in` is declared updated.
    let mut rs = space.ruleset();
    rs.add(rule(&["out"], &["in"], &["cp in out"]));
    assert_eq!(
        space.build_updated(&[rs], "out", BuildOpts::default(), &["in"])?,
        1
    );
    Ok(())
}

#[test]
fn rebuild_attr_is_always_stale() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let attrs = mek::rules::Attrs {
        rebuild: true,
        ..mek::rules::Attrs::default()
    };
    let mut rs = space.ruleset();
    rs.add(rule_attrs(&["out"], &[], &["echo x > out"], attrs));
    assert_eq!(space.build(&[rs], "out", BuildOpts::default())?, 1);

    let mut rs = space.ruleset();
    rs.add(rule_attrs(&["out"], &[], &["echo x > out"], attrs));
    assert_eq!(space.build(&[rs], "out", BuildOpts::default())?, 1);
    Ok(())
}

#[test]
fn linked_attr_forces_rebuild_when_visited() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let attrs = mek::rules::Attrs {
        linked: true,
        ..mek::rules::Attrs::default()
    };
    let mut rs = space.ruleset();
    rs.add(rule_attrs(&["out"], &[], &["echo x >> out.log", "touch out"], attrs));
    assert_eq!(space.build(&[rs], "out", BuildOpts::default())?, 1);

    let mut rs = space.ruleset();
    rs.add(rule_attrs(&["out"], &[], &["echo x >> out.log", "touch out"], attrs));
    assert_eq!(space.build(&[rs], "out", BuildOpts::default())?, 1);
    assert_eq!(space.read("out.log")?, b"x\nx\n");
    Ok(())
}

#[test]
fn dry_run_executes_nothing() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "x")?;
    let opts = BuildOpts {
        dry_run: true,
        ..BuildOpts::default()
    };
    let mut rs = space.ruleset();
    rs.add(rule(&["out"], &["in"], &["cp in out"]));
    assert_eq!(space.build(&[rs], "out", opts)?, 1);
    assert!(!space.exists("out"));

    // And nothing was recorded: a real run still does the work.
    let mut rs = space.ruleset();
    rs.add(rule(&["out"], &["in"], &["cp in out"]));
    assert_eq!(space.build(&[rs], "out", BuildOpts::default())?, 1);
    assert!(space.exists("out"));
    Ok(())
}

#[test]
fn source_only_target_is_an_error_when_missing() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let rs = space.ruleset();
    let err = space.build(&[rs], "nothing", BuildOpts::default()).unwrap_err();
    assert!(err.to_string().contains("no rule"), "{}", err);
    Ok(())
}
