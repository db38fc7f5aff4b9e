use crate::e2e::*;

#[test]
fn no_target() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let out = space.run_fail(&mut restamp_command(vec!["build"]))?;
    assert_stderr_contains(&out, "restamp: error: no target specified");
    Ok(())
}

#[test]
fn basic_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("out.do", "restamp ifchange in\ncat in > \"$3\"\n")?;
    space.write("in", "hello")?;

    let out = space.run_expect(&mut restamp_command(vec!["build", "out"]))?;
    assert_output_contains(&out, "ran 1 build, now up to date");
    assert_eq!(space.read_string("out")?, "hello");
    assert!(!space.exists("out.restamp.tmp"));
    assert!(space.exists(".restamp.db"));

    let out = space.run_expect(&mut restamp_command(vec!["build", "out"]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[test]
fn rebuild_on_input_change() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("out.do", "restamp ifchange in\ncat in > \"$3\"\n")?;
    space.write("in", "one")?;
    space.run_expect(&mut restamp_command(vec!["build", "out"]))?;

    space.write("in", "two")?;
    let out = space.run_expect(&mut restamp_command(vec!["build", "out"]))?;
    assert_output_contains(&out, "ran 1 build");
    assert_eq!(space.read_string("out")?, "two");
    Ok(())
}

#[test]
fn rebuild_on_script_change() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("out.do", "echo one > \"$3\"\n")?;
    space.run_expect(&mut restamp_command(vec!["build", "out"]))?;
    assert_eq!(space.read_string("out")?, "one\n");

    space.write("out.do", "echo two > \"$3\"\n")?;
    let out = space.run_expect(&mut restamp_command(vec!["build", "out"]))?;
    assert_output_contains(&out, "ran 1 build");
    assert_eq!(space.read_string("out")?, "two\n");
    Ok(())
}

#[test]
fn create_subdir() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("default.do", "echo made > \"$3\"\n")?;
    space.run_expect(&mut restamp_command(vec!["build", "subdir/out"]))?;
    assert_eq!(space.read_string("subdir/out")?, "made\n");
    Ok(())
}

#[test]
fn missing_source() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let out = space.run_fail(&mut restamp_command(vec!["build", "nope"]))?;
    assert_stderr_contains(&out, "nope: missing and no rule to build it");
    Ok(())
}

#[test]
fn failed_build_keeps_old_output() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("out.do", "restamp ifchange in\ncat in > \"$3\"\n")?;
    space.write("in", "good")?;
    space.run_expect(&mut restamp_command(vec!["build", "out"]))?;

    space.write("out.do", "echo partial > \"$3\"\nexit 3\n")?;
    let out = space.run_fail(&mut restamp_command(vec!["build", "out"]))?;
    assert_stderr_contains(&out, "restamp: error: build out: out.do exited with");
    assert_eq!(space.read_string("out")?, "good");
    assert!(!space.exists("out.restamp.tmp"));

    // Still stale, so a fixed script runs next time.
    space.write("out.do", "echo fixed > \"$3\"\n")?;
    space.run_expect(&mut restamp_command(vec!["build", "out"]))?;
    assert_eq!(space.read_string("out")?, "fixed\n");
    Ok(())
}

#[test]
fn stamp_command() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("a.txt", "b==1\na==2\n")?;
    space.write("b.txt", "a==2\nb==1\n")?;
    space.write("tree/x", "x")?;

    let out = space.run_expect(&mut restamp_command(vec![
        "stamp", "--mode", "lines", "a.txt", "b.txt",
    ]))?;
    let stdout = String::from_utf8(out.stdout)?;
    let stamps: Vec<&str> = stdout
        .lines()
        .map(|line| line.split_whitespace().next().unwrap())
        .collect();
    assert_eq!(stamps.len(), 2);
    assert_eq!(stamps[0], stamps[1]);
    assert_eq!(stamps[0].len(), 16);

    let out = space.run_expect(&mut restamp_command(vec!["stamp", "tree", "gone"]))?;
    assert_output_contains(&out, "  tree\n");
    assert_output_contains(&out, "missing  gone\n");
    Ok(())
}

#[test]
fn debug_list() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let out = space.run(&mut restamp_command(vec!["-d", "list", "build", "x"]))?;
    assert_output_contains(&out, "explain");
    let out = space.run_fail(&mut restamp_command(vec!["-d", "bogus", "build", "x"]))?;
    assert_stderr_contains(&out, "unknown -d \"bogus\"");
    Ok(())
}

#[test]
fn chdir_and_db_flags() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("proj/out.do", "echo hi > \"$3\"\n")?;
    let dir = space.path().join("proj");
    let dir = dir.to_str().unwrap();
    space.run_expect(&mut restamp_command(vec![
        "-C", dir, "--db", "state.db", "build", "out",
    ]))?;
    assert_eq!(space.read_string("proj/out")?, "hi\n");
    assert!(space.exists("proj/state.db"));
    assert!(!space.exists("proj/.restamp.db"));
    Ok(())
}
