//! Dependencies declared from inside build scripts.

use crate::e2e::*;

fn upper_project(space: &TestSpace) -> anyhow::Result<()> {
    space.write(
        "all.do",
        "restamp ifchange a.txt b.txt\ncat a.txt b.txt > \"$3\"\n",
    )?;
    space.write("default.txt.do", UPPER_RULE)?;
    space.write("a.src", "alpha\n")?;
    space.write("b.src", "beta\n")?;
    Ok(())
}

#[test]
fn nested_dependencies() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    upper_project(&space)?;

    let out = space.run_expect(&mut restamp_command(vec!["build", "all"]))?;
    assert_output_contains(&out, "ran 3 builds");
    assert_eq!(space.read_string("all")?, "ALPHA\nBETA\n");

    let out = space.run_expect(&mut restamp_command(vec!["build", "all"]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[test]
fn only_affected_targets_rebuild() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    upper_project(&space)?;
    space.run_expect(&mut restamp_command(vec!["build", "all"]))?;

    space.write("b.src", "gamma\n")?;
    let out = space.run_expect(&mut restamp_command(vec!["build", "all"]))?;
    // b.txt and all, but not a.txt.
    assert_output_contains(&out, "ran 2 builds");
    assert_eq!(space.read_string("all")?, "ALPHA\nGAMMA\n");
    Ok(())
}

#[test]
fn unchanged_output_stops_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    upper_project(&space)?;
    space.run_expect(&mut restamp_command(vec!["build", "all"]))?;

    // Different source, same uppercased output.
    space.write("a.src", "ALPHA\n")?;
    let out = space.run_expect(&mut restamp_command(vec!["build", "all"]))?;
    assert_output_contains(&out, "ran 1 build,");
    Ok(())
}

#[test]
fn dependency_failure_fails_dependent() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    upper_project(&space)?;
    space.run_expect(&mut restamp_command(vec!["build", "all"]))?;
    let before = space.read_string("all")?;

    space.write("b.src", "delta\n")?;
    space.write("b.txt.do", "exit 1\n")?;
    let out = space.run_fail(&mut restamp_command(vec!["build", "all"]))?;
    assert_stderr_contains(&out, "build b.txt: b.txt.do exited with");
    assert_eq!(space.read_string("all")?, before);
    Ok(())
}

#[test]
fn script_ignoring_failed_dependency_still_fails() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("bad.do", "exit 1\n")?;
    space.write("out.do", "restamp ifchange bad || true\necho done > \"$3\"\n")?;
    let out = space.run_fail(&mut restamp_command(vec!["build", "out"]))?;
    assert_stderr_contains(&out, "dependency bad failed to build");
    assert!(!space.exists("out"));
    Ok(())
}

#[test]
fn default_script_leaves_source_files_alone() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("notes.txt", "precious handwritten notes\n")?;
    space.write("notes.md", "x\n")?;
    space.write("default.txt.do", "cat \"$2.md\" > \"$3\"\n")?;
    space.write("all.do", "restamp ifchange notes.txt\ncat notes.txt > \"$3\"\n")?;

    let out = space.run_expect(&mut restamp_command(vec!["build", "all"]))?;
    assert_output_contains(&out, "ran 1 build,");
    assert_eq!(space.read_string("notes.txt")?, "precious handwritten notes\n");
    assert_eq!(space.read_string("all")?, "precious handwritten notes\n");

    // Edits to the source still flow through.
    space.write("notes.txt", "revised\n")?;
    space.run_expect(&mut restamp_command(vec!["build", "all"]))?;
    assert_eq!(space.read_string("all")?, "revised\n");
    Ok(())
}

#[test]
fn unbuilt_directory_not_replaced() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("venv/keep", "mine\n")?;
    space.write("venv.do", "mkdir -p \"$3\"\n")?;
    let out = space.run_fail(&mut restamp_command(vec!["build", "venv"]))?;
    assert_stderr_contains(&out, "refusing to replace a directory");
    assert_eq!(space.read_string("venv/keep")?, "mine\n");
    assert!(!space.exists("venv.restamp.tmp"));
    Ok(())
}

#[test]
fn ifchange_from_subdirectory() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("sub/in", "nested\n")?;
    space.write("out.do", "cd sub\nrestamp ifchange ./in\ncat in > \"$3\"\n")?;
    space.run_expect(&mut restamp_command(vec!["build", "out"]))?;
    assert_eq!(space.read_string("out")?, "nested\n");

    space.write("sub/in", "changed\n")?;
    let out = space.run_expect(&mut restamp_command(vec!["build", "out"]))?;
    assert_output_contains(&out, "ran 1 build");
    assert_eq!(space.read_string("out")?, "changed\n");
    Ok(())
}

#[test]
fn install_target() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("install.do", "restamp ifchange venv\necho installed > \"$3\"\n")?;
    space.write("venv.do", "mkdir -p \"$3/bin\"\ntouch \"$3/bin/python\"\n")?;
    space.run_expect(&mut restamp_command(vec!["install"]))?;
    assert_eq!(space.read_string("install")?, "installed\n");
    assert!(space.exists("venv/bin/python"));

    let out = space.run_expect(&mut restamp_command(vec!["install"]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[test]
fn environment_precondition() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("install.do", "echo ok > \"$3\"\n")?;

    let out = space.run_fail(&mut restamp_command(vec![
        "--require-env",
        "RESTAMP_TEST_VENV",
        "install",
    ]))?;
    assert_stderr_contains(
        &out,
        "environment precondition failed: $RESTAMP_TEST_VENV is not set",
    );
    assert!(!space.exists("install"));

    let mut cmd = restamp_command(vec!["install"]);
    cmd.env("RESTAMP_REQUIRE_ENV", "RESTAMP_TEST_VENV");
    cmd.env("RESTAMP_TEST_VENV", "/venv");
    space.run_expect(&mut cmd)?;
    assert!(space.exists("install"));
    Ok(())
}
