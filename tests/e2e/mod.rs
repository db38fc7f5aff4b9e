//! Support code for e2e tests, which run restamp as a binary.

mod basic;
mod scripts;

pub fn restamp_binary() -> std::path::PathBuf {
    std::env::current_exe()
        .expect("test binary path")
        .parent()
        .expect("test binary directory")
        .parent()
        .expect("binary directory")
        .join("restamp")
}

pub fn restamp_command(args: Vec<&str>) -> std::process::Command {
    let mut cmd = std::process::Command::new(restamp_binary());
    cmd.args(args);
    // Don't let an enclosing build or environment leak into the test.
    cmd.env_remove("RESTAMP_SOCKET");
    cmd.env_remove("RESTAMP_DB");
    cmd.env_remove("RESTAMP_REQUIRE_ENV");
    cmd.env_remove("RESTAMP_LOG");
    cmd
}

fn print_output(out: &std::process::Output) {
    // Gross: use print! instead of writing to stdout so Rust test
    // framework can capture it.
    print!("{}", std::str::from_utf8(&out.stdout).unwrap());
    print!("{}", std::str::from_utf8(&out.stderr).unwrap());
}

pub fn assert_output_contains(out: &std::process::Output, text: &str) {
    let out = std::str::from_utf8(&out.stdout).unwrap();
    if !out.contains(text) {
        panic!(
            "assertion failed; expected output to contain {:?} but got:\n{}",
            text, out
        );
    }
}

pub fn assert_stderr_contains(out: &std::process::Output, text: &str) {
    let err = std::str::from_utf8(&out.stderr).unwrap();
    if !err.contains(text) {
        panic!(
            "assertion failed; expected stderr to contain {:?} but got:\n{}",
            text, err
        );
    }
}

/// Manages a temporary directory for invoking restamp.
pub struct TestSpace {
    dir: tempfile::TempDir,
}
impl TestSpace {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        Ok(TestSpace { dir })
    }

    /// Write a file into the working space.
    pub fn write(&self, path: &str, content: &str) -> std::io::Result<()> {
        let path = self.dir.path().join(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
    }

    /// Read a file from the working space.
    pub fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.dir.path().join(path))
    }

    pub fn read_string(&self, path: &str) -> anyhow::Result<String> {
        Ok(String::from_utf8(self.read(path)?)?)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.dir.path().join(path).exists()
    }

    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }

    /// Invoke restamp, returning process output.
    pub fn run(&self, cmd: &mut std::process::Command) -> std::io::Result<std::process::Output> {
        cmd.current_dir(self.dir.path()).output()
    }

    /// Like run, but also print output if the build failed.
    pub fn run_expect(
        &self,
        cmd: &mut std::process::Command,
    ) -> anyhow::Result<std::process::Output> {
        let out = self.run(cmd)?;
        if !out.status.success() {
            print_output(&out);
            anyhow::bail!("build failed, status {}", out.status);
        }
        Ok(out)
    }

    /// Like run, but expect failure.
    pub fn run_fail(
        &self,
        cmd: &mut std::process::Command,
    ) -> anyhow::Result<std::process::Output> {
        let out = self.run(cmd)?;
        if out.status.success() {
            print_output(&out);
            anyhow::bail!("expected failure, got success");
        }
        Ok(out)
    }

    /// Persist the temp dir locally and abort the test.  Debugging helper.
    #[allow(dead_code)]
    pub fn eject(self) -> ! {
        panic!("ejected at {:?}", self.dir.into_path());
    }
}

/// Uppercases $2.src into the target.
pub const UPPER_RULE: &str = "
restamp ifchange \"$2.src\"
tr a-z A-Z < \"$2.src\" > \"$3\"
";

/// Counts its own runs in the file "count", writing the run number capped
/// at 3 into the target.
pub const COUNTING_RULE: &str = "
n=$(cat count 2>/dev/null || echo 0)
n=$((n + 1))
echo $n > count
if [ $n -gt 3 ]; then n=3; fi
echo \"v$n\" > \"$3\"
";
