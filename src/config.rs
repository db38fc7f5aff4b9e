//! Configuration, from command-line flags layered over the environment.

use anyhow::{anyhow, bail};
use std::path::{Path, PathBuf};

/// Overrides the database path.
pub const DB_VAR: &str = "RESTAMP_DB";
/// Names an environment variable that must be set before building.
pub const REQUIRE_ENV_VAR: &str = "RESTAMP_REQUIRE_ENV";
/// tracing-subscriber filter directives.
pub const LOG_VAR: &str = "RESTAMP_LOG";

const DEFAULT_DB: &str = ".restamp.db";

/// Settings given on the command line; unset ones fall back to the
/// environment, then to defaults.
#[derive(Debug, Default)]
pub struct Flags {
    pub db: Option<String>,
    pub require_env: Option<String>,
    pub verbose: bool,
    pub explain: bool,
}

#[derive(Debug)]
pub struct Config {
    /// Project root; targets are named relative to it.
    pub root: PathBuf,
    pub db_path: PathBuf,
    /// Variable that must be set (e.g. VIRTUAL_ENV) for builds to run.
    pub require_env: Option<String>,
    pub verbose: bool,
    /// Log why each target is or isn't rebuilt.
    pub explain: bool,
}

impl Config {
    /// Resolve flags against `env` (a variable lookup) for the project at
    /// `root`, which must be absolute.
    pub fn resolve(
        root: &Path,
        flags: Flags,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        if !root.is_absolute() {
            bail!("project root {} is not absolute", root.display());
        }
        let nonempty = |var: &str| env(var).filter(|val| !val.is_empty());
        let db = flags
            .db
            .or_else(|| nonempty(DB_VAR))
            .unwrap_or_else(|| DEFAULT_DB.to_owned());
        Ok(Config {
            root: root.to_owned(),
            db_path: root.join(db),
            require_env: flags.require_env.or_else(|| nonempty(REQUIRE_ENV_VAR)),
            verbose: flags.verbose,
            explain: flags.explain,
        })
    }

    /// Load config for the current directory from the process environment.
    pub fn from_env(flags: Flags) -> anyhow::Result<Self> {
        let cwd = std::env::current_dir().map_err(|err| anyhow!("getcwd: {}", err))?;
        // Scripts see symlink-free paths from getcwd(), so the root must too.
        let root = cwd
            .canonicalize()
            .map_err(|err| anyhow!("canonicalize {}: {}", cwd.display(), err))?;
        Config::resolve(&root, flags, |var| std::env::var(var).ok())
    }

    /// Fails unless the required environment (if any) is active.
    pub fn check_environment(&self) -> anyhow::Result<()> {
        self.check_environment_with(|var| std::env::var_os(var))
    }

    fn check_environment_with(
        &self,
        env: impl Fn(&str) -> Option<std::ffi::OsString>,
    ) -> anyhow::Result<()> {
        let var = match &self.require_env {
            None => return Ok(()),
            Some(var) => var,
        };
        match env(var) {
            Some(val) if !val.is_empty() => Ok(()),
            _ => bail!(
                "environment precondition failed: ${} is not set; activate the environment first",
                var
            ),
        }
    }
}
