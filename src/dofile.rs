//! Build actions as shell scripts ("do files").
//!
//! A target `dir/name.ext` is built by the first of `dir/name.ext.do`,
//! `dir/default.ext.do` and `dir/default.do` that exists, trying the
//! default scripts of parent directories after those of `dir`.  Targets
//! without a script are sources.  Scripts run under `/bin/sh -e` from the project
//! root with three arguments: the target, the target minus its extension,
//! and a temporary output path that replaces the target when the script
//! succeeds.  Scripts declare dependencies by running `restamp ifchange`.

use crate::canon::target_name;
use crate::ipc;
use crate::rules::Rules;
use crate::stamp::{stamp_path, Stamp, StampMode};
use crate::work::Context;
use anyhow::{anyhow, bail, Context as _};
use rustc_hash::FxHashMap;
use std::os::unix::net::UnixListener;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

/// Candidate script names for a target, in lookup order: the exact
/// script, then default scripts from the target's directory up to the root.
fn script_candidates(target: &str) -> Vec<String> {
    let (dir, base) = match target.rfind('/') {
        Some(pos) => target.split_at(pos + 1),
        None => ("", target),
    };
    // "a.tar.gz" has default names default.tar.gz and default.gz.
    // A leading dot marks a hidden file, not an extension.
    let mut defaults = Vec::new();
    let mut rest = base;
    loop {
        let skip = rest.chars().next().map_or(0, char::len_utf8);
        match rest[skip..].find('.') {
            Some(pos) => rest = &rest[skip + pos + 1..],
            None => break,
        }
        defaults.push(format!("default.{}.do", rest));
    }
    defaults.push("default.do".to_owned());

    let mut candidates = vec![format!("{}.do", target)];
    let mut dir = dir;
    loop {
        for default in &defaults {
            candidates.push(format!("{}{}", dir, default));
        }
        if dir.is_empty() {
            break;
        }
        // Strip the trailing slash, then the last component.
        let parent = &dir[..dir.len() - 1];
        dir = match parent.rfind('/') {
            Some(pos) => &parent[..pos + 1],
            None => "",
        };
    }
    candidates
}

/// The target name with its last extension removed, passed to scripts as $2.
fn strip_extension(target: &str) -> &str {
    let base_start = target.rfind('/').map(|pos| pos + 1).unwrap_or(0);
    match target[base_start..].rfind('.') {
        Some(0) | None => target,
        Some(pos) => &target[..base_start + pos],
    }
}

/// Best-effort removal of a script's temporary output, file or directory.
fn remove_output(path: &Path) {
    let _ = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
}

fn describe_status(status: ExitStatus) -> String {
    match status.signal() {
        Some(libc::SIGINT) => "interrupted".to_owned(),
        Some(sig) => format!("signal {}", sig),
        None => status.to_string(),
    }
}

/// Rules backed by do files under a project root.
pub struct DoRules {
    root: PathBuf,
    /// Directory of the restamp binary, put on scripts' PATH so they can
    /// run `restamp ifchange`.
    exe_dir: Option<PathBuf>,
    modes: FxHashMap<String, StampMode>,
}

impl DoRules {
    pub fn new(root: PathBuf) -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        DoRules {
            root,
            exe_dir,
            modes: FxHashMap::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stamp `target` with `mode` rather than picking a mode from disk.
    pub fn set_mode(&mut self, target: &str, mode: StampMode) {
        self.modes.insert(target.to_owned(), mode);
    }

    /// The script that builds `target`, as a root-relative name.
    pub fn find_script(&self, target: &str) -> Option<String> {
        if target.ends_with(".do") || target.starts_with('/') || target.starts_with("../") {
            return None;
        }
        script_candidates(target)
            .into_iter()
            .find(|script| self.root.join(script).is_file())
    }

    fn script_path_var(&self) -> Option<std::ffi::OsString> {
        let exe_dir = self.exe_dir.as_ref()?;
        let mut paths = vec![exe_dir.clone()];
        if let Some(path) = std::env::var_os("PATH") {
            paths.extend(std::env::split_paths(&path));
        }
        std::env::join_paths(paths).ok()
    }

    fn run_script(
        &self,
        target: &str,
        script: &str,
        tmp: &Path,
        ctx: &mut Context,
    ) -> anyhow::Result<()> {
        let sock_dir = tempfile::Builder::new().prefix("restamp").tempdir()?;
        let sock = sock_dir.path().join("sock");
        let listener =
            UnixListener::bind(&sock).with_context(|| format!("bind {}", sock.display()))?;

        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-e")
            .arg(script)
            .arg(target)
            .arg(strip_extension(target))
            .arg(tmp)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .env(ipc::SOCKET_VAR, &sock)
            .env(ipc::ROOT_VAR, &self.root)
            .env(ipc::TARGET_VAR, target);
        if let Some(path) = self.script_path_var() {
            cmd.env("PATH", path);
        }
        let mut child = cmd.spawn().with_context(|| format!("spawn {}", script))?;

        let root = &self.root;
        let served = ipc::serve(&listener, &mut child, |path| {
            ctx.depend(&target_name(root, path)).map(|_| ())
        });
        let status = match served {
            Ok(status) => status,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        };
        if !status.success() {
            bail!("{} exited with {}", script, describe_status(status));
        }
        Ok(())
    }
}

impl Rules for DoRules {
    fn has_action(&self, target: &str) -> bool {
        self.find_script(target).is_some()
    }

    fn replaces_existing(&self, target: &str) -> bool {
        // Only a script named after the target claims an existing file.
        self.find_script(target).as_deref() == Some(format!("{}.do", target).as_str())
    }

    fn stamp(&self, target: &str) -> anyhow::Result<Stamp> {
        let mode = self.modes.get(target).copied();
        stamp_path(&self.root.join(target), mode).with_context(|| format!("stamp {}", target))
    }

    fn build(&self, target: &str, ctx: &mut Context) -> anyhow::Result<()> {
        let script = self
            .find_script(target)
            .ok_or_else(|| anyhow!("{}: no build script", target))?;
        // The script is a dependency like any other: editing it rebuilds.
        ctx.depend(&script)?;

        let out = self.root.join(target);
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let tmp = PathBuf::from(format!("{}.restamp.tmp", out.display()));
        remove_output(&tmp);

        let mut result = self.run_script(target, &script, &tmp, ctx);
        if result.is_ok() {
            // The script may have ignored a failed `restamp ifchange`.
            if let Some(dep) = ctx.failed_dependency() {
                result = Err(anyhow!("dependency {} failed to build", dep));
            }
        }
        if result.is_err() {
            remove_output(&tmp);
            return result;
        }
        if tmp.exists() {
            // A directory can't be renamed over a non-empty one.
            if tmp.is_dir() && out.is_dir() {
                if !ctx.previously_built() {
                    remove_output(&tmp);
                    bail!("{}: refusing to replace a directory restamp didn't build", target);
                }
                std::fs::remove_dir_all(&out)
                    .with_context(|| format!("remove {}", out.display()))?;
            }
            std::fs::rename(&tmp, &out)
                .with_context(|| format!("rename {} to {}", tmp.display(), out.display()))?;
        }
        Ok(())
    }

    fn describe(&self, target: &str) -> Option<String> {
        self.find_script(target)
    }
}
