//! The incremental build engine: decides which targets are stale and
//! rebuilds them, discovering dependencies as their actions run.

use crate::progress::Progress;
use crate::rules::Rules;
use crate::stamp::Stamp;
use crate::store::Store;
use anyhow::{anyhow, bail};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

/// Handed to a build action while it runs.  The action declares each of
/// its dependencies through `depend` before using it.
pub struct Context<'e, 'a> {
    engine: &'e mut Engine<'a>,
    target: &'e str,
    /// First dependency that failed to build, if any.  Once set, the build
    /// fails even if the action carries on.
    failure: Option<String>,
}

impl<'e, 'a> Context<'e, 'a> {
    /// The target being built.
    pub fn target(&self) -> &str {
        self.target
    }

    /// Whether the target has been built successfully before.
    pub fn previously_built(&self) -> bool {
        self.engine.store.record(self.target).is_some()
    }

    /// The first dependency that failed to build, if any.
    pub fn failed_dependency(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Declare that the running build depends on `dep`, bringing `dep` up
    /// to date first.  Returns dep's current stamp.
    pub fn depend(&mut self, dep: &str) -> anyhow::Result<Stamp> {
        match self.engine.ensure_built(dep) {
            Ok(stamp) => {
                self.engine
                    .store
                    .record_dependency(self.target, dep, stamp);
                Ok(stamp)
            }
            Err(err) => {
                if self.failure.is_none() {
                    self.failure = Some(dep.to_owned());
                }
                Err(err)
            }
        }
    }
}

pub struct Engine<'a> {
    rules: &'a dyn Rules,
    store: &'a mut dyn Store,
    progress: &'a mut dyn Progress,

    /// Targets checked during this pass, with their resulting stamp.
    done: FxHashMap<String, Stamp>,
    /// Targets that failed during this pass.
    failed: FxHashSet<String>,
    /// Targets currently being checked or built, outermost first.
    active: Vec<String>,
    /// Targets to rebuild on their next check regardless of staleness.
    forced: FxHashSet<String>,
    /// Count of actions run.
    ran: usize,
}

impl<'a> Engine<'a> {
    pub fn new(
        rules: &'a dyn Rules,
        store: &'a mut dyn Store,
        progress: &'a mut dyn Progress,
    ) -> Self {
        Engine {
            rules,
            store,
            progress,
            done: FxHashMap::default(),
            failed: FxHashSet::default(),
            active: Vec::new(),
            forced: FxHashSet::default(),
            ran: 0,
        }
    }

    pub fn store(&self) -> &dyn Store {
        &*self.store
    }

    /// Number of build actions that ran to completion.
    pub fn ran(&self) -> usize {
        self.ran
    }

    /// Start a new pass: forget which targets were already checked, so
    /// that the next ensure_built looks at the world afresh.
    pub fn new_pass(&mut self) {
        self.done.clear();
        self.failed.clear();
    }

    /// Rebuild `target` the next time it's checked, even if up to date.
    pub fn force(&mut self, target: &str) {
        self.done.remove(target);
        self.forced.insert(target.to_owned());
    }

    /// Observe target's current state without building anything.
    pub fn observe(&self, target: &str) -> anyhow::Result<Stamp> {
        self.rules.stamp(target)
    }

    /// Bring `target` up to date, returning its stamp.
    /// Each target is checked at most once per pass.
    pub fn ensure_built(&mut self, target: &str) -> anyhow::Result<Stamp> {
        if let Some(&stamp) = self.done.get(target) {
            return Ok(stamp);
        }
        if self.failed.contains(target) {
            bail!("{}: already failed", target);
        }
        if let Some(pos) = self.active.iter().position(|t| t == target) {
            let mut chain = self.active[pos..].to_vec();
            chain.push(target.to_owned());
            bail!("dependency cycle: {}", chain.join(" -> "));
        }

        self.active.push(target.to_owned());
        let result = self.check(target);
        self.active.pop();

        match result {
            Ok(stamp) => {
                self.done.insert(target.to_owned(), stamp);
                Ok(stamp)
            }
            Err(err) => {
                self.failed.insert(target.to_owned());
                Err(err)
            }
        }
    }

    /// Whether `target` is only observed, never built.  That includes files
    /// already on disk that were never built here and that only a catch-all
    /// action matches, unless the target was forced.
    fn is_source(&self, target: &str) -> anyhow::Result<bool> {
        let rules = self.rules;
        if !rules.has_action(target) {
            return Ok(true);
        }
        if rules.replaces_existing(target)
            || self.forced.contains(target)
            || self.store.record(target).is_some()
        {
            return Ok(false);
        }
        Ok(rules.stamp(target)? != Stamp::Missing)
    }

    fn check(&mut self, target: &str) -> anyhow::Result<Stamp> {
        let rules = self.rules;
        if self.is_source(target)? {
            let stamp = rules.stamp(target)?;
            if stamp == Stamp::Missing {
                bail!("{}: missing and no rule to build it", target);
            }
            return Ok(stamp);
        }

        match self.stale_reason(target)? {
            Some(reason) => {
                debug!(path = %target, %reason, "stale");
                self.rebuild(target)
            }
            None => {
                debug!(path = %target, "up to date");
                // Not stale means the observed stamp matches the record.
                match self.store.get_stamp(target) {
                    Some(stamp) => Ok(stamp),
                    None => Err(anyhow!("{}: no record for up to date target", target)),
                }
            }
        }
    }

    /// Why `target` needs a rebuild, or None if it's up to date.  Brings the
    /// target's previously recorded dependencies up to date along the way.
    fn stale_reason(&mut self, target: &str) -> anyhow::Result<Option<String>> {
        if self.forced.contains(target) {
            return Ok(Some("forced".to_owned()));
        }
        let record = match self.store.record(target) {
            None => return Ok(Some("never built".to_owned())),
            Some(record) => record.clone(),
        };

        let current = self.rules.stamp(target)?;
        if current != record.stamp {
            return Ok(Some(format!(
                "output is {}, last build produced {}",
                current, record.stamp
            )));
        }

        for dep in &record.deps {
            // Sources are observed directly: a source that vanished makes us
            // stale rather than failing, since the rebuild may not need it.
            let stamp = if self.is_source(&dep.target)? {
                self.rules.stamp(&dep.target)?
            } else {
                self.ensure_built(&dep.target)?
            };
            if stamp != dep.stamp {
                return Ok(Some(format!(
                    "{} changed ({} -> {})",
                    dep.target, dep.stamp, stamp
                )));
            }
        }
        Ok(None)
    }

    fn rebuild(&mut self, target: &str) -> anyhow::Result<Stamp> {
        let rules = self.rules;
        let depth = self.active.len() - 1;
        let before = rules.stamp(target)?;
        let detail = rules.describe(target);

        self.forced.remove(target);
        self.progress.started(target, depth, detail.as_deref());
        self.store.begin(target);

        let mut ctx = Context {
            engine: self,
            target,
            failure: None,
        };
        let result = rules.build(target, &mut ctx);
        let failure = ctx.failure.take();

        let result = result
            .and_then(|()| match failure {
                Some(dep) => Err(anyhow!("dependency {} failed to build", dep)),
                None => Ok(()),
            })
            .and_then(|()| rules.stamp(target));
        let after = match result {
            Ok(stamp) => stamp,
            Err(err) => {
                self.store.abandon(target);
                self.progress.finished(target, depth, false);
                return Err(err.context(format!("build {}", target)));
            }
        };

        if after == before {
            debug!(path = %target, stamp = %after, "rebuilt, output unchanged");
        } else {
            debug!(path = %target, %before, %after, "rebuilt");
        }

        let committed = self
            .store
            .commit(target, after)
            .map_err(|err| anyhow!("commit {}: {}", target, err));
        self.progress.finished(target, depth, committed.is_ok());
        committed?;
        self.ran += 1;
        Ok(after)
    }
}
