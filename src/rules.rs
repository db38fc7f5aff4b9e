//! What the engine needs to know about targets, independent of how build
//! actions are actually expressed.

use crate::stamp::Stamp;
use crate::work::Context;

pub trait Rules {
    /// Whether `target` has a build action.  Targets without one are
    /// sources: they're only ever observed, never built.
    fn has_action(&self, target: &str) -> bool;

    /// Whether `target`'s action may replace a file that already exists but
    /// was never built.  Catch-all actions should say no, so that they
    /// don't clobber source files that happen to match them.
    fn replaces_existing(&self, _target: &str) -> bool {
        true
    }

    /// Observe the current state of `target`.
    fn stamp(&self, target: &str) -> anyhow::Result<Stamp>;

    /// Run the build action for `target`.  Dependencies are declared while
    /// the action runs, through `ctx`; each declared dependency is brought
    /// up to date before `Context::depend` returns.
    fn build(&self, target: &str, ctx: &mut Context) -> anyhow::Result<()>;

    /// Extra detail about a target's action for verbose progress output.
    fn describe(&self, _target: &str) -> Option<String> {
        None
    }
}
