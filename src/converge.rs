//! Repeatedly rebuild a target until its output stops changing.
//!
//! Some build actions change their own inputs: a lock file resolved by a
//! tool whose version is pinned by that same lock file, say.  Running such a
//! target once isn't enough; it must be rebuilt until a run leaves the
//! output as it found it.

use crate::stamp::Stamp;
use crate::work::Engine;
use anyhow::bail;
use tracing::info;

/// A successful convergence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Convergence {
    /// Number of rebuilds run, including the final one that changed nothing.
    pub iterations: usize,
    /// The stable stamp.
    pub stamp: Stamp,
    /// Stamp after each iteration.
    pub stamps: Vec<Stamp>,
}

/// The iteration budget ran out before the output stabilized.  The last
/// build's output is left in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotConverged {
    pub target: String,
    pub iterations: usize,
    /// Stamp before the first iteration, followed by the stamp after each.
    pub stamps: Vec<Stamp>,
}

impl NotConverged {
    /// The state the last iteration reached.
    pub fn last_stamp(&self) -> Stamp {
        // stamps always holds at least the starting stamp.
        self.stamps.last().copied().unwrap_or(Stamp::Missing)
    }
}

impl std::fmt::Display for NotConverged {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} did not converge after {} iterations; stamps:",
            self.target, self.iterations
        )?;
        for stamp in &self.stamps {
            write!(f, " {}", stamp)?;
        }
        Ok(())
    }
}

impl std::error::Error for NotConverged {}

/// Force-rebuild `target` until two consecutive rebuilds produce the same
/// stamp, running at most `max_iterations` rebuilds.  Whatever was on disk
/// before the first rebuild doesn't count: a stale output that happens to
/// match the first rebuild proves nothing.
pub fn converge(
    engine: &mut Engine,
    target: &str,
    max_iterations: usize,
) -> anyhow::Result<Convergence> {
    if max_iterations < 2 {
        bail!(
            "converge {}: iteration limit must be at least 2, got {}",
            target,
            max_iterations
        );
    }

    let initial = engine.observe(target)?;
    let mut previous: Option<Stamp> = None;
    let mut stamps = Vec::new();
    for iteration in 1..=max_iterations {
        engine.new_pass();
        engine.force(target);
        let stamp = engine.ensure_built(target)?;
        match previous {
            Some(previous) => info!(path = %target, iteration, %previous, %stamp, "converge"),
            None => info!(path = %target, iteration, %initial, %stamp, "converge"),
        }
        stamps.push(stamp);
        if previous == Some(stamp) {
            return Ok(Convergence {
                iterations: iteration,
                stamp,
                stamps,
            });
        }
        previous = Some(stamp);
    }

    let mut all = vec![initial];
    all.extend(stamps);
    Err(NotConverged {
        target: target.to_owned(),
        iterations: max_iterations,
        stamps: all,
    }
    .into())
}
