//! Build progress reporting, for the purpose of display to the user.

use std::io::Write;

/// Trait for build progress notifications.
pub trait Progress {
    /// Called when a target's action starts.  `depth` counts the builds
    /// enclosing it, each waiting on a dependency.
    fn started(&mut self, target: &str, depth: usize, detail: Option<&str>);

    /// Called when a target's action completes, successfully or not.
    fn finished(&mut self, target: &str, depth: usize, success: bool);

    /// Log a line of output.
    fn log(&mut self, msg: &str);
}

/// Progress implementation for the console.  Writes to stderr, because
/// build scripts share stdout with us.
#[derive(Default)]
pub struct ConsoleProgress {
    /// Whether to print details (the script path) of started builds.
    verbose: bool,
}

impl ConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        ConsoleProgress { verbose }
    }
}

fn indent(depth: usize) -> String {
    " ".repeat(depth * 2)
}

impl Progress for ConsoleProgress {
    fn started(&mut self, target: &str, depth: usize, detail: Option<&str>) {
        match detail {
            Some(detail) if self.verbose => {
                self.log(&format!("restamp  {}{} ({})", indent(depth), target, detail))
            }
            _ => self.log(&format!("restamp  {}{}", indent(depth), target)),
        }
    }

    fn finished(&mut self, target: &str, depth: usize, success: bool) {
        if !success {
            self.log(&format!("failed:  {}{}", indent(depth), target));
        }
    }

    fn log(&mut self, msg: &str) {
        let mut stderr = std::io::stderr();
        // Nothing sensible to do if stderr is gone.
        let _ = writeln!(stderr, "{}", msg);
    }
}
