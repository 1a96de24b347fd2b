//! Hierarchical wall-clock timers.

use std::fmt::Write as _;
use std::time::{Duration, Instant};
use tracing::debug;

/// A named timer with nested child runs.
///
/// ```text
/// backprop           1.20ms
///   pos_vel          0.95ms
///     engine.tree    0.70ms
/// ```
#[derive(Debug, Clone)]
pub struct PerformanceLog {
    name: String,
    /// Nesting level, `0` for a root log.
    depth: usize,
    started: Instant,
    elapsed: Option<Duration>,
    children: Vec<PerformanceLog>,
}

impl PerformanceLog {
    /// Start a root timer.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depth: 0,
            started: Instant::now(),
            elapsed: None,
            children: Vec::new(),
        }
    }

    /// Start a child timer and return it.
    pub fn start_run(&mut self, name: impl Into<String>) -> &mut PerformanceLog {
        let mut child = PerformanceLog::new(name);
        child.depth = self.depth + 1;
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Stop this timer. Later calls keep the first measurement.
    pub fn end(&mut self) {
        if self.elapsed.is_none() {
            self.elapsed = Some(self.started.elapsed());
        }
    }

    /// Stop this timer and, for a top-level operation (a run directly
    /// under a root log), report the whole subtree.
    pub fn close(&mut self) {
        self.end();
        if self.depth == 1 {
            self.report();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.elapsed.is_some()
    }

    /// Measured time, or time so far for a running timer.
    pub fn elapsed(&self) -> Duration {
        self.elapsed.unwrap_or_else(|| self.started.elapsed())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn children(&self) -> &[PerformanceLog] {
        &self.children
    }

    /// This run and all runs below it, depth first.
    pub fn runs(&self) -> Vec<&PerformanceLog> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.runs());
        }
        out
    }

    /// Depth-first search for a run called `name`, including this one.
    pub fn find(&self, name: &str) -> Option<&PerformanceLog> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// Indented tree of runs with their times.
    pub fn pretty(&self) -> String {
        let mut out = String::new();
        for run in self.runs() {
            let label = format!("{}{}", "  ".repeat(run.depth - self.depth), run.name);
            let _ = writeln!(out, "{label:<32} {:>10.3}ms", run.millis());
        }
        out
    }

    /// Emit every run as a `debug!` event.
    pub fn report(&self) {
        for run in self.runs() {
            debug!(run = %run.name, depth = run.depth, ms = run.millis(), "performance");
        }
    }

    fn millis(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1e3
    }
}
