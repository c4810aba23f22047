//! Preflight check types and report.

use std::fmt::Write as _;

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// Check passed.
    Pass,
    /// Check failed - the build will stop at the matching step.
    Fail,
    /// Usable, but some step will skip items.
    Warn,
    /// Not applicable with the current step selection.
    Skip,
}

impl CheckStatus {
    fn label(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Warn => "WARN",
            Self::Skip => "SKIP",
        }
    }

    fn icon(&self) -> &'static str {
        match self {
            Self::Pass => "✓",
            Self::Fail => "✗",
            Self::Warn => "⚠",
            Self::Skip => "○",
        }
    }
}

impl CheckResult {
    fn with(name: &str, status: CheckStatus, details: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            details,
        }
    }

    pub fn pass(name: &str) -> Self {
        Self::with(name, CheckStatus::Pass, None)
    }

    pub fn pass_with(name: &str, details: &str) -> Self {
        Self::with(name, CheckStatus::Pass, Some(details.to_string()))
    }

    pub fn fail(name: &str, details: &str) -> Self {
        Self::with(name, CheckStatus::Fail, Some(details.to_string()))
    }

    pub fn warn(name: &str, details: &str) -> Self {
        Self::with(name, CheckStatus::Warn, Some(details.to_string()))
    }

    pub fn skip(name: &str, details: &str) -> Self {
        Self::with(name, CheckStatus::Skip, Some(details.to_string()))
    }
}

/// Results of all preflight checks.
#[derive(Debug, Default)]
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Returns true if no check failed.
    pub fn all_passed(&self) -> bool {
        self.fail_count() == 0
    }

    pub fn fail_count(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    pub fn warn_count(&self) -> usize {
        self.count(CheckStatus::Warn)
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    pub fn find(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    pub fn render(&self) -> String {
        let mut out = String::from("=== Preflight Check Results ===\n\n");

        for check in &self.checks {
            let _ = write!(
                out,
                "  {} [{}] {}",
                check.status.icon(),
                check.status.label(),
                check.name
            );
            match &check.details {
                Some(details) => {
                    let _ = writeln!(out, ": {}", details);
                }
                None => out.push('\n'),
            }
        }

        let _ = writeln!(
            out,
            "\nSummary: {}/{} passed",
            self.count(CheckStatus::Pass),
            self.checks.len()
        );
        let failed = self.fail_count();
        if failed > 0 {
            let _ = writeln!(out, "         {} FAILED - build will not succeed", failed);
        }
        let warned = self.warn_count();
        if warned > 0 {
            let _ = writeln!(out, "         {} warnings", warned);
        }
        out
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }
}
