//! Delivery of formatted results to humans.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Sends content, wrapped by `formatter`, to wherever reviewers read it.
pub trait Reporter {
    fn report(&self, content: &str, formatter: &dyn Fn(&str) -> String) -> Result<()>;
}

/// Prints reports to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutReporter;

impl Reporter for StdoutReporter {
    fn report(&self, content: &str, formatter: &dyn Fn(&str) -> String) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", formatter(content)).context("write report to stdout")
    }
}

/// Appends reports to a markdown file, one block per report.
#[derive(Debug, Clone)]
pub struct FileReporter {
    path: PathBuf,
}

impl FileReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Reporter for FileReporter {
    fn report(&self, content: &str, formatter: &dyn Fn(&str) -> String) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create report dir {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open report {}", self.path.display()))?;
        writeln!(file, "{}\n", formatter(content))
            .with_context(|| format!("append report {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::format::collapsible;

    #[test]
    fn file_reporter_appends_blocks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("reports").join("comments.md");
        let reporter = FileReporter::new(&path);

        reporter.report("first", &collapsible("One")).expect("report 1");
        reporter.report("second", &collapsible("Two")).expect("report 2");

        let contents = fs::read_to_string(&path).expect("read");
        let first = contents.find("first").expect("first block");
        let second = contents.find("second").expect("second block");
        assert!(first < second);
        assert!(contents.contains("<summary>Two</summary>"));
    }
}
