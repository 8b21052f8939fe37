use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing::debug;

use super::Git;

/// Git collaborator backed by the `git` binary, rooted at the user's
/// working tree.
#[derive(Debug)]
pub struct CliGit {
    root: PathBuf,
}

impl CliGit {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn git(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.root);
        cmd
    }
}

impl Git for CliGit {
    fn is_available(&self) -> bool {
        let output = self
            .git()
            .args(["rev-parse", "--is-inside-work-tree"])
            .output();

        match output {
            Ok(out) => out.status.success(),
            Err(e) => {
                debug!(error = %e, "git binary not runnable");
                false
            }
        }
    }

    fn save_patch(&self, reference: &str, out: &Path) -> Result<()> {
        let output = self
            .git()
            .args(["diff", reference])
            .output()
            .context("running git diff")?;

        if !output.status.success() {
            bail!(
                "git diff {reference} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        if output.stdout.is_empty() {
            bail!("git diff {reference} produced no output");
        }

        std::fs::write(out, &output.stdout)
            .with_context(|| format!("writing patch file {}", out.display()))?;
        Ok(())
    }

    fn latest_commit(&self, reference: &str) -> Result<String> {
        let output = self
            .git()
            .args(["rev-parse", reference])
            .output()
            .context("running git rev-parse")?;

        if !output.status.success() {
            bail!(
                "git rev-parse {reference} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if sha.is_empty() {
            bail!("git rev-parse {reference} returned nothing");
        }
        Ok(sha)
    }
}
