//! Run-start initialization: timer, run clone, system monitor, code save,
//! git patch capture and the run metadata file.

use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};

use super::{
    Handler, RequestMeta, DIFF_FILE_NAME, META_FILE_NAME, REQUIREMENTS_FILE_NAME,
};
use crate::record::{
    FilesItem, GitRepoInfo, PythonPackagesRequest, Request, Response, RunRecord, RunStartRequest,
};

/// Shape of the run metadata file. Empty fields are omitted; the system
/// probe is merged on top before the file is written.
#[derive(Debug, Serialize)]
struct Metadata {
    #[serde(skip_serializing_if = "String::is_empty")]
    os: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    python: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    cuda: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    program: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    code_path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    code_path_local: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    email: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    root: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    docker: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    executable: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    colab: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    git: Option<GitRepoInfo>,
}

impl Handler {
    /// The single large initializer, driven by the `RunStart` request.
    pub(super) async fn handle_run_start(&mut self, meta: RequestMeta, request: RunStartRequest) {
        let run = request.run.clone();

        let start_time = run.start_time.unwrap_or_else(SystemTime::now);
        self.timer.start(start_time);
        self.run_record = Some(run.clone());

        // The sender starts its filestream and uploader once this arrives.
        self.fwd(meta.clone().into_record(Request::RunStart(request)))
            .await;

        if !self.settings.disable_stats {
            self.monitor.start();
        }

        if self.settings.save_code {
            self.save_code().await;
        }

        if !self.settings.disable_git {
            self.save_patches().await;
        }

        self.write_metadata(&run).await;

        self.respond(&meta, Response::Empty).await;
    }

    /// Copies the user program under `<files_dir>/code/` and announces it.
    async fn save_code(&mut self) {
        let relpath = self.settings.program_relpath.clone();
        if relpath.is_empty() {
            warn!("code save requested but program_relpath is empty");
            return;
        }

        let abspath = PathBuf::from(&self.settings.program_abspath);
        if !abspath.exists() {
            warn!(path = %abspath.display(), "program path does not exist, skipping code save");
            return;
        }

        let target = self.settings.files_dir.join("code").join(&relpath);
        if let Some(parent) = target.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!(error = %e, "failed to create code directory");
                return;
            }
        }

        if !target.exists() {
            if let Err(e) = std::fs::copy(&abspath, &target) {
                error!(error = %e, "failed to copy program file");
                return;
            }
        }

        self.fwd_wandb_files(vec![FilesItem::wandb(format!("code/{relpath}"))])
            .await;
    }

    /// Captures working-tree patches: against HEAD always, and against the
    /// upstream branch when one exists.
    async fn save_patches(&mut self) {
        if !self.git.is_available() {
            return;
        }

        let mut files = Vec::with_capacity(2);

        let head_patch = self.settings.files_dir.join(DIFF_FILE_NAME);
        match self.git.save_patch("HEAD", &head_patch) {
            Ok(()) => files.push(FilesItem::wandb(DIFF_FILE_NAME)),
            Err(e) => error!(error = %e, "failed to save patch against HEAD"),
        }

        match self.git.latest_commit("@{u}") {
            Ok(sha) => {
                let name = format!("diff_{sha}.patch");
                let path = self.settings.files_dir.join(&name);
                match self.git.save_patch("@{u}", &path) {
                    Ok(()) => files.push(FilesItem::wandb(name)),
                    Err(e) => error!(error = %e, "failed to save patch against upstream"),
                }
            }
            Err(e) => debug!(error = %e, "no upstream commit, skipping upstream patch"),
        }

        self.fwd_wandb_files(files).await;
    }

    /// Writes the run metadata file from settings, the run record and an
    /// optional system probe, then announces it.
    async fn write_metadata(&mut self, run: &RunRecord) {
        if self.settings.disable_meta {
            return;
        }

        let git = run
            .git
            .clone()
            .filter(|g| !g.remote_url.is_empty() || !g.commit.is_empty());

        let started_at = run
            .start_time
            .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
            .unwrap_or_default();

        let metadata = Metadata {
            os: self.settings.os.clone(),
            python: self.settings.python.clone(),
            host: self.settings.host.clone(),
            cuda: self.settings.cuda.clone(),
            program: self.settings.program.clone(),
            code_path: self.settings.program_relpath.clone(),
            code_path_local: self.settings.code_path_local.clone(),
            email: self.settings.email.clone(),
            root: self.settings.root_dir.display().to_string(),
            username: self.settings.username.clone(),
            docker: self.settings.docker.clone(),
            executable: self.settings.executable.clone(),
            args: self.settings.args.clone(),
            colab: self.settings.colab_url.clone(),
            started_at,
            git,
        };

        let mut value = match serde_json::to_value(&metadata) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "failed to marshal metadata");
                return;
            }
        };

        if !self.settings.disable_stats {
            if let Some(info) = self.monitor.probe() {
                match serde_json::to_value(&info) {
                    Ok(probe) => merge_objects(&mut value, probe),
                    Err(e) => error!(error = %e, "failed to marshal system probe"),
                }
            }
        }

        let json = match serde_json::to_string_pretty(&value) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "failed to marshal metadata");
                return;
            }
        };

        let path = self.settings.files_dir.join(META_FILE_NAME);
        if let Err(e) = std::fs::write(&path, json) {
            error!(error = %e, path = %path.display(), "failed to write metadata file");
            return;
        }

        self.fwd_wandb_files(vec![FilesItem::wandb(META_FILE_NAME)])
            .await;
    }

    /// Writes `requirements.txt` from the reported package set and
    /// announces it.
    pub(super) async fn handle_python_packages(&mut self, request: &PythonPackagesRequest) {
        let mut contents = String::new();
        for package in &request.packages {
            contents.push_str(&package.name);
            contents.push_str("==");
            contents.push_str(&package.version);
            contents.push('\n');
        }

        let path = self.settings.files_dir.join(REQUIREMENTS_FILE_NAME);
        if let Err(e) = std::fs::write(&path, contents) {
            error!(error = %e, path = %path.display(), "failed to write requirements file");
            return;
        }

        self.fwd_wandb_files(vec![FilesItem::wandb(REQUIREMENTS_FILE_NAME)])
            .await;
    }
}

/// Merges `src`'s top-level object entries into `dst`, overwriting on
/// conflict. Non-object values leave `dst` untouched.
fn merge_objects(dst: &mut serde_json::Value, src: serde_json::Value) {
    let (Some(dst_map), serde_json::Value::Object(src_map)) = (dst.as_object_mut(), src) else {
        return;
    };
    for (key, value) in src_map {
        dst_map.insert(key, value);
    }
}
