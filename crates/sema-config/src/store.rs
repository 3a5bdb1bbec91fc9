// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::{
    HISTORY_FILES_RETAIN_COUNT, PER_PROJECT_HISTORY_LENGTH_LIMIT, PROJECT_HISTORY_LENGTH_LIMIT,
    PROJECT_LENGTH_LIMIT,
};
use crate::schema::{ModelPointers, ModelProfile, ProjectConfig};

/// Resolved locations of everything persisted under `~/.sema`.
#[derive(Debug, Clone)]
pub struct SemaPaths {
    pub root: PathBuf,
}

impl SemaPaths {
    /// Default layout rooted at `~/.sema`.
    pub fn resolve() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("cannot determine home directory")?;
        Ok(Self {
            root: home.join(".sema"),
        })
    }

    /// Layout rooted at an explicit directory.  Used by embedders and tests.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn models_file(&self) -> PathBuf {
        self.root.join("models.json")
    }

    pub fn projects_file(&self) -> PathBuf {
        self.root.join("project.json")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.root.join("history")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn llm_logs_dir(&self) -> PathBuf {
        self.root.join("llm_logs")
    }

    pub fn tracks_dir(&self) -> PathBuf {
        self.root.join("tracks")
    }

    pub fn events_dir(&self) -> PathBuf {
        self.root.join("event")
    }
}

/// `models.json`: named model profiles plus the `{main, quick}` pointers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsFile {
    #[serde(default)]
    pub profiles: HashMap<String, ModelProfile>,
    #[serde(default)]
    pub pointers: Option<ModelPointers>,
}

/// `project.json`: per-working-directory project configs, LRU-bounded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectsFile {
    #[serde(default)]
    pub projects: HashMap<String, ProjectConfig>,
}

/// Synchronous store for everything under `~/.sema`.  All methods are
/// load→mutate→save; the engine serializes access behind its own locks.
#[derive(Debug, Clone)]
pub struct Store {
    paths: SemaPaths,
}

impl Store {
    pub fn new(paths: SemaPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &SemaPaths {
        &self.paths
    }

    fn read_json<T: for<'de> Deserialize<'de> + Default>(&self, path: &Path) -> anyhow::Result<T> {
        if !path.is_file() {
            return Ok(T::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(value)?;
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
    }

    // ── Models ────────────────────────────────────────────────────────────────

    pub fn load_models(&self) -> anyhow::Result<ModelsFile> {
        self.read_json(&self.paths.models_file())
    }

    pub fn save_models(&self, models: &ModelsFile) -> anyhow::Result<()> {
        self.write_json(&self.paths.models_file(), models)
    }

    // ── Projects ──────────────────────────────────────────────────────────────

    /// Load the config for one working directory, creating a default entry
    /// in memory when none exists yet.
    pub fn load_project(&self, working_dir: &Path) -> anyhow::Result<ProjectConfig> {
        let file: ProjectsFile = self.read_json(&self.paths.projects_file())?;
        Ok(file
            .projects
            .get(&key_for(working_dir))
            .cloned()
            .unwrap_or_default())
    }

    /// Persist the config for one working directory, stamping `updated_at`
    /// and evicting the least recently used project beyond the limit.
    pub fn save_project(&self, working_dir: &Path, mut config: ProjectConfig) -> anyhow::Result<()> {
        let path = self.paths.projects_file();
        let mut file: ProjectsFile = self.read_json(&path)?;
        config.updated_at = Some(chrono::Utc::now());
        if config.history.len() > PROJECT_HISTORY_LENGTH_LIMIT {
            let drop = config.history.len() - PROJECT_HISTORY_LENGTH_LIMIT;
            config.history.drain(..drop);
        }
        file.projects.insert(key_for(working_dir), config);

        while file.projects.len() > PROJECT_LENGTH_LIMIT {
            let oldest = file
                .projects
                .iter()
                .min_by_key(|(_, p)| p.updated_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    debug!(project = %k, "evicting least recently used project entry");
                    file.projects.remove(&k);
                }
                None => break,
            }
        }

        self.write_json(&path, &file)
    }

    /// Append one user input to the project's history ring.
    pub fn record_input(&self, working_dir: &Path, input: &str) -> anyhow::Result<()> {
        let mut config = self.load_project(working_dir)?;
        config.history.push(input.to_string());
        self.save_project(working_dir, config)
    }

    // ── Session transcripts ───────────────────────────────────────────────────

    /// Open an append-only transcript for a new session and prune old files
    /// past the retention limits.
    pub fn open_transcript(
        &self,
        session_id: &str,
        working_dir: &Path,
    ) -> anyhow::Result<TranscriptWriter> {
        let dir = self.paths.history_dir();
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        self.prune_transcripts(&dir, working_dir);

        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
        let path = dir.join(format!("{stamp}-{session_id}.jsonl"));
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        Ok(TranscriptWriter {
            file,
            path,
            project: key_for(working_dir),
        })
    }

    fn prune_transcripts(&self, dir: &Path, working_dir: &Path) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "jsonl").unwrap_or(false))
            .collect();
        // Transcript names start with a UTC timestamp, so lexical order is
        // chronological order.
        files.sort();

        let project_key = key_for(working_dir);
        let mut per_project: Vec<PathBuf> = files
            .iter()
            .filter(|p| transcript_project(p).as_deref() == Some(project_key.as_str()))
            .cloned()
            .collect();

        while per_project.len() >= PER_PROJECT_HISTORY_LENGTH_LIMIT {
            let victim = per_project.remove(0);
            files.retain(|p| p != &victim);
            remove_transcript(&victim);
        }
        while files.len() >= HISTORY_FILES_RETAIN_COUNT {
            let victim = files.remove(0);
            remove_transcript(&victim);
        }
    }
}

fn remove_transcript(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "failed to prune transcript");
    }
}

/// First line of a transcript records `{"project": …}`; used for per-project
/// retention without encoding the project in the filename.
fn transcript_project(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    let first = text.lines().next()?;
    let v: serde_json::Value = serde_json::from_str(first).ok()?;
    v.get("project")?.as_str().map(str::to_string)
}

fn key_for(working_dir: &Path) -> String {
    working_dir.to_string_lossy().into_owned()
}

/// Append-only JSONL writer for one session transcript.
#[derive(Debug)]
pub struct TranscriptWriter {
    file: std::fs::File,
    path: PathBuf,
    project: String,
}

impl TranscriptWriter {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the transcript header.  Must be the first record so retention
    /// pruning can attribute the file to a project.
    pub fn write_header(&mut self, session_id: &str) -> anyhow::Result<()> {
        let header = serde_json::json!({
            "project": self.project,
            "session_id": session_id,
            "started_at": chrono::Utc::now(),
        });
        self.append(&header)
    }

    pub fn append(&mut self, record: &serde_json::Value) -> anyhow::Result<()> {
        let line = serde_json::to_string(record)?;
        writeln!(self.file, "{line}").context("appending transcript record")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(SemaPaths::rooted_at(dir.path()));
        (dir, store)
    }

    #[test]
    fn missing_files_load_as_defaults() {
        let (_dir, store) = store();
        assert!(store.load_models().unwrap().profiles.is_empty());
        assert!(store
            .load_project(Path::new("/work/a"))
            .unwrap()
            .allowed_tools
            .is_empty());
    }

    #[test]
    fn project_config_roundtrips_through_disk() {
        let (_dir, store) = store();
        let wd = Path::new("/work/a");
        let mut pc = ProjectConfig::default();
        pc.allowed_tools.push("Bash(ls:*)".to_string());
        store.save_project(wd, pc).unwrap();
        let back = store.load_project(wd).unwrap();
        assert_eq!(back.allowed_tools, vec!["Bash(ls:*)"]);
    }

    #[test]
    fn record_input_caps_history_ring() {
        let (_dir, store) = store();
        let wd = Path::new("/work/a");
        for i in 0..(PROJECT_HISTORY_LENGTH_LIMIT + 5) {
            store.record_input(wd, &format!("input {i}")).unwrap();
        }
        let back = store.load_project(wd).unwrap();
        assert_eq!(back.history.len(), PROJECT_HISTORY_LENGTH_LIMIT);
        assert_eq!(back.history.last().unwrap(), "input 14");
    }

    #[test]
    fn projects_are_lru_evicted_beyond_limit() {
        let (_dir, store) = store();
        for i in 0..(PROJECT_LENGTH_LIMIT + 3) {
            let wd = format!("/work/p{i}");
            store
                .save_project(Path::new(&wd), ProjectConfig::default())
                .unwrap();
        }
        let file: ProjectsFile = store.read_json(&store.paths().projects_file()).unwrap();
        assert_eq!(file.projects.len(), PROJECT_LENGTH_LIMIT);
        // The first-saved projects are the eviction victims.
        assert!(!file.projects.contains_key("/work/p0"));
        assert!(file.projects.contains_key(&format!(
            "/work/p{}",
            PROJECT_LENGTH_LIMIT + 2
        )));
    }

    #[test]
    fn transcript_header_attributes_project() {
        let (_dir, store) = store();
        let wd = Path::new("/work/a");
        let mut tw = store.open_transcript("sess-1", wd).unwrap();
        tw.write_header("sess-1").unwrap();
        assert_eq!(
            transcript_project(tw.path()).as_deref(),
            Some("/work/a")
        );
    }

    #[test]
    fn transcripts_pruned_per_project() {
        let (_dir, store) = store();
        let wd = Path::new("/work/a");
        for i in 0..(PER_PROJECT_HISTORY_LENGTH_LIMIT + 4) {
            let mut tw = store.open_transcript(&format!("s{i:03}"), wd).unwrap();
            tw.write_header(&format!("s{i:03}")).unwrap();
        }
        let count = std::fs::read_dir(store.paths().history_dir())
            .unwrap()
            .count();
        assert!(count <= PER_PROJECT_HISTORY_LENGTH_LIMIT);
    }
}
