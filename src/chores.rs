//! Post-run chores: output dump, report generation and temp file cleanup.
//!
//! These run after the planner returns, whether it succeeded or not. Report
//! files never overwrite an existing file; an indexed name such as
//! `report (0).md` is picked instead.

use crate::error::Result;
use crate::storage::{Resource, RuntimeData};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const OUTPUTS_FILE_NAME: &str = "outputs.md";
pub const REPORT_FILE_NAME: &str = "report.md";

/// First `stem (i).ext` in the same directory that does not exist yet
pub fn indexed_filename(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().to_string());

    let mut index = 0;
    loop {
        let name = match &extension {
            Some(ext) => format!("{} ({}).{}", stem, index, ext),
            None => format!("{} ({})", stem, index),
        };
        let candidate = path.with_file_name(name);
        if !candidate.exists() {
            return candidate;
        }
        index += 1;
    }
}

fn available_filename(path: PathBuf) -> PathBuf {
    if path.exists() {
        indexed_filename(&path)
    } else {
        path
    }
}

/// Markdown listing every note, under a `# Notes` heading
pub fn notes_markdown(storage: &RuntimeData) -> String {
    let mut notes = String::from("# Notes\n");
    for note in &storage.notes {
        notes.push_str(&note.markdown());
    }
    notes
}

/// Markdown table of every resource, under a `# Resources` heading
pub fn resources_markdown(storage: &RuntimeData) -> String {
    let mut resources = String::from("# Resources\n");
    resources.push_str(Resource::table_header());
    for resource in &storage.resources {
        resources.push_str(&resource.row_markdown());
    }
    resources
}

/// Post-run tasks over a run's [`RuntimeData`]
#[derive(Debug, Clone)]
pub struct Chores {
    workdir: PathBuf,
    pub should_dump_output: bool,
    pub should_generate_report: bool,
}

impl Chores {
    /// Creates `workdir` if needed
    pub fn new(workdir: impl Into<PathBuf>, dump_output: bool, generate_report: bool) -> Result<Self> {
        let workdir = workdir.into();
        fs::create_dir_all(&workdir)?;
        Ok(Self {
            workdir,
            should_dump_output: dump_output,
            should_generate_report: generate_report,
        })
    }

    /// Write every command output to `filename` in the workdir and register
    /// the file as a resource. Returns the path written.
    pub fn dump_output(&self, storage: &mut RuntimeData, filename: &str) -> Result<PathBuf> {
        let path = available_filename(self.workdir.join(filename));
        let mut content = String::from("## Outputs\n");
        for output in &storage.outputs {
            content.push_str(&output.markdown());
        }
        fs::write(&path, content)?;
        info!("Dumped {} command outputs to {}", storage.outputs.len(), path.display());

        storage.append_resource(
            Resource::new("Output dump", path.display().to_string(), "Markdown file")
                .with_details("A dump of all the executed commands"),
        );
        Ok(path)
    }

    /// Write notes and resources to `filename` in the workdir.
    ///
    /// Nothing is written when the run produced neither; otherwise the report
    /// lists itself among the resources. Returns the path and the Markdown.
    pub fn generate_report(
        &self,
        storage: &mut RuntimeData,
        filename: &str,
    ) -> Result<Option<(PathBuf, String)>> {
        if storage.resources.is_empty() && storage.notes.is_empty() {
            return Ok(None);
        }

        let path = available_filename(self.workdir.join(filename));
        storage.append_resource(
            Resource::new("Cluster Report", path.display().to_string(), "Markdown file")
                .with_details("A report containing all the details about the created cluster"),
        );

        let mut report = String::new();
        if !storage.notes.is_empty() {
            report = notes_markdown(storage);
        }
        report.push('\n');
        report.push_str(&resources_markdown(storage));

        fs::write(&path, &report)?;
        info!("Report written to {}", path.display());
        Ok(Some((path, report)))
    }

    /// Remove every registered temporary file. Missing files are skipped.
    pub fn delete_temporary_files(&self, storage: &RuntimeData) {
        for file in &storage.temp_files {
            if let Err(e) = fs::remove_file(file) {
                warn!("Failed to delete temporary file {}: {}", file, e);
            }
        }
    }

    /// Run the enabled chores. Returns the report Markdown when one was written.
    pub fn cleanup(&self, storage: &mut RuntimeData) -> Result<Option<String>> {
        if self.should_dump_output && !storage.outputs.is_empty() {
            self.dump_output(storage, OUTPUTS_FILE_NAME)?;
        }
        let mut report = None;
        if self.should_generate_report {
            report = self
                .generate_report(storage, REPORT_FILE_NAME)?
                .map(|(_, markdown)| markdown);
        }
        self.delete_temporary_files(storage);
        Ok(report)
    }
}
