//! Run-scoped result store
//!
//! `RuntimeData` accumulates everything a run produces: the output of every
//! executed command, the resources generated by successful steps, notes to
//! surface to the user and temporary files to remove afterwards. It is owned
//! by the caller and handed to the planner by `&mut`.

use serde::{Deserialize, Serialize};

fn placeholder() -> String {
    "-".to_string()
}

/// A file or object generated during the run (kubeconfig, dashboards, reports)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "placeholder")]
    pub details: String,
    #[serde(default = "placeholder")]
    pub reference: String,
}

impl Resource {
    pub fn new(name: impl Into<String>, path: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind: kind.into(),
            details: placeholder(),
            reference: placeholder(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    /// Markdown table header matching `row_markdown`
    pub fn table_header() -> &'static str {
        "| Name | Type | Path | Details | References |\n| --- | --- | --- | --- | --- |\n"
    }

    pub fn row_markdown(&self) -> String {
        format!(
            "| {} | {} | {} | {} | {} |\n",
            self.name, self.kind, self.path, self.details, self.reference
        )
    }
}

/// Captured result of one executed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub title: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn markdown(&self) -> String {
        format!(
            "\n## {}\n### Stdout\n```\n{}\n```\n### Stderr\n```\n{}\n```\n",
            self.title, self.stdout, self.stderr
        )
    }
}

/// A message surfaced to the user once the run is over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportNote {
    #[serde(default)]
    pub title: Option<String>,
    pub message: String,
}

impl ReportNote {
    pub fn markdown(&self) -> String {
        match &self.title {
            Some(title) => format!("## {} \n{}\n\n", title, self.message),
            None => format!("{}\n\n", self.message),
        }
    }
}

/// Accumulator for outputs, resources, notes and temporary files of one run.
///
/// All collections are append-only from the planner's point of view.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RuntimeData {
    pub outputs: Vec<CommandOutput>,
    pub resources: Vec<Resource>,
    pub notes: Vec<ReportNote>,
    pub temp_files: Vec<String>,
}

impl RuntimeData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_output(
        &mut self,
        title: impl Into<String>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: i32,
    ) {
        self.outputs.push(CommandOutput {
            title: title.into(),
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        });
    }

    pub fn append_resource(&mut self, resource: Resource) {
        self.resources.push(resource);
    }

    pub fn append_note(&mut self, message: impl Into<String>, title: Option<String>) {
        self.notes.push(ReportNote {
            title,
            message: message.into(),
        });
    }

    /// Register a file to be deleted by the cleanup chores
    pub fn append_temp_file(&mut self, path: impl Into<String>) {
        self.temp_files.push(path.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_defaults_to_placeholders() {
        let resource = Resource::new("kubeconfig", "/tmp/kubeconfig", "YAML file");
        assert_eq!(resource.details, "-");
        assert_eq!(resource.reference, "-");
        assert_eq!(
            resource.row_markdown(),
            "| kubeconfig | YAML file | /tmp/kubeconfig | - | - |\n"
        );
    }

    #[test]
    fn test_resource_deserializes_type_field() {
        let resource: Resource =
            serde_json::from_str(r#"{"name":"n","path":"p","type":"Markdown file"}"#).unwrap();
        assert_eq!(resource.kind, "Markdown file");
        assert_eq!(resource.details, "-");
    }

    #[test]
    fn test_note_markdown_with_and_without_title() {
        let plain = ReportNote {
            title: None,
            message: "Run kubectl get pods".to_string(),
        };
        assert_eq!(plain.markdown(), "Run kubectl get pods\n\n");

        let titled = ReportNote {
            title: Some("Rancher".to_string()),
            message: "Open https://rancher.localhost".to_string(),
        };
        assert_eq!(titled.markdown(), "## Rancher \nOpen https://rancher.localhost\n\n");
    }

    #[test]
    fn test_command_output_markdown_sections() {
        let output = CommandOutput {
            title: "create cluster".to_string(),
            stdout: "created".to_string(),
            stderr: String::new(),
            exit_code: 0,
        };
        let md = output.markdown();
        assert!(md.contains("## create cluster"));
        assert!(md.contains("### Stdout\n```\ncreated\n```"));
        assert!(md.contains("### Stderr"));
    }

    #[test]
    fn test_runtime_data_appends_in_order() {
        let mut data = RuntimeData::new();
        data.append_output("a", "1", "", 0);
        data.append_output("b", "", "boom", 2);
        data.append_note("check the logs", None);
        data.append_temp_file("/tmp/values.yaml");

        assert_eq!(data.outputs.len(), 2);
        assert_eq!(data.outputs[0].title, "a");
        assert_eq!(data.outputs[1].exit_code, 2);
        assert_eq!(data.notes[0].message, "check the logs");
        assert_eq!(data.temp_files, vec!["/tmp/values.yaml".to_string()]);
    }
}
