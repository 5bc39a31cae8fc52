use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;

use super::graph::TaskGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Completed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub action: String,
    pub status: StepStatus,
    pub seconds: f64,
}

/// Outcome of one pipeline run, in step declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub steps: Vec<StepRecord>,
    pub total_seconds: f64,
    pub error: Option<String>,
}

impl RunReport {
    pub fn reset(&mut self, graph: &TaskGraph) {
        self.steps = (0..graph.len())
            .map(|idx| {
                let step = graph.step(idx);
                StepRecord {
                    name: step.name.clone(),
                    action: step.action.to_string(),
                    status: StepStatus::Pending,
                    seconds: 0.0,
                }
            })
            .collect();
        self.total_seconds = 0.0;
        self.error = None;
    }

    pub fn set(&mut self, idx: usize, status: StepStatus, seconds: f64) {
        if let Some(record) = self.steps.get_mut(idx) {
            record.status = status;
            record.seconds = seconds;
        }
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self).map_err(io::Error::other)
    }
}

/// Generate a formatted text summary of a run.
pub fn generate_report(report: &RunReport) -> String {
    let mut text = String::new();

    text.push_str("Pipeline Run Summary\n");
    text.push_str("====================\n\n");
    text.push_str(&format!(
        "  Steps: {} completed, {} skipped, {} failed, {} not run\n",
        report.count(StepStatus::Completed),
        report.count(StepStatus::Skipped),
        report.count(StepStatus::Failed),
        report.count(StepStatus::Pending),
    ));
    text.push_str(&format!(
        "  Wall time: {:.2} seconds\n\n",
        report.total_seconds
    ));

    let width = report.steps.iter().map(|s| s.name.len()).max().unwrap_or(0);
    for step in &report.steps {
        text.push_str(&format!(
            "  {:<width$}  {:<9}  {:>9.2}s\n",
            step.name,
            format!("{:?}", step.status).to_lowercase(),
            step.seconds,
            width = width
        ));
    }

    if let Some(error) = &report.error {
        text.push_str("\nStopped with error:\n");
        text.push_str(error);
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::step::Step;
    use tempfile::tempdir;

    fn sample_report() -> RunReport {
        let graph = TaskGraph::new(vec![
            Step::internal("assemble", "assemble", || Ok(())).output("contigs.fa"),
            Step::internal("relabel", "relabel", || Ok(()))
                .input("contigs.fa")
                .output("relabeled.fa"),
        ])
        .unwrap();
        let mut report = RunReport::default();
        report.reset(&graph);
        report.set(0, StepStatus::Completed, 1.5);
        report.set(1, StepStatus::Failed, 0.0);
        report.error = Some("Step 'relabel' failed: bad fasta".to_string());
        report
    }

    #[test]
    fn test_text_report_counts_statuses() {
        let text = generate_report(&sample_report());
        assert!(text.contains("1 completed, 0 skipped, 1 failed, 0 not run"));
        assert!(text.contains("assemble  completed"));
        assert!(text.contains("Stopped with error:\nStep 'relabel' failed: bad fasta"));
    }

    #[test]
    fn test_json_report_round_trips_statuses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run_report.json");
        sample_report().write_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(value["steps"][0]["status"], "completed");
        assert_eq!(value["steps"][1]["status"], "failed");
        assert_eq!(value["steps"][1]["action"], "[internal] relabel");
    }
}
