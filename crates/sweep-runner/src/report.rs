use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use serde_json::{json, Value};

use crate::aggregate::AggregateState;
use crate::driver::RunSummary;
use crate::parse::render_sample;

/// Two labeled lines, maxima first.
pub fn render_text(state: &AggregateState) -> String {
    format!(
        "max_val: {}\nmin_val: {}\n",
        render_sample(&state.maxima),
        render_sample(&state.minima)
    )
}

pub fn summary_to_json(summary: &RunSummary, include_trials: bool) -> Value {
    let mut value = json!({
        "ok": true,
        "evaluator": summary.evaluator.display().to_string(),
        "started_at": summary.started_at.to_rfc3339(),
        "elapsed_ms": summary.elapsed.as_millis() as u64,
        "trials": summary.trial_count,
        "arity": summary.arity,
        "abnormal_exits": summary.abnormal_exits,
        "max_val": summary.state.maxima,
        "min_val": summary.state.minima,
    });
    if include_trials {
        if let Some(obj) = value.as_object_mut() {
            obj.insert("trial_records".to_string(), json!(summary.trials));
        }
    }
    value
}

/// One JSON record per trial, written through a temp file and renamed into place.
pub fn write_samples_jsonl(path: &Path, summary: &RunSummary) -> Result<()> {
    let mut body = Vec::new();
    for record in &summary.trials {
        serde_json::to_writer(&mut body, record)?;
        body.push(b'\n');
    }
    atomic_write_bytes(path, &body)
}

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("samples");
    let tmp = path.with_file_name(format!(".{}.tmp.{}", file_name, std::process::id()));
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::TrialRecord;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::time::Duration;

    fn summary() -> RunSummary {
        RunSummary {
            started_at: Utc::now(),
            elapsed: Duration::from_millis(12),
            evaluator: PathBuf::from("./target/debug/automode-eval"),
            trial_count: 2,
            arity: 3,
            abnormal_exits: 0,
            state: AggregateState {
                minima: vec![0.5, 2.0, 0.0],
                maxima: vec![1.0, 2.5, 0.0],
            },
            trials: vec![
                TrialRecord {
                    index: 1,
                    status: "0".to_string(),
                    elapsed_ms: 5,
                    sample: Some(vec![1.0, 2.0, 0.0]),
                },
                TrialRecord {
                    index: 2,
                    status: "0".to_string(),
                    elapsed_ms: 7,
                    sample: Some(vec![0.5, 2.5, 0.0]),
                },
            ],
        }
    }

    #[test]
    fn text_report_labels_both_vectors() {
        let text = render_text(&summary().state);
        assert_eq!(
            text,
            "max_val: [1.0, 2.5, 0.0]\nmin_val: [0.5, 2.0, 0.0]\n"
        );
    }

    #[test]
    fn json_report_is_tagged() {
        let value = summary_to_json(&summary(), false);
        assert_eq!(value["ok"], json!(true));
        assert_eq!(value["max_val"], json!([1.0, 2.5, 0.0]));
        assert_eq!(value["min_val"], json!([0.5, 2.0, 0.0]));
        assert_eq!(value["trials"], json!(2));
        assert!(value.get("trial_records").is_none());

        let with_trials = summary_to_json(&summary(), true);
        assert_eq!(with_trials["trial_records"][1]["sample"], json!([0.5, 2.5, 0.0]));
    }

    #[test]
    fn samples_jsonl_has_one_record_per_trial() {
        let dir = std::env::temp_dir().join(format!(
            "sweep_report_test_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        let path = dir.join("audit").join("samples.jsonl");
        write_samples_jsonl(&path, &summary()).expect("write");
        let body = fs::read_to_string(&path).expect("read");
        let lines = body.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(first["index"], json!(1));
        assert_eq!(first["sample"], json!([1.0, 2.0, 0.0]));
        let _ = fs::remove_dir_all(dir);
    }
}
