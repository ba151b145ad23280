//! Per-attempt debug artifacts
//!
//! Written under `{base_path}/llm_responses_raw/`. Failures to write are
//! logged and swallowed so the request path never depends on the disk.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error};

pub const RESPONSES_DIR: &str = "llm_responses_raw";

const SEPARATOR_WIDTH: usize = 80;

/// How an attempt ended, as far as the artifact is concerned
#[derive(Debug, Clone, Copy)]
pub enum ArtifactOutcome<'a> {
    Success { validation: &'a str, post_processed: bool },
    Failure { error: &'a str },
}

/// Text artifact for one attempt
#[derive(Debug, Clone, Copy)]
pub struct AttemptArtifact<'a> {
    pub stage: &'a str,
    pub model: &'a str,
    pub attempt: u32,
    pub text: &'a str,
    pub outcome: ArtifactOutcome<'a>,
}

impl AttemptArtifact<'_> {
    fn file_name(&self, timestamp: &str) -> String {
        let stage = sanitize(self.stage);
        match self.outcome {
            ArtifactOutcome::Success { .. } => {
                format!("{}_response_attempt{}_{}.txt", stage, self.attempt, timestamp)
            }
            ArtifactOutcome::Failure { .. } => {
                format!("ERROR_{}_response_attempt{}_{}.txt", stage, self.attempt, timestamp)
            }
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("TIMESTAMP: {}\n", Utc::now().to_rfc3339()));
        out.push_str(&format!("MODEL: {}\n", self.model));
        out.push_str(&format!("STAGE: {}\n", self.stage));
        out.push_str(&format!("ATTEMPT: {}\n", self.attempt));
        match self.outcome {
            ArtifactOutcome::Success {
                validation,
                post_processed,
            } => {
                out.push_str("OUTCOME: SUCCESS\n");
                out.push_str(&format!("VALIDATION: {}\n", validation));
                out.push_str(&format!("POST_PROCESSED: {}\n", post_processed));
            }
            ArtifactOutcome::Failure { error } => {
                out.push_str("OUTCOME: FAILURE\n");
                out.push_str(&format!("ERROR: {}\n", error));
            }
        }
        out.push_str(&format!("RESPONSE_LENGTH: {}\n", self.text.chars().count()));
        out.push_str(&"=".repeat(SEPARATOR_WIDTH));
        out.push_str("\n\n");
        out.push_str(self.text);
        out
    }
}

/// Writes attempt artifacts for one base directory
#[derive(Debug, Clone)]
pub struct ArtifactSink {
    dir: PathBuf,
}

impl ArtifactSink {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            dir: base_path.as_ref().join(RESPONSES_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Undecoded vendor payload for an attempt
    pub async fn save_raw(&self, stage: &str, attempt: u32, raw: &Value) -> Option<PathBuf> {
        let name = format!(
            "{}_raw_obj_attempt{}_{}.json",
            sanitize(stage),
            attempt,
            timestamp()
        );
        let body = match serde_json::to_string_pretty(raw) {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to serialize raw response for {}: {}", stage, e);
                return None;
            }
        };
        self.write(&name, body).await
    }

    pub async fn save_attempt(&self, artifact: &AttemptArtifact<'_>) -> Option<PathBuf> {
        let name = artifact.file_name(&timestamp());
        self.write(&name, artifact.render()).await
    }

    async fn write(&self, name: &str, body: String) -> Option<PathBuf> {
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            error!("Failed to create {}: {}", self.dir.display(), e);
            return None;
        }
        let path = self.dir.join(name);
        match tokio::fs::write(&path, body).await {
            Ok(()) => {
                debug!("Saved artifact {}", path.display());
                Some(path)
            }
            Err(e) => {
                error!("Failed to write artifact {}: {}", path.display(), e);
                None
            }
        }
    }
}

fn timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// Keep stage names filesystem-safe
fn sanitize(stage: &str) -> String {
    stage
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_success_artifact_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = ArtifactSink::new(tmp.path());
        let path = sink
            .save_attempt(&AttemptArtifact {
                stage: "translation_section_2",
                model: "deepseek-reasoner",
                attempt: 2,
                text: "Translated body.",
                outcome: ArtifactOutcome::Success {
                    validation: "statistical",
                    post_processed: false,
                },
            })
            .await
            .unwrap();

        assert!(path.starts_with(tmp.path().join(RESPONSES_DIR)));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("translation_section_2_response_attempt2_"));
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("MODEL: deepseek-reasoner\n"));
        assert!(body.contains("ATTEMPT: 2\n"));
        assert!(body.contains("RESPONSE_LENGTH: 16\n"));
        assert!(body.contains(&"=".repeat(80)));
        assert!(body.ends_with("Translated body."));
    }

    #[tokio::test]
    async fn test_failure_and_raw_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = ArtifactSink::new(tmp.path());
        sink.save_attempt(&AttemptArtifact {
            stage: "fact_check",
            model: "gemini-2.5-flash",
            attempt: 1,
            text: "short",
            outcome: ArtifactOutcome::Failure {
                error: "too_short (5 < 300 chars)",
            },
        })
        .await
        .unwrap();
        sink.save_raw("fact_check", 1, &serde_json::json!({"candidates": []}))
            .await
            .unwrap();

        let names = file_names(sink.dir());
        assert_eq!(names.len(), 2);
        assert!(names[0].starts_with("ERROR_fact_check_response_attempt1_"));
        assert!(names[1].starts_with("fact_check_raw_obj_attempt1_"));
        assert!(names[1].ends_with(".json"));
    }

    #[tokio::test]
    async fn test_unwritable_dir_is_swallowed() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not_a_dir");
        std::fs::write(&blocker, "file").unwrap();
        let sink = ArtifactSink::new(&blocker);
        assert!(sink.save_raw("stage", 1, &Value::Null).await.is_none());
    }

    #[test]
    fn test_sanitize_stage() {
        assert_eq!(sanitize("links/section 1"), "links_section_1");
    }
}
