//! Oracle abstraction for reasoning backends.
//!
//! The [`Oracle`] trait reduces a model to `prompt -> text` under a deadline.
//! Bundled backends spawn a local command ([`CommandOracle`]) or call the Gemini
//! `generateContent` API ([`GeminiOracle`]). Tests use scripted oracles that
//! return predetermined completions without spawning anything.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::config::{OracleConfig, OracleProvider};
use crate::io::process::run_command_with_timeout;

/// Parameters for one completion.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    /// Prompt text sent to the model.
    pub prompt: String,
    /// Remaining wall-clock budget for this completion.
    pub timeout: Duration,
}

/// Transport-level failure of one completion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleCallError {
    #[error("completion timed out")]
    TimedOut,
    #[error("{0}")]
    Failed(String),
}

/// Abstraction over completion backends.
pub trait Oracle {
    fn complete(&self, request: &OracleRequest) -> Result<String, OracleCallError>;
}

impl<T: Oracle + ?Sized> Oracle for Box<T> {
    fn complete(&self, request: &OracleRequest) -> Result<String, OracleCallError> {
        (**self).complete(request)
    }
}

/// Build the oracle selected by `config.provider`.
pub fn oracle_from_config(config: &OracleConfig, workdir: &Path) -> Result<Box<dyn Oracle>> {
    match config.provider {
        OracleProvider::Command => Ok(Box::new(CommandOracle::new(
            config.command.clone(),
            workdir,
            config.output_limit_bytes,
        )?)),
        OracleProvider::Gemini => Ok(Box::new(GeminiOracle::from_config(config)?)),
    }
}

/// Oracle that spawns a command, writes the prompt to stdin and reads stdout.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    argv: Vec<String>,
    workdir: PathBuf,
    output_limit_bytes: usize,
}

impl CommandOracle {
    pub fn new(argv: Vec<String>, workdir: &Path, output_limit_bytes: usize) -> Result<Self> {
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!("oracle command must name a program"));
        }
        Ok(Self {
            argv,
            workdir: workdir.to_path_buf(),
            output_limit_bytes,
        })
    }

    fn program(&self) -> &str {
        &self.argv[0]
    }
}

impl Oracle for CommandOracle {
    #[instrument(skip_all, fields(program = %self.program(), timeout_ms = request.timeout.as_millis() as u64))]
    fn complete(&self, request: &OracleRequest) -> Result<String, OracleCallError> {
        let mut cmd = Command::new(self.program());
        cmd.args(&self.argv[1..]).current_dir(&self.workdir);

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            self.output_limit_bytes,
        )
        .map_err(|err| OracleCallError::Failed(format!("run {}: {err:#}", self.program())))?;

        if output.timed_out {
            warn!("oracle command timed out");
            return Err(OracleCallError::TimedOut);
        }
        if !output.status.success() {
            let stderr = output.stderr_text();
            warn!(exit_code = ?output.status.code(), "oracle command failed");
            let mut detail = format!(
                "{} exited with status {:?}",
                self.program(),
                output.status.code()
            );
            if !stderr.is_empty() {
                detail.push_str(": ");
                detail.push_str(&stderr);
            }
            return Err(OracleCallError::Failed(detail));
        }

        debug!(
            stdout_bytes = output.stdout.len(),
            truncated = output.stdout_truncated,
            "oracle command completed"
        );
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Oracle backed by the Gemini `generateContent` REST API.
pub struct GeminiOracle {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
}

impl GeminiOracle {
    /// Build a client, reading the API key from `config.api_key_env`.
    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .with_context(|| format!("environment variable {} is not set", config.api_key_env))?;
        let client = reqwest::blocking::Client::builder()
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        )
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<GenerateContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GenerateContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

fn request_body(prompt: &str, temperature: f32) -> GenerateRequest<'_> {
    GenerateRequest {
        contents: vec![GenerateContent {
            role: "user",
            parts: vec![RequestPart { text: prompt }],
        }],
        generation_config: GenerationConfig { temperature },
    }
}

/// Concatenate the text parts of the first candidate.
fn completion_text(body: &str) -> Result<String> {
    let parsed: GenerateResponse = serde_json::from_str(body).context("parse gemini response")?;
    if let Some(error) = parsed.error {
        return Err(anyhow!("gemini api error: {}", error.message));
    }
    let content = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .ok_or_else(|| anyhow!("gemini response has no candidates"))?;
    Ok(content
        .parts
        .into_iter()
        .filter_map(|part| part.text)
        .collect::<Vec<_>>()
        .join(""))
}

impl Oracle for GeminiOracle {
    #[instrument(skip_all, fields(model = %self.model, timeout_ms = request.timeout.as_millis() as u64))]
    fn complete(&self, request: &OracleRequest) -> Result<String, OracleCallError> {
        info!("calling gemini generateContent");
        let response = self
            .client
            .post(self.endpoint())
            .timeout(request.timeout)
            .json(&request_body(&request.prompt, self.temperature))
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    OracleCallError::TimedOut
                } else {
                    // Drop the url: it carries the api key.
                    OracleCallError::Failed(format!("gemini request failed: {}", err.without_url()))
                }
            })?;

        let status = response.status();
        let body = response.text().map_err(|err| {
            if err.is_timeout() {
                OracleCallError::TimedOut
            } else {
                OracleCallError::Failed(format!("read gemini response: {}", err.without_url()))
            }
        })?;
        if !status.is_success() {
            warn!(%status, "gemini returned an error status");
            return Err(OracleCallError::Failed(format!("gemini http {status}: {body}")));
        }

        completion_text(&body).map_err(|err| OracleCallError::Failed(format!("{err:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sh(script: &str) -> CommandOracle {
        let temp = std::env::temp_dir();
        CommandOracle::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            &temp,
            10_000,
        )
        .expect("oracle")
    }

    fn request(prompt: &str, timeout: Duration) -> OracleRequest {
        OracleRequest {
            prompt: prompt.to_string(),
            timeout,
        }
    }

    #[test]
    fn command_oracle_pipes_prompt_through() {
        let oracle = sh("tr a-z A-Z");
        let text = oracle
            .complete(&request("hello", Duration::from_secs(5)))
            .expect("complete");
        assert_eq!(text, "HELLO");
    }

    #[test]
    fn command_oracle_reports_non_zero_exit() {
        let oracle = sh("cat >/dev/null; echo boom >&2; exit 3");
        let err = oracle
            .complete(&request("hello", Duration::from_secs(5)))
            .unwrap_err();
        let OracleCallError::Failed(detail) = err else {
            panic!("expected failure, got {err:?}");
        };
        assert!(detail.contains("Some(3)"), "{detail}");
        assert!(detail.contains("boom"), "{detail}");
    }

    #[test]
    fn command_oracle_reports_timeout() {
        let oracle = sh("exec sleep 5");
        let err = oracle
            .complete(&request("hello", Duration::from_millis(100)))
            .unwrap_err();
        assert_eq!(err, OracleCallError::TimedOut);
    }

    #[test]
    fn command_oracle_reports_missing_program() {
        let oracle = CommandOracle::new(
            vec!["triage-no-such-oracle-binary".to_string()],
            &std::env::temp_dir(),
            1_000,
        )
        .expect("oracle");
        let err = oracle
            .complete(&request("hello", Duration::from_secs(1)))
            .unwrap_err();
        assert!(matches!(err, OracleCallError::Failed(_)));
    }

    #[test]
    fn command_oracle_requires_program() {
        assert!(CommandOracle::new(Vec::new(), &std::env::temp_dir(), 1_000).is_err());
        assert!(CommandOracle::new(vec![" ".to_string()], &std::env::temp_dir(), 1_000).is_err());
    }

    #[test]
    fn gemini_requires_api_key_env() {
        let config = OracleConfig {
            provider: OracleProvider::Gemini,
            api_key_env: "TRIAGE_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..OracleConfig::default()
        };
        let err = GeminiOracle::from_config(&config).err().expect("missing key");
        assert!(
            err.to_string()
                .contains("TRIAGE_TEST_KEY_THAT_IS_NEVER_SET")
        );
    }

    #[test]
    fn gemini_request_body_shape() {
        let body = serde_json::to_value(request_body("route this", 0.0)).expect("json");
        assert_eq!(
            body,
            json!({
                "contents": [{"role": "user", "parts": [{"text": "route this"}]}],
                "generationConfig": {"temperature": 0.0}
            })
        );
    }

    #[test]
    fn gemini_completion_joins_first_candidate_parts() {
        let body = json!({
            "candidates": [
                {"content": {"parts": [{"text": "{\"tool\": "}, {"text": "\"CreateTicket\"}"}]}},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        })
        .to_string();
        assert_eq!(
            completion_text(&body).expect("text"),
            "{\"tool\": \"CreateTicket\"}"
        );
    }

    #[test]
    fn gemini_completion_surfaces_api_errors() {
        let body = json!({"error": {"message": "quota exceeded", "code": 429}}).to_string();
        let err = completion_text(&body).unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));

        let empty = json!({"candidates": []}).to_string();
        assert!(completion_text(&empty).is_err());
    }
}
