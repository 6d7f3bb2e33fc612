//! Line-delimited JSON messages exchanged between the coordinator and its
//! worker processes. One message per line, on the worker's stdin/stdout.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Values known before analysis (usually from file tags). A hinted field is
/// trusted as-is and its estimation is skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl Hints {
    pub fn is_empty(&self) -> bool {
        self.bpm.is_none() && self.key.is_none()
    }
}

/// Features as produced by a backend, before validation by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFeatures {
    /// 0 = unknown
    pub bpm: f64,
    pub key: String,
    pub energy: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub danceability: Option<f64>,
}

/// Coordinator -> worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Request {
    Analyze {
        request_id: u64,
        file_path: PathBuf,
        #[serde(default, skip_serializing_if = "Hints::is_empty")]
        hints: Hints,
    },
    Exit,
}

/// Worker -> coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Response {
    Ready {
        /// Name of the backend the worker settled on.
        #[serde(default)]
        backend: String,
    },
    InitError {
        error: String,
    },
    #[serde(rename = "result")]
    AnalysisResult {
        request_id: u64,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<RawFeatures>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Response {
    pub fn success(request_id: u64, data: RawFeatures) -> Self {
        Response::AnalysisResult {
            request_id,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(request_id: u64, error: impl Into<String>) -> Self {
        Response::AnalysisResult {
            request_id,
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Serialize a message as a single newline-terminated line.
pub fn encode_line<T: Serialize>(msg: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
    Ok(serde_json::from_str(line.trim())?)
}
