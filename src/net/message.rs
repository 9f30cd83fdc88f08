use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, ServerError};
use crate::model::{CodeVersion, Job, JobKind};

/// Wire encoding of a resource payload.
///
/// Canonical storage form is JSON; `Packed` is the alternate wire form
/// (base64 over the canonical bytes) used by clients that cannot ship raw
/// JSON through their transport. Unknown format values fail at decode and
/// never reach a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceFormat {
    Json,
    Packed,
}

impl ResourceFormat {
    /// Translate an inbound payload into the canonical JSON storage form.
    pub fn decode_to_canonical(&self, data: &str) -> Result<String> {
        match self {
            ResourceFormat::Json => Ok(data.to_string()),
            ResourceFormat::Packed => {
                let bytes = BASE64
                    .decode(data)
                    .map_err(|e| ServerError::Payload(format!("invalid packed payload: {e}")))?;
                String::from_utf8(bytes)
                    .map_err(|e| ServerError::Payload(format!("packed payload is not UTF-8: {e}")))
            }
        }
    }

    /// Re-encode a canonical JSON payload for the wire.
    pub fn encode_from_canonical(&self, json: &str) -> String {
        match self {
            ResourceFormat::Json => json.to_string(),
            ResourceFormat::Packed => BASE64.encode(json.as_bytes()),
        }
    }
}

/// A client's job submission: the job id and kind plus everything the
/// scheduler needs to gate and order it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    pub job_id: Uuid,
    #[serde(flatten)]
    pub kind: JobKind,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    #[serde(default)]
    pub input_resources: Vec<Uuid>,
    #[serde(default)]
    pub output_resources: Vec<Uuid>,
}

/// Every message that crosses a worker or client socket, in both directions.
///
/// Closed set: the router matches on this exhaustively, so an unrecognized
/// `type` tag is a decode error scoped to the single frame that carried it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// A worker's capacity advertisement. Sent on connect and periodically
    /// thereafter to refresh `last_activity`.
    WorkerPledge {
        worker_id: Uuid,
        throughputs: Vec<u32>,
        active: bool,
        file_format_version: i32,
        code_version: CodeVersion,
    },
    /// Upload a resource payload; also the reply to `RequestResource`.
    SendResource {
        resource_id: Uuid,
        data: String,
        format: ResourceFormat,
    },
    /// Ask for a resource in the given format. An unknown id gets no reply.
    RequestResource {
        resource_id: Uuid,
        format: ResourceFormat,
    },
    /// Submit a job for scheduling.
    CreateJob { job: JobSubmission },
    /// A worker reporting the outcome of a job it had checked out.
    ReportJobCompletion {
        worker_id: Uuid,
        job_id: Uuid,
        succeeded: bool,
    },
    /// Server -> worker: the enforcer checked this job out to you.
    AssignJob { job: Job },
}
