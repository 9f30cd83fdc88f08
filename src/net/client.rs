use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::error::{Result, ServerError};
use crate::model::{CodeVersion, FILE_FORMAT_VERSION};
use crate::net::message::{JobSubmission, Message, ResourceFormat};

/// Thin client over one server connection.
///
/// Used by the CLI subcommands and by worker processes to pledge, submit
/// jobs, and move resources. Holds the socket directly; there is no
/// background task, callers drive sends and receives themselves.
pub struct ServerClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl ServerClient {
    /// Connect to a server, e.g. `ws://127.0.0.1:24816`.
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
        Ok(Self { ws })
    }

    pub async fn send(&mut self, message: &Message) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.ws.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    /// Next protocol message, skipping transport frames. `None` when the
    /// server closed the connection.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        while let Some(frame) = self.ws.next().await {
            match frame? {
                WsMessage::Text(text) => return Ok(Some(serde_json::from_str(&text)?)),
                WsMessage::Close(_) => return Ok(None),
                _ => continue,
            }
        }
        Ok(None)
    }

    /// Like [`recv`](Self::recv) but gives up after `timeout`. The protocol
    /// has no error replies, so absence of an answer is a normal outcome.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Message>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_elapsed) => Ok(None),
        }
    }

    /// Advertise this process as a worker with the given throughput curve.
    pub async fn pledge(
        &mut self,
        worker_id: Uuid,
        throughputs: Vec<u32>,
        code_version: CodeVersion,
    ) -> Result<()> {
        self.send(&Message::WorkerPledge {
            worker_id,
            throughputs,
            active: true,
            file_format_version: FILE_FORMAT_VERSION,
            code_version,
        })
        .await
    }

    pub async fn upload_resource(
        &mut self,
        resource_id: Uuid,
        json_data: &str,
        format: ResourceFormat,
    ) -> Result<()> {
        self.send(&Message::SendResource {
            resource_id,
            data: format.encode_from_canonical(json_data),
            format,
        })
        .await
    }

    /// Request a resource and wait up to `timeout` for the reply, returning
    /// the canonical JSON payload. `None` if the server has no such resource
    /// (it sends nothing back) or the wait elapsed.
    pub async fn fetch_resource(
        &mut self,
        resource_id: Uuid,
        format: ResourceFormat,
        timeout: Duration,
    ) -> Result<Option<String>> {
        self.send(&Message::RequestResource {
            resource_id,
            format,
        })
        .await?;

        while let Some(message) = self.recv_timeout(timeout).await? {
            match message {
                Message::SendResource {
                    resource_id: id,
                    data,
                    format: reply_format,
                } if id == resource_id => {
                    return reply_format.decode_to_canonical(&data).map(Some);
                }
                other => {
                    tracing::debug!(?other, "Skipping unrelated message while awaiting resource");
                }
            }
        }
        Ok(None)
    }

    pub async fn submit_job(&mut self, job: JobSubmission) -> Result<()> {
        self.send(&Message::CreateJob { job }).await
    }

    pub async fn report_completion(
        &mut self,
        worker_id: Uuid,
        job_id: Uuid,
        succeeded: bool,
    ) -> Result<()> {
        self.send(&Message::ReportJobCompletion {
            worker_id,
            job_id,
            succeeded,
        })
        .await
    }

    pub async fn close(mut self) -> Result<()> {
        self.ws
            .close(None)
            .await
            .map_err(ServerError::Transport)?;
        Ok(())
    }
}
