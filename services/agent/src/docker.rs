//! Docker Engine API client.
//!
//! Talks to the engine over its unix socket. Only the two calls the
//! engine needs are implemented: listing running containers and streaming
//! container events.
//!
//! Reference: https://docs.docker.com/engine/api/v1.43/

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use doko_reconcile::{PortMapping, Workload};
use futures_util::stream::{self, StreamExt};
use hyper::{body::Buf, Body, Client, Method, Request};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use serde::Deserialize;
use tracing::{debug, error};

use crate::runtime::{EventFilter, EventStream, RuntimeError, WorkloadEvent, WorkloadRuntime};

/// Docker API client for Unix socket communication.
pub struct DockerClient {
    socket_path: String,
    client: Client<UnixConnector>,
}

impl DockerClient {
    /// Client for the engine listening on `socket_path`.
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_string_lossy().into_owned(),
            client: Client::unix(),
        }
    }

    /// Whether the socket file is present. The engine may still be down.
    pub fn socket_exists(&self) -> bool {
        Path::new(&self.socket_path).exists()
    }

    /// `GET /containers/json`: running containers only.
    pub async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let body = self.get("/containers/json").await?;
        let bytes = hyper::body::aggregate(body).await?;
        Ok(serde_json::from_reader(bytes.reader())?)
    }

    /// `GET /events`, kept open and decoded line by line.
    pub async fn events(&self, filter: &EventFilter) -> Result<EventStream, RuntimeError> {
        let path = events_path(filter)?;
        let body = self.get(&path).await?;
        Ok(decode_event_stream(body))
    }

    /// Issues a GET and hands back the body of a successful response.
    async fn get(&self, path: &str) -> Result<Body, RuntimeError> {
        debug!(path = path, "Docker API request");

        let request = Request::builder()
            .method(Method::GET)
            .uri(Uri::new(&self.socket_path, path))
            .header("Accept", "application/json")
            .body(Body::empty())?;
        let response = self.client.request(request).await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.into_body());
        }

        let message = error_message(response.into_body()).await?;
        error!(status = %status, path = path, message = %message, "Docker API request failed");
        Err(RuntimeError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl WorkloadRuntime for DockerClient {
    async fn list_workloads(&self) -> Result<Vec<Workload>, RuntimeError> {
        let containers = self.list_containers().await?;
        Ok(containers.into_iter().map(Workload::from).collect())
    }

    async fn subscribe_events(&self, filter: &EventFilter) -> Result<EventStream, RuntimeError> {
        self.events(filter).await
    }
}

/// Container as returned by `GET /containers/json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    pub id: String,
    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,
    #[serde(default)]
    pub ports: Option<Vec<ContainerPort>>,
    #[serde(default)]
    pub host_config: Option<ContainerHostConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerPort {
    pub private_port: u16,
    #[serde(default)]
    pub public_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerHostConfig {
    #[serde(default)]
    pub network_mode: String,
}

impl From<ContainerSummary> for Workload {
    fn from(c: ContainerSummary) -> Self {
        Workload {
            id: c.id,
            labels: c.labels.unwrap_or_default().into_iter().collect::<BTreeMap<_, _>>(),
            network_mode: c.host_config.map(|h| h.network_mode).unwrap_or_default(),
            ports: c
                .ports
                .unwrap_or_default()
                .into_iter()
                .map(|p| PortMapping {
                    private: p.private_port,
                    public: p.public_port,
                })
                .collect(),
        }
    }
}

/// One line of the `GET /events` stream.
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "Action", default)]
    action: String,
    #[serde(rename = "Actor", default)]
    actor: Option<RawActor>,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawActor {
    #[serde(rename = "ID", default)]
    id: String,
}

impl From<RawEvent> for WorkloadEvent {
    fn from(e: RawEvent) -> Self {
        let id = e
            .actor
            .map(|a| a.id)
            .filter(|id| !id.is_empty())
            .or(e.id)
            .unwrap_or_default();
        WorkloadEvent {
            id,
            action: e.action,
        }
    }
}

/// Builds `/events?filters=...` for a filter.
/// Whole body of a failed response, as text.
async fn error_message(body: Body) -> Result<String, RuntimeError> {
    let bytes = hyper::body::to_bytes(body).await?;
    Ok(String::from_utf8_lossy(&bytes).trim().to_string())
}

fn events_path(filter: &EventFilter) -> Result<String, RuntimeError> {
    let filters = serde_json::json!({
        "scope": [filter.scope],
        "type": [filter.kind],
        "event": filter.actions,
    });
    let url = reqwest::Url::parse_with_params(
        "http://docker/events",
        &[("filters", filters.to_string())],
    )
    .map_err(|e| RuntimeError::Request(e.to_string()))?;

    Ok(format!("{}?{}", url.path(), url.query().unwrap_or_default()))
}

/// Splits a streaming body into newline-delimited JSON events.
fn decode_event_stream(body: Body) -> EventStream {
    stream::unfold((body, Vec::<u8>::new()), |(mut body, mut buf)| async move {
        loop {
            if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                let line = line.trim_ascii();
                if line.is_empty() {
                    continue;
                }
                let item = serde_json::from_slice::<RawEvent>(line)
                    .map(WorkloadEvent::from)
                    .map_err(RuntimeError::from);
                return Some((item, (body, buf)));
            }

            match body.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                Some(Err(e)) => return Some((Err(RuntimeError::from(e)), (body, buf))),
                None => return None,
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_summary_deserialization() {
        let json = r#"[{
            "Id": "8dfafdbc3a40",
            "Names": ["/web"],
            "Labels": {"doko.name": "web", "doko.port": "8080"},
            "Ports": [
                {"IP": "0.0.0.0", "PrivatePort": 8080, "PublicPort": 32768, "Type": "tcp"},
                {"PrivatePort": 9090, "Type": "tcp"}
            ],
            "HostConfig": {"NetworkMode": "default"}
        }]"#;

        let containers: Vec<ContainerSummary> = serde_json::from_str(json).unwrap();
        let workload = Workload::from(containers[0].clone());

        assert_eq!(workload.id, "8dfafdbc3a40");
        assert_eq!(workload.network_mode, "default");
        assert_eq!(workload.labels.get("doko.name").unwrap(), "web");
        assert_eq!(
            workload.ports,
            vec![
                PortMapping {
                    private: 8080,
                    public: Some(32768)
                },
                PortMapping {
                    private: 9090,
                    public: None
                },
            ]
        );
    }

    #[test]
    fn test_container_without_labels_or_ports() {
        let json = r#"{"Id": "abc", "Labels": null, "Ports": null}"#;
        let container: ContainerSummary = serde_json::from_str(json).unwrap();
        let workload = Workload::from(container);
        assert!(workload.labels.is_empty());
        assert!(workload.ports.is_empty());
        assert_eq!(workload.network_mode, "");
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"status":"die","id":"abc","Type":"container","Action":"die",
            "Actor":{"ID":"abc","Attributes":{"doko.name":"web"}},"scope":"local","time":1700000000}"#;
        let event = WorkloadEvent::from(serde_json::from_str::<RawEvent>(json).unwrap());
        assert_eq!(
            event,
            WorkloadEvent {
                id: "abc".to_string(),
                action: "die".to_string()
            }
        );
    }

    #[test]
    fn test_events_path_encodes_filters() {
        let path = events_path(&EventFilter::container_lifecycle()).unwrap();
        assert!(path.starts_with("/events?filters="));
        assert!(!path.contains('{'), "filters must be percent-encoded: {path}");

        let url = reqwest::Url::parse(&format!("http://docker{path}")).unwrap();
        let (_, raw) = url.query_pairs().next().unwrap();
        let filters: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(filters["type"][0], "container");
        assert_eq!(filters["scope"][0], "local");
        assert_eq!(filters["event"], serde_json::json!(["start", "die"]));
    }

    #[tokio::test]
    async fn test_error_message_spans_every_chunk() {
        let chunks: Vec<Result<&'static str, std::io::Error>> = vec![
            Ok("{\"message\":\"No such "),
            Ok("container: abc\"}"),
            Ok("\n"),
        ];
        let body = Body::wrap_stream(stream::iter(chunks));
        assert_eq!(
            error_message(body).await.unwrap(),
            "{\"message\":\"No such container: abc\"}"
        );
    }

    #[tokio::test]
    async fn test_decode_event_stream_handles_split_chunks() {
        let chunks: Vec<Result<&'static str, std::io::Error>> = vec![
            Ok("{\"Action\":\"start\",\"Actor\":{\"ID\":\"a\"}}\n{\"Act"),
            Ok("ion\":\"die\",\"Actor\":{\"ID\":\"b\"}}\n\n"),
        ];
        let body = Body::wrap_stream(stream::iter(chunks));
        let events: Vec<_> = decode_event_stream(body).collect().await;

        let events: Vec<WorkloadEvent> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, "a");
        assert_eq!(events[1].action, "die");
    }
}
