//! Consul agent API client.
//!
//! Provides the registry operations the engine needs against the local
//! Consul agent:
//! - Listing services and checks
//! - Registering and deregistering services and checks
//! - Refreshing TTL checks

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::registry::{
    CheckRegistration, RegisteredCheck, RegisteredService, Registry, RegistryError,
    ServiceRegistration, TtlStatus,
};

/// Consul agent API client.
pub struct ConsulClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ConsulClient {
    /// Create a new Consul client.
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.header("X-Consul-Token", token),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response, RegistryError> {
        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, request = what, "Consul request failed");
            return Err(RegistryError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(response)
    }

    async fn put<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: Option<&T>,
        what: &str,
    ) -> Result<(), RegistryError> {
        debug!(path = path, "PUT request to Consul agent");
        let builder = self.request(Method::PUT, path);
        let builder = match body {
            Some(body) => builder.json(body),
            None => builder,
        };
        self.send(builder, what).await?;
        Ok(())
    }
}

#[async_trait]
impl Registry for ConsulClient {
    async fn list_services(&self) -> Result<HashMap<String, RegisteredService>, RegistryError> {
        let response = self
            .send(self.request(Method::GET, "/v1/agent/services"), "list services")
            .await?;
        let services: HashMap<String, AgentService> = response.json().await?;
        debug!(count = services.len(), "Listed agent services");

        Ok(services
            .into_iter()
            .map(|(id, s)| (id, RegisteredService::from(s)))
            .collect())
    }

    async fn list_checks(&self) -> Result<HashMap<String, RegisteredCheck>, RegistryError> {
        let response = self
            .send(self.request(Method::GET, "/v1/agent/checks"), "list checks")
            .await?;
        let checks: HashMap<String, AgentCheck> = response.json().await?;
        debug!(count = checks.len(), "Listed agent checks");

        Ok(checks
            .into_iter()
            .map(|(id, c)| (id, RegisteredCheck::from(c)))
            .collect())
    }

    async fn register_service(
        &self,
        registration: &ServiceRegistration,
    ) -> Result<(), RegistryError> {
        let body = AgentServiceRegistration::from(registration);
        self.put("/v1/agent/service/register", Some(&body), "register service")
            .await
    }

    async fn deregister_service(&self, service_id: &str) -> Result<(), RegistryError> {
        let path = format!("/v1/agent/service/deregister/{service_id}");
        self.put::<()>(&path, None, "deregister service").await
    }

    async fn register_check(&self, registration: &CheckRegistration) -> Result<(), RegistryError> {
        let body = AgentCheckRegistration {
            id: &registration.id,
            name: &registration.name,
            service_id: &registration.service_id,
            ttl: &registration.ttl,
        };
        self.put("/v1/agent/check/register", Some(&body), "register check")
            .await
    }

    async fn deregister_check(&self, check_id: &str) -> Result<(), RegistryError> {
        let path = format!("/v1/agent/check/deregister/{check_id}");
        self.put::<()>(&path, None, "deregister check").await
    }

    async fn update_ttl(
        &self,
        check_id: &str,
        status: TtlStatus,
        output: &str,
    ) -> Result<(), RegistryError> {
        let path = format!("/v1/agent/check/update/{check_id}");
        let body = CheckUpdate {
            status: status.as_str(),
            output,
        };
        self.put(&path, Some(&body), "update TTL check").await
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    service: String,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    meta: Option<BTreeMap<String, String>>,
}

impl From<AgentService> for RegisteredService {
    fn from(s: AgentService) -> Self {
        Self {
            id: s.id,
            name: s.service,
            port: s.port,
            tags: s.tags.unwrap_or_default(),
            meta: s.meta.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentCheck {
    #[serde(rename = "CheckID")]
    check_id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "ServiceID", default)]
    service_id: String,
    #[serde(default)]
    r#type: String,
    #[serde(default)]
    definition: Option<CheckDefinitionWire>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CheckDefinitionWire {
    #[serde(rename = "HTTP", default)]
    http: Option<String>,
    #[serde(rename = "GRPC", default)]
    grpc: Option<String>,
    #[serde(default)]
    interval: Option<String>,
    #[serde(default)]
    timeout: Option<String>,
}

impl From<AgentCheck> for RegisteredCheck {
    fn from(c: AgentCheck) -> Self {
        let def = c.definition.unwrap_or_default();
        let non_empty = |s: Option<String>| s.filter(|s| !s.is_empty());
        Self {
            id: c.check_id,
            name: c.name,
            service_id: c.service_id,
            kind: c.r#type,
            http: non_empty(def.http),
            grpc: non_empty(def.grpc),
            interval: non_empty(def.interval),
            timeout: non_empty(def.timeout),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    port: u16,
    tags: &'a [String],
    meta: &'a BTreeMap<String, String>,
    checks: Vec<AgentServiceCheck<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceCheck<'a> {
    name: &'a str,
    #[serde(rename = "HTTP", skip_serializing_if = "Option::is_none")]
    http: Option<&'a str>,
    #[serde(rename = "GRPC", skip_serializing_if = "Option::is_none")]
    grpc: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<&'a str>,
}

impl<'a> From<&'a ServiceRegistration> for AgentServiceRegistration<'a> {
    fn from(r: &'a ServiceRegistration) -> Self {
        Self {
            id: &r.id,
            name: &r.name,
            port: r.port,
            tags: &r.tags,
            meta: &r.meta,
            checks: r
                .checks
                .iter()
                .map(|c| AgentServiceCheck {
                    name: &c.name,
                    http: c.http.as_deref(),
                    grpc: c.grpc.as_deref(),
                    interval: c.interval.as_deref(),
                    timeout: c.timeout.as_deref(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentCheckRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    #[serde(rename = "ServiceID")]
    service_id: &'a str,
    #[serde(rename = "TTL")]
    ttl: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CheckUpdate<'a> {
    status: &'a str,
    output: &'a str,
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::registry::CheckDefinition;

    #[tokio::test]
    async fn test_list_services() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/agent/services"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "doko-svc-abc": {
                    "ID": "doko-svc-abc",
                    "Service": "web",
                    "Tags": ["v1"],
                    "Meta": {"doko": "true"},
                    "Port": 32000,
                    "Address": ""
                },
                "redis": {
                    "ID": "redis",
                    "Service": "redis",
                    "Tags": null,
                    "Meta": null,
                    "Port": 6379
                }
            })))
            .mount(&server)
            .await;

        let client = ConsulClient::new(&server.uri(), None).unwrap();
        let services = client.list_services().await.unwrap();

        assert_eq!(services.len(), 2);
        let web = &services["doko-svc-abc"];
        assert_eq!(web.name, "web");
        assert_eq!(web.port, 32000);
        assert_eq!(web.tags, vec!["v1".to_string()]);
        assert_eq!(web.meta.get("doko").map(String::as_str), Some("true"));
        assert!(services["redis"].tags.is_empty());
    }

    #[tokio::test]
    async fn test_list_checks() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/agent/checks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "service:doko-svc-abc": {
                    "CheckID": "service:doko-svc-abc",
                    "Name": "(doko) HTTP Check",
                    "Status": "passing",
                    "ServiceID": "doko-svc-abc",
                    "Type": "http",
                    "Definition": {
                        "HTTP": "http://127.0.0.1:32000/_health",
                        "Interval": "10s",
                        "Timeout": "5s"
                    }
                }
            })))
            .mount(&server)
            .await;

        let client = ConsulClient::new(&server.uri(), None).unwrap();
        let checks = client.list_checks().await.unwrap();
        let check = &checks["service:doko-svc-abc"];

        assert_eq!(check.service_id, "doko-svc-abc");
        assert_eq!(check.kind, "http");
        assert_eq!(check.http.as_deref(), Some("http://127.0.0.1:32000/_health"));
        assert_eq!(check.interval.as_deref(), Some("10s"));
        assert_eq!(check.grpc, None);
    }

    #[tokio::test]
    async fn test_register_service_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/agent/service/register"))
            .and(header("X-Consul-Token", "secret"))
            .and(body_json(serde_json::json!({
                "ID": "doko-svc-abc",
                "Name": "web",
                "Port": 32000,
                "Tags": ["v1"],
                "Meta": {"doko": "true"},
                "Checks": [{
                    "Name": "(doko) HTTP Check",
                    "HTTP": "http://127.0.0.1:32000/_health",
                    "Interval": "10s",
                    "Timeout": "5s"
                }]
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = ConsulClient::new(&server.uri(), Some("secret".to_string())).unwrap();
        let registration = ServiceRegistration {
            id: "doko-svc-abc".to_string(),
            name: "web".to_string(),
            port: 32000,
            tags: vec!["v1".to_string()],
            meta: BTreeMap::from([("doko".to_string(), "true".to_string())]),
            checks: vec![CheckDefinition {
                name: "(doko) HTTP Check".to_string(),
                http: Some("http://127.0.0.1:32000/_health".to_string()),
                grpc: None,
                interval: Some("10s".to_string()),
                timeout: Some("5s".to_string()),
            }],
        };
        client.register_service(&registration).await.unwrap();
    }

    #[tokio::test]
    async fn test_deregister_service_error_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/agent/service/deregister/doko-svc-abc"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = ConsulClient::new(&server.uri(), None).unwrap();
        let err = client.deregister_service("doko-svc-abc").await.unwrap_err();
        match err {
            RegistryError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_register_check_and_update_ttl() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/agent/check/register"))
            .and(body_json(serde_json::json!({
                "ID": "doko-ins-chk-1",
                "Name": "(doko) Internal Alive Check",
                "ServiceID": "doko-ins-1",
                "TTL": "10s"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/agent/check/update/doko-ins-chk-1"))
            .and(body_json(serde_json::json!({
                "Status": "passing",
                "Output": "RUNNING"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = ConsulClient::new(&format!("{}/", server.uri()), None).unwrap();
        client
            .register_check(&CheckRegistration {
                id: "doko-ins-chk-1".to_string(),
                name: "(doko) Internal Alive Check".to_string(),
                service_id: "doko-ins-1".to_string(),
                ttl: "10s".to_string(),
            })
            .await
            .unwrap();
        client
            .update_ttl("doko-ins-chk-1", TtlStatus::Passing, "RUNNING")
            .await
            .unwrap();
    }
}
