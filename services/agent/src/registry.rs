//! Service registry interface and an in-memory fake.
//!
//! The registry interface mirrors the subset of the Consul agent API the
//! engine uses. `ConsulClient` implements it over HTTP; `FakeRegistry`
//! keeps everything in memory and records every mutating call.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use doko_reconcile::{format_duration, HealthCheck, ServiceEntry};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Errors from the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry API error {status}: {message}")]
    Api { status: u16, message: String },
}

/// A service currently registered with the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisteredService {
    pub id: String,
    pub name: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub meta: BTreeMap<String, String>,
}

/// A check currently registered with the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisteredCheck {
    pub id: String,
    pub name: String,
    pub service_id: String,
    /// Check type as reported by the registry (`http`, `grpc`, `ttl`, ...).
    pub kind: String,
    pub http: Option<String>,
    pub grpc: Option<String>,
    pub interval: Option<String>,
    pub timeout: Option<String>,
}

/// Check definition embedded in a service registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckDefinition {
    pub name: String,
    pub http: Option<String>,
    pub grpc: Option<String>,
    pub interval: Option<String>,
    pub timeout: Option<String>,
}

/// Service registration (upsert).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceRegistration {
    pub id: String,
    pub name: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub meta: BTreeMap<String, String>,
    pub checks: Vec<CheckDefinition>,
}

/// Stand-alone TTL check registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRegistration {
    pub id: String,
    pub name: String,
    pub service_id: String,
    pub ttl: String,
}

/// TTL check status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    Passing,
    Warning,
    Critical,
}

impl TtlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TtlStatus::Passing => "passing",
            TtlStatus::Warning => "warning",
            TtlStatus::Critical => "critical",
        }
    }
}

impl ServiceRegistration {
    /// Projects a desired entry onto a registration. Checks target
    /// `check_addr` on the entry's resolved port.
    pub fn from_entry(entry: &ServiceEntry, check_addr: &str) -> Self {
        let checks = entry
            .check
            .iter()
            .map(|check| {
                let (name, http, grpc) = match check {
                    HealthCheck::Http { path, .. } => (
                        "(doko) HTTP Check",
                        Some(format!("http://{check_addr}:{}{path}", entry.port)),
                        None,
                    ),
                    HealthCheck::Grpc { .. } => (
                        "(doko) gRPC Check",
                        None,
                        Some(format!("{check_addr}:{}", entry.port)),
                    ),
                };
                CheckDefinition {
                    name: name.to_string(),
                    http,
                    grpc,
                    interval: Some(format_duration(check.interval())),
                    timeout: Some(format_duration(check.timeout())),
                }
            })
            .collect();

        Self {
            id: entry.id.to_string(),
            name: entry.name.clone(),
            port: entry.port,
            tags: entry.tags.clone(),
            meta: entry.meta.clone(),
            checks,
        }
    }
}

/// Service registry interface.
#[async_trait]
pub trait Registry: Send + Sync {
    /// All services registered with the local agent, keyed by ID.
    async fn list_services(&self) -> Result<HashMap<String, RegisteredService>, RegistryError>;

    /// All checks registered with the local agent, keyed by check ID.
    async fn list_checks(&self) -> Result<HashMap<String, RegisteredCheck>, RegistryError>;

    /// Register or replace a service together with its checks.
    async fn register_service(&self, registration: &ServiceRegistration)
        -> Result<(), RegistryError>;

    /// Remove a service and its checks.
    async fn deregister_service(&self, service_id: &str) -> Result<(), RegistryError>;

    /// Register a stand-alone check.
    async fn register_check(&self, registration: &CheckRegistration) -> Result<(), RegistryError>;

    /// Remove a check.
    async fn deregister_check(&self, check_id: &str) -> Result<(), RegistryError>;

    /// Refresh a TTL check.
    async fn update_ttl(
        &self,
        check_id: &str,
        status: TtlStatus,
        output: &str,
    ) -> Result<(), RegistryError>;
}

/// A mutating call recorded by [`FakeRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryCall {
    RegisterService(String),
    DeregisterService(String),
    RegisterCheck(String),
    DeregisterCheck(String),
    UpdateTtl(String, TtlStatus),
}

/// In-memory registry for testing and development.
///
/// Service registration behaves like the Consul agent: it replaces the
/// service's checks with the ones in the registration, assigning them
/// `service:{id}` check IDs.
#[derive(Default)]
pub struct FakeRegistry {
    services: Mutex<HashMap<String, RegisteredService>>,
    checks: Mutex<HashMap<String, RegisteredCheck>>,
    calls: Mutex<Vec<RegistryCall>>,
    failing_ids: Mutex<HashSet<String>>,
    fail_list: AtomicBool,
}

impl FakeRegistry {
    /// Create an empty fake registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a service without recording a call, e.g. one owned by someone else.
    pub async fn insert_service(&self, service: RegisteredService) {
        self.services.lock().await.insert(service.id.clone(), service);
    }

    /// Seed a check without recording a call.
    pub async fn insert_check(&self, check: RegisteredCheck) {
        self.checks.lock().await.insert(check.id.clone(), check);
    }

    /// Make listing fail until reset.
    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    /// Make every mutating call touching `id` fail.
    pub async fn fail_id(&self, id: &str) {
        self.failing_ids.lock().await.insert(id.to_string());
    }

    /// Stop failing calls touching `id`.
    pub async fn heal_id(&self, id: &str) {
        self.failing_ids.lock().await.remove(id);
    }

    /// Mutating calls recorded so far.
    pub async fn calls(&self) -> Vec<RegistryCall> {
        self.calls.lock().await.clone()
    }

    /// Forget recorded calls.
    pub async fn clear_calls(&self) {
        self.calls.lock().await.clear();
    }

    /// Snapshot of registered services.
    pub async fn services(&self) -> HashMap<String, RegisteredService> {
        self.services.lock().await.clone()
    }

    /// Snapshot of registered checks.
    pub async fn checks(&self) -> HashMap<String, RegisteredCheck> {
        self.checks.lock().await.clone()
    }

    async fn record(&self, call: RegistryCall, id: &str) -> Result<(), RegistryError> {
        debug!(call = ?call, "[FAKE] Registry call");
        self.calls.lock().await.push(call);
        if self.failing_ids.lock().await.contains(id) {
            return Err(RegistryError::Api {
                status: 500,
                message: format!("fake registry configured to fail for {id}"),
            });
        }
        Ok(())
    }

    fn check_list_failure(&self) -> Result<(), RegistryError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(RegistryError::Api {
                status: 500,
                message: "fake registry configured to fail".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn list_services(&self) -> Result<HashMap<String, RegisteredService>, RegistryError> {
        self.check_list_failure()?;
        Ok(self.services().await)
    }

    async fn list_checks(&self) -> Result<HashMap<String, RegisteredCheck>, RegistryError> {
        self.check_list_failure()?;
        Ok(self.checks().await)
    }

    async fn register_service(
        &self,
        registration: &ServiceRegistration,
    ) -> Result<(), RegistryError> {
        let id = registration.id.as_str();
        self.record(RegistryCall::RegisterService(id.to_string()), id)
            .await?;

        self.services.lock().await.insert(
            id.to_string(),
            RegisteredService {
                id: id.to_string(),
                name: registration.name.clone(),
                port: registration.port,
                tags: registration.tags.clone(),
                meta: registration.meta.clone(),
            },
        );

        let mut checks = self.checks.lock().await;
        checks.retain(|_, c| c.service_id != id);
        for (n, def) in registration.checks.iter().enumerate() {
            let check_id = if n == 0 {
                format!("service:{id}")
            } else {
                format!("service:{id}:{}", n + 1)
            };
            let kind = if def.http.is_some() { "http" } else { "grpc" };
            checks.insert(
                check_id.clone(),
                RegisteredCheck {
                    id: check_id,
                    name: def.name.clone(),
                    service_id: id.to_string(),
                    kind: kind.to_string(),
                    http: def.http.clone(),
                    grpc: def.grpc.clone(),
                    interval: def.interval.clone(),
                    timeout: def.timeout.clone(),
                },
            );
        }
        Ok(())
    }

    async fn deregister_service(&self, service_id: &str) -> Result<(), RegistryError> {
        self.record(RegistryCall::DeregisterService(service_id.to_string()), service_id)
            .await?;
        self.services.lock().await.remove(service_id);
        self.checks
            .lock()
            .await
            .retain(|_, c| c.service_id != service_id);
        Ok(())
    }

    async fn register_check(&self, registration: &CheckRegistration) -> Result<(), RegistryError> {
        let id = registration.id.as_str();
        self.record(RegistryCall::RegisterCheck(id.to_string()), id)
            .await?;
        self.checks.lock().await.insert(
            id.to_string(),
            RegisteredCheck {
                id: id.to_string(),
                name: registration.name.clone(),
                service_id: registration.service_id.clone(),
                kind: "ttl".to_string(),
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn deregister_check(&self, check_id: &str) -> Result<(), RegistryError> {
        self.record(RegistryCall::DeregisterCheck(check_id.to_string()), check_id)
            .await?;
        self.checks.lock().await.remove(check_id);
        Ok(())
    }

    async fn update_ttl(
        &self,
        check_id: &str,
        status: TtlStatus,
        _output: &str,
    ) -> Result<(), RegistryError> {
        self.record(RegistryCall::UpdateTtl(check_id.to_string(), status), check_id)
            .await
    }
}
