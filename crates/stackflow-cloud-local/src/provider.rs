//! Local provider implementation

use crate::error::{LocalError, Result};
use crate::faults::{FaultInjector, FaultRule, Operation};
use crate::store::{RemoteResource, ResourceStore};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use stackflow_cloud::{ProviderResult, ResourceProvider};
use stackflow_core::Attributes;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable holding fault rules
pub const FAULTS_ENV: &str = "STACK_LOCAL_FAULTS";

/// Environment variable holding the simulated per-call latency in milliseconds
pub const LATENCY_ENV: &str = "STACK_LOCAL_LATENCY_MS";

pub const DEFAULT_REGION: &str = "local-1";

const ACCOUNT_ID: &str = "000000000000";

/// Attributes the provider computes; preserved across updates
const COMPUTED: &[&str] = &["id", "arn", "dns_name"];

/// Short id prefix for a resource type (`aws_internet_gateway` -> `igw`)
fn id_prefix(kind: &str) -> String {
    match kind {
        "internet_gateway" => "igw".to_string(),
        "security_group" => "sg".to_string(),
        "route_table" => "rtb".to_string(),
        "nat_gateway" => "nat".to_string(),
        "lambda_function" => "fn".to_string(),
        "iam_role" => "role".to_string(),
        other => other.replace('_', "-"),
    }
}

fn is_load_balancer(kind: &str) -> bool {
    matches!(kind, "lb" | "alb" | "elb")
}

/// Provider that simulates resources in a JSON file
///
/// Created resources get a fabricated `id` and `arn`; load balancers also
/// get a `dns_name`. Nothing outside the store file is touched.
pub struct LocalProvider {
    store: ResourceStore,
    region: String,
    faults: FaultInjector,
    latency: Duration,
}

impl LocalProvider {
    pub fn new(path: impl Into<PathBuf>, region: impl Into<String>) -> Self {
        Self {
            store: ResourceStore::new(path),
            region: region.into(),
            faults: FaultInjector::default(),
            latency: Duration::ZERO,
        }
    }

    /// Provider configured from `STACK_LOCAL_FAULTS` and `STACK_LOCAL_LATENCY_MS`
    pub fn from_env(path: impl Into<PathBuf>, region: impl Into<String>) -> Result<Self> {
        let mut provider = Self::new(path, region);
        if let Ok(rules) = std::env::var(FAULTS_ENV) {
            provider = provider.with_faults(FaultRule::parse_list(&rules)?);
        }
        if let Ok(ms) = std::env::var(LATENCY_ENV)
            && let Ok(ms) = ms.trim().parse::<u64>()
        {
            provider = provider.with_latency(Duration::from_millis(ms));
        }
        Ok(provider)
    }

    pub fn with_faults(mut self, rules: Vec<FaultRule>) -> Self {
        self.faults = FaultInjector::new(rules);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Simulate an out-of-band deletion
    pub async fn delete_out_of_band(&self, id: &str) -> Result<()> {
        if !self.store.remove(id).await? {
            return Err(LocalError::ResourceNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Simulate an out-of-band change of one attribute
    pub async fn modify_out_of_band(
        &self,
        id: &str,
        attribute: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let resource = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| LocalError::ResourceNotFound(id.to_string()))?;
        let mut attributes = resource.attributes;
        attributes.insert(attribute.to_string(), value);
        self.store.update(id, attributes).await?;
        Ok(())
    }

    async fn enter(&self, resource_type: &str, operation: Operation) -> ProviderResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.faults.check(resource_type, operation)
    }

    fn computed_attributes(&self, resource_type: &str) -> Attributes {
        let (service, kind) = resource_type
            .split_once('_')
            .unwrap_or(("local", resource_type));
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let id = format!("{}-{}", id_prefix(kind), &suffix[..17]);

        let mut computed = Attributes::new();
        computed.insert(
            "arn".to_string(),
            json!(format!(
                "arn:{}:{}:{}:{}:{}/{}",
                service,
                kind.split('_').next().unwrap_or(kind),
                self.region,
                ACCOUNT_ID,
                kind,
                id
            )),
        );
        if is_load_balancer(kind) {
            computed.insert(
                "dns_name".to_string(),
                json!(format!("{}.{}.elb.local", id, self.region)),
            );
        }
        computed.insert("id".to_string(), json!(id));
        computed
    }
}

#[async_trait]
impl ResourceProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn create(&self, resource_type: &str, attributes: &Attributes) -> ProviderResult<Attributes> {
        self.enter(resource_type, Operation::Create).await?;

        let mut real = attributes.clone();
        real.extend(self.computed_attributes(resource_type));
        let id = real
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        self.store
            .insert(
                &id,
                RemoteResource {
                    resource_type: resource_type.to_string(),
                    attributes: real.clone(),
                    created_at: Utc::now(),
                },
            )
            .await?;
        info!(resource_type, id = %id, "Created resource");
        Ok(real)
    }

    async fn update(
        &self,
        resource_type: &str,
        id: &str,
        attributes: &Attributes,
    ) -> ProviderResult<Attributes> {
        self.enter(resource_type, Operation::Update).await?;

        let existing = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| LocalError::ResourceNotFound(id.to_string()))?;

        let mut real = attributes.clone();
        for key in COMPUTED {
            if let Some(value) = existing.attributes.get(*key) {
                real.insert(key.to_string(), value.clone());
            }
        }
        let updated = self.store.update(id, real).await?;
        info!(resource_type, id, "Updated resource");
        Ok(updated.attributes)
    }

    async fn destroy(&self, resource_type: &str, id: &str) -> ProviderResult<()> {
        self.enter(resource_type, Operation::Destroy).await?;

        if self.store.remove(id).await? {
            info!(resource_type, id, "Destroyed resource");
        } else {
            warn!(resource_type, id, "Resource already gone");
        }
        Ok(())
    }

    async fn read(
        &self,
        resource_type: &str,
        id: &str,
        _recorded: &Attributes,
    ) -> ProviderResult<Option<Attributes>> {
        self.enter(resource_type, Operation::Read).await?;
        let resource = self.store.get(id).await?;
        debug!(resource_type, id, found = resource.is_some(), "Read resource");
        Ok(resource.map(|r| r.attributes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackflow_cloud::ProviderError;

    fn provider(dir: &tempfile::TempDir) -> LocalProvider {
        LocalProvider::new(dir.path().join("resources.json"), DEFAULT_REGION)
    }

    fn inputs(pairs: &[(&str, serde_json::Value)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_id_prefix() {
        assert_eq!(id_prefix("vpc"), "vpc");
        assert_eq!(id_prefix("internet_gateway"), "igw");
        assert_eq!(id_prefix("db_instance"), "db-instance");
    }

    #[tokio::test]
    async fn test_create_fabricates_computed_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(&dir);

        let vpc = provider
            .create("aws_vpc", &inputs(&[("cidr_block", json!("10.0.0.0/16"))]))
            .await
            .unwrap();
        let id = vpc["id"].as_str().unwrap();
        assert!(id.starts_with("vpc-"));
        assert_eq!(id.len(), "vpc-".len() + 17);
        assert!(vpc["arn"].as_str().unwrap().starts_with("arn:aws:vpc:local-1:"));
        assert_eq!(vpc["cidr_block"], json!("10.0.0.0/16"));
        assert!(vpc.get("dns_name").is_none());

        let alb = provider.create("aws_lb", &Attributes::new()).await.unwrap();
        assert!(alb["dns_name"].as_str().unwrap().ends_with(".local-1.elb.local"));
    }

    #[tokio::test]
    async fn test_update_keeps_computed_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(&dir);

        let created = provider
            .create("aws_vpc", &inputs(&[("cidr_block", json!("10.0.0.0/16"))]))
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap();

        let updated = provider
            .update("aws_vpc", id, &inputs(&[("cidr_block", json!("10.1.0.0/16"))]))
            .await
            .unwrap();
        assert_eq!(updated["id"], created["id"]);
        assert_eq!(updated["arn"], created["arn"]);
        assert_eq!(updated["cidr_block"], json!("10.1.0.0/16"));

        let missing = provider
            .update("aws_vpc", "vpc-missing", &Attributes::new())
            .await
            .unwrap_err();
        assert!(matches!(missing, ProviderError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_destroy_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(&dir);

        let created = provider.create("aws_subnet", &Attributes::new()).await.unwrap();
        let id = created["id"].as_str().unwrap();
        assert_eq!(
            provider.read("aws_subnet", id, &Attributes::new()).await.unwrap(),
            Some(created.clone())
        );

        provider.destroy("aws_subnet", id).await.unwrap();
        assert_eq!(
            provider.read("aws_subnet", id, &created).await.unwrap(),
            None
        );
        // Destroying twice is not an error
        provider.destroy("aws_subnet", id).await.unwrap();
    }

    #[tokio::test]
    async fn test_out_of_band_changes_are_visible() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(&dir);

        let created = provider.create("aws_vpc", &Attributes::new()).await.unwrap();
        let id = created["id"].as_str().unwrap();
        provider
            .modify_out_of_band(id, "enable_dns", json!(true))
            .await
            .unwrap();
        let read = provider
            .read("aws_vpc", id, &created)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read["enable_dns"], json!(true));

        provider.delete_out_of_band(id).await.unwrap();
        assert!(provider.delete_out_of_band(id).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(&dir).with_faults(vec![
            FaultRule::permanent("aws_iam_role", Some(Operation::Create)),
            FaultRule::transient("aws_vpc", None, 1),
        ]);

        assert!(matches!(
            provider.create("aws_iam_role", &Attributes::new()).await,
            Err(ProviderError::Permanent(_))
        ));
        assert!(matches!(
            provider.create("aws_vpc", &Attributes::new()).await,
            Err(ProviderError::Transient(_))
        ));
        assert!(provider.create("aws_vpc", &Attributes::new()).await.is_ok());
        assert!(provider.store().list().await.unwrap().len() == 1);
    }
}
