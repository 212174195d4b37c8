use async_trait::async_trait;
use serde_json::json;
use stackflow_cloud::{ProviderError, ProviderResult, ResourceProvider};
use stackflow_core::{Attributes, StackBuilder, SynthDocument, synthesize};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// In-memory provider that records calls and injects faults by resource type
#[derive(Default)]
pub struct MockProvider {
    calls: Mutex<Vec<String>>,
    permanent: Mutex<HashSet<String>>,
    transient: Mutex<HashMap<String, u32>>,
    remote: Mutex<HashMap<String, Option<Attributes>>>,
    cancel_after: Mutex<Option<(String, CancellationToken)>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    next_id: AtomicU64,
}

#[allow(dead_code)]
impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay`
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn fail_permanently(&self, resource_type: &str) {
        self.permanent
            .lock()
            .unwrap()
            .insert(resource_type.to_string());
    }

    pub fn clear_failures(&self) {
        self.permanent.lock().unwrap().clear();
        self.transient.lock().unwrap().clear();
    }

    pub fn fail_transiently(&self, resource_type: &str, times: u32) {
        self.transient
            .lock()
            .unwrap()
            .insert(resource_type.to_string(), times);
    }

    /// Cancel `token` once a resource of `resource_type` has been created
    pub fn cancel_after(&self, resource_type: &str, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((resource_type.to_string(), token));
    }

    /// Simulate out-of-band deletion
    pub fn delete_remotely(&self, id: &str) {
        self.remote.lock().unwrap().insert(id.to_string(), None);
    }

    /// Simulate out-of-band modification
    pub fn modify_remotely(&self, id: &str, attributes: Attributes) {
        self.remote
            .lock()
            .unwrap()
            .insert(id.to_string(), Some(attributes));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, call: String, resource_type: &str) -> ProviderResult<()> {
        self.calls.lock().unwrap().push(call);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.permanent.lock().unwrap().contains(resource_type) {
            return Err(ProviderError::Permanent(format!(
                "access denied for {}",
                resource_type
            )));
        }
        let mut transient = self.transient.lock().unwrap();
        if let Some(remaining) = transient.get_mut(resource_type)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(ProviderError::Transient("rate exceeded".to_string()));
        }
        Ok(())
    }

    fn fabricate(&self, resource_type: &str, attributes: &Attributes) -> Attributes {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let prefix = resource_type.trim_start_matches("aws_");
        let id = format!("{}-{:04}", prefix, n);

        let mut real = attributes.clone();
        real.insert("arn".to_string(), json!(format!("arn:mock:{}:{}", prefix, id)));
        if resource_type == "aws_lb" {
            real.insert("dns_name".to_string(), json!(format!("{}.elb.mock", id)));
        }
        real.insert("id".to_string(), json!(id));
        real
    }
}

#[async_trait]
impl ResourceProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create(&self, resource_type: &str, attributes: &Attributes) -> ProviderResult<Attributes> {
        self.enter(format!("create {}", resource_type), resource_type)
            .await?;
        let real = self.fabricate(resource_type, attributes);

        let trigger = self.cancel_after.lock().unwrap().clone();
        if let Some((ty, token)) = trigger
            && ty == resource_type
        {
            token.cancel();
        }
        Ok(real)
    }

    async fn update(
        &self,
        resource_type: &str,
        id: &str,
        attributes: &Attributes,
    ) -> ProviderResult<Attributes> {
        self.enter(format!("update {} {}", resource_type, id), resource_type)
            .await?;
        let mut real = attributes.clone();
        real.insert("id".to_string(), json!(id));
        Ok(real)
    }

    async fn destroy(&self, resource_type: &str, id: &str) -> ProviderResult<()> {
        self.enter(format!("destroy {} {}", resource_type, id), resource_type)
            .await
    }

    async fn read(
        &self,
        _resource_type: &str,
        id: &str,
        recorded: &Attributes,
    ) -> ProviderResult<Option<Attributes>> {
        match self.remote.lock().unwrap().get(id) {
            Some(actual) => Ok(actual.clone()),
            None => Ok(Some(recorded.clone())),
        }
    }
}

/// VPC with subnets and an internet gateway; nothing references subnet2
#[allow(dead_code)]
pub fn network(include_subnet2: bool) -> SynthDocument {
    let mut stack = StackBuilder::new("network");
    let vpc = stack
        .resource("vpc", "aws_vpc", [("cidr_block", "10.0.0.0/16".into())])
        .unwrap();
    stack
        .resource(
            "subnet1",
            "aws_subnet",
            [("vpc_id", vpc.attr("id")), ("cidr_block", "10.0.1.0/24".into())],
        )
        .unwrap();
    if include_subnet2 {
        stack
            .resource(
                "subnet2",
                "aws_subnet",
                [("vpc_id", vpc.attr("id")), ("cidr_block", "10.0.2.0/24".into())],
            )
            .unwrap();
    }
    stack
        .resource("igw", "aws_internet_gateway", [("vpc_id", vpc.attr("id"))])
        .unwrap();
    synthesize(&stack.build().unwrap()).unwrap()
}

/// Network plus an IAM role, a function using it and a load balancer
#[allow(dead_code)]
pub fn application() -> SynthDocument {
    let mut stack = StackBuilder::new("app");
    let vpc = stack
        .resource("vpc", "aws_vpc", [("cidr_block", "10.0.0.0/16".into())])
        .unwrap();
    let subnet1 = stack
        .resource(
            "subnet1",
            "aws_subnet",
            [("vpc_id", vpc.attr("id")), ("cidr_block", "10.0.1.0/24".into())],
        )
        .unwrap();
    let subnet2 = stack
        .resource(
            "subnet2",
            "aws_subnet",
            [("vpc_id", vpc.attr("id")), ("cidr_block", "10.0.2.0/24".into())],
        )
        .unwrap();
    stack
        .resource("igw", "aws_internet_gateway", [("vpc_id", vpc.attr("id"))])
        .unwrap();
    let role = stack
        .resource("role", "aws_iam_role", [("name", "app-lambda".into())])
        .unwrap();
    stack
        .resource(
            "lambda",
            "aws_lambda_function",
            [
                ("function_name", "app".into()),
                ("role", role.attr("arn")),
                (
                    "subnet_ids",
                    vec![subnet1.attr("id"), subnet2.attr("id")].into(),
                ),
            ],
        )
        .unwrap();
    let alb = stack
        .resource(
            "alb",
            "aws_lb",
            [("subnets", vec![subnet1.attr("id"), subnet2.attr("id")].into())],
        )
        .unwrap();
    stack.output("alb_dns", alb.attr("dns_name")).unwrap();
    stack.output("role_arn", role.attr("arn")).unwrap();
    synthesize(&stack.build().unwrap()).unwrap()
}
