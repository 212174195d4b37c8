//! プログラムからスタックを宣言するためのビルダー
//!
//! ```
//! use stackflow_core::StackBuilder;
//!
//! let mut stack = StackBuilder::new("network");
//! let vpc = stack.resource("vpc", "aws_vpc", [("cidr_block", "10.0.0.0/16".into())])?;
//! stack.resource("subnet1", "aws_subnet", [("vpc_id", vpc.attr("id"))])?;
//! stack.output("vpc-id", vpc.attr("id"))?;
//! let stack = stack.build()?;
//! assert_eq!(stack.graph.len(), 2);
//! # Ok::<(), stackflow_core::StackError>(())
//! ```

use crate::error::Result;
use crate::model::{AttrValue, BackendBlock, Output, ProviderBlock, Reference, Resource, Stack};
use crate::resolver::{ReferencePolicy, ReferenceResolver};

/// 宣言済みリソースへのハンドル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    id: String,
}

impl ResourceHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// このリソースの出力属性への参照
    pub fn attr(&self, attribute: impl Into<String>) -> AttrValue {
        AttrValue::Ref(Reference::new(&self.id, attribute))
    }
}

pub struct StackBuilder {
    name: String,
    provider: Option<ProviderBlock>,
    backend: Option<BackendBlock>,
    resolver: ReferenceResolver,
}

impl StackBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_policy(name, ReferencePolicy::Strict)
    }

    pub fn with_policy(name: impl Into<String>, policy: ReferencePolicy) -> Self {
        Self {
            name: name.into(),
            provider: None,
            backend: None,
            resolver: ReferenceResolver::new(policy),
        }
    }

    pub fn provider(&mut self, provider: ProviderBlock) -> &mut Self {
        self.provider = Some(provider);
        self
    }

    pub fn backend(&mut self, backend: BackendBlock) -> &mut Self {
        self.backend = Some(backend);
        self
    }

    /// リソースを宣言
    pub fn resource<'a>(
        &mut self,
        id: &str,
        resource_type: &str,
        attributes: impl IntoIterator<Item = (&'a str, AttrValue)>,
    ) -> Result<ResourceHandle> {
        let mut resource = Resource::new(id, resource_type);
        for (name, value) in attributes {
            resource.attributes.insert(name.to_string(), value);
        }
        self.add(resource)
    }

    /// 組み立て済みのリソースを宣言
    pub fn add(&mut self, resource: Resource) -> Result<ResourceHandle> {
        let id = resource.id.clone();
        self.resolver.declare(resource)?;
        Ok(ResourceHandle { id })
    }

    pub fn output(&mut self, name: &str, value: impl Into<AttrValue>) -> Result<()> {
        self.resolver.declare_output(Output::new(name, value))
    }

    pub fn add_output(&mut self, output: Output) -> Result<()> {
        self.resolver.declare_output(output)
    }

    pub fn build(self) -> Result<Stack> {
        Ok(Stack {
            name: self.name,
            provider: self.provider,
            backend: self.backend,
            graph: self.resolver.build()?,
        })
    }
}
