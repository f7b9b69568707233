//! VPC adapter

use crate::api::{CreateVpcRequest, NetworkApi, Vpc, VpcAttribute, VpcAttributeName};
use crate::error::ApiResult;
use crate::resource::{Describe, Resource, delete_and_wait, describe_opt, present, wait_until};
use crate::session::Session;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vpcflow_core::{CloudError, Operation, ResourceStatus, Result, ResultExt, retry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpcSpec {
    pub cidr_block: String,
    #[serde(default)]
    pub instance_tenancy: Option<String>,
    #[serde(default = "default_true")]
    pub enable_dns_support: bool,
    #[serde(default)]
    pub enable_dns_hostnames: bool,
}

fn default_true() -> bool {
    true
}

impl VpcSpec {
    pub fn new(cidr_block: impl Into<String>) -> Self {
        Self {
            cidr_block: cidr_block.into(),
            instance_tenancy: None,
            enable_dns_support: true,
            enable_dns_hostnames: false,
        }
    }

    pub fn with_dns_hostnames(mut self, enabled: bool) -> Self {
        self.enable_dns_hostnames = enabled;
        self
    }

    pub fn with_dns_support(mut self, enabled: bool) -> Self {
        self.enable_dns_support = enabled;
        self
    }

    fn attributes(&self) -> [VpcAttribute; 2] {
        [
            VpcAttribute::EnableDnsSupport(self.enable_dns_support),
            VpcAttribute::EnableDnsHostnames(self.enable_dns_hostnames),
        ]
    }

    fn set(&mut self, attribute: VpcAttribute) {
        match attribute {
            VpcAttribute::EnableDnsSupport(v) => self.enable_dns_support = v,
            VpcAttribute::EnableDnsHostnames(v) => self.enable_dns_hostnames = v,
        }
    }
}

#[async_trait]
impl Describe for Vpc {
    async fn describe(api: &dyn NetworkApi, id: &str) -> ApiResult<Self> {
        api.describe_vpc(id).await
    }

    fn state(&self) -> String {
        self.state.clone()
    }
}

pub struct VpcResource;

#[async_trait]
impl Resource for VpcResource {
    type Spec = VpcSpec;

    const TYPE: &'static str = "vpc";

    fn requires_replacement(old: &VpcSpec, new: &VpcSpec) -> bool {
        old.cidr_block != new.cidr_block || old.instance_tenancy != new.instance_tenancy
    }

    async fn create(&self, session: &Session, desired: &VpcSpec) -> Result<String> {
        let request = CreateVpcRequest {
            cidr_block: desired.cidr_block.clone(),
            instance_tenancy: desired.instance_tenancy.clone(),
        };
        let vpc = session
            .api()
            .create_vpc(&request)
            .await
            .in_operation(Operation::Create, Self::TYPE, &desired.cidr_block)?;
        let id = vpc.vpc_id;
        tracing::info!("Created VPC {} ({})", id, desired.cidr_block);

        let timeout = session.config().timeouts.vpc_secs;
        wait_until::<Vpc>(session, &id, "available", &["pending"], timeout)
            .await
            .in_operation(Operation::Create, Self::TYPE, &id)?;

        let observed = self
            .read(session, &id)
            .await?
            .ok_or_else(|| CloudError::NotFound(id.clone()))
            .in_operation(Operation::Create, Self::TYPE, &id)?;
        session
            .record(Self::TYPE, &id, ResourceStatus::Creating, &observed)
            .await?;

        self.update(session, &id, &observed, desired).await?;
        Ok(id)
    }

    async fn read(&self, session: &Session, id: &str) -> Result<Option<VpcSpec>> {
        let api = session.api();
        let Some(vpc) = describe_opt::<Vpc>(api, id)
            .await
            .in_operation(Operation::Read, Self::TYPE, id)?
        else {
            return Ok(None);
        };

        let enable_dns_support = api
            .describe_vpc_attribute(id, VpcAttributeName::EnableDnsSupport)
            .await
            .in_operation(Operation::Read, Self::TYPE, id)?;
        let enable_dns_hostnames = api
            .describe_vpc_attribute(id, VpcAttributeName::EnableDnsHostnames)
            .await
            .in_operation(Operation::Read, Self::TYPE, id)?;

        Ok(Some(VpcSpec {
            cidr_block: vpc.cidr_block,
            instance_tenancy: vpc.instance_tenancy,
            enable_dns_support,
            enable_dns_hostnames,
        }))
    }

    async fn update(&self, session: &Session, id: &str, old: &VpcSpec, new: &VpcSpec) -> Result<()> {
        let api = session.api();
        let mut recorded = old.clone();

        for (before, after) in old.attributes().into_iter().zip(new.attributes()) {
            if before == after {
                continue;
            }
            let applied = retry(&session.retry_config(), || api.modify_vpc_attribute(id, after))
                .await
                .in_operation(Operation::Update, Self::TYPE, id)?;
            present(applied, id).in_operation(Operation::Update, Self::TYPE, id)?;
            tracing::info!("VPC {}: {:?} -> {}", id, after.name(), after.value());

            recorded.set(after);
            session
                .record(Self::TYPE, id, ResourceStatus::Updating, &recorded)
                .await?;
        }

        session
            .record(Self::TYPE, id, ResourceStatus::Available, new)
            .await
    }

    async fn delete(&self, session: &Session, id: &str) -> Result<()> {
        let api = session.api();
        delete_and_wait::<Vpc, _, _>(session, id, &["pending", "available"], || api.delete_vpc(id))
            .await
            .in_operation(Operation::Delete, Self::TYPE, id)?;
        tracing::info!("Deleted VPC {}", id);
        session.forget(Self::TYPE, id).await
    }
}
