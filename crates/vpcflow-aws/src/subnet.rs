//! Subnet adapter

use crate::api::{CreateSubnetRequest, NetworkApi, Subnet};
use crate::error::ApiResult;
use crate::resource::{Describe, Resource, delete_and_wait, describe_opt, wait_until};
use crate::session::Session;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vpcflow_core::{Operation, ResourceStatus, Result, ResultExt};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetSpec {
    pub vpc_id: String,
    pub cidr_block: String,
    /// Chosen by the provider when omitted
    #[serde(default)]
    pub availability_zone: Option<String>,
}

#[async_trait]
impl Describe for Subnet {
    async fn describe(api: &dyn NetworkApi, id: &str) -> ApiResult<Self> {
        api.describe_subnet(id).await
    }

    fn state(&self) -> String {
        self.state.clone()
    }
}

pub struct SubnetResource;

#[async_trait]
impl Resource for SubnetResource {
    type Spec = SubnetSpec;

    const TYPE: &'static str = "subnet";

    fn requires_replacement(old: &SubnetSpec, new: &SubnetSpec) -> bool {
        old.vpc_id != new.vpc_id
            || old.cidr_block != new.cidr_block
            || (new.availability_zone.is_some() && old.availability_zone != new.availability_zone)
    }

    async fn create(&self, session: &Session, desired: &SubnetSpec) -> Result<String> {
        let request = CreateSubnetRequest {
            vpc_id: desired.vpc_id.clone(),
            cidr_block: desired.cidr_block.clone(),
            availability_zone: desired.availability_zone.clone(),
        };
        let subnet = session
            .api()
            .create_subnet(&request)
            .await
            .in_operation(Operation::Create, Self::TYPE, &desired.cidr_block)?;
        let id = subnet.subnet_id;
        tracing::info!("Created subnet {} in {}", id, desired.vpc_id);

        let timeout = session.config().timeouts.subnet_secs;
        let subnet = wait_until::<Subnet>(session, &id, "available", &["pending"], timeout)
            .await
            .in_operation(Operation::Create, Self::TYPE, &id)?;

        let observed = SubnetSpec::from(subnet);
        self.update(session, &id, &observed, desired).await?;
        Ok(id)
    }

    async fn read(&self, session: &Session, id: &str) -> Result<Option<SubnetSpec>> {
        let subnet = describe_opt::<Subnet>(session.api(), id)
            .await
            .in_operation(Operation::Read, Self::TYPE, id)?;
        Ok(subnet.map(SubnetSpec::from))
    }

    /// Nothing is mutable in place; only the record is refreshed
    async fn update(
        &self,
        session: &Session,
        id: &str,
        old: &SubnetSpec,
        new: &SubnetSpec,
    ) -> Result<()> {
        let mut recorded = new.clone();
        if recorded.availability_zone.is_none() {
            recorded.availability_zone = old.availability_zone.clone();
        }
        session
            .record(Self::TYPE, id, ResourceStatus::Available, &recorded)
            .await
    }

    async fn delete(&self, session: &Session, id: &str) -> Result<()> {
        let api = session.api();
        delete_and_wait::<Subnet, _, _>(session, id, &["pending", "available"], || {
            api.delete_subnet(id)
        })
        .await
        .in_operation(Operation::Delete, Self::TYPE, id)?;
        tracing::info!("Deleted subnet {}", id);
        session.forget(Self::TYPE, id).await
    }
}

impl From<Subnet> for SubnetSpec {
    fn from(subnet: Subnet) -> Self {
        Self {
            vpc_id: subnet.vpc_id,
            cidr_block: subnet.cidr_block,
            availability_zone: subnet.availability_zone,
        }
    }
}
