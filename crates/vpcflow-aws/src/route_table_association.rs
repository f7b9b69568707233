//! Route table association adapter

use crate::api::{NetworkApi, RouteTableAssociation};
use crate::error::ApiResult;
use crate::resource::{Describe, Resource, delete_and_wait, describe_opt, present, wait_until};
use crate::session::Session;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vpcflow_core::{Operation, ResourceStatus, Result, ResultExt, retry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteTableAssociationSpec {
    pub route_table_id: String,
    pub subnet_id: String,
}

impl RouteTableAssociationSpec {
    pub fn new(route_table_id: impl Into<String>, subnet_id: impl Into<String>) -> Self {
        Self {
            route_table_id: route_table_id.into(),
            subnet_id: subnet_id.into(),
        }
    }
}

#[async_trait]
impl Describe for RouteTableAssociation {
    async fn describe(api: &dyn NetworkApi, id: &str) -> ApiResult<Self> {
        api.describe_route_table_association(id).await
    }

    fn state(&self) -> String {
        self.state.clone()
    }

    fn is_gone(&self) -> bool {
        self.state == "disassociated"
    }
}

pub struct RouteTableAssociationResource;

#[async_trait]
impl Resource for RouteTableAssociationResource {
    type Spec = RouteTableAssociationSpec;

    const TYPE: &'static str = "route_table_association";

    /// Both ids identify the association
    fn requires_replacement(
        old: &RouteTableAssociationSpec,
        new: &RouteTableAssociationSpec,
    ) -> bool {
        old != new
    }

    async fn create(
        &self,
        session: &Session,
        desired: &RouteTableAssociationSpec,
    ) -> Result<String> {
        let api = session.api();
        let route_table_id = desired.route_table_id.as_str();
        let subnet_id = desired.subnet_id.as_str();

        let applied = retry(&session.retry_config(), || {
            api.associate_route_table(route_table_id, subnet_id)
        })
        .await
        .in_operation(Operation::Create, Self::TYPE, route_table_id)?;
        let id = present(applied, route_table_id).in_operation(
            Operation::Create,
            Self::TYPE,
            route_table_id,
        )?;
        tracing::info!(
            "Associated route table {} with {} ({})",
            route_table_id,
            subnet_id,
            id
        );

        let timeout = session.config().timeouts.route_table_association_secs;
        wait_until::<RouteTableAssociation>(session, &id, "associated", &["associating"], timeout)
            .await
            .in_operation(Operation::Create, Self::TYPE, &id)?;

        self.update(session, &id, desired, desired).await?;
        Ok(id)
    }

    async fn read(&self, session: &Session, id: &str) -> Result<Option<RouteTableAssociationSpec>> {
        let association = describe_opt::<RouteTableAssociation>(session.api(), id)
            .await
            .in_operation(Operation::Read, Self::TYPE, id)?;
        Ok(association.and_then(|a| {
            a.subnet_id.map(|subnet_id| RouteTableAssociationSpec {
                route_table_id: a.route_table_id,
                subnet_id,
            })
        }))
    }

    /// Nothing is mutable in place; only the record is refreshed
    async fn update(
        &self,
        session: &Session,
        id: &str,
        _old: &RouteTableAssociationSpec,
        new: &RouteTableAssociationSpec,
    ) -> Result<()> {
        session
            .record(Self::TYPE, id, ResourceStatus::Available, new)
            .await
    }

    async fn delete(&self, session: &Session, id: &str) -> Result<()> {
        let api = session.api();
        delete_and_wait::<RouteTableAssociation, _, _>(
            session,
            id,
            &["associated", "disassociating"],
            || api.disassociate_route_table(id),
        )
        .await
        .in_operation(Operation::Delete, Self::TYPE, id)?;
        tracing::info!("Disassociated {}", id);
        session.forget(Self::TYPE, id).await
    }
}
