//! Route table adapter
//!
//! Routes are reconciled as a set. The `local` route of the VPC's own CIDR
//! is created by the provider and never managed.

use crate::api::{NetworkApi, RouteEntry, RouteTable};
use crate::error::ApiResult;
use crate::resource::{Describe, Resource, delete_and_wait, describe_opt, present, wait_until};
use crate::session::Session;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vpcflow_core::{
    Canonical, ChangeOp, Operation, ResourceStatus, Result, ResultExt, SetElement,
    diff, retain_managed, retry,
};

const LOCAL_GATEWAY: &str = "local";

/// One route; the server-assigned route state is not part of it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub cidr_block: String,
    #[serde(default)]
    pub gateway_id: Option<String>,
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl Route {
    pub fn via_gateway(cidr_block: impl Into<String>, gateway_id: impl Into<String>) -> Self {
        Self {
            cidr_block: cidr_block.into(),
            gateway_id: Some(gateway_id.into()),
            instance_id: None,
        }
    }

    pub fn via_instance(cidr_block: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            cidr_block: cidr_block.into(),
            gateway_id: None,
            instance_id: Some(instance_id.into()),
        }
    }

    fn to_entry(&self) -> RouteEntry {
        RouteEntry {
            destination_cidr_block: self.cidr_block.clone(),
            gateway_id: self.gateway_id.clone(),
            instance_id: self.instance_id.clone(),
            state: None,
        }
    }
}

impl From<RouteEntry> for Route {
    fn from(entry: RouteEntry) -> Self {
        Self {
            cidr_block: entry.destination_cidr_block,
            gateway_id: entry.gateway_id,
            instance_id: entry.instance_id,
        }
    }
}

impl SetElement for Route {
    fn canonicalize(&self, out: &mut Canonical) {
        out.field("cidr_block", &self.cidr_block)
            .opt_field("gateway_id", self.gateway_id.as_deref())
            .opt_field("instance_id", self.instance_id.as_deref());
    }

    fn is_intrinsic(&self) -> bool {
        self.gateway_id.as_deref() == Some(LOCAL_GATEWAY)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteTableSpec {
    pub vpc_id: String,
    #[serde(default)]
    pub routes: Vec<Route>,
}

impl RouteTableSpec {
    pub fn new(vpc_id: impl Into<String>) -> Self {
        Self {
            vpc_id: vpc_id.into(),
            routes: Vec::new(),
        }
    }

    pub fn with_route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }
}

#[async_trait]
impl Describe for RouteTable {
    async fn describe(api: &dyn NetworkApi, id: &str) -> ApiResult<Self> {
        api.describe_route_table(id).await
    }

    /// Route tables have no lifecycle; visible means ready
    fn state(&self) -> String {
        "ready".to_string()
    }
}

pub struct RouteTableResource;

#[async_trait]
impl Resource for RouteTableResource {
    type Spec = RouteTableSpec;

    const TYPE: &'static str = "route_table";

    fn requires_replacement(old: &RouteTableSpec, new: &RouteTableSpec) -> bool {
        old.vpc_id != new.vpc_id
    }

    async fn create(&self, session: &Session, desired: &RouteTableSpec) -> Result<String> {
        let table = session
            .api()
            .create_route_table(&desired.vpc_id)
            .await
            .in_operation(Operation::Create, Self::TYPE, &desired.vpc_id)?;
        let id = table.route_table_id;
        tracing::info!("Created route table {} in {}", id, desired.vpc_id);

        let timeout = session.config().timeouts.route_table_secs;
        let table = wait_until::<RouteTable>(session, &id, "ready", &[], timeout)
            .await
            .in_operation(Operation::Create, Self::TYPE, &id)?;

        let observed = RouteTableSpec {
            vpc_id: table.vpc_id,
            routes: retain_managed(table.routes.into_iter().map(Route::from)),
        };
        session
            .record(Self::TYPE, &id, ResourceStatus::Creating, &observed)
            .await?;

        self.update(session, &id, &observed, desired).await?;
        Ok(id)
    }

    async fn read(&self, session: &Session, id: &str) -> Result<Option<RouteTableSpec>> {
        let table = describe_opt::<RouteTable>(session.api(), id)
            .await
            .in_operation(Operation::Read, Self::TYPE, id)?;
        Ok(table.map(|t| RouteTableSpec {
            vpc_id: t.vpc_id,
            routes: retain_managed(t.routes.into_iter().map(Route::from)),
        }))
    }

    async fn update(
        &self,
        session: &Session,
        id: &str,
        old: &RouteTableSpec,
        new: &RouteTableSpec,
    ) -> Result<()> {
        let api = session.api();
        let observed = retain_managed(old.routes.iter().cloned());
        let desired = retain_managed(new.routes.iter().cloned());

        let mut recorded = RouteTableSpec {
            vpc_id: old.vpc_id.clone(),
            routes: observed.clone(),
        };

        for change in diff(&desired, &observed).changes() {
            let route = &change.element;
            match change.op {
                ChangeOp::Remove => {
                    tracing::info!("Route table {}: removing route {}", id, route.cidr_block);
                    let applied = retry(&session.retry_config(), || {
                        api.delete_route(id, &route.cidr_block)
                    })
                    .await
                    .in_operation(Operation::Update, Self::TYPE, id)?;
                    if applied.is_already_gone() {
                        tracing::debug!("Route {} was already gone", route.cidr_block);
                    }
                }
                ChangeOp::Add => {
                    tracing::info!("Route table {}: adding route {}", id, route.cidr_block);
                    let entry = route.to_entry();
                    let applied = retry(&session.retry_config(), || api.create_route(id, &entry))
                        .await
                        .in_operation(Operation::Update, Self::TYPE, id)?;
                    present(applied, id).in_operation(Operation::Update, Self::TYPE, id)?;
                }
            }

            change.apply_to(&mut recorded.routes);
            session
                .record(Self::TYPE, id, ResourceStatus::Updating, &recorded)
                .await?;
        }

        recorded.vpc_id = new.vpc_id.clone();
        session
            .record(Self::TYPE, id, ResourceStatus::Available, &recorded)
            .await
    }

    async fn delete(&self, session: &Session, id: &str) -> Result<()> {
        let api = session.api();

        let Some(table) = describe_opt::<RouteTable>(api, id)
            .await
            .in_operation(Operation::Delete, Self::TYPE, id)?
        else {
            tracing::debug!("Route table {} already gone", id);
            return session.forget(Self::TYPE, id).await;
        };

        // Subnet associations block deletion; the main association cannot be removed
        for association in table.associations.iter().filter(|a| !a.main) {
            let association_id = association.association_id.as_str();
            tracing::info!("Route table {}: disassociating {}", id, association_id);
            retry(&session.retry_config(), || {
                api.disassociate_route_table(association_id)
            })
            .await
            .in_operation(Operation::Delete, Self::TYPE, id)?;
        }

        delete_and_wait::<RouteTable, _, _>(session, id, &["ready"], || {
            api.delete_route_table(id)
        })
        .await
        .in_operation(Operation::Delete, Self::TYPE, id)?;
        tracing::info!("Deleted route table {}", id);
        session.forget(Self::TYPE, id).await
    }
}
