//! Internet gateway adapter
//!
//! Attachment state lags behind attach/detach calls: a describe right after
//! the call can still show the previous attachment. [`AttachmentProbe`]
//! reports the expected state once the grace window has passed.

use crate::api::{InternetGateway, NetworkApi};
use crate::error::{ApiResult, GATEWAY_NOT_ATTACHED};
use crate::resource::{Describe, Resource, delete_and_wait, describe_opt, present, wait_until};
use crate::session::Session;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use vpcflow_core::{
    ConvergenceSpec, Operation, Probe, ProbeResult, ProviderError, ResourceStatus,
    Result, ResultExt, retry, wait_for_state,
};

const DETACHED: &str = "detached";
const ATTACHED: &str = "available";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InternetGatewaySpec {
    /// VPC to attach to; detached when `None`
    #[serde(default)]
    pub vpc_id: Option<String>,
}

impl InternetGatewaySpec {
    pub fn attached_to(vpc_id: impl Into<String>) -> Self {
        Self {
            vpc_id: Some(vpc_id.into()),
        }
    }
}

fn attachment_state(gateway: &InternetGateway) -> String {
    gateway
        .attachments
        .first()
        .map(|a| a.state.clone())
        .unwrap_or_else(|| DETACHED.to_string())
}

#[async_trait]
impl Describe for InternetGateway {
    async fn describe(api: &dyn NetworkApi, id: &str) -> ApiResult<Self> {
        api.describe_internet_gateway(id).await
    }

    fn state(&self) -> String {
        attachment_state(self)
    }
}

/// Reads the attachment state of a gateway
pub struct AttachmentProbe<'a> {
    pub api: &'a dyn NetworkApi,
    pub id: &'a str,
    /// State the caller is waiting for
    pub expected: &'static str,
    /// After this long, the expected state is reported regardless
    pub grace: Duration,
}

#[async_trait]
impl Probe for AttachmentProbe<'_> {
    type Object = InternetGateway;

    async fn probe(
        &self,
        elapsed: Duration,
    ) -> std::result::Result<ProbeResult<InternetGateway>, ProviderError> {
        let gateway = match self.api.describe_internet_gateway(self.id).await {
            Ok(gateway) => gateway,
            Err(e) if e.is_not_found() => return Ok(ProbeResult::absent()),
            Err(e) => return Err(e),
        };

        if elapsed > self.grace {
            return Ok(ProbeResult::found(gateway, self.expected));
        }

        let state = attachment_state(&gateway);
        Ok(ProbeResult::found(gateway, state))
    }
}

pub struct InternetGatewayResource;

impl InternetGatewayResource {
    async fn wait_attachment(
        session: &Session,
        id: &str,
        expected: &'static str,
        pending: &[&str],
    ) -> Result<()> {
        let spec: ConvergenceSpec = session
            .wait_spec(expected, session.config().timeouts.internet_gateway_secs)
            .with_pending(pending.iter().copied());
        let probe = AttachmentProbe {
            api: session.api(),
            id,
            expected,
            grace: session.config().attachment_lag_grace(),
        };
        wait_for_state(&spec, &probe).await?;
        Ok(())
    }

    async fn attach(session: &Session, id: &str, vpc_id: &str) -> Result<()> {
        let api = session.api();
        tracing::info!("Attaching internet gateway {} to {}", id, vpc_id);

        let applied = retry(&session.retry_config(), || {
            api.attach_internet_gateway(id, vpc_id)
        })
        .await?;
        present(applied, id)?;

        Self::wait_attachment(session, id, ATTACHED, &[DETACHED, "attaching"]).await
    }

    async fn detach(session: &Session, id: &str, vpc_id: &str) -> Result<()> {
        let api = session.api();
        tracing::info!("Detaching internet gateway {} from {}", id, vpc_id);

        let applied = retry(&session.retry_config(), || async move {
            api.detach_internet_gateway(id, vpc_id)
                .await
                .map_err(|e| {
                    if e.code() == Some(GATEWAY_NOT_ATTACHED) {
                        ProviderError::not_found(GATEWAY_NOT_ATTACHED, e.message)
                    } else {
                        e
                    }
                })
        })
        .await?;
        if applied.is_already_gone() {
            tracing::debug!("Internet gateway {} was not attached to {}", id, vpc_id);
            return Ok(());
        }

        Self::wait_attachment(
            session,
            id,
            DETACHED,
            &["attached", "detaching", ATTACHED],
        )
        .await
    }
}

#[async_trait]
impl Resource for InternetGatewayResource {
    type Spec = InternetGatewaySpec;

    const TYPE: &'static str = "internet_gateway";

    fn requires_replacement(_old: &InternetGatewaySpec, _new: &InternetGatewaySpec) -> bool {
        false
    }

    async fn create(&self, session: &Session, desired: &InternetGatewaySpec) -> Result<String> {
        let gateway = session
            .api()
            .create_internet_gateway()
            .await
            .in_operation(Operation::Create, Self::TYPE, "new")?;
        let id = gateway.internet_gateway_id;
        tracing::info!("Created internet gateway {}", id);

        let timeout = session.config().timeouts.internet_gateway_secs;
        wait_until::<InternetGateway>(session, &id, DETACHED, &[], timeout)
            .await
            .in_operation(Operation::Create, Self::TYPE, &id)?;

        let observed = InternetGatewaySpec::default();
        session
            .record(Self::TYPE, &id, ResourceStatus::Creating, &observed)
            .await?;

        self.update(session, &id, &observed, desired).await?;
        Ok(id)
    }

    async fn read(&self, session: &Session, id: &str) -> Result<Option<InternetGatewaySpec>> {
        let gateway = describe_opt::<InternetGateway>(session.api(), id)
            .await
            .in_operation(Operation::Read, Self::TYPE, id)?;
        Ok(gateway.map(|g| InternetGatewaySpec {
            vpc_id: g.attachments.into_iter().next().map(|a| a.vpc_id),
        }))
    }

    async fn update(
        &self,
        session: &Session,
        id: &str,
        old: &InternetGatewaySpec,
        new: &InternetGatewaySpec,
    ) -> Result<()> {
        if old.vpc_id != new.vpc_id {
            if let Some(vpc_id) = &old.vpc_id {
                Self::detach(session, id, vpc_id)
                    .await
                    .in_operation(Operation::Update, Self::TYPE, id)?;
                session
                    .record(
                        Self::TYPE,
                        id,
                        ResourceStatus::Updating,
                        &InternetGatewaySpec::default(),
                    )
                    .await?;
            }
            if let Some(vpc_id) = &new.vpc_id {
                Self::attach(session, id, vpc_id)
                    .await
                    .in_operation(Operation::Update, Self::TYPE, id)?;
            }
        }

        session
            .record(Self::TYPE, id, ResourceStatus::Available, new)
            .await
    }

    async fn delete(&self, session: &Session, id: &str) -> Result<()> {
        let api = session.api();

        // Detach first; a gateway still attached fails with DependencyViolation
        let attached = describe_opt::<InternetGateway>(api, id)
            .await
            .in_operation(Operation::Delete, Self::TYPE, id)?
            .and_then(|g| g.attachments.into_iter().next());
        if let Some(attachment) = attached {
            Self::detach(session, id, &attachment.vpc_id)
                .await
                .in_operation(Operation::Delete, Self::TYPE, id)?;
        }

        delete_and_wait::<InternetGateway, _, _>(session, id, &[DETACHED], || {
            api.delete_internet_gateway(id)
        })
        .await
        .in_operation(Operation::Delete, Self::TYPE, id)?;
        tracing::info!("Deleted internet gateway {}", id);
        session.forget(Self::TYPE, id).await
    }
}

