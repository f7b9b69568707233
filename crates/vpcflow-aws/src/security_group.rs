//! Security group adapter
//!
//! Ingress rules are reconciled as a set. A rule may reference the group it
//! belongs to, either through the `self` flag or by listing the group's own
//! id (`sg-x` or `owner/sg-x`); both spellings hash the same.

use crate::api::{CreateSecurityGroupRequest, GroupPair, IpPermission, NetworkApi, SecurityGroup};
use crate::error::ApiResult;
use crate::resource::{Describe, Resource, delete_and_wait, describe_opt, present, wait_until};
use crate::session::Session;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vpcflow_core::{
    Canonical, ChangeOp, Operation, ResourceStatus, Result, ResultExt, SetElement, diff_owned,
    retry,
};

/// One ingress rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupRule {
    /// `tcp`, `udp`, `icmp`, or `-1` for all
    pub protocol: String,
    pub from_port: i32,
    pub to_port: i32,
    #[serde(default)]
    pub cidr_blocks: Vec<String>,
    /// Peer groups, `sg-id` or `owner-id/sg-id`
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default, rename = "self")]
    pub self_ref: bool,
}

impl SecurityGroupRule {
    pub fn new(protocol: impl Into<String>, from_port: i32, to_port: i32) -> Self {
        Self {
            protocol: protocol.into(),
            from_port,
            to_port,
            cidr_blocks: Vec::new(),
            security_groups: Vec::new(),
            self_ref: false,
        }
    }

    pub fn tcp(port: i32) -> Self {
        Self::new("tcp", port, port)
    }

    pub fn from_cidr(mut self, cidr_block: impl Into<String>) -> Self {
        self.cidr_blocks.push(cidr_block.into());
        self
    }

    pub fn from_group(mut self, group: impl Into<String>) -> Self {
        self.security_groups.push(group.into());
        self
    }

    pub fn from_self(mut self) -> Self {
        self.self_ref = true;
        self
    }

    /// API form of the rule; the self flag becomes a pair naming `group_id`
    pub fn to_permission(&self, group_id: &str) -> IpPermission {
        let mut group_pairs: Vec<GroupPair> = self
            .security_groups
            .iter()
            .map(|peer| match peer.split_once('/') {
                Some((owner, id)) => GroupPair {
                    user_id: Some(owner.to_string()),
                    group_id: id.to_string(),
                },
                None => GroupPair {
                    user_id: None,
                    group_id: peer.clone(),
                },
            })
            .collect();
        if self.self_ref {
            group_pairs.push(GroupPair {
                user_id: None,
                group_id: group_id.to_string(),
            });
        }
        group_pairs.sort();
        group_pairs.dedup();

        let mut ip_ranges = self.cidr_blocks.clone();
        ip_ranges.sort();
        ip_ranges.dedup();

        IpPermission {
            protocol: self.protocol.to_lowercase(),
            from_port: self.from_port,
            to_port: self.to_port,
            ip_ranges,
            group_pairs,
        }
    }

    /// Rule form of an API permission. Pairs owned by `account_id` are
    /// written without the owner prefix.
    pub fn from_permission(permission: IpPermission, account_id: &str) -> Self {
        let security_groups = permission
            .group_pairs
            .into_iter()
            .map(|pair| match pair.user_id {
                Some(owner) if owner != account_id => format!("{}/{}", owner, pair.group_id),
                _ => pair.group_id,
            })
            .collect();

        Self {
            protocol: permission.protocol,
            from_port: permission.from_port,
            to_port: permission.to_port,
            cidr_blocks: permission.ip_ranges,
            security_groups,
            self_ref: false,
        }
    }

    /// One rule per source: each CIDR block, each peer group and the self
    /// marker. EC2 merges rules sharing protocol and ports into a single
    /// permission, so rules are compared and applied in this form.
    pub fn split(&self) -> Vec<SecurityGroupRule> {
        let bare = || Self::new(self.protocol.clone(), self.from_port, self.to_port);

        let mut rules: Vec<Self> = self
            .cidr_blocks
            .iter()
            .map(|cidr_block| bare().from_cidr(cidr_block.clone()))
            .collect();
        rules.extend(
            self.security_groups
                .iter()
                .map(|peer| bare().from_group(peer.clone())),
        );
        if self.self_ref {
            rules.push(bare().from_self());
        }
        if rules.is_empty() {
            rules.push(self.clone());
        }
        rules
    }
}

/// [`SecurityGroupRule::split`] over a whole rule list
pub fn split_rules(rules: &[SecurityGroupRule]) -> Vec<SecurityGroupRule> {
    rules.iter().flat_map(SecurityGroupRule::split).collect()
}

fn peer_group_id(peer: &str) -> &str {
    peer.rsplit_once('/').map_or(peer, |(_, id)| id)
}

impl SetElement for SecurityGroupRule {
    fn canonicalize(&self, out: &mut Canonical) {
        out.int("from_port", self.from_port.into())
            .int("to_port", self.to_port.into())
            .field("protocol", &self.protocol.to_lowercase())
            .sorted_list("cidr_blocks", &self.cidr_blocks)
            .sorted_list("security_groups", &self.security_groups)
            .flag("self", self.self_ref);
    }

    fn normalize_for_owner(mut self, owner_id: &str) -> Self {
        let before = self.security_groups.len();
        self.security_groups
            .retain(|peer| peer_group_id(peer) != owner_id);
        if self.security_groups.len() != before {
            self.self_ref = true;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub vpc_id: Option<String>,
    #[serde(default)]
    pub ingress: Vec<SecurityGroupRule>,
}

impl SecurityGroupSpec {
    pub fn new(name: impl Into<String>, vpc_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: "Managed by vpcflow".to_string(),
            vpc_id: Some(vpc_id.into()),
            ingress: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: SecurityGroupRule) -> Self {
        self.ingress.push(rule);
        self
    }
}

impl From<SecurityGroup> for SecurityGroupSpec {
    fn from(group: SecurityGroup) -> Self {
        let group_id = group.group_id;
        let owner_id = group.owner_id;
        let ingress = group
            .ingress
            .into_iter()
            .flat_map(|p| SecurityGroupRule::from_permission(p, &owner_id).split())
            .map(|r| r.normalize_for_owner(&group_id))
            .collect();

        Self {
            name: group.group_name,
            description: group.description,
            vpc_id: group.vpc_id,
            ingress,
        }
    }
}

#[async_trait]
impl Describe for SecurityGroup {
    async fn describe(api: &dyn NetworkApi, id: &str) -> ApiResult<Self> {
        api.describe_security_group(id).await
    }

    /// Security groups have no lifecycle; visible means it exists
    fn state(&self) -> String {
        "exists".to_string()
    }
}

pub struct SecurityGroupResource;

#[async_trait]
impl Resource for SecurityGroupResource {
    type Spec = SecurityGroupSpec;

    const TYPE: &'static str = "security_group";

    fn requires_replacement(old: &SecurityGroupSpec, new: &SecurityGroupSpec) -> bool {
        old.name != new.name || old.description != new.description || old.vpc_id != new.vpc_id
    }

    async fn create(&self, session: &Session, desired: &SecurityGroupSpec) -> Result<String> {
        let request = CreateSecurityGroupRequest {
            group_name: desired.name.clone(),
            description: desired.description.clone(),
            vpc_id: desired.vpc_id.clone(),
        };
        let id = session
            .api()
            .create_security_group(&request)
            .await
            .in_operation(Operation::Create, Self::TYPE, &desired.name)?;
        tracing::info!("Created security group {} ({})", id, desired.name);

        let timeout = session.config().timeouts.security_group_secs;
        let group = wait_until::<SecurityGroup>(session, &id, "exists", &[], timeout)
            .await
            .in_operation(Operation::Create, Self::TYPE, &id)?;

        let observed = SecurityGroupSpec::from(group);
        session
            .record(Self::TYPE, &id, ResourceStatus::Creating, &observed)
            .await?;

        self.update(session, &id, &observed, desired).await?;
        Ok(id)
    }

    async fn read(&self, session: &Session, id: &str) -> Result<Option<SecurityGroupSpec>> {
        let group = describe_opt::<SecurityGroup>(session.api(), id)
            .await
            .in_operation(Operation::Read, Self::TYPE, id)?;
        Ok(group.map(SecurityGroupSpec::from))
    }

    async fn update(
        &self,
        session: &Session,
        id: &str,
        old: &SecurityGroupSpec,
        new: &SecurityGroupSpec,
    ) -> Result<()> {
        let api = session.api();
        let observed = split_rules(&old.ingress);
        let desired = split_rules(&new.ingress);

        let mut recorded = old.clone();
        recorded.ingress = observed
            .iter()
            .cloned()
            .map(|r| r.normalize_for_owner(id))
            .collect();

        for change in diff_owned(id, &desired, &observed).changes() {
            let permission = change.element.to_permission(id);
            match change.op {
                ChangeOp::Remove => {
                    tracing::info!(
                        "Security group {}: revoking {} {}-{}",
                        id,
                        permission.protocol,
                        permission.from_port,
                        permission.to_port
                    );
                    let applied = retry(&session.retry_config(), || {
                        api.revoke_ingress(id, &permission)
                    })
                    .await
                    .in_operation(Operation::Update, Self::TYPE, id)?;
                    if applied.is_already_gone() {
                        tracing::debug!("Rule was already revoked");
                    }
                }
                ChangeOp::Add => {
                    tracing::info!(
                        "Security group {}: authorizing {} {}-{}",
                        id,
                        permission.protocol,
                        permission.from_port,
                        permission.to_port
                    );
                    let applied = retry(&session.retry_config(), || {
                        api.authorize_ingress(id, &permission)
                    })
                    .await
                    .in_operation(Operation::Update, Self::TYPE, id)?;
                    present(applied, id).in_operation(Operation::Update, Self::TYPE, id)?;
                }
            }

            change.apply_to(&mut recorded.ingress);
            session
                .record(Self::TYPE, id, ResourceStatus::Updating, &recorded)
                .await?;
        }

        session
            .record(Self::TYPE, id, ResourceStatus::Available, &recorded)
            .await
    }

    async fn delete(&self, session: &Session, id: &str) -> Result<()> {
        let api = session.api();
        delete_and_wait::<SecurityGroup, _, _>(session, id, &["exists"], || {
            api.delete_security_group(id)
        })
        .await
        .in_operation(Operation::Delete, Self::TYPE, id)?;
        tracing::info!("Deleted security group {}", id);
        session.forget(Self::TYPE, id).await
    }
}
