//! Remote network API consumed by the adapters
//!
//! Every call returns a classified [`ProviderError`]; `describe_*` calls
//! report a missing object as a not-found error, never as an empty value.

use crate::error::ApiResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vpc {
    pub vpc_id: String,
    pub cidr_block: String,
    /// `pending` | `available`
    pub state: String,
    pub instance_tenancy: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VpcAttributeName {
    EnableDnsSupport,
    EnableDnsHostnames,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VpcAttribute {
    EnableDnsSupport(bool),
    EnableDnsHostnames(bool),
}

impl VpcAttribute {
    pub fn name(&self) -> VpcAttributeName {
        match self {
            VpcAttribute::EnableDnsSupport(_) => VpcAttributeName::EnableDnsSupport,
            VpcAttribute::EnableDnsHostnames(_) => VpcAttributeName::EnableDnsHostnames,
        }
    }

    pub fn value(&self) -> bool {
        match self {
            VpcAttribute::EnableDnsSupport(v) | VpcAttribute::EnableDnsHostnames(v) => *v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    pub subnet_id: String,
    pub vpc_id: String,
    pub cidr_block: String,
    pub availability_zone: Option<String>,
    /// `pending` | `available`
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternetGateway {
    pub internet_gateway_id: String,
    pub attachments: Vec<GatewayAttachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayAttachment {
    pub vpc_id: String,
    /// `attaching` | `attached` | `available` | `detaching` | `detached`
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteTable {
    pub route_table_id: String,
    pub vpc_id: String,
    pub routes: Vec<RouteEntry>,
    pub associations: Vec<RouteTableAssociation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub destination_cidr_block: String,
    pub gateway_id: Option<String>,
    pub instance_id: Option<String>,
    /// Server-assigned (`active` | `blackhole`)
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteTableAssociation {
    pub association_id: String,
    pub route_table_id: String,
    /// `None` for the main association
    pub subnet_id: Option<String>,
    pub main: bool,
    /// `associating` | `associated` | `disassociating` | `disassociated`
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub group_id: String,
    pub group_name: String,
    pub description: String,
    pub vpc_id: Option<String>,
    /// Account that owns the group
    pub owner_id: String,
    pub ingress: Vec<IpPermission>,
}

/// One ingress permission as the API models it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPermission {
    pub protocol: String,
    pub from_port: i32,
    pub to_port: i32,
    pub ip_ranges: Vec<String>,
    pub group_pairs: Vec<GroupPair>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupPair {
    /// Set only for groups owned by another account
    pub user_id: Option<String>,
    pub group_id: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateVpcRequest {
    pub cidr_block: String,
    pub instance_tenancy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateSubnetRequest {
    pub vpc_id: String,
    pub cidr_block: String,
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateSecurityGroupRequest {
    pub group_name: String,
    pub description: String,
    pub vpc_id: Option<String>,
}

/// Network API of the provider
#[async_trait]
pub trait NetworkApi: Send + Sync {
    // VPC
    async fn create_vpc(&self, request: &CreateVpcRequest) -> ApiResult<Vpc>;
    async fn describe_vpc(&self, vpc_id: &str) -> ApiResult<Vpc>;
    async fn describe_vpc_attribute(
        &self,
        vpc_id: &str,
        attribute: VpcAttributeName,
    ) -> ApiResult<bool>;
    async fn modify_vpc_attribute(&self, vpc_id: &str, attribute: VpcAttribute) -> ApiResult<()>;
    async fn delete_vpc(&self, vpc_id: &str) -> ApiResult<()>;

    // Subnet
    async fn create_subnet(&self, request: &CreateSubnetRequest) -> ApiResult<Subnet>;
    async fn describe_subnet(&self, subnet_id: &str) -> ApiResult<Subnet>;
    async fn delete_subnet(&self, subnet_id: &str) -> ApiResult<()>;

    // Internet gateway
    async fn create_internet_gateway(&self) -> ApiResult<InternetGateway>;
    async fn describe_internet_gateway(&self, gateway_id: &str) -> ApiResult<InternetGateway>;
    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> ApiResult<()>;
    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> ApiResult<()>;
    async fn delete_internet_gateway(&self, gateway_id: &str) -> ApiResult<()>;

    // Route table
    async fn create_route_table(&self, vpc_id: &str) -> ApiResult<RouteTable>;
    async fn describe_route_table(&self, route_table_id: &str) -> ApiResult<RouteTable>;
    async fn create_route(&self, route_table_id: &str, route: &RouteEntry) -> ApiResult<()>;
    async fn delete_route(&self, route_table_id: &str, destination_cidr_block: &str)
    -> ApiResult<()>;
    async fn delete_route_table(&self, route_table_id: &str) -> ApiResult<()>;

    // Route table association
    /// Returns the association id
    async fn associate_route_table(&self, route_table_id: &str, subnet_id: &str)
    -> ApiResult<String>;
    async fn describe_route_table_association(
        &self,
        association_id: &str,
    ) -> ApiResult<RouteTableAssociation>;
    async fn disassociate_route_table(&self, association_id: &str) -> ApiResult<()>;

    // Security group
    /// Returns the group id
    async fn create_security_group(&self, request: &CreateSecurityGroupRequest)
    -> ApiResult<String>;
    async fn describe_security_group(&self, group_id: &str) -> ApiResult<SecurityGroup>;
    async fn authorize_ingress(&self, group_id: &str, permission: &IpPermission) -> ApiResult<()>;
    async fn revoke_ingress(&self, group_id: &str, permission: &IpPermission) -> ApiResult<()>;
    async fn delete_security_group(&self, group_id: &str) -> ApiResult<()>;
}
