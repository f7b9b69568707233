//! AWS network resource adapters for vpcflow
//!
//! Each adapter implements [`Resource`] for one resource type on top of the
//! convergence primitives in `vpcflow-core`:
//!
//! | Adapter | Waits for | Reconciled sets |
//! |---|---|---|
//! | [`VpcResource`] | `available` | - |
//! | [`SubnetResource`] | `available` | - |
//! | [`InternetGatewayResource`] | attachment `available` / `detached` | - |
//! | [`RouteTableResource`] | visible | routes |
//! | [`RouteTableAssociationResource`] | `associated` | - |
//! | [`SecurityGroupResource`] | visible | ingress rules |
//!
//! The provider is reached through [`NetworkApi`]. The `ec2` feature adds
//! `Ec2Api`, backed by aws-sdk-ec2.
//!
//! ```ignore
//! let session = Session::for_project(Arc::new(Ec2Api::from_env().await), ".")?;
//! let vpc_id = VpcResource.create(&session, &VpcSpec::new("10.0.0.0/16")).await?;
//! ```

pub mod api;
pub mod error;
pub mod internet_gateway;
pub mod resource;
pub mod route_table;
pub mod route_table_association;
pub mod security_group;
pub mod session;
pub mod subnet;
pub mod vpc;

#[cfg(feature = "ec2")]
pub mod ec2;

pub use api::NetworkApi;
pub use error::{ApiResult, api_error, classify_code};
pub use internet_gateway::{AttachmentProbe, InternetGatewayResource, InternetGatewaySpec};
pub use resource::{Describe, Resource, StateProbe};
pub use route_table::{Route, RouteTableResource, RouteTableSpec};
pub use route_table_association::{RouteTableAssociationResource, RouteTableAssociationSpec};
pub use security_group::{
    SecurityGroupResource, SecurityGroupRule, SecurityGroupSpec, split_rules,
};
pub use session::Session;
pub use subnet::{SubnetResource, SubnetSpec};
pub use vpc::{VpcResource, VpcSpec};

#[cfg(feature = "ec2")]
pub use ec2::Ec2Api;
