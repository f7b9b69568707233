//! [`NetworkApi`] backed by aws-sdk-ec2

use crate::api::{
    CreateSecurityGroupRequest, CreateSubnetRequest, CreateVpcRequest, GatewayAttachment, GroupPair,
    InternetGateway, IpPermission, NetworkApi, RouteEntry, RouteTable, RouteTableAssociation,
    SecurityGroup, Subnet, Vpc, VpcAttribute, VpcAttributeName,
};
use crate::error::{ApiResult, api_error};
use async_trait::async_trait;
use aws_sdk_ec2::Client;
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::types;
use vpcflow_core::ProviderError;

/// Classifies an SDK failure: service errors by code, everything else
/// (dispatch, timeout, response decoding) is unclassified
fn classify<E, R>(err: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    if let SdkError::ServiceError(service) = &err {
        if let Some(code) = service.err().code() {
            let message = service.err().message().unwrap_or_default();
            return api_error(code, message);
        }
    }
    ProviderError::unclassified(DisplayErrorContext(&err).to_string())
}

fn not_found(code: &str, id: &str) -> ProviderError {
    api_error(code, format!("'{}' does not exist", id))
}

fn text(value: Option<&str>) -> String {
    value.unwrap_or_default().to_string()
}

pub struct Ec2Api {
    client: Client,
}

impl Ec2Api {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Client from the default credential and region chain
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config))
    }
}

fn vpc_from(vpc: &types::Vpc) -> Vpc {
    Vpc {
        vpc_id: text(vpc.vpc_id()),
        cidr_block: text(vpc.cidr_block()),
        state: text(vpc.state().map(|s| s.as_str())),
        instance_tenancy: vpc.instance_tenancy().map(|t| t.as_str().to_string()),
    }
}

fn subnet_from(subnet: &types::Subnet) -> Subnet {
    Subnet {
        subnet_id: text(subnet.subnet_id()),
        vpc_id: text(subnet.vpc_id()),
        cidr_block: text(subnet.cidr_block()),
        availability_zone: subnet.availability_zone().map(str::to_string),
        state: text(subnet.state().map(|s| s.as_str())),
    }
}

fn gateway_from(gateway: &types::InternetGateway) -> InternetGateway {
    InternetGateway {
        internet_gateway_id: text(gateway.internet_gateway_id()),
        attachments: gateway
            .attachments()
            .iter()
            .map(|a| GatewayAttachment {
                vpc_id: text(a.vpc_id()),
                state: text(a.state().map(|s| s.as_str())),
            })
            .collect(),
    }
}

fn association_from(association: &types::RouteTableAssociation) -> RouteTableAssociation {
    RouteTableAssociation {
        association_id: text(association.route_table_association_id()),
        route_table_id: text(association.route_table_id()),
        subnet_id: association.subnet_id().map(str::to_string),
        main: association.main().unwrap_or(false),
        state: text(
            association
                .association_state()
                .and_then(|s| s.state())
                .map(|s| s.as_str()),
        ),
    }
}

fn route_table_from(table: &types::RouteTable) -> RouteTable {
    RouteTable {
        route_table_id: text(table.route_table_id()),
        vpc_id: text(table.vpc_id()),
        routes: table
            .routes()
            .iter()
            .map(|r| RouteEntry {
                destination_cidr_block: text(r.destination_cidr_block()),
                gateway_id: r.gateway_id().map(str::to_string),
                instance_id: r.instance_id().map(str::to_string),
                state: r.state().map(|s| s.as_str().to_string()),
            })
            .collect(),
        associations: table.associations().iter().map(association_from).collect(),
    }
}

fn permission_from(permission: &types::IpPermission) -> IpPermission {
    IpPermission {
        protocol: text(permission.ip_protocol()),
        from_port: permission.from_port().unwrap_or(0),
        to_port: permission.to_port().unwrap_or(0),
        ip_ranges: permission
            .ip_ranges()
            .iter()
            .filter_map(|r| r.cidr_ip().map(str::to_string))
            .collect(),
        group_pairs: permission
            .user_id_group_pairs()
            .iter()
            .map(|p| GroupPair {
                user_id: p.user_id().map(str::to_string),
                group_id: text(p.group_id()),
            })
            .collect(),
    }
}

fn permission_to(permission: &IpPermission) -> types::IpPermission {
    types::IpPermission::builder()
        .ip_protocol(&permission.protocol)
        .from_port(permission.from_port)
        .to_port(permission.to_port)
        .set_ip_ranges(Some(
            permission
                .ip_ranges
                .iter()
                .map(|cidr| types::IpRange::builder().cidr_ip(cidr).build())
                .collect(),
        ))
        .set_user_id_group_pairs(Some(
            permission
                .group_pairs
                .iter()
                .map(|p| {
                    types::UserIdGroupPair::builder()
                        .set_user_id(p.user_id.clone())
                        .group_id(&p.group_id)
                        .build()
                })
                .collect(),
        ))
        .build()
}

#[async_trait]
impl NetworkApi for Ec2Api {
    async fn create_vpc(&self, request: &CreateVpcRequest) -> ApiResult<Vpc> {
        let output = self
            .client
            .create_vpc()
            .cidr_block(&request.cidr_block)
            .set_instance_tenancy(request.instance_tenancy.as_deref().map(types::Tenancy::from))
            .send()
            .await
            .map_err(classify)?;
        output
            .vpc()
            .map(vpc_from)
            .ok_or_else(|| ProviderError::unclassified("CreateVpc returned no VPC"))
    }

    async fn describe_vpc(&self, vpc_id: &str) -> ApiResult<Vpc> {
        let output = self
            .client
            .describe_vpcs()
            .vpc_ids(vpc_id)
            .send()
            .await
            .map_err(classify)?;
        output
            .vpcs()
            .first()
            .map(vpc_from)
            .ok_or_else(|| not_found("InvalidVpcID.NotFound", vpc_id))
    }

    async fn describe_vpc_attribute(
        &self,
        vpc_id: &str,
        attribute: VpcAttributeName,
    ) -> ApiResult<bool> {
        let name = match attribute {
            VpcAttributeName::EnableDnsSupport => types::VpcAttributeName::EnableDnsSupport,
            VpcAttributeName::EnableDnsHostnames => types::VpcAttributeName::EnableDnsHostnames,
        };
        let output = self
            .client
            .describe_vpc_attribute()
            .vpc_id(vpc_id)
            .attribute(name)
            .send()
            .await
            .map_err(classify)?;
        let value = match attribute {
            VpcAttributeName::EnableDnsSupport => output.enable_dns_support(),
            VpcAttributeName::EnableDnsHostnames => output.enable_dns_hostnames(),
        };
        Ok(value.and_then(|v| v.value()).unwrap_or(false))
    }

    async fn modify_vpc_attribute(&self, vpc_id: &str, attribute: VpcAttribute) -> ApiResult<()> {
        let value = types::AttributeBooleanValue::builder()
            .value(attribute.value())
            .build();
        let request = self.client.modify_vpc_attribute().vpc_id(vpc_id);
        let request = match attribute {
            VpcAttribute::EnableDnsSupport(_) => request.enable_dns_support(value),
            VpcAttribute::EnableDnsHostnames(_) => request.enable_dns_hostnames(value),
        };
        request.send().await.map_err(classify)?;
        Ok(())
    }

    async fn delete_vpc(&self, vpc_id: &str) -> ApiResult<()> {
        self.client
            .delete_vpc()
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn create_subnet(&self, request: &CreateSubnetRequest) -> ApiResult<Subnet> {
        let output = self
            .client
            .create_subnet()
            .vpc_id(&request.vpc_id)
            .cidr_block(&request.cidr_block)
            .set_availability_zone(request.availability_zone.clone())
            .send()
            .await
            .map_err(classify)?;
        output
            .subnet()
            .map(subnet_from)
            .ok_or_else(|| ProviderError::unclassified("CreateSubnet returned no subnet"))
    }

    async fn describe_subnet(&self, subnet_id: &str) -> ApiResult<Subnet> {
        let output = self
            .client
            .describe_subnets()
            .subnet_ids(subnet_id)
            .send()
            .await
            .map_err(classify)?;
        output
            .subnets()
            .first()
            .map(subnet_from)
            .ok_or_else(|| not_found("InvalidSubnetID.NotFound", subnet_id))
    }

    async fn delete_subnet(&self, subnet_id: &str) -> ApiResult<()> {
        self.client
            .delete_subnet()
            .subnet_id(subnet_id)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn create_internet_gateway(&self) -> ApiResult<InternetGateway> {
        let output = self
            .client
            .create_internet_gateway()
            .send()
            .await
            .map_err(classify)?;
        output
            .internet_gateway()
            .map(gateway_from)
            .ok_or_else(|| ProviderError::unclassified("CreateInternetGateway returned no gateway"))
    }

    async fn describe_internet_gateway(&self, gateway_id: &str) -> ApiResult<InternetGateway> {
        let output = self
            .client
            .describe_internet_gateways()
            .internet_gateway_ids(gateway_id)
            .send()
            .await
            .map_err(classify)?;
        output
            .internet_gateways()
            .first()
            .map(gateway_from)
            .ok_or_else(|| not_found("InvalidInternetGatewayID.NotFound", gateway_id))
    }

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> ApiResult<()> {
        self.client
            .attach_internet_gateway()
            .internet_gateway_id(gateway_id)
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> ApiResult<()> {
        self.client
            .detach_internet_gateway()
            .internet_gateway_id(gateway_id)
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_internet_gateway(&self, gateway_id: &str) -> ApiResult<()> {
        self.client
            .delete_internet_gateway()
            .internet_gateway_id(gateway_id)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn create_route_table(&self, vpc_id: &str) -> ApiResult<RouteTable> {
        let output = self
            .client
            .create_route_table()
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(classify)?;
        output
            .route_table()
            .map(route_table_from)
            .ok_or_else(|| ProviderError::unclassified("CreateRouteTable returned no route table"))
    }

    async fn describe_route_table(&self, route_table_id: &str) -> ApiResult<RouteTable> {
        let output = self
            .client
            .describe_route_tables()
            .route_table_ids(route_table_id)
            .send()
            .await
            .map_err(classify)?;
        output
            .route_tables()
            .first()
            .map(route_table_from)
            .ok_or_else(|| not_found("InvalidRouteTableID.NotFound", route_table_id))
    }

    async fn create_route(&self, route_table_id: &str, route: &RouteEntry) -> ApiResult<()> {
        self.client
            .create_route()
            .route_table_id(route_table_id)
            .destination_cidr_block(&route.destination_cidr_block)
            .set_gateway_id(route.gateway_id.clone())
            .set_instance_id(route.instance_id.clone())
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_route(
        &self,
        route_table_id: &str,
        destination_cidr_block: &str,
    ) -> ApiResult<()> {
        self.client
            .delete_route()
            .route_table_id(route_table_id)
            .destination_cidr_block(destination_cidr_block)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_route_table(&self, route_table_id: &str) -> ApiResult<()> {
        self.client
            .delete_route_table()
            .route_table_id(route_table_id)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> ApiResult<String> {
        let output = self
            .client
            .associate_route_table()
            .route_table_id(route_table_id)
            .subnet_id(subnet_id)
            .send()
            .await
            .map_err(classify)?;
        output
            .association_id()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::unclassified("AssociateRouteTable returned no id"))
    }

    async fn describe_route_table_association(
        &self,
        association_id: &str,
    ) -> ApiResult<RouteTableAssociation> {
        let filter = types::Filter::builder()
            .name("association.route-table-association-id")
            .values(association_id)
            .build();
        let output = self
            .client
            .describe_route_tables()
            .filters(filter)
            .send()
            .await
            .map_err(classify)?;
        output
            .route_tables()
            .iter()
            .flat_map(|t| t.associations())
            .find(|a| a.route_table_association_id() == Some(association_id))
            .map(association_from)
            .ok_or_else(|| not_found("InvalidAssociationID.NotFound", association_id))
    }

    async fn disassociate_route_table(&self, association_id: &str) -> ApiResult<()> {
        self.client
            .disassociate_route_table()
            .association_id(association_id)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn create_security_group(
        &self,
        request: &CreateSecurityGroupRequest,
    ) -> ApiResult<String> {
        let output = self
            .client
            .create_security_group()
            .group_name(&request.group_name)
            .description(&request.description)
            .set_vpc_id(request.vpc_id.clone())
            .send()
            .await
            .map_err(classify)?;
        output
            .group_id()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::unclassified("CreateSecurityGroup returned no id"))
    }

    async fn describe_security_group(&self, group_id: &str) -> ApiResult<SecurityGroup> {
        let output = self
            .client
            .describe_security_groups()
            .group_ids(group_id)
            .send()
            .await
            .map_err(classify)?;
        let group = output
            .security_groups()
            .first()
            .ok_or_else(|| not_found("InvalidGroup.NotFound", group_id))?;
        Ok(SecurityGroup {
            group_id: text(group.group_id()),
            group_name: text(group.group_name()),
            description: text(group.description()),
            vpc_id: group.vpc_id().map(str::to_string),
            owner_id: text(group.owner_id()),
            ingress: group.ip_permissions().iter().map(permission_from).collect(),
        })
    }

    async fn authorize_ingress(&self, group_id: &str, permission: &IpPermission) -> ApiResult<()> {
        self.client
            .authorize_security_group_ingress()
            .group_id(group_id)
            .ip_permissions(permission_to(permission))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn revoke_ingress(&self, group_id: &str, permission: &IpPermission) -> ApiResult<()> {
        self.client
            .revoke_security_group_ingress()
            .group_id(group_id)
            .ip_permissions(permission_to(permission))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> ApiResult<()> {
        self.client
            .delete_security_group()
            .group_id(group_id)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }
}
