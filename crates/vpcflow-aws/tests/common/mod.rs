use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use vpcflow_aws::api::{
    CreateSecurityGroupRequest, CreateSubnetRequest, CreateVpcRequest, GatewayAttachment,
    InternetGateway, IpPermission, NetworkApi, RouteEntry, RouteTable, RouteTableAssociation,
    SecurityGroup, Subnet, Vpc, VpcAttribute, VpcAttributeName,
};
use vpcflow_aws::{ApiResult, Session, api_error};
use vpcflow_core::{MemoryCheckpoint, ProviderError};

#[allow(dead_code)]
pub const ACCOUNT_ID: &str = "123456789012";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fake provider plus the session and checkpoint wired to it
#[allow(dead_code)]
pub struct TestEnv {
    pub fake: Arc<FakeNetwork>,
    pub checkpoint: Arc<MemoryCheckpoint>,
    pub session: Session,
}

#[allow(dead_code)]
impl TestEnv {
    pub fn new() -> Self {
        Self::with(FakeNetwork::new())
    }

    pub fn with(fake: FakeNetwork) -> Self {
        init_tracing();
        let fake = Arc::new(fake);
        let checkpoint = Arc::new(MemoryCheckpoint::new());
        let session = Session::new(fake.clone(), checkpoint.clone());
        Self {
            fake,
            checkpoint,
            session,
        }
    }
}

struct Failure {
    method: String,
    skip: u32,
    error: ProviderError,
}

#[derive(Clone)]
struct VpcRecord {
    vpc: Vpc,
    dns_support: bool,
    dns_hostnames: bool,
}

#[derive(Default)]
struct Inner {
    next_id: u32,
    vpcs: BTreeMap<String, VpcRecord>,
    subnets: BTreeMap<String, Subnet>,
    gateways: BTreeMap<String, InternetGateway>,
    route_tables: BTreeMap<String, RouteTable>,
    security_groups: BTreeMap<String, SecurityGroup>,
    /// describes left that still report not-found
    hidden: HashMap<String, u32>,
    /// describes left that still report `pending`
    pending: HashMap<String, u32>,
    calls: Vec<String>,
    failures: Vec<Failure>,
}

impl Inner {
    fn new_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", prefix, self.next_id)
    }

    /// Logs the call and returns an injected failure, if any
    fn enter(&mut self, method: &str, args: &str) -> ApiResult<()> {
        self.calls.push(format!("{} {}", method, args).trim_end().to_string());

        let Some(pos) = self.failures.iter().position(|f| f.method == method) else {
            return Ok(());
        };
        if self.failures[pos].skip > 0 {
            self.failures[pos].skip -= 1;
            return Ok(());
        }
        Err(self.failures.remove(pos).error)
    }

    /// Whether a freshly created object is visible to this read yet
    fn visible(&mut self, id: &str) -> bool {
        match self.hidden.get_mut(id) {
            Some(left) if *left > 0 => {
                *left -= 1;
                false
            }
            _ => true,
        }
    }

    fn lifecycle(&mut self, id: &str) -> &'static str {
        match self.pending.get_mut(id) {
            Some(left) if *left > 0 => {
                *left -= 1;
                "pending"
            }
            _ => "available",
        }
    }

    fn all_associations(&self) -> impl Iterator<Item = &RouteTableAssociation> {
        self.route_tables.values().flat_map(|t| t.associations.iter())
    }
}

fn missing(code: &str, id: &str) -> ProviderError {
    api_error(code, format!("The ID '{}' does not exist", id))
}

fn dependency(id: &str) -> ProviderError {
    api_error(
        "DependencyViolation",
        format!("resource {} has a dependent object", id),
    )
}

/// Permissions as EC2 reports them: sorted, with the owner filled in
fn normalized(permission: &IpPermission) -> IpPermission {
    let mut p = permission.clone();
    p.protocol = p.protocol.to_lowercase();
    p.ip_ranges.sort();
    p.ip_ranges.dedup();
    for pair in &mut p.group_pairs {
        if pair.user_id.is_none() {
            pair.user_id = Some(ACCOUNT_ID.to_string());
        }
    }
    p.group_pairs.sort();
    p.group_pairs.dedup();
    p
}

fn same_ports(a: &IpPermission, b: &IpPermission) -> bool {
    a.protocol == b.protocol && a.from_port == b.from_port && a.to_port == b.to_port
}

fn not_granted() -> ProviderError {
    api_error(
        "InvalidPermission.NotFound",
        "the specified rule does not exist",
    )
}

/// In-memory provider with read-after-write lag and error injection
pub struct FakeNetwork {
    inner: Mutex<Inner>,
    visibility_lag: u32,
    pending_reads: u32,
    stale_attachments: bool,
}

#[allow(dead_code)]
impl FakeNetwork {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            visibility_lag: 0,
            pending_reads: 0,
            stale_attachments: false,
        }
    }

    /// New objects are reported missing for the first `reads` describes
    pub fn with_visibility_lag(mut self, reads: u32) -> Self {
        self.visibility_lag = reads;
        self
    }

    /// New VPCs and subnets report `pending` for `reads` describes
    pub fn with_pending_reads(mut self, reads: u32) -> Self {
        self.pending_reads = reads;
        self
    }

    /// Attachment states never advance past `attaching` / `detaching`
    pub fn with_stale_attachments(mut self) -> Self {
        self.stale_attachments = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    fn created(&self, inner: &mut Inner, id: &str) {
        inner.hidden.insert(id.to_string(), self.visibility_lag);
        inner.pending.insert(id.to_string(), self.pending_reads);
    }

    /// Fails the `skip + 1`-th call of `method` with `error`
    pub fn fail_after(&self, method: &str, skip: u32, error: ProviderError) {
        self.lock().failures.push(Failure {
            method: method.to_string(),
            skip,
            error,
        });
    }

    pub fn fail_next(&self, method: &str, error: ProviderError) {
        self.fail_after(method, 0, error);
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Calls whose method starts with `prefix`
    pub fn calls_to(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn seed_vpc(&self, cidr_block: &str) -> String {
        let mut inner = self.lock();
        let id = inner.new_id("vpc");
        let vpc = Vpc {
            vpc_id: id.clone(),
            cidr_block: cidr_block.to_string(),
            state: "available".to_string(),
            instance_tenancy: Some("default".to_string()),
        };
        inner.vpcs.insert(
            id.clone(),
            VpcRecord {
                vpc,
                dns_support: true,
                dns_hostnames: false,
            },
        );
        id
    }

    pub fn seed_subnet(&self, vpc_id: &str, cidr_block: &str) -> String {
        let mut inner = self.lock();
        let id = inner.new_id("subnet");
        let subnet = Subnet {
            subnet_id: id.clone(),
            vpc_id: vpc_id.to_string(),
            cidr_block: cidr_block.to_string(),
            availability_zone: Some("ap-northeast-1a".to_string()),
            state: "available".to_string(),
        };
        inner.subnets.insert(id.clone(), subnet);
        id
    }

    pub fn vpc_exists(&self, id: &str) -> bool {
        self.lock().vpcs.contains_key(id)
    }

    pub fn gateway(&self, id: &str) -> Option<InternetGateway> {
        self.lock().gateways.get(id).cloned()
    }

    pub fn route_table(&self, id: &str) -> Option<RouteTable> {
        self.lock().route_tables.get(id).cloned()
    }

    pub fn security_group(&self, id: &str) -> Option<SecurityGroup> {
        self.lock().security_groups.get(id).cloned()
    }
}

#[async_trait]
impl NetworkApi for FakeNetwork {
    async fn create_vpc(&self, request: &CreateVpcRequest) -> ApiResult<Vpc> {
        let mut inner = self.lock();
        inner.enter("create_vpc", &request.cidr_block)?;
        let id = inner.new_id("vpc");
        let vpc = Vpc {
            vpc_id: id.clone(),
            cidr_block: request.cidr_block.clone(),
            state: "pending".to_string(),
            instance_tenancy: Some(
                request
                    .instance_tenancy
                    .clone()
                    .unwrap_or_else(|| "default".to_string()),
            ),
        };
        inner.vpcs.insert(
            id.clone(),
            VpcRecord {
                vpc: vpc.clone(),
                dns_support: true,
                dns_hostnames: false,
            },
        );
        self.created(&mut inner, &id);
        Ok(vpc)
    }

    async fn describe_vpc(&self, vpc_id: &str) -> ApiResult<Vpc> {
        let mut inner = self.lock();
        inner.enter("describe_vpc", vpc_id)?;
        if !inner.visible(vpc_id) || !inner.vpcs.contains_key(vpc_id) {
            return Err(missing("InvalidVpcID.NotFound", vpc_id));
        }
        let state = inner.lifecycle(vpc_id);
        let record = inner
            .vpcs
            .get_mut(vpc_id)
            .ok_or_else(|| missing("InvalidVpcID.NotFound", vpc_id))?;
        record.vpc.state = state.to_string();
        Ok(record.vpc.clone())
    }

    async fn describe_vpc_attribute(
        &self,
        vpc_id: &str,
        attribute: VpcAttributeName,
    ) -> ApiResult<bool> {
        let mut inner = self.lock();
        inner.enter("describe_vpc_attribute", vpc_id)?;
        let record = inner
            .vpcs
            .get(vpc_id)
            .ok_or_else(|| missing("InvalidVpcID.NotFound", vpc_id))?;
        Ok(match attribute {
            VpcAttributeName::EnableDnsSupport => record.dns_support,
            VpcAttributeName::EnableDnsHostnames => record.dns_hostnames,
        })
    }

    async fn modify_vpc_attribute(&self, vpc_id: &str, attribute: VpcAttribute) -> ApiResult<()> {
        let mut inner = self.lock();
        inner.enter(
            "modify_vpc_attribute",
            &format!("{} {:?}", vpc_id, attribute),
        )?;
        let record = inner
            .vpcs
            .get_mut(vpc_id)
            .ok_or_else(|| missing("InvalidVpcID.NotFound", vpc_id))?;
        match attribute {
            VpcAttribute::EnableDnsSupport(v) => record.dns_support = v,
            VpcAttribute::EnableDnsHostnames(v) => record.dns_hostnames = v,
        }
        Ok(())
    }

    async fn delete_vpc(&self, vpc_id: &str) -> ApiResult<()> {
        let mut inner = self.lock();
        inner.enter("delete_vpc", vpc_id)?;
        if !inner.vpcs.contains_key(vpc_id) {
            return Err(missing("InvalidVpcID.NotFound", vpc_id));
        }
        let in_use = inner.subnets.values().any(|s| s.vpc_id == vpc_id)
            || inner.route_tables.values().any(|t| t.vpc_id == vpc_id)
            || inner
                .gateways
                .values()
                .any(|g| g.attachments.iter().any(|a| a.vpc_id == vpc_id));
        if in_use {
            return Err(dependency(vpc_id));
        }
        inner.vpcs.remove(vpc_id);
        Ok(())
    }

    async fn create_subnet(&self, request: &CreateSubnetRequest) -> ApiResult<Subnet> {
        let mut inner = self.lock();
        inner.enter("create_subnet", &request.cidr_block)?;
        if !inner.vpcs.contains_key(&request.vpc_id) {
            return Err(missing("InvalidVpcID.NotFound", &request.vpc_id));
        }
        let id = inner.new_id("subnet");
        let subnet = Subnet {
            subnet_id: id.clone(),
            vpc_id: request.vpc_id.clone(),
            cidr_block: request.cidr_block.clone(),
            availability_zone: Some(
                request
                    .availability_zone
                    .clone()
                    .unwrap_or_else(|| "ap-northeast-1a".to_string()),
            ),
            state: "pending".to_string(),
        };
        inner.subnets.insert(id.clone(), subnet.clone());
        self.created(&mut inner, &id);
        Ok(subnet)
    }

    async fn describe_subnet(&self, subnet_id: &str) -> ApiResult<Subnet> {
        let mut inner = self.lock();
        inner.enter("describe_subnet", subnet_id)?;
        if !inner.visible(subnet_id) || !inner.subnets.contains_key(subnet_id) {
            return Err(missing("InvalidSubnetID.NotFound", subnet_id));
        }
        let state = inner.lifecycle(subnet_id);
        let subnet = inner
            .subnets
            .get_mut(subnet_id)
            .ok_or_else(|| missing("InvalidSubnetID.NotFound", subnet_id))?;
        subnet.state = state.to_string();
        Ok(subnet.clone())
    }

    async fn delete_subnet(&self, subnet_id: &str) -> ApiResult<()> {
        let mut inner = self.lock();
        inner.enter("delete_subnet", subnet_id)?;
        if !inner.subnets.contains_key(subnet_id) {
            return Err(missing("InvalidSubnetID.NotFound", subnet_id));
        }
        if inner
            .all_associations()
            .any(|a| a.subnet_id.as_deref() == Some(subnet_id))
        {
            return Err(dependency(subnet_id));
        }
        inner.subnets.remove(subnet_id);
        Ok(())
    }

    async fn create_internet_gateway(&self) -> ApiResult<InternetGateway> {
        let mut inner = self.lock();
        inner.enter("create_internet_gateway", "")?;
        let id = inner.new_id("igw");
        let gateway = InternetGateway {
            internet_gateway_id: id.clone(),
            attachments: Vec::new(),
        };
        inner.gateways.insert(id.clone(), gateway.clone());
        self.created(&mut inner, &id);
        Ok(gateway)
    }

    async fn describe_internet_gateway(&self, gateway_id: &str) -> ApiResult<InternetGateway> {
        let mut inner = self.lock();
        inner.enter("describe_internet_gateway", gateway_id)?;
        if !inner.visible(gateway_id) {
            return Err(missing("InvalidInternetGatewayID.NotFound", gateway_id));
        }
        let stale = self.stale_attachments;
        let gateway = inner
            .gateways
            .get_mut(gateway_id)
            .ok_or_else(|| missing("InvalidInternetGatewayID.NotFound", gateway_id))?;
        let observed = gateway.clone();

        // The next read sees the transition complete
        if !stale {
            for attachment in &mut gateway.attachments {
                if attachment.state == "attaching" {
                    attachment.state = "available".to_string();
                }
            }
            gateway.attachments.retain(|a| a.state != "detaching");
        }
        Ok(observed)
    }

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> ApiResult<()> {
        let mut inner = self.lock();
        inner.enter(
            "attach_internet_gateway",
            &format!("{} {}", gateway_id, vpc_id),
        )?;
        if !inner.vpcs.contains_key(vpc_id) {
            return Err(missing("InvalidVpcID.NotFound", vpc_id));
        }
        let gateway = inner
            .gateways
            .get_mut(gateway_id)
            .ok_or_else(|| missing("InvalidInternetGatewayID.NotFound", gateway_id))?;
        if !gateway.attachments.is_empty() {
            return Err(api_error(
                "Resource.AlreadyAssociated",
                format!("{} is already attached", gateway_id),
            ));
        }
        gateway.attachments.push(GatewayAttachment {
            vpc_id: vpc_id.to_string(),
            state: "attaching".to_string(),
        });
        Ok(())
    }

    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> ApiResult<()> {
        let mut inner = self.lock();
        inner.enter(
            "detach_internet_gateway",
            &format!("{} {}", gateway_id, vpc_id),
        )?;
        let gateway = inner
            .gateways
            .get_mut(gateway_id)
            .ok_or_else(|| missing("InvalidInternetGatewayID.NotFound", gateway_id))?;
        let Some(attachment) = gateway
            .attachments
            .iter_mut()
            .find(|a| a.vpc_id == vpc_id && a.state != "detaching")
        else {
            return Err(api_error(
                "Gateway.NotAttached",
                format!("{} is not attached to {}", gateway_id, vpc_id),
            ));
        };
        attachment.state = "detaching".to_string();
        Ok(())
    }

    async fn delete_internet_gateway(&self, gateway_id: &str) -> ApiResult<()> {
        let mut inner = self.lock();
        inner.enter("delete_internet_gateway", gateway_id)?;
        let gateway = inner
            .gateways
            .get(gateway_id)
            .ok_or_else(|| missing("InvalidInternetGatewayID.NotFound", gateway_id))?;
        if !gateway.attachments.is_empty() {
            return Err(dependency(gateway_id));
        }
        inner.gateways.remove(gateway_id);
        Ok(())
    }

    async fn create_route_table(&self, vpc_id: &str) -> ApiResult<RouteTable> {
        let mut inner = self.lock();
        inner.enter("create_route_table", vpc_id)?;
        let cidr_block = inner
            .vpcs
            .get(vpc_id)
            .map(|r| r.vpc.cidr_block.clone())
            .ok_or_else(|| missing("InvalidVpcID.NotFound", vpc_id))?;
        let id = inner.new_id("rtb");
        let table = RouteTable {
            route_table_id: id.clone(),
            vpc_id: vpc_id.to_string(),
            routes: vec![RouteEntry {
                destination_cidr_block: cidr_block,
                gateway_id: Some("local".to_string()),
                instance_id: None,
                state: Some("active".to_string()),
            }],
            associations: Vec::new(),
        };
        inner.route_tables.insert(id.clone(), table.clone());
        self.created(&mut inner, &id);
        Ok(table)
    }

    async fn describe_route_table(&self, route_table_id: &str) -> ApiResult<RouteTable> {
        let mut inner = self.lock();
        inner.enter("describe_route_table", route_table_id)?;
        if !inner.visible(route_table_id) {
            return Err(missing("InvalidRouteTableID.NotFound", route_table_id));
        }
        inner
            .route_tables
            .get(route_table_id)
            .cloned()
            .ok_or_else(|| missing("InvalidRouteTableID.NotFound", route_table_id))
    }

    async fn create_route(&self, route_table_id: &str, route: &RouteEntry) -> ApiResult<()> {
        let mut inner = self.lock();
        inner.enter(
            "create_route",
            &format!("{} {}", route_table_id, route.destination_cidr_block),
        )?;
        let table = inner
            .route_tables
            .get_mut(route_table_id)
            .ok_or_else(|| missing("InvalidRouteTableID.NotFound", route_table_id))?;
        if table
            .routes
            .iter()
            .any(|r| r.destination_cidr_block == route.destination_cidr_block)
        {
            return Err(api_error(
                "RouteAlreadyExists",
                format!("route {} already exists", route.destination_cidr_block),
            ));
        }
        table.routes.push(RouteEntry {
            state: Some("active".to_string()),
            ..route.clone()
        });
        Ok(())
    }

    async fn delete_route(
        &self,
        route_table_id: &str,
        destination_cidr_block: &str,
    ) -> ApiResult<()> {
        let mut inner = self.lock();
        inner.enter(
            "delete_route",
            &format!("{} {}", route_table_id, destination_cidr_block),
        )?;
        let table = inner
            .route_tables
            .get_mut(route_table_id)
            .ok_or_else(|| missing("InvalidRouteTableID.NotFound", route_table_id))?;
        let before = table.routes.len();
        table
            .routes
            .retain(|r| r.destination_cidr_block != destination_cidr_block);
        if table.routes.len() == before {
            return Err(missing("InvalidRoute.NotFound", destination_cidr_block));
        }
        Ok(())
    }

    async fn delete_route_table(&self, route_table_id: &str) -> ApiResult<()> {
        let mut inner = self.lock();
        inner.enter("delete_route_table", route_table_id)?;
        let table = inner
            .route_tables
            .get(route_table_id)
            .ok_or_else(|| missing("InvalidRouteTableID.NotFound", route_table_id))?;
        if !table.associations.is_empty() {
            return Err(dependency(route_table_id));
        }
        inner.route_tables.remove(route_table_id);
        Ok(())
    }

    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> ApiResult<String> {
        let mut inner = self.lock();
        inner.enter(
            "associate_route_table",
            &format!("{} {}", route_table_id, subnet_id),
        )?;
        if !inner.subnets.contains_key(subnet_id) {
            return Err(missing("InvalidSubnetID.NotFound", subnet_id));
        }
        if !inner.route_tables.contains_key(route_table_id) {
            return Err(missing("InvalidRouteTableID.NotFound", route_table_id));
        }
        if inner
            .all_associations()
            .any(|a| a.subnet_id.as_deref() == Some(subnet_id))
        {
            return Err(api_error(
                "Resource.AlreadyAssociated",
                format!("{} already has a route table", subnet_id),
            ));
        }
        let id = inner.new_id("rtbassoc");
        let association = RouteTableAssociation {
            association_id: id.clone(),
            route_table_id: route_table_id.to_string(),
            subnet_id: Some(subnet_id.to_string()),
            main: false,
            state: "associating".to_string(),
        };
        inner
            .route_tables
            .get_mut(route_table_id)
            .ok_or_else(|| missing("InvalidRouteTableID.NotFound", route_table_id))?
            .associations
            .push(association);
        Ok(id)
    }

    async fn describe_route_table_association(
        &self,
        association_id: &str,
    ) -> ApiResult<RouteTableAssociation> {
        let mut inner = self.lock();
        inner.enter("describe_route_table_association", association_id)?;
        for table in inner.route_tables.values_mut() {
            if let Some(association) = table
                .associations
                .iter_mut()
                .find(|a| a.association_id == association_id)
            {
                let observed = association.clone();
                if association.state == "associating" {
                    association.state = "associated".to_string();
                }
                return Ok(observed);
            }
        }
        Err(missing("InvalidAssociationID.NotFound", association_id))
    }

    async fn disassociate_route_table(&self, association_id: &str) -> ApiResult<()> {
        let mut inner = self.lock();
        inner.enter("disassociate_route_table", association_id)?;
        for table in inner.route_tables.values_mut() {
            let before = table.associations.len();
            table
                .associations
                .retain(|a| a.association_id != association_id);
            if table.associations.len() != before {
                return Ok(());
            }
        }
        Err(missing("InvalidAssociationID.NotFound", association_id))
    }

    async fn create_security_group(
        &self,
        request: &CreateSecurityGroupRequest,
    ) -> ApiResult<String> {
        let mut inner = self.lock();
        inner.enter("create_security_group", &request.group_name)?;
        if inner
            .security_groups
            .values()
            .any(|g| g.group_name == request.group_name && g.vpc_id == request.vpc_id)
        {
            return Err(api_error(
                "InvalidGroup.Duplicate",
                format!("group {} already exists", request.group_name),
            ));
        }
        let id = inner.new_id("sg");
        inner.security_groups.insert(
            id.clone(),
            SecurityGroup {
                group_id: id.clone(),
                group_name: request.group_name.clone(),
                description: request.description.clone(),
                vpc_id: request.vpc_id.clone(),
                owner_id: ACCOUNT_ID.to_string(),
                ingress: Vec::new(),
            },
        );
        self.created(&mut inner, &id);
        Ok(id)
    }

    async fn describe_security_group(&self, group_id: &str) -> ApiResult<SecurityGroup> {
        let mut inner = self.lock();
        inner.enter("describe_security_group", group_id)?;
        if !inner.visible(group_id) {
            return Err(missing("InvalidGroup.NotFound", group_id));
        }
        inner
            .security_groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| missing("InvalidGroup.NotFound", group_id))
    }

    async fn authorize_ingress(&self, group_id: &str, permission: &IpPermission) -> ApiResult<()> {
        let mut inner = self.lock();
        inner.enter(
            "authorize_ingress",
            &format!("{} {}", group_id, permission.from_port),
        )?;
        let group = inner
            .security_groups
            .get_mut(group_id)
            .ok_or_else(|| missing("InvalidGroup.NotFound", group_id))?;
        let permission = normalized(permission);

        // Rules sharing protocol and ports merge into one permission
        let Some(pos) = group
            .ingress
            .iter()
            .position(|p| same_ports(p, &permission))
        else {
            group.ingress.push(permission);
            return Ok(());
        };
        let existing = &mut group.ingress[pos];
        let duplicate = permission
            .ip_ranges
            .iter()
            .any(|r| existing.ip_ranges.contains(r))
            || permission
                .group_pairs
                .iter()
                .any(|g| existing.group_pairs.contains(g));
        if duplicate {
            return Err(api_error(
                "InvalidPermission.Duplicate",
                "the specified rule already exists",
            ));
        }
        existing.ip_ranges.extend(permission.ip_ranges);
        existing.group_pairs.extend(permission.group_pairs);
        *existing = normalized(existing);
        Ok(())
    }

    async fn revoke_ingress(&self, group_id: &str, permission: &IpPermission) -> ApiResult<()> {
        let mut inner = self.lock();
        inner.enter(
            "revoke_ingress",
            &format!("{} {}", group_id, permission.from_port),
        )?;
        let group = inner
            .security_groups
            .get_mut(group_id)
            .ok_or_else(|| missing("InvalidGroup.NotFound", group_id))?;
        let permission = normalized(permission);

        let Some(pos) = group
            .ingress
            .iter()
            .position(|p| same_ports(p, &permission))
        else {
            return Err(not_granted());
        };
        let existing = &mut group.ingress[pos];
        let granted = permission
            .ip_ranges
            .iter()
            .all(|r| existing.ip_ranges.contains(r))
            && permission
                .group_pairs
                .iter()
                .all(|g| existing.group_pairs.contains(g));
        if !granted {
            return Err(not_granted());
        }
        existing.ip_ranges.retain(|r| !permission.ip_ranges.contains(r));
        existing
            .group_pairs
            .retain(|g| !permission.group_pairs.contains(g));
        if existing.ip_ranges.is_empty() && existing.group_pairs.is_empty() {
            group.ingress.remove(pos);
        }
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> ApiResult<()> {
        let mut inner = self.lock();
        inner.enter("delete_security_group", group_id)?;
        if !inner.security_groups.contains_key(group_id) {
            return Err(missing("InvalidGroup.NotFound", group_id));
        }
        let referenced = inner
            .security_groups
            .values()
            .filter(|g| g.group_id != group_id)
            .flat_map(|g| g.ingress.iter())
            .any(|p| p.group_pairs.iter().any(|pair| pair.group_id == group_id));
        if referenced {
            return Err(dependency(group_id));
        }
        inner.security_groups.remove(group_id);
        Ok(())
    }
}
