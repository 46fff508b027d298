/// Common span attribute names.
/// The names either follow the OpenTelemetry semantic conventions,
/// or are specific to Convoy.
pub struct SpanAttribute;

impl SpanAttribute {
    pub const EXCEPTION_MESSAGE: &'static str = "exception.message";
    pub const RETRY_ATTEMPT: &'static str = "retry.attempt";
    pub const CLUSTER_NODE_ID: &'static str = "cluster.node.id";
    pub const REGISTRY_VERSION: &'static str = "registry.version";
    pub const REGISTRY_PROPOSAL_ATTEMPT: &'static str = "registry.proposal.attempt";
    pub const TASK_ID: &'static str = "task.id";
    pub const TASK_TYPE: &'static str = "task.type";
    pub const TASK_ALLOCATION_ID: &'static str = "task.allocation_id";
}
