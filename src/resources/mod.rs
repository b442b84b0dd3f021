pub mod common;
pub mod service;
pub mod statefulset;

pub use common::{
    API_VERSION, CLUSTER_BUS_PORT, FIELD_MANAGER, KIND, REDIS_PORT, SHARD_LABEL,
    SLOT_RANGE_ANNOTATION, owner_reference, selector_labels, standard_labels,
};
pub use statefulset::{
    WorkloadLayout, WorkloadSettings, ready_replicas, shard_name, workload_layouts,
};
