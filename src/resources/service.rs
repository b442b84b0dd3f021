//! Service generation for Redis objects
//!
//! Three kinds of services are managed:
//! - the per-namespace governing (headless) service shared by every workload
//! - `{name}`, the client-facing service
//! - `{name}-stats`, exposing the stats exporter when monitoring is on

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::Redis;
use crate::resources::common::{
    REDIS_PORT, claim_metadata, owner_reference, selector_labels, standard_labels,
};

/// Name of the stats service for a Redis object
pub fn stats_service_name(redis_name: &str) -> String {
    format!("{}-stats", redis_name)
}

fn tcp_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Governing service giving StatefulSet pods stable DNS names
///
/// Not owned by any single database; it outlives them all.
pub fn governing_service(mut svc: Service) -> Service {
    let spec = svc.spec.get_or_insert_with(ServiceSpec::default);
    spec.cluster_ip = Some("None".to_string());
    spec.type_ = Some("ClusterIP".to_string());
    spec.ports = Some(vec![tcp_port("db", REDIS_PORT)]);
    svc
}

/// Client-facing service routing to every pod of the database
pub fn primary_service(redis: &Redis, mut svc: Service) -> Service {
    let name = redis.name_any();
    claim_metadata(&mut svc.metadata, &standard_labels(&name), owner_reference(redis));

    let spec = svc.spec.get_or_insert_with(ServiceSpec::default);
    spec.type_ = Some("ClusterIP".to_string());
    spec.selector = Some(selector_labels(&name));
    spec.ports = Some(vec![tcp_port("db", REDIS_PORT)]);
    svc
}

/// Service exposing the stats exporter on `port`
pub fn stats_service(redis: &Redis, port: i32, mut svc: Service) -> Service {
    let name = redis.name_any();
    let mut labels = standard_labels(&name);
    labels.insert("kubedb.example.com/role".to_string(), "stats".to_string());
    claim_metadata(&mut svc.metadata, &labels, owner_reference(redis));

    let spec = svc.spec.get_or_insert_with(ServiceSpec::default);
    spec.type_ = Some("ClusterIP".to_string());
    spec.selector = Some(selector_labels(&name));
    spec.ports = Some(vec![tcp_port("prom-http", port)]);
    svc
}
