//! Picks a node for an HTTP service request: round-robin across every node
//! advertising the service, with sticky preference to the last successful
//! node for a given `client_context_id` (spec §4.5).

use cb_bucket::{ClusterConfig, NodeServices};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Query,
    Analytics,
    Search,
    Views,
    Management,
}

impl Service {
    fn port(self, services: &NodeServices, tls: bool) -> Option<u16> {
        match (self, tls) {
            (Service::Query, false) => services.query_plain,
            (Service::Query, true) => services.query_tls,
            (Service::Analytics, false) => services.analytics_plain,
            (Service::Analytics, true) => services.analytics_tls,
            (Service::Search, false) => services.search_plain,
            (Service::Search, true) => services.search_tls,
            (Service::Views, false) => services.views_plain,
            (Service::Views, true) => services.views_tls,
            (Service::Management, false) => services.mgmt_plain,
            (Service::Management, true) => services.mgmt_tls,
        }
    }
}

pub struct ServiceRouter {
    tls: bool,
    counters: DashMap<Service, AtomicUsize>,
    sticky: DashMap<String, String>,
}

impl ServiceRouter {
    pub fn new(tls: bool) -> Self {
        Self { tls, counters: DashMap::new(), sticky: DashMap::new() }
    }

    /// Choose a node hostname:port for `service`, preferring the node
    /// previously used for `client_context_id` if it still advertises the
    /// service, otherwise round-robining across eligible nodes.
    pub fn select(&self, config: &ClusterConfig, service: Service, client_context_id: Option<&str>) -> Option<(String, u16)> {
        let eligible: Vec<(String, u16)> = config
            .nodes
            .iter()
            .filter_map(|node| service.port(&node.services, self.tls).map(|port| (node.hostname.clone(), port)))
            .collect();
        if eligible.is_empty() {
            return None;
        }

        if let Some(ctx) = client_context_id {
            if let Some(sticky_host) = self.sticky.get(ctx) {
                if let Some(found) = eligible.iter().find(|(host, _)| host == sticky_host.value()) {
                    return Some(found.clone());
                }
            }
        }

        let counter = self.counters.entry(service).or_insert_with(|| AtomicUsize::new(0));
        let index = counter.fetch_add(1, Ordering::Relaxed) % eligible.len();
        let chosen = eligible[index].clone();
        if let Some(ctx) = client_context_id {
            self.sticky.insert(ctx.to_string(), chosen.0.clone());
        }
        Some(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_bucket::{BucketType, Capabilities, NodeInfo, PartitionEntry, PartitionMap};

    fn node(hostname: &str, query_port: Option<u16>) -> NodeInfo {
        NodeInfo {
            hostname: hostname.to_string(),
            node_uuid: format!("uuid-{hostname}"),
            services: NodeServices { query_plain: query_port, ..NodeServices::default() },
        }
    }

    fn config(nodes: Vec<NodeInfo>) -> ClusterConfig {
        ClusterConfig {
            rev: 1,
            nodes,
            bucket_type: BucketType::Couchbase,
            capabilities: Capabilities::default(),
            partition_map: PartitionMap { partitions: vec![PartitionEntry { node_indexes: vec![0] }] },
        }
    }

    #[test]
    fn round_robins_across_eligible_nodes() {
        let router = ServiceRouter::new(false);
        let config = config(vec![node("a", Some(8093)), node("b", Some(8093))]);
        let first = router.select(&config, Service::Query, None).unwrap();
        let second = router.select(&config, Service::Query, None).unwrap();
        assert_ne!(first.0, second.0);
    }

    #[test]
    fn sticky_context_id_reuses_the_same_node() {
        let router = ServiceRouter::new(false);
        let config = config(vec![node("a", Some(8093)), node("b", Some(8093))]);
        let first = router.select(&config, Service::Query, Some("ctx-1")).unwrap();
        for _ in 0..5 {
            let again = router.select(&config, Service::Query, Some("ctx-1")).unwrap();
            assert_eq!(again, first);
        }
    }

    #[test]
    fn nodes_without_the_service_are_excluded() {
        let router = ServiceRouter::new(false);
        let config = config(vec![node("a", None), node("b", Some(8093))]);
        let chosen = router.select(&config, Service::Query, None).unwrap();
        assert_eq!(chosen.0, "b");
    }
}
