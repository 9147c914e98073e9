//! Router configuration
//!
//! [`RouterConfig`] holds every protocol knob of both routing components.
//! The defaults are the protocol's standard constants; derived timing values
//! (network traversal, path discovery, blacklist timeout, ...) are computed
//! from them on demand so they always stay consistent.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RoutingError, RoutingResult};
use crate::wire::WireFraming;

/// Configuration for a [`ShingoRouter`](crate::ShingoRouter)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    // Proactive (zone) component
    /// Interval between periodic zone updates
    pub periodic_update_interval: Duration,
    /// Minimum time a changed metric waits before it is advertised
    pub settling_time: Duration,
    /// Global capacity of the proactive packet queue
    pub max_queue_len: usize,
    /// Per-destination capacity of the proactive packet queue
    pub max_queue_len_per_dst: usize,
    /// Time a packet may wait in either queue
    pub max_queue_time: Duration,
    /// Buffer packets while no route is known
    pub enable_buffering: bool,
    /// Blend the stored settling time with the entry age
    pub enable_weighted_settling: bool,
    /// Weight of the stored settling time in the blend
    pub weighted_factor: f64,
    /// Hold-down time, in periodic update intervals
    pub hold_down_multiplier: u32,
    /// Batch triggered updates for `route_aggregation_time`
    pub enable_route_aggregation: bool,
    /// Aggregation window for triggered updates
    pub route_aggregation_time: Duration,
    /// Zone radius in hops
    pub zone_radius: u32,

    // Reactive (discovery) component
    /// Maximum route request retransmissions at the network diameter
    pub rreq_retries: u32,
    /// Maximum self-originated route requests per second
    pub rreq_rate_limit: u32,
    /// Initial expanding-ring TTL
    pub ttl_start: u8,
    /// Expanding-ring TTL increment
    pub ttl_increment: u8,
    /// TTL above which the search jumps to the network diameter
    pub ttl_threshold: u8,
    /// Maximum hop count across the network
    pub net_diameter: u8,
    /// Extra hops of slack when waiting for a reply
    pub timeout_buffer: u32,
    /// Conservative per-hop traversal time
    pub node_traversal_time: Duration,
    /// Lifetime of a route in active use
    pub active_route_timeout: Duration,
    /// Lifetime of an invalidated route before deletion
    pub bad_link_lifetime: Duration,
    /// Ask intermediate repliers to inform the destination
    pub gratuitous_reply: bool,
    /// Only the destination may answer requests
    pub destination_only: bool,
    /// Capacity of the discovery queue
    pub reactive_queue_len: usize,
    /// Maximum hop count a route request may reach
    pub max_request_hops: u8,

    // Wire and determinism
    /// Control message framing
    pub framing: WireFraming,
    /// Seed for jitter, `None` to seed from the OS
    pub rng_seed: Option<u64>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            periodic_update_interval: Duration::from_secs(15),
            settling_time: Duration::from_secs(5),
            max_queue_len: 500,
            max_queue_len_per_dst: 5,
            max_queue_time: Duration::from_secs(30),
            enable_buffering: true,
            enable_weighted_settling: true,
            weighted_factor: 0.875,
            hold_down_multiplier: 3,
            enable_route_aggregation: false,
            route_aggregation_time: Duration::from_secs(1),
            zone_radius: 2,

            rreq_retries: 2,
            rreq_rate_limit: 10,
            ttl_start: 1,
            ttl_increment: 2,
            ttl_threshold: 7,
            net_diameter: 35,
            timeout_buffer: 2,
            node_traversal_time: Duration::from_millis(40),
            active_route_timeout: Duration::from_secs(3),
            bad_link_lifetime: Duration::from_secs(15),
            gratuitous_reply: true,
            destination_only: false,
            reactive_queue_len: 64,
            max_request_hops: 8,

            framing: WireFraming::Tagged,
            rng_seed: None,
        }
    }
}

impl RouterConfig {
    /// Configuration for deterministic tests: fixed seed, otherwise defaults
    pub fn testing(seed: u64) -> Self {
        Self::default().with_rng_seed(seed)
    }

    /// Set the periodic update interval
    pub fn with_periodic_update_interval(mut self, interval: Duration) -> Self {
        self.periodic_update_interval = interval;
        self
    }

    /// Set the settling time
    pub fn with_settling_time(mut self, settling: Duration) -> Self {
        self.settling_time = settling;
        self
    }

    /// Set both proactive queue bounds
    pub fn with_queue_bounds(mut self, max_len: usize, max_per_dst: usize) -> Self {
        self.max_queue_len = max_len;
        self.max_queue_len_per_dst = max_per_dst;
        self
    }

    /// Set the queue timeout
    pub fn with_max_queue_time(mut self, timeout: Duration) -> Self {
        self.max_queue_time = timeout;
        self
    }

    /// Enable or disable buffering
    pub fn with_buffering(mut self, enabled: bool) -> Self {
        self.enable_buffering = enabled;
        self
    }

    /// Enable or disable weighted settling time
    pub fn with_weighted_settling(mut self, enabled: bool) -> Self {
        self.enable_weighted_settling = enabled;
        self
    }

    /// Enable route aggregation with the given window
    pub fn with_route_aggregation(mut self, window: Duration) -> Self {
        self.enable_route_aggregation = true;
        self.route_aggregation_time = window;
        self
    }

    /// Set the zone radius
    pub fn with_zone_radius(mut self, radius: u32) -> Self {
        self.zone_radius = radius;
        self
    }

    /// Set the route request retry ceiling
    pub fn with_rreq_retries(mut self, retries: u32) -> Self {
        self.rreq_retries = retries;
        self
    }

    /// Set the per-second route request cap
    pub fn with_rreq_rate_limit(mut self, limit: u32) -> Self {
        self.rreq_rate_limit = limit;
        self
    }

    /// Set the network diameter
    pub fn with_net_diameter(mut self, diameter: u8) -> Self {
        self.net_diameter = diameter;
        self
    }

    /// Set the gratuitous reply flag
    pub fn with_gratuitous_reply(mut self, enabled: bool) -> Self {
        self.gratuitous_reply = enabled;
        self
    }

    /// Set the destination-only flag
    pub fn with_destination_only(mut self, enabled: bool) -> Self {
        self.destination_only = enabled;
        self
    }

    /// Set the discovery queue capacity
    pub fn with_reactive_queue_len(mut self, len: usize) -> Self {
        self.reactive_queue_len = len;
        self
    }

    /// Set the wire framing
    pub fn with_framing(mut self, framing: WireFraming) -> Self {
        self.framing = framing;
        self
    }

    /// Set the RNG seed
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Time for a packet to cross the whole network and back
    pub fn net_traversal_time(&self) -> Duration {
        self.node_traversal_time * 2 * u32::from(self.net_diameter)
    }

    /// Time a route discovery may take
    pub fn path_discovery_time(&self) -> Duration {
        self.net_traversal_time() * 2
    }

    /// Lifetime advertised in replies generated by the destination
    pub fn my_route_timeout(&self) -> Duration {
        self.path_discovery_time().max(self.active_route_timeout) * 2
    }

    /// Time to wait for a reply acknowledgment
    pub fn next_hop_wait(&self) -> Duration {
        self.node_traversal_time + Duration::from_millis(10)
    }

    /// Time a neighbor stays blacklisted after a missing acknowledgment
    pub fn blacklist_timeout(&self) -> Duration {
        self.net_traversal_time() * self.rreq_retries
    }

    /// Age after which a proactive entry is purged
    pub fn hold_down_time(&self) -> Duration {
        self.periodic_update_interval * self.hold_down_multiplier
    }

    /// Check the configuration for inconsistent values
    pub fn validate(&self) -> RoutingResult<()> {
        let invalid = |msg: &str| Err(RoutingError::InvalidConfig(msg.to_string()));

        if !(0.0..=1.0).contains(&self.weighted_factor) {
            return invalid("weighted_factor must be within [0, 1]");
        }
        if self.periodic_update_interval.is_zero() {
            return invalid("periodic_update_interval must be non-zero");
        }
        if self.max_queue_len == 0 || self.max_queue_len_per_dst == 0 {
            return invalid("queue bounds must be non-zero");
        }
        if self.max_queue_len_per_dst > self.max_queue_len {
            return invalid("max_queue_len_per_dst exceeds max_queue_len");
        }
        if self.reactive_queue_len == 0 {
            return invalid("reactive_queue_len must be non-zero");
        }
        if self.ttl_start == 0 || self.ttl_start > self.net_diameter {
            return invalid("ttl_start must be within [1, net_diameter]");
        }
        if self.zone_radius == 0 {
            return invalid("zone_radius must be non-zero");
        }
        if self.rreq_rate_limit == 0 {
            return invalid("rreq_rate_limit must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        RouterConfig::default().validate().unwrap();
    }

    #[test]
    fn test_derived_timers() {
        let config = RouterConfig::default();
        assert_eq!(config.net_traversal_time(), Duration::from_millis(2_800));
        assert_eq!(config.path_discovery_time(), Duration::from_millis(5_600));
        assert_eq!(config.my_route_timeout(), Duration::from_millis(11_200));
        assert_eq!(config.next_hop_wait(), Duration::from_millis(50));
        assert_eq!(config.blacklist_timeout(), Duration::from_millis(5_600));
        assert_eq!(config.hold_down_time(), Duration::from_secs(45));
    }

    #[test]
    fn test_my_route_timeout_uses_active_route_timeout_when_larger() {
        let mut config = RouterConfig::default();
        config.active_route_timeout = Duration::from_secs(10);
        assert_eq!(config.my_route_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = RouterConfig::default();
        config.weighted_factor = 1.5;
        assert!(matches!(config.validate(), Err(RoutingError::InvalidConfig(_))));

        let config = RouterConfig::default().with_queue_bounds(4, 5);
        assert!(config.validate().is_err());

        let mut config = RouterConfig::default();
        config.ttl_start = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RouterConfig =
            serde_json::from_str(r#"{ "zone_radius": 3, "framing": "Legacy" }"#).unwrap();
        assert_eq!(config.zone_radius, 3);
        assert_eq!(config.framing, WireFraming::Legacy);
        assert_eq!(config.max_queue_len, 500);
    }
}
