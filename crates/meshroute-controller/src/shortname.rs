//! Qualification of short host and gateway names in served configs.

use std::net::IpAddr;

use meshroute_core::{Config, Meta, MESH_GATEWAY};

/// Qualify every short host and gateway name in `config`.
///
/// Configs generated from gateway routes already carry qualified names and
/// are returned unchanged.
pub fn resolve_virtual_service_shortnames(mut config: Config) -> Config {
    if config.uses_gateway_semantics() {
        return config;
    }
    let meta = &config.meta;
    let spec = &mut config.spec;

    for host in &mut spec.hosts {
        *host = resolve_shortname_to_fqdn(host, meta);
    }
    resolve_gateways(&mut spec.gateways, meta);

    for route in &mut spec.http {
        for m in &mut route.matches {
            resolve_gateways(&mut m.gateways, meta);
        }
        for destination in &mut route.route {
            destination.destination.host = resolve_shortname_to_fqdn(&destination.destination.host, meta);
        }
        if let Some(mirror) = &mut route.mirror {
            mirror.host = resolve_shortname_to_fqdn(&mirror.host, meta);
        }
    }
    config
}

fn resolve_gateways(gateways: &mut [String], meta: &Meta) {
    for gateway in gateways.iter_mut() {
        if gateway.as_str() != MESH_GATEWAY {
            *gateway = resolve_gateway_name(gateway, meta);
        }
    }
}

/// Expand a host without a dot to `host.namespace[.svc.domain]`.
///
/// `*`, IP addresses and names that already contain a dot are returned as-is.
pub fn resolve_shortname_to_fqdn(host: &str, meta: &Meta) -> String {
    if host.is_empty() || host == "*" || host.contains('.') || host.parse::<IpAddr>().is_ok() {
        return host.to_string();
    }

    let mut out = host.to_string();
    if !meta.namespace.is_empty() {
        out.push('.');
        out.push_str(&meta.namespace);
    }
    if !meta.domain.is_empty() {
        out.push_str(".svc.");
        out.push_str(&meta.domain);
    }
    out
}

/// Normalize a gateway reference to `namespace/name`.
///
/// `./gw` and bare `gw` resolve in the config's namespace; the legacy
/// `gw.ns.svc.cluster.local` form becomes `ns/gw`.
pub fn resolve_gateway_name(gateway: &str, meta: &Meta) -> String {
    if let Some((namespace, name)) = gateway.split_once('/') {
        return if namespace == "." {
            format!("{}/{name}", meta.namespace)
        } else {
            gateway.to_string()
        };
    }

    match gateway.split_once('.') {
        None => format!("{}/{gateway}", meta.namespace),
        Some((name, rest)) => {
            let namespace = rest.split_once('.').map_or(rest, |(ns, _)| ns);
            format!("{namespace}/{name}")
        }
    }
}
