//! Upload/delete IP gate

use std::net::IpAddr;

use ipnet::IpNet;

use crate::error::ApiError;

/// Check a client address against the configured allowlist. IPv4-mapped
/// IPv6 addresses are compared as their IPv4 form.
pub fn client_allowed(nets: &[IpNet], ip: IpAddr) -> bool {
    let ip = ip.to_canonical();
    nets.iter().any(|net| net.contains(&ip))
}

pub fn ensure_allowed(nets: &[IpNet], ip: IpAddr) -> Result<(), ApiError> {
    if client_allowed(nets, ip) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}
