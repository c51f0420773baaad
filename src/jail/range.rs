//! IP range coarsening.

use std::net::IpAddr;

/// Reduce an address to the range it is jailed under.
///
/// IPv4 addresses map to their /24, everything else to its /64.
pub fn reduce_ip_range(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            format!("{}.{}.{}.0/24", a, b, c)
        }
        IpAddr::V6(v6) => {
            let s = v6.segments();
            format!("{:04x}:{:04x}:{:04x}:{:04x}::/64", s[0], s[1], s[2], s[3])
        }
    }
}
