// Anaximander: Planning and Simulating Traceroute-Based Probing Campaigns
// Copyright (C) 2024-2025 The Anaximander developers
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! IPv4 prefix utilities: validation, `/24` expansion, binary-string
//! encoding and random host selection.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use lazy_static::lazy_static;
use rand::Rng;

/// Mask lengths accepted for BGP entries. Anything more specific than a
/// `/24` or less specific than a `/8` is considered unsound and dropped.
const MIN_PREFIX_LEN: u8 = 8;
const MAX_PREFIX_LEN: u8 = 24;

lazy_static! {
    /// Special-purpose ranges (RFC 6890) that never make valid targets.
    static ref RESERVED_PREFIXES: Vec<Ipv4Net> = [
        "0.0.0.0/8",
        "10.0.0.0/8",
        "100.64.0.0/10",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "172.16.0.0/12",
        "192.0.0.0/24",
        "192.0.2.0/24",
        "192.88.99.0/24",
        "192.168.0.0/16",
        "198.18.0.0/15",
        "198.51.100.0/24",
        "203.0.113.0/24",
        "224.0.0.0/4",
        "240.0.0.0/4",
    ]
    .iter()
    .map(|p| p.parse().unwrap())
    .collect();
}

/// Parse and canonicalize a CIDR string coming from a RIB dump.
///
/// Returns `None` for anything that is not routable IPv4 unicast space:
/// IPv6, mask lengths outside `[8, 24]`, and the reserved ranges.
pub fn validate(cidr: &str) -> Option<Ipv4Net> {
    let net: Ipv4Net = match cidr.parse() {
        Ok(net) => net,
        Err(e) => {
            log::debug!("[check_prefix_validity]: {e}: {cidr}");
            return None;
        }
    };
    if net.prefix_len() < MIN_PREFIX_LEN || net.prefix_len() > MAX_PREFIX_LEN {
        return None;
    }
    if RESERVED_PREFIXES.iter().any(|r| r.contains(&net.addr())) {
        return None;
    }
    Some(net.trunc())
}

/// Parse a prefix without the routability checks (used for auxiliary
/// inputs such as ip2as tables, where a `/32` entry is legitimate).
pub fn parse(cidr: &str) -> Option<Ipv4Net> {
    cidr.parse::<Ipv4Net>().ok().map(|net| net.trunc())
}

/// All subnets of `net` with mask length `target_len`.
///
/// If `target_len` is shorter than the prefix itself, the single
/// re-masked supernet is returned instead.
pub fn subnets(net: Ipv4Net, target_len: u8) -> Vec<Ipv4Net> {
    if target_len <= net.prefix_len() {
        let remasked = Ipv4Net::new(net.addr(), target_len).unwrap().trunc();
        vec![remasked]
    } else {
        net.subnets(target_len).map(|s| s.collect()).unwrap_or_default()
    }
}

/// A routable host address picked uniformly inside `net`, excluding the
/// network and broadcast addresses.
pub fn random_host(net: Ipv4Net) -> Ipv4Addr {
    if net.prefix_len() >= 31 {
        // no routable host bits to pick from
        return net.addr();
    }
    let host_len = 32 - u32::from(net.prefix_len());
    let span = (1u32 << host_len) - 2;
    let offset = rand::thread_rng().gen_range(1..=span);
    Ipv4Addr::from(u32::from(net.network()) | offset)
}

/// The probe actually sent for a prefix: the prefix itself when it
/// already is a `/24`, otherwise one of its `/24` tiles picked at random.
pub fn random_24(net: Ipv4Net) -> Ipv4Net {
    if net.prefix_len() == 24 {
        return net;
    }
    let host = random_host(net);
    net_24_of(host)
}

/// The `/24` containing an address.
pub fn net_24_of(addr: Ipv4Addr) -> Ipv4Net {
    Ipv4Net::new(addr, 24).unwrap().trunc()
}

/// The `prefix_len` high-order bits of the base address, as ASCII
/// `'0'`/`'1'`. Radix-tree keys are built out of this encoding.
pub fn binary_string(net: Ipv4Net) -> String {
    let bits = u32::from(net.network());
    (0..net.prefix_len())
        .map(|i| if bits & (1 << (31 - i)) != 0 { '1' } else { '0' })
        .collect()
}

/// Inverse of [`binary_string`]: right-pad with zeros to 32 bits and use
/// the input length as the mask.
pub fn from_binary(bits: &str) -> Ipv4Net {
    let mut addr = 0u32;
    for (i, b) in bits.bytes().enumerate() {
        if b == b'1' {
            addr |= 1 << (31 - i);
        }
    }
    Ipv4Net::new(Ipv4Addr::from(addr), bits.len() as u8).unwrap()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validate_rejects_unsound_entries() {
        assert!(validate("8.8.8.0/24").is_some());
        assert!(validate("not a prefix").is_none());
        assert!(validate("2001:db8::/32").is_none());
        // mask length bounds
        assert!(validate("1.0.0.0/7").is_none());
        assert!(validate("1.2.3.0/25").is_none());
        // reserved ranges
        assert!(validate("10.1.2.0/24").is_none());
        assert!(validate("192.168.4.0/24").is_none());
        assert!(validate("203.0.113.0/24").is_none());
    }

    #[test]
    fn validate_canonicalizes() {
        assert_eq!(
            validate("8.8.8.8/24").unwrap(),
            "8.8.8.0/24".parse::<Ipv4Net>().unwrap()
        );
    }

    #[test]
    fn subnets_tile_the_prefix() {
        let net: Ipv4Net = "118.174.128.0/22".parse().unwrap();
        let tiles = subnets(net, 24);
        assert_eq!(tiles.len(), 4);
        for (i, tile) in tiles.iter().enumerate() {
            assert_eq!(tile.prefix_len(), 24);
            assert_eq!(
                tile.network(),
                Ipv4Addr::new(118, 174, 128 + i as u8, 0),
            );
            assert!(net.contains(tile));
        }
        // non-overlapping by construction
        for (a, b) in tiles.iter().zip(tiles.iter().skip(1)) {
            assert!(!a.contains(b) && !b.contains(a));
        }
    }

    #[test]
    fn subnets_remask_shorter_target() {
        let net: Ipv4Net = "118.174.128.0/26".parse().unwrap();
        let tiles = subnets(net, 24);
        assert_eq!(tiles, vec!["118.174.128.0/24".parse().unwrap()]);
    }

    #[test]
    fn random_host_is_routable() {
        let net: Ipv4Net = "10.0.0.0/30".parse().unwrap();
        for _ in 0..64 {
            let host = random_host(net);
            assert!(net.contains(&host));
            assert_ne!(host, net.network());
            assert_ne!(host, net.broadcast());
        }
    }

    #[test]
    fn binary_string_round_trip() {
        for p in ["1.0.4.0/22", "8.8.8.0/24", "130.104.0.0/16", "5.0.0.0/8"] {
            let net: Ipv4Net = p.parse().unwrap();
            assert_eq!(from_binary(&binary_string(net)), net, "{p}");
        }
        assert_eq!(
            binary_string("1.0.4.0/22".parse().unwrap()),
            "0000000100000000000001"
        );
    }

    #[test]
    fn random_24_keeps_24s() {
        let net: Ipv4Net = "8.8.8.0/24".parse().unwrap();
        assert_eq!(random_24(net), net);
        let wide: Ipv4Net = "130.104.0.0/16".parse().unwrap();
        let tile = random_24(wide);
        assert_eq!(tile.prefix_len(), 24);
        assert!(wide.contains(&tile));
    }
}
