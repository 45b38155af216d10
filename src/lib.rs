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
//! Library for planning and replay-simulating traceroute probing
//! campaigns against a target AS.
//!
//! The pipeline has three phases. RIB parsing ([`rib`]) ingests BGP
//! table dumps from many collectors, keeps one selected route per prefix
//! (valley-free heuristic with deterministic tie-breaks), and extracts
//! the routing overlays ([`overlays`]). The strategy step ([`strategy`])
//! orders the probing targets of an AS of interest from the selected
//! routes, the AS relationships and the customer cones ([`caida`]). The
//! simulator ([`simulator`]) replays a recorded traceroute dataset
//! ([`traces`]) over that ordering and reports the discovery per probe.

pub mod annotation;
pub mod caida;
pub mod error;
pub mod overlays;
pub mod prefix;
pub mod readers;
pub mod rib;
pub mod rocketfuel;
pub mod simulator;
pub mod stats;
pub mod strategy;
pub mod traces;

/// An AS number. The value `-1` stands for "unattributed" throughout the
/// datasets.
pub type Asn = i64;

/// The ASN attached to addresses and prefixes no AS could be assigned to.
pub const UNATTRIBUTED: Asn = -1;

pub mod prelude {
    pub use super::{
        caida::{AsRelations, ConeSizes, Ip2As, RelKind},
        error::{Error, Result},
        rib::{Heuristic, RibEntry},
        simulator::{SimulationConfig, SimulationMode},
        strategy::{AsLimit, StrategyConfig},
        Asn,
    };
}
