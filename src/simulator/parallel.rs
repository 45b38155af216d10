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
//! Batched scheduling: visit every AS on each iteration and consume a
//! batch of its probes, the batch size given by a weight function of the
//! AS's rank, cone size, or the iteration count. Probing, not code, runs
//! "in parallel" here.

use std::path::Path;

use crate::{
    caida::ConeSizes,
    error::{Error, Result},
    Asn,
};

use super::{next_probe, process_trace, AsStatus, Discovery, DiscoveryLog, Session, SimData};

/// Batch-size policy: how much of an AS's address space one iteration
/// may consume. Every policy returns at least one probe.
#[derive(Debug)]
pub enum WeightFn<'a> {
    /// Fixed batch size.
    Constant(f64),
    /// `a/(pos+a)` of the AS's span, decreasing with its rank.
    Inverse { a: f64 },
    /// As `Inverse`, further shrunk on every new iteration.
    InverseIteration { a: f64, decay: f64 },
    /// As `Inverse` but driven by the customer-cone size; the internals
    /// (position 0) always get their full span.
    ConeSize { a: f64, cones: &'a ConeSizes },
}

impl<'a> WeightFn<'a> {
    /// Build the weight function selected by `weights[0]` with the
    /// remaining entries as parameters.
    pub fn build(
        weights: &[f64],
        nb_ases: usize,
        cones: Option<&'a ConeSizes>,
    ) -> Result<Self> {
        let (Some(&index), params) = (weights.first(), &weights[1.min(weights.len())..]) else {
            return Err(Error::InvalidArgument("no weight function given".into()));
        };
        let expect = |n: usize| -> Result<()> {
            (params.len() == n).then_some(()).ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "wrong weighting parameters: expecting {n}, got {}",
                    params.len()
                ))
            })
        };
        match index as usize {
            0 => {
                expect(1)?;
                Ok(Self::Constant(params[0]))
            }
            1 => {
                expect(1)?;
                let desired = params[0];
                Ok(Self::Inverse {
                    a: desired * nb_ases as f64 / (1.0 - desired),
                })
            }
            2 => {
                expect(2)?;
                let desired = params[0];
                Ok(Self::InverseIteration {
                    a: desired * nb_ases as f64 / (1.0 - desired),
                    decay: params[1],
                })
            }
            3 => {
                expect(1)?;
                let cones = cones.filter(|c| !c.is_empty()).ok_or_else(|| {
                    Error::missing("weight_functions", "as_conesize not set")
                })?;
                let desired = params[0];
                Ok(Self::ConeSize {
                    a: desired * cones.max as f64 / (1.0 - desired),
                    cones,
                })
            }
            other => Err(Error::InvalidArgument(format!(
                "unknown weight function {other}"
            ))),
        }
    }

    /// Number of probes the AS may consume in this iteration.
    pub fn batch_size(&self, status: &AsStatus, iteration: usize) -> usize {
        let span = (status.end - status.start) as f64;
        match self {
            Self::Constant(size) => (*size as usize).max(1),
            Self::Inverse { a } => {
                let weight = a / (status.position as f64 + a);
                ((weight * span).ceil() as usize).max(1)
            }
            Self::InverseIteration { a, decay } => {
                let weight = a / (status.position as f64 + a);
                let batch = (weight * span).ceil();
                let iteration_weight = decay / (iteration as f64 + decay);
                ((iteration_weight * batch).ceil() as usize).max(1)
            }
            Self::ConeSize { a, cones } => {
                if status.position == 0 {
                    // the internals are always worth probing in full
                    return status.end - status.start;
                }
                let cone = cones.cone(status.asn) as f64;
                let weight = a / (cone + a);
                ((weight * span).ceil() as usize).max(1)
            }
        }
    }
}

pub fn run(
    sim: &SimData,
    as_interest: Asn,
    session: Session,
    mut status: Vec<AsStatus>,
    weight_fn: &WeightFn<'_>,
    output_file: &Path,
    threshold: f64,
) -> Result<()> {
    let (truth, targets) = (session.truth, session.targets);
    let mut disc = Discovery::default();
    let mut log = DiscoveryLog::default();
    let mut counter = 0usize;
    let mut stopped_ases = 0usize;

    let mut iteration = 0usize;
    while stopped_ases != status.len() {
        for as_status in status.iter_mut() {
            let batch_size = weight_fn.batch_size(as_status, iteration);
            for _ in 0..batch_size {
                let Some(destination) = next_probe(as_status, &targets, &mut stopped_ases)
                else {
                    // nothing left for this AS, carry on with the next
                    break;
                };
                process_trace(sim.data.traces.get(&destination), as_interest, &mut disc);

                if log.observe(counter, &disc, &truth) {
                    as_status.plateau = 0;
                } else {
                    as_status.plateau += 1;
                    let span = (as_status.end - as_status.start) as f64;
                    if as_status.plateau as f64 / span > threshold {
                        if !as_status.stopped {
                            as_status.stopped = true;
                            stopped_ases += 1;
                        }
                        break;
                    }
                }
                counter += 1;
            }
        }
        iteration += 1;
    }

    log.write_sorted(output_file)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::caida::ConeSizes;

    fn status(position: usize, span: usize) -> AsStatus {
        AsStatus {
            asn: 10 + position as Asn,
            start: 0,
            end: span,
            cur: 0,
            plateau: 0,
            stopped: false,
            position,
        }
    }

    #[test]
    fn weight_functions_return_at_least_one() {
        let cones = ConeSizes::from_sizes(&[(10, 1), (11, 1000)]);
        let fns = [
            WeightFn::build(&[0.0, 0.0], 5, None).unwrap(),
            WeightFn::build(&[1.0, 0.01], 5, None).unwrap(),
            WeightFn::build(&[2.0, 0.01, 0.5], 5, None).unwrap(),
            WeightFn::build(&[3.0, 0.01], 5, Some(&cones)).unwrap(),
        ];
        for f in &fns {
            for position in [1, 3, 4] {
                for iteration in [0, 1, 10] {
                    assert!(f.batch_size(&status(position, 50), iteration) >= 1);
                }
            }
        }
    }

    #[test]
    fn first_as_gets_its_full_span() {
        // position 0 has weight a/(0+a) = 1 for the inverse policy, and
        // is special-cased by the cone policy
        let inverse = WeightFn::build(&[1.0, 0.01], 5, None).unwrap();
        assert_eq!(inverse.batch_size(&status(0, 50), 0), 50);

        let cones = ConeSizes::from_sizes(&[(11, 1000)]);
        let by_cone = WeightFn::build(&[3.0, 0.01], 5, Some(&cones)).unwrap();
        assert_eq!(by_cone.batch_size(&status(0, 50), 0), 50);
    }

    #[test]
    fn batch_size_decreases_with_rank_and_cone() {
        let inverse = WeightFn::build(&[1.0, 0.1], 10, None).unwrap();
        let near = inverse.batch_size(&status(1, 100), 0);
        let far = inverse.batch_size(&status(9, 100), 0);
        assert!(near > far);

        let cones = ConeSizes::from_sizes(&[(11, 2), (13, 5000)]);
        let by_cone = WeightFn::build(&[3.0, 0.1], 10, Some(&cones)).unwrap();
        let small_cone = by_cone.batch_size(&status(1, 100), 0);
        let big_cone = by_cone.batch_size(&status(3, 100), 0);
        assert!(small_cone > big_cone);
    }

    #[test]
    fn iteration_decay_shrinks_batches() {
        let decaying = WeightFn::build(&[2.0, 0.1, 1.0], 10, None).unwrap();
        let early = decaying.batch_size(&status(1, 1000), 0);
        let late = decaying.batch_size(&status(1, 1000), 9);
        assert!(early > late);
    }

    #[test]
    fn wrong_parameter_count_is_fatal() {
        assert!(WeightFn::build(&[1.0], 5, None).is_err());
        assert!(WeightFn::build(&[2.0, 0.1], 5, None).is_err());
        assert!(WeightFn::build(&[3.0, 0.1], 5, None).is_err());
    }
}
