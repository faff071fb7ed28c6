//! Decoy (ring member) selection using a gamma distribution.
//!
//! Implements the output-age model of Miller et al.: an age in seconds is
//! drawn from `exp(Gamma(19.28, 1/1.61))`, mapped onto the cumulative RingCT
//! output histogram, and resolved to a concrete output by picking uniformly
//! inside the block that holds that position.

use log::{debug, trace};
use rand::Rng;
use shroud_types::consensus::{
    DECOY_BLOCKS_IN_A_YEAR, DECOY_GAMMA_SCALE, DECOY_GAMMA_SHAPE, DEFAULT_TX_SPENDABLE_AGE,
    DIFFICULTY_TARGET_V2, RECENT_SPEND_WINDOW,
};

use crate::TxError;

/// Returned by [`GammaPicker::pick`] when a draw lands outside the usable outputs.
pub const BAD_PICK: u64 = u64::MAX;

/// Picks per ring member before giving up on the gamma draw.
const PICKS_PER_MEMBER: usize = 2_000;

/// Tunables of the age model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecoyParams {
    pub shape: f64,
    pub scale: f64,
    /// Blocks at the chain tip whose outputs are never picked.
    pub spendable_age: u64,
    pub target_seconds: u64,
    pub recent_spend_window: u64,
    pub blocks_in_a_year: u64,
}

impl Default for DecoyParams {
    fn default() -> Self {
        Self {
            shape: DECOY_GAMMA_SHAPE,
            scale: DECOY_GAMMA_SCALE,
            spendable_age: DEFAULT_TX_SPENDABLE_AGE,
            target_seconds: DIFFICULTY_TARGET_V2,
            recent_spend_window: RECENT_SPEND_WINDOW,
            blocks_in_a_year: DECOY_BLOCKS_IN_A_YEAR,
        }
    }
}

/// Gamma picker over a cumulative RingCT output histogram.
#[derive(Debug, Clone)]
pub struct GammaPicker {
    /// Cumulative RingCT output count at the end of each block.
    rct_offsets: Vec<u64>,
    /// Number of blocks eligible for picking.
    end: usize,
    num_rct_outputs: u64,
    average_output_time: f64,
    params: DecoyParams,
}

impl GammaPicker {
    pub fn new(rct_offsets: Vec<u64>) -> Result<Self, TxError> {
        Self::with_params(rct_offsets, DecoyParams::default())
    }

    pub fn with_params(rct_offsets: Vec<u64>, params: DecoyParams) -> Result<Self, TxError> {
        let len = rct_offsets.len();
        if len as u64 <= params.spendable_age {
            return Err(TxError::DecoySelection(format!(
                "output distribution covers {} blocks, need more than {}",
                len, params.spendable_age
            )));
        }
        if rct_offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(TxError::DecoySelection(
                "output distribution is not cumulative".into(),
            ));
        }

        let blocks_to_consider = len.min(params.blocks_in_a_year as usize);
        let back = rct_offsets[len - 1];
        let outputs_to_consider = if blocks_to_consider < len {
            back - rct_offsets[len - blocks_to_consider - 1]
        } else {
            back
        };

        let end = len - params.spendable_age as usize;
        let num_rct_outputs = rct_offsets[end - 1];
        if num_rct_outputs == 0 || outputs_to_consider == 0 {
            return Err(TxError::DecoySelection("no usable RingCT outputs".into()));
        }

        let average_output_time =
            params.target_seconds as f64 * blocks_to_consider as f64 / outputs_to_consider as f64;
        debug!(
            "gamma picker: {} usable outputs over {} blocks, {:.3}s per output",
            num_rct_outputs, end, average_output_time
        );

        Ok(Self {
            rct_offsets,
            end,
            num_rct_outputs,
            average_output_time,
            params,
        })
    }

    /// Outputs that can be picked (all but the last `spendable_age` blocks).
    pub fn num_rct_outputs(&self) -> u64 {
        self.num_rct_outputs
    }

    pub fn average_output_time(&self) -> f64 {
        self.average_output_time
    }

    /// Draw one global output index, or [`BAD_PICK`] if the draw is unusable.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        let mut x = gamma_sample(self.params.shape, self.params.scale, rng).exp();

        let unlock_seconds = (self.params.spendable_age * self.params.target_seconds) as f64;
        if x > unlock_seconds {
            x -= unlock_seconds;
        } else {
            x = rng.gen_range(0..self.params.recent_spend_window.max(1)) as f64;
        }

        let output_offset = (x / self.average_output_time) as u64;
        if output_offset >= self.num_rct_outputs {
            trace!("gamma pick too old: offset {}", output_offset);
            return BAD_PICK;
        }
        let target = self.num_rct_outputs - 1 - output_offset;

        // First block whose cumulative count exceeds the target holds it.
        let block = self.rct_offsets[..self.end].partition_point(|&c| c <= target);
        if block >= self.end {
            return BAD_PICK;
        }
        let first = if block == 0 { 0 } else { self.rct_offsets[block - 1] };
        let n_outputs = self.rct_offsets[block] - first;
        if n_outputs == 0 {
            return BAD_PICK;
        }

        first + rng.gen_range(0..n_outputs)
    }

    /// Pick `ring_size - 1` distinct decoys around `real_index`.
    ///
    /// Returns the ring sorted ascending and the position of the real output.
    pub fn build_ring<R: Rng + ?Sized>(
        &self,
        real_index: u64,
        ring_size: usize,
        rng: &mut R,
    ) -> Result<(Vec<u64>, usize), TxError> {
        let num_decoys = ring_size.saturating_sub(1);
        let available = if real_index < self.num_rct_outputs {
            self.num_rct_outputs - 1
        } else {
            self.num_rct_outputs
        };
        if (num_decoys as u64) > available {
            return Err(TxError::InsufficientDecoys {
                requested: num_decoys,
                available,
            });
        }

        let mut ring = Vec::with_capacity(ring_size);
        ring.push(real_index);

        let max_attempts = ring_size.max(1) * PICKS_PER_MEMBER;
        let mut attempts = 0usize;
        let mut bad = 0usize;
        while ring.len() < ring_size {
            attempts += 1;
            let idx = if attempts <= max_attempts {
                let idx = self.pick(rng);
                if idx == BAD_PICK {
                    bad += 1;
                    continue;
                }
                idx
            } else {
                // Histogram too small for the age model; fill uniformly.
                rng.gen_range(0..self.num_rct_outputs)
            };
            if !ring.contains(&idx) {
                ring.push(idx);
            }
        }
        if attempts > max_attempts {
            debug!(
                "gamma picker fell back to uniform picks after {} bad draws",
                bad
            );
        }

        ring.sort_unstable();
        let real_position = ring
            .iter()
            .position(|&x| x == real_index)
            .ok_or_else(|| TxError::DecoySelection("real output lost from ring".into()))?;
        Ok((ring, real_position))
    }
}

// ─── Gamma Distribution Sampler (Marsaglia & Tsang) ──────────────────────────

/// Sample from Gamma(shape, scale) using Marsaglia & Tsang's method.
pub(crate) fn gamma_sample<R: Rng + ?Sized>(shape: f64, scale: f64, rng: &mut R) -> f64 {
    if shape < 1.0 {
        // For shape < 1, use the transformation: Gamma(a) = Gamma(a+1) * U^(1/a).
        let g = gamma_sample(shape + 1.0, 1.0, rng);
        let u: f64 = rng.gen();
        return g * u.powf(1.0 / shape) * scale;
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();

    loop {
        let x = standard_normal(rng);
        let v = 1.0 + c * x;
        if v <= 0.0 {
            continue;
        }

        let v = v * v * v;
        let u: f64 = rng.gen();
        let x2 = x * x;

        // Fast acceptance.
        if u < 1.0 - 0.0331 * x2 * x2 {
            return d * v * scale;
        }

        // Slow acceptance.
        if u.ln() < 0.5 * x2 + d * (1.0 - v + v.ln()) {
            return d * v * scale;
        }
    }
}

/// Standard normal sample using Box-Muller transform.
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // gen() is in [0, 1); keep the log argument strictly positive.
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn uniform_offsets(num_blocks: usize, outputs_per_block: u64) -> Vec<u64> {
        (1..=num_blocks as u64).map(|i| i * outputs_per_block).collect()
    }

    #[test]
    fn test_picker_creation() {
        let picker = GammaPicker::new(uniform_offsets(100, 10)).unwrap();
        // The last 10 blocks are not usable.
        assert_eq!(picker.num_rct_outputs(), 900);
        assert!((picker.average_output_time() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_short_histogram() {
        assert!(GammaPicker::new(uniform_offsets(10, 10)).is_err());
        assert!(GammaPicker::new(vec![0; 50]).is_err());
        assert!(GammaPicker::new(vec![5, 4, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]).is_err());
    }

    #[test]
    fn test_never_picks_locked_blocks() {
        let offsets = uniform_offsets(10_000, 10);
        let picker = GammaPicker::new(offsets.clone()).unwrap();
        let locked_start = offsets[offsets.len() - 11];
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100_000 {
            let pick = picker.pick(&mut rng);
            if pick != BAD_PICK {
                assert!(pick < locked_start, "picked {} from a locked block", pick);
            }
        }
    }

    #[test]
    fn test_small_histogram_yields_bad_picks() {
        let picker = GammaPicker::new(uniform_offsets(20, 1)).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let mut bad = 0;
        for _ in 0..10_000 {
            let pick = picker.pick(&mut rng);
            if pick == BAD_PICK {
                bad += 1;
            } else {
                assert!(pick < 10);
            }
        }
        assert!(bad > 9_000, "expected mostly bad picks, got {}", bad);
    }

    #[test]
    fn test_picks_follow_output_density() {
        // Block sizes cycle 1..=8, so blocks of size s hold s/36 of the outputs.
        let mut offsets = Vec::with_capacity(30_000);
        let mut total = 0u64;
        for i in 0..30_000u64 {
            total += 1 + (i % 8);
            offsets.push(total);
        }
        let picker = GammaPicker::new(offsets.clone()).unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        let mut per_class = [0u64; 8];
        let mut valid = 0u64;
        for _ in 0..100_000 {
            let pick = picker.pick(&mut rng);
            if pick == BAD_PICK {
                continue;
            }
            let block = offsets.partition_point(|&c| c <= pick);
            per_class[block % 8] += 1;
            valid += 1;
        }
        assert!(valid > 50_000);

        for (class, &count) in per_class.iter().enumerate() {
            let observed = count as f64 / valid as f64;
            let expected = (class as f64 + 1.0) / 36.0;
            assert!(
                (observed - expected).abs() < 0.01,
                "class {}: observed {:.4}, expected {:.4}",
                class,
                observed,
                expected
            );
        }
    }

    #[test]
    fn test_pick_ages_fit_gamma() {
        // One output per block makes offset * 120s the exact age of a pick.
        let picker = GammaPicker::new(uniform_offsets(200_000, 1)).unwrap();
        assert!((picker.average_output_time() - 120.0).abs() < 1e-9);
        let num_rct = picker.num_rct_outputs();
        let mut rng = StdRng::seed_from_u64(1234);

        let n = 100_000;
        let ages: Vec<f64> = (0..n)
            .map(|_| match picker.pick(&mut rng) {
                BAD_PICK => f64::INFINITY,
                pick => ((num_rct - 1 - pick) * 120 + 1200) as f64,
            })
            .collect();

        // Wilson-Hilferty quantiles of Gamma(19.28, 1/1.61).
        let k = DECOY_GAMMA_SHAPE;
        let theta = DECOY_GAMMA_SCALE;
        for (z, expected) in [(-1.0, 0.1587), (0.0, 0.5), (1.0, 0.8413)] {
            let c = 1.0 - 1.0 / (9.0 * k) + z * (1.0 / (9.0 * k)).sqrt();
            let quantile = (k * theta * c * c * c).exp();
            let below = ages.iter().filter(|&&a| a < quantile).count();
            let observed = below as f64 / n as f64;
            assert!(
                (observed - expected).abs() < 0.01,
                "z={}: observed {:.4}, expected {:.4}",
                z,
                observed,
                expected
            );
        }
    }

    #[test]
    fn test_build_ring() {
        let picker = GammaPicker::new(uniform_offsets(2_000, 100)).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let (ring, real_pos) = picker.build_ring(150_000, 16, &mut rng).unwrap();
        assert_eq!(ring.len(), 16);
        assert_eq!(ring[real_pos], 150_000);
        for pair in ring.windows(2) {
            assert!(pair[1] > pair[0], "ring should be sorted and unique");
        }
    }

    #[test]
    fn test_build_ring_small_histogram_falls_back() {
        let picker = GammaPicker::new(uniform_offsets(40, 1)).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let (ring, real_pos) = picker.build_ring(3, 11, &mut rng).unwrap();
        assert_eq!(ring.len(), 11);
        assert_eq!(ring[real_pos], 3);
        assert!(ring.iter().all(|&i| i < 30));
    }

    #[test]
    fn test_build_ring_insufficient_decoys() {
        let picker = GammaPicker::new(uniform_offsets(20, 1)).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let err = picker.build_ring(2, 16, &mut rng).unwrap_err();
        assert!(matches!(
            err,
            TxError::InsufficientDecoys { requested: 15, available: 9 }
        ));
    }

    #[test]
    fn test_gamma_distribution_positive() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let sample = gamma_sample(DECOY_GAMMA_SHAPE, DECOY_GAMMA_SCALE, &mut rng);
            assert!(sample > 0.0, "gamma sample should be positive");
        }
    }

    #[test]
    fn test_gamma_shape_less_than_one() {
        let mut rng = StdRng::seed_from_u64(12);
        for _ in 0..50 {
            let sample = gamma_sample(0.5, 1.0, &mut rng);
            assert!(sample > 0.0);
        }
    }

    #[test]
    fn test_standard_normal_range() {
        let mut rng = StdRng::seed_from_u64(13);
        let n = 1000;
        let in_range = (0..n).filter(|_| standard_normal(&mut rng).abs() < 3.0).count();
        // ~99.7% should be within 3 sigma.
        assert!(in_range > 950, "expected >95% within 3 sigma, got {}", in_range);
    }
}
