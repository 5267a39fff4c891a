//! Per-leaf elevation statistics and the agree/disagree update policy.
//!
//! Each quadtree leaf owns one [`ElevCell`]. A new sample lands in one of
//! three zones relative to the cell's running mean:
//!
//! - agree (|dy| <= tau_accept): incremental mean update with a saturating
//!   sample count; repeated agreement builds confidence.
//! - disagree (|dy| >= tau_replace): candidate for a remap. Low-confidence
//!   cells remap on a single hit; confident cells require `k_confirm` hits
//!   inside the disagree window.
//! - gray zone (in between): small-gain EMA drift, no confidence change.
//!
//! Persistent large deviations therefore flip the cell to the new terrain
//! while isolated outliers decay harmlessly.

use std::ops::BitOr;

use crate::config::ElevationConfig;

/// Gain for the gray-zone EMA drift
const GRAY_ZONE_GAIN: f32 = 0.1;

/// Blend factor for the variance proxy (second-moment EMA)
const VAR_BLEND: f32 = 0.1;

/// Cell status bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CellFlags(u8);

impl CellFlags {
    /// Cell holds a meaningful estimate; without it no other field counts
    pub const VALID: CellFlags = CellFlags(1 << 0);
    /// Renderer-visible mean has moved beyond tau_upload since last export
    pub const DIRTY: CellFlags = CellFlags(1 << 1);
    /// Cell was just remapped (statistics discarded and reseeded)
    pub const CHANGED: CellFlags = CellFlags(1 << 2);

    /// True when every bit of `other` is set
    #[inline]
    pub fn contains(self, other: CellFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`
    #[inline]
    pub fn insert(&mut self, other: CellFlags) {
        self.0 |= other.0;
    }

    /// Raw bit value
    #[inline]
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for CellFlags {
    type Output = CellFlags;

    #[inline]
    fn bitor(self, rhs: CellFlags) -> CellFlags {
        CellFlags(self.0 | rhs.0)
    }
}

/// Integration thresholds, extracted once from [`ElevationConfig`] so the
/// per-point hot path passes a single reference around.
#[derive(Clone, Copy, Debug)]
pub struct IntegrationParams {
    pub tau_accept: f32,
    pub tau_replace: f32,
    pub k_confirm: u8,
    pub n_sat: u16,
    pub n_conf: u16,
    pub tau_upload: f32,
    pub disagree_window: f64,
}

impl From<&ElevationConfig> for IntegrationParams {
    fn from(cfg: &ElevationConfig) -> Self {
        Self {
            tau_accept: cfg.tau_accept,
            tau_replace: cfg.tau_replace,
            k_confirm: cfg.k_confirm,
            n_sat: cfg.n_sat,
            n_conf: cfg.n_conf,
            tau_upload: cfg.tau_upload,
            disagree_window: cfg.disagree_window,
        }
    }
}

/// Per-leaf elevation statistics.
///
/// Invariant: when VALID is set, `n >= 1` and `z_mean` is finite.
#[derive(Clone, Copy, Debug, Default)]
pub struct ElevCell {
    /// Running mean elevation
    pub z_mean: f32,
    /// Variance proxy (EMA-blended second moment of agree-zone deltas)
    pub z_var: f32,
    /// Mean last exposed to the dirty channel
    pub prev_z_mean: f32,
    /// Sample count, saturated at `n_sat`
    pub n: u16,
    /// Large-deviation hits inside the current disagree window
    pub disagree_hits: u8,
    /// Timestamp of the most recent large deviation
    pub last_disagree_ts: f64,
    /// Status bits
    pub flags: CellFlags,
}

impl ElevCell {
    /// True when the cell holds a meaningful estimate
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.flags.contains(CellFlags::VALID)
    }

    /// Fold one elevation sample into the cell.
    ///
    /// Returns true when the owning tile must be marked dirty (cell
    /// initialized, remapped, or the mean crossed `tau_upload` since the
    /// value last exported).
    pub fn integrate(&mut self, y: f32, now: f64, p: &IntegrationParams) -> bool {
        if !self.is_valid() {
            self.reseed(y);
            return true;
        }

        let dy = (y - self.z_mean).abs();
        if dy <= p.tau_accept {
            let n_new = self.n.saturating_add(1).min(p.n_sat);
            let delta = y - self.z_mean;
            self.z_mean += delta / n_new as f32;
            self.z_var = (1.0 - VAR_BLEND) * self.z_var + VAR_BLEND * delta * delta;
            self.n = n_new;
            self.disagree_hits = 0;
            self.mark_if_moved(p.tau_upload)
        } else if dy >= p.tau_replace {
            if now - self.last_disagree_ts <= p.disagree_window {
                self.disagree_hits = self.disagree_hits.saturating_add(1);
            } else {
                self.disagree_hits = 1;
            }
            self.last_disagree_ts = now;
            if self.n < p.n_conf || self.disagree_hits >= p.k_confirm {
                self.reseed(y);
                return true;
            }
            false
        } else {
            // gray zone: drift toward the sample without committing
            self.z_mean += GRAY_ZONE_GAIN * (y - self.z_mean);
            if now - self.last_disagree_ts > p.disagree_window {
                self.disagree_hits = 0;
            }
            self.mark_if_moved(p.tau_upload)
        }
    }

    /// Discard accumulated statistics and restart from `y`
    fn reseed(&mut self, y: f32) {
        self.z_mean = y;
        self.prev_z_mean = y;
        self.z_var = 0.0;
        self.n = 1;
        self.disagree_hits = 0;
        self.flags
            .insert(CellFlags::VALID | CellFlags::DIRTY | CellFlags::CHANGED);
    }

    /// Set DIRTY and advance the exported mean if it moved past the threshold
    fn mark_if_moved(&mut self, tau_upload: f32) -> bool {
        if (self.z_mean - self.prev_z_mean).abs() > tau_upload {
            self.prev_z_mean = self.z_mean;
            self.flags.insert(CellFlags::DIRTY);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> IntegrationParams {
        IntegrationParams::from(&ElevationConfig::default())
    }

    #[test]
    fn test_first_sample_initializes() {
        let p = params();
        let mut cell = ElevCell::default();
        assert!(cell.integrate(5.0, 0.0, &p));
        assert_eq!(cell.z_mean, 5.0);
        assert_eq!(cell.prev_z_mean, 5.0);
        assert_eq!(cell.n, 1);
        assert!(cell.is_valid());
        assert!(cell.flags.contains(CellFlags::DIRTY | CellFlags::CHANGED));
    }

    #[test]
    fn test_agree_confidence_monotone() {
        let p = params();
        let mut cell = ElevCell::default();
        cell.integrate(5.0, 0.0, &p);
        let mut prev_n = cell.n;
        for i in 0..40 {
            let y = 5.0 + if i % 2 == 0 { 0.05 } else { -0.05 };
            cell.integrate(y, 0.0, &p);
            assert!(cell.n >= prev_n);
            assert_eq!(cell.disagree_hits, 0);
            prev_n = cell.n;
        }
        assert_eq!(cell.n, p.n_sat);
        assert!((cell.z_mean - 5.0).abs() < 0.05);
    }

    #[test]
    fn test_remap_after_k_hits_within_window() {
        let p = params();
        let mut cell = ElevCell::default();
        cell.integrate(5.0, 0.0, &p);
        for _ in 0..30 {
            cell.integrate(5.0, 0.0, &p);
        }
        assert_eq!(cell.n, p.n_sat);

        // two hits inside the window do not remap a confident cell
        assert!(!cell.integrate(7.0, 0.0, &p));
        assert!(!cell.integrate(7.0, 0.3, &p));
        assert!((cell.z_mean - 5.0).abs() < 0.05);

        // third hit crosses k_confirm and remaps
        assert!(cell.integrate(7.0, 0.6, &p));
        assert_eq!(cell.z_mean, 7.0);
        assert_eq!(cell.n, 1);
        assert!(cell.flags.contains(CellFlags::CHANGED));
    }

    #[test]
    fn test_no_remap_when_hits_expire() {
        let p = params();
        let mut cell = ElevCell::default();
        for _ in 0..10 {
            cell.integrate(5.0, 0.0, &p);
        }
        // hits spaced wider than the window never accumulate
        assert!(!cell.integrate(7.0, 0.0, &p));
        assert!(!cell.integrate(7.0, 1.5, &p));
        assert!(!cell.integrate(7.0, 3.0, &p));
        assert_eq!(cell.disagree_hits, 1);
        assert!((cell.z_mean - 5.0).abs() < 0.05);
    }

    #[test]
    fn test_low_confidence_remaps_on_single_hit() {
        let p = params();
        let mut cell = ElevCell::default();
        cell.integrate(7.0, 0.0, &p);
        assert_eq!(cell.n, 1);

        // n < n_conf, so one disagreement flips the cell
        assert!(cell.integrate(5.0, 0.1, &p));
        assert_eq!(cell.z_mean, 5.0);
        assert_eq!(cell.n, 1);
    }

    #[test]
    fn test_confirmed_cell_survives_single_hit() {
        let p = params();
        let mut cell = ElevCell::default();
        cell.integrate(7.0, 0.0, &p);
        for _ in 0..p.n_conf {
            cell.integrate(7.0, 0.0, &p);
        }
        assert!(cell.n >= p.n_conf);

        assert!(!cell.integrate(5.0, 0.1, &p));
        assert_eq!(cell.z_mean, 7.0);
    }

    #[test]
    fn test_gray_zone_drifts_without_confidence() {
        let p = params();
        let mut cell = ElevCell::default();
        for _ in 0..10 {
            cell.integrate(5.0, 0.0, &p);
        }
        let n_before = cell.n;
        // 0.4 m is between tau_accept and tau_replace
        cell.integrate(5.4, 0.0, &p);
        assert_eq!(cell.n, n_before);
        assert!(cell.z_mean > 5.0 && cell.z_mean < 5.4);
    }

    #[test]
    fn test_upload_debounce() {
        let p = params();
        let mut cell = ElevCell::default();
        cell.integrate(5.0, 0.0, &p);
        let exported = cell.prev_z_mean;

        // nudges below tau_upload must not move the exported mean
        assert!(!cell.integrate(5.01, 0.0, &p));
        assert_eq!(cell.prev_z_mean, exported);

        // enough agreeing samples above the mean eventually cross it
        let mut crossed = false;
        for _ in 0..60 {
            if cell.integrate(5.2, 0.0, &p) {
                crossed = true;
                break;
            }
        }
        assert!(crossed);
        assert!((cell.prev_z_mean - cell.z_mean).abs() < 1e-6);
    }
}
