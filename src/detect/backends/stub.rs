use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, ObjectClass};
use crate::geometry::BoundingBox;

/// Layout of the synthetic parking lot the stub backend "sees".
#[derive(Clone, Debug)]
pub struct StubLotConfig {
    pub rows: u32,
    pub cols: u32,
    /// Space whose car drives away.
    pub vacate_space: usize,
    /// Number of frames the car stays parked. `None` keeps the lot full.
    pub vacate_after: Option<u64>,
    /// Probability of missing one parked car on a given frame.
    pub flicker: f64,
    pub seed: u64,
}

/// Upper bound on grid size, keeps per-frame allocation bounded.
pub const MAX_STUB_SPACES: usize = 4096;

impl StubLotConfig {
    /// Check the layout and return the number of spaces in the grid.
    pub fn validate(&self) -> Result<usize> {
        if self.rows == 0 || self.cols == 0 {
            return Err(anyhow!("stub lot needs at least one row and one column"));
        }
        let spaces = (self.rows as usize)
            .checked_mul(self.cols as usize)
            .filter(|&n| n <= MAX_STUB_SPACES)
            .ok_or_else(|| {
                anyhow!(
                    "stub lot of {}x{} exceeds {} spaces",
                    self.rows,
                    self.cols,
                    MAX_STUB_SPACES
                )
            })?;
        if self.vacate_space >= spaces {
            return Err(anyhow!(
                "stub vacate_space {} is outside the {}-space lot",
                self.vacate_space,
                spaces
            ));
        }
        if !(0.0..=1.0).contains(&self.flicker) {
            return Err(anyhow!("stub flicker must be within [0, 1]"));
        }
        Ok(spaces)
    }
}

impl Default for StubLotConfig {
    fn default() -> Self {
        Self {
            rows: 2,
            cols: 4,
            vacate_space: 0,
            vacate_after: Some(30),
            flicker: 0.0,
            seed: 7,
        }
    }
}

/// Stub backend for demos and tests.
///
/// Reports a grid of parked cars plus one pedestrian. Output depends only on
/// the frame size and the number of calls, so runs are reproducible.
pub struct StubBackend {
    lot: StubLotConfig,
    spaces: usize,
    calls: u64,
    rng: StdRng,
}

impl StubBackend {
    pub fn new(lot: StubLotConfig) -> Result<Self> {
        let spaces = lot.validate()?;
        let rng = StdRng::seed_from_u64(lot.seed);
        Ok(Self {
            lot,
            spaces,
            calls: 0,
            rng,
        })
    }

    fn space_box(&self, index: usize, width: u32, height: u32) -> Result<BoundingBox> {
        let cols = self.lot.cols as usize;
        let (row, col) = (index / cols, index % cols);
        let cell_w = width as f32 / self.lot.cols as f32;
        let cell_h = height as f32 / self.lot.rows as f32;
        let inset_w = cell_w * 0.1;
        let inset_h = cell_h * 0.1;
        BoundingBox::new(
            row as f32 * cell_h + inset_h,
            col as f32 * cell_w + inset_w,
            (row + 1) as f32 * cell_h - inset_h,
            (col + 1) as f32 * cell_w - inset_w,
        )
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        self.calls += 1;
        let spaces = self.spaces;
        let departed = self
            .lot
            .vacate_after
            .is_some_and(|after| self.calls > after);
        let missed = if self.lot.flicker > 0.0 && self.rng.gen_bool(self.lot.flicker) {
            Some(self.rng.gen_range(0..spaces))
        } else {
            None
        };

        let mut detections = Vec::with_capacity(spaces + 1);
        for index in 0..spaces {
            if departed && index == self.lot.vacate_space {
                continue;
            }
            if missed == Some(index) {
                continue;
            }
            let class = if index % 5 == 4 {
                ObjectClass::Truck
            } else {
                ObjectClass::Car
            };
            detections.push(Detection::new(
                self.space_box(index, width, height)?,
                class,
                0.9,
            ));
        }

        let walker = BoundingBox::new(0.0, 0.0, height as f32 * 0.2, width as f32 * 0.05)?;
        detections.push(Detection::new(walker, ObjectClass::Person, 0.8));
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::vehicle_boxes;

    #[test]
    fn reports_full_lot_until_departure() -> Result<()> {
        let mut backend = StubBackend::new(StubLotConfig {
            rows: 1,
            cols: 3,
            vacate_space: 1,
            vacate_after: Some(2),
            ..StubLotConfig::default()
        })?;

        let first = backend.detect(&[], 300, 100)?;
        assert_eq!(vehicle_boxes(&first).len(), 3);
        assert_eq!(first.len(), 4);
        let second = backend.detect(&[], 300, 100)?;
        assert_eq!(first, second);

        let third = vehicle_boxes(&backend.detect(&[], 300, 100)?);
        assert_eq!(third.len(), 2);
        assert!(third[0].right() <= 100.0);
        assert!(third[1].left() >= 200.0);
        Ok(())
    }

    #[test]
    fn flicker_is_reproducible_for_a_seed() -> Result<()> {
        let lot = StubLotConfig {
            vacate_after: None,
            flicker: 0.5,
            seed: 99,
            ..StubLotConfig::default()
        };
        let mut a = StubBackend::new(lot.clone())?;
        let mut b = StubBackend::new(lot)?;
        for _ in 0..20 {
            assert_eq!(a.detect(&[], 640, 480)?, b.detect(&[], 640, 480)?);
        }
        Ok(())
    }

    #[test]
    fn rejects_empty_grid_and_bad_flicker() {
        assert!(StubBackend::new(StubLotConfig {
            rows: 0,
            ..StubLotConfig::default()
        })
        .is_err());
        assert!(StubBackend::new(StubLotConfig {
            flicker: 1.5,
            ..StubLotConfig::default()
        })
        .is_err());
    }

    #[test]
    fn rejects_oversized_grid_and_vacate_outside_lot() {
        let huge = StubLotConfig {
            rows: 70_000,
            cols: 70_000,
            ..StubLotConfig::default()
        };
        assert!(huge.validate().is_err());
        assert!(StubBackend::new(huge).is_err());

        let outside = StubLotConfig {
            rows: 2,
            cols: 4,
            vacate_space: 8,
            ..StubLotConfig::default()
        };
        let err = StubBackend::new(outside).err().expect("vacate_space 8 rejected");
        assert!(err.to_string().contains("outside"));

        let last = StubLotConfig {
            vacate_space: 7,
            ..StubLotConfig::default()
        };
        assert_eq!(last.validate().unwrap(), 8);
    }
}
