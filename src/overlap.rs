//! Pairwise IoU between parking spaces and the vehicles seen in a frame.

use crate::geometry::BoundingBox;

/// Row-major `rows x cols` IoU scores; rows index the reference boxes.
///
/// The column count is kept even when it is zero, so a frame with no
/// candidate boxes yields a real `(m, 0)` matrix whose rows all report a
/// maximum overlap of 0.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlapMatrix {
    rows: usize,
    cols: usize,
    scores: Vec<f32>,
}

impl OverlapMatrix {
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn has_candidates(&self) -> bool {
        self.cols > 0
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.scores.get(row * self.cols + col).copied()
    }

    pub fn row(&self, row: usize) -> &[f32] {
        if row >= self.rows {
            return &[];
        }
        &self.scores[row * self.cols..(row + 1) * self.cols]
    }

    /// Best overlap of a reference box against any candidate.
    pub fn row_max(&self, row: usize) -> f32 {
        self.row(row).iter().copied().fold(0.0, f32::max)
    }

    /// One maximum per reference box.
    pub fn max_per_row(&self) -> Vec<f32> {
        (0..self.rows).map(|row| self.row_max(row)).collect()
    }
}

/// IoU of every reference box (rows) against every candidate (columns).
pub fn compute_overlaps(reference: &[BoundingBox], candidates: &[BoundingBox]) -> OverlapMatrix {
    let mut scores = Vec::with_capacity(reference.len() * candidates.len());
    for r in reference {
        scores.extend(candidates.iter().map(|c| r.iou(c)));
    }
    OverlapMatrix {
        rows: reference.len(),
        cols: candidates.len(),
        scores,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(top: f32, left: f32, bottom: f32, right: f32) -> BoundingBox {
        BoundingBox::new(top, left, bottom, right).unwrap()
    }

    #[test]
    fn reference_indexes_rows() {
        let reference = vec![bbox(0.0, 0.0, 10.0, 10.0), bbox(0.0, 100.0, 10.0, 110.0)];
        let candidates = vec![
            bbox(0.0, 100.0, 10.0, 110.0),
            bbox(0.0, 0.0, 10.0, 10.0),
            bbox(500.0, 500.0, 510.0, 510.0),
        ];
        let m = compute_overlaps(&reference, &candidates);
        assert_eq!(m.shape(), (2, 3));
        assert_eq!(m.get(0, 1), Some(1.0));
        assert_eq!(m.get(0, 0), Some(0.0));
        assert_eq!(m.get(1, 0), Some(1.0));
        assert_eq!(m.get(2, 0), None);
        assert_eq!(m.max_per_row(), vec![1.0, 1.0]);

        let flipped = compute_overlaps(&candidates, &reference);
        assert_eq!(flipped.shape(), (3, 2));
        assert_eq!(flipped.get(1, 0), Some(1.0));
    }

    #[test]
    fn no_candidates_gives_all_zero_rows() {
        let reference = vec![bbox(0.0, 0.0, 10.0, 10.0), bbox(20.0, 20.0, 30.0, 30.0)];
        let m = compute_overlaps(&reference, &[]);
        assert_eq!(m.shape(), (2, 0));
        assert!(!m.has_candidates());
        assert!(m.row(0).is_empty());
        assert_eq!(m.max_per_row(), vec![0.0, 0.0]);
    }

    #[test]
    fn no_reference_boxes_gives_no_rows() {
        let m = compute_overlaps(&[], &[bbox(0.0, 0.0, 1.0, 1.0)]);
        assert_eq!(m.shape(), (0, 1));
        assert!(m.max_per_row().is_empty());
    }
}
