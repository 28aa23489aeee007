use std::collections::VecDeque;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

enum Step {
    Detect(Vec<Detection>),
    Fail(String),
}

/// Replays a fixed per-frame script, one step per `detect` call.
///
/// Once the script runs out, every further call returns the fallback set
/// (empty unless set with [`ScriptedBackend::otherwise`]).
#[derive(Default)]
pub struct ScriptedBackend {
    steps: VecDeque<Step>,
    fallback: Vec<Detection>,
    calls: u64,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next call returns `detections`.
    pub fn then(mut self, detections: Vec<Detection>) -> Self {
        self.steps.push_back(Step::Detect(detections));
        self
    }

    /// Next `frames` calls return `detections`.
    pub fn then_repeat(mut self, detections: Vec<Detection>, frames: usize) -> Self {
        for _ in 0..frames {
            self.steps.push_back(Step::Detect(detections.clone()));
        }
        self
    }

    /// Next call fails with `message`.
    pub fn then_fail(mut self, message: &str) -> Self {
        self.steps.push_back(Step::Fail(message.to_string()));
        self
    }

    pub fn otherwise(mut self, detections: Vec<Detection>) -> Self {
        self.fallback = detections;
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<Detection>> {
        self.calls += 1;
        match self.steps.pop_front() {
            Some(Step::Detect(detections)) => Ok(detections),
            Some(Step::Fail(message)) => Err(anyhow!("{}", message)),
            None => Ok(self.fallback.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ObjectClass;
    use crate::geometry::BoundingBox;

    #[test]
    fn replays_steps_then_falls_back() -> Result<()> {
        let car = Detection::new(
            BoundingBox::new(0.0, 0.0, 10.0, 10.0)?,
            ObjectClass::Car,
            0.9,
        );
        let mut backend = ScriptedBackend::new()
            .then(vec![car.clone()])
            .then_fail("model crashed")
            .then_repeat(vec![], 2)
            .otherwise(vec![car.clone(), car.clone()]);

        assert_eq!(backend.detect(&[], 1, 1)?.len(), 1);
        let err = backend.detect(&[], 1, 1).unwrap_err();
        assert!(format!("{err}").contains("model crashed"));
        assert!(backend.detect(&[], 1, 1)?.is_empty());
        assert!(backend.detect(&[], 1, 1)?.is_empty());
        assert_eq!(backend.remaining(), 0);
        assert_eq!(backend.detect(&[], 1, 1)?.len(), 2);
        assert_eq!(backend.calls(), 5);
        Ok(())
    }
}
