//! Read fault injection
//!
//! The arena asks its [`FaultInjector`] before every raw read whether that
//! read should fail as a transient error. Writes are never affected.
//! Strategies are injected at arena construction so failure scenarios are
//! reproducible.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use vdisk_common::{EngineConfig, FaultMode, PhysicalBlockId};

use crate::error::BlockResult;

/// Decides whether a physical read fails transiently
pub trait FaultInjector: Send + Sync + fmt::Debug {
    /// Return true to fail this read of `id`
    fn should_fail_read(&self, id: PhysicalBlockId) -> bool;
}

/// Reads never fail
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn should_fail_read(&self, _id: PhysicalBlockId) -> bool {
        false
    }
}

/// Each read fails independently with a fixed probability
pub struct RandomFaults {
    probability: f64,
    rng: Mutex<StdRng>,
}

impl RandomFaults {
    /// Create a seeded random fault source
    ///
    /// # Panics
    ///
    /// Panics if `probability` is outside `[0, 1]`.
    #[must_use]
    pub fn new(probability: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&probability),
            "Fault probability must be within [0, 1]"
        );
        Self {
            probability,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Failure probability per read
    #[must_use]
    pub fn probability(&self) -> f64 {
        self.probability
    }
}

impl fmt::Debug for RandomFaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomFaults")
            .field("probability", &self.probability)
            .finish_non_exhaustive()
    }
}

impl FaultInjector for RandomFaults {
    fn should_fail_read(&self, _id: PhysicalBlockId) -> bool {
        self.rng.lock().gen_bool(self.probability)
    }
}

/// Every read of one physical block fails
#[derive(Debug, Clone, Copy)]
pub struct FailBlock(pub PhysicalBlockId);

impl FaultInjector for FailBlock {
    fn should_fail_read(&self, id: PhysicalBlockId) -> bool {
        id == self.0
    }
}

/// The next read of one physical block fails, later reads succeed
#[derive(Debug)]
pub struct FailOnce {
    target: PhysicalBlockId,
    fired: AtomicBool,
}

impl FailOnce {
    #[must_use]
    pub fn new(target: PhysicalBlockId) -> Self {
        Self {
            target,
            fired: AtomicBool::new(false),
        }
    }

    /// Whether the failure has been delivered
    #[must_use]
    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl FaultInjector for FailOnce {
    fn should_fail_read(&self, id: PhysicalBlockId) -> bool {
        id == self.target && !self.fired.swap(true, Ordering::AcqRel)
    }
}

/// Build the fault strategy of a validated engine configuration
pub fn from_config(config: &EngineConfig) -> BlockResult<Box<dyn FaultInjector>> {
    config.validate()?;
    let faults = &config.faults;
    Ok(match faults.mode {
        FaultMode::None => Box::new(NoFaults),
        FaultMode::Random => Box::new(RandomFaults::new(
            faults.read_error_probability,
            faults.seed,
        )),
        FaultMode::FailBlock => {
            let id = faults.block.ok_or_else(|| {
                vdisk_common::Error::configuration("faults.block is required in fail_block mode")
            })?;
            Box::new(FailBlock(PhysicalBlockId::new(id)?))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> PhysicalBlockId {
        PhysicalBlockId::new(n).unwrap()
    }

    #[test]
    fn test_random_faults_are_reproducible() {
        let a = RandomFaults::new(0.3, 42);
        let b = RandomFaults::new(0.3, 42);
        let run_a: Vec<bool> = (0..200).map(|_| a.should_fail_read(id(1))).collect();
        let run_b: Vec<bool> = (0..200).map(|_| b.should_fail_read(id(1))).collect();
        assert_eq!(run_a, run_b);
        assert!(run_a.iter().any(|&f| f));
        assert!(run_a.iter().any(|&f| !f));
    }

    #[test]
    fn test_random_faults_extremes() {
        let never = RandomFaults::new(0.0, 1);
        let always = RandomFaults::new(1.0, 1);
        for _ in 0..50 {
            assert!(!never.should_fail_read(id(3)));
            assert!(always.should_fail_read(id(3)));
        }
    }

    #[test]
    fn test_fail_block_targets_one_id() {
        let faults = FailBlock(id(5));
        assert!(faults.should_fail_read(id(5)));
        assert!(faults.should_fail_read(id(5)));
        assert!(!faults.should_fail_read(id(6)));
    }

    #[test]
    fn test_fail_once_heals() {
        let faults = FailOnce::new(id(2));
        assert!(!faults.should_fail_read(id(1)));
        assert!(!faults.fired());
        assert!(faults.should_fail_read(id(2)));
        assert!(faults.fired());
        assert!(!faults.should_fail_read(id(2)));
    }

    #[test]
    fn test_from_config() {
        let mut config = EngineConfig::default();
        assert!(!from_config(&config).unwrap().should_fail_read(id(1)));

        config.faults.mode = FaultMode::FailBlock;
        assert!(from_config(&config).is_err());
        config.faults.block = Some(9);
        let faults = from_config(&config).unwrap();
        assert!(faults.should_fail_read(id(9)));
        config.faults.block = Some(501);
        assert!(from_config(&config).is_err());

        config.faults.mode = FaultMode::Random;
        config.faults.read_error_probability = 2.0;
        assert!(matches!(
            from_config(&config),
            Err(crate::error::BlockError::Config(_))
        ));
    }
}
