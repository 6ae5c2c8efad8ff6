//! The sources of randomness the workers draw from.

use rand::{
    rngs::{
        OsRng,
        StdRng,
    },
    Rng,
    RngCore,
    SeedableRng,
};
use thiserror::Error;

use crate::config::RandomMethod;

#[derive(Error, Debug)]
pub enum RandomError {
    #[error("Can't draw a number from an empty range")]
    EmptyRange,

    #[error("The entropy source failed: {0}")]
    Entropy(#[from] rand::Error),
}

/// What the fuzzing core needs from a random number generator
pub trait RandomGenerator {
    /// Draw a uniformly distributed number from `[0, max)`
    fn range(&mut self, max: u32) -> Result<u32, RandomError>;

    /// Fill `buf` with random bytes
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), RandomError>;

    /// Return `n` random bytes
    fn bytes(&mut self, n: usize) -> Result<Vec<u8>, RandomError> {
        let mut buf = vec![0; n];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    /// A random 64-bit value
    fn next_u64(&mut self) -> Result<u64, RandomError> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }

    /// True with a probability of `1 / n`
    fn one_in(&mut self, n: u32) -> Result<bool, RandomError> {
        Ok(self.range(n)? == 0)
    }
}

pub enum Random {
    Software(StdRng),
    Hardware(OsRng),
}

impl Random {
    pub fn new(method: RandomMethod) -> Result<Self, RandomError> {
        Ok(match method {
            RandomMethod::Software => Random::Software(StdRng::from_rng(OsRng)?),
            RandomMethod::Hardware => Random::Hardware(OsRng),
        })
    }

    /// A reproducible software generator
    pub fn with_seed(seed: u64) -> Self {
        Random::Software(StdRng::seed_from_u64(seed))
    }

    /// Give the software generator a fresh seed.
    /// A forked process must do this or it repeats the draws of its siblings.
    pub fn reseed(&mut self) -> Result<(), RandomError> {
        if let Random::Software(rng) = self {
            *rng = StdRng::from_rng(OsRng)?;
        }

        Ok(())
    }

    pub fn uses_hardware(&self) -> bool {
        matches!(self, Random::Hardware(_))
    }
}

impl RandomGenerator for Random {
    fn range(&mut self, max: u32) -> Result<u32, RandomError> {
        if max == 0 {
            return Err(RandomError::EmptyRange);
        }

        match self {
            Random::Software(rng) => Ok(rng.gen_range(0..max)),
            Random::Hardware(rng) => {
                // Drawn by hand so that a failing entropy source is an error instead of a panic.
                // Draws from the incomplete last block are rejected to keep the result uniform.
                let max = max as u64;
                let limit = (1u64 << 32) - (1u64 << 32) % max;

                loop {
                    let mut buf = [0u8; 4];
                    rng.try_fill_bytes(&mut buf)?;
                    let x = u32::from_ne_bytes(buf) as u64;

                    if x < limit {
                        return Ok((x % max) as u32);
                    }
                }
            },
        }
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<(), RandomError> {
        match self {
            Random::Software(rng) => rng.try_fill_bytes(buf)?,
            Random::Hardware(rng) => rng.try_fill_bytes(buf)?,
        }

        Ok(())
    }
}
