//! The simulated state variable: a pair of risk factors.
//!
//! Every validator derives the same exact factors and then adds its own
//! bounded noise, standing in for the rounding differences a real numeric
//! model shows across machines. With noise under the tolerance the
//! committee always agrees; with more it has to search for a candidate.

use std::sync::{Arc, Mutex, PoisonError};

use floatvar_core::{CalculationHandle, ConversionError, Converter};
use floatvar_types::{KeyValueBundle, Value};
use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive as _;
use tokio::task::JoinHandle;

use crate::config::RiskConfig;

/// Name of the state variable within its market.
pub const NAME: &str = "risk_factors";

/// Decimal places of the simulated noise.
const NOISE_SCALE: u32 = 6;

/// Noise units per whole unit, `10^NOISE_SCALE`.
const NOISE_UNITS_PER_ONE: i64 = 1_000_000;

/// Short and long risk factors of a market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskFactors {
    /// Factor applied to short positions.
    pub short: Decimal,
    /// Factor applied to long positions.
    pub long: Decimal,
}

/// Encodes [`RiskFactors`] as two scalars sharing one tolerance.
#[derive(Debug, Clone)]
pub struct RiskFactorConverter {
    tolerance: Decimal,
}

impl RiskFactorConverter {
    /// Converter comparing both factors with `tolerance`.
    pub const fn new(tolerance: Decimal) -> Self {
        Self { tolerance }
    }
}

impl Converter for RiskFactorConverter {
    type Native = RiskFactors;

    fn to_bundle(&self, native: &RiskFactors) -> KeyValueBundle {
        KeyValueBundle::new()
            .with("short", Value::Scalar(native.short), self.tolerance)
            .with("long", Value::Scalar(native.long), self.tolerance)
    }

    fn from_bundle(&self, bundle: &KeyValueBundle) -> Result<RiskFactors, ConversionError> {
        Ok(RiskFactors {
            short: scalar(bundle, "short")?,
            long: scalar(bundle, "long")?,
        })
    }
}

fn scalar(bundle: &KeyValueBundle, key: &str) -> Result<Decimal, ConversionError> {
    match bundle.get(key).map(|entry| &entry.value) {
        Some(Value::Scalar(value)) => Ok(*value),
        Some(other) => Err(ConversionError::WrongKind {
            key: key.to_owned(),
            expected: "scalar",
            found: other.kind(),
        }),
        None => Err(ConversionError::MissingKey {
            key: key.to_owned(),
        }),
    }
}

/// One validator's risk model: exact factors plus seeded noise.
#[derive(Debug)]
pub struct NoisyRiskModel {
    base: RiskFactors,
    max_noise_units: i64,
    rng: Mutex<StdRng>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl NoisyRiskModel {
    /// Model for the validator seeded with `seed`, recording its
    /// calculation tasks in `tasks`.
    pub fn new(config: &RiskConfig, seed: u64, tasks: Arc<Mutex<Vec<JoinHandle<()>>>>) -> Self {
        let max_noise_units = config
            .jitter
            .checked_mul(Decimal::from(NOISE_UNITS_PER_ONE))
            .and_then(|units| units.trunc().to_i64())
            .unwrap_or_default();
        Self {
            base: RiskFactors {
                short: config.base_short,
                long: config.base_long,
            },
            max_noise_units,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            tasks,
        }
    }

    /// Start the calculation for an event on the runtime.
    pub fn start(&self, handle: CalculationHandle<RiskFactors>) {
        let factors = RiskFactors {
            short: self.base.short.saturating_add(self.noise()),
            long: self.base.long.saturating_add(self.noise()),
        };
        let task = handle.spawn(async move {
            tokio::task::yield_now().await;
            Ok(factors)
        });
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    fn noise(&self) -> Decimal {
        if self.max_noise_units == 0 {
            return Decimal::ZERO;
        }
        let units = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random_range(self.max_noise_units.saturating_neg()..=self.max_noise_units);
        Decimal::new(units, NOISE_SCALE)
    }
}
