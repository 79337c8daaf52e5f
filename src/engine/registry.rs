use std::collections::BTreeMap;
use std::path::Path;

use crate::core::error::ConfigError;
use crate::core::params::CalcSpec;
use crate::engine::analytic::{AnaPot, AnalyticCalculator, MullerBrown};
use crate::engine::evaluator::Calculator;
use crate::engine::external::ExternalCalculator;

/// Per-image information available to a calculator factory.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub image: usize,
    pub out_dir: &'a Path,
}

pub type CalculatorFactory =
    Box<dyn Fn(&CalcSpec, BuildContext<'_>) -> Result<Box<dyn Calculator>, ConfigError> + Send + Sync>;

/// Maps calculator keys to factories.
///
/// Passed explicitly into path construction; nothing in the optimizer knows
/// which concrete calculators exist.
pub struct CalculatorRegistry {
    factories: BTreeMap<String, CalculatorFactory>,
}

impl CalculatorRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// `anapot`, `mullerbrown` and `external`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("anapot", |_, _| {
            Ok(Box::new(AnalyticCalculator::new(AnaPot)) as Box<dyn Calculator>)
        });
        registry.register("mullerbrown", |_, _| {
            Ok(Box::new(AnalyticCalculator::new(MullerBrown)) as Box<dyn Calculator>)
        });
        registry.register("external", |spec, ctx| {
            let program = spec
                .option_str("program")
                .ok_or_else(|| ConfigError::invalid("calc.program", "required for 'external'"))?;
            let args = spec.option_strings("args");
            Ok(Box::new(ExternalCalculator::new(program, &args, ctx.image, ctx.out_dir))
                as Box<dyn Calculator>)
        });
        registry
    }

    pub fn register<F>(&mut self, key: &str, factory: F)
    where
        F: Fn(&CalcSpec, BuildContext<'_>) -> Result<Box<dyn Calculator>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(key.to_ascii_lowercase(), Box::new(factory));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(&key.to_ascii_lowercase())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn build(
        &self,
        spec: &CalcSpec,
        ctx: BuildContext<'_>,
    ) -> Result<Box<dyn Calculator>, ConfigError> {
        let factory = self
            .factories
            .get(&spec.kind.to_ascii_lowercase())
            .ok_or_else(|| ConfigError::UnknownCalculator(spec.kind.clone()))?;
        factory(spec, ctx)
    }
}

impl Default for CalculatorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
