use crate::configuration::Configuration;
use crate::level::Level;
use crate::option::{ConfigOption, SpaceError};
use crate::order::PartialOrder;
use crate::tool::Tool;
use rand::Rng;
use std::sync::Arc;

/// A `Mutator` derives new configurations from a seed configuration.
///
/// # Type Parameters
/// * `R`: The type of random number generator used for mutation decisions.
pub trait Mutator<R: Rng + ?Sized> {
    /// Produces the mutants of `seed` that exercise `order`.
    ///
    /// Every returned configuration differs from `seed` in exactly the option
    /// of `order` and names it as its option under investigation.
    fn mutate(
        &mut self,
        seed: &Configuration,
        order: &PartialOrder,
        rng: &mut R,
    ) -> Result<Vec<Configuration>, SpaceError>;
}

/// Mutates a seed to each side of a partial order: one mutant with the
/// option fixed to `left`, one fixed to `right`.
///
/// Sentinel levels of integer options are replaced by a value drawn
/// uniformly from the option's range. A mutant that would leave the seed's
/// level unchanged is skipped.
#[derive(Debug, Clone)]
pub struct PartialOrderMutator {
    tool: Arc<Tool>,
}

impl PartialOrderMutator {
    pub fn new(tool: Arc<Tool>) -> Self {
        Self { tool }
    }

    fn concretize<R: Rng + ?Sized>(
        option: &ConfigOption,
        level: &Level,
        rng: &mut R,
    ) -> Result<Level, SpaceError> {
        if !level.is_sentinel() {
            return Ok(level.clone());
        }
        let value = option
            .sample_value(rng)
            .ok_or_else(|| SpaceError::UnregisteredLevel {
                option: option.name.clone(),
                level: level.level_name.clone(),
            })?;
        Ok(Level::new(option.name.clone(), value.to_string()))
    }
}

impl<R: Rng + ?Sized> Mutator<R> for PartialOrderMutator {
    fn mutate(
        &mut self,
        seed: &Configuration,
        order: &PartialOrder,
        rng: &mut R,
    ) -> Result<Vec<Configuration>, SpaceError> {
        let option = self.tool.get_option(&order.option_name)?;
        let current = seed.get(&option.name);
        let mut mutants: Vec<Configuration> = Vec::with_capacity(2);
        for side in [&order.left, &order.right] {
            let level = Self::concretize(option, side, rng)?;
            if current == Some(&level) {
                continue;
            }
            let mutant = seed.mutated(level);
            if !mutants.contains(&mutant) {
                mutants.push(mutant);
            }
        }
        Ok(mutants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::OrderType;
    use crate::tool::tests::sample_tool;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    fn order_of(tool: &Tool, option: &str, order_type: OrderType) -> PartialOrder {
        tool.partial_orders()
            .into_iter()
            .find(|o| o.option_name == option && o.order_type == order_type)
            .expect("order should be declared")
    }

    #[test]
    fn enum_order_produces_both_sides_minus_the_seed_value() {
        let tool = Arc::new(sample_tool());
        let mut mutator = PartialOrderMutator::new(tool.clone());
        let mut rng = ChaCha8Rng::from_seed([0; 32]);
        let seed = Configuration::default_for(&tool).unwrap();

        // CHA MST RTA: the seed already sits at CHA.
        let order = tool
            .partial_orders()
            .into_iter()
            .find(|o| o.left.level_name == "CHA")
            .unwrap();
        let mutants = mutator.mutate(&seed, &order, &mut rng).unwrap();
        assert_eq!(mutants.len(), 1);
        assert_eq!(mutants[0].get("cg").unwrap().level_name, "RTA");
        assert_eq!(mutants[0].option_under_investigation.as_deref(), Some("cg"));
        assert_eq!(mutants[0].differing_options(&seed), vec!["cg"]);
    }

    #[test]
    fn integer_sentinels_are_sampled_within_range() {
        let tool = Arc::new(sample_tool());
        let mut mutator = PartialOrderMutator::new(tool.clone());
        let mut rng = ChaCha8Rng::from_seed([9; 32]);
        let seed = Configuration::default_for(&tool).unwrap();
        let order = order_of(&tool, "k", OrderType::MorePreciseThan);

        for _ in 0..30 {
            let mutants = mutator.mutate(&seed, &order, &mut rng).unwrap();
            assert!(mutants.len() <= 2);
            for mutant in mutants {
                let value = mutant.get("k").unwrap().as_int().expect("concrete value");
                assert!((0..=5).contains(&value));
                assert_ne!(value, 0, "mutant equal to the seed must be skipped");
            }
        }
    }

    #[test]
    fn literal_integer_levels_are_used_verbatim() {
        let artifact = r#"{"name": "t", "options": [{
            "name": "depth", "type": "integer", "minValue": 0, "maxValue": 9, "default": 1,
            "orders": [{"order": "MST", "left": 0, "right": 3}]
        }]}"#;
        let tool = Arc::new(Tool::from_json(artifact).unwrap());
        let mut mutator = PartialOrderMutator::new(tool.clone());
        let mut rng = ChaCha8Rng::from_seed([2; 32]);
        let seed = Configuration::default_for(&tool).unwrap();
        let order = order_of(&tool, "depth", OrderType::MoreSoundThan);

        let values: Vec<String> = mutator
            .mutate(&seed, &order, &mut rng)
            .unwrap()
            .iter()
            .map(|m| m.get("depth").unwrap().level_name.clone())
            .collect();
        assert_eq!(values, vec!["0".to_string(), "3".to_string()]);
    }
}
