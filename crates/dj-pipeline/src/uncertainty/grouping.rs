//! Grouping strategies for the uncertainty breakdown.
//!
//! Two strategies are built in:
//! - `by_source`: one group per source.
//! - `combined`: background, jet and tracking related sources.
//!
//! Further strategies come from the run configuration.

use std::collections::BTreeMap;

use dj_core::{Error, Result, UncertaintySource};
use serde::Serialize;

use crate::config::GroupConfig;

/// Strategy with one group per source.
pub const BY_SOURCE: &str = "by_source";
/// Strategy with background, jet and tracking groups.
pub const COMBINED: &str = "combined";

/// Named set of sources combined in quadrature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    /// Key.
    pub name: String,
    /// Label.
    pub display: String,
    /// Members.
    pub sources: Vec<UncertaintySource>,
}

impl From<&GroupConfig> for Group {
    fn from(g: &GroupConfig) -> Self {
        Self {
            name: g.name.clone(),
            display: g.display.clone().unwrap_or_else(|| g.name.clone()),
            sources: g.sources.clone(),
        }
    }
}

/// True for names of built-in strategies.
pub fn is_builtin(name: &str) -> bool {
    name == BY_SOURCE || name == COMBINED
}

fn group(name: &str, display: &str, sources: &[UncertaintySource]) -> Group {
    Group { name: name.into(), display: display.into(), sources: sources.to_vec() }
}

/// Groups of a built-in strategy.
pub fn builtin(name: &str) -> Option<Vec<Group>> {
    use UncertaintySource::*;
    match name {
        BY_SOURCE => Some(UncertaintySource::SOURCES.iter().map(|s| group(s.name(), s.name(), &[*s])).collect()),
        COMBINED => Some(vec![
            group(
                "background",
                "Background",
                &[BackgroundFluctuation, BackgroundSubtraction, PairAcceptance],
            ),
            group("jet", "Jet reconstruction", &[JetEnergyScale, JetResolution, FragmentationBias]),
            group(
                "tracking",
                "Tracking",
                &[TrackingEfficiency, ResidualTracking, TrackingDeltaR, TriggerEfficiency],
            ),
        ]),
        _ => None,
    }
}

/// Groups of the strategy `name`, built-in or configured.
pub fn resolve(name: &str, configured: &BTreeMap<String, Vec<GroupConfig>>) -> Result<Vec<Group>> {
    if let Some(groups) = builtin(name) {
        return Ok(groups);
    }
    let groups = configured.get(name).ok_or_else(|| {
        let mut known: Vec<&str> = vec![BY_SOURCE, COMBINED];
        known.extend(configured.keys().map(String::as_str));
        Error::Configuration(format!(
            "unknown grouping strategy '{name}' (known: {})",
            known.join(", ")
        ))
    })?;
    if let Some(g) = groups.iter().find(|g| g.sources.contains(&UncertaintySource::Total)) {
        return Err(Error::Configuration(format!("group '{}' cannot contain the total", g.name)));
    }
    Ok(groups.iter().map(Group::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_every_source_once() {
        for name in [BY_SOURCE, COMBINED] {
            let groups = builtin(name).unwrap();
            let mut all: Vec<UncertaintySource> = groups.iter().flat_map(|g| g.sources.clone()).collect();
            all.sort();
            assert_eq!(all, UncertaintySource::SOURCES.to_vec(), "{name}");
        }
    }

    #[test]
    fn configured_strategy_resolves() {
        let mut configured = BTreeMap::new();
        configured.insert(
            "two".to_string(),
            vec![GroupConfig {
                name: "bkg".into(),
                display: None,
                sources: vec![UncertaintySource::PairAcceptance],
            }],
        );
        let groups = resolve("two", &configured).unwrap();
        assert_eq!(groups[0].display, "bkg");
        assert!(matches!(resolve("three", &configured), Err(Error::Configuration(_))));
    }
}
