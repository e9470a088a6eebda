//! Upgrade path planning
//!
//! Some versions cannot be reached directly. `available_upgrade_paths` maps
//! a target version to the ordered chain of versions an upgrade must pass
//! through; the installed version has to be on that chain, and every later
//! entry is installed in turn before the target itself. A chain that lists
//! a version twice has no well-defined route and is rejected.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Target version -> ordered chain of versions leading up to it
pub type UpgradePaths = BTreeMap<String, Vec<String>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpgradePathError {
    #[error("no upgrade path from {installed} to {requested}")]
    NoPath { installed: String, requested: String },

    #[error("upgrade path to {requested} lists version {version} more than once")]
    RepeatedVersion { requested: String, version: String },
}

/// Every version to install, in order, to get from `installed` to `requested`
///
/// Empty when nothing needs to change.
pub fn upgrade_route(
    paths: &UpgradePaths,
    installed: Option<&str>,
    requested: &str,
) -> Result<Vec<String>, UpgradePathError> {
    let Some(installed) = installed else {
        return Ok(vec![requested.to_string()]);
    };
    if installed == requested {
        return Ok(Vec::new());
    }

    let Some(chain) = paths.get(requested) else {
        return Ok(vec![requested.to_string()]);
    };

    let mut seen = BTreeSet::new();
    if let Some(repeated) = chain.iter().find(|v| !seen.insert(v.as_str())) {
        return Err(UpgradePathError::RepeatedVersion {
            requested: requested.to_string(),
            version: repeated.clone(),
        });
    }

    let position = chain
        .iter()
        .position(|v| v == installed)
        .ok_or_else(|| UpgradePathError::NoPath {
            installed: installed.to_string(),
            requested: requested.to_string(),
        })?;

    let mut route: Vec<String> = chain[position + 1..]
        .iter()
        .filter(|v| v.as_str() != requested)
        .cloned()
        .collect();
    route.push(requested.to_string());
    Ok(route)
}

/// The version the next install cycle should converge to
pub fn next_version(
    paths: &UpgradePaths,
    installed: Option<&str>,
    requested: &str,
) -> Result<Option<String>, UpgradePathError> {
    Ok(upgrade_route(paths, installed, requested)?.into_iter().next())
}
