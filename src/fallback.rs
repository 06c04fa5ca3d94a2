//! Fallback Resolver: Mobile slots borrow the Desktop asset of their group.
//!
//! Runs once after every pipeline of the run has settled. A Mobile reference
//! qualifies only when its fetch failed; validation and conversion failures
//! are not network problems and stay failed. The Desktop candidate must be
//! in the same group and have a file on disk.
//!
//! The Mobile slot is pointed at the Desktop file; nothing is stored under
//! the Mobile key. The link lives in the store index until the next run, and
//! the manifest binds the Mobile aliases to the Desktop public path.

use crate::store::{AssetOutcome, AssetStatus, FailureStage, Store, StoreError};
use crate::types::{AssetReference, FallbackLink, Role, StorageKey, StoredAsset};
use std::collections::HashMap;
use std::fmt::Display;

/// Substitute Desktop assets for Mobile references that failed to fetch.
///
/// `substitute` records that the Desktop file serves the Mobile reference and
/// returns the file now serving it. Outcomes that were served are updated in
/// place.
pub fn resolve_fallbacks<F, E>(outcomes: &mut [AssetOutcome], mut substitute: F) -> Vec<FallbackLink>
where
    F: FnMut(&AssetReference, &StoredAsset) -> Result<StoredAsset, E>,
    E: Display,
{
    let desktops: HashMap<String, (AssetReference, StorageKey, StoredAsset)> = outcomes
        .iter()
        .filter(|o| o.reference.role == Some(Role::Desktop))
        .filter_map(|o| {
            let group = o.reference.group.clone()?;
            let stored = o.stored.clone()?;
            Some((group, (o.reference.clone(), o.key.clone(), stored)))
        })
        .collect();

    let mut links = Vec::new();
    for outcome in outcomes.iter_mut() {
        if outcome.reference.role != Some(Role::Mobile)
            || outcome.failed_at() != Some(FailureStage::Fetch)
        {
            continue;
        }
        let Some(group) = outcome.reference.group.as_deref() else {
            continue;
        };
        let Some((desktop, desktop_key, desktop_asset)) = desktops.get(group) else {
            continue;
        };

        match substitute(&outcome.reference, desktop_asset) {
            Ok(stored) => {
                tracing::info!(
                    group,
                    mobile = %outcome.reference.locator,
                    desktop = %desktop.locator,
                    "serving mobile slot with desktop asset"
                );
                outcome.status = AssetStatus::Substituted {
                    from: desktop_key.clone(),
                };
                outcome.stored = Some(stored);
                links.push(FallbackLink {
                    primary: outcome.reference.clone(),
                    substitute: desktop.clone(),
                });
            }
            Err(e) => tracing::warn!(
                group,
                mobile = %outcome.reference.locator,
                "fallback not recorded: {e}"
            ),
        }
    }
    links
}

/// [`resolve_fallbacks`] against a [`Store`].
pub fn apply(store: &Store, outcomes: &mut [AssetOutcome]) -> Vec<FallbackLink> {
    resolve_fallbacks(outcomes, |primary, source| -> Result<StoredAsset, StoreError> {
        store.substitute(primary, source)
    })
}
