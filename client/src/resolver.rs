//! Resolution of a payer's request onto a provider and a dataset.
//!
//! Selector precedence, first match wins: explicit dataset id, explicit
//! provider id, explicit provider address, automatic selection.

use std::collections::HashSet;

use rand::seq::SliceRandom;

use crate::{
    transport::{TransportError, Transports},
    types::{Address, Dataset, DatasetId, Provider, ProviderId},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("dataset {0} is not registered")]
    UnknownDataset(DatasetId),
    #[error("provider {0} is not in the approved set")]
    NotApproved(String),
    #[error(
        "dataset {dataset} belongs to provider {actual}, not the requested provider {requested}"
    )]
    ProviderMismatch {
        dataset: DatasetId,
        actual: ProviderId,
        requested: ProviderId,
    },
    #[error("no healthy provider available, {failed} probe(s) failed")]
    NoHealthyProvider { failed: usize },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Caller-supplied constraints on where a piece should land.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetSelector {
    pub dataset_id: Option<DatasetId>,
    pub provider_id: Option<ProviderId>,
    pub provider_address: Option<Address>,
    pub with_cdn: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetChoice {
    Existing(Dataset),
    /// No suitable dataset exists yet; the caller has to create one with the
    /// resolved provider.
    NeedsCreation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub provider: Provider,
    pub dataset: DatasetChoice,
}

/// Resolve the provider and dataset a payer's pieces should be appended to.
#[tracing::instrument(skip_all, fields(payer = %payer))]
pub async fn resolve(
    transports: &Transports,
    payer: &Address,
    selector: &DatasetSelector,
) -> Result<Resolution, ResolveError> {
    let approved = transports.registry.approved_providers().await?;

    if let Some(dataset_id) = selector.dataset_id {
        return resolve_explicit_dataset(transports, &approved, dataset_id, selector).await;
    }

    if let Some(provider_id) = selector.provider_id {
        let provider = approved
            .iter()
            .find(|provider| provider.id == provider_id && provider.active)
            .cloned()
            .ok_or_else(|| ResolveError::NotApproved(provider_id.to_string()))?;
        return resolve_for_provider(transports, payer, provider, selector.with_cdn).await;
    }

    if let Some(provider_address) = &selector.provider_address {
        let provider = approved
            .iter()
            .find(|provider| provider.address == *provider_address && provider.active)
            .cloned()
            .ok_or_else(|| ResolveError::NotApproved(provider_address.to_string()))?;
        return resolve_for_provider(transports, payer, provider, selector.with_cdn).await;
    }

    resolve_automatic(transports, &approved, payer, selector.with_cdn).await
}

async fn resolve_explicit_dataset(
    transports: &Transports,
    approved: &[Provider],
    dataset_id: DatasetId,
    selector: &DatasetSelector,
) -> Result<Resolution, ResolveError> {
    let dataset = transports
        .registry
        .dataset(dataset_id)
        .await?
        .ok_or(ResolveError::UnknownDataset(dataset_id))?;

    let provider = approved
        .iter()
        .find(|provider| provider.id == dataset.provider)
        .cloned()
        .ok_or_else(|| ResolveError::NotApproved(dataset.provider.to_string()))?;

    // A provider selector given alongside an explicit dataset id must agree
    // with the dataset's actual owner.
    if let Some(requested) = selector.provider_id {
        if requested != dataset.provider {
            return Err(ResolveError::ProviderMismatch {
                dataset: dataset_id,
                actual: dataset.provider,
                requested,
            });
        }
    }
    if let Some(requested_address) = &selector.provider_address {
        if *requested_address != provider.address {
            let requested = approved
                .iter()
                .find(|candidate| candidate.address == *requested_address)
                .map(|candidate| candidate.id)
                .ok_or_else(|| ResolveError::NotApproved(requested_address.to_string()))?;
            return Err(ResolveError::ProviderMismatch {
                dataset: dataset_id,
                actual: dataset.provider,
                requested,
            });
        }
    }

    Ok(Resolution {
        provider,
        dataset: DatasetChoice::Existing(dataset),
    })
}

async fn resolve_for_provider(
    transports: &Transports,
    payer: &Address,
    provider: Provider,
    with_cdn: bool,
) -> Result<Resolution, ResolveError> {
    let mut candidates = usable_datasets(transports, payer, with_cdn).await?;
    candidates.retain(|dataset| dataset.provider == provider.id);

    Ok(match pick_dataset(candidates) {
        Some(dataset) => Resolution {
            provider,
            dataset: DatasetChoice::Existing(dataset),
        },
        None => Resolution {
            provider,
            dataset: DatasetChoice::NeedsCreation,
        },
    })
}

async fn resolve_automatic(
    transports: &Transports,
    approved: &[Provider],
    payer: &Address,
    with_cdn: bool,
) -> Result<Resolution, ResolveError> {
    let candidates = usable_datasets(transports, payer, with_cdn).await?;

    if let Some(dataset) = pick_dataset(candidates) {
        let provider = approved
            .iter()
            .find(|provider| provider.id == dataset.provider)
            .cloned()
            .ok_or_else(|| ResolveError::NotApproved(dataset.provider.to_string()))?;
        tracing::debug!(dataset = %dataset.id, provider = %provider.id, "reusing dataset");
        return Ok(Resolution {
            provider,
            dataset: DatasetChoice::Existing(dataset),
        });
    }

    // No dataset to reuse: probe the approved providers in random order and
    // take the first healthy one.
    let mut candidates: Vec<Provider> = approved
        .iter()
        .filter(|provider| provider.active)
        .cloned()
        .collect();
    candidates.shuffle(&mut rand::thread_rng());

    let mut seen = HashSet::new();
    let mut unhealthy = HashSet::new();
    for provider in candidates {
        if !seen.insert(provider.id) || unhealthy.contains(&provider.id) {
            continue;
        }
        match transports.probe.ping(&provider).await {
            Ok(()) => {
                tracing::debug!(provider = %provider.id, "selected healthy provider");
                return Ok(Resolution {
                    provider,
                    dataset: DatasetChoice::NeedsCreation,
                });
            }
            Err(err) => {
                tracing::warn!(provider = %provider.id, %err, "provider failed health probe");
                unhealthy.insert(provider.id);
            }
        }
    }

    Err(ResolveError::NoHealthyProvider {
        failed: unhealthy.len(),
    })
}

/// Datasets of the payer this deployment may append to.
async fn usable_datasets(
    transports: &Transports,
    payer: &Address,
    with_cdn: bool,
) -> Result<Vec<Dataset>, ResolveError> {
    let mut datasets = transports.registry.datasets_of(payer).await?;
    datasets.retain(|dataset| dataset.live && dataset.managed && dataset.with_cdn == with_cdn);
    Ok(datasets)
}

/// Prefer a dataset that already holds pieces, tie-break towards the oldest.
fn pick_dataset(mut candidates: Vec<Dataset>) -> Option<Dataset> {
    candidates.sort_by_key(|dataset| (dataset.piece_count == 0, dataset.id));
    candidates.into_iter().next()
}
