//! Thin layer above [`StorageContext`]: resolves selectors, creates datasets
//! when resolution asks for one and caches contexts so repeated calls share
//! one batch worker per dataset.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use crate::{
    config::ClientConfig,
    context::StorageContext,
    error::ClientError,
    reconciler,
    resolver::{self, DatasetChoice, DatasetSelector, ResolveError},
    transport::Transports,
    types::{Address, Dataset, Provider, TransactionPayload},
};

pub struct StorageManager {
    transports: Transports,
    config: ClientConfig,
    payer: Address,
    contexts: Mutex<HashMap<crate::types::DatasetId, Arc<StorageContext>>>,
}

impl StorageManager {
    pub fn new(transports: Transports, config: ClientConfig, payer: Address) -> Self {
        Self {
            transports,
            config,
            payer,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    pub fn payer(&self) -> &Address {
        &self.payer
    }

    /// Resolve a selector to a ready-to-use context, creating the dataset on
    /// chain if none fits.
    #[tracing::instrument(skip_all, fields(payer = %self.payer))]
    pub async fn context_for(
        &self,
        selector: &DatasetSelector,
    ) -> Result<Arc<StorageContext>, ClientError> {
        let resolution = resolver::resolve(&self.transports, &self.payer, selector).await?;

        let dataset = match resolution.dataset {
            DatasetChoice::Existing(dataset) => dataset,
            DatasetChoice::NeedsCreation => {
                self.create_dataset(&resolution.provider, selector.with_cdn)
                    .await?
            }
        };

        let mut contexts = self.contexts.lock().await;
        let context = contexts
            .entry(dataset.id)
            .or_insert_with(|| {
                Arc::new(StorageContext::new(
                    self.transports.clone(),
                    self.config.clone(),
                    resolution.provider,
                    dataset,
                    self.payer.clone(),
                ))
            })
            .clone();
        Ok(context)
    }

    /// Submit a dataset creation transaction and wait until both the chain
    /// and the provider confirm it.
    async fn create_dataset(
        &self,
        provider: &Provider,
        with_cdn: bool,
    ) -> Result<Dataset, ClientError> {
        let tx = self
            .transports
            .chain
            .submit_transaction(TransactionPayload::CreateDataset {
                payer: self.payer.clone(),
                provider: provider.id,
                with_cdn,
            })
            .await?;
        tracing::debug!(%tx, provider = %provider.id, "submitted dataset creation");

        let (dataset_id, _block) =
            reconciler::await_dataset_creation(&self.transports, &self.config, &tx).await?;

        let dataset = self
            .transports
            .registry
            .dataset(dataset_id)
            .await?
            .ok_or(ClientError::Resolve(ResolveError::UnknownDataset(
                dataset_id,
            )))?;
        tracing::debug!(dataset = %dataset.id, "dataset created");
        Ok(dataset)
    }
}
