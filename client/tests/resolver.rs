//! Selector precedence, dataset reuse and the health-probed fallback.

mod common;

use dataset_client::{
    resolver, Address, DatasetChoice, DatasetId, DatasetSelector, ProviderId, ResolveError,
};

use common::{dataset, payer, provider, FakeNet, NetState};

fn two_provider_state() -> NetState {
    let payer = payer();
    let mut state = NetState {
        providers: vec![provider(1), provider(2)],
        ..NetState::default()
    };
    state
        .datasets
        .insert(DatasetId::new(1), dataset(1, 1, &payer, 5));
    state
        .datasets
        .insert(DatasetId::new(2), dataset(2, 2, &payer, 0));
    state
}

#[tokio::test]
async fn explicit_dataset_id_wins() {
    let net = FakeNet::new(two_provider_state());
    let transports = net.transports();

    let selector = DatasetSelector {
        dataset_id: Some(DatasetId::new(2)),
        ..DatasetSelector::default()
    };
    let resolution = resolver::resolve(&transports, &payer(), &selector)
        .await
        .unwrap();

    assert_eq!(resolution.provider.id, ProviderId::new(2));
    match resolution.dataset {
        DatasetChoice::Existing(dataset) => assert_eq!(dataset.id, DatasetId::new(2)),
        DatasetChoice::NeedsCreation => panic!("dataset 2 exists"),
    }
}

#[tokio::test]
async fn unknown_dataset_id_is_an_error() {
    let net = FakeNet::new(two_provider_state());
    let transports = net.transports();

    let selector = DatasetSelector {
        dataset_id: Some(DatasetId::new(99)),
        ..DatasetSelector::default()
    };
    let outcome = resolver::resolve(&transports, &payer(), &selector).await;

    assert_eq!(
        outcome.unwrap_err(),
        ResolveError::UnknownDataset(DatasetId::new(99))
    );
}

#[tokio::test]
async fn dataset_and_provider_selectors_must_agree() {
    let net = FakeNet::new(two_provider_state());
    let transports = net.transports();

    let selector = DatasetSelector {
        dataset_id: Some(DatasetId::new(1)),
        provider_id: Some(ProviderId::new(2)),
        ..DatasetSelector::default()
    };
    let outcome = resolver::resolve(&transports, &payer(), &selector).await;

    assert_eq!(
        outcome.unwrap_err(),
        ResolveError::ProviderMismatch {
            dataset: DatasetId::new(1),
            actual: ProviderId::new(1),
            requested: ProviderId::new(2),
        }
    );
}

#[tokio::test]
async fn provider_address_selects_that_provider() {
    let net = FakeNet::new(two_provider_state());
    let transports = net.transports();

    let selector = DatasetSelector {
        provider_address: Some(Address::new("0xprovider2")),
        ..DatasetSelector::default()
    };
    let resolution = resolver::resolve(&transports, &payer(), &selector)
        .await
        .unwrap();

    assert_eq!(resolution.provider.id, ProviderId::new(2));
    match resolution.dataset {
        DatasetChoice::Existing(dataset) => assert_eq!(dataset.id, DatasetId::new(2)),
        DatasetChoice::NeedsCreation => panic!("provider 2 has dataset 2"),
    }
}

#[tokio::test]
async fn unapproved_provider_is_rejected() {
    let net = FakeNet::new(two_provider_state());
    let transports = net.transports();

    let selector = DatasetSelector {
        provider_id: Some(ProviderId::new(9)),
        ..DatasetSelector::default()
    };
    let outcome = resolver::resolve(&transports, &payer(), &selector).await;

    assert!(matches!(outcome, Err(ResolveError::NotApproved(_))));
}

#[tokio::test]
async fn automatic_selection_prefers_populated_datasets() {
    let net = FakeNet::new(two_provider_state());
    let transports = net.transports();

    let resolution = resolver::resolve(&transports, &payer(), &DatasetSelector::default())
        .await
        .unwrap();

    // Dataset 1 holds 5 pieces, dataset 2 none.
    assert_eq!(resolution.provider.id, ProviderId::new(1));
    match resolution.dataset {
        DatasetChoice::Existing(dataset) => assert_eq!(dataset.id, DatasetId::new(1)),
        DatasetChoice::NeedsCreation => panic!("reusable datasets exist"),
    }
}

#[tokio::test]
async fn another_payers_datasets_are_not_reused() {
    let mut state = two_provider_state();
    for dataset in state.datasets.values_mut() {
        dataset.payer = Address::new("0xsomeone-else");
    }
    let net = FakeNet::new(state);
    let transports = net.transports();

    let resolution = resolver::resolve(&transports, &payer(), &DatasetSelector::default())
        .await
        .unwrap();

    assert_eq!(resolution.dataset, DatasetChoice::NeedsCreation);
}

#[tokio::test]
async fn fallback_skips_unhealthy_providers() {
    let mut state = two_provider_state();
    state.datasets.clear();
    state.unhealthy.insert(ProviderId::new(1));
    let net = FakeNet::new(state);
    let transports = net.transports();

    let resolution = resolver::resolve(&transports, &payer(), &DatasetSelector::default())
        .await
        .unwrap();

    assert_eq!(resolution.provider.id, ProviderId::new(2));
    assert_eq!(resolution.dataset, DatasetChoice::NeedsCreation);
}

#[tokio::test]
async fn all_providers_unhealthy_is_an_error() {
    let mut state = two_provider_state();
    state.datasets.clear();
    state.unhealthy.insert(ProviderId::new(1));
    state.unhealthy.insert(ProviderId::new(2));
    let net = FakeNet::new(state);
    let transports = net.transports();

    let outcome = resolver::resolve(&transports, &payer(), &DatasetSelector::default()).await;

    assert_eq!(
        outcome.unwrap_err(),
        ResolveError::NoHealthyProvider { failed: 2 }
    );
}

#[tokio::test]
async fn inactive_providers_are_never_picked() {
    let mut state = two_provider_state();
    state.datasets.clear();
    state.providers[0].active = false;
    let net = FakeNet::new(state);
    let transports = net.transports();

    let resolution = resolver::resolve(&transports, &payer(), &DatasetSelector::default())
        .await
        .unwrap();

    assert_eq!(resolution.provider.id, ProviderId::new(2));
}

#[tokio::test]
async fn cdn_selector_partitions_datasets() {
    let mut state = two_provider_state();
    state
        .datasets
        .get_mut(&DatasetId::new(1))
        .unwrap()
        .with_cdn = true;
    let net = FakeNet::new(state);
    let transports = net.transports();

    let selector = DatasetSelector {
        with_cdn: true,
        ..DatasetSelector::default()
    };
    let resolution = resolver::resolve(&transports, &payer(), &selector)
        .await
        .unwrap();

    match resolution.dataset {
        DatasetChoice::Existing(dataset) => {
            assert_eq!(dataset.id, DatasetId::new(1));
            assert!(dataset.with_cdn);
        }
        DatasetChoice::NeedsCreation => panic!("a cdn dataset exists"),
    }
}
