// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Loading repository settings through the filesystem config store.
#![allow(clippy::unwrap_used)]

use diagram_model::config::REPOSITORY_CONFIG_KEY;
use diagram_model::{
    ConfigService, ConfigStore, FsConfigStore, GraphBasedModelRepository, Element, ElementKind,
    RepositoryConfig, RootModelRepository,
};

#[test]
fn fs_store_round_trips_repository_config() {
    let dir = tempfile::tempdir().unwrap();
    let service = ConfigService::new(FsConfigStore::new(dir.path().join("cfg")).unwrap());

    assert_eq!(
        RepositoryConfig::load(&service).unwrap(),
        RepositoryConfig::default()
    );

    let config = RepositoryConfig {
        replica_id: "tablet".into(),
    };
    config.save(&service).unwrap();
    assert!(dir
        .path()
        .join("cfg")
        .join(format!("{REPOSITORY_CONFIG_KEY}.json"))
        .exists());
    assert_eq!(RepositoryConfig::load(&service).unwrap(), config);
}

#[test]
fn malformed_config_is_reported_as_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsConfigStore::new(dir.path()).unwrap();
    store.write(REPOSITORY_CONFIG_KEY, b"{ not json").unwrap();
    let service = ConfigService::new(store);
    assert!(matches!(
        RepositoryConfig::load(&service),
        Err(diagram_model::ConfigError::Malformed(_))
    ));
}

#[test]
fn configured_replica_id_stamps_local_writes() {
    let dir = tempfile::tempdir().unwrap();
    let service = ConfigService::new(FsConfigStore::new(dir.path()).unwrap());
    RepositoryConfig {
        replica_id: "desk".into(),
    }
    .save(&service)
    .unwrap();

    let repo = RootModelRepository::from_config(&RepositoryConfig::load(&service).unwrap());
    repo.store(&Element::new("a", ElementKind::Point).unwrap(), None)
        .unwrap();
    assert_eq!(repo.replica_id(), "desk");
    assert_eq!(repo.get_version("a").unwrap().get("desk"), 1);
}
