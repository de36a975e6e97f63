// tests/workflows.rs

//! Add, remove, restore, update and set-version workflow behavior.

mod common;

use common::{catalog_server, sample_config, version, version_with_deps, CountingServer};
use depot::{
    AddOptions, AutomationInterface, ConfigStore, Error, FileConfigStore, HeadlessAutomation,
    PackageItem, PackageServerCollection, PackageService, PackageSpec, RestoreOptions,
    SetVersionOptions, UpdateFilter, UpdateOptions,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Workspace {
    _root: TempDir,
    service: PackageService,
    store: Arc<FileConfigStore>,
    automation: Arc<HeadlessAutomation>,
}

fn workspace(
    servers: Vec<depot::SharedServer>,
    config: depot::Configuration,
) -> Workspace {
    common::init_tracing();
    let root = TempDir::new().unwrap();
    let store = Arc::new(FileConfigStore::new(root.path().join("depot.toml")));
    let automation = Arc::new(HeadlessAutomation::new(root.path()));
    let service = PackageService::new(PackageServerCollection::new(servers))
        .with_config(config)
        .with_store(store.clone())
        .with_automation(automation.clone())
        .with_cache_dir(root.path().join("cache"));
    Workspace {
        _root: root,
        service,
        store,
        automation,
    }
}

fn item(name: &str) -> PackageItem {
    PackageItem::new("Plant", "Main", PackageSpec::new(name))
}

#[tokio::test]
async fn test_add_pins_package_and_dependencies_into_config() {
    let server = catalog_server(
        "main",
        &[
            version_with_deps("app", "1.0.0", &["lib"]),
            version("lib", "1.0.0"),
        ],
    );
    let ws = workspace(vec![server], sample_config(&[]));
    let token = CancellationToken::new();

    let added = ws
        .service
        .add_packages(&[item("app")], &AddOptions::default(), &token)
        .await
        .unwrap();
    assert_eq!(added.len(), 2);

    let config = ws.service.config().await;
    assert!(config.has_package("Plant", "Main", "app"));
    assert!(config.has_package("Plant", "Main", "lib"));

    // Both binaries went through install
    assert!(ws.automation.is_package_installed(&added[0]).await);
    assert!(ws.automation.is_package_installed(&added[1]).await);

    // The pinned specification was persisted
    let persisted = ws.store.load().await.unwrap().unwrap();
    let declared = persisted
        .find_plc("Plant", "Main")
        .unwrap()
        .packages
        .iter()
        .find(|p| p.name == "app")
        .unwrap();
    assert_eq!(declared.version.as_deref(), Some("1.0.0"));
}

#[tokio::test]
async fn test_add_without_dependency_references_pins_only_targets() {
    let server = catalog_server(
        "main",
        &[
            version_with_deps("app", "1.0.0", &["lib"]),
            version("lib", "1.0.0"),
        ],
    );
    let ws = workspace(vec![server], sample_config(&[]));
    let token = CancellationToken::new();

    let options = AddOptions {
        include_dependencies: false,
        ..AddOptions::default()
    };
    let added = ws
        .service
        .add_packages(&[item("app")], &options, &token)
        .await
        .unwrap();
    assert_eq!(added.len(), 1);

    let config = ws.service.config().await;
    assert!(config.has_package("Plant", "Main", "app"));
    assert!(!config.has_package("Plant", "Main", "lib"));
}

#[tokio::test]
async fn test_add_with_skip_download_pins_but_never_downloads() {
    let counting = CountingServer::wrap(catalog_server("main", &[version("motion", "1.2.0")]));
    let ws = workspace(vec![counting.clone()], sample_config(&[]));
    let token = CancellationToken::new();

    let options = AddOptions {
        skip_download: true,
        ..AddOptions::default()
    };
    ws.service
        .add_packages(&[item("motion")], &options, &token)
        .await
        .unwrap();

    assert_eq!(counting.download_calls(), 0);
    let persisted = ws.store.load().await.unwrap().unwrap();
    let declared = persisted
        .find_plc("Plant", "Main")
        .unwrap()
        .packages
        .iter()
        .find(|p| p.name == "motion")
        .unwrap();
    assert_eq!(declared.version.as_deref(), Some("1.2.0"));
}

#[tokio::test]
async fn test_add_stages_runtime_licenses_once() {
    let mut licensed = version("motion", "1.0.0");
    licensed.license_binary = Some(b"license blob".to_vec());
    let server = catalog_server("main", &[licensed]);
    let ws = workspace(vec![server], sample_config(&[]));
    let token = CancellationToken::new();

    ws.service
        .add_packages(&[item("motion")], &AddOptions::default(), &token)
        .await
        .unwrap();

    let staged: Vec<_> = std::fs::read_dir(ws.automation.licenses_path().join("acme"))
        .unwrap()
        .collect();
    assert_eq!(staged.len(), 1);

    // A second add finds the artifact by content hash and skips it
    ws.service
        .add_packages(&[item("motion")], &AddOptions::default(), &token)
        .await
        .unwrap();
    let staged: Vec<_> = std::fs::read_dir(ws.automation.licenses_path().join("acme"))
        .unwrap()
        .collect();
    assert_eq!(staged.len(), 1);
}

#[tokio::test]
async fn test_remove_unknown_package_is_validation_error() {
    let server = catalog_server("main", &[version("motion", "1.0.0")]);
    let ws = workspace(vec![server], sample_config(&["motion"]));
    let token = CancellationToken::new();

    let result = ws
        .service
        .remove_packages(&[item("ghost")], false, &token)
        .await;
    assert!(matches!(result, Err(Error::ValidationError(_))));

    // Nothing was touched
    assert!(ws.service.config().await.has_package("Plant", "Main", "motion"));
}

#[tokio::test]
async fn test_remove_drops_package_from_cache_and_persisted_config() {
    let server = catalog_server("main", &[version("motion", "1.0.0")]);
    let ws = workspace(vec![server], sample_config(&["motion"]));
    let token = CancellationToken::new();

    // Warm the used-packages cache first
    let used = ws
        .service
        .retrieve_used_packages(None, false, &[], &token)
        .await
        .unwrap();
    assert_eq!(used.len(), 1);

    ws.service
        .remove_packages(&[item("motion")], true, &token)
        .await
        .unwrap();

    assert!(!ws.service.config().await.has_package("Plant", "Main", "motion"));
    let used = ws
        .service
        .retrieve_used_packages(None, false, &[], &token)
        .await
        .unwrap();
    assert!(used.is_empty());

    // The persisted document does not re-add it on a fresh load
    let persisted = ws.store.load().await.unwrap().unwrap();
    assert!(!persisted.has_package("Plant", "Main", "motion"));
}

#[tokio::test]
async fn test_restore_completes_batch_and_reports_one_aggregate_error() {
    let server = catalog_server(
        "main",
        &[
            version("a", "1.0.0"),
            version("b", "1.0.0"),
            version("c", "1.0.0"),
            version("d", "1.0.0"),
        ],
    );
    let ws = workspace(
        vec![server],
        sample_config(&["a", "b", "c", "d", "ghost"]),
    );
    let token = CancellationToken::new();

    let result = ws
        .service
        .restore_packages(&RestoreOptions::default(), &token)
        .await;

    match result {
        Err(Error::AggregateError { failed, total, .. }) => {
            assert_eq!(failed, 1);
            assert_eq!(total, 5);
        }
        other => panic!("expected aggregate error, got {other:?}"),
    }

    // The other four packages completed regardless of the failure
    let installed = std::fs::read_dir(
        ws.automation.solution_path().join(".libraries").join("acme"),
    )
    .unwrap()
    .count();
    assert_eq!(installed, 4);
}

#[tokio::test]
async fn test_restore_never_downloads_provided_packages() {
    let counting = CountingServer::wrap(catalog_server("main", &[version("vision", "1.0.0")]));
    let mut config = sample_config(&["vision"]);
    // The configuration itself produces a PLC named like the package
    config.projects[0].plcs.push(depot::ConfigPlc {
        name: "vision".to_string(),
        kind: depot::PlcKind::Library,
        ..depot::ConfigPlc::default()
    });

    let ws = workspace(vec![counting.clone()], config);
    let token = CancellationToken::new();

    ws.service
        .restore_packages(&RestoreOptions::default(), &token)
        .await
        .unwrap();

    assert_eq!(
        counting.download_calls(),
        0,
        "self-referenced packages are not downloaded"
    );
}

#[tokio::test]
async fn test_update_moves_to_latest_version() {
    let server = catalog_server(
        "main",
        &[version("motion", "1.0.0"), version("motion", "2.0.0")],
    );
    let mut config = sample_config(&[]);
    config.projects[0].plcs[0].packages.push(depot::ConfigPackage {
        name: "motion".to_string(),
        version: Some("1.0.0".to_string()),
        ..depot::ConfigPackage::default()
    });

    let ws = workspace(vec![server], config);
    let token = CancellationToken::new();

    ws.service
        .update_packages(&UpdateOptions::default(), &token)
        .await
        .unwrap();

    let declared = ws.service.config().await;
    let motion = declared
        .find_plc("Plant", "Main")
        .unwrap()
        .packages
        .iter()
        .find(|p| p.name == "motion")
        .unwrap()
        .clone();
    assert_eq!(motion.version.as_deref(), Some("2.0.0"));
}

#[tokio::test]
async fn test_update_filter_overrides_version() {
    let server = catalog_server(
        "main",
        &[version("motion", "1.0.0"), version("motion", "2.0.0")],
    );
    let mut config = sample_config(&[]);
    config.projects[0].plcs[0].packages.push(depot::ConfigPackage {
        name: "motion".to_string(),
        version: Some("2.0.0".to_string()),
        ..depot::ConfigPackage::default()
    });

    let ws = workspace(vec![server], config);
    let token = CancellationToken::new();

    let options = UpdateOptions {
        filters: vec![UpdateFilter {
            name: Some("motion".to_string()),
            version: Some("1.0.0".to_string()),
            ..UpdateFilter::default()
        }],
        ..UpdateOptions::default()
    };
    ws.service.update_packages(&options, &token).await.unwrap();

    let declared = ws.service.config().await;
    let motion = declared
        .find_plc("Plant", "Main")
        .unwrap()
        .packages
        .iter()
        .find(|p| p.name == "motion")
        .unwrap()
        .clone();
    assert_eq!(motion.version.as_deref(), Some("1.0.0"));
}

fn framework_version(name: &str, ver: &str, framework: &str) -> depot::PackageVersion {
    let mut v = version(name, ver);
    v.framework = Some(framework.to_string());
    v
}

#[tokio::test]
async fn test_set_version_syncs_framework_packages() {
    let server = catalog_server(
        "main",
        &[
            framework_version("motion", "1.0.0", "train"),
            framework_version("motion", "2.0.0", "train"),
        ],
    );
    let mut config = sample_config(&[]);
    config.projects[0].plcs[0].framework = Some("train".to_string());
    config.projects[0].plcs[0].packages.push(depot::ConfigPackage {
        name: "motion".to_string(),
        version: Some("1.0.0".to_string()),
        ..depot::ConfigPackage::default()
    });

    let ws = workspace(vec![server], config);
    let token = CancellationToken::new();

    let options = SetVersionOptions {
        sync_framework_packages: true,
        ..SetVersionOptions::default()
    };
    ws.service
        .set_package_version("2.0.0", &options, &token)
        .await
        .unwrap();

    let config = ws.service.config().await;
    let plc = config.find_plc("Plant", "Main").unwrap();
    assert_eq!(plc.version.as_deref(), Some("2.0.0"));
    let motion = plc.packages.iter().find(|p| p.name == "motion").unwrap();
    assert_eq!(motion.version.as_deref(), Some("2.0.0"));
}

#[tokio::test]
async fn test_set_version_unconfirmed_pin_requires_headless_host() {
    // 9.9.9 exists on no server; the headless host accepts the pin anyway
    let server = catalog_server("main", &[framework_version("motion", "1.0.0", "train")]);
    let mut config = sample_config(&[]);
    config.projects[0].plcs[0].framework = Some("train".to_string());
    config.projects[0].plcs[0].packages.push(depot::ConfigPackage {
        name: "motion".to_string(),
        version: Some("1.0.0".to_string()),
        ..depot::ConfigPackage::default()
    });

    let ws = workspace(vec![server], config);
    let token = CancellationToken::new();

    let options = SetVersionOptions {
        sync_framework_packages: true,
        ..SetVersionOptions::default()
    };
    ws.service
        .set_package_version("9.9.9", &options, &token)
        .await
        .unwrap();

    let config = ws.service.config().await;
    let motion = config
        .find_plc("Plant", "Main")
        .unwrap()
        .packages
        .iter()
        .find(|p| p.name == "motion")
        .unwrap()
        .clone();
    assert_eq!(motion.version.as_deref(), Some("9.9.9"));
}

#[tokio::test]
async fn test_set_version_purge_requires_sync() {
    let server = catalog_server("main", &[version("motion", "1.0.0")]);
    let ws = workspace(vec![server], sample_config(&["motion"]));
    let token = CancellationToken::new();

    let options = SetVersionOptions {
        purge_packages: true,
        ..SetVersionOptions::default()
    };
    let result = ws
        .service
        .set_package_version("2.0.0", &options, &token)
        .await;
    assert!(matches!(result, Err(Error::ValidationError(_))));
}

#[tokio::test]
async fn test_cancelled_workflow_never_persists() {
    let server = catalog_server("main", &[version("motion", "1.0.0")]);
    let ws = workspace(vec![server], sample_config(&[]));

    let token = CancellationToken::new();
    token.cancel();

    let result = ws
        .service
        .add_packages(&[item("motion")], &AddOptions::default(), &token)
        .await;
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(ws.store.load().await.unwrap().is_none());
}
