// src/config/mod.rs

//! Persisted configuration
//!
//! The configuration is a tree of projects, each with PLCs, each declaring
//! the packages it consumes. The client reads this tree to discover used
//! packages and writes resolved concrete versions back after add, update
//! and remove operations. Persistence goes through a [`ConfigStore`].

mod store;

pub use store::{ConfigStore, FileConfigStore};

use crate::model::{PackageOptions, PackageSpec, PackageVersion};
use serde::{Deserialize, Serialize};

/// Root of the persisted project tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<ConfigProject>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigProject {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plcs: Vec<ConfigPlc>,
    /// Legacy module declarations; the client does not support these
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<ConfigModule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigModule {
    pub name: String,
}

/// What kind of artifact a PLC project produces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlcKind {
    #[default]
    Application,
    /// Produces a library other projects may consume as a package
    Library,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigPlc {
    pub name: String,
    #[serde(default)]
    pub kind: PlcKind,
    /// Version of the artifact this PLC itself produces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Release train this PLC belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<ConfigPackage>,
}

/// One declared package: a specification plus install options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigPackage {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distributor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<PackageOptions>,
}

impl ConfigPackage {
    /// Project the declaration into a request specification
    pub fn spec(&self) -> PackageSpec {
        PackageSpec {
            name: self.name.clone(),
            distributor: self.distributor.clone(),
            version: self.version.clone(),
            branch: self.branch.clone(),
            target: self.target.clone(),
            configuration: self.configuration.clone(),
        }
    }

    /// Build a fully pinned declaration from resolved metadata
    pub fn from_version(version: &PackageVersion, options: Option<PackageOptions>) -> Self {
        Self {
            name: version.name.clone(),
            distributor: Some(version.distributor.clone()),
            version: Some(version.version.clone()),
            branch: Some(version.branch.clone()),
            target: Some(version.target.clone()),
            configuration: Some(version.configuration.clone()),
            options,
        }
    }
}

impl Configuration {
    pub fn find_plc(&self, project: &str, plc: &str) -> Option<&ConfigPlc> {
        self.projects
            .iter()
            .find(|p| p.name == project)?
            .plcs
            .iter()
            .find(|p| p.name == plc)
    }

    pub fn find_plc_mut(&mut self, project: &str, plc: &str) -> Option<&mut ConfigPlc> {
        self.projects
            .iter_mut()
            .find(|p| p.name == project)?
            .plcs
            .iter_mut()
            .find(|p| p.name == plc)
    }

    /// Whether any project still declares unsupported modules
    pub fn has_modules(&self) -> bool {
        self.projects.iter().any(|p| !p.modules.is_empty())
    }

    /// Whether a package is produced by a PLC inside this configuration
    pub fn provides(&self, package_name: &str) -> bool {
        self.projects
            .iter()
            .flat_map(|p| &p.plcs)
            .any(|plc| plc.name == package_name)
    }

    pub fn has_package(&self, project: &str, plc: &str, name: &str) -> bool {
        self.find_plc(project, plc)
            .is_some_and(|plc| plc.packages.iter().any(|p| p.name == name))
    }

    /// All declared packages with their consumer context
    pub fn packages(&self) -> impl Iterator<Item = (&ConfigProject, &ConfigPlc, &ConfigPackage)> {
        self.projects.iter().flat_map(|project| {
            project.plcs.iter().flat_map(move |plc| {
                plc.packages
                    .iter()
                    .map(move |package| (project, plc, package))
            })
        })
    }

    /// Replace the declaration with the same name, or append a new one
    ///
    /// Fails if the consumer context does not exist in the tree.
    pub fn upsert_package(
        &mut self,
        project: &str,
        plc: &str,
        package: ConfigPackage,
    ) -> crate::error::Result<()> {
        let plc = self.find_plc_mut(project, plc).ok_or_else(|| {
            crate::error::Error::ValidationError(format!(
                "Unknown consumer context {project}/{plc}"
            ))
        })?;
        match plc.packages.iter_mut().find(|p| p.name == package.name) {
            Some(existing) => *existing = package,
            None => plc.packages.push(package),
        }
        Ok(())
    }

    /// Drop a declaration; returns whether it was present
    pub fn remove_package(&mut self, project: &str, plc: &str, name: &str) -> bool {
        let Some(plc) = self.find_plc_mut(project, plc) else {
            return false;
        };
        let before = plc.packages.len();
        plc.packages.retain(|p| p.name != name);
        plc.packages.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Configuration {
        Configuration {
            solution: Some("Plant.sln".to_string()),
            projects: vec![ConfigProject {
                name: "Plant".to_string(),
                plcs: vec![ConfigPlc {
                    name: "Main".to_string(),
                    kind: PlcKind::Application,
                    version: Some("0.1.0".to_string()),
                    framework: None,
                    packages: vec![ConfigPackage {
                        name: "motion".to_string(),
                        version: Some("1.0.0".to_string()),
                        ..ConfigPackage::default()
                    }],
                }],
                modules: Vec::new(),
            }],
        }
    }

    #[test]
    fn test_spec_projection_roundtrip() {
        let version = PackageVersion {
            name: "motion".to_string(),
            distributor: "acme".to_string(),
            version: "1.2.0".to_string(),
            branch: "main".to_string(),
            target: "TC3.1".to_string(),
            configuration: "Release".to_string(),
            ..PackageVersion::default()
        };
        let declared = ConfigPackage::from_version(&version, None);
        assert_eq!(declared.spec(), version.spec());
    }

    #[test]
    fn test_upsert_replaces_by_name() {
        let mut config = sample();
        let version = PackageVersion {
            name: "motion".to_string(),
            distributor: "acme".to_string(),
            version: "2.0.0".to_string(),
            branch: "main".to_string(),
            target: "TC3.1".to_string(),
            configuration: "Release".to_string(),
            ..PackageVersion::default()
        };
        config
            .upsert_package("Plant", "Main", ConfigPackage::from_version(&version, None))
            .unwrap();

        let plc = config.find_plc("Plant", "Main").unwrap();
        assert_eq!(plc.packages.len(), 1);
        assert_eq!(plc.packages[0].version.as_deref(), Some("2.0.0"));

        config
            .upsert_package(
                "Plant",
                "Main",
                ConfigPackage {
                    name: "vision".to_string(),
                    ..ConfigPackage::default()
                },
            )
            .unwrap();
        assert_eq!(config.find_plc("Plant", "Main").unwrap().packages.len(), 2);
    }

    #[test]
    fn test_upsert_unknown_context_fails() {
        let mut config = sample();
        let result = config.upsert_package("Nowhere", "Main", ConfigPackage::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_remove_package() {
        let mut config = sample();
        assert!(config.remove_package("Plant", "Main", "motion"));
        assert!(!config.remove_package("Plant", "Main", "motion"));
        assert!(!config.has_package("Plant", "Main", "motion"));
    }

    #[test]
    fn test_provides_detects_self_references() {
        let mut config = sample();
        assert!(!config.provides("motion"));
        config.projects[0].plcs.push(ConfigPlc {
            name: "motion".to_string(),
            kind: PlcKind::Library,
            ..ConfigPlc::default()
        });
        assert!(config.provides("motion"));
    }

    #[test]
    fn test_packages_iterates_all_contexts() {
        let config = sample();
        let declared: Vec<_> = config
            .packages()
            .map(|(project, plc, package)| {
                (project.name.as_str(), plc.name.as_str(), package.name.as_str())
            })
            .collect();
        assert_eq!(declared, vec![("Plant", "Main", "motion")]);
    }
}
