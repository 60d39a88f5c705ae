use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument};

use crate::core::downloader::ArtifactRef;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::java::required_java_for_minecraft_version;

use super::catalog::{Catalog, CatalogVariant, split_id};

const DEFAULT_MODS_DIR: &str = "mods";

/// A catalog entry pinned down for one launch. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerVariant {
    pub id: String,
    pub artifact: ArtifactRef,
    pub java_major: u32,
    pub jvm_args: Vec<String>,
    pub server_args: Vec<String>,
    pub mods_dir: String,
}

impl ServerVariant {
    fn from_entry(entry: &CatalogVariant) -> Self {
        let java_major = entry
            .java_major
            .unwrap_or_else(|| required_java_for_minecraft_version(split_id(&entry.id).1));
        Self {
            id: entry.id.clone(),
            artifact: entry.artifact.clone(),
            java_major,
            jvm_args: entry.jvm_args.clone(),
            server_args: entry.server_args.clone(),
            mods_dir: entry
                .mods_dir
                .clone()
                .unwrap_or_else(|| DEFAULT_MODS_DIR.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModRef {
    pub id: String,
    pub artifact: ArtifactRef,
}

/// Ordered set of mods staged next to the server jar. No duplicate ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModSet(Vec<ModRef>);

impl ModSet {
    pub fn new(mods: Vec<ModRef>) -> LauncherResult<Self> {
        let mut seen = HashSet::new();
        for m in &mods {
            if !seen.insert(m.id.as_str()) {
                return Err(LauncherError::DuplicateMod(m.id.clone()));
            }
        }
        Ok(Self(mods))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ModRef> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.0.iter().map(|m| m.id.clone()).collect()
    }
}

/// Split the comma-separated `mods` build parameter. Blank entries are dropped.
pub fn parse_mod_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Maps requested identifiers onto catalog entries. Lookup only.
#[derive(Debug, Clone)]
pub struct VariantResolver {
    catalog: Arc<Catalog>,
}

impl VariantResolver {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[instrument(skip(self))]
    pub fn resolve(
        &self,
        requested: &str,
        mod_refs: &[String],
    ) -> LauncherResult<(ServerVariant, ModSet)> {
        let variant = self.resolve_variant(requested)?;
        let mods = self.resolve_mods(mod_refs)?;
        debug!(
            "Resolved {} -> {} (java {}, {} mods)",
            requested,
            variant.id,
            variant.java_major,
            mods.len()
        );
        Ok((variant, mods))
    }

    pub fn resolve_variant(&self, requested: &str) -> LauncherResult<ServerVariant> {
        let requested = requested.trim();
        if requested.is_empty() {
            return Err(LauncherError::UnknownVariant(requested.to_string()));
        }

        let exact: Vec<&CatalogVariant> = self
            .catalog
            .variants
            .iter()
            .filter(|v| v.names().any(|name| name == requested))
            .collect();

        let candidates = if exact.is_empty() && !requested.contains('/') {
            self.catalog
                .variants
                .iter()
                .filter(|v| v.names().any(|name| split_id(name).1 == requested))
                .collect()
        } else {
            exact
        };

        match candidates.as_slice() {
            [] => Err(LauncherError::UnknownVariant(requested.to_string())),
            [single] => Ok(ServerVariant::from_entry(single)),
            many => Err(LauncherError::AmbiguousVariant {
                requested: requested.to_string(),
                candidates: many.iter().map(|v| v.id.clone()).collect(),
            }),
        }
    }

    pub fn resolve_mods(&self, mod_refs: &[String]) -> LauncherResult<ModSet> {
        let mut mods = Vec::with_capacity(mod_refs.len());
        for reference in mod_refs {
            let reference = reference.trim();
            if reference.is_empty() {
                continue;
            }
            mods.push(self.resolve_mod(reference)?);
        }
        ModSet::new(mods)
    }

    fn resolve_mod(&self, reference: &str) -> LauncherResult<ModRef> {
        if let Some(entry) = self.catalog.find_mod(reference) {
            return Ok(ModRef {
                id: entry.id.clone(),
                artifact: entry.artifact.clone(),
            });
        }

        let artifact = if reference.starts_with("http://") || reference.starts_with("https://") {
            ArtifactRef::Remote {
                url: reference.to_string(),
                sha1: None,
            }
        } else if Path::new(reference).extension().and_then(|e| e.to_str()) == Some("jar") {
            ArtifactRef::Local {
                path: reference.into(),
            }
        } else {
            return Err(LauncherError::UnknownVariant(format!("mod '{reference}'")));
        };

        let id = artifact
            .file_name()
            .as_deref()
            .map(|name| name.strip_suffix(".jar").unwrap_or(name).to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| LauncherError::UnknownVariant(format!("mod '{reference}'")))?;

        Ok(ModRef { id, artifact })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::variant::catalog::CatalogMod;

    fn entry(id: &str, aliases: &[&str]) -> CatalogVariant {
        CatalogVariant {
            id: id.into(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            artifact: ArtifactRef::Local {
                path: format!("/opt/jars/{}.jar", id.replace('/', "-")).into(),
            },
            java_major: None,
            jvm_args: Vec::new(),
            server_args: vec!["nogui".into()],
            mods_dir: None,
        }
    }

    fn resolver() -> VariantResolver {
        let catalog = Catalog::new(
            vec![
                entry("vanilla/1.20.4", &["vanilla/latest"]),
                entry("vanilla/1.16.5", &[]),
                entry("modded/foo", &["modded/latest"]),
                entry("paper/1.20.4", &[]),
            ],
            vec![CatalogMod {
                id: "lithium".into(),
                artifact: ArtifactRef::Local {
                    path: "/opt/mods/lithium-0.11.jar".into(),
                },
            }],
        )
        .unwrap();
        VariantResolver::new(Arc::new(catalog))
    }

    #[test]
    fn every_known_id_and_alias_resolves_uniquely() {
        let resolver = resolver();
        for (requested, expected) in [
            ("vanilla/latest", "vanilla/1.20.4"),
            ("vanilla/1.20.4", "vanilla/1.20.4"),
            ("vanilla/1.16.5", "vanilla/1.16.5"),
            ("modded/foo", "modded/foo"),
            ("modded/latest", "modded/foo"),
            ("paper/1.20.4", "paper/1.20.4"),
            ("foo", "modded/foo"),
            ("  vanilla/latest ", "vanilla/1.20.4"),
        ] {
            let variant = resolver.resolve_variant(requested).unwrap();
            assert_eq!(variant.id, expected, "requested {requested}");
        }
    }

    #[test]
    fn unknown_identifiers_fail() {
        let resolver = resolver();
        for requested in ["", "vanilla/9.9", "forge/1.20.4", "nope", "vanilla"] {
            let err = resolver.resolve_variant(requested).unwrap_err();
            assert!(
                matches!(err, LauncherError::UnknownVariant(_)),
                "{requested}: {err:?}"
            );
        }
    }

    #[test]
    fn bare_name_matching_several_distributions_is_ambiguous() {
        let resolver = resolver();
        match resolver.resolve_variant("1.20.4").unwrap_err() {
            LauncherError::AmbiguousVariant { candidates, .. } => {
                assert_eq!(candidates, vec!["vanilla/1.20.4", "paper/1.20.4"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            resolver.resolve_variant("latest"),
            Err(LauncherError::AmbiguousVariant { .. })
        ));
    }

    #[test]
    fn alias_claimed_twice_is_ambiguous() {
        let catalog = Catalog::new(
            vec![
                entry("vanilla/1.20.4", &["vanilla/latest"]),
                entry("vanilla/1.20.6", &["vanilla/latest"]),
            ],
            vec![],
        )
        .unwrap();
        let resolver = VariantResolver::new(Arc::new(catalog));
        assert!(matches!(
            resolver.resolve_variant("vanilla/latest"),
            Err(LauncherError::AmbiguousVariant { .. })
        ));
    }

    #[test]
    fn java_major_derived_from_version_name() {
        let resolver = resolver();
        assert_eq!(resolver.resolve_variant("vanilla/latest").unwrap().java_major, 17);
        assert_eq!(resolver.resolve_variant("vanilla/1.16.5").unwrap().java_major, 8);
    }

    #[test]
    fn resolves_catalog_and_adhoc_mods_in_order() {
        let resolver = resolver();
        let (variant, mods) = resolver
            .resolve(
                "modded/foo",
                &parse_mod_list("lithium, /srv/extra/ferritecore.jar,,https://cdn.example.com/krypton.jar"),
            )
            .unwrap();
        assert_eq!(variant.mods_dir, "mods");
        assert_eq!(mods.ids(), vec!["lithium", "ferritecore", "krypton"]);
    }

    #[test]
    fn duplicate_and_unknown_mods_are_rejected() {
        let resolver = resolver();
        assert!(matches!(
            resolver.resolve_mods(&parse_mod_list("lithium,lithium")),
            Err(LauncherError::DuplicateMod(id)) if id == "lithium"
        ));
        assert!(matches!(
            resolver.resolve_mods(&["sodium".to_string()]),
            Err(LauncherError::UnknownVariant(_))
        ));
    }

    #[test]
    fn empty_mod_list_is_default() {
        assert!(parse_mod_list("").is_empty());
        assert!(parse_mod_list(" , ").is_empty());
        assert!(resolver().resolve_mods(&[]).unwrap().is_empty());
    }
}
