use crate::record::{InstallRecord, MANIFEST_FILE};
use crate::CoreError;
use nah_compose::{compose, HostPlatform, LaunchContract, Platform};
use nah_materialize::{CancelToken, MaterializedNak, Materializer, MaterializerConfig};
use nah_package::{decode, PackageArchive, PackageFormat};
use nah_resolve::{resolve_with_policy, NakCandidate, NakCatalog, ResolvePolicy};
use nah_schema::config::KEY_APPS_ROOT;
use nah_schema::{parse_manifest, validate, AppId, CapabilityRegistry, Manifest, ResolvedConfig};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

const STAGING_DIR: &str = ".staging";

/// An application unpacked under the apps root.
#[derive(Debug, Clone, Serialize)]
pub struct InstalledApp {
    pub app_id: String,
    pub version: String,
    pub root: PathBuf,
    pub files: usize,
    /// NAK pinned at install time, if the app needs one.
    pub nak: Option<NakCandidate>,
}

impl InstalledApp {
    fn from_record(record: InstallRecord, root: PathBuf) -> Self {
        Self {
            app_id: record.app_id.into_inner(),
            version: record.version.to_string(),
            root,
            files: record.files,
            nak: record.nak,
        }
    }
}

/// The nah host: configuration plus the collaborators the pipeline needs.
pub struct Host {
    config: ResolvedConfig,
    registry: CapabilityRegistry,
    catalog: Box<dyn NakCatalog + Send + Sync>,
    policy: ResolvePolicy,
    materializer: Materializer,
    platform: Box<dyn Platform + Send + Sync>,
}

impl Host {
    pub fn new(
        config: ResolvedConfig,
        catalog: Box<dyn NakCatalog + Send + Sync>,
    ) -> Result<Self, CoreError> {
        let materializer = Materializer::new(&MaterializerConfig::from_config(&config)?);
        Ok(Self {
            config,
            registry: CapabilityRegistry::default(),
            catalog,
            policy: ResolvePolicy::default(),
            materializer,
            platform: Box::new(HostPlatform::new()),
        })
    }

    #[must_use]
    pub fn with_platform(mut self, platform: Box<dyn Platform + Send + Sync>) -> Self {
        self.platform = platform;
        self
    }

    #[must_use]
    pub fn with_registry(mut self, registry: CapabilityRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ResolvePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_materializer(mut self, materializer: Materializer) -> Self {
        self.materializer = materializer;
        self
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn materializer(&self) -> &Materializer {
        &self.materializer
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.materializer.cancel_token().clone()
    }

    pub fn apps_root(&self) -> PathBuf {
        self.config
            .get_path(KEY_APPS_ROOT)
            .unwrap_or_else(|| PathBuf::from("/nah/apps"))
    }

    /// Parse and validate manifest bytes.
    pub fn load_manifest_bytes(&self, bytes: &[u8]) -> Result<Manifest, CoreError> {
        let manifest = parse_manifest(bytes)?;
        validate(&manifest, &self.registry)?;
        Ok(manifest)
    }

    pub fn load_manifest(&self, path: &Path) -> Result<Manifest, CoreError> {
        let bytes = fs::read(path)?;
        self.load_manifest_bytes(&bytes)
    }

    pub fn read_package(&self, path: &Path) -> Result<PackageArchive, CoreError> {
        let bytes = fs::read(path)?;
        Ok(decode(&bytes)?)
    }

    /// The validated manifest carried by a NAP archive.
    pub fn manifest_of(&self, archive: &PackageArchive) -> Result<Manifest, CoreError> {
        if archive.format != PackageFormat::Nap {
            return Err(CoreError::WrongPackageFormat {
                expected: PackageFormat::Nap,
                actual: archive.format,
            });
        }
        self.load_manifest_bytes(&archive.manifest_bytes)
    }

    /// Pick the NAK for `manifest`, or `None` when it needs none.
    pub fn resolve(&self, manifest: &Manifest) -> Result<Option<NakCandidate>, CoreError> {
        let Some(req) = &manifest.nak else {
            return Ok(None);
        };
        let candidates = self.catalog.list_candidates(&req.id)?;
        debug!("{} candidate(s) for {}", candidates.len(), req.id);
        Ok(Some(resolve_with_policy(
            &req.version_req,
            &candidates,
            &self.policy,
        )?))
    }

    pub fn materialize(&self, candidate: &NakCandidate) -> Result<MaterializedNak, CoreError> {
        Ok(self.materializer.materialize(candidate)?)
    }

    /// The NAK to launch `manifest` with: the install-time pin while it
    /// still fits, otherwise a fresh resolution.
    pub fn launch_nak(&self, manifest: &Manifest) -> Result<Option<NakCandidate>, CoreError> {
        let root = self.app_root(&manifest.app_id);
        if let Some(record) = InstallRecord::read_optional(&root)? {
            if let Some(pin) = record.pin_for(manifest) {
                debug!("using pinned {}@{} for {}", pin.nak_id, pin.version, manifest.app_id);
                return Ok(Some(pin.clone()));
            }
            if manifest.nak.is_some() {
                warn!(
                    "install record for {} no longer fits its manifest; resolving again",
                    manifest.app_id
                );
            }
        }
        self.resolve(manifest)
    }

    /// Resolve (or reuse the pinned NAK), materialize and compose in one go.
    pub fn contract(&self, manifest: &Manifest) -> Result<LaunchContract, CoreError> {
        let nak = match self.launch_nak(manifest)? {
            Some(candidate) => Some(self.materialize(&candidate)?),
            None => None,
        };
        let contract = compose(manifest, &self.config, self.platform.as_ref(), nak.as_ref())?;
        info!(
            "launch contract for {}@{} ready",
            manifest.app_id, manifest.version
        );
        Ok(contract)
    }

    /// Launch contract for an app installed under the apps root.
    pub fn contract_for_installed(&self, app_id: &str) -> Result<LaunchContract, CoreError> {
        let root = self.installed_root(app_id)?;
        let manifest = self.load_manifest(&root.join(MANIFEST_FILE))?;
        self.contract(&manifest)
    }

    fn app_root(&self, app_id: &AppId) -> PathBuf {
        self.apps_root().join(app_id.as_str())
    }

    fn staging(&self) -> Result<TempDir, CoreError> {
        let staging_root = self.apps_root().join(STAGING_DIR);
        fs::create_dir_all(&staging_root)?;
        Ok(TempDir::new_in(&staging_root)?)
    }

    /// Directory of an installed app. Ids that do not parse can never have
    /// been installed.
    fn installed_root(&self, app_id: &str) -> Result<PathBuf, CoreError> {
        let id = AppId::parse(app_id).map_err(|_| CoreError::AppNotInstalled(app_id.to_owned()))?;
        let root = self.app_root(&id);
        if !root.join(MANIFEST_FILE).is_file() {
            return Err(CoreError::AppNotInstalled(app_id.to_owned()));
        }
        Ok(root)
    }

    /// Unpack a NAP under `<apps_root>/<app_id>`, pinning the NAK it
    /// resolves to now. The app directory appears through one rename of a
    /// fully written staging directory.
    pub fn install_app(&self, archive: &PackageArchive) -> Result<InstalledApp, CoreError> {
        let manifest = self.manifest_of(archive)?;
        let target = self.app_root(&manifest.app_id);
        if target.exists() {
            return Err(CoreError::AppAlreadyInstalled(target));
        }
        let pin = self.resolve(&manifest)?;

        let staging = self.staging()?;
        let staged = staging.path().join("app");
        archive.extract_to(&staged)?;
        fs::write(staged.join(MANIFEST_FILE), manifest.to_bytes()?)?;
        let record = InstallRecord {
            app_id: manifest.app_id.clone(),
            version: manifest.version.clone(),
            installed_at: chrono::Utc::now().to_rfc3339(),
            files: archive.entries.len(),
            nak: pin,
        };
        record.write(&staged)?;

        match fs::rename(&staged, &target) {
            Ok(()) => {}
            Err(_) if target.exists() => return Err(CoreError::AppAlreadyInstalled(target)),
            Err(e) => return Err(CoreError::Io(e)),
        }
        drop(staging);

        info!("installed {} into {}", manifest.app_id, target.display());
        Ok(InstalledApp::from_record(record, target))
    }

    /// Installed apps, sorted by id. Directories without an install record
    /// are skipped.
    pub fn list_apps(&self) -> Result<Vec<InstalledApp>, CoreError> {
        let apps_root = self.apps_root();
        if !apps_root.is_dir() {
            return Ok(Vec::new());
        }
        let mut apps = Vec::new();
        for entry in fs::read_dir(&apps_root)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with('.') || !entry.file_type()?.is_dir() {
                continue;
            }
            let root = entry.path();
            match InstallRecord::read_optional(&root) {
                Ok(Some(record)) => apps.push(InstalledApp::from_record(record, root)),
                Ok(None) => debug!("skipping {}: no install record", root.display()),
                Err(e) => warn!("skipping {}: {e}", root.display()),
            }
        }
        apps.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        Ok(apps)
    }

    /// Remove an installed app. The directory leaves the apps root through
    /// one rename into staging before it is deleted.
    pub fn uninstall_app(&self, app_id: &str) -> Result<InstalledApp, CoreError> {
        let root = self.installed_root(app_id)?;
        let removed = match InstallRecord::read_optional(&root)? {
            Some(record) => InstalledApp::from_record(record, root.clone()),
            None => {
                let manifest = self.load_manifest(&root.join(MANIFEST_FILE))?;
                InstalledApp {
                    app_id: manifest.app_id.into_inner(),
                    version: manifest.version.to_string(),
                    root: root.clone(),
                    files: 0,
                    nak: None,
                }
            }
        };

        let staging = self.staging()?;
        match fs::rename(&root, staging.path().join("app")) {
            Ok(()) => {}
            Err(_) if !root.exists() => return Err(CoreError::AppNotInstalled(app_id.to_owned())),
            Err(e) => return Err(CoreError::Io(e)),
        }
        staging.close()?;

        info!("uninstalled {} from {}", app_id, root.display());
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nah_compose::StaticPlatform;
    use nah_package::{encode, PayloadEntry};
    use nah_resolve::StaticCatalog;
    use nah_schema::{Digest, LoaderSection, NakId, NakProperties, Provenance, Version};

    const APP: &str = r#"
manifest_version = 1

[app]
id = "com.example.app"
version = "1.0.0"
entry = "bin/app"
capabilities = ["filesystem.read"]

[nak]
id = "engine"
version_req = "^1.0.0"
"#;

    fn engine_bytes(version: Version) -> Vec<u8> {
        let mut props = NakProperties::new(NakId::parse("engine").unwrap(), version);
        props.loader = Some(LoaderSection {
            exec: "bin/loader".to_owned(),
            args: vec!["{NAH_APP_ROOT}/{NAH_APP_ENTRY}".to_owned()],
        });
        encode(&PackageArchive::new(
            PackageFormat::Nak,
            props.to_toml_bytes().unwrap(),
            vec![PayloadEntry::new("bin/loader", 0o755, b"#!/bin/sh\n".to_vec())],
        ))
        .unwrap()
    }

    struct Fixture {
        dir: tempfile::TempDir,
        host: Host,
    }

    fn fixture(versions: &[Version]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let host = host_in(dir.path(), versions);
        Fixture { dir, host }
    }

    fn host_in(dir: &Path, versions: &[Version]) -> Host {
        let mut candidates = Vec::new();
        for v in versions {
            let bytes = engine_bytes(v.clone());
            let path = dir.join(format!("engine-{v}.nak"));
            fs::write(&path, &bytes).unwrap();
            candidates.push(NakCandidate {
                nak_id: NakId::parse("engine").unwrap(),
                version: v.clone(),
                source_uri: format!("file:{}", path.display()),
                digest: Digest::of(&bytes),
            });
        }
        let mut config = ResolvedConfig::defaults();
        for (key, sub) in [(KEY_APPS_ROOT, "apps"), ("paths.cache_root", "cache")] {
            config
                .set(
                    key.to_owned(),
                    dir.join(sub).display().to_string(),
                    Provenance::Default,
                )
                .unwrap();
        }
        Host::new(config, Box::new(StaticCatalog::new(candidates)))
            .unwrap()
            .with_platform(Box::new(StaticPlatform::linux_x86_64()))
    }

    fn app_archive(host: &Host) -> PackageArchive {
        let manifest = host.load_manifest_bytes(APP.as_bytes()).unwrap();
        PackageArchive::new(
            PackageFormat::Nap,
            manifest.to_bytes().unwrap(),
            vec![PayloadEntry::new("bin/app", 0o755, b"app".to_vec())],
        )
    }

    #[test]
    fn contract_uses_highest_matching_nak() {
        let f = fixture(&[Version::new(1, 0, 0), Version::new(1, 4, 2), Version::new(2, 0, 0)]);
        let manifest = f.host.load_manifest_bytes(APP.as_bytes()).unwrap();
        let contract = f.host.contract(&manifest).unwrap();
        let nak_root = contract.nak_root.clone().unwrap();
        assert!(nak_root.to_string_lossy().contains("/naks/engine/1.4.2/"));
        assert_eq!(contract.executable_path, nak_root.join("bin/loader"));
        assert_eq!(
            contract.arguments,
            vec![format!("{}/bin/app", f.host.apps_root().join("com.example.app").display())]
        );
    }

    #[test]
    fn unsupported_capability_rejected() {
        let f = fixture(&[]);
        let bad = APP.replace("filesystem.read", "gpu.compute");
        assert!(matches!(
            f.host.load_manifest_bytes(bad.as_bytes()).unwrap_err(),
            CoreError::Manifest(nah_schema::ManifestError::UnsupportedCapability(_))
        ));
        let permissive = CapabilityRegistry::default().with("gpu.compute");
        let host = f.host.with_registry(permissive);
        host.load_manifest_bytes(bad.as_bytes()).unwrap();
    }

    #[test]
    fn no_matching_nak() {
        let f = fixture(&[Version::new(2, 0, 0)]);
        let manifest = f.host.load_manifest_bytes(APP.as_bytes()).unwrap();
        assert!(matches!(
            f.host.contract(&manifest).unwrap_err(),
            CoreError::Resolve(nah_resolve::ResolveError::NoMatch { .. })
        ));
    }

    #[test]
    fn policy_applies_to_resolution() {
        let f = fixture(&[Version::new(1, 0, 0), Version::new(1, 4, 2)]);
        let host = f.host.with_policy(ResolvePolicy {
            allow: Vec::new(),
            deny: vec![nah_schema::VersionRange::parse(">=1.4.0").unwrap()],
        });
        let manifest = host.load_manifest_bytes(APP.as_bytes()).unwrap();
        let chosen = host.resolve(&manifest).unwrap().unwrap();
        assert_eq!(chosen.version, Version::new(1, 0, 0));
    }

    #[test]
    fn install_then_refuse_reinstall() {
        let f = fixture(&[Version::new(1, 0, 0)]);
        let archive = app_archive(&f.host);
        let installed = f.host.install_app(&archive).unwrap();
        assert_eq!(installed.root, f.host.apps_root().join("com.example.app"));
        assert!(installed.root.join("bin/app").is_file());
        assert!(installed.root.join(MANIFEST_FILE).is_file());
        assert!(installed.root.join(crate::record::RECORD_FILE).is_file());
        assert!(matches!(
            f.host.install_app(&archive).unwrap_err(),
            CoreError::AppAlreadyInstalled(_)
        ));
    }

    #[test]
    fn install_without_matching_nak_leaves_nothing() {
        let f = fixture(&[Version::new(2, 0, 0)]);
        assert!(matches!(
            f.host.install_app(&app_archive(&f.host)).unwrap_err(),
            CoreError::Resolve(nah_resolve::ResolveError::NoMatch { .. })
        ));
        assert!(!f.host.apps_root().join("com.example.app").exists());
    }

    #[test]
    fn launch_reuses_install_time_nak() {
        let f = fixture(&[Version::new(1, 0, 0)]);
        let installed = f.host.install_app(&app_archive(&f.host)).unwrap();
        assert_eq!(installed.nak.unwrap().version, Version::new(1, 0, 0));

        // A newer compatible NAK shows up after install.
        let host = host_in(f.dir.path(), &[Version::new(1, 0, 0), Version::new(1, 4, 2)]);
        let manifest = host.load_manifest_bytes(APP.as_bytes()).unwrap();
        assert_eq!(host.resolve(&manifest).unwrap().unwrap().version, Version::new(1, 4, 2));
        assert_eq!(host.launch_nak(&manifest).unwrap().unwrap().version, Version::new(1, 0, 0));

        let contract = host.contract_for_installed("com.example.app").unwrap();
        let nak_root = contract.nak_root.unwrap();
        assert!(nak_root.to_string_lossy().contains("/naks/engine/1.0.0/"));
    }

    #[test]
    fn list_then_uninstall() {
        let f = fixture(&[Version::new(1, 0, 0)]);
        assert!(f.host.list_apps().unwrap().is_empty());
        f.host.install_app(&app_archive(&f.host)).unwrap();
        fs::create_dir_all(f.host.apps_root().join("stray")).unwrap();

        let apps = f.host.list_apps().unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].app_id, "com.example.app");
        assert_eq!(apps[0].version, "1.0.0");
        assert_eq!(apps[0].files, 1);

        let removed = f.host.uninstall_app("com.example.app").unwrap();
        assert_eq!(removed.app_id, "com.example.app");
        assert!(!f.host.apps_root().join("com.example.app").exists());
        assert!(f.host.list_apps().unwrap().is_empty());
        assert!(fs::read_dir(f.host.apps_root().join(STAGING_DIR))
            .unwrap()
            .next()
            .is_none());
    }

    #[test]
    fn uninstall_unknown_app_fails() {
        let f = fixture(&[]);
        fs::create_dir_all(f.dir.path().join("precious")).unwrap();
        for id in ["com.example.missing", "../precious", ".staging"] {
            assert!(matches!(
                f.host.uninstall_app(id).unwrap_err(),
                CoreError::AppNotInstalled(_)
            ));
        }
        assert!(f.dir.path().join("precious").is_dir());
        assert!(matches!(
            f.host.contract_for_installed("com.example.missing").unwrap_err(),
            CoreError::AppNotInstalled(_)
        ));
    }

    #[test]
    fn nak_archive_is_not_an_app() {
        let f = fixture(&[]);
        let archive = decode(&engine_bytes(Version::new(1, 0, 0))).unwrap();
        assert!(matches!(
            f.host.manifest_of(&archive).unwrap_err(),
            CoreError::WrongPackageFormat { .. }
        ));
    }
}
