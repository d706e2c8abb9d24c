// sprout-core/src/install/mod.rs
//! The per-request install state machine.
//!
//! `Selecting → Fetching → Verifying → Unpacking → Placing → Linking →
//! TestingSmoke → Done`. Every stage is logged and broadcast as an
//! [`InstallEvent`]; a failure is reported with the stage it happened in.
//! Installs of one package name are serialized by a file lock held for the
//! whole request.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use sprout_aio::checksum::{sha256_hex, verify_bytes};
use sprout_aio::fs::remove_dir_if_empty;
use sprout_aio::lock::PackageLock;
use sprout_common::config::Config;
use sprout_common::error::{Result, SproutError};
use sprout_common::model::artifact::{InstallReceipt, InstalledPackage};
use sprout_common::model::manifest::{Artifact, ManifestRecord};
use sprout_common::model::platform::Platform;
use sprout_common::pipeline::{InstallEvent, InstallOptions, InstallStage};
use sprout_net::http::{fetch_with_retry, ArtifactFetcher, RetryPolicy};
use sprout_net::validation::url_file_name;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

pub mod dependency;
mod link;
mod place;
pub mod smoke;
pub mod unpack;

pub use dependency::{DependencyProbe, SystemDependencyProbe};
pub use smoke::run_smoke_test;
pub use unpack::{ArchiveUnpacker, DefaultUnpacker};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Result of the smoke test that follows a successful link.
#[derive(Debug, Clone)]
pub enum SmokeStatus {
    Passed,
    Skipped,
    /// The package is installed and linked but did not run cleanly.
    Failed(SproutError),
}

#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub package: InstalledPackage,
    pub smoke: SmokeStatus,
}

impl InstallOutcome {
    /// Installed, but the smoke test failed.
    pub fn is_degraded(&self) -> bool {
        matches!(self.smoke, SmokeStatus::Failed(_))
    }

    pub fn smoke_error(&self) -> Option<&SproutError> {
        match &self.smoke {
            SmokeStatus::Failed(e) => Some(e),
            _ => None,
        }
    }
}

pub struct Installer<F> {
    config: Config,
    platform: Platform,
    fetcher: F,
    retry: RetryPolicy,
    probe: Arc<dyn DependencyProbe>,
    unpacker: Arc<dyn ArchiveUnpacker>,
    event_tx: broadcast::Sender<InstallEvent>,
}

impl<F: ArtifactFetcher> Installer<F> {
    pub fn new(config: Config, platform: Platform, fetcher: F) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            retry: RetryPolicy::from_config(&config),
            probe: Arc::new(SystemDependencyProbe::new(&config)),
            unpacker: Arc::new(DefaultUnpacker),
            config,
            platform,
            fetcher,
            event_tx,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_dependency_probe(mut self, probe: impl DependencyProbe + 'static) -> Self {
        self.probe = Arc::new(probe);
        self
    }

    pub fn with_unpacker(mut self, unpacker: impl ArchiveUnpacker) -> Self {
        self.unpacker = Arc::new(unpacker);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InstallEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Installs one manifest version.
    ///
    /// Errors carry the failing stage (see [`SproutError::stage`]). A failed
    /// smoke test is not an error: the outcome is returned as degraded.
    /// Dropping the returned future leaves the previous install untouched;
    /// a new call starts over from Selecting.
    #[instrument(skip_all, fields(target = %manifest.id()))]
    pub async fn install(
        &self,
        manifest: &ManifestRecord,
        options: &InstallOptions,
    ) -> Result<InstallOutcome> {
        let target_id = manifest.id();
        let lock_path = self.config.package_lock_path(manifest.name());

        let result = match PackageLock::acquire(&lock_path).await {
            Ok(_lock) => {
                let formula_dir = self.config.formula_cellar_dir(manifest.name());
                let first_attempt = formula_dir.symlink_metadata().is_err();
                let result = self.run_stages(manifest, options, &target_id).await;
                if result.is_err() && first_attempt {
                    // Staging and payloads are gone by now; drop the empty shell.
                    if let Err(e) = remove_dir_if_empty(&formula_dir) {
                        warn!("Failed to remove {}: {}", formula_dir.display(), e);
                    }
                }
                result
            }
            Err(e) => Err(e.at_stage(InstallStage::Selecting)),
        };

        match &result {
            Ok(outcome) => {
                let _ = self.event_tx.send(InstallEvent::InstallFinished {
                    target_id: target_id.clone(),
                    install_root: outcome.package.install_root.clone(),
                    degraded: outcome.is_degraded(),
                });
            }
            Err(e) => {
                let stage = e.stage().unwrap_or(InstallStage::Selecting);
                warn!("{} failed during {}: {}", target_id, stage, e.root_cause());
                let _ = self.event_tx.send(InstallEvent::InstallFailed {
                    target_id: target_id.clone(),
                    stage,
                    error: e.root_cause().to_string(),
                });
            }
        }
        result
    }

    async fn run_stages(
        &self,
        manifest: &ManifestRecord,
        options: &InstallOptions,
        target_id: &str,
    ) -> Result<InstallOutcome> {
        self.enter(target_id, InstallStage::Selecting);
        let artifact = self
            .select(manifest, options)
            .map_err(|e| e.at_stage(InstallStage::Selecting))?;
        info!(
            "Installing {} from {} ({})",
            target_id,
            artifact.kind,
            url_file_name(&artifact.url).unwrap_or_else(|| artifact.url.clone())
        );

        self.enter(target_id, InstallStage::Fetching);
        let bytes = fetch_with_retry(&self.fetcher, &artifact.url, &self.retry, |attempt, err| {
            let _ = self.event_tx.send(InstallEvent::FetchRetry {
                target_id: target_id.to_string(),
                url: artifact.url.clone(),
                attempt,
                error: err.to_string(),
            });
        })
        .await
        .map_err(|e| e.at_stage(InstallStage::Fetching))?;

        self.enter(target_id, InstallStage::Verifying);
        verify_bytes(&bytes, &artifact.sha256).map_err(|e| e.at_stage(InstallStage::Verifying))?;

        self.enter(target_id, InstallStage::Unpacking);
        let receipt = self.receipt(manifest, &artifact, &bytes);
        let staging = unpack::stage_payload(
            Arc::clone(&self.unpacker),
            bytes,
            artifact.clone(),
            manifest.clone(),
            receipt,
            self.config.formula_cellar_dir(manifest.name()),
        )
        .await
        .map_err(|e| e.at_stage(InstallStage::Unpacking))?;

        // No await from here until the link is in place: once placement
        // starts, it either completes or is rolled back within this call.
        self.enter(target_id, InstallStage::Placing);
        let placement = place::place_payload(staging, &self.config, manifest)
            .map_err(|e| e.at_stage(InstallStage::Placing))?;

        self.enter(target_id, InstallStage::Linking);
        let bin_link = match link::link_entry_point(&self.config, manifest, &placement.install_root)
        {
            Ok(bin_link) => bin_link,
            Err(e) => {
                placement.rollback();
                return Err(e.at_stage(InstallStage::Linking));
            }
        };
        let install_root = placement.install_root.clone();
        placement.commit();

        let package = InstalledPackage {
            name: manifest.name().to_string(),
            version: manifest.version().to_string(),
            install_root,
            executable_symlink: bin_link.link,
            entry_point: bin_link.target,
            artifact: artifact.kind,
        };

        let smoke = if options.skip_smoke_test {
            debug!("{}: smoke test skipped", target_id);
            SmokeStatus::Skipped
        } else {
            self.enter(target_id, InstallStage::TestingSmoke);
            let timeout = Duration::from_secs(manifest.smoke_timeout_secs());
            match run_smoke_test(&package.executable_symlink, &manifest.smoke_args(), timeout).await
            {
                Ok(_) => SmokeStatus::Passed,
                Err(e) => {
                    warn!("{} installed but its smoke test failed: {}", target_id, e);
                    SmokeStatus::Failed(e.at_stage(InstallStage::TestingSmoke))
                }
            }
        };

        self.enter(target_id, InstallStage::Done);
        info!(
            "Installed {} at {}",
            target_id,
            package.install_root.display()
        );
        Ok(InstallOutcome { package, smoke })
    }

    fn select(&self, manifest: &ManifestRecord, options: &InstallOptions) -> Result<Artifact> {
        let artifact = manifest.select_artifact(&self.platform, options.force_source)?;
        if let Some(dependency) = manifest.required_dependency(&self.platform) {
            debug!(
                "{} requires {} on {}",
                manifest.id(),
                dependency,
                self.platform.platform_id()
            );
            if !self.probe.is_available(dependency) {
                return Err(SproutError::MissingDependency {
                    package: manifest.name().to_string(),
                    dependency: dependency.to_string(),
                });
            }
        }
        Ok(artifact)
    }

    fn receipt(&self, manifest: &ManifestRecord, artifact: &Artifact, bytes: &[u8]) -> InstallReceipt {
        InstallReceipt {
            name: manifest.name().to_string(),
            version: manifest.version().to_string(),
            artifact: artifact.kind.clone(),
            source_url: artifact.url.clone(),
            sha256: sha256_hex(bytes),
            platform: self.platform.platform_id(),
            installed_at: humantime::format_rfc3339_seconds(SystemTime::now()).to_string(),
        }
    }

    fn enter(&self, target_id: &str, stage: InstallStage) {
        debug!("{}: entering {}", target_id, stage);
        let _ = self.event_tx.send(InstallEvent::StageEntered {
            target_id: target_id.to_string(),
            stage,
        });
    }
}
