// sprout/src/cli/install.rs
use std::sync::Arc;

use clap::Args;
use colored::Colorize;
use futures::future::join_all;
use sprout_common::config::Config;
use sprout_common::error::{Result, SproutError};
use sprout_common::formulary::Formulary;
use sprout_common::model::manifest::ManifestRecord;
use sprout_common::pipeline::InstallOptions;
use sprout_core::install::{InstallOutcome, Installer};
use sprout_net::http::HttpFetcher;
use tracing::{debug, instrument};

use crate::cli::status::spawn_status_printer;
use crate::cli::{resolve_platform, CommandStatus};

#[derive(Debug, Args)]
pub struct InstallArgs {
    /// Package names, `name@version` identifiers or manifest file paths
    #[arg(required = true)]
    pub names: Vec<String>,

    #[arg(
        long,
        help = "Install from the source archive even if a bottle is available"
    )]
    pub build_from_source: bool,

    #[arg(long, help = "Do not run the installed executable afterwards")]
    pub skip_test: bool,

    /// Platform to select artifacts for, e.g. `arm64_sonoma` or `macos:10.6:x86_64`
    #[arg(long, env = "SPROUT_PLATFORM")]
    pub platform: Option<String>,
}

impl InstallArgs {
    #[instrument(skip(self, config), fields(targets = ?self.names))]
    pub async fn run(&self, config: &Config) -> Result<CommandStatus> {
        let formulary = Formulary::new(config);
        let manifests: Vec<Arc<ManifestRecord>> = self
            .names
            .iter()
            .map(|name| formulary.load(name))
            .collect::<Result<_>>()?;

        let platform = resolve_platform(self.platform.as_deref())?;
        debug!("Installing for platform {}", platform.platform_id());
        let options = InstallOptions {
            force_source: self.build_from_source,
            skip_smoke_test: self.skip_test,
        };

        let installer = Installer::new(config.clone(), platform, HttpFetcher::new(config)?);
        let printer = spawn_status_printer(installer.subscribe());

        // Different packages install concurrently; the installer serializes
        // repeats of the same name.
        let results = join_all(
            manifests
                .iter()
                .map(|manifest| installer.install(manifest, &options)),
        )
        .await;

        drop(installer);
        let _ = printer.await;

        summarize(&manifests, results)
    }
}

fn smoke_warning(target_id: &str, err: &SproutError) -> String {
    format!(
        "{} [{}] {}: {}",
        "Warning".yellow().bold(),
        err.kind(),
        target_id,
        err.root_cause()
    )
}

/// Prints a per-package summary. A hard failure wins over a degraded
/// install; the first hard failure is returned.
fn summarize(
    manifests: &[Arc<ManifestRecord>],
    results: Vec<Result<InstallOutcome>>,
) -> Result<CommandStatus> {
    let mut first_error: Option<SproutError> = None;
    let mut degraded = false;

    for (manifest, result) in manifests.iter().zip(results) {
        match result {
            Ok(outcome) => {
                if let Some(smoke_err) = outcome.smoke_error() {
                    degraded = true;
                    eprintln!("{}", smoke_warning(&manifest.id(), smoke_err));
                }
                println!(
                    "{} {} -> {}",
                    "==>".bold().blue(),
                    outcome.package.executable_symlink.display(),
                    outcome.package.entry_point.display()
                );
            }
            Err(e) => {
                if first_error.is_some() {
                    eprintln!("{} [{}] {}: {}", "Error".red().bold(), e.kind(), manifest.id(), e);
                } else {
                    first_error = Some(e);
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None if degraded => Ok(CommandStatus::Degraded),
        None => Ok(CommandStatus::Success),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use sprout_common::model::artifact::InstalledPackage;
    use sprout_common::model::manifest::ArtifactKind;
    use sprout_common::pipeline::InstallStage;
    use sprout_core::install::SmokeStatus;

    use super::*;

    fn manifest(name: &str) -> Arc<ManifestRecord> {
        let json = format!(
            r#"{{ "name": "{name}", "version": "1.0.0",
                 "url": "https://example.com/{name}-1.0.0.tar.gz",
                 "sha256": "{}" }}"#,
            "a".repeat(64)
        );
        Arc::new(ManifestRecord::from_json(&json).unwrap())
    }

    fn outcome(name: &str, smoke: SmokeStatus) -> InstallOutcome {
        InstallOutcome {
            package: InstalledPackage {
                name: name.to_string(),
                version: "1.0.0".to_string(),
                install_root: PathBuf::from(format!("/opt/sprout/Cellar/{name}/1.0.0")),
                executable_symlink: PathBuf::from(format!("/opt/sprout/bin/{name}")),
                entry_point: PathBuf::from(format!("/opt/sprout/Cellar/{name}/1.0.0/libexec/{name}")),
                artifact: ArtifactKind::Source,
            },
            smoke,
        }
    }

    fn smoke_failure(name: &str) -> SproutError {
        SproutError::SmokeTestFailed {
            executable: format!("/opt/sprout/bin/{name}"),
            reason: "exited with status 1".to_string(),
        }
        .at_stage(InstallStage::TestingSmoke)
    }

    #[test]
    fn failed_smoke_test_degrades_the_run() {
        colored::control::set_override(false);
        let manifests = vec![manifest("fpp"), manifest("jq")];
        let results = vec![
            Ok(outcome("fpp", SmokeStatus::Failed(smoke_failure("fpp")))),
            Ok(outcome("jq", SmokeStatus::Passed)),
        ];
        let status = summarize(&manifests, results).unwrap();
        assert_eq!(status, CommandStatus::Degraded);
        assert_ne!(status.exit_code(), 0);

        let line = smoke_warning("fpp@1.0.0", &smoke_failure("fpp"));
        assert!(line.contains("[SmokeTestFailed]"), "{line}");
        assert!(line.contains("fpp@1.0.0"), "{line}");
    }

    #[test]
    fn clean_run_succeeds() {
        let manifests = vec![manifest("fpp")];
        let results = vec![Ok(outcome("fpp", SmokeStatus::Skipped))];
        assert_eq!(summarize(&manifests, results).unwrap(), CommandStatus::Success);
    }

    #[test]
    fn hard_failure_outranks_degraded_install() {
        let manifests = vec![manifest("fpp"), manifest("jq"), manifest("rg")];
        let fetch_error = |url: &str| {
            SproutError::FetchFailed {
                url: url.to_string(),
                cause: "HTTP 404".to_string(),
            }
            .at_stage(InstallStage::Fetching)
        };
        let results = vec![
            Ok(outcome("fpp", SmokeStatus::Failed(smoke_failure("fpp")))),
            Err(fetch_error("https://example.com/jq")),
            Err(fetch_error("https://example.com/rg")),
        ];
        let err = summarize(&manifests, results).unwrap_err();
        assert_eq!(err.kind(), "FetchFailed");
        assert!(err.to_string().contains("example.com/jq"));
    }
}
