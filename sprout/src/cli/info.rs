// sprout/src/cli/info.rs
use clap::Args;
use colored::Colorize;
use sprout_common::config::Config;
use sprout_common::error::Result;
use sprout_common::formulary::Formulary;
use sprout_common::keg::KegRegistry;
use sprout_common::model::manifest::ManifestRecord;
use sprout_common::model::platform::Platform;
use tracing::instrument;

use crate::cli::resolve_platform;

/// Shows a manifest and which artifact would be installed for a platform.
#[derive(Args, Debug)]
pub struct Info {
    /// Package name, `name@version` or manifest path
    pub name: String,

    #[arg(long, env = "SPROUT_PLATFORM")]
    pub platform: Option<String>,
}

impl Info {
    #[instrument(skip(self, config), fields(name = %self.name))]
    pub fn run(&self, config: &Config) -> Result<()> {
        let formulary = Formulary::new(config);
        let manifest = formulary.load(&self.name)?;
        let platform = resolve_platform(self.platform.as_deref())?;

        print_manifest(&manifest);
        print_selection(&manifest, &platform);

        let versions = formulary.list_versions(manifest.name())?;
        if !versions.is_empty() {
            println!("{} {}", "Known versions:".bold(), versions.join(", "));
        }

        let installed: Vec<String> = KegRegistry::new(config.clone())
            .installed_versions(manifest.name())?
            .into_iter()
            .map(|keg| keg.version_str)
            .collect();
        if installed.is_empty() {
            println!("{} {}", "Installed:".bold(), "no".dimmed());
        } else {
            println!("{} {}", "Installed:".bold(), installed.join(", ").green());
        }
        Ok(())
    }
}

fn print_manifest(manifest: &ManifestRecord) {
    println!("{}", manifest.id().green().bold());
    if let Some(desc) = &manifest.desc {
        println!("{desc}");
    }
    if let Some(homepage) = &manifest.homepage {
        println!("{}", homepage.blue().underline());
    }
    println!();
    println!("{} {}", "Source:".bold(), manifest.url);
    println!("{} {}", "SHA-256:".bold(), manifest.sha256);
    if let Some(bottles) = manifest.bottles.as_ref().filter(|b| !b.files.is_empty()) {
        let tags: Vec<&str> = bottles.files.iter().map(|f| f.platform.as_str()).collect();
        println!("{} {}", "Bottles:".bold(), tags.join(", "));
    }
    println!(
        "{} {} -> {}",
        "Executable:".bold(),
        manifest.link_name(),
        manifest.entry_point()
    );
}

fn print_selection(manifest: &ManifestRecord, platform: &Platform) {
    println!(
        "{} {} ({})",
        "Platform:".bold(),
        platform.platform_id(),
        platform
    );
    match manifest.select_artifact(platform, false) {
        Ok(artifact) => println!("{} {} from {}", "Would install:".bold(), artifact.kind, artifact.url),
        Err(e) => println!("{} {}", "Would install:".bold(), e.to_string().red()),
    }
    if let Some(dep) = &manifest.build_dependency {
        let state = if dep.when.holds(platform) {
            "required here".yellow()
        } else {
            "not required here".dimmed()
        };
        println!("{} {} ({})", "Build dependency:".bold(), dep.name, state);
    }
}
