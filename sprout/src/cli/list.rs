// sprout/src/cli/list.rs
use std::collections::BTreeMap;

use clap::Args;
use colored::Colorize;
use prettytable::{format, Cell, Row, Table};
use sprout_common::config::Config;
use sprout_common::error::Result;
use sprout_common::formulary::Formulary;
use sprout_common::keg::{InstalledKeg, KegRegistry};

#[derive(Args, Debug)]
pub struct List {
    /// Show all installed versions, not just the latest for each name
    #[arg(long)]
    pub all: bool,
}

impl List {
    pub fn run(&self, config: &Config) -> Result<()> {
        let installed = KegRegistry::new(config.clone()).list_installed_kegs()?;
        if installed.is_empty() {
            println!("{}", "0 packages installed".yellow());
            return Ok(());
        }

        let kegs: Vec<&InstalledKeg> = if self.all {
            installed.iter().collect()
        } else {
            // installed_versions sorts per name, so the last entry wins.
            let mut latest: BTreeMap<&str, &InstalledKeg> = BTreeMap::new();
            for keg in &installed {
                latest.insert(keg.name.as_str(), keg);
            }
            latest.into_values().collect()
        };

        let formulary = Formulary::new(config);
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
        table.add_row(Row::new(vec![
            Cell::new("Name").style_spec("b"),
            Cell::new("Installed").style_spec("b"),
            Cell::new("From").style_spec("b"),
            Cell::new("Latest manifest").style_spec("b"),
        ]));

        for keg in &kegs {
            let from = keg
                .receipt()
                .map(|r| r.artifact.to_string())
                .unwrap_or_else(|| "-".to_string());
            let newer = formulary
                .list_versions(&keg.name)
                .ok()
                .and_then(|mut v| v.pop())
                .filter(|latest| *latest != keg.version_str)
                .unwrap_or_default();
            table.add_row(Row::new(vec![
                Cell::new(&keg.name).style_spec("Fb"),
                Cell::new(&keg.version_str),
                Cell::new(&from),
                Cell::new(&newer).style_spec("Fy"),
            ]));
        }
        table.printstd();
        println!("{}", format!("{} packages installed", kegs.len()).bold());
        Ok(())
    }
}
