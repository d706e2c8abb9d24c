// sprout-core/src/install/dependency.rs
use sprout_common::config::Config;
use sprout_common::keg::KegRegistry;
use tracing::debug;

/// Answers whether a build dependency is present on this machine.
pub trait DependencyProbe: Send + Sync {
    fn is_available(&self, name: &str) -> bool;
}

/// Looks for an installed keg first, then for an executable on `PATH`.
#[derive(Debug)]
pub struct SystemDependencyProbe {
    registry: KegRegistry,
}

impl SystemDependencyProbe {
    pub fn new(config: &Config) -> Self {
        Self {
            registry: KegRegistry::new(config.clone()),
        }
    }
}

impl DependencyProbe for SystemDependencyProbe {
    fn is_available(&self, name: &str) -> bool {
        match self.registry.get_installed_keg(name) {
            Ok(Some(keg)) => {
                debug!("Dependency {} satisfied by keg {}", name, keg.path.display());
                return true;
            }
            Ok(None) => {}
            Err(e) => debug!("Could not query keg registry for {}: {}", name, e),
        }
        match which::which(name) {
            Ok(path) => {
                debug!("Dependency {} found on PATH at {}", name, path.display());
                true
            }
            Err(_) => {
                debug!("Dependency {} not found", name);
                false
            }
        }
    }
}
