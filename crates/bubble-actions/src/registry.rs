//! Maps an action's YAML `action:` name to the factory that builds it,
//! replacing an `init()`-time `register(name, maker)` call pattern with
//! the same static-registry pattern `bubble-env`'s sysfunc table uses.

use std::sync::OnceLock;

use crate::action::ActionFactory;
use crate::email::EmailFactory;
use crate::ftp::FtpFactory;
use crate::shell::ShellFactory;
use crate::unity::UnityFactory;
use crate::zip::ZipFactory;

type Maker = fn() -> Box<dyn ActionFactory>;

fn registry() -> &'static [(&'static str, Maker)] {
    static REGISTRY: OnceLock<Vec<(&'static str, Maker)>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        vec![
            ("shell", (|| Box::new(ShellFactory) as Box<dyn ActionFactory>) as Maker),
            ("unity", || Box::new(UnityFactory::default())),
            ("zip", || Box::new(ZipFactory)),
            ("ftp", || Box::new(FtpFactory::default())),
            ("email", || Box::new(EmailFactory::default())),
        ]
    })
}

/// Build a fresh, unvalidated factory for `name`, or `None` if no action of
/// that name is registered.
pub fn create(name: &str) -> Option<Box<dyn ActionFactory>> {
    registry().iter().find(|(n, _)| *n == name).map(|(_, maker)| maker())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_known_kind_resolves_to_a_factory() {
        for name in ["shell", "unity", "zip", "ftp", "email"] {
            assert!(create(name).is_some(), "missing factory for {name}");
        }
    }

    #[test]
    fn unknown_kind_is_none() {
        assert!(create("nonexistent").is_none());
    }
}
