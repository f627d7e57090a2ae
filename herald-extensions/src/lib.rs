//! herald-extensions: Built-in extensions for herald agents
//!
//! | name            | commands                     |
//! |-----------------|------------------------------|
//! | `core-commands` | `ping`, `help`               |
//! | `interactor`    | `lookat`, `click`, `loopclick` |
//! | `navigator`     | `come`, `follow`, `stop`     |
//! | `auto-login`    | none; sends a login line on connect |

pub mod auto_login;
pub mod core_commands;
pub mod interactor;
pub mod navigator;

use herald_host::extension::Extension;
use herald_host::ExtensionCatalog;

pub use auto_login::AutoLogin;
pub use core_commands::CoreCommands;
pub use interactor::Interactor;
pub use navigator::Navigator;

/// Catalog of every built-in extension under its config name
pub fn builtin_catalog() -> ExtensionCatalog {
    ExtensionCatalog::new()
        .with(core_commands::NAME, || -> Box<dyn Extension> { Box::new(CoreCommands) })
        .with(interactor::NAME, || -> Box<dyn Extension> { Box::new(Interactor::default()) })
        .with(navigator::NAME, || -> Box<dyn Extension> { Box::new(Navigator::default()) })
        .with(auto_login::NAME, || -> Box<dyn Extension> { Box::new(AutoLogin) })
}

/// Parse a finite coordinate
pub(crate) fn parse_coord(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_names() {
        assert_eq!(
            builtin_catalog().names(),
            vec!["auto-login", "core-commands", "interactor", "navigator"]
        );
    }

    #[test]
    fn test_parse_coord() {
        assert_eq!(parse_coord("-12.5"), Some(-12.5));
        assert_eq!(parse_coord("NaN"), None);
        assert_eq!(parse_coord("inf"), None);
        assert_eq!(parse_coord("oak"), None);
    }
}
