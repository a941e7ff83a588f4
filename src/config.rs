// Parses the JSON configuration documents named on the command line.
use crate::prelude::*;
use serde::Deserialize;

#[derive(Debug, Default, Clone, Deserialize)]
pub struct AppConfig {
    /// Listen addresses; every element is bound and listened on.
    #[serde(default)]
    pub bind: Vec<String>,
}

impl AppConfig {
    /// Merges every readable, well-formed document into one config.
    /// Broken files are skipped with a warning, unknown options are ignored.
    pub fn load<I: IntoIterator<Item = String>>(paths: I) -> AppConfig {
        let mut config = AppConfig::default();
        for path in paths {
            match fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
                    Ok(doc) => config.bind.extend(doc.bind),
                    Err(e) => warn!("ignoring {}: {}", path, e),
                },
                Err(e) => warn!("cannot read {}: {}", path, e),
            }
        }
        config
    }
}
