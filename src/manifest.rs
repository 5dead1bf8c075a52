use std::path::Path;

use serde::Deserialize;

use crate::error::Result;

/// One fetchable attachment: a stable logical key plus candidate URLs in
/// preference order. Produced by the archive-parsing layer; this crate only
/// consumes it.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchItem {
    pub key: String,
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct FetchManifest {
    pub items: Vec<FetchItem>,
}

impl FetchManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let manifest = serde_json::from_reader(std::io::BufReader::new(file))?;
        Ok(manifest)
    }
}
