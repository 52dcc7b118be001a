//! `master.yml`'s shape: top-level map, only `web` is required and
//! meaningful; every other top-level key is ignored (spec.md §6).

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct MasterConfig {
    pub web: WebConfig,
}

#[derive(Debug, Deserialize)]
pub struct WebConfig {
    pub port: u16,
    #[allow(dead_code)]
    pub root: String,
    #[allow(dead_code)]
    pub index: String,
}
