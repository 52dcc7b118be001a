//! Atomic on-disk persistence for a Cron's trigger set: write the new state
//! to `<file>.tmp` then rename over `<file>`, so a crash mid-write never
//! corrupts the previous snapshot. Mirrors the write-tmp-then-rename
//! pattern used for runner inflight state, generalized from single-map
//! persistence to a keyed trigger table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::CronError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TriggerStat {
    #[serde(rename = "type")]
    pub t: u8,
    #[serde(rename = "last")]
    pub last_stamp: i64,
    #[serde(rename = "payload", with = "b64_bytes")]
    pub payload: Vec<u8>,
}

mod b64_bytes {
    use super::{Engine, B64};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&B64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        B64.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

pub(crate) async fn load(file: &Path) -> Result<HashMap<u64, TriggerStat>, CronError> {
    let bytes = match tokio::fs::read(file).await {
        Ok(b) => b,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(err) => return Err(err.into()),
    };
    if bytes.is_empty() {
        return Ok(HashMap::new());
    }
    let stats: HashMap<u64, TriggerStat> = serde_json::from_slice(&bytes)?;
    Ok(stats)
}

pub(crate) async fn flush(file: &Path, stats: &HashMap<u64, TriggerStat>) -> Result<(), CronError> {
    if stats.is_empty() {
        match tokio::fs::remove_file(file).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        return Ok(());
    }

    let bytes = serde_json::to_vec(stats)?;
    let tmp: PathBuf = {
        let mut p = file.to_path_buf();
        let name = format!("{}.tmp", file.file_name().and_then(|n| n.to_str()).unwrap_or("cron"));
        p.set_file_name(name);
        p
    };

    if let Some(parent) = file.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, file).await?;
    Ok(())
}
