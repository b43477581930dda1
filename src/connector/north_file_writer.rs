//! File writer North connector.
//!
//! Persists received data into a local output directory: value batches as
//! timestamped JSON documents, forwarded files as copies with an optional
//! prefix and suffix around the original name. The output folder often sits
//! on a mounted share picked up by a downstream system.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use crate::connector::traits::NorthConnector;
use crate::core::config::NorthConfig;
use crate::core::data::DataValue;
use crate::core::error::{EngineError, Result};

/// File writer parameters (deserialized from the North's `settings`).
///
/// # Example JSON
/// ```json
/// {
///     "outputFolder": "/var/data/outgoing",
///     "prefix": "gw-",
///     "suffix": "-ready"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileWriterSettings {
    /// Directory receiving the output.
    pub output_folder: PathBuf,

    /// Text placed before the output file name.
    #[serde(default)]
    pub prefix: String,

    /// Text placed after the file stem, before the extension.
    #[serde(default)]
    pub suffix: String,
}

/// North connector writing to a local directory.
pub struct FileWriterNorth {
    north_id: String,
    settings: FileWriterSettings,
    subscribed_to: Vec<String>,
}

impl FileWriterNorth {
    pub fn from_config(config: &NorthConfig) -> Result<Self> {
        let settings: FileWriterSettings = serde_json::from_value(config.settings.clone())
            .map_err(|e| EngineError::Config(format!("file writer settings: {e}")))?;
        Ok(Self {
            north_id: config.id.clone(),
            settings,
            subscribed_to: config.subscribed_to.clone(),
        })
    }

    /// `<prefix><stem><suffix><.ext>` in the output folder.
    fn output_path_for(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let extension = source
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        self.settings.output_folder.join(format!(
            "{}{}{}{}",
            self.settings.prefix, stem, self.settings.suffix, extension
        ))
    }
}

#[async_trait]
impl NorthConnector for FileWriterNorth {
    async fn init(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.settings.output_folder)?;
        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn handle_values(&mut self, values: &[DataValue]) -> Result<()> {
        let name = format!(
            "{}{}{}.json",
            self.settings.prefix,
            Utc::now().timestamp_millis(),
            self.settings.suffix
        );
        let path = self.settings.output_folder.join(name);
        let body = serde_json::to_vec_pretty(values)?;
        std::fs::write(&path, body)?;
        debug!(north_id = %self.north_id, path = %path.display(), count = values.len(), "values written");
        Ok(())
    }

    async fn handle_file(&mut self, path: &Path) -> Result<()> {
        let target = self.output_path_for(path);
        std::fs::copy(path, &target)?;
        debug!(north_id = %self.north_id, target = %target.display(), "file written");
        Ok(())
    }

    fn handles_values(&self) -> bool {
        true
    }

    fn handles_files(&self) -> bool {
        true
    }

    fn subscribed_to(&self) -> &[String] {
        &self.subscribed_to
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CachingConfig;
    use chrono::TimeZone;

    fn config(output: &Path, prefix: &str, suffix: &str) -> NorthConfig {
        NorthConfig {
            id: "writer1".to_string(),
            name: "Writer".to_string(),
            connector_type: "file-writer".to_string(),
            enabled: true,
            subscribed_to: Vec::new(),
            caching: CachingConfig::default(),
            settings: serde_json::json!({
                "outputFolder": output,
                "prefix": prefix,
                "suffix": suffix,
            }),
        }
    }

    #[tokio::test]
    async fn test_values_written_as_json_document() {
        let out = tempfile::tempdir().unwrap();
        let mut north = FileWriterNorth::from_config(&config(out.path(), "gw-", "")).unwrap();
        north.init().await.unwrap();

        let ts = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        north
            .handle_values(&[DataValue::new("p1", 42i64).with_timestamp(ts)])
            .await
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(out.path()).unwrap().flatten().collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].file_name().to_string_lossy().into_owned();
        assert!(name.starts_with("gw-") && name.ends_with(".json"));

        let parsed: Vec<DataValue> =
            serde_json::from_str(&std::fs::read_to_string(entries[0].path()).unwrap()).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].point_id, "p1");
        assert_eq!(parsed[0].data.value.as_i64(), Some(42));
    }

    #[tokio::test]
    async fn test_file_copied_with_prefix_and_suffix() {
        let out = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let source = src.path().join("report.csv");
        std::fs::write(&source, "a,b").unwrap();

        let mut north =
            FileWriterNorth::from_config(&config(out.path(), "gw-", "-done")).unwrap();
        north.init().await.unwrap();
        north.handle_file(&source).await.unwrap();

        let target = out.path().join("gw-report-done.csv");
        assert_eq!(std::fs::read_to_string(target).unwrap(), "a,b");
        // Source is left alone; deleting it is the cache's business
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_init_creates_output_folder() {
        let out = tempfile::tempdir().unwrap();
        let nested = out.path().join("a/b/c");
        let mut north = FileWriterNorth::from_config(&config(&nested, "", "")).unwrap();
        north.init().await.unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn test_missing_output_folder_setting_rejected() {
        let mut cfg = config(Path::new("/tmp"), "", "");
        cfg.settings = serde_json::json!({ "prefix": "x" });
        assert!(FileWriterNorth::from_config(&cfg).is_err());
    }
}
