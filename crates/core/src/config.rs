use crate::extractor::StrategyKind;
use crate::rules::RuleSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub directories: DirectoryConfig,
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub source_dir: String,
    pub dest_base_dir: String,
    /// Relative paths resolve under `dest_base_dir`.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,
}

impl DirectoryConfig {
    pub fn source(&self) -> PathBuf {
        PathBuf::from(&self.source_dir)
    }

    pub fn dest(&self) -> PathBuf {
        PathBuf::from(&self.dest_base_dir)
    }

    pub fn logs(&self) -> PathBuf {
        let logs = PathBuf::from(&self.logs_dir);
        if logs.is_absolute() {
            logs
        } else {
            self.dest().join(logs)
        }
    }
}

fn default_logs_dir() -> String {
    "logs".to_string()
}

/// One `[[categories]]` entry. Array order is evaluation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub extensions: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["doc".to_string(), "docx".to_string()],
            // Word owner files left behind by open documents
            exclude: vec!["**/~$*".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptStatePolicy {
    #[default]
    Restart,
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    /// Fixed worker count; when unset the CPU count is clamped to the bounds.
    pub workers: Option<usize>,
    pub checkpoint_every: usize,
    pub checkpoint_interval_secs: u64,
    pub extraction_timeout_secs: u64,
    pub persist_retries: u32,
    pub progress_interval: u64,
    pub on_corrupt_state: CorruptStatePolicy,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 8,
            workers: None,
            checkpoint_every: 100,
            checkpoint_interval_secs: 30,
            extraction_timeout_secs: 60,
            persist_retries: 3,
            progress_interval: 50,
            on_corrupt_state: CorruptStatePolicy::Restart,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Extension (lower-case, no dot) to strategies tried in order.
    pub strategies: BTreeMap<String, Vec<StrategyKind>>,
    pub antiword_path: String,
    pub catdoc_path: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        let mut strategies = BTreeMap::new();
        strategies.insert("docx".to_string(), vec![StrategyKind::DocxXml]);
        strategies.insert(
            "doc".to_string(),
            vec![
                StrategyKind::Antiword,
                StrategyKind::DocxXml,
                StrategyKind::Catdoc,
                StrategyKind::BinaryText,
            ],
        );
        Self {
            strategies,
            antiword_path: "antiword".to_string(),
            catdoc_path: "catdoc".to_string(),
        }
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("DOCSORT")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );
    let cfg = settings.build()?;
    let app: AppConfig = cfg.try_deserialize()?;
    // fail fast on bad rules instead of at run start
    RuleSet::from_config(&app.categories)?;
    Ok(app)
}
