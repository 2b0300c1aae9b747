use std::fs::File;
use std::io::{Write, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use anyhow::{Result, Context, anyhow};
use tracing::info;

use crate::search::fuzzy::FuzzyConfig;

pub const SETTINGS_FILE: &str = "catalog.env";
const DEFAULT_DB_FILE: &str = "catalog.db";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub db_path: PathBuf,
    pub fuzzy: FuzzyConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE),
            fuzzy: FuzzyConfig::default(),
        }
    }
}

/// Main entry point to get settings.
/// Reads `catalog.env` in the working directory, writing defaults there on first run.
pub fn get_settings() -> Result<Settings> {
    load_or_init(Path::new(SETTINGS_FILE))
}

pub fn load_or_init(path: &Path) -> Result<Settings> {
    if path.exists() {
        let settings = load_from_env(path)
            .with_context(|| format!("Invalid settings file {:?}", path))?;
        info!("Loaded settings from {:?}", path);
        return Ok(settings);
    }

    let settings = Settings::default();
    save_to_env(path, &settings)?;
    info!("Saved default settings to {:?}", path);
    Ok(settings)
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| anyhow!("Bad value for {}: {:?} ({})", key, value, e))
}

fn load_from_env(path: &Path) -> Result<Settings> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut settings = Settings::default();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let (key, value) = (key.trim(), value.trim());
            match key {
                "CATALOG_DB_PATH" => settings.db_path = PathBuf::from(value),
                "FUZZY_MIN_MATCH_LENGTH" => {
                    settings.fuzzy.min_match_length = parse_value(key, value)?
                }
                "FUZZY_MIN_MATCH_RATIO" => {
                    settings.fuzzy.min_match_ratio = parse_value(key, value)?
                }
                "FUZZY_SHORT_CANDIDATE_LENGTH" => {
                    settings.fuzzy.short_candidate_length = parse_value(key, value)?
                }
                "FUZZY_IGNORE_TOO_SHORT" => {
                    settings.fuzzy.ignore_too_short_candidates = parse_value(key, value)?
                }
                "FUZZY_PREFIX_MATCHING" => {
                    settings.fuzzy.enable_prefix_matching = parse_value(key, value)?
                }
                _ => {}
            }
        }
    }

    if settings.db_path.as_os_str().is_empty() {
        return Err(anyhow!("CATALOG_DB_PATH is empty"));
    }
    Ok(settings)
}

fn save_to_env(path: &Path, settings: &Settings) -> Result<()> {
    let mut file = File::create(path).context("Failed to create settings file")?;
    writeln!(file, "CATALOG_DB_PATH={}", settings.db_path.display())?;
    writeln!(file, "FUZZY_MIN_MATCH_LENGTH={}", settings.fuzzy.min_match_length)?;
    writeln!(file, "FUZZY_MIN_MATCH_RATIO={}", settings.fuzzy.min_match_ratio)?;
    writeln!(file, "FUZZY_SHORT_CANDIDATE_LENGTH={}", settings.fuzzy.short_candidate_length)?;
    writeln!(file, "FUZZY_IGNORE_TOO_SHORT={}", settings.fuzzy.ignore_too_short_candidates)?;
    writeln!(file, "FUZZY_PREFIX_MATCHING={}", settings.fuzzy.enable_prefix_matching)?;
    Ok(())
}
