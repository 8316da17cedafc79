use std::{fs::OpenOptions, io::Write, path::PathBuf};

use anyhow::Result;
use once_cell::sync::Lazy;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

static TELEMETRY_ENABLED: Lazy<std::sync::RwLock<bool>> =
    Lazy::new(|| std::sync::RwLock::new(false));

/**
 * \brief The areas of the app that emit telemetry lines.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Keys,
    Catalog,
    Analyze,
    Chat,
    Server,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Keys => "keys",
            Category::Catalog => "catalog",
            Category::Analyze => "analyze",
            Category::Chat => "chat",
            Category::Server => "server",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Level {
    Info,
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Error => "error",
        }
    }
}

/**
 * \brief Update the telemetry switch.
 */
pub fn set_enabled(enabled: bool) {
    if let Ok(mut guard) = TELEMETRY_ENABLED.write() {
        *guard = enabled;
    }
}

/**
 * \brief Read the current telemetry switch.
 */
pub fn is_enabled() -> bool {
    TELEMETRY_ENABLED.read().map(|g| *g).unwrap_or(false)
}

/**
 * \brief Record a regular event.
 */
pub fn log_event(category: Category, message: &str) {
    append(Level::Info, category, message);
}

/**
 * \brief Record an error event. Callers use this for failures that are
 *        deliberately silent to the user, like discovery fallbacks.
 */
pub fn log_error(category: Category, message: &str) {
    append(Level::Error, category, message);
}

fn append(level: Level, category: Category, message: &str) {
    if !is_enabled() {
        return;
    }
    if let Err(err) = write_line(level, category, message) {
        eprintln!("telemetry write failed: {}", err);
    }
}

fn write_line(level: Level, category: Category, message: &str) -> Result<()> {
    let log_dir = log_dir();
    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir)?;
    }
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("agentegrator.log"))?;
    writeln!(
        file,
        "{} {:<5} {} | {}",
        timestamp,
        level.as_str(),
        category.as_str(),
        message
    )?;
    Ok(())
}

fn log_dir() -> PathBuf {
    std::env::var("AGENTEGRATOR_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_names_are_stable() {
        let names: Vec<&str> = [
            Category::Keys,
            Category::Catalog,
            Category::Analyze,
            Category::Chat,
            Category::Server,
        ]
        .into_iter()
        .map(Category::as_str)
        .collect();
        assert_eq!(names, vec!["keys", "catalog", "analyze", "chat", "server"]);
    }
}
