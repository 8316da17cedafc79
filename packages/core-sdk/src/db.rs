use anyhow::Result;
pub use rusqlite::Connection;
use rusqlite::{params, ErrorCode, OptionalExtension};
use std::{thread, time::Duration};

use crate::models::ProviderKind;

/**
 * \brief Open the default database file (agentegrator.db in the working directory).
 */
pub fn open_default_db() -> Result<Connection> {
    let conn = Connection::open("agentegrator.db")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/**
 * \brief Run database migrations, creating the config table.
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
        )
    })?;
    Ok(())
}

fn set_config(conn: &Connection, key: &str, value: &str) -> Result<()> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )
    })?;
    Ok(())
}

fn get_config(conn: &Connection, key: &str) -> Result<Option<String>> {
    let val = conn
        .query_row(
            "SELECT value FROM app_config WHERE key=?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(val)
}

fn clear_config(conn: &Connection, key: &str) -> Result<()> {
    retry_on_locked(|| conn.execute("DELETE FROM app_config WHERE key=?1", params![key]))?;
    Ok(())
}

fn set_bool_config(conn: &Connection, key: &str, value: bool) -> Result<()> {
    set_config(conn, key, if value { "1" } else { "0" })
}

fn get_bool_config(conn: &Connection, key: &str, default: bool) -> Result<bool> {
    Ok(get_config(conn, key)?.map(|s| s == "1").unwrap_or(default))
}

/**
 * \brief Read a provider's API key. Absence means "unconfigured", not an error.
 */
pub fn get_api_key(conn: &Connection, kind: ProviderKind) -> Result<Option<String>> {
    get_config(conn, kind.storage_key())
}

/**
 * \brief Overwrite a provider's API key unconditionally. No validation here.
 */
pub fn set_api_key(conn: &Connection, kind: ProviderKind, key: &str) -> Result<()> {
    set_config(conn, kind.storage_key(), key)
}

/**
 * \brief Remove a provider's API key.
 */
pub fn clear_api_key(conn: &Connection, kind: ProviderKind) -> Result<()> {
    clear_config(conn, kind.storage_key())
}

pub fn get_active_provider(conn: &Connection) -> Result<Option<ProviderKind>> {
    Ok(get_config(conn, "active_provider")?.and_then(|s| s.parse().ok()))
}

pub fn set_active_provider(conn: &Connection, kind: ProviderKind) -> Result<()> {
    set_config(conn, "active_provider", kind.as_str())
}

/**
 * \brief Read the model id last selected for a provider (None if never chosen).
 */
pub fn get_selected_model(conn: &Connection, kind: ProviderKind) -> Result<Option<String>> {
    get_config(conn, kind.model_key())
}

pub fn set_selected_model(conn: &Connection, kind: ProviderKind, model: &str) -> Result<()> {
    set_config(conn, kind.model_key(), model)
}

pub fn get_temperature(conn: &Connection) -> Result<f64> {
    Ok(get_config(conn, "temperature")?
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.7))
}

pub fn set_temperature(conn: &Connection, temperature: f64) -> Result<()> {
    set_config(conn, "temperature", &temperature.to_string())
}

pub fn get_max_output_tokens(conn: &Connection) -> Result<u32> {
    Ok(get_config(conn, "max_output_tokens")?
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(1024))
}

pub fn set_max_output_tokens(conn: &Connection, max_output_tokens: u32) -> Result<()> {
    set_config(conn, "max_output_tokens", &max_output_tokens.to_string())
}

/**
 * \brief Read the telemetry switch.
 */
pub fn get_telemetry_enabled(conn: &Connection) -> Result<bool> {
    get_bool_config(conn, "telemetry_enabled", false)
}

/**
 * \brief Update the telemetry switch.
 */
pub fn set_telemetry_enabled(conn: &Connection, enabled: bool) -> Result<()> {
    set_bool_config(conn, "telemetry_enabled", enabled)
}

fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    for attempt in 0..=MAX_RETRIES {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                let backoff = Duration::from_millis(200 * (attempt as u64 + 1));
                thread::sleep(backoff);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("retry_on_locked should have returned within the loop");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        migrate(&conn).expect("migrate");
        conn
    }

    #[test]
    fn test_api_key_round_trip() {
        let conn = mem_conn();
        assert_eq!(get_api_key(&conn, ProviderKind::Gemini).expect("get"), None);

        set_api_key(&conn, ProviderKind::Gemini, "AIza-test").expect("set");
        assert_eq!(
            get_api_key(&conn, ProviderKind::Gemini).expect("get"),
            Some("AIza-test".to_string())
        );

        clear_api_key(&conn, ProviderKind::Gemini).expect("clear");
        assert_eq!(get_api_key(&conn, ProviderKind::Gemini).expect("get"), None);
    }

    #[test]
    fn test_keys_are_independent_per_provider() {
        let conn = mem_conn();
        set_api_key(&conn, ProviderKind::Gemini, "g-key").expect("set gemini");
        set_api_key(&conn, ProviderKind::HuggingFace, "hf-key").expect("set hf");

        assert_eq!(
            get_api_key(&conn, ProviderKind::Gemini).expect("get"),
            Some("g-key".to_string())
        );
        assert_eq!(
            get_api_key(&conn, ProviderKind::HuggingFace).expect("get"),
            Some("hf-key".to_string())
        );

        clear_api_key(&conn, ProviderKind::Gemini).expect("clear gemini");
        assert_eq!(get_api_key(&conn, ProviderKind::Gemini).expect("get"), None);
        assert_eq!(
            get_api_key(&conn, ProviderKind::HuggingFace).expect("get"),
            Some("hf-key".to_string())
        );
    }

    #[test]
    fn test_set_overwrites_unconditionally() {
        let conn = mem_conn();
        set_api_key(&conn, ProviderKind::HuggingFace, "first").expect("set 1");
        set_api_key(&conn, ProviderKind::HuggingFace, "second").expect("set 2");
        assert_eq!(
            get_api_key(&conn, ProviderKind::HuggingFace).expect("get"),
            Some("second".to_string())
        );
    }

    #[test]
    fn test_settings_defaults_and_round_trip() {
        let conn = mem_conn();
        assert_eq!(get_active_provider(&conn).expect("active"), None);
        assert!((get_temperature(&conn).expect("temp") - 0.7).abs() < f64::EPSILON);
        assert_eq!(get_max_output_tokens(&conn).expect("tokens"), 1024);
        assert!(!get_telemetry_enabled(&conn).expect("telemetry"));

        set_active_provider(&conn, ProviderKind::HuggingFace).expect("set active");
        set_selected_model(&conn, ProviderKind::Gemini, "gemini-1.5-flash").expect("set model");
        set_temperature(&conn, 0.2).expect("set temp");
        set_max_output_tokens(&conn, 2048).expect("set tokens");
        set_telemetry_enabled(&conn, true).expect("set telemetry");

        assert_eq!(
            get_active_provider(&conn).expect("active"),
            Some(ProviderKind::HuggingFace)
        );
        assert_eq!(
            get_selected_model(&conn, ProviderKind::Gemini).expect("model"),
            Some("gemini-1.5-flash".to_string())
        );
        assert!((get_temperature(&conn).expect("temp") - 0.2).abs() < f64::EPSILON);
        assert_eq!(get_max_output_tokens(&conn).expect("tokens"), 2048);
        assert!(get_telemetry_enabled(&conn).expect("telemetry"));
    }
}
