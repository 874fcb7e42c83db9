//! Database registry
//!
//! Discovers `.db` files under the data directory and tracks which one is
//! active. The registry is an explicit value owned by the caller — request
//! handlers resolve the active path once, up front, so a concurrent switch
//! cannot change the database under an in-flight query. A failed switch
//! leaves the previous selection untouched.

use crate::error::{DataProxyError, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub path: String,
    pub name: String,
    pub db_type: String,
    pub tables: Vec<String>,
}

pub struct DatabaseRegistry {
    data_dir: PathBuf,
    available: Vec<PathBuf>,
    current: Option<DatabaseInfo>,
}

impl DatabaseRegistry {
    /// Scan the data directory; when exactly one database exists it is
    /// selected automatically.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        let available = discover_databases(&data_dir);

        let mut registry = Self {
            data_dir,
            available,
            current: None,
        };

        if registry.available.len() == 1 {
            let only = registry.available[0].clone();
            if let Err(e) = registry.switch(&only) {
                warn!("auto-select failed for {}: {}", only.display(), e);
            }
        }

        registry
    }

    pub fn available_databases(&self) -> &[PathBuf] {
        &self.available
    }

    /// Re-scan the data directory, e.g. after an import created a file.
    pub fn refresh(&mut self) {
        self.available = discover_databases(&self.data_dir);
    }

    /// Switch the active database. Validation failures leave the previous
    /// selection in place.
    pub fn switch(&mut self, database_path: &Path) -> Result<&DatabaseInfo> {
        let info = load_database_info(database_path)?;
        info!("database switched: {}", database_path.display());

        if !self.available.iter().any(|p| p == database_path) {
            self.available.push(database_path.to_path_buf());
        }
        Ok(self.current.insert(info))
    }

    pub fn current(&self) -> Option<&DatabaseInfo> {
        self.current.as_ref()
    }

    pub fn current_path(&self) -> Option<PathBuf> {
        self.current.as_ref().map(|info| PathBuf::from(&info.path))
    }
}

fn load_database_info(database_path: &Path) -> Result<DatabaseInfo> {
    if !database_path.exists() {
        return Err(DataProxyError::Config(format!(
            "数据库文件不存在: {}",
            database_path.display()
        )));
    }

    let conn = Connection::open(database_path)
        .map_err(|e| DataProxyError::Config(format!("无法打开数据库: {}", e)))?;

    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
        .map_err(|e| DataProxyError::Config(format!("无法获取数据库信息: {}", e)))?;

    let tables: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| DataProxyError::Config(format!("无法获取数据库信息: {}", e)))?
        .filter_map(|r| r.ok())
        .collect();

    let name = database_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "database".to_string());

    Ok(DatabaseInfo {
        path: database_path.to_string_lossy().to_string(),
        name,
        db_type: "sqlite".to_string(),
        tables,
    })
}

/// Recursively collect `.db` files under the data directory.
fn discover_databases(data_dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    collect_db_files(data_dir, &mut found);
    found.sort();
    found
}

fn collect_db_files(dir: &Path, found: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_db_files(&path, found);
        } else if path.extension().map(|e| e == "db").unwrap_or(false) {
            found.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dataproxy_reg_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn make_db(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE t (a INTEGER);").unwrap();
        path
    }

    #[test]
    fn auto_selects_single_database() {
        let dir = scratch_dir("auto");
        make_db(&dir, "only.db");

        let registry = DatabaseRegistry::new(&dir);
        assert_eq!(registry.current().unwrap().name, "only");
        assert_eq!(registry.current().unwrap().tables, vec!["t"]);
    }

    #[test]
    fn discovers_databases_in_subdirectories() {
        let dir = scratch_dir("subdirs");
        make_db(&dir, "top.db");
        std::fs::create_dir_all(dir.join("imported")).unwrap();
        make_db(&dir.join("imported"), "nested.db");

        let registry = DatabaseRegistry::new(&dir);
        assert_eq!(registry.available_databases().len(), 2);
    }

    #[test]
    fn failed_switch_keeps_previous_selection() {
        let dir = scratch_dir("keep");
        let db = make_db(&dir, "bank_data.db");

        let mut registry = DatabaseRegistry::new(&dir);
        registry.switch(&db).unwrap();

        let result = registry.switch(Path::new("/nonexistent/ghost.db"));
        assert!(result.is_err());
        assert_eq!(registry.current().unwrap().name, "bank_data");
    }

    #[test]
    fn switch_records_tables() {
        let dir = scratch_dir("tables");
        let db = make_db(&dir, "a.db");
        make_db(&dir, "b.db");

        let mut registry = DatabaseRegistry::new(&dir);
        assert!(registry.current().is_none()); // two candidates, no auto-select

        let info = registry.switch(&db).unwrap();
        assert_eq!(info.db_type, "sqlite");
        assert_eq!(info.tables, vec!["t"]);
    }
}
