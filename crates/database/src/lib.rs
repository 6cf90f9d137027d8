//! Process-level engine state: named database instances and the sidecar
//! file that remembers them across runs.
//!
//! The engine is an explicit value owned by the caller; there are no
//! process globals. Each database wires one disk manager, one buffer pool
//! and one catalog over a single file in the engine's data directory.

#[cfg(test)]
mod tests;

use buffer::BufferPoolManager;
use catalog::CatalogManager;
use common::{Config, DbError, DbResult};
use disk::DiskManager;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Sidecar listing the database files to reopen at startup.
pub const DB_NAME_FILE: &str = "db_name_file.txt";

/// One open database: disk manager, buffer pool and catalog over a file.
pub struct Database {
    name: String,
    pool: Arc<BufferPoolManager>,
    catalog: CatalogManager,
}

impl Database {
    /// Create a fresh database file and bootstrap its directory pages.
    pub fn create(name: &str, path: &Path, config: &Config) -> DbResult<Database> {
        if path.exists() {
            return Err(DbError::Storage(format!(
                "database file {} already exists",
                path.display()
            )));
        }
        let disk = Arc::new(DiskManager::open(path)?);
        let pool = Arc::new(BufferPoolManager::new(
            disk,
            config.buffer_pool_pages,
            config.replacer,
        ));
        let catalog = CatalogManager::bootstrap(Arc::clone(&pool))?;
        Ok(Database {
            name: name.into(),
            pool,
            catalog,
        })
    }

    /// Open an existing database file and reload its catalog.
    pub fn open(name: &str, path: &Path, config: &Config) -> DbResult<Database> {
        let disk = Arc::new(DiskManager::open(path)?);
        let pool = Arc::new(BufferPoolManager::new(
            disk,
            config.buffer_pool_pages,
            config.replacer,
        ));
        let catalog = CatalogManager::open(Arc::clone(&pool))?;
        Ok(Database {
            name: name.into(),
            pool,
            catalog,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> &Arc<BufferPoolManager> {
        &self.pool
    }

    pub fn catalog(&self) -> &CatalogManager {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut CatalogManager {
        &mut self.catalog
    }

    /// Push every resident page to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.pool.flush_all()
    }
}

/// Owns every open database and the name sidecar.
pub struct Engine {
    config: Config,
    databases: BTreeMap<String, Database>,
}

impl Engine {
    /// Start the engine, reopening every database the sidecar lists.
    pub fn new(config: Config) -> DbResult<Engine> {
        fs::create_dir_all(&config.data_dir)?;
        let mut engine = Engine {
            databases: BTreeMap::new(),
            config,
        };

        let sidecar = engine.sidecar_path();
        if sidecar.exists() {
            for line in fs::read_to_string(&sidecar)?.lines() {
                let name = line.trim();
                if name.is_empty() {
                    continue;
                }
                let path = engine.database_path(name);
                if !path.exists() {
                    warn!(name, "database listed in sidecar but its file is missing");
                    continue;
                }
                let db = Database::open(name, &path, &engine.config)?;
                engine.databases.insert(name.to_string(), db);
            }
        }
        Ok(engine)
    }

    /// Create and register a new database.
    pub fn create_database(&mut self, name: &str) -> DbResult<()> {
        if self.databases.contains_key(name) {
            return Err(DbError::Storage(format!("database '{name}' already exists")));
        }
        let path = self.database_path(name);
        let db = Database::create(name, &path, &self.config)?;
        self.databases.insert(name.to_string(), db);
        self.save_names()
    }

    /// Drop a database, deleting its file and sidecar entry.
    pub fn drop_database(&mut self, name: &str) -> DbResult<()> {
        if self.databases.remove(name).is_none() {
            return Err(DbError::Storage(format!("database '{name}' does not exist")));
        }
        fs::remove_file(self.database_path(name))?;
        self.save_names()
    }

    pub fn database(&self, name: &str) -> DbResult<&Database> {
        self.databases
            .get(name)
            .ok_or_else(|| DbError::Storage(format!("database '{name}' does not exist")))
    }

    pub fn database_mut(&mut self, name: &str) -> DbResult<&mut Database> {
        self.databases
            .get_mut(name)
            .ok_or_else(|| DbError::Storage(format!("database '{name}' does not exist")))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.databases.keys().map(String::as_str)
    }

    fn database_path(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(format!("{name}.db"))
    }

    fn sidecar_path(&self) -> PathBuf {
        self.config.data_dir.join(DB_NAME_FILE)
    }

    fn save_names(&self) -> DbResult<()> {
        let mut contents = String::new();
        for name in self.databases.keys() {
            contents.push_str(name);
            contents.push('\n');
        }
        fs::write(self.sidecar_path(), contents)?;
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        for (name, db) in &self.databases {
            if let Err(err) = db.flush() {
                warn!(name = %name, %err, "flush on engine shutdown failed");
            }
        }
    }
}
