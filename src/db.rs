use std::sync::Arc;

use crate::{
    Config, Result,
    codec::{BincodeCodec, Codec},
    meta::{Initializer, StorageType},
    registry::Registry,
    storage::Driver,
    table::Table,
};

/// The entry point: resolves table names into typed tables.
///
/// `Database` is cheap to clone; clones share the same driver, so every
/// handle for one table name is backed by the same bucket.
#[derive(Clone)]
pub struct Database {
    driver: Arc<dyn Driver>,
    config: Config,
    codec: Arc<dyn Codec>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("config", &self.config).finish()
    }
}

impl Database {
    /// Opens a database backed by one log-structured bucket per table
    /// under `config`'s path.
    pub fn open(config: Config) -> Result<Database> {
        if !config.get_temporary() {
            std::fs::create_dir_all(config.get_path())?;
        }

        log::debug!("opening database at {:?}", config.get_path());

        let registry = Registry::new(config.clone());
        Ok(Database::new(Arc::new(registry), config))
    }

    /// Builds a database over an existing driver. `config` supplies the
    /// write durability used by table engines.
    pub fn new(driver: Arc<dyn Driver>, config: Config) -> Database {
        Database { driver, config, codec: Arc::new(BincodeCodec) }
    }

    /// Replaces the value codec used by tables opened from now on.
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Database {
        self.codec = codec;
        self
    }

    /// The configuration this database was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolves the existing table `name`.
    ///
    /// Fails with `NotInitialized` if the table has no storage type yet,
    /// `NoSuchStorageType` if the stored type is not recognized, and
    /// `Unimplemented` if the model has no engine.
    pub fn table(&self, name: &str) -> Result<Table> {
        let bucket = self.driver.bucket(name)?;
        Table::open(name, bucket, &self.codec, self.config.get_durability().set_options())
    }

    /// Records `storage_type` for the new table `name` and resolves it.
    ///
    /// Fails with `AlreadyInitialized` if the table already has a type.
    pub fn create_table(
        &self,
        name: &str,
        storage_type: StorageType,
    ) -> Result<Table> {
        let bucket = self.driver.bucket(name)?;
        Initializer::new(bucket.clone()).initialize(name, storage_type)?;

        log::info!("created {} table {:?}", storage_type, name);

        Table::open(name, bucket, &self.codec, self.config.get_durability().set_options())
    }
}
