use std::sync::Arc;

use crate::{
    Error, Result,
    codec::Codec,
    kv::Kv,
    meta::{Parser, StorageType},
    storage::{SetOptions, Storage},
};

/// The engine attached to a resolved table. One variant per model that
/// has an engine.
#[derive(Debug, Clone)]
enum Engine {
    Kv(Kv),
}

impl Engine {
    // every model must be listed here, unimplemented ones return an error
    fn attach(
        storage_type: StorageType,
        bucket: &Arc<dyn Storage>,
        codec: &Arc<dyn Codec>,
        options: SetOptions,
    ) -> Result<Engine> {
        match storage_type {
            StorageType::Kv => {
                Ok(Engine::Kv(Kv::new(bucket.clone(), codec.clone(), options)))
            }
            StorageType::RowDocument
            | StorageType::Column
            | StorageType::Analytical => Err(Error::Unimplemented(storage_type)),
        }
    }
}

/// A bucket bound to its resolved model and engine.
///
/// A `Table` only exists once resolution has succeeded: opening reads the
/// storage type record, and any failure to read or dispatch it is
/// returned instead of a table.
#[derive(Clone)]
pub struct Table {
    name: String,
    bucket: Arc<dyn Storage>,
    storage_type: StorageType,
    engine: Engine,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("storage_type", &self.storage_type)
            .finish()
    }
}

impl Table {
    pub(crate) fn open(
        name: &str,
        bucket: Arc<dyn Storage>,
        codec: &Arc<dyn Codec>,
        options: SetOptions,
    ) -> Result<Table> {
        let storage_type = Parser::new(bucket.clone()).storage_type()?;
        let engine = Engine::attach(storage_type, &bucket, codec, options)?;

        log::debug!("resolved table {:?} as {}", name, storage_type);

        Ok(Table { name: name.to_owned(), bucket, storage_type, engine })
    }

    /// The name the table was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resolved model.
    pub fn storage_type(&self) -> StorageType {
        self.storage_type
    }

    /// The underlying bucket.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.bucket
    }

    /// A reader for this table's metadata fields.
    pub fn meta(&self) -> Parser {
        Parser::new(self.bucket.clone())
    }

    /// Whether the table is a KV table.
    pub fn is_kv(&self) -> bool {
        self.storage_type == StorageType::Kv
    }

    /// Whether the table holds row documents.
    pub fn is_row_document(&self) -> bool {
        self.storage_type == StorageType::RowDocument
    }

    /// Whether the table is a column store.
    pub fn is_column(&self) -> bool {
        self.storage_type == StorageType::Column
    }

    /// Whether the table is an analytical store.
    pub fn is_analytical(&self) -> bool {
        self.storage_type == StorageType::Analytical
    }

    /// The KV engine, or `WrongStorageType` for other models.
    pub fn as_kv(&self) -> Result<&Kv> {
        match &self.engine {
            Engine::Kv(kv) if self.is_kv() => Ok(kv),
            _ => Err(Error::WrongStorageType {
                expected: StorageType::Kv,
                actual: self.storage_type,
            }),
        }
    }
}
