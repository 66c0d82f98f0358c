//! Control records that share a bucket's keyspace with user data.
//!
//! Every key in a bucket starts with a tag byte. Metadata keys start with
//! [`METADATA_TAG`] followed by a byte selecting a [`Field`]; data keys
//! start with [`DATA_TAG`]. Each field is its own entry so that fields can
//! be read independently.

use std::fmt;
use std::sync::Arc;

use inline_array::InlineArray;

use crate::{
    Error, Result,
    storage::{SetOptions, Storage},
};

/// First byte of every metadata key.
pub const METADATA_TAG: u8 = b'&';

/// First byte of every data key.
pub const DATA_TAG: u8 = b'=';

/// Separates entries of the declared key list.
pub const KEYS_SEPARATOR: u8 = b'|';

/// The only extended flag defined so far. It carries no behavior yet.
pub const EXTENDED_FLAG_K: u8 = b'k';

/// Second byte of a metadata key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Field {
    /// One byte [`StorageType`] code.
    StorageType = b':',
    /// Extended flags. Reserved.
    Extended = b'!',
    /// `|`-separated declared key list. Reserved.
    Keys = b'|',
    /// UTF-8 table name.
    TableName = b'@',
    /// One byte [`PrimaryKey`] code. Reserved.
    PrimaryKey = b'*',
}

impl Field {
    /// The full key under which this field is stored.
    pub const fn key(self) -> [u8; 2] {
        [METADATA_TAG, self as u8]
    }
}

/// The logical model a table presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    /// String keys mapped to values.
    Kv,
    /// Row documents.
    RowDocument,
    /// Column store.
    Column,
    /// Analytical store.
    Analytical,
}

impl StorageType {
    /// Every recognized model.
    pub const ALL: [StorageType; 4] = [
        StorageType::Kv,
        StorageType::RowDocument,
        StorageType::Column,
        StorageType::Analytical,
    ];

    /// The stored one byte code.
    pub const fn code(self) -> u8 {
        match self {
            StorageType::Kv => b'a',
            StorageType::RowDocument => b'b',
            StorageType::Column => b'c',
            StorageType::Analytical => b'd',
        }
    }

    /// Decodes a stored code, `None` for unrecognized values.
    pub const fn from_code(code: u8) -> Option<StorageType> {
        match code {
            b'a' => Some(StorageType::Kv),
            b'b' => Some(StorageType::RowDocument),
            b'c' => Some(StorageType::Column),
            b'd' => Some(StorageType::Analytical),
            _ => None,
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageType::Kv => "kv",
            StorageType::RowDocument => "row-document",
            StorageType::Column => "column",
            StorageType::Analytical => "analytical",
        };
        f.write_str(name)
    }
}

/// How primary keys are assigned. Reserved, nothing enforces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimaryKey {
    /// Monotonic integer ids.
    AutoIncrementId,
    /// Random UUIDs.
    Uuid,
    /// Caller supplied keys.
    Custom,
}

impl PrimaryKey {
    /// The stored one byte code.
    pub const fn code(self) -> u8 {
        match self {
            PrimaryKey::AutoIncrementId => b'0',
            PrimaryKey::Uuid => b'1',
            PrimaryKey::Custom => b'2',
        }
    }

    /// Decodes a stored code, `None` for unrecognized values.
    pub const fn from_code(code: u8) -> Option<PrimaryKey> {
        match code {
            b'0' => Some(PrimaryKey::AutoIncrementId),
            b'1' => Some(PrimaryKey::Uuid),
            b'2' => Some(PrimaryKey::Custom),
            _ => None,
        }
    }
}

/// Read-only access to a bucket's metadata fields.
#[derive(Clone)]
pub struct Parser {
    storage: Arc<dyn Storage>,
}

impl Parser {
    /// Reads metadata from `storage`.
    pub fn new(storage: Arc<dyn Storage>) -> Parser {
        Parser { storage }
    }

    fn field(&self, field: Field) -> Result<Option<InlineArray>> {
        match self.storage.get(&field.key()) {
            Ok(raw) => Ok(Some(raw)),
            Err(Error::NoSuchKey) => Ok(None),
            Err(other) => Err(other),
        }
    }

    /// The table's model.
    ///
    /// Fails with `NotInitialized` when no storage type was ever written,
    /// and with `NoSuchStorageType` when the record is not exactly one
    /// recognized byte.
    pub fn storage_type(&self) -> Result<StorageType> {
        let raw = self.field(Field::StorageType)?.ok_or(Error::NotInitialized)?;

        match *raw {
            [code] => StorageType::from_code(code)
                .ok_or_else(|| Error::NoSuchStorageType(raw.to_vec())),
            _ => Err(Error::NoSuchStorageType(raw.to_vec())),
        }
    }

    /// The recorded table name.
    pub fn table_name(&self) -> Result<Option<String>> {
        self.field(Field::TableName)?
            .map(|raw| {
                String::from_utf8(raw.to_vec()).map_err(|_| {
                    Error::Corruption("table name is not valid UTF-8".into())
                })
            })
            .transpose()
    }

    /// The declared key list.
    pub fn declared_keys(&self) -> Result<Option<Vec<String>>> {
        let raw = match self.field(Field::Keys)? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        if raw.is_empty() {
            return Ok(Some(vec![]));
        }

        raw.split(|b| *b == KEYS_SEPARATOR)
            .map(|key| {
                String::from_utf8(key.to_vec()).map_err(|_| {
                    Error::Corruption("declared key is not valid UTF-8".into())
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    /// The raw extended flags.
    pub fn extended_flags(&self) -> Result<Option<InlineArray>> {
        self.field(Field::Extended)
    }

    /// The primary key descriptor.
    pub fn primary_key(&self) -> Result<Option<PrimaryKey>> {
        let raw = match self.field(Field::PrimaryKey)? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        match *raw {
            [code] => PrimaryKey::from_code(code).map(Some).ok_or_else(|| {
                Error::Corruption(format!(
                    "unknown primary key descriptor {:?}",
                    code as char
                ))
            }),
            _ => Err(Error::Corruption(format!(
                "primary key descriptor has {} bytes",
                raw.len()
            ))),
        }
    }
}

/// Writes the metadata of a new table.
pub struct Initializer {
    storage: Arc<dyn Storage>,
}

impl Initializer {
    /// Writes metadata into `storage`.
    pub fn new(storage: Arc<dyn Storage>) -> Initializer {
        Initializer { storage }
    }

    /// Records `storage_type` and `name`.
    ///
    /// The storage type is written with a compare-and-swap against an
    /// absent record, so of several racing initializers exactly one
    /// wins and the others get `AlreadyInitialized`.
    pub fn initialize(&self, name: &str, storage_type: StorageType) -> Result<()> {
        let synchronized = SetOptions { synchronized: true };

        let cas = self.storage.compare_and_swap(
            &Field::StorageType.key(),
            None,
            Some(&[storage_type.code()][..]),
            synchronized,
        )?;

        if cas.is_err() {
            return Err(Error::AlreadyInitialized);
        }

        self.storage.set(&Field::TableName.key(), name.as_bytes(), synchronized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Config, storage::Bucket};

    fn parser() -> (Arc<dyn Storage>, Parser) {
        let storage: Arc<dyn Storage> =
            Arc::new(Bucket::open("meta", &Config::new().temporary(true)).unwrap());
        (storage.clone(), Parser::new(storage))
    }

    #[test]
    fn tags_never_collide() {
        assert_ne!(METADATA_TAG, DATA_TAG);
        // metadata sorts entirely before data
        assert!(METADATA_TAG < DATA_TAG);
    }

    #[test]
    fn codes_round_trip() {
        for st in StorageType::ALL {
            assert_eq!(StorageType::from_code(st.code()), Some(st));
        }
        assert_eq!(StorageType::from_code(b'z'), None);
    }

    #[test]
    fn missing_type_is_not_initialized() {
        let (_, parser) = parser();
        assert_eq!(parser.storage_type(), Err(Error::NotInitialized));
    }

    #[test]
    fn malformed_type_is_rejected() {
        let (storage, parser) = parser();
        let key = Field::StorageType.key();

        storage.set(&key, b"z", SetOptions::default()).unwrap();
        assert_eq!(parser.storage_type(), Err(Error::NoSuchStorageType(b"z".to_vec())));

        storage.set(&key, b"aa", SetOptions::default()).unwrap();
        assert_eq!(parser.storage_type(), Err(Error::NoSuchStorageType(b"aa".to_vec())));

        storage.set(&key, b"", SetOptions::default()).unwrap();
        assert_eq!(parser.storage_type(), Err(Error::NoSuchStorageType(vec![])));
    }

    #[test]
    fn reserved_fields_decode() {
        let (storage, parser) = parser();
        assert_eq!(parser.declared_keys(), Ok(None));
        assert_eq!(parser.primary_key(), Ok(None));

        storage
            .set(&Field::Keys.key(), b"id|name", SetOptions::default())
            .unwrap();
        storage
            .set(&Field::PrimaryKey.key(), b"1", SetOptions::default())
            .unwrap();
        storage
            .set(&Field::Extended.key(), &[EXTENDED_FLAG_K], SetOptions::default())
            .unwrap();

        assert_eq!(
            parser.declared_keys(),
            Ok(Some(vec!["id".to_string(), "name".to_string()]))
        );
        assert_eq!(parser.primary_key(), Ok(Some(PrimaryKey::Uuid)));
        assert_eq!(
            parser.extended_flags().unwrap().as_deref(),
            Some(&[EXTENDED_FLAG_K][..])
        );
    }

    #[test]
    fn initialize_only_once() {
        let (storage, parser) = parser();
        let init = Initializer::new(storage);

        init.initialize("accounts", StorageType::Kv).unwrap();
        assert_eq!(
            init.initialize("accounts", StorageType::Column),
            Err(Error::AlreadyInitialized)
        );
        assert_eq!(parser.storage_type(), Ok(StorageType::Kv));
        assert_eq!(parser.table_name(), Ok(Some("accounts".to_string())));
    }
}
