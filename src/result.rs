use std::{
    error::Error as StdError,
    fmt::{self, Display},
    io,
};

use crate::meta::StorageType;

/// The top-level result type for dealing with kical.
pub type Result<T> = std::result::Result<T, Error>;

/// An Error type encapsulating various issues that may come up
/// in both the expected and unexpected operation of a `Database`.
#[derive(Debug)]
pub enum Error {
    /// The requested key is not present.
    NoSuchKey,
    /// The table has no storage type record, so it has
    /// never been created.
    NotInitialized,
    /// The storage type record exists but is malformed or
    /// holds an unrecognized code. Carries the raw record.
    NoSuchStorageType(Vec<u8>),
    /// A typed accessor was used on a table of another model.
    WrongStorageType {
        /// The model the accessor requires.
        expected: StorageType,
        /// The model the table actually has.
        actual: StorageType,
    },
    /// The table model is recognized but has no engine yet.
    Unimplemented(StorageType),
    /// The table already carries a storage type record, which
    /// may never be rewritten.
    AlreadyInitialized,
    /// The bucket name cannot be used to address a bucket.
    InvalidBucketName(String),
    /// The system has been used in an unsupported way.
    Unsupported(String),
    /// A value could not be encoded or decoded.
    Codec(String),
    /// Stored bytes violate the key or metadata layout.
    Corruption(String),
    /// A read or write error has happened when interacting with the file
    /// system.
    Io(io::Error),
}

impl Clone for Error {
    fn clone(&self) -> Self {
        use self::Error::*;

        match self {
            Io(ioe) => Io(io::Error::new(ioe.kind(), format!("{:?}", ioe))),
            NoSuchKey => NoSuchKey,
            NotInitialized => NotInitialized,
            NoSuchStorageType(raw) => NoSuchStorageType(raw.clone()),
            WrongStorageType { expected, actual } => {
                WrongStorageType { expected: *expected, actual: *actual }
            }
            Unimplemented(st) => Unimplemented(*st),
            AlreadyInitialized => AlreadyInitialized,
            InvalidBucketName(name) => InvalidBucketName(name.clone()),
            Unsupported(why) => Unsupported(why.clone()),
            Codec(why) => Codec(why.clone()),
            Corruption(what) => Corruption(what.clone()),
        }
    }
}

impl Eq for Error {}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        use self::Error::*;

        match (self, other) {
            (NoSuchKey, NoSuchKey)
            | (NotInitialized, NotInitialized)
            | (AlreadyInitialized, AlreadyInitialized) => true,
            (NoSuchStorageType(l), NoSuchStorageType(r)) => l == r,
            (
                WrongStorageType { expected: le, actual: la },
                WrongStorageType { expected: re, actual: ra },
            ) => le == re && la == ra,
            (Unimplemented(l), Unimplemented(r)) => l == r,
            (InvalidBucketName(l), InvalidBucketName(r)) => l == r,
            (Unsupported(l), Unsupported(r)) => l == r,
            (Codec(l), Codec(r)) => l == r,
            (Corruption(l), Corruption(r)) => l == r,
            // io errors carry no meaningful equality
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        Error::Io(io_error)
    }
}

impl From<bincode::Error> for Error {
    fn from(bincode_error: bincode::Error) -> Self {
        Error::Codec(bincode_error.to_string())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> std::result::Result<(), fmt::Error> {
        use self::Error::*;

        match self {
            NoSuchKey => write!(f, "No such key"),
            NotInitialized => {
                write!(f, "Table has not been initialized with a storage type")
            }
            NoSuchStorageType(raw) => {
                write!(f, "No such storage type: {:?}", raw)
            }
            WrongStorageType { expected, actual } => write!(
                f,
                "Wrong storage type: expected {}, table is {}",
                expected, actual
            ),
            Unimplemented(st) => {
                write!(f, "Storage type {} is not implemented", st)
            }
            AlreadyInitialized => {
                write!(f, "Table already has a storage type")
            }
            InvalidBucketName(name) => {
                write!(f, "Invalid bucket name {:?}", name)
            }
            Unsupported(e) => write!(f, "Unsupported: {}", e),
            Codec(e) => write!(f, "Codec error: {}", e),
            Corruption(e) => write!(f, "Corrupted data: {}", e),
            Io(e) => write!(f, "IO error: {}", e),
        }
    }
}
