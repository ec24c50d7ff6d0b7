pub mod array;
pub mod config;
pub mod error;
pub mod key;
pub mod model;
pub mod storage;
pub mod verify;

mod cursor;

pub use crate::array::{HugeArray, Mutation};
pub use crate::config::Config;
pub use crate::error::{ArrayError, Result};
pub use crate::key::KeyBits;
pub use crate::model::{Key, Value};
pub use crate::storage::node::ValueTag;
pub use crate::storage::ser::{BinaryCodec, ValueCodec};
pub use crate::verify::{ArrayStats, VerifyLevel, VerifyReport};
