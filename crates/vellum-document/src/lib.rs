mod codec;
mod compare;
mod error;
mod path;
mod validate;
mod value;

pub use codec::{
    DATE_KEY, DELETED_KEY, INDEX_CREATED_KEY, INDEX_REMOVED_KEY, deserialize, is_reserved_key,
    serialize,
};
pub use compare::{
    StringComparator, comparable, compare, compare_opt, compare_with, eq_opt, truthy, value_eq,
};
pub use error::DocumentError;
pub use path::{get_path, get_value_path};
pub use validate::{check_key, sanitize, validate_keys};
pub use value::{Document, Value};
