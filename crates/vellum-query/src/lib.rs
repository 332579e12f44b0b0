mod error;
mod eval;
mod expression;
mod modify;
mod parse;

pub use error::QueryError;
pub use expression::{CmpOp, Expression, WherePredicate};
pub use modify::{FieldOp, Modifier, Update, modify, parse_update, set_path, unset_path};
pub use parse::parse_query;
