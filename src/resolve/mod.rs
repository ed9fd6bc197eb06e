//! Rewriting passes between resolved expressions, item shapes, and
//! accessor functions.

mod accessor;
pub(crate) mod replace;
mod reverse;
mod substitute;

pub use accessor::find_accessor;
pub use replace::{replace_references, replace_references_in_model};
pub use reverse::{reverse_resolve, reverse_resolve_lambda};
pub use substitute::{reduce, resolve_lambda, substitute_parameters};
