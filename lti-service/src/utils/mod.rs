pub mod validation;

pub use validation::{ValidatedForm, ValidatedQuery};
