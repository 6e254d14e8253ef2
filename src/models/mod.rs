pub mod product;

pub use product::{Product, validate_catalog};
