//! # Data Models
//!
//! SeaORM entities for jobs, staged pages, the local catalog and the
//! options key-value store.

pub mod job;
pub mod option;
pub mod page;
pub mod product;
pub mod product_variation;

pub use job::Entity as Job;
pub use option::Entity as OptionRow;
pub use page::Entity as Page;
pub use product::Entity as Product;
pub use product_variation::Entity as ProductVariation;
