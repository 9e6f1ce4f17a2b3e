//! # Repository Layer
//!
//! Repositories encapsulating SeaORM operations. Each method is generic over
//! [`sea_orm::ConnectionTrait`], so callers choose between the pool and an
//! open transaction.

pub mod job;
pub mod option;
pub mod page;
pub mod product;

pub use job::JobRepository;
pub use option::OptionRepository;
pub use page::PageRepository;
pub use product::ProductRepository;
