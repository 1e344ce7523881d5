//! Image metadata lookups.

pub mod postgres;

pub use postgres::PgImageLocator;
