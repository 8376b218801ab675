mod auth;
mod migrations;
mod records;
pub mod utils;

pub use utils::test_utils;
