pub mod access;
pub mod authentication;
pub mod permissions;
pub mod tokens;
pub mod user;

pub use access::*;
pub use authentication::*;
pub use permissions::*;
pub use tokens::*;
pub use user::*;
