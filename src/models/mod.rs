pub mod metadata;
pub mod token;
pub mod user_link;

pub use metadata::RoleConnection;
pub use token::{Token, TokenGrant};
pub use user_link::UserLink;
