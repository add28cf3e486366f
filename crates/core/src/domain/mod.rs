pub mod request;
pub mod template;
pub mod user;
