pub mod check;
pub mod discover;
pub mod flow;
pub mod pkce;
pub mod token;
