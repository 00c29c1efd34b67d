pub mod conversation;
pub mod routing;
