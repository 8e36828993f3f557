mod content_item;
mod line_item;
mod tool;
mod user;

pub use content_item::LtiContentItem;
pub use line_item::LineItem;
pub use tool::{PublicKeyType, Tool, ToolKeySource};
pub use user::{TempUser, UserType};
