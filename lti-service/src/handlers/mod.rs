pub mod content_item_return;
pub mod health;
pub mod launch;
pub mod well_known;
