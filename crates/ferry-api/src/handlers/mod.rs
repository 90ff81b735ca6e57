pub mod dispatch;
pub mod files;
pub mod health;
