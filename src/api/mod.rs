pub mod health;
pub mod users;

pub use health::health_check;
