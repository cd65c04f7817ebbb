pub mod audit;
pub mod auth;
pub mod buttons;
pub mod groups;
pub mod health;
pub mod systems;
pub mod users;
