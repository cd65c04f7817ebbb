pub mod audit;
pub mod button;
pub mod group;
pub mod system;
pub mod user;
