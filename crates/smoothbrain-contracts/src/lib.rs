pub mod events;
pub mod extract;
pub mod models;
pub mod project;
pub mod story;
