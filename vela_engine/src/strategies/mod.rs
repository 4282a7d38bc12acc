pub mod algorithm;
pub mod collaborators;
pub mod consolidators;
pub mod feeds;
pub mod handlers;
pub mod isolator;
pub mod launcher;
