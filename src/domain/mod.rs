pub mod control;
pub mod gestures;
pub mod input;
pub mod models;
pub mod modes;
pub mod settings;
