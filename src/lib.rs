pub mod classifier;
pub mod error;
pub mod mail_store;
pub mod settings;
pub mod sorter;
