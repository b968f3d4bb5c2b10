pub mod models;
pub mod queries;
mod sqlite;
pub mod writer;

pub use sqlite::Store;
pub use writer::{WriteCommand, WriterActor, WriterHandle};
