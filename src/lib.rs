pub mod chat;
pub mod core;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod server;
pub mod session;
pub mod state;
