pub mod composer;
pub mod retriever;

pub use composer::ChatService;
pub use retriever::Retriever;
