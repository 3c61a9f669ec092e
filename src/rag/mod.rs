pub mod context;
pub mod index;
pub mod pinecone;
pub mod pipeline;

pub use index::{IndexRecord, RecordMetadata, RetrievedMatch, VectorIndex};
pub use pinecone::PineconeIndex;
pub use pipeline::{QueryPipeline, ValidatedRequest};
