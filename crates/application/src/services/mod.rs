mod message_pipeline;


pub use message_pipeline::{MessagePipeline, MessagePipelineDependencies};
