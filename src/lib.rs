pub mod core;
pub mod llm;
pub mod logging;
pub mod rag;
pub mod vector_math;
