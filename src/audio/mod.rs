//! Audio intake: sources, conditioning, chunking and noise profiling

pub mod capture;
pub mod chunker;
pub mod conditioning;
pub mod noise;
pub mod source;

pub use capture::{AudioCapture, CaptureSource};
pub use chunker::{AudioChunk, ChunkStream, Chunker};
pub use conditioning::{AudioConditioner, ConditionedSource};
pub use noise::{NoiseProfile, NoiseProfiler};
pub use source::{MemorySource, SampleSource};
