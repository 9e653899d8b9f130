// Adapters - External system implementations

pub mod synthetic_encoder;
pub mod trace_container;
pub mod tracing_index;

#[cfg(feature = "libav")]
pub mod libav_encoder;
#[cfg(feature = "libav")]
pub mod libav_mux;

// Re-export adapters
pub use synthetic_encoder::{EncoderStats, Pacing, SyntheticEncoder};
pub use trace_container::{TraceMediaStore, TraceReader, TraceWriter, TRACE_EXTENSION, TRACE_MIME};
pub use tracing_index::TracingMediaIndex;

#[cfg(feature = "libav")]
pub use libav_encoder::LibavEncoder;
#[cfg(feature = "libav")]
pub use libav_mux::{LibavMediaStore, LibavReader, LibavWriter, MP4_EXTENSION, MP4_MIME};
