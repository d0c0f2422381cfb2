//! Trace stream interface (§6, "Trace stream (consumed)"). The core never
//! parses a trace file; it only ever reads [`MemRef`] values handed to it
//! through this trait. Concrete readers (JSON-lines, a binary wire format,
//! a synthetic generator for tests) live outside the core.

use crate::memref::MemRef;

/// Abstract source of memrefs for one shard of a trace.
pub trait TraceStream {
    /// Prepare the stream for reading; called once before the first `next_record`.
    fn initialize_stream(&mut self) {}

    /// Which shard of a multi-shard trace this stream represents.
    fn current_shard_index(&self) -> u32 {
        0
    }

    /// The hardware CPU id the stream last reported via a CPU-ID marker, if any.
    fn current_output_cpuid(&self) -> Option<u32> {
        None
    }

    /// The next record, or `None` once the stream is exhausted.
    fn next_record(&mut self) -> Option<MemRef>;
}
