//! High-throughput structured binary logging with an offline tree analyzer.
//!
//! The write side is a pipeline: producers append typed messages and nested
//! regions to per-stream double buffers with zero synchronization on the
//! hot path; a consolidator thread packs flushed buffers into a global
//! double buffer as length-prefixed blocks; a writer thread drains the
//! global buffer to disk. Formats are registered once per call site and
//! serialized to a sidecar at shutdown.
//!
//! The read side loads a log plus its sidecar into a contiguous node arena
//! where every node's children occupy a single index range, then supports
//! filtering, sibling expansion/reduction and set algebra over parallel
//! flag trees, graph emission, and text formatting.
//!
//! ```no_run
//! use blocklog::{format_type, message, Analyzer, Log, Tree};
//!
//! format_type! {
//!     struct FrameTime = ("frame took {} ms", 1);
//! }
//!
//! # fn main() -> blocklog::Result<()> {
//! {
//!     let log: Log = Log::new("app.log", 1 << 20, true)?;
//!     let mut stream = log.create_stream(1 << 16);
//!     let mut region = stream.region();
//!     message!(region, FrameTime, 16u32);
//!     region.end();
//! }
//!
//! let mut analyzer = Analyzer::new();
//! analyzer.read("app.log")?;
//! let tree = Tree::new(&analyzer);
//! # let _ = tree;
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
mod buffer;
pub mod category;
pub mod error;
pub mod format;
pub mod formatter;
pub mod graph;
pub mod key;
pub mod log;
pub mod node;
pub mod registry;
pub mod stream;
pub mod tree;
pub mod wire;

pub use analyzer::Analyzer;
pub use category::{CategoryFilter, LogEverything, LogNothing, MinimumCategory};
pub use error::{Error, Result};
pub use format::{
    Any, FormatDescriptor, FormatType, MatchList, ParamMatch, Parameter, ParameterPack,
    RegisteredFormat,
};
pub use formatter::Formatter;
pub use graph::{write_dot, write_graph, DotWriter, GraphSink};
pub use key::{count_parameters, MessageKey, ParameterKey};
pub use log::Log;
pub use node::{Node, NodeType};
pub use registry::{FormatRegistry, MessageToken};
pub use stream::{Region, Stream};
pub use tree::{Action, Flag, Tree};
