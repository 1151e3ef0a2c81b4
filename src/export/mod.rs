//! Model export
//!
//! Writes everything needed to reuse a trained classifier into one
//! directory: architecture JSON, layer summary, label list, the graph
//! definition in text form, the parameter checkpoint and the frozen ONNX
//! inference graph.

pub mod graph;
pub mod onnx;
pub mod saver;

pub use graph::{freeze_graph, graph_def, validate_endpoints};
pub use saver::{prepare_dir, save_model, ExportedArtifacts};
