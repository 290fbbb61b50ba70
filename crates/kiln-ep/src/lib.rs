//! Execution provider that runs ONNX subgraphs through kiln.
//!
//! The provider claims nodes of a host graph, imports each claimed subgraph
//! into kiln IR, compiles all of them into one bytecode module and loads it
//! into a runtime session. Each subgraph comes back as a compute function
//! that marshals host tensors across the device boundary.
//!
//! # Architecture
//!
//! 1. **Partitioning** - [`ExecutionProvider::get_capability`] claims nodes
//! 2. **Import** - [`jit::CompilerInvocation::import_subgraph`] builds one
//!    verified function per subgraph
//! 3. **Compile** - the invocation runs the standard pipeline and emits
//!    bytecode into a [`jit::CompilerOutput`]
//! 4. **Invoke** - [`rt::Session::call`] runs a function by its
//!    `module.function` name
//!
//! # Example
//!
//! ```no_run
//! use kiln_ep::{ExecutionProvider, FusedNodeAndGraph, HostTensor, KernelContext, ProviderOptions};
//! use kiln_onnx::{DataType, GraphView, load_and_parse_model};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let graph = load_and_parse_model("model.onnx")?;
//! let provider = ExecutionProvider::new(ProviderOptions::new())?;
//!
//! let capability = provider.get_capability(&graph).remove(0);
//! let fused = FusedNodeAndGraph {
//!     fused_node_name: "main".to_string(),
//!     view: GraphView::from_indexed(&graph, &capability.sub_graph)?,
//! };
//! let compute = provider.compile(&[fused])?.remove(0);
//!
//! let input = HostTensor::from_slice(DataType::F32, &[2], &[1.0f32, 2.0]);
//! let mut cx = KernelContext::new(vec![input.into()], 1);
//! compute.compute(&mut cx)?;
//! println!("{:?}", cx.outputs());
//! # Ok(())
//! # }
//! ```

mod error;
pub mod jit;
pub mod kernel;
pub mod options;
pub mod provider;
pub mod rt;

pub use error::{EpError, Result};
pub use kernel::{HostTensor, KernelContext, MemoryDevice, Value};
pub use options::{ModuleLoading, ProviderConfig, ProviderOptions};
pub use provider::{
    ComputeCapability, ExecutionProvider, FusedNodeAndGraph, MODULE_NAME, NodeComputeInfo,
    ProviderFactory, qualified_entry_name,
};
