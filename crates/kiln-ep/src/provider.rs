//! The execution provider: partitioning, batch compilation and the compute
//! functions handed back to the host.

use crate::jit::{CompilerInvocation, CompilerOutput, CompilerSession};
use crate::kernel::KernelContext;
use crate::options::{ModuleLoading, ProviderConfig, ProviderOptions};
use crate::rt::{self, ModuleSource};
use crate::{EpError, Result};
use kiln_onnx::{Graph, GraphView, IndexedSubGraph, MetaDef};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Symbol name of the module every compile request produces.
pub const MODULE_NAME: &str = "kiln";

/// Name and domain of the fused node claimed by [`ExecutionProvider::get_capability`].
pub const FUSED_NODE_DOMAIN: &str = "KILN";

/// Runtime lookup key of a compiled function.
pub fn qualified_entry_name(module_name: &str, func_name: &str) -> String {
    format!("{}.{}", module_name, func_name)
}

/// Nodes this provider can run, as one claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeCapability {
    pub sub_graph: IndexedSubGraph,
}

/// A fused node and the filtered graph it replaces.
#[derive(Debug, Clone)]
pub struct FusedNodeAndGraph<'g> {
    pub fused_node_name: String,
    pub view: GraphView<'g>,
}

type ComputeFn = Box<dyn Fn(&mut KernelContext) -> Result<()> + Send + Sync>;

/// The compute function of one compiled subgraph.
pub struct NodeComputeInfo {
    pub entry_point: String,
    compute: ComputeFn,
}

impl NodeComputeInfo {
    pub fn compute(&self, cx: &mut KernelContext) -> Result<()> {
        (self.compute)(cx)
    }
}

impl fmt::Debug for NodeComputeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeComputeInfo")
            .field("entry_point", &self.entry_point)
            .finish_non_exhaustive()
    }
}

/// Compiles host subgraphs with kiln and runs them on a kiln device.
#[derive(Debug)]
pub struct ExecutionProvider {
    config: ProviderConfig,
    instance: Arc<rt::Instance>,
}

impl ExecutionProvider {
    /// Parse `options` and create the shared runtime instance and device.
    pub fn new(options: ProviderOptions) -> Result<Self> {
        let config = ProviderConfig::from_options(&options)?;
        let mut instance = rt::Instance::new()?;
        instance.initialize(&config.device)?;
        Ok(Self {
            config,
            instance: Arc::new(instance),
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn instance(&self) -> &Arc<rt::Instance> {
        &self.instance
    }

    /// Claim every node of `graph` as a single fused node.
    ///
    /// Nested graphs are left alone. Initializers consumed by the nodes are
    /// passed in as extra inputs after the graph inputs.
    pub fn get_capability(&self, graph: &Graph) -> Vec<ComputeCapability> {
        if graph.metadata.is_subgraph {
            tracing::info!("get_capability: skipping nested subgraph");
            return Vec::new();
        }

        let nodes = match graph.topological_order() {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::warn!("get_capability: cannot order graph: {}", e);
                return Vec::new();
            }
        };

        let mut required_initializers = BTreeSet::new();
        for &id in &nodes {
            let node = &graph.nodes[id];
            tracing::info!("  add to subgraph: node = {} ({})", node.op_type, node.name);
            for input in node.inputs.iter().filter(|i| !i.is_empty()) {
                if graph.is_initializer(input) && !graph.inputs.contains(input) {
                    required_initializers.insert(input.clone());
                }
            }
        }

        let mut inputs = graph.inputs.clone();
        inputs.extend(required_initializers);
        let meta_def = MetaDef {
            name: FUSED_NODE_DOMAIN.to_string(),
            domain: FUSED_NODE_DOMAIN.to_string(),
            since_version: 1,
            inputs,
            outputs: graph.outputs.clone(),
        };
        vec![ComputeCapability {
            sub_graph: IndexedSubGraph {
                nodes,
                meta_def: Some(meta_def),
            },
        }]
    }

    /// Compile every fused subgraph into one module and return a compute
    /// function per subgraph, in order.
    ///
    /// Any failure fails the whole request; nothing is returned for the
    /// subgraphs that did import.
    #[tracing::instrument(skip_all, fields(subgraphs = fused_nodes_and_graphs.len()))]
    pub fn compile(
        &self,
        fused_nodes_and_graphs: &[FusedNodeAndGraph<'_>],
    ) -> Result<Vec<NodeComputeInfo>> {
        let mut compiler = CompilerSession::new()?;
        compiler.set_reproducer_path(&self.config.reproducer_path);
        let device_flag = self.config.device_flag();
        tracing::info!("compile: setting device flag as {}", device_flag);
        compiler.set_flag(&device_flag)?;
        for flag in &self.config.compiler_flags {
            compiler.set_flag(flag)?;
        }
        compiler.initialize()?;

        let mut inv = CompilerInvocation::new(&compiler, MODULE_NAME)?;

        // One function per fused node in a single module.
        let mut entry_points = Vec::with_capacity(fused_nodes_and_graphs.len());
        for fused in fused_nodes_and_graphs {
            inv.import_subgraph(&fused.view, &fused.fused_node_name)?;
            entry_points.push(qualified_entry_name(MODULE_NAME, &fused.fused_node_name));
        }

        let mut output = match self.config.module_loading {
            ModuleLoading::File => self.open_artifact_file()?,
            ModuleLoading::Memory => CompilerOutput::open_membuffer(),
        };
        inv.compile_and_output_artifact(&mut output)?;

        let mut session = rt::Session::new(self.instance.clone());
        session.initialize()?;
        match self.config.module_loading {
            ModuleLoading::File => {
                let path = output.path().map(PathBuf::from).ok_or_else(|| {
                    EpError::Compilation("compiler output has no file path".to_string())
                })?;
                session.append_module(ModuleSource::File(&path), output.release())?;
            }
            ModuleLoading::Memory => {
                let contents = output.map_memory()?.to_vec();
                session.append_module(ModuleSource::Memory(&contents), output.release())?;
            }
        }

        let session = Arc::new(session);
        Ok(entry_points
            .into_iter()
            .map(|entry_point| create_node_compute_info(entry_point, session.clone()))
            .collect())
    }

    /// Create a fresh, uniquely named artifact file in `artifact_dir`.
    ///
    /// The file is created exclusively, so providers sharing a directory
    /// never write to the same artifact. It is owned by the returned output
    /// and removed when that output is destroyed.
    fn open_artifact_file(&self) -> Result<CompilerOutput> {
        let reserved = tempfile::Builder::new()
            .prefix("kiln-")
            .suffix(".kvmb")
            .tempfile_in(&self.config.artifact_dir)?
            .into_temp_path();
        let output = CompilerOutput::open_file(&reserved)?;
        reserved.keep().map_err(|e| e.error)?;
        Ok(output)
    }
}

fn create_node_compute_info(entry_point: String, session: Arc<rt::Session>) -> NodeComputeInfo {
    let name = entry_point.clone();
    NodeComputeInfo {
        entry_point,
        compute: Box::new(move |cx: &mut KernelContext| session.call(&name, cx)),
    }
}

/// Holds provider options and creates providers from them.
#[derive(Debug, Clone, Default)]
pub struct ProviderFactory {
    options: ProviderOptions,
}

impl ProviderFactory {
    pub fn new(options: ProviderOptions) -> Self {
        Self { options }
    }

    pub fn create_provider(&self) -> Result<ExecutionProvider> {
        ExecutionProvider::new(self.options.clone())
    }
}
