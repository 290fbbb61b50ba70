//! Kiln CLI - import, compile and run ONNX models through the kiln provider.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use half::{bf16, f16};
use kiln_ep::jit::{CompilerInvocation, CompilerOutput, CompilerSession};
use kiln_ep::{
    ExecutionProvider, FusedNodeAndGraph, HostTensor, KernelContext, MODULE_NAME,
    ProviderConfig, ProviderOptions,
};
use kiln_onnx::{DataType, Dimension, Graph, GraphView, TensorShape};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Compile ONNX subgraphs to kiln bytecode and run them", long_about = None)]
#[command(version)]
struct Cli {
    /// Log debug output from the compiler and runtime
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import an ONNX model and print the resulting IR
    Import {
        /// Path to the ONNX model file
        #[arg(value_name = "MODEL")]
        model: PathBuf,
    },
    /// Compile an ONNX model to a bytecode module file
    Compile {
        /// Path to the ONNX model file
        #[arg(value_name = "MODEL")]
        model: PathBuf,

        /// Output module path
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Compiler target backend
        #[arg(long, default_value = "llvm-cpu")]
        target: String,
    },
    /// Compile an ONNX model and run it once on constant inputs
    Run {
        /// Path to the ONNX model file
        #[arg(value_name = "MODEL")]
        model: PathBuf,

        /// Runtime device
        #[arg(long, default_value = "local-sync")]
        device: String,

        /// Value every input element is set to
        #[arg(long, default_value = "1.0")]
        fill: f64,

        /// Dynamic dimension values (format: name=value, can be repeated)
        #[arg(short = 'd', long = "dynamic-dim")]
        dynamic_dims: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Import { model } => cmd_import(&model),
        Commands::Compile {
            model,
            output,
            target,
        } => cmd_compile(&model, &output, &target),
        Commands::Run {
            model,
            device,
            fill,
            dynamic_dims,
        } => cmd_run(&model, &device, fill, &dynamic_dims),
    }
}

fn load_graph(model_path: &Path) -> Result<Graph> {
    kiln_onnx::load_and_parse_model(model_path)
        .with_context(|| format!("Failed to load model from {}", model_path.display()))
}

/// Compiler session configured for `target`, ready for invocations.
fn compiler_session(target: &str) -> Result<CompilerSession> {
    let config = ProviderConfig {
        hal_target_device: target.to_string(),
        ..ProviderConfig::default()
    };
    let mut session = CompilerSession::new()?;
    session
        .set_flag(&config.device_flag())
        .with_context(|| format!("Unsupported target '{}'", target))?;
    session.initialize()?;
    Ok(session)
}

fn main_function_name(graph: &Graph) -> String {
    if graph.metadata.name.is_empty() {
        "main".to_string()
    } else {
        graph.metadata.name.clone()
    }
}

/// Print the IR of the whole model imported as one function.
fn cmd_import(model_path: &Path) -> Result<()> {
    let graph = load_graph(model_path)?;
    let session = compiler_session("llvm-cpu")?;
    let mut inv = CompilerInvocation::new(&session, MODULE_NAME)?;
    let view = GraphView::full(&graph).context("Failed to build graph view")?;
    inv.import_subgraph(&view, &main_function_name(&graph))
        .context("Failed to import model")?;

    match inv.module_ir() {
        Some(ir) => print!("{}", ir),
        None => bail!("Imported module is not available"),
    }
    Ok(())
}

fn cmd_compile(model_path: &Path, output_path: &Path, target: &str) -> Result<()> {
    let graph = load_graph(model_path)?;
    let session = compiler_session(target)?;
    let mut inv = CompilerInvocation::new(&session, MODULE_NAME)?;
    let view = GraphView::full(&graph).context("Failed to build graph view")?;
    let func_name = main_function_name(&graph);
    inv.import_subgraph(&view, &func_name)
        .context("Failed to import model")?;

    let mut output = CompilerOutput::open_file(output_path)
        .with_context(|| format!("Failed to open {}", output_path.display()))?;
    inv.compile_and_output_artifact(&mut output)
        .context("Failed to compile model")?;
    output.keep();

    eprintln!(
        "Wrote {}.{} to {}",
        MODULE_NAME,
        func_name,
        output_path.display()
    );
    Ok(())
}

fn cmd_run(model_path: &Path, device: &str, fill: f64, dynamic_dim_args: &[String]) -> Result<()> {
    let mut graph = load_graph(model_path)?;
    let dynamic_dims = parse_dynamic_dims(dynamic_dim_args)?;
    resolve_input_shapes(&mut graph, &dynamic_dims)?;

    let options = ProviderOptions::from([("device".to_string(), device.to_string())]);
    let provider = ExecutionProvider::new(options).context("Failed to create provider")?;

    let Some(capability) = provider.get_capability(&graph).into_iter().next() else {
        bail!("Provider claimed no nodes of the model");
    };
    let fused = FusedNodeAndGraph {
        fused_node_name: main_function_name(&graph),
        view: GraphView::from_indexed(&graph, &capability.sub_graph)
            .context("Failed to build graph view")?,
    };
    let Some(meta_def) = capability.sub_graph.meta_def.as_ref() else {
        bail!("Claimed subgraph has no boundary");
    };

    let mut inputs = Vec::with_capacity(meta_def.inputs.len());
    for name in &meta_def.inputs {
        let info = graph.tensor_by_name(name)?;
        let tensor = match &info.initializer {
            Some(data) => {
                let shape = static_shape(name, &info.shape)?;
                HostTensor::new(info.dtype, shape, data.clone())
            }
            None => filled_tensor(name, info.dtype, &info.shape, fill)?,
        };
        inputs.push(tensor.into());
    }

    let compute = provider
        .compile(&[fused])
        .context("Failed to compile model")?
        .remove(0);
    let mut cx = KernelContext::new(inputs, meta_def.outputs.len());
    compute
        .compute(&mut cx)
        .with_context(|| format!("Failed to run {}", compute.entry_point))?;

    let outputs = cx.take_outputs().context("Call produced no outputs")?;
    for (name, tensor) in meta_def.outputs.iter().zip(&outputs) {
        println!(
            "{}: {} {:?} = {}",
            name,
            tensor.dtype,
            tensor.shape,
            preview(tensor)
        );
    }
    Ok(())
}

fn parse_dynamic_dims(args: &[String]) -> Result<HashMap<String, usize>> {
    let mut dims = HashMap::new();
    for arg in args {
        let Some((name, value)) = arg.split_once('=') else {
            bail!("Invalid dynamic dimension '{}': expected name=value", arg);
        };
        let value: usize = value
            .parse()
            .with_context(|| format!("Invalid value for dynamic dimension '{}'", name))?;
        dims.insert(name.to_string(), value);
    }
    Ok(dims)
}

/// Replace named dimensions of the graph inputs with concrete sizes.
fn resolve_input_shapes(graph: &mut Graph, dims: &HashMap<String, usize>) -> Result<()> {
    for name in graph.inputs.clone() {
        let id = graph.tensor_id(&name)?;
        let info = &mut graph.tensor_info[id];
        let TensorShape::Dynamic(symbolic) = &info.shape else {
            continue;
        };
        let mut resolved = Vec::with_capacity(symbolic.len());
        for dim in symbolic {
            match dim {
                Dimension::Static(size) => resolved.push(*size),
                Dimension::Named(symbol) => match dims.get(symbol) {
                    Some(&size) => resolved.push(size),
                    None => bail!(
                        "Input '{}' has dynamic dimension '{}'; pass -d {}=N",
                        name,
                        symbol,
                        symbol
                    ),
                },
            }
        }
        info.shape = TensorShape::Static(resolved);
    }
    Ok(())
}

fn static_shape(name: &str, shape: &TensorShape) -> Result<Vec<i64>> {
    let Some(dims) = shape.as_static() else {
        bail!("Tensor '{}' has no static shape", name);
    };
    Ok(dims.iter().map(|&d| d as i64).collect())
}

fn filled_tensor(name: &str, dtype: DataType, shape: &TensorShape, fill: f64) -> Result<HostTensor> {
    let shape = static_shape(name, shape)?;
    let count = shape.iter().product::<i64>() as usize;
    let tensor = match dtype {
        DataType::F32 => HostTensor::from_slice(dtype, &shape, &vec![fill as f32; count]),
        DataType::F64 => HostTensor::from_slice(dtype, &shape, &vec![fill; count]),
        DataType::F16 => HostTensor::from_slice(dtype, &shape, &vec![f16::from_f64(fill); count]),
        DataType::BF16 => {
            HostTensor::from_slice(dtype, &shape, &vec![bf16::from_f64(fill); count])
        }
        DataType::I32 => HostTensor::from_slice(dtype, &shape, &vec![fill as i32; count]),
        DataType::I64 => HostTensor::from_slice(dtype, &shape, &vec![fill as i64; count]),
        DataType::U8 => HostTensor::from_slice(dtype, &shape, &vec![fill as u8; count]),
        DataType::Bool => HostTensor::from_slice(dtype, &shape, &vec![(fill != 0.0) as u8; count]),
        other => bail!("Cannot fill input '{}' of type {}", name, other),
    };
    Ok(tensor)
}

/// First few elements of a result, formatted for the terminal.
fn preview(tensor: &HostTensor) -> String {
    const LIMIT: usize = 8;
    fn join<T: std::fmt::Display>(values: impl Iterator<Item = T>, total: usize) -> String {
        let mut items: Vec<String> = values.take(LIMIT).map(|v| v.to_string()).collect();
        if total > LIMIT {
            items.push(format!("... ({} total)", total));
        }
        format!("[{}]", items.join(", "))
    }

    let count = tensor.data.len() / tensor.dtype.size().max(1);
    match tensor.dtype {
        DataType::F32 => join(tensor.to_vec::<f32>().into_iter(), count),
        DataType::F64 => join(tensor.to_vec::<f64>().into_iter(), count),
        DataType::F16 => join(tensor.to_vec::<f16>().into_iter(), count),
        DataType::BF16 => join(tensor.to_vec::<bf16>().into_iter(), count),
        DataType::I32 => join(tensor.to_vec::<i32>().into_iter(), count),
        DataType::I64 => join(tensor.to_vec::<i64>().into_iter(), count),
        DataType::U8 | DataType::Bool => join(tensor.data.iter(), count),
        _ => format!("<{} bytes>", tensor.data.len()),
    }
}
