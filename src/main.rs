use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flowboot::config::Config;
use flowboot::graph::TaskGraph;
use flowboot::manifest::{CompiledFlow, FlowKind, TemplateBody};
use flowboot::output::{render_stream, write_manifest};
use flowboot::params::parse_cli_vars;
use flowboot::Compiler;

#[derive(Parser)]
#[command(name = "flowboot")]
#[command(about = "Compile declarative YAML pipelines into Argo Workflow manifests", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile flow documents into manifests
    Compile {
        /// Flow documents
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Output directory (default from config: out)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the manifests instead of writing files
        #[arg(long)]
        stdout: bool,
        #[command(flatten)]
        args: CompileArgs,
    },
    /// Compile without writing and report each flow
    Validate {
        /// Flow document
        file: PathBuf,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        args: CompileArgs,
    },
    /// Show the step or task graph of a compiled template
    Graph {
        /// Flow document
        file: PathBuf,
        /// Flow name (default: first flow)
        #[arg(long)]
        flow: Option<String>,
        /// Template name
        #[arg(short, long, default_value = "main")]
        template: String,
        /// Show execution order instead of the tree
        #[arg(long)]
        order: bool,
        #[command(flatten)]
        args: CompileArgs,
    },
    /// Recompile whenever the document changes
    Watch {
        /// Flow document
        file: PathBuf,
        /// Output directory (default from config: out)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        args: CompileArgs,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Args, Clone)]
struct CompileArgs {
    /// Variable assignments (key=value)
    #[arg(short, long = "var", value_parser = parse_var)]
    vars: Vec<(String, String)>,
    /// Argo Server base URL for external templates
    #[arg(long)]
    argo_server: Option<String>,
    /// Namespace of external WorkflowTemplates
    #[arg(long)]
    namespace: Option<String>,
    /// Directory holding external template manifests
    #[arg(long = "template-dir")]
    template_dirs: Vec<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum CompletionShell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

impl From<CompletionShell> for Shell {
    fn from(shell: CompletionShell) -> Self {
        match shell {
            CompletionShell::Bash => Shell::Bash,
            CompletionShell::Zsh => Shell::Zsh,
            CompletionShell::Fish => Shell::Fish,
            CompletionShell::PowerShell => Shell::PowerShell,
            CompletionShell::Elvish => Shell::Elvish,
        }
    }
}

fn parse_var(s: &str) -> std::result::Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid variable format '{}'. Expected key=value", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose {
        "flowboot=debug"
    } else {
        "flowboot=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Compile {
            files,
            output,
            stdout,
            args,
        } => cmd_compile(&files, output, stdout, &args),
        Commands::Validate { file, json, args } => cmd_validate(&file, json, &args),
        Commands::Graph {
            file,
            flow,
            template,
            order,
            args,
        } => cmd_graph(&file, flow.as_deref(), &template, order, &args),
        Commands::Watch { file, output, args } => cmd_watch(&file, output, &args),
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

/// Generate shell completions
fn cmd_completions(shell: CompletionShell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    let shell: Shell = shell.into();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Layered config with CLI flags applied last.
fn load_config(args: &CompileArgs) -> Config {
    let mut config = Config::load();
    if let Some(server) = &args.argo_server {
        config.resolver.argo_server = Some(server.clone());
    }
    if let Some(namespace) = &args.namespace {
        config.resolver.namespace = namespace.clone();
    }
    config
        .resolver
        .template_dirs
        .extend(args.template_dirs.iter().cloned());
    config
}

fn build_compiler(config: &Config, args: &CompileArgs) -> anyhow::Result<Compiler> {
    Ok(Compiler::from_config(config)?.with_vars(parse_cli_vars(&args.vars)))
}

/// Compile one file, reporting failed flows on stderr.
fn compile_file(compiler: &mut Compiler, file: &Path) -> anyhow::Result<(Vec<CompiledFlow>, usize)> {
    if !file.exists() {
        bail!("File not found: {}", file.display());
    }

    let results = compiler
        .compile_file(file)
        .with_context(|| format!("Cannot compile {}", file.display()))?;

    let mut compiled = Vec::new();
    let mut failures = 0;
    for result in results {
        match result {
            Ok(flow) => compiled.push(flow),
            Err(e) => {
                failures += 1;
                eprintln!("✗ {}: [{}] {}", file.display(), e.code(), e);
            }
        }
    }
    Ok((compiled, failures))
}

fn submit_hint(flow: &CompiledFlow, path: &Path) -> String {
    // generateName only works with create
    let verb = match flow.manifest.kind {
        FlowKind::Workflow => "create",
        _ => "apply",
    };
    format!("kubectl {} -f {}", verb, path.display())
}

fn write_all(flows: &[CompiledFlow], out_dir: &Path) -> anyhow::Result<()> {
    for flow in flows {
        let path = write_manifest(out_dir, flow)
            .with_context(|| format!("Cannot write manifest of '{}'", flow.name))?;
        println!(
            "✓ {} '{}' written to {}",
            flow.manifest.kind,
            flow.name,
            path.display()
        );
        info!("Submit with: {}", submit_hint(flow, &path));
    }
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_compile(
    files: &[PathBuf],
    output: Option<PathBuf>,
    stdout: bool,
    args: &CompileArgs,
) -> anyhow::Result<()> {
    let config = load_config(args);
    let mut compiler = build_compiler(&config, args)?;
    let out_dir = output.unwrap_or_else(|| config.output.dir.clone());

    let mut compiled = Vec::new();
    let mut failures = 0;
    for file in files {
        let (flows, failed) = compile_file(&mut compiler, file)?;
        compiled.extend(flows);
        failures += failed;
    }

    if stdout {
        print!("{}", render_stream(&compiled)?);
    } else {
        write_all(&compiled, &out_dir)?;
    }

    if failures > 0 {
        bail!("{} flow(s) failed to compile", failures);
    }
    Ok(())
}

fn cmd_validate(file: &Path, json: bool, args: &CompileArgs) -> anyhow::Result<()> {
    let config = load_config(args);
    let mut compiler = build_compiler(&config, args)?;

    if !file.exists() {
        bail!("File not found: {}", file.display());
    }
    let results = compiler.compile_file(file)?;
    let failures = results.iter().filter(|r| r.is_err()).count();

    if json {
        let report: Vec<serde_json::Value> = results
            .iter()
            .map(|result| match result {
                Ok(flow) => serde_json::json!({
                    "success": true,
                    "flow": flow.name,
                    "kind": flow.manifest.kind.to_string(),
                    "templates": flow.manifest.spec.workflow().templates.len(),
                }),
                Err(e) => e.to_json(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for result in &results {
            match result {
                Ok(flow) => {
                    let spec = flow.manifest.spec.workflow();
                    println!("✓ Flow '{}' is valid", flow.name);
                    println!("  Kind: {}", flow.manifest.kind);
                    println!("  Templates: {}", spec.templates.len());
                    if let Some(entrypoint) = &spec.entrypoint {
                        println!("  Entrypoint: {}", entrypoint);
                    }
                }
                Err(e) => eprintln!("✗ [{}] {}", e.code(), e),
            }
        }
    }

    if failures > 0 {
        bail!("{} flow(s) failed to compile", failures);
    }
    Ok(())
}

fn cmd_graph(
    file: &Path,
    flow_name: Option<&str>,
    template: &str,
    show_order: bool,
    args: &CompileArgs,
) -> anyhow::Result<()> {
    let config = load_config(args);
    let mut compiler = build_compiler(&config, args)?;
    let (flows, _) = compile_file(&mut compiler, file)?;

    let flow = match flow_name {
        Some(name) => flows.iter().find(|f| f.name == name),
        None => flows.first(),
    }
    .ok_or_else(|| anyhow::anyhow!("Flow not found: {}", flow_name.unwrap_or("(first)")))?;

    let spec = flow.manifest.spec.workflow();
    let tpl = spec
        .template(template)
        .ok_or_else(|| anyhow::anyhow!("Template '{}' not found in flow '{}'", template, flow.name))?;

    match &tpl.body {
        TemplateBody::Dag(dag) => {
            let graph = TaskGraph::from_tasks(&dag.tasks);
            if show_order {
                println!("Execution order for '{}':", template);
                println!();
                for (i, task) in graph.execution_order()?.iter().enumerate() {
                    println!("  {}. {}", i + 1, task);
                }
            } else {
                for sink in graph.sinks() {
                    println!("{}", graph.to_text(sink));
                }
            }
        }
        TemplateBody::Steps(groups) => {
            println!("Steps of '{}':", template);
            println!();
            for (i, group) in groups.iter().enumerate() {
                let names: Vec<String> = group
                    .iter()
                    .map(|step| match (&step.template, &step.template_ref) {
                        (Some(callee), _) => format!("{} ({})", step.name, callee),
                        (None, Some(tref)) => {
                            format!("{} ({}/{})", step.name, tref.name, tref.template)
                        }
                        (None, None) => step.name.clone(),
                    })
                    .collect();
                println!("  {}. {}", i + 1, names.join(" | "));
            }
        }
        other => bail!(
            "Template '{}' is a {} template and has no graph",
            template,
            other.kind()
        ),
    }
    Ok(())
}

fn cmd_watch(file: &Path, output: Option<PathBuf>, args: &CompileArgs) -> anyhow::Result<()> {
    use notify_debouncer_mini::{new_debouncer, notify::RecursiveMode};
    use std::time::Duration;

    if !file.exists() {
        bail!("File not found: {}", file.display());
    }

    let canonical_path = file.canonicalize()?;
    let watch_dir = canonical_path
        .parent()
        .unwrap_or(Path::new("."))
        .to_path_buf();

    let config = load_config(args);
    let out_dir = output.unwrap_or_else(|| config.output.dir.clone());

    println!("flowboot watch");
    println!("Watching: {}", canonical_path.display());
    println!("Press Ctrl+C to stop\n");

    let rebuild = || {
        let result = build_compiler(&config, args)
            .and_then(|mut compiler| compile_file(&mut compiler, &canonical_path))
            .and_then(|(flows, _)| write_all(&flows, &out_dir));
        if let Err(e) = result {
            eprintln!("✗ {:#}", e);
        }
    };

    // Initial build
    rebuild();

    let (notify_tx, notify_rx) = std::sync::mpsc::channel();
    let mut debouncer = new_debouncer(Duration::from_millis(500), notify_tx)?;
    debouncer
        .watcher()
        .watch(&watch_dir, RecursiveMode::NonRecursive)?;

    for result in notify_rx {
        let Ok(events) = result else {
            continue;
        };
        if events.iter().any(|event| event.path == canonical_path) {
            println!(
                "\n--- File changed: {} ---",
                chrono::Local::now().format("%H:%M:%S")
            );
            rebuild();
        }
    }

    Ok(())
}
