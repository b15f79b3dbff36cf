use anyhow::{Context, Result};
use flow::cli::commands::{RunCommand, ValidateCommand};
use flow::cli::output::{style, CHECK, CROSS, INFO};
use flow::cli::{Cli, Command};
use flow::client::{ClientRegistry, CommonOpts};
use flow::core::argument::argument_keys;
use flow::core::collection::{Collection, CollectionError};
use flow::core::config::FlowConfig;
use flow::core::step::stdout_sink;
use flow::dag::Visit;
use flow::flow::Flow;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Logs go to stderr; stdout carries whatever the client generates
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
    }

    Ok(())
}

fn declare(config: &FlowConfig, opts: CommonOpts) -> Result<Flow> {
    let registry = ClientRegistry::with_defaults();
    let mut flow = Flow::new_multi(opts, &registry)?;
    config.build(&mut flow)?;
    Ok(flow)
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    let config = FlowConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;

    let opts = CommonOpts {
        name: config.name.clone(),
        version: cmd.args.version.clone(),
        args: cmd.args.clone(),
        argument_kinds: config.arguments.clone(),
        entrypoint: format!("flow run --file {}", cmd.file.display()),
        output: stdout_sink(),
    };
    let local = opts.args.client == "cli";

    let mut flow = declare(&config, opts)?;
    if local {
        eprintln!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());
    }

    match flow.done().await {
        Ok(()) => {
            if local {
                eprintln!(
                    "\n{} {} completed {}",
                    CHECK,
                    style(&config.name).bold(),
                    style("successfully").green()
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("\n{} {} {}", CROSS, style(&config.name).bold(), style("failed").red());
            error!("{:#}", anyhow::Error::from(e));
            std::process::exit(1);
        }
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    let result = FlowConfig::from_file(&cmd.file).and_then(|config| {
        let opts = CommonOpts {
            name: config.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            args: Default::default(),
            argument_kinds: config.arguments.clone(),
            entrypoint: format!("flow run --file {}", cmd.file.display()),
            output: stdout_sink(),
        };
        let mut flow = declare(&config, opts)?;
        flow.resolve()?;
        Ok((config, flow))
    });

    let (config, flow) = match result {
        Ok(resolved) => resolved,
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    };

    let summary = summarize(flow.collection())?;
    println!("{} Pipeline configuration is valid!", CHECK);
    println!("  Name: {}", style(&config.name).bold());
    println!("  Pipelines: {}", style(config.pipelines.len()).cyan());
    println!("  Arguments: {}", style(config.arguments.len()).cyan());

    if cmd.json {
        let data = serde_json::json!({ "name": config.name, "pipelines": summary });
        println!("\n{}", serde_json::to_string_pretty(&data)?);
    } else {
        for p in &summary {
            println!("\n  {}", style(p["name"].as_str().unwrap_or_default()).bold());
            for step in p["steps"].as_array().into_iter().flatten() {
                println!(
                    "    {} {}",
                    style(format!("[{}]", step["id"])).dim(),
                    step["name"].as_str().unwrap_or_default()
                );
            }
        }
    }

    Ok(())
}

/// Pipelines in run order, each with its steps in run order
fn summarize(collection: &Collection) -> Result<Vec<serde_json::Value>> {
    let mut pipelines = Vec::new();
    collection.traverse_pipelines::<CollectionError, _>(|p| {
        let mut steps = Vec::new();
        collection.traverse_steps::<CollectionError, _>(p.id, |s| {
            steps.push(serde_json::json!({
                "id": s.id,
                "name": s.name,
                "image": s.image,
                "background": s.is_background(),
                "requires": argument_keys(&s.required_args),
                "provides": argument_keys(&s.provided_args),
            }));
            Ok(Visit::Continue)
        })?;

        pipelines.push(serde_json::json!({
            "id": p.id,
            "name": p.name,
            "requires": argument_keys(&p.required_args),
            "provides": argument_keys(&p.provided_args),
            "steps": steps,
        }));
        Ok(Visit::Continue)
    })?;

    Ok(pipelines)
}
