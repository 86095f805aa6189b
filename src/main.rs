use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use brutus::agent::{Agent, DEFAULT_SYSTEM_PROMPT, SYSTEM_PROMPT_FILE};
use brutus::bus::MessageBus;
use brutus::config::Config;
use brutus::discovery::{self, ServiceCache};
use brutus::harness::{scenario, AgentConfig, AgentJob, Harness, DEFAULT_MAX_TURNS};
use brutus::providers::{Provider, ProviderPool, SaturnProvider};
use brutus::tools;
use brutus::util::CancelToken;

/// `BRUTUS` - interactive coding agent over mDNS-discovered LLM backends.
#[derive(Parser, Debug)]
#[command(name = "brutus")]
#[command(version = "0.1.0")]
#[command(about = "Interactive coding agent over mDNS-discovered LLM backends", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the interactive agent loop against a discovered backend
    Agent {
        /// Single message mode (don't enter interactive mode)
        #[arg(short, long)]
        message: Option<String>,

        /// Working directory for tools (default: current directory)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Model to use (default: first advertised by the backend)
        #[arg(long)]
        model: Option<String>,
    },

    /// Browse the local network and print discovered backends, best first
    Discover {
        /// Browse window in seconds
        #[arg(long, default_value_t = 3)]
        timeout: u64,
    },

    /// List registered tools
    Tools {
        /// Working directory for tools
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Invoke a single tool with JSON arguments
    Tool {
        /// Tool name
        name: String,

        /// JSON object with the tool arguments
        args: String,

        /// Working directory for tools
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Run a mock scenario file and validate its assertions
    Scenario {
        file: PathBuf,

        /// Run the scenario's agents in parallel
        #[arg(long)]
        concurrent: bool,

        /// Provider-call cap per agent
        #[arg(long)]
        max_turns: Option<usize>,
    },

    /// Run scenario agents through the multi-agent harness (mock providers)
    MultiAgent {
        file: PathBuf,

        /// Run agents in parallel
        #[arg(long)]
        concurrent: bool,

        /// Provider-call cap per agent
        #[arg(long)]
        max_turns: Option<usize>,
    },

    /// Run scenario agents against live discovered backends
    LiveMultiAgent {
        file: PathBuf,

        /// Run agents in parallel
        #[arg(long)]
        concurrent: bool,

        /// Discovery timeout in seconds
        #[arg(long, default_value_t = 3)]
        timeout: u64,

        /// Provider-call cap per agent
        #[arg(long)]
        max_turns: Option<usize>,

        /// Model to use on every backend
        #[arg(long)]
        model: Option<String>,
    },

    /// Run the built-in two-agent demo through the harness
    Harness {
        /// Run agents in parallel
        #[arg(long)]
        concurrent: bool,
    },
}

/// Built-in demo used by the `harness` subcommand.
const DEMO_SCENARIO: &str = r#"{
    "name": "demo",
    "description": "Two agents coordinating over the broadcast channel",
    "agents": [
        {
            "id": "scout",
            "system_prompt": "You explore and report.",
            "user_messages": ["Look around and report what you find."],
            "mock_responses": [
                {"tool_call": "broadcast", "input": {"from": "scout", "message": "area clear"}},
                {"content": "Reported findings."}
            ]
        },
        {
            "id": "listener",
            "system_prompt": "You watch the channel.",
            "user_messages": ["Check for reports."],
            "mock_responses": [
                {"tool_call": "observe", "input": {}},
                {"content": "Channel checked."}
            ]
        }
    ],
    "assertions": [
        {"agent_id": "scout", "type": "tool_called", "value": "broadcast"},
        {"agent_id": "listener", "type": "tool_called", "value": "observe"},
        {"agent_id": "scout", "type": "success"},
        {"agent_id": "listener", "type": "success"}
    ]
}"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Install default crypto provider for Rustls TLS.
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Warning: Failed to install default crypto provider: {e:?}");
    }

    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = Config::load()?;

    match cli.command {
        Commands::Agent {
            message,
            dir,
            model,
        } => run_agent(&config, message, dir, model, cli.verbose).await,

        Commands::Discover { timeout } => run_discover(Duration::from_secs(timeout)).await,

        Commands::Tools { dir } => {
            let registry = build_registry(&config, dir)?.0;
            for tool in registry.all() {
                println!("{:<14} {}", tool.name(), tool.description());
            }
            Ok(())
        }

        Commands::Tool { name, args, dir } => run_tool(&config, &name, &args, dir).await,

        Commands::Scenario {
            file,
            concurrent,
            max_turns,
        }
        | Commands::MultiAgent {
            file,
            concurrent,
            max_turns,
        } => {
            let scenario = scenario::load_scenario(&file)?;
            run_mock_scenario(&config, &scenario, concurrent, max_turns, cli.verbose).await
        }

        Commands::LiveMultiAgent {
            file,
            concurrent,
            timeout,
            max_turns,
            model,
        } => {
            run_live_scenario(
                &config,
                &file,
                concurrent,
                Duration::from_secs(timeout),
                max_turns,
                model,
                cli.verbose,
            )
            .await
        }

        Commands::Harness { concurrent } => {
            let scenario: scenario::Scenario =
                serde_json::from_str(DEMO_SCENARIO).context("built-in demo scenario is invalid")?;
            run_mock_scenario(&config, &scenario, concurrent, None, cli.verbose).await
        }
    }
}

fn print_error(err: &dyn std::fmt::Display) {
    eprintln!("{} {err}", style("[error]").red().bold());
}

fn resolve_workdir(config: &Config, dir: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = dir.or_else(|| config.workdir()) {
        return Ok(dir);
    }
    std::env::current_dir().context("cannot determine current directory")
}

fn build_registry(
    config: &Config,
    dir: Option<PathBuf>,
) -> Result<(Arc<tools::ToolRegistry>, Arc<MessageBus>)> {
    let workdir = resolve_workdir(config, dir)?;
    let bus = Arc::new(MessageBus::new());
    Ok((Arc::new(tools::default_registry(&workdir, bus.clone())), bus))
}

fn load_system_prompt(workdir: &std::path::Path) -> String {
    match std::fs::read_to_string(workdir.join(SYSTEM_PROMPT_FILE)) {
        Ok(prompt) if !prompt.trim().is_empty() => prompt,
        _ => DEFAULT_SYSTEM_PROMPT.to_string(),
    }
}

/// Signal-wired cancellation: Ctrl-C cancels the token; the loop winds down
/// at the next boundary.
fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    cancel
}

async fn run_agent(
    config: &Config,
    message: Option<String>,
    dir: Option<PathBuf>,
    model: Option<String>,
    verbose: bool,
) -> Result<()> {
    let workdir = resolve_workdir(config, dir)?;
    let system_prompt = load_system_prompt(&workdir);

    let mut options = config.provider_options();
    if let Some(model) = model {
        options.model = model;
    }

    let cache = Arc::new(ServiceCache::new(
        config.cache_ttl(),
        options.discovery_timeout,
    ));
    let services = match cache.get().await {
        Ok(services) => services,
        Err(e) => {
            print_error(&e);
            std::process::exit(1);
        }
    };
    let service = match discovery::select(&services, &options.filter) {
        Ok(service) => service,
        Err(e) => {
            print_error(&e);
            std::process::exit(1);
        }
    };
    info!(backend = %service.name, url = %service.base_url(), "selected backend");

    let provider: Arc<dyn Provider> = Arc::new(SaturnProvider::new(service, &options));
    let bus = Arc::new(MessageBus::new());
    let registry = Arc::new(tools::default_registry(&workdir, bus));
    let mut agent = Agent::new(provider, registry, system_prompt, verbose);

    let cancel = cancel_on_ctrl_c();

    let outcome = if let Some(message) = message {
        agent.run_task(&message, None, &cancel).await.map(|reply| {
            if !reply.is_empty() {
                println!("{reply}");
            }
        })
    } else {
        println!("brutus agent · working dir {} · 'quit' to exit", workdir.display());
        let stdin = std::io::stdin();
        agent
            .run_interactive(
                move || {
                    use std::io::{BufRead, Write};
                    print!("> ");
                    let _ = std::io::stdout().flush();
                    let mut line = String::new();
                    match stdin.lock().read_line(&mut line) {
                        Ok(0) | Err(_) => None,
                        Ok(_) => Some(line),
                    }
                },
                &cancel,
            )
            .await
    };

    if let Err(e) = outcome {
        print_error(&e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run_discover(timeout: Duration) -> Result<()> {
    println!("Browsing {} for {timeout:?}...", discovery::SERVICE_TYPE);
    let mut services = match discovery::discover(timeout).await {
        Ok(services) => services,
        Err(e) => {
            print_error(&e);
            std::process::exit(1);
        }
    };
    discovery::sort_by_score(&mut services);

    println!(
        "{:<20} {:<22} {:>8} {:>6} {:>7}  {}",
        "Name", "Endpoint", "Priority", "Load", "Score", "Health"
    );
    for service in &services {
        println!(
            "{:<20} {:<22} {:>8} {:>5.0}% {:>7.1}  {}",
            service.name,
            format!("{}:{}", service.host, service.port),
            service.priority,
            service.load_fraction() * 100.0,
            service.score(),
            if service.health_status.is_empty() {
                "-"
            } else {
                &service.health_status
            }
        );
    }
    Ok(())
}

async fn run_tool(config: &Config, name: &str, args: &str, dir: Option<PathBuf>) -> Result<()> {
    let (registry, _bus) = build_registry(config, dir)?;
    let Some(tool) = registry.get(name) else {
        bail!("tool '{name}' not found (try `brutus tools`)");
    };

    let input: serde_json::Value = if args.trim().is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(args).context("tool arguments must be a JSON object")?
    };

    let outcome = tool.execute(input).await?;
    if !outcome.output.is_empty() {
        println!("{}", outcome.output);
    }
    if !outcome.success {
        print_error(&outcome.error.unwrap_or_else(|| "tool failed".into()));
        std::process::exit(1);
    }
    Ok(())
}

fn build_harness(
    config: &Config,
    max_turns: Option<usize>,
    verbose: bool,
) -> Result<Harness> {
    let (registry, bus) = build_registry(config, None)?;
    Ok(Harness::new(
        registry,
        bus,
        max_turns.unwrap_or(DEFAULT_MAX_TURNS),
        verbose,
    ))
}

async fn run_mock_scenario(
    config: &Config,
    scenario_def: &scenario::Scenario,
    concurrent: bool,
    max_turns: Option<usize>,
    verbose: bool,
) -> Result<()> {
    println!(
        "Running scenario '{}' ({} agents, {})",
        scenario_def.name,
        scenario_def.agents.len(),
        if concurrent { "concurrent" } else { "sequential" }
    );
    let harness = build_harness(config, max_turns, verbose)?;
    let results = scenario::run_scenario(&harness, scenario_def, concurrent).await;
    Harness::print_summary(&results);
    report_assertions(&results, &scenario_def.assertions)
}

async fn run_live_scenario(
    config: &Config,
    file: &std::path::Path,
    concurrent: bool,
    timeout: Duration,
    max_turns: Option<usize>,
    model: Option<String>,
    verbose: bool,
) -> Result<()> {
    let scenario_def = scenario::load_scenario(file)?;

    let mut options = config.provider_options();
    options.discovery_timeout = timeout;
    if let Some(model) = model {
        options.model = model;
    }

    let cache = Arc::new(ServiceCache::new(config.cache_ttl(), timeout));
    let pool = match ProviderPool::connect(cache, options, 1).await {
        Ok(pool) => pool,
        Err(e) => {
            print_error(&e);
            std::process::exit(1);
        }
    };
    let provider: Arc<dyn Provider> = Arc::new(pool);

    let jobs: Vec<AgentJob> = scenario_def
        .agents
        .iter()
        .map(|agent| AgentJob {
            config: AgentConfig {
                id: agent.id.clone(),
                system_prompt: agent.system_prompt.clone(),
                tasks: agent.user_messages.clone(),
                workdir: None,
            },
            provider: provider.clone(),
        })
        .collect();

    println!(
        "Running '{}' against live backends ({} agents)",
        scenario_def.name,
        jobs.len()
    );
    let harness = build_harness(config, max_turns, verbose)?;
    let cancel = cancel_on_ctrl_c();
    let results = if concurrent {
        harness.run_concurrent(jobs, &cancel).await
    } else {
        harness.run_sequential(jobs, &cancel).await
    };
    Harness::print_summary(&results);
    report_assertions(&results, &scenario_def.assertions)
}

fn report_assertions(
    results: &[brutus::harness::AgentResult],
    assertions: &[scenario::Assertion],
) -> Result<()> {
    if assertions.is_empty() {
        return Ok(());
    }
    let failures = scenario::validate_assertions(results, assertions);
    if failures.is_empty() {
        println!(
            "{} all {} assertions passed",
            style("ok").green(),
            assertions.len()
        );
        Ok(())
    } else {
        for failure in &failures {
            eprintln!("{} {failure}", style("assertion failed:").red());
        }
        bail!("{} of {} assertions failed", failures.len(), assertions.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_has_no_flag_conflicts() {
        Cli::command().debug_assert();
    }

    #[test]
    fn demo_scenario_parses() {
        let scenario: scenario::Scenario = serde_json::from_str(DEMO_SCENARIO).unwrap();
        assert_eq!(scenario.agents.len(), 2);
        assert_eq!(scenario.assertions.len(), 4);
    }
}
