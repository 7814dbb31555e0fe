use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use slotroute::{
    ClusterClient, ClusterConfig, ClusterReply, NodeRecord, Reply, SlotInfo, key_slot,
};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "slotroute-cli")]
#[command(about = "slotroute CLI - cluster-aware command-line interface", long_about = None)]
struct Args {
    /// Bootstrap node URL (repeatable), e.g. redis://127.0.0.1:7000
    #[arg(short = 'n', long = "node")]
    nodes: Vec<String>,

    /// YAML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Password sent with AUTH to every node
    #[arg(short = 'a', long)]
    password: Option<String>,

    /// Print parsed CLUSTER replies as JSON
    #[arg(long)]
    json: bool,

    /// Command to execute (if not in interactive mode)
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

fn load_config(args: &Args) -> Result<ClusterConfig> {
    let mut config = if let Some(path) = &args.config {
        ClusterConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?
    } else if !args.nodes.is_empty() {
        ClusterConfig::with_nodes(args.nodes.clone())
    } else {
        ClusterConfig::from_env()
            .unwrap_or_else(|_| ClusterConfig::with_nodes(["redis://127.0.0.1:7000"]))
    };

    if let Some(password) = &args.password {
        config.options.password = Some(password.clone());
    }
    Ok(config)
}

fn init_tracing(config: &ClusterConfig) {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    let filter = tracing_subscriber::EnvFilter::new(log_level);

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stdout)
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stdout)
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

struct Shell {
    client: ClusterClient,
    json: bool,
}

impl Shell {
    async fn execute_command(&self, command: &str, args: &[String]) -> Result<String> {
        let start = Instant::now();

        let response = match command.to_uppercase().as_str() {
            "HELP" => help_text(),
            "SLOT" => self.cmd_slot(args)?,
            "CLUSTER" => self.cmd_cluster(args).await?,
            _ => format_reply(&self.client.invoke(command, args).await?),
        };

        let elapsed = start.elapsed();
        Ok(format!(
            "{}\n{}",
            response,
            format!("({:.2?})", elapsed).dimmed()
        ))
    }

    /// Local slot lookup, no round trip
    fn cmd_slot(&self, args: &[String]) -> Result<String> {
        let key = args
            .first()
            .ok_or_else(|| anyhow::anyhow!("Usage: SLOT key"))?;
        let slot = key_slot(key);
        let owner = self
            .client
            .slot_map()
            .owner(slot)
            .map(|a| a.to_string())
            .unwrap_or_else(|| "(unmapped)".to_string());
        Ok(format!("slot {} -> {}", slot.to_string().bold(), owner))
    }

    async fn cmd_cluster(&self, args: &[String]) -> Result<String> {
        let sub = args
            .first()
            .ok_or_else(|| anyhow::anyhow!("Usage: CLUSTER SLOTS|NODES|SLAVES node-id|INFO"))?;
        let reply = self.client.cluster(sub, &args[1..]).await?;

        if self.json {
            if let ClusterReply::Raw(raw) = &reply {
                return Ok(format_reply(raw));
            }
            return Ok(serde_json::to_string_pretty(&reply)?);
        }

        Ok(match reply {
            ClusterReply::Slots(slots) => format_slots(&slots),
            ClusterReply::Nodes(nodes) | ClusterReply::Slaves(nodes) => format_nodes(&nodes),
            ClusterReply::Info(info) => {
                let mut entries: Vec<_> = info.into_iter().collect();
                entries.sort();
                entries
                    .into_iter()
                    .map(|(k, v)| format!("{}: {}", k.cyan(), v))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            ClusterReply::Raw(raw) => format_reply(&raw),
        })
    }
}

fn format_reply(reply: &Reply) -> String {
    format_nested(reply, 0)
}

fn format_nested(reply: &Reply, depth: usize) -> String {
    match reply {
        Reply::Status(s) => s.green().to_string(),
        Reply::Error(e) => format!("(error) {}", e).red().to_string(),
        Reply::Integer(n) => format!("(integer) {}", n),
        Reply::Bulk(None) | Reply::Array(None) => "(nil)".dimmed().to_string(),
        Reply::Bulk(Some(_)) => format!("\"{}\"", reply.as_str().unwrap_or("<binary>")),
        Reply::Array(Some(items)) if items.is_empty() => "(empty array)".dimmed().to_string(),
        Reply::Array(Some(items)) => {
            let indent = "   ".repeat(depth);
            items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let prefix = if i == 0 { String::new() } else { indent.clone() };
                    format!("{}{}) {}", prefix, i + 1, format_nested(item, depth + 1))
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
    }
}

fn format_slots(slots: &[SlotInfo]) -> String {
    slots
        .iter()
        .map(|info| {
            let replicas: Vec<String> = info
                .replicas
                .iter()
                .map(|r| r.address().to_string())
                .collect();
            format!(
                "{:>5}-{:<5} {} {}",
                info.start,
                info.end,
                info.master.address().to_string().green(),
                if replicas.is_empty() {
                    String::new()
                } else {
                    format!("replicas: {}", replicas.join(", ")).dimmed().to_string()
                }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_nodes(nodes: &[NodeRecord]) -> String {
    nodes
        .iter()
        .map(|node| {
            let slots = node
                .slot_ranges
                .iter()
                .map(|r| format!("{}-{}", r.start(), r.end()))
                .collect::<Vec<_>>()
                .join(" ");
            let role = if node.is_master() {
                "master".green().to_string()
            } else {
                "replica".yellow().to_string()
            };
            format!(
                "{} {} {} {} {}",
                node.node_id.chars().take(8).collect::<String>(),
                node.address,
                role,
                node.link_state,
                slots
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn help_text() -> String {
    format!(
        r#"{}

{}
  GET key / SET key value    Any command is routed by the slot of its first key
  INFO / PING                Keyless commands go to a random node

{}
  CLUSTER SLOTS              Slot ranges and their masters
  CLUSTER NODES              Node list
  CLUSTER SLAVES node-id     Replicas of a master
  CLUSTER INFO               Cluster state
  SLOT key                   Slot of a key and its cached owner

{}
  HELP                       Show this help message
  QUIT                       Exit the CLI
"#,
        "slotroute CLI - Available Commands".bold().cyan(),
        "Commands:".bold(),
        "Topology:".bold(),
        "Shell:".bold(),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config);

    let client = ClusterClient::from_config(&config)
        .await
        .context("Failed to connect to cluster")?;
    let shell = Shell {
        client,
        json: args.json,
    };

    // Check if running in command mode or interactive mode
    if !args.command.is_empty() {
        let cmd = &args.command[0];
        let cmd_args: Vec<String> = args.command[1..].to_vec();

        match shell.execute_command(cmd, &cmd_args).await {
            Ok(output) => {
                info!("{}", output);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "{}", format!("Error: {}", e).red());
                std::process::exit(1);
            }
        }
    } else {
        run_interactive(shell).await
    }
}

async fn run_interactive(shell: Shell) -> Result<()> {
    info!(
        "{}",
        format!("slotroute CLI v{}", env!("CARGO_PKG_VERSION"))
            .bold()
            .cyan()
    );
    info!(
        "Connected to {} masters ({:.1}% slots covered)",
        shell.client.registry().len(),
        shell.client.slot_map().slot_coverage()
    );
    info!("Type {} for available commands\n", "HELP".bold());

    let mut rl = DefaultEditor::new()?;

    loop {
        let readline = rl.readline(&format!("{}> ", "slotroute".green()));

        match readline {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }

                rl.add_history_entry(&line)?;

                let parts: Vec<String> = line.split_whitespace().map(String::from).collect();
                let cmd = &parts[0];
                let args = &parts[1..];

                if cmd.eq_ignore_ascii_case("QUIT") || cmd.eq_ignore_ascii_case("EXIT") {
                    info!("Goodbye!");
                    break;
                }

                match shell.execute_command(cmd, args).await {
                    Ok(output) => info!("{}", output),
                    Err(e) => {
                        error!(error = %e, "{}", format!("Error: {}", e).red());
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                info!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                info!("Goodbye!");
                break;
            }
            Err(err) => {
                error!(error = ?err, "Readline error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}
