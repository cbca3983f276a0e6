use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use lib::controller::Controller;
use lib::exec::{self, CommandEvent};
use lib::history::{HistoryKey, HistoryStore};

/// Upper bound on how long a single reply or command is waited for before giving the prompt back.
const TURN_WAIT: Duration = Duration::from_secs(600);

#[derive(Parser)]
#[command(name = "deck")]
#[command(about = "Deck CLI", long_about = None)]
struct Cli {
    /// Config file path (default: DECK_CONFIG_PATH or ~/.deck/config.json)
    #[arg(long, short, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Check whether the Ollama server answers.
    Status,

    /// List models installed on the Ollama server.
    Models {
        /// Print the raw list as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List the built-in Ollama lifecycle commands.
    Commands,

    /// Run a shell command and stream its output.
    Run {
        /// Command line, passed to the host shell as one string.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Chat with a model (interactive). Type /help for commands.
    Chat {
        /// Model to use (default: first model the server lists).
        #[arg(long, short)]
        model: Option<String>,

        /// Use the global transcript shared by all models.
        #[arg(long)]
        global: bool,
    },

    /// Show or clear a stored transcript.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Print the transcript.
    Show {
        #[arg(long, short)]
        model: Option<String>,
        #[arg(long)]
        global: bool,
    },
    /// Delete the transcript file.
    Clear {
        #[arg(long, short)]
        model: Option<String>,
        #[arg(long)]
        global: bool,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("deck {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Status) => run_status(cli.config),
        Some(Commands::Models { json }) => run_models(cli.config, json),
        Some(Commands::Commands) => {
            for c in exec::OLLAMA_COMMANDS {
                println!("{}", c);
            }
            Ok(())
        }
        Some(Commands::Run { command }) => run_command(&command.join(" ")),
        Some(Commands::Chat { model, global }) => run_chat(cli.config, model, global),
        Some(Commands::History { action }) => run_history(cli.config, action),
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn controller(config_path: Option<PathBuf>) -> anyhow::Result<Controller> {
    let (config, path) = lib::config::load_config(config_path)?;
    log::debug!("using config {}", path.display());
    Controller::new(&config)
}

fn run_status(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let mut c = controller(config_path)?;
    let url = c.settings().api_url.clone();
    if c.check_connection() {
        println!("● Connected ({})", url);
        Ok(())
    } else {
        anyhow::bail!("● Disconnected ({})", url)
    }
}

fn run_models(config_path: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let mut c = controller(config_path)?;
    c.refresh_models();
    if c.models().is_empty() {
        let reason = c
            .chat_log()
            .last()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no models".to_string());
        anyhow::bail!("{}", reason);
    }
    if json {
        println!("{}", serde_json::to_string_pretty(c.models())?);
    } else {
        for m in c.models() {
            println!("{}", m);
        }
    }
    Ok(())
}

fn run_command(command: &str) -> anyhow::Result<()> {
    let handle = exec::spawn_command(command);
    while let Some(event) = handle.next_timeout(TURN_WAIT) {
        match event {
            CommandEvent::Line(line) => println!("{}", line),
            CommandEvent::Stopped => println!("[Command stopped]"),
            CommandEvent::Finished => return Ok(()),
        }
    }
    anyhow::bail!("command `{}` produced no output for {:?}", handle.command(), TURN_WAIT)
}

fn run_history(config_path: Option<PathBuf>, action: HistoryAction) -> anyhow::Result<()> {
    let (config, _) = lib::config::load_config(config_path)?;
    let store = HistoryStore::new(lib::config::resolve_history_dir(&config));
    match action {
        HistoryAction::Show { model, global } => {
            let key = HistoryKey::new(model.as_deref(), global);
            let transcript = store.load(&key);
            if transcript.is_empty() {
                println!("(no history for {})", key);
            }
            for m in transcript {
                println!("{}: {}", m.role, m.content);
            }
        }
        HistoryAction::Clear { model, global } => {
            let key = HistoryKey::new(model.as_deref(), global);
            store.clear(&key)?;
            println!("cleared {}", store.path(&key).display());
        }
    }
    Ok(())
}

fn run_chat(
    config_path: Option<PathBuf>,
    model: Option<String>,
    global: bool,
) -> anyhow::Result<()> {
    let mut c = controller(config_path)?;
    c.set_global_history(global);
    if !c.check_connection() {
        println!("Ollama is not reachable at {}", c.settings().api_url);
    }
    c.refresh_models();
    if let Some(m) = model {
        c.set_model(Some(m));
    }

    let mut shown = 0;
    print_new_entries(&c, &mut shown);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/help" => {
                println!(
                    "available commands:\n\n/new - start a new session (previous history is archived)\n/clear - delete this model's history\n/help - show this help message\n/quit - leave"
                );
                continue;
            }
            "/new" => {
                c.new_session();
                shown = 0;
            }
            "/clear" => {
                c.clear_history();
                shown = 0;
            }
            _ => {
                c.send_message(input);
                if !c.wait_idle(TURN_WAIT) {
                    c.stop_response();
                }
            }
        }
        print_new_entries(&c, &mut shown);
    }
    Ok(())
}

/// Print chat entries added since the last call; user lines are skipped since the user just typed them.
fn print_new_entries(c: &Controller, shown: &mut usize) {
    for entry in c.chat_log().iter().skip(*shown) {
        if !matches!(entry, lib::session::ChatEntry::User(_)) {
            println!("{}", entry);
        }
    }
    *shown = c.chat_log().len();
}
