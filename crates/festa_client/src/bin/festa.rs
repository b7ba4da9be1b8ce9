//! festa: terminal chat client for the FESTA paper assistant.
//! With a QUESTION argument, asks once and prints the answer and sources to
//! stdout. Otherwise reads chat input and slash commands from stdin, one per
//! line, until EOF or `/quit`.

use std::collections::BTreeMap;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use festa_client::command::{self, Command, HELP};
use festa_client::config::{self, Config};
use festa_client::{
    ApiClient, ConnectionIdentity, ConnectionManager, ConnectionStatus, ConversationController,
    FileStore, Message, ModelCatalog, ModelInfo, Renderer, Role, SharedStore, Thread, ThreadId,
    ThreadStore,
};

#[derive(Parser, Debug)]
#[command(name = "festa", version, about = "Chat with the FESTA paper assistant")]
struct Args {
    /// Config file (default: $FESTA_CONFIG or ~/.festa/config.yaml).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Verbose logging to stderr.
    #[arg(long)]
    debug: bool,
    /// Ask one question and exit.
    question: Option<String>,
}

/// Prints the transcript to stdout and everything else to stderr.
struct TerminalRenderer {
    /// Transcript lines are printed.
    echo: bool,
    /// One-shot mode: only the reply and its sources are shown. Failures are
    /// reported once after the run.
    quiet: bool,
    connected: bool,
    replied: bool,
    server_error: bool,
    listed: BTreeMap<String, String>,
    listed_active: Option<ThreadId>,
}

impl TerminalRenderer {
    fn interactive() -> Self {
        Self {
            echo: true,
            quiet: false,
            connected: false,
            replied: false,
            server_error: false,
            listed: BTreeMap::new(),
            listed_active: None,
        }
    }

    /// Silent until [`TerminalRenderer::capture`].
    fn one_shot() -> Self {
        Self {
            echo: false,
            quiet: true,
            ..Self::interactive()
        }
    }

    fn capture(&mut self) {
        self.echo = true;
        self.replied = false;
        self.server_error = false;
    }

    fn print_threads(threads: &[Thread], active: Option<&ThreadId>) {
        for thread in threads {
            let marker = if Some(&thread.id) == active { '*' } else { ' ' };
            eprintln!("{} {}  {}", marker, thread.id, thread.title);
        }
    }
}

impl Renderer for TerminalRenderer {
    fn clear(&mut self) {
        if self.echo && !self.quiet {
            println!();
        }
    }

    fn message(&mut self, message: &Message, model_name: Option<&str>) {
        if !self.echo {
            return;
        }
        match message.role {
            Role::User => {
                if !self.quiet {
                    println!("> {}", message.content.to_markdown());
                }
            }
            Role::Assistant => {
                self.replied = true;
                println!("{}", message.content.to_markdown());
                match model_name {
                    Some(name) if !self.quiet => eprintln!("[{}]", name),
                    _ => {}
                }
                if !message.sources.is_empty() {
                    println!("\nSources:");
                    for src in &message.sources {
                        println!("  {}", src);
                    }
                }
            }
            Role::System => {
                self.server_error = true;
                eprintln!("Server error: {}", message.content.to_markdown());
            }
        }
    }

    fn notice(&mut self, text: &str) {
        if !self.quiet {
            eprintln!("{}", text);
        }
    }

    fn pending(&mut self, visible: bool) {
        if visible && !self.quiet {
            eprintln!("Waiting for reply...");
        }
    }

    fn status(&mut self, status: ConnectionStatus) {
        if status == ConnectionStatus::Connected {
            self.connected = true;
        }
        if self.quiet {
            return;
        }
        match status {
            ConnectionStatus::Connected => eprintln!("Connected."),
            ConnectionStatus::Disconnected => eprintln!("Disconnected from server."),
            ConnectionStatus::ConnectionFailed => eprintln!("Connection failed."),
        }
    }

    fn threads(&mut self, threads: &[Thread], active: Option<&ThreadId>) {
        let listed: BTreeMap<String, String> = threads
            .iter()
            .map(|t| (t.id.to_string(), t.title.clone()))
            .collect();
        if self.quiet || (listed == self.listed && active == self.listed_active.as_ref()) {
            return;
        }
        Self::print_threads(threads, active);
        self.listed = listed;
        self.listed_active = active.cloned();
    }

    fn thread_list(&mut self, threads: &[Thread], active: Option<&ThreadId>) {
        Self::print_threads(threads, active);
    }

    fn models(&mut self, models: &[ModelInfo], current: &str) {
        if self.quiet {
            return;
        }
        for model in models {
            let marker = if model.id == current { '*' } else { ' ' };
            if model.description.is_empty() {
                eprintln!("{} {}  {}", marker, model.id, model.name);
            } else {
                eprintln!("{} {}  {} - {}", marker, model.id, model.name, model.description);
            }
        }
    }
}

/// --config flag, then FESTA_CONFIG, then `~/.festa/config.yaml`. An explicit
/// path must exist; the default path may be missing.
fn load_config(flag: Option<PathBuf>) -> Config {
    let explicit = flag.or_else(|| std::env::var_os("FESTA_CONFIG").map(PathBuf::from));
    let loaded = match &explicit {
        Some(path) => config::load(path).map_err(|e| (path.clone(), e)),
        None => {
            let Some(path) = config::default_config_path() else {
                eprintln!("Error: unable to determine config path (set --config or FESTA_CONFIG)");
                process::exit(1);
            };
            config::load_or_default(&path).map_err(|e| (path, e))
        }
    };
    loaded.unwrap_or_else(|(path, e)| {
        eprintln!("Error: failed to load config from {}: {}", path.display(), e);
        process::exit(1);
    })
}

fn init_tracing(debug: bool) {
    let default = if debug {
        "festa_client=debug,info"
    } else {
        "festa_client=warn,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Forward stdin lines as commands until EOF or the receiver is gone.
fn spawn_stdin_reader(tx: mpsc::Sender<Command>) {
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim() == "/help" {
                eprintln!("{}", HELP);
                continue;
            }
            match command::parse_line(&line) {
                Ok(Command::Submit(text)) if text.trim().is_empty() => {}
                Ok(cmd) => {
                    if tx.blocking_send(cmd).is_err() {
                        break;
                    }
                }
                Err(msg) => eprintln!("{}", msg),
            }
        }
    });
}

fn main() {
    let args = Args::parse();
    init_tracing(args.debug);
    let cfg = load_config(args.config);

    let Some(storage_path) = cfg.storage_path() else {
        eprintln!("Error: unable to determine storage path (set storage.path in the config)");
        process::exit(1);
    };
    let storage: SharedStore = Arc::new(FileStore::new(storage_path));
    let identity = ConnectionIdentity::load_or_create(storage.clone()).unwrap_or_else(|e| {
        eprintln!("Error: failed to load client identity: {}", e);
        process::exit(1);
    });

    let one_shot = args.question.is_some();
    let renderer = if one_shot {
        TerminalRenderer::one_shot()
    } else {
        TerminalRenderer::interactive()
    };
    let mut controller = ConversationController::new(
        ThreadStore::new(storage),
        ConnectionManager::new(identity, cfg.retry_policy()),
        ModelCatalog::new(cfg.default_model()),
        renderer,
    );

    let (tx, rx) = mpsc::channel::<Command>(32);
    match &args.question {
        Some(question) => {
            controller.create_thread();
            controller.renderer_mut().capture();
            let _ = tx.try_send(Command::Submit(question.clone()));
            drop(tx);
        }
        None => {
            let _ = tx.try_send(Command::RefreshModels);
            spawn_stdin_reader(tx);
        }
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Error: failed to create runtime: {}", e);
            process::exit(1);
        });

    let api = ApiClient::new(cfg.server_url());
    let endpoint = cfg.websocket_url();
    if let Err(e) = rt.block_on(festa_client::run(&mut controller, &endpoint, Some(&api), rx)) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    let renderer = controller.renderer();
    if one_shot && !renderer.replied && !renderer.server_error {
        if renderer.connected {
            eprintln!("Error: connection lost before the reply arrived");
        } else {
            eprintln!("Error: connection failed: could not reach {}", endpoint);
        }
    }
    let unanswered = one_shot && (!renderer.replied || renderer.server_error);
    if unanswered || controller.connection().is_exhausted() {
        process::exit(1);
    }
}
