//! CLI binary for freudgpt.

use clap::{Parser, Subcommand};
use freudgpt::config::AppConfig;
use freudgpt::llm::ConversationTurn;
use freudgpt::models::ModelStore;
use freudgpt::persona;
use freudgpt::stt::{self, ParakeetStt};
use freudgpt::{ChatEngine, ResponseStream};
use futures_util::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// FreudGPT: chat with simulated historical psychoanalysts.
#[derive(Parser)]
#[command(name = "freudgpt", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Persona answering the questions.
    #[arg(short, long)]
    persona: Option<String>,

    /// Model to load at startup.
    #[arg(short, long)]
    model: Option<String>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Start an interactive chat session.
    Chat,

    /// Ask a single question and print the answer.
    Ask {
        /// The question.
        #[arg(default_value = "")]
        message: String,

        /// WAV recording of the question, used instead of the text.
        #[arg(long)]
        audio: Option<PathBuf>,
    },

    /// List available personas.
    Personas,

    /// List configured models and their backends.
    Models,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("freudgpt=info,hf_hub=warn,mistralrs=warn,mistralrs_core=warn,ort=warn")
        }))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    if std::env::var_os("HF_HOME").is_none() {
        // SAFETY: Called once at startup before the runtime spawns any threads.
        unsafe { std::env::set_var("HF_HOME", &config.models.cache_dir) };
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli, config))
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    if let Some(path) = path {
        return Ok(AppConfig::from_file(path)?);
    }
    let default_path = AppConfig::default_config_path();
    if default_path.exists() {
        info!("using config {}", default_path.display());
        Ok(AppConfig::from_file(&default_path)?)
    } else {
        Ok(AppConfig::default())
    }
}

async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    let persona = cli
        .persona
        .unwrap_or_else(|| config.chat.default_persona.clone());
    let model = cli
        .model
        .unwrap_or_else(|| config.chat.default_model.clone());

    match cli.command.unwrap_or(Command::Chat) {
        Command::Personas => {
            for name in persona::persona_names() {
                println!("{name}");
            }
            Ok(())
        }
        Command::Models => {
            for entry in &config.models.entries {
                match &entry.repo_id {
                    Some(repo) => println!("{:<20} {:<12} {repo}", entry.name, entry.backend),
                    None => println!("{:<20} {}", entry.name, entry.backend),
                }
            }
            Ok(())
        }
        Command::Ask { message, audio } => {
            persona::get_context(&persona)?;
            let engine = ChatEngine::new(config);
            engine.load_model(&model).await?;
            if let Some(path) = audio {
                let mut stt = new_stt(&engine)?;
                transcribe_file(&engine, &mut stt, &path)?;
            }
            print_answer(engine.predict(&message, &[], &persona, &model).await?).await?;
            Ok(())
        }
        Command::Chat => run_chat(ChatEngine::new(config), persona, model).await,
    }
}

async fn run_chat(engine: ChatEngine, mut persona: String, mut model: String) -> anyhow::Result<()> {
    println!("FreudGPT v{}", env!("CARGO_PKG_VERSION"));
    persona::get_context(&persona)?;
    engine.load_model(&model).await?;
    println!("Talking to {persona} ({model}). Type /quit to leave.\n");

    let mut stt: Option<ParakeetStt> = None;
    let mut history: Vec<ConversationTurn> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut question = line.to_owned();
        if let Some(command) = line.strip_prefix('/') {
            let (name, arg) = command.split_once(' ').unwrap_or((command, ""));
            let arg = arg.trim();
            match name {
                "quit" | "exit" => break,
                "reset" => {
                    history.clear();
                    println!("History cleared.");
                    continue;
                }
                "persona" => {
                    if persona::find_persona(arg).is_some() {
                        persona = arg.to_owned();
                        history.clear();
                        println!("Now talking to {persona}.");
                    } else {
                        println!("Personas: {}", persona::persona_names().join(", "));
                    }
                    continue;
                }
                "load" => {
                    match engine.load_model(arg).await {
                        Ok(handle) => {
                            model = handle.model_name().to_owned();
                            println!("Loaded {model} ({}).", handle.backend());
                        }
                        Err(e) => println!("Could not load {arg}: {e}"),
                    }
                    continue;
                }
                "audio" => {
                    if stt.is_none() {
                        stt = Some(new_stt(&engine)?);
                    }
                    let Some(engine_stt) = stt.as_mut() else {
                        continue;
                    };
                    match transcribe_file(&engine, engine_stt, Path::new(arg)) {
                        Ok(text) => question = text,
                        Err(e) => {
                            println!("Could not transcribe {arg}: {e}");
                            continue;
                        }
                    }
                }
                _ => {
                    println!("Commands: /load <model>, /persona <name>, /audio <wav>, /reset, /quit");
                    continue;
                }
            }
        }

        match engine.predict(&question, &history, &persona, &model).await {
            Ok(stream) => {
                let answer = print_answer(stream).await?;
                history.push(ConversationTurn::new(question, answer));
            }
            Err(e) => println!("Error: {e}"),
        }
    }
    Ok(())
}

fn new_stt(engine: &ChatEngine) -> anyhow::Result<ParakeetStt> {
    let store = ModelStore::new(&engine.config().models.cache_dir)?;
    Ok(ParakeetStt::new(&engine.config().stt, store))
}

fn transcribe_file(
    engine: &ChatEngine,
    stt: &mut ParakeetStt,
    path: &Path,
) -> anyhow::Result<String> {
    let (samples, sample_rate) = stt::read_wav(path)?;
    let text = tokio::task::block_in_place(|| {
        stt::transcribe_into(stt, samples, sample_rate, engine.pending_audio())
    })?;
    println!("(heard: {text})");
    Ok(text)
}

/// Print each emission's new suffix and return the final answer.
async fn print_answer(mut stream: ResponseStream) -> anyhow::Result<String> {
    let mut shown = String::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(text) => {
                match text.strip_prefix(shown.as_str()) {
                    Some(suffix) => print!("{suffix}"),
                    None => print!("\n{text}"),
                }
                std::io::stdout().flush()?;
                shown = text;
            }
            Err(e) => {
                warn!("answer stream ended with error: {e}");
                println!("\n[{e}]");
                break;
            }
        }
    }
    println!();
    Ok(shown)
}
