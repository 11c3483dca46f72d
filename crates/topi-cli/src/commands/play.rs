//! Play command - run a bough in the terminal.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use topi_runtime::{
    Conversation, ConversationConfig, ConversationEvent, Engine, FsAssetLoader, RuntimeError,
    SpokenLine, State, Step,
};
use topi_vm::Choice;

#[derive(Args)]
pub struct PlayCommand {
    /// Compiled dialogue file
    pub file: PathBuf,

    /// Bough to start (overrides the config file)
    #[arg(short, long)]
    pub bough: Option<String>,

    /// Conversation config (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// State file to load before and save after playing
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Answer choices from this list instead of stdin, e.g. `--choose 1,0`
    #[arg(long, value_delimiter = ',')]
    pub choose: Option<Vec<usize>>,

    /// Print subscribed value changes
    #[arg(long, value_name = "NAME")]
    pub watch: Vec<String>,
}

/// Prints dialogue and reads answers from stdin or a scripted list
struct Console<W> {
    out: W,
    scripted: Option<std::vec::IntoIter<usize>>,
}

impl<W: Write> Console<W> {
    fn line(&mut self, line: &SpokenLine) -> Result<()> {
        if line.speaker_name.is_empty() {
            writeln!(self.out, "{}", line.line.content)?;
        } else {
            writeln!(self.out, "{}: {}", line.speaker_name, line.line.content)?;
        }
        Ok(())
    }

    async fn choose(&mut self, choices: &[Choice]) -> Result<usize> {
        for (i, choice) in choices.iter().enumerate() {
            let seen = if choice.visit_count > 0 { " (seen)" } else { "" };
            writeln!(self.out, "  {}. {}{}", i + 1, choice.content, seen)?;
        }
        match &mut self.scripted {
            Some(answers) => Ok(answers.next().unwrap_or(0)),
            None => {
                self.out.flush()?;
                read_index(choices.len()).await
            }
        }
    }

    fn changes(&mut self, conversation: &mut Conversation) -> Result<()> {
        for event in conversation.drain_events() {
            if let ConversationEvent::ValueChanged { name, value } = event {
                writeln!(self.out, "[{name} = {value:?}]")?;
            }
        }
        Ok(())
    }
}

async fn read_index(count: usize) -> Result<usize> {
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        // stdin blocks, keep it off the runtime threads
        let (read, input) = tokio::task::spawn_blocking(|| {
            let mut input = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut input)
                .map(|read| (read, input))
        })
        .await??;
        if read == 0 {
            return Ok(0);
        }
        match input.trim().parse::<usize>() {
            Ok(n) if (1..=count).contains(&n) => return Ok(n - 1),
            _ => println!("Enter a number between 1 and {count}"),
        }
    }
}

/// Tick to the end, printing watched changes after every slice
async fn drive<W: Write>(conversation: &mut Conversation, console: &mut Console<W>) -> Result<()> {
    let max_slices = conversation.config().max_slices;
    conversation.start()?;
    let mut slices = 0;
    loop {
        if let Some(max) = max_slices
            && slices >= max
        {
            return Err(RuntimeError::SliceBudgetExhausted(max).into());
        }
        slices += 1;
        let step = conversation.tick();
        console.changes(conversation)?;
        match step? {
            Step::Finished => return Ok(()),
            Step::Running => {}
            Step::Line(line) => {
                console.line(&line)?;
                conversation.continue_line()?;
            }
            Step::Choices(choices) => {
                let index = console.choose(&choices).await?;
                if index >= choices.len() {
                    eprintln!("no option {}, asking again", index + 1);
                    continue;
                }
                conversation.select_choice(index)?;
            }
        }
        tokio::task::yield_now().await;
    }
}

impl PlayCommand {
    pub async fn run(&self) -> Result<()> {
        let mut config = match &self.config {
            Some(path) => ConversationConfig::from_path(path)?,
            None => ConversationConfig::new(),
        };
        if let Some(bough) = &self.bough {
            config.bough = bough.clone();
        }

        let state = match &self.state {
            Some(path) if path.exists() => State::load_from(path)?,
            _ => State::new(),
        };
        let engine = Engine::builder().state(Arc::new(state)).build();

        let Some(name) = self.file.file_name().and_then(|n| n.to_str()) else {
            bail!("invalid file name: {}", self.file.display());
        };
        let root = self
            .file
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let loader = FsAssetLoader::new(root);

        let mut conversation = engine
            .load(&loader, name, config)
            .await
            .with_context(|| format!("failed to load {}", self.file.display()))?;
        for name in &self.watch {
            if !conversation.subscribe(name)? {
                eprintln!("cannot watch `{name}`");
            }
        }

        let mut console = Console {
            out: std::io::stdout(),
            scripted: self.choose.clone().map(Vec::into_iter),
        };
        drive(&mut conversation, &mut console).await?;

        if let Some(path) = &self.state {
            engine.state().save_to(path)?;
        }
        Ok(())
    }
}
