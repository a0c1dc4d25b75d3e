//! Line-oriented chat loop
//!
//! Plain lines are sent to the active tutor; lines starting with `/` are
//! commands. Streamed replies are printed as they grow.

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};

use tutor_core::{
    CharacterId, ChatOrchestrator, ChatStream, CompletionClient, CurriculumContext, Location,
    MessageRole, SendOptions,
};

const HELP: &str = "\
Commands:
  /switch <name>           talk to aristotle, mendel, curie or newton
  /characters              list the tutors
  /greet                   show the current tutor's greeting
  /history                 show this conversation
  /retry                   resend your last message
  /clear                   clear this conversation
  /lesson [<id> [module]]  set the lesson (and 1-based module) you are studying
  /help                    show this help
  /quit                    leave";

/// A parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send text to the active tutor
    Say(String),
    /// Change tutor
    Switch(CharacterId),
    /// Clear the active conversation
    Clear,
    /// Resend the last user message
    Retry,
    /// Print the active conversation
    History,
    /// Print the active tutor's greeting
    Greet,
    /// List tutors
    Characters,
    /// Set or clear the lesson focus
    Lesson(Option<LessonFocus>),
    /// Print help
    Help,
    /// Exit
    Quit,
    /// Blank line
    Empty,
}

/// Lesson (and optionally module) the student is studying
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonFocus {
    /// Lesson identifier
    pub lesson_id: String,
    /// Zero-based module index
    pub module_index: Option<usize>,
}

/// Reasons an input line is not a valid command
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// Command name not recognized
    #[error("Unknown command '/{0}'. Type /help for a list of commands.")]
    Unknown(String),

    /// Command needs an argument
    #[error("Usage: {0}")]
    MissingArgument(&'static str),

    /// Argument could not be parsed
    #[error("{0}")]
    InvalidArgument(String),
}

/// Parse one input line
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Empty);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Say(line.to_string()));
    };

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default().to_lowercase();
    let args: Vec<&str> = words.collect();

    match name.as_str() {
        "switch" | "s" => {
            let target = args.first().ok_or(CommandError::MissingArgument("/switch <name>"))?;
            target
                .parse()
                .map(Command::Switch)
                .map_err(|e: tutor_core::UnknownCharacter| {
                    CommandError::InvalidArgument(e.to_string())
                })
        }
        "clear" => Ok(Command::Clear),
        "retry" | "r" => Ok(Command::Retry),
        "history" => Ok(Command::History),
        "greet" => Ok(Command::Greet),
        "characters" | "who" => Ok(Command::Characters),
        "lesson" => parse_lesson(&args),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

fn parse_lesson(args: &[&str]) -> Result<Command, CommandError> {
    let Some(lesson_id) = args.first() else {
        return Ok(Command::Lesson(None));
    };

    let module_index = match args.get(1) {
        None => None,
        Some(raw) => match raw.parse::<usize>() {
            Ok(n) if n >= 1 => Some(n - 1),
            _ => {
                return Err(CommandError::InvalidArgument(format!(
                    "Module must be a number starting at 1, got '{raw}'"
                )))
            }
        },
    };

    Ok(Command::Lesson(Some(LessonFocus {
        lesson_id: (*lesson_id).to_string(),
        module_index,
    })))
}

/// Interactive session over stdin/stdout
pub struct Repl<C> {
    chat: ChatOrchestrator<C>,
    curriculum: Arc<CurriculumContext>,
    chat_enabled: bool,
    options: SendOptions,
    out: Stdout,
}

impl<C: CompletionClient + 'static> Repl<C> {
    /// Create a session; with `chat_enabled` false only greetings are shown
    pub fn new(
        chat: ChatOrchestrator<C>,
        curriculum: Arc<CurriculumContext>,
        chat_enabled: bool,
    ) -> Self {
        Self {
            chat,
            curriculum,
            chat_enabled,
            options: SendOptions::default(),
            out: tokio::io::stdout(),
        }
    }

    /// Activate the first character and print the banner
    pub async fn start(&mut self, character: CharacterId) -> Result<()> {
        let greeting = self.greeting_text(character);
        self.chat.switch_character(character, Some(greeting)).await?;

        self.println("Grade 9 Science Tutor. Type /help for commands.")
            .await?;
        if !self.chat_enabled {
            self.println("No API key configured: tutors can greet you but not answer yet.")
                .await?;
        }
        self.greet().await
    }

    /// Read and handle lines until `/quit` or end of input
    pub async fn run(&mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            self.print("> ").await?;
            let Some(line) = lines.next_line().await? else {
                break;
            };

            match parse_command(&line) {
                Ok(Command::Quit) => break,
                Ok(command) => self.execute(command).await?,
                Err(e) => self.println(&e.to_string()).await?,
            }
        }

        self.println("Goodbye!").await
    }

    async fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Say(text) => self.say(text).await,
            Command::Switch(character) => {
                let greeting = self.greeting_text(character);
                self.chat.switch_character(character, Some(greeting)).await?;
                self.greet().await
            }
            Command::Clear => {
                self.chat.clear_history().await?;
                let name = self.chat.active_character().persona().name;
                self.println(&format!("Cleared your conversation with {name}."))
                    .await
            }
            Command::Retry => {
                if !self.chat_enabled {
                    return self.println("Chat is unavailable without an API key.").await;
                }
                match self.chat.retry_last_message(self.options.clone()).await? {
                    Some(stream) => self.render(stream).await,
                    None => self.println("Nothing to retry.").await,
                }
            }
            Command::History => self.history().await,
            Command::Greet => self.greet().await,
            Command::Characters => self.characters().await,
            Command::Lesson(focus) => self.focus(focus).await,
            Command::Help => self.println(HELP).await,
            Command::Quit | Command::Empty => Ok(()),
        }
    }

    async fn say(&mut self, text: String) -> Result<()> {
        if !self.chat_enabled {
            return self
                .println("Chat is unavailable without an API key. Set TUTOR_API_KEY and restart.")
                .await;
        }

        match self.chat.send_message(text, self.options.clone()) {
            Ok(stream) => self.render(stream).await,
            Err(e) => self.println(&e.to_string()).await,
        }
    }

    /// Print assistant updates as they arrive, writing only the new suffix
    async fn render(&mut self, mut stream: ChatStream) -> Result<()> {
        let mut printed = 0usize;
        let mut started = false;

        while let Some(message) = stream.next().await {
            if message.role == MessageRole::User {
                continue;
            }

            if message.is_error {
                if started {
                    self.print("\n").await?;
                }
                self.println(&format!("! {}  (type /retry)", message.content))
                    .await?;
                return Ok(());
            }

            if !started {
                let name = message.character.persona().name;
                self.print(&format!("{name}: ")).await?;
                started = true;
            }

            let fresh = message.content.get(printed..).unwrap_or_default();
            self.print(fresh).await?;
            printed = message.content.len();

            if !message.is_streaming {
                self.print("\n").await?;
            }
        }

        Ok(())
    }

    async fn greet(&mut self) -> Result<()> {
        let character = self.chat.active_character();
        let greeting = self.greeting_text(character);
        let name = character.persona().name;
        self.println(&format!("{name}: {greeting}")).await
    }

    async fn history(&mut self) -> Result<()> {
        let character = self.chat.active_character();
        let messages = self.chat.history(character);
        if messages.is_empty() {
            return self.println("No messages yet.").await;
        }

        let name = character.persona().name;
        for message in messages {
            let line = match (message.role, message.is_error) {
                (MessageRole::User, _) => format!("You: {}", message.content),
                (MessageRole::Assistant, true) => format!("! {}", message.content),
                (MessageRole::Assistant, false) => format!("{name}: {}", message.content),
            };
            self.println(&line).await?;
        }
        Ok(())
    }

    async fn characters(&mut self) -> Result<()> {
        let active = self.chat.active_character();
        let mut listing = String::new();
        for character in CharacterId::ALL {
            let persona = character.persona();
            let marker = if character == active { '*' } else { ' ' };
            listing.push_str(&format!(
                "{marker} {:<10} {} ({})\n",
                character.as_str(),
                persona.name,
                persona.subject
            ));
        }
        self.print(&listing).await
    }

    async fn focus(&mut self, focus: Option<LessonFocus>) -> Result<()> {
        let Some(focus) = focus else {
            self.options = SendOptions::default();
            self.curriculum.set_location(Location::Home);
            return self.println("Lesson focus cleared.").await;
        };

        let Some(lesson) = self
            .curriculum
            .lessons()
            .iter()
            .find(|l| l.id == focus.lesson_id)
            .cloned()
        else {
            let known: Vec<&str> = self
                .curriculum
                .lessons()
                .iter()
                .map(|l| l.id.as_str())
                .collect();
            return self
                .println(&format!(
                    "Unknown lesson '{}'. Lessons: {}",
                    focus.lesson_id,
                    known.join(", ")
                ))
                .await;
        };

        match focus.module_index {
            Some(index) => {
                let Some(title) = lesson.modules.get(index).cloned() else {
                    return self
                        .println(&format!(
                            "'{}' has {} modules.",
                            lesson.title,
                            lesson.modules.len()
                        ))
                        .await;
                };
                self.options = SendOptions::for_module(&lesson.id, index);
                self.curriculum.set_location(Location::Module {
                    lesson_id: lesson.id.clone(),
                    lesson_title: lesson.title.clone(),
                    index,
                    title: title.clone(),
                });
                self.println(&format!("Studying {}: {title}", lesson.title))
                    .await
            }
            None => {
                self.options = SendOptions::for_lesson(&lesson.id);
                self.curriculum.set_location(Location::Lesson {
                    id: lesson.id.clone(),
                    title: lesson.title.clone(),
                });
                self.println(&format!("Studying {}", lesson.title)).await
            }
        }
    }

    fn greeting_text(&self, character: CharacterId) -> String {
        self.chat
            .get_greeting(&self.curriculum.progress(), character, None)
            .content
    }

    async fn print(&mut self, text: &str) -> Result<()> {
        self.out.write_all(text.as_bytes()).await?;
        self.out.flush().await?;
        Ok(())
    }

    async fn println(&mut self, text: &str) -> Result<()> {
        self.print(text).await?;
        self.print("\n").await
    }
}
