//! Interactive shell.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use serde_json::Value;
use statechart_core::{EventResult, Message, StateMachine};
use statechart_persist::{DefaultStateMachinePersister, InMemoryStateMachinePersist};
use std::path::PathBuf;
use std::sync::Arc;

const HELP_TEXT: &str = r#"
Available commands:
  help                          Show this help
  start                         Start the machine
  stop                          Stop the machine

  send <event> [key=value ...]  Send an event with optional headers
  events                        List events the model reacts to
  states                        List states of the model
  state                         Show active states
  vars                          Show extended state variables
  set <key> <json>              Set an extended state variable

  persist <key>                 Persist the machine under a key
  restore <key>                 Restore the machine from a key
  snapshot                      Print the current context as JSON

  quit, exit                    Exit the shell
"#;

pub struct Shell {
    machine: StateMachine,
    persister: DefaultStateMachinePersister,
    store: Arc<InMemoryStateMachinePersist>,
}

impl Shell {
    pub fn new(machine: StateMachine) -> Self {
        let store = Arc::new(InMemoryStateMachinePersist::new());
        Self {
            machine,
            persister: DefaultStateMachinePersister::new(store.clone()),
            store,
        }
    }

    pub fn run(&self, history_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        println!("{}", "statechart shell".bold().cyan());

        let config = Config::builder()
            .history_ignore_space(true)
            .auto_add_history(true)
            .build();
        let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;
        let _ = rl.load_history(&history_path);

        println!("Type 'help' for available commands.\n");

        loop {
            let prompt = format!("{} ", "statechart>".cyan());
            match rl.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    match self.execute(line) {
                        Ok(Some(output)) => println!("{}\n", output),
                        Ok(None) => break,
                        Err(e) => println!("{}: {}\n", "Error".red(), e),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!("^D");
                    break;
                }
                Err(err) => {
                    println!("{}: {:?}", "Error".red(), err);
                    break;
                }
            }
        }

        let _ = rl.save_history(&history_path);
        self.machine.stop();
        println!("{}", "Bye.".dimmed());
        Ok(())
    }

    /// Runs one command line. `None` ends the session.
    pub fn execute(&self, line: &str) -> Result<Option<String>, Box<dyn std::error::Error>> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            return Ok(Some(String::new()));
        }

        let cmd = parts[0].to_lowercase();
        let args = &parts[1..];

        match cmd.as_str() {
            "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

            "quit" | "exit" | "q" => Ok(None),

            "start" => {
                self.machine.start();
                Ok(Some(format!("{} {}", "Started".green(), self.states())))
            }

            "stop" => {
                self.machine.stop();
                Ok(Some("Stopped".yellow().to_string()))
            }

            "send" | "s" => {
                let Some(event) = args.first() else {
                    return Ok(Some("Usage: send <event> [key=value ...]".to_string()));
                };
                let message = build_message(event, &args[1..])?;
                let result = match self.machine.send(message) {
                    EventResult::Accepted => "Accepted".green(),
                    EventResult::Deferred => "Deferred".yellow(),
                    EventResult::Queued => "Queued".yellow(),
                    EventResult::Denied => "Denied".red(),
                };
                Ok(Some(format!("{} {}", result, self.states())))
            }

            "events" => {
                let events: Vec<&str> = self.machine.model().events().into_iter().collect();
                Ok(Some(events.join(" ")))
            }

            "states" => {
                let model = self.machine.model();
                let states: Vec<&str> = model.state_ids().map(|s| s.0.as_str()).collect();
                Ok(Some(states.join(" ")))
            }

            "state" | "st" => {
                let mut output = self.states();
                if self.machine.is_complete() {
                    output.push_str(&format!(" {}", "(complete)".dimmed()));
                } else if !self.machine.is_running() {
                    output.push_str(&format!(" {}", "(stopped)".dimmed()));
                }
                Ok(Some(output))
            }

            "vars" => Ok(Some(format_json(&self.machine.extended_state().to_value()))),

            "set" => {
                if args.len() < 2 {
                    return Ok(Some("Usage: set <key> <json>".to_string()));
                }
                let value = parse_value(&args[1..].join(" "));
                self.machine.extended_state().insert(args[0], value);
                Ok(Some(format!("{} {}", "Set".green(), args[0].cyan())))
            }

            "persist" => {
                let Some(key) = args.first() else {
                    return Ok(Some("Usage: persist <key>".to_string()));
                };
                self.persister.persist(&self.machine, key)?;
                Ok(Some(format!(
                    "{} under {} ({} stored)",
                    "Persisted".green(),
                    key.cyan(),
                    self.store.len()
                )))
            }

            "restore" => {
                let Some(key) = args.first() else {
                    return Ok(Some("Usage: restore <key>".to_string()));
                };
                self.persister.restore(&self.machine, key)?;
                Ok(Some(format!("{} {}", "Restored".green(), self.states())))
            }

            "snapshot" => {
                let context = self.machine.snapshot()?;
                Ok(Some(serde_json::to_string_pretty(&context)?))
            }

            _ => Ok(Some(format!(
                "Unknown command: {}. Type 'help' for available commands.",
                cmd
            ))),
        }
    }

    fn states(&self) -> String {
        let states: Vec<String> = self
            .machine
            .state()
            .into_iter()
            .map(|s| s.0)
            .collect();
        format!("[{}]", states.join(", ")).cyan().to_string()
    }
}

/// Builds a message from an event and `key=value` header arguments.
fn build_message(event: &str, headers: &[&str]) -> Result<Message, String> {
    let mut message = Message::new(event);
    for header in headers {
        let (key, value) = header
            .split_once('=')
            .ok_or_else(|| format!("header '{}' is not key=value", header))?;
        message = message.with_header(key, parse_value(value));
    }
    Ok(message)
}

/// JSON if it parses, otherwise a plain string.
fn parse_value(s: &str) -> Value {
    serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_string()))
}

fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
