use super::commands::{self, Outcome};
use crate::Database;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::Path;

pub struct Repl {
    db: Database,
    editor: DefaultEditor,
}

impl Repl {
    pub fn new<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let db = if path.as_ref().exists() {
            Database::open(path)?
        } else {
            Database::create(path)?
        };

        let editor = DefaultEditor::new()?;

        Ok(Self { db, editor })
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        println!("KeraVec Interactive Shell");
        println!("Type 'help' for commands, 'exit' to quit\n");

        let mut stdout = std::io::stdout();
        loop {
            let readline = self.editor.readline("keravec> ");
            match readline {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    self.editor.add_history_entry(line)?;

                    match commands::execute(&self.db, line, &mut stdout) {
                        Ok(Outcome::Exit) => break,
                        Ok(Outcome::Continue) => {}
                        Err(e) => eprintln!("Error: {}", e),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!("exit");
                    break;
                }
                Err(err) => {
                    eprintln!("Error: {:?}", err);
                    break;
                }
            }
        }

        // Writes may have been batched with auto_checkpoint off
        self.db.sync()?;
        Ok(())
    }
}
