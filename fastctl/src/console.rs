use capsules_wallarm_fast::{BuildController, BuildListener, Halt};
use std::cell::RefCell;
use tracing::error;

/// Build log on the terminal: info to stdout, errors to stderr.
#[derive(Debug, Default)]
pub struct ConsoleListener;

impl BuildListener for ConsoleListener {
    fn info(&self, text: &str) {
        println!("{}", text);
    }

    fn error(&self, text: &str) {
        eprintln!("{}", text);
    }
}

/// Remembers the halt so the process can exit non-zero once the step returns.
#[derive(Debug, Default)]
pub struct ExitController {
    halted: RefCell<Option<String>>,
}

impl ExitController {
    pub fn halted(&self) -> Option<String> {
        self.halted.borrow().clone()
    }
}

impl BuildController for ExitController {
    fn halt(&self, reason: &Halt) {
        error!(code = reason.code(), "build halted: {}", reason);
        *self.halted.borrow_mut() = Some(reason.code().to_string());
    }
}
