//! Build progress reporting, decoupled from the executor.
//!
//! The executor calls these hooks around each command; richer displays
//! (overprinting progress bars and the like) live behind the same trait
//! in the embedding tool.

use std::sync::Mutex;

/// The printer/progress collaborator interface.
///
/// Implementations must be callable from any worker thread.  The default
/// `needs_update() == false` means the executor does not live-forward
/// child output line by line; it is captured and dumped per command.
pub trait Printer: Sync {
    /// Total number of recipes expected to run this build.
    fn set_steps(&self, n: usize);

    /// A command is about to run.
    fn print(&self, cmd: &str, dir: &str, name: &str, step: usize);

    /// A rule's recipe finished.
    fn done(&self, name: &str);

    /// Refresh any live display.
    fn update(&self);

    /// Tear down any live display.
    fn clear(&self);

    /// Whether the printer wants live forwarding of child output.
    fn needs_update(&self) -> bool {
        false
    }
}

/// Plain console printer: one stepped line per command, no overprinting.
pub struct ConsolePrinter {
    /// Also print the directory a command runs in.
    verbose: bool,
    state: Mutex<PrinterState>,
}

#[derive(Default)]
struct PrinterState {
    steps: usize,
}

impl ConsolePrinter {
    pub fn new(verbose: bool) -> ConsolePrinter {
        ConsolePrinter {
            verbose,
            state: Mutex::new(PrinterState::default()),
        }
    }
}

impl Printer for ConsolePrinter {
    fn set_steps(&self, n: usize) {
        self.state.lock().unwrap().steps = n;
    }

    fn print(&self, cmd: &str, dir: &str, _name: &str, step: usize) {
        let steps = self.state.lock().unwrap().steps;
        if self.verbose && !dir.is_empty() {
            println!("[{}/{}] ({}) {}", step, steps, dir, cmd);
        } else {
            println!("[{}/{}] {}", step, steps, cmd);
        }
    }

    fn done(&self, _name: &str) {}

    fn update(&self) {}

    fn clear(&self) {}
}

/// Swallows everything; used by tests and embedders with their own UI.
pub struct NullPrinter;

impl Printer for NullPrinter {
    fn set_steps(&self, _n: usize) {}
    fn print(&self, _cmd: &str, _dir: &str, _name: &str, _step: usize) {}
    fn done(&self, _name: &str) {}
    fn update(&self) {}
    fn clear(&self) {}
}
