//! Line-oriented user interface on plain streams

use std::io::{BufRead, Write};
use tracing::{info, warn};

use crate::services::{CommandList, InstallCommand, Ui};

/// Tracing target for messages that go to the log file only
pub const LOG_TARGET: &str = "drvinst::log";

/// How much a [`StreamUi`] asks and prints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UiMode {
    /// Answer every question with its default
    pub no_questions: bool,
    /// Print only errors
    pub silent: bool,
    /// Show the command list and ask before running it
    pub expert: bool,
}

/// Prompts on `input`, prints to `output`
pub struct StreamUi<R, W> {
    input: R,
    output: W,
    mode: UiMode,
}

impl<R: BufRead, W: Write> StreamUi<R, W> {
    pub fn new(input: R, output: W, mode: UiMode) -> Self {
        Self {
            input,
            output,
            mode,
        }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn print(&mut self, text: &str) {
        if self.mode.silent {
            return;
        }
        // A closed terminal is not worth failing an install over
        let _ = writeln!(self.output, "{}", text);
    }

    /// Show `question` and read one answer; `None` at end of input
    fn ask(&mut self, question: &str, hint: &str) -> Option<String> {
        let _ = writeln!(self.output);
        let _ = writeln!(self.output, "{}", question);
        let _ = write!(self.output, "  [default: {}]: ", hint);
        let _ = self.output.flush();

        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }
}

impl<R: BufRead, W: Write> Ui for StreamUi<R, W> {
    fn set_title(&mut self, title: &str) {
        info!(target: LOG_TARGET, "{}", title);
        self.print("");
        self.print(title);
        self.print(&"=".repeat(title.chars().count()));
    }

    fn message(&mut self, msg: &str) {
        info!(target: LOG_TARGET, "{}", msg);
        self.print("");
        self.print(msg);
    }

    fn warn(&mut self, msg: &str) {
        warn!(target: LOG_TARGET, "{}", msg);
        self.print("");
        self.print(&format!("WARNING: {}", msg));
    }

    fn error(&mut self, msg: &str) {
        tracing::error!(target: LOG_TARGET, "{}", msg);
        let _ = writeln!(self.output);
        let _ = writeln!(self.output, "ERROR: {}", msg);
    }

    fn log(&mut self, msg: &str) {
        info!(target: LOG_TARGET, "{}", msg);
    }

    fn yes_no(&mut self, default: bool, question: &str) -> bool {
        if self.mode.no_questions {
            info!(target: LOG_TARGET, "{} (answered {})", question, yes_or_no(default));
            return default;
        }

        let hint = if default { "(Y)es" } else { "(N)o" };
        let answer = match self.ask(question, hint) {
            None => false,
            Some(reply) => match reply.chars().next().map(|c| c.to_ascii_lowercase()) {
                Some('y') => true,
                Some('n') => false,
                _ => default,
            },
        };
        info!(target: LOG_TARGET, "{} (answered {})", question, yes_or_no(answer));
        answer
    }

    fn get_input(&mut self, default: &str, prompt: &str) -> String {
        if self.mode.no_questions {
            return default.to_string();
        }
        let hint = format!("'{}'", default);
        match self.ask(prompt, &hint) {
            Some(reply) if !reply.is_empty() => reply,
            _ => default.to_string(),
        }
    }

    fn accept_license(&mut self, license: &str) -> bool {
        if self.mode.no_questions {
            self.error(
                "The license was not accepted; it may be accepted with the '--accept-license' \
                 command line option.",
            );
            return false;
        }

        self.print("");
        self.print("________");
        self.print("");
        self.print(license);
        self.print("________");

        let accepted = self.yes_no(false, "Do you accept the terms of this license?");
        if !accepted {
            self.error("License not accepted.  Aborting installation.");
        }
        accepted
    }

    fn approve_command_list(&mut self, commands: &CommandList) -> bool {
        if !self.mode.expert {
            return true;
        }

        self.print("");
        self.print("The following operations will be performed:");
        self.print("");
        for command in commands.commands() {
            self.print(&format!(" --> {}", describe(command)));
        }

        let approved = self.yes_no(
            true,
            "Is this acceptable? (answering 'no' will abort installation)",
        );
        if !approved {
            self.error("Command list not accepted; exiting installation.");
        }
        approved
    }
}

fn describe(command: &InstallCommand) -> String {
    match command {
        InstallCommand::InstallFile { src, dst, mode } => format!(
            "install the file '{}' as '{}' with permissions '{:04o}'",
            src.display(),
            dst.display(),
            mode
        ),
        InstallCommand::Symlink { dst, target, .. } => {
            format!("create a symbolic link '{}' to '{}'", dst.display(), target)
        }
        InstallCommand::Run { argv } => format!("execute the command `{}`", argv.join(" ")),
    }
}

fn yes_or_no(answer: bool) -> &'static str {
    if answer { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ui(input: &str, mode: UiMode) -> StreamUi<Cursor<Vec<u8>>, Vec<u8>> {
        StreamUi::new(Cursor::new(input.as_bytes().to_vec()), Vec::new(), mode)
    }

    #[test]
    fn test_yes_no_keys_off_first_letter() {
        let mut ui = ui("Yep\nnah\n\n", UiMode::default());
        assert!(ui.yes_no(false, "Continue?"));
        assert!(!ui.yes_no(true, "Continue?"));
        assert!(ui.yes_no(true, "Continue?"));
        // End of input counts as no
        assert!(!ui.yes_no(true, "Continue?"));

        let out = String::from_utf8(ui.into_output()).unwrap();
        assert!(out.contains("[default: (N)o]"));
        assert!(out.contains("[default: (Y)es]"));
    }

    #[test]
    fn test_no_questions_uses_defaults() {
        let mode = UiMode {
            no_questions: true,
            ..UiMode::default()
        };
        let mut ui = ui("", mode);
        assert!(ui.yes_no(true, "Continue?"));
        assert!(!ui.yes_no(false, "Continue?"));
        assert_eq!(ui.get_input("/usr", "Prefix"), "/usr");
        assert!(!ui.accept_license("terms"));
    }

    #[test]
    fn test_get_input() {
        let mut ui = ui("/opt\n\n", UiMode::default());
        assert_eq!(ui.get_input("/usr", "X prefix"), "/opt");
        assert_eq!(ui.get_input("/usr", "X prefix"), "/usr");
    }

    #[test]
    fn test_silent_prints_only_errors() {
        let mode = UiMode {
            silent: true,
            no_questions: true,
            ..UiMode::default()
        };
        let mut ui = ui("", mode);
        ui.message("hello");
        ui.warn("careful");
        ui.error("broken");
        let out = String::from_utf8(ui.into_output()).unwrap();
        assert_eq!(out.trim(), "ERROR: broken");
    }

    #[test]
    fn test_command_list_shown_in_expert_mode() {
        let mode = UiMode {
            expert: true,
            ..UiMode::default()
        };
        let mut pkg = crate::package::Package::new("/pkg");
        pkg.add_entry(
            "nvidia-smi",
            crate::package::EntryKind::Plain(crate::package::PlainType::UtilityBinary),
            0o755,
            Some("/usr/bin/nvidia-smi".into()),
        );
        let commands = CommandList::from_package(&pkg).unwrap();

        let mut ui = ui("n\n", mode);
        assert!(!ui.approve_command_list(&commands));
        let out = String::from_utf8(ui.into_output()).unwrap();
        assert!(out.contains(
            " --> install the file '/pkg/nvidia-smi' as '/usr/bin/nvidia-smi' with permissions '0755'"
        ));
    }
}
