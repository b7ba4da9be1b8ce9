//! User commands and the terminal line syntax for them.

use std::path::PathBuf;

use crate::thread::ThreadId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Submit(String),
    NewThread,
    SelectThread(ThreadId),
    DeleteThread(ThreadId),
    RenameThread(ThreadId, String),
    ListThreads,
    SelectModel(String),
    RefreshModels,
    Upload(PathBuf),
    Connect,
    Quit,
}

/// Help text for the slash commands understood by [`parse_line`].
pub const HELP: &str = "\
/new                 start a new thread
/threads             list threads
/open <id>           switch to a thread
/delete <id>         delete a thread
/rename <id> <title> rename a thread
/models              refresh the model list
/model <id>          select a model
/upload <path>       upload a document
/connect             reconnect to the server
/quit                exit";

/// Parse one input line. Lines not starting with `/` are chat input;
/// malformed slash commands yield an error message.
pub fn parse_line(line: &str) -> Result<Command, String> {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Ok(Command::Submit(line.to_string()));
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    match name {
        "new" => Ok(Command::NewThread),
        "threads" => Ok(Command::ListThreads),
        "open" => {
            let id = required_arg(name, arg, "a thread id")?;
            Ok(Command::SelectThread(ThreadId::new(id)))
        }
        "delete" => {
            let id = required_arg(name, arg, "a thread id")?;
            Ok(Command::DeleteThread(ThreadId::new(id)))
        }
        "rename" => {
            let arg = required_arg(name, arg, "a thread id and a title")?;
            match arg.split_once(char::is_whitespace) {
                Some((id, title)) => Ok(Command::RenameThread(
                    ThreadId::new(id),
                    title.trim().to_string(),
                )),
                None => Err("/rename needs a thread id and a title".to_string()),
            }
        }
        "models" => Ok(Command::RefreshModels),
        "model" => Ok(Command::SelectModel(required_arg(name, arg, "a model id")?.to_string())),
        "upload" => Ok(Command::Upload(PathBuf::from(required_arg(name, arg, "a file path")?))),
        "connect" => Ok(Command::Connect),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(format!("unknown command /{other}")),
    }
}

fn required_arg<'a>(name: &str, arg: &'a str, what: &str) -> Result<&'a str, String> {
    if arg.is_empty() {
        Err(format!("/{name} needs {what}"))
    } else {
        Ok(arg)
    }
}
