//! Shell reader
//!
//! Runs a command through the user's shell and streams its output line by
//! line. Both pipes are read by their own tasks and merged into one bounded
//! queue, so lines come out in the order they arrived.

use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::{Captures, Regex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub const QUEUE_CAPACITY: usize = 250;
pub const STDERR_PREFIX: &str = "[stderr] ";

/// How long `close` lets a child that already closed its pipes exit on its own
const EXIT_GRACE: Duration = Duration::from_millis(500);

static ANSI_ESCAPE: OnceLock<Regex> = OnceLock::new();

fn ansi_escape() -> &'static Regex {
    ANSI_ESCAPE.get_or_init(|| {
        Regex::new(r"\x1b\[\??(\d*)(?:([ABCDEFGJKSThilmnsu])|;(\d+)([fH]))")
            .unwrap_or_else(|err| panic!("invalid ANSI pattern: {}", err))
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("no output for {0:?}")]
    Timeout(Duration),
    #[error("process error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ShellOptions {
    /// Give up when no line arrives for this long
    pub timeout: Duration,
    pub queue_capacity: usize,
    /// Keep SGR colour codes instead of stripping every escape
    pub keep_ansi_colour: bool,
    /// Shell executable; `$SHELL` or `/bin/sh` when unset
    pub shell: Option<String>,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            queue_capacity: QUEUE_CAPACITY,
            keep_ansi_colour: false,
            shell: None,
        }
    }
}

/// Strip a raw output line down to what a chat message can show
pub fn clean_line(raw: &[u8], keep_ansi_colour: bool) -> String {
    let text = String::from_utf8_lossy(raw).replace('\r', "");
    let text = text.trim_matches('\n');
    let text = ansi_escape().replace_all(text, |caps: &Captures| {
        let is_colour = caps.get(2).map(|m| m.as_str()) == Some("m");
        if is_colour && keep_ansi_colour {
            caps[0].to_string()
        } else {
            String::new()
        }
    });
    text.replace("``", "`\u{200b}`")
}

/// Shell invocation for this platform: (program, args, prompt, highlight)
fn shell_command(command: &str, shell: Option<&str>) -> (String, Vec<String>, &'static str, &'static str) {
    if cfg!(windows) {
        (
            "cmd".to_string(),
            vec!["/c".to_string(), command.to_string()],
            "cmd >",
            "cmd",
        )
    } else {
        let program = shell
            .map(str::to_string)
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "/bin/sh".to_string());
        (
            program,
            vec!["-c".to_string(), command.to_string()],
            "$",
            "ansi",
        )
    }
}

pub struct ShellReader {
    child: Child,
    rx: mpsc::Receiver<String>,
    timeout: Duration,
    prompt: &'static str,
    highlight: &'static str,
    exit_code: Option<i32>,
    closed: bool,
}

impl ShellReader {
    pub fn spawn(command: &str, options: ShellOptions) -> Result<Self, ShellError> {
        let (program, args, prompt, highlight) = shell_command(command, options.shell.as_deref());
        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ShellError::Spawn {
                command: command.to_string(),
                source,
            })?;
        debug!(%program, pid = ?child.id(), "shell started");

        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        // Windows consoles do not emit ANSI colour
        let keep_colour = options.keep_ansi_colour && !cfg!(windows);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, "", keep_colour, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, STDERR_PREFIX, keep_colour, tx));
        }

        Ok(Self {
            child,
            rx,
            timeout: options.timeout,
            prompt,
            highlight,
            exit_code: None,
            closed: false,
        })
    }

    /// Next output line; `None` once both streams closed and every line was read
    pub async fn next_line(&mut self) -> Result<Option<String>, ShellError> {
        match tokio::time::timeout(self.timeout, self.rx.recv()).await {
            Ok(line) => Ok(line),
            Err(_) => {
                warn!(timeout = ?self.timeout, "shell produced no output");
                Err(ShellError::Timeout(self.timeout))
            }
        }
    }

    /// Stop the child and record its exit code
    ///
    /// A child that already closed its output gets a short grace period to
    /// exit on its own before it is killed.
    pub async fn close(&mut self) -> Result<Option<i32>, ShellError> {
        if self.closed {
            return Ok(self.exit_code);
        }
        self.closed = true;
        self.rx.close();

        let status = match self.child.try_wait()? {
            Some(status) => status,
            None => {
                let exited = tokio::time::timeout(EXIT_GRACE, self.child.wait()).await;
                match exited {
                    Ok(status) => status?,
                    Err(_) => {
                        self.child.start_kill()?;
                        self.child.wait().await?
                    }
                }
            }
        };
        self.exit_code = status.code();
        debug!(code = ?self.exit_code, "shell closed");
        Ok(self.exit_code)
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Prompt shown before the command, e.g. `$`
    pub fn prompt(&self) -> &'static str {
        self.prompt
    }

    /// Code fence language for the output
    pub fn highlight(&self) -> &'static str {
        self.highlight
    }
}

async fn pump<R>(stream: R, prefix: &'static str, keep_colour: bool, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = format!("{}{}", prefix, clean_line(&buf, keep_colour));
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                debug!(error = %err, "shell stream read failed");
                break;
            }
        }
    }
}
