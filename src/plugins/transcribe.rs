//! Transcription collaborator.
//!
//! The pipeline treats transcription as a black box with a bounded timeout.
//! `CommandTranscriber` runs an external program (e.g. a local whisper build)
//! with the audio path appended and takes its stdout as the transcript.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Attempts per capture: the first call plus one retry.
pub const TRANSCRIPTION_ATTEMPTS: u32 = 2;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranscriptionError {
    #[error("transcription timed out after {0:?}")]
    Timeout(Duration),
    #[error("transcriber exited with status {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
    #[error("transcriber produced no text")]
    Empty,
    #[error("could not run transcriber: {0}")]
    Spawn(String),
    #[error("no transcriber configured")]
    Unavailable,
}

pub trait Transcriber {
    fn transcribe(&self, audio: &Path, timeout: Duration) -> Result<String, TranscriptionError>;
}

/// Used when no transcription command is configured; every call fails.
pub struct UnconfiguredTranscriber;

impl Transcriber for UnconfiguredTranscriber {
    fn transcribe(&self, _audio: &Path, _timeout: Duration) -> Result<String, TranscriptionError> {
        Err(TranscriptionError::Unavailable)
    }
}

#[derive(Debug, Clone)]
pub struct CommandTranscriber {
    program: String,
    args: Vec<String>,
}

impl CommandTranscriber {
    /// `argv[0]` is the program; the rest are leading arguments.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Transcriber for CommandTranscriber {
    fn transcribe(&self, audio: &Path, timeout: Duration) -> Result<String, TranscriptionError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(audio)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TranscriptionError::Spawn(format!("{}: {e}", self.program)))?;

        // Drain pipes on helper threads so a chatty child cannot block on a full pipe.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = wait_with_deadline(&mut child, timeout)?;
        let out = stdout.join().unwrap_or_default();
        let err = stderr.join().unwrap_or_default();

        if !status.success() {
            return Err(TranscriptionError::Failed {
                code: status.code(),
                stderr: err.chars().take(500).collect(),
            });
        }
        let text = out.trim().to_string();
        if text.is_empty() {
            return Err(TranscriptionError::Empty);
        }
        Ok(text)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            let mut bytes = Vec::new();
            if pipe.read_to_end(&mut bytes).is_ok() {
                buf = String::from_utf8_lossy(&bytes).into_owned();
            }
        }
        buf
    })
}

fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
) -> Result<std::process::ExitStatus, TranscriptionError> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(TranscriptionError::Timeout(timeout));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(TranscriptionError::Spawn(e.to_string())),
        }
    }
}

/// Calls the transcriber up to [`TRANSCRIPTION_ATTEMPTS`] times. Returns the
/// transcript, or every error observed when all attempts failed.
pub fn transcribe_with_retry(
    transcriber: &dyn Transcriber,
    audio: &Path,
    timeout: Duration,
) -> Result<String, Vec<TranscriptionError>> {
    let mut failures = Vec::new();
    for attempt in 1..=TRANSCRIPTION_ATTEMPTS {
        match transcriber.transcribe(audio, timeout) {
            Ok(text) => return Ok(text),
            Err(e) => {
                tracing::warn!(attempt, audio = %audio.display(), error = %e, "transcription attempt failed");
                failures.push(e);
            }
        }
    }
    Err(failures)
}
