//! Out-of-process calculation engine bridge.
//!
//! One call to [`CalculationBridge::calculate`] produces exactly one
//! [`CalculationOutcome`]. Every failure (launch error, crash, timeout, bad
//! output) is classified into a [`CalculationError`]; nothing escapes as a
//! panic or an untyped error.
//!
//! Each attempt gets its own scratch directory holding the request and
//! response files. The directory is owned by a guard, so it is removed on
//! every exit path, including timeouts and the caller dropping the future.
//! The child is spawned with `kill_on_drop` for the same reason.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::codec::{EngineCodec, JsonCodec};
use crate::config::EngineConfig;
use crate::error::{CalculationError, CalculationOutcome, EngineFault, ErrorKind};
use crate::model::{
    calculation_result_typedef, CalculationResult, EngineErrorDocument, EngineRequest,
    RestaurantInput,
};
use crate::schema;
use crate::validate::validate;

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECTION_TEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CalculationBridge<C = JsonCodec> {
    config: EngineConfig,
    codec: C,
    // held for the whole retry sequence; one engine process at a time
    in_flight: Arc<Mutex<()>>,
}

impl CalculationBridge<JsonCodec> {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_codec(config, JsonCodec)
    }
}

impl<C> CalculationBridge<C>
where
    C: EngineCodec + Send + Sync,
{
    pub fn with_codec(config: EngineConfig, codec: C) -> Self {
        Self {
            config,
            codec,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// True while a calculation holds the bridge. Front ends use this to
    /// keep the calculate trigger disabled.
    pub fn is_busy(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    /// Validates, then calculates with the configured timeout and retries.
    /// Inputs with an Error-severity outcome never reach the engine.
    pub async fn submit(&self, input: &RestaurantInput) -> CalculationOutcome {
        let report = validate(input);
        if !report.is_submittable() {
            info!(
                errors = report.errors().count(),
                "input rejected before dispatch"
            );
            return Err(CalculationError::new(
                ErrorKind::Validation,
                "input failed validation",
                report.error_summary(),
            ));
        }
        self.calculate(input.clone(), self.config.timeout(), self.config.max_retries)
            .await
    }

    /// Runs the engine on `input`. `max_retries` is the total attempt budget
    /// (0 behaves as 1); only transient failures consume further attempts.
    #[instrument(skip(self, input), fields(session = %input.session_name))]
    pub async fn calculate(
        &self,
        input: RestaurantInput,
        timeout: Duration,
        max_retries: u32,
    ) -> CalculationOutcome {
        let _guard = self.in_flight.lock().await;
        let request = input.to_request();
        let attempts = max_retries.max(1);

        let mut attempt = 1;
        loop {
            debug!(attempt, attempts, "starting engine attempt");
            match self.attempt(&request, timeout).await {
                Ok(result) => {
                    info!(attempt, total_cost = result.total_cost, "calculation finished");
                    return Ok(result);
                }
                Err(err) if err.is_transient() && attempt < attempts => {
                    warn!(attempt, kind = %err.kind, message = %err.message, "transient engine failure, retrying");
                    tokio::time::sleep(self.config.retry_backoff() * attempt).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(attempt, kind = %err.kind, message = %err.message, "calculation failed");
                    return Err(err);
                }
            }
        }
    }

    async fn attempt(&self, request: &EngineRequest, limit: Duration) -> CalculationOutcome {
        let scratch = Scratch::create(&self.config.effective_scratch_dir(), request, &self.codec)?;
        let run = run_engine(&self.config, &scratch, limit).await?;
        self.interpret(run, &scratch)
        // scratch dropped here
    }

    fn interpret(&self, run: EngineRun, scratch: &Scratch) -> CalculationOutcome {
        let artifact = scratch.read_response(self.config.max_output_bytes);
        let body = non_blank(artifact.as_deref()).or_else(|| non_blank(Some(&run.stdout)));

        if !run.status.success() {
            let code = run
                .status
                .code()
                .map_or_else(|| "a signal".to_string(), |c| format!("code {c}"));
            let reported = body
                .and_then(|b| self.codec.decode_value(b.as_bytes()).ok())
                .and_then(|v| EngineErrorDocument::detect(&v));
            let message = match reported {
                Some(doc) => format!("engine exited with {code}, reporting {}: {}", doc.error, doc.message),
                None => format!("engine exited with {code}"),
            };
            let details = non_blank(Some(&run.stderr))
                .or_else(|| non_blank(artifact.as_deref()))
                .or_else(|| non_blank(Some(&run.stdout)))
                .unwrap_or_default();
            let fault = EngineFault::classify(&run.stderr);
            return Err(
                CalculationError::new(ErrorKind::EngineFailure, message, details).with_fault(fault),
            );
        }

        let Some(body) = body else {
            return Err(CalculationError::new(
                ErrorKind::EmptyOutput,
                "engine returned no result",
                run.stderr.trim(),
            ));
        };

        let value = self.codec.decode_value(body.as_bytes()).map_err(|e| {
            CalculationError::new(
                ErrorKind::MalformedResponse,
                "engine response is not valid JSON",
                e.to_string(),
            )
        })?;

        if let Some(doc) = EngineErrorDocument::detect(&value) {
            let details = match &doc.details {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            return Err(CalculationError::new(
                ErrorKind::EngineFailure,
                format!("engine reported {}: {}", doc.error, doc.message),
                details,
            ));
        }

        schema::check(&calculation_result_typedef(), &value).map_err(|errors| {
            CalculationError::new(
                ErrorKind::MalformedResponse,
                "engine response does not match the result contract",
                schema::describe(&errors),
            )
        })?;

        let result: CalculationResult = self.codec.decode(body.as_bytes()).map_err(|e| {
            CalculationError::new(
                ErrorKind::MalformedResponse,
                "engine response could not be decoded",
                e.to_string(),
            )
        })?;

        if let Some((field, amount)) = result.first_negative_amount() {
            return Err(CalculationError::new(
                ErrorKind::MalformedResponse,
                "engine returned a negative amount",
                format!("{field} = {amount}"),
            ));
        }

        if !result.is_consistent() {
            warn!(
                total = result.total_cost,
                categories = result.category_total(),
                "category costs do not add up to the total"
            );
        }

        Ok(result)
    }

    /// Checks the interpreter and engine paths without running a calculation.
    #[instrument(skip(self))]
    pub async fn diagnose(&self) -> Diagnostic {
        let engine_path = absolutize(&self.config.engine_path);
        let engine_found = engine_path.is_file();

        let (interpreter_available, interpreter_version) = match &self.config.interpreter {
            Some(interpreter) => match probe_version(interpreter).await {
                Ok(version) => (true, Some(version)),
                Err(reason) => {
                    debug!(%reason, "interpreter probe failed");
                    (false, None)
                }
            },
            None => (engine_found, None),
        };

        Diagnostic {
            interpreter: self.config.interpreter.clone(),
            interpreter_available,
            interpreter_version,
            engine_path,
            engine_found,
            working_dir: self.config.effective_working_dir(),
            scratch_dir: self.config.effective_scratch_dir(),
            missing_files: self.config.missing_files(),
            timeout_secs: self.config.timeout().as_secs_f64(),
            max_retries: self.config.max_retries,
        }
    }

    /// Runs one calculation on a known-good input, single attempt, with the
    /// configured timeout capped at ten seconds.
    #[instrument(skip(self))]
    pub async fn test_connection(&self) -> CalculationOutcome {
        let limit = self.config.timeout().min(CONNECTION_TEST_TIMEOUT);
        self.calculate(RestaurantInput::connection_test(), limit, 1)
            .await
    }
}

/// Per-attempt transient artifacts. Dropping it deletes the directory.
struct Scratch {
    _dir: TempDir,
    request_path: PathBuf,
    response_path: PathBuf,
}

impl Scratch {
    fn create<C: EngineCodec>(
        root: &Path,
        request: &EngineRequest,
        codec: &C,
    ) -> Result<Self, CalculationError> {
        let unexpected = |what: &str, e: &dyn fmt::Display| {
            CalculationError::new(
                ErrorKind::Unexpected,
                format!("could not {what}"),
                format!("{}: {e}", root.display()),
            )
        };

        let root = absolutize(root);
        std::fs::create_dir_all(&root).map_err(|e| unexpected("create the scratch directory", &e))?;
        let dir = tempfile::Builder::new()
            .prefix("trackaface-")
            .tempdir_in(&root)
            .map_err(|e| unexpected("create the scratch directory", &e))?;

        let request_path = dir.path().join("request.json");
        let response_path = dir.path().join("response.json");
        let bytes = codec
            .encode(request)
            .map_err(|e| unexpected("encode the engine request", &e))?;
        std::fs::write(&request_path, bytes)
            .map_err(|e| unexpected("write the engine request", &e))?;

        Ok(Self {
            _dir: dir,
            request_path,
            response_path,
        })
    }

    fn read_response(&self, limit: u64) -> Option<String> {
        let file = std::fs::File::open(&self.response_path).ok()?;
        let mut buf = Vec::new();
        file.take(limit).read_to_end(&mut buf).ok()?;
        Some(String::from_utf8_lossy(&buf).into_owned())
    }
}

struct EngineRun {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

async fn run_engine(
    config: &EngineConfig,
    scratch: &Scratch,
    limit: Duration,
) -> Result<EngineRun, CalculationError> {
    let engine_path = absolutize(&config.engine_path);
    let mut command = match &config.interpreter {
        Some(interpreter) => {
            let mut c = Command::new(interpreter);
            c.arg(&engine_path);
            c
        }
        None => Command::new(&engine_path),
    };
    command
        .args(&config.engine_args)
        .arg("--input")
        .arg(&scratch.request_path)
        .arg("--output")
        .arg(&scratch.response_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = config.effective_working_dir() {
        command.current_dir(absolutize(&dir));
    }

    let mut child = command.spawn().map_err(|e| {
        CalculationError::new(
            ErrorKind::Unexpected,
            "failed to launch the calculation engine",
            format!(
                "{e}\ninterpreter: {}\nengine: {}",
                config
                    .interpreter
                    .as_deref()
                    .map_or_else(|| "(none)".to_string(), |p| p.display().to_string()),
                engine_path.display()
            ),
        )
    })?;
    debug!(pid = child.id(), "engine started");

    let limit_bytes = config.max_output_bytes;
    let mut stdout_task = drain(child.stdout.take(), limit_bytes);
    let mut stderr_task = drain(child.stderr.take(), limit_bytes);

    // one deadline for exit and both pipes: a descendant that inherited the
    // pipes keeps them open after the engine itself has exited
    let finished = tokio::time::timeout(limit, async {
        let status = child.wait().await;
        let stdout = (&mut stdout_task).await.unwrap_or_default();
        let stderr = (&mut stderr_task).await.unwrap_or_default();
        (status, stdout, stderr)
    })
    .await;

    match finished {
        Ok((Ok(status), stdout, stderr)) => Ok(EngineRun {
            status,
            stdout,
            stderr,
        }),
        Ok((Err(e), _, _)) => Err(CalculationError::new(
            ErrorKind::Unexpected,
            "lost track of the engine process",
            e.to_string(),
        )),
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(CalculationError::new(
                ErrorKind::Timeout,
                format!(
                    "calculation exceeded the {:.1}s limit",
                    limit.as_secs_f64()
                ),
                "the engine process was terminated and its partial output discarded",
            ))
        }
    }
}

/// Reads a pipe to the end, keeping at most `limit` bytes. The rest is read
/// and thrown away so the writer never blocks on a full pipe.
fn drain<R>(pipe: Option<R>, limit: u64) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = AsyncReadExt::take(&mut pipe, limit)
                .read_to_end(&mut buf)
                .await;
            if let Ok(dropped) = tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await {
                if dropped > 0 {
                    warn!(kept = buf.len(), dropped, "engine output truncated");
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

async fn probe_version(interpreter: &Path) -> Result<String, String> {
    let output = Command::new(interpreter)
        .arg("--version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(VERSION_PROBE_TIMEOUT, output)
        .await
        .map_err(|_| "timed out".to_string())?
        .map_err(|e| e.to_string())?;
    if !output.status.success() {
        return Err(format!("exited with {}", output.status));
    }
    // python 2 printed its version on stderr
    let text = if output.stdout.is_empty() {
        output.stderr
    } else {
        output.stdout
    };
    Ok(String::from_utf8_lossy(&text).trim().to_string())
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.trim().is_empty())
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() || path.parent().map_or(true, |p| p.as_os_str().is_empty()) {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Installation report for the engine.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub interpreter: Option<PathBuf>,
    pub interpreter_available: bool,
    pub interpreter_version: Option<String>,
    pub engine_path: PathBuf,
    pub engine_found: bool,
    pub missing_files: Vec<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub scratch_dir: PathBuf,
    pub timeout_secs: f64,
    pub max_retries: u32,
}

impl Diagnostic {
    pub fn is_ready(&self) -> bool {
        self.interpreter_available && self.engine_found && self.missing_files.is_empty()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = |ok: bool| if ok { "ok" } else { "MISSING" };
        match &self.interpreter {
            Some(interpreter) => writeln!(
                f,
                "Interpreter: {} [{}] {}",
                interpreter.display(),
                mark(self.interpreter_available),
                self.interpreter_version.as_deref().unwrap_or("")
            )?,
            None => writeln!(f, "Interpreter: (engine runs directly)")?,
        }
        writeln!(
            f,
            "Engine:      {} [{}]",
            self.engine_path.display(),
            mark(self.engine_found)
        )?;
        for file in &self.missing_files {
            writeln!(f, "Missing:     {}", file.display())?;
        }
        if let Some(dir) = &self.working_dir {
            writeln!(f, "Working dir: {}", dir.display())?;
        }
        writeln!(f, "Scratch dir: {}", self.scratch_dir.display())?;
        write!(
            f,
            "Timeout:     {:.1}s, {} attempt(s)",
            self.timeout_secs, self.max_retries
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_names_stay_relative() {
        assert_eq!(absolutize(Path::new("python")), PathBuf::from("python"));
        let abs = absolutize(Path::new("engine/engine_api.py"));
        assert!(abs.is_absolute());
        assert!(abs.ends_with("engine/engine_api.py"));
    }

    #[test]
    fn scratch_is_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let request = RestaurantInput::default().to_request();
        let scratch = Scratch::create(root.path(), &request, &JsonCodec).unwrap();
        assert!(scratch.request_path.is_file());
        assert!(scratch.read_response(1024).is_none());
        drop(scratch);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn response_file_is_read_up_to_the_cap() {
        let root = tempfile::tempdir().unwrap();
        let request = RestaurantInput::default().to_request();
        let scratch = Scratch::create(root.path(), &request, &JsonCodec).unwrap();
        std::fs::write(&scratch.response_path, "0123456789").unwrap();
        assert_eq!(scratch.read_response(4).as_deref(), Some("0123"));
        assert_eq!(scratch.read_response(64).as_deref(), Some("0123456789"));
    }

    #[tokio::test]
    async fn drain_keeps_at_most_the_limit() {
        let kept = drain(Some(&b"abcdefgh"[..]), 4).await.unwrap();
        assert_eq!(kept, "abcd");
        let whole = drain(Some(&b"abc"[..]), 4).await.unwrap();
        assert_eq!(whole, "abc");
        let none = drain(None::<&'static [u8]>, 4).await.unwrap();
        assert_eq!(none, "");
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_engine() {
        let bridge = CalculationBridge::new(EngineConfig::direct("/nonexistent/engine"));
        let input = RestaurantInput {
            session_name: "x".into(),
            ..RestaurantInput::default()
        };
        let err = bridge.submit(&input).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.details.contains("session_name"));
    }

    #[tokio::test]
    async fn missing_engine_is_unexpected_and_retried() {
        let scratch = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            scratch_dir: Some(scratch.path().to_path_buf()),
            retry_backoff_ms: 0,
            ..EngineConfig::direct("/nonexistent/trackaface/engine")
        };
        let bridge = CalculationBridge::new(config);
        let input = RestaurantInput {
            session_name: "Launch failure".into(),
            ..RestaurantInput::default()
        };
        let err = bridge
            .calculate(input, Duration::from_secs(5), 2)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unexpected);
        assert!(err.details.contains("/nonexistent/trackaface/engine"));
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
        assert!(!bridge.is_busy());
    }
}
