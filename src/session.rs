//! REPL session
//!
//! The dispatch layer between a chat command and the core: it strips the
//! code fence, lends out the scope, injects convenience bindings, runs the
//! snippet and routes every produced value to the display target as a plain
//! message, a file or a live view. Compile errors, runtime errors and
//! cancellation all end up as the final message of the invocation; only a
//! target that cannot be written to at all fails the call.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codeblock;
use crate::compiler::{compile, CompileError};
use crate::config::Config;
use crate::display::{
    deliver_file, deliver_private, deliver_send, DisplayTarget, MessageId, ResourceError,
    StatusMarker, UserId, OUTPUT_FILE_NAME,
};
use crate::execution::{Execution, ExecutionError, Produced};
use crate::executor::{RuntimeError, Val};
use crate::inspect::{self, INSPECTION_FENCE, INSPECTION_FILE_NAME};
use crate::live_view::{
    CancelReason, LiveView, LiveViewError, LiveViewHandle, LiveViewOptions, LiveViewPhase,
    CANCELLED_STATUS,
};
use crate::pager::{Paginator, PagerError, RenderedPage, EMPTY_PAGE};
use crate::scope::{Scope, ScopeBusy, ScopeLease, ScopeSlot};
use crate::shell::{ShellError, ShellReader};
use crate::tasks::{TaskGuard, TaskRegistry};
use crate::timing::format_stddev;

pub const TOKEN_PLACEHOLDER: &str = "[token omitted]";
pub const TIMEIT_NOTE: &str =
    "Delay will be added by async setup, use only for relative measurements";

/* ===================== Types ===================== */

/// What the host knows about the invocation
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub author: Val,
    pub channel: Val,
    pub guild: Val,
    pub message: Val,
    pub bot: Val,
    /// Owner of any live view this invocation opens
    pub author_id: Option<UserId>,
    /// Redacted from every result
    pub bot_token: Option<String>,
}

impl Default for InvocationContext {
    fn default() -> Self {
        Self {
            author: Val::Null,
            channel: Val::Null,
            guild: Val::Null,
            message: Val::Null,
            bot: Val::Null,
            author_id: None,
            bot_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed,
    CompileFailed(CompileError),
    Failed(RuntimeError),
    Cancelled,
}

impl Outcome {
    pub fn marker(&self) -> StatusMarker {
        match self {
            Outcome::Completed => StatusMarker::Done,
            Outcome::CompileFailed(_) => StatusMarker::SyntaxError,
            Outcome::Failed(_) => StatusMarker::Error,
            Outcome::Cancelled => StatusMarker::Timeout,
        }
    }
}

/// Where a result ended up
#[derive(Debug)]
pub enum Delivery {
    Message(MessageId),
    File(MessageId),
    /// Still live; navigation stays possible until it is dropped or times out
    Paginated(LiveViewHandle),
}

#[derive(Debug)]
pub struct EvaluationReport {
    pub outcome: Outcome,
    /// Non-null values produced
    pub produced: usize,
    pub deliveries: Vec<Delivery>,
    pub task_index: u64,
}

#[derive(Debug)]
pub struct TimeitReport {
    pub outcome: Outcome,
    /// Wall time of every completed run, in order
    pub timings: Vec<Duration>,
    pub task_index: u64,
}

impl TimeitReport {
    pub fn iterations(&self) -> usize {
        self.timings.len()
    }
}

/// How produced values are shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultStyle {
    Plain,
    Inspection,
}

impl ResultStyle {
    fn command(&self) -> &'static str {
        match self {
            ResultStyle::Plain => "py",
            ResultStyle::Inspection => "pyi",
        }
    }
}

#[derive(Debug)]
pub struct ShellReport {
    pub exit_code: Option<i32>,
    pub phase: LiveViewPhase,
    /// The command went silent for longer than the shell timeout
    pub timed_out: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    ScopeBusy(#[from] ScopeBusy),
    #[error("could not display output: {0}")]
    Display(#[from] ResourceError),
    #[error(transparent)]
    LiveView(#[from] LiveViewError),
    #[error(transparent)]
    Pager(#[from] PagerError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Shell(#[from] ShellError),
}

/* ===================== Session ===================== */

#[derive(Debug)]
struct SessionState {
    retain: bool,
    slot: ScopeSlot,
    last_result: Val,
}

pub struct ReplSession {
    config: Config,
    state: Mutex<SessionState>,
    tasks: TaskRegistry,
}

impl ReplSession {
    pub fn new(config: Config) -> Self {
        Self {
            state: Mutex::new(SessionState {
                retain: config.retain,
                slot: ScopeSlot::default(),
                last_result: Val::Null,
            }),
            config,
            tasks: TaskRegistry::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn retain(&self) -> bool {
        self.lock().retain
    }

    /// Toggle scope retention; returns false if it was already in that state
    ///
    /// Turning retention on starts from an empty scope.
    pub fn set_retain(&self, on: bool) -> bool {
        let mut state = self.lock();
        if state.retain == on {
            return false;
        }
        state.retain = on;
        if on {
            state.slot = ScopeSlot::default();
        }
        info!(retain = on, "scope retention changed");
        true
    }

    pub fn last_result(&self) -> Val {
        self.lock().last_result.clone()
    }

    /// Copy of the retained scope, `None` when retention is off
    pub fn retained_scope(&self) -> Result<Option<Scope>, ScopeBusy> {
        let slot = {
            let state = self.lock();
            if !state.retain {
                return Ok(None);
            }
            state.slot.clone()
        };
        let mut lease = slot.checkout()?;
        let scope = lease.take();
        let copy = scope.clone();
        lease.restore(scope);
        Ok(Some(copy))
    }

    /// Convenience names injected into the scope of one evaluation
    pub fn bindings(&self, ctx: &InvocationContext) -> BTreeMap<String, Val> {
        let prefix = self.config.scope_prefix();
        let mut bindings: BTreeMap<String, Val> = [
            ("author", &ctx.author),
            ("channel", &ctx.channel),
            ("guild", &ctx.guild),
            ("message", &ctx.message),
            ("msg", &ctx.message),
            ("bot", &ctx.bot),
        ]
        .into_iter()
        .map(|(name, value)| (format!("{}{}", prefix, name), value.clone()))
        .collect();
        bindings.insert("_".to_string(), self.last_result());
        bindings
    }

    /* ---------- Evaluation ---------- */

    /// Run one snippet and route everything it produces to `target`
    pub async fn evaluate(
        &self,
        ctx: &InvocationContext,
        argument: &str,
        target: Arc<dyn DisplayTarget>,
    ) -> Result<EvaluationReport, SessionError> {
        self.evaluate_as(ResultStyle::Plain, ctx, argument, target)
            .await
    }

    /// Like [`ReplSession::evaluate`], reporting an inspection of every value
    pub async fn inspect(
        &self,
        ctx: &InvocationContext,
        argument: &str,
        target: Arc<dyn DisplayTarget>,
    ) -> Result<EvaluationReport, SessionError> {
        self.evaluate_as(ResultStyle::Inspection, ctx, argument, target)
            .await
    }

    async fn evaluate_as(
        &self,
        style: ResultStyle,
        ctx: &InvocationContext,
        argument: &str,
        target: Arc<dyn DisplayTarget>,
    ) -> Result<EvaluationReport, SessionError> {
        let codeblock = codeblock::parse(argument);
        let bindings = self.bindings(ctx);
        let (lease, snapshot, scope) = self.lend_scope(&bindings)?;

        let guard = self.tasks.submit(style.command());
        info!(task = guard.index(), retained = lease.is_some(), ?style, "evaluating snippet");
        react(target.as_ref(), StatusMarker::Running).await;

        let (scope, result) = self
            .run_snippet(&codeblock.content, scope, style, &guard, ctx, &target)
            .await;
        return_scope(lease, snapshot, scope, &bindings);

        let report = result?;
        info!(task = report.task_index, produced = report.produced, outcome = ?report.outcome.marker(), "snippet finished");
        react(target.as_ref(), report.outcome.marker()).await;
        Ok(report)
    }

    /// Check out the retained scope, or start a fresh one, with `bindings` applied
    ///
    /// A retained scope comes with a copy taken before the bindings, restored
    /// if the execution loses the scope.
    fn lend_scope(
        &self,
        bindings: &BTreeMap<String, Val>,
    ) -> Result<(Option<ScopeLease>, Option<Scope>, Scope), SessionError> {
        let slot = {
            let state = self.lock();
            state.retain.then(|| state.slot.clone())
        };
        let mut lease = match &slot {
            Some(slot) => Some(slot.checkout()?),
            None => None,
        };
        let mut scope = lease.as_mut().map(|l| l.take()).unwrap_or_default();
        let snapshot = lease.as_ref().map(|_| scope.clone());
        scope.update(bindings.clone());
        Ok((lease, snapshot, scope))
    }

    /// Compile and run `source`, routing its values by `style`
    ///
    /// The scope comes back unless the execution task was lost.
    async fn run_snippet(
        &self,
        source: &str,
        scope: Scope,
        style: ResultStyle,
        guard: &TaskGuard,
        ctx: &InvocationContext,
        target: &Arc<dyn DisplayTarget>,
    ) -> (Option<Scope>, Result<EvaluationReport, SessionError>) {
        let mut report = EvaluationReport {
            outcome: Outcome::Completed,
            produced: 0,
            deliveries: Vec::new(),
            task_index: guard.index(),
        };

        let unit = match compile(source, &scope) {
            Ok(unit) => unit,
            Err(err) => {
                let sent = self.report_compile_error(&err, ctx, target.as_ref()).await;
                report.outcome = Outcome::CompileFailed(err);
                return (Some(scope), sent.map(|_| report));
            }
        };
        for warning in &unit.warnings {
            debug!(%warning, "compile warning");
        }

        let mut execution = Execution::spawn_with_token(
            unit,
            scope,
            self.config.execution_options(),
            guard.token(),
        );
        let mut failure: Option<SessionError> = None;

        while let Some(item) = execution.next().await {
            match item {
                Produced::Value(value) => {
                    if value.is_null() && style == ResultStyle::Plain {
                        continue;
                    }
                    report.produced += 1;
                    self.lock().last_result = value.clone();
                    let delivered = match style {
                        ResultStyle::Plain => self.handle_result(&value, ctx, target).await,
                        ResultStyle::Inspection => {
                            self.handle_inspection(&value, ctx, target).await
                        }
                    };
                    match delivered {
                        Ok(delivery) => report.deliveries.push(delivery),
                        Err(err) => {
                            warn!(error = %err, "could not deliver result, cancelling");
                            execution.cancel();
                            failure = Some(err);
                            break;
                        }
                    }
                }
                Produced::Failed(err) => {
                    if let Err(send_err) =
                        self.report_runtime_error(&err, ctx, target.as_ref()).await
                    {
                        failure = Some(send_err);
                    }
                    report.outcome = Outcome::Failed(err);
                }
                Produced::Cancelled => {
                    if let Err(send_err) = self.report_cancelled(target.as_ref()).await {
                        failure = Some(send_err);
                    }
                    report.outcome = Outcome::Cancelled;
                }
            }
        }

        let scope = match execution.join().await {
            Ok((scope, state)) => {
                debug!(?state, "execution joined");
                scope
            }
            Err(err) => {
                warn!(error = %err, "execution task lost");
                return (None, Err(err.into()));
            }
        };
        match failure {
            Some(err) => (Some(scope), Err(err)),
            None => (Some(scope), Ok(report)),
        }
    }

    async fn report_compile_error(
        &self,
        err: &CompileError,
        ctx: &InvocationContext,
        target: &dyn DisplayTarget,
    ) -> Result<(), SessionError> {
        let private = self.config.always_dm_traceback;
        self.send_report(&err.render(), private, ctx, target).await
    }

    async fn report_runtime_error(
        &self,
        err: &RuntimeError,
        ctx: &InvocationContext,
        target: &dyn DisplayTarget,
    ) -> Result<(), SessionError> {
        let private = !self.config.no_dm_traceback;
        self.send_report(&err.to_string(), private, ctx, target).await
    }

    async fn report_cancelled(&self, target: &dyn DisplayTarget) -> Result<(), SessionError> {
        let page = RenderedPage::text(CANCELLED_STATUS);
        deliver_send(target, &page, &self.config.retry_policy()).await?;
        Ok(())
    }

    /// Show one produced value
    ///
    /// Strings are shown as they are and everything else by its repr. Short
    /// text is sent directly; longer text is attached as a file when the
    /// platform previews files that large, and paged otherwise.
    pub async fn handle_result(
        &self,
        value: &Val,
        ctx: &InvocationContext,
        target: &Arc<dyn DisplayTarget>,
    ) -> Result<Delivery, SessionError> {
        let text = match value {
            Val::Str(s) => s.clone(),
            other => other.repr(),
        };
        let text = redact(text, ctx);
        let limits = target.limits();
        let retry = self.config.retry_policy();

        if text.chars().count() <= limits.max_message_len {
            let text = if text.trim().is_empty() {
                EMPTY_PAGE.to_string()
            } else {
                text
            };
            let id = deliver_send(target.as_ref(), &RenderedPage::text(text), &retry).await?;
            return Ok(Delivery::Message(id));
        }

        if !self.config.force_paginator && text.len() <= limits.max_file_preview {
            let id = deliver_file(target.as_ref(), OUTPUT_FILE_NAME, text.as_bytes(), &retry).await?;
            return Ok(Delivery::File(id));
        }

        self.page_out(&text, "```", ctx, target).await
    }

    /// Show the inspection of one produced value, as a file or paged
    pub async fn handle_inspection(
        &self,
        value: &Val,
        ctx: &InvocationContext,
        target: &Arc<dyn DisplayTarget>,
    ) -> Result<Delivery, SessionError> {
        let repr = redact(value.repr(), ctx);
        let text = redact(inspect::render(value, &repr), ctx);
        let limits = target.limits();

        if !self.config.force_paginator && text.len() <= limits.max_file_preview {
            let retry = self.config.retry_policy();
            let id = deliver_file(target.as_ref(), INSPECTION_FILE_NAME, text.as_bytes(), &retry)
                .await?;
            return Ok(Delivery::File(id));
        }

        self.page_out(&text, INSPECTION_FENCE, ctx, target).await
    }

    /// Open a live view on the first page of `text`, owned by the invoker
    async fn page_out(
        &self,
        text: &str,
        fence: &str,
        ctx: &InvocationContext,
        target: &Arc<dyn DisplayTarget>,
    ) -> Result<Delivery, SessionError> {
        let page_size = self.config.pager.page_size.min(target.limits().max_message_len);
        let mut paginator = Paginator::new(page_size)?.with_fence(fence, "```")?;
        paginator.feed(text);
        paginator.set_display_page(0);

        let options = LiveViewOptions {
            throttle: Some(self.config.throttle()),
            idle_timeout: Some(Duration::from_secs(self.config.pager.idle_timeout_secs)),
            owner: ctx.author_id.clone(),
            delete_on_close: true,
            retry: self.config.retry_policy(),
        };
        let view = LiveView::start(
            paginator,
            vec![Arc::clone(target)],
            options,
            CancellationToken::new(),
        )
        .await?;
        Ok(Delivery::Paginated(view))
    }

    /// Send diagnostic text as fenced pages, privately if asked
    async fn send_report(
        &self,
        text: &str,
        private: bool,
        ctx: &InvocationContext,
        target: &dyn DisplayTarget,
    ) -> Result<(), SessionError> {
        let text = redact(text.to_string(), ctx).replace("``", "`\u{200b}`");
        let mut paginator =
            Paginator::new(target.limits().max_message_len)?.with_fence("```", "```")?;
        paginator.feed(&text);

        let retry = self.config.retry_policy();
        for index in 0..paginator.page_count() {
            let page = RenderedPage::text(paginator.render(index).content);
            if private {
                deliver_private(target, &page, &retry).await?;
            } else {
                deliver_send(target, &page, &retry).await?;
            }
        }
        Ok(())
    }

    /* ---------- Timing ---------- */

    /// Run a snippet repeatedly and report how long the runs took
    ///
    /// Runs stop at the configured iteration count, once the time limit has
    /// passed, or at the first error or cancellation. Produced values become
    /// the last result but are not displayed. Every run shares one scope.
    pub async fn timeit(
        &self,
        ctx: &InvocationContext,
        argument: &str,
        target: Arc<dyn DisplayTarget>,
    ) -> Result<TimeitReport, SessionError> {
        let codeblock = codeblock::parse(argument);
        let bindings = self.bindings(ctx);
        let (lease, snapshot, scope) = self.lend_scope(&bindings)?;

        let guard = self.tasks.submit("timeit");
        info!(task = guard.index(), retained = lease.is_some(), "timing snippet");
        react(target.as_ref(), StatusMarker::Running).await;

        let (scope, result) = self
            .run_timed(&codeblock.content, scope, &guard, ctx, &target)
            .await;
        return_scope(lease, snapshot, scope, &bindings);

        let report = result?;
        info!(
            task = report.task_index,
            iterations = report.iterations(),
            outcome = ?report.outcome.marker(),
            "timing finished"
        );
        react(target.as_ref(), report.outcome.marker()).await;
        Ok(report)
    }

    async fn run_timed(
        &self,
        source: &str,
        mut scope: Scope,
        guard: &TaskGuard,
        ctx: &InvocationContext,
        target: &Arc<dyn DisplayTarget>,
    ) -> (Option<Scope>, Result<TimeitReport, SessionError>) {
        let mut report = TimeitReport {
            outcome: Outcome::Completed,
            timings: Vec::new(),
            task_index: guard.index(),
        };

        let unit = match compile(source, &scope) {
            Ok(unit) => unit,
            Err(err) => {
                let sent = self.report_compile_error(&err, ctx, target.as_ref()).await;
                report.outcome = Outcome::CompileFailed(err);
                return (Some(scope), sent.map(|_| report));
            }
        };

        let (max_iterations, max_duration) = self.config.timeit_limits();
        let overall = Instant::now();
        while report.timings.len() < max_iterations && overall.elapsed() < max_duration {
            let start = Instant::now();
            let mut execution = Execution::spawn_with_token(
                unit.clone(),
                scope,
                self.config.execution_options(),
                guard.token(),
            );

            let mut failure: Option<SessionError> = None;
            while let Some(item) = execution.next().await {
                match item {
                    Produced::Value(value) => {
                        if !value.is_null() {
                            self.lock().last_result = value;
                        }
                    }
                    Produced::Failed(err) => {
                        failure = self.report_runtime_error(&err, ctx, target.as_ref()).await.err();
                        report.outcome = Outcome::Failed(err);
                    }
                    Produced::Cancelled => {
                        failure = self.report_cancelled(target.as_ref()).await.err();
                        report.outcome = Outcome::Cancelled;
                    }
                }
            }

            scope = match execution.join().await {
                Ok((scope, _)) => scope,
                Err(err) => {
                    warn!(error = %err, iteration = report.timings.len(), "execution task lost");
                    return (None, Err(err.into()));
                }
            };
            if let Some(err) = failure {
                return (Some(scope), Err(err));
            }
            if report.outcome != Outcome::Completed {
                return (Some(scope), Ok(report));
            }
            report.timings.push(start.elapsed());
        }

        let summary = format!(
            "Executed {} times\nActual execution time: {}\n{}",
            report.iterations(),
            format_stddev(&report.timings),
            TIMEIT_NOTE
        );
        let sent = deliver_send(
            target.as_ref(),
            &RenderedPage::text(summary),
            &self.config.retry_policy(),
        )
        .await;
        (Some(scope), sent.map(|_| report).map_err(SessionError::from))
    }

    /* ---------- Shell ---------- */

    /// Run a shell command, streaming its output into a live view
    ///
    /// Closing or cancelling the view kills the command.
    pub async fn shell(
        &self,
        ctx: &InvocationContext,
        command: &str,
        target: Arc<dyn DisplayTarget>,
    ) -> Result<ShellReport, SessionError> {
        let command = codeblock::parse(command).content;
        let guard = self.tasks.submit("sh");
        info!(task = guard.index(), %command, "running shell command");
        react(target.as_ref(), StatusMarker::Running).await;

        let mut reader = match ShellReader::spawn(&command, self.config.shell_options()) {
            Ok(reader) => reader,
            Err(err) => {
                self.send_report(&err.to_string(), false, ctx, target.as_ref())
                    .await?;
                react(target.as_ref(), StatusMarker::Error).await;
                return Err(err.into());
            }
        };

        let page_size = self.config.pager.page_size.min(target.limits().max_message_len);
        let mut paginator =
            Paginator::new(page_size)?.with_fence(format!("```{}", reader.highlight()), "```")?;
        paginator.feed(&format!("{} {}\n", reader.prompt(), command));

        let options = LiveViewOptions {
            throttle: Some(self.config.throttle()),
            idle_timeout: Some(Duration::from_secs(self.config.shell.idle_timeout_secs)),
            owner: ctx.author_id.clone(),
            delete_on_close: false,
            retry: self.config.retry_policy(),
        };
        let view = LiveView::start(paginator, vec![target.clone()], options, guard.token()).await?;

        let mut timed_out = false;
        loop {
            tokio::select! {
                _ = view.cancelled() => break,
                line = reader.next_line() => match line {
                    Ok(Some(line)) => {
                        if view.feed(&format!("{}\n", line)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(ShellError::Timeout(after)) => {
                        warn!(?after, "shell command timed out");
                        timed_out = true;
                        view.cancel();
                        break;
                    }
                    Err(err) => {
                        warn!(error = %err, "shell output failed");
                        break;
                    }
                },
            }
        }

        let exit_code = reader.close().await?;
        let phase = if view.is_cancelled() {
            view.wait().await?
        } else {
            let code = exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            view.finish(Some(format!("[status] Return code {}", code)))
                .await?
        };

        let marker = match phase {
            LiveViewPhase::Finished => StatusMarker::Done,
            LiveViewPhase::Cancelled(CancelReason::IdleTimeout) => StatusMarker::Timeout,
            _ if timed_out => StatusMarker::Timeout,
            _ => StatusMarker::Error,
        };
        react(target.as_ref(), marker).await;
        info!(task = guard.index(), ?exit_code, ?phase, "shell command finished");

        Ok(ShellReport {
            exit_code,
            phase,
            timed_out,
        })
    }
}

/// Hand the scope back to the slot, minus the invocation's bindings
///
/// A lost scope is replaced by the copy taken when it was lent out.
fn return_scope(
    lease: Option<ScopeLease>,
    snapshot: Option<Scope>,
    scope: Option<Scope>,
    bindings: &BTreeMap<String, Val>,
) {
    let Some(lease) = lease else {
        return;
    };
    match scope {
        Some(mut scope) => {
            scope.clear_intersection(bindings);
            lease.restore(scope);
        }
        None => {
            warn!("restoring the retained scope from its copy");
            lease.restore(snapshot.unwrap_or_default());
        }
    }
}

fn redact(text: String, ctx: &InvocationContext) -> String {
    match ctx.bot_token.as_deref() {
        Some(token) if !token.is_empty() => text.replace(token, TOKEN_PLACEHOLDER),
        _ => text,
    }
}

async fn react(target: &dyn DisplayTarget, marker: StatusMarker) {
    if let Err(err) = target.react(marker).await {
        debug!(?marker, error = %err, "could not add status marker");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::testing::{Recorded, RecordingTarget};
    use maplit::btreemap;

    fn context() -> InvocationContext {
        InvocationContext {
            author: Val::Obj(btreemap! {
                "name".to_string() => Val::Str("alice".into()),
            }),
            channel: Val::Str("general".into()),
            author_id: Some(UserId("alice".into())),
            ..InvocationContext::default()
        }
    }

    fn setup(config: Config) -> (ReplSession, Arc<RecordingTarget>, Arc<dyn DisplayTarget>) {
        let target = Arc::new(RecordingTarget::new());
        let dyn_target: Arc<dyn DisplayTarget> = target.clone();
        (ReplSession::new(config), target, dyn_target)
    }

    fn contents(target: &RecordingTarget) -> Vec<String> {
        target.rendered().into_iter().map(|p| p.content).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_expression_result_is_sent() {
        let (session, target, dyn_target) = setup(Config::default());
        let report = session
            .evaluate(&context(), "3 + 4", dyn_target)
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(report.produced, 1);
        assert_eq!(contents(&target), vec!["7"]);
        assert_eq!(
            target.reactions(),
            vec![StatusMarker::Running, StatusMarker::Done]
        );
        assert_eq!(session.last_result(), Val::Num(7.0));
        assert!(session.tasks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_yield_is_sent_in_order() {
        let (session, target, dyn_target) = setup(Config::default());
        session
            .evaluate(&context(), "```\nfor x in range(3): yield x\n```", dyn_target)
            .await
            .unwrap();
        assert_eq!(contents(&target), vec!["0", "1", "2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strings_as_is_others_by_repr() {
        let (session, target, dyn_target) = setup(Config::default());
        session
            .evaluate(&context(), "yield 'plain'\n[1, 2]", dyn_target)
            .await
            .unwrap();
        assert_eq!(contents(&target), vec!["plain", "[1, 2]"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_is_redacted() {
        let (session, target, dyn_target) = setup(Config::default());
        let ctx = InvocationContext {
            bot_token: Some("s3cr3t".into()),
            ..context()
        };
        session
            .evaluate(&ctx, "'token: s3cr3t'", dyn_target)
            .await
            .unwrap();
        assert_eq!(contents(&target), vec!["token: [token omitted]"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_result_is_zero_width_space() {
        let (session, target, dyn_target) = setup(Config::default());
        session.evaluate(&context(), "' '", dyn_target).await.unwrap();
        assert_eq!(contents(&target), vec![EMPTY_PAGE]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_null_results_are_skipped() {
        let (session, target, dyn_target) = setup(Config::default());
        let report = session
            .evaluate(&context(), "yield null\nyield 1", dyn_target)
            .await
            .unwrap();
        assert_eq!(report.produced, 1);
        assert_eq!(contents(&target), vec!["1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_result_attached_as_file() {
        let (session, target, dyn_target) = setup(Config::default());
        let report = session
            .evaluate(&context(), "'a' * 3000", dyn_target)
            .await
            .unwrap();

        assert!(matches!(report.deliveries[..], [Delivery::File(_)]));
        match target.events().iter().find(|e| matches!(e, Recorded::File { .. })) {
            Some(Recorded::File { name, bytes, .. }) => {
                assert_eq!(name, OUTPUT_FILE_NAME);
                assert_eq!(bytes.len(), 3000);
            }
            other => panic!("Expected File, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_paginator_opens_live_view() {
        let config = Config {
            force_paginator: true,
            ..Config::default()
        };
        let (session, target, dyn_target) = setup(config);
        let report = session
            .evaluate(&context(), "'word ' * 500", dyn_target)
            .await
            .unwrap();

        let view = match report.deliveries.into_iter().next() {
            Some(Delivery::Paginated(view)) => view,
            other => panic!("Expected Paginated, got {:?}", other),
        };
        assert_eq!(view.pages().concat(), "word ".repeat(500));

        let first = target.rendered().into_iter().next().expect("Expected a page");
        assert!(first.content.starts_with("```\n"));
        assert!(first.content.chars().count() <= 1980);
        let nav = first.navigation.expect("Expected navigation");
        assert_eq!(nav.page, 0);
        assert_eq!(nav.page_count, 2);

        view.finish(None).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_compile_error_reported_in_channel() {
        let (session, target, dyn_target) = setup(Config::default());
        let report = session
            .evaluate(&context(), "x = (1 +", dyn_target)
            .await
            .unwrap();

        assert!(matches!(report.outcome, Outcome::CompileFailed(_)));
        match target.events().iter().find(|e| matches!(e, Recorded::Sent { .. })) {
            Some(Recorded::Sent { page, .. }) => assert!(page.content.contains("SyntaxError")),
            other => panic!("Expected Sent, got {:?}", other),
        }
        assert_eq!(target.reactions().last(), Some(&StatusMarker::SyntaxError));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runtime_error_sent_privately_by_default() {
        let (session, target, dyn_target) = setup(Config::default());
        let report = session
            .evaluate(&context(), "x = 1\ny = x / 0", dyn_target)
            .await
            .unwrap();

        match &report.outcome {
            Outcome::Failed(err) => assert_eq!(err.line, Some(2)),
            other => panic!("Expected Failed, got {:?}", other),
        }
        match target.events().iter().find(|e| matches!(e, Recorded::Private { .. })) {
            Some(Recorded::Private { page, .. }) => {
                assert!(page.content.contains("ZeroDivisionError: division by zero"));
                assert!(page.content.starts_with("```\n"));
            }
            other => panic!("Expected Private, got {:?}", other),
        }
        assert_eq!(target.reactions().last(), Some(&StatusMarker::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runtime_error_in_channel_when_configured() {
        let config = Config {
            no_dm_traceback: true,
            ..Config::default()
        };
        let (session, target, dyn_target) = setup(config);
        session
            .evaluate(&context(), "throw 'nope'", dyn_target)
            .await
            .unwrap();
        assert!(target
            .events()
            .iter()
            .any(|e| matches!(e, Recorded::Sent { page, .. } if page.content.contains("nope"))));
        assert!(!target
            .events()
            .iter()
            .any(|e| matches!(e, Recorded::Private { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefixed_bindings() {
        let (session, target, dyn_target) = setup(Config::default());
        session
            .evaluate(&context(), "_author.name + ' in ' + _channel", dyn_target)
            .await
            .unwrap();
        assert_eq!(contents(&target), vec!["alice in general"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unprefixed_bindings() {
        let config = Config {
            no_underscore: true,
            ..Config::default()
        };
        let (session, target, dyn_target) = setup(config);
        let names: Vec<String> = session.bindings(&context()).into_keys().collect();
        assert_eq!(
            names,
            vec!["_", "author", "bot", "channel", "guild", "message", "msg"]
        );
        session
            .evaluate(&context(), "author.name", dyn_target)
            .await
            .unwrap();
        assert_eq!(contents(&target), vec!["alice"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_result_bound_to_underscore() {
        let (session, target, dyn_target) = setup(Config::default());
        let ctx = context();
        session.evaluate(&ctx, "3 + 4", dyn_target.clone()).await.unwrap();
        session.evaluate(&ctx, "_ * 2", dyn_target).await.unwrap();
        assert_eq!(contents(&target), vec!["7", "14"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retained_scope_keeps_assignments_only() {
        let (session, target, dyn_target) = setup(Config::default());
        assert!(session.set_retain(true));
        assert!(!session.set_retain(true));
        let ctx = context();

        session.evaluate(&ctx, "x = 5", dyn_target.clone()).await.unwrap();
        session.evaluate(&ctx, "x + 1", dyn_target).await.unwrap();
        assert_eq!(contents(&target), vec!["6"]);

        let scope = session.retained_scope().unwrap().expect("Expected a scope");
        assert_eq!(scope.get("x"), Some(&Val::Num(5.0)));
        assert!(!scope.contains("_author"));
        assert!(!scope.contains("_"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebound_convenience_name_survives() {
        let (session, _target, dyn_target) = setup(Config::default());
        session.set_retain(true);
        session
            .evaluate(&context(), "_channel = 'mine'", dyn_target)
            .await
            .unwrap();
        let scope = session.retained_scope().unwrap().unwrap();
        assert_eq!(scope.get("_channel"), Some(&Val::Str("mine".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_retention_scope_is_fresh() {
        let (session, target, dyn_target) = setup(Config::default());
        let ctx = context();
        session.evaluate(&ctx, "x = 5", dyn_target.clone()).await.unwrap();
        let report = session.evaluate(&ctx, "x", dyn_target).await.unwrap();
        assert!(matches!(report.outcome, Outcome::Failed(_)));
        assert_eq!(session.retained_scope().unwrap(), None);
        assert!(target.rendered().iter().any(|p| p.content.contains("NameError")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runtime_error_keeps_retained_scope() {
        let (session, _target, dyn_target) = setup(Config::default());
        session.set_retain(true);
        let ctx = context();

        session.evaluate(&ctx, "keep = 42", dyn_target.clone()).await.unwrap();
        let report = session
            .evaluate(&ctx, "range(10, 0, -1e19)", dyn_target)
            .await
            .unwrap();
        match report.outcome {
            Outcome::Failed(err) => assert_eq!(err.code(), "ValueError"),
            other => panic!("Expected Failed, got {:?}", other),
        }

        let scope = session.retained_scope().unwrap().expect("Expected a scope");
        assert_eq!(scope.get("keep"), Some(&Val::Num(42.0)));
    }

    #[test]
    fn test_lost_scope_restored_from_copy() {
        let mut retained = Scope::new();
        retained.set("keep", Val::Num(42.0));
        let slot = ScopeSlot::new(retained);
        let bindings = btreemap! { "_author".to_string() => Val::Null };

        let mut lease = slot.checkout().unwrap();
        let snapshot = lease.take();
        return_scope(Some(lease), Some(snapshot), None, &bindings);

        let mut lease = slot.checkout().unwrap();
        let scope = lease.take();
        assert_eq!(scope.get("keep"), Some(&Val::Num(42.0)));
        assert!(!scope.contains("_author"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inspection_attached_as_file() {
        let (session, target, dyn_target) = setup(Config::default());
        let report = session
            .inspect(&context(), "[1, 'a']", dyn_target)
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Completed);
        assert!(matches!(report.deliveries[..], [Delivery::File(_)]));
        match target.events().iter().find(|e| matches!(e, Recorded::File { .. })) {
            Some(Recorded::File { name, bytes, .. }) => {
                assert_eq!(name, INSPECTION_FILE_NAME);
                let text = String::from_utf8_lossy(bytes);
                assert!(text.starts_with("=== [1, 'a'] ===\n\n"), "{}", text);
                assert!(text.contains("Type             :: list"), "{}", text);
                assert!(text.contains("Length           :: 2"), "{}", text);
            }
            other => panic!("Expected File, got {:?}", other),
        }
        assert_eq!(session.last_result(), Val::List(vec![Val::Num(1.0), Val::Str("a".into())]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inspection_covers_null_and_redacts_token() {
        let config = Config {
            force_paginator: true,
            ..Config::default()
        };
        let (session, target, dyn_target) = setup(config);
        let ctx = InvocationContext {
            bot_token: Some("s3cret".into()),
            ..context()
        };
        let report = session
            .inspect(&ctx, "yield null\nyield 's3cret'", dyn_target)
            .await
            .unwrap();

        assert_eq!(report.produced, 2);
        let pages = contents(&target);
        assert!(pages.iter().all(|p| p.starts_with("```prolog\n")), "{:?}", pages);
        assert!(pages[0].contains("Type             :: null"), "{:?}", pages);
        assert!(pages[1].contains(TOKEN_PLACEHOLDER), "{:?}", pages);
        assert!(!pages.iter().any(|p| p.contains("s3cret")));

        for delivery in report.deliveries {
            if let Delivery::Paginated(view) = delivery {
                view.finish(None).await.unwrap();
            }
        }
        assert!(session.tasks().is_empty());
    }

    fn timeit_config(iterations: usize, secs: u64) -> Config {
        let mut config = Config::default();
        config.execution.timeit_max_iterations = iterations;
        config.execution.timeit_max_secs = secs;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeit_stops_at_iteration_limit() {
        let (session, target, dyn_target) = setup(timeit_config(5, 30));
        session.set_retain(true);
        let ctx = context();
        session.evaluate(&ctx, "n = 0", dyn_target.clone()).await.unwrap();

        let report = session.timeit(&ctx, "n = n + 1\nn", dyn_target).await.unwrap();
        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(report.iterations(), 5);
        assert_eq!(session.last_result(), Val::Num(5.0));

        let summary = contents(&target).pop().expect("Expected a summary");
        assert!(summary.starts_with("Executed 5 times\nActual execution time: "), "{}", summary);
        assert!(summary.ends_with(TIMEIT_NOTE), "{}", summary);
        let scope = session.retained_scope().unwrap().unwrap();
        assert_eq!(scope.get("n"), Some(&Val::Num(5.0)));
        assert_eq!(target.reactions().last(), Some(&StatusMarker::Done));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeit_stops_at_time_limit() {
        let (session, target, dyn_target) = setup(timeit_config(10_000, 3));
        let report = session
            .timeit(&context(), "await sleep(1)", dyn_target)
            .await
            .unwrap();

        assert_eq!(report.iterations(), 3);
        for timing in &report.timings {
            assert!(*timing >= Duration::from_secs(1), "{:?}", timing);
        }
        let summary = contents(&target).pop().expect("Expected a summary");
        assert!(summary.contains("Executed 3 times"), "{}", summary);
        assert!(summary.contains("\u{00b1}"), "{}", summary);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeit_stops_at_first_error() {
        let (session, target, dyn_target) = setup(timeit_config(100, 30));
        session.set_retain(true);
        let ctx = context();
        session.evaluate(&ctx, "n = 0", dyn_target.clone()).await.unwrap();

        let report = session
            .timeit(&ctx, "n = n + 1\nif n == 3: throw 'stop'", dyn_target)
            .await
            .unwrap();
        assert!(matches!(report.outcome, Outcome::Failed(_)), "{:?}", report.outcome);
        assert_eq!(report.iterations(), 2);
        assert!(!contents(&target).iter().any(|p| p.starts_with("Executed")));
        assert_eq!(target.reactions().last(), Some(&StatusMarker::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeit_reports_compile_error() {
        let (session, _target, dyn_target) = setup(Config::default());
        let report = session
            .timeit(&context(), "1 +", dyn_target)
            .await
            .unwrap();
        assert!(matches!(report.outcome, Outcome::CompileFailed(_)));
        assert_eq!(report.iterations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_evaluation_of_retained_scope_is_busy() {
        let (session, _target, dyn_target) = setup(Config::default());
        session.set_retain(true);
        let ctx = context();

        let first = session.evaluate(&ctx, "await sleep(10)\n1", dyn_target.clone());
        tokio::pin!(first);
        tokio::select! {
            _ = &mut first => panic!("First evaluation should still be sleeping"),
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }

        let second = session.evaluate(&ctx, "2", dyn_target).await;
        assert!(matches!(second, Err(SessionError::ScopeBusy(_))));

        let report = first.await.unwrap();
        assert_eq!(report.outcome, Outcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_through_task_registry() {
        let (session, target, dyn_target) = setup(Config::default());
        let ctx = context();

        let running = session.evaluate(&ctx, "while true { await sleep(1) }", dyn_target);
        tokio::pin!(running);
        tokio::select! {
            _ = &mut running => panic!("Loop should not finish"),
            _ = tokio::time::sleep(Duration::from_millis(2500)) => {}
        }

        let listed = session.tasks().list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].command, "py");
        assert!(session.tasks().cancel(listed[0].index).is_some());

        let report = running.await.unwrap();
        assert_eq!(report.outcome, Outcome::Cancelled);
        assert_eq!(contents(&target).last().map(String::as_str), Some(CANCELLED_STATUS));
        assert_eq!(target.reactions().last(), Some(&StatusMarker::Timeout));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_streams_into_live_view() {
        let mut config = Config::default();
        config.pager.throttle_ms = 10;
        let (session, target, dyn_target) = setup(config);

        let report = session
            .shell(&context(), "echo hello", dyn_target)
            .await
            .unwrap();

        assert_eq!(report.exit_code, Some(0));
        assert_eq!(report.phase, LiveViewPhase::Finished);
        assert!(!report.timed_out);

        let last = target.rendered().pop().expect("Expected a render");
        assert!(last.content.contains("$ echo hello\nhello\n"), "{}", last.content);
        assert_eq!(last.status.as_deref(), Some("[status] Return code 0"));
        assert_eq!(target.reactions().last(), Some(&StatusMarker::Done));
    }
}
