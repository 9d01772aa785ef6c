//! Cooperative execution driver
//!
//! Runs a compiled snippet as a tokio task. The VM is stepped in bounded
//! slices; between slices, at every produced value and at every `await`, the
//! worker gives the runtime a chance to run other tasks and checks its
//! cancellation token. Produced values cross a channel of capacity one, so
//! the worker never runs more than one value ahead of its consumer.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::compiler::CompiledUnit;
use crate::executor::errors::{ErrorInfo, RuntimeError, TraceEntry, USER_ERROR};
use crate::executor::{run_for, Awaitable, Control, Step, Val, VM};
use crate::scope::Scope;

pub const DEFAULT_STEP_BUDGET: usize = 4096;
pub const TRACEBACK_LIMIT: usize = 8;

/* ===================== Types ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// VM steps between forced yields to the runtime
    pub step_budget: usize,
    /// Most recent traceback entries kept on a runtime error
    pub traceback_limit: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            step_budget: DEFAULT_STEP_BUDGET,
            traceback_limit: TRACEBACK_LIMIT,
        }
    }
}

/// One item of an execution's output
#[derive(Debug, Clone, PartialEq)]
pub enum Produced {
    Value(Val),
    Failed(RuntimeError),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Pending,
    Running,
    /// Waiting on an awaitable
    Suspended,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("execution task panicked: {0}")]
    Panicked(String),
    #[error("execution task was aborted")]
    Aborted,
    #[error("execution was already joined")]
    AlreadyJoined,
}

/* ===================== Execution ===================== */

/// Handle to a running snippet
pub struct Execution {
    rx: mpsc::Receiver<Produced>,
    state: watch::Receiver<ExecutionState>,
    token: CancellationToken,
    handle: Option<JoinHandle<Scope>>,
    finished: bool,
}

impl Execution {
    /// Start executing `unit` against `scope` on the current runtime
    pub fn spawn(unit: CompiledUnit, scope: Scope, options: ExecutionOptions) -> Self {
        Self::spawn_with_token(unit, scope, options, CancellationToken::new())
    }

    /// Like [`Execution::spawn`], cancelled when `token` is
    pub fn spawn_with_token(
        unit: CompiledUnit,
        scope: Scope,
        options: ExecutionOptions,
        token: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let (state_tx, state_rx) = watch::channel(ExecutionState::Pending);
        let worker = Worker {
            vm: VM::new(unit.program(), scope),
            unit,
            tx,
            state: state_tx,
            token: token.clone(),
            options,
        };
        let handle = tokio::spawn(worker.run());

        Self {
            rx,
            state: state_rx,
            token,
            handle: Some(handle),
            finished: false,
        }
    }

    /// Next produced item, or `None` once the terminal item was delivered
    ///
    /// `Failed` and `Cancelled` are always the last item.
    pub async fn next(&mut self) -> Option<Produced> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(item) => {
                if !matches!(item, Produced::Value(_)) {
                    self.finished = true;
                }
                Some(item)
            }
            None => {
                self.finished = true;
                // The worker publishes its final state before closing the channel
                match *self.state.borrow() {
                    ExecutionState::Cancelled => Some(Produced::Cancelled),
                    _ => None,
                }
            }
        }
    }

    /// Request cancellation; observed at the worker's next suspension point
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn state(&self) -> ExecutionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ExecutionState> {
        self.state.clone()
    }

    /// Wait for the worker to stop and take back the scope
    ///
    /// Items not yet consumed are discarded.
    pub async fn join(mut self) -> Result<(Scope, ExecutionState), ExecutionError> {
        let handle = self.handle.take().ok_or(ExecutionError::AlreadyJoined)?;
        while self.rx.recv().await.is_some() {}

        let scope = handle.await.map_err(|err| {
            if err.is_panic() {
                ExecutionError::Panicked(err.to_string())
            } else {
                ExecutionError::Aborted
            }
        })?;
        let state = *self.state.borrow();
        Ok((scope, state))
    }
}

impl Drop for Execution {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.token.cancel();
        }
    }
}

/* ===================== Worker ===================== */

struct Worker {
    vm: VM,
    unit: CompiledUnit,
    tx: mpsc::Sender<Produced>,
    state: watch::Sender<ExecutionState>,
    token: CancellationToken,
    options: ExecutionOptions,
}

impl Worker {
    async fn run(mut self) -> Scope {
        self.state.send_replace(ExecutionState::Running);
        debug!(expression = self.unit.is_expression(), "execution started");

        let outcome = self.drive().await;

        debug!(?outcome, "execution finished");
        self.state.send_replace(outcome);
        let Worker { vm, tx, .. } = self;
        drop(tx);
        vm.into_scope()
    }

    async fn drive(&mut self) -> ExecutionState {
        let budget = self.options.step_budget.max(1);
        loop {
            if self.token.is_cancelled() {
                return ExecutionState::Cancelled;
            }

            if run_for(&mut self.vm, budget) == Step::Continue {
                tokio::task::yield_now().await;
                continue;
            }

            match std::mem::replace(&mut self.vm.control, Control::None) {
                Control::Yield(v) => {
                    if !self.deliver(Produced::Value(v)).await {
                        return ExecutionState::Cancelled;
                    }
                }
                Control::Suspend(awaitable) => {
                    self.state.send_replace(ExecutionState::Suspended);
                    if !self.wait_for(awaitable).await {
                        return ExecutionState::Cancelled;
                    }
                    self.state.send_replace(ExecutionState::Running);
                    self.vm.resume(Some(Val::Null));
                }
                Control::Return(value) => {
                    if let Some(v) = value {
                        if !self.deliver(Produced::Value(v)).await {
                            return ExecutionState::Cancelled;
                        }
                    }
                    return ExecutionState::Completed;
                }
                Control::Throw(error) => {
                    let err = self.runtime_error(error);
                    debug!(code = err.code(), line = ?err.line, "snippet raised");
                    if !self.deliver(Produced::Failed(err)).await {
                        return ExecutionState::Cancelled;
                    }
                    return ExecutionState::Failed;
                }
                Control::None | Control::Break | Control::Continue => {
                    return ExecutionState::Completed;
                }
            }
        }
    }

    /// Send one item; false if cancelled first or the consumer is gone
    async fn deliver(&self, item: Produced) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            sent = self.tx.send(item) => {
                if sent.is_err() {
                    warn!("execution output dropped by its consumer");
                }
                sent.is_ok()
            }
        }
    }

    /// Resolve an awaitable; false if cancelled first
    async fn wait_for(&self, awaitable: Awaitable) -> bool {
        match awaitable {
            Awaitable::Sleep { millis } => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => false,
                    _ = tokio::time::sleep(Duration::from_millis(millis)) => true,
                }
            }
        }
    }

    fn runtime_error(&self, error: Val) -> RuntimeError {
        let error = match error {
            Val::Error(info) => info,
            other => ErrorInfo::new(USER_ERROR, other.to_string()),
        };

        let lines = &self.vm.fault_lines;
        let keep = lines.len().saturating_sub(self.options.traceback_limit);
        let traceback: Vec<TraceEntry> = lines[keep..]
            .iter()
            .map(|&line| TraceEntry {
                line,
                text: self.unit.source_line(line),
            })
            .collect();

        let line = traceback.last().map(|entry| entry.line);
        RuntimeError {
            error,
            line,
            source_line: line.and_then(|l| self.unit.source_line(l)),
            traceback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use tokio::time::Instant;

    fn spawn(source: &str, scope: Scope) -> Execution {
        let unit = compile(source, &scope).expect("Compile failed");
        Execution::spawn(unit, scope, ExecutionOptions::default())
    }

    async fn collect(exec: &mut Execution) -> Vec<Produced> {
        let mut items = Vec::new();
        while let Some(item) = exec.next().await {
            items.push(item);
        }
        items
    }

    #[tokio::test(start_paused = true)]
    async fn test_expression_produces_one_value() {
        let mut exec = spawn("3 + 4", Scope::new());
        assert_eq!(collect(&mut exec).await, vec![Produced::Value(Val::Num(7.0))]);
        assert_eq!(exec.state(), ExecutionState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_yields_in_order() {
        let mut exec = spawn("for x in range(3): yield x", Scope::new());
        assert_eq!(
            collect(&mut exec).await,
            vec![
                Produced::Value(Val::Num(0.0)),
                Produced::Value(Val::Num(1.0)),
                Produced::Value(Val::Num(2.0)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_sleep_waits() {
        let start = Instant::now();
        let mut exec = spawn("await sleep(0.5)", Scope::new());
        assert_eq!(exec.next().await, Some(Produced::Value(Val::Null)));
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unawaited_sleep_is_forwarded() {
        let start = Instant::now();
        let mut exec = spawn("sleep(1)", Scope::new());
        assert_eq!(
            exec.next().await,
            Some(Produced::Value(Val::Promise(Awaitable::Sleep { millis: 1000 })))
        );
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runtime_error_carries_source_line() {
        let mut exec = spawn("x = 1\ny = x / 0", Scope::new());
        match exec.next().await {
            Some(Produced::Failed(err)) => {
                assert_eq!(err.code(), "ZeroDivisionError");
                assert_eq!(err.line, Some(2));
                assert_eq!(err.source_line.as_deref(), Some("y = x / 0"));
                assert_eq!(err.traceback.len(), 1);
            }
            other => panic!("Expected Failed, got {:?}", other),
        }
        assert_eq!(exec.next().await, None);
        assert_eq!(exec.state(), ExecutionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_thrown_value_becomes_error() {
        let mut exec = spawn("throw 'boom'", Scope::new());
        match exec.next().await {
            Some(Produced::Failed(err)) => {
                assert_eq!(err.code(), USER_ERROR);
                assert_eq!(err.message(), "boom");
            }
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_traceback_is_truncated() {
        let source = "for a in [1] {\n for b in [1] {\n  for c in [1] {\n   1 / 0\n  }\n }\n}";
        let unit = compile(source, &Scope::new()).expect("Compile failed");
        let options = ExecutionOptions {
            traceback_limit: 2,
            ..ExecutionOptions::default()
        };
        let mut exec = Execution::spawn(unit, Scope::new(), options);
        match exec.next().await {
            Some(Produced::Failed(err)) => {
                let lines: Vec<usize> = err.traceback.iter().map(|e| e.line).collect();
                assert_eq!(lines, vec![3, 4]);
                assert_eq!(err.traceback[1].text.as_deref(), Some("1 / 0"));
            }
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_sleep() {
        let mut exec = spawn("yield 1\nawait sleep(100)\nyield 2", Scope::new());
        assert_eq!(exec.next().await, Some(Produced::Value(Val::Num(1.0))));

        exec.cancel();
        assert_eq!(exec.next().await, Some(Produced::Cancelled));
        assert_eq!(exec.next().await, None);
        assert_eq!(exec.state(), ExecutionState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_busy_loop() {
        let mut exec = spawn("n = 0\nwhile true { n = n + 1 }", Scope::new());
        tokio::task::yield_now().await;
        exec.cancel();
        assert_eq!(exec.next().await, Some(Produced::Cancelled));

        let (scope, state) = exec.join().await.expect("Join failed");
        assert_eq!(state, ExecutionState::Cancelled);
        assert!(matches!(scope.get("n"), Some(Val::Num(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_token_cancels() {
        let token = CancellationToken::new();
        let unit = compile("await sleep(60)", &Scope::new()).expect("Compile failed");
        let mut exec =
            Execution::spawn_with_token(unit, Scope::new(), ExecutionOptions::default(), token.clone());
        token.cancel();
        assert_eq!(exec.next().await, Some(Produced::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_returns_scope() {
        let mut scope = Scope::new();
        scope.set("keep", Val::Bool(true));
        let mut exec = spawn("a = 1\nyield a", scope);
        assert_eq!(exec.next().await, Some(Produced::Value(Val::Num(1.0))));

        let (scope, state) = exec.join().await.expect("Join failed");
        assert_eq!(state, ExecutionState::Completed);
        assert_eq!(scope.get("a"), Some(&Val::Num(1.0)));
        assert_eq!(scope.get("keep"), Some(&Val::Bool(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_after_failure_keeps_assignments() {
        let exec = spawn("a = 1\n1 / 0", Scope::new());
        let (scope, state) = exec.join().await.expect("Join failed");
        assert_eq!(state, ExecutionState::Failed);
        assert_eq!(scope.get("a"), Some(&Val::Num(1.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_waits_for_consumer() {
        let mut exec = spawn("for i in range(5): yield i", Scope::new());
        // Let the worker fill the channel
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(exec.state(), ExecutionState::Running);

        assert_eq!(exec.next().await, Some(Produced::Value(Val::Num(0.0))));
        let rest = collect(&mut exec).await;
        assert_eq!(rest.len(), 4);
        assert_eq!(exec.state(), ExecutionState::Completed);
    }
}
