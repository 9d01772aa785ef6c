//! Live view: a paginator kept in sync with one or more messages
//!
//! The first render is sent when the view starts. After that a render loop
//! task owns the messages: it wakes on any change, waits out the throttle
//! interval so bursts of chunks collapse into one edit, then edits every
//! target with the newest state. The view ends either by `finish` (the
//! producer completed) or by cancellation, and in both cases performs one
//! final render carrying a status line.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::display::{
    deliver_edit, deliver_send, DisplayTarget, MessageId, ResourceError, RetryPolicy, UserId,
};
use crate::pager::{NavAction, Paginator, RenderedPage};

pub const CANCELLED_STATUS: &str = "[cancelled]";

/* ===================== Types ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// `cancel()` or the linked token
    External,
    IdleTimeout,
    /// The close control
    Closed,
    /// Every message of the view was deleted
    MessageGone,
}

impl CancelReason {
    pub fn status_line(&self) -> String {
        match self {
            CancelReason::IdleTimeout => format!("{} idle timeout", CANCELLED_STATUS),
            _ => CANCELLED_STATUS.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveViewPhase {
    Live,
    Finished,
    Cancelled(CancelReason),
}

#[derive(Debug, Clone)]
pub struct LiveViewOptions {
    /// Minimum time between renders; defaults to the slowest target's edit interval
    pub throttle: Option<Duration>,
    /// Cancel after this long without a chunk
    pub idle_timeout: Option<Duration>,
    /// Only this user may navigate or close
    pub owner: Option<UserId>,
    /// Delete the messages instead of rendering a final page on close
    pub delete_on_close: bool,
    pub retry: RetryPolicy,
}

impl Default for LiveViewOptions {
    fn default() -> Self {
        Self {
            throttle: None,
            idle_timeout: None,
            owner: None,
            delete_on_close: false,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("the live view is no longer accepting output")]
pub struct ViewClosed;

#[derive(Debug, thiserror::Error)]
pub enum LiveViewError {
    #[error("pages of {page_size} characters exceed the target limit of {max_message_len}")]
    PageTooLarge {
        page_size: usize,
        max_message_len: usize,
    },
    #[error("live view needs at least one display target")]
    NoTargets,
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/* ===================== Shared State ===================== */

#[derive(Debug)]
struct ViewState {
    paginator: Paginator,
    dirty: bool,
    last_activity: Instant,
    /// Set by `finish`, with its status line
    finishing: Option<Option<String>>,
    cancel_reason: Option<CancelReason>,
}

struct Shared {
    state: Mutex<ViewState>,
    changed: Notify,
    token: CancellationToken,
    phase: watch::Sender<LiveViewPhase>,
    owner: Option<UserId>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// First reason wins
    fn cancel(&self, reason: CancelReason) {
        {
            let mut state = self.lock();
            if state.finishing.is_none() && state.cancel_reason.is_none() {
                state.cancel_reason = Some(reason);
            }
        }
        self.token.cancel();
    }

    fn may_control(&self, user: Option<&UserId>) -> bool {
        match &self.owner {
            Some(owner) => user == Some(owner),
            None => true,
        }
    }
}

struct Target {
    display: Arc<dyn DisplayTarget>,
    message: Option<MessageId>,
}

/* ===================== LiveView ===================== */

pub struct LiveView;

impl LiveView {
    /// Send the first render to every target and start the render loop
    ///
    /// Cancelling the view cancels `token`, and cancelling `token` cancels
    /// the view.
    pub async fn start(
        paginator: Paginator,
        targets: Vec<Arc<dyn DisplayTarget>>,
        options: LiveViewOptions,
        token: CancellationToken,
    ) -> Result<LiveViewHandle, LiveViewError> {
        if targets.is_empty() {
            return Err(LiveViewError::NoTargets);
        }
        for target in &targets {
            let limits = target.limits();
            if paginator.max_size() > limits.max_message_len {
                return Err(LiveViewError::PageTooLarge {
                    page_size: paginator.max_size(),
                    max_message_len: limits.max_message_len,
                });
            }
        }
        let throttle = options.throttle.unwrap_or_else(|| {
            targets
                .iter()
                .map(|t| t.limits().min_edit_interval)
                .max()
                .unwrap_or_default()
        });

        let first = paginator.render_current();
        let mut bound = Vec::with_capacity(targets.len());
        for display in targets {
            let id = deliver_send(display.as_ref(), &first, &options.retry).await?;
            bound.push(Target {
                display,
                message: Some(id),
            });
        }

        let (phase, _) = watch::channel(LiveViewPhase::Live);
        let shared = Arc::new(Shared {
            state: Mutex::new(ViewState {
                paginator,
                dirty: false,
                last_activity: Instant::now(),
                finishing: None,
                cancel_reason: None,
            }),
            changed: Notify::new(),
            token,
            phase,
            owner: options.owner.clone(),
        });

        debug!(targets = bound.len(), ?throttle, "live view started");
        let task = tokio::spawn(render_loop(Arc::clone(&shared), bound, options, throttle));

        Ok(LiveViewHandle {
            shared,
            task: Some(task),
        })
    }
}

/* ===================== Handle ===================== */

pub struct LiveViewHandle {
    shared: Arc<Shared>,
    task: Option<JoinHandle<Result<LiveViewPhase, ResourceError>>>,
}

impl LiveViewHandle {
    /// Append output; refused once the view is cancelled or finishing
    pub fn feed(&self, chunk: &str) -> Result<(), ViewClosed> {
        if self.shared.token.is_cancelled() {
            return Err(ViewClosed);
        }
        {
            let mut state = self.shared.lock();
            if state.finishing.is_some() || state.cancel_reason.is_some() {
                return Err(ViewClosed);
            }
            state.paginator.feed(chunk);
            state.dirty = true;
            state.last_activity = Instant::now();
        }
        self.shared.changed.notify_one();
        Ok(())
    }

    pub fn cancel(&self) {
        self.shared.cancel(CancelReason::External);
    }

    /// The close control; ignored for anyone but the owner
    pub fn close(&self, user: Option<&UserId>) -> bool {
        if !self.shared.may_control(user) {
            return false;
        }
        self.shared.cancel(CancelReason::Closed);
        true
    }

    /// Move the displayed page; ignored for anyone but the owner
    ///
    /// Any owner navigation counts as activity and postpones the idle timeout.
    pub fn navigate(&self, user: Option<&UserId>, action: NavAction) -> bool {
        if !self.shared.may_control(user) {
            return false;
        }
        let changed = {
            let mut state = self.shared.lock();
            let changed = state.paginator.navigate(action);
            state.dirty |= changed;
            state.last_activity = Instant::now();
            changed
        };
        // Wakes the render loop, which re-arms the idle deadline
        self.shared.changed.notify_one();
        changed
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    /// Resolves once the view is cancelled for any reason
    pub async fn cancelled(&self) {
        self.shared.token.cancelled().await
    }

    pub fn token(&self) -> CancellationToken {
        self.shared.token.clone()
    }

    pub fn phase(&self) -> LiveViewPhase {
        *self.shared.phase.borrow()
    }

    /// Page contents so far
    pub fn pages(&self) -> Vec<String> {
        self.shared
            .lock()
            .paginator
            .pages()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Producer completed: render the final state with `status`
    ///
    /// A view that was already cancelled stays cancelled.
    pub async fn finish(mut self, status: Option<String>) -> Result<LiveViewPhase, ResourceError> {
        {
            let mut state = self.shared.lock();
            if state.cancel_reason.is_none() && state.finishing.is_none() {
                state.finishing = Some(status);
            }
        }
        self.shared.changed.notify_one();
        self.join().await
    }

    /// Wait for the view to end by cancellation
    pub async fn wait(mut self) -> Result<LiveViewPhase, ResourceError> {
        self.join().await
    }

    async fn join(&mut self) -> Result<LiveViewPhase, ResourceError> {
        let Some(task) = self.task.take() else {
            return Ok(self.phase());
        };
        task.await.unwrap_or_else(|err| {
            Err(ResourceError::Fatal {
                operation: "render loop",
                message: err.to_string(),
            })
        })
    }
}

impl std::fmt::Debug for LiveViewHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveViewHandle")
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl Drop for LiveViewHandle {
    fn drop(&mut self) {
        // Let the loop render what it has and stop
        if self.task.is_some() {
            {
                let mut state = self.shared.lock();
                if state.cancel_reason.is_none() && state.finishing.is_none() {
                    state.finishing = Some(None);
                }
            }
            self.shared.changed.notify_one();
        }
    }
}

/* ===================== Render Loop ===================== */

async fn idle_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Edit every bound message; false once none are left
async fn render_to(
    targets: &mut [Target],
    page: &RenderedPage,
    retry: &RetryPolicy,
) -> Result<bool, ResourceError> {
    for target in targets.iter_mut() {
        let Some(id) = target.message.clone() else {
            continue;
        };
        match deliver_edit(target.display.as_ref(), &id, page, retry).await {
            Ok(()) => {}
            Err(ResourceError::Gone) => {
                debug!(%id, "live view message disappeared");
                target.message = None;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(targets.iter().any(|t| t.message.is_some()))
}

async fn render_loop(
    shared: Arc<Shared>,
    mut targets: Vec<Target>,
    options: LiveViewOptions,
    throttle: Duration,
) -> Result<LiveViewPhase, ResourceError> {
    let mut last_render = Instant::now();

    loop {
        let deadline = options
            .idle_timeout
            .map(|timeout| shared.lock().last_activity + timeout);

        tokio::select! {
            _ = shared.changed.notified() => {}
            _ = shared.token.cancelled() => break,
            _ = idle_deadline(deadline) => {
                let idle = options
                    .idle_timeout
                    .is_some_and(|timeout| shared.lock().last_activity + timeout <= Instant::now());
                if !idle {
                    continue;
                }
                warn!(timeout = ?options.idle_timeout, "live view idle, cancelling");
                shared.cancel(CancelReason::IdleTimeout);
                break;
            }
        }

        // Coalesce whatever else arrives within one interval
        tokio::select! {
            _ = sleep(throttle) => {}
            _ = shared.token.cancelled() => break,
        }

        let page = {
            let mut state = shared.lock();
            if state.finishing.is_some() {
                break;
            }
            if !state.dirty {
                continue;
            }
            state.dirty = false;
            state.paginator.render_current()
        };

        match render_to(&mut targets, &page, &options.retry).await {
            Ok(true) => last_render = Instant::now(),
            Ok(false) => {
                shared.cancel(CancelReason::MessageGone);
                break;
            }
            Err(err) => {
                warn!(error = %err, "live view render failed");
                shared.cancel(CancelReason::External);
                let _ = shared.phase.send_replace(LiveViewPhase::Cancelled(CancelReason::External));
                return Err(err);
            }
        }
    }

    let (phase, status, page) = {
        let state = shared.lock();
        let phase = match (state.cancel_reason, shared.token.is_cancelled()) {
            (Some(reason), _) => LiveViewPhase::Cancelled(reason),
            (None, true) if state.finishing.is_none() => {
                LiveViewPhase::Cancelled(CancelReason::External)
            }
            _ => LiveViewPhase::Finished,
        };
        let status = match phase {
            LiveViewPhase::Cancelled(reason) => Some(reason.status_line()),
            _ => state.finishing.clone().flatten(),
        };
        (phase, status, state.paginator.render_current())
    };

    if phase == LiveViewPhase::Cancelled(CancelReason::Closed) && options.delete_on_close {
        for target in &targets {
            if let Some(id) = &target.message {
                if let Err(err) = target.display.delete(id).await {
                    debug!(%id, error = %err, "could not delete live view message");
                }
            }
        }
    } else {
        sleep_until(last_render + throttle).await;
        let page = match status {
            Some(status) => page.with_status(status),
            None => page,
        };
        if let Err(err) = render_to(&mut targets, &page, &options.retry).await {
            let _ = shared.phase.send_replace(phase);
            return Err(err);
        }
    }

    info!(?phase, "live view ended");
    let _ = shared.phase.send_replace(phase);
    Ok(phase)
}
