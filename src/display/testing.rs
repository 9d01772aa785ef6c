//! Recording display target for tests

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::time::Instant;

use super::{DisplayError, DisplayTarget, MessageId, PlatformLimits, StatusMarker};
use crate::pager::RenderedPage;

/// Target operation a failure can be scripted for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Send,
    Edit,
    File,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Sent { id: MessageId, page: RenderedPage },
    Edited { id: MessageId, page: RenderedPage },
    File { id: MessageId, name: String, bytes: Vec<u8> },
    Deleted { id: MessageId },
    Reacted(StatusMarker),
    Private { id: MessageId, page: RenderedPage },
}

#[derive(Debug, Default)]
struct Inner {
    events: Vec<(Instant, Recorded)>,
    /// Latest content of every live message
    messages: BTreeMap<MessageId, String>,
    failures: VecDeque<(Op, DisplayError)>,
    next_id: usize,
}

impl Inner {
    fn take_failure(&mut self, op: Op) -> Option<DisplayError> {
        let pos = self.failures.iter().position(|(o, _)| *o == op)?;
        self.failures.remove(pos).map(|(_, err)| err)
    }

    fn new_id(&mut self) -> MessageId {
        let id = MessageId(format!("m{}", self.next_id));
        self.next_id += 1;
        id
    }

    fn record(&mut self, event: Recorded) {
        self.events.push((Instant::now(), event));
    }
}

#[derive(Debug, Default)]
pub struct RecordingTarget {
    limits: PlatformLimits,
    inner: Mutex<Inner>,
}

impl RecordingTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: PlatformLimits) -> Self {
        Self {
            limits,
            inner: Mutex::default(),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next call of `op` fail with `err`
    pub fn fail_next(&self, op: Op, err: DisplayError) {
        self.inner().failures.push_back((op, err));
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.inner().events.iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn timed_events(&self) -> Vec<(Instant, Recorded)> {
        self.inner().events.clone()
    }

    /// Current `(id, content)` of every message not deleted
    pub fn contents(&self) -> Vec<(MessageId, String)> {
        self.inner()
            .messages
            .iter()
            .map(|(id, content)| (id.clone(), content.clone()))
            .collect()
    }

    /// Every page shown, sends and edits alike, in order
    pub fn rendered(&self) -> Vec<RenderedPage> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Recorded::Sent { page, .. }
                | Recorded::Edited { page, .. }
                | Recorded::Private { page, .. } => Some(page),
                _ => None,
            })
            .collect()
    }

    pub fn edit_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Recorded::Edited { .. }))
            .count()
    }

    pub fn reactions(&self) -> Vec<StatusMarker> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Recorded::Reacted(marker) => Some(marker),
                _ => None,
            })
            .collect()
    }

    /// Simulate someone deleting a message
    pub fn remove_message(&self, id: &MessageId) {
        self.inner().messages.remove(id);
    }
}

#[async_trait]
impl DisplayTarget for RecordingTarget {
    fn limits(&self) -> PlatformLimits {
        self.limits
    }

    async fn send(&self, page: &RenderedPage) -> Result<MessageId, DisplayError> {
        let mut inner = self.inner();
        if let Some(err) = inner.take_failure(Op::Send) {
            return Err(err);
        }
        let len = page.content.chars().count();
        if len > self.limits.max_message_len {
            return Err(DisplayError::TooLarge {
                len,
                max: self.limits.max_message_len,
            });
        }
        let id = inner.new_id();
        inner.messages.insert(id.clone(), page.content.clone());
        inner.record(Recorded::Sent {
            id: id.clone(),
            page: page.clone(),
        });
        Ok(id)
    }

    async fn edit(&self, id: &MessageId, page: &RenderedPage) -> Result<(), DisplayError> {
        let mut inner = self.inner();
        if let Some(err) = inner.take_failure(Op::Edit) {
            return Err(err);
        }
        let Some(content) = inner.messages.get_mut(id) else {
            return Err(DisplayError::NotFound);
        };
        *content = page.content.clone();
        inner.record(Recorded::Edited {
            id: id.clone(),
            page: page.clone(),
        });
        Ok(())
    }

    async fn send_file(&self, name: &str, bytes: &[u8]) -> Result<MessageId, DisplayError> {
        let mut inner = self.inner();
        if let Some(err) = inner.take_failure(Op::File) {
            return Err(err);
        }
        let id = inner.new_id();
        inner.record(Recorded::File {
            id: id.clone(),
            name: name.to_string(),
            bytes: bytes.to_vec(),
        });
        Ok(id)
    }

    async fn delete(&self, id: &MessageId) -> Result<(), DisplayError> {
        let mut inner = self.inner();
        if let Some(err) = inner.take_failure(Op::Delete) {
            return Err(err);
        }
        if inner.messages.remove(id).is_none() {
            return Err(DisplayError::NotFound);
        }
        inner.record(Recorded::Deleted { id: id.clone() });
        Ok(())
    }

    async fn react(&self, marker: StatusMarker) -> Result<(), DisplayError> {
        self.inner().record(Recorded::Reacted(marker));
        Ok(())
    }

    async fn send_private(&self, page: &RenderedPage) -> Result<MessageId, DisplayError> {
        let mut inner = self.inner();
        let id = inner.new_id();
        inner.record(Recorded::Private {
            id: id.clone(),
            page: page.clone(),
        });
        Ok(id)
    }
}
