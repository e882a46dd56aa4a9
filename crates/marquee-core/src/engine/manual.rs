//! Hand-driven engine for tests and embedding experiments
//!
//! Records every command the core issues and lets the caller post
//! notifications to any pipeline it created, in whatever order a scenario
//! needs.

use super::{Engine, EngineState, NotificationSink, PipelineHandle};
use crate::error::EngineError;
use crate::media_info::StreamType;
use serde_json::Value;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One command received by a [`ManualEngine`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Create { handle: PipelineHandle, uri: String },
    SetState { handle: PipelineHandle, state: EngineState },
    Seek { handle: PipelineHandle, position: Duration },
    SelectStream { handle: PipelineHandle, stream_type: StreamType, index: u32 },
    Release { handle: PipelineHandle },
}

#[derive(Default)]
struct ManualInner {
    next_handle: u64,
    pipelines: Vec<(PipelineHandle, NotificationSink)>,
    calls: Vec<EngineCall>,
    fail_next_create: Option<EngineError>,
    fail_next_set_state: Option<EngineError>,
}

#[derive(Default)]
pub struct ManualEngine {
    inner: Mutex<ManualInner>,
}

impl ManualEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManualInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commands received so far
    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    /// Commands received so far, clearing the log
    pub fn take_calls(&self) -> Vec<EngineCall> {
        std::mem::take(&mut self.lock().calls)
    }

    /// Most recently created pipeline
    pub fn current_pipeline(&self) -> Option<PipelineHandle> {
        self.lock().pipelines.last().map(|(handle, _)| *handle)
    }

    pub fn pipeline_count(&self) -> usize {
        self.lock().pipelines.len()
    }

    /// Make the next `create_pipeline` fail
    pub fn fail_next_create(&self, err: EngineError) {
        self.lock().fail_next_create = Some(err);
    }

    /// Make the next `set_state` fail
    pub fn fail_next_set_state(&self, err: EngineError) {
        self.lock().fail_next_set_state = Some(err);
    }

    /// Post a notification on the most recent pipeline. Returns false if none exists.
    pub fn notify(&self, kind: &str, payload: Value) -> bool {
        let sink = self.lock().pipelines.last().map(|(_, sink)| sink.clone());
        match sink {
            Some(sink) => {
                sink.post(kind, payload);
                true
            }
            None => false,
        }
    }

    /// Post a notification on a specific (possibly superseded) pipeline
    pub fn notify_pipeline(&self, handle: PipelineHandle, kind: &str, payload: Value) -> bool {
        let sink = self
            .lock()
            .pipelines
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, sink)| sink.clone());
        match sink {
            Some(sink) => {
                sink.post(kind, payload);
                true
            }
            None => false,
        }
    }
}

impl Engine for ManualEngine {
    fn create_pipeline(
        &self,
        uri: &str,
        sink: NotificationSink,
    ) -> Result<PipelineHandle, EngineError> {
        let mut inner = self.lock();
        if let Some(err) = inner.fail_next_create.take() {
            return Err(err);
        }
        inner.next_handle += 1;
        let handle = PipelineHandle(inner.next_handle);
        inner.pipelines.push((handle, sink));
        inner.calls.push(EngineCall::Create {
            handle,
            uri: uri.to_string(),
        });
        Ok(handle)
    }

    fn set_state(&self, handle: PipelineHandle, state: EngineState) -> Result<(), EngineError> {
        let mut inner = self.lock();
        if let Some(err) = inner.fail_next_set_state.take() {
            return Err(err);
        }
        inner.calls.push(EngineCall::SetState { handle, state });
        Ok(())
    }

    fn seek(&self, handle: PipelineHandle, position: Duration) -> Result<(), EngineError> {
        self.lock().calls.push(EngineCall::Seek { handle, position });
        Ok(())
    }

    fn select_stream(
        &self,
        handle: PipelineHandle,
        stream_type: StreamType,
        index: u32,
    ) -> Result<(), EngineError> {
        self.lock().calls.push(EngineCall::SelectStream {
            handle,
            stream_type,
            index,
        });
        Ok(())
    }

    fn release(&self, handle: PipelineHandle) {
        self.lock().calls.push(EngineCall::Release { handle });
    }
}
