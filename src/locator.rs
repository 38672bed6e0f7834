//! Locating GWT contexts in a host and wiring the stats hook into them
//!
//! Some linkers put the compiled module inline in the host page; the iframe
//! linker puts it in an embedded frame. Frames from other origins (ads,
//! widgets) cannot be inspected and are skipped without error.

use crate::collator::{IngestOutcome, SharedCollator};
use crate::event::RawEvent;
use crate::kv::EntryMap;
use crate::target::{SnapshotError, StatsHook, TargetContext, Value};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Access to an embedded frame was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("frame {index} is not accessible: {reason}")]
pub struct FrameAccessError {
    pub index: usize,
    pub reason: String,
}

/// Serialized form of an embedded frame
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrameSnapshot {
    Inaccessible { inaccessible: String },
    Accessible { globals: EntryMap<Value> },
}

/// Serialized form of a host page: its own globals plus embedded frames
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostSnapshot {
    #[serde(default)]
    pub globals: EntryMap<Value>,
    #[serde(default)]
    pub frames: Vec<FrameSnapshot>,
}

impl HostSnapshot {
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SnapshotError> {
        let path_ref = path.as_ref();
        if !path_ref.exists() {
            return Err(SnapshotError::NotFound(path_ref.display().to_string()));
        }
        let contents = fs::read_to_string(path_ref)?;
        Self::from_json(&contents)
    }
}

/// An embedded frame of the host
#[derive(Debug, Clone)]
pub enum Frame {
    Accessible(TargetContext),
    Inaccessible { index: usize, reason: String },
}

impl Frame {
    pub fn context(&self) -> Result<&TargetContext, FrameAccessError> {
        match self {
            Frame::Accessible(ctx) => Ok(ctx),
            Frame::Inaccessible { index, reason } => Err(FrameAccessError {
                index: *index,
                reason: reason.clone(),
            }),
        }
    }

    fn context_mut(&mut self) -> Result<&mut TargetContext, FrameAccessError> {
        match self {
            Frame::Accessible(ctx) => Ok(ctx),
            Frame::Inaccessible { index, reason } => Err(FrameAccessError {
                index: *index,
                reason: reason.clone(),
            }),
        }
    }
}

/// A live host page: top-level context, frames and the global hook slot
#[derive(Debug, Clone)]
pub struct Host {
    top: TargetContext,
    frames: Vec<Frame>,
    global_hook: Option<StatsHook>,
}

impl From<HostSnapshot> for Host {
    fn from(snapshot: HostSnapshot) -> Self {
        let frames = snapshot
            .frames
            .into_iter()
            .enumerate()
            .map(|(index, frame)| match frame {
                FrameSnapshot::Accessible { globals } => {
                    Frame::Accessible(TargetContext::new(format!("frame[{}]", index), globals))
                }
                FrameSnapshot::Inaccessible { inaccessible } => Frame::Inaccessible {
                    index,
                    reason: inaccessible,
                },
            })
            .collect();

        Self {
            top: TargetContext::new("top", snapshot.globals),
            frames,
            global_hook: None,
        }
    }
}

impl Host {
    pub fn new(top: TargetContext, frames: Vec<Frame>) -> Self {
        Self {
            top,
            frames,
            global_hook: None,
        }
    }

    pub fn top(&self) -> &TargetContext {
        &self.top
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// All GWT contexts: the top context first, then frames in document order
    pub fn locate(&self) -> Vec<&TargetContext> {
        let mut found = Vec::new();
        if self.top.is_target() {
            found.push(&self.top);
        }

        for frame in &self.frames {
            match frame.context() {
                Ok(ctx) if ctx.is_target() => found.push(ctx),
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "skipping frame"),
            }
        }

        found
    }

    /// First GWT context, the one name recovery inspects
    pub fn first_target(&self) -> Option<&TargetContext> {
        self.locate().into_iter().next()
    }

    pub fn has_target(&self) -> bool {
        self.first_target().is_some()
    }

    /// Install the collator in the global slot and in every located context.
    ///
    /// Returns the number of contexts the hook was installed into.
    pub fn install(&mut self, collator: &SharedCollator) -> usize {
        let hook = StatsHook::new(collator.clone());
        self.global_hook = Some(hook.clone());

        let mut installed = 0;
        if self.top.is_target() {
            self.top.install_stats_hook(hook.clone());
            installed += 1;
        }
        for frame in &mut self.frames {
            if let Ok(ctx) = frame.context_mut() {
                if ctx.is_target() {
                    ctx.install_stats_hook(hook.clone());
                    installed += 1;
                }
            }
        }

        tracing::debug!(installed, "stats hook installed");
        installed
    }

    pub fn global_hook(&self) -> Option<&StatsHook> {
        self.global_hook.as_ref()
    }

    /// A module loading after installation picks up the global hook
    pub fn attach_frame(&mut self, mut frame: Frame) {
        if let (Some(hook), Ok(ctx)) = (&self.global_hook, frame.context_mut()) {
            if ctx.is_target() && ctx.stats_hook().is_none() {
                ctx.install_stats_hook(hook.clone());
            }
        }
        self.frames.push(frame);
    }

    /// Route an event the way the host would: through the `$stats` slot of
    /// the context whose module emitted it, else through the global slot.
    pub fn deliver(&self, event: &RawEvent) -> Option<IngestOutcome> {
        if let Some(module) = event.module_name.as_deref() {
            let emitter = self
                .locate()
                .into_iter()
                .find(|ctx| ctx.module_name() == Some(module) && ctx.stats_hook().is_some());
            if let Some(ctx) = emitter {
                return ctx.emit(event);
            }
        }
        self.global_hook.as_ref().map(|h| h.deliver(event))
    }
}
