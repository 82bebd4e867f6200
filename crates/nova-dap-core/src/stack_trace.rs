//! `stackTrace` request handling.
//!
//! A page of raw frames is read through the [`StackFrameCache`]. Each frame
//! then needs three round trips (line number, source name/paths, declaring
//! type signature), which are issued as one batch through the
//! [`BatchDispatcher`]. Everything after the batch (type names, argument
//! lists, display names, synthesized sources) is derived locally.
//!
//! The response never fails. Errors that mean the thread or VM moved on stop
//! the page at the frame that hit them; anything else only degrades the
//! affected frame.

use std::sync::Arc;

use nova_jdwp::{FrameInfo, JdwpClient, JdwpError, ThreadId, LINE_UNAVAILABLE};
use parking_lot::Mutex;

use crate::config::DebugConfig;
use crate::dap::{PresentationHint, Source, StackFrame, StackTraceArguments, StackTraceResponseBody};
use crate::dispatch::{BatchDispatcher, Task};
use crate::format::{
    convert_line_number, format_method_name, method_argument_type_names, parse_enclosing_type,
    signature_to_type_name, StackFrameFormat, NATIVE_METHOD_MARKER, SOURCE_EXTENSION,
};
use crate::frame_ids::{FrameHandle, FrameHandlePool, FrameRef};
use crate::source::SourceResolver;
use crate::stack_frames::StackFrameCache;

/// Client numbering and naming preferences applied to every frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameSettings {
    pub format: StackFrameFormat,
    pub debugger_lines_start_at1: bool,
    pub client_lines_start_at1: bool,
    pub client_columns_start_at1: bool,
}

impl From<&DebugConfig> for FrameSettings {
    fn from(config: &DebugConfig) -> Self {
        Self {
            format: config.stack_frame_format,
            debugger_lines_start_at1: config.debugger_lines_start_at1,
            client_lines_start_at1: config.client_lines_start_at1,
            client_columns_start_at1: config.client_columns_start_at1,
        }
    }
}

#[derive(Debug)]
struct SourceInfo {
    name: String,
    paths: Vec<String>,
}

enum Lookup {
    Line(i32),
    /// `None` when the class carries no debug information.
    Source(Option<SourceInfo>),
    Signature(String),
}

/// Per-frame lookup results, in batch order.
struct FrameLookups {
    line: Result<i32, JdwpError>,
    source: Result<Option<SourceInfo>, JdwpError>,
    signature: Result<String, JdwpError>,
}

impl FrameLookups {
    fn stopping_error(&self) -> Option<&JdwpError> {
        [
            self.line.as_ref().err(),
            self.source.as_ref().err(),
            self.signature.as_ref().err(),
        ]
        .into_iter()
        .flatten()
        .find(|err| ends_page(err))
    }
}

/// The thread resumed, died, or the VM went away: later frames are moot.
fn ends_page(err: &JdwpError) -> bool {
    err.is_target_gone()
        || matches!(
            err,
            JdwpError::Timeout
                | JdwpError::InvalidThread(_)
                | JdwpError::ThreadNotSuspended(_)
                | JdwpError::ObjectCollected(_)
        )
}

pub struct StackTraceAssembler {
    vm: Arc<dyn JdwpClient>,
    dispatcher: BatchDispatcher,
    stack_frames: StackFrameCache,
    handles: Mutex<FrameHandlePool>,
    sources: SourceResolver,
    settings: FrameSettings,
}

impl StackTraceAssembler {
    pub fn new(
        vm: Arc<dyn JdwpClient>,
        dispatcher: BatchDispatcher,
        sources: SourceResolver,
        settings: FrameSettings,
    ) -> Self {
        Self {
            vm,
            dispatcher,
            stack_frames: StackFrameCache::new(),
            handles: Mutex::new(FrameHandlePool::new()),
            sources,
            settings,
        }
    }

    pub fn sources(&self) -> &SourceResolver {
        &self.sources
    }

    pub fn sources_mut(&mut self) -> &mut SourceResolver {
        &mut self.sources
    }

    pub fn stack_frames(&self) -> &StackFrameCache {
        &self.stack_frames
    }

    /// Thread and depth behind a frame id handed out earlier, if still live.
    pub fn frame(&self, id: i64) -> Option<FrameRef> {
        let handle = FrameHandle::from_id(id)?;
        self.handles.lock().get(handle)
    }

    pub fn live_frame_ids(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn on_thread_resumed(&self, thread: ThreadId) {
        self.stack_frames.clear_thread(thread);
        let released = self.handles.lock().release_thread(thread);
        tracing::trace!(target: "nova.dap", thread, released, "thread resumed");
    }

    pub fn on_vm_resumed(&self) {
        self.stack_frames.clear_all();
        self.handles.lock().clear();
    }

    pub async fn stack_trace(&self, args: StackTraceArguments) -> StackTraceResponseBody {
        if args.start_frame < 0 || args.levels < 0 {
            return StackTraceResponseBody::empty(0);
        }
        let thread = args.thread_id;
        let start = args.start_frame as usize;
        let levels = args.levels as usize;

        match self.vm.find_thread(thread).await {
            Ok(Some(_)) => {}
            Ok(None) => return StackTraceResponseBody::empty(0),
            Err(err) => {
                tracing::debug!(target: "nova.dap", thread, error = %err, "thread lookup failed");
                return StackTraceResponseBody::empty(0);
            }
        }

        // A page starting at the top belongs to a new stop.
        if start == 0 {
            self.stack_frames.clear_thread(thread);
        }

        let total = match self.vm.frame_count(thread).await {
            Ok(total) => total,
            Err(err) => {
                tracing::debug!(target: "nova.dap", thread, error = %err, "frame count failed");
                return StackTraceResponseBody::empty(0);
            }
        };
        if total <= start {
            return StackTraceResponseBody::empty(total as i64);
        }
        let count = if levels == 0 {
            total - start
        } else {
            (total - start).min(levels)
        };

        let raw = match self.stack_frames.frames(self.vm.as_ref(), thread, start, count).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::debug!(target: "nova.dap", thread, start, count, error = %err, "stack walk failed");
                return StackTraceResponseBody::empty(total as i64);
            }
        };

        let lookups = self.lookup_all(&raw).await;
        let mut stack_frames = Vec::with_capacity(raw.len());
        for (frame, lookups) in raw.iter().zip(lookups) {
            if let Some(err) = lookups.stopping_error() {
                tracing::debug!(
                    target: "nova.dap",
                    thread,
                    frame = frame.index,
                    error = %err,
                    "stack trace truncated"
                );
                break;
            }
            let handle = self.handles.lock().alloc(FrameRef {
                thread,
                index: frame.index,
            });
            let Some(id) = handle else {
                tracing::warn!(
                    target: "nova.dap",
                    thread,
                    frame = frame.index,
                    live = self.live_frame_ids(),
                    "no frame ids left; stack trace truncated"
                );
                break;
            };
            stack_frames.push(self.client_frame(frame, lookups, id));
        }

        StackTraceResponseBody {
            stack_frames,
            total_frames: total as i64,
        }
    }

    async fn lookup_all(&self, frames: &[FrameInfo]) -> Vec<FrameLookups> {
        let mut tasks: Vec<Task<Lookup>> = Vec::with_capacity(frames.len() * 3);
        for frame in frames {
            let location = frame.location;
            let type_id = frame.declaring_type();

            let vm = self.vm.clone();
            tasks.push(Box::pin(async move {
                vm.line_number(&location).await.map(Lookup::Line)
            }));

            let vm = self.vm.clone();
            tasks.push(Box::pin(async move {
                let name = match vm.source_name(type_id).await {
                    Ok(name) => name,
                    Err(JdwpError::AbsentInformation) => return Ok(Lookup::Source(None)),
                    Err(err) => return Err(err),
                };
                let paths = match vm.source_paths(type_id).await {
                    Ok(paths) => paths,
                    Err(JdwpError::AbsentInformation) => Vec::new(),
                    Err(err) => return Err(err),
                };
                Ok(Lookup::Source(Some(SourceInfo { name, paths })))
            }));

            let vm = self.vm.clone();
            tasks.push(Box::pin(async move {
                vm.signature(type_id).await.map(Lookup::Signature)
            }));
        }

        let mut results = self.dispatcher.settle(tasks).await.into_iter();
        let mut out = Vec::with_capacity(frames.len());
        for _ in frames {
            let (Some(line), Some(source), Some(signature)) =
                (results.next(), results.next(), results.next())
            else {
                break;
            };
            out.push(FrameLookups {
                line: line.and_then(|lookup| match lookup {
                    Lookup::Line(line) => Ok(line),
                    _ => Err(unexpected()),
                }),
                source: source.and_then(|lookup| match lookup {
                    Lookup::Source(info) => Ok(info),
                    _ => Err(unexpected()),
                }),
                signature: signature.and_then(|lookup| match lookup {
                    Lookup::Signature(signature) => Ok(signature),
                    _ => Err(unexpected()),
                }),
            });
        }
        out
    }

    fn client_frame(&self, frame: &FrameInfo, lookups: FrameLookups, id: FrameHandle) -> StackFrame {
        let settings = &self.settings;
        let type_name = match &lookups.signature {
            Ok(signature) => Some(signature_to_type_name(signature)),
            Err(err) => {
                tracing::debug!(target: "nova.dap", frame = frame.index, error = %err, "type signature unavailable");
                None
            }
        };
        let argument_types = method_argument_type_names(&frame.method.signature);
        let mut name = format_method_name(
            type_name.as_deref().unwrap_or("<unknown>"),
            &frame.method.name,
            &argument_types,
            &settings.format,
        );

        let mut source = match (&type_name, lookups.source) {
            (Some(type_name), Ok(info)) => self.resolve_source(type_name, info),
            (_, Err(err)) => {
                tracing::debug!(target: "nova.dap", frame = frame.index, error = %err, "source lookup failed");
                None
            }
            (None, Ok(_)) => None,
        };

        let line = match lookups.line {
            Ok(line) if line >= 0 => line,
            Ok(_) => LINE_UNAVAILABLE,
            Err(err) => {
                tracing::debug!(target: "nova.dap", frame = frame.index, error = %err, "line lookup failed");
                LINE_UNAVAILABLE
            }
        };
        let line = convert_line_number(
            line,
            settings.debugger_lines_start_at1,
            settings.client_lines_start_at1,
        );

        let mut presentation_hint = None;
        if line < 0 {
            presentation_hint = Some(PresentationHint::Subtle);
            if frame.is_native() {
                name.push_str(NATIVE_METHOD_MARKER);
            } else {
                // Synthetic scaffolding such as lambda bridges: no usable source.
                source = None;
            }
        }

        StackFrame {
            id: id.as_id(),
            name,
            source,
            line: i64::from(line),
            column: if settings.client_columns_start_at1 { 1 } else { 0 },
            presentation_hint,
        }
    }

    fn resolve_source(&self, type_name: &str, info: Option<SourceInfo>) -> Option<Source> {
        let (source_name, relative_path) = match info {
            Some(SourceInfo { name, paths }) => {
                let relative_path = paths
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| format!("{}{name}", package_dir(type_name)));
                (name, relative_path)
            }
            None => {
                let enclosing = parse_enclosing_type(type_name);
                let simple = enclosing.rsplit('.').next().unwrap_or(enclosing);
                (
                    format!("{simple}{SOURCE_EXTENSION}"),
                    format!("{}{SOURCE_EXTENSION}", enclosing.replace('.', "/")),
                )
            }
        };
        self.sources.resolve(type_name, &source_name, &relative_path)
    }
}

/// `com/example/` for `com.example.Foo`.
fn package_dir(type_name: &str) -> String {
    match type_name.rsplit_once('.') {
        Some((package, _)) => format!("{}/", package.replace('.', "/")),
        None => String::new(),
    }
}

fn unexpected() -> JdwpError {
    JdwpError::Protocol("batched lookup returned a mismatched result".to_owned())
}
