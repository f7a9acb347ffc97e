//! Native node plugins
//!
//! A node script can be a shared library exporting a small C ABI. Every
//! export is optional:
//!
//! ```c
//! int  can_sim_node_init(const char *name, uint32_t id);   /* 0 = ok */
//! int  on_enable(const CanSimHost *host);                  /* <0 = error */
//! int  on_disable(const CanSimHost *host);
//! int  on_message(const CanSimHost *host, const CanSimFrame *frame);
//! int  on_timer(const CanSimHost *host, double interval_ms, double *next_ms);
//!                                         /* 0 = lapse, 1 = re-arm with *next_ms */
//! const char *can_sim_last_error(void);
//! ```
//!
//! `CanSimHost` is the bridge: the plugin calls back into the simulator
//! through its function pointers, passing `host->ctx` unchanged.

use can_sim_core::{
    Frame, FrameKind, FrameSpec, Invocation, NodeApi, NodeIdentity, Reply, ScriptEngine,
    ScriptError,
};
use libloading::Library;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::path::Path;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CanSimFrame {
    pub timestamp_ns: u64,
    pub can_id: u32,
    pub data: [u8; 64],
    pub data_length: u8,
    pub is_extended: u8,
    pub is_fd: u8,
    pub is_error_frame: u8,
    pub is_remote_frame: u8,
    pub brs: u8,
    pub esi: u8,
    pub has_timestamp: u8,
    /// Classic legacy DLC 9..15 on an 8 byte payload, 0 if none
    pub len8_dlc: u8,
}

impl CanSimFrame {
    pub fn from_frame(frame: &Frame) -> Self {
        let mut data = [0u8; 64];
        let len = frame.payload.len().min(data.len());
        data[..len].copy_from_slice(&frame.payload[..len]);
        Self {
            timestamp_ns: frame.timestamp_ns.unwrap_or(0),
            can_id: frame.id,
            data,
            data_length: len as u8,
            is_extended: frame.extended.into(),
            is_fd: (frame.kind == FrameKind::Fd).into(),
            is_error_frame: frame.error.into(),
            is_remote_frame: frame.remote.into(),
            brs: frame.brs.into(),
            esi: frame.esi.into(),
            has_timestamp: frame.timestamp_ns.is_some().into(),
            len8_dlc: frame.legacy_dlc.unwrap_or(0),
        }
    }

    pub fn to_spec(&self) -> FrameSpec {
        let len = usize::from(self.data_length).min(self.data.len());
        let mut spec = FrameSpec::new(self.can_id, &self.data[..len])
            .with_kind(if self.is_fd != 0 {
                FrameKind::Fd
            } else {
                FrameKind::Classic
            })
            .with_extended(self.is_extended != 0)
            .with_remote(self.is_remote_frame != 0)
            .with_error(self.is_error_frame != 0)
            .with_fd_flags(self.brs != 0, self.esi != 0);
        if self.len8_dlc != 0 {
            spec = spec.with_legacy_dlc(self.len8_dlc);
        }
        spec
    }
}

/// Bridge handed to every plugin callback
#[repr(C)]
pub struct CanSimHost {
    pub ctx: *mut c_void,
    pub node_id: u32,
    pub node_name: *const c_char,
    /// Returns 0 on success, -1 if the frame cannot be encoded
    pub emit: unsafe extern "C" fn(ctx: *mut c_void, frame: *const CanSimFrame) -> c_int,
    pub enable_node: unsafe extern "C" fn(ctx: *mut c_void, name: *const c_char),
    /// A null name disables the calling node
    pub disable_node: unsafe extern "C" fn(ctx: *mut c_void, name: *const c_char),
    pub set_timer: unsafe extern "C" fn(ctx: *mut c_void, interval_ms: f64),
}

type InitFn = unsafe extern "C" fn(name: *const c_char, id: u32) -> c_int;
type LifecycleFn = unsafe extern "C" fn(host: *const CanSimHost) -> c_int;
type MessageFn = unsafe extern "C" fn(host: *const CanSimHost, frame: *const CanSimFrame) -> c_int;
type TimerFn =
    unsafe extern "C" fn(host: *const CanSimHost, interval_ms: f64, next_ms: *mut f64) -> c_int;
type LastErrorFn = unsafe extern "C" fn() -> *const c_char;

unsafe fn api_from<'a>(ctx: *mut c_void) -> &'a mut dyn NodeApi {
    &mut **(ctx as *mut &mut dyn NodeApi)
}

unsafe fn name_from<'a>(name: *const c_char) -> Option<&'a str> {
    if name.is_null() {
        return None;
    }
    CStr::from_ptr(name).to_str().ok()
}

unsafe extern "C" fn host_emit(ctx: *mut c_void, frame: *const CanSimFrame) -> c_int {
    if ctx.is_null() || frame.is_null() {
        return -1;
    }
    let api = api_from(ctx);
    match api.emit(&(*frame).to_spec()) {
        Ok(()) => 0,
        Err(err) => {
            log::warn!("{}: emit rejected: {}", api.node_name(), err);
            -1
        }
    }
}

unsafe extern "C" fn host_enable_node(ctx: *mut c_void, name: *const c_char) {
    if ctx.is_null() {
        return;
    }
    let api = api_from(ctx);
    match name_from(name) {
        Some(name) => api.enable_node(name),
        None => log::warn!("{}: enable_node needs a node name", api.node_name()),
    }
}

unsafe extern "C" fn host_disable_node(ctx: *mut c_void, name: *const c_char) {
    if ctx.is_null() {
        return;
    }
    let api = api_from(ctx);
    if name.is_null() {
        api.disable_node(None);
        return;
    }
    match name_from(name) {
        Some(name) => api.disable_node(Some(name)),
        None => log::warn!("{}: disable_node: name is not UTF-8", api.node_name()),
    }
}

unsafe extern "C" fn host_set_timer(ctx: *mut c_void, interval_ms: f64) {
    if ctx.is_null() {
        return;
    }
    api_from(ctx).set_timer(interval_ms);
}

#[derive(Default)]
struct Exports {
    on_enable: Option<LifecycleFn>,
    on_disable: Option<LifecycleFn>,
    on_message: Option<MessageFn>,
    on_timer: Option<TimerFn>,
    last_error: Option<LastErrorFn>,
}

/// [`ScriptEngine`] backed by a shared library
#[derive(Default)]
pub struct NativeEngine {
    // Exports point into the library; both are set and dropped together
    exports: Exports,
    library: Option<Library>,
    name: CString,
    id: u32,
    last_error: Option<String>,
}

impl NativeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn plugin_error(&self) -> Option<String> {
        let last_error = self.exports.last_error?;
        let ptr = unsafe { last_error() };
        if ptr.is_null() {
            return None;
        }
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }

    fn failure(&mut self, callback: &str, status: c_int) -> ScriptError {
        let text = self
            .plugin_error()
            .unwrap_or_else(|| format!("{} returned {}", callback, status));
        self.last_error = Some(text.clone());
        ScriptError::Runtime(text)
    }
}

impl std::fmt::Debug for NativeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeEngine")
            .field("name", &self.name)
            .field("loaded", &self.library.is_some())
            .finish()
    }
}

unsafe fn symbol<T: Copy>(library: &Library, name: &[u8]) -> Option<T> {
    library.get::<T>(name).ok().map(|symbol| *symbol)
}

impl ScriptEngine for NativeEngine {
    fn load(&mut self, path: &Path, identity: &NodeIdentity) -> Result<(), ScriptError> {
        let name = CString::new(identity.name.as_str())
            .map_err(|e| ScriptError::Load(format!("invalid node name: {}", e)))?;
        let library = unsafe { Library::new(path) }
            .map_err(|e| ScriptError::Load(format!("{}: {}", path.display(), e)))?;

        let init: Option<InitFn>;
        unsafe {
            self.exports = Exports {
                on_enable: symbol(&library, b"on_enable\0"),
                on_disable: symbol(&library, b"on_disable\0"),
                on_message: symbol(&library, b"on_message\0"),
                on_timer: symbol(&library, b"on_timer\0"),
                last_error: symbol(&library, b"can_sim_last_error\0"),
            };
            init = symbol(&library, b"can_sim_node_init\0");
        }
        self.library = Some(library);
        self.name = name;
        self.id = identity.id.index() as u32;

        if let Some(init) = init {
            let status = unsafe { init(self.name.as_ptr(), self.id) };
            if status != 0 {
                let text = self
                    .plugin_error()
                    .unwrap_or_else(|| format!("can_sim_node_init returned {}", status));
                return Err(ScriptError::Init(format!("{}: {}", identity.name, text)));
            }
        }
        log::debug!("{}: native plugin {} loaded", identity.name, path.display());
        Ok(())
    }

    fn call(&mut self, invocation: Invocation<'_>, api: &mut dyn NodeApi) -> Result<Reply, ScriptError> {
        if self.library.is_none() {
            return Err(ScriptError::Runtime("no plugin loaded".to_string()));
        }
        let missing = ScriptError::MissingCallback(invocation.name());

        let mut api: &mut dyn NodeApi = api;
        let host = CanSimHost {
            ctx: &mut api as *mut &mut dyn NodeApi as *mut c_void,
            node_id: self.id,
            node_name: self.name.as_ptr(),
            emit: host_emit,
            enable_node: host_enable_node,
            disable_node: host_disable_node,
            set_timer: host_set_timer,
        };

        let (status, reply) = match invocation {
            Invocation::Enable => {
                let callback = self.exports.on_enable.ok_or(missing)?;
                (unsafe { callback(&host) }, None)
            }
            Invocation::Disable => {
                let callback = self.exports.on_disable.ok_or(missing)?;
                (unsafe { callback(&host) }, None)
            }
            Invocation::Message(frame) => {
                let callback = self.exports.on_message.ok_or(missing)?;
                let raw = CanSimFrame::from_frame(frame);
                (unsafe { callback(&host, &raw) }, None)
            }
            Invocation::Timer(interval_ms) => {
                let callback = self.exports.on_timer.ok_or(missing)?;
                let mut next_ms = 0.0;
                let status = unsafe { callback(&host, interval_ms, &mut next_ms) };
                (status, (status == 1).then_some(next_ms))
            }
        };

        if status < 0 {
            return Err(self.failure(invocation.name(), status));
        }
        Ok(reply)
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.clone()
    }
}
