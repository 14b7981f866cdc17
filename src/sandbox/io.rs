//! Bounded capture for script console output and the `console` global.

use std::rc::Rc;

use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Object, Value as JsValue};

use crate::error::ConsoleOutput;
use crate::sandbox::marshal::coerce_string;
use crate::sandbox::state::HostState;

/// Console methods exposed to scripts. All of them write to the same buffer.
const CONSOLE_METHODS: [&str; 5] = ["log", "info", "warn", "error", "debug"];

/// Initial buffer size, clipped to the ceiling.
const INITIAL_CAPACITY: usize = 1024;

/// An append-only byte buffer that never grows past `max_size`.
///
/// Appends that do not fit are clipped and flip the `truncated` flag; once
/// the buffer is full every further append is dropped and flagged. Storage
/// doubles on growth, capped at the ceiling, or grows to exactly the
/// required size when doubling is not enough.
#[derive(Debug, Clone)]
pub struct OutputCapture {
    buffer: Vec<u8>,
    capacity: usize,
    max_size: usize,
    truncated: bool,
}

impl OutputCapture {
    /// Create a capture buffer bounded at `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        let capacity = INITIAL_CAPACITY.min(max_size);
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
            max_size,
            truncated: false,
        }
    }

    /// Append bytes, clipping at the ceiling.
    pub fn append(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        let len = self.buffer.len();
        if len >= self.max_size {
            self.truncated = true;
            return;
        }

        let available = self.max_size - len;
        let to_append = bytes.len().min(available);
        if to_append < bytes.len() {
            self.truncated = true;
        }

        let required = len + to_append;
        if required > self.capacity {
            let mut new_capacity = self.capacity.saturating_mul(2).min(self.max_size);
            if new_capacity < required {
                new_capacity = required;
            }
            self.buffer.reserve_exact(new_capacity - len);
            self.capacity = new_capacity;
        }

        self.buffer.extend_from_slice(&bytes[..to_append]);
    }

    /// Append a string.
    pub fn append_str(&mut self, s: &str) {
        self.append(s.as_bytes());
    }

    /// Forget captured output and the truncation flag. Storage is kept.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.truncated = false;
    }

    /// Free the storage. The capture stays usable and regrows on append.
    pub fn release(&mut self) {
        self.buffer = Vec::new();
        self.capacity = 0;
        self.truncated = false;
    }

    /// Get the captured bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Get the captured output as a string, replacing invalid UTF-8.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }

    /// Copy out the current contents and flag.
    pub fn snapshot(&self) -> ConsoleOutput {
        ConsoleOutput {
            bytes: self.buffer.clone(),
            truncated: self.truncated,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

/// Install `console.log/.info/.warn/.error/.debug` into the global scope.
pub(crate) fn install_console<'js>(ctx: &Ctx<'js>, state: Rc<HostState>) -> rquickjs::Result<()> {
    let console = Object::new(ctx.clone())?;
    for name in CONSOLE_METHODS {
        let state = Rc::clone(&state);
        let method = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, args: Rest<JsValue<'js>>| {
                write_console_line(&ctx, &state, &args.0);
            },
        )?;
        console.set(name, method)?;
    }
    ctx.globals().set("console", console)
}

/// Stringify arguments, join them with spaces and append a newline.
///
/// Arguments whose string conversion throws are left out; the separator
/// before them is still written.
fn write_console_line<'js>(ctx: &Ctx<'js>, state: &HostState, args: &[JsValue<'js>]) {
    let mut line = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        match coerce_string(ctx, arg) {
            Ok(text) => line.push_str(&text),
            Err(_) => {
                let _ = ctx.catch();
            }
        }
    }
    line.push('\n');

    let mut console = state.console.borrow_mut();
    let was_truncated = console.is_truncated();
    console.append_str(&line);
    if console.is_truncated() && !was_truncated {
        log_trace!(max_bytes = console.max_size(), "console output truncated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_within_limit() {
        let mut capture = OutputCapture::new(64);
        capture.append_str("hello ");
        capture.append_str("world");
        assert_eq!(capture.to_string_lossy(), "hello world");
        assert!(!capture.is_truncated());
    }

    #[test]
    fn test_append_clips_at_ceiling() {
        let mut capture = OutputCapture::new(5);
        capture.append_str("abc");
        capture.append_str("defg");
        assert_eq!(capture.as_bytes(), b"abcde");
        assert!(capture.is_truncated());

        capture.append_str("h");
        assert_eq!(capture.len(), 5);
        assert!(capture.is_truncated());
    }

    #[test]
    fn test_exact_fit_is_not_truncated() {
        let mut capture = OutputCapture::new(4);
        capture.append_str("abcd");
        assert!(!capture.is_truncated());
        assert_eq!(capture.len(), 4);
    }

    #[test]
    fn test_empty_append_is_ignored() {
        let mut capture = OutputCapture::new(1);
        capture.append_str("x");
        capture.append(b"");
        assert!(!capture.is_truncated());
    }

    #[test]
    fn test_capacity_doubles_and_caps() {
        let mut capture = OutputCapture::new(3000);
        assert_eq!(capture.capacity(), 1024);

        capture.append(&[b'a'; 1500]);
        assert_eq!(capture.capacity(), 2048);

        capture.append(&[b'b'; 1000]);
        assert_eq!(capture.capacity(), 3000);
        assert_eq!(capture.len(), 2500);
    }

    #[test]
    fn test_capacity_grows_to_fit_large_append() {
        let mut capture = OutputCapture::new(10_000);
        capture.append(&[b'x'; 5000]);
        assert_eq!(capture.capacity(), 5000);
    }

    #[test]
    fn test_release_frees_storage() {
        let mut capture = OutputCapture::new(8);
        capture.append_str("abc");
        capture.release();
        assert!(capture.is_empty());
        assert_eq!(capture.capacity(), 0);

        capture.append_str("xy");
        assert_eq!(capture.as_bytes(), b"xy");
    }

    #[test]
    fn test_reset() {
        let mut capture = OutputCapture::new(2);
        capture.append_str("abc");
        assert!(capture.is_truncated());

        capture.reset();
        assert!(capture.is_empty());
        assert!(!capture.is_truncated());
        assert_eq!(capture.snapshot(), ConsoleOutput::default());
    }
}
