//! Conversion between engine values and host [`Value`]s.

use std::mem::size_of;

use rquickjs::{qjs, Array, Atom, Ctx, Exception, Object, Value as JsValue};

use crate::sandbox::limits::Watchdog;
use crate::value::{Map, Value};

/// Deepest object/array nesting converted out of the engine.
pub const MAX_DEPTH: usize = 256;

/// Host bytes a conversion may produce per byte of engine heap ceiling.
pub const HOST_BYTES_PER_HEAP_BYTE: usize = 8;

/// Host byte budget used when no sandbox ceiling applies.
pub const DEFAULT_MAX_HOST_BYTES: usize = 64 * 1024 * 1024;

/// Converted nodes between watchdog polls.
const POLL_INTERVAL: usize = 256;

/// Bounds on one script-to-host conversion.
///
/// Sparse arrays and shared references let a small engine heap describe a
/// huge host value, so the output is metered in estimated host bytes and the
/// walk polls the evaluation's watchdog.
#[derive(Debug, Clone, Copy)]
pub struct ConversionLimits<'a> {
    /// Estimated host bytes the converted value may occupy.
    pub max_host_bytes: usize,
    /// Polled between nodes; once it fires the conversion is interrupted.
    pub watchdog: Option<&'a Watchdog>,
}

impl Default for ConversionLimits<'_> {
    fn default() -> Self {
        Self {
            max_host_bytes: DEFAULT_MAX_HOST_BYTES,
            watchdog: None,
        }
    }
}

impl<'a> ConversionLimits<'a> {
    /// Limits for a sandbox with the given heap ceiling and run watchdog.
    pub fn for_heap(max_memory: usize, watchdog: &'a Watchdog) -> Self {
        Self {
            max_host_bytes: max_memory.saturating_mul(HOST_BYTES_PER_HEAP_BYTE),
            watchdog: Some(watchdog),
        }
    }
}

/// Convert a script value into a host value.
///
/// `null`/`undefined` become `Null`, numbers become `Integer` when they are
/// integral and fit an `i64`, arrays are read by index up to `length`, and
/// other objects are read through their own enumerable string keys.
/// Functions, symbols and anything else become `Null`. Strings holding
/// unpaired surrogates get U+FFFD in their place.
///
/// Errors throw in the engine and return `Err(rquickjs::Error::Exception)`:
/// a `TypeError` for a reference cycle or nesting past [`MAX_DEPTH`], a
/// `RangeError` when the output would pass `limits.max_host_bytes`, and an
/// `InternalError` when the watchdog fires.
pub fn from_js<'js>(
    ctx: &Ctx<'js>,
    value: &JsValue<'js>,
    limits: ConversionLimits<'_>,
) -> rquickjs::Result<Value> {
    let mut converter = Converter {
        ctx,
        limits,
        ancestors: Vec::new(),
        spent: 0,
        nodes: 0,
    };
    converter.convert(value)
}

struct Converter<'a, 'js> {
    ctx: &'a Ctx<'js>,
    limits: ConversionLimits<'a>,
    ancestors: Vec<JsValue<'js>>,
    spent: usize,
    nodes: usize,
}

impl<'a, 'js> Converter<'a, 'js> {
    fn convert(&mut self, value: &JsValue<'js>) -> rquickjs::Result<Value> {
        self.charge(size_of::<Value>())?;

        if value.is_null() || value.is_undefined() {
            return Ok(Value::Null);
        }
        if let Some(b) = value.as_bool() {
            return Ok(Value::Boolean(b));
        }
        if let Some(i) = value.as_int() {
            return Ok(Value::Integer(i64::from(i)));
        }
        if let Some(f) = value.as_float() {
            return Ok(number_to_host(f));
        }
        if value.is_string() {
            let text = coerce_string(self.ctx, value)?;
            self.charge(text.len())?;
            return Ok(Value::String(text));
        }
        if value.is_function() {
            return Ok(Value::Null);
        }

        if let Some(array) = value.as_array() {
            return self.convert_array(value, array);
        }
        if let Some(object) = value.as_object() {
            return self.convert_object(value, object);
        }

        Ok(Value::Null)
    }

    fn convert_array(&mut self, value: &JsValue<'js>, array: &Array<'js>) -> rquickjs::Result<Value> {
        self.enter(value)?;
        let len = match value.as_object() {
            Some(object) => array_length(object)?,
            None => 0,
        };

        // No preallocation: `length` is script controlled and may be sparse.
        let mut items = Vec::new();
        for i in 0..len {
            let item: JsValue = array.get(i as usize)?;
            items.push(self.convert(&item)?);
        }
        self.ancestors.pop();
        Ok(Value::Array(items))
    }

    fn convert_object(&mut self, value: &JsValue<'js>, object: &Object<'js>) -> rquickjs::Result<Value> {
        self.enter(value)?;
        let mut map = Map::new();
        for prop in object.props::<Atom<'js>, JsValue<'js>>() {
            let (key, item) = prop?;
            let key = coerce_string(self.ctx, &key.to_value()?)?;
            self.charge(size_of::<String>() + key.len())?;
            let item = self.convert(&item)?;
            // Own property keys are already unique.
            map.push_unique(key, item);
        }
        self.ancestors.pop();
        Ok(Value::Map(map))
    }

    fn enter(&mut self, value: &JsValue<'js>) -> rquickjs::Result<()> {
        if self.ancestors.len() >= MAX_DEPTH {
            return Err(Exception::throw_type(self.ctx, "object nesting too deep"));
        }
        if self.ancestors.iter().any(|ancestor| ancestor == value) {
            return Err(Exception::throw_type(self.ctx, "cyclic object value"));
        }
        self.ancestors.push(value.clone());
        Ok(())
    }

    fn charge(&mut self, bytes: usize) -> rquickjs::Result<()> {
        self.spent = self.spent.saturating_add(bytes);
        if self.spent > self.limits.max_host_bytes {
            return Err(Exception::throw_range(self.ctx, "value too large to convert"));
        }

        self.nodes += 1;
        if self.nodes % POLL_INTERVAL == 0 {
            if let Some(watchdog) = self.limits.watchdog {
                if watchdog.should_interrupt() {
                    return Err(Exception::throw_internal(self.ctx, "interrupted"));
                }
            }
        }
        Ok(())
    }
}

/// Read `length` as a number and clamp it to the array index range.
fn array_length(object: &Object<'_>) -> rquickjs::Result<u32> {
    let length: JsValue = object.get("length")?;
    let length = length.as_number().unwrap_or(0.0);
    if length.is_nan() || length <= 0.0 {
        return Ok(0);
    }
    Ok(length.min(f64::from(u32::MAX)) as u32)
}

/// Stringify a script value with `ToString`.
///
/// Unpaired surrogates, which have no UTF-8 form, become U+FFFD. A throwing
/// conversion leaves the exception pending and returns
/// `Err(rquickjs::Error::Exception)`.
pub(crate) fn coerce_string<'js>(ctx: &Ctx<'js>, value: &JsValue<'js>) -> rquickjs::Result<String> {
    let raw_ctx = ctx.as_raw().as_ptr();
    let mut len = 0;
    // SAFETY: `value` belongs to `ctx` and outlives the call. The returned
    // buffer stays valid until it is handed back to `JS_FreeCString`.
    let ptr = unsafe { qjs::JS_ToCStringLen(raw_ctx, &mut len, value.as_raw()) };
    if ptr.is_null() {
        return Err(rquickjs::Error::Exception);
    }
    let bytes = unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize) }.to_vec();
    unsafe { qjs::JS_FreeCString(raw_ctx, ptr) };
    Ok(decode_engine_utf8(bytes))
}

/// The engine writes a lone surrogate as its 3-byte `ED A0..BF xx` form.
fn decode_engine_utf8(bytes: Vec<u8>) -> String {
    let bytes = match String::from_utf8(bytes) {
        Ok(text) => return text,
        Err(err) => err.into_bytes(),
    };

    let mut fixed = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let surrogate = bytes[i] == 0xED
            && i + 2 < bytes.len()
            && (0xA0..=0xBF).contains(&bytes[i + 1])
            && (0x80..=0xBF).contains(&bytes[i + 2]);
        if surrogate {
            fixed.extend_from_slice("\u{FFFD}".as_bytes());
            i += 3;
        } else {
            fixed.push(bytes[i]);
            i += 1;
        }
    }

    match String::from_utf8(fixed) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}

/// Integral floats inside the `i64` range collapse to `Integer`.
fn number_to_host(f: f64) -> Value {
    // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Value::Integer(f as i64)
    } else {
        Value::Float(f)
    }
}

/// Convert a host value into a script value.
///
/// Mappings are assigned property by property in map order; the first
/// failing conversion aborts and the partially built object is dropped.
pub fn to_js<'js>(ctx: &Ctx<'js>, value: &Value) -> rquickjs::Result<JsValue<'js>> {
    match value {
        Value::Null => Ok(JsValue::new_null(ctx.clone())),
        Value::Boolean(b) => Ok(JsValue::new_bool(ctx.clone(), *b)),
        Value::Integer(i) => Ok(match i32::try_from(*i) {
            Ok(small) => JsValue::new_int(ctx.clone(), small),
            Err(_) => JsValue::new_float(ctx.clone(), *i as f64),
        }),
        Value::Float(f) => Ok(JsValue::new_float(ctx.clone(), *f)),
        Value::String(s) => Ok(rquickjs::String::from_str(ctx.clone(), s)?.into_value()),
        Value::Array(items) => {
            let array = Array::new(ctx.clone())?;
            for (i, item) in items.iter().enumerate() {
                array.set(i, to_js(ctx, item)?)?;
            }
            Ok(array.into_value())
        }
        Value::Map(map) => {
            let object = Object::new(ctx.clone())?;
            for (key, item) in map.iter() {
                object.set(key, to_js(ctx, item)?)?;
            }
            Ok(object.into_value())
        }
    }
}
