//! Decoding of positional and keyword [`Value`] arguments.

use tessera_core::{Error, Kwargs, NdArray, Result, Selection, Value};

use crate::ops::assembly::{DstParam, SrcParam};

/// Cursor over the arguments of one dispatched call.
pub struct ArgReader {
    op: &'static str,
    args: std::vec::IntoIter<Value>,
    kwargs: Kwargs,
}

impl ArgReader {
    pub fn new(op: &'static str, args: Vec<Value>, kwargs: Kwargs) -> Self {
        Self {
            op,
            args: args.into_iter(),
            kwargs,
        }
    }

    fn missing(&self, what: &'static str) -> Error {
        Error::invalid(what, format!("missing argument for '{}'", self.op))
    }

    /// Next positional argument.
    pub fn value(&mut self, what: &'static str) -> Result<Value> {
        match self.args.next() {
            Some(v) => Ok(v),
            None => Err(self.missing(what)),
        }
    }

    /// Next positional argument if present, treating `Value::None` as absent.
    pub fn opt_value(&mut self) -> Option<Value> {
        self.args.next().filter(|v| !v.is_none())
    }

    /// All remaining positional arguments.
    pub fn rest(&mut self) -> Vec<Value> {
        self.args.by_ref().collect()
    }

    pub fn array(&mut self, what: &'static str) -> Result<NdArray> {
        self.value(what).and_then(to_array)
    }

    pub fn opt_array(&mut self) -> Result<Option<NdArray>> {
        self.opt_value().map(to_array).transpose()
    }

    pub fn arrays(&mut self) -> Result<Vec<NdArray>> {
        self.rest().into_iter().map(to_array).collect()
    }

    pub fn str(&mut self, what: &'static str) -> Result<String> {
        let v = self.value(what)?;
        v.as_str().map(str::to_string)
    }

    pub fn int(&mut self, what: &'static str) -> Result<i64> {
        self.value(what)?.as_i64()
    }

    pub fn usize(&mut self, what: &'static str) -> Result<usize> {
        let i = self.int(what)?;
        usize::try_from(i).map_err(|_| Error::invalid(what, format!("expected non-negative, got {}", i)))
    }

    pub fn opt_int(&mut self) -> Result<Option<i64>> {
        self.opt_value().map(|v| v.as_i64()).transpose()
    }

    pub fn float(&mut self, what: &'static str) -> Result<f64> {
        self.value(what)?.as_f64()
    }

    pub fn bool(&mut self, what: &'static str) -> Result<bool> {
        self.value(what)?.as_bool()
    }

    pub fn shape(&mut self, what: &'static str) -> Result<Vec<usize>> {
        self.value(what)?.as_shape()
    }

    pub fn selection(&mut self, what: &'static str) -> Result<Selection> {
        self.value(what)?.as_selection().cloned()
    }

    pub fn list(&mut self, what: &'static str) -> Result<Vec<Value>> {
        match self.value(what)? {
            Value::List(items) => Ok(items),
            Value::None => Ok(Vec::new()),
            other => Err(Error::invalid(what, format!("expected list, got {}", other.kind()))),
        }
    }

    pub fn floats(&mut self, what: &'static str) -> Result<Vec<f64>> {
        self.list(what)?.iter().map(Value::as_f64).collect()
    }

    /// Remove and return a keyword argument, treating `Value::None` as absent.
    pub fn kwarg(&mut self, name: &str) -> Option<Value> {
        self.kwargs.remove(name).filter(|v| !v.is_none())
    }

    pub fn required_kwarg(&mut self, name: &'static str) -> Result<Value> {
        self.kwarg(name).ok_or_else(|| self.missing(name))
    }

    pub fn src_params(&mut self) -> Result<Vec<SrcParam>> {
        match self.required_kwarg("src_params")? {
            Value::List(items) => items.iter().map(SrcParam::from_value).collect(),
            other => Err(Error::invalid("src_params", format!("expected list, got {}", other.kind()))),
        }
    }

    pub fn dst_params(&mut self) -> Result<Vec<DstParam>> {
        match self.required_kwarg("dst_params")? {
            Value::List(items) => items.iter().map(DstParam::from_value).collect(),
            other => Err(Error::invalid("dst_params", format!("expected list, got {}", other.kind()))),
        }
    }

    /// Fail if positional or keyword arguments were left unread.
    pub fn finish(mut self) -> Result<()> {
        if self.args.next().is_some() {
            return Err(Error::invalid("args", format!("too many arguments for '{}'", self.op)));
        }
        if let Some(name) = self.kwargs.keys().next() {
            return Err(Error::invalid(
                "kwargs",
                format!("unexpected keyword '{}' for '{}'", name, self.op),
            ));
        }
        Ok(())
    }
}

/// Arrays, or plain numbers promoted to zero-dimensional arrays.
pub fn to_array(value: Value) -> Result<NdArray> {
    match value {
        Value::Array(a) => Ok(a),
        Value::Int(i) => Ok(NdArray::scalar(i)),
        Value::Float(f) => Ok(NdArray::scalar(f)),
        Value::Bool(b) => Ok(NdArray::scalar(b)),
        other => Err(Error::invalid("array", format!("expected array, got {}", other.kind()))),
    }
}
