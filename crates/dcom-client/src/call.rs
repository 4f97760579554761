//! Call builder
//!
//! A [`RemoteCall`] pairs an operation number with the in-parameters to
//! marshal and the shapes of the out-parameters to expect back. The proxy
//! attaches the target object and interface identity at dispatch time; the
//! builder itself stays target-agnostic so one call description can be
//! reused.

use ndr::Value;

/// Description of one remote method invocation.
#[derive(Debug, Clone)]
pub struct RemoteCall {
    opnum: u16,
    in_params: Vec<Value>,
    out_shapes: Vec<Value>,
}

impl RemoteCall {
    pub fn new(opnum: u16) -> Self {
        Self {
            opnum,
            in_params: Vec::new(),
            out_shapes: Vec::new(),
        }
    }

    /// Append an in-parameter.
    pub fn in_param(mut self, value: Value) -> Self {
        self.in_params.push(value);
        self
    }

    /// Append an expected out-parameter shape.
    pub fn out_shape(mut self, shape: Value) -> Self {
        self.out_shapes.push(shape);
        self
    }

    pub fn opnum(&self) -> u16 {
        self.opnum
    }

    pub fn in_params(&self) -> &[Value] {
        &self.in_params
    }

    pub fn out_shapes(&self) -> &[Value] {
        &self.out_shapes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_accumulates_in_order() {
        let call = RemoteCall::new(7)
            .in_param(Value::U16(1))
            .in_param(Value::I32(2))
            .out_shape(Value::I32(0));
        assert_eq!(call.opnum(), 7);
        assert_eq!(call.in_params(), &[Value::U16(1), Value::I32(2)]);
        assert_eq!(call.out_shapes(), &[Value::I32(0)]);
    }
}
