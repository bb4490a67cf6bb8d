//! Textual layout format (`*.tsl`).
//!
//! A layout is a newline-separated sequence of descriptors:
//!
//! ```text
//! input: shape = (28, 28, 1);
//! conv_2d: num_filters = 8; kernel_size = 3; padding = true;
//! activation: func = relu;
//! ```
//!
//! The parser is whitespace-tolerant (the `.tsn` container strips all of
//! it), accepts the two-component `(W, H)` shape form, and fills omitted
//! optional keys with per-kind defaults. Unknown keys, malformed tokens,
//! and missing required keys are `Parse` errors.

use crate::errors::{NnError, NnResult};
use crate::init::ParamInit;
use crate::layers::{ActivationKind, LayerDesc, LayerKind, PoolKind};
use crate::types::Shape;

pub fn write_descs(descs: &[LayerDesc]) -> String {
    let mut out = String::new();
    for desc in descs {
        out.push_str(&write_desc(desc));
        out.push('\n');
    }
    out
}

fn write_desc(desc: &LayerDesc) -> String {
    match desc {
        LayerDesc::Input { shape } => format!("input: shape = {shape};"),
        LayerDesc::Reshape { shape } => format!("reshape: shape = {shape};"),
        LayerDesc::Flatten => "flatten:".to_string(),
        LayerDesc::Dense {
            size,
            weight_init,
            bias_init,
        } => format!(
            "dense: size = {size}; weight_init = {}; bias_init = {};",
            weight_init.name(),
            bias_init.name()
        ),
        LayerDesc::Activation { func } => format!("activation: func = {};", func.name()),
        LayerDesc::Dropout { keep_rate } => format!("dropout: keep_rate = {keep_rate};"),
        LayerDesc::Pooling2d { pool_size, pool } => format!(
            "pooling_2d: pool_size = ({}, {}); pool = {};",
            pool_size.width,
            pool_size.height,
            pool.name()
        ),
        LayerDesc::Conv2d {
            num_filters,
            kernel_size,
            padding,
            stride,
            kernels_init,
            biases_init,
        } => format!(
            "conv_2d: num_filters = {num_filters}; kernel_size = {kernel_size}; \
             padding = {padding}; stride = {stride}; kernels_init = {}; biases_init = {};",
            kernels_init.name(),
            biases_init.name()
        ),
        LayerDesc::Norm { epsilon } => format!("norm: epsilon = {epsilon};"),
    }
}

#[derive(Debug)]
enum Value {
    Number(f32),
    Bool(bool),
    Ident(String),
    Shape(Shape),
}

impl Value {
    fn as_u32(&self, key: &str) -> NnResult<u32> {
        match self {
            Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Ok(*n as u32),
            _ => Err(NnError::Parse(format!("'{key}' expects an integer"))),
        }
    }

    fn as_f32(&self, key: &str) -> NnResult<f32> {
        match self {
            Value::Number(n) => Ok(*n),
            _ => Err(NnError::Parse(format!("'{key}' expects a number"))),
        }
    }

    fn as_bool(&self, key: &str) -> NnResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            _ => Err(NnError::Parse(format!("'{key}' expects true or false"))),
        }
    }

    fn as_ident(&self, key: &str) -> NnResult<&str> {
        match self {
            Value::Ident(s) => Ok(s),
            _ => Err(NnError::Parse(format!("'{key}' expects an identifier"))),
        }
    }

    fn as_shape(&self, key: &str) -> NnResult<Shape> {
        match self {
            Value::Shape(s) => Ok(*s),
            _ => Err(NnError::Parse(format!("'{key}' expects a shape"))),
        }
    }
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.pos >= self.src.len()
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.src.get(self.pos).copied()
    }

    fn eat(&mut self, c: u8) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: u8) -> NnResult<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(NnError::Parse(format!(
                "expected '{}' at offset {}",
                c as char, self.pos
            )))
        }
    }

    fn parse_ident(&mut self) -> NnResult<String> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.src.len()
            && (self.src[self.pos].is_ascii_alphanumeric() || self.src[self.pos] == b'_')
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(NnError::Parse(format!(
                "expected identifier at offset {start}"
            )));
        }
        Ok(String::from_utf8_lossy(&self.src[start..self.pos]).into_owned())
    }

    fn parse_number(&mut self) -> NnResult<f32> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.src.len()
            && matches!(self.src[self.pos], b'0'..=b'9' | b'.' | b'-' | b'+' | b'e' | b'E')
        {
            self.pos += 1;
        }
        std::str::from_utf8(&self.src[start..self.pos])
            .ok()
            .and_then(|s| s.parse::<f32>().ok())
            .ok_or_else(|| NnError::Parse(format!("expected number at offset {start}")))
    }

    fn parse_shape(&mut self) -> NnResult<Shape> {
        self.expect(b'(')?;
        let width = self.parse_number()?;
        self.expect(b',')?;
        let height = self.parse_number()?;
        let depth = if self.eat(b',') {
            // A trailing comma before ')' is tolerated.
            if self.peek() == Some(b')') {
                1.0
            } else {
                let d = self.parse_number()?;
                self.eat(b',');
                d
            }
        } else {
            1.0
        };
        self.expect(b')')?;
        Ok(Shape::new(width as u32, height as u32, depth as u32))
    }

    fn parse_value(&mut self) -> NnResult<Value> {
        match self.peek() {
            Some(b'(') => Ok(Value::Shape(self.parse_shape()?)),
            Some(c) if c.is_ascii_digit() || c == b'-' || c == b'.' => {
                Ok(Value::Number(self.parse_number()?))
            }
            Some(_) => {
                let ident = self.parse_ident()?;
                match ident.as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => Ok(Value::Ident(ident)),
                }
            }
            None => Err(NnError::Parse("unexpected end of layout".into())),
        }
    }
}

pub fn parse_descs(text: &str) -> NnResult<Vec<LayerDesc>> {
    let mut p = Parser::new(text);
    let mut descs = Vec::new();

    while !p.at_end() {
        let kind_name = p.parse_ident()?;
        let kind = LayerKind::from_name(&kind_name)?;
        p.expect(b':')?;

        let mut pairs: Vec<(String, Value)> = Vec::new();
        while !p.at_end() {
            let mark = p.pos;
            let key = match p.parse_ident() {
                Ok(key) => key,
                Err(e) => return Err(e),
            };
            if p.peek() == Some(b':') {
                // Start of the next descriptor.
                p.pos = mark;
                break;
            }
            p.expect(b'=')?;
            let value = p.parse_value()?;
            p.expect(b';')?;
            pairs.push((key, value));
        }

        descs.push(build_desc(kind, &pairs)?);
    }

    Ok(descs)
}

fn find<'v>(pairs: &'v [(String, Value)], key: &str) -> Option<&'v Value> {
    pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

fn require<'v>(pairs: &'v [(String, Value)], kind: LayerKind, key: &str) -> NnResult<&'v Value> {
    find(pairs, key).ok_or_else(|| {
        NnError::Parse(format!("{} layer requires '{key}'", kind.name()))
    })
}

fn reject_unknown(pairs: &[(String, Value)], kind: LayerKind, known: &[&str]) -> NnResult<()> {
    for (key, _) in pairs {
        if !known.contains(&key.as_str()) {
            return Err(NnError::Parse(format!(
                "unknown key '{key}' in {} layer",
                kind.name()
            )));
        }
    }
    Ok(())
}

fn build_desc(kind: LayerKind, pairs: &[(String, Value)]) -> NnResult<LayerDesc> {
    match kind {
        LayerKind::Input => {
            reject_unknown(pairs, kind, &["shape"])?;
            Ok(LayerDesc::Input {
                shape: require(pairs, kind, "shape")?.as_shape("shape")?,
            })
        }
        LayerKind::Reshape => {
            reject_unknown(pairs, kind, &["shape"])?;
            Ok(LayerDesc::Reshape {
                shape: require(pairs, kind, "shape")?.as_shape("shape")?,
            })
        }
        LayerKind::Flatten => {
            reject_unknown(pairs, kind, &[])?;
            Ok(LayerDesc::Flatten)
        }
        LayerKind::Dense => {
            reject_unknown(pairs, kind, &["size", "weight_init", "bias_init"])?;
            let size = require(pairs, kind, "size")?.as_u32("size")?;
            let mut weight_init = ParamInit::XavierUniform;
            let mut bias_init = ParamInit::Zeros;
            if let Some(v) = find(pairs, "weight_init") {
                weight_init = ParamInit::from_name(v.as_ident("weight_init")?)?;
            }
            if let Some(v) = find(pairs, "bias_init") {
                bias_init = ParamInit::from_name(v.as_ident("bias_init")?)?;
            }
            Ok(LayerDesc::Dense {
                size,
                weight_init,
                bias_init,
            })
        }
        LayerKind::Activation => {
            reject_unknown(pairs, kind, &["func"])?;
            let func = match find(pairs, "func") {
                Some(v) => ActivationKind::from_name(v.as_ident("func")?)?,
                None => ActivationKind::Relu,
            };
            Ok(LayerDesc::Activation { func })
        }
        LayerKind::Dropout => {
            reject_unknown(pairs, kind, &["keep_rate"])?;
            Ok(LayerDesc::Dropout {
                keep_rate: require(pairs, kind, "keep_rate")?.as_f32("keep_rate")?,
            })
        }
        LayerKind::Pooling2d => {
            reject_unknown(pairs, kind, &["pool_size", "pool"])?;
            let pool = match find(pairs, "pool") {
                Some(v) => PoolKind::from_name(v.as_ident("pool")?)?,
                None => PoolKind::Max,
            };
            Ok(LayerDesc::Pooling2d {
                pool_size: require(pairs, kind, "pool_size")?.as_shape("pool_size")?,
                pool,
            })
        }
        LayerKind::Conv2d => {
            reject_unknown(
                pairs,
                kind,
                &[
                    "num_filters",
                    "kernel_size",
                    "padding",
                    "stride",
                    "kernels_init",
                    "biases_init",
                ],
            )?;
            let mut padding = false;
            let mut stride = 1;
            let mut kernels_init = ParamInit::HeNormal;
            let mut biases_init = ParamInit::Zeros;
            if let Some(v) = find(pairs, "padding") {
                padding = v.as_bool("padding")?;
            }
            if let Some(v) = find(pairs, "stride") {
                stride = v.as_u32("stride")?;
            }
            if let Some(v) = find(pairs, "kernels_init") {
                kernels_init = ParamInit::from_name(v.as_ident("kernels_init")?)?;
            }
            if let Some(v) = find(pairs, "biases_init") {
                biases_init = ParamInit::from_name(v.as_ident("biases_init")?)?;
            }
            Ok(LayerDesc::Conv2d {
                num_filters: require(pairs, kind, "num_filters")?.as_u32("num_filters")?,
                kernel_size: require(pairs, kind, "kernel_size")?.as_u32("kernel_size")?,
                padding,
                stride,
                kernels_init,
                biases_init,
            })
        }
        LayerKind::Norm => {
            reject_unknown(pairs, kind, &["epsilon"])?;
            let epsilon = match find(pairs, "epsilon") {
                Some(v) => v.as_f32("epsilon")?,
                None => 1e-8,
            };
            Ok(LayerDesc::Norm { epsilon })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_output_parses_back() {
        let descs = vec![
            LayerDesc::input(Shape::new(28, 28, 1)),
            LayerDesc::conv_2d(8, 3, true),
            LayerDesc::activation(ActivationKind::Relu),
            LayerDesc::pooling_2d(2, 2, PoolKind::Max),
            LayerDesc::flatten(),
            LayerDesc::dense(10),
            LayerDesc::activation(ActivationKind::Softmax),
        ];

        let text = write_descs(&descs);
        assert_eq!(parse_descs(&text).unwrap(), descs);
    }

    #[test]
    fn parses_with_whitespace_stripped() {
        let descs = vec![
            LayerDesc::input(Shape::new(4, 4, 1)),
            LayerDesc::dense(2),
        ];
        let stripped: String = write_descs(&descs)
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        assert_eq!(parse_descs(&stripped).unwrap(), descs);
    }

    #[test]
    fn short_shape_form_defaults_depth() {
        let descs = parse_descs("input: shape = (6, 5);").unwrap();
        assert_eq!(descs, vec![LayerDesc::input(Shape::new(6, 5, 1))]);
    }

    #[test]
    fn optional_keys_fall_back_to_defaults() {
        let descs = parse_descs("conv_2d: num_filters = 4; kernel_size = 3;").unwrap();
        assert_eq!(descs, vec![LayerDesc::conv_2d(4, 3, false)]);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = parse_descs("dense: size = 4; frobnicate = 1;").unwrap_err();
        assert_eq!(err.tag(), "parse");
    }

    #[test]
    fn missing_required_key_is_rejected() {
        assert!(parse_descs("dense: weight_init = zeros;").is_err());
        assert!(parse_descs("input:").is_err());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert_eq!(
            parse_descs("warp_drive: size = 1;").unwrap_err().tag(),
            "invalid-enum"
        );
    }
}
