//! ONNX graph helpers
//!
//! Messages come from `onnx-pb`. This module adds small builders for the
//! attributes and value infos the classifier graph uses, and
//! [`to_text_format`], which renders a graph in protobuf text form for the
//! human-readable graph definition.

use std::fmt::Write as _;

pub use onnx_pb::{
    attribute_proto::AttributeType,
    tensor_proto::DataType,
    tensor_shape_proto::{self, dimension},
    type_proto, AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, TensorProto,
    TensorShapeProto, TypeProto, ValueInfoProto,
};

pub const IR_VERSION: i64 = 7;
pub const OPSET_VERSION: i64 = 13;

pub fn ints_attr(name: &str, values: &[i64]) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: AttributeType::Ints as i32,
        ints: values.to_vec(),
        ..Default::default()
    }
}

pub fn int_attr(name: &str, value: i64) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: AttributeType::Int as i32,
        i: value,
        ..Default::default()
    }
}

pub fn float_attr(name: &str, value: f32) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: AttributeType::Float as i32,
        f: value,
        ..Default::default()
    }
}

/// Float tensor value; `None` dims become the symbolic batch dimension `N`
pub fn float_tensor_info(name: &str, dims: &[Option<usize>]) -> ValueInfoProto {
    let dim = dims
        .iter()
        .map(|d| tensor_shape_proto::Dimension {
            value: Some(match d {
                Some(v) => dimension::Value::DimValue(*v as i64),
                None => dimension::Value::DimParam("N".to_string()),
            }),
            ..Default::default()
        })
        .collect();

    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type: DataType::Float as i32,
                shape: Some(TensorShapeProto {
                    dim,
                    ..Default::default()
                }),
                ..Default::default()
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn attribute_type_name(kind: AttributeType) -> &'static str {
    match kind {
        AttributeType::Float => "FLOAT",
        AttributeType::Int => "INT",
        AttributeType::String => "STRING",
        AttributeType::Tensor => "TENSOR",
        AttributeType::Graph => "GRAPH",
        AttributeType::Floats => "FLOATS",
        AttributeType::Ints => "INTS",
        AttributeType::Strings => "STRINGS",
        _ => "UNDEFINED",
    }
}

/// Render a graph in protobuf text format
///
/// Initializer payloads are summarized by name and dims only.
pub fn to_text_format(graph: &GraphProto) -> String {
    let mut out = TextWriter::default();
    out.field("name", &quote(&graph.name));
    for node in &graph.node {
        out.open("node");
        for input in &node.input {
            out.field("input", &quote(input));
        }
        for output in &node.output {
            out.field("output", &quote(output));
        }
        out.field("name", &quote(&node.name));
        out.field("op_type", &quote(&node.op_type));
        for attr in &node.attribute {
            write_attribute(&mut out, attr);
        }
        out.close();
    }
    for tensor in &graph.initializer {
        out.open("initializer");
        for d in &tensor.dims {
            out.field("dims", &d.to_string());
        }
        out.field("data_type", &tensor.data_type.to_string());
        out.field("name", &quote(&tensor.name));
        out.close();
    }
    for info in &graph.input {
        write_value_info(&mut out, "input", info);
    }
    for info in &graph.output {
        write_value_info(&mut out, "output", info);
    }
    out.finish()
}

fn write_attribute(out: &mut TextWriter, attr: &AttributeProto) {
    out.open("attribute");
    out.field("name", &quote(&attr.name));
    let kind = AttributeType::from_i32(attr.r#type).unwrap_or(AttributeType::Undefined);
    match kind {
        AttributeType::Float => out.field("f", &format!("{:?}", attr.f)),
        AttributeType::Int => out.field("i", &attr.i.to_string()),
        AttributeType::String => out.field("s", &quote(&String::from_utf8_lossy(&attr.s))),
        AttributeType::Floats => {
            for v in &attr.floats {
                out.field("floats", &format!("{:?}", v));
            }
        }
        AttributeType::Ints => {
            for v in &attr.ints {
                out.field("ints", &v.to_string());
            }
        }
        _ => {}
    }
    out.field("type", attribute_type_name(kind));
    out.close();
}

fn write_value_info(out: &mut TextWriter, key: &str, info: &ValueInfoProto) {
    out.open(key);
    out.field("name", &quote(&info.name));
    if let Some(type_proto::Value::TensorType(tensor)) = info.r#type.as_ref().and_then(|t| t.value.as_ref()) {
        out.open("type");
        out.open("tensor_type");
        out.field("elem_type", &tensor.elem_type.to_string());
        if let Some(shape) = &tensor.shape {
            out.open("shape");
            for dim in &shape.dim {
                out.open("dim");
                match &dim.value {
                    Some(dimension::Value::DimValue(v)) => {
                        out.field("dim_value", &v.to_string())
                    }
                    Some(dimension::Value::DimParam(p)) => {
                        out.field("dim_param", &quote(p))
                    }
                    None => {}
                }
                out.close();
            }
            out.close();
        }
        out.close();
        out.close();
    }
    out.close();
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

#[derive(Default)]
struct TextWriter {
    buf: String,
    depth: usize,
}

impl TextWriter {
    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.buf.push_str("  ");
        }
    }

    fn field(&mut self, key: &str, value: &str) {
        self.indent();
        let _ = writeln!(self.buf, "{}: {}", key, value);
    }

    fn open(&mut self, key: &str) {
        self.indent();
        let _ = writeln!(self.buf, "{} {{", key);
        self.depth += 1;
    }

    fn close(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.indent();
        self.buf.push_str("}\n");
    }

    fn finish(self) -> String {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    fn sample_graph() -> GraphProto {
        GraphProto {
            name: "g".to_string(),
            node: vec![NodeProto {
                name: "pool/MaxPool".to_string(),
                op_type: "MaxPool".to_string(),
                input: vec!["x".to_string()],
                output: vec!["pool/MaxPool".to_string()],
                attribute: vec![ints_attr("kernel_shape", &[2, 2]), float_attr("ratio", 0.5)],
                ..Default::default()
            }],
            input: vec![float_tensor_info("x", &[None, Some(3), Some(8), Some(8)])],
            output: vec![float_tensor_info("pool/MaxPool", &[None, Some(3), Some(4), Some(4)])],
            ..Default::default()
        }
    }

    #[test]
    fn test_model_decodes_after_encode() {
        let model = ModelProto {
            ir_version: IR_VERSION,
            graph: Some(sample_graph()),
            opset_import: vec![OperatorSetIdProto {
                domain: String::new(),
                version: OPSET_VERSION,
                ..Default::default()
            }],
            ..Default::default()
        };
        let mut bytes = Vec::new();
        model.encode(&mut bytes).unwrap();
        let decoded = ModelProto::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, model);
        assert_eq!(decoded.graph.unwrap().node[0].attribute[0].ints, vec![2, 2]);
    }

    #[test]
    fn test_text_format() {
        let text = to_text_format(&sample_graph());
        assert!(text.starts_with("name: \"g\"\n"));
        assert!(text.contains("node {\n  input: \"x\"\n"));
        assert!(text.contains("    ints: 2\n"));
        assert!(text.contains("    type: INTS\n"));
        assert!(text.contains("    f: 0.5\n"));
        assert!(text.contains("    type: FLOAT\n"));
        assert!(text.contains("dim_param: \"N\""));
        assert!(text.contains("dim_value: 8"));
        assert_eq!(text.matches('{').count(), text.matches('}').count());
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
    }
}
