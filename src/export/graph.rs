//! Graph construction for export
//!
//! [`graph_def`] describes the network as it is trained: every layer as
//! ONNX nodes, dropout included, with parameters declared as named graph
//! inputs. [`freeze_graph`] turns that definition into an inference graph:
//! parameters inlined as initializers, dropout removed, the chain cut after
//! the requested output node.

use std::collections::HashMap;

use burn::{
    module::Param,
    tensor::{backend::Backend, Tensor},
};

use super::onnx::{
    float_attr, float_tensor_info, int_attr, ints_attr, AttributeProto, DataType, GraphProto, NodeProto,
    TensorProto, ValueInfoProto,
};
use crate::model::{BanknoteClassifier, LayerKind, ModelSummary};
use crate::utils::error::{BanknoteError, Result};

const DROPOUT_OP: &str = "Dropout";

/// Name and shape of one trainable tensor in the graph
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub dims: Vec<usize>,
}

fn node(name: String, op_type: &str, input: Vec<String>, attribute: Vec<AttributeProto>) -> NodeProto {
    NodeProto {
        output: vec![name.clone()],
        name,
        op_type: op_type.to_string(),
        input,
        attribute,
        ..Default::default()
    }
}

/// Build the training graph definition from the layer summary
///
/// Node outputs carry the node names, so `dense_2/Softmax` is both the
/// softmax node and the tensor it produces.
pub fn graph_def(summary: &ModelSummary, input_name: &str) -> (GraphProto, Vec<ParameterSpec>) {
    let mut nodes = Vec::new();
    let mut params = Vec::new();
    let mut prev = input_name.to_string();
    let mut channels = summary.input_shape.first().copied().unwrap_or(0);
    let mut spatial = [
        summary.input_shape.get(1).copied().unwrap_or(0),
        summary.input_shape.get(2).copied().unwrap_or(0),
    ];
    let mut features = 0usize;

    for layer in &summary.layers {
        let name = &layer.name;
        let input_spatial = spatial;
        if let [_, h, w] = layer.output_shape[..] {
            spatial = [h, w];
        }
        match &layer.kind {
            LayerKind::Conv2D {
                filters,
                kernel_size,
                strides,
                activation,
                ..
            } => {
                let kernel = format!("{}/kernel", name);
                let bias = format!("{}/bias", name);
                let pad_h = (kernel_size[0] / 2) as i64;
                let pad_w = (kernel_size[1] / 2) as i64;
                params.push(ParameterSpec {
                    name: kernel.clone(),
                    dims: vec![*filters, channels, kernel_size[0], kernel_size[1]],
                });
                params.push(ParameterSpec {
                    name: bias.clone(),
                    dims: vec![*filters],
                });

                let conv = format!("{}/Conv2D", name);
                nodes.push(node(
                    conv.clone(),
                    "Conv",
                    vec![prev, kernel, bias],
                    vec![
                        ints_attr("kernel_shape", &[kernel_size[0] as i64, kernel_size[1] as i64]),
                        ints_attr("pads", &[pad_h, pad_w, pad_h, pad_w]),
                        ints_attr("strides", &[strides[0] as i64, strides[1] as i64]),
                    ],
                ));
                prev = activation_node(&mut nodes, name, activation, conv);
                channels = *filters;
            }
            LayerKind::MaxPooling2D { pool_size, strides, .. } => {
                let pool = format!("{}/MaxPool", name);
                nodes.push(node(
                    pool.clone(),
                    "MaxPool",
                    vec![prev],
                    vec![
                        ints_attr("kernel_shape", &[pool_size[0] as i64, pool_size[1] as i64]),
                        ints_attr("pads", &same_pool_pads(input_spatial, *pool_size, *strides)),
                        ints_attr("strides", &[strides[0] as i64, strides[1] as i64]),
                    ],
                ));
                prev = pool;
            }
            LayerKind::Flatten => {
                let flatten = format!("{}/Reshape", name);
                nodes.push(node(flatten.clone(), "Flatten", vec![prev], vec![int_attr("axis", 1)]));
                prev = flatten;
                features = layer.output_elements();
            }
            LayerKind::Dense { units, activation, .. } => {
                let kernel = format!("{}/kernel", name);
                let bias = format!("{}/bias", name);
                params.push(ParameterSpec {
                    name: kernel.clone(),
                    dims: vec![features, *units],
                });
                params.push(ParameterSpec {
                    name: bias.clone(),
                    dims: vec![*units],
                });

                let gemm = format!("{}/Gemm", name);
                nodes.push(node(
                    gemm.clone(),
                    "Gemm",
                    vec![prev, kernel, bias],
                    vec![int_attr("transB", 0)],
                ));
                prev = activation_node(&mut nodes, name, activation, gemm);
                features = *units;
            }
            LayerKind::Dropout { rate } => {
                let dropout = format!("{}/{}", name, DROPOUT_OP);
                nodes.push(node(
                    dropout.clone(),
                    DROPOUT_OP,
                    vec![prev],
                    vec![float_attr("ratio", *rate as f32)],
                ));
                prev = dropout;
            }
        }
    }

    let mut input_dims = vec![None];
    input_dims.extend(summary.input_shape.iter().map(|&d| Some(d)));
    let mut inputs = vec![float_tensor_info(input_name, &input_dims)];
    inputs.extend(params.iter().map(|p| {
        let dims: Vec<Option<usize>> = p.dims.iter().map(|&d| Some(d)).collect();
        float_tensor_info(&p.name, &dims)
    }));

    let graph = GraphProto {
        name: summary.name.clone(),
        node: nodes,
        input: inputs,
        output: vec![float_tensor_info(&prev, &[None, Some(features)])],
        ..Default::default()
    };
    (graph, params)
}

/// ONNX `[top, left, bottom, right]` pads reproducing `same` pooling:
/// the extra padding goes to the bottom/right
fn same_pool_pads(input: [usize; 2], pool_size: [usize; 2], strides: [usize; 2]) -> [i64; 4] {
    let mut pads = [0i64; 4];
    for axis in 0..2 {
        let out = input[axis].div_ceil(strides[axis].max(1));
        let needed = ((out.saturating_sub(1)) * strides[axis] + pool_size[axis]).saturating_sub(input[axis]);
        pads[axis] = (needed / 2) as i64;
        pads[axis + 2] = (needed - needed / 2) as i64;
    }
    pads
}

fn activation_node(nodes: &mut Vec<NodeProto>, layer: &str, activation: &str, input: String) -> String {
    let (op, attrs) = match activation {
        "relu" => ("Relu", vec![]),
        "softmax" => ("Softmax", vec![int_attr("axis", 1)]),
        _ => return input,
    };
    let name = format!("{}/{}", layer, op);
    nodes.push(node(name.clone(), op, vec![input], attrs));
    name
}

/// Every named output produced by the graph's nodes
pub fn node_outputs(graph: &GraphProto) -> Vec<&str> {
    graph
        .node
        .iter()
        .flat_map(|n| n.output.iter().map(String::as_str))
        .collect()
}

/// Check that the declared endpoints exist in a graph definition
pub fn validate_endpoints(graph: &GraphProto, input_names: &[&str], output_name: &str) -> Result<()> {
    if input_names.is_empty() {
        return Err(BanknoteError::Export("at least one input node is required".to_string()));
    }
    for name in input_names {
        if !graph.input.iter().any(|i| i.name == *name) {
            return Err(BanknoteError::Export(format!("input node '{}' not found in graph", name)));
        }
    }
    if !node_outputs(graph).contains(&output_name) {
        return Err(BanknoteError::Export(format!(
            "output node '{}' not found in graph",
            output_name
        )));
    }
    Ok(())
}

/// Read the trained values of every parameter in graph order
pub fn parameter_tensors<B: Backend>(model: &BanknoteClassifier<B>) -> Result<Vec<(String, Vec<usize>, Vec<f32>)>> {
    let mut tensors = Vec::new();
    let convs = [
        ("conv2d_1", &model.conv2d_1),
        ("conv2d_2", &model.conv2d_2),
        ("conv2d_3", &model.conv2d_3),
    ];
    for (name, conv) in convs {
        tensors.push(param_values(format!("{}/kernel", name), &conv.weight)?);
        tensors.push(bias_values(name, conv.bias.as_ref(), conv.weight.dims()[0])?);
    }
    for (name, dense) in [("dense_1", &model.dense_1), ("dense_2", &model.dense_2)] {
        tensors.push(param_values(format!("{}/kernel", name), &dense.weight)?);
        tensors.push(bias_values(name, dense.bias.as_ref(), dense.weight.dims()[1])?);
    }
    Ok(tensors)
}

fn param_values<B: Backend, const D: usize>(
    name: String,
    param: &Param<Tensor<B, D>>,
) -> Result<(String, Vec<usize>, Vec<f32>)> {
    let tensor = param.val();
    let dims = tensor.dims().to_vec();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| BanknoteError::Export(format!("failed to read '{}': {:?}", name, e)))?;
    Ok((name, dims, values))
}

fn bias_values<B: Backend>(
    layer: &str,
    bias: Option<&Param<Tensor<B, 1>>>,
    units: usize,
) -> Result<(String, Vec<usize>, Vec<f32>)> {
    let name = format!("{}/bias", layer);
    match bias {
        Some(param) => param_values(name, param),
        None => Ok((name, vec![units], vec![0.0; units])),
    }
}

/// Freeze a graph definition with trained parameter values
///
/// Dropout nodes are bypassed, the node chain is cut after the producer of
/// `output_name` and only the initializers still referenced are kept.
pub fn freeze_graph(
    graph_def: &GraphProto,
    params: Vec<(String, Vec<usize>, Vec<f32>)>,
    input_names: &[&str],
    output_name: &str,
) -> Result<GraphProto> {
    validate_endpoints(graph_def, input_names, output_name)?;

    let specs: HashMap<&str, &ValueInfoProto> =
        graph_def.input.iter().map(|i| (i.name.as_str(), i)).collect();

    // Rewire consumers of training-only nodes to their inputs
    let mut bypass: HashMap<String, String> = HashMap::new();
    let mut nodes = Vec::new();
    for node in &graph_def.node {
        let resolve = |name: &String| bypass.get(name).cloned().unwrap_or_else(|| name.clone());
        if node.op_type == DROPOUT_OP {
            if let Some(source) = node.input.first() {
                let source = resolve(source);
                for output in &node.output {
                    bypass.insert(output.clone(), source.clone());
                }
            }
            continue;
        }
        let mut node = node.clone();
        node.input = node.input.iter().map(resolve).collect();
        nodes.push(node);
    }

    let producer = bypass
        .get(output_name)
        .map(String::as_str)
        .unwrap_or(output_name);
    let end = nodes
        .iter()
        .position(|n| n.output.iter().any(|o| o == producer))
        .ok_or_else(|| {
            BanknoteError::Export(format!("output node '{}' is removed when freezing", output_name))
        })?;
    nodes.truncate(end + 1);

    let used: Vec<&str> = nodes.iter().flat_map(|n| n.input.iter().map(String::as_str)).collect();
    let mut initializer = Vec::new();
    for (name, dims, values) in params {
        if !used.contains(&name.as_str()) {
            continue;
        }
        let expected: usize = dims.iter().product();
        if expected != values.len() {
            return Err(BanknoteError::Export(format!(
                "parameter '{}' has {} values for shape {:?}",
                name,
                values.len(),
                dims
            )));
        }
        initializer.push(TensorProto {
            name,
            dims: dims.iter().map(|&d| d as i64).collect(),
            data_type: DataType::Float as i32,
            float_data: values,
            ..Default::default()
        });
    }

    let missing: Vec<&str> = used
        .iter()
        .copied()
        .filter(|name| specs.contains_key(name) && !input_names.contains(name))
        .filter(|name| !initializer.iter().any(|t| t.name == *name))
        .collect();
    if let Some(name) = missing.first() {
        return Err(BanknoteError::Export(format!("no trained value for parameter '{}'", name)));
    }

    let input = input_names
        .iter()
        .filter_map(|name| specs.get(name).map(|info| (*info).clone()))
        .collect();
    let output = graph_def
        .output
        .iter()
        .find(|o| o.name == producer || o.name == output_name)
        .map(|o| ValueInfoProto {
            name: output_name.to_string(),
            ..o.clone()
        })
        .unwrap_or_else(|| float_tensor_info(output_name, &[None]));

    let mut nodes = nodes;
    if producer != output_name {
        // Cut at a bypassed node: expose its source under the requested name
        nodes.push(node(output_name.to_string(), "Identity", vec![producer.to_string()], vec![]));
    }

    Ok(GraphProto {
        name: graph_def.name.clone(),
        node: nodes,
        initializer,
        input,
        output: vec![output],
        doc_string: "frozen inference graph".to_string(),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BanknoteClassifierConfig, INPUT_NODE, OUTPUT_NODE};
    use burn_ndarray::NdArray;

    fn summary() -> ModelSummary {
        let config = BanknoteClassifierConfig::new(2).with_image_size(8);
        ModelSummary::from_config("banknotes_convnet", &config)
    }

    #[test]
    fn test_graph_def_nodes() {
        let (graph, params) = graph_def(&summary(), INPUT_NODE);
        let names: Vec<&str> = graph.node.iter().map(|n| n.name.as_str()).collect();

        assert_eq!(names[0], "conv2d_1/Conv2D");
        assert_eq!(names[1], "conv2d_1/Relu");
        assert_eq!(names[2], "max_pooling2d_1/MaxPool");
        assert!(names.contains(&"flatten_1/Reshape"));
        assert!(names.contains(&"dropout_1/Dropout"));
        assert_eq!(*names.last().unwrap(), OUTPUT_NODE);
        assert_eq!(graph.node[0].input[0], INPUT_NODE);
        assert_eq!(params.len(), 10);
        assert_eq!(params[0].dims, vec![32, 3, 5, 5]);
        assert_eq!(params[6].dims, vec![64, 1024]);
        assert_eq!(graph.input.len(), 11);
    }

    #[test]
    fn test_max_pool_pads_match_same_padding() {
        let config = BanknoteClassifierConfig::new(2).with_image_size(20);
        let summary = ModelSummary::from_config("banknotes_convnet", &config);
        let (graph, _) = graph_def(&summary, INPUT_NODE);

        // 20 -> 10 -> 5 -> 3: only the last pool sees an odd side
        let pads: Vec<Vec<i64>> = graph
            .node
            .iter()
            .filter(|n| n.op_type == "MaxPool")
            .map(|n| n.attribute.iter().find(|a| a.name == "pads").unwrap().ints.clone())
            .collect();
        assert_eq!(pads, vec![vec![0, 0, 0, 0], vec![0, 0, 0, 0], vec![0, 0, 1, 1]]);
        assert_eq!(same_pool_pads([25, 25], [2, 2], [2, 2]), [0, 0, 1, 1]);
    }

    #[test]
    fn test_validate_endpoints() {
        let (graph, _) = graph_def(&summary(), INPUT_NODE);
        assert!(validate_endpoints(&graph, &[INPUT_NODE], OUTPUT_NODE).is_ok());
        assert!(matches!(
            validate_endpoints(&graph, &[INPUT_NODE], "dense_3/Softmax"),
            Err(BanknoteError::Export(_))
        ));
        assert!(matches!(
            validate_endpoints(&graph, &["images"], OUTPUT_NODE),
            Err(BanknoteError::Export(_))
        ));
    }

    #[test]
    fn test_freeze_removes_dropout_and_inlines_weights() {
        let device = Default::default();
        let config = BanknoteClassifierConfig::new(2).with_image_size(8);
        let model = config.init::<NdArray>(&device);
        let summary = ModelSummary::from_config("banknotes_convnet", &config);
        let (def, _) = graph_def(&summary, INPUT_NODE);

        let params = parameter_tensors(&model).unwrap();
        let frozen = freeze_graph(&def, params, &[INPUT_NODE], OUTPUT_NODE).unwrap();

        assert!(frozen.node.iter().all(|n| n.op_type != DROPOUT_OP));
        let gemm = frozen.node.iter().find(|n| n.name == "dense_2/Gemm").unwrap();
        assert_eq!(gemm.input[0], "dense_1/Relu");
        assert_eq!(frozen.initializer.len(), 10);
        assert_eq!(frozen.input.len(), 1);
        assert_eq!(frozen.input[0].name, INPUT_NODE);
        assert_eq!(frozen.output[0].name, OUTPUT_NODE);

        let total: usize = frozen.initializer.iter().map(|t| t.float_data.len()).sum();
        assert_eq!(total, summary.trainable_params());
    }

    #[test]
    fn test_freeze_truncates_at_intermediate_output() {
        let device = Default::default();
        let config = BanknoteClassifierConfig::new(2).with_image_size(8);
        let model = config.init::<NdArray>(&device);
        let summary = ModelSummary::from_config("m", &config);
        let (def, _) = graph_def(&summary, INPUT_NODE);

        let frozen =
            freeze_graph(&def, parameter_tensors(&model).unwrap(), &[INPUT_NODE], "dense_1/Relu").unwrap();
        assert_eq!(frozen.node.last().unwrap().name, "dense_1/Relu");
        assert!(frozen.initializer.iter().all(|t| !t.name.starts_with("dense_2")));
    }
}
