//! Inference against an exported TensorFlow SavedModel.
//!
//! The export is expected to carry a `predict` signature mapping an `image`
//! input to a `mask` output, the way the training side exports its
//! `tf.function`s.

use std::path::Path;

use anyhow::{anyhow, ensure, Context, Result};
use ndarray::{Array3, ArrayView3};
use tensorflow::{Graph, Operation, SavedModelBundle, Session, SessionOptions, SessionRunArgs, Tensor};

/// One named concrete function of a SavedModel, resolved to its graph
/// operations at load time.
struct ModelFunction {
    name: String,
    input_operation: Operation,
    output_operation: Operation,
}

impl ModelFunction {
    fn new(
        graph: &Graph,
        bundle: &SavedModelBundle,
        name: &str,
        input_name: &str,
        output_name: &str,
    ) -> Result<Self> {
        let signature = bundle
            .meta_graph_def()
            .get_signature(name)
            .map_err(|e| anyhow!("model has no '{name}' signature: {e}"))?;
        let input = signature
            .get_input(input_name)
            .map_err(|e| anyhow!("signature '{name}' has no input '{input_name}': {e}"))?;
        let output = signature
            .get_output(output_name)
            .map_err(|e| anyhow!("signature '{name}' has no output '{output_name}': {e}"))?;

        Ok(Self {
            name: name.to_string(),
            input_operation: graph.operation_by_name_required(&input.name().name)?,
            output_operation: graph.operation_by_name_required(&output.name().name)?,
        })
    }

    fn apply(&self, session: &Session, arg: &Tensor<f32>) -> Result<Tensor<f32>> {
        let mut args = SessionRunArgs::new();
        args.add_feed(&self.input_operation, 0, arg);
        let out = args.request_fetch(&self.output_operation, 0);

        session
            .run(&mut args)
            .with_context(|| format!("calling '{}'", self.name))?;
        Ok(args.fetch(out)?)
    }
}

/// A trained segmentation network loaded for inference.
pub struct SegmentationModel {
    bundle: SavedModelBundle,
    fn_predict: ModelFunction,
}

impl SegmentationModel {
    pub fn load(model_dir: &Path) -> Result<Self> {
        let mut graph = Graph::new();
        let bundle = SavedModelBundle::load(&SessionOptions::new(), ["serve"], &mut graph, model_dir)
            .with_context(|| format!("loading saved model from '{}'", model_dir.display()))?;
        let fn_predict = ModelFunction::new(&graph, &bundle, "predict", "image", "mask")?;
        Ok(Self { bundle, fn_predict })
    }

    /// Run one HWC image through the network, returning the HWC mask.
    pub fn predict(&self, image: ArrayView3<f32>) -> Result<Array3<f32>> {
        let (height, width, channels) = image.dim();
        let mut tensor = Tensor::new(&[1, height as u64, width as u64, channels as u64]);
        for ((y, x, c), &value) in image.indexed_iter() {
            tensor.set(&[0, y as u64, x as u64, c as u64], value);
        }

        let output = self.fn_predict.apply(&self.bundle.session, &tensor)?;
        let dims = output.dims();
        ensure!(
            dims.len() == 4 && dims[0] == 1,
            "expected a single NHWC mask, got dims {:?}",
            dims
        );

        let mut mask = Array3::zeros((dims[1] as usize, dims[2] as usize, dims[3] as usize));
        for ((y, x, c), value) in mask.indexed_iter_mut() {
            *value = output.get(&[0, y as u64, x as u64, c as u64]);
        }
        Ok(mask)
    }
}
